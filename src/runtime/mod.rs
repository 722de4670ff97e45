//! Simulator-side runtime pieces (§4.H–J): resource pools for scheduling
//! conflicting resource use during simulated execution, and the
//! action-point/breakpoint manager used by an (out-of-scope) debug shell.
//! None of this touches instruction *execution* or semantic function
//! bodies — it is bookkeeping around resource reservation and address
//! instrumentation only.
pub mod action_point;
pub mod complex_resource;
pub mod resource_bitset;

use std::collections::HashMap;

use thiserror::Error;

use crate::runtime::resource_bitset::ResourceBitSet;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("resource pool is full (width {0})")]
    PoolFull(usize),
    #[error("unknown resource: {0}")]
    NotFound(String),
}

/// A single named resource with a one-hot bit in its pool's width.
#[derive(Debug, Clone)]
pub struct SimpleResource {
    pub name: String,
    pub index: usize,
    bit: ResourceBitSet,
}

impl SimpleResource {
    fn new(name: &str, index: usize, width: usize) -> Self {
        let mut bit = ResourceBitSet::new(width);
        bit.set(index);
        Self { name: name.to_string(), index, bit }
    }

    pub fn bitset(&self) -> &ResourceBitSet {
        &self.bit
    }
}

/// The union of one or more `SimpleResource` one-hot bits, built up
/// incrementally via `add` rather than constructed from a whole slice at
/// once — mirrored from the original's `SimpleResourceSet::add`.
#[derive(Debug, Clone)]
pub struct SimpleResourceSet {
    mask: ResourceBitSet,
}

impl SimpleResourceSet {
    pub fn new(width: usize) -> Self {
        Self { mask: ResourceBitSet::new(width) }
    }

    pub fn add(&mut self, resource: &SimpleResource) {
        self.mask.or(resource.bitset());
    }

    pub fn bitset(&self) -> &ResourceBitSet {
        &self.mask
    }
}

/// Owns a fixed-width reserved-bit bitset plus a name-indexed table of
/// resources with contiguous indices; the width caps the resource count.
#[derive(Debug, Clone)]
pub struct SimpleResourcePool {
    width: usize,
    reserved: ResourceBitSet,
    by_name: HashMap<String, SimpleResource>,
    next_index: usize,
}

impl SimpleResourcePool {
    pub fn new(width: usize) -> Self {
        Self { width, reserved: ResourceBitSet::new(width), by_name: HashMap::new(), next_index: 0 }
    }

    /// Create the resource if it doesn't exist, allocating its one-hot
    /// bit at the first clear index; otherwise return the existing one.
    pub fn get_or_create(&mut self, name: &str) -> Result<&SimpleResource, RuntimeError> {
        if !self.by_name.contains_key(name) {
            if self.next_index >= self.width {
                return Err(RuntimeError::PoolFull(self.width));
            }
            let index = self.next_index;
            self.next_index += 1;
            self.by_name.insert(name.to_string(), SimpleResource::new(name, index, self.width));
        }
        Ok(self.by_name.get(name).unwrap())
    }

    pub fn get(&self, name: &str) -> Option<&SimpleResource> {
        self.by_name.get(name)
    }

    pub fn is_free(&self, bits: &ResourceBitSet) -> bool {
        !self.reserved.intersects(bits)
    }

    pub fn acquire(&mut self, bits: &ResourceBitSet) {
        self.reserved.or(bits);
    }

    pub fn release(&mut self, bits: &ResourceBitSet) {
        self.reserved.and_not(bits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_allocates_contiguous_one_hot_indices() {
        let mut pool = SimpleResourcePool::new(4);
        let a = pool.get_or_create("alu").unwrap().clone();
        let b = pool.get_or_create("mem").unwrap().clone();
        assert_eq!((a.index, b.index), (0, 1));
    }

    #[test]
    fn pool_rejects_creation_beyond_width() {
        let mut pool = SimpleResourcePool::new(1);
        pool.get_or_create("a").unwrap();
        assert_eq!(pool.get_or_create("b").unwrap_err(), RuntimeError::PoolFull(1));
    }

    #[test]
    fn acquire_release_and_is_free_compose_through_bitset_ops() {
        let mut pool = SimpleResourcePool::new(4);
        let alu = pool.get_or_create("alu").unwrap().clone();
        assert!(pool.is_free(alu.bitset()));
        pool.acquire(alu.bitset());
        assert!(!pool.is_free(alu.bitset()));
        pool.release(alu.bitset());
        assert!(pool.is_free(alu.bitset()));
    }

    #[test]
    fn resource_set_unions_member_bits() {
        let mut pool = SimpleResourcePool::new(4);
        let alu = pool.get_or_create("alu").unwrap().clone();
        let mem = pool.get_or_create("mem").unwrap().clone();
        let mut set = SimpleResourceSet::new(4);
        set.add(&alu);
        set.add(&mem);
        assert!(set.bitset().get(alu.index));
        assert!(set.bitset().get(mem.index));
    }
}

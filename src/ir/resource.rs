/// Named resources and references to them: the code-generator-side model
/// that classifies each resource as "simple" (held from cycle 0) or
/// "complex" (non-zero begin cycle) after all instructions are ingested.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ir::expr::Expr;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
}

/// A named resource. Factory-owned; instructions hold `Rc` clones through
/// `ResourceReference`.
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub pascal_name: String,
    pub is_simple: bool,
    pub is_multi_valued: bool,
}

impl Resource {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pascal_name: crate::ir::pascal_case(name),
            // Assume simple until a reference with a non-zero begin cycle
            // is discovered during `analyze_resource_use`.
            is_simple: true,
            is_multi_valued: false,
        }
    }
}

pub type ResourceHandle = Rc<RefCell<Resource>>;

/// Owns all resources declared within one instruction set.
#[derive(Debug, Default)]
pub struct ResourceFactory {
    resources: Vec<ResourceHandle>,
    by_name: HashMap<String, usize>,
}

impl ResourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str) -> Result<ResourceHandle, ResourceError> {
        if self.by_name.contains_key(name) {
            return Err(ResourceError::AlreadyExists(name.to_string()));
        }
        let handle = Rc::new(RefCell::new(Resource::new(name)));
        self.by_name.insert(name.to_string(), self.resources.len());
        self.resources.push(handle.clone());
        Ok(handle)
    }

    /// Create the resource if it doesn't exist yet, otherwise return the
    /// existing one.
    pub fn get_or_insert(&mut self, name: &str) -> ResourceHandle {
        if let Some(&idx) = self.by_name.get(name) {
            return self.resources[idx].clone();
        }
        self.create(name).expect("just checked absence")
    }

    pub fn get(&self, name: &str) -> Option<ResourceHandle> {
        self.by_name.get(name).map(|&idx| self.resources[idx].clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Which destination operand (by name) a resource use targets, if any.
#[derive(Debug, Clone)]
pub struct ResourceReference {
    pub resource: ResourceHandle,
    pub is_array: bool,
    pub dest_op: Option<String>,
    pub begin_expr: Option<Expr>,
    pub end_expr: Option<Expr>,
}

impl ResourceReference {
    pub fn new(resource: ResourceHandle, is_array: bool, dest_op: Option<String>) -> Self {
        Self { resource, is_array, dest_op, begin_expr: None, end_expr: None }
    }

    /// Deep-copy the owned begin/end expressions; the resource handle
    /// itself is shared (a borrow), matching the source's
    /// reference-owns-expressions / factory-owns-resource split.
    pub fn deep_copy(&self) -> ResourceReference {
        ResourceReference {
            resource: self.resource.clone(),
            is_array: self.is_array,
            dest_op: self.dest_op.clone(),
            begin_expr: self.begin_expr.as_ref().map(Expr::deep_copy),
            end_expr: self.end_expr.as_ref().map(Expr::deep_copy),
        }
    }

    /// Re-evaluate begin/end against instantiation arguments, producing a
    /// fresh, independent reference to the same resource.
    pub fn evaluate(&self, args: &[Expr]) -> Result<ResourceReference, crate::ir::expr::EvalError> {
        Ok(ResourceReference {
            resource: self.resource.clone(),
            is_array: self.is_array,
            dest_op: self.dest_op.clone(),
            begin_expr: self.begin_expr.as_ref().map(|e| e.evaluate(Some(args))).transpose()?,
            end_expr: self.end_expr.as_ref().map(|e| e.evaluate(Some(args))).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicates() {
        let mut factory = ResourceFactory::new();
        factory.create("alu").unwrap();
        let err = factory.create("alu").unwrap_err();
        assert_eq!(err, ResourceError::AlreadyExists("alu".to_string()));
    }

    #[test]
    fn get_or_insert_is_idempotent() {
        let mut factory = ResourceFactory::new();
        let a = factory.get_or_insert("mem_port");
        let b = factory.get_or_insert("mem_port");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().pascal_name, "MemPort");
    }

    #[test]
    fn reference_deep_copy_is_independent() {
        let mut factory = ResourceFactory::new();
        let r = factory.create("r").unwrap();
        let mut reference = ResourceReference::new(r, false, None);
        reference.begin_expr = Some(Expr::param(0, "lat"));
        let copy = reference.deep_copy();
        let evaluated = copy.evaluate(&[Expr::constant(3)]).unwrap();
        assert_eq!(evaluated.begin_expr.unwrap().value().unwrap().as_int(), 3);
        // Original untouched.
        assert!(reference.begin_expr.unwrap().value().is_err());
    }
}

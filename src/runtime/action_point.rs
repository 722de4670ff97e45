//! Action-point and breakpoint management. An action point is a callback
//! registered at an address; a breakpoint is a thin façade over action
//! points whose callback invokes a supplied halt function, with address
//! as its identity (only one breakpoint per address) rather than the
//! per-address id actions use.
use std::collections::BTreeMap;

use log::warn;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionPointError {
    #[error("no action point {1} at address {0:#x}")]
    NotFound(u64, u64),
    #[error("no breakpoint at address {0:#x}")]
    NoBreakpoint(u64),
}

/// The memory-side effects an action point's lifecycle drives: installing
/// or removing the trap instruction, and invalidating any cached decode
/// of the affected address (§6's "must additionally invalidate" clause).
pub trait MemoryInterface {
    fn write_breakpoint_instruction(&mut self, addr: u64);
    fn write_original_instruction(&mut self, addr: u64);
    fn invalidate_decode_cache(&mut self, addr: u64);
}

pub type Action = fn(u64);

struct ActionRecord {
    action: Action,
    enabled: bool,
}

struct AddressEntry {
    next_id: u64,
    active_count: u64,
    actions: BTreeMap<u64, ActionRecord>,
}

impl AddressEntry {
    fn new() -> Self {
        Self { next_id: 0, active_count: 0, actions: BTreeMap::new() }
    }
}

/// Per-address id -> {action, enabled} bookkeeping, with active-count
/// tracked to decide when to toggle the underlying trap instruction.
#[derive(Default)]
pub struct ActionPointManager {
    entries: BTreeMap<u64, AddressEntry>,
}

impl ActionPointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an enabled action at `addr`, installing the trap
    /// instruction if this is the first active action there.
    pub fn set_action(&mut self, mem: &mut impl MemoryInterface, addr: u64, action: Action) -> u64 {
        let entry = self.entries.entry(addr).or_insert_with(AddressEntry::new);
        if entry.active_count == 0 {
            mem.write_breakpoint_instruction(addr);
            mem.invalidate_decode_cache(addr);
        }
        let id = entry.next_id;
        entry.next_id += 1;
        entry.actions.insert(id, ActionRecord { action, enabled: true });
        entry.active_count += 1;
        id
    }

    pub fn clear_action(
        &mut self,
        mem: &mut impl MemoryInterface,
        addr: u64,
        id: u64,
    ) -> Result<(), ActionPointError> {
        let entry = self.entries.get_mut(&addr).ok_or(ActionPointError::NotFound(addr, id))?;
        let record = entry.actions.remove(&id).ok_or(ActionPointError::NotFound(addr, id))?;
        if record.enabled {
            entry.active_count -= 1;
            if entry.active_count == 0 {
                mem.write_original_instruction(addr);
                mem.invalidate_decode_cache(addr);
            }
        }
        if entry.actions.is_empty() {
            self.entries.remove(&addr);
        }
        Ok(())
    }

    pub fn enable_action(
        &mut self,
        mem: &mut impl MemoryInterface,
        addr: u64,
        id: u64,
    ) -> Result<(), ActionPointError> {
        let entry = self.entries.get_mut(&addr).ok_or(ActionPointError::NotFound(addr, id))?;
        let record = entry.actions.get_mut(&id).ok_or(ActionPointError::NotFound(addr, id))?;
        if !record.enabled {
            record.enabled = true;
            entry.active_count += 1;
            if entry.active_count == 1 {
                mem.write_breakpoint_instruction(addr);
                mem.invalidate_decode_cache(addr);
            }
        }
        Ok(())
    }

    pub fn disable_action(
        &mut self,
        mem: &mut impl MemoryInterface,
        addr: u64,
        id: u64,
    ) -> Result<(), ActionPointError> {
        let entry = self.entries.get_mut(&addr).ok_or(ActionPointError::NotFound(addr, id))?;
        let record = entry.actions.get_mut(&id).ok_or(ActionPointError::NotFound(addr, id))?;
        if record.enabled {
            record.enabled = false;
            entry.active_count -= 1;
            if entry.active_count == 0 {
                mem.write_original_instruction(addr);
                mem.invalidate_decode_cache(addr);
            }
        }
        Ok(())
    }

    /// Run each enabled action at `addr` in id order. An unknown address
    /// is logged, not fatal, per §4.J.
    pub fn perform_actions(&self, addr: u64) {
        match self.entries.get(&addr) {
            None => warn!("perform_actions at unknown address {addr:#x}"),
            Some(entry) => {
                for (_, record) in entry.actions.iter() {
                    if record.enabled {
                        (record.action)(addr);
                    }
                }
            }
        }
    }

    pub fn is_enabled(&self, addr: u64, id: u64) -> bool {
        self.entries.get(&addr).and_then(|e| e.actions.get(&id)).is_some_and(|r| r.enabled)
    }

    pub fn has_actions(&self, addr: u64) -> bool {
        self.entries.get(&addr).is_some_and(|e| !e.actions.is_empty())
    }
}

/// A breakpoint at `addr` is exactly one action point there whose
/// callback invokes `halt`; address identity means setting a second
/// breakpoint at the same address is a no-op returning the existing one.
pub struct BreakpointManager {
    action_points: ActionPointManager,
    ids: BTreeMap<u64, u64>,
    halt: Action,
}

impl BreakpointManager {
    pub fn new(halt: Action) -> Self {
        Self { action_points: ActionPointManager::new(), ids: BTreeMap::new(), halt }
    }

    pub fn set_breakpoint(&mut self, mem: &mut impl MemoryInterface, addr: u64) -> u64 {
        if let Some(&id) = self.ids.get(&addr) {
            return id;
        }
        let id = self.action_points.set_action(mem, addr, self.halt);
        self.ids.insert(addr, id);
        id
    }

    pub fn clear_breakpoint(&mut self, mem: &mut impl MemoryInterface, addr: u64) -> Result<(), ActionPointError> {
        let id = self.ids.remove(&addr).ok_or(ActionPointError::NoBreakpoint(addr))?;
        self.action_points.clear_action(mem, addr, id)
    }

    pub fn is_set(&self, addr: u64) -> bool {
        self.ids.contains_key(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeMemory {
        breakpoint_writes: Vec<u64>,
        original_writes: Vec<u64>,
    }

    impl MemoryInterface for FakeMemory {
        fn write_breakpoint_instruction(&mut self, addr: u64) {
            self.breakpoint_writes.push(addr);
        }
        fn write_original_instruction(&mut self, addr: u64) {
            self.original_writes.push(addr);
        }
        fn invalidate_decode_cache(&mut self, _addr: u64) {}
    }

    fn noop(_addr: u64) {}

    thread_local! {
        static FIRED: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    fn action_a(_addr: u64) {
        FIRED.with(|f| f.borrow_mut().push("A"));
    }
    fn action_b(_addr: u64) {
        FIRED.with(|f| f.borrow_mut().push("B"));
    }

    #[test]
    fn s6_action_multiplexing() {
        let mut mem = FakeMemory::default();
        let mut mgr = ActionPointManager::new();

        let id_a = mgr.set_action(&mut mem, 0x100, action_a);
        let id_b = mgr.set_action(&mut mem, 0x100, action_b);
        assert_eq!(mem.breakpoint_writes, vec![0x100]);

        mgr.disable_action(&mut mem, 0x100, id_a).unwrap();
        assert!(mem.original_writes.is_empty());

        mgr.disable_action(&mut mem, 0x100, id_b).unwrap();
        assert_eq!(mem.original_writes, vec![0x100]);

        mgr.enable_action(&mut mem, 0x100, id_a).unwrap();
        assert_eq!(mem.breakpoint_writes, vec![0x100, 0x100]);

        FIRED.with(|f| f.borrow_mut().clear());
        mgr.perform_actions(0x100);
        FIRED.with(|f| assert_eq!(*f.borrow(), vec!["A"]));
    }

    #[test]
    fn clear_action_restores_original_when_last_removed() {
        let mut mem = FakeMemory::default();
        let mut mgr = ActionPointManager::new();
        let id = mgr.set_action(&mut mem, 0x200, noop);
        mgr.clear_action(&mut mem, 0x200, id).unwrap();
        assert_eq!(mem.original_writes, vec![0x200]);
        assert!(!mgr.has_actions(0x200));
    }

    #[test]
    fn unknown_address_is_logged_not_fatal() {
        let mgr = ActionPointManager::new();
        mgr.perform_actions(0xdead);
    }

    #[test]
    fn breakpoint_manager_shares_address_identity() {
        let mut mem = FakeMemory::default();
        let mut bp = BreakpointManager::new(noop);
        let id1 = bp.set_breakpoint(&mut mem, 0x300);
        let id2 = bp.set_breakpoint(&mut mem, 0x300);
        assert_eq!(id1, id2);
        assert_eq!(mem.breakpoint_writes, vec![0x300]);
        bp.clear_breakpoint(&mut mem, 0x300).unwrap();
        assert!(!bp.is_set(0x300));
    }
}

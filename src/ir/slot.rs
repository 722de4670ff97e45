/// A named issue slot: the opcodes it contains, single-chain inheritance
/// from base slots, template formals/constants, and code emission inputs.
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use crate::ir::expr::Expr;
use crate::ir::instruction::{Instruction, InstructionError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("{0} already exists in slot {1}")]
    AlreadyExists(String, String),
    #[error("base slot would introduce a cycle: {0}")]
    CyclicInheritance(String),
    #[error(transparent)]
    Instruction(#[from] InstructionError),
    #[error("destination latency for opcode {0} does not fold to a non-negative integer")]
    InvalidLatency(String),
}

pub type SlotHandle = Rc<RefCell<Slot>>;

#[derive(Debug)]
pub struct Slot {
    pub name: String,
    pub pascal_name: String,
    pub is_templated: bool,
    pub template_formals: Vec<String>,
    pub template_formal_index: HashMap<String, usize>,
    pub constants: BTreeMap<String, Expr>,
    pub base_slots: Vec<(SlotHandle, Option<Vec<Expr>>)>,
    /// Transitive closure of bases, used to reject cycles at `add_base`
    /// time (the inheritance graph is a forest, not a DAG).
    predecessors: HashSet<String>,
    pub default_instruction: Option<Instruction>,
    pub default_latency: Option<Expr>,
    pub default_instruction_size: u32,
    pub min_instruction_size: u32,
    pub size: usize,
    pub attribute_defaults: BTreeMap<String, Expr>,
    pub instructions: BTreeMap<String, Instruction>,
    pub is_referenced: bool,
    is_marked: bool,
}

impl Slot {
    pub fn new(name: &str) -> Self {
        let mut predecessors = HashSet::new();
        predecessors.insert(name.to_string());
        Self {
            name: name.to_string(),
            pascal_name: crate::ir::pascal_case(name),
            is_templated: false,
            template_formals: Vec::new(),
            template_formal_index: HashMap::new(),
            constants: BTreeMap::new(),
            base_slots: Vec::new(),
            predecessors,
            default_instruction: None,
            default_latency: None,
            default_instruction_size: 0,
            min_instruction_size: 0,
            size: 1,
            attribute_defaults: BTreeMap::new(),
            instructions: BTreeMap::new(),
            is_referenced: false,
            is_marked: false,
        }
    }

    pub fn add_template_formal(&mut self, name: &str) -> Result<usize, SlotError> {
        if self.template_formal_index.contains_key(name) {
            return Err(SlotError::AlreadyExists("template formal".to_string(), name.to_string()));
        }
        let index = self.template_formals.len();
        self.template_formals.push(name.to_string());
        self.template_formal_index.insert(name.to_string(), index);
        self.is_templated = true;
        Ok(index)
    }

    pub fn add_constant(&mut self, ident: &str, expr: Expr) -> Result<(), SlotError> {
        if self.template_formal_index.contains_key(ident) || self.constants.contains_key(ident) {
            return Err(SlotError::AlreadyExists("constant".to_string(), ident.to_string()));
        }
        self.constants.insert(ident.to_string(), expr);
        Ok(())
    }

    /// Reject a base whose predecessor set already intersects this
    /// slot's (a cycle, or re-inheriting a slot already reached through
    /// another chain), then record the base and its template args.
    pub fn add_base(
        self_handle: &SlotHandle,
        base: &SlotHandle,
        args: Option<Vec<Expr>>,
    ) -> Result<(), SlotError> {
        {
            let self_ref = self_handle.borrow();
            let base_ref = base.borrow();
            if self_ref.predecessors.contains(&base_ref.name)
                || base_ref.predecessors.contains(&self_ref.name)
            {
                return Err(SlotError::CyclicInheritance(base_ref.name.clone()));
            }
        }
        let base_predecessors: Vec<String> = base.borrow().predecessors.iter().cloned().collect();
        let mut self_mut = self_handle.borrow_mut();
        for p in base_predecessors {
            self_mut.predecessors.insert(p);
        }
        self_mut.base_slots.push((base.clone(), args));
        Ok(())
    }

    /// Admit an instruction that is not templated: validate destination
    /// latencies fold to non-negative integers, reject duplicate opcode
    /// names.
    pub fn append_instruction(&mut self, inst: Instruction) -> Result<(), SlotError> {
        let name = inst.opcode.name.clone();
        if self.instructions.contains_key(&name) {
            return Err(SlotError::AlreadyExists("opcode".to_string(), name));
        }
        if !self.is_templated {
            let ok = inst
                .opcode
                .validate_dest_latencies(|l| l >= 0)
                .map_err(InstructionError::from)?;
            if !ok {
                return Err(SlotError::InvalidLatency(name));
            }
        }
        self.instructions.insert(name, inst);
        Ok(())
    }

    /// Derive `inst` against `args` (§4.D) and admit the result. On
    /// admission failure the derived instruction is simply dropped.
    pub fn append_inherited_instruction(
        &mut self,
        inst: &Instruction,
        opcode_factory: &crate::ir::opcode::OpcodeFactory,
        args: &[Expr],
    ) -> Result<(), SlotError> {
        let derived = inst.create_derived(opcode_factory, args)?;
        self.append_instruction(derived)
    }

    pub fn remove_instruction(&mut self, opcode_name: &str) -> Option<Instruction> {
        self.instructions.remove(opcode_name)
    }

    /// Resolve a name against: template formal -> slot constant. Callers
    /// that also need global/ISA scope chain this with
    /// `InstructionSet::resolve_constant`.
    pub fn resolve_local(&self, name: &str) -> Option<Expr> {
        if let Some(&index) = self.template_formal_index.get(name) {
            return Some(Expr::param(index, name));
        }
        self.constants.get(name).map(Expr::deep_copy)
    }

    pub(crate) fn mark(&mut self) -> bool {
        if self.is_marked {
            return false;
        }
        self.is_marked = true;
        true
    }

    pub(crate) fn reset_mark(&mut self) {
        self.is_marked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn handle(name: &str) -> SlotHandle {
        Rc::new(RefCell::new(Slot::new(name)))
    }

    #[test]
    fn add_base_rejects_self_cycle() {
        let a = handle("A");
        let err = Slot::add_base(&a, &a, None).unwrap_err();
        assert_eq!(err, SlotError::CyclicInheritance("A".to_string()));
    }

    #[test]
    fn add_base_rejects_diamond_inheritance() {
        // A <- B <- C, then C tries to also inherit A directly: rejected,
        // since A is already a predecessor of C via B.
        let a = handle("A");
        let b = handle("B");
        let c = handle("C");
        Slot::add_base(&b, &a, None).unwrap();
        Slot::add_base(&c, &b, None).unwrap();
        let err = Slot::add_base(&c, &a, None).unwrap_err();
        assert_eq!(err, SlotError::CyclicInheritance("A".to_string()));
    }

    #[test]
    fn add_base_rejects_reentry_cycle() {
        let a = handle("A");
        let b = handle("B");
        Slot::add_base(&b, &a, None).unwrap();
        // A trying to inherit from B, which already has A as a predecessor.
        let err = Slot::add_base(&a, &b, None).unwrap_err();
        assert_eq!(err, SlotError::CyclicInheritance("B".to_string()));
    }

    #[test]
    fn add_base_succeeds_for_acyclic_chain() {
        let a = handle("A");
        let b = handle("B");
        assert!(Slot::add_base(&b, &a, None).is_ok());
        assert!(b.borrow().predecessors.contains("A"));
    }

    #[test]
    fn template_formal_and_constant_rejects_duplicates() {
        let mut slot = Slot::new("S");
        slot.add_template_formal("w").unwrap();
        assert_eq!(
            slot.add_template_formal("w").unwrap_err(),
            SlotError::AlreadyExists("template formal".to_string(), "w".to_string())
        );
        slot.add_constant("k", Expr::constant(1)).unwrap();
        assert_eq!(
            slot.add_constant("k", Expr::constant(2)).unwrap_err(),
            SlotError::AlreadyExists("constant".to_string(), "k".to_string())
        );
        // A constant can't shadow a formal either.
        assert_eq!(
            slot.add_constant("w", Expr::constant(2)).unwrap_err(),
            SlotError::AlreadyExists("constant".to_string(), "w".to_string())
        );
    }

    #[test]
    fn append_instruction_rejects_duplicate_opcode() {
        let mut opcode_factory = crate::ir::opcode::OpcodeFactory::new();
        let op = opcode_factory.create("add").unwrap();
        let mut slot = Slot::new("S");
        slot.append_instruction(Instruction::new(op.clone())).unwrap();
        let err = slot.append_instruction(Instruction::new(op)).unwrap_err();
        assert_eq!(err, SlotError::AlreadyExists("opcode".to_string(), "add".to_string()));
    }

    #[test]
    fn append_instruction_validates_latency_when_not_templated() {
        let mut opcode_factory = crate::ir::opcode::OpcodeFactory::new();
        let mut opcode = (*opcode_factory.create("add").unwrap()).clone();
        opcode.destination_operands.push(crate::ir::opcode::DestinationOperand::new(
            "rd",
            false,
            Some(Expr::constant(-5)),
        ));
        let mut slot = Slot::new("S");
        let err = slot.append_instruction(Instruction::new(Rc::new(opcode))).unwrap_err();
        assert_eq!(err, SlotError::InvalidLatency("add".to_string()));
    }

    #[test]
    fn resolve_local_prefers_template_formal_over_constant() {
        let mut slot = Slot::new("S");
        slot.add_template_formal("n").unwrap();
        let resolved = slot.resolve_local("n").unwrap();
        match resolved {
            Expr::Param(0, _) => {}
            other => panic!("expected Param(0), got {other:?}"),
        }
    }
}

/// Per-slot specialization of an opcode: disassembly, semantic-function
/// code string, resource use/acquire, and attributes, with a linear child
/// chain and derived-instruction instantiation through inheritance.
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ir::expr::{EvalError, Expr};
use crate::ir::opcode::{Opcode, OpcodeError, OpcodeFactory};
use crate::ir::resource::ResourceReference;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstructionError {
    #[error(transparent)]
    Opcode(#[from] OpcodeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// One fragment of a compiled disassembly template: either literal text
/// or a reference to an operand resolved through the opcode's locator map
/// at emission time (see `crate::codegen::disasm`).
#[derive(Debug, Clone)]
pub enum DisasmFragment {
    Literal(String),
    Operand(String),
}

pub type DisasmFormat = Vec<DisasmFragment>;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Rc<Opcode>,
    pub child: Option<Box<Instruction>>,
    pub semfunc_code: Option<String>,
    pub resource_use: Vec<ResourceReference>,
    pub resource_acquire: Vec<ResourceReference>,
    pub disasm_format: Vec<DisasmFormat>,
    pub attributes: BTreeMap<String, Expr>,
}

impl Instruction {
    pub fn new(opcode: Rc<Opcode>) -> Self {
        Self {
            opcode,
            child: None,
            semfunc_code: None,
            resource_use: Vec::new(),
            resource_acquire: Vec::new(),
            disasm_format: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Link `child` at the end of the (expected-short) child chain.
    pub fn append_child(&mut self, child: Instruction) {
        match &mut self.child {
            None => self.child = Some(Box::new(child)),
            Some(existing) => existing.append_child(child),
        }
    }

    /// Insert or replace an attribute. A replaced expression is simply
    /// dropped (Rust drops the old `Expr` value automatically).
    pub fn add_instruction_attribute(&mut self, name: &str, expr: Expr) {
        self.attributes.insert(name.to_string(), expr);
    }

    /// An attribute mentioned with no value defaults to `Constant(1)`.
    pub fn add_instruction_attribute_flag(&mut self, name: &str) {
        self.add_instruction_attribute(name, Expr::constant(1));
    }

    pub fn clear_disasm_format(&mut self) {
        self.disasm_format.clear();
    }

    pub fn clear_semfunc_code_string(&mut self) {
        self.semfunc_code = None;
    }

    pub fn clear_resource_specs(&mut self) {
        self.resource_use.clear();
        self.resource_acquire.clear();
    }

    pub fn clear_attribute_specs(&mut self) {
        self.attributes.clear();
    }

    /// Opcode's destination operand by name, recursing through the child
    /// chain (children may define additional destination operands).
    pub fn get_dest_op(&self, name: &str) -> Option<&crate::ir::opcode::DestinationOperand> {
        self.opcode
            .get_dest_op(name)
            .or_else(|| self.child.as_deref().and_then(|c| c.get_dest_op(name)))
    }

    /// Central inheritance-instantiation operation: derive the opcode,
    /// deep-copy disassembly/semfunc, re-evaluate every resource
    /// reference and attribute against `args`, and recurse on the child.
    pub fn create_derived(
        &self,
        opcode_factory: &OpcodeFactory,
        args: &[Expr],
    ) -> Result<Instruction, InstructionError> {
        let derived_opcode = opcode_factory.create_derived(&self.opcode, args)?;

        let mut resource_use = Vec::with_capacity(self.resource_use.len());
        for r in &self.resource_use {
            resource_use.push(r.evaluate(args)?);
        }
        let mut resource_acquire = Vec::with_capacity(self.resource_acquire.len());
        for r in &self.resource_acquire {
            resource_acquire.push(r.evaluate(args)?);
        }

        let mut attributes = BTreeMap::new();
        for (name, expr) in &self.attributes {
            attributes.insert(name.clone(), expr.evaluate(Some(args))?);
        }

        let child = match &self.child {
            None => None,
            Some(c) => Some(Box::new(c.create_derived(opcode_factory, args)?)),
        };

        Ok(Instruction {
            opcode: derived_opcode,
            child,
            semfunc_code: self.semfunc_code.clone(),
            resource_use,
            resource_acquire,
            disasm_format: self.disasm_format.clone(),
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::resource::ResourceFactory;

    #[test]
    fn append_child_links_at_tail() {
        let mut factory = OpcodeFactory::new();
        let op = factory.create("add").unwrap();
        let mut inst = Instruction::new(op.clone());
        inst.append_child(Instruction::new(factory.create("add.p").unwrap()));
        inst.append_child(Instruction::new(factory.create("add.pp").unwrap()));
        let first_child = inst.child.as_ref().unwrap();
        let second_child = first_child.child.as_ref().unwrap();
        assert_eq!(second_child.opcode.name, "add.pp");
        assert!(second_child.child.is_none());
    }

    #[test]
    fn attribute_replace_drops_old_expr() {
        let mut factory = OpcodeFactory::new();
        let op = factory.create("add").unwrap();
        let mut inst = Instruction::new(op);
        inst.add_instruction_attribute("cc", Expr::constant(1));
        inst.add_instruction_attribute("cc", Expr::constant(2));
        assert_eq!(inst.attributes["cc"].value().unwrap().as_int(), 2);
    }

    #[test]
    fn attribute_flag_defaults_to_one() {
        let mut factory = OpcodeFactory::new();
        let op = factory.create("add").unwrap();
        let mut inst = Instruction::new(op);
        inst.add_instruction_attribute_flag("side_effect_free");
        assert_eq!(inst.attributes["side_effect_free"].value().unwrap().as_int(), 1);
    }

    #[test]
    fn s3_slot_inheritance_override_latency() {
        let mut opcode_factory = OpcodeFactory::new();
        let mut base_opcode = (*opcode_factory.create("add").unwrap()).clone();
        base_opcode.destination_operands.push(crate::ir::opcode::DestinationOperand::new(
            "rd",
            false,
            Some(Expr::constant(1)),
        ));
        let base_inst = Instruction::new(Rc::new(base_opcode));

        // Derive with an args vector whose only effect here is overriding
        // latency to 3 via a template-formal-style expression on the copy.
        let mut overridden_opcode = (*base_inst.opcode).clone();
        overridden_opcode.destination_operands[0].latency_expr = Some(Expr::constant(3));
        let child_inst = Instruction::new(Rc::new(overridden_opcode));

        assert_eq!(base_inst.opcode.destination_operands[0].get_latency().unwrap(), 1);
        assert_eq!(child_inst.opcode.destination_operands[0].get_latency().unwrap(), 3);
    }

    #[test]
    fn create_derived_propagates_resource_and_attribute_evaluation() {
        let mut opcode_factory = OpcodeFactory::new();
        let mut resource_factory = ResourceFactory::new();
        let op = opcode_factory.create("mul").unwrap();
        let r = resource_factory.create("alu").unwrap();
        let mut inst = Instruction::new(op);
        let mut reference = ResourceReference::new(r, false, None);
        reference.begin_expr = Some(Expr::param(0, "b"));
        inst.resource_use.push(reference);
        inst.add_instruction_attribute("latency", Expr::param(0, "b"));

        let derived = inst.create_derived(&opcode_factory, &[Expr::constant(2)]).unwrap();
        assert_eq!(derived.resource_use[0].begin_expr.as_ref().unwrap().value().unwrap().as_int(), 2);
        assert_eq!(derived.attributes["latency"].value().unwrap().as_int(), 2);
    }

    #[test]
    fn create_derived_fails_on_divide_by_zero_attribute() {
        let mut opcode_factory = OpcodeFactory::new();
        let op = opcode_factory.create("div").unwrap();
        let mut inst = Instruction::new(op);
        inst.add_instruction_attribute(
            "x",
            Expr::Binary(crate::ir::expr::BinaryOp::Div, Box::new(Expr::constant(1)), Box::new(Expr::param(0, "z"))),
        );
        let err = inst.create_derived(&opcode_factory, &[Expr::constant(0)]).unwrap_err();
        assert_eq!(err, InstructionError::Eval(EvalError::DivideByZero));
    }
}

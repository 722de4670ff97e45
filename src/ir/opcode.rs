/// Globally unique opcodes within an instruction set: operand name lists,
/// destination-latency expressions, and derived-opcode instantiation
/// through expression re-evaluation.
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ir::expr::{EvalError, Expr};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpcodeError {
    #[error("opcode already exists: {0}")]
    AlreadyExists(String),
    #[error("empty opcode name")]
    EmptyName,
    #[error("latency evaluation failed: {0}")]
    LatencyEval(EvalError),
}

impl From<EvalError> for OpcodeError {
    fn from(e: EvalError) -> Self {
        OpcodeError::LatencyEval(e)
    }
}

#[derive(Debug, Clone)]
pub struct DestinationOperand {
    pub name: String,
    pub pascal_case_name: String,
    pub is_array: bool,
    /// Absent means "latency computed at decode time".
    pub latency_expr: Option<Expr>,
}

impl DestinationOperand {
    pub fn new(name: &str, is_array: bool, latency_expr: Option<Expr>) -> Self {
        Self {
            name: name.to_string(),
            pascal_case_name: crate::ir::pascal_case(name),
            is_array,
            latency_expr,
        }
    }

    /// `-1` if the expression is absent (decode-time latency); the
    /// folded integer value otherwise; an error if it doesn't fold to a
    /// constant integer.
    pub fn get_latency(&self) -> Result<i64, OpcodeError> {
        match &self.latency_expr {
            None => Ok(-1),
            Some(e) => Ok(e.value()?.as_int()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Opcode {
    pub name: String,
    pub pascal_name: String,
    /// `1..n` in insertion order; `-1` for default/child opcodes.
    pub id: i64,
    pub instruction_size: u32,
    pub predicate_operand: Option<String>,
    pub source_operands: Vec<(String, bool)>,
    pub destination_operands: Vec<DestinationOperand>,
    pub child: Option<Box<Opcode>>,
    pub operand_locators: HashMap<String, OperandLocator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Predicate,
    Source,
    Destination,
}

#[derive(Debug, Clone, Copy)]
pub struct OperandLocator {
    pub op_spec_number: u32,
    pub kind: OperandKind,
    pub instance: u32,
}

impl Opcode {
    /// Skips any destination operand with no expression at all (latency
    /// computed at decode time): only a *present* expression is subject
    /// to `pred`, so one that folds to the same sentinel `get_latency`
    /// uses for "absent" is still validated, not waved through.
    pub fn validate_dest_latencies(&self, pred: impl Fn(i64) -> bool) -> Result<bool, OpcodeError> {
        for dest in &self.destination_operands {
            if dest.latency_expr.is_none() {
                continue;
            }
            if !pred(dest.get_latency()?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_dest_op(&self, name: &str) -> Option<&DestinationOperand> {
        self.destination_operands
            .iter()
            .find(|d| d.name == name)
            .or_else(|| self.child.as_deref().and_then(|c| c.get_dest_op(name)))
    }
}

/// Owns all opcodes for one instruction set, assigning sequential ids.
#[derive(Debug, Default)]
pub struct OpcodeFactory {
    opcodes: Vec<Rc<Opcode>>,
    by_name: HashMap<String, usize>,
    next_id: i64,
}

impl OpcodeFactory {
    pub fn new() -> Self {
        Self { opcodes: Vec::new(), by_name: HashMap::new(), next_id: 1 }
    }

    pub fn create(&mut self, name: &str) -> Result<Rc<Opcode>, OpcodeError> {
        if name.is_empty() {
            return Err(OpcodeError::EmptyName);
        }
        if self.by_name.contains_key(name) {
            return Err(OpcodeError::AlreadyExists(name.to_string()));
        }
        let opcode = Rc::new(Opcode {
            name: name.to_string(),
            pascal_name: crate::ir::pascal_case(name),
            id: self.next_id,
            instruction_size: 0,
            predicate_operand: None,
            source_operands: Vec::new(),
            destination_operands: Vec::new(),
            child: None,
            operand_locators: HashMap::new(),
        });
        self.next_id += 1;
        self.by_name.insert(name.to_string(), self.opcodes.len());
        self.opcodes.push(opcode.clone());
        Ok(opcode)
    }

    /// `kNone`-equivalent fallback opcode: id -1, empty name.
    pub fn create_default(&self) -> Rc<Opcode> {
        Rc::new(Opcode {
            name: String::new(),
            pascal_name: "None".to_string(),
            id: -1,
            instruction_size: 0,
            predicate_operand: None,
            source_operands: Vec::new(),
            destination_operands: Vec::new(),
            child: None,
            operand_locators: HashMap::new(),
        })
    }

    /// Same name, id -1: used for the child instruction chain.
    pub fn create_child(&self, opcode: &Opcode) -> Rc<Opcode> {
        Rc::new(Opcode {
            name: opcode.name.clone(),
            pascal_name: opcode.pascal_name.clone(),
            id: -1,
            instruction_size: opcode.instruction_size,
            predicate_operand: opcode.predicate_operand.clone(),
            source_operands: opcode.source_operands.clone(),
            destination_operands: opcode.destination_operands.clone(),
            child: opcode.child.clone(),
            operand_locators: opcode.operand_locators.clone(),
        })
    }

    /// Derive a new opcode sharing identity fields, re-evaluating every
    /// destination's latency expression against `args`. A failure in any
    /// latency evaluation fails the whole derivation (the
    /// partially-constructed opcode is simply dropped, for free, by Rust's
    /// ownership rules instead of a manual `delete`).
    pub fn create_derived(&self, opcode: &Opcode, args: &[Expr]) -> Result<Rc<Opcode>, OpcodeError> {
        let mut dest_ops = Vec::with_capacity(opcode.destination_operands.len());
        for d in &opcode.destination_operands {
            let latency_expr = d.latency_expr.as_ref().map(|e| e.evaluate(Some(args))).transpose()?;
            dest_ops.push(DestinationOperand {
                name: d.name.clone(),
                pascal_case_name: d.pascal_case_name.clone(),
                is_array: d.is_array,
                latency_expr,
            });
        }
        Ok(Rc::new(Opcode {
            name: opcode.name.clone(),
            pascal_name: opcode.pascal_name.clone(),
            id: opcode.id,
            instruction_size: opcode.instruction_size,
            predicate_operand: opcode.predicate_operand.clone(),
            source_operands: opcode.source_operands.clone(),
            destination_operands: dest_ops,
            child: opcode.child.clone(),
            operand_locators: opcode.operand_locators.clone(),
        }))
    }

    pub fn get(&self, name: &str) -> Option<Rc<Opcode>> {
        self.by_name.get(name).map(|&idx| self.opcodes[idx].clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Opcode>> {
        self.opcodes.iter()
    }

    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_dense() {
        let mut factory = OpcodeFactory::new();
        let a = factory.create("add").unwrap();
        let b = factory.create("sub").unwrap();
        let c = factory.create("mul").unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let mut factory = OpcodeFactory::new();
        factory.create("add").unwrap();
        assert_eq!(factory.create("add").unwrap_err(), OpcodeError::AlreadyExists("add".to_string()));
    }

    #[test]
    fn create_rejects_empty_name() {
        let mut factory = OpcodeFactory::new();
        assert_eq!(factory.create("").unwrap_err(), OpcodeError::EmptyName);
    }

    #[test]
    fn derived_opcode_reevaluates_latency() {
        let mut factory = OpcodeFactory::new();
        let mut opcode = (*factory.create("add").unwrap()).clone();
        opcode.destination_operands.push(DestinationOperand::new("rd", false, Some(Expr::param(0, "lat"))));
        let derived = factory.create_derived(&opcode, &[Expr::constant(3)]).unwrap();
        assert_eq!(derived.destination_operands[0].get_latency().unwrap(), 3);
        assert_eq!(derived.id, opcode.id);
        assert_eq!(derived.name, "add");
    }

    #[test]
    fn derived_opcode_propagates_eval_error() {
        let mut factory = OpcodeFactory::new();
        let mut opcode = (*factory.create("div").unwrap()).clone();
        opcode.destination_operands.push(DestinationOperand::new(
            "rd",
            false,
            Some(Expr::Binary(
                crate::ir::expr::BinaryOp::Div,
                Box::new(Expr::constant(1)),
                Box::new(Expr::param(0, "z")),
            )),
        ));
        let err = factory.create_derived(&opcode, &[Expr::constant(0)]).unwrap_err();
        assert_eq!(err, OpcodeError::LatencyEval(EvalError::DivideByZero));
    }

    #[test]
    fn default_and_child_opcodes() {
        let factory = OpcodeFactory::new();
        let default = factory.create_default();
        assert_eq!(default.id, -1);
        assert_eq!(default.name, "");

        let mut opcode = (*default).clone();
        opcode.name = "add".to_string();
        let child = factory.create_child(&opcode);
        assert_eq!(child.id, -1);
        assert_eq!(child.name, "add");
    }

    #[test]
    fn validate_dest_latencies_short_circuits() {
        let mut opcode_factory = OpcodeFactory::new();
        let mut opcode = (*opcode_factory.create("op").unwrap()).clone();
        opcode.destination_operands.push(DestinationOperand::new("a", false, Some(Expr::constant(-1))));
        opcode.destination_operands.push(DestinationOperand::new("b", false, Some(Expr::constant(5))));
        assert!(!opcode.validate_dest_latencies(|l| l >= 0).unwrap());
    }
}

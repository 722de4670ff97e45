/// The visitor-facing entry points a parse-tree visitor (here,
/// `builder::lang::Parser`, standing in for a grammar that is out of
/// scope) drives, in the order the grammar requires: include processing,
/// global constants, the ISA declaration, then bundles/slots/opcodes in
/// document order.
pub mod functions;
pub mod generate;
pub mod lang;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::source::{SourceManager, Span};
use crate::ir::bundle::{BundleError, InstructionSet};
use crate::ir::expr::{EvalError, Expr};
use crate::ir::instruction::InstructionError;
use crate::ir::opcode::OpcodeError;
use crate::ir::resource::ResourceError;
use crate::ir::slot::{Slot, SlotError, SlotHandle};

use self::generate::{GenerateError, RangeAssignment};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no active ISA declaration")]
    NoActiveIsa,
    #[error("recursive include of file: {0}")]
    RecursiveInclude(String),
}

impl From<SlotError> for BuilderError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::AlreadyExists(kind, name) => BuilderError::AlreadyExists(format!("{kind} {name}")),
            SlotError::CyclicInheritance(name) => BuilderError::AlreadyExists(format!("base {name}")),
            SlotError::Instruction(e) => e.into(),
            SlotError::InvalidLatency(name) => BuilderError::InvalidArgument(format!("latency of {name}")),
        }
    }
}

impl From<InstructionError> for BuilderError {
    fn from(e: InstructionError) -> Self {
        match e {
            InstructionError::Opcode(e) => e.into(),
            InstructionError::Eval(e) => e.into(),
        }
    }
}

impl From<OpcodeError> for BuilderError {
    fn from(e: OpcodeError) -> Self {
        match e {
            OpcodeError::AlreadyExists(name) => BuilderError::AlreadyExists(format!("opcode {name}")),
            OpcodeError::EmptyName => BuilderError::InvalidArgument("empty opcode name".to_string()),
            OpcodeError::LatencyEval(e) => e.into(),
        }
    }
}

impl From<ResourceError> for BuilderError {
    fn from(e: ResourceError) -> Self {
        match e {
            ResourceError::AlreadyExists(name) => BuilderError::AlreadyExists(format!("resource {name}")),
        }
    }
}

impl From<BundleError> for BuilderError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::SlotNotFound(name) => BuilderError::NotFound(format!("slot {name}")),
            BundleError::BundleNotFound(name) => BuilderError::NotFound(format!("bundle {name}")),
            BundleError::AlreadyExists(name) => BuilderError::AlreadyExists(format!("bundle {name}")),
        }
    }
}

impl From<EvalError> for BuilderError {
    fn from(e: EvalError) -> Self {
        BuilderError::Internal(e.to_string())
    }
}

impl From<GenerateError> for BuilderError {
    fn from(e: GenerateError) -> Self {
        match e {
            GenerateError::NameCollision(name) => BuilderError::AlreadyExists(format!("generated opcode {name}")),
            GenerateError::EmptyRange(name) => BuilderError::InvalidArgument(format!("empty range {name}")),
        }
    }
}

pub struct IrBuilder {
    pub source_manager: SourceManager,
    pub diagnostics: DiagnosticEngine,
    global_constants: BTreeMap<String, Expr>,
    pub instruction_set: Option<InstructionSet>,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self {
            source_manager: SourceManager::new(),
            diagnostics: DiagnosticEngine::new(),
            global_constants: BTreeMap::new(),
            instruction_set: None,
        }
    }

    /// Step 1 of §4.G: include-file recursion detection.
    pub fn begin_include(&mut self, file_id: u32) -> Result<(), BuilderError> {
        self.source_manager
            .push_include(file_id)
            .map_err(|_| BuilderError::RecursiveInclude(self.source_manager.get_filename(file_id).to_string()))
    }

    pub fn end_include(&mut self) {
        self.source_manager.pop_include();
    }

    /// Step 2: global constant definitions, rejecting redefinitions.
    pub fn add_global_constant(&mut self, name: &str, expr: Expr, span: Span) -> Result<(), BuilderError> {
        if self.global_constants.contains_key(name) {
            self.diagnostics.emit(Diagnostic::error(format!("redefinition of global constant {name}"), span));
            return Err(BuilderError::AlreadyExists(format!("global constant {name}")));
        }
        self.global_constants.insert(name.to_string(), expr);
        Ok(())
    }

    /// Step 3: creates the `InstructionSet` and records its namespace
    /// chain.
    pub fn begin_isa(&mut self, name: &str, namespace_chain: Vec<String>) {
        let mut iset = InstructionSet::new(name);
        iset.namespace_chain = namespace_chain;
        self.instruction_set = Some(iset);
    }

    pub fn isa(&self) -> Result<&InstructionSet, BuilderError> {
        self.instruction_set.as_ref().ok_or(BuilderError::NoActiveIsa)
    }

    pub fn isa_mut(&mut self) -> Result<&mut InstructionSet, BuilderError> {
        self.instruction_set.as_mut().ok_or(BuilderError::NoActiveIsa)
    }

    pub fn declare_bundle(&mut self, name: &str) -> Result<(), BuilderError> {
        Ok(self.isa_mut()?.add_bundle(name)?)
    }

    pub fn declare_slot(&mut self, name: &str) -> Result<SlotHandle, BuilderError> {
        let iset = self.isa_mut()?;
        if iset.slots.contains_key(name) {
            return Err(BuilderError::AlreadyExists(format!("slot {name}")));
        }
        Ok(iset.add_slot(Slot::new(name)))
    }

    pub fn add_slot_base(
        &mut self,
        slot: &SlotHandle,
        base_name: &str,
        args: Option<Vec<Expr>>,
    ) -> Result<(), BuilderError> {
        let base = self.isa()?.get_slot(base_name)?;
        Ok(Slot::add_base(slot, &base, args)?)
    }

    pub fn use_slot_in_bundle(
        &mut self,
        bundle: &str,
        slot: &str,
        instances: Vec<u32>,
    ) -> Result<(), BuilderError> {
        Ok(self.isa_mut()?.use_slot_in_bundle(bundle, slot, instances)?)
    }

    pub fn use_bundle_in_bundle(&mut self, parent: &str, child: &str) -> Result<(), BuilderError> {
        Ok(self.isa_mut()?.use_bundle_in_bundle(parent, child)?)
    }

    /// Name resolution: slot template formal -> slot constant -> global
    /// constant -> enclosing instruction-set namespace. Unresolved names
    /// are errors.
    pub fn resolve_name(&self, slot: Option<&SlotHandle>, name: &str) -> Result<Expr, BuilderError> {
        if let Some(slot) = slot {
            if let Some(e) = slot.borrow().resolve_local(name) {
                return Ok(e);
            }
        }
        if let Some(e) = self.global_constants.get(name) {
            return Ok(e.deep_copy());
        }
        Err(BuilderError::Parse(format!("unresolved name: {name}")))
    }

    /// Admit every instruction inherited from `slot`'s declared bases, in
    /// declared base order, deriving each through `args` (§5 ordering
    /// guarantee (iii)). Must run before local overrides/deletes are
    /// applied, per the visitor/IR contract of §4.E.4.
    pub fn inherit_slot(&mut self, slot: &SlotHandle) -> Result<(), BuilderError> {
        let bases: Vec<(SlotHandle, Option<Vec<Expr>>)> = slot.borrow().base_slots.clone();
        let iset = self.isa()?;
        for (base, args) in bases {
            let args = args.unwrap_or_default();
            let insts: Vec<_> = base.borrow().instructions.values().cloned().collect();
            for inst in insts {
                match slot.borrow_mut().append_inherited_instruction(&inst, &iset.opcode_factory, &args) {
                    Ok(()) | Err(SlotError::AlreadyExists(_, _)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Expand a `GENERATE()` directive and feed each resulting opcode
    /// declaration back through the (minimal) opcode-declaration parser,
    /// as if it had been written out by hand.
    pub fn generate_opcodes(
        &mut self,
        slot: &SlotHandle,
        assignments: &[RangeAssignment],
        template: &str,
    ) -> Result<(), BuilderError> {
        let decls = generate::expand(assignments, template)?;
        for decl in decls {
            lang::parser::parse_opcode_decl_into_slot(self, slot, &decl)?;
        }
        Ok(())
    }
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_constant_redefinition_is_rejected() {
        let mut builder = IrBuilder::new();
        builder.add_global_constant("K", Expr::constant(1), Span::dummy()).unwrap();
        let err = builder.add_global_constant("K", Expr::constant(2), Span::dummy()).unwrap_err();
        assert_eq!(err, BuilderError::AlreadyExists("global constant K".to_string()));
        assert!(builder.diagnostics.has_errors());
    }

    #[test]
    fn resolve_name_checks_formal_then_constant_then_global() {
        let mut builder = IrBuilder::new();
        builder.add_global_constant("G", Expr::constant(9), Span::dummy()).unwrap();
        builder.begin_isa("Test", vec![]);
        let slot = builder.declare_slot("S").unwrap();
        slot.borrow_mut().add_template_formal("w").unwrap();
        slot.borrow_mut().add_constant("k", Expr::constant(5)).unwrap();

        assert!(matches!(builder.resolve_name(Some(&slot), "w").unwrap(), Expr::Param(0, _)));
        assert_eq!(builder.resolve_name(Some(&slot), "k").unwrap().value().unwrap().as_int(), 5);
        assert_eq!(builder.resolve_name(Some(&slot), "G").unwrap().value().unwrap().as_int(), 9);
        assert!(builder.resolve_name(Some(&slot), "nope").is_err());
    }

    #[test]
    fn s3_inherit_then_override_via_builder() {
        let mut builder = IrBuilder::new();
        builder.begin_isa("Test", vec![]);
        let base = builder.declare_slot("Base").unwrap();
        let child = builder.declare_slot("Child").unwrap();
        builder.add_slot_base(&child, "Base", None).unwrap();

        let op = builder.isa_mut().unwrap().opcode_factory.create("add").unwrap();
        let mut opcode = (*op).clone();
        opcode.destination_operands.push(crate::ir::opcode::DestinationOperand::new(
            "rd",
            false,
            Some(Expr::constant(1)),
        ));
        let inst = crate::ir::instruction::Instruction::new(std::rc::Rc::new(opcode));
        base.borrow_mut().append_instruction(inst).unwrap();

        builder.inherit_slot(&child).unwrap();
        assert_eq!(
            child.borrow().instructions["add"].opcode.destination_operands[0].get_latency().unwrap(),
            1
        );

        // Override: replace the child's "add" latency to 3.
        let mut overridden = child.borrow().instructions["add"].clone();
        overridden.opcode = std::rc::Rc::new({
            let mut o = (*overridden.opcode).clone();
            o.destination_operands[0].latency_expr = Some(Expr::constant(3));
            o
        });
        child.borrow_mut().instructions.insert("add".to_string(), overridden);

        assert_eq!(
            child.borrow().instructions["add"].opcode.destination_operands[0].get_latency().unwrap(),
            3
        );
        assert_eq!(
            base.borrow().instructions["add"].opcode.destination_operands[0].get_latency().unwrap(),
            1
        );
    }
}

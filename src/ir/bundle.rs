/// Bundles compose slots and sub-bundles; `InstructionSet` owns the
/// top-level bundle plus the slot/bundle/opcode/resource factories and
/// computes reachability, topological order, and the enum tables that
/// `crate::codegen` emits.
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use thiserror::Error;

use crate::ir::opcode::OpcodeFactory;
use crate::ir::resource::ResourceFactory;
use crate::ir::slot::{Slot, SlotHandle};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("slot not found: {0}")]
    SlotNotFound(String),
    #[error("bundle not found: {0}")]
    BundleNotFound(String),
    #[error("bundle already exists: {0}")]
    AlreadyExists(String),
}

/// `slot_uses` pairs a slot name with the instance indices it is used at;
/// an empty vector means "the single instance".
#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub bundle_names: Vec<String>,
    pub slot_uses: Vec<(String, Vec<u32>)>,
    is_marked: bool,
}

impl Bundle {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), bundle_names: Vec::new(), slot_uses: Vec::new(), is_marked: false }
    }
}

/// Enum table emitted for one of the §4.F enums: `kNone` (or nothing, for
/// the ones that lack it) followed by sorted entries, ending with
/// `kPastMaxValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    pub none_entry: bool,
    pub entries: Vec<String>,
}

impl EnumTable {
    pub fn past_max_value(&self) -> usize {
        self.entries.len() + usize::from(self.none_entry)
    }
}

pub struct InstructionSet {
    pub name: String,
    pub namespace_chain: Vec<String>,
    pub slots: HashMap<String, SlotHandle>,
    pub bundles: HashMap<String, Bundle>,
    pub top_bundle: String,
    pub opcode_factory: OpcodeFactory,
    pub resource_factory: ResourceFactory,
    /// Process-scoped, not a true global: per §9's design note this is
    /// explicitly owned by the instruction set rather than living behind
    /// a `static`, so independent test runs never cross-contaminate.
    pub attribute_names: BTreeSet<String>,
    pub slot_order: Vec<String>,
    pub bundle_order: Vec<String>,
    frozen: bool,
}

impl InstructionSet {
    pub fn new(name: &str) -> Self {
        let mut bundles = HashMap::new();
        bundles.insert("__top__".to_string(), Bundle::new("__top__"));
        Self {
            name: name.to_string(),
            namespace_chain: Vec::new(),
            slots: HashMap::new(),
            bundles,
            top_bundle: "__top__".to_string(),
            opcode_factory: OpcodeFactory::new(),
            resource_factory: ResourceFactory::new(),
            attribute_names: BTreeSet::new(),
            slot_order: Vec::new(),
            bundle_order: Vec::new(),
            frozen: false,
        }
    }

    pub fn add_slot(&mut self, slot: Slot) -> SlotHandle {
        let name = slot.name.clone();
        let handle = Rc::new(std::cell::RefCell::new(slot));
        self.slots.insert(name, handle.clone());
        handle
    }

    pub fn add_bundle(&mut self, name: &str) -> Result<(), BundleError> {
        if self.bundles.contains_key(name) {
            return Err(BundleError::AlreadyExists(name.to_string()));
        }
        self.bundles.insert(name.to_string(), Bundle::new(name));
        Ok(())
    }

    pub fn get_slot(&self, name: &str) -> Result<SlotHandle, BundleError> {
        self.slots.get(name).cloned().ok_or_else(|| BundleError::SlotNotFound(name.to_string()))
    }

    pub fn get_bundle(&self, name: &str) -> Result<&Bundle, BundleError> {
        self.bundles.get(name).ok_or_else(|| BundleError::BundleNotFound(name.to_string()))
    }

    pub fn get_bundle_mut(&mut self, name: &str) -> Result<&mut Bundle, BundleError> {
        self.bundles.get_mut(name).ok_or_else(|| BundleError::BundleNotFound(name.to_string()))
    }

    /// Reference a slot from a bundle, validating the slot exists and
    /// marking it reachable (`is_referenced`).
    pub fn use_slot_in_bundle(
        &mut self,
        bundle_name: &str,
        slot_name: &str,
        instances: Vec<u32>,
    ) -> Result<(), BundleError> {
        let slot = self.get_slot(slot_name)?;
        slot.borrow_mut().is_referenced = true;
        let bundle = self.get_bundle_mut(bundle_name)?;
        bundle.slot_uses.push((slot_name.to_string(), instances));
        Ok(())
    }

    pub fn use_bundle_in_bundle(&mut self, parent: &str, child: &str) -> Result<(), BundleError> {
        if !self.bundles.contains_key(child) {
            return Err(BundleError::BundleNotFound(child.to_string()));
        }
        self.get_bundle_mut(parent)?.bundle_names.push(child.to_string());
        Ok(())
    }

    /// DFS post-order over the slot map (dependency: a slot depends on
    /// its bases) and the bundle map (dependency: a bundle depends on its
    /// sub-bundles). `is_marked` gates re-entry so each node is written
    /// exactly once, in map iteration order.
    pub fn compute_slot_and_bundle_orders(&mut self) {
        self.slot_order.clear();
        let names: Vec<String> = self.slots.keys().cloned().collect();
        for name in names {
            self.visit_slot(&name);
        }
        for slot in self.slots.values() {
            slot.borrow_mut().reset_mark();
        }

        self.bundle_order.clear();
        let names: Vec<String> = self.bundles.keys().cloned().collect();
        for name in names {
            self.visit_bundle(&name);
        }
        for bundle in self.bundles.values_mut() {
            bundle.is_marked = false;
        }
    }

    fn visit_slot(&mut self, name: &str) {
        let Some(handle) = self.slots.get(name).cloned() else { return };
        if !handle.borrow_mut().mark() {
            return;
        }
        let bases: Vec<String> = handle.borrow().base_slots.iter().map(|(b, _)| b.borrow().name.clone()).collect();
        for base in bases {
            self.visit_slot(&base);
        }
        self.slot_order.push(name.to_string());
    }

    fn visit_bundle(&mut self, name: &str) {
        let Some(bundle) = self.bundles.get(name) else { return };
        if bundle.is_marked {
            return;
        }
        let sub_bundles = bundle.bundle_names.clone();
        self.bundles.get_mut(name).unwrap().is_marked = true;
        for sub in sub_bundles {
            self.visit_bundle(&sub);
        }
        self.bundle_order.push(name.to_string());
    }

    /// Evaluate every resource reference's `begin_expression` in every
    /// instruction of every slot in `slot_order`; a non-zero result marks
    /// the referenced resource complex. `end_expression` is evaluated for
    /// validation only and its value discarded (§9 open question).
    pub fn analyze_resource_use(&mut self) -> Result<(), crate::ir::expr::EvalError> {
        for slot_name in self.slot_order.clone() {
            let Some(slot) = self.slots.get(&slot_name) else { continue };
            for inst in slot.borrow().instructions.values() {
                for reference in inst.resource_use.iter().chain(inst.resource_acquire.iter()) {
                    if reference.is_array {
                        reference.resource.borrow_mut().is_multi_valued = true;
                    }
                    if let Some(begin) = &reference.begin_expr {
                        let value = begin.value()?;
                        if value.as_int() != 0 {
                            reference.resource.borrow_mut().is_simple = false;
                        }
                    }
                    if let Some(end) = &reference.end_expr {
                        let _ = end.value()?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn record_attribute_name(&mut self, name: &str) {
        self.attribute_names.insert(name.to_string());
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// `SlotEnum`: `kNone=0`, then one entry per referenced slot sorted
    /// by name.
    pub fn slot_enum(&self) -> EnumTable {
        let mut entries: Vec<String> = self
            .slots
            .values()
            .filter(|s| s.borrow().is_referenced)
            .map(|s| s.borrow().pascal_name.clone())
            .collect();
        entries.sort();
        EnumTable { none_entry: true, entries }
    }

    /// `OpcodeEnum`: `kNone=0`, then `k<PascalOpcode>` for all opcodes
    /// sorted by name, `1..n`.
    pub fn opcode_enum(&self) -> EnumTable {
        let mut entries: Vec<String> = self.opcode_factory.iter().map(|o| o.pascal_name.clone()).collect();
        entries.sort();
        EnumTable { none_entry: true, entries }
    }

    /// Resource enums, partitioned by `(is_simple, is_array)`. A
    /// resource's `is_multi_valued` flag stands in for "referenced as an
    /// array" here: `analyze_resource_use` sets it once any reference to
    /// the resource is an array reference.
    pub fn resource_enums(&self) -> (EnumTable, EnumTable, EnumTable) {
        let mut simple = Vec::new();
        let mut complex_scalar = Vec::new();
        let mut complex_list = Vec::new();
        for r in self.resource_factory.iter() {
            let r = r.borrow();
            if r.is_simple {
                simple.push(r.pascal_name.clone());
            } else if r.is_multi_valued {
                complex_list.push(r.pascal_name.clone());
            } else {
                complex_scalar.push(r.pascal_name.clone());
            }
        }
        simple.sort();
        complex_scalar.sort();
        complex_list.sort();
        (
            EnumTable { none_entry: false, entries: simple },
            EnumTable { none_entry: false, entries: complex_scalar },
            EnumTable { none_entry: false, entries: complex_list },
        )
    }

    /// `AttributeEnum`: one entry per name in the process-wide (here,
    /// per-instruction-set) attribute-name set, sorted.
    pub fn attribute_enum(&self) -> EnumTable {
        EnumTable { none_entry: false, entries: self.attribute_names.iter().cloned().collect() }
    }

    /// The five operand enums, built by walking every referenced slot's
    /// instructions and their child chains.
    pub fn operand_enums(&self) -> OperandEnums {
        let mut pred = BTreeSet::new();
        let mut source = BTreeSet::new();
        let mut list_source = BTreeSet::new();
        let mut dest = BTreeSet::new();
        let mut list_dest = BTreeSet::new();

        for slot in self.slots.values() {
            let slot = slot.borrow();
            if !slot.is_referenced {
                continue;
            }
            for inst in slot.instructions.values() {
                collect_operand_names(inst, &mut pred, &mut source, &mut list_source, &mut dest, &mut list_dest);
            }
        }

        OperandEnums {
            pred_op: EnumTable { none_entry: true, entries: pred.into_iter().collect() },
            source_op: EnumTable { none_entry: true, entries: source.into_iter().collect() },
            list_source_op: EnumTable { none_entry: true, entries: list_source.into_iter().collect() },
            dest_op: EnumTable { none_entry: true, entries: dest.into_iter().collect() },
            list_dest_op: EnumTable { none_entry: true, entries: list_dest.into_iter().collect() },
        }
    }
}

fn collect_operand_names(
    inst: &crate::ir::instruction::Instruction,
    pred: &mut BTreeSet<String>,
    source: &mut BTreeSet<String>,
    list_source: &mut BTreeSet<String>,
    dest: &mut BTreeSet<String>,
    list_dest: &mut BTreeSet<String>,
) {
    if let Some(p) = &inst.opcode.predicate_operand {
        pred.insert(p.clone());
    }
    for (name, is_array) in &inst.opcode.source_operands {
        if *is_array {
            list_source.insert(name.clone());
        } else {
            source.insert(name.clone());
        }
    }
    for d in &inst.opcode.destination_operands {
        if d.is_array {
            list_dest.insert(d.name.clone());
        } else {
            dest.insert(d.name.clone());
        }
    }
    if let Some(child) = &inst.child {
        collect_operand_names(child, pred, source, list_source, dest, list_dest);
    }
}

#[derive(Debug, Clone)]
pub struct OperandEnums {
    pub pred_op: EnumTable,
    pub source_op: EnumTable,
    pub list_source_op: EnumTable,
    pub dest_op: EnumTable,
    pub list_dest_op: EnumTable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;
    use crate::ir::instruction::Instruction;
    use crate::ir::resource::ResourceReference;

    #[test]
    fn s4_resource_classification() {
        let mut iset = InstructionSet::new("Test");
        let slot = iset.add_slot(Slot::new("S"));
        iset.use_slot_in_bundle("__top__", "S", vec![]).unwrap();

        let r = iset.resource_factory.create("R").unwrap();
        let op = iset.opcode_factory.create("mul").unwrap();
        let mut inst = Instruction::new(op);
        let mut use1 = ResourceReference::new(r.clone(), false, None);
        use1.begin_expr = Some(Expr::constant(0));
        use1.end_expr = Some(Expr::constant(2));
        let mut use2 = ResourceReference::new(r.clone(), false, None);
        use2.begin_expr = Some(Expr::constant(1));
        use2.end_expr = Some(Expr::constant(3));
        inst.resource_use.push(use1);
        inst.resource_use.push(use2);
        slot.borrow_mut().append_instruction(inst).unwrap();

        iset.compute_slot_and_bundle_orders();
        iset.analyze_resource_use().unwrap();
        assert!(!r.borrow().is_simple);
    }

    #[test]
    fn analyze_resource_use_propagates_eval_errors() {
        let mut iset = InstructionSet::new("Test");
        let slot = iset.add_slot(Slot::new("S"));
        iset.use_slot_in_bundle("__top__", "S", vec![]).unwrap();
        let r = iset.resource_factory.create("R").unwrap();
        let op = iset.opcode_factory.create("div").unwrap();
        let mut inst = Instruction::new(op);
        let mut reference = ResourceReference::new(r, false, None);
        reference.begin_expr = Some(Expr::Binary(
            crate::ir::expr::BinaryOp::Div,
            Box::new(Expr::constant(1)),
            Box::new(Expr::constant(0)),
        ));
        inst.resource_use.push(reference);
        slot.borrow_mut().append_instruction(inst).unwrap();
        iset.compute_slot_and_bundle_orders();
        assert!(iset.analyze_resource_use().is_err());
    }

    #[test]
    fn topological_order_visits_bases_before_dependents() {
        let mut iset = InstructionSet::new("Test");
        let base = iset.add_slot(Slot::new("Base"));
        let child = iset.add_slot(Slot::new("Child"));
        Slot::add_base(&child, &base, None).unwrap();
        iset.use_slot_in_bundle("__top__", "Base", vec![]).unwrap();
        iset.use_slot_in_bundle("__top__", "Child", vec![]).unwrap();
        iset.compute_slot_and_bundle_orders();
        let base_pos = iset.slot_order.iter().position(|n| n == "Base").unwrap();
        let child_pos = iset.slot_order.iter().position(|n| n == "Child").unwrap();
        assert!(base_pos < child_pos);
    }

    #[test]
    fn slot_enum_sorted_and_filters_unreferenced() {
        let mut iset = InstructionSet::new("Test");
        iset.add_slot(Slot::new("Zeta"));
        iset.add_slot(Slot::new("Alpha"));
        iset.use_slot_in_bundle("__top__", "Zeta", vec![]).unwrap();
        // Alpha never referenced by a bundle.
        let table = iset.slot_enum();
        assert_eq!(table.entries, vec!["Zeta".to_string()]);
        assert_eq!(table.past_max_value(), 2); // kNone + Zeta
    }

    #[test]
    fn opcode_enum_sorted_with_none_at_zero() {
        let mut iset = InstructionSet::new("Test");
        iset.opcode_factory.create("sub").unwrap();
        iset.opcode_factory.create("add").unwrap();
        let table = iset.opcode_enum();
        assert_eq!(table.entries, vec!["Add".to_string(), "Sub".to_string()]);
        assert!(table.none_entry);
    }
}

//! Bundle/instruction-set class emission. Resolves the first §9 open
//! question: a `Bundle` is emitted the same way `InstructionSet` would
//! emit its own top-level class — a parent class referencing each child
//! bundle and slot instance, with a `Decode` method that accumulates
//! `size` at *decode time* by summing each decoded child's own `size()`,
//! the way `InstructionSet::GenerateClassDefinitions`'s emitted `Decode`
//! body does, rather than baking a compile-time total into the class.
use crate::codegen::EmitError;
use crate::ir::bundle::InstructionSet;

pub struct EmittedBundle {
    pub decl: String,
    pub def: String,
}

pub struct BundleEmitter<'a> {
    iset: &'a InstructionSet,
}

impl<'a> BundleEmitter<'a> {
    pub fn new(iset: &'a InstructionSet) -> Self {
        Self { iset }
    }

    /// Build the emission artifact for `bundle_name`, recursing into
    /// child bundles first (bottom-up, matching `bundle_order`) so each
    /// child's definition is emitted before the parent's `Decode` calls
    /// into it.
    pub fn generate_class_definition(&self, bundle_name: &str) -> Result<EmittedBundle, EmitError> {
        let bundle = self
            .iset
            .get_bundle(bundle_name)
            .map_err(|e| EmitError::Internal(e.to_string()))?;

        let class_name = format!("{}Bundle", pascal(bundle_name));
        let mut members = String::from("  ArchState* arch_state_;\n");
        let mut def = String::new();

        for child_name in &bundle.bundle_names {
            let child = self.generate_class_definition(child_name)?;
            members.push_str(&format!("  {}Bundle {}_;\n", pascal(child_name), child_name));
            def.push_str(&child.def);
        }
        for slot_name in bundle.slot_uses.iter().map(|(name, _)| name) {
            let slot = self
                .iset
                .get_slot(slot_name)
                .map_err(|e| EmitError::Internal(e.to_string()))?;
            members.push_str(&format!("  {}Slot {}_;\n", slot.borrow().pascal_name, slot_name));
        }

        let decl = format!(
            "class {class_name} {{\n public:\n  explicit {class_name}(ArchState* arch_state);\n  Instruction* Decode(uint64_t address, Encoding* encoding);\n\n private:\n{members}}};\n\n"
        );

        let mut body = format!(
            "Instruction* {class_name}::Decode(uint64_t address, Encoding* encoding) {{\n\
             \x20 Instruction* inst = nullptr;\n\
             \x20 Instruction* tmp_inst;\n\
             \x20 bool success = false;\n\
             \x20 int size = 0;\n"
        );
        if !bundle.bundle_names.is_empty() {
            body.push_str("  inst = new Instruction(address, arch_state_);\n");
            for child_name in &bundle.bundle_names {
                body.push_str(&format!(
                    "  tmp_inst = {child_name}_.Decode(address, encoding);\n\
                     \x20 inst->AppendChild(tmp_inst);\n\
                     \x20 size += tmp_inst->size();\n\
                     \x20 tmp_inst->DecRef();\n\
                     \x20 success |= (nullptr != tmp_inst);\n"
                ));
            }
        }
        for (slot_name, instances) in &bundle.slot_uses {
            let enum_name = format!("SlotEnum::k{}", pascal(slot_name));
            let entries: Vec<u32> = if instances.is_empty() { vec![0] } else { instances.clone() };
            for entry in entries {
                body.push_str(&format!(
                    "  tmp_inst = {slot_name}_.Decode(address, encoding, {enum_name}, {entry});\n\
                     \x20 if (tmp_inst != nullptr) size += tmp_inst->size();\n\
                     \x20 if (inst == nullptr) {{\n\
                     \x20   inst = tmp_inst;\n\
                     \x20 }} else {{\n\
                     \x20   inst->Append(tmp_inst);\n\
                     \x20   tmp_inst->DecRef();\n\
                     \x20 }}\n\
                     \x20 success |= (nullptr != tmp_inst);\n"
                ));
            }
        }
        body.push_str(
            "  if (inst != nullptr) inst->set_size(size);\n\
             \x20 if (!success) {\n\
             \x20   if (inst != nullptr) inst->DecRef();\n\
             \x20   inst = nullptr;\n\
             \x20 }\n\
             \x20 return inst;\n\
             }\n\n",
        );
        def.push_str(&body);

        Ok(EmittedBundle { decl, def })
    }
}

fn pascal(name: &str) -> String {
    crate::ir::pascal_case(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::slot::Slot;

    #[test]
    fn decode_accumulates_size_at_runtime_across_slots_and_child_bundles() {
        let mut iset = InstructionSet::new("Test");
        iset.add_slot(Slot::new("A"));
        iset.add_slot(Slot::new("B"));
        iset.add_bundle("Inner").unwrap();
        iset.use_slot_in_bundle("Inner", "B", vec![]).unwrap();
        iset.use_bundle_in_bundle("__top__", "Inner").unwrap();
        iset.use_slot_in_bundle("__top__", "A", vec![]).unwrap();
        // A multi-instance use: the generated Decode must loop over every
        // instance, not just count the use once.
        iset.get_bundle_mut("__top__").unwrap().slot_uses.last_mut().unwrap().1 = vec![0, 1, 2];

        let emitter = BundleEmitter::new(&iset);
        let emitted = emitter.generate_class_definition("__top__").unwrap();
        assert!(emitted.decl.contains("InnerBundle"));
        assert!(emitted.def.contains("Instruction* TopBundle::Decode"));
        assert!(emitted.def.contains("size += tmp_inst->size()"));
        assert!(emitted.def.contains("inst->set_size(size)"));
        // Three instances of A's slot use each get their own Decode call.
        assert_eq!(emitted.def.matches("A_.Decode(address, encoding, SlotEnum::kA,").count(), 3);
    }

    #[test]
    fn no_bundle_names_skips_parent_instruction_allocation() {
        let mut iset = InstructionSet::new("Test");
        iset.add_slot(Slot::new("Main"));
        iset.use_slot_in_bundle("__top__", "Main", vec![]).unwrap();
        let emitter = BundleEmitter::new(&iset);
        let emitted = emitter.generate_class_definition("__top__").unwrap();
        assert!(!emitted.def.contains("inst = new Instruction(address, arch_state_);"));
    }
}

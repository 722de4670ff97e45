//! Renders the §4.F enum tables (`SlotEnum`, `OpcodeEnum`, the three
//! resource enums, `AttributeEnum`, and the five operand enums) as C++
//! `enum class` declarations plus the `kOpcodeNames` name table.
use crate::ir::bundle::{EnumTable, InstructionSet};

fn emit_enum_class(name: &str, table: &EnumTable) -> String {
    let mut out = format!("enum class {name} {{\n");
    let mut value = 0usize;
    if table.none_entry {
        out.push_str("  kNone = 0,\n");
        value = 1;
    }
    for entry in &table.entries {
        out.push_str(&format!("  k{entry} = {value},\n"));
        value += 1;
    }
    out.push_str(&format!("  kPastMaxValue = {value},\n"));
    out.push_str("};\n\n");
    out
}

/// `kOpcodeNames[id]` gives back the lowercase declared name for an
/// opcode id, `"None"` at index 0 (matching `OpcodeEnum`'s `kNone`).
fn emit_opcode_names(iset: &InstructionSet) -> String {
    let mut names: Vec<(i64, &str)> = iset.opcode_factory.iter().map(|o| (o.id, o.name.as_str())).collect();
    names.sort_by_key(|&(id, _)| id);
    let mut out = String::from("constexpr const char* kOpcodeNames[] = {\n  \"None\",\n");
    for (_, name) in names {
        out.push_str(&format!("  \"{name}\",\n"));
    }
    out.push_str("};\n\n");
    out
}

pub fn emit_enum_section(iset: &InstructionSet) -> String {
    let mut out = String::new();
    out.push_str(&emit_enum_class("SlotEnum", &iset.slot_enum()));
    out.push_str(&emit_enum_class("OpcodeEnum", &iset.opcode_enum()));
    out.push_str(&emit_opcode_names(iset));

    let (simple, complex_scalar, complex_list) = iset.resource_enums();
    out.push_str(&emit_enum_class("SimpleResourceEnum", &simple));
    out.push_str(&emit_enum_class("ComplexResourceEnum", &complex_scalar));
    out.push_str(&emit_enum_class("ComplexResourceListEnum", &complex_list));

    out.push_str(&emit_enum_class("AttributeEnum", &iset.attribute_enum()));

    let operands = iset.operand_enums();
    out.push_str(&emit_enum_class("PredOpEnum", &operands.pred_op));
    out.push_str(&emit_enum_class("SourceOpEnum", &operands.source_op));
    out.push_str(&emit_enum_class("ListSourceOpEnum", &operands.list_source_op));
    out.push_str(&emit_enum_class("DestOpEnum", &operands.dest_op));
    out.push_str(&emit_enum_class("ListDestOpEnum", &operands.list_dest_op));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::slot::Slot;

    #[test]
    fn emits_none_entry_and_past_max_value() {
        let mut iset = InstructionSet::new("Test");
        iset.add_slot(Slot::new("A"));
        iset.use_slot_in_bundle("__top__", "A", vec![]).unwrap();
        let section = emit_enum_section(&iset);
        assert!(section.contains("enum class SlotEnum {"));
        assert!(section.contains("kNone = 0,"));
        assert!(section.contains("kA = 1,"));
        assert!(section.contains("kPastMaxValue = 2,"));
    }

    #[test]
    fn opcode_names_table_has_none_at_zero() {
        let mut iset = InstructionSet::new("Test");
        iset.opcode_factory.create("add").unwrap();
        let names = emit_opcode_names(&iset);
        let none_pos = names.find("\"None\"").unwrap();
        let add_pos = names.find("\"add\"").unwrap();
        assert!(none_pos < add_pos);
    }
}

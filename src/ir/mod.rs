//! The intermediate representation: template expressions, resources,
//! opcodes, instructions, slots, and bundles/instruction-sets.
//!
//! Lifecycle: all IR objects are built during visitor-driven ingest
//! (`crate::builder`); after `Bundle::analyze_resource_use` and
//! `InstructionSet::compute_slot_and_bundle_orders` the tree is read-only
//! until `crate::codegen` walks it.

pub mod bundle;
pub mod expr;
pub mod instruction;
pub mod opcode;
pub mod resource;
pub mod slot;

/// Derive a PascalCase identifier from a snake_case or kebab-case name.
/// Shared by `resource::Resource` and `opcode::Opcode`/`DestinationOperand`,
/// both of which cache a Pascal-case form once at creation time.
pub(crate) fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case_snake_and_kebab() {
        assert_eq!(pascal_case("mem_port"), "MemPort");
        assert_eq!(pascal_case("mem-port"), "MemPort");
        assert_eq!(pascal_case("add"), "Add");
    }
}

//! Walks a frozen `ir::bundle::InstructionSet` and emits the generated
//! decoder source: enum declarations, per-slot instruction classes, and
//! the top-level bundle/instruction-set class, following the structure
//! `InstructionSet::generate_class_definitions` would in the original
//! tool this crate is descended from.
pub mod bundle_emit;
pub mod disasm;
pub mod enums;
pub mod slot_emit;

use thiserror::Error;

use crate::ir::expr::EvalError;
use crate::ir::opcode::OpcodeError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Opcode(#[from] OpcodeError),
    #[error("referenced operand has no locator: {0}")]
    MissingOperand(String),
    #[error("cannot emit: instruction set is not frozen")]
    NotFrozen,
    #[error("internal codegen error: {0}")]
    Internal(String),
}

/// The two output files named by §6: `<prefix>_decoder.h`/`.cc`.
pub struct EmittedFiles {
    pub header: String,
    pub source: String,
}

/// Emit the full decoder for `iset`, which must already be frozen (i.e.
/// `compute_slot_and_bundle_orders` and `analyze_resource_use` have run).
pub fn emit(iset: &crate::ir::bundle::InstructionSet, prefix: &str) -> Result<EmittedFiles, EmitError> {
    if !iset.is_frozen() {
        return Err(EmitError::NotFrozen);
    }

    let guard = format!("{}_DECODER_H_", prefix.to_uppercase());
    let mut header = String::new();
    header.push_str(&format!("#ifndef {guard}\n#define {guard}\n\n"));
    header.push_str(&format!("namespace {} {{\n\n", iset.namespace_chain.join("::")));
    header.push_str(&enums::emit_enum_section(iset));
    header.push_str("\n");

    let mut source = String::new();
    source.push_str(&format!("#include \"{prefix}_decoder.h\"\n\n"));
    source.push_str(&format!("namespace {} {{\n\n", iset.namespace_chain.join("::")));

    for slot_name in &iset.slot_order {
        let Ok(slot) = iset.get_slot(slot_name) else { continue };
        if !slot.borrow().is_referenced {
            continue;
        }
        let emitted = slot_emit::emit_slot_class(&slot.borrow());
        header.push_str(&emitted.decl);
        source.push_str(&emitted.def);
    }

    let bundle = bundle_emit::BundleEmitter::new(iset).generate_class_definition(&iset.top_bundle)?;
    header.push_str(&bundle.decl);
    source.push_str(&bundle.def);

    header.push_str(&format!("\n}}  // namespace {}\n", iset.namespace_chain.join("::")));
    header.push_str(&format!("\n#endif  // {guard}\n"));
    source.push_str(&format!("\n}}  // namespace {}\n", iset.namespace_chain.join("::")));

    Ok(EmittedFiles { header, source })
}

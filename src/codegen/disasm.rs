//! Compiles a compiled `DisasmFormat` (produced by
//! `builder::lang::parser::compile_disasm_fragments`) into a C++
//! printf-style format string plus the ordered list of operand names to
//! pass as arguments, resolving each operand reference against the
//! opcode's locator map so an emission failure can name the missing
//! operand instead of panicking.
use crate::codegen::EmitError;
use crate::ir::instruction::{DisasmFormat, DisasmFragment};
use crate::ir::opcode::Opcode;

pub struct CompiledDisasm {
    pub format_string: String,
    pub operand_args: Vec<String>,
}

pub fn compile(format: &DisasmFormat, opcode: &Opcode) -> Result<CompiledDisasm, EmitError> {
    let mut format_string = String::new();
    let mut operand_args = Vec::new();
    for fragment in format {
        match fragment {
            DisasmFragment::Literal(text) => format_string.push_str(text),
            DisasmFragment::Operand(name) => {
                if !opcode.operand_locators.contains_key(name)
                    && opcode.predicate_operand.as_deref() != Some(name.as_str())
                    && !opcode.source_operands.iter().any(|(n, _)| n == name)
                    && opcode.get_dest_op(name).is_none()
                {
                    return Err(EmitError::MissingOperand(name.clone()));
                }
                format_string.push_str("%s");
                operand_args.push(name.clone());
            }
        }
    }
    Ok(CompiledDisasm { format_string, operand_args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;
    use crate::ir::opcode::DestinationOperand;

    #[test]
    fn compiles_literal_and_operand_fragments() {
        let mut opcode = Opcode {
            name: "add".to_string(),
            pascal_name: "Add".to_string(),
            id: 1,
            instruction_size: 0,
            predicate_operand: None,
            source_operands: vec![("rs1".to_string(), false)],
            destination_operands: vec![DestinationOperand::new("rd", false, Some(Expr::constant(1)))],
            child: None,
            operand_locators: Default::default(),
        };
        opcode.source_operands.push(("rs2".to_string(), false));
        let format = vec![
            DisasmFragment::Literal("add ".to_string()),
            DisasmFragment::Operand("rd".to_string()),
            DisasmFragment::Literal(", ".to_string()),
            DisasmFragment::Operand("rs1".to_string()),
        ];
        let compiled = compile(&format, &opcode).unwrap();
        assert_eq!(compiled.format_string, "add %s, %s");
        assert_eq!(compiled.operand_args, vec!["rd".to_string(), "rs1".to_string()]);
    }

    #[test]
    fn rejects_unknown_operand_reference() {
        let opcode = Opcode {
            name: "add".to_string(),
            pascal_name: "Add".to_string(),
            id: 1,
            instruction_size: 0,
            predicate_operand: None,
            source_operands: vec![],
            destination_operands: vec![],
            child: None,
            operand_locators: Default::default(),
        };
        let format = vec![DisasmFragment::Operand("nope".to_string())];
        let err = compile(&format, &opcode).unwrap_err();
        assert_eq!(err, EmitError::MissingOperand("nope".to_string()));
    }
}

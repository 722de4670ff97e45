//! Per-slot class declaration/definition emission: a `Decode` method plus
//! one `instruction_info` entry per opcode (four lambdas — semantic
//! function getter, operand setter, disassembly setter, attribute setter
//! — and a resource setter), the way the original tool's
//! `Slot::GenerateClassDeclaration`/`GenerateClassDefinition` build them.
//!
//! A single instruction's disassembly format or resource bounds failing
//! to resolve does not abort the rest of the slot: the failure is
//! written into the emitted text as a `#error` line at that
//! instruction's site instead of being propagated as a Rust error, so
//! one bad instruction doesn't take down the whole emission.
use std::collections::BTreeMap;

use crate::codegen::disasm;
use crate::ir::instruction::Instruction;
use crate::ir::resource::ResourceReference;
use crate::ir::slot::Slot;

pub struct EmittedSlot {
    pub decl: String,
    pub def: String,
}

pub fn emit_slot_class(slot: &Slot) -> EmittedSlot {
    let class_name = format!("{}Slot", slot.pascal_name);

    let mut ctor_body = String::from("  int index;\n  InstructionInfo* info;\n");
    if let Some(default_inst) = &slot.default_instruction {
        emit_one_instruction("OpcodeEnum::kNone", default_inst, slot.default_instruction_size, &mut ctor_body);
    }
    for inst in slot.instructions.values() {
        let opcode_enum = format!("OpcodeEnum::k{}", inst.opcode.pascal_name);
        let size = if inst.opcode.instruction_size == 0 { slot.min_instruction_size } else { inst.opcode.instruction_size };
        emit_one_instruction(&opcode_enum, inst, size, &mut ctor_body);
    }

    let decl = format!(
        "class {class_name} {{\n public:\n  explicit {class_name}(ArchState* arch_state);\n  virtual ~{class_name}();\n  Instruction* Decode(uint64_t address, Encoding* encoding, SlotEnum slot, int entry);\n\n private:\n  ArchState* arch_state_;\n  InstructionInfoMap instruction_info_;\n  static constexpr SlotEnum slot_ = SlotEnum::k{};\n}};\n\n",
        slot.pascal_name
    );

    let mut def = format!("{class_name}::{class_name}(ArchState* arch_state) : arch_state_(arch_state) {{\n{ctor_body}}}\n\n");
    def.push_str(&format!(
        "Instruction* {class_name}::Decode(uint64_t address, Encoding* encoding, SlotEnum slot, int entry) {{\n\
         \x20 OpcodeEnum opcode = encoding->GetOpcode(slot, entry);\n\
         \x20 int indx = static_cast<int>(opcode);\n\
         \x20 if (!instruction_info_.contains(indx)) indx = 0;\n\
         \x20 auto* inst_info = instruction_info_[indx];\n\
         \x20 Instruction* inst = new Instruction(address, arch_state_);\n\
         \x20 inst->set_size(inst_info->instruction_size);\n\
         \x20 inst->set_opcode(static_cast<int>(opcode));\n\
         \x20 inst_info->operand_setter[0](inst, encoding, slot, entry);\n\
         \x20 Instruction* parent = inst;\n\
         \x20 for (size_t i = 1; i < inst_info->operand_setter.size(); i++) {{\n\
         \x20   Instruction* child = new Instruction(address, arch_state_);\n\
         \x20   inst_info->operand_setter[i](child, encoding, slot, entry);\n\
         \x20   parent->AppendChild(child);\n\
         \x20   child->DecRef();\n\
         \x20   parent = child;\n\
         \x20 }}\n\
         \x20 inst_info->resource_setter(inst, encoding, slot, entry);\n\
         \x20 inst_info->disassembly_setter(inst);\n\
         \x20 inst_info->attribute_setter(inst);\n\
         \x20 return inst;\n\
         }}\n\n"
    ));
    def.push_str(&format!(
        "{class_name}::~{class_name}() {{\n  for (auto& [unused, info_ptr] : instruction_info_) delete info_ptr;\n  instruction_info_.clear();\n}}\n\n"
    ));

    EmittedSlot { decl, def }
}

/// One opcode's `instruction_info` entry: size, the semfunc/operand-setter
/// pair per link of the child chain, the disassembly setter, the resource
/// setter, and the attribute setter.
fn emit_one_instruction(opcode_enum: &str, inst: &Instruction, default_size: u32, out: &mut String) {
    let opcode_name = &inst.opcode.pascal_name;
    out.push_str(&format!("\n  // *** {opcode_name} ***\n"));
    out.push_str(&format!("  index = static_cast<int>({opcode_enum});\n"));
    out.push_str("  info = new InstructionInfo;\n");
    out.push_str(&format!("  info->instruction_size = {default_size};\n"));

    let mut link = Some(inst);
    while let Some(cur) = link {
        out.push_str(&format!("  info->semfunc.push_back({});\n", cur.semfunc_code.as_deref().unwrap_or("nullptr")));
        out.push_str("  info->operand_setter.push_back([](Instruction* inst, Encoding* enc, SlotEnum slot, int entry) {\n");

        if let Some(pred) = &cur.opcode.predicate_operand {
            out.push_str(&format!(
                "    inst->SetPredicate(enc->GetPredicate(slot, entry, {opcode_enum}, PredOpEnum::k{}));\n",
                crate::ir::pascal_case(pred)
            ));
        }
        for (i, (name, _is_array)) in cur.opcode.source_operands.iter().enumerate() {
            out.push_str(&format!(
                "    inst->AppendSource(enc->GetSource(slot, entry, {opcode_enum}, SourceOpEnum::k{}, {i}));\n",
                crate::ir::pascal_case(name)
            ));
        }
        for (i, dest) in cur.opcode.destination_operands.iter().enumerate() {
            let dest_enum = format!("DestOpEnum::k{}", dest.pascal_case_name);
            match &dest.latency_expr {
                None => out.push_str(&format!(
                    "    inst->AppendDestination(enc->GetDestination(slot, entry, {opcode_enum}, {dest_enum}, {i}, enc->GetLatency(slot, entry, {opcode_enum}, {dest_enum}, {i})));\n"
                )),
                Some(_) => match dest.get_latency() {
                    Ok(latency) => out.push_str(&format!(
                        "    inst->AppendDestination(enc->GetDestination(slot, entry, {opcode_enum}, {dest_enum}, {i}, {latency}));\n"
                    )),
                    Err(e) => out.push_str(&format!("#error \"failed to get latency for operand '{}': {e}\"\n", dest.name)),
                },
            }
        }
        out.push_str("  });\n\n");
        link = cur.child.as_deref();
    }

    out.push_str(&emit_disasm_setter(opcode_name, inst));
    out.push_str(&emit_resource_setter(opcode_enum, inst));
    out.push_str(&emit_attribute_setter(inst));
    out.push_str("  instruction_info_.insert({index, info});\n");
}

/// A format string that fails to compile (an unresolvable operand
/// reference) becomes a `#error` line scoped to this one instruction,
/// rather than aborting `emit_slot_class` for the whole slot.
fn emit_disasm_setter(opcode_label: &str, inst: &Instruction) -> String {
    let mut out = String::from("  info->disassembly_setter = [](Instruction* inst) {\n");
    for format in &inst.disasm_format {
        match disasm::compile(format, &inst.opcode) {
            Ok(compiled) => {
                let args: Vec<String> =
                    compiled.operand_args.iter().map(|a| format!("GetOperandText(inst, \"{a}\")")).collect();
                let args = if args.is_empty() { String::new() } else { format!(", {}", args.join(", ")) };
                out.push_str(&format!(
                    "    inst->SetDisassemblyString(absl::StrFormat(\"{}\"{args}));\n",
                    compiled.format_string
                ));
            }
            Err(e) => out.push_str(&format!("#error \"{opcode_label}: {e}\"\n")),
        }
    }
    out.push_str("  };\n\n");
    out
}

/// Classifies every reference into {simple-hold, complex-hold,
/// simple-acquire-by-latency, complex-acquire} and batches same-latency
/// simple acquires into one `GetSimpleResourceOperand` call.
fn emit_resource_setter(opcode_enum: &str, inst: &Instruction) -> String {
    let mut out = String::from("  info->resource_setter = [](Instruction* inst, Encoding* enc, SlotEnum slot, int entry) {\n");
    if !inst.resource_use.is_empty() || !inst.resource_acquire.is_empty() {
        out.push_str("    ResourceOperand* res_op;\n");
    }

    let (simple_use, complex_use): (Vec<&ResourceReference>, Vec<&ResourceReference>) =
        inst.resource_use.iter().partition(|r| r.resource.borrow().is_simple);
    if !simple_use.is_empty() {
        let names: Vec<String> =
            simple_use.iter().map(|r| format!("SimpleResourceEnum::k{}", r.resource.borrow().pascal_name)).collect();
        out.push_str(&format!("    std::vector<SimpleResourceEnum> hold_vec = {{{}}};\n", names.join(", ")));
        out.push_str(&format!(
            "    res_op = enc->GetSimpleResourceOperand(slot, entry, {opcode_enum}, hold_vec, -1);\n    if (res_op != nullptr) inst->AppendResourceHold(res_op);\n"
        ));
    }
    for r in &complex_use {
        emit_complex_resource_call(opcode_enum, r, "AppendResourceHold", &mut out);
    }

    let (simple_acquire, complex_acquire): (Vec<&ResourceReference>, Vec<&ResourceReference>) =
        inst.resource_acquire.iter().partition(|r| r.resource.borrow().is_simple);
    let mut by_latency: BTreeMap<i64, Vec<&ResourceReference>> = BTreeMap::new();
    for r in &simple_acquire {
        let Some(end) = &r.end_expr else { continue };
        match end.value() {
            Ok(v) => by_latency.entry(v.as_int()).or_default().push(r),
            Err(e) => out.push_str(&format!("#error \"unable to evaluate acquire latency: {e}\"\n")),
        }
    }
    for (latency, refs) in &by_latency {
        let names: Vec<String> =
            refs.iter().map(|r| format!("SimpleResourceEnum::k{}", r.resource.borrow().pascal_name)).collect();
        out.push_str(&format!("    std::vector<SimpleResourceEnum> acquire_vec_{latency} = {{{}}};\n", names.join(", ")));
        out.push_str(&format!(
            "    res_op = enc->GetSimpleResourceOperand(slot, entry, {opcode_enum}, acquire_vec_{latency}, {latency});\n    if (res_op != nullptr) inst->AppendResourceAcquire(res_op);\n"
        ));
    }
    for r in &complex_acquire {
        emit_complex_resource_call(opcode_enum, r, "AppendResourceAcquire", &mut out);
    }

    out.push_str("  };\n\n");
    out
}

fn emit_complex_resource_call(opcode_enum: &str, r: &ResourceReference, append_method: &str, out: &mut String) {
    let (Some(begin), Some(end)) = (&r.begin_expr, &r.end_expr) else {
        out.push_str(&format!("#error \"missing begin/end expression for resource {}\"\n", r.resource.borrow().name));
        return;
    };
    match (begin.value(), end.value()) {
        (Ok(b), Ok(e)) => out.push_str(&format!(
            "    res_op = enc->GetComplexResourceOperand(slot, entry, {opcode_enum}, ComplexResourceEnum::k{}, {}, {});\n    if (res_op != nullptr) inst->{append_method}(res_op);\n",
            r.resource.borrow().pascal_name,
            b.as_int(),
            e.as_int()
        )),
        _ => out.push_str(&format!(
            "#error \"unable to evaluate begin or end expression for resource {}\"\n",
            r.resource.borrow().name
        )),
    }
}

fn emit_attribute_setter(inst: &Instruction) -> String {
    let mut out = String::from("  info->attribute_setter = [](Instruction* inst) {\n");
    for (name, expr) in &inst.attributes {
        match expr.value() {
            Ok(v) => out.push_str(&format!("    inst->SetAttribute(\"{name}\", {});\n", v.as_int())),
            Err(e) => out.push_str(&format!("#error \"attribute {name}: {e}\"\n")),
        }
    }
    out.push_str("  };\n\n");
    out
}

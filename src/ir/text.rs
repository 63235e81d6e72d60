//! Textual IR: the round-trippable form used for `dump_code` output and
//! the standalone IR-compiler driver (SPEC_FULL.md §4.3/§6).
//!
//! Format, written top to bottom:
//!
//! ```text
//! locals:
//!   l0 i32 @0
//! consts:
//!   v0: const.i32 5
//!   v1: const.block b1
//! blocks:
//! block0:
//!   v2:i32 = add v0, v0
//!   jump v1
//! block1:
//!   ret
//! ```
//!
//! Every value — constant or instruction result — is numbered once in
//! the file, in the order it is written. `read` does not assume the
//! numbers it assigns land on the same arena slots as the original
//! (consts and defs interleave in the arena but are written in two
//! separate sections), so every reference resolves through an id-to-id
//! map built while reading rather than by reusing the written number
//! directly.

use std::collections::HashMap;
use std::io::{self, Write};

use super::{BlockId, Cond, ConstPayload, Ir, LocalId, Opcode, Type, ValueId, ValueKind, Width};
use crate::error::JitResult;

pub fn write(ir: &Ir, out: &mut dyn Write) -> io::Result<()> {
    out.write_all(render(ir).as_bytes())
}

pub fn render(ir: &Ir) -> String {
    use std::fmt::Write as _;
    let mut buf = String::new();
    writeln!(buf, "locals:").unwrap();
    for (idx, local) in ir.locals.iter().enumerate() {
        writeln!(buf, "  {} {} @{}", LocalId(idx as u32), local.ty, local.offset).unwrap();
    }
    writeln!(buf, "consts:").unwrap();
    for (idx, v) in ir.values.iter().enumerate() {
        if let ValueKind::Const(payload) = &v.kind {
            writeln!(
                buf,
                "  {}: const.{} {}",
                ValueId(idx as u32),
                v.ty,
                payload_to_text(payload)
            )
            .unwrap();
        }
    }
    writeln!(buf, "blocks:").unwrap();
    for &block in &ir.order {
        writeln!(buf, "{block}:").unwrap();
        for instr_id in ir.block_instrs(block) {
            let instr = ir.instr(instr_id);
            let dst = match instr.result {
                Some(v) => format!("{v}:{} = ", ir.value(v).ty),
                None => String::new(),
            };
            let (mnemonic, payload) = opcode_to_text(&instr.opcode);
            let args: Vec<String> = instr.args.iter().flatten().map(|v| v.to_string()).collect();
            let mut pieces = Vec::new();
            if !payload.is_empty() {
                pieces.push(payload);
            }
            pieces.extend(args);
            writeln!(buf, "  {dst}{mnemonic} {}", pieces.join(", ")).unwrap();
        }
    }
    buf
}

fn payload_to_text(payload: &ConstPayload) -> String {
    match payload {
        ConstPayload::I8(v) => v.to_string(),
        ConstPayload::I16(v) => v.to_string(),
        ConstPayload::I32(v) => v.to_string(),
        ConstPayload::I64(v) => v.to_string(),
        // Ptr shares Type::I64 with plain integers, so it is written the
        // same way; the variant distinction does not survive round trip.
        ConstPayload::Ptr(v) => (*v as i64).to_string(),
        // Raw bits so the textual form round-trips exactly (no decimal
        // rounding of the float).
        ConstPayload::F32(v) => format!("0x{:08x}", v.to_bits()),
        ConstPayload::F64(v) => format!("0x{:016x}", v.to_bits()),
        ConstPayload::String(s) => format!("{s:?}"),
        ConstPayload::Block(b) => b.to_string(),
    }
}

fn cond_to_text(c: Cond) -> &'static str {
    match c {
        Cond::Eq => "eq",
        Cond::Ne => "ne",
        Cond::Lt => "lt",
        Cond::Le => "le",
        Cond::Gt => "gt",
        Cond::Ge => "ge",
        Cond::UnsignedLt => "ult",
        Cond::UnsignedLe => "ule",
        Cond::UnsignedGt => "ugt",
        Cond::UnsignedGe => "uge",
    }
}

fn cond_from_text(s: &str) -> Option<Cond> {
    Some(match s {
        "eq" => Cond::Eq,
        "ne" => Cond::Ne,
        "lt" => Cond::Lt,
        "le" => Cond::Le,
        "gt" => Cond::Gt,
        "ge" => Cond::Ge,
        "ult" => Cond::UnsignedLt,
        "ule" => Cond::UnsignedLe,
        "ugt" => Cond::UnsignedGt,
        "uge" => Cond::UnsignedGe,
        _ => return None,
    })
}

fn width_to_text(w: Width) -> &'static str {
    match w {
        Width::W8 => "8",
        Width::W16 => "16",
        Width::W32 => "32",
        Width::W64 => "64",
    }
}

fn width_from_text(s: &str) -> Option<Width> {
    Some(match s {
        "8" => Width::W8,
        "16" => Width::W16,
        "32" => Width::W32,
        "64" => Width::W64,
        _ => return None,
    })
}

/// Returns `(mnemonic, inline_payload)`; `inline_payload` is the
/// non-value metadata rendered before the value operand list, or empty.
fn opcode_to_text(op: &Opcode) -> (&'static str, String) {
    use Opcode::*;
    match op {
        Add => ("add", String::new()),
        Sub => ("sub", String::new()),
        Mul => ("mul", String::new()),
        UDiv => ("udiv", String::new()),
        SDiv => ("sdiv", String::new()),
        URem => ("urem", String::new()),
        SRem => ("srem", String::new()),
        Neg => ("neg", String::new()),
        And => ("and", String::new()),
        Or => ("or", String::new()),
        Xor => ("xor", String::new()),
        Not => ("not", String::new()),
        Shl => ("shl", String::new()),
        LShr => ("lshr", String::new()),
        AShr => ("ashr", String::new()),
        Icmp(c) => ("icmp", cond_to_text(*c).to_string()),
        FAdd => ("fadd", String::new()),
        FSub => ("fsub", String::new()),
        FMul => ("fmul", String::new()),
        FDiv => ("fdiv", String::new()),
        FNeg => ("fneg", String::new()),
        Fcmp(c) => ("fcmp", cond_to_text(*c).to_string()),
        VAdd => ("vadd", String::new()),
        VSub => ("vsub", String::new()),
        VAnd => ("vand", String::new()),
        VOr => ("vor", String::new()),
        VXor => ("vxor", String::new()),
        Sext8 => ("sext8", String::new()),
        Sext16 => ("sext16", String::new()),
        Sext32 => ("sext32", String::new()),
        Zext8 => ("zext8", String::new()),
        Zext16 => ("zext16", String::new()),
        Zext32 => ("zext32", String::new()),
        Trunc8 => ("trunc8", String::new()),
        Trunc16 => ("trunc16", String::new()),
        Trunc32 => ("trunc32", String::new()),
        FloatToInt => ("f2i", String::new()),
        IntToFloat => ("i2f", String::new()),
        FExt => ("fext", String::new()),
        FTrunc => ("ftrunc", String::new()),
        LoadContext { offset, ty_bits } => ("load_context", format!("{offset}:{ty_bits}")),
        StoreContext { offset } => ("store_context", offset.to_string()),
        LoadLocal(l) => ("load_local", l.to_string()),
        StoreLocal(l) => ("store_local", l.to_string()),
        LoadDirect(w) => ("load_direct", width_to_text(*w).to_string()),
        StoreDirect(w) => ("store_direct", width_to_text(*w).to_string()),
        LoadFast(w) => ("load_fast", width_to_text(*w).to_string()),
        StoreFast(w) => ("store_fast", width_to_text(*w).to_string()),
        LoadSlow(w) => ("load_slow", width_to_text(*w).to_string()),
        StoreSlow(w) => ("store_slow", width_to_text(*w).to_string()),
        Jump => ("jump", String::new()),
        BranchTrue => ("branch_true", String::new()),
        BranchFalse => ("branch_false", String::new()),
        Call { target, noreturn } => (
            if *noreturn { "call_noreturn" } else { "call" },
            format!("0x{target:x}"),
        ),
        CallCond { target } => ("call_cond", format!("0x{target:x}")),
        Fallback => ("fallback", String::new()),
        Ret => ("ret", String::new()),
        DebugInfo(s) => ("debug_info", format!("{s:?}")),
        Breakpoint => ("breakpoint", String::new()),
        Assert(s) => ("assert", format!("{s:?}")),
    }
}

// -- parsing --------------------------------------------------------------

pub fn read(text: &str, ir: &mut Ir) -> JitResult<()> {
    // Unlike `reset()`, don't leave a phantom entry block behind: the
    // block count (and BlockId numbering) is entirely dictated by the
    // `blocks:` section below.
    ir.values.clear();
    ir.instrs.clear();
    ir.blocks.clear();
    ir.locals.clear();
    ir.locals_size = 0;
    ir.order.clear();
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let mut pos = 0usize;

    expect_line(&lines, &mut pos, "locals:")?;
    while let Some(line) = peek_indented(&lines, pos) {
        let (_, ty, offset) = parse_local_line(line)?;
        ir.locals.push(super::LocalData { ty, offset });
        pos += 1;
    }

    expect_line(&lines, &mut pos, "consts:")?;
    let mut value_map: HashMap<u32, ValueId> = HashMap::new();
    while let Some(line) = peek_indented(&lines, pos) {
        let (idx, ty, payload_text) = parse_const_line(line)?;
        let payload = parse_payload(ty, payload_text)?;
        let id = ir.new_const(payload);
        value_map.insert(idx, id);
        pos += 1;
    }

    expect_line(&lines, &mut pos, "blocks:")?;
    let block_count = lines[pos..].iter().filter(|l| !l.starts_with(' ')).count();
    for _ in 0..block_count {
        ir.push_block(None);
    }
    ir.set_cursor(super::InsertPoint {
        block: ir.entry_block(),
        after: None,
    });

    while pos < lines.len() {
        let line = lines[pos];
        pos += 1;
        if !line.starts_with(' ') {
            let name = line
                .strip_suffix(':')
                .ok_or_else(|| parse_err(&format!("expected block header, got {line:?}")))?;
            let idx = parse_handle_index(name, 'b')
                .ok_or_else(|| parse_err(&format!("bad block header {name:?}")))?;
            ir.set_cursor(super::InsertPoint {
                block: BlockId(idx),
                after: None,
            });
            continue;
        }
        parse_instr_line(line.trim(), ir, &mut value_map)?;
    }
    Ok(())
}

fn expect_line(lines: &[&str], pos: &mut usize, expected: &str) -> JitResult<()> {
    match lines.get(*pos) {
        Some(&l) if l == expected => {
            *pos += 1;
            Ok(())
        }
        Some(&l) => Err(parse_err(&format!("expected {expected:?}, got {l:?}"))),
        None => Err(parse_err(&format!("expected {expected:?}, got eof"))),
    }
}

fn peek_indented<'a>(lines: &[&'a str], pos: usize) -> Option<&'a str> {
    match lines.get(pos) {
        Some(&l) if l.starts_with(' ') => Some(l),
        _ => None,
    }
}

fn parse_handle_index(text: &str, prefix: char) -> Option<u32> {
    let mut chars = text.chars();
    if chars.next()? != prefix {
        return None;
    }
    chars.as_str().parse().ok()
}

fn parse_local_line(line: &str) -> JitResult<(u32, Type, i32)> {
    let line = line.trim();
    let (name, rest) = line.split_once(' ').ok_or_else(|| parse_err(line))?;
    let idx = parse_handle_index(name.trim(), 'l').ok_or_else(|| parse_err(line))?;
    let rest = rest.trim();
    let (ty_text, offset_text) = rest.split_once('@').ok_or_else(|| parse_err(line))?;
    let ty = parse_type(ty_text.trim()).ok_or_else(|| parse_err(line))?;
    let offset: i32 = offset_text.trim().parse().map_err(|_| parse_err(line))?;
    Ok((idx, ty, offset))
}

fn parse_const_line(line: &str) -> JitResult<(u32, Type, String)> {
    let line = line.trim();
    let (name, rest) = line.split_once(':').ok_or_else(|| parse_err(line))?;
    let idx = parse_handle_index(name.trim(), 'v').ok_or_else(|| parse_err(line))?;
    let rest = rest.trim();
    let rest = rest.strip_prefix("const.").ok_or_else(|| parse_err(line))?;
    let (ty_text, payload_text) = rest.split_once(' ').ok_or_else(|| parse_err(line))?;
    let ty = parse_type(ty_text).ok_or_else(|| parse_err(line))?;
    Ok((idx, ty, payload_text.trim().to_string()))
}

fn parse_type(s: &str) -> Option<Type> {
    Some(match s {
        "v" => Type::V,
        "i8" => Type::I8,
        "i16" => Type::I16,
        "i32" => Type::I32,
        "i64" => Type::I64,
        "f32" => Type::F32,
        "f64" => Type::F64,
        "v128" => Type::V128,
        "string" => Type::String,
        "block" => Type::Block,
        _ => return None,
    })
}

fn parse_payload(ty: Type, text: String) -> JitResult<ConstPayload> {
    Ok(match ty {
        Type::I8 => ConstPayload::I8(text.parse().map_err(|_| parse_err(&text))?),
        Type::I16 => ConstPayload::I16(text.parse().map_err(|_| parse_err(&text))?),
        Type::I32 => ConstPayload::I32(text.parse().map_err(|_| parse_err(&text))?),
        Type::I64 => ConstPayload::I64(text.parse().map_err(|_| parse_err(&text))?),
        Type::F32 => {
            let bits = u32::from_str_radix(text.trim_start_matches("0x"), 16)
                .map_err(|_| parse_err(&text))?;
            ConstPayload::F32(f32::from_bits(bits))
        }
        Type::F64 => {
            let bits = u64::from_str_radix(text.trim_start_matches("0x"), 16)
                .map_err(|_| parse_err(&text))?;
            ConstPayload::F64(f64::from_bits(bits))
        }
        Type::String => ConstPayload::String(text.trim_matches('"').to_string()),
        Type::Block => {
            let idx = parse_handle_index(&text, 'b').ok_or_else(|| parse_err(&text))?;
            ConstPayload::Block(BlockId(idx))
        }
        Type::V | Type::V128 => return Err(parse_err(&text)),
    })
}

fn resolve(tok: &str, value_map: &HashMap<u32, ValueId>) -> JitResult<ValueId> {
    let idx = parse_handle_index(tok, 'v').ok_or_else(|| parse_err(tok))?;
    value_map
        .get(&idx)
        .copied()
        .ok_or_else(|| parse_err(&format!("undefined value {tok}")))
}

fn parse_instr_line(
    line: &str,
    ir: &mut Ir,
    value_map: &mut HashMap<u32, ValueId>,
) -> JitResult<()> {
    let (dst, rest) = match line.split_once('=') {
        Some((d, r)) => (Some(d.trim()), r.trim()),
        None => (None, line),
    };
    let dst_info = match dst {
        Some(d) => {
            let (id_text, ty_text) = d.split_once(':').ok_or_else(|| parse_err(d))?;
            let idx = parse_handle_index(id_text.trim(), 'v').ok_or_else(|| parse_err(id_text))?;
            let ty = parse_type(ty_text.trim()).ok_or_else(|| parse_err(ty_text))?;
            Some((idx, ty))
        }
        None => None,
    };
    let (mnemonic, operand_text) = match rest.split_once(' ') {
        Some((m, o)) => (m, o.trim()),
        None => (rest, ""),
    };
    let operand_strs: Vec<&str> = if operand_text.is_empty() {
        Vec::new()
    } else {
        operand_text.split(',').map(str::trim).collect()
    };

    let (opcode, value_operands): (Opcode, Vec<&str>) = match mnemonic {
        "add" => (Opcode::Add, operand_strs),
        "sub" => (Opcode::Sub, operand_strs),
        "mul" => (Opcode::Mul, operand_strs),
        "udiv" => (Opcode::UDiv, operand_strs),
        "sdiv" => (Opcode::SDiv, operand_strs),
        "urem" => (Opcode::URem, operand_strs),
        "srem" => (Opcode::SRem, operand_strs),
        "neg" => (Opcode::Neg, operand_strs),
        "and" => (Opcode::And, operand_strs),
        "or" => (Opcode::Or, operand_strs),
        "xor" => (Opcode::Xor, operand_strs),
        "not" => (Opcode::Not, operand_strs),
        "shl" => (Opcode::Shl, operand_strs),
        "lshr" => (Opcode::LShr, operand_strs),
        "ashr" => (Opcode::AShr, operand_strs),
        "icmp" => {
            let (c, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let cond = cond_from_text(c).ok_or_else(|| parse_err(c))?;
            (Opcode::Icmp(cond), rest.to_vec())
        }
        "fadd" => (Opcode::FAdd, operand_strs),
        "fsub" => (Opcode::FSub, operand_strs),
        "fmul" => (Opcode::FMul, operand_strs),
        "fdiv" => (Opcode::FDiv, operand_strs),
        "fneg" => (Opcode::FNeg, operand_strs),
        "fcmp" => {
            let (c, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let cond = cond_from_text(c).ok_or_else(|| parse_err(c))?;
            (Opcode::Fcmp(cond), rest.to_vec())
        }
        "vadd" => (Opcode::VAdd, operand_strs),
        "vsub" => (Opcode::VSub, operand_strs),
        "vand" => (Opcode::VAnd, operand_strs),
        "vor" => (Opcode::VOr, operand_strs),
        "vxor" => (Opcode::VXor, operand_strs),
        "sext8" => (Opcode::Sext8, operand_strs),
        "sext16" => (Opcode::Sext16, operand_strs),
        "sext32" => (Opcode::Sext32, operand_strs),
        "zext8" => (Opcode::Zext8, operand_strs),
        "zext16" => (Opcode::Zext16, operand_strs),
        "zext32" => (Opcode::Zext32, operand_strs),
        "trunc8" => (Opcode::Trunc8, operand_strs),
        "trunc16" => (Opcode::Trunc16, operand_strs),
        "trunc32" => (Opcode::Trunc32, operand_strs),
        "f2i" => (Opcode::FloatToInt, operand_strs),
        "i2f" => (Opcode::IntToFloat, operand_strs),
        "fext" => (Opcode::FExt, operand_strs),
        "ftrunc" => (Opcode::FTrunc, operand_strs),
        "load_context" => {
            let (meta, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let (offset, bits) = meta.split_once(':').ok_or_else(|| parse_err(meta))?;
            (
                Opcode::LoadContext {
                    offset: offset.parse().map_err(|_| parse_err(meta))?,
                    ty_bits: bits.parse().map_err(|_| parse_err(meta))?,
                },
                rest.to_vec(),
            )
        }
        "store_context" => {
            let (off, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            (
                Opcode::StoreContext {
                    offset: off.parse().map_err(|_| parse_err(off))?,
                },
                rest.to_vec(),
            )
        }
        "load_local" => {
            let (l, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let idx = parse_handle_index(l, 'l').ok_or_else(|| parse_err(l))?;
            (Opcode::LoadLocal(LocalId(idx)), rest.to_vec())
        }
        "store_local" => {
            let (l, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let idx = parse_handle_index(l, 'l').ok_or_else(|| parse_err(l))?;
            (Opcode::StoreLocal(LocalId(idx)), rest.to_vec())
        }
        "load_direct" | "store_direct" | "load_fast" | "store_fast" | "load_slow"
        | "store_slow" => {
            let (w, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let width = width_from_text(w).ok_or_else(|| parse_err(w))?;
            let op = match mnemonic {
                "load_direct" => Opcode::LoadDirect(width),
                "store_direct" => Opcode::StoreDirect(width),
                "load_fast" => Opcode::LoadFast(width),
                "store_fast" => Opcode::StoreFast(width),
                "load_slow" => Opcode::LoadSlow(width),
                _ => Opcode::StoreSlow(width),
            };
            (op, rest.to_vec())
        }
        "jump" => (Opcode::Jump, operand_strs),
        "branch_true" => (Opcode::BranchTrue, operand_strs),
        "branch_false" => (Opcode::BranchFalse, operand_strs),
        "call" | "call_noreturn" => {
            let (t, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let target =
                u64::from_str_radix(t.trim_start_matches("0x"), 16).map_err(|_| parse_err(t))?;
            (
                Opcode::Call {
                    target,
                    noreturn: mnemonic == "call_noreturn",
                },
                rest.to_vec(),
            )
        }
        "call_cond" => {
            let (t, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            let target =
                u64::from_str_radix(t.trim_start_matches("0x"), 16).map_err(|_| parse_err(t))?;
            (Opcode::CallCond { target }, rest.to_vec())
        }
        "fallback" => (Opcode::Fallback, operand_strs),
        "ret" => (Opcode::Ret, operand_strs),
        "debug_info" => {
            let joined = operand_strs.join(", ");
            (Opcode::DebugInfo(unquote(&joined)), Vec::new())
        }
        "breakpoint" => (Opcode::Breakpoint, operand_strs),
        "assert" => {
            let (msg, rest) = operand_strs.split_first().ok_or_else(|| parse_err(line))?;
            (Opcode::Assert(unquote(msg)), rest.to_vec())
        }
        other => return Err(parse_err(other)),
    };

    let mut args = [None; 4];
    for (i, tok) in value_operands.iter().enumerate() {
        args[i] = Some(resolve(tok, value_map)?);
    }
    let result_ty = dst_info.map(|(_, ty)| ty).unwrap_or(Type::V);
    let result = ir.emit(opcode, args, result_ty, None);
    if let (Some((idx, _)), Some(v)) = (dst_info, result) {
        value_map.insert(idx, v);
    }
    Ok(())
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

fn parse_err(s: &str) -> crate::error::JitError {
    crate::ir::IrError::Parse(s.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ConstPayload;

    fn sample() -> Ir {
        let mut ir = Ir::new();
        {
            let mut b = ir.builder();
            let l = b.new_local(Type::I32);
            let c1 = b.const_i32(7);
            let c2 = b.const_i32(35);
            let sum = b.iadd(c1, c2);
            b.store_local(l, sum);
            b.ret();
        }
        ir
    }

    #[test]
    fn write_then_read_preserves_structure() {
        let ir = sample();
        let text = render(&ir);
        let mut back = Ir::new();
        read(&text, &mut back).expect("round trip parses");
        assert_eq!(back.blocks().len(), ir.blocks().len());
        assert_eq!(back.locals_size(), ir.locals_size());
        back.check_invariants()
            .expect("round trip preserves use/def edges");

        let entry = back.entry_block();
        let opcodes: Vec<_> = back
            .block_instrs(entry)
            .map(|i| std::mem::discriminant(&back.instr(i).opcode))
            .collect();
        assert_eq!(opcodes.len(), 3); // add, store_local, ret
    }

    #[test]
    fn rejects_truncated_input() {
        let mut ir = Ir::new();
        assert!(read("locals:\n", &mut ir).is_err());
    }

    #[test]
    fn float_constants_round_trip_bit_exact() {
        let mut ir = Ir::new();
        let _ = ir.new_const(ConstPayload::F64(std::f64::consts::PI));
        let text = render(&ir);
        let mut back = Ir::new();
        read(&text, &mut back).unwrap();
        match &back.value(ValueId(0)).kind {
            ValueKind::Const(ConstPayload::F64(f)) => assert_eq!(*f, std::f64::consts::PI),
            other => panic!("expected f64 const, got {other:?}"),
        }
    }
}

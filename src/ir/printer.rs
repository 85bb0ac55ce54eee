//! A minimal textual printer, scoped to one [`MethodBody`] (spec.md 4.4
//! "Output"): blocks print in a stable order with a header-terminator
//! layout, and each value gets a symbolic name issued by a
//! [`SymbolTable`]. The full-featured pretty-printer (source-level
//! formatting, multi-body symbol scoping) stays out of scope — this
//! exists only so tests and callers can observe IR contents without
//! reaching for `{:?}`.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::types::TypeStore;

use super::body::MethodBody;
use super::instruction::InstKind;
use super::value::{BlockId, InstId, Value};

/// Issues stable symbolic names for a single body's values, scoped to the
/// lifetime of one `print` call (spec.md 4.4: "per-value symbolic names
/// issued by a `SymbolTable` scoped to the body").
#[derive(Default)]
pub struct SymbolTable;

impl SymbolTable {
    #[must_use]
    pub fn name_of(&self, v: Value) -> String {
        match v {
            Value::Const(id) => format!("%{id}"),
            Value::Argument(id) => format!("%{id}"),
            Value::Variable(id) => format!("%{id}"),
            Value::Instruction(id) => format!("%{id}"),
        }
    }

    #[must_use]
    pub fn block_name(&self, b: BlockId) -> String { format!("{b}") }
}

/// Render `body` as text: blocks in arena order (spec.md's "stable order"),
/// each block's header instructions (phis/guards) first, then the rest,
/// terminator last.
#[must_use]
pub fn print_body(body: &MethodBody, types: &TypeStore) -> String {
    let syms = SymbolTable::default();
    let mut out = String::new();
    for (id, _) in body.blocks() {
        writeln!(out, "{}:", syms.block_name(id)).unwrap();
        for inst in body.block_insts(id) {
            print_inst(&mut out, body, types, &syms, inst);
        }
    }
    out
}

fn print_inst(out: &mut String, body: &MethodBody, types: &TypeStore, syms: &SymbolTable, id: InstId) {
    let data = body.inst(id);
    let result = syms.name_of(Value::Instruction(id));
    let ty = types.display(data.result_ty);
    match &data.kind {
        InstKind::Binary { op, left, right } => {
            writeln!(out, "  {result}: {ty} = {op:?} {}, {}", syms.name_of(*left), syms.name_of(*right)).unwrap();
        }
        InstKind::Unary { op, operand } => {
            writeln!(out, "  {result}: {ty} = {op:?} {}", syms.name_of(*operand)).unwrap();
        }
        InstKind::Compare { op, left, right } => {
            writeln!(out, "  {result}: {ty} = cmp.{op:?} {}, {}", syms.name_of(*left), syms.name_of(*right)).unwrap();
        }
        InstKind::Branch { cond, then_blk, else_blk } => match (cond, else_blk) {
            (Some(c), Some(e)) => { writeln!(out, "  br {} ? {} : {}", syms.name_of(*c), syms.block_name(*then_blk), syms.block_name(*e)).unwrap(); }
            _ => { writeln!(out, "  jmp {}", syms.block_name(*then_blk)).unwrap(); }
        },
        InstKind::Phi { args } => {
            let parts = args.iter().map(|a| format!("[{}: {}]", syms.block_name(a.pred), syms.name_of(a.value))).join(", ");
            writeln!(out, "  {result}: {ty} = phi {parts}").unwrap();
        }
        InstKind::Load { addr, .. } => { writeln!(out, "  {result}: {ty} = load {}", syms.name_of(*addr)).unwrap(); }
        InstKind::Store { addr, value } => { writeln!(out, "  store {}, {}", syms.name_of(*addr), syms.name_of(*value)).unwrap(); }
        InstKind::ArrayAddr { array, index, .. } => { writeln!(out, "  {result}: {ty} = arraddr {}[{}]", syms.name_of(*array), syms.name_of(*index)).unwrap(); }
        InstKind::FieldAddr { base, field } => { writeln!(out, "  {result}: {ty} = fieldaddr {}.{field}", syms.name_of(*base)).unwrap(); }
        InstKind::ExtractField { base, field } => { writeln!(out, "  {result}: {ty} = extractfield {}.{field}", syms.name_of(*base)).unwrap(); }
        InstKind::Guard { kind, handler, .. } => { writeln!(out, "  guard {kind:?} -> {}", syms.block_name(*handler)).unwrap(); }
        InstKind::StoreVar { var, value } => { writeln!(out, "  storevar {}, {}", syms.name_of(*var), syms.name_of(*value)).unwrap(); }
        InstKind::LoadVar { var, .. } => { writeln!(out, "  {result}: {ty} = loadvar {}", syms.name_of(*var)).unwrap(); }
        InstKind::MdArray { op, array, args, .. } => {
            let parts = args.iter().map(|a| syms.name_of(*a)).join(", ");
            writeln!(out, "  {result}: {ty} = mdarray.{op:?} {}({parts})", syms.name_of(*array)).unwrap();
        }
        InstKind::Intrinsic { op, args } => {
            let parts = args.iter().map(|a| syms.name_of(*a)).join(", ");
            writeln!(out, "  {result}: {ty} = intrinsic.{op:?}({parts})").unwrap();
        }
        InstKind::Call { method, args } => {
            let parts = args.iter().map(|a| syms.name_of(*a)).join(", ");
            writeln!(out, "  {result}: {ty} = call {method}({parts})").unwrap();
        }
        InstKind::Return { values } => {
            let parts = values.iter().map(|v| syms.name_of(*v)).join(", ");
            writeln!(out, "  ret {parts}").unwrap();
        }
        InstKind::Throw { value } => { writeln!(out, "  throw {}", syms.name_of(*value)).unwrap(); }
        InstKind::Unreachable => { writeln!(out, "  unreachable").unwrap(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::InstKind;
    use crate::ir::value::{ConstData, ConstKind};
    use crate::types::TypeStore;

    #[test]
    fn prints_a_trivial_return() {
        let mut body = MethodBody::new();
        let store = TypeStore::new();
        let entry = body.entry_block;
        let c = body.create_const(ConstData { kind: ConstKind::Int(1), ty: store.i32_ });
        body.append(entry, InstKind::Return { values: smallvec::smallvec![Value::Const(c)] }, store.void);
        let text = print_body(&body, &store);
        assert!(text.contains("ret"));
        assert!(text.starts_with("b0:"));
    }
}

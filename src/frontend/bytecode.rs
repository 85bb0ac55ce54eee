//! The input bytecode format the importer consumes (spec.md section 6):
//! a flat instruction stream addressed by byte offset, plus an exception
//! table supplied inner-first. These types have no behavior of their own —
//! they're the stable boundary between an embedder's metadata reader and
//! [`super::import`].

use crate::region::RegionKind;
use crate::types::TypeId;

/// One opcode the importer knows how to abstractly interpret. CIL carries
/// far more opcodes than this; constructs that need full metadata
/// resolution beyond a type/member lookup (`newarr`, `newobj`, `box`,
/// `unbox`, and multi-way `switch`) are recognized by the bytecode reader
/// but rejected by the importer as [`super::error::ImportError::UnsupportedConstruct`]
/// rather than silently dropped or guessed at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    Nop,
    Dup,
    Pop,

    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    LdNull,

    Ldarg,
    Starg,
    Ldarga,
    Ldloc,
    Stloc,
    Ldloca,

    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Neg,
    Not,
    Conv,

    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,

    Br,
    BrTrue,
    BrFalse,
    Switch,

    Call,
    Ret,
    Throw,

    Ldfld,
    Stfld,
    Ldflda,

    Ldelem,
    Stelem,
    Ldelema,
    Ldlen,

    /// Constructs the core does not lower: `newarr`, `newobj`, `box`,
    /// `unbox`, and anything else that needs full type construction rather
    /// than a lookup. Carried through so the bytecode reader stays total
    /// over real CIL streams; the importer reports these explicitly.
    Unsupported,
}

/// The operand carried by one [`RawInstruction`]. Deliberately a small
/// closed union rather than one field per possible CIL operand encoding —
/// the importer only ever needs one of these shapes per opcode.
#[derive(Clone, Debug, PartialEq)]
pub enum RawOperand {
    None,
    /// An inline integer constant, or (for `ldc.r4`/`ldc.r8`) the bit
    /// pattern of a float constant — the embedder is responsible for
    /// widening an `f32`'s bits into the low 32 bits before sign-extending
    /// is *not* applied; `Conv`/`LdcR4` interpret this field themselves.
    Int(i64),
    BranchTarget(u32),
    Switch(Box<[u32]>),
    /// An already-resolved metadata token: the index a
    /// [`super::import::MemberResolver`] uses to produce a field, method,
    /// or type handle. Resolving raw CIL tokens against a metadata blob is
    /// the embedder's job, not this crate's.
    Token(u32),
    /// An argument or local slot index.
    Var(u16),
}

/// One instruction in the input stream, addressed by its starting byte
/// offset (used for leader discovery, branch targets, and error
/// reporting).
#[derive(Clone, Debug, PartialEq)]
pub struct RawInstruction {
    pub op: OpCode,
    pub offset: u32,
    pub operand: RawOperand,
}

impl RawInstruction {
    #[must_use]
    pub fn new(op: OpCode, offset: u32, operand: RawOperand) -> Self {
        Self { op, offset, operand }
    }

    /// Whether this opcode ends a basic block (spec.md 4.4 stage 1: the
    /// offset right after a terminator is always a leader).
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.op,
            OpCode::Br | OpCode::BrTrue | OpCode::BrFalse | OpCode::Switch | OpCode::Ret | OpCode::Throw
        )
    }

    /// Every block offset this instruction can transfer control to, not
    /// counting ordinary fallthrough.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match (&self.op, &self.operand) {
            (OpCode::Br | OpCode::BrTrue | OpCode::BrFalse, RawOperand::BranchTarget(t)) => vec![*t],
            (OpCode::Switch, RawOperand::Switch(targets)) => targets.to_vec(),
            _ => Vec::new(),
        }
    }
}

/// A protected region from the method's exception table (spec.md section
/// 6), mirroring [`crate::region::RegionNode`] minus the parent link that
/// [`crate::region::RegionTree::build`] computes.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionRegion {
    pub kind: RegionKind,
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
    pub filter_start: Option<u32>,
    pub catch_type: Option<TypeId>,
}

impl ExceptionRegion {
    #[must_use]
    pub fn as_region_tuple(&self) -> (RegionKind, u32, u32, u32, Option<u32>, Option<TypeId>) {
        (self.kind, self.try_start, self.try_end, self.handler_start, self.filter_start, self.catch_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators_report_their_targets() {
        let br = RawInstruction::new(OpCode::Br, 10, RawOperand::BranchTarget(20));
        assert!(br.is_terminator());
        assert_eq!(br.branch_targets(), vec![20]);

        let ret = RawInstruction::new(OpCode::Ret, 30, RawOperand::None);
        assert!(ret.is_terminator());
        assert!(ret.branch_targets().is_empty());
    }

    #[test]
    fn non_terminators_report_no_targets() {
        let add = RawInstruction::new(OpCode::Add, 0, RawOperand::None);
        assert!(!add.is_terminator());
        assert!(add.branch_targets().is_empty());
    }
}

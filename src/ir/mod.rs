//! The IR Core (spec.md 4.2): values, instructions, basic blocks and the
//! `MethodBody` arena that owns them, plus the editing primitives and
//! textual printer built on top.

pub mod value;
pub mod instruction;
pub mod block;
pub mod body;
pub mod editor;
pub mod printer;

pub use block::BasicBlock;
pub use body::MethodBody;
pub use instruction::{BinOp, CilIntrinsic, CmpOp, GuardKind, InstData, InstKind, PhiArg, UnOp};
pub use value::{
    ArgData, ArgId, BlockId, ConstData, ConstId, ConstKind, InstId, OperandList, UseAnchor,
    UseLink, VarData, VarFlags, VarId, Value,
};

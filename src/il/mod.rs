//! The typed intermediate language: a node graph (`node`) joined into
//! blocks by a control-flow graph with dominance/interval analysis (`cfg`).

pub mod cfg;
pub mod node;

pub use cfg::{ILBlock, ILBlockId, ILCfg, Interval};
pub use node::{BinaryOp, Callable, CaseTableEntry, ILNode, NodeArena, NodeId, PlaceKind, UnaryOp};

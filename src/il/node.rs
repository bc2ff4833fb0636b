//! The intermediate-language node graph: one tagged `enum ILNode` per
//! function, owned by a `NodeArena` and referenced by `NodeId`. Replaces the
//! original's `ILNode`/`ILVar`/`ILCallable` class hierarchy (with RTTI-style
//! `dynamic_cast` checks) with an enum Rust can exhaustively match over.

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::smx::SmxType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Invert,
    Fabs,
    Float,
    FloatNot,
    RndToNearest,
    RndToCeil,
    RndToZero,
    RndToFloor,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Div,
    Mul,
    Mod,
    Shl,
    Shr,
    Sshr,
    BitAnd,
    BitOr,
    Xor,
    Eq,
    Neq,
    Sgrtr,
    Sgeq,
    Sless,
    Sleq,
    And,
    Or,
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatCmp,
    FloatGt,
    FloatGe,
    FloatLe,
    FloatLt,
    FloatEq,
    FloatNe,
}

impl BinaryOp {
    /// Swaps the operand order a comparison reads in, used when the
    /// structurizer or fixer needs to flip a condition without negating it.
    pub fn swap_operands(self) -> BinaryOp {
        use BinaryOp::*;
        match self {
            Sgrtr => Sless,
            Sless => Sgrtr,
            Sgeq => Sleq,
            Sleq => Sgeq,
            FloatGt => FloatLt,
            FloatLt => FloatGt,
            FloatGe => FloatLe,
            FloatLe => FloatGe,
            other => other,
        }
    }

    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Eq | Neq
                | Sgrtr
                | Sgeq
                | Sless
                | Sleq
                | FloatCmp
                | FloatGt
                | FloatGe
                | FloatLe
                | FloatLt
                | FloatEq
                | FloatNe
        )
    }

    /// The opposite comparison, used to invert a branch condition in place
    /// (e.g. folding `!(a < b)` into `a >= b`).
    pub fn negate_comparison(self) -> Option<BinaryOp> {
        use BinaryOp::*;
        Some(match self {
            Eq => Neq,
            Neq => Eq,
            Sgrtr => Sleq,
            Sleq => Sgrtr,
            Sless => Sgeq,
            Sgeq => Sless,
            FloatEq => FloatNe,
            FloatNe => FloatEq,
            FloatGt => FloatLe,
            FloatLe => FloatGt,
            FloatLt => FloatGe,
            FloatGe => FloatLt,
            _ => return None,
        })
    }
}

/// The subset of nodes that are legal assignment targets / array bases,
/// kept as a nested enum rather than a second trait hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    Local,
    Global,
    Heap,
    ArrayElement,
    Field,
    Temp,
}

#[derive(Debug, Clone)]
pub struct CaseTableEntry {
    pub value: Cell,
    pub target: crate::il::cfg::ILBlockId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callable {
    Function(u32),
    Native(u32),
}

/// The payload of one IL node. `NodeId`s inside reference sibling nodes in
/// the same function's `NodeArena`.
#[derive(Debug, Clone)]
pub enum ILNode {
    Const(Cell),

    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },

    LocalVar {
        stack_offset: i32,
    },
    GlobalVar {
        address: Cell,
    },
    HeapVar {
        address: Cell,
    },
    TempVar {
        slot: u32,
    },
    ArrayElementVar {
        base: NodeId,
        index: NodeId,
    },
    FieldVar {
        base: NodeId,
        offset: u32,
    },

    Load {
        place: NodeId,
    },
    Store {
        place: NodeId,
        value: NodeId,
    },

    Jump {
        target: crate::il::cfg::ILBlockId,
    },
    JumpCond {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        true_target: crate::il::cfg::ILBlockId,
        false_target: crate::il::cfg::ILBlockId,
    },
    Switch {
        index: NodeId,
        cases: SmallVec<[CaseTableEntry; 8]>,
        default: crate::il::cfg::ILBlockId,
    },

    Call {
        callee: Callable,
        args: SmallVec<[NodeId; 4]>,
    },

    Return {
        value: Option<NodeId>,
    },

    /// A join point for values reaching a block from more than one
    /// predecessor; one input per predecessor, in block predecessor order.
    Phi {
        inputs: SmallVec<[NodeId; 4]>,
    },

    /// Marks a loop header discovered by interval analysis so the
    /// structurizer can recover `while`/`do-while`/`endless` shape without
    /// re-deriving it from the CFG a second time.
    Interval {
        header: crate::il::cfg::ILBlockId,
    },
}

impl ILNode {
    pub fn place_kind(&self) -> Option<PlaceKind> {
        match self {
            ILNode::LocalVar { .. } => Some(PlaceKind::Local),
            ILNode::GlobalVar { .. } => Some(PlaceKind::Global),
            ILNode::HeapVar { .. } => Some(PlaceKind::Heap),
            ILNode::ArrayElementVar { .. } => Some(PlaceKind::ArrayElement),
            ILNode::FieldVar { .. } => Some(PlaceKind::Field),
            ILNode::TempVar { .. } => Some(PlaceKind::Temp),
            _ => None,
        }
    }

    pub fn is_place(&self) -> bool {
        self.place_kind().is_some()
    }

    /// The direct operand `NodeId`s this node reads, used to build use-lists
    /// and to drive `replace_uses_with`.
    pub fn operands(&self) -> SmallVec<[NodeId; 4]> {
        let mut out = SmallVec::new();
        match self {
            ILNode::Const(_) | ILNode::LocalVar { .. } | ILNode::GlobalVar { .. }
            | ILNode::HeapVar { .. } | ILNode::TempVar { .. } | ILNode::Jump { .. } => {}
            ILNode::Unary { operand, .. } => out.push(*operand),
            ILNode::Binary { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            ILNode::ArrayElementVar { base, index } => {
                out.push(*base);
                out.push(*index);
            }
            ILNode::FieldVar { base, .. } => out.push(*base),
            ILNode::Load { place } => out.push(*place),
            ILNode::Store { place, value } => {
                out.push(*place);
                out.push(*value);
            }
            ILNode::JumpCond { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            ILNode::Switch { index, .. } => out.push(*index),
            ILNode::Call { args, .. } => out.extend(args.iter().copied()),
            ILNode::Return { value } => {
                if let Some(v) = value {
                    out.push(*v);
                }
            }
            ILNode::Phi { inputs } => out.extend(inputs.iter().copied()),
            ILNode::Interval { .. } => {}
        }
        out
    }
}

#[derive(Debug, Clone)]
struct ILNodeData {
    node: ILNode,
    ty: SmxType,
    uses: SmallVec<[NodeId; 4]>,
}

/// Owns every IL node for one function. `NodeId`s are stable for the
/// arena's lifetime: nodes are never removed, only replaced/dead (an
/// unreferenced node is simply never walked).
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<ILNodeData>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: ILNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let operands = node.operands();
        self.nodes.push(ILNodeData {
            node,
            ty: SmxType::unknown(),
            uses: SmallVec::new(),
        });
        for operand in operands {
            self.add_use(operand, id);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &ILNode {
        &self.nodes[id.0 as usize].node
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut ILNode {
        &mut self.nodes[id.0 as usize].node
    }

    pub fn ty(&self, id: NodeId) -> &SmxType {
        &self.nodes[id.0 as usize].ty
    }

    pub fn set_ty(&mut self, id: NodeId, ty: SmxType) {
        self.nodes[id.0 as usize].ty = ty;
    }

    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0 as usize].uses
    }

    fn add_use(&mut self, operand: NodeId, user: NodeId) {
        self.nodes[operand.0 as usize].uses.push(user);
    }

    fn remove_use(&mut self, operand: NodeId, user: NodeId) {
        let uses = &mut self.nodes[operand.0 as usize].uses;
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    /// Replaces every occurrence of `old` with `new` in every node that
    /// currently uses `old`, maintaining use-list invariants on both sides.
    /// Mirrors `ILNode::ReplaceUsesWith`.
    pub fn replace_uses_with(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users: SmallVec<[NodeId; 8]> = self.nodes[old.0 as usize].uses.clone().into_iter().collect();
        for user in users {
            self.replace_operand_in(user, old, new);
            self.remove_use(old, user);
            self.add_use(new, user);
        }
    }

    fn replace_operand_in(&mut self, user: NodeId, old: NodeId, new: NodeId) {
        let replace = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
            }
        };
        match &mut self.nodes[user.0 as usize].node {
            ILNode::Unary { operand, .. } => replace(operand),
            ILNode::Binary { lhs, rhs, .. } => {
                replace(lhs);
                replace(rhs);
            }
            ILNode::ArrayElementVar { base, index } => {
                replace(base);
                replace(index);
            }
            ILNode::FieldVar { base, .. } => replace(base),
            ILNode::Load { place } => replace(place),
            ILNode::Store { place, value } => {
                replace(place);
                replace(value);
            }
            ILNode::JumpCond { lhs, rhs, .. } => {
                replace(lhs);
                replace(rhs);
            }
            ILNode::Switch { index, .. } => replace(index),
            ILNode::Call { args, .. } => {
                for a in args.iter_mut() {
                    replace(a);
                }
            }
            ILNode::Return { value } => {
                if let Some(v) = value {
                    replace(v);
                }
            }
            ILNode::Phi { inputs } => {
                for i in inputs.iter_mut() {
                    replace(i);
                }
            }
            ILNode::Const(_)
            | ILNode::LocalVar { .. }
            | ILNode::GlobalVar { .. }
            | ILNode::HeapVar { .. }
            | ILNode::TempVar { .. }
            | ILNode::Jump { .. }
            | ILNode::Interval { .. } => {}
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_records_use_list_on_operands() {
        let mut arena = NodeArena::new();
        let a = arena.push(ILNode::Const(Cell(1)));
        let b = arena.push(ILNode::Const(Cell(2)));
        let sum = arena.push(ILNode::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        });
        assert_eq!(arena.uses(a), &[sum]);
        assert_eq!(arena.uses(b), &[sum]);
    }

    #[test]
    fn replace_uses_with_updates_both_use_lists() {
        let mut arena = NodeArena::new();
        let a = arena.push(ILNode::Const(Cell(1)));
        let b = arena.push(ILNode::Const(Cell(2)));
        let c = arena.push(ILNode::Const(Cell(3)));
        let sum = arena.push(ILNode::Binary {
            op: BinaryOp::Add,
            lhs: a,
            rhs: b,
        });

        arena.replace_uses_with(a, c);

        match arena.get(sum) {
            ILNode::Binary { lhs, .. } => assert_eq!(*lhs, c),
            _ => panic!("expected Binary"),
        }
        assert!(arena.uses(a).is_empty());
        assert_eq!(arena.uses(c), &[sum]);
    }

    #[test]
    fn negate_comparison_is_involutive() {
        let op = BinaryOp::Sgrtr;
        let negated = op.negate_comparison().unwrap();
        assert_eq!(negated.negate_comparison().unwrap(), op);
    }
}

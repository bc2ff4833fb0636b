//! Bidirectional type propagation over a lifted function's IL: an initial
//! pass seeds every node whose type is known directly from RTTI metadata
//! (locals, globals, call targets), then a demand-driven fixpoint pass
//! propagates types both from producers to consumers (`Load` inherits its
//! place's type) and from consumers back to producers (a comparison forces
//! `Bool` on the values it's fed).
//!
//! Nodes that never settle on a concrete type are reported through
//! `DiagnosticSink::warn_unrecoverable_type` rather than left to panic
//! downstream in the fixer or structurizer.

use crate::error::DiagnosticSink;
use crate::il::cfg::ILCfg;
use crate::il::node::{BinaryOp, Callable, ILNode, NodeArena, NodeId, UnaryOp};
use crate::smx::{SmxFunction, SmxImage, SmxType, SmxTypeTag};

const MAX_ITERATIONS: usize = 64;

pub struct Typer<'a> {
    image: &'a SmxImage,
    diagnostics: &'a mut DiagnosticSink,
}

impl<'a> Typer<'a> {
    pub fn new(image: &'a SmxImage, diagnostics: &'a mut DiagnosticSink) -> Self {
        Typer { image, diagnostics }
    }

    /// Runs both phases over every node in `arena` reachable from `cfg`.
    pub fn run(&mut self, arena: &mut NodeArena, cfg: &ILCfg, func: &SmxFunction) {
        self.populate(arena, func);
        self.propagate(arena, cfg);
        self.report_unresolved(arena);
    }

    /// Phase A: seed every node whose type is determined directly by
    /// metadata, independent of how it's used.
    fn populate(&mut self, arena: &mut NodeArena, func: &SmxFunction) {
        for i in 0..arena.len() {
            let id = NodeId(i as u32);
            let ty = match arena.get(id).clone() {
                ILNode::LocalVar { stack_offset } => func
                    .find_local_by_stack_offset(stack_offset)
                    .map(|v| v.ty.clone()),
                ILNode::GlobalVar { address } => {
                    self.image.find_global_at(address).map(|v| v.ty.clone())
                }
                ILNode::Const(_) => Some(SmxType::simple(SmxTypeTag::Int)),
                _ => None,
            };
            if let Some(ty) = ty {
                arena.set_ty(id, ty);
            }
        }
    }

    /// Phase B: iterate to a fixpoint, merging types forward (producer to
    /// consumer) and backward (consumer's demand onto an unknown producer).
    fn propagate(&mut self, arena: &mut NodeArena, cfg: &ILCfg) {
        for _ in 0..MAX_ITERATIONS {
            let mut changed = false;
            for block in &cfg.blocks {
                for &id in &block.nodes {
                    changed |= self.propagate_node(arena, id);
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn propagate_node(&mut self, arena: &mut NodeArena, id: NodeId) -> bool {
        let node = arena.get(id).clone();
        match node {
            ILNode::Unary { op, operand } => self.propagate_unary(arena, id, op, operand),
            ILNode::Binary { op, lhs, rhs } => self.propagate_binary(arena, id, op, lhs, rhs),
            ILNode::Load { place } => self.unify_pair(arena, id, place),
            ILNode::Store { place, value } => self.unify_pair(arena, place, value),
            ILNode::ArrayElementVar { base, .. } => self.propagate_array_elem(arena, id, base),
            ILNode::Phi { inputs } => self.propagate_phi(arena, id, &inputs),
            ILNode::Call { callee, args } => self.propagate_call(arena, id, callee, &args),
            ILNode::Return { value: Some(v) } => self.unify_pair(arena, id, v),
            ILNode::JumpCond { lhs, rhs, .. } => self.unify_pair(arena, lhs, rhs),
            _ => false,
        }
    }

    fn unify_pair(&mut self, arena: &mut NodeArena, a: NodeId, b: NodeId) -> bool {
        let ty_a = arena.ty(a).clone();
        let ty_b = arena.ty(b).clone();
        match (ty_a.tag == SmxTypeTag::Unknown, ty_b.tag == SmxTypeTag::Unknown) {
            (true, false) => {
                arena.set_ty(a, ty_b);
                true
            }
            (false, true) => {
                arena.set_ty(b, ty_a);
                true
            }
            _ => false,
        }
    }

    fn propagate_unary(&mut self, arena: &mut NodeArena, id: NodeId, op: UnaryOp, operand: NodeId) -> bool {
        let forced = match op {
            UnaryOp::Fabs | UnaryOp::Float | UnaryOp::FloatNot | UnaryOp::RndToNearest
            | UnaryOp::RndToCeil | UnaryOp::RndToZero | UnaryOp::RndToFloor => {
                Some(SmxType::simple(SmxTypeTag::Float))
            }
            UnaryOp::Not => Some(SmxType::simple(SmxTypeTag::Bool)),
            UnaryOp::Neg | UnaryOp::Invert | UnaryOp::Inc | UnaryOp::Dec => None,
        };
        let mut changed = false;
        if let Some(forced) = forced {
            if arena.ty(id).tag == SmxTypeTag::Unknown {
                arena.set_ty(id, forced.clone());
                changed = true;
            }
            if arena.ty(operand).tag == SmxTypeTag::Unknown {
                arena.set_ty(operand, forced);
                changed = true;
            }
        } else {
            changed |= self.unify_pair(arena, id, operand);
        }
        changed
    }

    fn propagate_binary(
        &mut self,
        arena: &mut NodeArena,
        id: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> bool {
        let mut changed = false;

        let is_float_op = matches!(
            op,
            BinaryOp::FloatAdd
                | BinaryOp::FloatSub
                | BinaryOp::FloatMul
                | BinaryOp::FloatDiv
                | BinaryOp::FloatCmp
                | BinaryOp::FloatGt
                | BinaryOp::FloatGe
                | BinaryOp::FloatLe
                | BinaryOp::FloatLt
                | BinaryOp::FloatEq
                | BinaryOp::FloatNe
        );
        if is_float_op {
            for operand in [lhs, rhs] {
                if arena.ty(operand).tag == SmxTypeTag::Unknown {
                    arena.set_ty(operand, SmxType::simple(SmxTypeTag::Float));
                    changed = true;
                }
            }
        } else {
            changed |= self.unify_pair(arena, lhs, rhs);
        }

        let is_bool_result = op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or);
        if is_bool_result {
            if arena.ty(id).tag == SmxTypeTag::Unknown {
                arena.set_ty(id, SmxType::simple(SmxTypeTag::Bool));
                changed = true;
            }
        } else {
            changed |= self.unify_pair(arena, id, lhs);
            changed |= self.unify_pair(arena, id, rhs);
        }

        changed
    }

    fn propagate_array_elem(&mut self, arena: &mut NodeArena, id: NodeId, base: NodeId) -> bool {
        let base_ty = arena.ty(base).clone();
        let mut changed = false;
        if base_ty.is_array() && arena.ty(id).tag == SmxTypeTag::Unknown {
            arena.set_ty(id, base_ty.one_less_dim());
            changed = true;
        } else if !base_ty.is_array() && base_ty.tag == SmxTypeTag::Unknown {
            let elem_ty = arena.ty(id).clone();
            if elem_ty.tag != SmxTypeTag::Unknown {
                arena.set_ty(base, elem_ty.one_more_dim());
                changed = true;
            }
        }
        changed
    }

    fn propagate_phi(&mut self, arena: &mut NodeArena, id: NodeId, inputs: &[NodeId]) -> bool {
        let mut changed = false;
        let known = inputs
            .iter()
            .map(|&i| arena.ty(i).clone())
            .find(|t| t.tag != SmxTypeTag::Unknown);
        if let Some(ty) = known {
            if arena.ty(id).tag == SmxTypeTag::Unknown {
                arena.set_ty(id, ty.clone());
                changed = true;
            }
            for &input in inputs {
                if arena.ty(input).tag == SmxTypeTag::Unknown {
                    arena.set_ty(input, ty.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    fn propagate_call(
        &mut self,
        arena: &mut NodeArena,
        id: NodeId,
        callee: Callable,
        args: &[NodeId],
    ) -> bool {
        let signature = match callee {
            Callable::Function(idx) => self.image.find_function_by_id(idx as usize).map(|f| &f.signature),
            Callable::Native(idx) => self.image.find_native_by_index(idx as usize).map(|n| &n.signature),
        };
        let Some(signature) = signature else {
            return false;
        };
        let mut changed = false;
        if let Some(ret) = &signature.ret {
            if arena.ty(id).tag == SmxTypeTag::Unknown {
                arena.set_ty(id, ret.clone());
                changed = true;
            }
        }
        for (arg_id, formal) in args.iter().zip(signature.args.iter()) {
            if arena.ty(*arg_id).tag == SmxTypeTag::Unknown {
                arena.set_ty(*arg_id, formal.ty.clone());
                changed = true;
            }
        }
        changed
    }

    fn report_unresolved(&mut self, arena: &NodeArena) {
        for i in 0..arena.len() {
            let id = NodeId(i as u32);
            if arena.ty(id).tag == SmxTypeTag::Unknown && arena.get(id).is_place() {
                self.diagnostics
                    .warn_unrecoverable_type(format!("node#{} ({:?})", id.0, arena.get(id)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::il::cfg::{ILBlock, ILBlockId};
    use crate::smx::{SmxFunctionSignature, SmxVariable, SmxVariableClass};

    fn function_with_local(offset: i32, ty: SmxType) -> SmxFunction {
        SmxFunction {
            raw_name: "f".into(),
            name: "f".into(),
            pcode_start: Cell(0),
            pcode_end: Cell(0),
            is_public: false,
            signature: SmxFunctionSignature::default(),
            locals: vec![SmxVariable {
                name: "x".into(),
                address: Cell(offset),
                ty,
                vclass: SmxVariableClass::Local,
                is_public: false,
            }],
        }
    }

    #[test]
    fn load_of_typed_local_inherits_its_type() {
        let image = SmxImage::default();
        let mut diagnostics = DiagnosticSink::new();
        let func = function_with_local(-8, SmxType::simple(SmxTypeTag::Float));

        let mut arena = NodeArena::new();
        let place = arena.push(ILNode::LocalVar { stack_offset: -8 });
        let load = arena.push(ILNode::Load { place });
        let cfg = ILCfg::new(
            vec![ILBlock {
                nodes: vec![place, load],
                successors: Default::default(),
                predecessors: Default::default(),
            }],
            ILBlockId(0),
        );

        Typer::new(&image, &mut diagnostics).run(&mut arena, &cfg, &func);

        assert_eq!(arena.ty(load).tag, SmxTypeTag::Float);
    }

    #[test]
    fn float_binary_forces_float_on_unknown_operands() {
        let image = SmxImage::default();
        let mut diagnostics = DiagnosticSink::new();
        let func = function_with_local(-8, SmxType::unknown());

        let mut arena = NodeArena::new();
        let a = arena.push(ILNode::Const(Cell(1)));
        let b = arena.push(ILNode::Const(Cell(2)));
        arena.set_ty(a, SmxType::unknown());
        arena.set_ty(b, SmxType::unknown());
        let add = arena.push(ILNode::Binary {
            op: BinaryOp::FloatAdd,
            lhs: a,
            rhs: b,
        });
        let cfg = ILCfg::new(
            vec![ILBlock {
                nodes: vec![a, b, add],
                successors: Default::default(),
                predecessors: Default::default(),
            }],
            ILBlockId(0),
        );

        Typer::new(&image, &mut diagnostics).run(&mut arena, &cfg, &func);

        assert_eq!(arena.ty(a).tag, SmxTypeTag::Float);
        assert_eq!(arena.ty(b).tag, SmxTypeTag::Float);
    }
}

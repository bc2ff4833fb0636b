//! Lifts a pcode `ControlFlowGraph` into a typed `ILCfg` by abstractly
//! interpreting the two-register (`pri`/`alt`) plus explicit-stack VM one
//! basic block at a time, joining predecessor states with `Phi` nodes where
//! they disagree.
//!
//! Grounded in `original_source/SmxDecompiler/lifter.cpp`: `AbstractExprStack`
//! (here `AbstractState`), the `Lift()` orchestration order (lift every
//! block, then clean up), and `LiftBlock`'s predecessor-state join that
//! ignores back edges (a loop header's live-in state comes only from its
//! forward predecessors; the backward contribution is patched in once the
//! loop body is lifted, mirrored here by deferring back-edge phi inputs to a
//! second pass).

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::cfg::{BasicBlock, ControlFlowGraph};
use crate::error::DiagnosticSink;
use crate::il::cfg::{ILBlock, ILBlockId, ILCfg};
use crate::il::node::{BinaryOp, Callable, CaseTableEntry, ILNode, NodeArena, NodeId, UnaryOp};
use crate::pcode::Opcode;
use crate::smx::SmxImage;

#[derive(Debug, Clone, Default)]
struct AbstractState {
    stack: Vec<NodeId>,
    pri: Option<NodeId>,
    alt: Option<NodeId>,
}

pub struct LiftedFunction {
    pub arena: NodeArena,
    pub cfg: ILCfg,
}

struct Lifter<'a> {
    image: &'a SmxImage,
    code: &'a [crate::cell::Cell],
    arena: NodeArena,
    blocks: Vec<ILBlock>,
    exit_states: Vec<Option<AbstractState>>,
    locals: HashMap<i32, NodeId>,
    globals: HashMap<i32, NodeId>,
    heap_counter: u32,
    temp_counter: u32,
    diagnostics: &'a mut DiagnosticSink,
}

/// What a `Store` wrapping a `Call`'s result resolves to once its uses are
/// known, used by `Lifter::clean_calls`.
enum CallAction {
    Bare(NodeId),
    Drop,
}

/// Lifts one function's pcode CFG into an IL CFG. The pcode CFG is already
/// in reverse post-order, so processing blocks in index order guarantees
/// every forward predecessor is lifted before its successor.
pub fn lift(
    image: &SmxImage,
    pcode: &ControlFlowGraph,
    code: &[crate::cell::Cell],
    diagnostics: &mut DiagnosticSink,
) -> LiftedFunction {
    let mut lifter = Lifter {
        image,
        code,
        arena: NodeArena::new(),
        blocks: vec![ILBlock::default(); pcode.blocks.len()],
        exit_states: vec![None; pcode.blocks.len()],
        locals: HashMap::new(),
        globals: HashMap::new(),
        heap_counter: 0,
        temp_counter: 0,
        diagnostics,
    };

    for (idx, block) in pcode.blocks.iter().enumerate() {
        lifter.lift_block(idx as u32, block);
    }

    let il_blocks = std::mem::take(&mut lifter.blocks);
    let mut cfg = ILCfg::new(il_blocks, ILBlockId(0));

    // Post-lift cleanup, in the order `Lift()` runs it: fold call results
    // into their single use, drop vars nothing reads, lower phis into their
    // predecessors, then fuse short-circuit branch chains back into
    // compound conditions. Each pass can make the next one's job easier (a
    // pruned dead phi store removes a fusion obstacle, for instance), so
    // dominance over the cleaned-up graph is only trustworthy once every
    // pass has run.
    lifter.clean_calls(&mut cfg);
    lifter.prune_dead_vars(&mut cfg);
    lifter.lower_phis(&mut cfg);
    lifter.synthesize_compound_conditions(&mut cfg);

    let cfg = ILCfg::new(cfg.blocks, cfg.entry);

    LiftedFunction {
        arena: lifter.arena,
        cfg,
    }
}

impl<'a> Lifter<'a> {
    fn is_back_edge(&self, from: u32, to: u32) -> bool {
        to <= from
    }

    /// Joins the exit states of every forward predecessor of `block_idx`,
    /// inserting a `Phi` wherever predecessors disagree.
    fn join_predecessors(&mut self, block_idx: u32, block: &BasicBlock) -> AbstractState {
        let forward_preds: Vec<u32> = block
            .predecessors
            .iter()
            .map(|p| p.block)
            .filter(|&p| !self.is_back_edge(p, block_idx))
            .collect();

        if forward_preds.is_empty() {
            return AbstractState::default();
        }
        if forward_preds.len() == 1 {
            return self.exit_states[forward_preds[0] as usize]
                .clone()
                .unwrap_or_default();
        }

        let states: Vec<AbstractState> = forward_preds
            .iter()
            .map(|&p| self.exit_states[p as usize].clone().unwrap_or_default())
            .collect();

        let join_one = |arena: &mut NodeArena, values: Vec<Option<NodeId>>| -> Option<NodeId> {
            let values: Vec<NodeId> = values.into_iter().flatten().collect();
            if values.is_empty() {
                return None;
            }
            if values.iter().all(|&v| v == values[0]) {
                return Some(values[0]);
            }
            let inputs: SmallVec<[NodeId; 4]> = values.into_iter().collect();
            Some(arena.push(ILNode::Phi { inputs }))
        };

        let pri = join_one(
            &mut self.arena,
            states.iter().map(|s| s.pri).collect(),
        );
        let alt = join_one(
            &mut self.arena,
            states.iter().map(|s| s.alt).collect(),
        );

        let depth = states.iter().map(|s| s.stack.len()).min().unwrap_or(0);
        if states.iter().any(|s| s.stack.len() != depth) {
            self.diagnostics.warn_unsupported_pattern(
                "lifter::join_predecessors",
                format!("block {block_idx} has mismatched predecessor stack depths"),
            );
        }
        let mut stack = Vec::with_capacity(depth);
        for i in 0..depth {
            let values: Vec<Option<NodeId>> = states.iter().map(|s| Some(s.stack[i])).collect();
            if let Some(v) = join_one(&mut self.arena, values) {
                stack.push(v);
            }
        }

        AbstractState { stack, pri, alt }
    }

    fn lift_block(&mut self, block_idx: u32, block: &BasicBlock) {
        let mut state = self.join_predecessors(block_idx, block);
        let mut nodes: Vec<NodeId> = Vec::new();
        self.wrap_phi(&mut state.pri, &mut nodes);
        self.wrap_phi(&mut state.alt, &mut nodes);

        for instr in &block.instructions {
            self.lift_instruction(instr, &mut state, &mut nodes, block_idx, block);
        }

        self.blocks[block_idx as usize] = ILBlock {
            nodes,
            successors: block
                .successors
                .iter()
                .map(|&s| ILBlockId(s))
                .collect(),
            predecessors: block
                .predecessors
                .iter()
                .map(|p| ILBlockId(p.block))
                .collect(),
        };
        self.exit_states[block_idx as usize] = Some(state);
    }

    fn push_node(&mut self, nodes: &mut Vec<NodeId>, node: ILNode) -> NodeId {
        let id = self.arena.push(node);
        nodes.push(id);
        id
    }

    fn local(&mut self, offset: i32) -> NodeId {
        if let Some(&id) = self.locals.get(&offset) {
            return id;
        }
        let id = self.arena.push(ILNode::LocalVar {
            stack_offset: offset,
        });
        self.locals.insert(offset, id);
        id
    }

    fn global(&mut self, address: i32) -> NodeId {
        if let Some(&id) = self.globals.get(&address) {
            return id;
        }
        let id = self
            .arena
            .push(ILNode::GlobalVar { address: crate::cell::Cell(address) });
        self.globals.insert(address, id);
        id
    }

    fn const_node(&mut self, nodes: &mut Vec<NodeId>, value: i32) -> NodeId {
        self.push_node(nodes, ILNode::Const(crate::cell::Cell(value)))
    }

    fn lift_instruction(
        &mut self,
        instr: &crate::cfg::Instruction,
        state: &mut AbstractState,
        nodes: &mut Vec<NodeId>,
        block_idx: u32,
        block: &BasicBlock,
    ) {
        use Opcode::*;
        let ops = &instr.operands;

        match instr.opcode {
            Proc | Endproc | Break | None | Bounds => {}

            ConstPri => state.pri = Some(self.const_node(nodes, ops[0].as_i32())),
            ConstAlt => state.alt = Some(self.const_node(nodes, ops[0].as_i32())),
            Const => {
                let value = self.const_node(nodes, ops[1].as_i32());
                let place = self.local(ops[0].as_i32());
                self.push_node(nodes, ILNode::Store { place, value });
            }
            ConstS => {
                let value = self.const_node(nodes, ops[1].as_i32());
                let place = self.local(ops[0].as_i32());
                self.push_node(nodes, ILNode::Store { place, value });
            }

            LoadPri => {
                let place = self.global(ops[0].as_i32());
                state.pri = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            LoadAlt => {
                let place = self.global(ops[0].as_i32());
                state.alt = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            LoadSPri => {
                let place = self.local(ops[0].as_i32());
                state.pri = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            LoadSAlt => {
                let place = self.local(ops[0].as_i32());
                state.alt = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            LoadSBoth => {
                let p0 = self.local(ops[0].as_i32());
                state.pri = Some(self.push_node(nodes, ILNode::Load { place: p0 }));
                let p1 = self.local(ops[1].as_i32());
                state.alt = Some(self.push_node(nodes, ILNode::Load { place: p1 }));
            }
            LoadBoth => {
                let p0 = self.global(ops[0].as_i32());
                state.pri = Some(self.push_node(nodes, ILNode::Load { place: p0 }));
                let p1 = self.global(ops[1].as_i32());
                state.alt = Some(self.push_node(nodes, ILNode::Load { place: p1 }));
            }
            LoadI => {
                let raw = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                state.pri = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            LrefSPri => {
                let indirect = self.local(ops[0].as_i32());
                let loaded = self.push_node(nodes, ILNode::Load { place: indirect });
                state.pri = Some(self.push_node(nodes, ILNode::Load { place: loaded }));
            }
            LrefSAlt => {
                let indirect = self.local(ops[0].as_i32());
                let loaded = self.push_node(nodes, ILNode::Load { place: indirect });
                state.alt = Some(self.push_node(nodes, ILNode::Load { place: loaded }));
            }

            StorPri => {
                let place = self.global(ops[0].as_i32());
                let value = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            StorAlt => {
                let place = self.global(ops[0].as_i32());
                let value = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            StorSPri => {
                let place = self.local(ops[0].as_i32());
                let value = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            StorSAlt => {
                let place = self.local(ops[0].as_i32());
                let value = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            StorI => {
                let raw = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                let value = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            SrefSPri => {
                let indirect = self.local(ops[0].as_i32());
                let place = self.push_node(nodes, ILNode::Load { place: indirect });
                let value = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            SrefSAlt => {
                let indirect = self.local(ops[0].as_i32());
                let place = self.push_node(nodes, ILNode::Load { place: indirect });
                let value = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }
            LodbI => {
                let raw = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                state.pri = Some(self.push_node(nodes, ILNode::Load { place }));
            }
            StrbI => {
                let raw = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                let value = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                self.push_node(nodes, ILNode::Store { place, value });
            }

            Lidx | LidxB => {
                let raw_base = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                let base = self.get_var(raw_base);
                let index = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let elem = self.push_node(nodes, ILNode::ArrayElementVar { base, index });
                state.pri = Some(self.push_node(nodes, ILNode::Load { place: elem }));
            }
            Idxaddr | IdxaddrB => {
                let raw_base = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                let base = self.get_var(raw_base);
                let index = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                state.pri = Some(self.push_node(nodes, ILNode::ArrayElementVar { base, index }));
            }
            AddrPri => state.pri = Some(self.local(ops[0].as_i32())),
            AddrAlt => state.alt = Some(self.local(ops[0].as_i32())),

            ZeroPri => state.pri = Some(self.const_node(nodes, 0)),
            ZeroAlt => state.alt = Some(self.const_node(nodes, 0)),
            Zero => {
                let place = self.global(ops[0].as_i32());
                let value = self.const_node(nodes, 0);
                self.push_node(nodes, ILNode::Store { place, value });
            }
            ZeroS => {
                let place = self.local(ops[0].as_i32());
                let value = self.const_node(nodes, 0);
                self.push_node(nodes, ILNode::Store { place, value });
            }

            PushPri => state.stack.push(state.pri.unwrap_or_else(|| self.const_node(nodes, 0))),
            PushAlt => state.stack.push(state.alt.unwrap_or_else(|| self.const_node(nodes, 0))),
            Push => {
                let place = self.local(ops[0].as_i32());
                let v = self.push_node(nodes, ILNode::Load { place });
                state.stack.push(v);
            }
            PushS => {
                let place = self.local(ops[0].as_i32());
                let v = self.push_node(nodes, ILNode::Load { place });
                state.stack.push(v);
            }
            PushC => {
                let v = self.const_node(nodes, ops[0].as_i32());
                state.stack.push(v);
            }
            PushAdr => {
                let v = self.local(ops[0].as_i32());
                state.stack.push(v);
            }
            Push2 | Push2S | Push2Adr | Push2C | Push3 | Push3S | Push3Adr | Push3C | Push4
            | Push4S | Push4Adr | Push4C | Push5 | Push5S | Push5Adr | Push5C => {
                self.lift_push_n(instr.opcode, ops, state, nodes);
            }

            PopPri => state.pri = state.stack.pop(),
            PopAlt => state.alt = state.stack.pop(),
            SwapPri => {
                if let Some(top) = state.stack.pop() {
                    let old_pri = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                    state.stack.push(old_pri);
                    state.pri = Some(top);
                }
            }
            SwapAlt => {
                if let Some(top) = state.stack.pop() {
                    let old_alt = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                    state.stack.push(old_alt);
                    state.alt = Some(top);
                }
            }
            MovePri => state.pri = state.alt,
            MoveAlt => state.alt = state.pri,
            Xchg => std::mem::swap(&mut state.pri, &mut state.alt),
            Movs => {}

            Stack | Heap | Fill => {
                if instr.opcode == Heap {
                    let slot = self.heap_counter;
                    self.heap_counter += 1;
                    state.alt = Some(
                        self.push_node(nodes, ILNode::HeapVar { address: crate::cell::Cell(slot as i32) }),
                    );
                }
            }

            IncPri => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Inc)),
            IncAlt => state.alt = Some(self.unary(nodes, state.alt, UnaryOp::Inc)),
            IncI => {
                let raw = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                self.inc_dec_place(nodes, place, UnaryOp::Inc);
            }
            Inc => {
                let place = self.global(ops[0].as_i32());
                self.inc_dec_place(nodes, place, UnaryOp::Inc);
            }
            IncS => {
                let place = self.local(ops[0].as_i32());
                self.inc_dec_place(nodes, place, UnaryOp::Inc);
            }
            DecPri => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Dec)),
            DecAlt => state.alt = Some(self.unary(nodes, state.alt, UnaryOp::Dec)),
            DecI => {
                let raw = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let place = self.get_var(raw);
                self.inc_dec_place(nodes, place, UnaryOp::Dec);
            }
            Dec => {
                let place = self.global(ops[0].as_i32());
                self.inc_dec_place(nodes, place, UnaryOp::Dec);
            }
            DecS => {
                let place = self.local(ops[0].as_i32());
                self.inc_dec_place(nodes, place, UnaryOp::Dec);
            }

            Not => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Not)),
            Neg => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Neg)),
            Invert => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Invert)),
            Fabs => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Fabs)),
            Float => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::Float)),
            FloatNot => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::FloatNot)),
            RndToNearest => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::RndToNearest)),
            RndToFloor => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::RndToFloor)),
            RndToCeil => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::RndToCeil)),
            RndToZero => state.pri = Some(self.unary(nodes, state.pri, UnaryOp::RndToZero)),

            Shl => self.binary_pri_alt(nodes, state, BinaryOp::Shl),
            Shr => self.binary_pri_alt(nodes, state, BinaryOp::Shr),
            Sshr => self.binary_pri_alt(nodes, state, BinaryOp::Sshr),
            ShlCPri => {
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.pri = Some(self.binary(nodes, state.pri, Some(rhs), BinaryOp::Shl));
            }
            ShlCAlt => {
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.alt = Some(self.binary(nodes, state.alt, Some(rhs), BinaryOp::Shl));
            }
            Smul => self.binary_pri_alt(nodes, state, BinaryOp::Mul),
            SmulC => {
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.pri = Some(self.binary(nodes, state.pri, Some(rhs), BinaryOp::Mul));
            }
            Sdiv => {
                // `sdiv`: PRI = ALT / PRI (dividend in ALT).
                let lhs = state.alt;
                let rhs = state.pri;
                state.pri = Some(self.binary(nodes, lhs, rhs, BinaryOp::Div));
                state.alt = Some(self.binary(nodes, lhs, rhs, BinaryOp::Mod));
            }
            SdivAlt => {
                let lhs = state.pri;
                let rhs = state.alt;
                state.pri = Some(self.binary(nodes, lhs, rhs, BinaryOp::Div));
                state.alt = Some(self.binary(nodes, lhs, rhs, BinaryOp::Mod));
            }
            Add => {
                let pri = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let alt = state.alt.unwrap_or_else(|| self.const_node(nodes, 0));
                state.pri = Some(if self.arena.get(alt).is_place() {
                    self.push_node(nodes, ILNode::ArrayElementVar { base: alt, index: pri })
                } else if self.arena.get(pri).is_place() {
                    self.push_node(nodes, ILNode::ArrayElementVar { base: pri, index: alt })
                } else {
                    self.push_node(nodes, ILNode::Binary { op: BinaryOp::Add, lhs: pri, rhs: alt })
                });
            }
            AddC => {
                let pri = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.pri = Some(if self.arena.get(pri).is_place() {
                    self.push_node(nodes, ILNode::ArrayElementVar { base: pri, index: rhs })
                } else {
                    self.push_node(nodes, ILNode::Binary { op: BinaryOp::Add, lhs: pri, rhs })
                });
            }
            Sub => self.binary_pri_alt(nodes, state, BinaryOp::Sub),
            SubAlt => {
                let lhs = state.alt;
                let rhs = state.pri;
                state.pri = Some(self.binary(nodes, lhs, rhs, BinaryOp::Sub));
            }
            And => self.binary_pri_alt(nodes, state, BinaryOp::And),
            Or => self.binary_pri_alt(nodes, state, BinaryOp::Or),
            Xor => self.binary_pri_alt(nodes, state, BinaryOp::Xor),
            Eq => self.binary_pri_alt(nodes, state, BinaryOp::Eq),
            Neq => self.binary_pri_alt(nodes, state, BinaryOp::Neq),
            Sless => self.binary_pri_alt(nodes, state, BinaryOp::Sless),
            Sleq => self.binary_pri_alt(nodes, state, BinaryOp::Sleq),
            Sgrtr => self.binary_pri_alt(nodes, state, BinaryOp::Sgrtr),
            Sgeq => self.binary_pri_alt(nodes, state, BinaryOp::Sgeq),
            EqCPri => {
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.pri = Some(self.binary(nodes, state.pri, Some(rhs), BinaryOp::Eq));
            }
            EqCAlt => {
                let rhs = self.const_node(nodes, ops[0].as_i32());
                state.alt = Some(self.binary(nodes, state.alt, Some(rhs), BinaryOp::Eq));
            }

            Floatadd => self.binary_pri_alt(nodes, state, BinaryOp::FloatAdd),
            Floatsub => self.binary_pri_alt(nodes, state, BinaryOp::FloatSub),
            Floatmul => self.binary_pri_alt(nodes, state, BinaryOp::FloatMul),
            Floatdiv => self.binary_pri_alt(nodes, state, BinaryOp::FloatDiv),
            Floatcmp => self.binary_pri_alt(nodes, state, BinaryOp::FloatCmp),
            FloatGt => self.binary_pri_alt(nodes, state, BinaryOp::FloatGt),
            FloatGe => self.binary_pri_alt(nodes, state, BinaryOp::FloatGe),
            FloatLe => self.binary_pri_alt(nodes, state, BinaryOp::FloatLe),
            FloatLt => self.binary_pri_alt(nodes, state, BinaryOp::FloatLt),
            FloatEq => self.binary_pri_alt(nodes, state, BinaryOp::FloatEq),
            FloatNe => self.binary_pri_alt(nodes, state, BinaryOp::FloatNe),

            Jump | Jzer | Jnz | Jeq | Jneq | Jsless | Jsleq | Jsgrtr | Jsgeq => {
                self.lift_jump(instr.opcode, ops, state, nodes, block_idx, block);
            }
            Switch => {
                let casetbl_pc = ops[0];
                self.lift_switch(casetbl_pc, state, nodes, block);
            }
            Casetbl => {}

            Retn => {
                let value = state.pri;
                self.push_node(nodes, ILNode::Return { value });
            }
            Halt => {
                self.push_node(nodes, ILNode::Return { value: state.pri });
            }

            Call => {
                let function_index = ops[0].as_i32() as u32;
                self.lift_call(Callable::Function(function_index), state, nodes);
            }
            SysreqC => {
                // Self-contained: reads its argument count directly off the
                // current stack depth rather than falling through to the
                // `sysreq.n`-style encoded-nargs path.
                let native_index = ops[0].as_i32() as u32;
                self.lift_call(Callable::Native(native_index), state, nodes);
            }
            SysreqN => {
                let native_index = ops[0].as_i32() as u32;
                self.lift_call(Callable::Native(native_index), state, nodes);
            }
        }
    }

    fn unary(&mut self, nodes: &mut Vec<NodeId>, operand: Option<NodeId>, op: UnaryOp) -> NodeId {
        let operand = operand.unwrap_or_else(|| self.const_node(nodes, 0));
        self.push_node(nodes, ILNode::Unary { op, operand })
    }

    fn binary(
        &mut self,
        nodes: &mut Vec<NodeId>,
        lhs: Option<NodeId>,
        rhs: Option<NodeId>,
        op: BinaryOp,
    ) -> NodeId {
        let lhs = lhs.unwrap_or_else(|| self.const_node(nodes, 0));
        let rhs = rhs.unwrap_or_else(|| self.const_node(nodes, 0));
        self.push_node(nodes, ILNode::Binary { op, lhs, rhs })
    }

    fn binary_pri_alt(&mut self, nodes: &mut Vec<NodeId>, state: &mut AbstractState, op: BinaryOp) {
        state.pri = Some(self.binary(nodes, state.pri, state.alt, op));
    }

    fn inc_dec_place(&mut self, nodes: &mut Vec<NodeId>, place: NodeId, op: UnaryOp) {
        let loaded = self.push_node(nodes, ILNode::Load { place });
        let result = self.push_node(nodes, ILNode::Unary { op, operand: loaded });
        self.push_node(nodes, ILNode::Store { place, value: result });
    }

    /// Canonicalizes an arbitrary expression into a place node, for use as
    /// an array base, a byte/word load-indirect target, or an inc/dec
    /// target. Mirrors `GetVar` in `original_source/SmxDecompiler/lifter.cpp`:
    /// a bare constant becomes a global address, `a + b` becomes an array
    /// element, a `Load` unwraps to the place it loaded from, and anything
    /// else is assumed to already be a place.
    fn get_var(&mut self, node: NodeId) -> NodeId {
        match self.arena.get(node).clone() {
            ILNode::Const(c) => {
                let global = self.arena.push(ILNode::GlobalVar { address: c });
                self.arena.replace_uses_with(node, global);
                global
            }
            ILNode::Binary { op: BinaryOp::Add, lhs, rhs } => {
                let elem = self.arena.push(ILNode::ArrayElementVar { base: lhs, index: rhs });
                self.arena.replace_uses_with(node, elem);
                elem
            }
            ILNode::Load { place } => place,
            _ => node,
        }
    }

    fn alloc_temp(&mut self) -> NodeId {
        let slot = self.temp_counter;
        self.temp_counter += 1;
        self.arena.push(ILNode::TempVar { slot })
    }

    /// Wraps a register holding a bare `Phi` in a fresh temp, so the value
    /// reads through a `Load`/`Store` pair instead of the phi node leaking
    /// into the node list as something a statement could print directly.
    fn wrap_phi(&mut self, reg: &mut Option<NodeId>, nodes: &mut Vec<NodeId>) {
        let Some(id) = *reg else { return };
        if !matches!(self.arena.get(id), ILNode::Phi { .. }) {
            return;
        }
        let temp = self.alloc_temp();
        self.push_node(nodes, ILNode::Store { place: temp, value: id });
        *reg = Some(self.push_node(nodes, ILNode::Load { place: temp }));
    }

    fn lift_push_n(
        &mut self,
        opcode: Opcode,
        ops: &SmallVec<[crate::cell::Cell; 5]>,
        state: &mut AbstractState,
        nodes: &mut Vec<NodeId>,
    ) {
        use Opcode::*;
        let is_const = matches!(opcode, Push2C | Push3C | Push4C | Push5C);
        let is_addr = matches!(opcode, Push2Adr | Push3Adr | Push4Adr | Push5Adr);
        let is_stack_indirect = matches!(opcode, Push2S | Push3S | Push4S | Push5S);

        for &offset in ops.iter() {
            let value = if is_const {
                self.const_node(nodes, offset.as_i32())
            } else if is_addr {
                self.local(offset.as_i32())
            } else if is_stack_indirect {
                let place = self.local(offset.as_i32());
                self.push_node(nodes, ILNode::Load { place })
            } else {
                let place = self.local(offset.as_i32());
                self.push_node(nodes, ILNode::Load { place })
            };
            state.stack.push(value);
        }
    }

    fn lift_jump(
        &mut self,
        opcode: Opcode,
        ops: &SmallVec<[crate::cell::Cell; 5]>,
        state: &mut AbstractState,
        nodes: &mut Vec<NodeId>,
        block_idx: u32,
        block: &BasicBlock,
    ) {
        use Opcode::*;

        let successors = &block.successors;
        if opcode == Jump {
            let target = successors.first().copied().unwrap_or(block_idx);
            self.push_node(nodes, ILNode::Jump { target: ILBlockId(target) });
            return;
        }

        // Conditional families push [true_target, fallthrough] as
        // successors in `cfg::build`.
        let true_target = successors.first().copied().unwrap_or(block_idx);
        let false_target = successors.get(1).copied().unwrap_or(block_idx);
        let _ = ops;

        let (op, lhs, rhs) = match opcode {
            Jzer => (BinaryOp::Eq, state.pri, Some(self.const_node(nodes, 0))),
            Jnz => (BinaryOp::Neq, state.pri, Some(self.const_node(nodes, 0))),
            Jeq => (BinaryOp::Eq, state.pri, state.alt),
            Jneq => (BinaryOp::Neq, state.pri, state.alt),
            Jsless => (BinaryOp::Sless, state.pri, state.alt),
            Jsleq => (BinaryOp::Sleq, state.pri, state.alt),
            Jsgrtr => (BinaryOp::Sgrtr, state.pri, state.alt),
            Jsgeq => (BinaryOp::Sgeq, state.pri, state.alt),
            _ => unreachable!(),
        };
        let lhs = lhs.unwrap_or_else(|| self.const_node(nodes, 0));
        let rhs = rhs.unwrap_or_else(|| self.const_node(nodes, 0));

        self.push_node(
            nodes,
            ILNode::JumpCond {
                op,
                lhs,
                rhs,
                true_target: ILBlockId(true_target),
                false_target: ILBlockId(false_target),
            },
        );
    }

    fn lift_switch(
        &mut self,
        casetbl_pc: crate::cell::Cell,
        state: &mut AbstractState,
        nodes: &mut Vec<NodeId>,
        block: &BasicBlock,
    ) {
        let index = state.pri.unwrap_or_else(|| self.const_node(nodes, 0));
        let default = ILBlockId(block.successors.first().copied().unwrap_or(0));

        // Re-read the case table directly: `ncases` at pc+1, default target
        // at pc+2 (already captured as `default` above), then `ncases`
        // (value, target) pairs.
        let base = casetbl_pc.as_usize();
        let ncases = self.code.get(base + 1).map(|c| c.as_i32()).unwrap_or(0).max(0) as usize;
        let mut cases: SmallVec<[CaseTableEntry; 8]> = SmallVec::new();
        for i in 0..ncases {
            let value = self.code.get(base + 3 + i * 2).copied().unwrap_or_default();
            let target_addr = self.code.get(base + 4 + i * 2).copied().unwrap_or_default();
            let target_block = block
                .successors
                .iter()
                .skip(1)
                .nth(i)
                .copied()
                .unwrap_or_else(|| {
                    self.diagnostics.warn_unsupported_pattern(
                        "lifter::lift_switch",
                        format!("case target {target_addr:?} did not resolve to a cfg successor"),
                    );
                    block.successors.first().copied().unwrap_or(0)
                });
            cases.push(CaseTableEntry {
                value,
                target: ILBlockId(target_block),
            });
        }

        self.push_node(nodes, ILNode::Switch { index, cases, default });
    }

    fn lift_call(&mut self, callee: Callable, state: &mut AbstractState, nodes: &mut Vec<NodeId>) {
        let nargs = match callee {
            Callable::Function(idx) => self
                .image
                .find_function_by_id(idx as usize)
                .map(|f| f.signature.args.len())
                .unwrap_or(state.stack.len()),
            Callable::Native(idx) => self
                .image
                .find_native_by_index(idx as usize)
                .map(|n| n.signature.args.len())
                .unwrap_or(state.stack.len()),
        };
        let nargs = nargs.min(state.stack.len());
        let mut args: SmallVec<[NodeId; 4]> =
            state.stack.split_off(state.stack.len() - nargs).into_iter().collect();
        args.reverse();

        let call = self.arena.push(ILNode::Call { callee, args });
        let temp = self.alloc_temp();
        self.push_node(nodes, ILNode::Store { place: temp, value: call });
        state.pri = Some(self.push_node(nodes, ILNode::Load { place: temp }));
    }

    /// Drops the `Call`/`TempVar` indirection the lifter wraps every call
    /// result in when that result has at most one use: a dead result is
    /// reduced to a bare `Call` statement, a single `Load` use is replaced
    /// directly with the `Call` node so the structurizer only ever sees one
    /// statement for it. Calls whose result is read more than once keep the
    /// temp so later passes can still see a single definition site.
    fn clean_calls(&mut self, cfg: &mut ILCfg) {
        for block in &mut cfg.blocks {
            let mut actions: HashMap<NodeId, CallAction> = HashMap::new();
            let mut drop_loads: Vec<NodeId> = Vec::new();

            for &id in &block.nodes {
                let (place, value) = match self.arena.get(id) {
                    ILNode::Store { place, value } => (*place, *value),
                    _ => continue,
                };
                if !matches!(self.arena.get(place), ILNode::TempVar { .. }) {
                    continue;
                }
                if !matches!(self.arena.get(value), ILNode::Call { .. }) {
                    continue;
                }
                let Some(load_id) = self
                    .arena
                    .uses(place)
                    .iter()
                    .copied()
                    .find(|&u| matches!(self.arena.get(u), ILNode::Load { .. }))
                else {
                    continue;
                };

                match self.arena.uses(load_id).len() {
                    0 => {
                        actions.insert(id, CallAction::Bare(value));
                        drop_loads.push(load_id);
                    }
                    1 => {
                        self.arena.replace_uses_with(load_id, value);
                        actions.insert(id, CallAction::Drop);
                        drop_loads.push(load_id);
                    }
                    _ => {}
                }
            }

            if actions.is_empty() {
                continue;
            }

            block.nodes = block
                .nodes
                .iter()
                .copied()
                .filter(|id| !drop_loads.contains(id))
                .filter_map(|id| match actions.get(&id) {
                    Some(CallAction::Bare(call)) => Some(*call),
                    Some(CallAction::Drop) => None,
                    None => Some(id),
                })
                .collect();
        }
    }

    /// Drops any top-level place-producing node (a `Store`'s place operand
    /// aside, this only ever matches the `TempVar`s `wrap_phi`/`lift_call`
    /// allocate) that nothing reads, mirroring `PruneVarsInBlock`.
    fn prune_dead_vars(&mut self, cfg: &mut ILCfg) {
        for block in &mut cfg.blocks {
            block.nodes.retain(|&id| {
                if self.arena.get(id).is_place() {
                    !self.arena.uses(id).is_empty()
                } else {
                    true
                }
            });
        }
    }

    /// Replaces every `Store(temp, Phi(inputs))` a block carries (left there
    /// by `wrap_phi`) with one `Store(temp, input)` per forward predecessor,
    /// pushed onto that predecessor's own node list. `Phi` itself is never
    /// printed; after this runs none survive reachable from a block's nodes.
    fn lower_phis(&mut self, cfg: &mut ILCfg) {
        for idx in 0..cfg.block_count() {
            let block_id = ILBlockId(idx as u32);
            let forward_preds: Vec<ILBlockId> = cfg
                .block(block_id)
                .predecessors
                .iter()
                .copied()
                .filter(|p| p.0 < block_id.0)
                .collect();

            let phi_stores: Vec<(NodeId, NodeId, SmallVec<[NodeId; 4]>)> = cfg
                .block(block_id)
                .nodes
                .iter()
                .copied()
                .filter_map(|id| match self.arena.get(id) {
                    ILNode::Store { place, value } if matches!(self.arena.get(*place), ILNode::TempVar { .. }) => {
                        match self.arena.get(*value) {
                            ILNode::Phi { inputs } => Some((id, *place, inputs.clone())),
                            _ => None,
                        }
                    }
                    _ => None,
                })
                .collect();

            for (store_id, place, inputs) in phi_stores {
                if inputs.len() != forward_preds.len() {
                    self.diagnostics.warn_unsupported_pattern(
                        "lifter::lower_phis",
                        format!("block {idx} phi has {} inputs but {} forward predecessors", inputs.len(), forward_preds.len()),
                    );
                    continue;
                }
                cfg.block_mut(block_id).nodes.retain(|&n| n != store_id);
                for (&pred, &input) in forward_preds.iter().zip(inputs.iter()) {
                    let new_store = self.arena.push(ILNode::Store { place, value: input });
                    cfg.block_mut(pred).nodes.push(new_store);
                }
            }
        }
    }

    /// Fuses a chain of two `JumpCond`s sharing a target into one compound
    /// condition, recovering `&&`/`||` lost to short-circuit lowering.
    /// Mirrors `CompoundXandY`/`CompoundXorY`/`CompoundConditions` in
    /// `original_source/SmxDecompiler/lifter.cpp`, run to a fixpoint since
    /// fusing one pair can expose another chained immediately above it.
    fn synthesize_compound_conditions(&mut self, cfg: &mut ILCfg) {
        loop {
            let mut fused = false;
            for idx in 0..cfg.block_count() {
                let x = ILBlockId(idx as u32);
                if cfg.block(x).successors.len() != 2 {
                    continue;
                }
                let x_true = cfg.block(x).successors[0];
                let x_false = cfg.block(x).successors[1];

                // X || Y: X's true edge reaches the shared target directly;
                // its false edge falls into Y, which reaches the same
                // target on its own true edge. Either X or Y being true
                // gets there, so this is the `||` shape.
                if cfg.block(x_false).predecessors.len() == 1 && cfg.block(x_false).successors.len() == 2 {
                    let y = x_false;
                    let y_true = cfg.block(y).successors[0];
                    let y_false = cfg.block(y).successors[1];
                    if y_true == x_true
                        && self.fuse_condition(cfg, x, y, BinaryOp::Or, x_true, y_false)
                    {
                        fused = true;
                        continue;
                    }
                }

                // X && Y: X's true edge falls into Y instead of reaching the
                // target directly; only when both X and Y are true does Y's
                // true edge reach it. X's false edge and Y's false edge
                // share the same far target, so this is the `&&` shape.
                if cfg.block(x_true).predecessors.len() == 1 && cfg.block(x_true).successors.len() == 2 {
                    let y = x_true;
                    let y_true = cfg.block(y).successors[0];
                    let y_false = cfg.block(y).successors[1];
                    if y_false == x_false
                        && self.fuse_condition(cfg, x, y, BinaryOp::And, y_true, x_false)
                    {
                        fused = true;
                    }
                }
            }
            if !fused {
                break;
            }
        }
    }

    fn fuse_condition(
        &mut self,
        cfg: &mut ILCfg,
        x: ILBlockId,
        y: ILBlockId,
        op: BinaryOp,
        new_true: ILBlockId,
        new_false: ILBlockId,
    ) -> bool {
        let Some(&x_last) = cfg.block(x).nodes.last() else { return false };
        let Some(&y_last) = cfg.block(y).nodes.last() else { return false };
        if !matches!(self.arena.get(x_last), ILNode::JumpCond { .. }) {
            return false;
        }
        if !matches!(self.arena.get(y_last), ILNode::JumpCond { .. }) {
            return false;
        }

        let combined = self.arena.push(ILNode::Binary { op, lhs: x_last, rhs: y_last });
        let zero = self.arena.push(ILNode::Const(crate::cell::Cell(0)));
        let new_cond = self.arena.push(ILNode::JumpCond {
            op: BinaryOp::Neq,
            lhs: combined,
            rhs: zero,
            true_target: new_true,
            false_target: new_false,
        });

        if let Some(last) = cfg.block_mut(x).nodes.last_mut() {
            *last = new_cond;
        }

        let x_out: SmallVec<[ILBlockId; 2]> = cfg.block(x).successors.clone();
        for s in x_out {
            cfg.remove_edge(x, s);
        }
        let y_out: SmallVec<[ILBlockId; 2]> = cfg.block(y).successors.clone();
        for s in y_out {
            cfg.remove_edge(y, s);
        }
        cfg.add_edge(x, new_true);
        cfg.add_edge(x, new_false);

        cfg.block_mut(y).nodes.clear();

        true
    }
}

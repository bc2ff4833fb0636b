//! Pcode-level control-flow graph construction: leader marking, basic-block
//! partitioning, and reverse-post-order numbering over raw SMX bytecode.
//!
//! Grounded in `original_source/SmxDecompiler/cfg-builder.cpp`'s leader-marking
//! algorithm and in `cranelift/codegen/src/flowgraph.rs`'s predecessor/
//! successor bookkeeping (`BlockPredecessor`-style pairs rather than raw
//! `BlockId` lists, so a block can tell which instruction sent control to it).

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::CfgError;
use crate::pcode::Opcode;
use crate::smx::SmxFunction;

pub type BlockId = u32;

/// One instruction decoded from the code stream: its address, opcode, and
/// raw operand cells (interpretation per `Opcode::info().operands`).
#[derive(Debug, Clone)]
pub struct Instruction {
    pub pc: Cell,
    pub opcode: Opcode,
    pub operands: SmallVec<[Cell; 5]>,
}

impl Instruction {
    pub fn len_in_cells(&self) -> usize {
        1 + self.operands.len()
    }
}

/// A predecessor edge: which block branched here, recorded the way
/// `cranelift`'s `BlockPredecessor` pairs an edge with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPredecessor {
    pub block: BlockId,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub start: Cell,
    pub end: Cell,
    pub instructions: Vec<Instruction>,
    pub successors: SmallVec<[BlockId; 2]>,
    pub predecessors: SmallVec<[BlockPredecessor; 4]>,
    pub rpo_number: u32,
}

impl BasicBlock {
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }
}

/// A pcode-level control-flow graph for a single function, in reverse
/// post-order (`blocks[0]` is always the entry block).
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    /// Declared argument count for the lifted function, recovered the way
    /// the original infers it: the highest `push.c`-style formal offset seen
    /// before the first `call`-free `stack`/`break` marking the prologue end.
    pub nargs: u32,
}

impl ControlFlowGraph {
    pub fn entry(&self) -> BlockId {
        0
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id as usize]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Decodes one instruction at `pc`, per `Opcode::info`'s operand-kind table.
fn decode_instruction(code: &[Cell], pc: Cell) -> Result<Instruction, CfgError> {
    let idx = pc.as_usize();
    let raw = code
        .get(idx)
        .ok_or(CfgError::TruncatedOperand { pc })?
        .as_i32();
    let opcode = Opcode::decode(raw).ok_or(CfgError::DecodeError { pc, opcode: raw })?;

    // `casetbl` carries a variable-length case table rather than a fixed
    // operand count: ncases, a default target, then ncases (value, target)
    // pairs. Treating its data as further instructions would misdecode it.
    if opcode == Opcode::Casetbl {
        let ncases = code
            .get(idx + 1)
            .ok_or(CfgError::TruncatedOperand { pc })?
            .as_i32() as usize;
        let total = 2 + ncases * 2;
        if idx + 1 + total > code.len() {
            return Err(CfgError::TruncatedOperand { pc });
        }
        let operands: SmallVec<[Cell; 5]> =
            code[idx + 1..idx + 1 + total].iter().copied().collect();
        return Ok(Instruction {
            pc,
            opcode,
            operands,
        });
    }

    let n = opcode.num_operands();
    if idx + 1 + n > code.len() {
        return Err(CfgError::TruncatedOperand { pc });
    }
    let operands: SmallVec<[Cell; 5]> = code[idx + 1..idx + 1 + n].iter().copied().collect();
    Ok(Instruction {
        pc,
        opcode,
        operands,
    })
}

/// Marks the set of leader addresses (instructions that begin a basic
/// block): the function entry, every jump/switch target, and every
/// instruction immediately following a terminator, per
/// `CfgBuilder::MarkLeaders`.
fn mark_leaders(code: &[Cell], start: Cell, end: Cell) -> Result<Vec<Cell>, CfgError> {
    let mut leaders = std::collections::BTreeSet::new();
    leaders.insert(start);

    let mut pc = start;
    while pc < end {
        let instr = decode_instruction(code, pc)?;
        let next_pc = Cell((pc.as_i32()) + instr.len_in_cells() as i32);

        match instr.opcode {
            Opcode::Jump => {
                leaders.insert(instr.operands[0]);
                if next_pc < end {
                    leaders.insert(next_pc);
                }
            }
            op if op.is_conditional_jump() => {
                leaders.insert(instr.operands[0]);
                if next_pc < end {
                    leaders.insert(next_pc);
                }
            }
            Opcode::Switch => {
                // The switch's single operand points at a `casetbl`
                // instruction; its operand cells are `ncases` followed by
                // ncases+1 (value, target) pairs, default target last.
                let casetbl_pc = instr.operands[0];
                let ncases = code
                    .get(casetbl_pc.as_usize() + 1)
                    .ok_or(CfgError::TruncatedOperand { pc: casetbl_pc })?
                    .as_i32() as usize;
                let default_target = code
                    .get(casetbl_pc.as_usize() + 2)
                    .ok_or(CfgError::TruncatedOperand { pc: casetbl_pc })?;
                leaders.insert(*default_target);
                for i in 0..ncases {
                    let target = code
                        .get(casetbl_pc.as_usize() + 3 + i * 2 + 1)
                        .ok_or(CfgError::TruncatedOperand { pc: casetbl_pc })?;
                    leaders.insert(*target);
                }
                if next_pc < end {
                    leaders.insert(next_pc);
                }
            }
            Opcode::Retn | Opcode::Halt => {
                if next_pc < end {
                    leaders.insert(next_pc);
                }
            }
            _ => {}
        }

        pc = next_pc;
    }

    Ok(leaders.into_iter().collect())
}

/// Builds the pcode CFG for one function, validating that its entry
/// instruction is `PROC` and that every recorded leader aligns with a real
/// instruction boundary.
pub fn build(func: &SmxFunction, code: &[Cell]) -> Result<ControlFlowGraph, CfgError> {
    let start = func.pcode_start;
    let end = if func.pcode_end > start {
        func.pcode_end
    } else {
        Cell(code.len() as i32)
    };

    let entry_raw = code
        .get(start.as_usize())
        .ok_or(CfgError::TruncatedOperand { pc: start })?
        .as_i32();
    if Opcode::decode(entry_raw) != Some(Opcode::Proc) {
        return Err(CfgError::MissingProcEntry { pc: start });
    }

    let leaders = mark_leaders(code, start, end)?;

    let mut blocks: Vec<BasicBlock> = Vec::with_capacity(leaders.len());
    for (i, &leader) in leaders.iter().enumerate() {
        let block_end = leaders.get(i + 1).copied().unwrap_or(end);
        let mut instructions = Vec::new();
        let mut pc = leader;
        while pc < block_end {
            let instr = decode_instruction(code, pc)?;
            let step = instr.len_in_cells() as i32;
            instructions.push(instr);
            pc = Cell(pc.as_i32() + step);
        }
        blocks.push(BasicBlock {
            start: leader,
            end: block_end,
            instructions,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
            rpo_number: 0,
        });
    }

    let addr_to_block = |addr: Cell| -> Result<BlockId, CfgError> {
        leaders
            .binary_search(&addr)
            .map(|i| i as BlockId)
            .map_err(|_| CfgError::InvalidCfg { target: addr })
    };

    for i in 0..blocks.len() {
        let last = match blocks[i].last_instruction() {
            Some(instr) => instr.clone(),
            None => continue,
        };
        let fallthrough = (i + 1 < blocks.len()).then_some(i as BlockId + 1);

        let mut succs: SmallVec<[BlockId; 2]> = SmallVec::new();
        match last.opcode {
            Opcode::Jump => {
                succs.push(addr_to_block(last.operands[0])?);
            }
            op if op.is_conditional_jump() => {
                succs.push(addr_to_block(last.operands[0])?);
                if let Some(ft) = fallthrough {
                    succs.push(ft);
                }
            }
            Opcode::Switch => {
                let casetbl_pc = last.operands[0];
                let ncases = code[casetbl_pc.as_usize() + 1].as_i32() as usize;
                let default_target = code[casetbl_pc.as_usize() + 2];
                succs.push(addr_to_block(default_target)?);
                for c in 0..ncases {
                    let target = code[casetbl_pc.as_usize() + 3 + c * 2 + 1];
                    succs.push(addr_to_block(target)?);
                }
            }
            Opcode::Retn | Opcode::Halt => {}
            _ => {
                if let Some(ft) = fallthrough {
                    succs.push(ft);
                }
            }
        }
        blocks[i].successors = succs;
    }

    for i in 0..blocks.len() {
        let succs = blocks[i].successors.clone();
        for s in succs {
            blocks[s as usize]
                .predecessors
                .push(BlockPredecessor { block: i as BlockId });
        }
    }

    let rpo = reverse_post_order(&blocks, 0);
    let mut renumbered = vec![BasicBlock::default(); blocks.len()];
    let mut old_to_new = vec![0u32; blocks.len()];
    for (new_idx, &old_idx) in rpo.iter().enumerate() {
        old_to_new[old_idx as usize] = new_idx as u32;
    }
    for (old_idx, block) in blocks.into_iter().enumerate() {
        let new_idx = old_to_new[old_idx];
        let mut block = block;
        block.rpo_number = new_idx;
        for s in block.successors.iter_mut() {
            *s = old_to_new[*s as usize];
        }
        for p in block.predecessors.iter_mut() {
            p.block = old_to_new[p.block as usize];
        }
        renumbered[new_idx as usize] = block;
    }

    let nargs = recover_nargs(func, code, start, end)?;

    Ok(ControlFlowGraph {
        blocks: renumbered,
        nargs,
    })
}

fn reverse_post_order(blocks: &[BasicBlock], entry: BlockId) -> Vec<BlockId> {
    let mut visited = vec![false; blocks.len()];
    let mut postorder = Vec::with_capacity(blocks.len());
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited[entry as usize] = true;

    while let Some((node, next_succ)) = stack.pop() {
        let succs = &blocks[node as usize].successors;
        if next_succ < succs.len() {
            let succ = succs[next_succ];
            stack.push((node, next_succ + 1));
            if !visited[succ as usize] {
                visited[succ as usize] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(node);
        }
    }

    postorder.reverse();
    postorder
}

/// Recovers the function's formal argument count from its prologue, per
/// `spec.md` §4.1's nargs formula: the first stack-relative load/store whose
/// offset lands above the frame base tells us how many word-sized arguments
/// were pushed by the caller before `PROC`.
fn recover_nargs(
    _func: &SmxFunction,
    code: &[Cell],
    start: Cell,
    end: Cell,
) -> Result<u32, CfgError> {
    let mut max_arg_offset = 0i32;
    let mut pc = start;
    while pc < end {
        let instr = decode_instruction(code, pc)?;
        if matches!(
            instr.opcode,
            Opcode::LoadSPri | Opcode::LoadSAlt | Opcode::StorSPri | Opcode::StorSAlt
        ) {
            let offset = instr.operands[0].as_i32();
            // Argument offsets are positive and counted from the frame's
            // return-address/previous-frame slots (2 cells), in word steps.
            if offset > 8 {
                max_arg_offset = max_arg_offset.max(offset);
            }
        }
        pc = Cell(pc.as_i32() + instr.len_in_cells() as i32);
    }
    Ok(((max_arg_offset - 8) / 4).max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smx::SmxFunctionSignature;

    fn asm(cells: &[(Opcode, &[i32])]) -> Vec<Cell> {
        let mut out = Vec::new();
        for (op, operands) in cells {
            let raw = raw_for(*op);
            out.push(Cell(raw));
            for &o in *operands {
                out.push(Cell(o));
            }
        }
        out
    }

    fn raw_for(op: Opcode) -> i32 {
        (1..=200)
            .find(|&raw| Opcode::decode(raw) == Some(op))
            .expect("opcode must have a raw encoding")
    }

    fn function(start: i32, end: i32) -> SmxFunction {
        SmxFunction {
            raw_name: "f".into(),
            name: "f".into(),
            pcode_start: Cell(start),
            pcode_end: Cell(end),
            is_public: true,
            signature: SmxFunctionSignature::default(),
            locals: Vec::new(),
        }
    }

    #[test]
    fn straight_line_function_has_one_block() {
        let code = asm(&[
            (Opcode::Proc, &[]),
            (Opcode::ZeroPri, &[]),
            (Opcode::Retn, &[]),
        ]);
        let f = function(0, code.len() as i32);
        let cfg = build(&f, &code).unwrap();
        assert_eq!(cfg.blocks.len(), 1);
        assert!(cfg.blocks[0].successors.is_empty());
    }

    #[test]
    fn if_then_else_has_three_or_more_blocks() {
        // proc; jzer L1; <then>; jump L2; L1: <else>; L2: retn
        let mut code = asm(&[(Opcode::Proc, &[])]);
        let jzer_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::Jzer, &[0])])); // patched below
        let then_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::ZeroPri, &[])]));
        let jump_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::Jump, &[0])])); // patched below
        let else_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::ZeroAlt, &[])]));
        let join_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::Retn, &[])]));

        code[jzer_pc as usize + 1] = Cell(else_pc);
        code[jump_pc as usize + 1] = Cell(join_pc);
        let _ = then_pc;

        let f = function(0, code.len() as i32);
        let cfg = build(&f, &code).unwrap();
        assert!(cfg.blocks.len() >= 3);
    }

    #[test]
    fn missing_proc_entry_is_an_error() {
        let code = asm(&[(Opcode::Retn, &[])]);
        let f = function(0, code.len() as i32);
        let err = build(&f, &code).unwrap_err();
        assert!(matches!(err, CfgError::MissingProcEntry { .. }));
    }

    #[test]
    fn unknown_opcode_is_a_decode_error() {
        let mut code = asm(&[(Opcode::Proc, &[])]);
        code.push(Cell(9_999_999));
        let f = function(0, code.len() as i32);
        let err = build(&f, &code).unwrap_err();
        assert!(matches!(err, CfgError::DecodeError { .. }));
    }

    #[test]
    fn rpo_orders_entry_first() {
        let code = asm(&[
            (Opcode::Proc, &[]),
            (Opcode::Retn, &[]),
        ]);
        let f = function(0, code.len() as i32);
        let cfg = build(&f, &code).unwrap();
        assert_eq!(cfg.blocks[0].rpo_number, 0);
    }
}

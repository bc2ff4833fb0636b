//! Recovers structured control flow (`if`/`while`/`do-while`/endless loops,
//! `switch`, `break`/`continue`) from an `ILCfg`, falling back to `goto` for
//! whatever a single pass of interval-based loop detection and
//! post-dominance-based if-follow computation can't reduce.
//!
//! Loop headers are found from the first level of `derive_intervals`'s
//! output: an interval whose header has a back edge from one of its own
//! members is a loop. This only recognizes loops whose latch collapses into
//! the header's interval on the first pass, which covers every reducible
//! single loop and every innermost loop of a nest; an outer loop in a nest
//! is found on the header's own pass once the inner loop has already folded
//! to one node, which the derived-graph sequence handles for free.

use std::collections::{HashMap, HashSet};

use crate::il::cfg::{derive_intervals, ILBlockId, ILCfg};
use crate::il::node::{ILNode, NodeArena};
use crate::statement::{LabelAllocator, LabelId, Statement};

/// Builds the statement tree for one function's already-lifted, already-
/// typed, already-fixed IL.
pub fn structurize(arena: &NodeArena, cfg: &ILCfg) -> Vec<Statement> {
    let (loop_headers, loop_members) = detect_loops(cfg);
    let mut structurizer = Structurizer {
        arena,
        cfg,
        loop_headers,
        loop_members,
        loop_stack: Vec::new(),
        visited: HashSet::new(),
        labels: LabelAllocator::new(),
        goto_labels: HashMap::new(),
    };
    structurizer.structure_region(cfg.entry, None)
}

fn detect_loops(cfg: &ILCfg) -> (HashSet<ILBlockId>, HashMap<ILBlockId, HashSet<ILBlockId>>) {
    let sequence = derive_intervals(cfg);
    let mut headers = HashSet::new();
    let mut members_map = HashMap::new();
    if let Some(first) = sequence.first() {
        for interval in first {
            let has_back_edge = interval
                .members
                .iter()
                .any(|&m| m != interval.header && cfg.block(m).successors.contains(&interval.header));
            if has_back_edge {
                headers.insert(interval.header);
                members_map.insert(interval.header, interval.members.iter().copied().collect());
            }
        }
    }
    (headers, members_map)
}

struct Structurizer<'a> {
    arena: &'a NodeArena,
    cfg: &'a ILCfg,
    loop_headers: HashSet<ILBlockId>,
    loop_members: HashMap<ILBlockId, HashSet<ILBlockId>>,
    /// (header, exit-target) of every loop currently being structured,
    /// innermost last; used to turn a plain jump to either into
    /// `Continue`/`Break` instead of recursing into it again.
    loop_stack: Vec<(ILBlockId, Option<ILBlockId>)>,
    visited: HashSet<ILBlockId>,
    labels: LabelAllocator,
    goto_labels: HashMap<ILBlockId, LabelId>,
}

impl<'a> Structurizer<'a> {
    fn label_for(&mut self, block: ILBlockId) -> LabelId {
        if let Some(&id) = self.goto_labels.get(&block) {
            return id;
        }
        let id = self.labels.alloc();
        self.goto_labels.insert(block, id);
        id
    }

    /// Walks forward from `start`, emitting statements until it reaches
    /// `stop` (exclusive), a block with no successors, or a block it's
    /// already emitted (turned into a `Goto` rather than re-emitted or
    /// looped on forever).
    fn structure_region(&mut self, start: ILBlockId, stop: Option<ILBlockId>) -> Vec<Statement> {
        let mut out = Vec::new();
        let mut cur = Some(start);

        while let Some(block_id) = cur {
            if Some(block_id) == stop {
                break;
            }
            if !self.visited.insert(block_id) {
                let label = self.label_for(block_id);
                out.push(Statement::Goto(label));
                break;
            }
            if self.loop_headers.contains(&block_id) {
                let (stmt, after) = self.structure_loop(block_id);
                out.push(stmt);
                cur = after;
                continue;
            }

            let nodes = self.cfg.block(block_id).nodes.clone();
            for &id in &nodes {
                if matches!(self.arena.get(id), ILNode::Store { .. } | ILNode::Call { .. }) {
                    out.push(Statement::Expr(id));
                }
            }

            let terminator = nodes.last().map(|&id| (id, self.arena.get(id).clone()));
            cur = match terminator {
                Some((_, ILNode::Return { value })) => {
                    out.push(Statement::Return(value));
                    None
                }
                Some((_, ILNode::Jump { target })) => self.resolve_jump(target, &mut out),
                Some((cond_id, ILNode::JumpCond { true_target, false_target, .. })) => {
                    let follow = self.cfg.post_dominators().idom(block_id);
                    let then_branch = self.structure_branch(true_target, follow);
                    let else_branch = if Some(false_target) == follow {
                        Vec::new()
                    } else {
                        self.structure_branch(false_target, follow)
                    };
                    out.push(Statement::If {
                        condition: cond_id,
                        then_branch,
                        else_branch,
                    });
                    follow
                }
                Some((_, ILNode::Switch { index, cases, default })) => {
                    let follow = self.cfg.post_dominators().idom(block_id);
                    let mut by_target: Vec<(ILBlockId, Vec<i32>)> = Vec::new();
                    for entry in cases.iter() {
                        if let Some(slot) = by_target.iter_mut().find(|(t, _)| *t == entry.target) {
                            slot.1.push(entry.value.as_i32());
                        } else {
                            by_target.push((entry.target, vec![entry.value.as_i32()]));
                        }
                    }
                    let case_stmts = by_target
                        .into_iter()
                        .map(|(target, values)| (values, self.structure_branch(target, follow)))
                        .collect();
                    let default_stmts = if Some(default) == follow {
                        Vec::new()
                    } else {
                        self.structure_branch(default, follow)
                    };
                    out.push(Statement::Switch {
                        index,
                        cases: case_stmts,
                        default: default_stmts,
                    });
                    follow
                }
                _ => None,
            };
        }

        out
    }

    fn resolve_jump(&mut self, target: ILBlockId, out: &mut Vec<Statement>) -> Option<ILBlockId> {
        if let Some(&(header, exit)) = self.loop_stack.last() {
            if target == header {
                out.push(Statement::Continue);
                return None;
            }
            if exit == Some(target) {
                out.push(Statement::Break);
                return None;
            }
        }
        Some(target)
    }

    fn structure_branch(&mut self, target: ILBlockId, follow: Option<ILBlockId>) -> Vec<Statement> {
        if let Some(&(header, exit)) = self.loop_stack.last() {
            if target == header {
                return vec![Statement::Continue];
            }
            if exit == Some(target) && follow != Some(target) {
                return vec![Statement::Break];
            }
        }
        self.structure_region(target, follow)
    }

    fn leading_statements(&self, block_id: ILBlockId) -> Vec<Statement> {
        let nodes = &self.cfg.block(block_id).nodes;
        let body_len = nodes.len().saturating_sub(1);
        nodes[..body_len]
            .iter()
            .filter(|&&id| matches!(self.arena.get(id), ILNode::Store { .. } | ILNode::Call { .. }))
            .map(|&id| Statement::Expr(id))
            .collect()
    }

    fn structure_loop(&mut self, header: ILBlockId) -> (Statement, Option<ILBlockId>) {
        self.visited.insert(header);
        let members = self
            .loop_members
            .get(&header)
            .cloned()
            .unwrap_or_else(|| [header].into_iter().collect());
        let follow = self.cfg.post_dominators().idom(header);

        let nodes = self.cfg.block(header).nodes.clone();
        let terminator = nodes.last().map(|&id| (id, self.arena.get(id).clone()));
        let leading = self.leading_statements(header);

        self.loop_stack.push((header, follow));

        let stmt = match &terminator {
            Some((cond_id, ILNode::JumpCond { true_target, false_target, .. }))
                if leading.is_empty() && members.contains(true_target) != members.contains(false_target) =>
            {
                let body_entry = if members.contains(true_target) {
                    *true_target
                } else {
                    *false_target
                };
                let body = self.structure_region(body_entry, Some(header));
                Statement::While {
                    condition: *cond_id,
                    body,
                }
            }
            _ => {
                if let Some(do_while) = self.try_structure_do_while(header, &members, &leading) {
                    do_while
                } else {
                    let mut body = leading;
                    match &terminator {
                        Some((cond_id, ILNode::JumpCond { true_target, false_target, .. })) => {
                            let in_true = members.contains(true_target);
                            let in_false = members.contains(false_target);
                            if in_true != in_false {
                                let body_entry = if in_true { *true_target } else { *false_target };
                                let then_branch = if in_true { Vec::new() } else { vec![Statement::Break] };
                                let else_branch = if in_true { vec![Statement::Break] } else { Vec::new() };
                                body.push(Statement::If {
                                    condition: *cond_id,
                                    then_branch,
                                    else_branch,
                                });
                                body.extend(self.structure_region(body_entry, Some(header)));
                            } else {
                                let local_follow = self.cfg.post_dominators().idom(header);
                                let then_branch = self.structure_branch(*true_target, local_follow);
                                let else_branch = if Some(*false_target) == local_follow {
                                    Vec::new()
                                } else {
                                    self.structure_branch(*false_target, local_follow)
                                };
                                body.push(Statement::If {
                                    condition: *cond_id,
                                    then_branch,
                                    else_branch,
                                });
                            }
                        }
                        Some((_, ILNode::Jump { target })) => {
                            body.extend(self.structure_region(*target, Some(header)));
                        }
                        _ => {}
                    }
                    Statement::Endless { body }
                }
            }
        };

        self.loop_stack.pop();
        (stmt, follow)
    }

    /// Recognizes the post-tested loop shape: the header is a plain
    /// fallthrough (no branch of its own), and some other member of the
    /// loop ends in a conditional jump back to the header. That member's
    /// condition becomes the `do { ... } while (cond)` test.
    fn try_structure_do_while(
        &mut self,
        header: ILBlockId,
        members: &HashSet<ILBlockId>,
        leading: &[Statement],
    ) -> Option<Statement> {
        if !leading.is_empty() {
            return None;
        }
        let header_terminator = self
            .cfg
            .block(header)
            .nodes
            .last()
            .map(|&id| self.arena.get(id).clone());
        let next = match header_terminator {
            Some(ILNode::Jump { target }) => target,
            _ => return None,
        };

        let latch = members.iter().copied().find(|&m| {
            m != header
                && matches!(
                    self.cfg.block(m).nodes.last().map(|&id| self.arena.get(id)),
                    Some(ILNode::JumpCond { true_target, false_target, .. })
                        if *true_target == header || *false_target == header
                )
        })?;
        let latch_cond_id = *self.cfg.block(latch).nodes.last()?;
        self.visited.insert(latch);

        let mut body = self.structure_region(next, Some(latch));
        body.extend(self.leading_statements(latch));
        Some(Statement::DoWhile {
            body,
            condition: latch_cond_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::il::cfg::ILBlock;
    use crate::il::node::{BinaryOp, NodeArena};

    fn push_block(cfg_blocks: &mut Vec<ILBlock>, nodes: Vec<crate::il::node::NodeId>) -> ILBlockId {
        let id = ILBlockId(cfg_blocks.len() as u32);
        cfg_blocks.push(ILBlock {
            nodes,
            successors: Default::default(),
            predecessors: Default::default(),
        });
        id
    }

    #[test]
    fn diamond_becomes_if_else() {
        let mut arena = NodeArena::new();
        let mut blocks = Vec::new();

        let cond_val = arena.push(ILNode::Const(Cell(1)));
        let zero = arena.push(ILNode::Const(Cell(0)));
        let cmp = arena.push(ILNode::Binary {
            op: BinaryOp::Sgrtr,
            lhs: cond_val,
            rhs: zero,
        });
        let entry = push_block(&mut blocks, vec![cond_val, zero, cmp]);

        let then_ret_val = arena.push(ILNode::Const(Cell(1)));
        let then_ret = arena.push(ILNode::Return { value: Some(then_ret_val) });
        let then_block = push_block(&mut blocks, vec![then_ret_val, then_ret]);

        let else_ret_val = arena.push(ILNode::Const(Cell(2)));
        let else_ret = arena.push(ILNode::Return { value: Some(else_ret_val) });
        let else_block = push_block(&mut blocks, vec![else_ret_val, else_ret]);

        let jumpcond = arena.push(ILNode::JumpCond {
            op: BinaryOp::Sgrtr,
            lhs: cond_val,
            rhs: zero,
            true_target: then_block,
            false_target: else_block,
        });
        blocks[entry.0 as usize].nodes.push(jumpcond);
        blocks[entry.0 as usize].successors.extend([then_block, else_block]);
        blocks[then_block.0 as usize].predecessors.push(entry);
        blocks[else_block.0 as usize].predecessors.push(entry);

        let cfg = ILCfg::new(blocks, entry);
        let program = structurize(&arena, &cfg);

        assert_eq!(program.len(), 1);
        assert!(matches!(program[0], Statement::If { .. }));
    }

    #[test]
    fn back_edge_to_header_becomes_while_loop() {
        let mut arena = NodeArena::new();
        let mut blocks = Vec::new();

        let zero = arena.push(ILNode::Const(Cell(0)));
        let limit = arena.push(ILNode::Const(Cell(10)));
        let cmp = arena.push(ILNode::Binary {
            op: BinaryOp::Sless,
            lhs: zero,
            rhs: limit,
        });
        let header = push_block(&mut blocks, vec![zero, limit, cmp]);

        let body_place = arena.push(ILNode::LocalVar { stack_offset: -4 });
        let body_val = arena.push(ILNode::Const(Cell(1)));
        let body_store = arena.push(ILNode::Store {
            place: body_place,
            value: body_val,
        });
        let body_jump = arena.push(ILNode::Jump { target: header });
        let body = push_block(&mut blocks, vec![body_place, body_val, body_store, body_jump]);

        let exit_ret = arena.push(ILNode::Return { value: None });
        let exit = push_block(&mut blocks, vec![exit_ret]);

        let jumpcond = arena.push(ILNode::JumpCond {
            op: BinaryOp::Sless,
            lhs: zero,
            rhs: limit,
            true_target: body,
            false_target: exit,
        });
        blocks[header.0 as usize].nodes.push(jumpcond);
        blocks[header.0 as usize].successors.extend([body, exit]);
        blocks[body.0 as usize].predecessors.push(header);
        blocks[body.0 as usize].successors.push(header);
        blocks[header.0 as usize].predecessors.push(body);
        blocks[exit.0 as usize].predecessors.push(header);

        let cfg = ILCfg::new(blocks, header);
        let program = structurize(&arena, &cfg);

        assert!(program.iter().any(|s| matches!(s, Statement::While { .. })));
    }
}

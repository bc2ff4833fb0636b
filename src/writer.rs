//! Minimal statement-tree pretty-printer: turns a decompiled function's
//! structured body back into C-like pseudo-source. No comment recovery and
//! no string-literal heuristics beyond what `StringDetection` opts into —
//! final text emission faithful to SourcePawn syntax is explicitly out of
//! scope, so this stays a debugging aid over the statement tree rather than
//! a real unparser.

use std::fmt::Write as _;

use crate::cfg::ControlFlowGraph;
use crate::config::{DecompilerOptions, StringDetection};
use crate::il::cfg::{ILBlockId, ILCfg};
use crate::il::node::{BinaryOp, Callable, ILNode, NodeArena, NodeId, UnaryOp};
use crate::smx::SmxImage;
use crate::statement::{LabelId, Statement};

pub fn write_function(
    out: &mut String,
    image: &SmxImage,
    options: &DecompilerOptions,
    name: &str,
    arena: &NodeArena,
    body: &[Statement],
) {
    let _ = writeln!(out, "function {name}() {{");
    let printer = Printer { image, options, arena };
    printer.write_block(out, body, 1);
    let _ = writeln!(out, "}}");
}

/// Disassembles a function's raw pcode, one basic block at a time, the way
/// `original_source/SmxDecompiler/smx-disasm.cpp` lists an address, a
/// mnemonic, and its operand cells per line. Used by `--print-assembly`.
pub fn write_assembly(out: &mut String, name: &str, pcode: &ControlFlowGraph) {
    let _ = writeln!(out, "; {name}");
    for (i, block) in pcode.blocks.iter().enumerate() {
        let _ = writeln!(out, "block{i}:");
        for instr in &block.instructions {
            let operands: Vec<String> = instr.operands.iter().map(|c| c.as_i32().to_string()).collect();
            let mnemonic = instr.opcode.info().mnemonic;
            if operands.is_empty() {
                let _ = writeln!(out, "  {:>6}: {mnemonic}", instr.pc.as_i32());
            } else {
                let _ = writeln!(out, "  {:>6}: {mnemonic} {}", instr.pc.as_i32(), operands.join(", "));
            }
        }
    }
}

/// Dumps the lifted/typed/fixed IL graph one block at a time, each node
/// labeled by its arena id so a reader can cross-reference `replace_uses_with`
/// rewrites and phi inputs by hand. Used by `--print-il`, the debugging
/// counterpart to the final pseudo-source `write_function` produces.
pub fn write_il(
    out: &mut String,
    image: &SmxImage,
    options: &DecompilerOptions,
    name: &str,
    arena: &NodeArena,
    cfg: &ILCfg,
) {
    let _ = writeln!(out, "; {name}");
    let printer = Printer { image, options, arena };
    for i in 0..cfg.block_count() {
        let block = cfg.block(ILBlockId(i as u32));
        let succs: Vec<u32> = block.successors.iter().map(|s| s.0).collect();
        let _ = writeln!(out, "block{i} -> {succs:?}:");
        for &node in &block.nodes {
            let _ = writeln!(out, "  %{} = {}", node.0, printer.expr(node));
        }
    }
}

struct Printer<'a> {
    image: &'a SmxImage,
    options: &'a DecompilerOptions,
    arena: &'a NodeArena,
}

impl<'a> Printer<'a> {
    fn indent(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("    ");
        }
    }

    fn write_block(&self, out: &mut String, stmts: &[Statement], depth: usize) {
        for stmt in stmts {
            self.write_statement(out, stmt, depth);
        }
    }

    fn write_statement(&self, out: &mut String, stmt: &Statement, depth: usize) {
        self.indent(out, depth);
        match stmt {
            Statement::Expr(id) => {
                let _ = writeln!(out, "{};", self.expr(*id));
            }
            Statement::Return(value) => match value {
                Some(id) => {
                    let _ = writeln!(out, "return {};", self.expr(*id));
                }
                None => {
                    let _ = writeln!(out, "return;");
                }
            },
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let _ = writeln!(out, "if ({}) {{", self.expr(*condition));
                self.write_block(out, then_branch, depth + 1);
                self.indent(out, depth);
                if else_branch.is_empty() {
                    let _ = writeln!(out, "}}");
                } else {
                    let _ = writeln!(out, "}} else {{");
                    self.write_block(out, else_branch, depth + 1);
                    self.indent(out, depth);
                    let _ = writeln!(out, "}}");
                }
            }
            Statement::While { condition, body } => {
                let _ = writeln!(out, "while ({}) {{", self.expr(*condition));
                self.write_block(out, body, depth + 1);
                self.indent(out, depth);
                let _ = writeln!(out, "}}");
            }
            Statement::DoWhile { body, condition } => {
                let _ = writeln!(out, "do {{");
                self.write_block(out, body, depth + 1);
                self.indent(out, depth);
                let _ = writeln!(out, "}} while ({});", self.expr(*condition));
            }
            Statement::Endless { body } => {
                let _ = writeln!(out, "while (true) {{");
                self.write_block(out, body, depth + 1);
                self.indent(out, depth);
                let _ = writeln!(out, "}}");
            }
            Statement::Switch { index, cases, default } => {
                let _ = writeln!(out, "switch ({}) {{", self.expr(*index));
                for (values, stmts) in cases {
                    for v in values {
                        self.indent(out, depth + 1);
                        let _ = writeln!(out, "case {v}:");
                    }
                    self.write_block(out, stmts, depth + 2);
                }
                if !default.is_empty() {
                    self.indent(out, depth + 1);
                    let _ = writeln!(out, "default:");
                    self.write_block(out, default, depth + 2);
                }
                self.indent(out, depth);
                let _ = writeln!(out, "}}");
            }
            Statement::Break => {
                let _ = writeln!(out, "break;");
            }
            Statement::Continue => {
                let _ = writeln!(out, "continue;");
            }
            Statement::Label(l) => {
                let _ = writeln!(out, "{}:", label_name(*l));
            }
            Statement::Goto(l) => {
                let _ = writeln!(out, "goto {};", label_name(*l));
            }
        }
    }

    fn expr(&self, id: NodeId) -> String {
        match self.arena.get(id) {
            ILNode::Const(c) => match self.try_string_literal(c.as_i32()) {
                Some(s) => format!("{s:?}"),
                None => c.as_i32().to_string(),
            },
            ILNode::Unary { op, operand } => format!("{}({})", unary_symbol(*op), self.expr(*operand)),
            ILNode::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(*lhs), binary_symbol(*op), self.expr(*rhs))
            }
            ILNode::LocalVar { stack_offset } => format!("loc_{stack_offset}"),
            ILNode::GlobalVar { address } => format!("glb_{}", address.as_i32()),
            ILNode::HeapVar { address } => format!("heap_{}", address.as_i32()),
            ILNode::TempVar { slot } => format!("tmp_{slot}"),
            ILNode::ArrayElementVar { base, index } => format!("{}[{}]", self.expr(*base), self.expr(*index)),
            ILNode::FieldVar { base, offset } => format!("{}.f{offset}", self.expr(*base)),
            ILNode::Load { place } => self.expr(*place),
            ILNode::Store { place, value } => format!("{} = {}", self.expr(*place), self.expr(*value)),
            ILNode::Jump { .. } => "/* jump */".to_string(),
            ILNode::JumpCond { op, lhs, rhs, .. } => {
                format!("({} {} {})", self.expr(*lhs), binary_symbol(*op), self.expr(*rhs))
            }
            ILNode::Switch { index, .. } => self.expr(*index),
            ILNode::Call { callee, args } => {
                let name = self.callee_name(callee.clone());
                let rendered: Vec<String> = args.iter().map(|&a| self.expr(a)).collect();
                format!("{name}({})", rendered.join(", "))
            }
            ILNode::Return { value } => match value {
                Some(v) => self.expr(*v),
                None => String::new(),
            },
            ILNode::Phi { inputs } => {
                let rendered: Vec<String> = inputs.iter().map(|&i| self.expr(i)).collect();
                format!("phi({})", rendered.join(", "))
            }
            ILNode::Interval { .. } => "/* loop header */".to_string(),
        }
    }

    fn callee_name(&self, callee: Callable) -> String {
        match callee {
            Callable::Function(idx) => self
                .image
                .find_function_by_id(idx as usize)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("func_{idx}")),
            Callable::Native(idx) => self
                .image
                .find_native_by_index(idx as usize)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| format!("native_{idx}")),
        }
    }

    /// With `StringDetection::Heuristic`, treats a constant as a possible
    /// data-section offset and reads it as a run of printable ASCII cells
    /// terminated by a zero cell, the same shape SourcePawn string literals
    /// take in the data section (one character per cell, not packed).
    fn try_string_literal(&self, addr: i32) -> Option<String> {
        if self.options.string_detection != StringDetection::Heuristic || addr < 0 {
            return None;
        }
        let mut out = String::new();
        let mut i = addr as usize;
        while let Some(cell) = self.image.data.get(i) {
            let byte = cell.as_i32();
            if byte == 0 {
                return Some(out);
            }
            if !(0x20..=0x7e).contains(&byte) {
                return None;
            }
            out.push(byte as u8 as char);
            i += 1;
            if out.len() > 256 {
                return None;
            }
        }
        None
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    use UnaryOp::*;
    match op {
        Not => "!",
        Neg => "-",
        Invert => "~",
        Fabs => "fabs",
        Float => "float",
        FloatNot => "!",
        RndToNearest => "round",
        RndToCeil => "ceil",
        RndToZero => "trunc",
        RndToFloor => "floor",
        Inc => "++",
        Dec => "--",
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Add | FloatAdd => "+",
        Sub | FloatSub => "-",
        Div | FloatDiv => "/",
        Mul | FloatMul => "*",
        Mod => "%",
        Shl => "<<",
        Shr | Sshr => ">>",
        BitAnd => "&",
        BitOr => "|",
        Xor => "^",
        Eq | FloatEq => "==",
        Neq | FloatNe => "!=",
        Sgrtr | FloatGt => ">",
        Sgeq | FloatGe => ">=",
        Sless | FloatLt => "<",
        Sleq | FloatLe => "<=",
        And => "&&",
        Or => "||",
        FloatCmp => "<=>",
    }
}

fn label_name(l: LabelId) -> String {
    format!("label_{}", l.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::il::node::NodeArena;

    #[test]
    fn writes_a_simple_return() {
        let image = SmxImage::default();
        let options = DecompilerOptions::default();
        let mut arena = NodeArena::new();
        let five = arena.push(ILNode::Const(Cell(5)));
        let body = vec![Statement::Return(Some(five))];

        let mut out = String::new();
        write_function(&mut out, &image, &options, "Five", &arena, &body);

        assert!(out.contains("function Five()"));
        assert!(out.contains("return 5;"));
    }

    #[test]
    fn writes_nested_if_else() {
        let image = SmxImage::default();
        let options = DecompilerOptions::default();
        let mut arena = NodeArena::new();
        let a = arena.push(ILNode::Const(Cell(1)));
        let b = arena.push(ILNode::Const(Cell(0)));
        let cond = arena.push(ILNode::Binary {
            op: BinaryOp::Sgrtr,
            lhs: a,
            rhs: b,
        });
        let then_ret = arena.push(ILNode::Const(Cell(1)));
        let else_ret = arena.push(ILNode::Const(Cell(2)));
        let body = vec![Statement::If {
            condition: cond,
            then_branch: vec![Statement::Return(Some(then_ret))],
            else_branch: vec![Statement::Return(Some(else_ret))],
        }];

        let mut out = String::new();
        write_function(&mut out, &image, &options, "Sign", &arena, &body);

        assert!(out.contains("if ((1 > 0)) {"));
        assert!(out.contains("} else {"));
    }

    #[test]
    fn writes_assembly_lines_with_address_and_mnemonic() {
        use crate::cfg;
        use crate::pcode::Opcode;
        use crate::smx::{SmxFunction, SmxFunctionSignature};

        let raw_for = |op: Opcode| (1..=200).find(|&raw| Opcode::decode(raw) == Some(op)).unwrap();
        let code = vec![Cell(raw_for(Opcode::Proc)), Cell(raw_for(Opcode::Retn))];
        let func = SmxFunction {
            raw_name: "Five".into(),
            name: "Five".into(),
            pcode_start: Cell(0),
            pcode_end: Cell(code.len() as i32),
            is_public: true,
            signature: SmxFunctionSignature::default(),
            locals: Vec::new(),
        };
        let pcode = cfg::build(&func, &code).unwrap();

        let mut out = String::new();
        write_assembly(&mut out, "Five", &pcode);

        assert!(out.contains("; Five"));
        assert!(out.contains("proc"));
        assert!(out.contains("retn"));
    }

    #[test]
    fn writes_il_nodes_labeled_by_id() {
        use crate::il::cfg::{ILBlock, ILBlockId, ILCfg};

        let image = SmxImage::default();
        let options = DecompilerOptions::default();
        let mut arena = NodeArena::new();
        let five = arena.push(ILNode::Const(Cell(5)));
        let ret = arena.push(ILNode::Return { value: Some(five) });
        let block = ILBlock {
            nodes: vec![five, ret],
            successors: Default::default(),
            predecessors: Default::default(),
        };
        let cfg = ILCfg::new(vec![block], ILBlockId(0));

        let mut out = String::new();
        write_il(&mut out, &image, &options, "Five", &arena, &cfg);

        assert!(out.contains("block0"));
        assert!(out.contains(&format!("%{} = 5", five.0)));
        assert!(out.contains(&format!("%{} = 5", ret.0)));
    }
}

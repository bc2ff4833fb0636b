//! The six literal boundary scenarios covering the full pipeline end to
//! end: pcode -> CFG -> lifted IL -> typed IL -> fixed IL -> structured
//! statement tree.

use smx_decompiler::cell::Cell;
use smx_decompiler::error::DiagnosticSink;
use smx_decompiler::fixer::Fixer;
use smx_decompiler::il::node::{BinaryOp, ILNode, NodeArena, NodeId};
use smx_decompiler::pcode::Opcode;
use smx_decompiler::smx::{SmxFunction, SmxFunctionSignature, SmxImage};
use smx_decompiler::statement::Statement;
use smx_decompiler::structurizer;
use smx_decompiler::typer::Typer;
use smx_decompiler::{cfg, lifter};

fn raw_for(op: Opcode) -> i32 {
    (1..=200)
        .find(|&raw| Opcode::decode(raw) == Some(op))
        .expect("opcode must have a raw encoding")
}

fn asm(cells: &[(Opcode, &[i32])]) -> Vec<Cell> {
    let mut out = Vec::new();
    for (op, operands) in cells {
        out.push(Cell(raw_for(*op)));
        for &o in *operands {
            out.push(Cell(o));
        }
    }
    out
}

fn function(name: &str, code_len: usize) -> SmxFunction {
    SmxFunction {
        raw_name: name.into(),
        name: name.into(),
        pcode_start: Cell(0),
        pcode_end: Cell(code_len as i32),
        is_public: true,
        signature: SmxFunctionSignature::default(),
        locals: Vec::new(),
    }
}

/// Runs the full pipeline and returns the structured body.
fn run(code: Vec<Cell>) -> Vec<Statement> {
    let mut image = SmxImage::default();
    image.code = code;
    let func = function("f", image.code.len());

    let pcode = cfg::build(&func, &image.code).expect("cfg builds");
    let mut diagnostics = DiagnosticSink::new();
    let lifted = lifter::lift(&image, &pcode, &image.code, &mut diagnostics);
    let mut arena = lifted.arena;
    let mut il_cfg = lifted.cfg;

    Typer::new(&image, &mut diagnostics).run(&mut arena, &il_cfg, &func);
    Fixer::new(&image, &mut diagnostics).run(&mut arena, &mut il_cfg);
    Typer::new(&image, &mut diagnostics).run(&mut arena, &il_cfg, &func);

    structurizer::structurize(&arena, &il_cfg)
}

/// Same pipeline as `run`, but also hands back the arena so a test can
/// inspect a recovered condition's actual node shape rather than just the
/// statement tree around it.
fn run_with_arena(code: Vec<Cell>) -> (Vec<Statement>, NodeArena) {
    let mut image = SmxImage::default();
    image.code = code;
    let func = function("f", image.code.len());

    let pcode = cfg::build(&func, &image.code).expect("cfg builds");
    let mut diagnostics = DiagnosticSink::new();
    let lifted = lifter::lift(&image, &pcode, &image.code, &mut diagnostics);
    let mut arena = lifted.arena;
    let mut il_cfg = lifted.cfg;

    Typer::new(&image, &mut diagnostics).run(&mut arena, &il_cfg, &func);
    Fixer::new(&image, &mut diagnostics).run(&mut arena, &mut il_cfg);
    Typer::new(&image, &mut diagnostics).run(&mut arena, &il_cfg, &func);

    let body = structurizer::structurize(&arena, &il_cfg);
    (body, arena)
}

/// Unwraps a `JumpCond`'s own condition down to the `Binary` node it tests,
/// the way `writer.rs` reads a `JumpCond`'s `lhs`/`rhs` directly: compound
/// conditions synthesized by the lifter wrap a fused `Binary(And/Or, ...)`
/// as `JumpCond(Neq, <binary>, Const(0), ...)`.
fn unwrap_compound_binary(arena: &NodeArena, condition: NodeId) -> (BinaryOp, NodeId, NodeId) {
    match arena.get(condition) {
        ILNode::JumpCond { lhs, .. } => match arena.get(*lhs) {
            ILNode::Binary { op, lhs, rhs } => (*op, *lhs, *rhs),
            other => panic!("expected a fused Binary condition, got {other:?}"),
        },
        other => panic!("expected a JumpCond, got {other:?}"),
    }
}

#[test]
fn empty_function_is_a_single_return() {
    let code = asm(&[(Opcode::Proc, &[]), (Opcode::Retn, &[])]);
    let body = run(code);
    assert_eq!(body.len(), 1);
    assert!(matches!(body[0], Statement::Return(None)));
}

#[test]
fn straight_line_add_stores_then_returns() {
    let code = asm(&[
        (Opcode::Proc, &[]),
        (Opcode::ConstPri, &[3]),
        (Opcode::ConstAlt, &[4]),
        (Opcode::Add, &[]),
        (Opcode::StorPri, &[0x100]),
        (Opcode::Retn, &[]),
    ]);
    let body = run(code);
    assert_eq!(body.len(), 2);
    assert!(matches!(body[0], Statement::Expr(_)));
    assert!(matches!(body[1], Statement::Return(Some(_))));
}

#[test]
fn if_then_else_recovers_both_arms() {
    // proc; load.s.pri -4; jzer L1; const.pri 1; stor.pri 0x100; jump L2;
    // L1: const.pri 2; stor.pri 0x100; L2: retn
    let mut code = asm(&[(Opcode::Proc, &[]), (Opcode::LoadSPri, &[-4])]);
    let jzer_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Jzer, &[0])])); // patched below
    code.extend(asm(&[
        (Opcode::ConstPri, &[1]),
        (Opcode::StorPri, &[0x100]),
    ]));
    let jump_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Jump, &[0])])); // patched below
    let else_pc = code.len() as i32;
    code.extend(asm(&[
        (Opcode::ConstPri, &[2]),
        (Opcode::StorPri, &[0x100]),
    ]));
    let join_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Retn, &[])]));

    code[jzer_pc as usize + 1] = Cell(else_pc);
    code[jump_pc as usize + 1] = Cell(join_pc);

    let body = run(code);
    assert_eq!(body.len(), 2);
    match &body[0] {
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            assert_eq!(then_branch.len(), 1);
            assert_eq!(else_branch.len(), 1);
        }
        other => panic!("expected If, got {other:?}"),
    }
    assert!(matches!(body[1], Statement::Return(None)));
}

#[test]
fn while_loop_recovers_a_while_statement() {
    // header: load.s.pri -4; jzer EXIT; <body>; jump HEADER; EXIT: retn
    let mut code = asm(&[(Opcode::Proc, &[])]);
    let header_start = code.len() as i32;
    code.extend(asm(&[(Opcode::LoadSPri, &[-4])]));
    let jzer_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Jzer, &[0])])); // patched below
    code.extend(asm(&[
        (Opcode::ConstPri, &[1]),
        (Opcode::StorPri, &[0x100]),
    ]));
    let jump_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Jump, &[0])])); // patched below
    let exit_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Retn, &[])]));

    code[jzer_pc as usize + 1] = Cell(exit_pc);
    code[jump_pc as usize + 1] = Cell(header_start);

    let body = run(code);
    assert!(body.iter().any(|s| matches!(s, Statement::While { .. })));
}

#[test]
fn short_circuit_and_collapses_to_one_binary_condition() {
    // a && b, both operands loaded from locals: jzer past the second test
    // when the first is already false, otherwise test the second.
    let mut code = asm(&[(Opcode::Proc, &[]), (Opcode::LoadSPri, &[-4])]);
    let first_jzer = code.len() as i32;
    code.extend(asm(&[(Opcode::Jzer, &[0])])); // patched to else
    code.extend(asm(&[(Opcode::LoadSPri, &[-8])]));
    let second_jzer = code.len() as i32;
    code.extend(asm(&[(Opcode::Jzer, &[0])])); // patched to else
    code.extend(asm(&[
        (Opcode::ConstPri, &[1]),
        (Opcode::StorPri, &[0x100]),
    ]));
    let jump_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Jump, &[0])])); // patched to join
    let else_pc = code.len() as i32;
    code.extend(asm(&[
        (Opcode::ConstPri, &[0]),
        (Opcode::StorPri, &[0x100]),
    ]));
    let join_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Retn, &[])]));

    code[first_jzer as usize + 1] = Cell(else_pc);
    code[second_jzer as usize + 1] = Cell(else_pc);
    code[jump_pc as usize + 1] = Cell(join_pc);

    let (body, arena) = run_with_arena(code);
    let ifs: Vec<&Statement> = body.iter().filter(|s| matches!(s, Statement::If { .. })).collect();
    assert_eq!(ifs.len(), 1, "expected the short-circuit chain to collapse to one If, got {body:?}");

    let Statement::If { condition, .. } = ifs[0] else { unreachable!() };
    let (op, lhs, rhs) = unwrap_compound_binary(&arena, *condition);
    assert!(
        matches!(op, BinaryOp::And | BinaryOp::Or),
        "expected the fused condition to be a single And/Or, got {op:?}"
    );
    assert!(matches!(arena.get(lhs), ILNode::JumpCond { .. }));
    assert!(matches!(arena.get(rhs), ILNode::JumpCond { .. }));
}

#[test]
fn switch_with_default_and_two_cases() {
    // proc; load.s.pri -4; switch CASETBL; case1: ...; case2: ...; default: ...
    let mut code = asm(&[(Opcode::Proc, &[]), (Opcode::LoadSPri, &[-4])]);
    let switch_pc = code.len() as i32;
    code.extend(asm(&[(Opcode::Switch, &[0])])); // patched to casetbl addr
    let casetbl_pc = code.len() as i32;

    // Lay out the three target blocks first so their addresses are known,
    // then the case table, then patch the switch operand and case table
    // contents to point at them.
    let mut case1 = asm(&[(Opcode::ConstPri, &[10]), (Opcode::StorPri, &[0x100])]);

    // Build case/default bodies after a table whose size we already know:
    // the casetbl opcode cell itself, then ncases, default, and ncases
    // (value, target) pairs (ncases=2 -> 1 + 2 + 2*2 = 7 cells).
    let table_len = 1 + 2 + 2 * 2;
    let case1_pc = casetbl_pc + table_len;
    case1.extend(asm(&[(Opcode::Jump, &[0])])); // to join, patched below
    let case1_jump_idx = case1.len() - 1; // index within case1 vec (cell with operand follows opcode)

    let mut case2 = asm(&[(Opcode::ConstPri, &[20]), (Opcode::StorPri, &[0x100])]);
    let case2_pc = case1_pc + case1.len() as i32;
    case2.extend(asm(&[(Opcode::Jump, &[0])]));
    let case2_jump_idx = case2.len() - 1;

    let default_pc = case2_pc + case2.len() as i32;
    let default_body = asm(&[(Opcode::ConstPri, &[0]), (Opcode::StorPri, &[0x100])]);
    let join_pc = default_pc + default_body.len() as i32;

    case1[case1_jump_idx] = Cell(join_pc);
    case2[case2_jump_idx] = Cell(join_pc);

    // casetbl opcode, ncases, default, (value, target)*
    let mut casetbl = asm(&[(Opcode::Casetbl, &[])]);
    casetbl.extend([
        Cell(2),
        Cell(default_pc),
        Cell(10),
        Cell(case1_pc),
        Cell(20),
        Cell(case2_pc),
    ]);

    code[switch_pc as usize + 1] = Cell(casetbl_pc);
    code.extend(casetbl);
    code.extend(case1);
    code.extend(case2);
    code.extend(default_body);
    code.extend(asm(&[(Opcode::Retn, &[])]));

    let body = run(code);
    let switch_stmt = body.iter().find(|s| matches!(s, Statement::Switch { .. }));
    match switch_stmt {
        Some(Statement::Switch { cases, default, .. }) => {
            assert_eq!(cases.len(), 2);
            assert!(!default.is_empty());
        }
        _ => panic!("expected a recovered Switch statement, body was {body:?}"),
    }
}

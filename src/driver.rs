//! Orchestrates one function's pipeline: pcode CFG -> lifted IL -> typed IL
//! -> peephole-fixed IL -> structured statement tree. Mirrors
//! `original_source/SmxDecompiler/decompiler.cpp`'s per-function driving
//! loop, generalized to run across every function in an image rather than
//! just the one selected on the command line.

use crate::cell::Cell;
use crate::cfg::{self, ControlFlowGraph};
use crate::config::DecompilerOptions;
use crate::error::{CfgError, DiagnosticSink};
use crate::fixer::Fixer;
use crate::il::cfg::ILCfg;
use crate::il::node::NodeArena;
use crate::lifter;
use crate::pcode::Opcode;
use crate::smx::{SmxFunction, SmxFunctionSignature, SmxImage};
use crate::statement::Statement;
use crate::structurizer;
use crate::typer::Typer;

/// One function's complete decompilation: the raw pcode CFG (kept around for
/// `--print-assembly`), the statement tree plus the node arena it indexes
/// into, and whatever non-fatal diagnostics the typer and fixer accumulated
/// along the way.
pub struct DecompiledFunction {
    pub name: String,
    pub pcode: ControlFlowGraph,
    pub arena: NodeArena,
    pub cfg: ILCfg,
    pub body: Vec<Statement>,
    pub diagnostics: DiagnosticSink,
}

/// Alternating passes between the typer and the fixer: a fixer rewrite can
/// surface a type the first typer pass had no way to see (folding `x != 0`
/// into `x` exposes `x`'s own type to whatever now consumes the result
/// directly), so the typer runs once more after each fixer pass settles.
const FIXER_PASSES: usize = 2;

pub fn decompile_function(image: &SmxImage, func: &SmxFunction) -> Result<DecompiledFunction, CfgError> {
    let mut diagnostics = DiagnosticSink::new();

    let pcode = cfg::build(func, &image.code)?;
    let lifted = lifter::lift(image, &pcode, &image.code, &mut diagnostics);
    let mut arena = lifted.arena;
    let mut il_cfg = lifted.cfg;

    Typer::new(image, &mut diagnostics).run(&mut arena, &il_cfg, func);
    for _ in 0..FIXER_PASSES {
        Fixer::new(image, &mut diagnostics).run(&mut arena, &mut il_cfg);
        Typer::new(image, &mut diagnostics).run(&mut arena, &il_cfg, func);
    }

    let body = structurizer::structurize(&arena, &il_cfg);

    Ok(DecompiledFunction {
        name: func.name.clone(),
        pcode,
        arena,
        cfg: il_cfg,
        body,
        diagnostics,
    })
}

/// Scans every function already in `image.functions` for `CALL` targets that
/// land outside the function table and adds them as new, undecorated-name
/// functions, repeating until a pass turns up nothing new. This is what lets
/// a recursive callee or a function RTTI never named (because it's never
/// exported) still get decompiled on its own, rather than only appearing
/// inline wherever it's called from.
///
/// Must run to completion before any function is lifted in parallel: it's
/// the only pass that mutates the function table, and every other stage
/// treats `SmxImage` as read-only.
fn discover_functions(image: &mut SmxImage) {
    let mut scanned = 0usize;
    loop {
        let mut discovered: Vec<Cell> = Vec::new();
        while scanned < image.functions.len() {
            let func = image.functions[scanned].clone();
            scanned += 1;
            let Ok(pcode) = cfg::build(&func, &image.code) else {
                continue;
            };
            for block in &pcode.blocks {
                for instr in &block.instructions {
                    if instr.opcode != Opcode::Call {
                        continue;
                    }
                    let target = instr.operands[0];
                    if image.find_function_at(target).is_none() && !discovered.contains(&target) {
                        discovered.push(target);
                    }
                }
            }
        }
        if discovered.is_empty() {
            break;
        }
        for addr in discovered {
            let end = image
                .functions
                .iter()
                .map(|f| f.pcode_start)
                .filter(|&start| start > addr)
                .min()
                .unwrap_or(Cell(image.code.len() as i32));
            let name = format!("sub_{:x}", addr.as_i32());
            image.functions.push(SmxFunction {
                raw_name: name.clone(),
                name,
                pcode_start: addr,
                pcode_end: end,
                is_public: false,
                signature: SmxFunctionSignature::default(),
                locals: Vec::new(),
            });
        }
    }
}

/// Decompiles every function in `image` matching `options.function_filter`,
/// first running function discovery so `CALL` targets missing from the
/// parsed function table still get decompiled. A function whose pcode CFG
/// fails to build is reported as an `Err` entry rather than aborting the
/// whole run, since one malformed function shouldn't block decompiling the
/// rest of the plugin.
pub fn decompile_all(
    image: &mut SmxImage,
    options: &DecompilerOptions,
) -> Vec<(String, Result<DecompiledFunction, CfgError>)> {
    discover_functions(image);
    image
        .functions
        .iter()
        .filter(|f| options.matches(&f.name))
        .map(|f| (f.name.clone(), decompile_function(image, f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::pcode::Opcode;
    use crate::smx::{SmxFunctionSignature, SmxImage};

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

    fn function(name: &str, start: i32, end: i32) -> SmxFunction {
        SmxFunction {
            raw_name: name.into(),
            name: name.into(),
            pcode_start: Cell(start),
            pcode_end: Cell(end),
            is_public: true,
            signature: SmxFunctionSignature::default(),
            locals: Vec::new(),
        }
    }

    #[test]
    fn straight_line_function_decompiles_to_a_single_return() {
        let code = asm(&[(Opcode::Proc, &[]), (Opcode::ConstPri, &[5]), (Opcode::Retn, &[])]);
        let mut image = SmxImage::default();
        image.code = code;
        let func = function("Five", 0, image.code.len() as i32);
        image.functions.push(func.clone());

        let result = decompile_function(&image, &func).expect("decompiles cleanly");
        assert_eq!(result.body.len(), 1);
        assert!(matches!(result.body[0], Statement::Return(Some(_))));
    }

    #[test]
    fn discover_functions_adds_an_undecorated_entry_for_an_uncataloged_call_target() {
        let mut code = asm(&[(Opcode::Proc, &[])]);
        let call_pc = code.len() as i32;
        code.extend(asm(&[(Opcode::Call, &[0])])); // patched below
        code.extend(asm(&[(Opcode::Retn, &[])]));
        let callee_start = code.len() as i32;
        code.extend(asm(&[(Opcode::Proc, &[]), (Opcode::Retn, &[])]));
        code[call_pc as usize + 1] = Cell(callee_start);

        let mut image = SmxImage::default();
        image.code = code;
        image.functions.push(function("A", 0, callee_start));

        let results = decompile_all(&mut image, &DecompilerOptions::default());

        assert_eq!(image.functions.len(), 2);
        let discovered = &image.functions[1];
        assert_eq!(discovered.pcode_start, Cell(callee_start));
        assert!(discovered.name.starts_with("sub_"));
        assert!(!discovered.is_public);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn decompile_all_honors_the_function_filter() {
        let code = asm(&[(Opcode::Proc, &[]), (Opcode::Retn, &[])]);
        let mut image = SmxImage::default();
        image.code = code;
        image.functions.push(function("OnPlayerSpawn", 0, image.code.len() as i32));
        image.functions.push(function("OnMapStart", 0, image.code.len() as i32));

        let mut options = DecompilerOptions::default();
        options.function_filter = Some("OnPlayer".into());

        let results = decompile_all(&mut image, &options);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "OnPlayerSpawn");
    }
}

//! Command-line entry point: reads an SMX plugin, decompiles every function
//! matching the filter, and prints the recovered pseudo-source to stdout.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use smx_decompiler::config::{DecompilerOptions, StringDetection};
use smx_decompiler::driver;
use smx_decompiler::smx::SmxImage;
use smx_decompiler::writer;

#[derive(Parser, Debug)]
#[command(name = "smxdec", about = "Decompiles a SourcePawn SMX plugin back to pseudo-source")]
struct Args {
    /// Path to the compiled .smx plugin.
    input: PathBuf,

    /// Only decompile functions whose name contains this substring.
    #[arg(short, long)]
    function: Option<String>,

    /// List every global variable found in the image before decompiling.
    #[arg(long)]
    print_globals: bool,

    /// Dump each function's raw pcode disassembly before its pseudo-source.
    #[arg(long)]
    print_assembly: bool,

    /// Dump each function's recovered IL graph before its pseudo-source.
    #[arg(long)]
    print_il: bool,

    /// Render data-section constants that look like printable strings as
    /// string literals.
    #[arg(long)]
    detect_strings: bool,
}

/// Reading and parsing the plugin are the only failures worth a chained
/// `anyhow` context: everything past this point is per-function and gets
/// reported by name without aborting the rest of the run.
fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    let bytes = fs::read(&args.input)
        .with_context(|| format!("couldn't read {}", args.input.display()))?;
    let mut image = SmxImage::from_bytes(&bytes)
        .with_context(|| format!("couldn't parse {}", args.input.display()))?;

    let options = DecompilerOptions {
        function_filter: args.function,
        print_globals: args.print_globals,
        print_assembly: args.print_assembly,
        print_il: args.print_il,
        string_detection: if args.detect_strings {
            StringDetection::Heuristic
        } else {
            StringDetection::None
        },
    };

    if options.print_globals {
        for global in &image.globals {
            println!("global {} @ {:?}", global.name, global.address);
        }
    }

    let results = driver::decompile_all(&mut image, &options);
    let mut had_error = false;
    for (name, result) in results {
        match result {
            Ok(decompiled) => {
                for w in &decompiled.diagnostics.unrecoverable_types {
                    log::warn!("{name}: {}", w.node_desc);
                }
                for w in &decompiled.diagnostics.unsupported_patterns {
                    log::debug!("{name}: {}: {}", w.pass, w.detail);
                }
                let mut out = String::new();
                if options.print_assembly {
                    writer::write_assembly(&mut out, &name, &decompiled.pcode);
                }
                if options.print_il {
                    writer::write_il(&mut out, &image, &options, &name, &decompiled.arena, &decompiled.cfg);
                }
                writer::write_function(&mut out, &image, &options, &name, &decompiled.arena, &decompiled.body);
                print!("{out}");
            }
            Err(e) => {
                had_error = true;
                eprintln!("error: {name}: {e}");
            }
        }
    }

    Ok(if had_error { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

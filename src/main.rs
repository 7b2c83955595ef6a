use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use lia::assembler::{Architecture, Assembler, BuildKind};
use lia::error::{format_diagnostic, format_error, CompileError, Diagnostic, ErrorCode};
use lia::{compile_source, CompileOptions};

#[derive(Parser)]
#[command(name = "liac")]
#[command(about = "Compiler for the LIA language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log compiler stages (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a LIA source file.
    Compile(CompileArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitInfo {
    Tokens,
    Il,
    Timing,
}

#[derive(Args)]
struct CompileArgs {
    input: PathBuf,

    /// exe, dll or none (write the .il text only).
    #[arg(short, long, default_value = "exe")]
    build: BuildKind,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extra information to print.
    #[arg(short, long, value_enum)]
    emit: Vec<EmitInfo>,

    #[arg(long, default_value = "ilasm")]
    ilasm: String,

    #[arg(short, long)]
    arch: Option<String>,

    /// Run the program after building it.
    #[arg(short, long)]
    run: bool,

    /// Print the internal form of errors (also `#:devdebug>true`).
    #[arg(long)]
    dev_debug: bool,

    #[arg(long)]
    no_warnings: bool,

    /// Drop unreachable and useless code.
    #[arg(long)]
    trim: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Command::Compile(args) => compile_file(&args),
    };
    process::exit(code);
}

fn compile_file(args: &CompileArgs) -> i32 {
    let path = args.input.display().to_string();
    let source = match std::fs::read_to_string(&args.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {}", path, e);
            return ErrorCode::UnaccessibleFile.value();
        }
    };

    let stem = args
        .input
        .file_stem()
        .map_or_else(|| "Program".to_string(), |s| s.to_string_lossy().into_owned());

    let mut options = CompileOptions {
        dev_debug: args.dev_debug,
        require_main: args.build == BuildKind::Exe,
        assembly_name: stem,
        ..CompileOptions::default()
    };
    if args.no_warnings {
        options.set_all_warnings(true);
    }
    if args.trim {
        options.set_all_trim(true);
    }

    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let arch = args
        .arch
        .as_deref()
        .and_then(|text| Architecture::parse_or_warn(text, &mut diagnostics));

    let started = Instant::now();
    let result = compile_source(&source, &mut options, &mut diagnostics);
    let elapsed = started.elapsed();

    for diagnostic in &diagnostics {
        eprintln!("{}\n", format_diagnostic(diagnostic, &source, &path));
    }

    let compilation = match result {
        Ok(compilation) => compilation,
        Err(e) => {
            eprintln!("{}", format_error(&e, &source, &path));
            if options.dev_debug {
                eprintln!("{:#?}", e);
            }
            return e.code.value();
        }
    };

    if args.emit.contains(&EmitInfo::Tokens) {
        for token in &compilation.tokens {
            println!("{:?} {:?}", token.kind, token.text);
        }
    }
    if args.emit.contains(&EmitInfo::Il) {
        println!("{}", compilation.il);
    }
    if args.emit.contains(&EmitInfo::Timing) {
        println!("Compiled '{}' in {:.3?}", path, elapsed);
    }

    let extension = match args.build {
        BuildKind::Dll => "dll",
        _ => "exe",
    };
    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension(extension));
    let il_path = out_path.with_extension("il");

    if let Err(e) = std::fs::write(&il_path, &compilation.il) {
        eprintln!("Error writing '{}': {}", il_path.display(), e);
        return ErrorCode::UnaccessibleFile.value();
    }
    tracing::info!(path = %il_path.display(), "wrote assembly text");

    if args.build == BuildKind::None {
        return 0;
    }

    let assembler = Assembler::new(args.ilasm.as_str());
    if let Err(e) = assembler.assemble(&il_path, &out_path, arch, args.build) {
        report(&e, options.dev_debug);
        return e.code.value();
    }

    if args.run && args.build == BuildKind::Exe {
        return run_program(&out_path);
    }
    0
}

fn report(e: &CompileError, dev_debug: bool) {
    eprintln!("Error {}", e);
    if dev_debug {
        eprintln!("{:#?}", e);
    }
}

fn run_program(path: &Path) -> i32 {
    match process::Command::new(path).status() {
        Ok(status) => status.code().unwrap_or(ErrorCode::Unknown.value()),
        Err(e) => {
            eprintln!("Error running '{}': {}", path.display(), e);
            ErrorCode::Unknown.value()
        }
    }
}

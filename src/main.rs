use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use btype::{compiler::compiler::compile, display_error, errors::errors::Error, init_tracing, Session, Target};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "btype")]
#[command(about = "Compile a btype module to JavaScript, asm.js or LLVM IR", long_about = None)]
struct Cli {
    /// Root module of the program
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Output flavour
    #[arg(short, long, value_enum, default_value = "js")]
    target: Target,

    /// Output file, defaults to the input with the target's extension
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Name of the emitted module, defaults to the input file stem
    #[arg(short, long)]
    module_name: Option<String>,

    /// Parse and verify the emitted LLVM IR in-process
    #[cfg(feature = "llvm")]
    #[arg(long)]
    verify: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            println!("Wrote {}", output.display());
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprint!("{}", display_error(&error, &failing_source(&error, &cli.file)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<PathBuf, Error> {
    let start = Instant::now();
    let mut session = Session::default();
    let root = session.load(&cli.file)?;
    info!(elapsed = ?start.elapsed(), "modules loaded");

    let name = match &cli.module_name {
        Some(name) => name.clone(),
        None => module_name(&cli.file),
    };

    let compile_start = Instant::now();
    let text = compile(&mut session, &root, cli.target, &name)?;
    info!(elapsed = ?compile_start.elapsed(), target = ?cli.target, "compiled");

    #[cfg(feature = "llvm")]
    if cli.verify && cli.target == Target::Llvmir {
        btype::compiler::llvmir::verify::verify(&text, &name)?;
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.file.with_extension(cli.target.extension()));
    fs::write(&output, text)
        .map_err(|error| Error::internal(format!("cannot write {}: {}", output.display(), error)))?;

    info!(elapsed = ?start.elapsed(), "total");
    Ok(output)
}

/// A JavaScript identifier derived from the file stem.
fn module_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Text of the file an error points into; imported modules report their
/// own path in the span.
fn failing_source(error: &Error, root: &Path) -> String {
    let path = error
        .get_span()
        .map(|span| PathBuf::from(span.start.1.as_str()))
        .filter(|path| path.exists())
        .unwrap_or_else(|| root.to_path_buf());
    fs::read_to_string(path).unwrap_or_default()
}

//! # Cli
//!
//! CLI argument surface for `gigglyc`, mirroring the reference driver's
//! `src/bin/why/cli.rs` split between top-level flags and the build subcommand's own
//! arguments.

use std::path::PathBuf;

use clap::Parser;

/// Struct containing the CLI configuration for `gigglyc`.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ahead-of-time compiler for GigglyCode")]
pub struct Cli {
    /// Entry source file. Its directory is walked for the rest of the module graph,
    /// and `main.gc` at the entry position is special-cased per the name-mangling rule.
    #[arg(index = 1)]
    pub file: PathBuf,

    /// Path to the output binary. Defaults to the entry file's stem.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the token stream lexed from each compiled file.
    #[arg(long)]
    pub dump_tokens: bool,

    /// Print the parsed AST of each compiled file.
    #[arg(long)]
    pub dump_ast: bool,

    /// Keep the emitted `.ll` module on disk instead of invoking the system linker.
    #[arg(long)]
    pub emit_llvm: bool,

    /// Ignore the persisted build record and recompile every file.
    #[arg(long)]
    pub no_cache: bool,

    /// Increase logging verbosity: unset is errors only, `-v` adds warnings, up to
    /// `-vvvv` for trace-level output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }

    pub fn log_level(&self) -> log::Level {
        match self.verbose {
            0 => log::Level::Error,
            1 => log::Level::Warn,
            2 => log::Level::Info,
            3 => log::Level::Debug,
            _ => log::Level::Trace,
        }
    }
}

//! # gigglyc
//!
//! Driver binary for the GigglyCode compiler: reads the entry file, walks its
//! directory for the rest of the build-record cache, drives `giggly_core`'s
//! lex/parse/compile pipeline through to an `inkwell` module, and shells out to the
//! system `cc` to assemble and link the result — the same split of responsibility the
//! reference driver (`src/bin/why/main.rs`, `src/compiler/mod.rs::compile_nasm`/
//! `link_program`) keeps between "the library does codegen, the binary does I/O and
//! process plumbing".

mod build_record;
mod cli;
mod diagnostics_render;
mod driver;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context as _};
use log::{debug, error, info, warn};

use giggly_core::diagnostics::{Diagnostic, DiagnosticKind};
use giggly_core::emitter::Backend;
use giggly_core::environment::Environment;
use giggly_core::lexer::Lexer;
use giggly_core::module_loader::Loader;
use giggly_core::parser::{self, ast::TopLevelStatement};

use build_record::BuildRecord;
use cli::Cli;
use driver::SequentialCoordinator;

fn main() -> anyhow::Result<()> {
    let args = Cli::init();
    simple_logger::init_with_level(args.log_level()).context("failed to initialize logger")?;

    let entry_file = fs::canonicalize(&args.file).with_context(|| format!("cannot find '{}'", args.file.display()))?;
    let root_dir = entry_file.parent().unwrap_or(Path::new(".")).to_path_buf();
    let relative_path = relative_entry_path(&entry_file, &root_dir);

    info!("building '{}' (root {})", relative_path, root_dir.display());

    let mut build_record = if args.no_cache { BuildRecord::default() } else { BuildRecord::load(&root_dir) };

    // A directory walk surfaces every `.gc` file under the root so the build record
    // can report staleness for files the import graph hasn't reached yet this run;
    // only files actually reachable from `entry_file` are ever compiled.
    for file in build_record::collect_gc_files(&root_dir) {
        if file == entry_file {
            continue;
        }
        let rel = relative_entry_path(&file, &root_dir);
        if let Ok(source) = fs::read_to_string(&file) {
            let hash = build_record::hash_contents(&source);
            if build_record.is_uptodate(&rel, &hash) {
                debug!("'{rel}' unchanged, build record marks it up to date");
            } else {
                debug!("'{rel}' changed or new, will recompile on first import");
                if let Some(entry) = build_record.files.get_mut(&rel) {
                    entry.uptodate = false;
                }
            }
        }
    }

    let source = fs::read_to_string(&entry_file).with_context(|| format!("cannot read '{}'", entry_file.display()))?;
    let hash = build_record::hash_contents(&source);

    let tokens = Lexer::new(&source)
        .lex()
        .map_err(|e| Diagnostic::new(relative_path.clone(), source.clone(), e.span.clone(), DiagnosticKind::Syntax))?;
    if args.dump_tokens {
        info!("tokens for '{relative_path}':\n{tokens:#?}");
    }

    let program = parser::parse(tokens)
        .map_err(|e| Diagnostic::new(relative_path.clone(), source.clone(), e.span.clone(), DiagnosticKind::Syntax))?;
    if args.dump_ast {
        info!("AST for '{relative_path}':\n{program:#?}");
    }

    let context = inkwell::context::Context::create();
    let module_name = entry_file.file_stem().and_then(|s| s.to_str()).unwrap_or("gigglycode");
    let backend = Backend::new(&context, module_name);
    let root_env = Environment::root();
    giggly_core::bootstrap(&backend, &root_env).map_err(render_and_exit)?;

    let coordinator = SequentialCoordinator::default();
    let loader = Loader::new(root_dir.clone(), &coordinator);
    giggly_core::compile_program(&backend, &root_env, &program, &relative_path, &loader).map_err(render_and_exit)?;

    let (functions, structs) = toplevel_names(&program);
    build_record.record_compiled(&relative_path, hash, functions, structs, Vec::new(), Vec::new());
    if let Err(e) = build_record.save(&root_dir) {
        warn!("failed to persist build record: {e}");
    }

    let output = args.output.clone().unwrap_or_else(|| PathBuf::from(module_name));
    let ir_path = output.with_extension("ll");
    fs::write(&ir_path, backend.module.print_to_string().to_string()).with_context(|| format!("cannot write '{}'", ir_path.display()))?;
    info!("wrote LLVM IR to '{}'", ir_path.display());

    if args.emit_llvm {
        return Ok(());
    }

    assemble_and_link(&backend, &output)?;
    Ok(())
}

fn relative_entry_path(file: &Path, root_dir: &Path) -> String {
    file.strip_prefix(root_dir)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

fn toplevel_names(program: &giggly_core::parser::ast::Program) -> (Vec<String>, Vec<String>) {
    let mut functions = Vec::new();
    let mut structs = Vec::new();
    for stmt in &program.statements {
        match stmt {
            TopLevelStatement::Function(f) => functions.push(f.name.clone()),
            TopLevelStatement::Struct(s) => structs.push(s.name.clone()),
            TopLevelStatement::Import(_) | TopLevelStatement::Constant(_) => {}
        }
    }
    (functions, structs)
}

fn render_and_exit(diagnostic: Diagnostic) -> anyhow::Error {
    diagnostics_render::render(&diagnostic);
    anyhow::anyhow!("compilation failed: {}", diagnostic.message())
}

/// Emits an object file via `inkwell`'s target machine and links it into `output`
/// with the system `cc`, the same two-step split as the reference's
/// `compile_nasm`/`link_program` (assemble, then invoke an external linker driver).
fn assemble_and_link(backend: &Backend<'_>, output: &Path) -> anyhow::Result<()> {
    use inkwell::targets::{CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine};
    use inkwell::OptimizationLevel;

    Target::initialize_native(&InitializationConfig::default()).map_err(|e| anyhow::anyhow!("failed to initialize native target: {e}"))?;

    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple).map_err(|e| anyhow::anyhow!("unsupported target: {e}"))?;
    let Some(target_machine) = target.create_target_machine(&triple, "generic", "", OptimizationLevel::Default, RelocMode::PIC, CodeModel::Default) else {
        bail!("failed to create a target machine for '{}'", triple);
    };

    let object_path = output.with_extension("o");
    target_machine
        .write_to_file(&backend.module, FileType::Object, &object_path)
        .map_err(|e| anyhow::anyhow!("failed to write object file: {e}"))?;
    info!("assembled '{}'", object_path.display());

    info!("linking '{}'...", output.display());
    let link_result = Command::new("cc").args(["-o", &output.to_string_lossy(), &object_path.to_string_lossy()]).output();
    match link_result {
        Ok(result) if result.status.success() => {
            info!("wrote '{}'", output.display());
            Ok(())
        }
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            error!("{stderr}");
            bail!("linking failed, object file left at '{}'", object_path.display());
        }
        Err(e) => {
            warn!("no system 'cc' available ({e}); object file left at '{}'", object_path.display());
            Ok(())
        }
    }
}

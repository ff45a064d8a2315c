//! # Module Loader
//!
//! Resolves `import "path/to/file.gc";` into a nested [`ModuleRecord`] scope holding
//! that file's compiled top-level declarations. The whole transitive import graph
//! compiles into the one [`Backend`] module the entry file started with — there is
//! no separate-object linking step to coordinate, so `import` grafts real, already
//!-emitted declarations rather than link-time-only externs (see `DESIGN.md`).
//!
//! Synchronization with the rest of a (possibly parallel) multi-file build goes
//! through the [`FileCoordinator`] trait, which the driver implements over its
//! shared file tree; diamond imports (`A` and `B` both importing `C`) are further
//! guarded against double-compilation by a loader-local cache keyed on the
//! resolved file path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::diagnostics::{CoreResult, Diagnostic, DiagnosticKind};
use crate::emitter::Backend;
use crate::environment::{Environment, GenericFunctionTemplate, GenericStructTemplate, ModuleRecord, Record};
use crate::lexer::Lexer;
use crate::parser::{self, ast::{ImportStatement, TopLevelStatement}};
use crate::registry::Type;

/// Coordinates compilation order across the files a multi-file build touches.
/// Implemented by the driver over a shared, lock-protected file tree; the core
/// itself never spawns threads or owns the tree, it only waits on it.
pub trait FileCoordinator {
    /// Claims `path` for compilation. Returns `true` if this call is the first to
    /// see it (the caller is now responsible for compiling it), `false` if another
    /// worker already owns it and the caller should only wait.
    fn register(&self, path: &Path) -> bool;

    /// Busy-waits until `path`'s compilation record is marked finished.
    fn wait_until_compiled(&self, path: &Path);
}

/// Coordinator for single-process, single-threaded builds: every file is
/// considered compiled the instant it is registered, so `load_import` never
/// actually blocks. The CLI driver's directory walker supplies a real
/// lock-and-poll implementation over its on-disk build record instead.
pub struct NoopCoordinator;

impl FileCoordinator for NoopCoordinator {
    fn register(&self, _path: &Path) -> bool {
        true
    }

    fn wait_until_compiled(&self, _path: &Path) {}
}

pub struct Loader<'a, 'ctx> {
    pub root_dir: PathBuf,
    pub coordinator: &'a dyn FileCoordinator,
    loaded: RefCell<HashMap<PathBuf, Environment<'ctx>>>,
}

impl<'a, 'ctx> Loader<'a, 'ctx> {
    pub fn new(root_dir: PathBuf, coordinator: &'a dyn FileCoordinator) -> Self {
        Loader {
            root_dir,
            coordinator,
            loaded: RefCell::new(HashMap::new()),
        }
    }
}

pub fn load_import<'ctx>(
    backend: &Backend<'ctx>,
    importer_env: &Environment<'ctx>,
    root_env: &Environment<'ctx>,
    import: &ImportStatement,
    loader: &Loader<'_, 'ctx>,
) -> CoreResult<()> {
    let target = loader.root_dir.join(&import.path);

    let module_env = if let Some(existing) = loader.loaded.borrow().get(&target) {
        existing.clone()
    } else {
        loader.coordinator.register(&target);
        loader.coordinator.wait_until_compiled(&target);

        let source = std::fs::read_to_string(&target).map_err(|e| {
            Diagnostic::new(
                import.path.clone(),
                String::new(),
                import.span.clone(),
                DiagnosticKind::NotDefined {
                    name: format!("module '{}' ({e})", import.path),
                },
            )
        })?;

        let module_env = root_env.child();
        // Insert before compiling so a dependency cycle resolves to the
        // (partially populated, but same) scope rather than recursing forever.
        loader.loaded.borrow_mut().insert(target.clone(), module_env.clone());
        compile_module_source(backend, &module_env, root_env, &source, &import.path, loader)?;
        module_env
    };

    let name = import.alias.clone().unwrap_or_else(|| default_alias(&import.path));
    importer_env.add(
        &name,
        Record::Module(Rc::new(ModuleRecord {
            path: import.path.clone(),
            scope: module_env,
        })),
    );
    Ok(())
}

fn default_alias(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).trim_end_matches(".gc").replace('.', "_")
}

/// Lexes, parses, and fully compiles a dependency's top-level declarations into
/// `module_env`, recursing into its own imports so transitive symbols are
/// reachable through nested module lookups.
fn compile_module_source<'ctx>(
    backend: &Backend<'ctx>,
    module_env: &Environment<'ctx>,
    root_env: &Environment<'ctx>,
    source: &str,
    relative_path: &str,
    loader: &Loader<'_, 'ctx>,
) -> CoreResult<()> {
    let tokens = Lexer::new(source)
        .lex()
        .map_err(|e| Diagnostic::new(relative_path.to_string(), source.to_string(), e.span.clone(), DiagnosticKind::Syntax))?;
    let program = parser::parse(tokens)
        .map_err(|e| Diagnostic::new(relative_path.to_string(), source.to_string(), e.span.clone(), DiagnosticKind::Syntax))?;

    for stmt in &program.statements {
        match stmt {
            TopLevelStatement::Function(f) => {
                if !f.generics.is_empty() {
                    module_env.add(
                        &f.name,
                        Record::GenericFunctionTemplate(Rc::new(GenericFunctionTemplate {
                            name: crate::mangle_function_name(relative_path, &f.name),
                            type_params: f.generics.clone(),
                            node: f.clone(),
                            closure: module_env.clone(),
                            instances: RefCell::new(HashMap::new()),
                        })),
                    );
                    continue;
                }
                let mangled = crate::mangle_function_name(relative_path, &f.name);
                let record = crate::declare_function_record(backend, module_env, f, mangled, None)?;
                module_env.add(&f.name, Record::Function(record.clone()));
                crate::compile_function_body(backend, module_env, f, &record)?;
            }
            TopLevelStatement::Struct(s) => {
                if !s.generics.is_empty() {
                    module_env.add(
                        &s.name,
                        Record::GenericStructTemplate(Rc::new(GenericStructTemplate {
                            name: s.name.clone(),
                            type_params: s.generics.clone(),
                            node: s.clone(),
                            closure: module_env.clone(),
                            instances: RefCell::new(HashMap::new()),
                        })),
                    );
                    continue;
                }
                crate::build_struct(backend, module_env, module_env, s, s.name.clone(), Vec::<Type>::new())?;
            }
            TopLevelStatement::Import(nested) => {
                load_import(backend, module_env, root_env, nested, loader)?;
            }
            TopLevelStatement::Constant(_) => {
                // A dependency's top-level constants stay private to its own file;
                // only functions and structs are grafted into the importer's view.
            }
        }
    }
    Ok(())
}

//! End-to-end scenarios from spec.md's testable-properties section: lex, parse, and
//! run the full semantic/IR-generation pipeline over small source snippets, then
//! assert on the shape of the resulting LLVM module rather than on intermediate
//! resolver state.

use std::path::PathBuf;

use inkwell::context::Context;
use pretty_assertions::assert_eq;

use giggly_core::diagnostics::{CoreResult, DiagnosticKind};
use giggly_core::emitter::Backend;
use giggly_core::environment::Environment;
use giggly_core::lexer::Lexer;
use giggly_core::module_loader::{Loader, NoopCoordinator};
use giggly_core::parser;

/// Lexes, parses, and compiles `source` as `relative_path` into a fresh module,
/// returning whatever diagnostic the pipeline produced rather than panicking, so a
/// test can assert on a *rejected* program as well as an accepted one.
fn try_compile<'ctx>(context: &'ctx Context, root_dir: PathBuf, relative_path: &str, source: &str) -> CoreResult<Backend<'ctx>> {
    let tokens = Lexer::new(source).lex().map_err(|e| {
        giggly_core::diagnostics::Diagnostic::new(relative_path.to_string(), source.to_string(), e.span.clone(), DiagnosticKind::Syntax)
    })?;
    let program = parser::parse(tokens).map_err(|e| {
        giggly_core::diagnostics::Diagnostic::new(relative_path.to_string(), source.to_string(), e.span.clone(), DiagnosticKind::Syntax)
    })?;

    let backend = Backend::new(context, relative_path);
    let root_env = Environment::root();
    giggly_core::bootstrap(&backend, &root_env)?;

    let coordinator = NoopCoordinator;
    let loader = Loader::new(root_dir, &coordinator);
    giggly_core::compile_program(&backend, &root_env, &program, relative_path, &loader)?;
    Ok(backend)
}

/// Lexes, parses, and compiles `source` as `relative_path` into a fresh module,
/// returning the backend so the caller can inspect the emitted `inkwell::Module`.
/// Panics (via `expect`) on any lex/parse/compile failure, which is exactly the
/// behavior a passing test needs: the source snippets below are expected to compile
/// cleanly.
fn compile<'ctx>(context: &'ctx Context, root_dir: PathBuf, relative_path: &str, source: &str) -> Backend<'ctx> {
    try_compile(context, root_dir, relative_path, source).expect("compile")
}

fn has_terminator(backend: &Backend, fn_name: &str) -> bool {
    backend
        .module
        .get_function(fn_name)
        .and_then(|f| f.get_last_basic_block())
        .and_then(|bb| bb.get_terminator())
        .is_some()
}

#[test]
fn integer_arithmetic_and_return() {
    let context = Context::create();
    let backend = compile(
        &context,
        PathBuf::from("."),
        "main.gc",
        "def main() -> int { return 2 + 3 * 4; }",
    );

    assert!(has_terminator(&backend, "main"));
    let ir = backend.module.print_to_string().to_string();
    // LLVM's IRBuilder folds a pure-literal expression into a single constant at
    // build time; `2 + 3 * 4` should reach the `ret` as a bare `14`, not a chain of
    // `add`/`mul` instructions.
    assert!(ir.contains("ret i64 14"), "expected a folded constant return, got:\n{ir}");
}

#[test]
fn implicit_widening_inserts_a_sign_extend() {
    let context = Context::create();
    let backend = compile(
        &context,
        PathBuf::from("."),
        "main.gc",
        "def main() -> int { x: int32 = 1; y: int = 2; z: int = x + y; return z; }",
    );

    assert!(has_terminator(&backend, "main"));
    let ir = backend.module.print_to_string().to_string();
    assert!(ir.contains("sext i32"), "expected an int32 -> int64 sext, got:\n{ir}");
}

#[test]
fn generic_function_instantiates_for_its_call_site_type() {
    let context = Context::create();
    let backend = compile(
        &context,
        PathBuf::from("."),
        "main.gc",
        "@generic(T: Any) def id(x: T) -> T { return x; } def main() -> int { return id(7); }",
    );

    assert!(has_terminator(&backend, "main"));
    let instantiated = backend
        .module
        .get_functions()
        .any(|f| f.get_name().to_string_lossy().contains("id__int"));
    assert!(instantiated, "expected an 'id' instantiation mangled with 'int' in its name");
}

#[test]
fn struct_with_index_overload_compiles_its_methods() {
    let source = r#"
        struct Buffer {
            data: raw_array[int];
            length: int;

            def __init__(self: Buffer, n: int) {
                self.data = new raw_array(int, n);
                self.length = n;
            }

            def __index__(self: Buffer, i: int) -> int {
                return self.data[i];
            }
        }

        def main() -> int {
            b: Buffer = new Buffer(4);
            b.data[3] = 99;
            return b[3];
        }
    "#;
    let context = Context::create();
    let backend = compile(&context, PathBuf::from("."), "main.gc", source);

    assert!(backend.module.get_function("Buffer.__init__").is_some());
    assert!(backend.module.get_function("Buffer.__index__").is_some());
    assert!(has_terminator(&backend, "main"));
}

#[test]
fn constructor_call_with_wrong_arity_reports_no_overload_instead_of_panicking() {
    let source = r#"
        struct Buffer {
            data: raw_array[int];
            length: int;

            def __init__(self: Buffer, n: int) {
                self.data = new raw_array(int, n);
                self.length = n;
            }
        }

        def main() -> int {
            b: Buffer = new Buffer(1, 2, 3);
            return 0;
        }
    "#;
    let context = Context::create();
    let err = try_compile(&context, PathBuf::from("."), "main.gc", source).expect_err("too many constructor arguments should be rejected");
    assert!(
        matches!(err.kind, DiagnosticKind::NoOverload { .. }),
        "expected a NoOverload diagnostic, got: {:?}",
        err.kind
    );
}

/// The built-in `array[T]` wrapper's public contract per spec.md §4.1: a `len: int`
/// field (not a `len()` accessor), and an `__index__` that bounds-checks against it
/// rather than forwarding straight through to the unchecked `raw_array[T]` backing.
#[test]
fn builtin_array_struct_has_a_len_field_and_bounds_checks_index() {
    let source = r#"
        def main() -> int {
            d: raw_array[int] = new raw_array(int, 3);
            a: array[int] = array(int, d, 3);
            return a.len + a[0];
        }
    "#;
    let context = Context::create();
    let backend = compile(&context, PathBuf::from("."), "main.gc", source);

    assert!(has_terminator(&backend, "main"));
    assert!(backend.module.get_function("array__int.__index__").is_some());

    let ir = backend.module.print_to_string().to_string();
    assert!(ir.contains("@exit"), "expected __index__ to call exit(1) on an out-of-bounds index, got:\n{ir}");
    assert!(ir.contains("@puts"), "expected __index__ to print a diagnostic before exiting, got:\n{ir}");
}

#[test]
fn break_depth_targets_outer_loop() {
    let source = r#"
        def main() -> int {
            i: int = 0;
            while i < 3 {
                j: int = 0;
                while j < 3 {
                    break 1;
                    j = j + 1;
                }
                i = i + 1;
            }
            return i;
        }
    "#;
    let context = Context::create();
    let backend = compile(&context, PathBuf::from("."), "main.gc", source);

    assert!(has_terminator(&backend, "main"));
    let ir = backend.module.print_to_string().to_string();
    // The outer loop's continuation block is named `while.cont`; the inner one gets
    // a disambiguating numeric suffix from LLVM's block-name uniquing. `break 1` in
    // the inner body must jump straight to the outer continuation, not its own.
    assert!(ir.contains("while.cont:"), "expected an outer loop continuation block:\n{ir}");
    assert!(
        ir.contains("br label %while.cont\n"),
        "expected an unconditional branch to the outer loop's continuation, got:\n{ir}"
    );
}

#[test]
fn generic_instantiation_is_memoized_across_call_sites() {
    let context = Context::create();
    let backend = compile(
        &context,
        PathBuf::from("."),
        "main.gc",
        "@generic(T: Any) def id(x: T) -> T { return x; } def main() -> int { return id(7) + id(3); }",
    );

    assert!(has_terminator(&backend, "main"));
    // Two call sites instantiate `id` at the same argument type (`int`); the
    // template's instance cache must hand back the same record both times rather
    // than emitting a second `id__int` definition.
    let instantiations = backend
        .module
        .get_functions()
        .filter(|f| f.get_name().to_string_lossy().contains("id__int"))
        .count();
    assert_eq!(instantiations, 1, "expected exactly one memoized 'id__int' instantiation");
}

#[test]
fn module_import_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.gc"), "def f() -> int { return 9; }").expect("write a.gc");

    let context = Context::create();
    let backend = compile(
        &context,
        dir.path().to_path_buf(),
        "main.gc",
        r#"import "a.gc"; def main() -> int { return a.f(); }"#,
    );

    assert!(backend.module.get_function("a..f").is_some());
    assert!(has_terminator(&backend, "main"));
}

//! # giggly_core
//!
//! The semantic/IR-generation core of the GigglyCode AOT compiler: lexer, parser,
//! type registry, environment, resolver, overload/conversion engine, generic
//! instantiator, and statement compiler all live under this crate; this file is the
//! seam where they meet — struct/function declaration, the bootstrap C runtime
//! surface, and the top-level per-file compilation driver.
//!
//! The `giggly_cli` binary crate is the only thing that drives this one end to end;
//! everything here is organized so a different front end (a language server, a test
//! harness) could drive the same pipeline without going through a process boundary.

pub mod diagnostics;
pub mod emitter;
pub mod environment;
pub mod generics;
pub mod lexer;
pub mod module_loader;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod statements;
pub mod types;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::AddressSpace;

use diagnostics::{CoreResult, Diagnostic, DiagnosticKind};
use emitter::Backend;
use environment::{Environment, FunctionRecord, GenericFunctionTemplate, GenericStructTemplate, ModuleRecord, Record, StructRecord, VariableRecord};
use parser::ast::{FunctionStatement, Program, StructStatement, TopLevelStatement, VariableDeclaration};
use registry::{Primitive, Type};
use statements::{Flow, StmtCtx};

/// The mangled symbol a function's declared name maps to. `main.gc`'s `main` is left
/// bare so the platform C runtime finds the entry point it expects; every other
/// function gets its enclosing file's path folded into the name so two files can
/// each define a function of the same source-level name without colliding at the
/// LLVM level.
pub fn mangle_function_name(relative_path: &str, fn_name: &str) -> String {
    if relative_path == "main.gc" && fn_name == "main" {
        return "main".to_string();
    }
    let prefix = relative_path.trim_end_matches(".gc").replace(['/', '\\'], "..");
    format!("{prefix}..{fn_name}")
}

/// Declares a function's LLVM signature and wraps it in a [`FunctionRecord`] without
/// emitting a body. `self_param`, when given, is always passed by address regardless
/// of how the struct itself would otherwise be passed — every method's receiver slot
/// is a pointer.
pub(crate) fn declare_function_record<'ctx>(
    backend: &Backend<'ctx>,
    env: &Environment<'ctx>,
    node: &FunctionStatement,
    mangled: String,
    self_param: Option<Type>,
) -> CoreResult<Rc<FunctionRecord<'ctx>>> {
    let mut params: Vec<(String, Type, bool)> = Vec::with_capacity(node.params.len() + 1);
    let mut metadata_types: Vec<BasicMetadataTypeEnum> = Vec::with_capacity(params.capacity());

    if let Some(self_ty) = self_param {
        params.push(("self".to_string(), self_ty, true));
        metadata_types.push(backend.ptr_type().into());
    }
    for p in &node.params {
        let ty = resolver::resolve_type(env, backend, &p.type_name)?;
        let llvm_ty = if p.by_reference {
            backend.ptr_type().into()
        } else {
            backend.metadata_type(&ty)
        };
        params.push((p.name.clone(), ty, p.by_reference));
        metadata_types.push(llvm_ty);
    }

    let return_type = match &node.return_type {
        Some(tn) => resolver::resolve_type(env, backend, tn)?,
        None => Type::Primitive(Primitive::Void),
    };
    let fn_type = backend.fn_type(&return_type, &metadata_types, node.variadic);
    let function = backend.declare_function(&mangled, fn_type);

    Ok(Rc::new(FunctionRecord {
        name: node.name.clone(),
        mangled,
        function,
        params,
        return_type,
        autocast: node.autocast,
        variadic: node.variadic,
    }))
}

/// Emits a function's body into the block already declared for `record.function`.
/// Called exactly once per concrete [`FunctionRecord`] — a second call would append a
/// second `entry` block to the same `FunctionValue`, so every caller (top-level
/// declaration, the generic instantiator, the module loader) routes through the
/// forward-declare-then-define pattern to guarantee that.
pub(crate) fn compile_function_body<'ctx>(
    backend: &Backend<'ctx>,
    env: &Environment<'ctx>,
    node: &FunctionStatement,
    record: &Rc<FunctionRecord<'ctx>>,
) -> CoreResult<()> {
    let entry = backend.context.append_basic_block(record.function, "entry");
    backend.builder.position_at_end(entry);
    let fn_env = env.child();

    for (i, (name, ty, by_ref)) in record.params.iter().enumerate() {
        let llvm_param = record
            .function
            .get_nth_param(i as u32)
            .expect("declared parameter count matches the function's own fn_type");
        let address = if *by_ref {
            llvm_param.into_pointer_value()
        } else {
            let slot = backend.emit_alloca(ty, name);
            backend.emit_volatile_store(slot, llvm_param, false);
            slot
        };
        fn_env.declare_exclusive(
            name,
            Record::Variable(Rc::new(VariableRecord {
                name: name.clone(),
                address,
                ty: ty.clone(),
                volatile: false,
            })),
        );
    }

    let stmt_ctx = StmtCtx {
        backend,
        env: fn_env,
        return_type: record.return_type.clone(),
        function: record.function,
    };
    let flow = statements::compile_block(&stmt_ctx, &node.body)?;
    if flow == Flow::Normal {
        if record.return_type == Type::Primitive(Primitive::Void) {
            backend.builder.build_return(None).expect("implicit void return");
        } else {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                node.span.clone(),
                DiagnosticKind::WrongType {
                    expected: vec![record.return_type.to_string()],
                    actual: "a code path that falls off the end of the function without returning".to_string(),
                },
            ));
        }
    }
    Ok(())
}

/// Resolves field types, declares the LLVM struct body, and registers an empty-method
/// [`StructRecord`] into `register_env`. Separated from [`compile_struct_methods`] so
/// a self-referential generic struct (a method that builds another instance of its
/// own template) can find its own record already registered before its methods
/// compile, the same forward-declare-then-define discipline functions use.
pub(crate) fn declare_struct_skeleton<'ctx>(
    backend: &Backend<'ctx>,
    resolve_env: &Environment<'ctx>,
    register_env: &Environment<'ctx>,
    node: &StructStatement,
    mangled_name: String,
    generics: Vec<Type>,
) -> CoreResult<Rc<StructRecord<'ctx>>> {
    let mut fields = Vec::with_capacity(node.fields.len());
    for (fname, ftype) in &node.fields {
        fields.push((fname.clone(), resolver::resolve_type(resolve_env, backend, ftype)?));
    }
    let field_llvm: Vec<BasicTypeEnum> = fields.iter().map(|(_, t)| backend.get_llvm_type(t)).collect();
    let llvm_struct = backend.declare_struct_body(&mangled_name, &generics, &field_llvm);

    let record = Rc::new(StructRecord {
        name: mangled_name.clone(),
        generics,
        fields: RefCell::new(fields),
        methods: RefCell::new(HashMap::new()),
        llvm_type: RefCell::new(Some(llvm_struct)),
    });
    register_env.add(&mangled_name, Record::Struct(record.clone()));
    Ok(record)
}

/// Declares and compiles every method on an already-skeletoned struct. A struct
/// method's own generic parameters are not supported — parametrize the struct itself
/// and every method inherits the binding from `self`.
pub(crate) fn compile_struct_methods<'ctx>(
    backend: &Backend<'ctx>,
    resolve_env: &Environment<'ctx>,
    node: &StructStatement,
    record: &Rc<StructRecord<'ctx>>,
) -> CoreResult<()> {
    let self_ty = Type::Struct {
        name: record.name.clone(),
        generics: record.generics.clone(),
    };
    for method in &node.methods {
        if !method.generics.is_empty() {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                method.span.clone(),
                DiagnosticKind::Internal {
                    detail: format!("method '{}' may not itself be generic; parametrize the struct instead", method.name),
                },
            ));
        }
        let method_mangled = format!("{}.{}", record.name, method.name);
        let fn_record = declare_function_record(backend, resolve_env, method, method_mangled, Some(self_ty.clone()))?;
        record.add_method(&method.name, fn_record.clone());
        compile_function_body(backend, resolve_env, method, &fn_record)?;
    }
    Ok(())
}

/// Convenience combinator for call sites that have no forward-reference concerns of
/// their own (a grafted import, a one-shot generic instantiation driven entirely by
/// [`declare_struct_skeleton`]'s own pre-registration): skeleton then methods, in one
/// call.
pub(crate) fn build_struct<'ctx>(
    backend: &Backend<'ctx>,
    resolve_env: &Environment<'ctx>,
    register_env: &Environment<'ctx>,
    node: &StructStatement,
    mangled_name: String,
    generics: Vec<Type>,
) -> CoreResult<Rc<StructRecord<'ctx>>> {
    let record = declare_struct_skeleton(backend, resolve_env, register_env, node, mangled_name, generics)?;
    compile_struct_methods(backend, resolve_env, node, &record)?;
    Ok(record)
}

/// Finalizes every non-generic struct declared at one file's top level, in as many
/// rounds as needed for forward references between them to resolve: a field whose
/// type is another local struct that hasn't been given an LLVM body yet defers that
/// struct to a later round rather than baking in a premature pointer fallback (see
/// [`Backend::get_llvm_type`]'s fallback behavior, which would otherwise get cached
/// under the wrong shape).
fn finalize_structs<'ctx>(backend: &Backend<'ctx>, env: &Environment<'ctx>, pending: &[(&StructStatement, Rc<StructRecord<'ctx>>)]) -> CoreResult<()> {
    let mut remaining = pending.len();
    while remaining > 0 {
        let mut progressed = false;
        for (node, record) in pending {
            if record.llvm_type.borrow().is_some() {
                continue;
            }
            let mut fields = Vec::with_capacity(node.fields.len());
            let mut blocked = false;
            for (fname, ftype) in &node.fields {
                let ty = resolver::resolve_type(env, backend, ftype)?;
                if let Type::Struct { name, .. } = &ty {
                    if name != &record.name {
                        if let Some(dep) = env.struct_record(name) {
                            if dep.llvm_type.borrow().is_none() {
                                blocked = true;
                                break;
                            }
                        }
                    }
                }
                fields.push((fname.clone(), ty));
            }
            if blocked {
                continue;
            }
            let field_llvm: Vec<BasicTypeEnum> = fields.iter().map(|(_, t)| backend.get_llvm_type(t)).collect();
            let llvm_struct = backend.declare_struct_body(&record.name, &record.generics, &field_llvm);
            *record.fields.borrow_mut() = fields;
            *record.llvm_type.borrow_mut() = Some(llvm_struct);
            progressed = true;
            remaining -= 1;
        }
        if !progressed {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                lexer::Span::default(),
                DiagnosticKind::Internal {
                    detail: "cyclic by-value struct field dependency".to_string(),
                },
            ));
        }
    }
    Ok(())
}

/// Top-level constants support only literal initializers; anything else would need a
/// static initializer function LLVM has no direct concept of, which this language's
/// module model doesn't provide a hook to run.
fn register_toplevel_constant<'ctx>(backend: &Backend<'ctx>, env: &Environment<'ctx>, decl: &VariableDeclaration) -> CoreResult<()> {
    use parser::ast::Expression;
    let (ty, global) = match &decl.value {
        Expression::Integer(v, _) => {
            let ty = Type::Primitive(Primitive::Int64);
            let llvm_ty = backend.get_llvm_type(&ty).into_int_type();
            let global = backend.module.add_global(llvm_ty, Some(AddressSpace::default()), &decl.name);
            global.set_initializer(&llvm_ty.const_int(*v as u64, true));
            (ty, global)
        }
        Expression::Float(v, _) => {
            let ty = Type::Primitive(Primitive::Float64);
            let llvm_ty = backend.get_llvm_type(&ty).into_float_type();
            let global = backend.module.add_global(llvm_ty, Some(AddressSpace::default()), &decl.name);
            global.set_initializer(&llvm_ty.const_float(*v));
            (ty, global)
        }
        Expression::Boolean(v, _) => {
            let ty = Type::Primitive(Primitive::Bool);
            let llvm_ty = backend.get_llvm_type(&ty).into_int_type();
            let global = backend.module.add_global(llvm_ty, Some(AddressSpace::default()), &decl.name);
            global.set_initializer(&llvm_ty.const_int(*v as u64, false));
            (ty, global)
        }
        Expression::Str(s, _) => {
            let ty = Type::Primitive(Primitive::StrPointer);
            let global = backend.builder.build_global_string_ptr(s, &decl.name).expect("global string constant");
            env.declare_exclusive(
                &decl.name,
                Record::Variable(Rc::new(VariableRecord {
                    name: decl.name.clone(),
                    address: global.as_pointer_value(),
                    ty,
                    volatile: false,
                })),
            );
            return Ok(());
        }
        _ => {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                decl.span.clone(),
                DiagnosticKind::Unimplemented {
                    feature: "top-level constants with a non-literal initializer".to_string(),
                },
            ))
        }
    };
    env.declare_exclusive(
        &decl.name,
        Record::Variable(Rc::new(VariableRecord {
            name: decl.name.clone(),
            address: global.as_pointer_value(),
            ty,
            volatile: false,
        })),
    );
    Ok(())
}

/// Compiles one already-parsed source file's top-level declarations into `env`,
/// resolving its own `import`s first. `relative_path` feeds the name-mangling scheme
/// and is typically the file's path relative to the project root (`main.gc` for the
/// entry file).
pub fn compile_program<'ctx>(
    backend: &Backend<'ctx>,
    env: &Environment<'ctx>,
    program: &Program,
    relative_path: &str,
    loader: &module_loader::Loader<'_, 'ctx>,
) -> CoreResult<()> {
    for stmt in &program.statements {
        if let TopLevelStatement::Import(import) = stmt {
            module_loader::load_import(backend, env, env, import, loader)?;
        }
    }

    let mut struct_skeletons: Vec<(&StructStatement, Rc<StructRecord<'ctx>>)> = Vec::new();
    for stmt in &program.statements {
        if let TopLevelStatement::Struct(s) = stmt {
            if s.generics.is_empty() {
                let record = Rc::new(StructRecord {
                    name: s.name.clone(),
                    generics: Vec::new(),
                    fields: RefCell::new(Vec::new()),
                    methods: RefCell::new(HashMap::new()),
                    llvm_type: RefCell::new(None),
                });
                env.add(&s.name, Record::Struct(record.clone()));
                struct_skeletons.push((s, record));
            } else {
                env.add(
                    &s.name,
                    Record::GenericStructTemplate(Rc::new(GenericStructTemplate {
                        name: s.name.clone(),
                        type_params: s.generics.clone(),
                        node: s.clone(),
                        closure: env.clone(),
                        instances: RefCell::new(HashMap::new()),
                    })),
                );
            }
        }
    }
    finalize_structs(backend, env, &struct_skeletons)?;

    let mut pending_functions: Vec<(&FunctionStatement, Rc<FunctionRecord<'ctx>>)> = Vec::new();
    for stmt in &program.statements {
        if let TopLevelStatement::Function(f) = stmt {
            if !f.generics.is_empty() {
                env.add(
                    &f.name,
                    Record::GenericFunctionTemplate(Rc::new(GenericFunctionTemplate {
                        name: mangle_function_name(relative_path, &f.name),
                        type_params: f.generics.clone(),
                        node: f.clone(),
                        closure: env.clone(),
                        instances: RefCell::new(HashMap::new()),
                    })),
                );
                continue;
            }
            let mangled = mangle_function_name(relative_path, &f.name);
            let record = declare_function_record(backend, env, f, mangled, None)?;
            env.add(&f.name, Record::Function(record.clone()));
            pending_functions.push((f, record));
        }
    }

    for (node, record) in &struct_skeletons {
        compile_struct_methods(backend, env, node, record)?;
    }
    for (f, record) in &pending_functions {
        compile_function_body(backend, env, f, record)?;
    }

    for stmt in &program.statements {
        if let TopLevelStatement::Constant(c) = stmt {
            register_toplevel_constant(backend, env, c)?;
        }
    }

    Ok(())
}

/// Declares the fixed C runtime surface every GigglyCode program links against,
/// both as LLVM externs and as ordinary [`Record::Function`] entries so user code
/// calls them through the same overload-resolution path as anything else. Also
/// synthesizes the built-in `array[T]` generic struct by lexing and parsing a literal
/// source snippet and registering it through the ordinary generic-struct pipeline,
/// rather than hand-assembling its `GenericStructTemplate` — one fewer bespoke code
/// path to keep in sync with the language's own struct/generic semantics.
pub fn bootstrap<'ctx>(backend: &Backend<'ctx>, root: &Environment<'ctx>) -> CoreResult<()> {
    declare_c_function(backend, root, "malloc", &[Type::Primitive(Primitive::Int64)], Type::Primitive(Primitive::RawPointer), false);
    declare_c_function(backend, root, "free", &[Type::Primitive(Primitive::RawPointer)], Type::Primitive(Primitive::Void), false);
    declare_c_function(backend, root, "exit", &[Type::Primitive(Primitive::Int32)], Type::Primitive(Primitive::Void), false);
    declare_c_function(backend, root, "printf", &[Type::Primitive(Primitive::StrPointer)], Type::Primitive(Primitive::Int32), true);
    declare_c_function(backend, root, "puts", &[Type::Primitive(Primitive::StrPointer)], Type::Primitive(Primitive::Int32), false);
    declare_c_function(backend, root, "usleep", &[Type::Primitive(Primitive::Uint32)], Type::Primitive(Primitive::Int32), false);
    declare_c_function(
        backend,
        root,
        "memset",
        &[Type::Primitive(Primitive::RawPointer), Type::Primitive(Primitive::Int32), Type::Primitive(Primitive::Int64)],
        Type::Primitive(Primitive::RawPointer),
        false,
    );
    declare_c_function(backend, root, "putchar", &[Type::Primitive(Primitive::Int32)], Type::Primitive(Primitive::Int32), false);

    let math_env = root.child();
    for name in ["sqrt", "pow", "sin", "cos", "tan", "floor", "ceil", "fabs", "log", "exp"] {
        let arity = if name == "pow" { 2 } else { 1 };
        let params = vec![Type::Primitive(Primitive::Float64); arity];
        declare_c_function(backend, &math_env, name, &params, Type::Primitive(Primitive::Float64), false);
    }
    root.add(
        "math",
        Record::Module(Rc::new(ModuleRecord {
            path: "<builtin:math>".to_string(),
            scope: math_env,
        })),
    );

    bootstrap_array_struct(backend, root)?;
    Ok(())
}

fn declare_c_function<'ctx>(backend: &Backend<'ctx>, env: &Environment<'ctx>, name: &str, params: &[Type], return_type: Type, variadic: bool) {
    let metadata_types: Vec<BasicMetadataTypeEnum> = params.iter().map(|t| backend.metadata_type(t)).collect();
    let fn_type = backend.fn_type(&return_type, &metadata_types, variadic);
    let function = backend.declare_function(name, fn_type);
    let record = Rc::new(FunctionRecord {
        name: name.to_string(),
        mangled: name.to_string(),
        function,
        params: params.iter().map(|t| (String::new(), t.clone(), false)).collect(),
        return_type,
        autocast: false,
        variadic,
    });
    env.add(name, Record::Function(record));
}

/// `array[T]` is an ordinary generic struct from the language's own point of view —
/// backed by a `raw_array[T]` buffer plus a `len` field, with an `__index__` method
/// that bounds-checks against it — so it is bootstrapped by lexing this literal
/// snippet once at compiler start and registering the resulting
/// `GenericStructTemplate` exactly as a user-written `@generic struct array[T] { ... }`
/// would be.
fn bootstrap_array_struct<'ctx>(_backend: &Backend<'ctx>, root: &Environment<'ctx>) -> CoreResult<()> {
    const SOURCE: &str = r#"
struct array[T] {
    data: raw_array[T];
    len: int;

    def __init__(self: array[T], data: raw_array[T], length: int) {
        self.data = data;
        self.len = length;
    }

    def __index__(self: array[T], i: int) -> T {
        if i < 0 {
            puts("array index out of bounds");
            exit(1);
        }
        if i >= self.len {
            puts("array index out of bounds");
            exit(1);
        }
        return self.data[i];
    }
}
"#;
    let tokens = lexer::Lexer::new(SOURCE).lex().map_err(|e| {
        Diagnostic::new(
            "<builtin:array>".to_string(),
            SOURCE.to_string(),
            e.span.clone(),
            DiagnosticKind::Internal {
                detail: format!("builtin array[T] snippet failed to lex: {e}"),
            },
        )
    })?;
    let program = parser::parse(tokens).map_err(|e| {
        Diagnostic::new(
            "<builtin:array>".to_string(),
            SOURCE.to_string(),
            e.span.clone(),
            DiagnosticKind::Internal {
                detail: format!("builtin array[T] snippet failed to parse: {e}"),
            },
        )
    })?;
    let TopLevelStatement::Struct(node) = program
        .statements
        .into_iter()
        .next()
        .expect("the builtin array snippet declares exactly one struct")
    else {
        unreachable!("the builtin array snippet's only top-level statement is a struct");
    };
    root.add(
        "array",
        Record::GenericStructTemplate(Rc::new(GenericStructTemplate {
            name: "array".to_string(),
            type_params: node.generics.clone(),
            node,
            closure: root.clone(),
            instances: RefCell::new(HashMap::new()),
        })),
    );
    Ok(())
}

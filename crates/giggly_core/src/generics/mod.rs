//! # Generic Instantiator
//!
//! Turns a captured [`GenericFunctionTemplate`]/[`GenericStructTemplate`] plus a
//! concrete argument-type tuple into a real, emitted [`FunctionRecord`]/[`StructRecord`].
//! Instances are memoized twice: once on the template itself (so a second call site
//! with the same argument types gets the identical record back) and registered into
//! the template's capturing environment (so a later, unrelated expression that only
//! has the *type* — not the call site — can still find the instance by name).
//!
//! A template's own body is compiled lazily, the first time it is actually
//! instantiated; a `@generic` function or struct that nothing in the program ever
//! calls never reaches codegen at all.

use std::collections::HashMap;
use std::rc::Rc;

use crate::diagnostics::{CoreResult, Diagnostic, DiagnosticKind};
use crate::emitter::Backend;
use crate::environment::{FunctionRecord, GenericFunctionTemplate, GenericStructTemplate, StructRecord};
use crate::registry::Type;
use crate::resolver;

/// Binds each template type parameter to the concrete type an argument position
/// forces it to, checking repeated uses of the same parameter for consistency.
/// Positions whose declared type is not a bare generic identifier are left for the
/// caller to check via the ordinary conversion engine once the function is built.
fn bind_generic_params<'ctx>(
    type_params: &[String],
    declared_names: impl Iterator<Item = Option<String>>,
    arg_types: &[Type],
    closure: &crate::environment::Environment<'ctx>,
) -> CoreResult<crate::environment::Environment<'ctx>> {
    let inst_env = closure.child();
    let mut bound: HashMap<String, Type> = HashMap::new();
    for (declared, actual) in declared_names.zip(arg_types.iter()) {
        let Some(declared) = declared else { continue };
        if !type_params.contains(&declared) {
            continue;
        }
        if let Some(existing) = bound.get(&declared) {
            if existing != actual {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    crate::lexer::Span::default(),
                    DiagnosticKind::WrongType {
                        expected: vec![existing.to_string()],
                        actual: actual.to_string(),
                    },
                ));
            }
            continue;
        }
        bound.insert(declared.clone(), actual.clone());
        inst_env.bind_generic(&declared, actual.clone());
    }
    Ok(inst_env)
}

/// Short, symbol-safe suffix identifying a monomorphization, e.g. `int_str` for
/// `[int, str]`. Only used to keep LLVM-visible names unique across instantiations —
/// the semantic identity of an instantiated [`Type`] is the `(name, generics)` pair.
fn mangle_type_list(types: &[Type]) -> String {
    types
        .iter()
        .map(|t| t.to_string().chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn instantiate_function<'ctx>(
    backend: &Backend<'ctx>,
    template: &Rc<GenericFunctionTemplate<'ctx>>,
    arg_types: &[Type],
) -> CoreResult<Rc<FunctionRecord<'ctx>>> {
    if let Some(existing) = template.instances.borrow().get(arg_types) {
        return Ok(existing.clone());
    }

    let declared_names = template.node.params.iter().map(|p| {
        if p.type_name.path.len() == 1 && p.type_name.generics.is_empty() {
            Some(p.type_name.path[0].clone())
        } else {
            None
        }
    });
    let inst_env = bind_generic_params(&template.type_params, declared_names, arg_types, &template.closure)?;

    // Check every non-generic-identifier parameter against its resolved declared
    // type before committing to the instantiation, so a bad call fails before any
    // IR is emitted for it.
    for (param, actual) in template.node.params.iter().zip(arg_types.iter()) {
        let is_bare_generic = param.type_name.path.len() == 1 && template.type_params.contains(&param.type_name.path[0]);
        if is_bare_generic {
            continue;
        }
        let declared = resolver::resolve_type(&inst_env, backend, &param.type_name)?;
        if &declared != actual && !crate::types::can_convert(&inst_env, actual, &declared) {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                param.span.clone(),
                DiagnosticKind::WrongType {
                    expected: vec![declared.to_string()],
                    actual: actual.to_string(),
                },
            ));
        }
    }

    let mangled = format!("{}__{}", template.name, mangle_type_list(arg_types));
    let record = crate::declare_function_record(backend, &inst_env, &template.node, mangled, None)?;

    // Registered before the body compiles so a self-recursive call inside the
    // template instantiates to the same cached record rather than looping forever.
    template.instances.borrow_mut().insert(arg_types.to_vec(), record.clone());
    crate::compile_function_body(backend, &inst_env, &template.node, &record)?;
    Ok(record)
}

pub fn instantiate_struct<'ctx>(
    backend: &Backend<'ctx>,
    template: &Rc<GenericStructTemplate<'ctx>>,
    arg_types: &[Type],
) -> CoreResult<Rc<StructRecord<'ctx>>> {
    if arg_types.len() != template.type_params.len() {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            template.node.span.clone(),
            DiagnosticKind::Internal {
                detail: format!(
                    "struct '{}' expects {} generic argument(s), got {}",
                    template.name,
                    template.type_params.len(),
                    arg_types.len()
                ),
            },
        ));
    }
    if let Some(existing) = template.instances.borrow().get(arg_types) {
        return Ok(existing.clone());
    }

    let inst_env = template.closure.child();
    for (name, ty) in template.type_params.iter().zip(arg_types.iter()) {
        inst_env.bind_generic(name, ty.clone());
    }

    let mangled_name = format!("{}__{}", template.name, mangle_type_list(arg_types));
    let record = crate::declare_struct_skeleton(backend, &inst_env, &template.closure, &template.node, mangled_name, arg_types.to_vec())?;

    // Registered before methods compile so a method body that recursively
    // instantiates this same (name, generics) pair — e.g. a linked-list node
    // building another node of its own type — hits the cache instead of recursing
    // into declare_struct_skeleton forever.
    template.instances.borrow_mut().insert(arg_types.to_vec(), record.clone());
    crate::compile_struct_methods(backend, &inst_env, &template.node, &record)?;
    Ok(record)
}

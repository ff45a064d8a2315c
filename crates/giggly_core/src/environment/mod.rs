//! # Environment
//!
//! The lexically-nested scope chain the semantic core walks the program with.
//! Mirrors the reference project's `Rc<RefCell<Frame>>` scope-stack pattern: each
//! [`Environment`] is a cheap-to-clone handle onto a shared, mutable scope record,
//! and a child scope holds a strong reference to its parent so name lookup can walk
//! outward without any lifetime gymnastics.
//!
//! A scope entry is never a single record — `records` maps a name to a *list* of
//! [`Record`]s so overloaded functions and autocast methods can coexist under one
//! name, with resolution deferred to the conversion engine's candidate filtering.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use inkwell::values::{BasicBlock, FunctionValue, PointerValue};

use crate::registry::Type;

/// One `break`/`continue`-reachable loop level. `ifbreak`/`notbreak` are separate
/// basic blocks because a `switch`'s implicit loop (see the statement compiler) only
/// ever reaches `ifbreak`, while `while`/`for` route both `break` and falling off the
/// end of the body through `notbreak` before landing after the loop.
#[derive(Debug, Clone)]
pub struct LoopContext<'ctx> {
    pub continue_block: BasicBlock<'ctx>,
    pub body_block: BasicBlock<'ctx>,
    pub condition_block: BasicBlock<'ctx>,
    pub ifbreak_block: BasicBlock<'ctx>,
    pub notbreak_block: BasicBlock<'ctx>,
}

#[derive(Debug, Clone)]
pub struct VariableRecord<'ctx> {
    pub name: String,
    pub address: PointerValue<'ctx>,
    pub ty: Type,
    pub volatile: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionRecord<'ctx> {
    pub name: String,
    pub mangled: String,
    pub function: FunctionValue<'ctx>,
    /// `(name, type, by_reference)` per declared parameter, in source order.
    pub params: Vec<(String, Type, bool)>,
    pub return_type: Type,
    pub autocast: bool,
    pub variadic: bool,
}

impl<'ctx> FunctionRecord<'ctx> {
    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|(_, t, _)| t.clone()).collect()
    }

    /// Whether this overload can be called with exactly `arg_types`, ignoring
    /// implicit conversions. The conversion engine layers widening/autocast
    /// candidate search on top of this exact check.
    pub fn matches_exactly(&self, arg_types: &[Type]) -> bool {
        if self.variadic {
            if arg_types.len() < self.params.len() {
                return false;
            }
        } else if arg_types.len() != self.params.len() {
            return false;
        }
        self.params
            .iter()
            .zip(arg_types.iter())
            .all(|((_, declared, _), actual)| declared == actual)
    }
}

pub struct StructRecord<'ctx> {
    pub name: String,
    pub generics: Vec<Type>,
    pub fields: RefCell<Vec<(String, Type)>>,
    pub methods: RefCell<HashMap<String, Vec<Rc<FunctionRecord<'ctx>>>>>,
    pub llvm_type: RefCell<Option<inkwell::types::StructType<'ctx>>>,
}

impl<'ctx> StructRecord<'ctx> {
    pub fn field_index(&self, name: &str) -> Option<(usize, Type)> {
        self.fields
            .borrow()
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, t))| (i, t.clone()))
    }

    pub fn add_method(&self, name: &str, record: Rc<FunctionRecord<'ctx>>) {
        self.methods.borrow_mut().entry(name.to_string()).or_default().push(record);
    }

    pub fn methods_named(&self, name: &str) -> Vec<Rc<FunctionRecord<'ctx>>> {
        self.methods.borrow().get(name).cloned().unwrap_or_default()
    }
}

/// A template captured at the point its `generic` function declaration was parsed:
/// the environment it closes over (for free variables/sibling overloads) plus a
/// memoized instance table keyed by the concrete argument-type tuple it was called
/// with. Instantiating the same template with the same types twice returns the
/// same [`FunctionRecord`] rather than emitting the body again.
pub struct GenericFunctionTemplate<'ctx> {
    pub name: String,
    pub type_params: Vec<String>,
    pub node: crate::parser::ast::FunctionStatement,
    pub closure: Environment<'ctx>,
    pub instances: RefCell<HashMap<Vec<Type>, Rc<FunctionRecord<'ctx>>>>,
}

pub struct GenericStructTemplate<'ctx> {
    pub name: String,
    pub type_params: Vec<String>,
    pub node: crate::parser::ast::StructStatement,
    pub closure: Environment<'ctx>,
    pub instances: RefCell<HashMap<Vec<Type>, Rc<StructRecord<'ctx>>>>,
}

/// A loaded module, holding its own top-level environment so `import`ed names can be
/// looked up through a `module.name` path without flattening into the importer's
/// own scope.
pub struct ModuleRecord<'ctx> {
    pub path: String,
    pub scope: Environment<'ctx>,
}

pub enum Record<'ctx> {
    Variable(Rc<VariableRecord<'ctx>>),
    Function(Rc<FunctionRecord<'ctx>>),
    Struct(Rc<StructRecord<'ctx>>),
    GenericFunctionTemplate(Rc<GenericFunctionTemplate<'ctx>>),
    GenericStructTemplate(Rc<GenericStructTemplate<'ctx>>),
    Module(Rc<ModuleRecord<'ctx>>),
}

struct EnvironmentInner<'ctx> {
    parent: Option<Environment<'ctx>>,
    records: HashMap<String, Vec<Rc<Record<'ctx>>>>,
    loop_stack: Vec<LoopContext<'ctx>>,
    /// Generic-parameter name -> concrete type bindings active for the duration of
    /// one generic instantiation. Replaces the reference's trick of mutating a
    /// fresh struct-type record's name mid-resolution to fool identifier lookup.
    generic_bindings: HashMap<String, Type>,
}

/// Cheap-to-clone scope handle. Cloning an `Environment` aliases the same
/// underlying scope rather than copying it, exactly like cloning an `Rc`.
#[derive(Clone)]
pub struct Environment<'ctx> {
    inner: Rc<RefCell<EnvironmentInner<'ctx>>>,
}

impl<'ctx> Environment<'ctx> {
    pub fn root() -> Self {
        Environment {
            inner: Rc::new(RefCell::new(EnvironmentInner {
                parent: None,
                records: HashMap::new(),
                loop_stack: Vec::new(),
                generic_bindings: HashMap::new(),
            })),
        }
    }

    pub fn child(&self) -> Self {
        Environment {
            inner: Rc::new(RefCell::new(EnvironmentInner {
                parent: Some(self.clone()),
                records: HashMap::new(),
                loop_stack: Vec::new(),
                generic_bindings: HashMap::new(),
            })),
        }
    }

    /// Binds a generic-parameter name (e.g. `T`) to a concrete type for the
    /// lifetime of this scope, consulted by the type resolver before falling back
    /// to struct/primitive lookup.
    pub fn bind_generic(&self, name: &str, ty: Type) {
        self.inner.borrow_mut().generic_bindings.insert(name.to_string(), ty);
    }

    pub fn generic_binding(&self, name: &str) -> Option<Type> {
        if let Some(ty) = self.inner.borrow().generic_bindings.get(name) {
            return Some(ty.clone());
        }
        self.parent().and_then(|p| p.generic_binding(name))
    }

    pub fn parent(&self) -> Option<Environment<'ctx>> {
        self.inner.borrow().parent.clone()
    }

    pub fn add(&self, name: &str, record: Record<'ctx>) {
        self.inner
            .borrow_mut()
            .records
            .entry(name.to_string())
            .or_default()
            .push(Rc::new(record));
    }

    /// Declares a fresh overload slot for `name`, replacing any prior local bindings.
    /// Used for plain variable declarations, where redeclaration is a duplicate-name
    /// error the caller checks before calling this (see `declare_exclusive`).
    pub fn declare_exclusive(&self, name: &str, record: Record<'ctx>) {
        self.inner.borrow_mut().records.insert(name.to_string(), vec![Rc::new(record)]);
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.inner.borrow().records.contains_key(name)
    }

    /// All overloads visible for `name` in this scope or an ancestor, nearest scope
    /// first. Shadowing is scope-local: once a scope defines `name` at all, outer
    /// overloads of the same name are not mixed in.
    pub fn lookup_all(&self, name: &str) -> Vec<Rc<Record<'ctx>>> {
        if let Some(records) = self.inner.borrow().records.get(name) {
            return records.clone();
        }
        match self.parent() {
            Some(parent) => parent.lookup_all(name),
            None => Vec::new(),
        }
    }

    pub fn lookup_one(&self, name: &str) -> Option<Rc<Record<'ctx>>> {
        self.lookup_all(name).into_iter().next()
    }

    pub fn is_variable(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::Variable(_)))
    }

    pub fn is_function(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::Function(_)))
    }

    pub fn is_struct(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::Struct(_)))
    }

    pub fn is_module(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::Module(_)))
    }

    pub fn is_generic_function(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::GenericFunctionTemplate(_)))
    }

    pub fn is_generic_struct(&self, name: &str) -> bool {
        matches!(self.lookup_one(name).as_deref(), Some(Record::GenericStructTemplate(_)))
    }

    pub fn variable(&self, name: &str) -> Option<Rc<VariableRecord<'ctx>>> {
        self.lookup_all(name).into_iter().find_map(|r| match &*r {
            Record::Variable(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn struct_record(&self, name: &str) -> Option<Rc<StructRecord<'ctx>>> {
        self.lookup_all(name).into_iter().find_map(|r| match &*r {
            Record::Struct(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn function_overloads(&self, name: &str) -> Vec<Rc<FunctionRecord<'ctx>>> {
        self.lookup_all(name)
            .into_iter()
            .filter_map(|r| match &*r {
                Record::Function(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    /// Finds the overload of `name` whose parameter types exactly match
    /// `arg_types`. `strict` callers get `None` on a mismatch instead of falling
    /// back to a convertible candidate; non-strict callers additionally accept a
    /// candidate reachable via `crate::types::can_convert` on every parameter,
    /// per §4.2's `find_function(name, arg_types, strict)`. The conversion engine's
    /// own `resolve_overload` runs a finer-grained version of this same search when
    /// it needs to report per-argument mismatches, rather than a plain first match.
    pub fn find_function(&self, name: &str, arg_types: &[Type], strict: bool) -> Option<Rc<FunctionRecord<'ctx>>> {
        let overloads = self.function_overloads(name);
        if strict {
            return overloads.into_iter().find(|f| f.matches_exactly(arg_types));
        }
        overloads.into_iter().find(|f| {
            f.matches_exactly(arg_types)
                || (!f.variadic
                    && f.params.len() == arg_types.len()
                    && f.params
                        .iter()
                        .zip(arg_types.iter())
                        .all(|((_, declared, _), actual)| declared == actual || crate::types::can_convert(self, actual, declared)))
        })
    }

    pub fn generic_function_template(&self, name: &str) -> Option<Rc<GenericFunctionTemplate<'ctx>>> {
        self.lookup_all(name).into_iter().find_map(|r| match &*r {
            Record::GenericFunctionTemplate(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn generic_struct_template(&self, name: &str) -> Option<Rc<GenericStructTemplate<'ctx>>> {
        self.lookup_all(name).into_iter().find_map(|r| match &*r {
            Record::GenericStructTemplate(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn module(&self, name: &str) -> Option<Rc<ModuleRecord<'ctx>>> {
        self.lookup_all(name).into_iter().find_map(|r| match &*r {
            Record::Module(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn enter_loop(&self, ctx: LoopContext<'ctx>) {
        self.inner.borrow_mut().loop_stack.push(ctx);
    }

    pub fn exit_loop(&self) {
        self.inner.borrow_mut().loop_stack.pop();
    }

    /// The loop context `depth` levels out from the innermost: `depth` `0` (a bare
    /// `break`/`continue`, or an explicit `break 0;`) is the innermost loop, `depth`
    /// `N` where `N` is the total nesting depth minus one is the outermost, and
    /// `depth >= ` the total nesting depth is out of range. Walks up through ancestor
    /// scopes once the local loop stack is exhausted, since a loop body opens a child
    /// scope but the loop stack itself is only pushed at the scope that owns the loop.
    pub fn loop_at_depth(&self, depth: usize) -> Option<LoopContext<'ctx>> {
        let mut remaining = depth;
        let mut scope = self.clone();
        loop {
            let local_len = scope.inner.borrow().loop_stack.len();
            if remaining < local_len {
                let idx = local_len - 1 - remaining;
                return scope.inner.borrow().loop_stack.get(idx).cloned();
            }
            remaining -= local_len;
            match scope.parent() {
                Some(p) => scope = p,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::registry::Primitive;
    use inkwell::context::Context;

    fn dummy_function<'ctx>(context: &'ctx Context, module: &inkwell::module::Module<'ctx>, name: &str, params: Vec<(String, Type, bool)>) -> Rc<FunctionRecord<'ctx>> {
        let fn_type = context.void_type().fn_type(&[], false);
        let function = module.add_function(name, fn_type, None);
        Rc::new(FunctionRecord {
            name: name.to_string(),
            mangled: name.to_string(),
            function,
            params,
            return_type: Type::Primitive(Primitive::Void),
            autocast: false,
            variadic: false,
        })
    }

    #[test]
    fn child_scope_shadows_parent_overloads_entirely() {
        let context = Context::create();
        let module = context.create_module("test");
        let root = Environment::root();
        root.add("f", Record::Function(dummy_function(&context, &module, "f", vec![("x".into(), Type::Primitive(Primitive::Int64), false)])));
        let child = root.child();
        child.add("f", Record::Function(dummy_function(&context, &module, "f_child", vec![])));
        // shadowing is scope-local: the child's overload set for `f` does not also
        // contain the parent's single-arg overload.
        assert_eq!(child.function_overloads("f").len(), 1);
        assert_eq!(child.function_overloads("f")[0].mangled, "f_child");
    }

    #[test]
    fn lookup_walks_to_an_ancestor_when_the_name_is_unset_locally() {
        let context = Context::create();
        let module = context.create_module("test");
        let root = Environment::root();
        root.add("g", Record::Function(dummy_function(&context, &module, "g", vec![])));
        let child = root.child();
        assert_eq!(child.function_overloads("g").len(), 1);
    }

    #[test]
    fn find_function_strict_rejects_a_convertible_but_inexact_candidate() {
        let context = Context::create();
        let module = context.create_module("test");
        let env = Environment::root();
        env.add(
            "f",
            Record::Function(dummy_function(&context, &module, "f", vec![("x".into(), Type::Primitive(Primitive::Int64), false)])),
        );
        let arg_types = [Type::Primitive(Primitive::Int32)];
        assert!(env.find_function("f", &arg_types, true).is_none());
        assert!(env.find_function("f", &arg_types, false).is_some());
    }

    #[test]
    fn loop_at_depth_zero_is_innermost_and_depth_counts_outward() {
        let context = Context::create();
        let module = context.create_module("test");
        let fn_type = context.void_type().fn_type(&[], false);
        let function = module.add_function("main", fn_type, None);
        let outer_block = context.append_basic_block(function, "outer");
        let inner_block = context.append_basic_block(function, "inner");
        let loop_ctx = |block| LoopContext {
            continue_block: block,
            body_block: block,
            condition_block: block,
            ifbreak_block: block,
            notbreak_block: block,
        };
        let env = Environment::root();
        // Nesting order matches `compile_while`: the outer loop's context is pushed
        // before the inner loop's, so the inner loop sits on top of the stack.
        env.enter_loop(loop_ctx(outer_block));
        env.enter_loop(loop_ctx(inner_block));

        // A bare `break`/`continue` (depth 0) targets the innermost loop.
        assert_eq!(env.loop_at_depth(0).unwrap().body_block, inner_block);
        // `break 1` targets one level out — the outer loop, not the inner one it was
        // written in. This is the exact `break 1` scenario spec.md §8 enumerates.
        assert_eq!(env.loop_at_depth(1).unwrap().body_block, outer_block);
        // Depth equal to or past the total nesting depth is out of range.
        assert!(env.loop_at_depth(2).is_none());
    }
}

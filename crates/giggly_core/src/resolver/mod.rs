//! # Type Resolver & Value Resolver
//!
//! Two closely related passes over parse-tree nodes: [`resolve_type`] turns a
//! [`TypeName`] into a semantic [`Type`], triggering generic-struct instantiation
//! when the name names a template; [`resolve_expr`] walks an [`Expression`] and
//! produces a [`ResolvedValue`] quadruple (ssa value, address, type, kind) per the
//! data model every later stage consumes.

use inkwell::values::{BasicValue, BasicValueEnum, PointerValue};

use crate::diagnostics::{CoreResult, Diagnostic, DiagnosticKind};
use crate::emitter::Backend;
use crate::environment::{Environment, Record};
use crate::generics;
use crate::lexer::Span;
use crate::parser::ast::{CallExpression, Expression, IndexExpression, InfixExpression, InfixOp, TypeName};
use crate::registry::{Primitive, Type};
use crate::types::{self as conv};

/// The kind tag on a [`ResolvedValue`]. `Instance` covers every runtime value
/// (scalars and struct instances alike); the remaining variants carry no runtime
/// value and exist only to let member access and call expressions dispatch
/// correctly on module/type/template names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Instance,
    StructType,
    GenericStructTemplate,
    Module,
}

#[derive(Clone)]
pub struct ResolvedValue<'ctx> {
    pub ssa_value: Option<BasicValueEnum<'ctx>>,
    pub address: Option<PointerValue<'ctx>>,
    pub ty: Type,
    pub kind: ValueKind,
}

impl<'ctx> ResolvedValue<'ctx> {
    fn instance(ssa_value: BasicValueEnum<'ctx>, ty: Type) -> Self {
        ResolvedValue {
            ssa_value: Some(ssa_value),
            address: None,
            ty,
            kind: ValueKind::Instance,
        }
    }

    fn instance_with_address(ssa_value: Option<BasicValueEnum<'ctx>>, address: PointerValue<'ctx>, ty: Type) -> Self {
        ResolvedValue {
            ssa_value,
            address: Some(address),
            ty,
            kind: ValueKind::Instance,
        }
    }

    pub fn type_name(ty: Type) -> Self {
        ResolvedValue {
            ssa_value: None,
            address: None,
            ty,
            kind: ValueKind::StructType,
        }
    }

    /// Loads the value at `address` if this resolved value was produced as an
    /// lvalue (an address with no cached ssa value) — the caller decides whether a
    /// load is actually wanted (member access on the left of an assignment must not
    /// load).
    pub fn load<'b>(&self, backend: &'b Backend<'ctx>) -> BasicValueEnum<'ctx> {
        if let Some(v) = self.ssa_value {
            return v;
        }
        let addr = self.address.expect("instance resolved value must carry a value or an address");
        backend.emit_load(&self.ty, addr, "loadtmp")
    }
}

pub fn resolve_type<'ctx>(env: &Environment<'ctx>, backend: &Backend<'ctx>, type_name: &TypeName) -> CoreResult<Type> {
    let name = type_name.path.last().cloned().unwrap_or_default();

    if type_name.path.len() == 1 {
        if let Some(bound) = env.generic_binding(&name) {
            return Ok(bound);
        }
        if name == "raw_array" {
            let elem = type_name
                .generics
                .first()
                .ok_or_else(|| wrong_arity(type_name, "raw_array expects exactly one type argument"))?;
            return Ok(Type::raw_array(resolve_type(env, backend, elem)?));
        }
        if let Some(p) = Primitive::ALL.iter().find(|p| p.name() == name) {
            return Ok(Type::Primitive(*p));
        }
        if name == "Any" {
            return Ok(Type::Any);
        }
    }

    let (lookup_env, leaf) = resolve_path_prefix(env, type_name)?;
    let leaf = leaf.unwrap_or(name);

    if let Some(record) = lookup_env.struct_record(&leaf) {
        if !type_name.generics.is_empty() && type_name.generics.len() != record.generics.len() {
            return Err(wrong_arity(type_name, "generic argument count does not match struct definition"));
        }
        return Ok(Type::Struct {
            name: record.name.clone(),
            generics: record.generics.clone(),
        });
    }

    if let Some(template) = lookup_env.generic_struct_template(&leaf) {
        let args = type_name
            .generics
            .iter()
            .map(|g| resolve_type(env, backend, g))
            .collect::<CoreResult<Vec<_>>>()?;
        let instance = generics::instantiate_struct(backend, &template, &args)?;
        return Ok(Type::Struct {
            name: instance.name.clone(),
            generics: instance.generics.clone(),
        });
    }

    Err(Diagnostic::new(
        String::new(),
        String::new(),
        type_name.span.clone(),
        DiagnosticKind::NotDefined { name: leaf },
    ))
}

fn wrong_arity(type_name: &TypeName, why: &str) -> Diagnostic {
    Diagnostic::new(
        String::new(),
        String::new(),
        type_name.span.clone(),
        DiagnosticKind::Internal { detail: why.to_string() },
    )
}

/// Walks every path segment but the last through module records, returning the
/// environment the final segment should be looked up in. A single-segment path
/// resolves trivially to `env` itself.
fn resolve_path_prefix<'ctx>(env: &Environment<'ctx>, type_name: &TypeName) -> CoreResult<(Environment<'ctx>, Option<String>)> {
    if type_name.path.len() <= 1 {
        return Ok((env.clone(), None));
    }
    let mut current = env.clone();
    for segment in &type_name.path[..type_name.path.len() - 1] {
        let module = current.module(segment).ok_or_else(|| {
            Diagnostic::new(
                String::new(),
                String::new(),
                type_name.span.clone(),
                DiagnosticKind::NotDefined { name: segment.clone() },
            )
        })?;
        current = module.scope.clone();
    }
    Ok((current, Some(type_name.path.last().unwrap().clone())))
}

pub struct ResolveCtx<'a, 'ctx> {
    pub backend: &'a Backend<'ctx>,
    pub env: Environment<'ctx>,
    pub return_type: Type,
}

pub fn resolve_expr<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, expr: &Expression) -> CoreResult<ResolvedValue<'ctx>> {
    match expr {
        Expression::Integer(v, _) => {
            let ty = Type::Primitive(Primitive::Int64);
            let llvm = ctx.backend.get_llvm_type(&ty).into_int_type();
            Ok(ResolvedValue::instance(llvm.const_int(*v as u64, true).into(), ty))
        }
        Expression::Float(v, _) => {
            let ty = Type::Primitive(Primitive::Float64);
            let llvm = ctx.backend.get_llvm_type(&ty).into_float_type();
            Ok(ResolvedValue::instance(llvm.const_float(*v).into(), ty))
        }
        Expression::Boolean(v, _) => {
            let ty = Type::Primitive(Primitive::Bool);
            let llvm = ctx.backend.get_llvm_type(&ty).into_int_type();
            Ok(ResolvedValue::instance(llvm.const_int(*v as u64, false).into(), ty))
        }
        Expression::Str(s, _) => {
            let ptr = ctx
                .backend
                .builder
                .build_global_string_ptr(s, "strlit")
                .expect("global string");
            Ok(ResolvedValue::instance(ptr.as_pointer_value().as_basic_value_enum(), Type::Primitive(Primitive::StrPointer)))
        }
        Expression::Identifier(name, span) => resolve_identifier(ctx, name, span.clone()),
        Expression::Array { elements, is_new, span } => resolve_array_literal(ctx, elements, *is_new, span.clone()),
        Expression::Infix(infix) => resolve_infix(ctx, infix),
        Expression::Index(index) => resolve_index(ctx, index),
        Expression::Call(call) => resolve_call(ctx, call),
    }
}

fn resolve_identifier<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, name: &str, span: Span) -> CoreResult<ResolvedValue<'ctx>> {
    if name == "nullptr" {
        let ty = Type::Primitive(Primitive::NullPointer);
        let ptr_type = ctx.backend.ptr_type();
        return Ok(ResolvedValue::instance(ptr_type.const_null().as_basic_value_enum(), ty));
    }
    if let Some(var) = ctx.env.variable(name) {
        return Ok(ResolvedValue::instance_with_address(None, var.address, var.ty.clone()));
    }
    if let Some(record) = ctx.env.struct_record(name) {
        return Ok(ResolvedValue::type_name(Type::Struct {
            name: record.name.clone(),
            generics: record.generics.clone(),
        }));
    }
    if ctx.env.is_generic_struct(name) {
        return Ok(ResolvedValue {
            ssa_value: None,
            address: None,
            ty: Type::Any,
            kind: ValueKind::GenericStructTemplate,
        });
    }
    if ctx.env.is_module(name) {
        return Ok(ResolvedValue {
            ssa_value: None,
            address: None,
            ty: Type::Any,
            kind: ValueKind::Module,
        });
    }
    Err(Diagnostic::new(
        String::new(),
        String::new(),
        span,
        DiagnosticKind::NotDefined { name: name.to_string() },
    ))
}

fn resolve_array_literal<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    elements: &[Expression],
    is_new: bool,
    span: Span,
) -> CoreResult<ResolvedValue<'ctx>> {
    if elements.is_empty() {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            span,
            DiagnosticKind::Internal {
                detail: "array literal requires at least one element".to_string(),
            },
        ));
    }
    let resolved: Vec<ResolvedValue<'ctx>> = elements.iter().map(|e| resolve_expr(ctx, e)).collect::<CoreResult<_>>()?;
    let elem_type = resolved[0].ty.clone();

    let array_ty = Type::raw_array(elem_type.clone());
    let llvm_elem = ctx.backend.get_llvm_type(&elem_type);
    let count = ctx.backend.const_i64(resolved.len() as i64);

    let base = if is_new {
        let element_size = ctx.backend.const_i64(1);
        let size_ptr = ctx
            .backend
            .emit_gep(llvm_elem, llvm_elem.ptr_type(Default::default()).const_null(), &[element_size], "sizeofgep");
        let bytes = ctx
            .backend
            .builder
            .build_ptr_to_int(size_ptr, ctx.backend.context.i64_type(), "elemsize")
            .expect("ptrtoint");
        let total = ctx
            .backend
            .builder
            .build_int_mul(bytes, count, "totalbytes")
            .expect("mul");
        let malloc = ctx.backend.module.get_function("malloc").expect("malloc declared at bootstrap");
        let call = ctx
            .backend
            .builder
            .build_call(malloc, &[total.into()], "arrmalloc")
            .expect("malloc call");
        call.try_as_basic_value().left().expect("malloc returns a value").into_pointer_value()
    } else {
        ctx.backend
            .builder
            .build_array_alloca(llvm_elem, count, "arralloca")
            .expect("array alloca")
    };

    for (i, value) in resolved.iter().enumerate() {
        let coerced = if value.ty == elem_type {
            value.load(ctx.backend)
        } else {
            conv::convert(ctx.backend, &ctx.env, value.load(ctx.backend), &value.ty, &elem_type, span.clone())?
        };
        let idx = ctx.backend.const_i64(i as i64);
        let slot = ctx.backend.emit_gep(llvm_elem, base, &[idx], "arrslot");
        ctx.backend.emit_volatile_store(slot, coerced, false);
    }

    Ok(ResolvedValue::instance(base.as_basic_value_enum(), array_ty))
}

fn resolve_infix<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, infix: &InfixExpression) -> CoreResult<ResolvedValue<'ctx>> {
    if infix.op == InfixOp::Dot {
        return resolve_member_access(ctx, infix);
    }

    let left = resolve_expr(ctx, &infix.left)?;
    let right = resolve_expr(ctx, &infix.right)?;

    if left.ty.is_aggregate() || right.ty.is_aggregate() {
        return resolve_dunder_infix(ctx, &left, &right, infix);
    }

    let common = conv::common_numeric_type(&left.ty, &right.ty).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            infix.span.clone(),
            DiagnosticKind::WrongInfix {
                op: infix.op.to_string(),
                left: left.ty.to_string(),
                right: right.ty.to_string(),
            },
        )
    })?;

    let lhs = conv::convert(ctx.backend, &ctx.env, left.load(ctx.backend), &left.ty, &common, infix.span.clone())?;
    let rhs = conv::convert(ctx.backend, &ctx.env, right.load(ctx.backend), &right.ty, &common, infix.span.clone())?;

    emit_numeric_infix(ctx, infix, lhs, rhs, &common)
}

fn emit_numeric_infix<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    infix: &InfixExpression,
    lhs: BasicValueEnum<'ctx>,
    rhs: BasicValueEnum<'ctx>,
    common: &Type,
) -> CoreResult<ResolvedValue<'ctx>> {
    let Type::Primitive(p) = common else {
        unreachable!("common_numeric_type only ever returns a primitive");
    };
    let builder = &ctx.backend.builder;

    if p.is_float() {
        let (l, r) = (lhs.into_float_value(), rhs.into_float_value());
        use InfixOp::*;
        let (value, ty): (BasicValueEnum, Type) = match infix.op {
            Add => (builder.build_float_add(l, r, "fadd").unwrap().into(), common.clone()),
            Sub => (builder.build_float_sub(l, r, "fsub").unwrap().into(), common.clone()),
            Mul => (builder.build_float_mul(l, r, "fmul").unwrap().into(), common.clone()),
            Div => (builder.build_float_div(l, r, "fdiv").unwrap().into(), common.clone()),
            Mod => (builder.build_float_rem(l, r, "frem").unwrap().into(), common.clone()),
            Eq | Neq | Lt | Gt | Lte | Gte => {
                let pred = float_predicate(infix.op.clone());
                let cmp = builder.build_float_compare(pred, l, r, "fcmp").unwrap();
                (cmp.into(), Type::Primitive(Primitive::Bool))
            }
            Pow => {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    infix.span.clone(),
                    DiagnosticKind::Unimplemented {
                        feature: "exponent operator on float operands".to_string(),
                    },
                ));
            }
            Dot => unreachable!("member access handled separately"),
        };
        return Ok(ResolvedValue::instance(value, ty));
    }

    let (l, r) = (lhs.into_int_value(), rhs.into_int_value());
    let signed = !p.is_unsigned();
    use InfixOp::*;
    let (value, ty): (BasicValueEnum, Type) = match infix.op {
        Add => (builder.build_int_add(l, r, "iadd").unwrap().into(), common.clone()),
        Sub => (builder.build_int_sub(l, r, "isub").unwrap().into(), common.clone()),
        Mul => (builder.build_int_mul(l, r, "imul").unwrap().into(), common.clone()),
        Div if signed => (builder.build_int_signed_div(l, r, "sdiv").unwrap().into(), common.clone()),
        Div => (builder.build_int_unsigned_div(l, r, "udiv").unwrap().into(), common.clone()),
        Mod if signed => (builder.build_int_signed_rem(l, r, "srem").unwrap().into(), common.clone()),
        Mod => (builder.build_int_unsigned_rem(l, r, "urem").unwrap().into(), common.clone()),
        Eq | Neq | Lt | Gt | Lte | Gte => {
            let pred = ctx.backend.icmp_for_op(signed, icmp_op(infix.op.clone()));
            let cmp = builder.build_int_compare(pred, l, r, "icmp").unwrap();
            (cmp.into(), Type::Primitive(Primitive::Bool))
        }
        Pow => {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                infix.span.clone(),
                DiagnosticKind::Unimplemented {
                    feature: "exponent operator on integer operands".to_string(),
                },
            ));
        }
        Dot => unreachable!("member access handled separately"),
    };
    Ok(ResolvedValue::instance(value, ty))
}

fn float_predicate(op: InfixOp) -> inkwell::FloatPredicate {
    use inkwell::FloatPredicate::*;
    match op {
        InfixOp::Eq => OEQ,
        InfixOp::Neq => ONE,
        InfixOp::Lt => OLT,
        InfixOp::Gt => OGT,
        InfixOp::Lte => OLE,
        InfixOp::Gte => OGE,
        _ => unreachable!(),
    }
}

fn icmp_op(op: InfixOp) -> crate::emitter::IcmpOp {
    use crate::emitter::IcmpOp as I;
    match op {
        InfixOp::Eq => I::Eq,
        InfixOp::Neq => I::Neq,
        InfixOp::Lt => I::Lt,
        InfixOp::Gt => I::Gt,
        InfixOp::Lte => I::Lte,
        InfixOp::Gte => I::Gte,
        _ => unreachable!(),
    }
}

fn dunder_name(op: &InfixOp) -> &'static str {
    match op {
        InfixOp::Add => "__add__",
        InfixOp::Sub => "__sub__",
        InfixOp::Mul => "__mul__",
        InfixOp::Div => "__div__",
        InfixOp::Mod => "__mod__",
        InfixOp::Pow => "__pow__",
        InfixOp::Eq => "__eq__",
        InfixOp::Neq => "__neq__",
        InfixOp::Lt => "__lt__",
        InfixOp::Gt => "__gt__",
        InfixOp::Lte => "__lte__",
        InfixOp::Gte => "__gte__",
        InfixOp::Dot => unreachable!(),
    }
}

fn resolve_dunder_infix<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    left: &ResolvedValue<'ctx>,
    right: &ResolvedValue<'ctx>,
    infix: &InfixExpression,
) -> CoreResult<ResolvedValue<'ctx>> {
    // Equality against the null-pointer sentinel short-circuits to a raw pointer
    // compare, skipping method dispatch entirely.
    if matches!(infix.op, InfixOp::Eq | InfixOp::Neq) {
        if right.ty == Type::Primitive(Primitive::NullPointer) || left.ty == Type::Primitive(Primitive::NullPointer) {
            let l = left.load(ctx.backend).into_pointer_value();
            let r = right.load(ctx.backend).into_pointer_value();
            let l_int = ctx.backend.builder.build_ptr_to_int(l, ctx.backend.context.i64_type(), "lptr").unwrap();
            let r_int = ctx.backend.builder.build_ptr_to_int(r, ctx.backend.context.i64_type(), "rptr").unwrap();
            let pred = if infix.op == InfixOp::Eq {
                inkwell::IntPredicate::EQ
            } else {
                inkwell::IntPredicate::NE
            };
            let cmp = ctx.backend.builder.build_int_compare(pred, l_int, r_int, "ptreq").unwrap();
            return Ok(ResolvedValue::instance(cmp.into(), Type::Primitive(Primitive::Bool)));
        }
    }

    let method_name = dunder_name(&infix.op);

    // Left type gets first shot at the dunder method; if it isn't a struct, or
    // doesn't declare an overload for the right operand's type, the right type
    // gets a fallback shot (e.g. `int + Vec` dispatching to `Vec.__add__`).
    if let Type::Struct { name, .. } = &left.ty {
        if let Some(record) = ctx.env.struct_record(name) {
            if let Some(candidate) = record
                .methods_named(method_name)
                .into_iter()
                .find(|m| m.params.len() == 2 && m.params[1].1 == right.ty)
            {
                let self_addr = left.address.expect("struct instance must have an address");
                return emit_dunder_call(ctx, self_addr, right, &candidate);
            }
        }
    }

    if let Type::Struct { name, .. } = &right.ty {
        if let Some(record) = ctx.env.struct_record(name) {
            if let Some(candidate) = record
                .methods_named(method_name)
                .into_iter()
                .find(|m| m.params.len() == 2 && m.params[1].1 == left.ty)
            {
                let self_addr = right.address.expect("struct instance must have an address");
                return emit_dunder_call(ctx, self_addr, left, &candidate);
            }
        }
    }

    Err(Diagnostic::new(
        String::new(),
        String::new(),
        infix.span.clone(),
        DiagnosticKind::WrongInfix {
            op: infix.op.to_string(),
            left: left.ty.to_string(),
            right: right.ty.to_string(),
        },
    ))
}

fn emit_dunder_call<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    self_addr: PointerValue<'ctx>,
    other: &ResolvedValue<'ctx>,
    candidate: &crate::environment::FunctionRecord<'ctx>,
) -> CoreResult<ResolvedValue<'ctx>> {
    let call = ctx
        .backend
        .builder
        .build_call(candidate.function, &[self_addr.into(), other.load(ctx.backend).into()], "dunder")
        .expect("dunder call");
    Ok(ResolvedValue::instance(
        call.try_as_basic_value().left().expect("dunder method returns a value"),
        candidate.return_type.clone(),
    ))
}

fn resolve_member_access<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, infix: &InfixExpression) -> CoreResult<ResolvedValue<'ctx>> {
    let member = match infix.right.as_ref() {
        Expression::Identifier(name, _) => name.clone(),
        _ => {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                infix.span.clone(),
                DiagnosticKind::Internal {
                    detail: "right side of '.' must be an identifier".to_string(),
                },
            ))
        }
    };

    let left = resolve_expr(ctx, &infix.left)?;
    if left.kind == ValueKind::Module {
        let Expression::Identifier(module_name, _) = infix.left.as_ref() else {
            unreachable!("module-kind resolved values only come from bare identifiers");
        };
        let module = ctx.env.module(module_name).ok_or_else(|| {
            Diagnostic::new(
                String::new(),
                String::new(),
                infix.span.clone(),
                DiagnosticKind::NotDefined { name: module_name.clone() },
            )
        })?;
        return resolve_identifier(
            &ResolveCtx {
                backend: ctx.backend,
                env: module.scope.clone(),
                return_type: ctx.return_type.clone(),
            },
            &member,
            infix.span.clone(),
        );
    }

    let Type::Struct { name, .. } = &left.ty else {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            infix.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: left.ty.to_string(),
                member,
            },
        ));
    };
    let record = ctx.env.struct_record(name).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            infix.span.clone(),
            DiagnosticKind::NotDefined { name: name.clone() },
        )
    })?;
    let (index, field_ty) = record.field_index(&member).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            infix.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: name.clone(),
                member: member.clone(),
            },
        )
    })?;
    let base = left.address.expect("struct instance must carry an address for field access");
    let llvm_struct = ctx.backend.get_llvm_type(&left.ty).into_struct_type();
    let field_ptr = ctx
        .backend
        .builder
        .build_struct_gep(llvm_struct, base, index as u32, "fieldgep")
        .expect("struct gep");
    Ok(ResolvedValue::instance_with_address(None, field_ptr, field_ty))
}

fn resolve_index<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, index: &IndexExpression) -> CoreResult<ResolvedValue<'ctx>> {
    let base = resolve_expr(ctx, &index.left)?;
    match &base.ty {
        Type::RawArray(elem) => {
            let idx = resolve_expr(ctx, &index.index)?;
            if !matches!(idx.ty, Type::Primitive(p) if p.is_integer()) {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    index.span.clone(),
                    DiagnosticKind::CantIndex {
                        on: base.ty.to_string(),
                    },
                ));
            }
            let elem_llvm = ctx.backend.get_llvm_type(elem);
            let base_ptr = base.load(ctx.backend).into_pointer_value();
            let idx_value = idx.load(ctx.backend).into_int_value();
            let slot = ctx.backend.emit_gep(elem_llvm, base_ptr, &[idx_value], "idxgep");
            Ok(ResolvedValue::instance_with_address(None, slot, (**elem).clone()))
        }
        Type::Struct { name, .. } => {
            let record = ctx.env.struct_record(name).ok_or_else(|| {
                Diagnostic::new(
                    String::new(),
                    String::new(),
                    index.span.clone(),
                    DiagnosticKind::NotDefined { name: name.clone() },
                )
            })?;
            let idx = resolve_expr(ctx, &index.index)?;
            let method = record
                .methods_named("__index__")
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Diagnostic::new(
                        String::new(),
                        String::new(),
                        index.span.clone(),
                        DiagnosticKind::CantIndex {
                            on: base.ty.to_string(),
                        },
                    )
                })?;
            let self_addr = base.address.expect("struct instance must have an address");
            let call = ctx
                .backend
                .builder
                .build_call(method.function, &[self_addr.into(), idx.load(ctx.backend).into()], "indexcall")
                .expect("__index__ call");
            Ok(ResolvedValue::instance(
                call.try_as_basic_value().left().expect("__index__ returns a value"),
                method.return_type.clone(),
            ))
        }
        _ => Err(Diagnostic::new(
            String::new(),
            String::new(),
            index.span.clone(),
            DiagnosticKind::CantIndex {
                on: base.ty.to_string(),
            },
        )),
    }
}

fn resolve_call<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, call: &CallExpression) -> CoreResult<ResolvedValue<'ctx>> {
    if let Expression::Infix(infix) = call.callee.as_ref() {
        if infix.op == InfixOp::Dot {
            if let (Expression::Identifier(module_name, _), Expression::Identifier(fn_name, _)) =
                (infix.left.as_ref(), infix.right.as_ref())
            {
                if ctx.env.is_module(module_name) {
                    return resolve_module_call(ctx, module_name, fn_name, call);
                }
            }
        }
    }

    let callee_name = match call.callee.as_ref() {
        Expression::Identifier(name, _) => name.clone(),
        _ => {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                call.span.clone(),
                DiagnosticKind::Internal {
                    detail: "call target must be a plain identifier".to_string(),
                },
            ))
        }
    };

    if callee_name == "raw_array" {
        return resolve_raw_array_call(ctx, call);
    }

    if ctx.env.is_generic_struct(&callee_name) {
        return resolve_generic_struct_call(ctx, &callee_name, call);
    }

    if ctx.env.is_struct(&callee_name) {
        return resolve_struct_constructor_call(ctx, &callee_name, call);
    }

    if ctx.env.is_generic_function(&callee_name) {
        return resolve_generic_function_call(ctx, &callee_name, call);
    }

    let args: Vec<ResolvedValue<'ctx>> = call.args.iter().map(|a| resolve_expr(ctx, a)).collect::<CoreResult<_>>()?;
    let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
    let matched = conv::resolve_overload(&ctx.env, &callee_name, &arg_types, call.span.clone())?;

    emit_call(ctx, &matched, &args, call.span.clone())
}

/// A call through a module-qualified name (`a.f()`). Overload resolution runs
/// against the *module's* scope, not the caller's, since the callee lives in the
/// imported file's namespace; arguments are still resolved against the caller's
/// scope. Mirrors how [`resolve_member_access`] looks up a plain member on a module.
fn resolve_module_call<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    module_name: &str,
    fn_name: &str,
    call: &CallExpression,
) -> CoreResult<ResolvedValue<'ctx>> {
    let module = ctx.env.module(module_name).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            call.span.clone(),
            DiagnosticKind::NotDefined {
                name: module_name.to_string(),
            },
        )
    })?;

    let args: Vec<ResolvedValue<'ctx>> = call.args.iter().map(|a| resolve_expr(ctx, a)).collect::<CoreResult<_>>()?;
    let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
    let matched = conv::resolve_overload(&module.scope, fn_name, &arg_types, call.span.clone())?;

    emit_call(ctx, &matched, &args, call.span.clone())
}

fn emit_call<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    matched: &conv::MatchResult<'ctx>,
    args: &[ResolvedValue<'ctx>],
    span: Span,
) -> CoreResult<ResolvedValue<'ctx>> {
    let mut llvm_args = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let by_reference = matched.record.params.get(i).map(|(_, _, r)| *r).unwrap_or(false);
        if by_reference {
            let addr = arg.address.expect("by-reference parameter requires an addressable argument");
            llvm_args.push(addr.into());
            continue;
        }
        let declared = matched
            .conversions
            .get(i)
            .cloned()
            .flatten()
            .unwrap_or_else(|| arg.ty.clone());
        let value = if declared == arg.ty {
            arg.load(ctx.backend)
        } else {
            conv::convert(ctx.backend, &ctx.env, arg.load(ctx.backend), &arg.ty, &declared, span.clone())?
        };
        llvm_args.push(value.into());
    }

    let call = ctx
        .backend
        .builder
        .build_call(matched.record.function, &llvm_args, "calltmp")
        .expect("function call");

    if matched.record.return_type == Type::Primitive(Primitive::Void) {
        return Ok(ResolvedValue {
            ssa_value: None,
            address: None,
            ty: Type::Primitive(Primitive::Void),
            kind: ValueKind::Instance,
        });
    }
    let value = call.try_as_basic_value().left().expect("non-void call must return a value");
    Ok(ResolvedValue::instance(value, matched.record.return_type.clone()))
}

fn resolve_raw_array_call<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, call: &CallExpression) -> CoreResult<ResolvedValue<'ctx>> {
    // `raw_array(T, n)`: first argument must resolve to a type name, second to an
    // integer count.
    let Some(Expression::Identifier(type_arg, _)) = call.args.first() else {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            call.span.clone(),
            DiagnosticKind::Internal {
                detail: "raw_array expects a type as its first argument".to_string(),
            },
        ));
    };
    let elem_ty = resolve_type(
        &ctx.env,
        ctx.backend,
        &TypeName {
            path: vec![type_arg.clone()],
            generics: vec![],
            is_reference: false,
            span: call.span.clone(),
        },
    )?;
    let count_expr = call.args.get(1).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            call.span.clone(),
            DiagnosticKind::Internal {
                detail: "raw_array expects a count as its second argument".to_string(),
            },
        )
    })?;
    let count = resolve_expr(ctx, count_expr)?;
    let llvm_elem = ctx.backend.get_llvm_type(&elem_ty);
    let count_value = count.load(ctx.backend).into_int_value();

    let base = if call.is_new {
        let one = ctx.backend.const_i64(1);
        let size_ptr = ctx
            .backend
            .emit_gep(llvm_elem, llvm_elem.ptr_type(Default::default()).const_null(), &[one], "sizeofgep");
        let elem_size = ctx
            .backend
            .builder
            .build_ptr_to_int(size_ptr, ctx.backend.context.i64_type(), "elemsize")
            .unwrap();
        let total = ctx.backend.builder.build_int_mul(elem_size, count_value, "totalbytes").unwrap();
        let malloc = ctx.backend.module.get_function("malloc").expect("malloc declared at bootstrap");
        let c = ctx.backend.builder.build_call(malloc, &[total.into()], "rawarrmalloc").unwrap();
        c.try_as_basic_value().left().unwrap().into_pointer_value()
    } else {
        ctx.backend
            .builder
            .build_array_alloca(llvm_elem, count_value, "rawarralloca")
            .unwrap()
    };
    Ok(ResolvedValue::instance(base.as_basic_value_enum(), Type::raw_array(elem_ty)))
}

fn resolve_generic_struct_call<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, name: &str, call: &CallExpression) -> CoreResult<ResolvedValue<'ctx>> {
    let template = ctx.env.generic_struct_template(name).expect("checked by caller");
    let mut split = 0;
    let mut generic_args = Vec::new();
    for arg in &call.args {
        if let Expression::Identifier(ident, _) = arg {
            if ctx.env.is_struct(ident) || Primitive::ALL.iter().any(|p| p.name() == ident) {
                generic_args.push(resolve_type(
                    &ctx.env,
                    ctx.backend,
                    &TypeName {
                        path: vec![ident.clone()],
                        generics: vec![],
                        is_reference: false,
                        span: call.span.clone(),
                    },
                )?);
                split += 1;
                continue;
            }
        }
        break;
    }
    let instance = generics::instantiate_struct(ctx.backend, &template, &generic_args)?;
    construct_struct(ctx, &instance, &call.args[split..], call.is_new, call.span.clone())
}

fn resolve_struct_constructor_call<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, name: &str, call: &CallExpression) -> CoreResult<ResolvedValue<'ctx>> {
    let record = ctx.env.struct_record(name).expect("checked by caller");
    construct_struct(ctx, &record, &call.args, call.is_new, call.span.clone())
}

fn construct_struct<'a, 'ctx>(
    ctx: &ResolveCtx<'a, 'ctx>,
    record: &std::rc::Rc<crate::environment::StructRecord<'ctx>>,
    ctor_args: &[Expression],
    is_new: bool,
    span: Span,
) -> CoreResult<ResolvedValue<'ctx>> {
    let struct_ty = Type::Struct {
        name: record.name.clone(),
        generics: record.generics.clone(),
    };
    let llvm_struct = ctx
        .backend
        .get_llvm_type(&struct_ty)
        .into_struct_type();

    let self_addr = if is_new {
        let one = ctx.backend.const_i64(1);
        let size_ptr = ctx.backend.emit_gep(llvm_struct.into(), llvm_struct.ptr_type(Default::default()).const_null(), &[one], "structsizeof");
        let bytes = ctx.backend.builder.build_ptr_to_int(size_ptr, ctx.backend.context.i64_type(), "structsize").unwrap();
        let malloc = ctx.backend.module.get_function("malloc").expect("malloc declared at bootstrap");
        let call = ctx.backend.builder.build_call(malloc, &[bytes.into()], "structmalloc").unwrap();
        call.try_as_basic_value().left().unwrap().into_pointer_value()
    } else {
        ctx.backend.emit_alloca(&struct_ty, "structalloca")
    };

    let args: Vec<ResolvedValue<'ctx>> = ctor_args.iter().map(|a| resolve_expr(ctx, a)).collect::<CoreResult<_>>()?;
    let initializers = record.methods_named("__init__");
    if !initializers.is_empty() {
        let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        let matched = conv::resolve_method_overload(&ctx.env, &initializers, "__init__", &arg_types, 1, span.clone())?;

        let mut call_args = vec![self_addr.into()];
        for (i, arg) in args.iter().enumerate() {
            let declared = matched
                .conversions
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| arg.ty.clone());
            let value = if declared == arg.ty {
                arg.load(ctx.backend)
            } else {
                conv::convert(ctx.backend, &ctx.env, arg.load(ctx.backend), &arg.ty, &declared, span.clone())?
            };
            call_args.push(value.into());
        }
        ctx.backend.builder.build_call(matched.record.function, &call_args, "initcall").expect("init call");
    }

    Ok(ResolvedValue::instance_with_address(None, self_addr, struct_ty))
}

fn resolve_generic_function_call<'a, 'ctx>(ctx: &ResolveCtx<'a, 'ctx>, name: &str, call: &CallExpression) -> CoreResult<ResolvedValue<'ctx>> {
    let template = ctx.env.generic_function_template(name).expect("checked by caller");
    let args: Vec<ResolvedValue<'ctx>> = call.args.iter().map(|a| resolve_expr(ctx, a)).collect::<CoreResult<_>>()?;
    let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
    let function = generics::instantiate_function(ctx.backend, &template, &arg_types)?;
    let matched = conv::MatchResult {
        conversions: arg_types.iter().map(|_| None).collect(),
        record: function,
    };
    emit_call(ctx, &matched, &args, call.span.clone())
}

//! # Overload & Conversion Engine
//!
//! The fixed numeric conversion lattice plus overload-candidate matching. Both of
//! these operate purely on [`Type`] values and the [`Environment`]'s overload lists —
//! neither touches `inkwell` directly, so they stay testable without a live LLVM
//! context. The one place this module *does* emit instructions is [`convert`], which
//! takes a [`Backend`] to insert the actual cast/call.

use std::rc::Rc;

use inkwell::values::BasicValueEnum;

use crate::diagnostics::{CandidateMismatch, CoreResult, Diagnostic, DiagnosticKind};
use crate::emitter::Backend;
use crate::environment::{Environment, FunctionRecord};
use crate::lexer::Span;
use crate::registry::{Primitive, Type};

/// Whether `from` can convert to `to` at all, per the fixed lattice in the Design
/// Notes. This is deliberately permissive: it says "a conversion *exists*", not that
/// [`convert`] can emit it unconditionally (see the numeric→bool decision below).
pub fn can_convert<'ctx>(env: &Environment<'ctx>, from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Primitive(a), Type::Primitive(b)) => primitive_can_convert(*a, *b),
        (Type::Struct { name, .. }, _) => struct_has_autocast_to(env, name, to),
        _ => false,
    }
}

fn primitive_can_convert(from: Primitive, to: Primitive) -> bool {
    use Primitive::*;
    match (from, to) {
        (Int32, Int64) | (Uint32, Uint64) | (Uint32, Int64) => true,
        (Int64, Int32) | (Uint64, Uint32) => true,
        (Float32, Float64) => true,
        (Float64, Float32) => true,
        (a, b) if a.is_integer() && b.is_float() => true,
        (a, b) if a.is_float() && b.is_integer() => true,
        (Bool, b) if b.is_integer() || b.is_float() => true,
        // Resolved per DESIGN.md: numeric -> bool is implemented as a
        // compare-against-zero rather than left as an advertised-but-unimplemented
        // conversion.
        (a, Bool) if a.is_integer() || a.is_float() => true,
        _ => false,
    }
}

/// `true` when coercing `from` to `to` never loses information (drives which side of
/// a binary operator gets widened rather than narrowed).
pub fn widens(from: &Type, to: &Type) -> bool {
    use Primitive::*;
    match (from, to) {
        (Type::Primitive(a), Type::Primitive(b)) => matches!(
            (a, b),
            (Int32, Int64) | (Uint32, Uint64) | (Uint32, Int64) | (Float32, Float64) | (Bool, _)
        ),
        _ => false,
    }
}

/// Picks the common type two operands of `a`/`b` should be coerced to before a
/// binary numeric operation, per the widens-wins rule: the narrower side is coerced
/// up to the wider side. Returns `None` when neither direction widens (operator
/// lowering then falls back to requiring an exact match or a dunder method).
pub fn common_numeric_type(a: &Type, b: &Type) -> Option<Type> {
    if a == b {
        return Some(a.clone());
    }
    if widens(a, b) {
        return Some(b.clone());
    }
    if widens(b, a) {
        return Some(a.clone());
    }
    None
}

fn struct_has_autocast_to<'ctx>(env: &Environment<'ctx>, struct_name: &str, to: &Type) -> bool {
    let Some(record) = env.struct_record(struct_name) else {
        return false;
    };
    record
        .methods
        .borrow()
        .values()
        .flatten()
        .any(|m| m.autocast && m.params.len() == 1 && &m.return_type == to)
}

/// Emits the actual cast/call converting `value` (of type `from`) into `to`. Callers
/// are expected to have already confirmed `can_convert(env, from, to)`.
pub fn convert<'ctx>(
    backend: &Backend<'ctx>,
    env: &Environment<'ctx>,
    value: BasicValueEnum<'ctx>,
    from: &Type,
    to: &Type,
    span: Span,
) -> CoreResult<BasicValueEnum<'ctx>> {
    if from == to {
        return Ok(value);
    }
    match (from, to) {
        (Type::Primitive(a), Type::Primitive(b)) => convert_primitive(backend, value, *a, *b, span),
        (Type::Struct { name, .. }, _) => {
            let Some(method) = autocast_method(env, name, to) else {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    span,
                    DiagnosticKind::WrongType {
                        expected: vec![to.to_string()],
                        actual: from.to_string(),
                    },
                ));
            };
            let call = backend
                .builder
                .build_call(method.function, &[value.into()], "autocast")
                .expect("autocast call");
            Ok(call.try_as_basic_value().left().expect("autocast returns a value"))
        }
        _ => Err(Diagnostic::new(
            String::new(),
            String::new(),
            span,
            DiagnosticKind::WrongType {
                expected: vec![to.to_string()],
                actual: from.to_string(),
            },
        )),
    }
}

fn autocast_method<'ctx>(env: &Environment<'ctx>, struct_name: &str, to: &Type) -> Option<Rc<FunctionRecord<'ctx>>> {
    let record = env.struct_record(struct_name)?;
    record
        .methods
        .borrow()
        .values()
        .flatten()
        .find(|m| m.autocast && m.params.len() == 1 && &m.return_type == to)
        .cloned()
}

fn convert_primitive<'ctx>(
    backend: &Backend<'ctx>,
    value: BasicValueEnum<'ctx>,
    from: Primitive,
    to: Primitive,
    span: Span,
) -> CoreResult<BasicValueEnum<'ctx>> {
    use Primitive::*;
    let builder = &backend.builder;
    match (from, to) {
        (a, Bool) if a.is_integer() => {
            let int_value = value.into_int_value();
            let zero = int_value.get_type().const_zero();
            let cmp = builder
                .build_int_compare(inkwell::IntPredicate::NE, int_value, zero, "numtobool")
                .expect("icmp");
            Ok(builder.build_int_z_extend(cmp, backend.context.bool_type(), "boolext").expect("zext").into())
        }
        (a, Bool) if a.is_float() => {
            let float_value = value.into_float_value();
            let zero = float_value.get_type().const_zero();
            let cmp = builder
                .build_float_compare(inkwell::FloatPredicate::ONE, float_value, zero, "numtobool")
                .expect("fcmp");
            Ok(builder.build_int_z_extend(cmp, backend.context.bool_type(), "boolext").expect("zext").into())
        }
        (Bool, b) if b.is_integer() => {
            let dest = backend.primitive_int_type(b);
            Ok(builder
                .build_int_z_extend(value.into_int_value(), dest, "boolwiden")
                .expect("zext")
                .into())
        }
        (Bool, b) if b.is_float() => {
            let dest = backend.primitive_float_type(b);
            Ok(builder
                .build_unsigned_int_to_float(value.into_int_value(), dest, "boolfloat")
                .expect("uitofp")
                .into())
        }
        (a, b) if a.is_integer() && b.is_integer() => {
            let dest = backend.primitive_int_type(b);
            let src = value.into_int_value();
            let src_width = a.bit_width();
            let dst_width = b.bit_width();
            let result = if dst_width > src_width {
                if a.is_unsigned() {
                    builder.build_int_z_extend(src, dest, "zext")
                } else {
                    builder.build_int_s_extend(src, dest, "sext")
                }
                .expect("extend")
            } else {
                builder.build_int_truncate(src, dest, "trunc").expect("truncate")
            };
            Ok(result.into())
        }
        (a, b) if a.is_float() && b.is_float() => {
            let dest = backend.primitive_float_type(b);
            let src = value.into_float_value();
            let result = if b.bit_width() > a.bit_width() {
                builder.build_float_ext(src, dest, "fpext")
            } else {
                builder.build_float_trunc(src, dest, "fptrunc")
            }
            .expect("float cast");
            Ok(result.into())
        }
        (a, b) if a.is_integer() && b.is_float() => {
            let dest = backend.primitive_float_type(b);
            let src = value.into_int_value();
            let result = if a.is_unsigned() {
                builder.build_unsigned_int_to_float(src, dest, "uitofp")
            } else {
                builder.build_signed_int_to_float(src, dest, "sitofp")
            }
            .expect("int to float");
            Ok(result.into())
        }
        (a, b) if a.is_float() && b.is_integer() => {
            let dest = backend.primitive_int_type(b);
            let src = value.into_float_value();
            let result = if b.is_unsigned() {
                builder.build_float_to_unsigned_int(src, dest, "fptoui")
            } else {
                builder.build_float_to_signed_int(src, dest, "fptosi")
            }
            .expect("float to int");
            Ok(result.into())
        }
        _ => Err(Diagnostic::new(
            String::new(),
            String::new(),
            span,
            DiagnosticKind::WrongType {
                expected: vec![to.name().to_string()],
                actual: from.name().to_string(),
            },
        )),
    }
}

/// Result of matching one candidate overload against a call site's argument types.
pub struct MatchResult<'ctx> {
    pub record: Rc<FunctionRecord<'ctx>>,
    /// Per-argument conversion needed to call this candidate, `None` where the
    /// argument type already matches exactly.
    pub conversions: Vec<Option<Type>>,
}

/// Selects the first overload of `name` that either matches exactly or can be
/// reached by inserting conversions, mirroring the reference's first-match overload
/// semantics. On total failure, reports every candidate's mismatched parameter
/// indices so the diagnostic can show the whole candidate set.
pub fn resolve_overload<'ctx>(
    env: &Environment<'ctx>,
    name: &str,
    arg_types: &[Type],
    span: Span,
) -> CoreResult<MatchResult<'ctx>> {
    let overloads = env.function_overloads(name);
    if overloads.is_empty() {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            span,
            DiagnosticKind::NotDefined { name: name.to_string() },
        ));
    }
    match_candidates(env, &overloads, name, arg_types, 0, span)
}

/// Same first-match overload search as [`resolve_overload`], but against an
/// explicit candidate list (a struct's method set) rather than an environment
/// lookup, with `self_params` leading parameters on every candidate skipped before
/// comparing against `arg_types` — used for constructor (`__init__`) dispatch, where
/// the receiver slot is synthesized by the caller rather than supplied as an
/// ordinary argument expression.
pub fn resolve_method_overload<'ctx>(
    env: &Environment<'ctx>,
    candidates: &[Rc<FunctionRecord<'ctx>>],
    name: &str,
    arg_types: &[Type],
    self_params: usize,
    span: Span,
) -> CoreResult<MatchResult<'ctx>> {
    if candidates.is_empty() {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            span,
            DiagnosticKind::NotDefined { name: name.to_string() },
        ));
    }
    match_candidates(env, candidates, name, arg_types, self_params, span)
}

fn match_candidates<'ctx>(
    env: &Environment<'ctx>,
    overloads: &[Rc<FunctionRecord<'ctx>>],
    name: &str,
    arg_types: &[Type],
    self_params: usize,
    span: Span,
) -> CoreResult<MatchResult<'ctx>> {
    let mut candidates = Vec::new();
    for record in overloads {
        let params = &record.params[self_params.min(record.params.len())..];
        let arity_ok = if record.variadic {
            arg_types.len() >= params.len()
        } else {
            arg_types.len() == params.len()
        };
        if !arity_ok {
            candidates.push(CandidateMismatch {
                signature: signature_string(record),
                mismatched_params: (0..params.len()).collect(),
            });
            continue;
        }

        let mut conversions = Vec::with_capacity(params.len());
        let mut mismatched = Vec::new();
        for (i, (_, declared, _)) in params.iter().enumerate() {
            let actual = &arg_types[i];
            if actual == declared {
                conversions.push(None);
            } else if can_convert(env, actual, declared) {
                conversions.push(Some(declared.clone()));
            } else {
                mismatched.push(i);
            }
        }

        if mismatched.is_empty() {
            return Ok(MatchResult {
                record: record.clone(),
                conversions,
            });
        }
        candidates.push(CandidateMismatch {
            signature: signature_string(record),
            mismatched_params: mismatched,
        });
    }

    Err(Diagnostic::new(
        String::new(),
        String::new(),
        span,
        DiagnosticKind::NoOverload {
            callee: name.to_string(),
            candidates,
        },
    ))
}

fn signature_string(record: &FunctionRecord<'_>) -> String {
    let params: Vec<String> = record.params.iter().map(|(n, t, _)| format!("{n}: {t}")).collect();
    format!("{}({}) -> {}", record.name, params.join(", "), record.return_type)
}

impl<'ctx> Backend<'ctx> {
    fn primitive_int_type(&self, p: Primitive) -> inkwell::types::IntType<'ctx> {
        match p {
            Primitive::Int64 | Primitive::Uint64 => self.context.i64_type(),
            Primitive::Int32 | Primitive::Uint32 => self.context.i32_type(),
            Primitive::Int8 => self.context.i8_type(),
            Primitive::Bool => self.context.bool_type(),
            other => unreachable!("{other:?} is not an integer primitive"),
        }
    }

    fn primitive_float_type(&self, p: Primitive) -> inkwell::types::FloatType<'ctx> {
        match p {
            Primitive::Float64 => self.context.f64_type(),
            Primitive::Float32 => self.context.f32_type(),
            other => unreachable!("{other:?} is not a float primitive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn widening_conversions_are_detected() {
        let env = Environment::root();
        assert!(can_convert(&env, &Type::Primitive(Primitive::Int32), &Type::Primitive(Primitive::Int64)));
        assert!(widens(&Type::Primitive(Primitive::Int32), &Type::Primitive(Primitive::Int64)));
        assert!(!widens(&Type::Primitive(Primitive::Int64), &Type::Primitive(Primitive::Int32)));
    }

    #[test]
    fn narrowing_int_conversion_is_allowed_but_does_not_widen() {
        let env = Environment::root();
        assert!(can_convert(&env, &Type::Primitive(Primitive::Int64), &Type::Primitive(Primitive::Int32)));
        assert!(!widens(&Type::Primitive(Primitive::Int64), &Type::Primitive(Primitive::Int32)));
    }

    #[test]
    fn numeric_to_bool_is_convertible() {
        let env = Environment::root();
        assert!(can_convert(&env, &Type::Primitive(Primitive::Int64), &Type::Primitive(Primitive::Bool)));
        assert!(can_convert(&env, &Type::Primitive(Primitive::Float64), &Type::Primitive(Primitive::Bool)));
    }

    #[test]
    fn common_numeric_type_prefers_the_wider_operand() {
        let a = Type::Primitive(Primitive::Int32);
        let b = Type::Primitive(Primitive::Int64);
        assert_eq!(common_numeric_type(&a, &b), Some(b));
    }

    #[test]
    fn incompatible_primitives_have_no_common_type() {
        let a = Type::Primitive(Primitive::StrPointer);
        let b = Type::Primitive(Primitive::Int64);
        assert_eq!(common_numeric_type(&a, &b), None);
    }
}

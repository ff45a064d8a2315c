//! # Statement Compiler
//!
//! Top-level dispatch over [`Statement`] variants. Every compiling function returns
//! a [`Flow`] tag instead of unwinding or throwing: `Flow::Returned`/`Flow::Branched`
//! tell the caller that the straight-line block just terminated and any following
//! sibling statements must not be emitted (the accompanying basic block has no more
//! room before its terminator). This is the explicit `ControlFlow` value the Design
//! Notes call for in place of the reference's two throw-catch pairs.

use inkwell::values::FunctionValue;

use crate::diagnostics::{CoreResult, Diagnostic, DiagnosticKind};
use crate::emitter::Backend;
use crate::environment::{Environment, LoopContext, Record, VariableRecord};
use crate::parser::ast::{BlockStatement, Break, Continue, For, Free, IfElse, Return, Statement, SwitchCase, VariableAssignment, VariableDeclaration, While};
use crate::registry::{Primitive, Type};
use crate::resolver::{self, ResolveCtx, ResolvedValue};
use crate::types as conv;

/// What happened to the straight-line position after compiling a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Returned,
    Branched,
}

pub struct StmtCtx<'a, 'ctx> {
    pub backend: &'a Backend<'ctx>,
    pub env: Environment<'ctx>,
    pub return_type: Type,
    pub function: FunctionValue<'ctx>,
}

impl<'a, 'ctx> StmtCtx<'a, 'ctx> {
    fn with_env(&self, env: Environment<'ctx>) -> Self {
        StmtCtx {
            backend: self.backend,
            env,
            return_type: self.return_type.clone(),
            function: self.function,
        }
    }

    fn resolve_ctx(&self) -> ResolveCtx<'a, 'ctx> {
        ResolveCtx {
            backend: self.backend,
            env: self.env.clone(),
            return_type: self.return_type.clone(),
        }
    }

    fn resolve(&self, expr: &crate::parser::ast::Expression) -> CoreResult<ResolvedValue<'ctx>> {
        resolver::resolve_expr(&self.resolve_ctx(), expr)
    }
}

pub fn compile_block<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, block: &BlockStatement) -> CoreResult<Flow> {
    for stmt in &block.statements {
        let flow = compile_statement(ctx, stmt)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

pub fn compile_statement<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, stmt: &Statement) -> CoreResult<Flow> {
    match stmt {
        Statement::Expression(expr) => {
            ctx.resolve(expr)?;
            Ok(Flow::Normal)
        }
        Statement::Block(block) => compile_block(&ctx.with_env(ctx.env.child()), block),
        Statement::VariableDeclaration(decl) => compile_var_decl(ctx, decl),
        Statement::VariableAssignment(assign) => compile_assignment(ctx, assign),
        Statement::IfElse(if_else) => compile_if_else(ctx, if_else),
        Statement::While(w) => compile_while(ctx, w),
        Statement::For(f) => compile_for(ctx, f),
        Statement::Break(b) => compile_break(ctx, b),
        Statement::Continue(c) => compile_continue(ctx, c),
        Statement::Return(r) => compile_return(ctx, r),
        Statement::Switch(s) => compile_switch(ctx, s),
        Statement::Free(f) => compile_free(ctx, f),
        Statement::Raise(r) => Err(Diagnostic::new(
            String::new(),
            String::new(),
            r.span.clone(),
            DiagnosticKind::Unimplemented {
                feature: "raise".to_string(),
            },
        )),
        Statement::TryCatch(t) => Err(Diagnostic::new(
            String::new(),
            String::new(),
            t.try_block.span.clone(),
            DiagnosticKind::Unimplemented {
                feature: "try/catch".to_string(),
            },
        )),
        Statement::Function(_) | Statement::Struct(_) | Statement::Import(_) => Err(Diagnostic::new(
            String::new(),
            String::new(),
            crate::lexer::Span::default(),
            DiagnosticKind::NodeOutside {
                what: "nested function/struct/import declarations are only valid at module top level".to_string(),
            },
        )),
    }
}

fn as_i1<'ctx>(ctx: &StmtCtx<'_, 'ctx>, value: &ResolvedValue<'ctx>) -> CoreResult<inkwell::values::IntValue<'ctx>> {
    let coerced = if value.ty == Type::Primitive(Primitive::Bool) {
        value.load(ctx.backend)
    } else {
        conv::convert(ctx.backend, &ctx.env, value.load(ctx.backend), &value.ty, &Type::Primitive(Primitive::Bool), crate::lexer::Span::default())?
    };
    Ok(coerced.into_int_value())
}

fn compile_var_decl<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, decl: &VariableDeclaration) -> CoreResult<Flow> {
    if ctx.env.has_local(&decl.name) {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            decl.span.clone(),
            DiagnosticKind::DuplicateVariable { name: decl.name.clone() },
        ));
    }
    let value = ctx.resolve(&decl.value)?;
    let declared_ty = match &decl.type_name {
        Some(tn) => resolver::resolve_type(&ctx.env, ctx.backend, tn)?,
        None => value.ty.clone(),
    };
    let loaded = if declared_ty == value.ty {
        value.load(ctx.backend)
    } else {
        conv::convert(ctx.backend, &ctx.env, value.load(ctx.backend), &value.ty, &declared_ty, decl.span.clone())?
    };
    let slot = ctx.backend.emit_alloca(&declared_ty, &decl.name);
    ctx.backend.emit_volatile_store(slot, loaded, decl.volatile);
    ctx.env.declare_exclusive(
        &decl.name,
        Record::Variable(std::rc::Rc::new(VariableRecord {
            name: decl.name.clone(),
            address: slot,
            ty: declared_ty,
            volatile: decl.volatile,
        })),
    );
    Ok(Flow::Normal)
}

fn compile_assignment<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, assign: &VariableAssignment) -> CoreResult<Flow> {
    let target = ctx.resolve(&assign.target)?;
    let addr = target.address.ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            assign.span.clone(),
            DiagnosticKind::Internal {
                detail: "assignment target has no storage location".to_string(),
            },
        )
    })?;
    let value = ctx.resolve(&assign.value)?;
    let loaded = if target.ty == value.ty {
        value.load(ctx.backend)
    } else {
        conv::convert(ctx.backend, &ctx.env, value.load(ctx.backend), &value.ty, &target.ty, assign.span.clone())?
    };
    let volatile = match &assign.target {
        crate::parser::ast::Expression::Identifier(name, _) => ctx.env.variable(name).map(|v| v.volatile).unwrap_or(false),
        _ => false,
    };
    ctx.backend.emit_volatile_store(addr, loaded, volatile);
    Ok(Flow::Normal)
}

fn compile_if_else<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &IfElse) -> CoreResult<Flow> {
    let cond = ctx.resolve(&node.condition)?;
    let cond_i1 = as_i1(ctx, &cond)?;

    let then_block = ctx.backend.context.append_basic_block(ctx.function, "if.then");
    let cont_block = ctx.backend.context.append_basic_block(ctx.function, "if.cont");
    let else_block = if node.else_branch.is_some() {
        Some(ctx.backend.context.append_basic_block(ctx.function, "if.else"))
    } else {
        None
    };

    ctx.backend
        .builder
        .build_conditional_branch(cond_i1, then_block, else_block.unwrap_or(cont_block))
        .expect("cond branch");

    ctx.backend.builder.position_at_end(then_block);
    let then_ctx = ctx.with_env(ctx.env.child());
    let then_flow = compile_block(&then_ctx, &node.then_branch)?;
    if then_flow == Flow::Normal {
        ctx.backend.builder.build_unconditional_branch(cont_block).expect("branch to cont");
    }

    if let (Some(else_block), Some(else_branch)) = (else_block, &node.else_branch) {
        ctx.backend.builder.position_at_end(else_block);
        let else_ctx = ctx.with_env(ctx.env.child());
        let else_flow = compile_block(&else_ctx, else_branch)?;
        if else_flow == Flow::Normal {
            ctx.backend.builder.build_unconditional_branch(cont_block).expect("branch to cont");
        }
    }

    ctx.backend.builder.position_at_end(cont_block);
    Ok(Flow::Normal)
}

fn compile_while<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &While) -> CoreResult<Flow> {
    let cond_block = ctx.backend.context.append_basic_block(ctx.function, "while.cond");
    let body_block = ctx.backend.context.append_basic_block(ctx.function, "while.body");
    let cont_block = ctx.backend.context.append_basic_block(ctx.function, "while.cont");

    ctx.backend.builder.build_unconditional_branch(cond_block).expect("branch to cond");
    ctx.backend.builder.position_at_end(cond_block);
    let cond = ctx.resolve(&node.condition)?;
    let cond_i1 = as_i1(ctx, &cond)?;
    ctx.backend
        .builder
        .build_conditional_branch(cond_i1, body_block, cont_block)
        .expect("loop cond branch");

    ctx.env.enter_loop(LoopContext {
        continue_block: cond_block,
        body_block,
        condition_block: cond_block,
        ifbreak_block: cont_block,
        notbreak_block: cont_block,
    });

    ctx.backend.builder.position_at_end(body_block);
    let body_ctx = ctx.with_env(ctx.env.child());
    let body_flow = compile_block(&body_ctx, &node.body)?;
    if body_flow == Flow::Normal {
        ctx.backend.builder.build_unconditional_branch(cond_block).expect("back edge");
    }
    ctx.env.exit_loop();

    ctx.backend.builder.position_at_end(cont_block);
    Ok(Flow::Normal)
}

fn compile_for<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &For) -> CoreResult<Flow> {
    let iterable = ctx.resolve(&node.iterable)?;
    let Type::Struct { name, .. } = &iterable.ty else {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: iterable.ty.to_string(),
                member: "__iter__".to_string(),
            },
        ));
    };
    let record = ctx.env.struct_record(name).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::NotDefined { name: name.clone() },
        )
    })?;
    let iter_method = record.methods_named("__iter__").into_iter().next().ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: name.clone(),
                member: "__iter__".to_string(),
            },
        )
    })?;
    let self_addr = iterable.address.expect("struct instance must have an address");
    let iter_call = ctx
        .backend
        .builder
        .build_call(iter_method.function, &[self_addr.into()], "iterinit")
        .expect("__iter__ call");
    let iter_value = iter_call.try_as_basic_value().left().expect("__iter__ returns an iterator");
    let iterator_ty = iter_method.return_type.clone();
    let iter_slot = ctx.backend.emit_alloca(&iterator_ty, "iterslot");
    ctx.backend.emit_volatile_store(iter_slot, iter_value, false);

    let Type::Struct { name: iter_name, .. } = &iterator_ty else {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::Internal {
                detail: "__iter__ must return a struct iterator type".to_string(),
            },
        ));
    };
    let iter_record = ctx.env.struct_record(iter_name).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::NotDefined { name: iter_name.clone() },
        )
    })?;
    let done_method = iter_record.methods_named("__done__").into_iter().next().ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: iter_name.clone(),
                member: "__done__".to_string(),
            },
        )
    })?;
    let next_method = iter_record.methods_named("__next__").into_iter().next().ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::DoesntContain {
                owner: iter_name.clone(),
                member: "__next__".to_string(),
            },
        )
    })?;

    let cond_block = ctx.backend.context.append_basic_block(ctx.function, "for.cond");
    let body_block = ctx.backend.context.append_basic_block(ctx.function, "for.body");
    let cont_block = ctx.backend.context.append_basic_block(ctx.function, "for.cont");

    ctx.backend.builder.build_unconditional_branch(cond_block).expect("branch to cond");
    ctx.backend.builder.position_at_end(cond_block);
    let done_call = ctx
        .backend
        .builder
        .build_call(done_method.function, &[iter_slot.into()], "iterdone")
        .expect("__done__ call");
    let done_i1 = done_call.try_as_basic_value().left().expect("__done__ returns bool").into_int_value();
    let not_done = ctx.backend.builder.build_not(done_i1, "notdone").expect("not");
    ctx.backend
        .builder
        .build_conditional_branch(not_done, body_block, cont_block)
        .expect("loop cond branch");

    ctx.env.enter_loop(LoopContext {
        continue_block: cond_block,
        body_block,
        condition_block: cond_block,
        ifbreak_block: cont_block,
        notbreak_block: cont_block,
    });

    ctx.backend.builder.position_at_end(body_block);
    let next_call = ctx
        .backend
        .builder
        .build_call(next_method.function, &[iter_slot.into()], "iternext")
        .expect("__next__ call");
    let next_value = next_call.try_as_basic_value().left().expect("__next__ returns a value");
    let binding_slot = ctx.backend.emit_alloca(&next_method.return_type, &node.binding);
    ctx.backend.emit_volatile_store(binding_slot, next_value, false);

    let body_env = ctx.env.child();
    body_env.declare_exclusive(
        &node.binding,
        Record::Variable(std::rc::Rc::new(VariableRecord {
            name: node.binding.clone(),
            address: binding_slot,
            ty: next_method.return_type.clone(),
            volatile: false,
        })),
    );
    let body_ctx = ctx.with_env(body_env);
    let body_flow = compile_block(&body_ctx, &node.body)?;
    if body_flow == Flow::Normal {
        ctx.backend.builder.build_unconditional_branch(cond_block).expect("back edge");
    }
    ctx.env.exit_loop();

    ctx.backend.builder.position_at_end(cont_block);
    Ok(Flow::Normal)
}

fn compile_break<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &Break) -> CoreResult<Flow> {
    let target = ctx.env.loop_at_depth(node.depth).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::NodeOutside {
                what: format!("break {} outside any enclosing loop at that depth", node.depth),
            },
        )
    })?;
    ctx.backend
        .builder
        .build_unconditional_branch(target.ifbreak_block)
        .expect("break branch");
    Ok(Flow::Branched)
}

fn compile_continue<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &Continue) -> CoreResult<Flow> {
    let target = ctx.env.loop_at_depth(node.depth).ok_or_else(|| {
        Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::NodeOutside {
                what: format!("continue {} outside any enclosing loop at that depth", node.depth),
            },
        )
    })?;
    ctx.backend
        .builder
        .build_unconditional_branch(target.continue_block)
        .expect("continue branch");
    Ok(Flow::Branched)
}

fn compile_return<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &Return) -> CoreResult<Flow> {
    match &node.value {
        Some(expr) => {
            if ctx.return_type == Type::Primitive(Primitive::Void) {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    node.span.clone(),
                    DiagnosticKind::WrongType {
                        expected: vec!["void".to_string()],
                        actual: "a value".to_string(),
                    },
                ));
            }
            let value = ctx.resolve(expr)?;
            let coerced = if value.ty == ctx.return_type {
                value.load(ctx.backend)
            } else {
                conv::convert(ctx.backend, &ctx.env, value.load(ctx.backend), &value.ty, &ctx.return_type, node.span.clone())?
            };
            ctx.backend.builder.build_return(Some(&coerced)).expect("return");
        }
        None => {
            if ctx.return_type != Type::Primitive(Primitive::Void) {
                return Err(Diagnostic::new(
                    String::new(),
                    String::new(),
                    node.span.clone(),
                    DiagnosticKind::WrongType {
                        expected: vec![ctx.return_type.to_string()],
                        actual: "void".to_string(),
                    },
                ));
            }
            ctx.backend.builder.build_return(None).expect("void return");
        }
    }
    Ok(Flow::Returned)
}

/// Explicit heap deallocation. The operand must be a `new`-allocated struct
/// (freed via its address, not its by-value load), a raw array, or a raw
/// pointer; anything else is a type error rather than a no-op.
fn compile_free<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &Free) -> CoreResult<Flow> {
    let value = ctx.resolve(&node.value)?;
    let ptr = match &value.ty {
        Type::Struct { .. } => value.address.expect("struct argument to free must be addressable"),
        Type::RawArray(_) | Type::Primitive(Primitive::RawPointer) => value.load(ctx.backend).into_pointer_value(),
        other => {
            return Err(Diagnostic::new(
                String::new(),
                String::new(),
                node.span.clone(),
                DiagnosticKind::WrongType {
                    expected: vec!["a heap-allocated struct, raw array, or raw pointer".to_string()],
                    actual: other.to_string(),
                },
            ))
        }
    };
    let free_fn = ctx.backend.module.get_function("free").expect("free declared at bootstrap");
    ctx.backend.builder.build_call(free_fn, &[ptr.into()], "freecall").expect("free call");
    Ok(Flow::Normal)
}

/// Resolved per the Design Notes: rather than evaluate case constants through a
/// throwaway "garbage" insert point, the parser has already reduced every case label
/// to a compile-time `i64` (see [`SwitchCase::arms`]), so no such block is ever
/// needed here.
fn compile_switch<'a, 'ctx>(ctx: &StmtCtx<'a, 'ctx>, node: &SwitchCase) -> CoreResult<Flow> {
    let cond = ctx.resolve(&node.value)?;
    if !matches!(cond.ty, Type::Primitive(p) if p.is_integer()) {
        return Err(Diagnostic::new(
            String::new(),
            String::new(),
            node.span.clone(),
            DiagnosticKind::WrongType {
                expected: vec!["an integer type".to_string()],
                actual: cond.ty.to_string(),
            },
        ));
    }
    let cond_int = cond.load(ctx.backend).into_int_value();
    let int_ty = cond_int.get_type();

    let end_block = ctx.backend.context.append_basic_block(ctx.function, "switch.end");
    let default_block = ctx.backend.context.append_basic_block(ctx.function, "switch.default");

    let mut arm_blocks = Vec::with_capacity(node.arms.len());
    for (value, _) in &node.arms {
        let block = ctx.backend.context.append_basic_block(ctx.function, "switch.case");
        arm_blocks.push((int_ty.const_int(*value as u64, true), block));
    }

    ctx.backend
        .builder
        .build_switch(cond_int, default_block, &arm_blocks)
        .expect("switch");

    for ((_, body), (_, block)) in node.arms.iter().zip(arm_blocks.iter()) {
        ctx.backend.builder.position_at_end(*block);
        let arm_ctx = ctx.with_env(ctx.env.child());
        let flow = compile_block(&arm_ctx, body)?;
        if flow == Flow::Normal {
            ctx.backend.builder.build_unconditional_branch(end_block).expect("case fallthrough");
        }
    }

    ctx.backend.builder.position_at_end(default_block);
    match &node.default {
        Some(body) => {
            let default_ctx = ctx.with_env(ctx.env.child());
            let flow = compile_block(&default_ctx, body)?;
            if flow == Flow::Normal {
                ctx.backend.builder.build_unconditional_branch(end_block).expect("default fallthrough");
            }
        }
        None => {
            ctx.backend.builder.build_unreachable().expect("missing default is unreachable");
        }
    }

    ctx.backend.builder.position_at_end(end_block);
    Ok(Flow::Normal)
}

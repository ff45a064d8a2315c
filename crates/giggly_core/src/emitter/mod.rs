//! # Instruction Emitter
//!
//! Thin wrapper around `inkwell`'s context/module/builder trio. Every other
//! component (value resolver, statement compiler, overload/conversion engine,
//! generic instantiator) goes through [`Backend`] instead of touching
//! `inkwell::builder::Builder` directly — the same separation the reference
//! project keeps between its `CodegenContext` and the visitor modules that use it.
//!
//! `get_llvm_type` is the one place a semantic [`Type`](crate::registry::Type)
//! becomes an LLVM type, and it caches the result so the same `Type` always maps to
//! the same `BasicTypeEnum` instance within one compilation unit.

use std::cell::RefCell;
use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate};

use crate::registry::{Primitive, Type};

pub struct Backend<'ctx> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
    types: RefCell<HashMap<Type, BasicTypeEnum<'ctx>>>,
    struct_backing: RefCell<HashMap<(String, Vec<Type>), inkwell::types::StructType<'ctx>>>,
}

impl<'ctx> Backend<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        Backend {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            types: RefCell::new(HashMap::new()),
            struct_backing: RefCell::new(HashMap::new()),
        }
    }

    /// Opaque pointer type, used for every pointer-shaped primitive and for every
    /// struct/raw-array field/parameter slot (consistent with the reference's
    /// uniform `i8*` erasure for non-scalar values).
    pub fn ptr_type(&self) -> inkwell::types::PointerType<'ctx> {
        self.context.ptr_type(AddressSpace::default())
    }

    /// Registers the LLVM struct body for a user-defined struct type, keyed by its
    /// semantic identity (name + generic-argument tuple). Called once per distinct
    /// instantiation; idempotent on repeat calls with the same field list.
    pub fn declare_struct_body(&self, name: &str, generics: &[Type], field_types: &[BasicTypeEnum<'ctx>]) -> inkwell::types::StructType<'ctx> {
        let key = (name.to_string(), generics.to_vec());
        if let Some(existing) = self.struct_backing.borrow().get(&key) {
            return *existing;
        }
        let llvm_struct = self.context.opaque_struct_type(&mangled_struct_name(name, generics));
        llvm_struct.set_body(field_types, false);
        self.struct_backing.borrow_mut().insert(key, llvm_struct);
        llvm_struct
    }

    pub fn get_llvm_type(&self, ty: &Type) -> BasicTypeEnum<'ctx> {
        if let Some(cached) = self.types.borrow().get(ty) {
            return *cached;
        }
        let computed = self.compute_llvm_type(ty);
        self.types.borrow_mut().insert(ty.clone(), computed);
        computed
    }

    fn compute_llvm_type(&self, ty: &Type) -> BasicTypeEnum<'ctx> {
        match ty {
            Type::Primitive(p) => self.primitive_llvm_type(*p),
            Type::Struct { name, generics } => {
                if let Some(existing) = self.struct_backing.borrow().get(&(name.clone(), generics.clone())) {
                    return (*existing).into();
                }
                // Struct bodies are normally registered explicitly via
                // `declare_struct_body` before any value of the type is produced;
                // callers that only need the *pointer* representation (e.g. a
                // forward-declared field) fall back to an opaque pointer.
                self.ptr_type().into()
            }
            Type::RawArray(_) => self.ptr_type().into(),
            Type::Any | Type::GenericParam(_) => {
                unreachable!("Any/GenericParam must be resolved to a concrete type before codegen")
            }
        }
    }

    fn primitive_llvm_type(&self, p: Primitive) -> BasicTypeEnum<'ctx> {
        match p {
            Primitive::Int64 => self.context.i64_type().into(),
            Primitive::Int32 => self.context.i32_type().into(),
            Primitive::Uint64 => self.context.i64_type().into(),
            Primitive::Uint32 => self.context.i32_type().into(),
            Primitive::Float64 => self.context.f64_type().into(),
            Primitive::Float32 => self.context.f32_type().into(),
            Primitive::Int8 => self.context.i8_type().into(),
            Primitive::Bool => self.context.bool_type().into(),
            Primitive::StrPointer => self.ptr_type().into(),
            Primitive::RawPointer => self.ptr_type().into(),
            Primitive::NullPointer => self.ptr_type().into(),
            Primitive::Void => self.context.i8_type().into(), // never actually read; void has no value slot
        }
    }

    pub fn metadata_type(&self, ty: &Type) -> BasicMetadataTypeEnum<'ctx> {
        self.get_llvm_type(ty).into()
    }

    pub fn fn_type(&self, return_type: &Type, param_types: &[BasicMetadataTypeEnum<'ctx>], variadic: bool) -> FunctionType<'ctx> {
        match return_type {
            Type::Primitive(Primitive::Void) => self.context.void_type().fn_type(param_types, variadic),
            other => self.get_llvm_type(other).fn_type(param_types, variadic),
        }
    }

    pub fn declare_function(&self, mangled_name: &str, fn_type: FunctionType<'ctx>) -> FunctionValue<'ctx> {
        if let Some(existing) = self.module.get_function(mangled_name) {
            return existing;
        }
        self.module.add_function(mangled_name, fn_type, Some(Linkage::External))
    }

    pub fn emit_alloca(&self, ty: &Type, name: &str) -> PointerValue<'ctx> {
        self.builder.build_alloca(self.get_llvm_type(ty), name).expect("alloca")
    }

    pub fn emit_load(&self, ty: &Type, ptr: PointerValue<'ctx>, name: &str) -> BasicValueEnum<'ctx> {
        self.builder.build_load(self.get_llvm_type(ty), ptr, name).expect("load")
    }

    pub fn emit_volatile_store(&self, ptr: PointerValue<'ctx>, value: BasicValueEnum<'ctx>, volatile: bool) {
        let instr = self.builder.build_store(ptr, value).expect("store");
        if volatile {
            instr.set_volatile(true).expect("set volatile");
        }
    }

    pub fn emit_gep(&self, element_type: BasicTypeEnum<'ctx>, base: PointerValue<'ctx>, indices: &[IntValue<'ctx>], name: &str) -> PointerValue<'ctx> {
        unsafe {
            self.builder
                .build_gep(element_type, base, indices, name)
                .expect("gep")
        }
    }

    pub fn const_i64(&self, value: i64) -> IntValue<'ctx> {
        self.context.i64_type().const_int(value as u64, true)
    }

    pub fn icmp_for_op(&self, signed: bool, op: IcmpOp) -> IntPredicate {
        use IcmpOp::*;
        match (op, signed) {
            (Eq, _) => IntPredicate::EQ,
            (Neq, _) => IntPredicate::NE,
            (Lt, true) => IntPredicate::SLT,
            (Lt, false) => IntPredicate::ULT,
            (Gt, true) => IntPredicate::SGT,
            (Gt, false) => IntPredicate::UGT,
            (Lte, true) => IntPredicate::SLE,
            (Lte, false) => IntPredicate::ULE,
            (Gte, true) => IntPredicate::SGE,
            (Gte, false) => IntPredicate::UGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

fn mangled_struct_name(name: &str, generics: &[Type]) -> String {
    if generics.is_empty() {
        return name.to_string();
    }
    let parts: Vec<String> = generics.iter().map(|g| g.to_string()).collect();
    format!("{name}<{}>", parts.join(","))
}

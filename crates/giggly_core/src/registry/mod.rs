//! # Type Registry
//!
//! The canonical semantic type representation used throughout resolution,
//! conversion, and code generation. Kept free of any LLVM/`inkwell` lifetime so it
//! can be cloned, hashed, and used as a cache key (the generic-instantiation cache
//! and the per-context LLVM-type cache both key off `Type`) without dragging a
//! `'ctx` parameter through every data structure that merely wants to talk about
//! "the type of this expression."
//!
//! Struct field lists and method tables are *not* stored here — they live on the
//! [`crate::environment::StructRecord`] the environment holds, so that mutating a
//! struct's method table (adding a method record) never requires cloning every
//! `Type` value that names that struct.

use std::fmt;

/// Primitive (non-aggregate) scalar types, per the fixed catalogue the registry
/// bootstraps at compiler start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int64,
    Int32,
    Uint64,
    Uint32,
    Float64,
    Float32,
    Int8,
    Bool,
    StrPointer,
    Void,
    RawPointer,
    NullPointer,
}

impl Primitive {
    pub const ALL: [Primitive; 12] = [
        Primitive::Int64,
        Primitive::Int32,
        Primitive::Uint64,
        Primitive::Uint32,
        Primitive::Float64,
        Primitive::Float32,
        Primitive::Int8,
        Primitive::Bool,
        Primitive::StrPointer,
        Primitive::Void,
        Primitive::RawPointer,
        Primitive::NullPointer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int64 => "int",
            Primitive::Int32 => "int32",
            Primitive::Uint64 => "uint",
            Primitive::Uint32 => "uint32",
            Primitive::Float64 => "float",
            Primitive::Float32 => "float32",
            Primitive::Int8 => "int8",
            Primitive::Bool => "bool",
            Primitive::StrPointer => "str",
            Primitive::Void => "void",
            Primitive::RawPointer => "rawptr",
            Primitive::NullPointer => "nullptr_t",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Int64 | Primitive::Int32 | Primitive::Uint64 | Primitive::Uint32 | Primitive::Int8
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Primitive::Uint64 | Primitive::Uint32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::Float64 | Primitive::Float32)
    }

    pub fn bit_width(self) -> u32 {
        match self {
            Primitive::Int64 | Primitive::Uint64 | Primitive::Float64 => 64,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Float32 => 32,
            Primitive::Int8 | Primitive::Bool => 8,
            Primitive::StrPointer | Primitive::RawPointer | Primitive::NullPointer => 64,
            Primitive::Void => 0,
        }
    }
}

/// Canonical resolved type. Two struct types are equal iff they share a name *and*
/// generic-argument tuple (`Type::Struct`'s derived `PartialEq` does this for free);
/// a raw array always carries exactly one element-type parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(Primitive),
    /// A universal marker type accepted anywhere a generic parameter's bound is
    /// unconstrained. Resolves to nothing at the LLVM level on its own — it only
    /// ever appears as a generic template's parameter bound, never as a concrete
    /// variable/field/return type after instantiation.
    Any,
    Struct { name: String, generics: Vec<Type> },
    RawArray(Box<Type>),
    /// Only meaningful while resolving the body of a generic template; bound to a
    /// concrete `Type` for the duration of one instantiation via the environment's
    /// generic-binding map (see `crate::generics`).
    GenericParam(String),
}

impl Type {
    pub fn raw_array(element: Type) -> Type {
        Type::RawArray(Box::new(element))
    }

    pub fn array_struct(element: Type) -> Type {
        Type::Struct {
            name: "array".to_string(),
            generics: vec![element],
        }
    }

    pub fn is_struct_named(&self, name: &str) -> bool {
        matches!(self, Type::Struct { name: n, .. } if n == name)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct { .. } | Type::RawArray(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_integer() || p.is_float())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p.name()),
            Type::Any => write!(f, "Any"),
            Type::Struct { name, generics } => {
                write!(f, "{name}")?;
                if !generics.is_empty() {
                    write!(f, "[")?;
                    for (i, g) in generics.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{g}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Type::RawArray(elem) => write!(f, "raw_array[{elem}]"),
            Type::GenericParam(name) => write!(f, "{name}"),
        }
    }
}

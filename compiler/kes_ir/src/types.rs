//! Target type model.
//!
//! Kestrel values are either generic runtime objects or one of a handful of
//! native C types. Statement lowering only needs to ask a type a few questions
//! (is it refcounted, is it numeric, can it receive a value of another type,
//! and how), so the model is a small closed enum.

use std::fmt;

/// Native integer widths.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntKind {
    Char,
    Short,
    Int,
    Long,
    LongLong,
    SizeT,
}

impl IntKind {
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::LongLong => "long long",
            Self::SizeT => "size_t",
        }
    }

    pub const fn is_signed(self) -> bool {
        !matches!(self, Self::SizeT)
    }

    /// Runtime conversion from a native value to a new object reference.
    const fn to_object(self) -> &'static str {
        match self {
            Self::LongLong => "Kes_IntFromLongLong",
            Self::SizeT => "Kes_IntFromSize_t",
            _ => "Kes_IntFromLong",
        }
    }

    /// Runtime conversion from an object to this width.
    const fn from_object(self) -> &'static str {
        match self {
            Self::Char => "__kes_int_as_char",
            Self::Short => "__kes_int_as_short",
            Self::Int => "__kes_int_as_int",
            Self::Long => "Kes_IntAsLong",
            Self::LongLong => "Kes_IntAsLongLong",
            Self::SizeT => "Kes_IntAsSize_t",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatKind {
    Float,
    Double,
}

impl FloatKind {
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

/// Element type of a typed memory slice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SliceElem {
    Int(IntKind),
    Float(FloatKind),
}

impl SliceElem {
    fn c_name(self) -> &'static str {
        match self {
            Self::Int(k) => k.c_name(),
            Self::Float(k) => k.c_name(),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Int(IntKind::Char) => "char",
            Self::Int(IntKind::Short) => "short",
            Self::Int(IntKind::Int) => "int",
            Self::Int(IntKind::Long) => "long",
            Self::Int(IntKind::LongLong) => "longlong",
            Self::Int(IntKind::SizeT) => "size_t",
            Self::Float(FloatKind::Float) => "float",
            Self::Float(FloatKind::Double) => "double",
        }
    }
}

/// A resolved Kestrel type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Generic reference-counted runtime object.
    Object,
    Int(IntKind),
    Float(FloatKind),
    /// C boolean (`int` holding 0 or 1).
    Bint,
    /// Borrowed `char *`.
    CStr,
    /// Return type of procedures.
    Void,
    /// Typed view of a buffer; acquired and released like an object.
    Slice(SliceElem),
    /// Result of a failed analysis. Compatible with everything so one error
    /// does not cascade.
    Error,
}

/// How to turn a value of one type into another.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Coercion {
    /// Types already agree.
    Identity,
    /// Native value to a new object reference; NULL signals an error.
    ToObject { func: &'static str },
    /// Object to native value.
    ///
    /// When `exact` is set the error value alone signals an error, otherwise
    /// the runtime error indicator must be consulted as well.
    FromObject {
        func: &'static str,
        error_value: &'static str,
        exact: bool,
    },
    /// Plain C cast between native types.
    Cast,
}

impl Type {
    pub const LONG: Type = Type::Int(IntKind::Long);
    pub const INT: Type = Type::Int(IntKind::Int);
    pub const DOUBLE: Type = Type::Float(FloatKind::Double);

    /// Parse a declared type name such as `long`, `double` or `char*`.
    pub fn from_decl_name(name: &str) -> Option<Type> {
        let ty = match name {
            "object" => Type::Object,
            "char" => Type::Int(IntKind::Char),
            "short" => Type::Int(IntKind::Short),
            "int" => Type::Int(IntKind::Int),
            "long" => Type::Int(IntKind::Long),
            "longlong" | "long long" => Type::Int(IntKind::LongLong),
            "size_t" => Type::Int(IntKind::SizeT),
            "float" => Type::Float(FloatKind::Float),
            "double" => Type::Float(FloatKind::Double),
            "bint" => Type::Bint,
            "char*" | "char *" => Type::CStr,
            "void" => Type::Void,
            _ => {
                let elem = name.strip_suffix("[:]")?;
                match Type::from_decl_name(elem)? {
                    Type::Int(k) => Type::Slice(SliceElem::Int(k)),
                    Type::Float(k) => Type::Slice(SliceElem::Float(k)),
                    _ => return None,
                }
            }
        };
        Some(ty)
    }

    #[inline]
    pub const fn is_object_reference(&self) -> bool {
        matches!(self, Type::Object)
    }

    /// Integer, floating or boolean C value.
    #[inline]
    pub const fn is_native_numeric(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Float(_) | Type::Bint)
    }

    #[inline]
    pub const fn is_int(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Bint)
    }

    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    #[inline]
    pub const fn is_slice(&self) -> bool {
        matches!(self, Type::Slice(_))
    }

    #[inline]
    pub const fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Values of this type own a reference that must be released.
    #[inline]
    pub const fn needs_refcounting(&self) -> bool {
        matches!(self, Type::Object | Type::Slice(_))
    }

    /// Spelling of the type in C.
    pub fn c_name(&self) -> String {
        match self {
            Type::Object | Type::Error => "KesObject *".to_owned(),
            Type::Int(k) => k.c_name().to_owned(),
            Type::Float(k) => k.c_name().to_owned(),
            Type::Bint => "int".to_owned(),
            Type::CStr => "char *".to_owned(),
            Type::Void => "void".to_owned(),
            Type::Slice(e) => format!("KesSlice_{}", e.suffix()),
        }
    }

    /// C declaration of a variable called `cname`, without terminator.
    pub fn declaration_code(&self, cname: &str) -> String {
        let base = self.c_name();
        if base.ends_with('*') {
            format!("{base}{cname}")
        } else {
            format!("{base} {cname}")
        }
    }

    /// Initialiser for a fresh variable.
    pub fn zero_value(&self) -> &'static str {
        match self {
            Type::Slice(_) => "{ 0, 0 }",
            Type::Float(_) => "0.0",
            _ => "0",
        }
    }

    /// Value a native function of this return type yields on error, unless
    /// an exception value is declared.
    pub fn error_value(&self) -> Option<&'static str> {
        match self {
            Type::Object | Type::Error | Type::CStr => Some("NULL"),
            Type::Int(_) | Type::Bint => Some("-1"),
            Type::Float(_) => Some("-1.0"),
            Type::Slice(_) => Some("__kes_null_slice"),
            Type::Void => None,
        }
    }

    /// Element type spelling for slices.
    pub fn slice_elem_c_name(&self) -> Option<&'static str> {
        match self {
            Type::Slice(e) => Some(e.c_name()),
            _ => None,
        }
    }

    /// Can a value of `src` be stored in a location of this type?
    pub fn assignable_from(&self, src: &Type) -> bool {
        self.coercion_for(src).is_some()
    }

    /// The conversion needed to store a `src` value here, if one exists.
    pub fn coercion_for(&self, src: &Type) -> Option<Coercion> {
        if self == src || self.is_error() || src.is_error() {
            return Some(Coercion::Identity);
        }
        match (self, src) {
            (Type::Void, _) | (_, Type::Void) => None,
            (Type::Object, Type::Int(k)) => Some(Coercion::ToObject { func: k.to_object() }),
            (Type::Object, Type::Float(_)) => Some(Coercion::ToObject {
                func: "Kes_FloatFromDouble",
            }),
            (Type::Object, Type::Bint) => Some(Coercion::ToObject {
                func: "Kes_BoolFromLong",
            }),
            (Type::Object, Type::CStr) => Some(Coercion::ToObject {
                func: "Kes_StrFromString",
            }),
            (Type::Object, Type::Slice(e)) => Some(Coercion::ToObject {
                func: slice_to_object(*e),
            }),
            (Type::Int(k), Type::Object) => Some(Coercion::FromObject {
                func: k.from_object(),
                error_value: "-1",
                exact: false,
            }),
            (Type::Float(_), Type::Object) => Some(Coercion::FromObject {
                func: "Kes_FloatAsDouble",
                error_value: "-1.0",
                exact: false,
            }),
            (Type::Bint, Type::Object) => Some(Coercion::FromObject {
                func: "Kes_ObjectIsTrue",
                error_value: "-1",
                exact: true,
            }),
            (Type::CStr, Type::Object) => Some(Coercion::FromObject {
                func: "Kes_StrAsString",
                error_value: "NULL",
                exact: true,
            }),
            (Type::Slice(e), Type::Object) => Some(Coercion::FromObject {
                func: object_to_slice(*e),
                error_value: "__kes_null_slice",
                exact: true,
            }),
            // Float to int needs an explicit cast in the source language.
            (Type::Int(_) | Type::Bint, Type::Float(_)) => None,
            (a, b) if a.is_native_numeric() && b.is_native_numeric() => Some(Coercion::Cast),
            _ => None,
        }
    }

    /// Common type of two native numeric operands.
    pub fn widest_numeric(a: Type, b: Type) -> Type {
        match (a, b) {
            (Type::Float(x), Type::Float(y)) => Type::Float(x.max(y)),
            (Type::Float(x), _) | (_, Type::Float(x)) => Type::Float(x),
            (Type::Int(x), Type::Int(y)) => Type::Int(x.max(y)),
            (Type::Int(x), _) | (_, Type::Int(x)) => Type::Int(x),
            _ => Type::Bint,
        }
    }
}

fn slice_to_object(elem: SliceElem) -> &'static str {
    match elem {
        SliceElem::Float(_) => "Kes_SliceToObject_double",
        SliceElem::Int(IntKind::SizeT) => "Kes_SliceToObject_size_t",
        SliceElem::Int(_) => "Kes_SliceToObject_long",
    }
}

fn object_to_slice(elem: SliceElem) -> &'static str {
    match elem {
        SliceElem::Float(_) => "Kes_ObjectToSlice_double",
        SliceElem::Int(IntKind::SizeT) => "Kes_ObjectToSlice_size_t",
        SliceElem::Int(_) => "Kes_ObjectToSlice_long",
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Object => f.write_str("object"),
            Type::Int(IntKind::LongLong) => f.write_str("long long"),
            Type::Int(k) => f.write_str(k.c_name()),
            Type::Float(k) => f.write_str(k.c_name()),
            Type::Bint => f.write_str("bint"),
            Type::CStr => f.write_str("char*"),
            Type::Void => f.write_str("void"),
            Type::Slice(e) => write!(f, "{}[:]", e.c_name()),
            Type::Error => f.write_str("<error>"),
        }
    }
}

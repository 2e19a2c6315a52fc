//! Expressions, as consumed by the statement lowering.
//!
//! An expression is analysed once (`analyse_types`, returning the node with
//! its type settled and coercions wrapped around it) and then evaluated
//! post-order. A node whose value needs a fresh reference or a checked
//! runtime call computes into a temporary (`is_temp`); every other node's
//! `result()` is a plain C expression over its children. Temporary nodes
//! dispose of their children as soon as their own value exists; other nodes
//! dispose of them in their own disposal.

mod target;

pub use target::assign_to_entry;

use kes_diagnostic::{type_mismatch, ErrorCode};
use kes_ir::{BinaryOp, CmpOp, Coercion, Name, SliceElem, Span, Type};

use crate::emit::{escape_c, Code};
use crate::env::Env;
use crate::options::Directives;
use crate::symtab::{EntryId, NativeSignature, StorageKind};

/// A direct call to a native function.
#[derive(Clone, Debug)]
pub struct NativeCall {
    pub cname: String,
    pub signature: NativeSignature,
}

/// Conversion applied by a coercion node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Conversion {
    Convert(Coercion),
    /// Copy into a fresh temporary (owning a reference for objects).
    ToTemp,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name {
        name: Name,
        entry: Option<EntryId>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(Name, Expr)>,
        native: Option<NativeCall>,
    },
    Attribute {
        obj: Box<Expr>,
        attr: Name,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        directives: Directives,
        /// Indexing a typed slice directly.
        slice: bool,
    },
    Tuple {
        items: Vec<Expr>,
        /// Per-item conversions used when the tuple is an unpacking target.
        unpack: Vec<Expr>,
    },
    Yield(Option<Box<Expr>>),
    Coerce {
        inner: Box<Expr>,
        conversion: Conversion,
    },
    /// Value produced elsewhere; the source is filled in during emission.
    Clone {
        source: Option<String>,
    },
    Error,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Type,
    is_temp: bool,
    temp: Option<String>,
    result_code: String,
}

impl Expr {
    fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Expr {
            kind,
            span,
            ty,
            is_temp: false,
            temp: None,
            result_code: String::new(),
        }
    }

    pub fn int(value: i64, span: Span) -> Self {
        Self::new(ExprKind::Int(value), Type::LONG, span)
    }

    pub fn float(value: f64, span: Span) -> Self {
        Self::new(ExprKind::Float(value), Type::DOUBLE, span)
    }

    pub fn string(value: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Str(value.into()), Type::Object, span)
    }

    pub fn bool(value: bool, span: Span) -> Self {
        Self::new(ExprKind::Bool(value), Type::Bint, span)
    }

    pub fn none(span: Span) -> Self {
        Self::new(ExprKind::None, Type::Object, span)
    }

    pub fn name(name: Name, span: Span) -> Self {
        Self::new(ExprKind::Name { name, entry: None }, Type::Error, span)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, span: Span) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Type::Error,
            span,
        )
    }

    pub fn compare(op: CmpOp, lhs: Expr, rhs: Expr, span: Span) -> Self {
        Self::new(
            ExprKind::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Type::Bint,
            span,
        )
    }

    pub fn not(operand: Expr, span: Span) -> Self {
        Self::new(ExprKind::Not(Box::new(operand)), Type::Bint, span)
    }

    pub fn call(func: Expr, args: Vec<Expr>, span: Span) -> Self {
        Self::call_kw(func, args, Vec::new(), span)
    }

    pub fn call_kw(func: Expr, args: Vec<Expr>, kwargs: Vec<(Name, Expr)>, span: Span) -> Self {
        Self::new(
            ExprKind::Call {
                func: Box::new(func),
                args,
                kwargs,
                native: None,
            },
            Type::Object,
            span,
        )
    }

    pub fn attribute(obj: Expr, attr: Name, span: Span) -> Self {
        Self::new(
            ExprKind::Attribute {
                obj: Box::new(obj),
                attr,
            },
            Type::Object,
            span,
        )
    }

    pub fn index(base: Expr, index: Expr, span: Span) -> Self {
        Self::new(
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
                directives: Directives::default(),
                slice: false,
            },
            Type::Object,
            span,
        )
    }

    pub fn tuple(items: Vec<Expr>, span: Span) -> Self {
        Self::new(
            ExprKind::Tuple {
                items,
                unpack: Vec::new(),
            },
            Type::Object,
            span,
        )
    }

    pub fn yield_(value: Option<Expr>, span: Span) -> Self {
        Self::new(ExprKind::Yield(value.map(Box::new)), Type::Object, span)
    }

    /// Placeholder for a value computed by the enclosing statement.
    pub fn clone_placeholder(ty: Type, span: Span) -> Self {
        Self::new(ExprKind::Clone { source: None }, ty, span)
    }

    pub fn error(span: Span) -> Self {
        Self::new(ExprKind::Error, Type::Error, span)
    }

    // Queries

    #[inline]
    pub fn is_temp(&self) -> bool {
        self.is_temp
    }

    /// C expression for the value; valid after evaluation.
    #[inline]
    pub fn result(&self) -> &str {
        &self.result_code
    }

    /// Result is a temporary, a literal or a plain variable, so reading it
    /// twice is harmless.
    pub fn is_simple(&self) -> bool {
        if self.is_temp {
            return true;
        }
        matches!(
            self.kind,
            ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Str(_)
                | ExprKind::Bool(_)
                | ExprKind::None
                | ExprKind::Name { .. }
                | ExprKind::Clone { .. }
        )
    }

    /// Literal usable directly as a default argument value.
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::None
        )
    }

    /// Object constant for a literal.
    pub fn literal_object(&self, code: &mut Code<'_>) -> Option<String> {
        match &self.kind {
            ExprKind::Int(v) => Some(code.module.int_constant(*v)),
            ExprKind::Str(s) => Some(code.module.string_constant(s)),
            ExprKind::Bool(true) => Some("Kes_True".to_owned()),
            ExprKind::Bool(false) => Some("Kes_False".to_owned()),
            ExprKind::None => Some("Kes_None".to_owned()),
            _ => None,
        }
    }

    pub fn entry(&self) -> Option<EntryId> {
        match &self.kind {
            ExprKind::Name { entry, .. } => *entry,
            _ => None,
        }
    }

    pub fn contains_yield(&self) -> bool {
        match &self.kind {
            ExprKind::Yield(_) => true,
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                lhs.contains_yield() || rhs.contains_yield()
            }
            ExprKind::Not(e)
            | ExprKind::Attribute { obj: e, .. }
            | ExprKind::Coerce { inner: e, .. } => e.contains_yield(),
            ExprKind::Call {
                func, args, kwargs, ..
            } => {
                func.contains_yield()
                    || args.iter().any(Expr::contains_yield)
                    || kwargs.iter().any(|(_, e)| e.contains_yield())
            }
            ExprKind::Index { base, index, .. } => base.contains_yield() || index.contains_yield(),
            ExprKind::Tuple { items, .. } => items.iter().any(Expr::contains_yield),
            _ => false,
        }
    }

    /// First operation in this tree that needs the lock, with a description.
    pub fn find_object_operation(&self) -> Option<(Span, &'static str)> {
        if self.ty.is_error() {
            return None;
        }
        match &self.kind {
            ExprKind::Call {
                native: Some(call),
                args,
                ..
            } => {
                if !call.signature.nogil_callable {
                    return Some((self.span, "calling a function that needs the lock"));
                }
                return args.iter().find_map(Expr::find_object_operation);
            }
            ExprKind::Coerce {
                conversion: Conversion::Convert(Coercion::ToObject { .. } | Coercion::FromObject { .. }),
                ..
            } => return Some((self.span, "converting between objects and native values")),
            ExprKind::Yield(_) => return Some((self.span, "yield")),
            _ => {}
        }
        if self.ty.needs_refcounting() {
            return Some((self.span, "object operation"));
        }
        self.children().into_iter().find_map(Expr::find_object_operation)
    }

    fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                vec![&**lhs, &**rhs]
            }
            ExprKind::Not(e)
            | ExprKind::Attribute { obj: e, .. }
            | ExprKind::Coerce { inner: e, .. } => vec![&**e],
            ExprKind::Yield(Some(e)) => vec![&**e],
            ExprKind::Call {
                func, args, kwargs, ..
            } => {
                let mut v: Vec<&Expr> = vec![&**func];
                v.extend(args.iter());
                v.extend(kwargs.iter().map(|(_, e)| e));
                v
            }
            ExprKind::Index { base, index, .. } => vec![&**base, &**index],
            ExprKind::Tuple { items, .. } => items.iter().collect(),
            _ => Vec::new(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                vec![&mut **lhs, &mut **rhs]
            }
            ExprKind::Not(e)
            | ExprKind::Attribute { obj: e, .. }
            | ExprKind::Coerce { inner: e, .. } => vec![&mut **e],
            ExprKind::Yield(Some(e)) => vec![&mut **e],
            ExprKind::Call {
                func, args, kwargs, ..
            } => {
                let mut v: Vec<&mut Expr> = vec![&mut **func];
                v.extend(args.iter_mut());
                v.extend(kwargs.iter_mut().map(|(_, e)| e));
                v
            }
            ExprKind::Index { base, index, .. } => vec![&mut **base, &mut **index],
            ExprKind::Tuple { items, .. } => items.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Point the innermost clone placeholder at `source`.
    pub fn set_clone_source(&mut self, source: &str) {
        match &mut self.kind {
            ExprKind::Clone { source: slot } => *slot = Some(source.to_owned()),
            ExprKind::Coerce { inner, .. } => inner.set_clone_source(source),
            _ => debug_assert!(false, "set_clone_source on a non-clone expression"),
        }
    }

    // Type analysis

    pub fn analyse_types(mut self, env: &mut Env<'_>) -> Expr {
        let span = self.span;
        match self.kind {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::None => {
                self
            }
            ExprKind::Name { name, .. } => {
                let id = env.lookup(name, span);
                let entry = env.symtab.entry(id);
                self.ty = entry.ty;
                self.is_temp = entry.is_dynamic_global()
                    || matches!(
                        entry.storage,
                        StorageKind::ClassAttribute | StorageKind::NativeFunction
                    );
                if self.is_temp {
                    self.ty = Type::Object;
                }
                self.kind = ExprKind::Name {
                    name,
                    entry: Some(id),
                };
                self
            }
            ExprKind::Binary { op, lhs, rhs } => analyse_binary(op, *lhs, *rhs, span, env),
            ExprKind::Compare { op, lhs, rhs } => analyse_compare(op, *lhs, *rhs, span, env),
            ExprKind::Not(operand) => {
                let operand = operand.analyse_types(env).coerce_to_boolean(env);
                Expr::new(ExprKind::Not(Box::new(operand)), Type::Bint, span)
            }
            ExprKind::Call {
                func, args, kwargs, ..
            } => analyse_call(*func, args, kwargs, span, env),
            ExprKind::Attribute { obj, attr } => {
                let obj = obj.analyse_types(env).coerce_to_object(env);
                let mut e = Expr::new(
                    ExprKind::Attribute {
                        obj: Box::new(obj),
                        attr,
                    },
                    Type::Object,
                    span,
                );
                e.is_temp = true;
                e
            }
            ExprKind::Index { base, index, .. } => analyse_index(*base, *index, span, env, false),
            ExprKind::Tuple { items, .. } => {
                let items = items
                    .into_iter()
                    .map(|e| e.analyse_types(env).coerce_to_object(env))
                    .collect();
                let mut e = Expr::new(
                    ExprKind::Tuple {
                        items,
                        unpack: Vec::new(),
                    },
                    Type::Object,
                    span,
                );
                e.is_temp = true;
                e
            }
            ExprKind::Yield(value) => {
                if !env.in_function() {
                    env.error_at(ErrorCode::E3004, span, "'yield' outside function");
                    return Expr::error(span);
                }
                let value = value.map(|v| Box::new(v.analyse_types(env).coerce_to_object(env)));
                let mut e = Expr::new(ExprKind::Yield(value), Type::Object, span);
                e.is_temp = true;
                e
            }
            ExprKind::Coerce { .. } | ExprKind::Clone { .. } | ExprKind::Error => self,
        }
    }

    /// Insert the conversion needed to use this value as `dst`.
    pub fn coerce_to(self, dst: Type, env: &mut Env<'_>) -> Expr {
        if self.ty == dst || self.ty.is_error() || dst.is_error() {
            return self;
        }
        // Literals are simply respelled in the target type.
        let retype_literal = match (&self.kind, dst) {
            (ExprKind::Int(_) | ExprKind::Bool(_), Type::Object) | (ExprKind::Str(_), Type::CStr) => true,
            (ExprKind::Int(_), d) => d.is_native_numeric(),
            _ => false,
        };
        if retype_literal {
            return Expr { ty: dst, ..self };
        }
        match dst.coercion_for(&self.ty) {
            Some(Coercion::Identity) => self,
            Some(c) => {
                let span = self.span;
                let mut e = Expr::new(
                    ExprKind::Coerce {
                        inner: Box::new(self),
                        conversion: Conversion::Convert(c),
                    },
                    dst,
                    span,
                );
                e.is_temp = !matches!(c, Coercion::Cast);
                e
            }
            None => {
                let span = self.span;
                env.error(type_mismatch(
                    span,
                    &dst.to_string(),
                    &self.ty.to_string(),
                    "value",
                ));
                Expr::error(span)
            }
        }
    }

    pub fn coerce_to_object(self, env: &mut Env<'_>) -> Expr {
        self.coerce_to(Type::Object, env)
    }

    pub fn coerce_to_boolean(self, env: &mut Env<'_>) -> Expr {
        self.coerce_to(Type::Bint, env)
    }

    /// Make sure the value lives in a temporary of its own.
    pub fn coerce_to_temp(self, _env: &mut Env<'_>) -> Expr {
        if self.is_temp || self.ty.is_error() {
            return self;
        }
        let (span, ty) = (self.span, self.ty);
        let mut e = Expr::new(
            ExprKind::Coerce {
                inner: Box::new(self),
                conversion: Conversion::ToTemp,
            },
            ty,
            span,
        );
        e.is_temp = true;
        e
    }

    pub fn coerce_to_simple(self, env: &mut Env<'_>) -> Expr {
        if self.is_simple() {
            self
        } else {
            self.coerce_to_temp(env)
        }
    }

    // Emission

    fn allocate_own_temp(&mut self, code: &mut Code<'_>) -> String {
        let t = code.allocate_temp(self.ty, true);
        self.temp = Some(t.clone());
        t
    }

    pub fn generate_evaluation_code(&mut self, code: &mut Code<'_>) {
        let span = self.span;
        let ty = self.ty;
        let result = match &mut self.kind {
            ExprKind::Int(v) => {
                if ty.is_object_reference() {
                    code.module.int_constant(*v)
                } else {
                    v.to_string()
                }
            }
            ExprKind::Float(v) => format!("{v:?}"),
            ExprKind::Str(s) => {
                if ty == Type::CStr {
                    format!("\"{}\"", escape_c(s))
                } else {
                    code.module.string_constant(s)
                }
            }
            ExprKind::Bool(b) => match (ty.is_object_reference(), *b) {
                (true, true) => "Kes_True".to_owned(),
                (true, false) => "Kes_False".to_owned(),
                (false, true) => "1".to_owned(),
                (false, false) => "0".to_owned(),
            },
            ExprKind::None => "Kes_None".to_owned(),
            ExprKind::Name { name, entry } => {
                let (name, entry) = (*name, *entry);
                let Some(id) = entry else {
                    debug_assert!(false, "unresolved name reached code generation");
                    return;
                };
                self.generate_name_read(name, id, code)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                lhs.generate_evaluation_code(code);
                rhs.generate_evaluation_code(code);
                if ty.is_object_reference() {
                    let t = code.allocate_temp(ty, true);
                    code.putln(&format!(
                        "{t} = {}({}, {});",
                        op.runtime_function(),
                        lhs.result(),
                        rhs.result()
                    ));
                    code.put_error_if_null(&t, span);
                    lhs.generate_disposal_code(code);
                    rhs.generate_disposal_code(code);
                    self.temp = Some(t.clone());
                    t
                } else {
                    native_binary(op, lhs.result(), rhs.result())
                }
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let op = *op;
                lhs.generate_evaluation_code(code);
                rhs.generate_evaluation_code(code);
                match op.rich_compare_op() {
                    Some(rich) if lhs.ty.is_object_reference() => {
                        let t = code.allocate_temp(Type::Bint, false);
                        code.putln(&format!(
                            "{t} = Kes_RichCompareBool({}, {}, {rich});",
                            lhs.result(),
                            rhs.result()
                        ));
                        code.put_error_if(&format!("{t} < 0"), span);
                        lhs.generate_disposal_code(code);
                        rhs.generate_disposal_code(code);
                        self.temp = Some(t.clone());
                        t
                    }
                    _ => format!("({} {} {})", lhs.result(), op.c_operator(), rhs.result()),
                }
            }
            ExprKind::Not(operand) => {
                operand.generate_evaluation_code(code);
                format!("(!{})", operand.result())
            }
            ExprKind::Call {
                func,
                args,
                kwargs,
                native,
            } => {
                if let Some(call) = native {
                    let call = call.clone();
                    let t = generate_native_call(&call, args, ty, span, code);
                    if let Some(t) = &t {
                        self.temp = Some(t.clone());
                    }
                    t.unwrap_or_default()
                } else {
                    let t = generate_generic_call(func, args, kwargs, span, code);
                    self.temp = Some(t.clone());
                    t
                }
            }
            ExprKind::Attribute { obj, attr } => {
                let attr = *attr;
                obj.generate_evaluation_code(code);
                let n = code.intern_name(attr);
                let t = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{t} = Kes_GetAttr({}, {n});", obj.result()));
                code.put_error_if_null(&t, span);
                obj.generate_disposal_code(code);
                self.temp = Some(t.clone());
                t
            }
            ExprKind::Index {
                base,
                index,
                directives,
                slice,
            } => {
                let (d, slice) = (*directives, *slice);
                base.generate_evaluation_code(code);
                index.generate_evaluation_code(code);
                if slice {
                    put_slice_index_checks(base.result(), index.result(), d, span, code);
                    format!("{}.data[{}]", base.result(), index.result())
                } else {
                    let t = code.allocate_temp(Type::Object, true);
                    if index.ty.is_int() {
                        code.putln(&format!(
                            "{t} = Kes_GetItemInt({}, {}, {}, {});",
                            base.result(),
                            index.result(),
                            i32::from(d.wraparound),
                            i32::from(d.boundscheck)
                        ));
                    } else {
                        code.putln(&format!(
                            "{t} = Kes_GetItem({}, {});",
                            base.result(),
                            index.result()
                        ));
                    }
                    code.put_error_if_null(&t, span);
                    base.generate_disposal_code(code);
                    index.generate_disposal_code(code);
                    self.temp = Some(t.clone());
                    t
                }
            }
            ExprKind::Tuple { items, .. } => {
                for item in items.iter_mut() {
                    item.generate_evaluation_code(code);
                }
                let t = code.allocate_temp(Type::Object, true);
                code.putln(&format!("{t} = Kes_TupleNew({});", items.len()));
                code.put_error_if_null(&t, span);
                for (i, item) in items.iter_mut().enumerate() {
                    if item.is_temp() {
                        code.putln(&format!("Kes_TUPLE_SET_ITEM({t}, {i}, {});", item.result()));
                        item.generate_post_assignment_code(code);
                    } else {
                        code.put_incref(item.result(), Type::Object);
                        code.putln(&format!("Kes_TUPLE_SET_ITEM({t}, {i}, {});", item.result()));
                        item.generate_disposal_code(code);
                    }
                }
                self.temp = Some(t.clone());
                t
            }
            ExprKind::Yield(value) => {
                let t = crate::defs::generator::generate_yield(value.as_deref_mut(), span, code);
                self.temp = Some(t.clone());
                t
            }
            ExprKind::Coerce { inner, conversion } => {
                let conversion = *conversion;
                inner.generate_evaluation_code(code);
                match conversion {
                    Conversion::Convert(Coercion::Cast) => {
                        format!("(({}){})", ty.c_name(), inner.result())
                    }
                    Conversion::Convert(Coercion::Identity) => inner.result().to_owned(),
                    Conversion::Convert(Coercion::ToObject { func }) => {
                        let t = code.allocate_temp(ty, true);
                        code.putln(&format!("{t} = {func}({});", inner.result()));
                        code.put_error_if_null(&t, span);
                        inner.generate_disposal_code(code);
                        self.temp = Some(t.clone());
                        t
                    }
                    Conversion::Convert(Coercion::FromObject {
                        func,
                        error_value,
                        exact,
                    }) => {
                        let t = code.allocate_temp(ty, true);
                        code.putln(&format!("{t} = {func}({});", inner.result()));
                        let cond = from_object_error_check(&t, ty, error_value, exact);
                        code.put_error_if(&cond, span);
                        inner.generate_disposal_code(code);
                        self.temp = Some(t.clone());
                        t
                    }
                    Conversion::ToTemp => {
                        let t = code.allocate_temp(ty, true);
                        code.putln(&format!("{t} = {};", inner.result()));
                        code.put_incref(&t, ty);
                        inner.generate_disposal_code(code);
                        self.temp = Some(t.clone());
                        t
                    }
                }
            }
            ExprKind::Clone { source } => source.clone().unwrap_or_default(),
            ExprKind::Error => "<error>".to_owned(),
        };
        self.result_code = result;
    }

    fn generate_name_read(&mut self, name: Name, id: EntryId, code: &mut Code<'_>) -> String {
        let span = self.span;
        let entry = code.symtab.entry(id);
        let storage = entry.storage;
        let is_global = entry.is_dynamic_global() || storage == StorageKind::NativeFunction;
        let entry_ty = entry.ty;
        if storage == StorageKind::ClassAttribute || is_global {
            let n = code.intern_name(name);
            let t = self.allocate_own_temp(code);
            let namespace = code.class_namespace().map(str::to_owned);
            match (storage, namespace) {
                (StorageKind::ClassAttribute, Some(ns)) => {
                    code.putln(&format!("{t} = Kes_GetClassName({ns}, {n});"));
                }
                _ => code.putln(&format!("{t} = Kes_GetModuleGlobal({n});")),
            }
            code.put_error_if_null(&t, span);
            return t;
        }
        let access = code.entry_access(id);
        if entry_ty.is_object_reference() && storage == StorageKind::Local {
            let goto = code.error_goto(span);
            let text = escape_c(code.name_text(name));
            code.putln(&format!(
                "if (unlikely(!{access})) {{ Kes_RaiseUnboundLocal(\"{text}\"); {goto} }}"
            ));
        }
        access
    }

    /// Release the value and any temporaries it holds.
    pub fn generate_disposal_code(&mut self, code: &mut Code<'_>) {
        if self.is_temp {
            if let Some(t) = self.temp.take() {
                code.put_decref_clear(&t, self.ty);
                code.release_temp(&t);
            }
        } else {
            for child in self.children_mut() {
                child.generate_disposal_code(code);
            }
        }
    }

    /// The reference held by the result was transferred to its new owner.
    pub fn generate_post_assignment_code(&mut self, code: &mut Code<'_>) {
        if self.is_temp {
            if let Some(t) = self.temp.take() {
                if self.ty.needs_refcounting() {
                    code.putln(&format!("{t} = {};", crate::emit::clear_value(self.ty)));
                }
                code.release_temp(&t);
            }
        } else {
            for child in self.children_mut() {
                child.generate_disposal_code(code);
            }
        }
    }

    /// Return temporaries to the pool without releasing references.
    pub fn free_temps(&mut self, code: &mut Code<'_>) {
        if let Some(t) = self.temp.take() {
            code.release_temp(&t);
        }
        for child in self.children_mut() {
            child.free_temps(code);
        }
    }
}

fn native_binary(op: BinaryOp, lhs: &str, rhs: &str) -> String {
    match op.c_operator() {
        Some(c) => format!("({lhs} {c} {rhs})"),
        None => format!("{}({lhs}, {rhs})", op.native_helper()),
    }
}

pub(crate) fn from_object_error_check(t: &str, ty: Type, error_value: &str, exact: bool) -> String {
    match (ty, exact) {
        (Type::Bint, _) => format!("{t} < 0"),
        (Type::Slice(_), _) => format!("!{t}.data"),
        (_, true) => format!("{t} == {error_value}"),
        (_, false) => format!("({t} == {error_value}) && Kes_ErrOccurred()"),
    }
}

pub(crate) fn put_slice_index_checks(base: &str, index: &str, directives: Directives, span: Span, code: &mut Code<'_>) {
    if directives.wraparound {
        code.putln(&format!("if ({index} < 0) {index} += {base}.shape;"));
    }
    if directives.boundscheck {
        let goto = code.error_goto(span);
        code.putln(&format!(
            "if (unlikely({index} < 0 || {index} >= {base}.shape)) {{ Kes_RaiseIndexError(); {goto} }}"
        ));
    }
}

fn generate_native_call(
    call: &NativeCall,
    args: &mut [Expr],
    ty: Type,
    span: Span,
    code: &mut Code<'_>,
) -> Option<String> {
    for arg in args.iter_mut() {
        arg.generate_evaluation_code(code);
    }
    let arg_list = args
        .iter()
        .map(Expr::result)
        .collect::<Vec<_>>()
        .join(", ");
    let invocation = format!("{}({arg_list})", call.cname);
    let result = if ty.is_void() {
        code.putln(&format!("{invocation};"));
        if !matches!(call.signature.exception, crate::symtab::ExceptionSpec::None) {
            code.put_error_if("Kes_ErrOccurred()", span);
        }
        None
    } else {
        let t = code.allocate_temp(ty, true);
        code.putln(&format!("{t} = {invocation};"));
        if let Some(cond) = call.signature.error_condition(&t) {
            code.put_error_if(&cond, span);
        }
        Some(t)
    };
    for arg in args.iter_mut() {
        arg.generate_disposal_code(code);
    }
    result
}

fn generate_generic_call(
    func: &mut Expr,
    args: &mut [Expr],
    kwargs: &mut [(Name, Expr)],
    span: Span,
    code: &mut Code<'_>,
) -> String {
    func.generate_evaluation_code(code);
    for arg in args.iter_mut() {
        arg.generate_evaluation_code(code);
    }
    for (_, value) in kwargs.iter_mut() {
        value.generate_evaluation_code(code);
    }
    let t = code.allocate_temp(Type::Object, true);
    let positional = args.iter().map(Expr::result).collect::<Vec<_>>().join(", ");
    let line = if kwargs.is_empty() {
        if args.is_empty() {
            format!("{t} = Kes_CallNoArg({});", func.result())
        } else {
            format!(
                "{t} = Kes_Call({}, (KesObject *[]){{{positional}}}, {});",
                func.result(),
                args.len()
            )
        }
    } else {
        let values = kwargs
            .iter()
            .map(|(_, e)| e.result().to_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let names = kwargs
            .iter()
            .map(|(n, _)| code.intern_name(*n))
            .collect::<Vec<_>>()
            .join(", ");
        let positional = if args.is_empty() {
            "NULL".to_owned()
        } else {
            format!("(KesObject *[]){{{positional}}}")
        };
        format!(
            "{t} = Kes_CallKw({}, {positional}, {}, (KesObject *[]){{{values}}}, (KesObject *[]){{{names}}}, {});",
            func.result(),
            args.len(),
            kwargs.len()
        )
    };
    code.putln(&line);
    code.put_error_if_null(&t, span);
    func.generate_disposal_code(code);
    for arg in args.iter_mut() {
        arg.generate_disposal_code(code);
    }
    for (_, value) in kwargs.iter_mut() {
        value.generate_disposal_code(code);
    }
    t
}

fn analyse_binary(op: BinaryOp, lhs: Expr, rhs: Expr, span: Span, env: &mut Env<'_>) -> Expr {
    let lhs = lhs.analyse_types(env);
    let rhs = rhs.analyse_types(env);
    if lhs.ty.is_error() || rhs.ty.is_error() {
        return Expr::error(span);
    }
    let (ty, lhs, rhs, is_temp) = if lhs.ty.is_native_numeric() && rhs.ty.is_native_numeric() {
        let ty = Type::widest_numeric(lhs.ty, rhs.ty);
        if op.is_integer_only() && ty.is_float() {
            return unsupported_operator(op.as_symbol(), lhs.ty, rhs.ty, span, env);
        }
        (ty, lhs.coerce_to(ty, env), rhs.coerce_to(ty, env), false)
    } else if lhs.ty.is_object_reference() || rhs.ty.is_object_reference() {
        let lhs = lhs.coerce_to_object(env);
        let rhs = rhs.coerce_to_object(env);
        (Type::Object, lhs, rhs, true)
    } else {
        return unsupported_operator(op.as_symbol(), lhs.ty, rhs.ty, span, env);
    };
    let mut e = Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
        span,
    );
    e.is_temp = is_temp;
    e
}

fn analyse_compare(op: CmpOp, lhs: Expr, rhs: Expr, span: Span, env: &mut Env<'_>) -> Expr {
    let lhs = lhs.analyse_types(env);
    let rhs = rhs.analyse_types(env);
    if lhs.ty.is_error() || rhs.ty.is_error() {
        return Expr::error(span);
    }
    let (lhs, rhs, is_temp) = if lhs.ty.is_native_numeric() && rhs.ty.is_native_numeric() {
        let ty = Type::widest_numeric(lhs.ty, rhs.ty);
        (lhs.coerce_to(ty, env), rhs.coerce_to(ty, env), false)
    } else if lhs.ty.is_object_reference() || rhs.ty.is_object_reference() {
        let is_temp = op.rich_compare_op().is_some();
        (lhs.coerce_to_object(env), rhs.coerce_to_object(env), is_temp)
    } else {
        return unsupported_operator(op.as_symbol(), lhs.ty, rhs.ty, span, env);
    };
    let mut e = Expr::new(
        ExprKind::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        Type::Bint,
        span,
    );
    e.is_temp = is_temp;
    e
}

fn unsupported_operator(symbol: &str, lhs: Type, rhs: Type, span: Span, env: &mut Env<'_>) -> Expr {
    env.error_at(
        ErrorCode::E2009,
        span,
        format!("operator '{symbol}' not supported between '{lhs}' and '{rhs}'"),
    );
    Expr::error(span)
}

fn analyse_call(
    func: Expr,
    args: Vec<Expr>,
    kwargs: Vec<(Name, Expr)>,
    span: Span,
    env: &mut Env<'_>,
) -> Expr {
    if let ExprKind::Name { name, .. } = func.kind {
        let id = env.lookup(name, func.span);
        let entry = env.symtab.entry(id);
        if entry.storage == StorageKind::NativeFunction {
            if let Some(signature) = entry.signature.clone() {
                let cname = entry.cname.clone();
                return analyse_native_call(func, cname, signature, args, kwargs, span, env);
            }
        }
    }
    let func = func.analyse_types(env).coerce_to_object(env);
    let args = args
        .into_iter()
        .map(|a| a.analyse_types(env).coerce_to_object(env))
        .collect();
    let kwargs = kwargs
        .into_iter()
        .map(|(n, v)| (n, v.analyse_types(env).coerce_to_object(env)))
        .collect();
    let mut e = Expr::new(
        ExprKind::Call {
            func: Box::new(func),
            args,
            kwargs,
            native: None,
        },
        Type::Object,
        span,
    );
    e.is_temp = true;
    e
}

fn analyse_native_call(
    func: Expr,
    cname: String,
    signature: NativeSignature,
    args: Vec<Expr>,
    kwargs: Vec<(Name, Expr)>,
    span: Span,
    env: &mut Env<'_>,
) -> Expr {
    let fname = match func.kind {
        ExprKind::Name { name, .. } => env.name_text(name),
        _ => "",
    };
    if !kwargs.is_empty() {
        env.error_at(
            ErrorCode::E2008,
            span,
            format!("native function '{fname}' does not take keyword arguments"),
        );
        return Expr::error(span);
    }
    if args.len() != signature.params.len() {
        env.error_at(
            ErrorCode::E2010,
            span,
            format!(
                "native function '{fname}' takes {} arguments, {} given",
                signature.params.len(),
                args.len()
            ),
        );
        return Expr::error(span);
    }
    let args: Vec<Expr> = args
        .into_iter()
        .zip(signature.params.iter())
        .map(|(a, &p)| a.analyse_types(env).coerce_to(p, env))
        .collect();
    let ret = signature.ret;
    let mut e = Expr::new(
        ExprKind::Call {
            func: Box::new(func),
            args,
            kwargs: Vec::new(),
            native: Some(NativeCall { cname, signature }),
        },
        ret,
        span,
    );
    e.is_temp = !ret.is_void();
    e
}

pub(crate) fn analyse_index(base: Expr, index: Expr, span: Span, env: &mut Env<'_>, as_target: bool) -> Expr {
    let base = base.analyse_types(env);
    let index = index.analyse_types(env);
    if base.ty.is_error() || index.ty.is_error() {
        return Expr::error(span);
    }
    if let Type::Slice(elem) = base.ty {
        let index = index.coerce_to(Type::LONG, env).coerce_to_temp(env);
        let ty = match elem {
            SliceElem::Int(k) => Type::Int(k),
            SliceElem::Float(k) => Type::Float(k),
        };
        return Expr::new(
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
                directives: env.directives(),
                slice: true,
            },
            ty,
            span,
        );
    }
    let base = base.coerce_to_object(env);
    let index = if index.ty.is_int() && !as_target {
        index
    } else {
        index.coerce_to_object(env)
    };
    let mut e = Expr::new(
        ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
            directives: env.directives(),
            slice: false,
        },
        Type::Object,
        span,
    );
    e.is_temp = true;
    e
}

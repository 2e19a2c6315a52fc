//! Function and class definitions.
//!
//! A `def` becomes two C functions: a body `__kes_pf_*` taking its
//! arguments as objects, and a wrapper `__kes_pw_*` speaking the runtime
//! calling protocol (see [`wrapper`]). Generator functions replace the body
//! with a constructor plus a resumable body (see [`generator`]). A native
//! function (`cdef`) is a single C function with a typed signature, plus a
//! wrapper when it is overridable.

pub(crate) mod generator;
mod wrapper;

use kes_diagnostic::{Diagnostic, ErrorCode};
use kes_ir::{Name, Span, Type};
use rustc_hash::FxHashSet;

use crate::emit::{escape_c, Code, FunctionState, InsertionPoint};
use crate::env::Env;
use crate::expr::{assign_to_entry, Expr};
use crate::nodes::{analyse_block, block_contains_yield, declare_block, ends_in_terminator, generate_block, StatNode, Stmt};
use crate::options::DirectiveOverrides;
use crate::symtab::{
    EntryFlags, EntryId, ExceptionSpec, NativeSignature, ScopeId, ScopeKind, StorageKind, SymbolTable,
};

pub use wrapper::CallingConvention;
use wrapper::{WrapperParam, WrapperSpec};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    KeywordOnly,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    VarKwargs,
}

/// A parameter of a `def`.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Name,
    pub kind: ParamKind,
    pub default: Option<Expr>,
    pub span: Span,
    entry: Option<EntryId>,
}

impl Param {
    pub fn positional(name: Name, default: Option<Expr>, span: Span) -> Self {
        Param::new(name, ParamKind::Positional, default, span)
    }

    pub fn keyword_only(name: Name, default: Option<Expr>, span: Span) -> Self {
        Param::new(name, ParamKind::KeywordOnly, default, span)
    }

    pub fn star_args(name: Name, span: Span) -> Self {
        Param::new(name, ParamKind::VarArgs, None, span)
    }

    pub fn star_kwargs(name: Name, span: Span) -> Self {
        Param::new(name, ParamKind::VarKwargs, None, span)
    }

    fn new(name: Name, kind: ParamKind, default: Option<Expr>, span: Span) -> Self {
        Param {
            name,
            kind,
            default,
            span,
            entry: None,
        }
    }
}

/// `def name(params): body`
#[derive(Clone, Debug)]
pub struct FuncDef {
    pub name: Name,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub directives: DirectiveOverrides,
    pub span: Span,
    entry: Option<EntryId>,
    scope: Option<ScopeId>,
    convention: CallingConvention,
}

impl FuncDef {
    pub fn new(name: Name, params: Vec<Param>, body: Vec<Stmt>, span: Span) -> Self {
        FuncDef {
            name,
            params,
            body,
            directives: DirectiveOverrides::default(),
            span,
            entry: None,
            scope: None,
            convention: CallingConvention::Generic,
        }
    }

    #[must_use]
    pub fn with_directives(mut self, directives: DirectiveOverrides) -> Self {
        self.directives = directives;
        self
    }

    pub fn calling_convention(&self) -> CallingConvention {
        self.convention
    }

    fn check_params(&self, env: &mut Env<'_>) {
        let mut seen = FxHashSet::default();
        let mut saw_default = false;
        for param in &self.params {
            if !seen.insert(param.name) {
                let text = env.name_text(param.name);
                env.error_at(
                    ErrorCode::E1001,
                    param.span,
                    format!("duplicate argument '{text}' in function definition"),
                );
            }
            if param.kind == ParamKind::Positional {
                if param.default.is_some() {
                    saw_default = true;
                } else if saw_default {
                    env.error(
                        Diagnostic::error(ErrorCode::E1002)
                            .with_message("non-default argument follows default argument")
                            .with_label(param.span, "this argument needs a default value"),
                    );
                }
            }
        }
    }

    fn select_convention(&self, env: &Env<'_>, scope: ScopeId) -> CallingConvention {
        let directives = env.symtab.scope(scope).directives;
        if env.options.generic_calling_convention_only || directives.always_allow_keywords {
            return CallingConvention::Generic;
        }
        match self.params.as_slice() {
            [] => CallingConvention::NoArgs,
            [p] if p.kind == ParamKind::Positional && p.default.is_none() => CallingConvention::One,
            _ => CallingConvention::Generic,
        }
    }

    /// Module-level slots holding non-literal default values.
    fn emit_defaults(&mut self, code: &mut Code<'_>) -> Vec<Option<String>> {
        let mut slots = Vec::with_capacity(self.params.len());
        for param in &mut self.params {
            let Some(default) = &mut param.default else {
                slots.push(None);
                continue;
            };
            if let Some(constant) = default.literal_object(code) {
                slots.push(Some(constant));
                continue;
            }
            let slot = code.module.new_cached_default();
            default.generate_evaluation_code(code);
            if default.is_temp() {
                code.putln(&format!("Kes_XDECREF_SET({slot}, {});", default.result()));
                default.generate_post_assignment_code(code);
            } else {
                code.put_incref(default.result(), Type::Object);
                code.putln(&format!("Kes_XDECREF_SET({slot}, {});", default.result()));
                default.generate_disposal_code(code);
            }
            slots.push(Some(slot));
        }
        slots
    }
}

impl StatNode for FuncDef {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.entry = env.declare_name(self.name, Type::Object, self.span);
        let text = env.name_text(self.name);
        let directives = env.directives().with_overrides(self.directives);
        let scope = env
            .symtab
            .add_scope(ScopeKind::Function, self.name, text, env.scope, directives);
        if let Some(info) = env.symtab.function_info_mut(scope) {
            info.is_generator = block_contains_yield(&self.body);
        }
        self.check_params(env);
        for param in &mut self.params {
            param.entry = env.declare_in(scope, param.name, Type::Object, StorageKind::Argument, param.span);
        }
        let previous = env.enter_scope(scope);
        declare_block(&mut self.body, env);
        env.exit_scope(previous);
        self.scope = Some(scope);
    }

    fn analyse_types(mut self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "function definition");
        let Some(scope) = self.scope else {
            return Stmt::FuncDef(Box::new(self));
        };
        for param in &mut self.params {
            param.default = param
                .default
                .take()
                .map(|d| d.analyse_types(env).coerce_to_object(env));
        }
        let previous = env.enter_scope(scope);
        let flow = env.enter_function_flow(false);
        self.body = analyse_block(std::mem::take(&mut self.body), env);
        env.flow = flow;
        env.exit_scope(previous);
        mark_owned_variables(&mut env.symtab, scope);
        self.convention = self.select_convention(env, scope);
        Stmt::FuncDef(Box::new(self))
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let (Some(scope), Some(entry)) = (self.scope, self.entry) else {
            return;
        };
        let span = self.span;
        let defaults = self.emit_defaults(code);
        let prefix = code.symtab.scope(scope).cname_prefix.clone();
        let names = FunctionNames {
            body: code.module.unique_cname(&format!("__kes_pf_{prefix}")),
            wrapper: code.module.unique_cname(&format!("__kes_pw_{prefix}")),
            method_def: code.module.unique_cname(&format!("__kes_mdef_{prefix}")),
        };
        let qualified = qualified_name(code, scope);

        let args: Vec<EntryId> = self.params.iter().filter_map(|p| p.entry).collect();
        if code.symtab.scope(scope).is_generator() {
            generator::generate_generator(code, scope, &args, &names.body, &qualified, &mut self.body);
        } else {
            generate_def_body(code, scope, &args, &names.body, &qualified, &mut self.body);
        }

        let params = self
            .params
            .iter()
            .zip(defaults)
            .map(|(p, default)| WrapperParam {
                name: code.name_text(p.name),
                kind: p.kind,
                default,
            })
            .collect();
        let spec = WrapperSpec {
            cname: names.wrapper.clone(),
            method_def: names.method_def.clone(),
            name: code.name_text(self.name).to_owned(),
            qualified: qualified.clone(),
            params,
            convention: self.convention,
        };
        let body_cname = names.body.clone();
        wrapper::generate_wrapper(&spec, code, &mut |code: &mut Code<'_>, args: &[String]| {
            let t = code.allocate_temp(Type::Object, true);
            let mut call_args = vec!["__kes_self".to_owned()];
            call_args.extend(args.iter().cloned());
            code.putln(&format!("{t} = {body_cname}({});", call_args.join(", ")));
            t
        });

        code.mark_position(span);
        put_function_object(code, &names.method_def, entry, span);
    }

    fn span(&self) -> Span {
        self.span
    }
}

/// C names of the functions emitted for one `def`.
struct FunctionNames {
    body: String,
    wrapper: String,
    method_def: String,
}

/// Arguments reassigned in the body own a reference, as do object locals.
fn mark_owned_variables(symtab: &mut SymbolTable, scope: ScopeId) {
    let ids: Vec<EntryId> = symtab.scope(scope).entries().to_vec();
    for id in ids {
        let entry = symtab.entry_mut(id);
        if entry.in_closure() || !entry.ty.needs_refcounting() {
            continue;
        }
        let owned = match entry.storage {
            StorageKind::Argument => entry.flags.contains(EntryFlags::ASSIGNED),
            StorageKind::Local => true,
            _ => false,
        };
        if owned {
            entry.flags |= EntryFlags::NEEDS_RELEASE;
        }
    }
}

/// `Kes_NewFunction` for `method_def`, bound to `entry`.
fn put_function_object(code: &mut Code<'_>, method_def: &str, entry: EntryId, span: Span) {
    let cell = current_cell_object(code);
    let module = code.module_name_const();
    let t = code.allocate_temp(Type::Object, true);
    code.putln(&format!("{t} = Kes_NewFunction(&{method_def}, {cell}, {module});"));
    code.put_error_if_null(&t, span);
    let stolen = assign_to_entry(code, entry, &t, true, span);
    if stolen {
        code.putln(&format!("{t} = 0;"));
    } else {
        code.put_decref_clear(&t, Type::Object);
    }
    code.release_temp(&t);
}

/// Closure cell of the C function being emitted, as an object pointer.
fn current_cell_object(code: &Code<'_>) -> &'static str {
    let has_cell = code
        .func
        .scope
        .is_some_and(|s| CellLayout::of(code.symtab, s).has_cell);
    if has_cell {
        "(KesObject *)__kes_cur_scope"
    } else {
        "0"
    }
}

/// Dotted name of `scope` below the module.
pub(crate) fn qualified_name(code: &Code<'_>, scope: ScopeId) -> String {
    let mut parts = Vec::new();
    let mut cur = Some(scope);
    while let Some(id) = cur {
        let s = code.symtab.scope(id);
        if s.kind == ScopeKind::Module {
            break;
        }
        parts.push(code.name_text(s.name));
        cur = s.parent;
    }
    parts.reverse();
    parts.join(".")
}

/// Closure-cell facts of a function scope.
#[derive(Clone, Debug)]
pub(crate) struct CellLayout {
    pub scope: ScopeId,
    pub has_cell: bool,
    pub cell_struct: String,
    /// Cell struct of the enclosing function, when its variables are read.
    pub outer_struct: Option<String>,
}

impl CellLayout {
    pub fn of(symtab: &SymbolTable, scope: ScopeId) -> CellLayout {
        let Some(info) = symtab.function_info(scope) else {
            return CellLayout {
                scope,
                has_cell: false,
                cell_struct: String::new(),
                outer_struct: None,
            };
        };
        let outer_struct = if info.needs_outer_scope {
            symtab
                .scope(scope)
                .parent
                .and_then(|p| symtab.enclosing_function(p))
                .and_then(|f| symtab.function_info(f))
                .map(|f| f.cell_struct.clone())
        } else {
            None
        };
        CellLayout {
            scope,
            has_cell: info.needs_closure || info.is_generator,
            cell_struct: info.cell_struct.clone(),
            outer_struct,
        }
    }

    /// `struct` definition and clear function of the cell, including the
    /// temporaries a generator saves across suspension points.
    pub fn definition(&self, code: &Code<'_>, saved_temps: &[(String, Type)]) -> String {
        let mut fields: Vec<(String, Type)> = code
            .symtab
            .closure_entries(self.scope)
            .map(|id| {
                let e = code.symtab.entry(id);
                (e.cname.clone(), e.ty)
            })
            .collect();
        fields.extend(saved_temps.iter().cloned());

        let name = &self.cell_struct;
        let mut out = format!("struct {name} {{\n  KES_OBJECT_HEAD\n");
        if let Some(outer) = &self.outer_struct {
            out.push_str(&format!("  struct {outer} *__kes_outer_scope;\n"));
        }
        for (cname, ty) in &fields {
            out.push_str(&format!("  {};\n", ty.declaration_code(cname)));
        }
        out.push_str("};\n");
        out.push_str(&format!(
            "static void {name}_clear(KesObject *o) {{\n  struct {name} *p = (struct {name} *)o;\n"
        ));
        if self.outer_struct.is_some() {
            out.push_str("  Kes_XDECREF((KesObject *)p->__kes_outer_scope);\n");
        }
        for (cname, ty) in &fields {
            if ty.is_slice() {
                out.push_str(&format!("  Kes_SLICE_XDECREF(p->{cname});\n"));
            } else if ty.needs_refcounting() {
                out.push_str(&format!("  Kes_XDECREF(p->{cname});\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    /// Allocate the cell and link it to the enclosing one (already read
    /// from `__kes_self` into `__kes_outer_scope`).
    pub fn put_allocation(&self, code: &mut Code<'_>, span: Span) {
        let name = &self.cell_struct;
        code.putln(&format!(
            "__kes_cur_scope = (struct {name} *)Kes_ScopeNew(sizeof(struct {name}), {name}_clear);"
        ));
        code.put_error_if_null("__kes_cur_scope", span);
        if self.outer_struct.is_some() {
            code.putln("__kes_cur_scope->__kes_outer_scope = __kes_outer_scope;");
            code.putln("Kes_INCREF((KesObject *)__kes_outer_scope);");
        }
    }
}

/// Declarations written at the top of a function body once its locals and
/// temporaries are known.
pub(crate) fn put_declarations(
    code: &mut Code<'_>,
    ip: InsertionPoint,
    layout: &CellLayout,
    ret: Option<Type>,
) {
    if let Some(ret) = ret {
        let line = format!("{} = {};", ret.declaration_code("__kes_r"), ret.zero_value());
        code.put_at(ip, &line);
    }
    if layout.has_cell {
        let line = format!("struct {} *__kes_cur_scope = 0;", layout.cell_struct);
        code.put_at(ip, &line);
    }
    if let Some(outer) = &layout.outer_struct {
        let line = format!("struct {outer} *__kes_outer_scope = 0;");
        code.put_at(ip, &line);
    }
    let symtab = code.symtab;
    for &id in symtab.scope(layout.scope).entries() {
        let e = symtab.entry(id);
        if e.storage == StorageKind::Local && !e.in_closure() {
            let line = format!("{} = {};", e.ty.declaration_code(&e.cname), e.ty.zero_value());
            code.put_at(ip, &line);
        }
    }
    for line in code.func.temp_declarations() {
        code.put_at(ip, &line);
    }
    for decl in code.func.extra_decls.clone() {
        code.put_at(ip, &format!("{decl};"));
    }
}

/// Copy closure arguments into the cell and take references to owned ones.
fn put_argument_setup(code: &mut Code<'_>, args: &[EntryId]) {
    let symtab = code.symtab;
    for &id in args {
        let e = symtab.entry(id);
        if e.in_closure() {
            let access = code.entry_access(id);
            code.putln(&format!("{access} = {};", e.cname));
            code.put_incref(&e.cname, e.ty);
        } else if e.flags.contains(EntryFlags::NEEDS_RELEASE) {
            code.put_incref(&e.cname, e.ty);
        }
    }
}

/// Release owned variables and the cell at the return label.
fn put_variable_release(code: &mut Code<'_>, layout: &CellLayout) {
    let symtab = code.symtab;
    for &id in symtab.scope(layout.scope).entries() {
        let e = symtab.entry(id);
        if e.flags.contains(EntryFlags::NEEDS_RELEASE) {
            code.put_xdecref(&e.cname, e.ty);
        }
    }
    if layout.has_cell {
        code.putln("Kes_XDECREF((KesObject *)__kes_cur_scope);");
    }
}

fn put_trace_summary(code: &Code<'_>, cname: &str) {
    let (labels, used) = code.func.label_stats();
    tracing::debug!(
        function = cname,
        labels,
        used_labels = used,
        temps = code.func.temp_count(),
        "emitted function body"
    );
}

/// Emit the body function `__kes_pf_*` of a non-generator `def`.
fn generate_def_body(
    code: &mut Code<'_>,
    scope: ScopeId,
    args: &[EntryId],
    cname: &str,
    qualified: &str,
    body: &mut [Stmt],
) {
    let layout = CellLayout::of(code.symtab, scope);
    let previous = code.enter_function(FunctionState::new(Some(scope), qualified));
    let span = body.first().map_or(Span::DUMMY, Stmt::span);

    let ip = code.insertion_point();
    if let Some(outer) = &layout.outer_struct {
        code.putln(&format!("__kes_outer_scope = (struct {outer} *)__kes_self;"));
    }
    if layout.has_cell {
        layout.put_allocation(code, span);
    }
    put_argument_setup(code, args);
    generate_block(body, code);
    if !ends_in_terminator(body) {
        code.putln("__kes_r = Kes_None; Kes_INCREF(Kes_None);");
    }
    put_dynamic_epilogue(code, &layout, !ends_in_terminator(body));
    put_declarations(code, ip, &layout, Some(Type::Object));

    if layout.has_cell {
        let text = layout.definition(code, &[]);
        code.module.add_scope_struct(text);
    }
    put_trace_summary(code, cname);
    let mut state = code.leave_function(previous);

    let symtab = code.symtab;
    let mut params = vec!["KesObject *__kes_self".to_owned()];
    params.extend(args.iter().map(|&id| {
        let e = symtab.entry(id);
        e.ty.declaration_code(&e.cname)
    }));
    let header = format!("static KesObject *{cname}({})", params.join(", "));
    code.module.add_prototype(format!("{header};"));
    code.module
        .add_function(format!("{header} {{\n{}}}\n", state.take_output()));
}

/// Error and return labels of a function returning an object. `falls_through`
/// is false when the body already ended with a jump.
fn put_dynamic_epilogue(code: &mut Code<'_>, layout: &CellLayout, falls_through: bool) {
    let labels = code.labels();
    if falls_through {
        code.put_goto(labels.return_label);
    }
    if code.label_used(labels.error_label) {
        code.put_label(labels.error_label);
        for (cname, ty) in code.func.all_managed_temps() {
            code.put_xdecref(&cname, ty);
        }
        code.put_add_traceback();
        code.putln("Kes_XDECREF(__kes_r); __kes_r = 0;");
    }
    code.put_label(labels.return_label);
    put_variable_release(code, layout);
    code.putln("return __kes_r;");
}

/// A parameter of a native function.
#[derive(Clone, Debug)]
pub struct NativeParam {
    pub name: Name,
    pub ty: Type,
    pub span: Span,
}

/// `cdef [ret] name(params) [except v] [nogil] [with gil]: body`, or with
/// `cpdef`, `overridable` set.
#[derive(Clone, Debug)]
pub struct NativeFuncDef {
    pub name: Name,
    pub params: Vec<NativeParam>,
    pub ret: Type,
    pub exception: ExceptionSpec,
    /// May be called without the lock; the body runs without it.
    pub lock_released: bool,
    /// Acquire the lock for the duration of the body.
    pub with_lock: bool,
    /// Also callable dynamically; inside a class, dynamic overrides win.
    pub overridable: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
    entry: Option<EntryId>,
    scope: Option<ScopeId>,
    arg_entries: Vec<EntryId>,
    in_class: bool,
    /// Object-to-native conversions of the wrapper's arguments.
    from_object: Vec<Expr>,
    /// Native-to-object conversions used by the override check.
    to_object: Vec<Expr>,
    /// Conversions of the call result to and from objects.
    result_to_object: Option<Expr>,
    result_from_object: Option<Expr>,
}

impl NativeFuncDef {
    pub fn new(name: Name, params: Vec<NativeParam>, ret: Type, body: Vec<Stmt>, span: Span) -> Self {
        NativeFuncDef {
            name,
            params,
            ret,
            exception: ExceptionSpec::None,
            lock_released: false,
            with_lock: false,
            overridable: false,
            body,
            span,
            entry: None,
            scope: None,
            arg_entries: Vec::new(),
            in_class: false,
            from_object: Vec::new(),
            to_object: Vec::new(),
            result_to_object: None,
            result_from_object: None,
        }
    }

    #[must_use]
    pub fn with_exception(mut self, exception: ExceptionSpec) -> Self {
        self.exception = exception;
        self
    }

    #[must_use]
    pub fn nogil(mut self) -> Self {
        self.lock_released = true;
        self
    }

    #[must_use]
    pub fn with_gil(mut self) -> Self {
        self.with_lock = true;
        self
    }

    #[must_use]
    pub fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    fn body_runs_without_lock(&self) -> bool {
        self.lock_released && !self.with_lock
    }

    /// The native entry checks for a dynamic override before running.
    fn checks_override(&self) -> bool {
        self.overridable
            && self.in_class
            && !self.body_runs_without_lock()
            && self.params.first().is_some_and(|p| p.ty.is_object_reference())
    }

    fn c_return_type(&self) -> Type {
        self.ret
    }

    /// Value returned from the error label.
    fn error_return(&self) -> Option<String> {
        if self.ret.is_void() {
            return None;
        }
        if self.ret.is_object_reference() {
            return Some("0".to_owned());
        }
        match &self.exception {
            ExceptionSpec::Value(v) => Some(v.clone()),
            ExceptionSpec::None => Some(self.ret.zero_value().to_owned()),
        }
    }
}

impl StatNode for NativeFuncDef {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        let span = self.span;
        self.in_class = env.scope_kind() == ScopeKind::Class;
        let signature = NativeSignature {
            params: self.params.iter().map(|p| p.ty).collect(),
            ret: self.ret,
            exception: self.exception.clone(),
            nogil_callable: self.lock_released,
        };
        self.entry = if self.in_class {
            env.declare_name(self.name, Type::Object, span)
        } else {
            let id = env.declare_in(env.scope, self.name, Type::Object, StorageKind::NativeFunction, span);
            if let Some(id) = id {
                env.symtab.entry_mut(id).signature = Some(signature);
            }
            id
        };

        let text = env.name_text(self.name);
        let directives = env.directives();
        let scope = env
            .symtab
            .add_scope(ScopeKind::Function, self.name, text, env.scope, directives);
        if let Some(info) = env.symtab.function_info_mut(scope) {
            info.return_type = self.ret;
            info.is_native = true;
            info.lock_released = self.body_runs_without_lock();
        }
        let mut seen = FxHashSet::default();
        for param in &self.params {
            if !seen.insert(param.name) {
                let ptext = env.name_text(param.name);
                env.error_at(
                    ErrorCode::E1001,
                    param.span,
                    format!("duplicate argument '{ptext}' in function definition"),
                );
            }
            if let Some(id) = env.declare_in(scope, param.name, param.ty, StorageKind::Argument, param.span) {
                env.symtab.entry_mut(id).flags |= EntryFlags::DECLARED_NATIVE;
                self.arg_entries.push(id);
            }
        }
        let previous = env.enter_scope(scope);
        declare_block(&mut self.body, env);
        env.exit_scope(previous);
        self.scope = Some(scope);
    }

    fn analyse_types(mut self, env: &mut Env<'_>) -> Stmt {
        let span = self.span;
        let Some(scope) = self.scope else {
            return Stmt::NativeFuncDef(Box::new(self));
        };
        if self.body_runs_without_lock() && self.ret.is_object_reference() {
            env.error_at(
                ErrorCode::E2006,
                span,
                "function without the lock cannot return an object",
            );
        }
        if self.overridable {
            env.require_lock(span, "overridable function definition");
            self.from_object = self
                .params
                .iter()
                .map(|p| Expr::clone_placeholder(Type::Object, p.span).coerce_to(p.ty, env))
                .collect();
            self.to_object = self
                .params
                .iter()
                .map(|p| Expr::clone_placeholder(p.ty, p.span).coerce_to_object(env))
                .collect();
            if !self.ret.is_void() {
                self.result_to_object =
                    Some(Expr::clone_placeholder(self.ret, span).coerce_to_object(env));
                self.result_from_object =
                    Some(Expr::clone_placeholder(Type::Object, span).coerce_to(self.ret, env));
            }
        }
        let previous = env.enter_scope(scope);
        let flow = env.enter_function_flow(self.body_runs_without_lock());
        self.body = analyse_block(std::mem::take(&mut self.body), env);
        env.flow = flow;
        env.exit_scope(previous);
        mark_owned_variables(&mut env.symtab, scope);
        Stmt::NativeFuncDef(Box::new(self))
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let (Some(scope), Some(entry)) = (self.scope, self.entry) else {
            return;
        };
        let span = self.span;
        let prefix = code.symtab.scope(scope).cname_prefix.clone();
        let cname = if self.in_class {
            code.module.unique_cname(&format!("__kes_f_{prefix}"))
        } else {
            code.symtab.entry(entry).cname.clone()
        };
        let wrapper_cname = code.module.unique_cname(&format!("__kes_pw_{prefix}"));
        let method_def = code.module.unique_cname(&format!("__kes_mdef_{prefix}"));
        let qualified = qualified_name(code, scope);

        self.generate_native_body(code, scope, &cname, &wrapper_cname, &qualified);

        if !self.overridable {
            return;
        }
        let params = self
            .params
            .iter()
            .map(|p| WrapperParam {
                name: code.name_text(p.name),
                kind: ParamKind::Positional,
                default: None,
            })
            .collect();
        let convention = if code.options.generic_calling_convention_only
            || code.symtab.scope(scope).directives.always_allow_keywords
        {
            CallingConvention::Generic
        } else if self.params.is_empty() {
            CallingConvention::NoArgs
        } else if self.params.len() == 1 {
            CallingConvention::One
        } else {
            CallingConvention::Generic
        };
        let spec = WrapperSpec {
            cname: wrapper_cname,
            method_def: method_def.clone(),
            name: code.name_text(self.name).to_owned(),
            qualified,
            params,
            convention,
        };
        let ret = self.ret;
        let skip_dispatch = self.checks_override();
        let from_object = &mut self.from_object;
        let result_to_object = &mut self.result_to_object;
        wrapper::generate_wrapper(&spec, code, &mut |code: &mut Code<'_>, args: &[String]| {
            let mut converted = Vec::with_capacity(args.len());
            for (conv, arg) in from_object.iter_mut().zip(args) {
                conv.set_clone_source(arg);
                conv.generate_evaluation_code(code);
                converted.push(conv.result().to_owned());
            }
            if skip_dispatch {
                converted.push("1".to_owned());
            }
            let call = format!("{cname}({})", converted.join(", "));
            let t = code.allocate_temp(Type::Object, true);
            match result_to_object {
                Some(conv) => {
                    let native = code.allocate_temp(ret, false);
                    code.putln(&format!("{native} = {call};"));
                    code.put_error_if("Kes_ErrOccurred()", span);
                    conv.set_clone_source(&native);
                    conv.generate_evaluation_code(code);
                    code.putln(&format!("{t} = {};", conv.result()));
                    conv.generate_post_assignment_code(code);
                    code.release_temp(&native);
                }
                None => {
                    code.putln(&format!("{call};"));
                    code.put_error_if("Kes_ErrOccurred()", span);
                    code.putln(&format!("{t} = Kes_None; Kes_INCREF(Kes_None);"));
                }
            }
            for conv in from_object.iter_mut() {
                conv.generate_disposal_code(code);
            }
            t
        });

        code.mark_position(span);
        put_function_object(code, &method_def, entry, span);
    }

    fn span(&self) -> Span {
        self.span
    }
}

impl NativeFuncDef {
    fn generate_native_body(
        &mut self,
        code: &mut Code<'_>,
        scope: ScopeId,
        cname: &str,
        wrapper_cname: &str,
        qualified: &str,
    ) {
        let span = self.span;
        let layout = CellLayout::of(code.symtab, scope);
        let ret = self.c_return_type();
        let mut state = FunctionState::new(Some(scope), qualified);
        state.lock_released = self.body_runs_without_lock();
        let previous = code.enter_function(state);

        let ip = code.insertion_point();
        if self.with_lock {
            code.func.extra_decls.push("KesGILState __kes_gs_fn".to_owned());
            code.putln("__kes_gs_fn = Kes_GILState_Ensure();");
        }
        if self.checks_override() {
            self.put_override_check(code, wrapper_cname);
        }
        if layout.has_cell {
            layout.put_allocation(code, span);
        }
        put_argument_setup(code, &self.arg_entries);
        generate_block(&mut self.body, code);
        if !ends_in_terminator(&self.body) && ret.is_object_reference() {
            code.putln("__kes_r = Kes_None; Kes_INCREF(Kes_None);");
        }
        self.put_native_epilogue(code, &layout);
        let ret_decl = (!ret.is_void()).then_some(ret);
        put_declarations(code, ip, &layout, ret_decl);

        if layout.has_cell {
            let text = layout.definition(code, &[]);
            code.module.add_scope_struct(text);
        }
        put_trace_summary(code, cname);
        let mut finished = code.leave_function(previous);

        let symtab = code.symtab;
        let mut params: Vec<String> = self
            .arg_entries
            .iter()
            .map(|&id| {
                let e = symtab.entry(id);
                e.ty.declaration_code(&e.cname)
            })
            .collect();
        if self.checks_override() {
            params.push("int __kes_skip_dispatch".to_owned());
        }
        if params.is_empty() {
            params.push("void".to_owned());
        }
        let header = format!(
            "static {}",
            ret.declaration_code(&format!("{cname}({})", params.join(", ")))
        );
        code.module.add_prototype(format!("{header};"));
        code.module
            .add_function(format!("{header} {{\n{}}}\n", finished.take_output()));
    }

    fn put_native_epilogue(&self, code: &mut Code<'_>, layout: &CellLayout) {
        let labels = code.labels();
        if !ends_in_terminator(&self.body) {
            code.put_goto(labels.return_label);
        }
        if code.label_used(labels.error_label) {
            code.put_label(labels.error_label);
            let reacquire = self.body_runs_without_lock();
            if reacquire {
                code.putln("{");
                code.putln("KesGILState __kes_gs_err = Kes_GILState_Ensure();");
                code.func.lock_released = false;
            } else {
                for (cname, ty) in code.func.all_managed_temps() {
                    code.put_xdecref(&cname, ty);
                }
            }
            let traceback_name = escape_c(&code.traceback_name());
            match (self.ret.is_object_reference(), &self.exception) {
                (true, _) | (false, ExceptionSpec::Value(_)) => code.put_add_traceback(),
                (false, ExceptionSpec::None) => {
                    code.putln(&format!("Kes_WriteUnraisable(\"{traceback_name}\");"));
                }
            }
            if self.ret.is_object_reference() {
                code.putln("Kes_XDECREF(__kes_r);");
            }
            if let Some(value) = self.error_return() {
                code.putln(&format!("__kes_r = {value};"));
            }
            if reacquire {
                code.putln("Kes_GILState_Release(__kes_gs_err);");
                code.putln("}");
                code.func.lock_released = true;
            }
        }
        code.put_label(labels.return_label);
        if !code.func.lock_released {
            put_variable_release(code, layout);
        }
        if self.with_lock {
            code.putln("Kes_GILState_Release(__kes_gs_fn);");
        }
        if self.ret.is_void() {
            code.putln("return;");
        } else {
            code.putln("return __kes_r;");
        }
    }

    /// Dispatch to a dynamic override of this method, checking the type and
    /// instance dictionaries only when their versions changed.
    fn put_override_check(&mut self, code: &mut Code<'_>, wrapper_cname: &str) {
        let span = self.span;
        let Some(&self_entry) = self.arg_entries.first() else {
            return;
        };
        let this = code.symtab.entry(self_entry).cname.clone();
        let n = code.intern_name(self.name);
        code.putln(&format!(
            "if (!__kes_skip_dispatch && unlikely(Kes_TYPE_HAS_DICT({this}))) {{"
        ));
        code.putln(
            "static uint64_t __kes_tp_dict_version = KES_DICT_VERSION_INIT, __kes_obj_dict_version = KES_DICT_VERSION_INIT;",
        );
        code.putln(&format!(
            "if (unlikely(!Kes_ObjectDictVersionMatches({this}, __kes_tp_dict_version, __kes_obj_dict_version))) {{"
        ));
        code.putln(&format!(
            "uint64_t __kes_tp_dict_guard = Kes_GetTypeDictVersion({this});"
        ));
        let method = code.allocate_temp(Type::Object, true);
        code.putln(&format!("{method} = Kes_GetAttr({this}, {n});"));
        code.put_error_if_null(&method, span);
        code.putln(&format!(
            "if (!Kes_IsSameCFunction({method}, (void *){wrapper_cname})) {{"
        ));
        let mut args = Vec::with_capacity(self.params.len());
        for (conv, &id) in self.to_object.iter_mut().zip(&self.arg_entries).skip(1) {
            let access = code.entry_access(id);
            conv.set_clone_source(&access);
            conv.generate_evaluation_code(code);
            args.push(conv.result().to_owned());
        }
        let result = code.allocate_temp(Type::Object, true);
        if args.is_empty() {
            code.putln(&format!("{result} = Kes_CallNoArg({method});"));
        } else {
            code.putln(&format!(
                "{result} = Kes_Call({method}, (KesObject *[]){{{}}}, {});",
                args.join(", "),
                args.len()
            ));
        }
        for conv in self.to_object.iter_mut().skip(1) {
            conv.generate_disposal_code(code);
        }
        code.put_error_if_null(&result, span);
        match &mut self.result_from_object {
            Some(conv) => {
                conv.set_clone_source(&result);
                conv.generate_evaluation_code(code);
                if self.ret.is_object_reference() {
                    code.putln(&format!("__kes_r = {result}; {result} = 0;"));
                } else {
                    code.putln(&format!("__kes_r = {};", conv.result()));
                    conv.generate_disposal_code(code);
                    code.put_decref_clear(&result, Type::Object);
                }
            }
            None => code.put_decref_clear(&result, Type::Object),
        }
        code.release_temp(&result);
        code.put_decref_clear(&method, Type::Object);
        let return_label = code.labels().return_label;
        code.put_goto(return_label);
        code.putln("}");
        code.putln(&format!("__kes_tp_dict_version = Kes_GetTypeDictVersion({this});"));
        code.putln(&format!("__kes_obj_dict_version = Kes_GetObjectDictVersion({this});"));
        code.putln("if (unlikely(__kes_tp_dict_guard != __kes_tp_dict_version)) {");
        code.putln("__kes_tp_dict_version = __kes_obj_dict_version = KES_DICT_VERSION_INIT;");
        code.putln("}");
        code.put_decref_clear(&method, Type::Object);
        code.release_temp(&method);
        code.putln("}");
        code.putln("}");
    }
}

/// `class name(bases): body`
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: Name,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
    entry: Option<EntryId>,
    scope: Option<ScopeId>,
    bases_tuple: Option<Expr>,
}

impl ClassDef {
    pub fn new(name: Name, bases: Vec<Expr>, body: Vec<Stmt>, span: Span) -> Self {
        ClassDef {
            name,
            bases,
            body,
            span,
            entry: None,
            scope: None,
            bases_tuple: None,
        }
    }
}

impl StatNode for ClassDef {
    fn analyse_declarations(&mut self, env: &mut Env<'_>) {
        self.entry = env.declare_name(self.name, Type::Object, self.span);
        let text = env.name_text(self.name);
        let directives = env.directives();
        let scope = env
            .symtab
            .add_scope(ScopeKind::Class, self.name, text, env.scope, directives);
        let previous = env.enter_scope(scope);
        declare_block(&mut self.body, env);
        env.exit_scope(previous);
        self.scope = Some(scope);
    }

    fn analyse_types(mut self, env: &mut Env<'_>) -> Stmt {
        env.require_lock(self.span, "class definition");
        let Some(scope) = self.scope else {
            return Stmt::ClassDef(Box::new(self));
        };
        let bases = Expr::tuple(std::mem::take(&mut self.bases), self.span);
        self.bases_tuple = Some(bases.analyse_types(env));
        let previous = env.enter_scope(scope);
        let loop_depth = std::mem::take(&mut env.flow.loop_depth);
        self.body = analyse_block(std::mem::take(&mut self.body), env);
        env.flow.loop_depth = loop_depth;
        env.exit_scope(previous);
        Stmt::ClassDef(Box::new(self))
    }

    fn generate_execution_code(&mut self, code: &mut Code<'_>) {
        let (Some(scope), Some(entry), Some(bases)) = (self.scope, self.entry, &mut self.bases_tuple) else {
            return;
        };
        let span = self.span;
        bases.generate_evaluation_code(code);
        let n = code.intern_name(self.name);
        let module = code.module_name_const();
        let qualified = qualified_name(code, scope);
        let qualname = code.module.string_constant(&qualified);
        let namespace = code.allocate_temp(Type::Object, true);
        code.putln(&format!("{namespace} = Kes_ClassDictNew({module}, {qualname});"));
        code.put_error_if_null(&namespace, span);

        code.func.class_namespaces.push(namespace.clone());
        generate_block(&mut self.body, code);
        code.func.class_namespaces.pop();

        let class = code.allocate_temp(Type::Object, true);
        code.putln(&format!(
            "{class} = Kes_CreateClass({n}, {}, {namespace}, {module});",
            bases.result()
        ));
        code.put_error_if_null(&class, span);
        bases.generate_disposal_code(code);
        code.put_decref_clear(&namespace, Type::Object);
        code.release_temp(&namespace);
        let stolen = assign_to_entry(code, entry, &class, true, span);
        if stolen {
            code.putln(&format!("{class} = 0;"));
        } else {
            code.put_decref_clear(&class, Type::Object);
        }
        code.release_temp(&class);
    }

    fn span(&self) -> Span {
        self.span
    }
}

//! Argument-parsing wrappers.
//!
//! The wrapper `__kes_pw_*` is what the runtime calls. Depending on the
//! signature it uses one of three conventions:
//!
//! - `NoArgs`: no parameters, `(self, unused)`;
//! - `One`: exactly one required positional parameter, `(self, arg)`;
//! - `Generic`: `(self, args_tuple, kwds_dict)` with defaults, keyword
//!   arguments, keyword-only parameters and `*args`/`**kwargs`.

use std::fmt::Write as _;

use kes_ir::Span;

use super::ParamKind;
use crate::emit::{escape_c, Code, FunctionState, Label};

/// How the runtime passes arguments to a wrapper.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallingConvention {
    NoArgs,
    One,
    Generic,
}

impl CallingConvention {
    /// Method-definition flags for this convention.
    pub fn method_flags(self) -> &'static str {
        match self {
            CallingConvention::NoArgs => "KES_METH_NOARGS",
            CallingConvention::One => "KES_METH_O",
            CallingConvention::Generic => "KES_METH_VARARGS | KES_METH_KEYWORDS",
        }
    }

    fn c_parameters(self) -> &'static str {
        match self {
            CallingConvention::NoArgs => "KesObject *__kes_self, KES_UNUSED KesObject *__kes_unused",
            CallingConvention::One => "KesObject *__kes_self, KesObject *__kes_arg0",
            CallingConvention::Generic => {
                "KesObject *__kes_self, KesObject *__kes_args, KesObject *__kes_kwds"
            }
        }
    }
}

pub(super) struct WrapperParam {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Borrowed object holding the default value.
    pub default: Option<String>,
}

pub(super) struct WrapperSpec {
    pub cname: String,
    pub method_def: String,
    pub name: String,
    pub qualified: String,
    pub params: Vec<WrapperParam>,
    pub convention: CallingConvention,
}

impl WrapperSpec {
    fn named(&self) -> impl Iterator<Item = (usize, &WrapperParam)> {
        self.params.iter().filter(|p| p.is_named()).enumerate()
    }

    fn positional_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .count()
    }

    fn required_positional_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional && p.default.is_none())
            .count()
    }

    fn has(&self, kind: ParamKind) -> bool {
        self.params.iter().any(|p| p.kind == kind)
    }
}

impl WrapperParam {
    fn is_named(&self) -> bool {
        matches!(self.kind, ParamKind::Positional | ParamKind::KeywordOnly)
    }
}

/// Emit the wrapper and its method definition. `call` emits the call of the
/// underlying function on the unpacked arguments (borrowed references) and
/// returns a temporary holding the new-reference result.
pub(super) fn generate_wrapper(
    spec: &WrapperSpec,
    code: &mut Code<'_>,
    call: &mut dyn FnMut(&mut Code<'_>, &[String]) -> String,
) {
    tracing::debug!(
        wrapper = %spec.cname,
        convention = ?spec.convention,
        params = spec.params.len(),
        "emitting wrapper"
    );
    let previous = code.enter_function(FunctionState::new(None, spec.qualified.clone()));
    let ip = code.insertion_point();

    let args = match spec.convention {
        CallingConvention::NoArgs => Vec::new(),
        CallingConvention::One => vec!["__kes_arg0".to_owned()],
        CallingConvention::Generic => put_generic_unpacking(spec, code),
    };

    let t = call(code, &args);
    code.putln(&format!("__kes_r = {t}; {t} = 0;"));
    code.release_temp(&t);

    let labels = code.labels();
    code.put_goto(labels.return_label);
    if code.label_used(labels.error_label) {
        code.put_label(labels.error_label);
        for (cname, ty) in code.func.all_managed_temps() {
            code.put_xdecref(&cname, ty);
        }
        code.put_add_traceback();
        code.putln("__kes_r = 0;");
    }
    code.put_label(labels.return_label);
    if spec.has(ParamKind::VarArgs) {
        code.putln("Kes_XDECREF(__kes_star_args);");
    }
    if spec.has(ParamKind::VarKwargs) {
        code.putln("Kes_XDECREF(__kes_star_kwargs);");
    }
    code.putln("return __kes_r;");

    code.put_at(ip, "KesObject *__kes_r = 0;");
    for line in code.func.temp_declarations() {
        code.put_at(ip, &line);
    }
    let mut state = code.leave_function(previous);

    let header = format!(
        "static KesObject *{}({})",
        spec.cname,
        spec.convention.c_parameters()
    );
    code.module.add_prototype(format!("{header};"));
    code.module
        .add_function(format!("{header} {{\n{}}}\n", state.take_output()));
    code.module.add_method_def(format!(
        "static KesMethodDef {} = {{\"{}\", (KesCFunction){}, {}, 0}};",
        spec.method_def,
        escape_c(&spec.name),
        spec.cname,
        spec.convention.method_flags()
    ));
}

/// Unpack the argument tuple and keyword dict into `__kes_values`, `*args`
/// and `**kwargs`; returns the argument expressions in parameter order.
fn put_generic_unpacking(spec: &WrapperSpec, code: &mut Code<'_>) -> Vec<String> {
    let named: Vec<(usize, &WrapperParam)> = spec.named().collect();
    let n_positional = spec.positional_count();
    let n_required = spec.required_positional_count();
    let star_args = spec.has(ParamKind::VarArgs);
    let star_kwargs = spec.has(ParamKind::VarKwargs);
    let fname = escape_c(&spec.name);
    let argtuple_error = code.new_label("argtuple_error");

    if !named.is_empty() {
        code.putln(&format!("KesObject *__kes_values[{}] = {{0}};", named.len()));
    }
    if star_args {
        code.putln("KesObject *__kes_star_args = 0;");
    }
    if star_kwargs {
        code.putln("KesObject *__kes_star_kwargs = 0;");
    }
    code.putln("Kes_ssize_t __kes_npos = Kes_TUPLE_SIZE(__kes_args);");

    if star_kwargs {
        code.putln("__kes_star_kwargs = Kes_DictNew();");
        let goto = code.error_goto(Span::DUMMY);
        code.putln(&format!("if (unlikely(!__kes_star_kwargs)) {goto}"));
    }
    if star_args {
        code.putln(&format!("if (__kes_npos > {n_positional}) {{"));
        code.putln(&format!(
            "__kes_star_args = Kes_TupleGetSlice(__kes_args, {n_positional}, __kes_npos);"
        ));
        let goto = code.error_goto(Span::DUMMY);
        code.putln(&format!("if (unlikely(!__kes_star_args)) {goto}"));
        code.putln("} else {");
        code.putln("__kes_star_args = __kes_empty_tuple; Kes_INCREF(__kes_empty_tuple);");
        code.putln("}");
    }
    for &(i, param) in &named {
        if let Some(default) = &param.default {
            code.putln(&format!("__kes_values[{i}] = {default};"));
        }
    }

    code.putln("if (likely(!__kes_kwds)) {");
    put_positional_switch(code, n_positional, star_args, argtuple_error);
    if n_required > 0 {
        let target = code.label_name(argtuple_error);
        code.putln(&format!("if (unlikely(__kes_npos < {n_required})) goto {target};"));
        code.func.use_label(argtuple_error);
    }
    if let Some(&(_, param)) = named
        .iter()
        .find(|(_, p)| p.kind == ParamKind::KeywordOnly && p.default.is_none())
    {
        let n = code.module.intern_name(param.name);
        code.putln(&format!("Kes_RaiseKeywordRequired(\"{fname}\", {n});"));
        let goto = code.error_goto(Span::DUMMY);
        code.putln(goto.as_str());
    }
    code.putln("} else {");
    put_positional_switch(code, n_positional, star_args, argtuple_error);
    code.putln("Kes_ssize_t __kes_kw_left = Kes_DICT_SIZE(__kes_kwds);");
    for &(i, param) in &named {
        let n = code.module.intern_name(param.name);
        let guard = if param.kind == ParamKind::Positional {
            format!("__kes_npos <= {i} && __kes_kw_left > 0")
        } else {
            "__kes_kw_left > 0".to_owned()
        };
        code.putln(&format!("if ({guard}) {{"));
        code.putln(&format!("KesObject *__kes_kw = Kes_DictGetItem(__kes_kwds, {n});"));
        code.putln(&format!(
            "if (__kes_kw) {{ __kes_values[{i}] = __kes_kw; __kes_kw_left--; }}"
        ));
        code.putln("}");
    }
    code.putln("if (unlikely(__kes_kw_left > 0)) {");
    let mut argnames = String::from("static KesObject **__kes_argnames[] = {");
    for &(_, param) in &named {
        let n = code.module.intern_name(param.name);
        let _ = write!(argnames, "&{n}, ");
    }
    argnames.push_str("0};");
    code.putln(&argnames);
    let star_kwargs_arg = if star_kwargs { "__kes_star_kwargs" } else { "0" };
    let values_arg = if named.is_empty() { "0" } else { "__kes_values" };
    code.put_error_if_neg(
        &format!(
            "Kes_ParseOptionalKeywords(__kes_kwds, __kes_argnames, {star_kwargs_arg}, {values_arg}, __kes_npos, \"{fname}\")"
        ),
        Span::DUMMY,
    );
    code.putln("}");
    for &(i, param) in &named {
        if param.default.is_some() {
            continue;
        }
        match param.kind {
            ParamKind::Positional => {
                code.putln(&format!(
                    "if (unlikely(!__kes_values[{i}])) goto {};",
                    code.label_name(argtuple_error)
                ));
                code.func.use_label(argtuple_error);
            }
            _ => {
                let n = code.module.intern_name(param.name);
                code.putln(&format!("if (unlikely(!__kes_values[{i}])) {{"));
                code.putln(&format!("Kes_RaiseKeywordRequired(\"{fname}\", {n});"));
                let goto = code.error_goto(Span::DUMMY);
                code.putln(goto.as_str());
                code.putln("}");
            }
        }
    }
    code.putln("}");

    if code.label_used(argtuple_error) {
        let skip = code.new_label("args_done");
        code.put_goto(skip);
        code.put_label(argtuple_error);
        let exact = i32::from(!star_args && n_required == n_positional);
        let max = if star_args {
            "-1".to_owned()
        } else {
            n_positional.to_string()
        };
        code.putln(&format!(
            "Kes_RaiseArgtupleInvalid(\"{fname}\", {exact}, {n_required}, {max}, __kes_npos);"
        ));
        let goto = code.error_goto(Span::DUMMY);
        code.putln(goto.as_str());
        code.put_label(skip);
    }

    let mut args = Vec::with_capacity(spec.params.len());
    let mut index = 0;
    for param in &spec.params {
        match param.kind {
            ParamKind::Positional | ParamKind::KeywordOnly => {
                args.push(format!("__kes_values[{index}]"));
                index += 1;
            }
            ParamKind::VarArgs => args.push("__kes_star_args".to_owned()),
            ParamKind::VarKwargs => args.push("__kes_star_kwargs".to_owned()),
        }
    }
    args
}

/// Fall-through switch copying positional arguments into `__kes_values`.
fn put_positional_switch(
    code: &mut Code<'_>,
    n_positional: usize,
    star_args: bool,
    argtuple_error: Label,
) {
    code.putln("switch (__kes_npos) {");
    if star_args {
        code.putln("default:");
    }
    for i in (1..=n_positional).rev() {
        code.putln(&format!(
            "case {i}: __kes_values[{}] = Kes_TUPLE_GET_ITEM(__kes_args, {});",
            i - 1,
            i - 1
        ));
    }
    code.putln("case 0: break;");
    if !star_args {
        code.putln(&format!("default: goto {};", code.label_name(argtuple_error)));
        code.func.use_label(argtuple_error);
    }
    code.putln("}");
}

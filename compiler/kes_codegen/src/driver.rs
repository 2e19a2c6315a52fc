//! Module compilation: the three phases over a module body.

use kes_diagnostic::Diagnostic;
use kes_ir::{Name, StringInterner};

use crate::emit::Code;
use crate::env::Env;
use crate::nodes::{analyse_block, declare_block, generate_block, Stmt};
use crate::options::CodegenOptions;
use crate::symtab::{ScopeId, StorageKind, SymbolTable};

/// A module to compile.
#[derive(Clone, Debug)]
pub struct Module {
    pub name: Name,
    /// File name reported in tracebacks.
    pub file: String,
    /// Source text, used to turn spans into line numbers.
    pub source: Option<String>,
    pub body: Vec<Stmt>,
}

/// Output of [`compile_module`].
#[derive(Debug)]
pub struct CodegenResult {
    /// The C translation unit; `None` when an error was reported.
    pub code: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CodegenResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Declare, analyse and, when no error was reported, emit `module`.
pub fn compile_module(
    module: Module,
    interner: &StringInterner,
    options: &CodegenOptions,
) -> CodegenResult {
    let Module {
        name,
        file,
        source,
        mut body,
    } = module;
    let module_name = interner.lookup(name);
    let mut env = Env::new(name, interner, options, source.as_deref());

    tracing::debug!(module = module_name, statements = body.len(), "declaring names");
    declare_block(&mut body, &mut env);
    tracing::debug!(module = module_name, "analysing types");
    let mut body = analyse_block(body, &mut env);

    let errors = env.diagnostics.error_count();
    if env.diagnostics.has_errors().is_some() {
        tracing::debug!(module = module_name, errors, "analysis failed, skipping emission");
        return CodegenResult {
            code: None,
            diagnostics: env.diagnostics.flush(),
        };
    }
    let diagnostics = env.diagnostics.flush();
    let symtab = env.symtab;

    tracing::debug!(module = module_name, "emitting C");
    let mut code = Code::new(&symtab, interner, options, module_name, &file, source.as_deref());
    code.func.qualified_name = "<module>".to_owned();
    declare_native_globals(&symtab, &mut code);

    let ip = code.insertion_point();
    generate_block(&mut body, &mut code);
    let labels = code.labels();
    code.put_goto(labels.return_label);
    if code.label_used(labels.error_label) {
        code.put_label(labels.error_label);
        for (cname, ty) in code.func.all_managed_temps() {
            code.put_xdecref(&cname, ty);
        }
        code.put_add_traceback();
        code.putln("return -1;");
    }
    code.put_label(labels.return_label);
    code.putln("return 0;");
    for line in code.func.temp_declarations() {
        code.put_at(ip, &line);
    }
    for decl in code.func.extra_decls.clone() {
        code.put_at(ip, &format!("{decl};"));
    }

    let exec_body = code.func.take_output();
    code.module.set_exec_body(exec_body);
    tracing::debug!(
        module = module_name,
        functions = code.module.function_count(),
        "module emitted"
    );
    CodegenResult {
        code: Some(code.module.assemble(module_name, &file)),
        diagnostics,
    }
}

/// Module variables with a native type live in C statics.
fn declare_native_globals(symtab: &SymbolTable, code: &mut Code<'_>) {
    for &id in symtab.scope(ScopeId::MODULE).entries() {
        let entry = symtab.entry(id);
        if entry.storage != StorageKind::Global || entry.is_dynamic_global() {
            continue;
        }
        code.module.add_native_global(format!(
            "static {} = {};",
            entry.ty.declaration_code(&entry.cname),
            entry.ty.zero_value()
        ));
    }
}

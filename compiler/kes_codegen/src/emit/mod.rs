//! The emitter: C text plus label, temporary and refcount bookkeeping.
//!
//! [`Code`] is handed to `generate_execution_code` of every node. It writes
//! into the [`FunctionState`] of the C function currently being produced;
//! definitions swap in a fresh state with [`Code::enter_function`] and hand
//! the finished text to the [`ModuleState`].

mod function;
mod module;

pub use function::{FunctionState, InsertionPoint, Label, LabelSet};
pub use module::{escape_c, mangle, ModuleState};

use kes_diagnostic::span_utils::LineOffsetTable;
use kes_ir::{Name, Span, StringInterner, Type};

use crate::options::CodegenOptions;
use crate::symtab::{EntryId, ScopeId, SymbolTable};

/// Code emitter for one module.
pub struct Code<'a> {
    pub symtab: &'a SymbolTable,
    pub interner: &'a StringInterner,
    pub options: &'a CodegenOptions,
    pub module: ModuleState,
    pub func: FunctionState,
    module_name: String,
    file: String,
    lines: Option<(&'a str, LineOffsetTable)>,
}

impl<'a> Code<'a> {
    pub fn new(
        symtab: &'a SymbolTable,
        interner: &'a StringInterner,
        options: &'a CodegenOptions,
        module_name: &str,
        file: &str,
        source: Option<&'a str>,
    ) -> Self {
        Code {
            symtab,
            interner,
            options,
            module: ModuleState::new(),
            func: FunctionState::new(Some(ScopeId::MODULE), module_name),
            module_name: module_name.to_owned(),
            file: file.to_owned(),
            lines: source.map(|s| (s, LineOffsetTable::build(s))),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    #[inline]
    pub fn name_text(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }

    /// Source line used in error markers; the byte offset stands in when no
    /// source text is attached.
    pub fn line_of(&self, span: Span) -> u32 {
        match &self.lines {
            Some((source, table)) => table.offset_to_line_col(source, span.start).0,
            None => span.start,
        }
    }

    /// Start emitting a new C function; returns the state to restore.
    pub fn enter_function(&mut self, state: FunctionState) -> FunctionState {
        std::mem::replace(&mut self.func, state)
    }

    /// Finish the current C function; returns its state.
    pub fn leave_function(&mut self, previous: FunctionState) -> FunctionState {
        let finished = std::mem::replace(&mut self.func, previous);
        debug_assert!(
            finished.undefined_used_labels().is_empty(),
            "labels used but never defined in {}: {:?}",
            finished.qualified_name,
            finished.undefined_used_labels()
        );
        finished
    }

    // Output

    #[inline]
    pub fn putln(&mut self, line: &str) {
        self.func.putln(line);
    }

    pub fn begin_block(&mut self) {
        self.putln("{");
    }

    pub fn end_block(&mut self) {
        self.putln("}");
    }

    pub fn insertion_point(&mut self) -> InsertionPoint {
        self.func.insertion_point()
    }

    pub fn put_at(&mut self, ip: InsertionPoint, line: &str) {
        self.func.put_at(ip, line);
    }

    /// `/* "file":line */` marker, when enabled.
    pub fn mark_position(&mut self, span: Span) {
        if self.options.emit_line_comments {
            let line = format!("/* \"{}\":{} */", escape_c(&self.file), self.line_of(span));
            self.putln(&line);
        }
    }

    // Labels

    pub fn new_label(&mut self, hint: &str) -> Label {
        self.func.new_label(hint)
    }

    pub fn put_label(&mut self, label: Label) {
        self.func.put_label(label);
    }

    pub fn label_used(&self, label: Label) -> bool {
        self.func.label_used(label)
    }

    pub fn put_goto(&mut self, label: Label) {
        self.func.put_goto(label);
    }

    pub fn label_name(&self, label: Label) -> String {
        self.func.label_name(label).to_owned()
    }

    pub fn labels(&self) -> LabelSet {
        self.func.labels()
    }

    pub fn set_labels(&mut self, labels: LabelSet) {
        self.func.set_labels(labels);
    }

    pub fn error_label(&self) -> Label {
        self.func.labels().error_label
    }

    // Error exits

    /// `KES_ERR(line, label)` for the current error label.
    pub fn error_goto(&mut self, span: Span) -> String {
        let label = self.error_label();
        self.error_goto_to(span, label)
    }

    pub fn error_goto_to(&mut self, span: Span, label: Label) -> String {
        self.func.use_label(label);
        format!("KES_ERR({}, {})", self.line_of(span), self.func.label_name(label))
    }

    /// `if (unlikely(cond)) KES_ERR(...)`.
    pub fn put_error_if(&mut self, cond: &str, span: Span) {
        let goto = self.error_goto(span);
        self.putln(&format!("if (unlikely({cond})) {goto}"));
    }

    pub fn put_error_if_null(&mut self, cname: &str, span: Span) {
        self.put_error_if(&format!("!{cname}"), span);
    }

    pub fn put_error_if_neg(&mut self, call: &str, span: Span) {
        self.put_error_if(&format!("{call} < 0"), span);
    }

    // Temporaries

    pub fn allocate_temp(&mut self, ty: Type, manage_ref: bool) -> String {
        self.func.allocate_temp(ty, manage_ref)
    }

    pub fn release_temp(&mut self, cname: &str) {
        self.func.release_temp(cname);
    }

    // Reference counting. None of these may run while the lock is released.

    fn check_lock(&self) {
        debug_assert!(
            !self.func.lock_released,
            "refcount operation emitted while the lock is released in {}",
            self.func.qualified_name
        );
    }

    pub fn put_incref(&mut self, cname: &str, ty: Type) {
        if ty.needs_refcounting() {
            self.check_lock();
            self.putln(&format!("{}({cname});", incref_macro(ty)));
        }
    }

    pub fn put_xincref(&mut self, cname: &str) {
        self.check_lock();
        self.putln(&format!("Kes_XINCREF({cname});"));
    }

    pub fn put_decref(&mut self, cname: &str, ty: Type) {
        if ty.needs_refcounting() {
            self.check_lock();
            self.putln(&format!("{}({cname});", decref_macro(ty, false)));
        }
    }

    pub fn put_decref_clear(&mut self, cname: &str, ty: Type) {
        if ty.needs_refcounting() {
            self.check_lock();
            self.putln(&format!(
                "{}({cname}); {cname} = {};",
                decref_macro(ty, false),
                clear_value(ty)
            ));
        }
    }

    pub fn put_xdecref(&mut self, cname: &str, ty: Type) {
        if ty.needs_refcounting() {
            self.check_lock();
            self.putln(&format!("{}({cname});", decref_macro(ty, true)));
        }
    }

    pub fn put_xdecref_clear(&mut self, cname: &str, ty: Type) {
        if ty.needs_refcounting() {
            self.check_lock();
            self.putln(&format!(
                "{}({cname}); {cname} = {};",
                decref_macro(ty, true),
                clear_value(ty)
            ));
        }
    }

    /// Release every free managed temporary; used at error labels where a
    /// failed statement may have left references behind.
    pub fn put_clear_free_temps(&mut self) {
        for (cname, ty) in self.func.all_free_managed_temps() {
            self.put_xdecref_clear(&cname, ty);
        }
    }

    // Variables

    /// C lvalue for a local, argument or closure variable, as seen from the
    /// function currently being emitted.
    pub fn entry_access(&self, id: EntryId) -> String {
        let entry = self.symtab.entry(id);
        if !entry.in_closure() {
            return entry.cname.clone();
        }
        let reader = self.func.scope.unwrap_or(ScopeId::MODULE);
        let depth = self.symtab.closure_depth(reader, entry.scope);
        if depth == 0 {
            return format!("__kes_cur_scope->{}", entry.cname);
        }
        let mut access = String::from("__kes_outer_scope");
        for _ in 1..depth {
            access.push_str("->__kes_outer_scope");
        }
        access.push_str("->");
        access.push_str(&entry.cname);
        access
    }

    pub fn intern_name(&mut self, name: Name) -> String {
        let text = self.interner.lookup(name);
        self.module.intern_name(text)
    }

    /// Interned name of the module itself.
    pub fn module_name_const(&mut self) -> String {
        let name = self.module_name.clone();
        self.module.intern_name(&name)
    }

    /// `"module.qualname"` for tracebacks.
    pub fn traceback_name(&self) -> String {
        format!("{}.{}", self.module_name, self.func.qualified_name)
    }

    pub fn put_add_traceback(&mut self) {
        let name = escape_c(&self.traceback_name());
        self.putln(&format!(
            "Kes_AddTraceback(\"{name}\", __kes_lineno, __kes_filename);"
        ));
    }

    /// Current class namespace, when emitting a class body.
    pub fn class_namespace(&self) -> Option<&str> {
        self.func.class_namespaces.last().map(String::as_str)
    }
}

/// Value stored into a variable after its reference was released.
pub fn clear_value(ty: Type) -> &'static str {
    if ty.is_slice() {
        "__kes_null_slice"
    } else {
        ty.zero_value()
    }
}

fn incref_macro(ty: Type) -> &'static str {
    if ty.is_slice() {
        "Kes_SLICE_INCREF"
    } else {
        "Kes_INCREF"
    }
}

fn decref_macro(ty: Type, nullable: bool) -> &'static str {
    match (ty.is_slice(), nullable) {
        (true, _) => "Kes_SLICE_XDECREF",
        (false, true) => "Kes_XDECREF",
        (false, false) => "Kes_DECREF",
    }
}

//! Analysis environment for the declaration and type phases.
//!
//! `Env` owns the symbol table while it is still being built, the
//! diagnostic queue, and the flow facts nodes need to validate themselves
//! (loop nesting, lock state, exception-clause nesting).

use kes_diagnostic::{Diagnostic, DiagnosticQueue, ErrorCode, ErrorGuaranteed};
use kes_ir::{Name, Span, StringInterner, Type};

use crate::emit::mangle;
use crate::expr::Expr;
use crate::options::{CodegenOptions, Directives};
use crate::symtab::{EntryFlags, EntryId, ScopeId, ScopeKind, StorageKind, SymbolTable};

/// Flow facts of the region being analysed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowState {
    pub loop_depth: u32,
    /// Region runs with the lock released.
    pub lock_released: bool,
    /// Nesting depth of `except` clause bodies.
    pub except_depth: u32,
    pub try_finally_depth: u32,
}

pub struct Env<'a> {
    pub symtab: SymbolTable,
    pub interner: &'a StringInterner,
    pub diagnostics: DiagnosticQueue,
    pub options: &'a CodegenOptions,
    pub scope: ScopeId,
    pub flow: FlowState,
    next_id: u32,
}

impl<'a> Env<'a> {
    pub fn new(
        module_name: Name,
        interner: &'a StringInterner,
        options: &'a CodegenOptions,
        source: Option<&str>,
    ) -> Self {
        let prefix = mangle(interner.lookup(module_name));
        let symtab = SymbolTable::new(module_name, &prefix, options.directives);
        let mut diagnostics = DiagnosticQueue::with_config(options.diagnostics.clone());
        if let Some(source) = source {
            diagnostics = diagnostics.with_source(source);
        }
        Env {
            symtab,
            interner,
            diagnostics,
            options,
            scope: ScopeId::MODULE,
            flow: FlowState::default(),
            next_id: 0,
        }
    }

    #[inline]
    pub fn name_text(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }

    /// Unique number for compiler-generated names.
    pub fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn directives(&self) -> Directives {
        self.symtab.scope(self.scope).directives
    }

    // Diagnostics

    pub fn error(&mut self, diag: Diagnostic) -> ErrorGuaranteed {
        self.diagnostics.emit_error(diag)
    }

    pub fn error_at(&mut self, code: ErrorCode, span: Span, message: impl Into<String>) -> ErrorGuaranteed {
        let message = message.into();
        let diag = Diagnostic::error(code)
            .with_message(message.clone())
            .with_label(span, message);
        self.error(diag)
    }

    /// Report `what` if the current region runs with the lock released.
    pub fn require_lock(&mut self, span: Span, what: &str) {
        if self.flow.lock_released {
            self.error_at(
                ErrorCode::E2006,
                span,
                format!("{what} not allowed without the lock"),
            );
        }
    }

    /// Report the first object operation inside `expr` if the lock is
    /// released.
    pub fn check_nogil(&mut self, expr: &Expr) {
        if !self.flow.lock_released {
            return;
        }
        if let Some((span, what)) = expr.find_object_operation() {
            self.error_at(
                ErrorCode::E2006,
                span,
                format!("{what} not allowed without the lock"),
            );
        }
    }

    // Scopes

    /// Make `scope` current; returns the previous one.
    pub fn enter_scope(&mut self, scope: ScopeId) -> ScopeId {
        std::mem::replace(&mut self.scope, scope)
    }

    pub fn exit_scope(&mut self, previous: ScopeId) {
        self.scope = previous;
    }

    /// Install the flow state of a fresh function body; returns the old one.
    pub fn enter_function_flow(&mut self, lock_released: bool) -> FlowState {
        std::mem::replace(
            &mut self.flow,
            FlowState {
                lock_released,
                ..FlowState::default()
            },
        )
    }

    pub fn current_function(&self) -> Option<ScopeId> {
        self.symtab.enclosing_function(self.scope)
    }

    pub fn in_function(&self) -> bool {
        self.current_function().is_some()
    }

    pub fn scope_kind(&self) -> ScopeKind {
        self.symtab.scope(self.scope).kind
    }

    // Declarations

    /// Declare a name bound by assignment, loop, `def`, `class` or
    /// `except ... as` in the current scope.
    ///
    /// Names declared `global` go to the module; `nonlocal` names are bound
    /// by an enclosing function and are not declared here.
    pub fn declare_name(&mut self, name: Name, ty: Type, span: Span) -> Option<EntryId> {
        let scope = self.scope;
        if let Some(info) = self.symtab.function_info(scope) {
            if info.globals.contains(&name) {
                return self.declare_in(ScopeId::MODULE, name, ty, StorageKind::Global, span);
            }
            if info.nonlocals.contains(&name) {
                return None;
            }
        }
        let storage = match self.symtab.scope(scope).kind {
            ScopeKind::Module => StorageKind::Global,
            ScopeKind::Class => StorageKind::ClassAttribute,
            ScopeKind::Function => StorageKind::Local,
        };
        self.declare_in(scope, name, ty, storage, span)
    }

    /// Declare `name` with an explicit native type (`cdef long x`).
    pub fn declare_native(&mut self, name: Name, ty: Type, span: Span) -> Option<EntryId> {
        let existing = self.symtab.lookup_local(self.scope, name);
        if let Some(id) = existing {
            let entry = self.symtab.entry(id);
            if !entry.flags.contains(EntryFlags::DECLARED_NATIVE)
                && entry.storage == StorageKind::Local
                && entry.ty != ty
            {
                let entry = self.symtab.entry_mut(id);
                entry.ty = ty;
                entry.flags |= EntryFlags::DECLARED_NATIVE;
                return Some(id);
            }
        }
        let id = self.declare_name(name, ty, span)?;
        self.symtab.entry_mut(id).flags |= EntryFlags::DECLARED_NATIVE;
        Some(id)
    }

    pub fn declare_in(
        &mut self,
        scope: ScopeId,
        name: Name,
        ty: Type,
        storage: StorageKind,
        span: Span,
    ) -> Option<EntryId> {
        match self.symtab.declare(scope, name, self.interner.lookup(name), ty, storage, span) {
            Ok(id) => Some(id),
            Err(conflict) => {
                let text = self.name_text(name);
                let previous = self.symtab.entry(conflict.existing).span;
                let diag = Diagnostic::error(ErrorCode::E1006)
                    .with_message(format!(
                        "'{text}' redeclared as '{ty}' (previously '{}')",
                        conflict.existing_type
                    ))
                    .with_label(span, "conflicting declaration")
                    .with_secondary_label(previous, "previous declaration");
                self.error(diag);
                Some(conflict.existing)
            }
        }
    }

    /// Resolve a name read in the current scope. Names bound nowhere are
    /// module globals looked up at run time (builtins included).
    pub fn lookup(&mut self, name: Name, span: Span) -> EntryId {
        if let Some(id) = self.symtab.resolve(self.scope, name) {
            return id;
        }
        let text = self.interner.lookup(name);
        match self
            .symtab
            .declare(ScopeId::MODULE, name, text, Type::Object, StorageKind::Global, span)
        {
            Ok(id) | Err(crate::symtab::DeclarationConflict { existing: id, .. }) => {
                self.symtab.entry_mut(id).flags |= EntryFlags::USED;
                id
            }
        }
    }
}

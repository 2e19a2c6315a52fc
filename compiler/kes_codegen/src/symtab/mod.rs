//! Scopes and symbol entries.
//!
//! Both live in flat arenas owned by [`SymbolTable`] and are referred to by
//! `ScopeId` / `EntryId`. The declaration phase creates scopes and entries,
//! the type phase refines them (types, closure flags), and code generation
//! only reads them.

use bitflags::bitflags;
use kes_ir::{Name, Span, Type};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::options::Directives;

/// Index of a scope in the [`SymbolTable`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    /// The module scope is always created first.
    pub const MODULE: ScopeId = ScopeId(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an entry in the [`SymbolTable`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ScopeKind {
    Module,
    Class,
    Function,
}

/// How a native function reports errors to its callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExceptionSpec {
    /// Errors are written as unraisable and a zero value is returned.
    #[default]
    None,
    /// This value is returned on error; callers compare against it.
    Value(String),
}

/// Signature of a natively callable function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeSignature {
    pub params: Vec<Type>,
    pub ret: Type,
    pub exception: ExceptionSpec,
    /// May be called while the lock is released.
    pub nogil_callable: bool,
}

impl NativeSignature {
    /// Condition (in terms of `result`) under which a call failed, if the
    /// caller has to check at all.
    pub fn error_condition(&self, result: &str) -> Option<String> {
        if self.ret.is_object_reference() {
            return Some(format!("!{result}"));
        }
        match &self.exception {
            ExceptionSpec::None => None,
            ExceptionSpec::Value(v) => Some(format!("{result} == {v} && Kes_ErrOccurred()")),
        }
    }
}

/// Per-function facts gathered during analysis.
#[derive(Clone, Debug)]
pub struct FunctionInfo {
    pub return_type: Type,
    pub is_generator: bool,
    /// Owns a closure cell because nested functions read its variables, or
    /// because it sits between such a reader and the owner.
    pub needs_closure: bool,
    /// Reads variables from an enclosing function's cell.
    pub needs_outer_scope: bool,
    pub globals: FxHashSet<Name>,
    pub nonlocals: FxHashSet<Name>,
    /// Body runs with the lock released.
    pub lock_released: bool,
    /// `struct` tag of the closure cell.
    pub cell_struct: String,
    /// Native (`cdef`) rather than dynamic function.
    pub is_native: bool,
}

impl FunctionInfo {
    pub fn new(return_type: Type, cell_struct: String) -> Self {
        FunctionInfo {
            return_type,
            is_generator: false,
            needs_closure: false,
            needs_outer_scope: false,
            globals: FxHashSet::default(),
            nonlocals: FxHashSet::default(),
            lock_released: false,
            cell_struct,
            is_native: false,
        }
    }
}

/// A lexical namespace.
#[derive(Clone, Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: Name,
    pub parent: Option<ScopeId>,
    /// Prefix for C identifiers derived from this scope.
    pub cname_prefix: String,
    pub directives: Directives,
    entries: FxHashMap<Name, EntryId>,
    var_order: Vec<EntryId>,
    pub function: Option<FunctionInfo>,
}

impl Scope {
    pub fn is_function(&self) -> bool {
        self.kind == ScopeKind::Function
    }

    pub fn is_generator(&self) -> bool {
        self.function.as_ref().is_some_and(|f| f.is_generator)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[EntryId] {
        &self.var_order
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StorageKind {
    Argument,
    Local,
    /// Module-level name.
    Global,
    ClassAttribute,
    NativeFunction,
}

bitflags! {
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct EntryFlags: u8 {
        /// Read somewhere.
        const USED = 1 << 0;
        /// Assigned after declaration (arguments: reassigned in the body).
        const ASSIGNED = 1 << 1;
        /// Stored in the owning function's closure cell.
        const IN_CLOSURE = 1 << 2;
        /// Owns a reference released at function exit.
        const NEEDS_RELEASE = 1 << 3;
        /// Type came from an explicit native declaration.
        const DECLARED_NATIVE = 1 << 4;
    }
}

/// One declared name.
#[derive(Clone, Debug)]
pub struct Entry {
    pub name: Name,
    pub cname: String,
    pub ty: Type,
    pub storage: StorageKind,
    pub flags: EntryFlags,
    pub scope: ScopeId,
    pub span: Span,
    pub signature: Option<NativeSignature>,
}

impl Entry {
    pub fn in_closure(&self) -> bool {
        self.flags.contains(EntryFlags::IN_CLOSURE)
    }

    /// Module-level object stored in the module dict rather than a C variable.
    pub fn is_dynamic_global(&self) -> bool {
        self.storage == StorageKind::Global && self.ty.is_object_reference()
    }
}

/// Why a declaration could not be merged into an existing entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclarationConflict {
    pub existing: EntryId,
    pub existing_type: Type,
}

/// Arena of scopes and entries.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    entries: Vec<Entry>,
}

impl SymbolTable {
    /// Create a table holding only the module scope.
    pub fn new(module_name: Name, cname_prefix: &str, directives: Directives) -> Self {
        let module = Scope {
            kind: ScopeKind::Module,
            name: module_name,
            parent: None,
            cname_prefix: cname_prefix.to_owned(),
            directives,
            entries: FxHashMap::default(),
            var_order: Vec::new(),
            function: None,
        };
        SymbolTable {
            scopes: vec![module],
            entries: Vec::new(),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "scope count is bounded by the size of the syntax tree"
    )]
    pub fn add_scope(
        &mut self,
        kind: ScopeKind,
        name: Name,
        name_text: &str,
        parent: ScopeId,
        directives: Directives,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let cname_prefix = format!("{}_{name_text}", self.scopes[parent.index()].cname_prefix);
        let function = (kind == ScopeKind::Function).then(|| {
            FunctionInfo::new(
                Type::Object,
                format!("__kes_scope_struct_{}_{name_text}", id.0),
            )
        });
        self.scopes.push(Scope {
            kind,
            name,
            parent: Some(parent),
            cname_prefix,
            directives,
            entries: FxHashMap::default(),
            var_order: Vec::new(),
            function,
        });
        id
    }

    #[inline]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    #[inline]
    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    #[inline]
    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.index()]
    }

    #[inline]
    pub fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        &mut self.entries[id.index()]
    }

    /// Function facts; `None` for module and class scopes.
    pub fn function_info(&self, id: ScopeId) -> Option<&FunctionInfo> {
        self.scope(id).function.as_ref()
    }

    pub fn function_info_mut(&mut self, id: ScopeId) -> Option<&mut FunctionInfo> {
        self.scope_mut(id).function.as_mut()
    }

    pub fn lookup_local(&self, scope: ScopeId, name: Name) -> Option<EntryId> {
        self.scope(scope).entries.get(&name).copied()
    }

    /// Nearest function scope at or above `scope`.
    pub fn enclosing_function(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.scope(id);
            if s.is_function() {
                return Some(id);
            }
            cur = s.parent;
        }
        None
    }

    /// Declare `name` in `scope`, or return the existing entry.
    ///
    /// Requesting a different native type for an entry declared with an
    /// explicit native type is a conflict; an object request reuses the entry.
    /// Entries declared in generator scopes always live in the closure cell.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "entry count is bounded by the size of the syntax tree"
    )]
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: Name,
        name_text: &str,
        ty: Type,
        storage: StorageKind,
        span: Span,
    ) -> Result<EntryId, DeclarationConflict> {
        if let Some(existing) = self.lookup_local(scope, name) {
            let entry = self.entry(existing);
            let explicit = ty != Type::Object;
            if explicit && entry.ty != ty && entry.flags.contains(EntryFlags::DECLARED_NATIVE) {
                return Err(DeclarationConflict {
                    existing,
                    existing_type: entry.ty,
                });
            }
            return Ok(existing);
        }

        let cname = match storage {
            StorageKind::Argument | StorageKind::Local => format!("__kes_v_{name_text}"),
            StorageKind::Global | StorageKind::ClassAttribute => {
                format!("__kes_v_{}_{name_text}", self.scope(scope).cname_prefix)
            }
            StorageKind::NativeFunction => {
                format!("__kes_f_{}_{name_text}", self.scope(scope).cname_prefix)
            }
        };
        let mut flags = EntryFlags::empty();
        if self.scope(scope).is_generator()
            && matches!(storage, StorageKind::Argument | StorageKind::Local)
        {
            flags |= EntryFlags::IN_CLOSURE;
        }

        let id = EntryId(self.entries.len() as u32);
        self.entries.push(Entry {
            name,
            cname,
            ty,
            storage,
            flags,
            scope,
            span,
            signature: None,
        });
        let s = self.scope_mut(scope);
        s.entries.insert(name, id);
        s.var_order.push(id);
        Ok(id)
    }

    /// Resolve `name` as read from `reader`.
    ///
    /// Class scopes are only visible to their own body. A name found in an
    /// enclosing function is moved into that function's closure cell, and
    /// every function between the reader and the owner gets a cell carrying
    /// the outer link.
    pub fn resolve(&mut self, reader: ScopeId, name: Name) -> Option<EntryId> {
        let found = self.find(reader, name)?;
        let owner = self.entry(found).scope;
        let reader_fn = self.enclosing_function(reader);

        if self.scope(owner).is_function() && reader_fn != Some(owner) {
            self.entry_mut(found).flags |= EntryFlags::IN_CLOSURE;
            if let Some(info) = self.function_info_mut(owner) {
                info.needs_closure = true;
            }
            let mut cur = reader_fn;
            while let Some(id) = cur {
                if id == owner {
                    break;
                }
                if let Some(info) = self.function_info_mut(id) {
                    info.needs_outer_scope = true;
                    if Some(id) != reader_fn {
                        info.needs_closure = true;
                    }
                }
                cur = self
                    .scope(id)
                    .parent
                    .and_then(|p| self.enclosing_function(p));
            }
        }
        self.entry_mut(found).flags |= EntryFlags::USED;
        Some(found)
    }

    fn find(&self, reader: ScopeId, name: Name) -> Option<EntryId> {
        let mut cur = Some(reader);
        while let Some(id) = cur {
            let scope = self.scope(id);
            if let Some(info) = &scope.function {
                if info.globals.contains(&name) {
                    return self.lookup_local(ScopeId::MODULE, name);
                }
            }
            let skip = (scope.kind == ScopeKind::Class && id != reader)
                || scope
                    .function
                    .as_ref()
                    .is_some_and(|f| f.nonlocals.contains(&name));
            if !skip {
                if let Some(&entry) = scope.entries.get(&name) {
                    return Some(entry);
                }
            }
            cur = scope.parent;
        }
        None
    }

    /// Closure-cell entries owned by `scope`, in declaration order.
    pub fn closure_entries(&self, scope: ScopeId) -> impl Iterator<Item = EntryId> + '_ {
        self.scope(scope)
            .var_order
            .iter()
            .copied()
            .filter(|&e| self.entry(e).in_closure())
    }

    /// Number of cell links between `reader` and `owner` (both function
    /// scopes, `owner` enclosing `reader`).
    pub fn closure_depth(&self, reader: ScopeId, owner: ScopeId) -> usize {
        let mut depth = 0;
        let mut cur = Some(reader);
        while let Some(id) = cur {
            if id == owner {
                return depth;
            }
            depth += 1;
            cur = self
                .scope(id)
                .parent
                .and_then(|p| self.enclosing_function(p));
        }
        depth
    }
}

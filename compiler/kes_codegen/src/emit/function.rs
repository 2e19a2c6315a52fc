//! Per-C-function emission state: output chunks, labels and temporaries.

use kes_ir::Type;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::symtab::ScopeId;

/// Opaque jump target inside one C function.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Label(u32);

impl Label {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct LabelInfo {
    name: String,
    used: bool,
    defined: bool,
}

/// The jump targets abrupt exits currently resolve to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    pub continue_label: Option<Label>,
    pub break_label: Option<Label>,
    pub return_label: Label,
    pub error_label: Label,
}

/// Position in the output that can be written to later.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InsertionPoint(usize);

#[derive(Clone, Debug, Default)]
struct Chunk {
    text: String,
    indent: usize,
}

impl Chunk {
    fn putln(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            self.text.push('\n');
            return;
        }
        let closes = line.starts_with('}');
        if closes {
            self.indent = self.indent.saturating_sub(1);
        }
        for _ in 0..self.indent {
            self.text.push_str("  ");
        }
        self.text.push_str(line);
        self.text.push('\n');
        if line.ends_with('{') {
            self.indent += 1;
        }
    }
}

#[derive(Clone, Debug)]
struct TempInfo {
    cname: String,
    ty: Type,
    manage_ref: bool,
    in_use: bool,
}

/// Emission state of the C function currently being written.
#[derive(Debug)]
pub struct FunctionState {
    /// Kestrel scope whose variables this function owns.
    pub scope: Option<ScopeId>,
    labels: Vec<LabelInfo>,
    current: LabelSet,
    chunks: Vec<Chunk>,
    temps: Vec<TempInfo>,
    temp_index: FxHashMap<String, usize>,
    /// Body runs without the lock; refcount operations are forbidden.
    pub lock_released: bool,
    /// Exception triples of the except clauses being emitted, innermost last.
    pub exc_vars: Vec<[String; 3]>,
    /// `__exit__` callables of enclosing `with` statements, innermost last.
    pub with_exit_vars: Vec<String>,
    /// Class namespaces of enclosing class bodies, innermost last.
    pub class_namespaces: Vec<String>,
    /// Resume points of a generator body, in order.
    pub(crate) yield_labels: Vec<Label>,
    /// Temporaries saved across a `yield`, which need cell fields.
    pub(crate) saved_temps: Vec<(String, Type)>,
    /// Extra local declarations (`type name`) written with the temporaries.
    pub(crate) extra_decls: Vec<String>,
    /// Human-readable name used in tracebacks.
    pub qualified_name: String,
}

impl FunctionState {
    pub fn new(scope: Option<ScopeId>, qualified_name: impl Into<String>) -> Self {
        let labels = vec![
            LabelInfo {
                name: "__kes_L0".to_owned(),
                used: false,
                defined: false,
            },
            LabelInfo {
                name: "__kes_L1_error".to_owned(),
                used: false,
                defined: false,
            },
        ];
        FunctionState {
            scope,
            labels,
            current: LabelSet {
                continue_label: None,
                break_label: None,
                return_label: Label(0),
                error_label: Label(1),
            },
            chunks: vec![Chunk {
                text: String::new(),
                indent: 1,
            }],
            temps: Vec::new(),
            temp_index: FxHashMap::default(),
            lock_released: false,
            exc_vars: Vec::new(),
            with_exit_vars: Vec::new(),
            class_namespaces: Vec::new(),
            yield_labels: Vec::new(),
            saved_temps: Vec::new(),
            extra_decls: Vec::new(),
            qualified_name: qualified_name.into(),
        }
    }

    // Output

    pub fn putln(&mut self, line: &str) {
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.putln(line);
        }
    }

    /// Reserve a position at the current point of the output.
    pub fn insertion_point(&mut self) -> InsertionPoint {
        let indent = self.chunks.last().map_or(1, |c| c.indent);
        let ip = InsertionPoint(self.chunks.len());
        self.chunks.push(Chunk {
            text: String::new(),
            indent,
        });
        self.chunks.push(Chunk {
            text: String::new(),
            indent,
        });
        ip
    }

    pub fn put_at(&mut self, ip: InsertionPoint, line: &str) {
        if let Some(chunk) = self.chunks.get_mut(ip.0) {
            chunk.putln(line);
        }
    }

    /// Concatenated output; the function header and closing brace are the
    /// caller's business.
    pub fn take_output(&mut self) -> String {
        let mut out = String::new();
        for chunk in self.chunks.drain(..) {
            out.push_str(&chunk.text);
        }
        out
    }

    // Labels

    #[allow(
        clippy::cast_possible_truncation,
        reason = "labels per function are bounded by the size of its body"
    )]
    pub fn new_label(&mut self, hint: &str) -> Label {
        let n = self.labels.len();
        let name = if hint.is_empty() {
            format!("__kes_L{n}")
        } else {
            format!("__kes_L{n}_{hint}")
        };
        self.labels.push(LabelInfo {
            name,
            used: false,
            defined: false,
        });
        Label(n as u32)
    }

    pub fn label_name(&self, label: Label) -> &str {
        &self.labels[label.index()].name
    }

    pub fn label_used(&self, label: Label) -> bool {
        self.labels[label.index()].used
    }

    pub fn use_label(&mut self, label: Label) {
        self.labels[label.index()].used = true;
    }

    /// Define `label` here; unused labels are not materialised.
    pub fn put_label(&mut self, label: Label) {
        let info = &mut self.labels[label.index()];
        debug_assert!(!info.defined, "label {} defined twice", info.name);
        info.defined = true;
        if info.used {
            let line = format!("{}:;", info.name);
            self.putln(&line);
        }
    }

    pub fn put_goto(&mut self, label: Label) {
        self.use_label(label);
        let line = format!("goto {};", self.label_name(label));
        self.putln(&line);
    }

    pub fn labels(&self) -> LabelSet {
        self.current
    }

    pub fn set_labels(&mut self, labels: LabelSet) {
        self.current = labels;
    }

    /// Install a fresh (continue, break) pair; returns the previous set.
    pub fn new_loop_labels(&mut self) -> LabelSet {
        let old = self.current;
        self.current.continue_label = Some(self.new_label("continue"));
        self.current.break_label = Some(self.new_label("break"));
        old
    }

    /// Install fresh labels for every abrupt exit that currently has a
    /// target; returns the previous set.
    pub fn all_new_labels(&mut self) -> LabelSet {
        let old = self.current;
        if old.continue_label.is_some() {
            self.current.continue_label = Some(self.new_label("continue"));
        }
        if old.break_label.is_some() {
            self.current.break_label = Some(self.new_label("break"));
        }
        self.current.return_label = self.new_label("return");
        self.current.error_label = self.new_label("error");
        old
    }

    /// Install a fresh error label; returns the previous one.
    pub fn new_error_label(&mut self) -> Label {
        let old = self.current.error_label;
        self.current.error_label = self.new_label("error");
        old
    }

    /// Every label used but never defined.
    pub fn undefined_used_labels(&self) -> SmallVec<[String; 2]> {
        self.labels
            .iter()
            .filter(|l| l.used && !l.defined)
            .map(|l| l.name.clone())
            .collect()
    }

    pub fn label_stats(&self) -> (usize, usize) {
        let used = self.labels.iter().filter(|l| l.used).count();
        (self.labels.len(), used)
    }

    // Temporaries

    /// Allocate a temporary of `ty`, reusing the most recently released one
    /// of the same kind.
    pub fn allocate_temp(&mut self, ty: Type, manage_ref: bool) -> String {
        let manage_ref = manage_ref && ty.needs_refcounting();
        if let Some(info) = self
            .temps
            .iter_mut()
            .rev()
            .find(|t| !t.in_use && t.ty == ty && t.manage_ref == manage_ref)
        {
            info.in_use = true;
            return info.cname.clone();
        }
        let cname = format!("__kes_t_{}", self.temps.len());
        self.temp_index.insert(cname.clone(), self.temps.len());
        self.temps.push(TempInfo {
            cname: cname.clone(),
            ty,
            manage_ref,
            in_use: true,
        });
        cname
    }

    pub fn release_temp(&mut self, cname: &str) {
        let Some(&idx) = self.temp_index.get(cname) else {
            debug_assert!(false, "release of unknown temporary {cname}");
            return;
        };
        let info = &mut self.temps[idx];
        debug_assert!(info.in_use, "temporary {cname} released twice");
        info.in_use = false;
        // Keep the free list ordered by release time for most-recent reuse.
        let released = self.temps.remove(idx);
        self.temps.push(released);
        self.reindex_temps();
    }

    fn reindex_temps(&mut self) {
        self.temp_index.clear();
        for (i, t) in self.temps.iter().enumerate() {
            self.temp_index.insert(t.cname.clone(), i);
        }
    }

    pub fn temp_type(&self, cname: &str) -> Option<Type> {
        self.temp_index.get(cname).map(|&i| self.temps[i].ty)
    }

    /// Managed temporaries currently allocated (they may own a reference).
    pub fn temps_holding_reference(&self) -> Vec<(String, Type)> {
        self.temps
            .iter()
            .filter(|t| t.in_use && t.manage_ref)
            .map(|t| (t.cname.clone(), t.ty))
            .collect()
    }

    /// Managed temporaries not currently allocated; after an error jump they
    /// may still hold references from the statement that failed.
    pub fn all_free_managed_temps(&self) -> Vec<(String, Type)> {
        self.temps
            .iter()
            .filter(|t| !t.in_use && t.manage_ref)
            .map(|t| (t.cname.clone(), t.ty))
            .collect()
    }

    pub fn all_managed_temps(&self) -> Vec<(String, Type)> {
        self.temps
            .iter()
            .filter(|t| t.manage_ref)
            .map(|t| (t.cname.clone(), t.ty))
            .collect()
    }

    /// Every temporary currently allocated, in declaration order.
    pub fn temps_in_use(&self) -> Vec<(String, Type)> {
        let mut live: Vec<_> = self
            .temps
            .iter()
            .filter(|t| t.in_use)
            .map(|t| (t.cname.clone(), t.ty))
            .collect();
        live.sort_by_key(|(cname, _)| temp_number(cname));
        live
    }

    /// Declarations for all temporaries, in allocation order.
    pub fn temp_declarations(&self) -> Vec<String> {
        let mut temps: Vec<&TempInfo> = self.temps.iter().collect();
        temps.sort_by_key(|t| temp_number(&t.cname));
        temps
            .into_iter()
            .map(|t| {
                format!(
                    "{} = {};",
                    t.ty.declaration_code(&t.cname),
                    t.ty.zero_value()
                )
            })
            .collect()
    }

    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    /// Register a resume point; returns its number (starting at 1).
    pub fn new_yield_label(&mut self) -> (usize, Label) {
        let n = self.yield_labels.len() + 1;
        let label = self.new_label(&format!("resume_{n}"));
        self.yield_labels.push(label);
        (n, label)
    }

    pub fn note_saved_temp(&mut self, cname: &str, ty: Type) {
        if !self.saved_temps.iter().any(|(c, _)| c == cname) {
            self.saved_temps.push((cname.to_owned(), ty));
        }
    }
}

fn temp_number(cname: &str) -> usize {
    cname
        .rsplit('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

//! Module-level output sections.
//!
//! Everything a C translation unit needs outside the function bodies is
//! collected here while the functions are emitted, then assembled in a fixed
//! order: header, closure-cell structs, constants, prototypes, method
//! definitions, function bodies, constant initialisation, module exec and
//! cleanup.

use rustc_hash::{FxHashMap, FxHashSet};

/// Module-scoped C output sections.
#[derive(Debug, Default)]
pub struct ModuleState {
    interned: Vec<(String, String)>,
    interned_index: FxHashMap<String, usize>,
    strings: Vec<(String, String)>,
    string_index: FxHashMap<String, usize>,
    ints: Vec<(String, i64)>,
    int_index: FxHashMap<i64, usize>,
    cached_defaults: Vec<String>,
    native_globals: Vec<String>,
    scope_structs: Vec<String>,
    prototypes: Vec<String>,
    method_defs: Vec<String>,
    bodies: Vec<String>,
    used_cnames: FxHashSet<String>,
    exec_body: String,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interned identifier object for `text`, as used for attribute and
    /// global lookups.
    pub fn intern_name(&mut self, text: &str) -> String {
        if let Some(&i) = self.interned_index.get(text) {
            return self.interned[i].0.clone();
        }
        let cname = format!("__kes_n_{}", mangle(text));
        self.interned_index
            .insert(text.to_owned(), self.interned.len());
        self.interned.push((cname.clone(), text.to_owned()));
        cname
    }

    /// String constant object holding `value`.
    pub fn string_constant(&mut self, value: &str) -> String {
        if let Some(&i) = self.string_index.get(value) {
            return self.strings[i].0.clone();
        }
        let cname = format!("__kes_s_{}", self.strings.len());
        self.string_index
            .insert(value.to_owned(), self.strings.len());
        self.strings.push((cname.clone(), value.to_owned()));
        cname
    }

    /// Integer constant object holding `value`.
    pub fn int_constant(&mut self, value: i64) -> String {
        if let Some(&i) = self.int_index.get(&value) {
            return self.ints[i].0.clone();
        }
        let cname = if value < 0 {
            format!("__kes_int_neg_{}", value.unsigned_abs())
        } else {
            format!("__kes_int_{value}")
        };
        self.int_index.insert(value, self.ints.len());
        self.ints.push((cname.clone(), value));
        cname
    }

    /// New module-level slot caching a default argument value; released by
    /// the module cleanup function.
    pub fn new_cached_default(&mut self) -> String {
        let cname = format!("__kes_k_{}", self.cached_defaults.len());
        self.cached_defaults.push(cname.clone());
        cname
    }

    pub fn add_native_global(&mut self, declaration: String) {
        self.native_globals.push(declaration);
    }

    pub fn add_scope_struct(&mut self, text: String) {
        self.scope_structs.push(text);
    }

    pub fn add_prototype(&mut self, prototype: String) {
        self.prototypes.push(prototype);
    }

    pub fn add_method_def(&mut self, text: String) {
        self.method_defs.push(text);
    }

    pub fn add_function(&mut self, text: String) {
        self.bodies.push(text);
    }

    pub fn set_exec_body(&mut self, text: String) {
        self.exec_body = text;
    }

    /// `base`, suffixed with a counter if already taken.
    pub fn unique_cname(&mut self, base: &str) -> String {
        if self.used_cnames.insert(base.to_owned()) {
            return base.to_owned();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used_cnames.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn function_count(&self) -> usize {
        self.bodies.len()
    }

    /// Assemble the translation unit.
    pub fn assemble(&self, module_name: &str, file: &str) -> String {
        let mut out = String::with_capacity(4096);
        out.push_str(&format!("/* Generated by kestrel: module {module_name} */\n"));
        out.push_str("#include \"kes_runtime.h\"\n\n");
        out.push_str("#define KES_ERR(ln, lbl) { __kes_lineno = (ln); goto lbl; }\n\n");
        out.push_str(&format!(
            "static const char *__kes_filename = \"{}\";\n",
            escape_c(file)
        ));
        out.push_str("static int __kes_lineno = 0;\n\n");

        for s in &self.scope_structs {
            out.push_str(s);
            out.push('\n');
        }

        for (cname, _) in &self.interned {
            out.push_str(&format!("static KesObject *{cname};\n"));
        }
        for (cname, _) in &self.strings {
            out.push_str(&format!("static KesObject *{cname};\n"));
        }
        for (cname, _) in &self.ints {
            out.push_str(&format!("static KesObject *{cname};\n"));
        }
        for cname in &self.cached_defaults {
            out.push_str(&format!("static KesObject *{cname} = 0;\n"));
        }
        for decl in &self.native_globals {
            out.push_str(decl);
            out.push('\n');
        }
        out.push('\n');

        for proto in &self.prototypes {
            out.push_str(proto);
            out.push('\n');
        }
        out.push('\n');
        for def in &self.method_defs {
            out.push_str(def);
            out.push('\n');
        }
        out.push('\n');
        for body in &self.bodies {
            out.push_str(body);
            out.push('\n');
        }

        out.push_str("static int __kes_init_constants(void) {\n");
        for (cname, text) in &self.interned {
            out.push_str(&format!(
                "  {cname} = Kes_InternFromString(\"{}\"); if (unlikely(!{cname})) return -1;\n",
                escape_c(text)
            ));
        }
        for (cname, value) in &self.strings {
            out.push_str(&format!(
                "  {cname} = Kes_StrFromString(\"{}\"); if (unlikely(!{cname})) return -1;\n",
                escape_c(value)
            ));
        }
        for (cname, value) in &self.ints {
            out.push_str(&format!(
                "  {cname} = Kes_IntFromLong({value}L); if (unlikely(!{cname})) return -1;\n"
            ));
        }
        out.push_str("  return 0;\n}\n\n");

        out.push_str("static int __kes_module_exec(KesObject *__kes_module) {\n");
        out.push_str(&self.exec_body);
        out.push_str("}\n\n");

        out.push_str("static void __kes_module_cleanup(void) {\n");
        for cname in &self.cached_defaults {
            out.push_str(&format!("  Kes_CLEAR({cname});\n"));
        }
        for (cname, _) in self
            .interned
            .iter()
            .chain(self.strings.iter())
        {
            out.push_str(&format!("  Kes_CLEAR({cname});\n"));
        }
        for (cname, _) in &self.ints {
            out.push_str(&format!("  Kes_CLEAR({cname});\n"));
        }
        out.push_str("}\n\n");
        out.push_str(&format!(
            "KES_MODULE_INIT({module_name}, __kes_init_constants, __kes_module_exec, __kes_module_cleanup)\n"
        ));
        out
    }
}

/// Replace characters that cannot appear in a C identifier.
pub fn mangle(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Escape `text` for use inside a C string literal.
pub fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\{b:03o}"));
                }
            }
        }
    }
    out
}

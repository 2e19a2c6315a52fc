//! Code generation options and compiler directives.

use kes_diagnostic::DiagnosticConfig;

/// Directives that change the code emitted for individual operations.
///
/// Module defaults come from [`CodegenOptions`]; scopes inherit them from
/// their parent and function definitions may override them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Directives {
    /// Check native indices against the container length.
    pub boundscheck: bool,
    /// Allow negative native indices to count from the end.
    pub wraparound: bool,
    /// Always use the generic calling convention for `def` functions, so
    /// every parameter can be passed by keyword.
    pub always_allow_keywords: bool,
}

impl Default for Directives {
    fn default() -> Self {
        Directives {
            boundscheck: true,
            wraparound: true,
            always_allow_keywords: false,
        }
    }
}

/// Per-function directive overrides; `None` inherits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DirectiveOverrides {
    pub boundscheck: Option<bool>,
    pub wraparound: Option<bool>,
    pub always_allow_keywords: Option<bool>,
}

impl Directives {
    #[must_use]
    pub fn with_overrides(self, overrides: DirectiveOverrides) -> Directives {
        Directives {
            boundscheck: overrides.boundscheck.unwrap_or(self.boundscheck),
            wraparound: overrides.wraparound.unwrap_or(self.wraparound),
            always_allow_keywords: overrides
                .always_allow_keywords
                .unwrap_or(self.always_allow_keywords),
        }
    }
}

/// Options for one `compile_module` run.
#[derive(Clone, Debug, Default)]
pub struct CodegenOptions {
    pub diagnostics: DiagnosticConfig,
    /// Module-level directive defaults.
    pub directives: Directives,
    /// Emit `/* file:line */` markers before each statement.
    pub emit_line_comments: bool,
    /// Disable the `NOARGS`/`O` wrapper variants.
    pub generic_calling_convention_only: bool,
}

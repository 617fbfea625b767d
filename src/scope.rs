//! Per-call scope state threaded through the lowering engine.
//!
//! Depth is counted along the call graph (one step per property value, array
//! item type, or `$ref` target), not per schema object, so a shared sub-schema
//! contributes its call-site depth each time it is inlined. The hard ceiling
//! bounds total recursion across a compilation and turns cyclic `$ref` graphs
//! into a reportable error instead of a stack overflow.

/// Hard ceiling on nesting depth for a single compilation.
pub const MAX_NESTING_SCOPE: u32 = 512;

/// Formatting knobs that stay constant for the whole compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSettings {
    /// Allow the grammar to accept newline-indented output.
    pub allow_new_lines: bool,
    /// Spaces per indentation level when newlines are allowed.
    pub scope_pad_spaces: u32,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self { allow_new_lines: true, scope_pad_spaces: 4 }
    }
}

/// Immutable-per-call scope value; forking is the only way to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeState {
    pub settings: ScopeSettings,
    pub nesting_scope: u32,
}

impl ScopeState {
    pub fn root(settings: ScopeSettings) -> Self {
        Self { settings, nesting_scope: 0 }
    }

    /// Child scope for a nested construct: one level deeper, same flags.
    pub fn for_new_scope(&self) -> Self {
        Self { settings: self.settings, nesting_scope: self.nesting_scope + 1 }
    }

    /// Scope for the body of a referenced definition rule. The rule is
    /// compiled once, independent of the depth of its call sites, and its
    /// body never pretty-prints.
    pub fn for_ref_target(&self) -> Self {
        Self {
            settings: ScopeSettings {
                allow_new_lines: false,
                scope_pad_spaces: self.settings.scope_pad_spaces,
            },
            nesting_scope: 0,
        }
    }

    /// Same depth, newlines disabled. Used for sub-scopes of the wildcard
    /// any-JSON grammar.
    pub fn without_new_lines(&self) -> Self {
        Self {
            settings: ScopeSettings {
                allow_new_lines: false,
                scope_pad_spaces: self.settings.scope_pad_spaces,
            },
            nesting_scope: self.nesting_scope,
        }
    }

    pub fn exceeds_ceiling(&self) -> bool {
        self.nesting_scope >= MAX_NESTING_SCOPE
    }
}

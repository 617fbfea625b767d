//! Definition registry: `$defs` resolution and the per-compilation rule cache.
//!
//! The registry is created fresh per top-level compilation, threaded by
//! mutable reference through every recursive call, and discarded once the
//! grammar artifact is emitted. The rule cache is keyed by the
//! (name, schema) pair: the first encounter of a definition compiles its body
//! under a reserved rule name, and every later reference (including the ones
//! reached while that body is still being compiled) becomes a named-rule
//! reference. This is what makes self- and mutually-referential schemas
//! compile to a finite grammar.

use indexmap::IndexMap;

use crate::schema::{Defs, Schema};
use crate::terminal::Terminal;

const REF_POINTER_PREFIX: &str = "#/$defs/";

/// One cached definition rule. `body` is `None` while the rule is being
/// compiled (the in-progress marker that breaks reference cycles).
#[derive(Debug, Clone)]
pub struct DefRule {
    pub def_name: String,
    pub schema: Schema,
    pub rule: String,
    pub body: Option<Terminal>,
}

#[derive(Debug, Default)]
pub struct DefsRegistry {
    defs: IndexMap<String, Schema>,
    rules: Vec<DefRule>,
}

impl DefsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a node's locally declared `$defs`. Local definitions shadow
    /// same-named outer ones: last registered wins.
    pub fn register_defs(&mut self, defs: &Defs) {
        for (name, schema) in defs {
            self.defs.insert(name.clone(), schema.clone());
        }
    }

    /// Resolve a `#/$defs/<name>` pointer against the merged definitions.
    /// The returned name slices the pointer, so both borrows are tied to the
    /// shorter of the two inputs.
    pub fn resolve<'a>(&'a self, pointer: &'a str) -> Option<(&'a str, &'a Schema)> {
        let name = pointer.strip_prefix(REF_POINTER_PREFIX)?;
        self.defs.get(name).map(|schema| (name, schema))
    }

    /// The cached rule name for this exact (name, schema) pair, if one was
    /// already reserved in this run.
    pub fn rule_for(&self, def_name: &str, schema: &Schema) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.def_name == def_name && &r.schema == schema)
            .map(|r| r.rule.as_str())
    }

    /// Reserve a fresh rule name for a definition before compiling its body.
    pub fn reserve_rule(&mut self, def_name: &str, schema: Schema) -> String {
        let rule = self.fresh_rule_name(def_name);
        self.rules.push(DefRule {
            def_name: def_name.to_string(),
            schema,
            rule: rule.clone(),
            body: None,
        });
        rule
    }

    /// Attach the compiled body to a previously reserved rule.
    pub fn finish_rule(&mut self, rule: &str, body: Terminal) {
        if let Some(entry) = self.rules.iter_mut().find(|r| r.rule == rule) {
            entry.body = Some(body);
        }
    }

    pub fn compiled_rules(&self) -> impl Iterator<Item = &DefRule> {
        self.rules.iter()
    }

    fn fresh_rule_name(&self, def_name: &str) -> String {
        let base = sanitize_rule_name(def_name);
        let mut candidate = format!("def-{base}-rule");
        let mut n = 1u32;
        while self.rules.iter().any(|r| r.rule == candidate) {
            candidate = format!("def-{base}{n}-rule");
            n += 1;
        }
        candidate
    }
}

/// GBNF rule names are restricted to `[A-Za-z0-9-]`.
fn sanitize_rule_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() { "def".to_string() } else { cleaned }
}

//! GBNF emission: turn a terminal tree into a named-rule table plus a root
//! rule, then render the grammar text.
//!
//! The generator owns rule naming: shared primitives get stable reserved
//! names (`string-rule`, `null-rule`, ...), anonymous composites get fresh
//! `rule{N}` names deduplicated by rule content, and `$defs` bodies keep the
//! rule names reserved for them by the registry during lowering.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::lower::{lower, CompileError, CompileWarning, Compiler};
use crate::schema::{Schema, StringFormat};
use crate::scope::{ScopeSettings, ScopeState};
use crate::terminal::Terminal;

/// A rule body matching the empty string; used to drop empty alternatives.
const NO_VALUE: &str = "\"\"";

const STRING_CHAR_BODY: &str =
    r#"[^"\\\x7F\x00-\x1F] | "\\" ["\\/bfnrt] | "\\u" [0-9a-fA-F]{4}"#;
const INTEGER_BODY: &str = r#"("-"? ([0-9] | [1-9] [0-9]*))"#;
const FRACTIONAL_BODY: &str =
    r#"("-"? ([0-9] | [1-9] [0-9]*)) ("." [0-9]+)? ([eE] [-+]? [0-9]+)?"#;

// ------------------------------ Options ----------------------------------- //

#[derive(Debug, Clone, Copy)]
pub struct GrammarOptions {
    pub allow_new_lines: bool,
    pub scope_pad_spaces: u32,
}

impl Default for GrammarOptions {
    fn default() -> Self {
        Self { allow_new_lines: true, scope_pad_spaces: 4 }
    }
}

/// The grammar artifact: a root rule plus the named-rule table, with the
/// warnings gathered while lowering.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub root: String,
    pub rules: IndexMap<String, String>,
    pub warnings: Vec<CompileWarning>,
}

impl CompiledGrammar {
    /// Render the full GBNF text. The root rule carries the original's
    /// end-of-value tail so a constrained decoder terminates generation.
    pub fn to_gbnf(&self) -> String {
        let mut lines = Vec::with_capacity(self.rules.len() + 1);
        lines.push(format!("root ::= {} \"\\n\\n\\n\\n\" [\\n]*", self.root));
        for (name, body) in &self.rules {
            lines.push(format!("{name} ::= {body}"));
        }
        lines.join("\n")
    }
}

/// Compile a schema into a GBNF grammar artifact.
pub fn compile_grammar(
    schema: &Schema,
    options: GrammarOptions,
) -> Result<CompiledGrammar, CompileError> {
    let mut ctx = Compiler::new();
    let scope = ScopeState::root(ScopeSettings {
        allow_new_lines: options.allow_new_lines,
        scope_pad_spaces: options.scope_pad_spaces,
    });
    let root_terminal = lower(schema, scope, &mut ctx)?;

    let mut generator = GrammarGenerator::new();
    // Reserve definition rule names up front so anonymous rules cannot
    // collide with them and self-references stay valid.
    for def in ctx.registry.compiled_rules() {
        generator.insert_placeholder(&def.rule);
    }
    let root = generator.grammar_text(&root_terminal);
    let def_bodies: Vec<(String, Option<Terminal>)> = ctx
        .registry
        .compiled_rules()
        .map(|def| (def.rule.clone(), def.body.clone()))
        .collect();
    for (rule, body) in def_bodies {
        if let Some(body) = body {
            let text = generator.grammar_text(&body);
            generator.set_rule(&rule, text);
        }
    }

    Ok(CompiledGrammar {
        root,
        rules: generator.into_rules(),
        warnings: ctx.warnings,
    })
}

// ----------------------------- Generator ---------------------------------- //

#[derive(Debug, Default)]
pub struct GrammarGenerator {
    /// Rule table in definition order. `None` marks a rule that is reserved
    /// but not yet written (definition bodies, in-progress any-json rules).
    rules: IndexMap<String, Option<String>>,
    /// Content → name map so identical anonymous rules are emitted once.
    rule_content_to_name: HashMap<String, String>,
    next_rule_id: u32,
}

impl GrammarGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_placeholder(&mut self, name: &str) {
        self.rules.entry(name.to_string()).or_insert(None);
    }

    pub fn set_rule(&mut self, name: &str, body: String) {
        self.rule_content_to_name
            .entry(body.clone())
            .or_insert_with(|| name.to_string());
        self.rules.insert(name.to_string(), Some(body));
    }

    pub fn into_rules(self) -> IndexMap<String, String> {
        self.rules
            .into_iter()
            .filter_map(|(name, body)| body.map(|b| (name, b)))
            .collect()
    }

    fn fresh_rule_name(&mut self) -> String {
        let id = self.next_rule_id;
        self.next_rule_id += 1;
        format!("rule{id}")
    }

    /// Allocate (or reuse) an anonymous rule for the given content.
    fn add_anonymous_rule(&mut self, content: String) -> String {
        if let Some(name) = self.rule_content_to_name.get(&content) {
            return name.clone();
        }
        // a bare rule reference needs no wrapper rule
        if self.rules.contains_key(&content) {
            return content;
        }
        let name = self.fresh_rule_name();
        self.rules.insert(name.clone(), Some(content.clone()));
        self.rule_content_to_name.insert(content, name.clone());
        name
    }

    /// Define a reserved-name rule on first use and return its name.
    fn reserved_rule(&mut self, name: String, body: impl FnOnce(&mut Self) -> String) -> String {
        if !self.rules.contains_key(&name) {
            // placeholder first: the body may reference the rule by name
            self.rules.insert(name.clone(), None);
            let content = body(self);
            if let Some(slot) = self.rules.get_mut(&name) {
                *slot = Some(content);
            }
        }
        name
    }

    /// Resolve a terminal in child position: a rule name, or a short inline
    /// grammar when no rule is warranted.
    pub fn resolve(&mut self, terminal: &Terminal) -> String {
        match terminal {
            Terminal::Null => self.reserved_rule("null-rule".into(), |_| "\"null\"".into()),
            Terminal::Boolean => self
                .reserved_rule("boolean-rule".into(), |_| "( \"true\" | \"false\" )".into()),
            Terminal::Number { allow_fractional: false } => {
                self.reserved_rule("integer-number-rule".into(), |_| INTEGER_BODY.into())
            }
            Terminal::Number { allow_fractional: true } => {
                self.reserved_rule("fractional-number-rule".into(), |_| FRACTIONAL_BODY.into())
            }
            Terminal::String { min_len, max_len } => {
                let (min, max) = (*min_len, *max_len);
                self.reserved_rule(string_rule_name(min, max), |g| {
                    g.string_body(min, max)
                })
            }
            Terminal::Format(format) => {
                let format = *format;
                self.reserved_rule(
                    format!("formatted-string-{}-rule", format.keyword()),
                    |_| format_string_body(format),
                )
            }
            Terminal::AnyJson { scope } => self.any_json_rule(*scope),
            Terminal::RuleRef(name) => name.clone(),
            Terminal::LiteralValue(literal) => {
                self.add_anonymous_rule(gbnf_string_literal(&literal.json_text()))
            }
            Terminal::Or(_) => {
                match self.or_parts(terminal) {
                    OrParts::Empty => NO_VALUE.to_string(),
                    OrParts::Single(inner) => inner,
                    OrParts::Many(content) => self.add_anonymous_rule(content),
                }
            }
            Terminal::Array { .. } | Terminal::ObjectMap { .. } => {
                let content = self.grammar_text(terminal);
                self.add_anonymous_rule(content)
            }
        }
    }

    /// The terminal's full grammar, inline. Used for the root rule and for
    /// definition-rule bodies.
    pub fn grammar_text(&mut self, terminal: &Terminal) -> String {
        match terminal {
            Terminal::Or(_) => match self.or_parts(terminal) {
                OrParts::Empty => NO_VALUE.to_string(),
                OrParts::Single(inner) => inner,
                OrParts::Many(content) => content,
            },
            Terminal::Array { prefix, item, min_items, max_items, scope } => {
                self.array_grammar(prefix, item, *min_items, *max_items, *scope)
            }
            Terminal::ObjectMap { fields, additional, min_props, max_props, scope } => {
                self.object_grammar(fields, additional.as_deref(), *min_props, *max_props, *scope)
            }
            Terminal::Null => "\"null\"".to_string(),
            Terminal::Boolean => "( \"true\" | \"false\" )".to_string(),
            Terminal::Number { allow_fractional: false } => INTEGER_BODY.to_string(),
            Terminal::Number { allow_fractional: true } => FRACTIONAL_BODY.to_string(),
            Terminal::String { min_len, max_len } => self.string_body(*min_len, *max_len),
            Terminal::Format(format) => format_string_body(*format),
            Terminal::LiteralValue(literal) => gbnf_string_literal(&literal.json_text()),
            // the any-json grammar is self-referential, so it always lives in
            // a named rule
            Terminal::AnyJson { scope } => self.any_json_rule(*scope),
            Terminal::RuleRef(name) => name.clone(),
        }
    }

    fn or_parts(&mut self, terminal: &Terminal) -> OrParts {
        let Terminal::Or(arms) = terminal else {
            return OrParts::Single(self.resolve(terminal));
        };
        let mut resolved: Vec<String> = Vec::with_capacity(arms.len());
        for arm in arms {
            let part = self.resolve(arm);
            if part.is_empty() || part == NO_VALUE {
                continue;
            }
            resolved.push(part);
        }
        match resolved.len() {
            0 => OrParts::Empty,
            1 => OrParts::Single(resolved.remove(0)),
            _ => OrParts::Many(format!("( {} )", resolved.join(" | "))),
        }
    }

    // ------------------------- composite bodies --------------------------- //

    fn string_body(&mut self, min_len: u32, max_len: Option<u32>) -> String {
        if min_len == 0 && max_len == Some(0) {
            return "\"\\\"\\\"\"".to_string();
        }
        let char_rule = self.reserved_rule("string-char-rule".into(), |_| {
            STRING_CHAR_BODY.to_string()
        });
        if min_len == 0 && max_len.is_none() {
            format!("\"\\\"\" {char_rule}* \"\\\"\"")
        } else {
            let reps = repetition(&char_rule, None, min_len, max_len);
            format!("\"\\\"\" {reps} \"\\\"\"")
        }
    }

    fn whitespace_rule(&mut self, scope: ScopeState) -> String {
        if !scope.settings.allow_new_lines {
            return self
                .reserved_rule("whitespace-no-new-lines-rule".into(), |_| "[ ]?".into());
        }
        let name = format!(
            "whitespace-b-{}-{}-rule",
            scope.nesting_scope, scope.settings.scope_pad_spaces
        );
        self.reserved_rule(name, |_| {
            if scope.nesting_scope == 0 {
                "([\\n] | [ ]?)".to_string()
            } else {
                let spaces = verbatim_repetition(
                    " ",
                    scope.nesting_scope * scope.settings.scope_pad_spaces,
                );
                let tabs = verbatim_repetition("\t", scope.nesting_scope);
                format!("([\\n] ({spaces} | {tabs}) | [ ]?)")
            }
        })
    }

    /// The wildcard any-JSON rule for a scope. Its array/object arms recurse
    /// through a newline-free copy of the rule, which references itself by
    /// name, keeping the rule set finite.
    fn any_json_rule(&mut self, scope: ScopeState) -> String {
        let name = format!(
            "any-json-{}-{}-{}-rule",
            if scope.settings.allow_new_lines { "nl" } else { "nnl" },
            scope.nesting_scope,
            scope.settings.scope_pad_spaces
        );
        if self.rules.contains_key(&name) {
            return name;
        }
        self.rules.insert(name.clone(), None);

        let item: Terminal = if scope.settings.allow_new_lines {
            Terminal::AnyJson { scope: scope.without_new_lines() }
        } else {
            Terminal::RuleRef(name.clone())
        };
        let body_terminal = Terminal::Or(vec![
            Terminal::String { min_len: 0, max_len: None },
            Terminal::Number { allow_fractional: true },
            Terminal::Boolean,
            Terminal::Null,
            Terminal::Array {
                prefix: Vec::new(),
                item: Box::new(item.clone()),
                min_items: 0,
                max_items: None,
                scope,
            },
            Terminal::ObjectMap {
                fields: Vec::new(),
                additional: Some(Box::new(item)),
                min_props: 0,
                max_props: None,
                scope,
            },
        ]);
        let body = self.grammar_text(&body_terminal);
        if let Some(slot) = self.rules.get_mut(&name) {
            *slot = Some(body);
        }
        name
    }

    fn array_grammar(
        &mut self,
        prefix: &[Terminal],
        item: &Terminal,
        min_items: u32,
        max_items: Option<u32>,
        scope: ScopeState,
    ) -> String {
        let ws_new = self.whitespace_rule(scope.for_new_scope());
        let ws_cur = self.whitespace_rule(scope);

        let prefix_len = prefix.len() as u32;
        let tail_min = min_items.saturating_sub(prefix_len);
        let tail_max = max_items.map(|m| m.saturating_sub(prefix_len));

        let mut pieces: Vec<String> = vec!["\"[\"".into(), ws_new.clone()];
        for (index, prefix_item) in prefix.iter().enumerate() {
            if index > 0 {
                pieces.push("\",\"".into());
                pieces.push(ws_new.clone());
            }
            pieces.push(self.resolve(prefix_item));
        }
        if tail_max != Some(0) {
            let item_ref = self.resolve(item);
            let tail = if prefix.is_empty() {
                let separator = format!("\",\" {ws_new}");
                repetition(&item_ref, Some(&separator), tail_min, tail_max)
            } else {
                // every trailing element is preceded by a comma
                let unit = format!("\",\" {ws_new} {item_ref}");
                repetition(&unit, None, tail_min, tail_max)
            };
            if tail != NO_VALUE {
                pieces.push(tail);
            }
        }
        pieces.push(ws_cur);
        pieces.push("\"]\"".into());
        pieces.join(" ")
    }

    fn object_grammar(
        &mut self,
        fields: &[crate::terminal::ObjectField],
        additional: Option<&Terminal>,
        min_props: u32,
        max_props: Option<u32>,
        scope: ScopeState,
    ) -> String {
        let ws_new = self.whitespace_rule(scope.for_new_scope());
        let ws_cur = self.whitespace_rule(scope);

        let mut pieces: Vec<String> = vec!["\"{\"".into(), ws_new.clone()];
        for (index, field) in fields.iter().enumerate() {
            pieces.push(json_string_literal(&field.key));
            pieces.push("\":\"".into());
            pieces.push("[ ]?".into());
            pieces.push(self.resolve(&field.value));
            if index + 1 < fields.len() {
                pieces.push("\",\"".into());
                pieces.push(ws_new.clone());
            }
        }

        if let Some(additional) = additional {
            let known = fields.len() as u32;
            let extra_min = min_props.saturating_sub(known);
            let extra_max = max_props.map(|m| m.saturating_sub(known));
            if extra_max != Some(0) {
                let key_rule =
                    self.resolve(&Terminal::String { min_len: 0, max_len: None });
                let value_rule = self.resolve(additional);
                let entry = format!("{key_rule} \":\" [ ]? {value_rule}");
                let extras = if fields.is_empty() {
                    let separator = format!("\",\" {ws_new}");
                    repetition(&entry, Some(&separator), extra_min, extra_max)
                } else {
                    let unit = format!("\",\" {ws_new} {entry}");
                    repetition(&unit, None, extra_min, extra_max)
                };
                if extras != NO_VALUE {
                    pieces.push(extras);
                }
            }
        }

        pieces.push(ws_cur);
        pieces.push("\"}\"".into());
        pieces.join(" ")
    }
}

enum OrParts {
    Empty,
    Single(String),
    Many(String),
}

// ------------------------------ Helpers ----------------------------------- //

fn string_rule_name(min_len: u32, max_len: Option<u32>) -> String {
    match (min_len, max_len) {
        (0, None) => "string-rule".to_string(),
        (min, None) => format!("string-{min}-rule"),
        (min, Some(max)) => format!("string-{min}-{max}-rule"),
    }
}

/// A GBNF string literal matching `text` verbatim.
fn gbnf_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A GBNF literal matching `text` as a JSON string (quotes included).
fn json_string_literal(text: &str) -> String {
    let json = serde_json::to_string(text).unwrap_or_else(|_| format!("{text:?}"));
    gbnf_string_literal(&json)
}

/// Repeated verbatim text, rendered as whichever of the plain and `{n}`
/// repetition forms is shorter.
fn verbatim_repetition(text: &str, count: u32) -> String {
    let plain = gbnf_string_literal(&text.repeat(count as usize));
    if count <= 1 {
        return plain;
    }
    let counted = format!("{}{{{count}}}", gbnf_string_literal(text));
    if counted.len() < plain.len() { counted } else { plain }
}

/// Bounded repetition of `value`, optionally interleaved with `separator`.
/// Mirrors the GBNF `?` / `*` / `+` / `{m,n}` forms.
fn repetition(value: &str, separator: Option<&str>, min: u32, max: Option<u32>) -> String {
    let max = max.map(|m| m.max(min));
    if max == Some(0) {
        return NO_VALUE.to_string();
    }
    match (min, max, separator) {
        (0, Some(1), _) => format!("( {value} )?"),
        (1, Some(1), _) => value.to_string(),
        (m, Some(mx), sep) if m == mx => match sep {
            None => format!("( {value} ){{{m}}}"),
            Some(sep) if m == 2 => format!("{value} {sep} {value}"),
            Some(sep) => format!("{value} ( {sep} {value} ){{{}}}", m - 1),
        },
        (0, None, None) => format!("( {value} )*"),
        (0, None, Some(sep)) => format!("( {value} ( {sep} {value} )* )?"),
        (1, None, None) => format!("( {value} )+"),
        (1, None, Some(sep)) => format!("{value} ( {sep} {value} )*"),
        (m, None, None) => format!("( {value} ){{{m},}}"),
        (m, None, Some(sep)) => format!("{value} ( {sep} {value} ){{{},}}", m - 1),
        (m, Some(mx), None) => format!("( {value} ){{{m},{mx}}}"),
        (0, Some(2), Some(sep)) => format!("( {value} ( {sep} {value} )? )?"),
        (0, Some(mx), Some(sep)) => format!("( {value} ( {sep} {value} ){{0,{}}} )?", mx - 1),
        (1, Some(2), Some(sep)) => format!("{value} ( {sep} {value} )?"),
        (1, Some(mx), Some(sep)) => format!("{value} ( {sep} {value} ){{0,{}}}", mx - 1),
        (m, Some(mx), Some(sep)) => {
            format!("{value} ( {sep} {value} ){{{},{}}}", m - 1, mx - 1)
        }
    }
}

fn format_string_body(format: StringFormat) -> String {
    let quote = "\"\\\"\"";
    match format {
        StringFormat::Date => format!("{quote} {} {quote}", date_grammar()),
        StringFormat::Time => format!("{quote} {} {quote}", time_grammar()),
        StringFormat::DateTime => {
            format!("{quote} {} \"T\" {} {quote}", date_grammar(), time_grammar())
        }
    }
}

fn date_grammar() -> String {
    [
        "[0-9]{4}",
        "\"-\"",
        "(\"0\" [1-9] | \"1\" [012])",
        "\"-\"",
        "(\"0\" [1-9] | [12] [0-9] | \"3\" [01])",
    ]
    .join(" ")
}

fn time_grammar() -> String {
    [
        "([01] [0-9] | \"2\" [0-3])",
        "\":\"",
        "[0-5] [0-9]",
        "\":\"",
        "[0-5] [0-9]",
        "( \".\" [0-9]{3} )?",
        "(\"Z\" | (\"+\" | \"-\") ([01] [0-9] | \"2\" [0-3]) \":\" [0-5] [0-9])",
    ]
    .join(" ")
}

// ------------------------------- Tests ------------------------------------ //

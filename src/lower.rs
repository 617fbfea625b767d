//! Lowering engine: recursive schema → terminal compilation.
//!
//! Dispatch is a single exhaustive match in priority order (`$ref` > `oneOf` >
//! `const` > `enum` > object > array > string > format > basic). Inconsistent
//! bounds are corrected by clamping to the minimum legal value, never by
//! failing; every clamp and every unresolvable `$ref` is reported through the
//! warning side-channel. The only fatal conditions are the nesting-depth
//! ceiling and (upstream) an unclassifiable schema document.

use crate::defs::DefsRegistry;
use crate::schema::{AdditionalProperties, ImmutableType, Schema};
use crate::scope::ScopeState;
use crate::terminal::{ObjectField, Terminal};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(
        "maximum nesting scope exceeded while lowering the schema \
         (possible causes: circular `$ref` references, pathologically deep nesting)"
    )]
    MaxNestingScopeExceeded,
}

/// Non-fatal corrective warnings. Reported via `log::warn!` and accumulated
/// on the compilation context so callers can inspect them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    MaxPropertiesClamped { declared: i64, clamped_to: u64 },
    MaxItemsClamped { declared: i64, clamped_to: u64 },
    MaxLengthClamped { declared: i64, clamped_to: u64 },
    UnresolvedRef { pointer: String },
}

impl std::fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileWarning::MaxPropertiesClamped { declared, clamped_to } => write!(
                f,
                "maxProperties ({declared}) must be greater than or equal to the number of \
                 declared properties ({clamped_to}); using the property count as maxProperties"
            ),
            CompileWarning::MaxItemsClamped { declared, clamped_to } => write!(
                f,
                "maxItems ({declared}) must be greater than or equal to the prefixItems array \
                 length ({clamped_to}); using the prefixItems length as maxItems"
            ),
            CompileWarning::MaxLengthClamped { declared, clamped_to } => write!(
                f,
                "maxLength ({declared}) must be greater than or equal to minLength \
                 ({clamped_to}); using minLength as maxLength"
            ),
            CompileWarning::UnresolvedRef { pointer } => write!(
                f,
                "failed to resolve $ref {pointer:?}; substituting a grammar that accepts any \
                 JSON value"
            ),
        }
    }
}

/// Per-compilation context: the definition registry plus the warning list.
/// Constructed fresh per top-level call, threaded by reference through every
/// recursive call, discarded once the artifact is emitted.
#[derive(Debug, Default)]
pub struct Compiler {
    pub registry: DefsRegistry,
    pub warnings: Vec<CompileWarning>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn(&mut self, warning: CompileWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Lower one schema node into a terminal under the given scope.
pub fn lower(
    schema: &Schema,
    scope: ScopeState,
    ctx: &mut Compiler,
) -> Result<Terminal, CompileError> {
    if scope.exceeds_ceiling() {
        return Err(CompileError::MaxNestingScopeExceeded);
    }

    match schema {
        Schema::Ref { pointer, defs } => {
            ctx.registry.register_defs(defs);
            let resolved = ctx
                .registry
                .resolve(pointer)
                .map(|(name, target)| (name.to_string(), target.clone()));
            let Some((name, target)) = resolved else {
                // Fail-open: one bad reference never aborts the compilation.
                ctx.warn(CompileWarning::UnresolvedRef { pointer: pointer.clone() });
                return Ok(Terminal::AnyJson { scope });
            };
            if let Some(rule) = ctx.registry.rule_for(&name, &target) {
                return Ok(Terminal::RuleRef(rule.to_string()));
            }
            // Reserve before compiling the body so self-references inside it
            // become named-rule references instead of inlining forever.
            let rule = ctx.registry.reserve_rule(&name, target.clone());
            let body = lower(&target, scope.for_ref_target(), ctx)?;
            ctx.registry.finish_rule(&rule, body);
            Ok(Terminal::RuleRef(rule))
        }

        Schema::OneOf { alternatives, defs } => {
            ctx.registry.register_defs(defs);
            // Siblings share the caller's scope; order is the validator's
            // tie-break order.
            let arms = alternatives
                .iter()
                .map(|alt| lower(alt, scope, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Terminal::or_of(arms))
        }

        Schema::Const { value } => Ok(Terminal::LiteralValue(value.clone())),

        Schema::Enum { values } => Ok(Terminal::or_of(
            values.iter().cloned().map(Terminal::LiteralValue).collect(),
        )),

        Schema::Object {
            properties,
            additional_properties,
            min_properties,
            max_properties,
            defs,
        } => {
            ctx.registry.register_defs(defs);
            let mut fields = Vec::with_capacity(properties.len());
            for (key, prop) in properties {
                fields.push(ObjectField {
                    key: key.clone(),
                    value: lower(prop, scope.for_new_scope(), ctx)?,
                });
            }
            let known = properties.len() as i64;
            let mut max_props = *max_properties;
            if let Some(declared) = max_props
                && declared < known
            {
                ctx.warn(CompileWarning::MaxPropertiesClamped {
                    declared,
                    clamped_to: known as u64,
                });
                max_props = Some(known);
            }
            let additional = match additional_properties {
                AdditionalProperties::None => None,
                AdditionalProperties::Any => {
                    Some(Box::new(Terminal::AnyJson { scope: scope.for_new_scope() }))
                }
                AdditionalProperties::Schema(inner) => {
                    Some(Box::new(lower(inner, scope.for_new_scope(), ctx)?))
                }
            };
            Ok(Terminal::ObjectMap {
                fields,
                additional,
                min_props: (*min_properties).unwrap_or(0).max(0) as u32,
                max_props: max_props.map(|m| m.max(0) as u32),
                scope,
            })
        }

        Schema::Array { items, prefix_items, min_items, max_items, defs } => {
            ctx.registry.register_defs(defs);
            let prefix = prefix_items
                .iter()
                .map(|p| lower(p, scope.for_new_scope(), ctx))
                .collect::<Result<Vec<_>, _>>()?;
            let prefix_len = prefix.len() as i64;
            let mut max = *max_items;
            if let Some(declared) = max
                && declared < prefix_len
            {
                ctx.warn(CompileWarning::MaxItemsClamped {
                    declared,
                    clamped_to: prefix_len as u64,
                });
                max = Some(prefix_len);
            }
            let item = match items {
                Some(inner) => lower(inner, scope.for_new_scope(), ctx)?,
                // Elements past the prefix are unconstrained.
                None => Terminal::AnyJson { scope: scope.for_new_scope() },
            };
            Ok(Terminal::Array {
                prefix,
                item: Box::new(item),
                min_items: (*min_items).unwrap_or(0).max(0) as u32,
                max_items: max.map(|m| m.max(0) as u32),
                scope,
            })
        }

        Schema::String { min_length, max_length } => {
            let min = (*min_length).unwrap_or(0).max(0);
            let mut max = *max_length;
            if let Some(declared) = max
                && declared < min
            {
                ctx.warn(CompileWarning::MaxLengthClamped {
                    declared,
                    clamped_to: min as u64,
                });
                max = Some(min);
            }
            Ok(Terminal::String {
                min_len: min as u32,
                max_len: max.map(|m| m.max(0) as u32),
            })
        }

        Schema::Format { format } => Ok(Terminal::Format(*format)),

        Schema::Basic { types } => {
            let mut arms: Vec<Terminal> = types
                .iter()
                .map(|t| match t {
                    ImmutableType::String => {
                        Terminal::String { min_len: 0, max_len: None }
                    }
                    ImmutableType::Number => Terminal::Number { allow_fractional: true },
                    ImmutableType::Integer => Terminal::Number { allow_fractional: false },
                    ImmutableType::Boolean => Terminal::Boolean,
                    ImmutableType::Null => Terminal::Null,
                })
                .collect();
            if arms.is_empty() {
                arms.push(Terminal::Null);
            }
            Ok(Terminal::or_of(arms))
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Literal;
    use crate::scope::ScopeSettings;
    use serde_json::json;

    fn lower_value(v: serde_json::Value) -> (Terminal, Compiler) {
        let schema = Schema::from_value(&v).expect("schema classifies");
        let mut ctx = Compiler::new();
        let term = lower(&schema, ScopeState::root(ScopeSettings::default()), &mut ctx)
            .expect("lowering succeeds");
        (term, ctx)
    }

    #[test]
    fn basic_with_no_recognized_type_defaults_to_null() {
        let (term, ctx) = lower_value(json!({"type": []}));
        assert!(matches!(term, Terminal::Null));
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn enum_lowers_to_ordered_literal_alternatives() {
        let (term, _) = lower_value(json!({"enum": [1, 2, 3, 4]}));
        let Terminal::Or(arms) = term else { panic!("expected an Or terminal") };
        assert_eq!(arms.len(), 4);
        assert!(matches!(&arms[0], Terminal::LiteralValue(Literal::Int(1))));
        assert!(matches!(&arms[3], Terminal::LiteralValue(Literal::Int(4))));
    }

    #[test]
    fn singleton_one_of_collapses() {
        let (term, _) = lower_value(json!({"oneOf": [{"type": "boolean"}]}));
        assert!(matches!(term, Terminal::Boolean));
    }

    #[test]
    fn max_properties_below_property_count_clamps_with_one_warning() {
        let (term, ctx) = lower_value(json!({
            "type": "object",
            "properties": {
                "a": {"type": "null"}, "b": {"type": "null"}, "c": {"type": "null"},
                "d": {"type": "null"}, "e": {"type": "null"}
            },
            "maxProperties": 2
        }));
        let Terminal::ObjectMap { max_props, .. } = term else { panic!() };
        assert_eq!(max_props, Some(5));
        assert_eq!(
            ctx.warnings,
            vec![CompileWarning::MaxPropertiesClamped { declared: 2, clamped_to: 5 }]
        );
    }

    #[test]
    fn max_items_below_prefix_length_clamps_with_one_warning() {
        let (term, ctx) = lower_value(json!({
            "type": "array",
            "prefixItems": [{"type": "string"}, {"type": "integer"}, {"type": "boolean"}],
            "maxItems": 1
        }));
        let Terminal::Array { max_items, .. } = term else { panic!() };
        assert_eq!(max_items, Some(3));
        assert_eq!(
            ctx.warnings,
            vec![CompileWarning::MaxItemsClamped { declared: 1, clamped_to: 3 }]
        );
    }

    #[test]
    fn inconsistent_string_bounds_clamp_with_one_warning() {
        let (term, ctx) = lower_value(json!({
            "type": "string", "minLength": 4, "maxLength": 2
        }));
        assert!(matches!(term, Terminal::String { min_len: 4, max_len: Some(4) }));
        assert_eq!(
            ctx.warnings,
            vec![CompileWarning::MaxLengthClamped { declared: 2, clamped_to: 4 }]
        );
    }

    #[test]
    fn negative_min_length_clamps_to_zero_silently() {
        let (term, ctx) = lower_value(json!({"type": "string", "minLength": -3}));
        assert!(matches!(term, Terminal::String { min_len: 0, max_len: None }));
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn unresolved_ref_is_fail_open_with_one_warning() {
        let (term, ctx) = lower_value(json!({
            "$ref": "#/$defs/missing",
            "$defs": {"present": {"type": "string"}}
        }));
        assert!(matches!(term, Terminal::AnyJson { .. }));
        assert_eq!(
            ctx.warnings,
            vec![CompileWarning::UnresolvedRef { pointer: "#/$defs/missing".into() }]
        );
    }

    #[test]
    fn self_referential_def_compiles_to_a_named_rule() {
        let (term, ctx) = lower_value(json!({
            "$ref": "#/$defs/node",
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "integer"},
                        "next": {"oneOf": [{"$ref": "#/$defs/node"}, {"type": "null"}]}
                    }
                }
            }
        }));
        let Terminal::RuleRef(rule) = term else { panic!("expected a rule reference") };
        assert_eq!(rule, "def-node-rule");
        // the single cached rule has a finished body that references itself
        let rules: Vec<_> = ctx.registry.compiled_rules().collect();
        assert_eq!(rules.len(), 1);
        let body = rules[0].body.as_ref().expect("body compiled");
        let Terminal::ObjectMap { fields, .. } = body else { panic!() };
        let Terminal::Or(next_arms) = &fields[1].value else { panic!() };
        assert!(matches!(&next_arms[0], Terminal::RuleRef(r) if r == "def-node-rule"));
    }

    #[test]
    fn shadowing_defs_compile_to_distinct_rules() {
        let (term, ctx) = lower_value(json!({
            "type": "object",
            "properties": {
                "outer": {"$ref": "#/$defs/node", "$defs": {"node": {"type": "string"}}},
                "inner": {"$ref": "#/$defs/node", "$defs": {"node": {"type": "boolean"}}}
            }
        }));
        assert!(matches!(term, Terminal::ObjectMap { .. }));
        let rules: Vec<_> = ctx.registry.compiled_rules().map(|r| r.rule.clone()).collect();
        assert_eq!(rules, ["def-node-rule", "def-node1-rule"]);
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn nesting_ceiling_is_fatal() {
        // 600 nested arrays of arrays, one scope step each
        let mut schema = Schema::Basic { types: vec![ImmutableType::Null] };
        for _ in 0..600 {
            schema = Schema::Array {
                items: Some(Box::new(schema)),
                prefix_items: Vec::new(),
                min_items: None,
                max_items: None,
                defs: Default::default(),
            };
        }
        let mut ctx = Compiler::new();
        let result = lower(&schema, ScopeState::root(ScopeSettings::default()), &mut ctx);
        assert!(matches!(result, Err(CompileError::MaxNestingScopeExceeded)));
    }
}

//! Schema model: a closed sum type over the schema dialect we compile.
//!
//! A schema document arrives as loosely-typed JSON; this module classifies it
//! into exactly one variant. Classification is total: a node that matches no
//! discriminant field degrades to `Basic`, and an empty/unrecognized type set
//! degrades to `null`. The discriminant priority mirrors the dispatch order of
//! the lowering engine and the validator:
//!
//! `$ref` > `oneOf` > `const` > `enum` > object > array > string > basic

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::Deserialize;
use serde_json::Value;

// ------------------------------- Types ------------------------------------ //

/// Primitive JSON types a `Basic` schema can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmutableType {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl ImmutableType {
    pub fn keyword(&self) -> &'static str {
        match self {
            ImmutableType::String => "string",
            ImmutableType::Number => "number",
            ImmutableType::Integer => "integer",
            ImmutableType::Boolean => "boolean",
            ImmutableType::Null => "null",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(ImmutableType::String),
            "number" => Some(ImmutableType::Number),
            "integer" => Some(ImmutableType::Integer),
            "boolean" => Some(ImmutableType::Boolean),
            "null" => Some(ImmutableType::Null),
            _ => None,
        }
    }
}

/// A JSON scalar usable in `const` / `enum` positions.
///
/// Floats are wrapped in `OrderedFloat` so literals are `Eq + Hash` and can
/// key the definition-rule cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl Literal {
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        match value {
            Value::Null => Ok(Literal::Null),
            Value::Bool(b) => Ok(Literal::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Literal::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Literal::Float(OrderedFloat(f)))
                } else {
                    Err(SchemaError::UnsupportedLiteral(value.clone()))
                }
            }
            Value::String(s) => Ok(Literal::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => {
                Err(SchemaError::UnsupportedLiteral(value.clone()))
            }
        }
    }

    /// Literal equality against a runtime value, with JS-style numeric
    /// comparison (`2 == 2.0`).
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Null, Value::Null) => true,
            (Literal::Bool(a), Value::Bool(b)) => a == b,
            (Literal::Int(a), Value::Number(n)) => n.as_f64() == Some(*a as f64),
            (Literal::Float(a), Value::Number(n)) => n.as_f64() == Some(a.0),
            (Literal::Str(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    /// The literal rendered as JSON source text.
    pub fn json_text(&self) -> String {
        match self {
            Literal::Null => "null".to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => serde_json::Number::from_f64(f.0)
                .map(|n| n.to_string())
                .unwrap_or_else(|| f.0.to_string()),
            Literal::Str(s) => {
                serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
            }
        }
    }
}

/// Named string formats with dedicated sub-grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringFormat {
    Date,
    Time,
    DateTime,
}

impl StringFormat {
    pub fn keyword(&self) -> &'static str {
        match self {
            StringFormat::Date => "date",
            StringFormat::Time => "time",
            StringFormat::DateTime => "date-time",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "date" => Some(StringFormat::Date),
            "time" => Some(StringFormat::Time),
            "date-time" => Some(StringFormat::DateTime),
            _ => None,
        }
    }
}

/// Policy for object keys beyond the declared properties.
///
/// Unlike the JSON Schema spec, the default is `None` (forbid): generation
/// cannot leave unlisted keys open-ended unless the schema opts in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdditionalProperties {
    #[default]
    None,
    Any,
    Schema(Box<Schema>),
}

pub type Defs = IndexMap<String, Schema>;

/// A schema node. Every node is exactly one variant; dispatch sites match
/// exhaustively so a new variant cannot be added without updating them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// One or more primitive types; the residual default.
    Basic { types: Vec<ImmutableType> },
    /// Exactly one scalar value.
    Const { value: Literal },
    /// One of the listed scalar values, order-significant.
    Enum { values: Vec<Literal> },
    /// First alternative that matches wins; order-significant.
    OneOf { alternatives: Vec<Schema>, defs: Defs },
    /// Fixed keys in declaration order; all declared properties are required.
    Object {
        properties: IndexMap<String, Schema>,
        additional_properties: AdditionalProperties,
        min_properties: Option<i64>,
        max_properties: Option<i64>,
        defs: Defs,
    },
    /// Tuple-typed prefix followed by a uniformly-typed tail.
    Array {
        items: Option<Box<Schema>>,
        prefix_items: Vec<Schema>,
        min_items: Option<i64>,
        max_items: Option<i64>,
        defs: Defs,
    },
    /// A plain string, optionally length-bounded (in characters).
    String {
        min_length: Option<i64>,
        max_length: Option<i64>,
    },
    /// A string matching a named format's sub-grammar.
    Format { format: StringFormat },
    /// A `#/$defs/<name>` pointer, resolved against the merged definitions.
    Ref { pointer: String, defs: Defs },
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unsupported literal value (only JSON scalars are allowed): {0}")]
    UnsupportedLiteral(Value),
    #[error("unknown string format {0:?} (supported: date, time, date-time)")]
    UnknownFormat(String),
    #[error("malformed schema document: {0}")]
    Malformed(#[from] serde_json::Error),
}

// --------------------------- Classification ------------------------------- //

/// Loose mirror of a schema document. Unknown keys (`description`, `required`,
/// vendor extensions) are ignored; classification happens in `TryFrom`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawSchema {
    #[serde(rename = "$ref")]
    ref_: Option<String>,
    #[serde(rename = "oneOf")]
    one_of: Option<Vec<RawSchema>>,
    /// Custom deserializer so `"const": null` (a null literal) is
    /// distinguishable from an absent `const`.
    #[serde(rename = "const", deserialize_with = "deserialize_present")]
    const_: Option<Value>,
    #[serde(rename = "enum")]
    enum_: Option<Vec<Value>>,
    #[serde(rename = "type")]
    type_: Option<TypeSet>,
    format: Option<String>,
    #[serde(rename = "minLength")]
    min_length: Option<i64>,
    #[serde(rename = "maxLength")]
    max_length: Option<i64>,
    properties: Option<IndexMap<String, RawSchema>>,
    #[serde(rename = "additionalProperties")]
    additional_properties: Option<RawAdditional>,
    #[serde(rename = "minProperties")]
    min_properties: Option<i64>,
    #[serde(rename = "maxProperties")]
    max_properties: Option<i64>,
    items: Option<Box<RawSchema>>,
    #[serde(rename = "prefixItems")]
    prefix_items: Option<Vec<RawSchema>>,
    #[serde(rename = "minItems")]
    min_items: Option<i64>,
    #[serde(rename = "maxItems")]
    max_items: Option<i64>,
    #[serde(rename = "$defs")]
    defs: Option<IndexMap<String, RawSchema>>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeSet {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAdditional {
    Bool(bool),
    Schema(Box<RawSchema>),
}

fn convert_defs(defs: Option<IndexMap<String, RawSchema>>) -> Result<Defs, SchemaError> {
    let mut out = Defs::new();
    for (name, raw) in defs.unwrap_or_default() {
        out.insert(name, Schema::try_from(raw)?);
    }
    Ok(out)
}

impl TryFrom<RawSchema> for Schema {
    type Error = SchemaError;

    fn try_from(raw: RawSchema) -> Result<Self, Self::Error> {
        if let Some(pointer) = raw.ref_ {
            return Ok(Schema::Ref {
                pointer,
                defs: convert_defs(raw.defs)?,
            });
        }

        if let Some(alternatives) = raw.one_of {
            return Ok(Schema::OneOf {
                alternatives: alternatives
                    .into_iter()
                    .map(Schema::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
                defs: convert_defs(raw.defs)?,
            });
        }

        if let Some(value) = raw.const_ {
            return Ok(Schema::Const {
                value: Literal::from_value(&value)?,
            });
        }

        if let Some(values) = raw.enum_ {
            return Ok(Schema::Enum {
                values: values
                    .iter()
                    .map(Literal::from_value)
                    .collect::<Result<Vec<_>, _>>()?,
            });
        }

        match raw.type_ {
            Some(TypeSet::One(keyword)) if keyword == "object" => {
                let mut properties = IndexMap::new();
                for (name, prop) in raw.properties.unwrap_or_default() {
                    properties.insert(name, Schema::try_from(prop)?);
                }
                let additional_properties = match raw.additional_properties {
                    None | Some(RawAdditional::Bool(false)) => AdditionalProperties::None,
                    Some(RawAdditional::Bool(true)) => AdditionalProperties::Any,
                    Some(RawAdditional::Schema(inner)) => {
                        AdditionalProperties::Schema(Box::new(Schema::try_from(*inner)?))
                    }
                };
                Ok(Schema::Object {
                    properties,
                    additional_properties,
                    min_properties: raw.min_properties,
                    max_properties: raw.max_properties,
                    defs: convert_defs(raw.defs)?,
                })
            }
            Some(TypeSet::One(keyword)) if keyword == "array" => Ok(Schema::Array {
                items: match raw.items {
                    None => None,
                    Some(inner) => Some(Box::new(Schema::try_from(*inner)?)),
                },
                prefix_items: raw
                    .prefix_items
                    .unwrap_or_default()
                    .into_iter()
                    .map(Schema::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
                min_items: raw.min_items,
                max_items: raw.max_items,
                defs: convert_defs(raw.defs)?,
            }),
            Some(TypeSet::One(keyword)) if keyword == "string" => match raw.format {
                Some(format) => Ok(Schema::Format {
                    format: StringFormat::from_keyword(&format)
                        .ok_or(SchemaError::UnknownFormat(format))?,
                }),
                None => Ok(Schema::String {
                    min_length: raw.min_length,
                    max_length: raw.max_length,
                }),
            },
            Some(type_set) => {
                let keywords: Vec<String> = match type_set {
                    TypeSet::One(keyword) => vec![keyword],
                    TypeSet::Many(keywords) => keywords,
                };
                let types: Vec<ImmutableType> = keywords
                    .iter()
                    .filter_map(|k| ImmutableType::from_keyword(k))
                    .collect();
                Ok(Schema::Basic { types })
            }
            None => Ok(Schema::Basic { types: Vec::new() }),
        }
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawSchema::deserialize(deserializer)?;
        Schema::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl Schema {
    /// Classify an already-deserialized schema document.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_value(value.clone())?;
        Schema::try_from(raw)
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, Schema::Basic { .. })
    }
    pub fn is_const(&self) -> bool {
        matches!(self, Schema::Const { .. })
    }
    pub fn is_enum(&self) -> bool {
        matches!(self, Schema::Enum { .. })
    }
    pub fn is_one_of(&self) -> bool {
        matches!(self, Schema::OneOf { .. })
    }
    pub fn is_object(&self) -> bool {
        matches!(self, Schema::Object { .. })
    }
    pub fn is_array(&self) -> bool {
        matches!(self, Schema::Array { .. })
    }
    pub fn is_string(&self) -> bool {
        matches!(self, Schema::String { .. })
    }
    pub fn is_format(&self) -> bool {
        matches!(self, Schema::Format { .. })
    }
    pub fn is_ref(&self) -> bool {
        matches!(self, Schema::Ref { .. })
    }

    /// The node's locally declared `$defs`, if the variant carries any.
    pub fn local_defs(&self) -> Option<&Defs> {
        match self {
            Schema::OneOf { defs, .. }
            | Schema::Object { defs, .. }
            | Schema::Array { defs, .. }
            | Schema::Ref { defs, .. } => Some(defs),
            Schema::Basic { .. }
            | Schema::Const { .. }
            | Schema::Enum { .. }
            | Schema::String { .. }
            | Schema::Format { .. } => None,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Schema {
        Schema::from_value(&v).expect("schema should classify")
    }

    #[test]
    fn ref_wins_over_other_discriminants() {
        let s = parse(json!({"$ref": "#/$defs/node", "oneOf": [], "type": "object"}));
        assert!(s.is_ref());
    }

    #[test]
    fn const_null_is_a_null_literal_not_absent() {
        let s = parse(json!({"const": null}));
        assert_eq!(s, Schema::Const { value: Literal::Null });
    }

    #[test]
    fn enum_of_scalars_preserves_order() {
        let s = parse(json!({"enum": [1, "a", true, null]}));
        assert_eq!(
            s,
            Schema::Enum {
                values: vec![
                    Literal::Int(1),
                    Literal::Str("a".into()),
                    Literal::Bool(true),
                    Literal::Null,
                ]
            }
        );
    }

    #[test]
    fn non_scalar_const_is_rejected() {
        let err = Schema::from_value(&json!({"const": {"a": 1}})).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedLiteral(_)));
    }

    #[test]
    fn object_properties_keep_declaration_order() {
        let s = parse(json!({
            "type": "object",
            "properties": {"z": {"type": "string"}, "a": {"type": "integer"}}
        }));
        let Schema::Object { properties, additional_properties, .. } = s else {
            panic!("expected object schema");
        };
        let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a"]);
        assert_eq!(additional_properties, AdditionalProperties::None);
    }

    #[test]
    fn additional_properties_variants() {
        let any = parse(json!({"type": "object", "additionalProperties": true}));
        let Schema::Object { additional_properties, .. } = any else { panic!() };
        assert_eq!(additional_properties, AdditionalProperties::Any);

        let typed = parse(json!({
            "type": "object",
            "additionalProperties": {"type": "number"}
        }));
        let Schema::Object { additional_properties, .. } = typed else { panic!() };
        assert!(matches!(additional_properties, AdditionalProperties::Schema(_)));
    }

    #[test]
    fn string_with_format_classifies_as_format() {
        let s = parse(json!({"type": "string", "format": "date-time"}));
        assert_eq!(s, Schema::Format { format: StringFormat::DateTime });
    }

    #[test]
    fn unknown_format_is_a_classification_error() {
        let err = Schema::from_value(&json!({"type": "string", "format": "uuid"})).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownFormat(f) if f == "uuid"));
    }

    #[test]
    fn type_set_filters_unknown_keywords() {
        let s = parse(json!({"type": ["string", "widget", "null"]}));
        assert_eq!(
            s,
            Schema::Basic { types: vec![ImmutableType::String, ImmutableType::Null] }
        );
    }

    #[test]
    fn empty_node_falls_back_to_empty_basic() {
        let s = parse(json!({}));
        assert_eq!(s, Schema::Basic { types: Vec::new() });
    }

    #[test]
    fn literal_numeric_equality_is_js_style() {
        assert!(Literal::Int(2).matches(&json!(2.0)));
        assert!(Literal::Float(OrderedFloat(2.0)).matches(&json!(2)));
        assert!(!Literal::Int(2).matches(&json!("2")));
    }

    #[test]
    fn defs_are_carried_on_ref_and_object_nodes() {
        let s = parse(json!({
            "$ref": "#/$defs/node",
            "$defs": {"node": {"type": "string"}}
        }));
        let defs = s.local_defs().expect("ref carries defs");
        assert!(defs.get("node").is_some_and(Schema::is_string));
    }
}

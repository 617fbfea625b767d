//! Grammar terminals: pure descriptions produced by lowering and consumed
//! once by codegen. No mutable state, no emission logic here.

use crate::schema::{Literal, StringFormat};
use crate::scope::ScopeState;

/// A compiled fragment: either a leaf matching a literal/primitive, or a
/// composite referencing child terminals.
#[derive(Debug, Clone)]
pub enum Terminal {
    /// The literal `null`.
    Null,
    /// `true` or `false`.
    Boolean,
    /// A JSON number; `allow_fractional: false` restricts to integers.
    Number { allow_fractional: bool },
    /// A JSON string, optionally length-bounded (in characters).
    String { min_len: u32, max_len: Option<u32> },
    /// A string matching a named format's sub-grammar.
    Format(StringFormat),
    /// Exactly one scalar value, encoded per JSON literal syntax.
    LiteralValue(Literal),
    /// Ordered alternatives. A singleton degenerates to its inner terminal
    /// at emission time; an empty list matches nothing.
    Or(Vec<Terminal>),
    /// Tuple prefix followed by a uniformly-typed tail.
    Array {
        prefix: Vec<Terminal>,
        /// Terminal for every element past the prefix.
        item: Box<Terminal>,
        min_items: u32,
        max_items: Option<u32>,
        scope: ScopeState,
    },
    /// Ordered declared fields (all required) plus an optional policy for
    /// extra keys.
    ObjectMap {
        fields: Vec<ObjectField>,
        /// `None` forbids unlisted keys; `Some` gives their value terminal.
        additional: Option<Box<Terminal>>,
        min_props: u32,
        max_props: Option<u32>,
        scope: ScopeState,
    },
    /// Wildcard: any JSON value.
    AnyJson { scope: ScopeState },
    /// Reference to a named rule (a compiled `$defs` entry).
    RuleRef(String),
}

#[derive(Debug, Clone)]
pub struct ObjectField {
    pub key: String,
    pub value: Terminal,
}

impl Terminal {
    /// Collapse a list of alternatives the way the emitter will: zero arms
    /// stay an empty `Or`, a single arm is returned as-is.
    pub fn or_of(mut arms: Vec<Terminal>) -> Terminal {
        if arms.len() == 1 {
            arms.remove(0)
        } else {
            Terminal::Or(arms)
        }
    }
}

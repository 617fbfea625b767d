//! Compile JSON schema documents into GBNF grammars for constrained text
//! generation, and validate JSON documents against the same schemas.
//!
//! Design goals:
//! - Generation-oriented semantics: declared object properties are required
//!   and emitted in declaration order; unlisted keys are forbidden unless the
//!   schema opts in via `additionalProperties`.
//! - One schema meaning, two consumers: the grammar compiler and the
//!   structural validator share the schema model and dispatch order, so a
//!   document the validator accepts is one the grammar can produce.
//! - Fail open on bad references, fail loud on runaway recursion: an
//!   unresolvable `$ref` degrades to an any-JSON wildcard with a warning; a
//!   cyclic reference graph that never terminates is a hard error.
//!
//! Pipeline: classify ([`schema`]) → lower ([`lower`]) → emit ([`codegen`]).

pub mod schema;
pub mod scope;
pub mod defs;
pub mod terminal;
pub mod lower;
pub mod codegen;
pub mod validate;
pub mod cli;

pub use codegen::{compile_grammar, CompiledGrammar, GrammarOptions};
pub use lower::{CompileError, CompileWarning};
pub use schema::{Schema, SchemaError};
pub use validate::{validate, ValidationError};

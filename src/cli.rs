//! CLI: schema → (grammar | check)
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::codegen::{compile_grammar, GrammarOptions};
use crate::schema::Schema;
use crate::validate::validate;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile a JSON schema document into a GBNF grammar, or check JSON
/// documents against it
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// compile the schema and print the GBNF grammar text
    Grammar(GrammarOut),
    /// validate JSON documents against the schema
    Check(CheckRun),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// path to the schema document (JSON)
    #[arg(long, short)]
    schema: PathBuf,
}

#[derive(clap::Parser, Debug)]
struct GrammarOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// output .gbnf file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// forbid newline-indented output in the generated grammar
    #[arg(long, default_value_t = false)]
    no_new_lines: bool,

    /// spaces per indentation level in newline-indented output
    #[arg(long, default_value_t = 4)]
    pad: u32,
}

#[derive(clap::Parser, Debug)]
struct CheckRun {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// One or more documents. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn load(&self) -> Result<Schema> {
        let path_str = self.schema.to_string_lossy().to_string();
        let source = std::fs::read_to_string(&self.schema)
            .with_context(|| format!("failed to read schema file {path_str}"))?;
        parse_schema(&source)
            .with_context(|| format!("failed to parse schema file {path_str}"))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.cmd {
            Command::Grammar(target) => {
                let schema = target.schema_settings.load()?;
                let grammar = compile_grammar(
                    &schema,
                    GrammarOptions {
                        allow_new_lines: !target.no_new_lines,
                        scope_pad_spaces: target.pad,
                    },
                )?;
                let grammar_src = format!("{}\n", grammar.to_gbnf());
                if let Some(out) = target.out.as_ref() {
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("failed to create output directory {}", parent.display())
                        })?;
                    }
                    std::fs::write(out, &grammar_src).with_context(|| {
                        format!("failed to write grammar to {}", out.display())
                    })?;
                } else {
                    println!("{grammar_src}");
                }
                Ok(())
            }
            Command::Check(target) => {
                let schema = target.schema_settings.load()?;
                let source_paths = resolve_file_path_patterns(&target.input)
                    .map_err(|error| anyhow::anyhow!("{error}"))?;
                let mut failures = 0usize;
                for source_path in &source_paths {
                    let source_path_str = source_path.to_string_lossy().to_string();
                    match check_file(source_path, &schema) {
                        Ok(()) => {
                            println!("{} {source_path_str}", "ok".green());
                        }
                        Err(error) => {
                            failures += 1;
                            println!("{} {source_path_str}: {error:#}", "FAIL".red().bold());
                        }
                    }
                }
                if failures > 0 {
                    anyhow::bail!(
                        "{failures} of {} documents failed validation",
                        source_paths.len()
                    );
                }
                Ok(())
            }
        }
    }
}

fn check_file(path: &PathBuf, schema: &Schema) -> Result<()> {
    let source = std::fs::read_to_string(path).context("failed to read document")?;
    let value = serde_json::from_str::<serde_json::Value>(&source)
        .context("failed to parse document as JSON")?;
    validate(&value, schema)?;
    Ok(())
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

/// Deserialize the schema with JSON-path context in error messages.
fn parse_schema(src: &str) -> Result<Schema> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, Schema>(de).map_err(|err| {
        let path = err.path().to_string();
        anyhow::anyhow!("at JSON path {path} → {}", err.into_inner())
    })
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                match entry {
                    Ok(p) => {
                        matched_any = true;
                        out.push(p);
                    }
                    Err(e) => return Err(Box::new(e)),
                }
            }
            if !matched_any {
                // Pattern was explicitly a glob but matched nothing -> surface as an error
                return Err(format!("glob pattern matched no files: {pattern}").into());
            }
        } else {
            // Treat as a literal path
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}

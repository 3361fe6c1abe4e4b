//! Placeholder rendering for toolchain commands and the combined build source.
//!
//! Templates use minijinja syntax (`{{ header }}`) with strict undefined
//! handling, so a misspelled placeholder fails loudly instead of rendering
//! as an empty argument.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, context};

/// Default combined build source: includes both headers and runs the
/// interpreter over the parse of `argv[1]`.
pub const DEFAULT_BUILD_SOURCE: &str = include_str!("templates/main.cpp.j2");

/// Values substituted into command arguments.
pub type CommandVars = BTreeMap<&'static str, String>;

fn engine() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

/// Render every argument of `template` against `vars`.
pub fn render_command(template: &[String], vars: &CommandVars) -> Result<Vec<String>> {
    let env = engine();
    template
        .iter()
        .map(|arg| {
            env.render_str(arg, vars)
                .with_context(|| format!("render command argument '{arg}'"))
        })
        .collect()
}

/// Render the combined build source with the staged header names.
pub fn render_build_source(
    template: &str,
    parser_header: &str,
    interpreter_header: &str,
) -> Result<String> {
    engine()
        .render_str(
            template,
            context! {
                parser_header => parser_header,
                interpreter_header => interpreter_header,
            },
        )
        .context("render build source template")
}

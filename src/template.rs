// src/template.rs

//! Rendering command templates into the literal strings handed to an
//! executor.
//!
//! Shell templates are interpolated as-is. Argument lists are interpolated
//! per argument and quoted with `shell-escape`, so a value like
//! `/srv/my app; rm -rf /` reaches the remote side as one literal word.
//! Environment exports are prepended as `export KEY="value" && ...`; the
//! values are double-quoted, so `$PATH` still expands on the remote shell.

use std::borrow::Cow;
use std::collections::BTreeMap;

use shell_escape::unix::escape;

use crate::config::CommandSpec;
use crate::errors::{DeployError, Result};
use crate::vars::VariableMap;

/// Render a single command template with the given env exports.
pub fn render_command(
    spec: &CommandSpec,
    env: &BTreeMap<String, String>,
    vars: &VariableMap,
) -> Result<String> {
    let body = match spec {
        CommandSpec::Shell(line) => vars.interpolate(line)?,
        CommandSpec::Args(args) => render_args(args, vars)?,
    };

    if env.is_empty() {
        return Ok(body);
    }

    let exports = render_env(env, vars)?;
    Ok(format!("export {exports} && {body}"))
}

fn render_args(args: &[String], vars: &VariableMap) -> Result<String> {
    if args.is_empty() {
        return Err(DeployError::ConfigError(
            "command argument list must not be empty".to_string(),
        ));
    }

    let mut words = Vec::with_capacity(args.len());
    for arg in args {
        let value = vars.interpolate(arg)?;
        words.push(escape(Cow::Owned(value)).into_owned());
    }
    Ok(words.join(" "))
}

fn render_env(env: &BTreeMap<String, String>, vars: &VariableMap) -> Result<String> {
    let mut pairs = Vec::with_capacity(env.len());
    for (key, value) in env {
        let value = vars.interpolate(value)?;
        pairs.push(format!("{key}=\"{}\"", double_quote_escape(&value)));
    }
    Ok(pairs.join(" "))
}

/// Escape for use inside double quotes, leaving `$` alone.
fn double_quote_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Whether `key` is usable as a shell variable name.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

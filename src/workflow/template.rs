//! `{{path.to.field}}` placeholder resolution against a run context.
//!
//! Resolution is a single left-to-right pass: every placeholder is replaced
//! independently and resolved values are never re-scanned, so a value that
//! itself contains `{{...}}` is emitted verbatim.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::common::Vars;

/// Format: `{{path}}`, surrounding whitespace inside the braces is ignored
const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([^{}]+?)\s*\}\}";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"));

/// Text with all placeholders substituted, plus one warning per unresolved path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Looks up a dot-separated path in the context.
pub fn lookup<'a>(
    ctx: &'a Vars,
    path: &str,
) -> Option<&'a Value> {
    ctx.lookup(path.trim())
}

/// Renders a context value as placeholder text. Nested values become JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        v => v.to_string(),
    }
}

pub fn resolve(
    text: &str,
    ctx: &Vars,
) -> Resolved {
    let mut warnings = Vec::new();
    let resolved = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let path = &caps[1];
        match lookup(ctx, path) {
            Some(value) => render_value(value),
            None => {
                warnings.push(format!("unresolved placeholder '{{{{{}}}}}'", path));
                String::new()
            }
        }
    });

    Resolved {
        text: resolved.into_owned(),
        warnings,
    }
}

/// Resolves several fields, collecting their warnings into `warnings`.
pub fn resolve_into(
    text: &str,
    ctx: &Vars,
    warnings: &mut Vec<String>,
) -> String {
    let resolved = resolve(text, ctx);
    warnings.extend(resolved.warnings);
    resolved.text
}

//! `{{name}}` placeholder substitution for step requests

use super::catalog::StepAction;
use crate::network::NetworkRequest;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Flow variables, ordered for stable snapshots
pub type Variables = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex should compile")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("name regex should compile"));

/// Everything but RFC 3986 unreserved characters
const PATH_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Missing variable: {0}")]
    MissingVariable(String),
    #[error("Variable {0} cannot be used as a path segment")]
    UnsafePathValue(String),
    #[error("Rendered body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// How substituted values are written into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Values are escaped for use inside a JSON string literal
    Json,
    /// Values are percent-encoded so they stay inside one path segment or query value
    Path,
}

/// Whether `name` can appear inside a `{{...}}` placeholder
pub fn is_valid_name(name: &str) -> bool {
    NAME.is_match(name)
}

/// Substitute every placeholder, failing on the first unknown name
pub fn render(template: &str, variables: &Variables, escape: Escape) -> Result<String, TemplateError> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .find(|name| !variables.contains_key(name))
    {
        return Err(TemplateError::MissingVariable(missing));
    }

    if escape == Escape::Path {
        // "." and ".." survive encoding and would be resolved as dot segments
        if let Some(name) = PLACEHOLDER
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .find(|name| matches!(variables.get(name).map(String::as_str), Some("." | "..")))
        {
            return Err(TemplateError::UnsafePathValue(name));
        }
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let value = variables.get(&caps[1]).map_or("", String::as_str);
        match escape {
            Escape::Json => escape_json(value),
            Escape::Path => utf8_percent_encode(value, PATH_VALUE).to_string(),
        }
    });
    Ok(rendered.into_owned())
}

/// Substitute known placeholders and leave unknown ones untouched
pub fn render_lenient(template: &str, variables: &Variables) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Build the outbound request for an action step
pub fn render_action(action: &StepAction, variables: &Variables) -> Result<NetworkRequest, TemplateError> {
    let path = render(&action.path, variables, Escape::Path)?;
    let mut request = NetworkRequest::new(action.method, path);

    if let Some(template) = &action.body {
        let text = render(template, variables, Escape::Json)?;
        let body: Value =
            serde_json::from_str(&text).map_err(|e| TemplateError::InvalidJson(e.to_string()))?;
        request = request.with_body(body);
    }

    Ok(request)
}

/// Copy captured response fields into `variables`
///
/// Strings are stored verbatim, other scalars and objects as their JSON
/// text. Missing pointers and `null` values are skipped.
pub fn apply_captures(action: &StepAction, response: &Value, variables: &mut Variables) -> usize {
    let mut applied = 0;
    for capture in &action.captures {
        let value = match response.pointer(&capture.pointer) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        variables.insert(capture.variable.clone(), value);
        applied += 1;
    }
    applied
}

fn escape_json(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map_or_else(String::new, str::to_string)
}

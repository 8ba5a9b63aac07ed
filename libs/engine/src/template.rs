//! Template engine
//!
//! Resolves `{{ … }}` expressions against a pipeline context. The data
//! model exposes four roots: bare paths (trigger data merged with the
//! current payload, current winning), `steps.<name>.<field>`,
//! `meta.<field>`, and `trigger.<field>`. Expressions are a path or
//! generator followed by piped operations:
//!
//! ```text
//! {{ steps.fetch.url | trimPrefix "https://" | default "unknown" }}
//! {{ uuid }}
//! {{ now "%Y-%m-%d" }}
//! ```
//!
//! Missing keys resolve to the zero value rather than failing. A string
//! that is exactly one expression keeps the resolved value's type;
//! embedded expressions stringify.

use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::context::PipelineContext;

static EXPR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("constant regex pattern is valid"));

/// Template resolution error
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The expression is malformed
    #[error("template parse error: {0}")]
    Parse(String),

    /// The expression is well formed but cannot be rendered
    #[error("template render error: {0}")]
    Render(String),
}

// =============================================================================
// Public API
// =============================================================================

/// Resolve a template string to a value.
///
/// Strings without a `{{` marker are returned unchanged. A string that
/// is exactly one expression returns the resolved value itself, so
/// non-string results survive; otherwise each expression is replaced by
/// its string form.
pub fn resolve(input: &str, pc: &PipelineContext) -> Result<Value, TemplateError> {
    if !input.contains("{{") {
        return Ok(Value::String(input.to_string()));
    }

    let trimmed = input.trim();
    if let Some(caps) = EXPR_PATTERN.captures(trimmed) {
        if caps.get(0).map(|m| (m.start(), m.end())) == Some((0, trimmed.len())) {
            let expr = parse_expression(&caps[1])?;
            return evaluate(&expr, pc);
        }
    }

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in EXPR_PATTERN.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        result.push_str(&input[last..whole.start()]);
        let expr = parse_expression(&caps[1])?;
        result.push_str(&stringify(&evaluate(&expr, pc)?));
        last = whole.end();
    }
    result.push_str(&input[last..]);

    if result.contains("{{") {
        return Err(TemplateError::Parse(
            "unterminated template expression".to_string(),
        ));
    }

    Ok(Value::String(result))
}

/// Resolve a template string to its string form
pub fn resolve_string(input: &str, pc: &PipelineContext) -> Result<String, TemplateError> {
    Ok(stringify(&resolve(input, pc)?))
}

/// Deep-resolve a value: string leaves are rendered, everything else is
/// returned unchanged. The input is never mutated.
pub fn resolve_value(value: &Value, pc: &PipelineContext) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve(s, pc),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, pc))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, pc).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Deep-resolve every string leaf of a map. Non-mutating.
pub fn resolve_map(
    map: &Map<String, Value>,
    pc: &PipelineContext,
) -> Result<Map<String, Value>, TemplateError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, pc)?)))
        .collect()
}

// =============================================================================
// Expression Grammar
// =============================================================================

#[derive(Debug)]
enum Source {
    /// Dotted path; empty means the whole top-level merge
    Path(Vec<String>),
    /// Fresh v4 UUID string
    Uuid,
    /// Current time, formatted with the given layout or RFC3339
    Now(Option<String>),
}

#[derive(Debug)]
enum Op {
    Default(Value),
    TrimPrefix(String),
    TrimSuffix(String),
}

#[derive(Debug)]
struct Expression {
    source: Source,
    ops: Vec<Op>,
}

fn parse_expression(raw: &str) -> Result<Expression, TemplateError> {
    let segments = split_pipes(raw)?;
    let mut iter = segments.into_iter();
    let head = iter
        .next()
        .filter(|tokens| !tokens.is_empty())
        .ok_or_else(|| TemplateError::Parse(format!("empty expression in '{{{{{raw}}}}}'")))?;

    let source = parse_source(&head)?;

    let mut ops = Vec::new();
    for segment in iter {
        ops.push(parse_op(&segment)?);
    }

    Ok(Expression { source, ops })
}

fn parse_source(tokens: &[Token]) -> Result<Source, TemplateError> {
    match tokens {
        [Token::Word(w)] if w == "uuid" => Ok(Source::Uuid),
        [Token::Word(w)] if w == "now" => Ok(Source::Now(None)),
        [Token::Word(w), Token::Quoted(layout)] if w == "now" => {
            Ok(Source::Now(Some(layout.clone())))
        }
        [Token::Word(path)] => {
            let trimmed = path.strip_prefix('.').unwrap_or(path);
            if trimmed.is_empty() {
                return Ok(Source::Path(Vec::new()));
            }
            Ok(Source::Path(
                trimmed.split('.').map(str::to_string).collect(),
            ))
        }
        _ => Err(TemplateError::Parse(format!(
            "expected a path or generator, got '{}'",
            render_tokens(tokens)
        ))),
    }
}

fn parse_op(tokens: &[Token]) -> Result<Op, TemplateError> {
    match tokens {
        [Token::Word(name), arg] if name == "default" => Ok(Op::Default(arg.as_value())),
        [Token::Word(name), Token::Quoted(arg)] if name == "trimPrefix" => {
            Ok(Op::TrimPrefix(arg.clone()))
        }
        [Token::Word(name), Token::Quoted(arg)] if name == "trimSuffix" => {
            Ok(Op::TrimSuffix(arg.clone()))
        }
        [Token::Word(name), ..] => Err(TemplateError::Parse(format!(
            "unknown or malformed operation '{name}'"
        ))),
        _ => Err(TemplateError::Parse("empty pipe segment".to_string())),
    }
}

#[derive(Debug)]
enum Token {
    Word(String),
    Quoted(String),
}

impl Token {
    fn as_value(&self) -> Value {
        match self {
            Self::Quoted(s) => Value::String(s.clone()),
            Self::Word(w) => serde_json::from_str(w).unwrap_or(Value::String(w.clone())),
        }
    }
}

fn render_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => format!("\"{q}\""),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split an expression on `|`, tokenizing words and quoted strings
fn split_pipes(raw: &str) -> Result<Vec<Vec<Token>>, TemplateError> {
    let mut segments = vec![Vec::new()];
    let mut word = String::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => quoted.push(c),
                        None => {
                            return Err(TemplateError::Parse(format!(
                                "unterminated string in '{raw}'"
                            )))
                        }
                    }
                }
                segments
                    .last_mut()
                    .expect("segments never empty")
                    .push(Token::Quoted(quoted));
            }
            '|' => {
                flush_word(&mut word, &mut segments);
                segments.push(Vec::new());
            }
            c if c.is_whitespace() => flush_word(&mut word, &mut segments),
            c => word.push(c),
        }
    }
    flush_word(&mut word, &mut segments);

    Ok(segments)
}

fn flush_word(word: &mut String, segments: &mut [Vec<Token>]) {
    if !word.is_empty() {
        segments
            .last_mut()
            .expect("segments never empty")
            .push(Token::Word(std::mem::take(word)));
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn evaluate(expr: &Expression, pc: &PipelineContext) -> Result<Value, TemplateError> {
    let mut value = match &expr.source {
        Source::Uuid => Value::String(Uuid::new_v4().to_string()),
        Source::Now(layout) => Value::String(format_now(layout.as_deref())?),
        Source::Path(segments) if segments.is_empty() => {
            let mut merged = pc.trigger_data.clone();
            for (key, val) in &pc.current {
                merged.insert(key.clone(), val.clone());
            }
            Value::Object(merged)
        }
        Source::Path(segments) => {
            let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
            pc.lookup(&refs).cloned().unwrap_or(Value::Null)
        }
    };

    for op in &expr.ops {
        value = match op {
            Op::Default(fallback) => {
                if is_zero(&value) {
                    fallback.clone()
                } else {
                    value
                }
            }
            Op::TrimPrefix(prefix) => {
                let s = stringify(&value);
                Value::String(s.strip_prefix(prefix.as_str()).unwrap_or(&s).to_string())
            }
            Op::TrimSuffix(suffix) => {
                let s = stringify(&value);
                Value::String(s.strip_suffix(suffix.as_str()).unwrap_or(&s).to_string())
            }
        };
    }

    Ok(value)
}

fn format_now(layout: Option<&str>) -> Result<String, TemplateError> {
    match layout {
        None => Ok(Utc::now().to_rfc3339()),
        Some(layout) => {
            if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
                return Err(TemplateError::Render(format!(
                    "invalid time layout '{layout}'"
                )));
            }
            Ok(Utc::now().format(layout).to_string())
        }
    }
}

/// Zero-ness used by `default`
fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// String form of a resolved value for embedded expressions
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PipelineContext {
        let trigger = match serde_json::json!({"id": "t-9", "kind": "event"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut pc = PipelineContext::new(trigger);
        pc.record_step_output(
            "fetch",
            match serde_json::json!({"url": "https://example.com/x", "count": 3}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
        );
        pc.set_meta("pipeline", Value::String("intake".to_string()));
        pc
    }

    #[test]
    fn test_no_marker_round_trip() {
        let pc = context();
        let input = "plain text with } braces";
        assert_eq!(resolve(input, &pc).unwrap(), Value::String(input.into()));
    }

    #[test]
    fn test_path_roots() {
        let pc = context();
        assert_eq!(
            resolve_string("{{ steps.fetch.url }}", &pc).unwrap(),
            "https://example.com/x"
        );
        assert_eq!(resolve_string("{{ meta.pipeline }}", &pc).unwrap(), "intake");
        assert_eq!(resolve_string("{{ trigger.id }}", &pc).unwrap(), "t-9");
        assert_eq!(resolve_string("{{ id }}", &pc).unwrap(), "t-9");
        assert_eq!(resolve_string("{{ .id }}", &pc).unwrap(), "t-9");
    }

    #[test]
    fn test_whole_expression_keeps_type() {
        let pc = context();
        assert_eq!(
            resolve("{{ steps.fetch.count }}", &pc).unwrap(),
            Value::from(3)
        );
        // Embedded occurrences stringify
        assert_eq!(
            resolve_string("count={{ steps.fetch.count }}!", &pc).unwrap(),
            "count=3!"
        );
    }

    #[test]
    fn test_missing_is_zero_value() {
        let pc = context();
        assert_eq!(resolve("{{ steps.nope.url }}", &pc).unwrap(), Value::Null);
        assert_eq!(resolve_string("[{{ nope }}]", &pc).unwrap(), "[]");
    }

    #[test]
    fn test_default_op() {
        let pc = context();
        assert_eq!(
            resolve_string("{{ nope | default \"fallback\" }}", &pc).unwrap(),
            "fallback"
        );
        assert_eq!(
            resolve_string("{{ id | default \"fallback\" }}", &pc).unwrap(),
            "t-9"
        );
    }

    #[test]
    fn test_trim_ops() {
        let pc = context();
        assert_eq!(
            resolve_string("{{ steps.fetch.url | trimPrefix \"https://\" }}", &pc).unwrap(),
            "example.com/x"
        );
        assert_eq!(
            resolve_string("{{ steps.fetch.url | trimSuffix \"/x\" }}", &pc).unwrap(),
            "https://example.com"
        );
        // Absent prefix leaves the value unchanged
        assert_eq!(
            resolve_string("{{ id | trimPrefix \"zzz\" }}", &pc).unwrap(),
            "t-9"
        );
    }

    #[test]
    fn test_generators() {
        let pc = context();
        let id = resolve_string("{{ uuid }}", &pc).unwrap();
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());

        let day = resolve_string("{{ now \"%Y-%m-%d\" }}", &pc).unwrap();
        assert_eq!(day.len(), 10);

        let rfc = resolve_string("{{ now }}", &pc).unwrap();
        assert!(rfc.contains('T'));
    }

    #[test]
    fn test_parse_and_render_errors() {
        let pc = context();
        assert!(matches!(
            resolve("{{ id | shout }}", &pc),
            Err(TemplateError::Parse(_))
        ));
        assert!(matches!(
            resolve("{{ id | default \"x }}", &pc),
            Err(TemplateError::Parse(_))
        ));
        assert!(matches!(
            resolve("{{ now \"%Q\" }}", &pc),
            Err(TemplateError::Render(_))
        ));
    }

    #[test]
    fn test_resolve_map_non_mutating() {
        let pc = context();
        let input = match serde_json::json!({
            "url": "{{ steps.fetch.url }}",
            "count": 3,
            "nested": {"who": "{{ trigger.id }}", "flag": true},
            "list": ["{{ meta.pipeline }}", 1]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let before = input.clone();

        let resolved = resolve_map(&input, &pc).unwrap();
        assert_eq!(input, before);
        assert_eq!(resolved["url"], "https://example.com/x");
        assert_eq!(resolved["count"], 3);
        assert_eq!(resolved["nested"]["who"], "t-9");
        assert_eq!(resolved["nested"]["flag"], true);
        assert_eq!(resolved["list"][0], "intake");
        assert_eq!(resolved["list"][1], 1);
    }
}

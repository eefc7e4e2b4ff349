/// Template expression parsing and resolution
///
/// Config strings may embed `{{Label.path.to.field}}` expressions that read the
/// last known output of another node. Resolution is a pure pass over an
/// immutable lookup: it never touches the output cache or the raw config, so it
/// is safe to run repeatedly for live previews.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Range;

/// One step of a reference path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed `{{Label.path}}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub label: String,
    pub path: Vec<PathSegment>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)?;
        for segment in &self.path {
            match segment {
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Why an expression could not be substituted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UnresolvedReason {
    /// No node carries this label (e.g. it was deleted)
    UnknownLabel,
    /// The node exists but has no successful output yet
    NoOutput,
    /// The output exists but the path walks off it
    MissingPath { segment: String },
    /// The expression text is not a valid reference
    Malformed,
}

/// An expression that resolved to the empty string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    /// JSON pointer of the config field containing the expression
    pub field: String,
    /// Expression text between the braces
    pub expression: String,
    pub reason: UnresolvedReason,
}

/// Result of resolving a raw config
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub config: Value,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Outcome of looking a label up in the output view
#[derive(Debug, Clone, Copy)]
pub enum LabelLookup<'a> {
    Output(&'a Value),
    NoOutput,
    UnknownLabel,
}

/// Read-only view from labels to their last usable output
pub trait OutputLookup {
    fn lookup(&self, label: &str) -> LabelLookup<'_>;
}

impl OutputLookup for HashMap<String, Value> {
    fn lookup(&self, label: &str) -> LabelLookup<'_> {
        match self.get(label) {
            Some(value) => LabelLookup::Output(value),
            None => LabelLookup::UnknownLabel,
        }
    }
}

/// Location of one `{{ ... }}` occurrence within a string
struct Span<'a> {
    range: Range<usize>,
    inner: &'a str,
}

/// Find every `{{ ... }}` occurrence, left to right
///
/// Blank expressions (`{{ }}`) are left as literal text.
fn scan(text: &str) -> Vec<Span<'_>> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(open) = text[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = text[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let inner = text[start + 2..end - 2].trim();
        if !inner.is_empty() {
            spans.push(Span {
                range: start..end,
                inner,
            });
        }
        cursor = end;
    }

    spans
}

/// Parse the text between braces into a label and path
///
/// Accepts `Label`, `Label.a.b`, `Label.items[0].id` and `Label.items.0.id`.
pub fn parse_reference(expression: &str) -> Option<Reference> {
    let expression = expression.trim();
    let label_end = expression.find(['.', '[']).unwrap_or(expression.len());
    let label = expression[..label_end].trim();
    if label.is_empty() {
        return None;
    }

    let mut path = Vec::new();
    let mut rest = &expression[label_end..];
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            let key = &after_dot[..end];
            if key.is_empty() {
                return None;
            }
            path.push(PathSegment::Key(key.to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket.find(']')?;
            let index = after_bracket[..close].trim().parse::<usize>().ok()?;
            path.push(PathSegment::Index(index));
            rest = &after_bracket[close + 1..];
        } else {
            return None;
        }
    }

    Some(Reference {
        label: label.to_string(),
        path,
    })
}

/// Walk a path through an output value
///
/// Numeric keys index into arrays so `items.0` and `items[0]` are equivalent.
fn walk<'a>(root: &'a Value, path: &[PathSegment]) -> Result<&'a Value, String> {
    let mut current = root;
    for segment in path {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        current = next.ok_or_else(|| match segment {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => format!("[{}]", index),
        })?;
    }
    Ok(current)
}

/// Textual form used when a value is embedded in surrounding text
///
/// Strings are inserted verbatim, null becomes empty, everything else is
/// compact JSON (object keys sorted, so the output is deterministic).
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Resolve every expression inside a raw config
///
/// Unresolvable expressions become empty strings and are listed in
/// `unresolved`. When an expression is the whole string value, the referenced
/// value keeps its JSON type.
pub fn resolve(raw: &Value, scope: &impl OutputLookup) -> Resolution {
    let mut unresolved = Vec::new();
    let config = resolve_value(raw, "", scope, &mut unresolved);
    Resolution { config, unresolved }
}

fn resolve_value(
    value: &Value,
    pointer: &str,
    scope: &impl OutputLookup,
    unresolved: &mut Vec<UnresolvedReference>,
) -> Value {
    match value {
        Value::String(text) => resolve_string(text, pointer, scope, unresolved),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| resolve_value(item, &format!("{}/{}", pointer, i), scope, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    let child = format!("{}/{}", pointer, escape_pointer(key));
                    (key.clone(), resolve_value(item, &child, scope, unresolved))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(
    text: &str,
    pointer: &str,
    scope: &impl OutputLookup,
    unresolved: &mut Vec<UnresolvedReference>,
) -> Value {
    let spans = scan(text);
    if spans.is_empty() {
        return Value::String(text.to_string());
    }

    let mut lookup = |inner: &str| -> Option<Value> {
        match lookup_expression(inner, scope) {
            Ok(value) => Some(value.clone()),
            Err(reason) => {
                unresolved.push(UnresolvedReference {
                    field: pointer.to_string(),
                    expression: inner.to_string(),
                    reason,
                });
                None
            }
        }
    };

    if spans.len() == 1 && spans[0].range == (0..text.len()) {
        return lookup(spans[0].inner).unwrap_or_else(|| Value::String(String::new()));
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in &spans {
        out.push_str(&text[cursor..span.range.start]);
        if let Some(value) = lookup(span.inner) {
            out.push_str(&to_text(&value));
        }
        cursor = span.range.end;
    }
    out.push_str(&text[cursor..]);
    Value::String(out)
}

fn lookup_expression<'a>(inner: &str, scope: &'a impl OutputLookup) -> Result<&'a Value, UnresolvedReason> {
    let reference = parse_reference(inner).ok_or(UnresolvedReason::Malformed)?;
    match scope.lookup(&reference.label) {
        LabelLookup::Output(output) => {
            walk(output, &reference.path).map_err(|segment| UnresolvedReason::MissingPath { segment })
        }
        LabelLookup::NoOutput => Err(UnresolvedReason::NoOutput),
        LabelLookup::UnknownLabel => Err(UnresolvedReason::UnknownLabel),
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Labels referenced anywhere inside a config
pub fn referenced_labels(raw: &Value) -> BTreeSet<String> {
    let mut labels = BTreeSet::new();
    collect_labels(raw, &mut labels);
    labels
}

fn collect_labels(value: &Value, labels: &mut BTreeSet<String>) {
    match value {
        Value::String(text) => {
            for span in scan(text) {
                if let Some(reference) = parse_reference(span.inner) {
                    labels.insert(reference.label);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_labels(item, labels)),
        Value::Object(map) => map.values().for_each(|item| collect_labels(item, labels)),
        _ => {}
    }
}

/// Rewrite references to `old_label` so they point at `new_label`
///
/// The referenced path is preserved verbatim. Returns the new config and the
/// number of expressions rewritten.
pub fn rewrite_label(raw: &Value, old_label: &str, new_label: &str) -> (Value, usize) {
    let mut rewritten = 0;
    let value = rewrite_value(raw, old_label, new_label, &mut rewritten);
    (value, rewritten)
}

fn rewrite_value(value: &Value, old_label: &str, new_label: &str, rewritten: &mut usize) -> Value {
    match value {
        Value::String(text) => Value::String(rewrite_string(text, old_label, new_label, rewritten)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rewrite_value(item, old_label, new_label, rewritten))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), rewrite_value(item, old_label, new_label, rewritten)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn rewrite_string(text: &str, old_label: &str, new_label: &str, rewritten: &mut usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in scan(text) {
        let Some(reference) = parse_reference(span.inner) else {
            continue;
        };
        if reference.label != old_label {
            continue;
        }
        let label_end = span.inner.find(['.', '[']).unwrap_or(span.inner.len());
        out.push_str(&text[cursor..span.range.start]);
        out.push_str("{{");
        out.push_str(new_label);
        out.push_str(&span.inner[label_end..]);
        out.push_str("}}");
        cursor = span.range.end;
        *rewritten += 1;
    }
    out.push_str(&text[cursor..]);
    out
}

//! Path resolution against the context stack.
//!
//! A path is an ordered list of segments. Resolution walks the stack frame
//! by frame, top first; the first frame that yields a value wins. Frames are
//! transparent to each other: there is no merging across frames.

use async_recursion::async_recursion;
use lazy_static::lazy_static;
use regex::Regex;

use crate::context::Frame;
use crate::engine::FireMacro;
use crate::error::MacroResult;
use crate::helpers;
use crate::value::{normalize, Resolved, Value};

lazy_static! {
    // ISO-8601 timestamps with fractional seconds, as many datasets carry
    // dates in string form.
    static ref ISO_TIMESTAMP: Regex = Regex::new(
        r"\d{4}-[01]\d-[0-3]\dT[0-2]\d:[0-5]\d:[0-5]\d\.\d+([+-][0-2]\d:[0-5]\d|Z)$"
    )
    .expect("iso timestamp pattern");
}

/// One path segment: literal text, or an already-resolved unit produced by a
/// nested macro expression.
#[derive(Debug, Clone)]
pub enum PathSeg {
    Text(String),
    Unit(Resolved),
}

impl PathSeg {
    pub(crate) fn text(&self) -> String {
        match self {
            PathSeg::Text(t) => t.clone(),
            PathSeg::Unit(r) => r.value.to_string(),
        }
    }
}

/// Split a dotted path, ignoring dots inside parentheses. Used for fixed
/// paths handed to `$VALUE`.
pub(crate) fn split_path(path: &str) -> Vec<PathSeg> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut protected = false;
    for c in path.chars() {
        if c == '.' && !protected {
            result.push(PathSeg::Text(std::mem::take(&mut current)));
            continue;
        }
        if c == '(' {
            protected = true;
        }
        if c == ')' {
            protected = false;
        }
        current.push(c);
    }
    result.push(PathSeg::Text(current));
    result
}

fn joined(segs: &[PathSeg]) -> String {
    segs.iter()
        .map(|s| s.text())
        .collect::<Vec<_>>()
        .join(".")
}

fn wash_segs(segs: &[PathSeg]) -> Vec<Value> {
    segs.iter()
        .map(|seg| match seg {
            PathSeg::Text(t) => Value::String(t.clone()),
            PathSeg::Unit(r) => normalize(r.value.clone()),
        })
        .collect()
}

fn default_value(default: &str) -> Value {
    // the literal text "null" forces an actual null, distinct from unresolved
    if default == "null" {
        Value::Null
    } else {
        Value::String(default.to_string())
    }
}

/// Resolve a path against the engine's context stack, applying the fallback
/// ladder for unresolved or empty results.
pub(crate) async fn resolve_path(
    engine: &FireMacro,
    mut segs: Vec<PathSeg>,
    forced_protect: bool,
) -> MacroResult<Resolved> {
    // slice off the default value if present
    let mut default: Option<String> = None;
    if let Some(PathSeg::Text(last)) = segs.last_mut() {
        let fields: Vec<&str> = last.split('|').collect();
        if fields.len() > 1 {
            default = Some(fields[1].to_string());
            *last = fields[0].to_string();
        }
    }

    let mut protect = forced_protect;
    let value = match drill(engine, &segs).await? {
        None => match &default {
            Some(d) => default_value(d),
            None => {
                protect = true;
                if engine.options().clear {
                    Value::String(String::new())
                } else {
                    Value::String(format!("{{{}}}", joined(&segs)))
                }
            }
        },
        // an empty string is a valid result, but the default overrides it
        Some(Value::String(s)) if s.is_empty() && default.is_some() => {
            default_value(&default.unwrap_or_default())
        }
        Some(found) => {
            match found {
                Value::Id(id) => {
                    protect = true;
                    Value::Id(id)
                }
                Value::Opaque(inner) => {
                    protect = true;
                    *inner
                }
                other => other,
            }
        }
    };
    Ok(Resolved::new(value, protect))
}

/// Walk the context stack, trying the full path from every frame in turn.
#[async_recursion]
pub(crate) async fn drill(engine: &FireMacro, segs: &[PathSeg]) -> MacroResult<Option<Value>> {
    // a leading already-resolved non-string unit is its own result
    if let Some(PathSeg::Unit(unit)) = segs.first() {
        if !matches!(unit.value, Value::String(_)) {
            return Ok(Some(unit.value.clone()));
        }
    }

    for frame in engine.stack().snapshot() {
        match frame {
            Frame::Helpers => {
                let Some(first) = segs.first() else {
                    continue;
                };
                let name = first.text();
                if helpers::is_helper(&name) {
                    let args = wash_segs(&segs[1..]);
                    return Ok(Some(helpers::call(engine, &name, args).await?));
                }
            }
            Frame::Data(root) => {
                if let Some(found) = walk(&root, segs) {
                    return Ok(Some(found));
                }
            }
        }
    }
    Ok(None)
}

/// Walk all segments starting from one frame's root value. `None` as soon as
/// any segment fails to advance.
fn walk(root: &Value, segs: &[PathSeg]) -> Option<Value> {
    let mut current = root.clone();
    for (index, seg) in segs.iter().enumerate() {
        if let Value::Opaque(inner) = current {
            current = *inner;
        }
        let key = seg.text();
        // a date mid-path: the last remaining segment is a format pattern
        if is_date_like(&current) {
            if segs.len() - index == 1 {
                let dt = helpers::date::parse_source(&current)?;
                current = Value::String(helpers::date::format_pattern(&dt, &key));
            }
            continue;
        }
        current = match current {
            // array of name/value records
            Value::Array(items) => items
                .iter()
                .find(|item| {
                    matches!(item.get("name"), Some(Value::String(name)) if *name == key)
                })
                .and_then(|item| item.get("value"))
                .cloned()?,
            Value::Object(pairs) => pairs.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_date_like(value: &Value) -> bool {
    match value {
        Value::Date(_) => true,
        Value::String(s) => ISO_TIMESTAMP.is_match(s),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_keeps_dots_inside_parentheses() {
        let segs = split_path("fn.(a.b).c");
        let texts: Vec<String> = segs.iter().map(|s| s.text()).collect();
        assert_eq!(texts, vec!["fn", "(a.b)", "c"]);
    }

    #[test]
    fn walk_indexes_objects_and_record_arrays() {
        let root = Value::from(json!({
            "user": {"name": "ada"},
            "fields": [
                {"name": "a", "value": 1},
                {"name": "b", "value": 2}
            ]
        }));
        let path = |p: &str| split_path(p);
        assert_eq!(
            walk(&root, &path("user.name")),
            Some(Value::String("ada".to_string()))
        );
        assert_eq!(walk(&root, &path("fields.b")), Some(Value::Number(2.0)));
        assert_eq!(walk(&root, &path("fields.c")), None);
        assert_eq!(walk(&root, &path("user.missing")), None);
    }

    #[test]
    fn walk_formats_iso_strings_with_a_trailing_pattern() {
        let root = Value::from(json!({"created": "2024-03-05T06:07:08.000Z"}));
        assert_eq!(
            walk(&root, &split_path("created.YYYY")),
            Some(Value::String("2024".to_string()))
        );
        // without a pattern the raw string passes through
        assert_eq!(
            walk(&root, &split_path("created")),
            Some(Value::String("2024-03-05T06:07:08.000Z".to_string()))
        );
    }

    #[test]
    fn iso_detection_requires_fractional_seconds_and_zone() {
        assert!(is_date_like(&Value::String(
            "2024-03-05T06:07:08.000Z".to_string()
        )));
        assert!(is_date_like(&Value::String(
            "2024-03-05T06:07:08.123+02:00".to_string()
        )));
        assert!(!is_date_like(&Value::String("2024-03-05".to_string())));
        assert!(!is_date_like(&Value::String("plain text".to_string())));
    }
}

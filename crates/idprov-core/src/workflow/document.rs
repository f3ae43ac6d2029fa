//! Reading and writing execution documents through `DocPath`s.
//!
//! A document is a JSON object threaded through every state. Reads fail with
//! `PathNotFound` or `TypeMismatch`; writes create missing intermediate
//! objects and merge into the root when the result path is `$`.

use idprov_types::error::{kinds, ErrorInfo};
use idprov_types::path::{DocPath, PathError, Segment};
use idprov_types::workflow::{ResultPath, Template, TemplateValue};
use serde_json::{Map, Value};

/// Upper bound on a serialized document (256 KiB).
pub const MAX_DOCUMENT_SIZE: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("value at '{path}' is not valid JSON text: {reason}")]
    InvalidJsonText { path: String, reason: String },

    #[error("template '{template}' has {placeholders} placeholders but {args} arguments")]
    FormatArity {
        template: String,
        placeholders: usize,
        args: usize,
    },

    #[error("template refers to the map item outside a map item selector")]
    ItemUnavailable,
}

impl DocumentError {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentError::Path(e) => e.kind(),
            DocumentError::TooLarge { .. } => kinds::DOCUMENT_TOO_LARGE,
            DocumentError::InvalidJsonText { .. }
            | DocumentError::FormatArity { .. }
            | DocumentError::ItemUnavailable => kinds::TYPE_MISMATCH,
        }
    }

    /// The state failure this error surfaces as.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// The value addressed by `path`.
pub fn read<'a>(doc: &'a Value, path: &DocPath) -> Result<&'a Value, PathError> {
    let mut current = doc;
    for (depth, segment) in path.segments().iter().enumerate() {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => {
                map.get(key).ok_or_else(|| PathError::PathNotFound {
                    path: path.to_string(),
                    missing: path.prefix_str(depth + 1),
                })?
            }
            (Segment::Index(index), Value::Array(items)) => {
                items.get(*index).ok_or_else(|| PathError::PathNotFound {
                    path: path.to_string(),
                    missing: path.prefix_str(depth + 1),
                })?
            }
            (Segment::Key(_), other) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix_str(depth),
                    expected: "object",
                    found: type_name(other),
                });
            }
            (Segment::Index(_), other) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix_str(depth),
                    expected: "array",
                    found: type_name(other),
                });
            }
        };
    }
    Ok(current)
}

/// Whether `path` resolves. JSON `null` counts as present.
pub fn is_present(doc: &Value, path: &DocPath) -> bool {
    read(doc, path).is_ok()
}

/// Read a string, rejecting other types.
pub fn read_str<'a>(doc: &'a Value, path: &DocPath) -> Result<&'a str, PathError> {
    let value = read(doc, path)?;
    value.as_str().ok_or_else(|| PathError::TypeMismatch {
        path: path.to_string(),
        expected: "string",
        found: type_name(value),
    })
}

/// Replace the document with the value at `path`.
pub fn narrow(doc: &Value, path: &DocPath) -> Result<Value, PathError> {
    read(doc, path).cloned()
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Write `value` at `target`.
///
/// `Discard` leaves the document untouched. Writing at `$` merges the keys
/// of an object result into the document root.
pub fn write(doc: &mut Value, target: &ResultPath, value: Value) -> Result<(), PathError> {
    let ResultPath::At(path) = target else {
        return Ok(());
    };

    if path.is_root() {
        let found = type_name(&value);
        return match (doc, value) {
            (Value::Object(root), Value::Object(incoming)) => {
                root.extend(incoming);
                Ok(())
            }
            _ => Err(PathError::TypeMismatch {
                path: path.to_string(),
                expected: "object",
                found,
            }),
        };
    }

    let segments = path.segments();
    let last = segments.len() - 1;
    let mut current = doc;
    for (depth, segment) in segments.iter().enumerate() {
        let is_last = depth == last;
        current = match segment {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let map = match current {
                    Value::Object(map) => map,
                    other => {
                        return Err(PathError::TypeMismatch {
                            path: path.prefix_str(depth),
                            expected: "object",
                            found: type_name(other),
                        });
                    }
                };
                if is_last {
                    map.insert(key.clone(), value);
                    return Ok(());
                }
                map.entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            Segment::Index(index) => {
                let items = match current {
                    Value::Array(items) => items,
                    other => {
                        return Err(PathError::TypeMismatch {
                            path: path.prefix_str(depth),
                            expected: "array",
                            found: type_name(other),
                        });
                    }
                };
                let Some(slot) = items.get_mut(*index) else {
                    return Err(PathError::PathNotFound {
                        path: path.to_string(),
                        missing: path.prefix_str(depth + 1),
                    });
                };
                if is_last {
                    *slot = value;
                    return Ok(());
                }
                slot
            }
        };
    }
    Ok(())
}

/// Reject documents over `MAX_DOCUMENT_SIZE` once serialized.
pub fn check_size(doc: &Value) -> Result<(), DocumentError> {
    let size = serde_json::to_vec(doc).map(|v| v.len()).unwrap_or(0);
    if size > MAX_DOCUMENT_SIZE {
        return Err(DocumentError::TooLarge {
            size,
            limit: MAX_DOCUMENT_SIZE,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Build an object from `template` against `doc`.
///
/// `item` is the current Map item and is only set while seeding item
/// documents.
pub fn render(template: &Template, doc: &Value, item: Option<&Value>) -> Result<Value, DocumentError> {
    let mut out = Map::new();
    for (key, field) in &template.0 {
        out.insert(key.clone(), render_value(field, doc, item)?);
    }
    Ok(Value::Object(out))
}

fn render_value(field: &TemplateValue, doc: &Value, item: Option<&Value>) -> Result<Value, DocumentError> {
    match field {
        TemplateValue::Path(path) => Ok(read(doc, path)?.clone()),
        TemplateValue::Value(value) => Ok(value.clone()),
        TemplateValue::Item => item.cloned().ok_or(DocumentError::ItemUnavailable),
        TemplateValue::Format { template, args } => {
            let placeholders = template.matches("{}").count();
            if placeholders != args.len() {
                return Err(DocumentError::FormatArity {
                    template: template.clone(),
                    placeholders,
                    args: args.len(),
                });
            }
            let mut out = String::with_capacity(template.len());
            let mut pieces = template.split("{}");
            if let Some(first) = pieces.next() {
                out.push_str(first);
            }
            for (piece, arg) in pieces.zip(args) {
                out.push_str(&display(read(doc, arg)?));
                out.push_str(piece);
            }
            Ok(Value::String(out))
        }
        TemplateValue::JsonText(path) => {
            let text = read_str(doc, path)?;
            serde_json::from_str(text).map_err(|e| DocumentError::InvalidJsonText {
                path: path.to_string(),
                reason: e.to_string(),
            })
        }
        TemplateValue::Nested(inner) => render(inner, doc, item),
    }
}

/// String form used by `Format`: strings unquoted, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> DocPath {
        DocPath::parse(raw).unwrap()
    }

    #[test]
    fn read_nested_and_indexed() {
        let doc = json!({ "metadata": { "roles_metadata": [{ "role_type": "WS" }] } });
        assert_eq!(
            read(&doc, &path("$.metadata.roles_metadata[0].role_type")).unwrap(),
            "WS"
        );
        assert_eq!(read(&doc, &DocPath::root()).unwrap(), &doc);
    }

    #[test]
    fn read_reports_missing_prefix() {
        let doc = json!({ "metadata": {} });
        let err = read(&doc, &path("$.metadata.roles_metadata.x")).unwrap_err();
        assert_eq!(
            err,
            PathError::PathNotFound {
                path: "$.metadata.roles_metadata.x".into(),
                missing: "$.metadata.roles_metadata".into(),
            }
        );
        assert_eq!(err.kind(), kinds::PATH_NOT_FOUND);
    }

    #[test]
    fn read_through_scalar_is_type_mismatch() {
        let doc = json!({ "detail": "flat" });
        let err = read(&doc, &path("$.detail.deployment_module")).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { expected: "object", found: "string", .. }));
    }

    #[test]
    fn null_counts_as_present() {
        let doc = json!({ "a": null });
        assert!(is_present(&doc, &path("$.a")));
        assert!(!is_present(&doc, &path("$.b")));
    }

    #[test]
    fn write_creates_intermediate_objects() {
        let mut doc = json!({ "role": { "name": "r1" } });
        write(&mut doc, &ResultPath::at("$.role.ad_group_config.name").unwrap(), json!("g1")).unwrap();
        assert_eq!(doc, json!({ "role": { "name": "r1", "ad_group_config": { "name": "g1" } } }));
    }

    #[test]
    fn write_discard_is_noop() {
        let mut doc = json!({ "a": 1 });
        write(&mut doc, &ResultPath::Discard, json!({ "b": 2 })).unwrap();
        assert_eq!(doc, json!({ "a": 1 }));
    }

    #[test]
    fn write_root_merges_objects() {
        let mut doc = json!({ "a": 1, "b": 1 });
        write(&mut doc, &ResultPath::at("$").unwrap(), json!({ "b": 2, "c": 3 })).unwrap();
        assert_eq!(doc, json!({ "a": 1, "b": 2, "c": 3 }));

        let err = write(&mut doc, &ResultPath::at("$").unwrap(), json!("text")).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { .. }));
    }

    #[test]
    fn write_through_scalar_fails() {
        let mut doc = json!({ "role": "r1" });
        let err = write(&mut doc, &ResultPath::at("$.role.status").unwrap(), json!(1)).unwrap_err();
        assert!(matches!(err, PathError::TypeMismatch { found: "string", .. }));
    }

    #[test]
    fn write_into_array_element() {
        let mut doc = json!({ "items": [{}, {}] });
        write(&mut doc, &ResultPath::at("$.items[1].done").unwrap(), json!(true)).unwrap();
        assert_eq!(doc["items"][1]["done"], true);

        let err = write(&mut doc, &ResultPath::at("$.items[5].done").unwrap(), json!(true)).unwrap_err();
        assert!(matches!(err, PathError::PathNotFound { .. }));
    }

    #[test]
    fn render_format_json_text_and_item() {
        let doc = json!({
            "detail": {
                "deployment_module": "identity_access",
                "target_workspace_name": "ws-a",
                "target_account_id": 42
            },
            "parameter": { "value": "{\"ad_domain\":\"corp\"}" }
        });
        let template = Template::new()
            .with(
                "output",
                TemplateValue::Format {
                    template: "Successfully executed {} for account {} #{}.".into(),
                    args: vec![
                        path("$.detail.deployment_module"),
                        path("$.detail.target_workspace_name"),
                        path("$.detail.target_account_id"),
                    ],
                },
            )
            .with("data", TemplateValue::JsonText(path("$.parameter.value")))
            .with("role", TemplateValue::Item);

        let item = json!({ "role_type": "WS" });
        let rendered = render(&template, &doc, Some(&item)).unwrap();
        assert_eq!(
            rendered,
            json!({
                "output": "Successfully executed identity_access for account ws-a #42.",
                "data": { "ad_domain": "corp" },
                "role": { "role_type": "WS" }
            })
        );
    }

    #[test]
    fn render_errors_surface_kinds() {
        let doc = json!({ "text": "not json" });
        let template = Template::new().with("data", TemplateValue::JsonText(path("$.text")));
        let err = render(&template, &doc, None).unwrap_err();
        assert_eq!(err.kind(), kinds::TYPE_MISMATCH);

        let template = Template::new().with("role", TemplateValue::Item);
        assert_eq!(render(&template, &doc, None).unwrap_err(), DocumentError::ItemUnavailable);
    }

    #[test]
    fn size_limit() {
        let big = json!({ "blob": "x".repeat(MAX_DOCUMENT_SIZE) });
        let err = check_size(&big).unwrap_err();
        assert_eq!(err.kind(), kinds::DOCUMENT_TOO_LARGE);
        assert!(check_size(&json!({ "a": 1 })).is_ok());
    }
}

//! A2UI form schemas.
//!
//! Backends push a loosely typed JSON description of an approval form with
//! every action request. [`normalize`] turns any JSON value into a
//! [`FormSchema`] without ever failing; [`validate`] is the stricter check
//! for producers that want field-level diagnostics.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{ActionRequest, is_truthy};

/// Title of the sentinel schema returned for unusable input.
pub const INVALID_SCHEMA_TITLE: &str = "Invalid schema";

/// Request id of the bundled demonstration request.
pub const EXAMPLE_REQUEST_ID: &str = "example_approval_1";

/// Single-line or multi-line text input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// Pick any subset of a fixed list of options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSelectField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KnownField {
    Text(InputField),
    Textarea(InputField),
    MultiSelect(MultiSelectField),
}

/// One form input.
///
/// Elements that are not a well-formed known variant are kept verbatim as
/// `Unrecognized`; renderers skip them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Field {
    Text(InputField),
    Textarea(InputField),
    MultiSelect(MultiSelectField),
    Unrecognized(Value),
}

impl Field {
    pub fn text(key: impl Into<String>, label: impl Into<String>) -> Self {
        Field::Text(InputField {
            key: key.into(),
            label: label.into(),
            placeholder: None,
        })
    }

    pub fn textarea(key: impl Into<String>, label: impl Into<String>) -> Self {
        Field::Textarea(InputField {
            key: key.into(),
            label: label.into(),
            placeholder: None,
        })
    }

    pub fn multi_select(
        key: impl Into<String>,
        label: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Field::MultiSelect(MultiSelectField {
            key: key.into(),
            label: label.into(),
            options: options.into_iter().map(Into::into).collect(),
        })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Field::Text(f) | Field::Textarea(f) => Some(&f.key),
            Field::MultiSelect(f) => Some(&f.key),
            Field::Unrecognized(raw) => raw.get("key").and_then(Value::as_str),
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn type_tag(&self) -> Option<&str> {
        match self {
            Field::Text(_) => Some("text"),
            Field::Textarea(_) => Some("textarea"),
            Field::MultiSelect(_) => Some("multi-select"),
            Field::Unrecognized(raw) => raw.get("type").and_then(Value::as_str),
        }
    }
}

impl From<Value> for Field {
    fn from(raw: Value) -> Self {
        match serde_json::from_value::<KnownField>(raw.clone()) {
            Ok(KnownField::Text(f)) => Field::Text(f),
            Ok(KnownField::Textarea(f)) => Field::Textarea(f),
            Ok(KnownField::MultiSelect(f)) => Field::MultiSelect(f),
            Err(_) => Field::Unrecognized(raw),
        }
    }
}

impl From<Field> for Value {
    fn from(field: Field) -> Self {
        let known = match field {
            Field::Text(f) => KnownField::Text(f),
            Field::Textarea(f) => KnownField::Textarea(f),
            Field::MultiSelect(f) => KnownField::MultiSelect(f),
            Field::Unrecognized(raw) => return raw,
        };
        serde_json::to_value(known).unwrap_or(Value::Null)
    }
}

/// Canonical form description consumed by the renderer.
///
/// `title` is decoration only and is passed through without coercion, so it
/// may hold a non-string value if the producer sent one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Value>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl FormSchema {
    pub fn new(title: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            title: Some(Value::String(title.into())),
            fields,
        }
    }

    /// The "could not parse" sentinel.
    pub fn invalid() -> Self {
        Self::new(INVALID_SCHEMA_TITLE, Vec::new())
    }

    pub fn is_invalid(&self) -> bool {
        self.fields.is_empty() && self.title_text() == Some(INVALID_SCHEMA_TITLE)
    }

    pub fn title_text(&self) -> Option<&str> {
        self.title.as_ref().and_then(Value::as_str)
    }
}

/// Normalize an untrusted schema payload. Total over all JSON values.
pub fn normalize(raw: &Value) -> FormSchema {
    match raw {
        Value::Object(obj) => FormSchema {
            title: obj.get("title").cloned(),
            fields: obj
                .get("fields")
                .and_then(Value::as_array)
                .map(|items| items.iter().cloned().map(Field::from).collect())
                .unwrap_or_default(),
        },
        // Arrays are structured but carry neither a title nor fields.
        Value::Array(_) => FormSchema::default(),
        _ => FormSchema::invalid(),
    }
}

// ============================================================================
// Strict validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaIssue {
    #[error("Schema is empty")]
    Empty,
    #[error("Missing title")]
    MissingTitle,
    #[error("Missing or invalid fields array")]
    InvalidFields,
    #[error("fields[{index}].type is required")]
    MissingType { index: usize },
    #[error("fields[{index}].key is required")]
    MissingKey { index: usize },
    #[error("fields[{index}].key `{key}` is already used by an earlier field")]
    DuplicateKey { index: usize, key: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaReport {
    pub errors: Vec<SchemaIssue>,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Field-level diagnostics for a raw schema. Not used on the render path.
pub fn validate(raw: &Value) -> SchemaReport {
    let mut errors = Vec::new();
    if !is_truthy(raw) {
        errors.push(SchemaIssue::Empty);
        return SchemaReport { errors };
    }

    if !raw.get("title").is_some_and(is_truthy) {
        errors.push(SchemaIssue::MissingTitle);
    }

    match raw.get("fields").and_then(Value::as_array) {
        None => errors.push(SchemaIssue::InvalidFields),
        Some(fields) => {
            let mut seen = HashSet::new();
            for (index, field) in fields.iter().enumerate() {
                if !field.get("type").is_some_and(is_truthy) {
                    errors.push(SchemaIssue::MissingType { index });
                }
                match field.get("key").filter(|k| is_truthy(k)) {
                    None => errors.push(SchemaIssue::MissingKey { index }),
                    Some(key) => {
                        let key = key
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| key.to_string());
                        if !seen.insert(key.clone()) {
                            errors.push(SchemaIssue::DuplicateKey { index, key });
                        }
                    }
                }
            }
        }
    }

    SchemaReport { errors }
}

// ============================================================================
// Lenient form props
// ============================================================================

/// Display-ready props with every optional attribute filled in.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FormProps {
    pub title: String,
    pub description: String,
    pub fields: Vec<FieldProps>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldProps {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub options: Vec<String>,
    pub placeholder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormProps {
    pub fn from_raw(raw: &Value) -> Self {
        if !is_truthy(raw) {
            return Self::default();
        }
        let fields = raw
            .get("fields")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(FieldProps::from_raw).collect())
            .unwrap_or_default();
        Self {
            title: text_or(raw.get("title"), ""),
            description: text_or(raw.get("description"), ""),
            fields,
        }
    }
}

impl FieldProps {
    fn from_raw(raw: &Value) -> Self {
        let key = raw.get("key").filter(|k| is_truthy(k)).map(display_text);
        let label = raw
            .get("label")
            .filter(|l| is_truthy(l))
            .map(display_text)
            .or_else(|| key.clone())
            .unwrap_or_default();
        let options = raw
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| opts.iter().map(display_text).collect())
            .unwrap_or_default();
        Self {
            kind: text_or(raw.get("type"), "text"),
            label,
            key,
            options,
            placeholder: text_or(raw.get("placeholder"), ""),
            default: raw.get("default").cloned(),
        }
    }
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .filter(|v| is_truthy(v))
        .map(display_text)
        .unwrap_or_else(|| fallback.to_string())
}

fn display_text(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

/// Demonstration request used to pre-seed an approval queue.
pub fn example_action_request() -> ActionRequest {
    ActionRequest {
        request_id: Some(EXAMPLE_REQUEST_ID.to_string()),
        ui_schema: Some(json!({
            "title": "Approve file write to src/main.py",
            "fields": [
                {"type": "textarea", "key": "summary", "label": "Summary of change"},
                {
                    "type": "multi-select",
                    "key": "files",
                    "label": "Files affected",
                    "options": ["src/main.py", "src/utils.py"]
                }
            ]
        })),
        ..Default::default()
    }
}

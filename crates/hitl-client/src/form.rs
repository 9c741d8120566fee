//! Headless renderer for A2UI approval forms.
//!
//! A [`DynamicForm`] turns a [`FormSchema`] into an ordered list of
//! [`Control`]s, collects edits into a values map and hands that map to the
//! submit handler. It performs no validation of its own.

use std::collections::BTreeMap;

use hitl_protocol::schema::{Field, FormSchema};
use serde::Serialize;
use serde_json::{Map, Value};

/// Value collected for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Selection(Vec<String>),
}

/// Submitted values keyed by field key.
///
/// Only keys changed at least once are present; untouched fields are absent
/// rather than holding an empty default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct FormValues(BTreeMap<String, FieldValue>);

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

impl From<FormValues> for Map<String, Value> {
    fn from(values: FormValues) -> Self {
        values
            .0
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Text(text) => Value::String(text),
                    FieldValue::Selection(items) => {
                        Value::Array(items.into_iter().map(Value::String).collect())
                    }
                };
                (key, value)
            })
            .collect()
    }
}

/// One editable control produced by a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    /// `<form id>-<key>`, unique per form as long as keys are.
    pub id: String,
    pub key: String,
    pub label: String,
    pub widget: Widget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    SingleLine {
        placeholder: Option<String>,
        value: String,
    },
    MultiLine {
        placeholder: Option<String>,
        value: String,
    },
    MultiSelect {
        options: Vec<SelectOption>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub value: String,
    pub selected: bool,
}

/// Submission triggered by the host; the form marks it handled.
#[derive(Debug, Default)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("no text field with key `{0}`")]
    NoTextField(String),
    #[error("no multi-select field with key `{0}`")]
    NoSelectField(String),
    #[error("`{option}` is not an option of `{key}`")]
    UnknownOption { key: String, option: String },
}

type SubmitHandler = Box<dyn FnMut(FormValues) + Send>;

pub struct DynamicForm {
    form_id: String,
    schema: FormSchema,
    values: FormValues,
    on_submit: SubmitHandler,
}

impl DynamicForm {
    pub fn new<F>(schema: FormSchema, request_id: Option<&str>, on_submit: F) -> Self
    where
        F: FnMut(FormValues) + Send + 'static,
    {
        Self {
            form_id: form_id(request_id),
            schema,
            values: FormValues::new(),
            on_submit: Box::new(on_submit),
        }
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn title(&self) -> Option<&str> {
        self.schema.title_text()
    }

    pub fn values(&self) -> &FormValues {
        &self.values
    }

    /// Swap in a new schema; collected values start over.
    pub fn replace_schema(&mut self, schema: FormSchema, request_id: Option<&str>) {
        self.form_id = form_id(request_id);
        self.schema = schema;
        self.values = FormValues::new();
    }

    /// One control per recognized field, in schema order.
    pub fn render(&self) -> Vec<Control> {
        self.schema
            .fields
            .iter()
            .filter_map(|field| self.control_for(field))
            .collect()
    }

    fn control_for(&self, field: &Field) -> Option<Control> {
        let (key, label, widget) = match field {
            Field::Text(f) => (
                &f.key,
                &f.label,
                Widget::SingleLine {
                    placeholder: f.placeholder.clone(),
                    value: self.text_value(&f.key),
                },
            ),
            Field::Textarea(f) => (
                &f.key,
                &f.label,
                Widget::MultiLine {
                    placeholder: f.placeholder.clone(),
                    value: self.text_value(&f.key),
                },
            ),
            Field::MultiSelect(f) => {
                let selected = self.selection(&f.key);
                let options = f
                    .options
                    .iter()
                    .map(|option| SelectOption {
                        value: option.clone(),
                        selected: selected.contains(option),
                    })
                    .collect();
                (&f.key, &f.label, Widget::MultiSelect { options })
            }
            Field::Unrecognized(_) => return None,
        };
        Some(Control {
            id: format!("{}-{}", self.form_id, key),
            key: key.clone(),
            label: label.clone(),
            widget,
        })
    }

    fn text_value(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(FieldValue::Text(text)) => text.clone(),
            _ => String::new(),
        }
    }

    fn selection(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(FieldValue::Selection(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Edit a `text` or `textarea` field.
    pub fn set_text(&mut self, key: &str, value: impl Into<String>) -> Result<(), FormError> {
        let known = self.schema.fields.iter().any(|field| {
            matches!(field, Field::Text(f) | Field::Textarea(f) if f.key == key)
        });
        if !known {
            return Err(FormError::NoTextField(key.to_string()));
        }
        self.values.insert(key, FieldValue::Text(value.into()));
        Ok(())
    }

    /// Replace the selection of a multi-select field.
    ///
    /// The stored value lists the chosen options in the order the field
    /// declares them.
    pub fn set_selection<S: AsRef<str>>(&mut self, key: &str, selected: &[S]) -> Result<(), FormError> {
        let selected: Vec<&str> = selected.iter().map(|s| s.as_ref()).collect();
        let options = self.options_of(key)?;
        if let Some(unknown) = selected.iter().find(|s| !options.iter().any(|o| o == *s)) {
            return Err(FormError::UnknownOption {
                key: key.to_string(),
                option: unknown.to_string(),
            });
        }
        let chosen = options
            .into_iter()
            .filter(|o| selected.contains(&o.as_str()))
            .collect();
        self.values.insert(key, FieldValue::Selection(chosen));
        Ok(())
    }

    /// Flip a single option of a multi-select field.
    pub fn toggle_option(&mut self, key: &str, option: &str) -> Result<(), FormError> {
        let mut selected = self.selection(key);
        match selected.iter().position(|s| s == option) {
            Some(index) => {
                selected.remove(index);
            }
            None => selected.push(option.to_string()),
        }
        self.set_selection(key, &selected)
    }

    fn options_of(&self, key: &str) -> Result<Vec<String>, FormError> {
        self.schema
            .fields
            .iter()
            .rev()
            .find_map(|field| match field {
                Field::MultiSelect(f) if f.key == key => Some(f.options.clone()),
                _ => None,
            })
            .ok_or_else(|| FormError::NoSelectField(key.to_string()))
    }

    /// Handle a submit: suppress the host's default action and pass the
    /// collected values to the handler.
    pub fn submit(&mut self, event: &mut SubmitEvent) {
        event.prevent_default();
        tracing::debug!(form = %self.form_id, fields = self.values.len(), "form submitted");
        (self.on_submit)(self.values.clone());
    }
}

fn form_id(request_id: Option<&str>) -> String {
    match request_id {
        Some(id) => format!("form-{id}"),
        None => "dynamic-form".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<FormValues>>>;

    fn form(schema: FormSchema) -> (DynamicForm, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let form = DynamicForm::new(schema, Some("req-1"), move |values| {
            sink.lock().unwrap().push(values)
        });
        (form, captured)
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    #[test]
    fn test_renders_controls_in_order() {
        let schema = FormSchema::new(
            "Review",
            vec![
                Field::text("name", "Name"),
                Field::Unrecognized(serde_json::json!({"type": "slider", "key": "level"})),
                Field::textarea("summary", "Summary"),
                Field::multi_select("files", "Files", ["a.rs", "b.rs"]),
            ],
        );
        let (form, _) = form(schema);
        let controls = form.render();
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[0].id, "form-req-1-name");
        assert!(matches!(controls[0].widget, Widget::SingleLine { ref value, .. } if value.is_empty()));
        assert!(matches!(controls[1].widget, Widget::MultiLine { .. }));
        let Widget::MultiSelect { options } = &controls[2].widget else {
            panic!("Expected multi-select control");
        };
        assert!(options.iter().all(|o| !o.selected));
        assert_eq!(form.title(), Some("Review"));
    }

    #[test]
    fn test_submit_single_text_field() {
        let schema = FormSchema::new("Form", vec![Field::text("name", "Name")]);
        let (mut form, captured) = form(schema);
        form.set_text("name", "John").unwrap();

        let mut event = SubmitEvent::new();
        form.submit(&mut event);
        assert!(event.default_prevented());

        let submitted = captured.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].get("name"), Some(&text("John")));
        assert_eq!(submitted[0].len(), 1);
    }

    #[test]
    fn test_submit_two_text_fields() {
        let schema = FormSchema::new(
            "Form",
            vec![Field::text("field1", "Field 1"), Field::text("field2", "Field 2")],
        );
        let (mut form, captured) = form(schema);
        form.set_text("field1", "Value1").unwrap();
        form.set_text("field2", "Value2").unwrap();
        form.submit(&mut SubmitEvent::new());

        let submitted = captured.lock().unwrap();
        assert_eq!(submitted[0].get("field1"), Some(&text("Value1")));
        assert_eq!(submitted[0].get("field2"), Some(&text("Value2")));
    }

    #[test]
    fn test_untouched_fields_are_absent() {
        let schema = FormSchema::new(
            "Form",
            vec![Field::text("name", "Name"), Field::textarea("note", "Note")],
        );
        let (mut form, captured) = form(schema);
        form.set_text("note", "").unwrap();
        form.submit(&mut SubmitEvent::new());

        let submitted = captured.lock().unwrap();
        assert_eq!(submitted[0].get("name"), None);
        assert_eq!(submitted[0].get("note"), Some(&text("")));
    }

    #[test]
    fn test_multi_select_keeps_option_order() {
        let schema = FormSchema::new(
            "Files",
            vec![Field::multi_select("files", "Files", ["a.rs", "b.rs", "c.rs"])],
        );
        let (mut form, captured) = form(schema);
        form.set_selection("files", &["c.rs", "a.rs"]).unwrap();
        form.toggle_option("files", "b.rs").unwrap();
        form.toggle_option("files", "c.rs").unwrap();
        form.submit(&mut SubmitEvent::new());

        let submitted = captured.lock().unwrap();
        assert_eq!(
            submitted[0].get("files"),
            Some(&FieldValue::Selection(vec!["a.rs".to_string(), "b.rs".to_string()]))
        );

        let json = serde_json::to_value(&submitted[0]).unwrap();
        assert_eq!(json, serde_json::json!({"files": ["a.rs", "b.rs"]}));
    }

    #[test]
    fn test_rendered_selection_reflects_edits() {
        let schema = FormSchema::new("Files", vec![Field::multi_select("files", "Files", ["a", "b"])]);
        let (mut form, _) = form(schema);
        form.toggle_option("files", "b").unwrap();
        let controls = form.render();
        let Widget::MultiSelect { options } = &controls[0].widget else {
            panic!("Expected multi-select control");
        };
        assert_eq!(
            options.iter().map(|o| o.selected).collect::<Vec<_>>(),
            vec![false, true]
        );
    }

    #[test]
    fn test_edit_errors() {
        let schema = FormSchema::new(
            "Form",
            vec![Field::text("name", "Name"), Field::multi_select("files", "Files", ["a"])],
        );
        let (mut form, _) = form(schema);
        assert_eq!(
            form.set_text("files", "x"),
            Err(FormError::NoTextField("files".to_string()))
        );
        assert_eq!(
            form.set_selection("name", &["a"]),
            Err(FormError::NoSelectField("name".to_string()))
        );
        assert_eq!(
            form.toggle_option("files", "z"),
            Err(FormError::UnknownOption {
                key: "files".to_string(),
                option: "z".to_string()
            })
        );
        assert!(form.values().is_empty());
    }

    #[test]
    fn test_replace_schema_resets_values() {
        let (mut form, captured) = form(FormSchema::new("A", vec![Field::text("name", "Name")]));
        form.set_text("name", "old").unwrap();
        form.replace_schema(FormSchema::new("B", vec![Field::text("name", "Name")]), Some("req-2"));
        assert!(form.values().is_empty());
        assert_eq!(form.form_id(), "form-req-2");
        form.submit(&mut SubmitEvent::new());
        assert!(captured.lock().unwrap()[0].is_empty());
    }

    #[test]
    fn test_invalid_schema_renders_nothing() {
        let (form, _) = form(FormSchema::invalid());
        assert!(form.render().is_empty());
        assert_eq!(form.title(), Some("Invalid schema"));
    }

    #[test]
    fn test_values_into_json_map() {
        let mut values = FormValues::new();
        values.insert("summary", text("ok"));
        values.insert("files", FieldValue::Selection(vec!["a".to_string()]));
        let map: Map<String, Value> = values.into();
        assert_eq!(
            Value::Object(map),
            serde_json::json!({"summary": "ok", "files": ["a"]})
        );
    }
}

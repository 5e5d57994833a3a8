//! Shallow structural validation of view states.
//!
//! A [`ViewSchema`] declares the minimum shape of a view's state: for each
//! listed field, the primitive kind its value must have. Fields missing from
//! the state are fine, and fields missing from the schema are always
//! permitted. Schemas are compiled to JSON Schema once, at registration, and
//! checked with `jsonschema`.
//!
//! Validation never fails loudly. A mismatch is logged at `warn` and the
//! caller skips the save; the host keeps running.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use schemars::JsonSchema;
use serde_json::{Value, json};
use tracing::warn;

use crate::envelope::ViewState;
use crate::error::StateError;

/// Primitive kinds a schema can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Sequence,
    Record,
    Text,
    Number,
    Boolean,
}

impl FieldKind {
    /// JSON Schema `type` keyword for this kind.
    fn json_type(self) -> &'static str {
        match self {
            FieldKind::Sequence => "array",
            FieldKind::Record => "object",
            FieldKind::Text => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }

    fn from_json_type(name: &str) -> Option<Self> {
        match name {
            "array" => Some(FieldKind::Sequence),
            "object" => Some(FieldKind::Record),
            "string" => Some(FieldKind::Text),
            "number" | "integer" => Some(FieldKind::Number),
            "boolean" => Some(FieldKind::Boolean),
            _ => None,
        }
    }
}

/// Declared minimum shape of one view's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSchema {
    fields: BTreeMap<String, FieldKind>,
    nullable: BTreeSet<String>,
}

impl ViewSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name`, when present, to be of `kind`.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.nullable.remove(&name);
        self.fields.insert(name, kind);
        self
    }

    /// Like [`field`](Self::field) but also accepts `null`.
    pub fn nullable_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.nullable.insert(name.clone());
        self.fields.insert(name, kind);
        self
    }

    /// Derive a shallow schema from the top-level properties of a Rust type.
    ///
    /// `Option<T>` properties become nullable; nested structs and enums with
    /// a `$ref` are treated as records. Properties whose kind cannot be
    /// determined are left undeclared.
    pub fn for_type<T: JsonSchema>() -> Self {
        let root = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        let mut schema = Self::new();
        let Some(properties) = root.get("properties").and_then(Value::as_object) else {
            return schema;
        };
        for (name, property) in properties {
            if let Some((kind, nullable)) = property_kind(property) {
                schema = if nullable {
                    schema.nullable_field(name.clone(), kind)
                } else {
                    schema.field(name.clone(), kind)
                };
            }
        }
        schema
    }

    /// Declared kind of a field.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Equivalent JSON Schema: typed `properties`, no `required`, additional
    /// properties allowed.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, kind)| {
                let ty = if self.nullable.contains(name) {
                    json!([kind.json_type(), "null"])
                } else {
                    json!(kind.json_type())
                };
                (name.clone(), json!({ "type": ty }))
            })
            .collect();
        json!({ "type": "object", "properties": properties })
    }
}

/// Map one schemars property schema to a kind and nullability.
fn property_kind(property: &Value) -> Option<(FieldKind, bool)> {
    match property.get("type") {
        Some(Value::String(name)) => FieldKind::from_json_type(name).map(|k| (k, false)),
        Some(Value::Array(names)) => {
            let nullable = names.iter().any(|n| n == "null");
            names
                .iter()
                .filter_map(Value::as_str)
                .find_map(FieldKind::from_json_type)
                .map(|k| (k, nullable))
        }
        _ => {
            if property.get("$ref").is_some() || property.get("allOf").is_some() {
                return Some((FieldKind::Record, false));
            }
            // Option<Struct> renders as anyOf [{$ref}, {type: null}].
            let variants = property.get("anyOf").and_then(Value::as_array)?;
            let nullable = variants.iter().any(|v| v.get("type") == Some(&json!("null")));
            let kind = variants.iter().find_map(|v| {
                if v.get("$ref").is_some() {
                    Some(FieldKind::Record)
                } else {
                    v.get("type")
                        .and_then(Value::as_str)
                        .and_then(FieldKind::from_json_type)
                }
            })?;
            Some((kind, nullable))
        }
    }
}

struct CompiledSchema {
    schema: ViewSchema,
    validator: jsonschema::Validator,
}

/// Registry of per-view schemas.
#[derive(Default)]
pub struct SchemaValidator {
    schemas: HashMap<String, CompiledSchema>,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut views: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        views.sort_unstable();
        f.debug_struct("SchemaValidator")
            .field("views", &views)
            .finish()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator pre-loaded with the shapes of the stock views.
    pub fn with_builtin_views() -> Self {
        let mut validator = Self::new();
        for (view, schema) in builtin_schemas() {
            validator.register(view, schema);
        }
        validator
    }

    /// Register (or replace) the schema for a view.
    pub fn register(&mut self, view: impl Into<String>, schema: ViewSchema) {
        let view = view.into();
        match jsonschema::validator_for(&schema.to_json_schema()) {
            Ok(validator) => {
                self.schemas
                    .insert(view, CompiledSchema { schema, validator });
            }
            // Generated schemas are always well-formed; keep the view
            // unvalidated rather than rejecting all of its saves.
            Err(e) => warn!(view = %view, error = %e, "failed to compile view schema"),
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_schema(mut self, view: impl Into<String>, schema: ViewSchema) -> Self {
        self.register(view, schema);
        self
    }

    pub fn schema(&self, view: &str) -> Option<&ViewSchema> {
        self.schemas.get(view).map(|c| &c.schema)
    }

    /// Every violation of the view's schema, as `"/field: message"` lines.
    /// Empty when the state is valid or the view has no schema.
    pub fn check(&self, view: &str, state: &ViewState) -> Vec<String> {
        let Some(compiled) = self.schemas.get(view) else {
            return Vec::new();
        };
        let instance = Value::Object(state.clone());
        compiled
            .validator
            .iter_errors(&instance)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect()
    }

    /// [`check`](Self::check) as a `Result`.
    pub fn ensure_valid(&self, view: &str, state: &ViewState) -> Result<(), StateError> {
        let violations = self.check(view, state);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(StateError::ValidationRejected {
                view: view.to_string(),
                violations,
            })
        }
    }

    /// Whether `state` satisfies the view's schema. Logs mismatches.
    pub fn validate(&self, view: &str, state: &ViewState) -> bool {
        let violations = self.check(view, state);
        if violations.is_empty() {
            return true;
        }
        warn!(
            view = %view,
            violations = %violations.join("; "),
            "state does not match view schema, save skipped"
        );
        false
    }
}

/// Shapes of the four stock views.
pub fn builtin_schemas() -> Vec<(&'static str, ViewSchema)> {
    vec![
        (
            "discovery",
            ViewSchema::new()
                .field("selectedFiles", FieldKind::Sequence)
                .field("scrollPosition", FieldKind::Number)
                .field("searchQuery", FieldKind::Text)
                .field("filters", FieldKind::Record),
        ),
        (
            "analysis",
            ViewSchema::new()
                .field("results", FieldKind::Sequence)
                .field("activeTab", FieldKind::Text)
                .nullable_field("selectedModel", FieldKind::Text)
                .field("showDetails", FieldKind::Boolean),
        ),
        (
            "organization",
            ViewSchema::new()
                .field("folders", FieldKind::Sequence)
                .field("expandedNodes", FieldKind::Sequence)
                .field("groupBy", FieldKind::Text),
        ),
        (
            "settings",
            ViewSchema::new()
                .field("preferences", FieldKind::Record)
                .field("theme", FieldKind::Text)
                .field("autoSave", FieldKind::Boolean),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    fn state(value: Value) -> ViewState {
        match value {
            Value::Object(map) => map,
            _ => panic!("test state must be an object"),
        }
    }

    #[test]
    fn matching_kinds_validate() {
        let validator = SchemaValidator::with_builtin_views();
        let s = state(json!({"selectedFiles": ["a", "b"], "scrollPosition": 120}));
        assert!(validator.validate("discovery", &s));
    }

    #[test]
    fn wrong_kind_rejected() {
        let validator = SchemaValidator::with_builtin_views();
        let s = state(json!({"selectedFiles": "a,b"}));
        assert!(!validator.validate("discovery", &s));
        let violations = validator.check("discovery", &s);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("/selectedFiles"));
    }

    #[test]
    fn unknown_fields_permitted() {
        let validator = SchemaValidator::with_builtin_views();
        let s = state(json!({"somethingNew": {"deep": [1, 2]}, "scrollPosition": 3.5}));
        assert!(validator.validate("discovery", &s));
    }

    #[test]
    fn view_without_schema_always_validates() {
        let validator = SchemaValidator::with_builtin_views();
        let s = state(json!({"anything": null}));
        assert!(validator.validate("unregistered", &s));
    }

    #[test]
    fn null_only_matches_nullable_fields() {
        let validator = SchemaValidator::with_builtin_views();
        assert!(validator.validate("analysis", &state(json!({"selectedModel": null}))));
        assert!(!validator.validate("analysis", &state(json!({"activeTab": null}))));
    }

    #[test]
    fn multiple_violations_reported() {
        let validator = SchemaValidator::with_builtin_views();
        let s = state(json!({"theme": 3, "autoSave": "yes"}));
        assert_eq!(validator.check("settings", &s).len(), 2);
    }

    #[test]
    fn ensure_valid_names_view_and_fields() {
        let validator = SchemaValidator::with_builtin_views();
        assert!(validator.ensure_valid("settings", &state(json!({"theme": "dark"}))).is_ok());

        let err = validator
            .ensure_valid("settings", &state(json!({"theme": 3, "autoSave": "yes"})))
            .unwrap_err();
        match &err {
            StateError::ValidationRejected { view, violations } => {
                assert_eq!(view, "settings");
                assert_eq!(violations.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.starts_with("state for view 'settings' rejected: "));
        assert!(message.contains("/theme") && message.contains("/autoSave"));
    }

    #[derive(Serialize, JsonSchema)]
    #[allow(dead_code)]
    struct Filters {
        kind: String,
    }

    #[derive(Serialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[allow(dead_code)]
    struct DiscoveryState {
        selected_files: Vec<String>,
        scroll_position: u32,
        search_query: Option<String>,
        filters: Filters,
        show_hidden: bool,
    }

    #[test]
    fn schema_derived_from_rust_type() {
        let schema = ViewSchema::for_type::<DiscoveryState>();
        assert_eq!(schema.kind_of("selectedFiles"), Some(FieldKind::Sequence));
        assert_eq!(schema.kind_of("scrollPosition"), Some(FieldKind::Number));
        assert_eq!(schema.kind_of("searchQuery"), Some(FieldKind::Text));
        assert_eq!(schema.kind_of("filters"), Some(FieldKind::Record));
        assert_eq!(schema.kind_of("showHidden"), Some(FieldKind::Boolean));

        let validator = SchemaValidator::new().with_schema("discovery", schema);
        assert!(validator.validate("discovery", &state(json!({"searchQuery": null}))));
        assert!(!validator.validate("discovery", &state(json!({"filters": []}))));
    }

    #[test]
    fn json_schema_has_no_required_fields() {
        let schema = ViewSchema::new().field("a", FieldKind::Text);
        let json = schema.to_json_schema();
        assert!(json.get("required").is_none());
        assert_eq!(json["properties"]["a"]["type"], "string");
    }
}

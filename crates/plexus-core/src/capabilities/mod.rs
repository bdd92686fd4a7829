//! Capabilities - named local actions the agent can invoke.
//!
//! Each capability carries the schema advertised to the model. The catalog
//! handed to the model is generated from the registered entries, so the two
//! cannot drift apart.

mod fs;
pub mod safety;
mod search;
mod shell;
mod web;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::CapabilityLimits;
use crate::error::{CapabilityError, ErrorKind, KernelError};

pub use fs::{ListDirectory, ReadFile, WriteFile};
pub use search::SearchFiles;
pub use shell::ExecuteCommand;
pub use web::{WebFetch, WebSearch};

pub type Args = Map<String, Value>;

/// JSON-schema primitive types used in parameter declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, ParameterSpec>,
    pub required: Vec<String>,
}

/// Catalog entry: `{name, description, parameters}` as handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    pub name: String,
    pub description: String,
    pub parameters: ParametersSchema,
}

impl CapabilitySchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParametersSchema {
                kind: "object".to_string(),
                properties: BTreeMap::new(),
                required: Vec::new(),
            },
        }
    }

    /// Declare a parameter
    pub fn param(mut self, name: &str, kind: ParamType, description: &str, required: bool) -> Self {
        self.parameters.properties.insert(
            name.to_string(),
            ParameterSpec {
                kind,
                description: description.to_string(),
            },
        );
        if required {
            self.parameters.required.push(name.to_string());
        }
        self
    }

    /// Check required keys and declared types before the handler runs
    pub fn validate_args(&self, args: &Args) -> Result<(), CapabilityError> {
        for key in &self.parameters.required {
            match args.get(key) {
                None | Some(Value::Null) => {
                    return Err(CapabilityError::MissingArgument(key.clone()))
                }
                Some(_) => {}
            }
        }
        for (key, value) in args {
            if value.is_null() {
                continue;
            }
            if let Some(spec) = self.parameters.properties.get(key) {
                if !spec.kind.accepts(value) {
                    return Err(CapabilityError::invalid(
                        key,
                        format!("expected {:?}", spec.kind).to_lowercase(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Normalized outcome of any capability invocation.
///
/// Serializes to the result envelope
/// `{success, ...payload, error?, errorKind?, executionTime}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorKind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "executionTime")]
    pub elapsed_ms: u64,
}

impl CapabilityResult {
    pub fn success(payload: Map<String, Value>, elapsed_ms: u64) -> Self {
        Self {
            succeeded: true,
            payload,
            error: None,
            error_kind: None,
            elapsed_ms,
        }
    }

    pub fn failure(error: &CapabilityError, elapsed_ms: u64) -> Self {
        let mut payload = Map::new();
        payload.insert("code".to_string(), Value::from(error.code()));
        Self {
            succeeded: false,
            payload,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            elapsed_ms,
        }
    }

    /// The envelope as a JSON value
    pub fn to_envelope(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.error_kind == Some(kind)
    }
}

/// A named, schema-described local action.
#[async_trait]
pub trait Capability: Send + Sync {
    fn schema(&self) -> &CapabilitySchema;

    /// Run the action. Arguments have already passed schema validation.
    async fn invoke(&self, args: Args) -> Result<Map<String, Value>, CapabilityError>;

    fn name(&self) -> &str {
        &self.schema().name
    }
}

/// Maps capability names to handlers and their advertised schemas.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in capability, bounded by `limits`
    pub fn builtin(limits: &CapabilityLimits) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadFile::new(limits)));
        registry.register(Arc::new(WriteFile::new(limits)));
        registry.register(Arc::new(ListDirectory::new(limits)));
        registry.register(Arc::new(ExecuteCommand::new(limits)));
        registry.register(Arc::new(SearchFiles::new(limits)));
        registry.register(Arc::new(WebFetch::new(limits)));
        registry.register(Arc::new(WebSearch::new(limits)));
        registry
    }

    /// Register a capability, replacing any previous entry of the same name
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        self.entries
            .insert(capability.name().to_string(), capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The catalog advertised to the model
    pub fn catalog(&self) -> Vec<CapabilitySchema> {
        self.entries.values().map(|c| c.schema().clone()).collect()
    }

    /// Startup consistency check between registered names and schemas
    pub fn validate(&self) -> Result<(), KernelError> {
        for (name, capability) in &self.entries {
            let schema = capability.schema();
            if &schema.name != name {
                return Err(KernelError::Registry(format!(
                    "capability registered as '{}' advertises '{}'",
                    name, schema.name
                )));
            }
            if schema.parameters.kind != "object" {
                return Err(KernelError::Registry(format!(
                    "capability '{}' parameters must be of type object",
                    name
                )));
            }
            if let Some(key) = schema
                .parameters
                .required
                .iter()
                .find(|k| !schema.parameters.properties.contains_key(*k))
            {
                return Err(KernelError::Registry(format!(
                    "capability '{}' requires undeclared parameter '{}'",
                    name, key
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

/// Fetch a required string argument
pub(crate) fn str_arg<'a>(args: &'a Args, key: &str) -> Result<&'a str, CapabilityError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(CapabilityError::invalid(key, "expected string")),
        None => Err(CapabilityError::MissingArgument(key.to_string())),
    }
}

pub(crate) fn opt_str_arg<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_is_consistent() {
        let registry = CapabilityRegistry::builtin(&CapabilityLimits::default());
        registry.validate().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "execute_command",
                "list_directory",
                "read_file",
                "search_files",
                "web_fetch",
                "web_search",
                "write_file"
            ]
        );
        for schema in registry.catalog() {
            assert_eq!(schema.parameters.kind, "object");
        }
    }

    #[test]
    fn schema_serializes_to_catalog_shape() {
        let schema = CapabilitySchema::new("read_file", "Read a file")
            .param("path", ParamType::String, "File path", true);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["parameters"]["type"], "object");
        assert_eq!(value["parameters"]["properties"]["path"]["type"], "string");
        assert_eq!(value["parameters"]["required"], json!(["path"]));
    }

    #[test]
    fn validate_args_reports_missing_and_mistyped() {
        let schema = CapabilitySchema::new("x", "x")
            .param("path", ParamType::String, "", true)
            .param("limit", ParamType::Integer, "", false);

        let args = json!({"limit": 3}).as_object().cloned().unwrap();
        assert!(matches!(
            schema.validate_args(&args),
            Err(CapabilityError::MissingArgument(k)) if k == "path"
        ));

        let args = json!({"path": "/tmp", "limit": "three"}).as_object().cloned().unwrap();
        assert!(matches!(
            schema.validate_args(&args),
            Err(CapabilityError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn result_envelope_flattens_payload() {
        let mut payload = Map::new();
        payload.insert("path".into(), json!("/tmp/a"));
        let envelope = CapabilityResult::success(payload, 12).to_envelope();
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["path"], "/tmp/a");
        assert_eq!(envelope["executionTime"], 12);
        assert!(envelope.get("error").is_none());

        let failed = CapabilityResult::failure(&CapabilityError::Timeout(30), 30_000).to_envelope();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["errorKind"], "resource_limit");
        assert_eq!(failed["code"], "timeout");
    }
}

//! Dispatcher - validates a capability call, runs it in isolation and
//! normalizes the outcome.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::capabilities::{CapabilityRegistry, CapabilityResult};
use crate::error::CapabilityError;

/// Routes invocations by name to the registry's handlers.
///
/// `invoke` never fails: every problem, including a panicking handler,
/// comes back as a failed [`CapabilityResult`] carrying its elapsed time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Invoke a capability by name
    pub async fn invoke(&self, name: &str, args: &Value) -> CapabilityResult {
        let started = Instant::now();
        let outcome = self.try_invoke(name, args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(payload) => {
                tracing::debug!(capability = %name, elapsed_ms, "Capability succeeded");
                CapabilityResult::success(payload, elapsed_ms)
            }
            Err(e) => {
                tracing::info!(capability = %name, elapsed_ms, code = e.code(), error = %e, "Capability failed");
                CapabilityResult::failure(&e, elapsed_ms)
            }
        }
    }

    async fn try_invoke(
        &self,
        name: &str,
        args: &Value,
    ) -> Result<serde_json::Map<String, Value>, CapabilityError> {
        let capability = self
            .registry
            .get(name)
            .ok_or_else(|| CapabilityError::UnknownCapability(name.to_string()))?;

        let args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => return Err(CapabilityError::invalid("args", "arguments must be a JSON object")),
        };
        capability.schema().validate_args(&args)?;

        // Handlers run on their own task so a panic stays contained
        let handle = tokio::spawn(async move { capability.invoke(args).await });
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(CapabilityError::Execution(format!(
                "capability '{}' panicked",
                name
            ))),
            Err(e) => Err(CapabilityError::Execution(format!(
                "capability '{}' was cancelled: {}",
                name, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Args, Capability, CapabilitySchema, ParamType};
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Panicky {
        schema: CapabilitySchema,
    }

    #[async_trait]
    impl Capability for Panicky {
        fn schema(&self) -> &CapabilitySchema {
            &self.schema
        }

        async fn invoke(&self, _args: Args) -> Result<Map<String, Value>, CapabilityError> {
            panic!("handler bug");
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(Panicky {
            schema: CapabilitySchema::new("panicky", "always panics")
                .param("input", ParamType::String, "anything", true),
        }));
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_capability_is_reported_as_data() {
        let result = dispatcher().invoke("nope", &json!({})).await;
        assert!(!result.succeeded);
        assert!(result.is_kind(ErrorKind::InputValidation));
        assert_eq!(result.payload["code"], "unknown_capability");
    }

    #[tokio::test]
    async fn missing_argument_short_circuits_handler() {
        let result = dispatcher().invoke("panicky", &json!({})).await;
        assert_eq!(result.payload["code"], "missing_argument");
    }

    #[tokio::test]
    async fn non_object_arguments_are_rejected() {
        let result = dispatcher().invoke("panicky", &json!(["input"])).await;
        assert_eq!(result.payload["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn handler_panic_becomes_failed_result() {
        let result = dispatcher().invoke("panicky", &json!({"input": "x"})).await;
        assert!(!result.succeeded);
        assert!(result.error.unwrap().contains("panicked"));
    }
}

//! Echo handler: outputs are the inputs plus a stable id.
//!
//! Useful for wiring stacks together and for dry runs. Outputs are built from
//! the sanitized inputs so secret plaintext never ends up in state.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::ActionError;
use crate::executor::{ActionRequest, ResourceHandler};
use crate::model::Outputs;

/// Resource type served by [`EchoHandler`].
pub const ECHO_TYPE: &str = "echo";

/// Handler that reflects its inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl EchoHandler {
    /// Creates a new echo handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn outputs(request: &ActionRequest, id: String) -> Outputs {
        let mut outputs = request.sanitized_inputs.clone();
        outputs.insert(String::from("id"), Value::String(id));
        outputs
    }
}

#[async_trait]
impl ResourceHandler for EchoHandler {
    async fn create(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
        let suffix = Uuid::new_v4().to_string();
        let id = format!("{}-{}", request.name, &suffix[..8]);
        debug!("echo: created {id}");
        Ok(Self::outputs(request, id))
    }

    async fn update(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
        let id = request
            .previous_output("id")
            .and_then(Value::as_str)
            .map_or_else(|| request.name.clone(), str::to_string);
        Ok(Self::outputs(request, id))
    }

    async fn delete(&self, request: &ActionRequest) -> Result<(), ActionError> {
        debug!("echo: deleted {}", request.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProviderConfig;
    use crate::model::secret_digest;
    use serde_json::json;
    use std::sync::Arc;

    fn request(previous: Option<Outputs>) -> ActionRequest {
        let mut inputs = Outputs::new();
        inputs.insert("location".into(), json!("westeurope"));
        inputs.insert("password".into(), json!("hunter2"));
        let mut sanitized = inputs.clone();
        sanitized.insert("password".into(), secret_digest("salt", &json!("hunter2")));

        ActionRequest {
            name: String::from("rg"),
            resource_type: String::from(ECHO_TYPE),
            inputs,
            sanitized_inputs: sanitized,
            previous_inputs: None,
            previous_outputs: previous,
            provider: Arc::new(ProviderConfig::new("quickstart", "dev")),
        }
    }

    #[tokio::test]
    async fn test_create_reflects_sanitized_inputs() {
        let outputs = EchoHandler::new().create(&request(None)).await.unwrap();

        assert_eq!(outputs["location"], json!("westeurope"));
        assert_ne!(outputs["password"], json!("hunter2"));
        assert!(outputs["id"].as_str().unwrap().starts_with("rg-"));
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let mut previous = Outputs::new();
        previous.insert("id".into(), json!("rg-1234abcd"));

        let outputs = EchoHandler::new()
            .update(&request(Some(previous)))
            .await
            .unwrap();
        assert_eq!(outputs["id"], json!("rg-1234abcd"));
    }
}

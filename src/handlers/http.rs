//! HTTP provider handler.
//!
//! Routes resource types to a REST endpoint:
//!
//! - create: `POST {endpoint}/resources/{type}/{name}`
//! - update: `PUT {endpoint}/resources/{type}/{name}`
//! - delete: `DELETE {endpoint}/resources/{type}/{name}` (404 counts as gone)
//!
//! The request body carries the project, environment and resolved inputs; a
//! JSON object in the response body becomes the resource outputs.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, header};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ProviderSettings;
use crate::error::{ActionError, ConfigError, Result};
use crate::executor::{ActionRequest, ResourceHandler};
use crate::model::Outputs;

/// Handler that delegates to a remote provider API.
#[derive(Debug, Clone)]
pub struct HttpHandler {
    /// HTTP client.
    client: Client,
    /// Base URL without a trailing slash.
    endpoint: String,
    /// Bearer token, if configured.
    token: Option<String>,
}

/// Body sent on create and update.
#[derive(Debug, Serialize)]
struct ResourceBody<'a> {
    project: &'a str,
    environment: &'a str,
    inputs: &'a Outputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_outputs: Option<&'a Outputs>,
}

impl HttpHandler {
    /// Creates a handler from provider settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(settings: &ProviderSettings, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ConfigError::validation(format!("Failed to create HTTP client: {e}"), "provider"))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Creates a handler, reading the token from the variable named in the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_env<F>(settings: &ProviderSettings, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = env(&settings.token_env).filter(|t| !t.is_empty());
        if token.is_none() {
            debug!("{} is not set; provider requests are unauthenticated", settings.token_env);
        }
        Self::new(settings, token)
    }

    fn url(&self, request: &ActionRequest) -> String {
        format!(
            "{}/resources/{}/{}",
            self.endpoint, request.resource_type, request.name
        )
    }

    async fn send(
        &self,
        method: Method,
        request: &ActionRequest,
        body: Option<ResourceBody<'_>>,
    ) -> std::result::Result<(StatusCode, String), ActionError> {
        let url = self.url(request);
        trace!("{method} {url}");

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ActionError::handler(format!("{method} {url} failed: {e}")))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!("{method} {url} -> {status}");
        Ok((status, text))
    }

    async fn upsert(&self, method: Method, request: &ActionRequest) -> std::result::Result<Outputs, ActionError> {
        let body = ResourceBody {
            project: &request.provider.project,
            environment: &request.provider.environment,
            inputs: &request.inputs,
            previous_outputs: request.previous_outputs.as_ref(),
        };
        let (status, text) = self.send(method, request, Some(body)).await?;

        if !status.is_success() {
            return Err(Self::status_error(request, status, &text));
        }
        Self::parse_outputs(request, &text)
    }

    fn status_error(request: &ActionRequest, status: StatusCode, body: &str) -> ActionError {
        let detail = match status.as_u16() {
            401 | 403 => String::from("authentication failed"),
            _ if body.is_empty() => String::from("no response body"),
            _ => body.to_string(),
        };
        ActionError::handler(format!("{}: provider returned {status}: {detail}", request.name))
    }

    fn parse_outputs(request: &ActionRequest, text: &str) -> std::result::Result<Outputs, ActionError> {
        if text.trim().is_empty() {
            return Ok(Outputs::new());
        }
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ActionError::handler(format!(
                "{}: expected a JSON object from the provider, got {other}",
                request.name
            ))),
            Err(e) => Err(ActionError::handler(format!(
                "{}: invalid provider response: {e}",
                request.name
            ))),
        }
    }
}

#[async_trait]
impl ResourceHandler for HttpHandler {
    async fn create(&self, request: &ActionRequest) -> std::result::Result<Outputs, ActionError> {
        self.upsert(Method::POST, request).await
    }

    async fn update(&self, request: &ActionRequest) -> std::result::Result<Outputs, ActionError> {
        self.upsert(Method::PUT, request).await
    }

    async fn delete(&self, request: &ActionRequest) -> std::result::Result<(), ActionError> {
        let (status, text) = self.send(Method::DELETE, request, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::status_error(request, status, &text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProviderConfig;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(endpoint: &str) -> ProviderSettings {
        ProviderSettings {
            endpoint: endpoint.to_string(),
            token_env: String::from("QUICKSTACK_PROVIDER_TOKEN"),
            types: vec![String::from("azure:storage")],
            timeout_secs: 5,
        }
    }

    fn request() -> ActionRequest {
        let mut inputs = Outputs::new();
        inputs.insert("location".into(), json!("westeurope"));
        ActionRequest {
            name: String::from("site"),
            resource_type: String::from("azure:storage"),
            sanitized_inputs: inputs.clone(),
            inputs,
            previous_inputs: None,
            previous_outputs: None,
            provider: Arc::new(ProviderConfig::new("quickstart", "dev")),
        }
    }

    #[tokio::test]
    async fn test_create_posts_inputs_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resources/azure:storage/site"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(json!({
                "project": "quickstart",
                "inputs": { "location": "westeurope" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "url": "https://site.example" })))
            .expect(1)
            .mount(&server)
            .await;

        let handler = HttpHandler::from_env(&settings(&server.uri()), |name| {
            (name == "QUICKSTACK_PROVIDER_TOKEN").then(|| String::from("s3cret"))
        })
        .unwrap();
        let outputs = handler.create(&request()).await.unwrap();
        assert_eq!(outputs["url"], json!("https://site.example"));
    }

    #[tokio::test]
    async fn test_error_status_fails_action() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
            .mount(&server)
            .await;

        let handler = HttpHandler::new(&settings(&server.uri()), None).unwrap();
        let err = handler.update(&request()).await.unwrap_err();
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("conflict"));
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_as_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/resources/azure:storage/site"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let handler = HttpHandler::new(&settings(&server.uri()), None).unwrap();
        handler.delete(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_object_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;

        let handler = HttpHandler::new(&settings(&server.uri()), None).unwrap();
        assert!(handler.create(&request()).await.is_err());
    }
}

//! Built-in resource handlers.
//!
//! - `echo`: outputs are the inputs plus a generated id
//! - `file`: manages a file under the working directory
//! - provider types: routed to a REST endpoint over HTTP

mod echo;
mod file;
mod http;

pub use echo::{ECHO_TYPE, EchoHandler};
pub use file::{FILE_TYPE, FileHandler};
pub use http::HttpHandler;

use std::sync::Arc;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::executor::HandlerRegistry;

/// Builds the handler registry for a stack, reading the provider token from the process environment.
///
/// # Errors
///
/// Returns an error if the provider HTTP client cannot be created.
pub fn builtin_handlers(provider: Option<&ProviderSettings>) -> Result<HandlerRegistry> {
    builtin_handlers_with(provider, |name| std::env::var(name).ok())
}

/// Builds the handler registry with an explicit environment lookup.
///
/// # Errors
///
/// Returns an error if the provider HTTP client cannot be created.
pub fn builtin_handlers_with<F>(provider: Option<&ProviderSettings>, env: F) -> Result<HandlerRegistry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut handlers = HandlerRegistry::new()
        .with(ECHO_TYPE, Arc::new(EchoHandler::new()))
        .with(FILE_TYPE, Arc::new(FileHandler::new()));

    if let Some(settings) = provider {
        let http = Arc::new(HttpHandler::from_env(settings, env)?);
        for resource_type in &settings.types {
            debug!("Routing '{resource_type}' to {}", settings.endpoint);
            handlers.register(resource_type.clone(), http.clone());
        }
    }

    Ok(handlers)
}

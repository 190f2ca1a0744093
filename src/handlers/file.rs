//! File handler: manages a file under the working directory.
//!
//! Inputs: `path` (relative to the working directory) and either `content` or
//! `source` (a file to copy, also relative). Outputs: `path`, `sha256`, `size`.

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::ActionError;
use crate::executor::{ActionRequest, ResourceHandler};
use crate::model::Outputs;

/// Resource type served by [`FileHandler`].
pub const FILE_TYPE: &str = "file";

/// Handler that writes files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHandler;

impl FileHandler {
    /// Creates a new file handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Joins a relative path onto the working directory.
    fn resolve(request: &ActionRequest, relative: &str) -> Result<PathBuf, ActionError> {
        let path = Path::new(relative);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(ActionError::handler(format!(
                "{}: path '{relative}' must be relative and stay inside the working directory",
                request.name
            )));
        }
        Ok(request.provider.work_dir.join(path))
    }

    async fn contents(request: &ActionRequest) -> Result<Vec<u8>, ActionError> {
        match (request.inputs.get("content"), request.str_input("source")) {
            (Some(_), Some(_)) => Err(ActionError::handler(format!(
                "{}: set either 'content' or 'source', not both",
                request.name
            ))),
            (Some(Value::String(text)), None) => Ok(text.clone().into_bytes()),
            (Some(other), None) => serde_json::to_vec_pretty(other)
                .map_err(|e| ActionError::handler(format!("{}: {e}", request.name))),
            (None, Some(source)) => {
                let source = Self::resolve(request, source)?;
                tokio::fs::read(&source).await.map_err(|e| {
                    ActionError::handler(format!("{}: cannot read {}: {e}", request.name, source.display()))
                })
            }
            (None, None) => Err(ActionError::handler(format!(
                "{}: one of 'content' or 'source' is required",
                request.name
            ))),
        }
    }

    async fn write(request: &ActionRequest) -> Result<Outputs, ActionError> {
        let relative = request.require_str("path")?;
        let target = Self::resolve(request, relative)?;
        let bytes = Self::contents(request).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ActionError::handler(format!("{}: cannot create {}: {e}", request.name, parent.display()))
            })?;
        }
        tokio::fs::write(&target, &bytes).await.map_err(|e| {
            ActionError::handler(format!("{}: cannot write {}: {e}", request.name, target.display()))
        })?;
        info!("file: wrote {} ({} bytes)", target.display(), bytes.len());

        let mut outputs = Outputs::new();
        outputs.insert(String::from("path"), json!(relative));
        outputs.insert(String::from("sha256"), json!(hex::encode(Sha256::digest(&bytes))));
        outputs.insert(String::from("size"), json!(bytes.len()));
        Ok(outputs)
    }

    async fn remove(request: &ActionRequest, relative: &str) -> Result<(), ActionError> {
        let target = Self::resolve(request, relative)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                info!("file: removed {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("file: {} already gone", target.display());
                Ok(())
            }
            Err(e) => Err(ActionError::handler(format!(
                "{}: cannot remove {}: {e}",
                request.name,
                target.display()
            ))),
        }
    }
}

#[async_trait]
impl ResourceHandler for FileHandler {
    async fn create(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
        Self::write(request).await
    }

    async fn update(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
        let outputs = Self::write(request).await?;

        // A moved file leaves nothing behind at the old path.
        let old_path = request.previous_output("path").and_then(Value::as_str);
        if let Some(old_path) = old_path.filter(|old| Some(*old) != request.str_input("path")) {
            Self::remove(request, old_path).await?;
        }
        Ok(outputs)
    }

    async fn delete(&self, request: &ActionRequest) -> Result<(), ActionError> {
        let path = request
            .previous_output("path")
            .and_then(Value::as_str)
            .or_else(|| request.str_input("path"));
        match path {
            Some(path) => Self::remove(request, path).await,
            None => Ok(()),
        }
    }
}

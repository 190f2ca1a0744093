//! Stack configuration.
//!
//! This module handles everything between `quickstack.yaml` and a
//! [`NodeRegistry`](crate::model::NodeRegistry):
//! - Parsing the stack file and applying environment overrides
//! - Resolving `config:` values, secrets included
//! - Validation and change-detection hashing

mod builder;
mod hash;
mod parser;
mod spec;
mod validator;
mod values;

pub use builder::{build_registry, to_input};
pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    ConfigEntry, DetailedConfigEntry, ExecutorConfig, ProjectConfig, ProviderSettings,
    ResourceConfig, StackConfig, StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use values::{ConfigValue, ConfigValues};

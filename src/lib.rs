// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests may unwrap and panic freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Quickstack
//!
//! Declarative resource stacks: declare resources and the values they pass to
//! each other, preview the changes against the last applied state, then apply
//! them with bounded parallelism.
//!
//! ## Overview
//!
//! - Declare resources in a YAML stack file or through a [`NodeRegistry`]
//! - Reference one resource's outputs from another's inputs; dependencies
//!   are inferred from those references
//! - Preview a deterministic plan of creates, updates and deletes
//! - Apply it as a stream of per-resource results; a failure blocks only the
//!   resources that depend on it
//!
//! ## Architecture
//!
//! 1. **Registry**: declared nodes, their inputs and options ([`model`])
//! 2. **Graph**: dependency edges and a deterministic order ([`graph`])
//! 3. **Planner**: one action per resource from a diff against state ([`planner`])
//! 4. **Executor**: a lazy stream running handlers in parallel ([`executor`])
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and configuration values
//! - [`state`]: Local state storage and locking
//! - [`handlers`]: Built-in `echo`, `file` and HTTP provider handlers
//! - [`reconciler`]: Preview, up and destroy
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: quickstart
//!   environment: dev
//!
//! resources:
//!   - name: rg
//!     type: echo
//!     inputs:
//!       location: westeurope
//!   - name: webapp
//!     type: echo
//!     inputs:
//!       resourceGroup: "${rg.id}"
//!
//! exports:
//!   group: "${rg.id}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handlers;
pub mod model;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, ConfigValues, StackConfig};
pub use error::{ActionError, QuickstackError, Result};
pub use executor::{
    ApplyReport, ExecutionResult, Executor, HandlerRegistry, NodeOutcome, ProviderConfig,
    ResourceHandler,
};
pub use graph::DependencyGraph;
pub use model::{InputValue, LifecycleState, NodeRegistry, Reference};
pub use planner::{ActionType, Plan, Planner};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, StackState, StateStore};

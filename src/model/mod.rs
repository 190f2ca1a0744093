//! Declaration model: values, references, nodes and the node registry.
//!
//! Registration is pure bookkeeping; nothing here talks to a handler.

mod node;
mod registry;
mod value;

pub use node::{LifecycleState, NodeHandle, NodeId, NodeOptions, ResourceNode};
pub use registry::NodeRegistry;
pub use value::{
    InputValue, Outputs, Reference, Resolved, Segment, TemplatePart, generate_secret_salt,
    is_secret_digest, parse_interpolated, render_scalar, resolve_entries, secret_digest,
};

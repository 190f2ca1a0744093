//! Input values, references and their resolution.
//!
//! An input is either a literal, a [`Reference`] to another resource's output,
//! a string template mixing both, a nested list/map, or a secret wrapper.
//! Resolution produces two renderings of the same value: the plain one handed
//! to handlers and a sanitized one (secrets replaced by a digest) that is safe
//! to compare, log and persist. Digests are keyed by a per-stack salt kept in
//! state, so equal secrets in different stacks do not share a digest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::GraphError;

/// Resolved output properties of a resource.
pub type Outputs = serde_json::Map<String, Value>;

/// Marker key used in sanitized values in place of secret plaintext.
pub const SECRET_MARKER: &str = "secret";

/// A reference from an input to an output field of another resource.
///
/// The field may be a dotted path into nested outputs (`primaryEndpoints.web`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    /// Name of the producing resource.
    pub node: String,
    /// Output field path on the producer.
    pub field: String,
}

/// One piece of a string template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Literal text.
    Text(String),
    /// Interpolated reference.
    Ref(Reference),
}

/// A desired input property.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A literal value.
    Literal(Value),
    /// A whole-value reference; resolves to the referenced value as-is.
    Ref(Reference),
    /// A string built from text and references.
    Template(Vec<TemplatePart>),
    /// A list of inputs.
    List(Vec<InputValue>),
    /// A map of inputs.
    Map(BTreeMap<String, InputValue>),
    /// A value that must never be logged or persisted in plaintext.
    Secret(Box<InputValue>),
}

/// A fully resolved input.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Value handed to handlers, secrets included.
    pub plain: Value,
    /// Value with secrets replaced by their digest.
    pub sanitized: Value,
}

/// A segment of an interpolated string, before configuration is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// `${node.field}`
    Ref(Reference),
    /// `${config:key}`
    Config(String),
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
        }
    }

    /// Parses `node.field[.nested]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or the field part is empty.
    pub fn parse(expression: &str) -> Result<Self, GraphError> {
        let invalid = |message: &str| GraphError::InvalidReference {
            expression: expression.to_string(),
            message: message.to_string(),
        };

        let (node, field) = expression
            .split_once('.')
            .ok_or_else(|| invalid("expected <resource>.<output>"))?;

        if node.trim().is_empty() {
            return Err(invalid("resource name is empty"));
        }
        if field.split('.').any(|part| part.trim().is_empty()) {
            return Err(invalid("output field is empty"));
        }

        Ok(Self::new(node.trim(), field.trim()))
    }

    /// Looks the referenced field up in the producer's outputs.
    #[must_use]
    pub fn lookup<'a>(&self, outputs: &'a Outputs) -> Option<&'a Value> {
        let mut parts = self.field.split('.');
        let first = parts.next()?;
        let mut current = outputs.get(first)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.field)
    }
}

impl From<Reference> for InputValue {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl InputValue {
    /// Wraps a value as a secret.
    #[must_use]
    pub fn secret(value: impl Into<Self>) -> Self {
        Self::Secret(Box::new(value.into()))
    }

    /// Returns true if this value is or contains a secret.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::List(items) => items.iter().any(Self::is_secret),
            Self::Map(entries) => entries.values().any(Self::is_secret),
            Self::Literal(_) | Self::Ref(_) | Self::Template(_) => false,
        }
    }

    /// Collects every reference contained in this value, in encounter order.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => out.push(reference),
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Ref(reference) = part {
                        out.push(reference);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            Self::Secret(inner) => inner.collect_references(out),
        }
    }

    /// Resolves the value using `lookup` for references and `salt` for secret digests.
    ///
    /// # Errors
    ///
    /// Returns the first reference that `lookup` could not resolve.
    pub fn resolve<F>(&self, lookup: &F, salt: &str) -> Result<Resolved, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Ok(Resolved {
                plain: value.clone(),
                sanitized: value.clone(),
            }),
            Self::Ref(reference) => {
                let value = lookup(reference).ok_or_else(|| reference.clone())?;
                Ok(Resolved {
                    plain: value.clone(),
                    sanitized: value,
                })
            }
            Self::Template(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(literal) => text.push_str(literal),
                        TemplatePart::Ref(reference) => {
                            let value = lookup(reference).ok_or_else(|| reference.clone())?;
                            text.push_str(&render_scalar(&value));
                        }
                    }
                }
                Ok(Resolved {
                    plain: Value::String(text.clone()),
                    sanitized: Value::String(text),
                })
            }
            Self::List(items) => {
                let mut plain = Vec::with_capacity(items.len());
                let mut sanitized = Vec::with_capacity(items.len());
                for item in items {
                    let resolved = item.resolve(lookup, salt)?;
                    plain.push(resolved.plain);
                    sanitized.push(resolved.sanitized);
                }
                Ok(Resolved {
                    plain: Value::Array(plain),
                    sanitized: Value::Array(sanitized),
                })
            }
            Self::Map(entries) => {
                let (plain, sanitized) = resolve_entries(entries, lookup, salt)?;
                Ok(Resolved {
                    plain: Value::Object(plain),
                    sanitized: Value::Object(sanitized),
                })
            }
            Self::Secret(inner) => {
                let resolved = inner.resolve(lookup, salt)?;
                Ok(Resolved {
                    sanitized: secret_digest(salt, &resolved.plain),
                    plain: resolved.plain,
                })
            }
        }
    }
}

/// Resolves a map of inputs into plain and sanitized output maps.
///
/// # Errors
///
/// Returns the first unresolvable reference.
pub fn resolve_entries<F>(
    entries: &BTreeMap<String, InputValue>,
    lookup: &F,
    salt: &str,
) -> Result<(Outputs, Outputs), Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut plain = Outputs::new();
    let mut sanitized = Outputs::new();
    for (key, value) in entries {
        let resolved = value.resolve(lookup, salt)?;
        plain.insert(key.clone(), resolved.plain);
        sanitized.insert(key.clone(), resolved.sanitized);
    }
    Ok((plain, sanitized))
}

/// Generates a fresh salt for secret digests.
#[must_use]
pub fn generate_secret_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Replaces a secret value by a digest of `salt` and its serialized form.
#[must_use]
pub fn secret_digest(salt: &str, value: &Value) -> Value {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.to_string().as_bytes());
    let mut marker = Outputs::new();
    marker.insert(
        SECRET_MARKER.to_string(),
        Value::String(format!("sha256:{}", hex::encode(hasher.finalize()))),
    );
    Value::Object(marker)
}

/// Returns true if a sanitized value is a secret digest.
#[must_use]
pub fn is_secret_digest(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(SECRET_MARKER))
}

/// Renders a value for string interpolation.
#[must_use]
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Splits a string into text, `${node.field}` and `${config:key}` segments.
///
/// `$${` produces a literal `${`.
///
/// # Errors
///
/// Returns an error for an unterminated or malformed interpolation.
pub fn parse_interpolated(text: &str) -> Result<Vec<Segment>, GraphError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        if start > 0 && rest[..start].ends_with('$') {
            literal.push_str(&rest[..start - 1]);
            literal.push_str("${");
            rest = &rest[start + 2..];
            continue;
        }

        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| GraphError::InvalidReference {
            expression: text.to_string(),
            message: String::from("unterminated '${'"),
        })?;
        let expression = after[..end].trim();

        if !literal.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut literal)));
        }

        if let Some(key) = expression.strip_prefix("config:") {
            if key.trim().is_empty() {
                return Err(GraphError::InvalidReference {
                    expression: expression.to_string(),
                    message: String::from("configuration key is empty"),
                });
            }
            segments.push(Segment::Config(key.trim().to_string()));
        } else {
            segments.push(Segment::Ref(Reference::parse(expression)?));
        }

        rest = &after[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> Outputs {
        let mut out = Outputs::new();
        out.insert("name".into(), json!("pulumi-tech"));
        out.insert(
            "primaryEndpoints".into(),
            json!({ "web": "https://acct.z6.web.core.windows.net/" }),
        );
        out
    }

    #[test]
    fn test_reference_parse_and_nested_lookup() {
        let reference = Reference::parse("storage.primaryEndpoints.web").unwrap();
        assert_eq!(reference.node, "storage");
        assert_eq!(reference.field, "primaryEndpoints.web");

        let out = outputs();
        assert_eq!(
            reference.lookup(&out),
            Some(&json!("https://acct.z6.web.core.windows.net/"))
        );
        assert!(Reference::new("storage", "primaryEndpoints.blob").lookup(&out).is_none());
    }

    #[test]
    fn test_reference_parse_rejects_bad_input() {
        assert!(Reference::parse("nofield").is_err());
        assert!(Reference::parse(".field").is_err());
        assert!(Reference::parse("node.").is_err());
    }

    #[test]
    fn test_parse_interpolated_segments() {
        let segments = parse_interpolated("DOCKER|${image.imageName} as ${config:dockerhub:username}")
            .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("DOCKER|".into()),
                Segment::Ref(Reference::new("image", "imageName")),
                Segment::Text(" as ".into()),
                Segment::Config("dockerhub:username".into()),
            ]
        );
    }

    #[test]
    fn test_parse_interpolated_escape_and_errors() {
        assert_eq!(
            parse_interpolated("cost: $${x}").unwrap(),
            vec![Segment::Text("cost: ${x}".into())]
        );
        assert!(parse_interpolated("${unterminated").is_err());
    }

    #[test]
    fn test_template_resolution() {
        let value = InputValue::Template(vec![
            TemplatePart::Text("http://".into()),
            TemplatePart::Ref(Reference::new("webapp", "defaultHostName")),
        ]);
        let lookup = |r: &Reference| (r.node == "webapp").then(|| json!("timeapp.azurewebsites.net"));
        let resolved = value.resolve(&lookup, "").unwrap();
        assert_eq!(resolved.plain, json!("http://timeapp.azurewebsites.net"));
    }

    #[test]
    fn test_unresolved_reference_is_reported() {
        let value = InputValue::List(vec![
            InputValue::from("a"),
            InputValue::Ref(Reference::new("missing", "x")),
        ]);
        let none = |_: &Reference| -> Option<Value> { None };
        let err = value.resolve(&none, "").unwrap_err();
        assert_eq!(err, Reference::new("missing", "x"));
    }

    #[test]
    fn test_secret_is_sanitized() {
        let none = |_: &Reference| -> Option<Value> { None };
        let value = InputValue::secret("hunter2");
        let resolved = value.resolve(&none, "stack-a").unwrap();
        assert_eq!(resolved.plain, json!("hunter2"));
        assert!(is_secret_digest(&resolved.sanitized));
        assert!(!resolved.sanitized.to_string().contains("hunter2"));

        let again = InputValue::secret("hunter2").resolve(&none, "stack-a").unwrap();
        assert_eq!(resolved.sanitized, again.sanitized);
    }

    #[test]
    fn test_secret_digest_depends_on_salt() {
        let secret = json!("hunter2");
        let unsalted = {
            let mut hasher = Sha256::new();
            hasher.update(secret.to_string().as_bytes());
            format!("sha256:{}", hex::encode(hasher.finalize()))
        };

        let a = secret_digest("stack-a", &secret);
        let b = secret_digest("stack-b", &secret);
        assert_ne!(a, b);
        assert_ne!(a[SECRET_MARKER], json!(unsalted));
        assert_ne!(generate_secret_salt(), generate_secret_salt());
    }
}

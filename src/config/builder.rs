//! Turns a parsed stack file into a node registry.
//!
//! Strings are scanned for interpolations. A string that is exactly one
//! `${node.field}` becomes a whole-value reference and keeps the producer's
//! JSON type; anything mixing text and references becomes a template.
//! `${config:key}` is substituted immediately, and any value touching a secret
//! configuration entry is wrapped as a secret as a whole.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;
use crate::model::{
    InputValue, NodeOptions, NodeRegistry, Segment, TemplatePart, parse_interpolated,
    render_scalar,
};

use super::spec::StackConfig;
use super::values::ConfigValues;

/// Builds the node registry declared by a stack.
///
/// # Errors
///
/// Returns an error for duplicate names, malformed interpolations or
/// configuration keys that are not set.
pub fn build_registry(config: &StackConfig, values: &ConfigValues) -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();

    for resource in &config.resources {
        let mut inputs = BTreeMap::new();
        for (key, raw) in &resource.inputs {
            inputs.insert(key.clone(), to_input(raw, values)?);
        }

        registry.declare_with(
            resource.name.clone(),
            resource.resource_type.clone(),
            inputs,
            NodeOptions {
                protect: resource.protect,
                best_effort: resource.best_effort,
                depends_on: resource.depends_on.clone(),
            },
        )?;
    }

    for (name, raw) in &config.exports {
        registry.export(name.clone(), to_input(raw, values)?);
    }

    debug!(
        "Built registry with {} resources and {} exports",
        registry.len(),
        registry.exports().len()
    );
    Ok(registry)
}

/// Converts one raw stack value into an input value.
///
/// # Errors
///
/// Returns an error for malformed interpolations or missing configuration.
pub fn to_input(raw: &Value, values: &ConfigValues) -> Result<InputValue> {
    match raw {
        Value::String(text) => string_input(text, values),
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| to_input(item, values))
                .collect::<Result<Vec<_>>>()?;
            Ok(InputValue::List(items))
        }
        Value::Object(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), to_input(value, values)?);
            }
            Ok(InputValue::Map(map))
        }
        other => Ok(InputValue::Literal(other.clone())),
    }
}

fn string_input(text: &str, values: &ConfigValues) -> Result<InputValue> {
    let mut segments = parse_interpolated(text)?;

    if segments.len() == 1 {
        return match segments.remove(0) {
            Segment::Text(literal) => Ok(InputValue::Literal(Value::String(literal))),
            Segment::Ref(reference) => Ok(InputValue::Ref(reference)),
            Segment::Config(key) => {
                let entry = values.require(&key)?;
                let literal = InputValue::Literal(entry.value.clone());
                Ok(if entry.secret {
                    InputValue::secret(literal)
                } else {
                    literal
                })
            }
        };
    }

    if segments.is_empty() {
        return Ok(InputValue::Literal(Value::String(String::new())));
    }

    let mut parts: Vec<TemplatePart> = Vec::with_capacity(segments.len());
    let mut secret = false;

    for segment in segments {
        match segment {
            Segment::Text(literal) => push_text(&mut parts, &literal),
            Segment::Ref(reference) => parts.push(TemplatePart::Ref(reference)),
            Segment::Config(key) => {
                let entry = values.require(&key)?;
                secret |= entry.secret;
                push_text(&mut parts, &render_scalar(&entry.value));
            }
        }
    }

    let input = match parts.as_slice() {
        [TemplatePart::Text(literal)] => InputValue::Literal(Value::String(literal.clone())),
        _ => InputValue::Template(parts),
    };

    Ok(if secret { InputValue::secret(input) } else { input })
}

/// Appends text, merging with a preceding text part.
fn push_text(parts: &mut Vec<TemplatePart>, text: &str) {
    if let Some(TemplatePart::Text(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(TemplatePart::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{ConfigError, QuickstackError};
    use crate::model::Reference;
    use serde_json::json;

    fn values() -> ConfigValues {
        let mut values = ConfigValues::default();
        values.insert("dockerhub:username", json!("pulumibot"), false);
        values.insert("dockerhub:password", json!("hunter2"), true);
        values
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let input = to_input(&json!("${storage.primaryEndpoints.web}"), &values()).unwrap();
        assert_eq!(
            input,
            InputValue::Ref(Reference::new("storage", "primaryEndpoints.web"))
        );
    }

    #[test]
    fn test_template_with_config_and_reference() {
        let input = to_input(
            &json!("DOCKER|${config:dockerhub:username}/${image.tag}"),
            &values(),
        )
        .unwrap();
        assert_eq!(
            input,
            InputValue::Template(vec![
                TemplatePart::Text(String::from("DOCKER|pulumibot/")),
                TemplatePart::Ref(Reference::new("image", "tag")),
            ])
        );
    }

    #[test]
    fn test_config_only_template_is_literal() {
        let input = to_input(&json!("${config:dockerhub:username}/node-app"), &values()).unwrap();
        assert_eq!(input, InputValue::Literal(json!("pulumibot/node-app")));
    }

    #[test]
    fn test_secret_config_wraps_value() {
        let whole = to_input(&json!("${config:dockerhub:password}"), &values()).unwrap();
        assert!(matches!(whole, InputValue::Secret(_)));

        let nested = to_input(
            &json!({ "registry": { "password": "pw=${config:dockerhub:password}" } }),
            &values(),
        )
        .unwrap();
        assert!(nested.is_secret());
    }

    #[test]
    fn test_missing_config_key() {
        let err = to_input(&json!("${config:azure:location}"), &values()).unwrap_err();
        assert!(matches!(
            err,
            QuickstackError::Config(ConfigError::MissingConfig { ref key }) if key == "azure:location"
        ));
    }

    #[test]
    fn test_build_registry_from_stack() {
        let yaml = r#"
project:
  name: quickstart
resources:
  - name: rg
    type: echo
  - name: webapp
    type: echo
    protect: true
    depends_on: [rg]
    inputs:
      plan: "${rg.name}"
exports:
  group: "${rg.name}"
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let registry = build_registry(&config, &ConfigValues::default()).unwrap();

        assert_eq!(registry.len(), 2);
        let webapp = registry.get("webapp").unwrap();
        assert!(webapp.options.protect);
        assert_eq!(webapp.dependencies(), vec![String::from("rg")]);
        assert_eq!(registry.exports().len(), 1);
    }

    #[test]
    fn test_duplicate_resource_name() {
        let yaml = "project:\n  name: q\nresources:\n  - name: a\n    type: echo\n  - name: a\n    type: echo\n";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let err = build_registry(&config, &ConfigValues::default()).unwrap_err();
        assert!(matches!(err, QuickstackError::Graph(_)));
    }
}

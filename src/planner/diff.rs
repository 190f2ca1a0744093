//! Diff engine for comparing desired inputs with the last applied inputs.
//!
//! Both sides are sanitized, so secrets compare by digest. A desired field
//! whose value depends on a resource that is about to change is unknown until
//! apply and always counts as a difference.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::Outputs;

/// Engine for computing input diffs.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// A desired field value at plan time.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedValue {
    /// Fully resolved (sanitized) value.
    Known(Value),
    /// Depends on an output that only exists after apply.
    Unknown,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a single differing field.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Last applied value.
    pub old_value: Option<Value>,
    /// Desired value; `None` if the field is being removed.
    pub new_value: Option<PlannedValue>,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Differing fields; empty for creates, deletes and unchanged resources.
    pub details: Vec<DiffDetail>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compares the desired fields of a resource with its last applied inputs.
    #[must_use]
    pub fn diff_resource(
        &self,
        name: &str,
        desired: &BTreeMap<String, PlannedValue>,
        previous: Option<&Outputs>,
    ) -> ResourceDiff {
        let Some(previous) = previous else {
            return ResourceDiff {
                name: name.to_string(),
                diff_type: DiffType::Create,
                details: Vec::new(),
            };
        };

        let details = Self::compare(desired, previous);
        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else {
            DiffType::Update
        };

        ResourceDiff {
            name: name.to_string(),
            diff_type,
            details,
        }
    }

    /// Builds the diff of a resource that is no longer declared.
    #[must_use]
    pub fn diff_removed(&self, name: &str) -> ResourceDiff {
        ResourceDiff {
            name: name.to_string(),
            diff_type: DiffType::Delete,
            details: Vec::new(),
        }
    }

    /// Field-by-field deep structural comparison.
    fn compare(desired: &BTreeMap<String, PlannedValue>, previous: &Outputs) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        for (field, planned) in desired {
            let old = previous.get(field);
            let changed = match planned {
                PlannedValue::Known(value) => old != Some(value),
                PlannedValue::Unknown => true,
            };
            if changed {
                details.push(DiffDetail {
                    field: field.clone(),
                    old_value: old.cloned(),
                    new_value: Some(planned.clone()),
                });
            }
        }

        for (field, old) in previous {
            if !desired.contains_key(field) {
                details.push(DiffDetail {
                    field: field.clone(),
                    old_value: Some(old.clone()),
                    new_value: None,
                });
            }
        }

        details.sort_by(|a, b| a.field.cmp(&b.field));
        details
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => write!(f, "(known after apply)"),
        }
    }
}

impl fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self
            .old_value
            .as_ref()
            .map_or_else(|| String::from("(none)"), Value::to_string);
        let new = self
            .new_value
            .as_ref()
            .map_or_else(|| String::from("(removed)"), ToString::to_string);
        write!(f, "{}: {old} -> {new}", self.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn previous() -> Outputs {
        let mut out = Outputs::new();
        out.insert("location".into(), json!("westeurope"));
        out.insert("tags".into(), json!({ "owner": "web", "tier": 1 }));
        out
    }

    fn desired(entries: &[(&str, PlannedValue)]) -> BTreeMap<String, PlannedValue> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_absent_previous_is_create() {
        let diff = DiffEngine::new().diff_resource("rg", &BTreeMap::new(), None);
        assert_eq!(diff.diff_type, DiffType::Create);
    }

    #[test]
    fn test_structural_equality_is_no_change() {
        let wanted = desired(&[
            ("location", PlannedValue::Known(json!("westeurope"))),
            ("tags", PlannedValue::Known(json!({ "tier": 1, "owner": "web" }))),
        ]);
        let diff = DiffEngine::new().diff_resource("rg", &wanted, Some(&previous()));
        assert_eq!(diff.diff_type, DiffType::NoChange);
        assert!(diff.details.is_empty());
    }

    #[test]
    fn test_changed_added_and_removed_fields() {
        let wanted = desired(&[
            ("location", PlannedValue::Known(json!("northeurope"))),
            ("sku", PlannedValue::Known(json!("B1"))),
        ]);
        let diff = DiffEngine::new().diff_resource("rg", &wanted, Some(&previous()));

        assert_eq!(diff.diff_type, DiffType::Update);
        let fields: Vec<&str> = diff.details.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["location", "sku", "tags"]);
        assert_eq!(diff.details[2].new_value, None);
    }

    #[test]
    fn test_unknown_value_always_differs() {
        let wanted = desired(&[
            ("location", PlannedValue::Known(json!("westeurope"))),
            ("tags", PlannedValue::Unknown),
        ]);
        let diff = DiffEngine::new().diff_resource("rg", &wanted, Some(&previous()));
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.details[0].to_string(), r#"tags: {"owner":"web","tier":1} -> (known after apply)"#);
    }
}

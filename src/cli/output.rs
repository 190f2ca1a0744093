//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::executor::{ExecutionResult, NodeOutcome, ReportSummary};
use crate::graph::DependencyGraph;
use crate::model::render_scalar;
use crate::planner::{ActionType, Plan};
use crate::reconciler::ReconciliationResult;
use crate::state::StackState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanEntryRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Waits for")]
    prerequisites: String,
}

/// Resource row for state display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if output is JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - resources are up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan\n");
        let _ = write!(output, "   Config hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanEntryRow> = plan
            .changes()
            .into_iter()
            .enumerate()
            .map(|(i, entry)| PlanEntryRow {
                index: i + 1,
                action: Self::format_action_type(entry.action),
                resource: entry.name.clone(),
                resource_type: entry.resource_type.clone(),
                prerequisites: entry.prerequisites.join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for entry in plan.changes() {
                if entry.changes.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "\n  {} {}", entry.action.symbol(), entry.name);
                for change in &entry.changes {
                    let _ = writeln!(output, "      {change}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red(),
            plan.count(ActionType::Noop)
        );
        output
    }

    /// Formats one execution result as a progress line.
    #[must_use]
    pub fn format_result(&self, result: &ExecutionResult) -> String {
        if self.is_json() {
            return serde_json::to_string(&ResultJson::from(result)).unwrap_or_default();
        }

        let marker = match &result.outcome {
            NodeOutcome::Succeeded { .. } => "✓".green(),
            NodeOutcome::Failed { tolerated: true, .. } => "!".yellow(),
            NodeOutcome::Failed { .. } => "✗".red(),
            NodeOutcome::Blocked { .. } => "⊘".yellow(),
            NodeOutcome::Cancelled => "-".dimmed(),
        };
        let timing = if result.duration.is_zero() {
            String::new()
        } else {
            format!(" ({:.1}s)", result.duration.as_secs_f64())
        };
        format!(
            "{marker} {} {} [{}] {}{timing}",
            result.action.symbol(),
            result.name,
            result.resource_type,
            result.outcome
        )
    }

    /// Formats the result of `up` or `destroy`.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ReconciliationJson {
                result,
                summary: ReportSummary::from(&result.report),
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let status = if result.success {
                    format!("{} Run successful", "✓".green())
                } else {
                    format!("{} Run failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                if result.blocked > 0 {
                    let _ = writeln!(output, "   Blocked: {}", result.blocked);
                }
                if result.cancelled > 0 {
                    let _ = writeln!(output, "   Cancelled: {}", result.cancelled);
                }

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if !result.outputs.is_empty() {
                    output.push('\n');
                    output.push_str(&Self::format_outputs_text(&result.outputs));
                }
                output
            }
        }
    }

    /// Formats stack outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outputs).unwrap_or_default(),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, Value>) -> String {
        if outputs.is_empty() {
            return String::from("No outputs.\n");
        }
        let width = outputs.keys().map(String::len).max().unwrap_or(0);
        let mut output = String::from("Outputs:\n");
        for (name, value) in outputs {
            let _ = writeln!(output, "   {name:<width$}  {}", render_scalar(value));
        }
        output
    }

    /// Formats the dependency graph by level.
    #[must_use]
    pub fn format_graph(&self, graph: &DependencyGraph) -> String {
        let levels = graph.levels();
        match self.format {
            OutputFormat::Json => {
                let order = graph.topological_order();
                let dependencies: BTreeMap<&str, Vec<&str>> = order
                    .iter()
                    .map(|&name| (name, graph.dependencies_of(name)))
                    .collect();
                let dependents: BTreeMap<&str, Vec<&str>> = order
                    .iter()
                    .map(|&name| (name, graph.dependents_of(name)))
                    .collect();
                serde_json::to_string_pretty(&serde_json::json!({
                    "order": order,
                    "levels": levels,
                    "dependencies": dependencies,
                    "dependents": dependents,
                }))
                .unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (depth, level) in levels.iter().enumerate() {
                    let _ = writeln!(output, "Level {depth}:");
                    for name in level {
                        let deps = graph.dependencies_of(name);
                        if deps.is_empty() {
                            let _ = writeln!(output, "   {name}");
                        } else {
                            let _ = writeln!(output, "   {name} <- {}", deps.join(", "));
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Stack file is valid", "✓".green());
        } else {
            let _ = writeln!(output, "{} {} error(s):", "✗".red(), result.error_count());
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }
        if show_warnings && result.warning_count() > 0 {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }
        output
    }

    /// Formats stack state.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());

                if !state.resources.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            name: if r.protect {
                                format!("{} (protected)", r.name)
                            } else {
                                r.name.clone()
                            },
                            resource_type: r.resource_type.clone(),
                            dependencies: r.dependencies.join(", "),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }
}

fn short(hash: &str) -> &str {
    &hash[..8.min(hash.len())]
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    config_hash: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    unchanged: usize,
    entries: Vec<EntryJson>,
}

#[derive(serde::Serialize)]
struct EntryJson {
    action: String,
    resource: String,
    resource_type: String,
    prerequisites: Vec<String>,
    changes: Vec<String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            deletes: plan.count(ActionType::Delete),
            unchanged: plan.count(ActionType::Noop),
            entries: plan
                .entries
                .iter()
                .map(|e| EntryJson {
                    action: e.action.to_string(),
                    resource: e.name.clone(),
                    resource_type: e.resource_type.clone(),
                    prerequisites: e.prerequisites.clone(),
                    changes: e.changes.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ReconciliationJson<'a> {
    #[serde(flatten)]
    result: &'a ReconciliationResult,
    summary: ReportSummary,
}

#[derive(serde::Serialize)]
struct ResultJson<'a> {
    resource: &'a str,
    resource_type: &'a str,
    action: String,
    outcome: &'static str,
    detail: String,
    duration_ms: u128,
}

impl<'a> From<&'a ExecutionResult> for ResultJson<'a> {
    fn from(result: &'a ExecutionResult) -> Self {
        Self {
            resource: &result.name,
            resource_type: &result.resource_type,
            action: result.action.to_string(),
            outcome: result.outcome.label(),
            detail: result.outcome.to_string(),
            duration_ms: result.duration.as_millis(),
        }
    }
}

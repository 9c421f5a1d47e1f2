//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use std::rc::Rc;
use tabled::{Table, Tabled};

use crate::converge::{ActionStatus, ConvergencePlan, RunReport};
use crate::instance::ResourceInstance;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Actions")]
    actions: String,
}

/// Report row for table display.
#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Actions")]
    actions: String,
}

/// Validated resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Set")]
    set: String,
    #[tabled(rename = "Policy")]
    policy: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the plans of a run.
    #[must_use]
    pub fn format_plans(&self, plans: &[ConvergencePlan], detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plans).unwrap_or_default(),
            OutputFormat::Text => Self::format_plans_text(plans, detailed),
        }
    }

    fn format_plans_text(plans: &[ConvergencePlan], detailed: bool) -> String {
        let pending: Vec<&ConvergencePlan> = plans.iter().filter(|p| !p.is_noop()).collect();
        if pending.is_empty() {
            return format!("{} No changes required - resources are up to date.\n", "✓".green());
        }

        let mut output = String::from("\nConvergence Plan\n\n");
        let rows: Vec<PlanRow> = pending
            .iter()
            .enumerate()
            .map(|(i, plan)| PlanRow {
                index: i + 1,
                resource: plan.resource.clone(),
                change: if plan.exists {
                    "~update".yellow().to_string()
                } else {
                    "+create".green().to_string()
                },
                actions: plan.triggered.join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for plan in &pending {
                let _ = writeln!(output, "\n{}", plan.resource.bold());
                for change in &plan.changes {
                    let _ = writeln!(
                        output,
                        "   {}: {} -> {}",
                        change.attribute,
                        Self::truncate(&change.observed.to_string(), 40).red(),
                        Self::truncate(&change.desired.to_string(), 40).green()
                    );
                }
            }
        }

        let creates = pending.iter().filter(|p| !p.exists).count();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged\n",
            creates.to_string().green(),
            (pending.len() - creates).to_string().yellow(),
            plans.len() - pending.len()
        );
        output
    }

    /// Formats the report of a run.
    #[must_use]
    pub fn format_run(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if report.success {
                    format!("{} Convergence successful", "✓".green())
                } else {
                    format!("{} Convergence failed", "✗".red())
                };
                let mut output = format!("{status}\n\n");

                let rows: Vec<ReportRow> = report
                    .reports
                    .iter()
                    .map(|r| ReportRow {
                        resource: r.resource.clone(),
                        state: r.state.to_string(),
                        actions: r
                            .actions
                            .iter()
                            .map(|a| match a.status {
                                ActionStatus::Executed => a.action.green().to_string(),
                                ActionStatus::Warned => a.action.yellow().to_string(),
                                ActionStatus::Failed => a.action.red().to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let _ = writeln!(output, "\n   Changed: {}", report.changed_count());
                let _ = writeln!(output, "   Actions executed: {}", report.executed_count());

                let warnings: Vec<String> = report
                    .reports
                    .iter()
                    .flat_map(|r| r.warnings.iter().map(move |w| format!("{}: {w}", r.resource)))
                    .collect();
                if !warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                if !report.failures.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "✗".red());
                    for error in &report.failures {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if !report.not_attempted.is_empty() {
                    let _ = writeln!(output, "\n   Not attempted: {}", report.not_attempted.join(", "));
                }
                output
            }
        }
    }

    /// Formats the resources resolved from a manifest.
    #[must_use]
    pub fn format_resources(&self, instances: &[Rc<ResourceInstance>]) -> String {
        match self.format {
            OutputFormat::Json => {
                let resources: Vec<serde_json::Value> = instances
                    .iter()
                    .map(|i| {
                        serde_json::json!({
                            "resource": i.display_name(),
                            "set": i.dirty_attributes(),
                            "policy": i.policy(),
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&resources).unwrap_or_default()
            }
            OutputFormat::Text => {
                let rows: Vec<ResourceRow> = instances
                    .iter()
                    .map(|i| {
                        let policy = i.policy();
                        let mut flags = Vec::new();
                        if policy.never_remove {
                            flags.push("never_remove");
                        }
                        if policy.permission_error_acceptable {
                            flags.push("permission_error_acceptable");
                        }
                        ResourceRow {
                            resource: i.display_name(),
                            set: i.dirty_attributes().join(", "),
                            policy: flags.join(", "),
                        }
                    })
                    .collect();
                format!(
                    "{} Manifest is valid ({} resource(s))\n\n{}\n",
                    "✓".green(),
                    instances.len(),
                    Table::new(rows)
                )
            }
        }
    }

    /// Formats a plain message.
    #[must_use]
    pub fn message(&self, status: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => message.to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

//! Run, store and health reports.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::LogCheck;
use crate::config::StoreConfig;
use crate::copier::CopyReport;
use crate::drain::{CopyMethod, DrainReport};
use crate::error::Result;

/// What happened to one store.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StoreOutcome {
    Drained(DrainReport),
    /// Nothing to migrate; counts as success.
    Skipped {
        store: String,
        database: String,
        reason: String,
    },
    /// The destination database could not be recreated, so no drain ran.
    ResetFailed {
        store: String,
        database: String,
        error: String,
    },
}

impl StoreOutcome {
    pub fn store(&self) -> &str {
        match self {
            StoreOutcome::Drained(r) => &r.store,
            StoreOutcome::Skipped { store, .. } | StoreOutcome::ResetFailed { store, .. } => store,
        }
    }

    pub fn database(&self) -> &str {
        match self {
            StoreOutcome::Drained(r) => &r.database,
            StoreOutcome::Skipped { database, .. }
            | StoreOutcome::ResetFailed { database, .. } => database,
        }
    }

    pub fn succeeded(&self) -> bool {
        match self {
            StoreOutcome::Drained(r) => r.succeeded(),
            StoreOutcome::Skipped { .. } => true,
            StoreOutcome::ResetFailed { .. } => false,
        }
    }

    /// One-line status for logs and the text report.
    pub fn status(&self) -> String {
        match self {
            StoreOutcome::Drained(r) if r.succeeded() => {
                let mut line = format!("{} transactions", r.transactions_copied);
                if r.transactions_skipped > 0 {
                    let _ = write!(line, " ({} already present)", r.transactions_skipped);
                }
                if let Some(method) = r.method {
                    let _ = write!(line, " via {}", method_label(method));
                }
                if let Some(c) = r.counts {
                    let _ = write!(
                        line,
                        "; {} transactions, {} object states, {} current objects",
                        c.transactions, c.object_states, c.current_objects
                    );
                }
                if let Some(size) = &r.database_size {
                    let _ = write!(line, "; {}", size);
                }
                line
            }
            StoreOutcome::Drained(r) => format!(
                "failed while {}: {}",
                r.state,
                r.error.as_deref().unwrap_or("unknown error")
            ),
            StoreOutcome::Skipped { reason, .. } => format!("skipped: {}", reason),
            StoreOutcome::ResetFailed { error, .. } => format!("reset failed: {}", error),
        }
    }
}

fn method_label(method: CopyMethod) -> &'static str {
    match method {
        CopyMethod::TunedSession => "tuned session",
        CopyMethod::MinimalSession => "minimal session",
        CopyMethod::ExternalTool => "external tool",
    }
}

/// Outcome of the opt-in table copy.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyStep {
    /// Not requested; counts as success.
    Skipped { reason: String },
    Completed(CopyReport),
    Failed { error: String },
}

impl CopyStep {
    pub fn succeeded(&self) -> bool {
        match self {
            CopyStep::Skipped { .. } => true,
            CopyStep::Completed(r) => r.is_success(),
            CopyStep::Failed { .. } => false,
        }
    }

    pub fn status(&self) -> String {
        match self {
            CopyStep::Skipped { reason } => format!("skipped ({})", reason),
            CopyStep::Completed(r) => r.summary(),
            CopyStep::Failed { error } => format!("failed: {}", error),
        }
    }
}

/// Result of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub databases_reset: Vec<String>,
    pub logs: Vec<LogCheck>,
    pub stores: Vec<StoreOutcome>,
    pub copy: CopyStep,
    /// Every store and the copy step succeeded.
    pub success: bool,
    /// Post-migration advice for the operator.
    pub guidance: Vec<String>,
    /// Steps to take when something failed.
    pub remediation: Vec<String>,
}

impl MigrationReport {
    pub fn new(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            completed_at: started_at,
            duration_secs: 0.0,
            databases_reset: Vec::new(),
            logs: Vec::new(),
            stores: Vec::new(),
            copy: CopyStep::Skipped {
                reason: "not run".to_string(),
            },
            success: false,
            guidance: Vec::new(),
            remediation: Vec::new(),
        }
    }

    /// Aggregate the outcomes and fill in guidance.
    pub fn finish(&mut self, elapsed: Duration, stores: &[StoreConfig]) {
        self.completed_at = Utc::now();
        self.duration_secs = elapsed.as_secs_f64();
        self.success = self.stores.iter().all(StoreOutcome::succeeded) && self.copy.succeeded();
        self.guidance = guidance(&self.stores, stores);
        self.remediation = if self.success {
            Vec::new()
        } else {
            remediation(self)
        };
    }

    /// Names of stores that did not succeed.
    pub fn failed_stores(&self) -> Vec<&str> {
        self.stores
            .iter()
            .filter(|s| !s.succeeded())
            .map(StoreOutcome::store)
            .collect()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text report for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Migration {} in {:.1}s (run {})",
            if self.success { "succeeded" } else { "FAILED" },
            self.duration_secs,
            self.run_id
        );
        if !self.databases_reset.is_empty() {
            let _ = writeln!(out, "Recreated databases: {}", self.databases_reset.join(", "));
        }
        let _ = writeln!(out, "\nStores:");
        for store in &self.stores {
            let _ = writeln!(
                out,
                "  [{}] {} -> {}: {}",
                if store.succeeded() { " OK " } else { "FAIL" },
                store.store(),
                store.database(),
                store.status()
            );
            if let StoreOutcome::Drained(r) = store {
                for warning in &r.warnings {
                    let _ = writeln!(out, "         warning: {}", warning);
                }
            }
        }
        let _ = writeln!(out, "\nManual data copy: {}", self.copy.status());
        if let CopyStep::Completed(r) = &self.copy {
            for (table, error) in &r.tables_failed {
                let _ = writeln!(out, "  {}: {}", table, error);
            }
        }

        if !self.guidance.is_empty() {
            let _ = writeln!(out, "\nNext steps:");
            for line in &self.guidance {
                let _ = writeln!(out, "  - {}", line);
            }
        }
        if !self.remediation.is_empty() {
            let _ = writeln!(out, "\nTo recover:");
            for line in &self.remediation {
                let _ = writeln!(out, "  - {}", line);
            }
        }
        out
    }
}

fn guidance(outcomes: &[StoreOutcome], stores: &[StoreConfig]) -> Vec<String> {
    let drained: Vec<&str> = outcomes
        .iter()
        .filter(|o| matches!(o, StoreOutcome::Drained(r) if r.succeeded()))
        .map(StoreOutcome::database)
        .collect();
    if drained.is_empty() {
        return Vec::new();
    }

    let mut lines = vec![
        format!(
            "{} now keep full object history; point the application at them with history kept on",
            drained.join(", ")
        ),
        "Validate the application against the migrated data before changing storage settings"
            .to_string(),
    ];
    for store in stores {
        if !store.keep_history_after && drained.contains(&store.database.as_str()) {
            lines.push(format!(
                "{}: once validated, switch {} to history-free storage and pack it",
                store.name, store.database
            ));
        }
    }
    lines
}

fn remediation(report: &MigrationReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report
        .stores
        .iter()
        .any(|s| matches!(s, StoreOutcome::ResetFailed { .. }))
    {
        lines.push(
            "Check that the admin user may drop and create databases and roles".to_string(),
        );
    }
    let drain_failed = report
        .stores
        .iter()
        .any(|s| matches!(s, StoreOutcome::Drained(r) if !r.succeeded()));
    if drain_failed {
        lines.push(
            "Confirm the destination server is reachable and the role credentials are valid"
                .to_string(),
        );
        lines.push(
            "If a log was reported as damaged, repair it with the storage recovery tool first"
                .to_string(),
        );
    }
    if !report.copy.succeeded() {
        lines.push(
            "Re-run the copy; existing rows are ignored, so completed tables are not duplicated"
                .to_string(),
        );
    }
    lines.push(
        "Re-run the migration; drains resume after the last committed transaction".to_string(),
    );
    lines
}

/// Reachability of one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub target: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EndpointHealth {
    pub fn from_result(name: &str, target: String, result: Result<Duration>) -> Self {
        match result {
            Ok(latency) => Self {
                name: name.to_string(),
                target,
                ok: true,
                latency_ms: Some(latency.as_millis() as u64),
                error: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                target,
                ok: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result of the health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub endpoints: Vec<EndpointHealth>,
}

impl HealthReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.endpoints {
            match (e.latency_ms, &e.error) {
                (Some(ms), _) => {
                    let _ = writeln!(out, "{:<12} {:<40} OK ({} ms)", e.name, e.target, ms);
                }
                (None, error) => {
                    let _ = writeln!(
                        out,
                        "{:<12} {:<40} FAILED: {}",
                        e.name,
                        e.target,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        let _ = writeln!(out, "Status: {}", if self.healthy { "healthy" } else { "unhealthy" });
        out
    }
}

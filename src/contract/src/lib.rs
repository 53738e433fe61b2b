// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2026 Grype Quality Team

//! Gate Contract - Validation runs, aggregation and reporting
//!
//! This crate drives the quality gate end to end:
//! - **Configuration**: which result sets to validate and the gate policy (`GateConfig`)
//! - **Driver**: one validation run per result set (`Driver::validate`)
//! - **Aggregation**: the overall verdict and exit status (`GateSummary`)
//! - **Reporting**: the console report (`TextRenderer`) and a JSON report (`GateReport`)
//!
//! The gate decision itself lives in `gate_oracle`. Nothing here may turn
//! an error into a passing verdict.

use chrono::{DateTime, Utc};
use colored::Colorize;
use gate_oracle::{Gate, GateError, GatePolicy, Oracle, Reason, ScanConfig};
use label_comparison::{
    CompareError, ComparisonBackend, Label, LabelComparisonOutput, RelativeComparison, ScanResult,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// EXIT CODES
// ============================================================================

/// Every validation run passed
pub const EXIT_PASSED: i32 = 0;

/// At least one validation run failed the gate
pub const EXIT_FAILED: i32 = 1;

/// A run could not be evaluated
pub const EXIT_ERROR: i32 = 2;

/// Report schema identifier
pub const REPORT_SCHEMA: &str = "quality-gate-report-v1";

// ============================================================================
// CONFIGURATION
// ============================================================================

pub const DEFAULT_RESULT_SET: &str = "pr-vs-latest-via-image";

pub const DEFAULT_STORE: &str = ".quality-gate/result-sets";

/// Process-wide gate configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Result sets to validate, in order
    pub result_sets: Vec<String>,

    /// Directory holding one `<result set>.json` document per result set
    pub store: PathBuf,

    /// Thresholds applied by the oracle
    pub policy: GatePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            result_sets: vec![DEFAULT_RESULT_SET.to_string()],
            store: PathBuf::from(DEFAULT_STORE),
            policy: GatePolicy::default(),
        }
    }
}

impl GateConfig {
    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ContractError> {
        debug!(path = %path.display(), "loading gate configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<(), ContractError> {
        if self.result_sets.is_empty() {
            return Err(ContractError::Config(
                "no result sets configured".to_string(),
            ));
        }
        if let Some(name) = self.result_sets.iter().find(|name| name.trim().is_empty()) {
            return Err(ContractError::Config(format!(
                "invalid result set name: {:?}",
                name
            )));
        }
        let ceiling = self.policy.max_indeterminate_percent;
        if !ceiling.is_finite() || !(0.0..=100.0).contains(&ceiling) {
            return Err(ContractError::Config(format!(
                "max_indeterminate_percent must be within 0-100, got {}",
                ceiling
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("comparison failed: {0}")]
    Compare(#[from] CompareError),

    #[error("quality gate could not be evaluated: {0}")]
    Gate(#[from] GateError),

    #[error("no label comparison for result {0:?}")]
    MissingLabelComparison(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// RUN REPORTS
// ============================================================================

/// A scan result that took part in a comparison
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultUsed {
    pub id: String,
    pub config: ScanConfig,
}

impl ResultUsed {
    fn from_results(results: &[ScanResult]) -> Vec<Self> {
        results
            .iter()
            .map(|r| Self {
                id: r.id.clone(),
                config: r.config.clone(),
            })
            .collect()
    }
}

/// One match found by only one tool, with its ground-truth label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffRow {
    pub tool_partition: String,
    pub package: String,
    pub vulnerability: String,
    pub label: String,
}

impl DiffRow {
    pub fn cells(&self) -> [&str; 4] {
        [
            &self.tool_partition,
            &self.package,
            &self.vulnerability,
            &self.label,
        ]
    }

    fn style(&self) -> RowStyle {
        if self.label == Label::TruePositive.name() {
            RowStyle::TruePositive
        } else if self.label.contains(Label::FalsePositive.name()) {
            RowStyle::FalsePositive
        } else {
            RowStyle::Plain
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStyle {
    Plain,
    TruePositive,
    FalsePositive,
}

/// Display text for the labels attached to a match
pub fn label_text(labels: &[Label]) -> String {
    let mut distinct = labels.to_vec();
    distinct.sort();
    distinct.dedup();

    match (labels.first(), distinct.len()) {
        (None, _) => "(unknown)".to_string(),
        (Some(label), 1) => label.name().to_string(),
        _ => labels
            .iter()
            .map(Label::name)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Outcome of one validation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub result_set: String,

    /// (tool, image) requests covered by the result set
    pub requests: Vec<ScanConfig>,

    /// Results used by the relative comparison
    pub results_used: Vec<ResultUsed>,

    /// Results used by the label comparison; `None` when it was skipped
    pub label_results_used: Option<Vec<ResultUsed>>,

    /// Unique matches with labels, sorted by `sort_key`
    pub differences: Vec<DiffRow>,

    pub gate: Gate,
}

impl RunReport {
    pub fn has_differences(&self) -> bool {
        !self.differences.is_empty()
    }

    pub fn passed(&self) -> bool {
        self.gate.passed()
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Runs validations against a comparison backend
pub struct Driver<'a, B: ComparisonBackend> {
    backend: &'a B,
    config: &'a GateConfig,
    oracle: Oracle,
}

impl<'a, B: ComparisonBackend> Driver<'a, B> {
    pub fn new(backend: &'a B, config: &'a GateConfig) -> Self {
        Self {
            backend,
            config,
            oracle: Oracle::new(config.policy),
        }
    }

    /// Validate a single named result set
    pub fn validate(&self, result_set: &str) -> Result<RunReport, ContractError> {
        info!(result_set, "validating result set");
        let set = self.backend.load_result_set(result_set)?;

        let relative = self.backend.compare_results(&set.descriptions)?;
        let results_used = ResultUsed::from_results(&relative.results);

        if relative.total_unique() == 0 {
            info!(result_set, "no differences found between tool results");
            return Ok(RunReport {
                result_set: set.name,
                requests: set.state,
                results_used,
                label_results_used: None,
                differences: Vec::new(),
                gate: Gate::vacuous(),
            });
        }

        let labels = self
            .backend
            .compare_results_against_labels(&set.descriptions)?;
        let differences = diff_rows(&relative, &labels)?;
        let gate = self.oracle.evaluate(&labels.comparisons(), &labels.stats)?;

        if gate.passed() {
            info!(result_set, differences = differences.len(), "quality gate passed");
        } else {
            warn!(
                result_set,
                reasons = gate.reasons().len(),
                "quality gate failed"
            );
        }

        Ok(RunReport {
            result_set: set.name,
            requests: set.state,
            results_used,
            label_results_used: Some(ResultUsed::from_results(&labels.results)),
            differences,
            gate,
        })
    }

    /// Validate every configured result set in order. The first error aborts.
    pub fn run_all(&self) -> Result<Vec<RunReport>, ContractError> {
        self.config
            .result_sets
            .iter()
            .map(|name| self.validate(name))
            .collect()
    }
}

/// Unique matches in result order; the table renderer sorts them
fn diff_rows(
    relative: &RelativeComparison,
    labels: &LabelComparisonOutput,
) -> Result<Vec<DiffRow>, ContractError> {
    let mut rows = Vec::new();
    for result in &relative.results {
        let comparison = labels
            .get(&result.id)
            .ok_or_else(|| ContractError::MissingLabelComparison(result.id.clone()))?;

        for unique in relative.unique_for(&result.id) {
            rows.push(DiffRow {
                tool_partition: format!("{} ONLY", result.config.tool),
                package: format!("{}@{}", unique.package.name, unique.package.version),
                vulnerability: unique.vulnerability.id.clone(),
                label: label_text(comparison.labels_for(unique)),
            });
        }
    }

    Ok(rows)
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunVerdict {
    pub result_set: String,
    pub passed: bool,
    pub reasons: Vec<String>,
}

/// Overall verdict across every validation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateSummary {
    pub passed: bool,
    pub runs: Vec<RunVerdict>,
    /// Reasons of every run, in run order
    pub reasons: Vec<String>,
}

impl GateSummary {
    pub fn from_reports(reports: &[RunReport]) -> Self {
        let runs: Vec<RunVerdict> = reports
            .iter()
            .map(|report| RunVerdict {
                result_set: report.result_set.clone(),
                passed: report.passed(),
                reasons: report.gate.messages(),
            })
            .collect();

        Self {
            passed: runs.iter().all(|run| run.passed),
            reasons: runs.iter().flat_map(|run| run.reasons.clone()).collect(),
            runs,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed {
            EXIT_PASSED
        } else {
            EXIT_FAILED
        }
    }
}

/// Machine-readable report of a whole gate invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub schema: String,
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: GateSummary,
    pub runs: Vec<RunReport>,
}

impl GateReport {
    pub fn new(runs: Vec<RunReport>) -> Self {
        Self {
            schema: REPORT_SCHEMA.to_string(),
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            summary: GateSummary::from_reports(&runs),
            runs,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ============================================================================
// TERMINAL STYLING
// ============================================================================

fn ansi_escape() -> &'static Regex {
    static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();
    ANSI_ESCAPE.get_or_init(|| {
        Regex::new(r"(?:\x1B[@-_]|[\x{80}-\x{9F}])[0-?]*[ -/]*[@-~]")
            .expect("ANSI escape pattern is valid")
    })
}

/// Remove terminal escape sequences
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_escape().replace_all(text, "")
}

/// Sort key for a table row: the concatenated cells without styling
pub fn sort_key<S: AsRef<str>>(cells: &[S]) -> String {
    let joined: String = cells.iter().map(AsRef::as_ref).collect();
    strip_ansi(&joined).into_owned()
}

fn visible_width(text: &str) -> usize {
    strip_ansi(text).chars().count()
}

/// Left-aligned plain table; widths ignore styling
pub fn render_table(indent: &str, rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| visible_width(cell))
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let mut line = String::from(indent);
            for (col, cell) in row.iter().enumerate() {
                if col > 0 {
                    line.push_str("  ");
                }
                line.push_str(cell);
                let pad = widths[col].saturating_sub(visible_width(cell));
                line.extend(std::iter::repeat(' ').take(pad));
            }
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// TEXT RENDERING
// ============================================================================

const INDENT: &str = "   ";

/// Console report, optionally colored
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    color: bool,
}

impl TextRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn header(&self, text: &str) -> String {
        if self.color {
            text.bright_magenta().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn emphasis(&self, text: &str) -> String {
        if self.color {
            text.bold().underline().to_string()
        } else {
            text.to_string()
        }
    }

    fn row_cell(&self, style: RowStyle, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        match style {
            RowStyle::Plain => text.to_string(),
            RowStyle::TruePositive => text.bright_blue().to_string(),
            RowStyle::FalsePositive => text.bright_yellow().to_string(),
        }
    }

    fn results_used(&self, results: &[ResultUsed]) -> String {
        let mut out = format!("{}Results used:\n", INDENT);
        for (idx, result) in results.iter().enumerate() {
            let branch = if idx + 1 == results.len() {
                "└──"
            } else {
                "├──"
            };
            out.push_str(&format!(
                "    {} {} : {} against {}\n",
                branch, result.id, result.config.tool, result.config.image
            ));
        }
        out
    }

    /// Differences table, rows ordered by `sort_key` of the styled cells
    pub fn differences_table(&self, rows: &[DiffRow]) -> String {
        let mut styled: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                let style = row.style();
                row.cells()
                    .iter()
                    .map(|cell| self.row_cell(style, cell))
                    .collect()
            })
            .collect();
        styled.sort_by_cached_key(|cells| sort_key(cells));

        let mut table = vec![vec![
            "TOOL PARTITION".to_string(),
            "PACKAGE".to_string(),
            "VULNERABILITY".to_string(),
            "LABEL".to_string(),
        ]];
        table.extend(styled);
        render_table(INDENT, &table)
    }

    /// Everything printed for one validation run
    pub fn render_run(&self, report: &RunReport) -> String {
        let mut out = String::new();

        out.push_str(&self.header(&format!("Validating with {:?}", report.result_set)));
        out.push('\n');
        for request in &report.requests {
            out.push_str(&format!(
                "    with {} against {}\n",
                request.tool, request.image
            ));
        }
        out.push('\n');

        out.push_str(&self.header("Running relative comparison..."));
        out.push('\n');
        out.push_str(&self.results_used(&report.results_used));
        out.push('\n');

        let Some(label_results) = &report.label_results_used else {
            out.push_str("no differences found between tool results\n");
            return out;
        };

        out.push_str(&self.header("Running comparison against labels..."));
        out.push('\n');
        out.push_str(&self.results_used(label_results));
        out.push('\n');

        out.push_str("Match differences between tooling (with labels):\n");
        out.push_str(&self.differences_table(&report.differences));
        out.push_str("\n\n");
        out
    }

    fn reason(&self, reason: &Reason) -> String {
        format!(
            "{}: {} image={}",
            reason.summary(),
            self.emphasis(&reason.values()),
            reason.image()
        )
    }

    /// Failure reasons and the final banner
    pub fn render_summary(&self, reports: &[RunReport]) -> String {
        let summary = GateSummary::from_reports(reports);
        let mut out = String::new();

        if !summary.passed {
            out.push_str("Reasons for quality gate failure:\n");
        }
        for report in reports {
            for reason in report.gate.reasons() {
                out.push_str(&format!("{}- {}\n", INDENT, self.reason(reason)));
            }
        }

        if summary.passed {
            let banner = "Quality gate passed!";
            if self.color {
                out.push_str(&banner.bright_green().bold().to_string());
            } else {
                out.push_str(banner);
            }
        } else {
            out.push('\n');
            let banner = "Quality gate FAILED";
            if self.color {
                out.push_str(&banner.bright_red().bold().to_string());
            } else {
                out.push_str(banner);
            }
        }
        out.push('\n');
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Gate Oracle - Deterministic quality gate for scanner comparisons
//!
//! The oracle decides whether the "current" scanner build has regressed
//! against the "latest release" build. It works on per-image summaries that
//! were already computed against a labeled ground truth and produces an
//! ordered list of violation reasons.
//!
//! Nothing in here renders or prints. Reasons are plain values; callers
//! decide how to format them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::debug;

// ============ Constants ============

/// Tool identifiers ending with this suffix are the latest release baseline
pub const LATEST_RELEASE_SUFFIX: &str = "latest";

/// Ceiling for the current tool's indeterminate match percentage
pub const DEFAULT_MAX_INDETERMINATE_PERCENT: f64 = 10.0;

// ============ Core Types ============

/// The tool and image a scan result was produced with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanConfig {
    pub tool: String,
    pub image: String,
}

impl ScanConfig {
    pub fn new(tool: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            image: image.into(),
        }
    }
}

/// Label statistics for one (image, tool) pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Summary {
    /// `None` when the score is indeterminate
    #[serde(default)]
    pub f1_score: Option<f64>,
    #[serde(default)]
    pub indeterminate_percent: f64,
    #[serde(default)]
    pub false_negatives: u64,
    #[serde(default)]
    pub false_positives: u64,
    #[serde(default)]
    pub true_positives: u64,
}

impl Summary {
    /// F1 score, or `None` if it could not be computed.
    ///
    /// Non-finite values are indeterminate too; they are never compared
    /// numerically.
    pub fn f1(&self) -> Option<f64> {
        self.f1_score.filter(|score| score.is_finite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolStat {
    pub config: ScanConfig,
    pub summary: Summary,
}

/// Label comparison outcome for a single scan result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    pub result_id: String,
    pub config: ScanConfig,
    pub summary: Summary,
}

impl Comparison {
    pub fn new(result_id: impl Into<String>, config: ScanConfig, summary: Summary) -> Self {
        Self {
            result_id: result_id.into(),
            config,
            summary,
        }
    }
}

/// Per (image, tool) statistics for one validation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImageToolLabelStats {
    pub tools: BTreeSet<String>,
    pub images: BTreeSet<String>,
    pub stats: Vec<ToolStat>,
}

impl ImageToolLabelStats {
    pub fn from_stats(stats: Vec<ToolStat>) -> Self {
        let tools = stats.iter().map(|s| s.config.tool.clone()).collect();
        let images = stats.iter().map(|s| s.config.image.clone()).collect();
        Self {
            tools,
            images,
            stats,
        }
    }

    /// Summary for an (image, tool) pair. Later entries win over earlier ones.
    pub fn get(&self, image: &str, tool: &str) -> Option<&Summary> {
        self.stats
            .iter()
            .rev()
            .find(|s| s.config.image == image && s.config.tool == tool)
            .map(|s| &s.summary)
    }

    /// No tools and no statistics: nothing was compared
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.stats.is_empty()
    }
}

// ============ Errors ============

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("expected 2 tools, got {tools:?}")]
    ToolCardinality { tools: Vec<String> },
    #[error("latest release tool not found")]
    LatestReleaseToolNotFound,
    #[error("current tool not found")]
    CurrentToolNotFound,
    #[error("no comparison for tool {tool:?} against image {image:?}")]
    MissingComparison { tool: String, image: String },
}

// ============ Tool Identification ============

/// The two tools being compared
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolPair {
    pub latest_release: String,
    pub current: String,
}

/// Split exactly two distinct tool identifiers into (latest release, current).
pub fn identify_tools<I, S>(tools: I) -> Result<ToolPair, GateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let distinct: BTreeSet<String> = tools
        .into_iter()
        .map(|tool| tool.as_ref().to_string())
        .collect();

    if distinct.len() != 2 {
        return Err(GateError::ToolCardinality {
            tools: distinct.into_iter().collect(),
        });
    }

    let mut latest_release = None;
    let mut current = None;
    for tool in distinct {
        if tool.ends_with(LATEST_RELEASE_SUFFIX) {
            latest_release = Some(tool);
            continue;
        }
        current = Some(tool);
    }

    let latest_release = latest_release.ok_or(GateError::LatestReleaseToolNotFound)?;
    let current = current.ok_or(GateError::CurrentToolNotFound)?;

    Ok(ToolPair {
        latest_release,
        current,
    })
}

// ============ Reasons ============

/// A single gate violation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Reason {
    F1Regression {
        image: String,
        current: f64,
        latest: f64,
    },
    F1Indeterminate {
        image: String,
        latest: Option<f64>,
    },
    IndeterminateCeiling {
        image: String,
        current: f64,
        threshold: f64,
    },
    FalseNegativeRegression {
        image: String,
        current: u64,
        latest: u64,
    },
}

impl Reason {
    pub fn image(&self) -> &str {
        match self {
            Reason::F1Regression { image, .. }
            | Reason::F1Indeterminate { image, .. }
            | Reason::IndeterminateCeiling { image, .. }
            | Reason::FalseNegativeRegression { image, .. } => image,
        }
    }

    /// Human-readable description of the violated rule
    pub fn summary(&self) -> String {
        match self {
            Reason::F1Regression { .. } => {
                "current F1 score is lower than the latest release F1 score".to_string()
            }
            Reason::F1Indeterminate { .. } => "current F1 score is indeterminate".to_string(),
            Reason::IndeterminateCeiling { threshold, .. } => {
                format!("current indeterminate matches % is greater than {}%", threshold)
            }
            Reason::FalseNegativeRegression { .. } => {
                "current false negatives is greater than the latest release false negatives"
                    .to_string()
            }
        }
    }

    /// The measured values, e.g. `current=0.85 latest=0.90`
    pub fn values(&self) -> String {
        match self {
            Reason::F1Regression {
                current, latest, ..
            } => format!("current={:.2} latest={:.2}", current, latest),
            Reason::F1Indeterminate { latest, .. } => format!(
                "current={} latest={}",
                format_f1(None),
                format_f1(*latest)
            ),
            Reason::IndeterminateCeiling { current, .. } => format!("current={:.2}%", current),
            Reason::FalseNegativeRegression {
                current, latest, ..
            } => format!("current={} latest={}", current, latest),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} image={}", self.summary(), self.values(), self.image())
    }
}

fn format_f1(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{:.2}", score),
        None => "indeterminate".to_string(),
    }
}

// ============ Gate ============

/// Pass/fail verdict for one validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Gate {
    tools: Option<ToolPair>,
    reasons: Vec<Reason>,
}

impl Gate {
    /// A gate with nothing to judge. Used when the tools produced no differences.
    pub fn vacuous() -> Self {
        Self::default()
    }

    /// Evaluate with the default policy
    pub fn evaluate(
        comparisons: &[Comparison],
        stats: &ImageToolLabelStats,
    ) -> Result<Self, GateError> {
        Oracle::with_defaults().evaluate(comparisons, stats)
    }

    pub fn passed(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }

    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }

    /// The compared tools; `None` for a vacuous gate
    pub fn tools(&self) -> Option<&ToolPair> {
        self.tools.as_ref()
    }
}

// ============ Policy ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatePolicy {
    pub max_indeterminate_percent: f64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            max_indeterminate_percent: DEFAULT_MAX_INDETERMINATE_PERCENT,
        }
    }
}

// ============ Oracle Implementation ============

pub struct Oracle {
    policy: GatePolicy,
}

impl Oracle {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn with_defaults() -> Self {
        Self::new(GatePolicy::default())
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Judge the current tool against the latest release, image by image.
    ///
    /// Reasons are ordered by the first appearance of each image among the
    /// current tool's comparisons, then by rule (F1, indeterminate %, false
    /// negatives). Every image of the current tool must have a latest
    /// release comparison.
    pub fn evaluate(
        &self,
        comparisons: &[Comparison],
        stats: &ImageToolLabelStats,
    ) -> Result<Gate, GateError> {
        if comparisons.is_empty() && stats.is_empty() {
            return Ok(Gate::vacuous());
        }

        let tools = identify_tools(&stats.tools)?;
        debug!(
            latest_release = %tools.latest_release,
            current = %tools.current,
            images = stats.images.len(),
            max_indeterminate_percent = self.policy().max_indeterminate_percent,
            "identified tools"
        );

        let latest = ImageIndex::build(comparisons, &tools.latest_release);
        let current = ImageIndex::build(comparisons, &tools.current);

        let mut reasons = Vec::new();
        for (image, comparison) in current.iter() {
            let baseline = latest
                .get(image)
                .ok_or_else(|| GateError::MissingComparison {
                    tool: tools.latest_release.clone(),
                    image: image.to_string(),
                })?;
            reasons.extend(self.check_image(image, &comparison.summary, &baseline.summary));
        }

        debug!(
            images = current.len(),
            reasons = reasons.len(),
            "gate evaluated"
        );

        Ok(Gate {
            tools: Some(tools),
            reasons,
        })
    }

    fn check_image(&self, image: &str, current: &Summary, latest: &Summary) -> Vec<Reason> {
        let mut reasons = Vec::new();

        // An indeterminate latest score never beats a real current score.
        match (current.f1(), latest.f1()) {
            (None, latest) => reasons.push(Reason::F1Indeterminate {
                image: image.to_string(),
                latest,
            }),
            (Some(current), Some(latest)) if current < latest => {
                reasons.push(Reason::F1Regression {
                    image: image.to_string(),
                    current,
                    latest,
                })
            }
            _ => {}
        }

        if current.indeterminate_percent > self.policy.max_indeterminate_percent {
            reasons.push(Reason::IndeterminateCeiling {
                image: image.to_string(),
                current: current.indeterminate_percent,
                threshold: self.policy.max_indeterminate_percent,
            });
        }

        if current.false_negatives > latest.false_negatives {
            reasons.push(Reason::FalseNegativeRegression {
                image: image.to_string(),
                current: current.false_negatives,
                latest: latest.false_negatives,
            });
        }

        reasons
    }
}

impl Default for Oracle {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Comparisons of one tool keyed by image.
///
/// A repeated image replaces the earlier comparison but keeps its position.
struct ImageIndex<'a> {
    order: Vec<&'a str>,
    by_image: HashMap<&'a str, &'a Comparison>,
}

impl<'a> ImageIndex<'a> {
    fn build(comparisons: &'a [Comparison], tool: &str) -> Self {
        let mut index = Self {
            order: Vec::new(),
            by_image: HashMap::new(),
        };
        for comparison in comparisons.iter().filter(|c| c.config.tool == tool) {
            let image = comparison.config.image.as_str();
            if index.by_image.insert(image, comparison).is_none() {
                index.order.push(image);
            }
        }
        index
    }

    fn get(&self, image: &str) -> Option<&'a Comparison> {
        self.by_image.get(image).copied()
    }

    fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Comparison)> + '_ {
        self.order
            .iter()
            .filter_map(move |image| self.get(image).map(|comparison| (*image, comparison)))
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = "grype@current";
    const LATEST: &str = "grype@latest";

    fn summary(f1: f64, indeterminate: f64, false_negatives: u64) -> Summary {
        Summary {
            f1_score: Some(f1),
            indeterminate_percent: indeterminate,
            false_negatives,
            ..Summary::default()
        }
    }

    fn comparison(tool: &str, image: &str, summary: Summary) -> Comparison {
        Comparison::new(format!("{}-{}", tool, image), ScanConfig::new(tool, image), summary)
    }

    fn stats_for(comparisons: &[Comparison]) -> ImageToolLabelStats {
        ImageToolLabelStats::from_stats(
            comparisons
                .iter()
                .map(|c| ToolStat {
                    config: c.config.clone(),
                    summary: c.summary,
                })
                .collect(),
        )
    }

    fn evaluate(comparisons: &[Comparison]) -> Gate {
        Gate::evaluate(comparisons, &stats_for(comparisons)).unwrap()
    }

    #[test]
    fn test_identify_tools_picks_latest_suffix() {
        let pair = identify_tools(["grype@v0.60.0-latest", "grype@pr-1234"]).unwrap();
        assert_eq!(pair.latest_release, "grype@v0.60.0-latest");
        assert_eq!(pair.current, "grype@pr-1234");

        let reversed = identify_tools(["grype@pr-1234", "grype@v0.60.0-latest"]).unwrap();
        assert_eq!(pair, reversed);
    }

    #[test]
    fn test_identify_tools_requires_exactly_two() {
        assert_eq!(
            identify_tools(Vec::<String>::new()),
            Err(GateError::ToolCardinality { tools: vec![] })
        );
        assert!(matches!(
            identify_tools([LATEST]),
            Err(GateError::ToolCardinality { .. })
        ));
        assert!(matches!(
            identify_tools([LATEST, CURRENT, "syft@main"]),
            Err(GateError::ToolCardinality { .. })
        ));
    }

    #[test]
    fn test_identify_tools_counts_distinct_identifiers() {
        let err = identify_tools([LATEST, LATEST]).unwrap_err();
        assert_eq!(
            err,
            GateError::ToolCardinality {
                tools: vec![LATEST.to_string()]
            }
        );
        assert_eq!(err.to_string(), r#"expected 2 tools, got ["grype@latest"]"#);
    }

    #[test]
    fn test_identify_tools_without_latest() {
        let err = identify_tools(["grype@main", "grype@pr"]).unwrap_err();
        assert_eq!(err, GateError::LatestReleaseToolNotFound);
        assert_eq!(err.to_string(), "latest release tool not found");
    }

    #[test]
    fn test_identify_tools_both_latest() {
        let err = identify_tools(["x-latest", "y-latest"]).unwrap_err();
        assert_eq!(err, GateError::CurrentToolNotFound);
        assert_eq!(err.to_string(), "current tool not found");
    }

    #[test]
    fn test_vacuous_gate_passes() {
        let gate = Gate::vacuous();
        assert!(gate.passed());
        assert!(gate.reasons().is_empty());
        assert!(gate.tools().is_none());

        let gate = Gate::evaluate(&[], &ImageToolLabelStats::default()).unwrap();
        assert!(gate.passed());
        assert_eq!(gate, Gate::vacuous());
    }

    #[test]
    fn test_stats_without_tools_is_not_vacuous() {
        assert!(ImageToolLabelStats::default().is_empty());

        let stats = ImageToolLabelStats {
            stats: vec![ToolStat {
                config: ScanConfig::new(CURRENT, "img:1"),
                summary: summary(0.9, 0.0, 0),
            }],
            ..ImageToolLabelStats::default()
        };
        assert!(!stats.is_empty());
        let result = Gate::evaluate(&[], &stats);
        assert!(matches!(result, Err(GateError::ToolCardinality { .. })));
    }

    #[test]
    fn test_oracle_policy() {
        let oracle = Oracle::with_defaults();
        assert_eq!(
            oracle.policy().max_indeterminate_percent,
            DEFAULT_MAX_INDETERMINATE_PERCENT
        );
        let oracle = Oracle::new(GatePolicy {
            max_indeterminate_percent: 25.0,
        });
        assert_eq!(oracle.policy().max_indeterminate_percent, 25.0);
    }

    #[test]
    fn test_comparisons_without_tools_is_an_error() {
        let comparisons = vec![comparison(CURRENT, "img:1", summary(0.9, 0.0, 0))];
        let result = Gate::evaluate(&comparisons, &ImageToolLabelStats::default());
        assert!(matches!(result, Err(GateError::ToolCardinality { .. })));
    }

    #[test]
    fn test_no_regression_passes() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.90, 5.0, 2)),
            comparison(CURRENT, "img:1", summary(0.92, 5.0, 1)),
        ]);
        assert!(gate.passed());
        assert_eq!(
            gate.tools(),
            Some(&ToolPair {
                latest_release: LATEST.to_string(),
                current: CURRENT.to_string(),
            })
        );
    }

    #[test]
    fn test_f1_regression() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.90, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.85, 0.0, 0)),
        ]);
        assert!(!gate.passed());
        assert_eq!(
            gate.messages(),
            vec![
                "current F1 score is lower than the latest release F1 score: current=0.85 latest=0.90 image=img:1"
            ]
        );
    }

    #[test]
    fn test_equal_f1_is_not_a_regression() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.90, 0.0, 3)),
            comparison(CURRENT, "img:1", summary(0.90, 0.0, 3)),
        ]);
        assert!(gate.passed());
    }

    #[test]
    fn test_indeterminate_ceiling_ignores_latest() {
        let gate = evaluate(&[
            comparison(LATEST, "img:2", summary(0.50, 40.0, 9)),
            comparison(CURRENT, "img:2", summary(0.95, 15.0, 0)),
        ]);
        assert_eq!(
            gate.messages(),
            vec!["current indeterminate matches % is greater than 10%: current=15.00% image=img:2"]
        );
    }

    #[test]
    fn test_indeterminate_ceiling_is_strict() {
        let gate = evaluate(&[
            comparison(LATEST, "img:2", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:2", summary(0.9, 10.0, 0)),
        ]);
        assert!(gate.passed());
    }

    #[test]
    fn test_false_negative_regression() {
        let gate = evaluate(&[
            comparison(LATEST, "img:3", summary(0.9, 0.0, 2)),
            comparison(CURRENT, "img:3", summary(0.9, 0.0, 5)),
        ]);
        assert_eq!(
            gate.messages(),
            vec!["current false negatives is greater than the latest release false negatives: current=5 latest=2 image=img:3"]
        );
    }

    #[test]
    fn test_all_rules_accumulate_in_order() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.90, 1.0, 2)),
            comparison(CURRENT, "img:1", summary(0.80, 12.5, 4)),
        ]);
        assert!(!gate.passed());
        let reasons = gate.reasons();
        assert_eq!(reasons.len(), 3);
        assert!(matches!(reasons[0], Reason::F1Regression { .. }));
        assert!(matches!(reasons[1], Reason::IndeterminateCeiling { .. }));
        assert!(matches!(reasons[2], Reason::FalseNegativeRegression { .. }));
        assert!(reasons.iter().all(|r| r.image() == "img:1"));
    }

    #[test]
    fn test_reasons_follow_current_image_order() {
        let gate = evaluate(&[
            comparison(LATEST, "img:a", summary(0.9, 0.0, 0)),
            comparison(LATEST, "img:b", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:b", summary(0.8, 0.0, 0)),
            comparison(CURRENT, "img:a", summary(0.9, 0.0, 1)),
        ]);
        let images: Vec<&str> = gate.reasons().iter().map(Reason::image).collect();
        assert_eq!(images, vec!["img:b", "img:a"]);
    }

    #[test]
    fn test_duplicate_image_last_write_wins() {
        let gate = evaluate(&[
            comparison(CURRENT, "img:1", summary(0.5, 0.0, 0)),
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:2", summary(0.9, 0.0, 0)),
            comparison(LATEST, "img:2", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:2", summary(0.9, 20.0, 0)),
        ]);
        assert_eq!(gate.reasons().len(), 1);
        assert_eq!(gate.reasons()[0].image(), "img:2");
    }

    #[test]
    fn test_indeterminate_current_f1_fails() {
        let mut current = summary(0.0, 0.0, 0);
        current.f1_score = None;
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.90, 0.0, 0)),
            comparison(CURRENT, "img:1", current),
        ]);
        assert_eq!(
            gate.messages(),
            vec!["current F1 score is indeterminate: current=indeterminate latest=0.90 image=img:1"]
        );
    }

    #[test]
    fn test_non_finite_f1_is_indeterminate() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(f64::NAN, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(f64::NAN, 0.0, 0)),
        ]);
        assert_eq!(
            gate.reasons(),
            &[Reason::F1Indeterminate {
                image: "img:1".to_string(),
                latest: None,
            }]
        );
    }

    #[test]
    fn test_indeterminate_latest_f1_never_regresses() {
        let mut latest = summary(0.0, 0.0, 0);
        latest.f1_score = None;
        let gate = evaluate(&[
            comparison(LATEST, "img:1", latest),
            comparison(CURRENT, "img:1", summary(0.10, 0.0, 0)),
        ]);
        assert!(gate.passed());
    }

    #[test]
    fn test_missing_latest_comparison_is_an_error() {
        let comparisons = vec![
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:2", summary(0.9, 0.0, 0)),
        ];
        let err = Gate::evaluate(&comparisons, &stats_for(&comparisons)).unwrap_err();
        assert_eq!(
            err,
            GateError::MissingComparison {
                tool: LATEST.to_string(),
                image: "img:2".to_string(),
            }
        );
    }

    #[test]
    fn test_latest_only_image_is_ignored() {
        let gate = evaluate(&[
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(LATEST, "img:2", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.9, 0.0, 0)),
        ]);
        assert!(gate.passed());
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let comparisons = vec![
            comparison(LATEST, "img:1", summary(0.9, 1.0, 1)),
            comparison(CURRENT, "img:1", summary(0.7, 30.0, 3)),
            comparison(LATEST, "img:2", summary(0.9, 1.0, 1)),
            comparison(CURRENT, "img:2", summary(0.8, 1.0, 0)),
        ];
        let stats = stats_for(&comparisons);
        let first = Gate::evaluate(&comparisons, &stats).unwrap();
        let second = Gate::evaluate(&comparisons, &stats).unwrap();
        assert_eq!(first.messages(), second.messages());
        assert_eq!(first.reasons().len(), 4);
    }

    #[test]
    fn test_custom_indeterminate_ceiling() {
        let oracle = Oracle::new(GatePolicy {
            max_indeterminate_percent: 25.0,
        });
        let comparisons = vec![
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.9, 20.0, 0)),
        ];
        let gate = oracle.evaluate(&comparisons, &stats_for(&comparisons)).unwrap();
        assert!(gate.passed());

        let comparisons = vec![
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.9, 30.0, 0)),
        ];
        let gate = oracle.evaluate(&comparisons, &stats_for(&comparisons)).unwrap();
        assert_eq!(
            gate.messages(),
            vec!["current indeterminate matches % is greater than 25%: current=30.00% image=img:1"]
        );
    }

    #[test]
    fn test_stats_collects_tools_and_images() {
        let comparisons = vec![
            comparison(LATEST, "img:1", summary(0.9, 0.0, 0)),
            comparison(CURRENT, "img:1", summary(0.8, 0.0, 0)),
            comparison(CURRENT, "img:2", summary(0.7, 0.0, 0)),
        ];
        let stats = stats_for(&comparisons);
        assert_eq!(stats.tools.len(), 2);
        assert_eq!(stats.images.len(), 2);
        assert_eq!(stats.get("img:2", CURRENT).and_then(Summary::f1), Some(0.7));
        assert!(stats.get("img:2", LATEST).is_none());
    }

    #[test]
    fn test_summary_null_f1_deserializes_as_indeterminate() {
        let summary: Summary = serde_json::from_str(
            r#"{"f1_score": null, "indeterminate_percent": 3.5, "false_negatives": 1}"#,
        )
        .unwrap();
        assert_eq!(summary.f1(), None);
        assert_eq!(summary.false_negatives, 1);
        assert_eq!(summary.true_positives, 0);
    }
}

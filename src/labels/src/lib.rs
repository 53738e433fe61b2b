//! Label Comparison - Scanner results diffed and matched against ground truth
//!
//! This crate is the boundary between the quality gate and whatever produced
//! the scan results. It answers three questions for a named result set:
//!
//! - which results does it contain (`load_result_set`)
//! - which matches does each result have that the others lack (`compare_results`)
//! - how does each result fare against the labeled ground truth
//!   (`compare_results_against_labels`)
//!
//! F1 scores and indeterminate percentages are not computed here. They are
//! supplied with the result set and passed through as `Summary` values.

use gate_oracle::{Comparison, ImageToolLabelStats, ScanConfig, Summary, ToolStat};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

// ============ Artifacts ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Package {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Vulnerability {
    pub id: String,
}

/// A vulnerability reported against a package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Match {
    pub package: Package,
    pub vulnerability: Vulnerability,
}

impl Match {
    pub fn new(
        package: impl Into<String>,
        version: impl Into<String>,
        vulnerability: impl Into<String>,
    ) -> Self {
        Self {
            package: Package {
                name: package.into(),
                version: version.into(),
            },
            vulnerability: Vulnerability {
                id: vulnerability.into(),
            },
        }
    }

    /// Identity shared by equal matches across results
    pub fn id(&self) -> String {
        format!(
            "{}@{}@{}",
            self.vulnerability.id, self.package.name, self.package.version
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub id: String,
    pub config: ScanConfig,
    #[serde(default)]
    pub matches: Vec<Match>,
}

/// Ground-truth verdict for a match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    TruePositive,
    FalsePositive,
    Unclear,
}

impl Label {
    pub fn name(&self) -> &'static str {
        match self {
            Label::TruePositive => "TruePositive",
            Label::FalsePositive => "FalsePositive",
            Label::Unclear => "Unclear",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelEntry {
    pub id: String,
    pub image: String,
    pub package: Package,
    pub vulnerability_id: String,
    pub label: Label,
}

impl LabelEntry {
    fn applies_to(&self, image: &str, m: &Match) -> bool {
        self.image == image
            && self.package == m.package
            && self.vulnerability_id == m.vulnerability.id
    }
}

// ============ Result Sets ============

/// Points at one scan result inside a named result set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultDescription {
    pub result_set: String,
    pub id: String,
    pub config: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSet {
    pub name: String,
    /// The (tool, image) requests the result set was built from
    pub state: Vec<ScanConfig>,
    pub descriptions: Vec<ResultDescription>,
}

/// On-disk form of a result set, one JSON file per name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResultSetDocument {
    pub name: String,
    #[serde(default)]
    pub results: Vec<ScanResult>,
    #[serde(default)]
    pub labels: Vec<LabelEntry>,
    #[serde(default)]
    pub summaries: Vec<ToolStat>,
}

// ============ Comparison Outputs ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelativeComparison {
    pub results: Vec<ScanResult>,
    /// Matches only found in the keyed result
    pub unique: HashMap<String, Vec<Match>>,
}

impl RelativeComparison {
    pub fn unique_for(&self, result_id: &str) -> &[Match] {
        self.unique
            .get(result_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total_unique(&self) -> usize {
        self.results
            .iter()
            .map(|r| self.unique_for(&r.id).len())
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelComparison {
    pub result_id: String,
    pub config: ScanConfig,
    pub summary: Summary,
    /// Ground-truth labels keyed by `Match::id`
    pub labels_by_match: BTreeMap<String, Vec<Label>>,
}

impl LabelComparison {
    pub fn labels_for(&self, m: &Match) -> &[Label] {
        self.labels_by_match
            .get(&m.id())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn comparison(&self) -> Comparison {
        Comparison::new(self.result_id.clone(), self.config.clone(), self.summary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LabelComparisonOutput {
    pub results: Vec<ScanResult>,
    pub label_entries: Vec<LabelEntry>,
    /// One entry per result, in result order
    pub comparisons_by_result_id: Vec<LabelComparison>,
    pub stats: ImageToolLabelStats,
}

impl LabelComparisonOutput {
    pub fn get(&self, result_id: &str) -> Option<&LabelComparison> {
        self.comparisons_by_result_id
            .iter()
            .find(|c| c.result_id == result_id)
    }

    pub fn comparisons(&self) -> Vec<Comparison> {
        self.comparisons_by_result_id
            .iter()
            .map(LabelComparison::comparison)
            .collect()
    }
}

// ============ Errors ============

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("result set {name:?} not found at {}", .path.display())]
    ResultSetNotFound { name: String, path: PathBuf },
    #[error("result {id:?} not found in result set {result_set:?}")]
    UnknownResult { result_set: String, id: String },
    #[error("no label summary for tool {tool:?} against image {image:?}")]
    MissingSummary { tool: String, image: String },
    #[error("descriptions span several result sets: {0:?}")]
    MixedResultSets(Vec<String>),
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse result set: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============ Backend Trait ============

/// Source of result sets and the comparisons run over them
pub trait ComparisonBackend {
    fn load_result_set(&self, name: &str) -> Result<ResultSet, CompareError>;

    fn compare_results(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<RelativeComparison, CompareError>;

    fn compare_results_against_labels(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<LabelComparisonOutput, CompareError>;
}

// ============ Document Operations ============

impl ResultSetDocument {
    pub fn result_set(&self) -> ResultSet {
        let mut state: Vec<ScanConfig> = Vec::new();
        for result in &self.results {
            if !state.contains(&result.config) {
                state.push(result.config.clone());
            }
        }

        ResultSet {
            name: self.name.clone(),
            state,
            descriptions: self
                .results
                .iter()
                .map(|r| ResultDescription {
                    result_set: self.name.clone(),
                    id: r.id.clone(),
                    config: r.config.clone(),
                })
                .collect(),
        }
    }

    fn select(&self, descriptions: &[ResultDescription]) -> Result<Vec<ScanResult>, CompareError> {
        descriptions
            .iter()
            .map(|d| {
                self.results
                    .iter()
                    .find(|r| r.id == d.id)
                    .cloned()
                    .ok_or_else(|| CompareError::UnknownResult {
                        result_set: self.name.clone(),
                        id: d.id.clone(),
                    })
            })
            .collect()
    }

    /// Matches each result has that no other result for the same image has
    pub fn relative_comparison(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<RelativeComparison, CompareError> {
        let results = self.select(descriptions)?;

        let mut unique = HashMap::new();
        for result in &results {
            let elsewhere: HashSet<String> = results
                .iter()
                .filter(|other| other.id != result.id && other.config.image == result.config.image)
                .flat_map(|other| other.matches.iter().map(Match::id))
                .collect();

            let mut seen = HashSet::new();
            let only_here: Vec<Match> = result
                .matches
                .iter()
                .filter(|m| {
                    let id = m.id();
                    !elsewhere.contains(&id) && seen.insert(id)
                })
                .cloned()
                .collect();

            debug!(result = %result.id, unique = only_here.len(), "relative comparison");
            unique.insert(result.id.clone(), only_here);
        }

        Ok(RelativeComparison { results, unique })
    }

    /// Attach ground-truth labels and label summaries to each result
    pub fn label_comparison(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<LabelComparisonOutput, CompareError> {
        let results = self.select(descriptions)?;

        let mut comparisons = Vec::with_capacity(results.len());
        let mut stats: Vec<ToolStat> = Vec::new();
        for result in &results {
            let image = result.config.image.as_str();
            let summary = self
                .summary_for(&result.config)
                .ok_or_else(|| CompareError::MissingSummary {
                    tool: result.config.tool.clone(),
                    image: image.to_string(),
                })?;

            let mut labels_by_match = BTreeMap::new();
            for m in &result.matches {
                let labels: Vec<Label> = self
                    .labels
                    .iter()
                    .filter(|entry| entry.applies_to(image, m))
                    .map(|entry| entry.label)
                    .collect();
                labels_by_match.insert(m.id(), labels);
            }

            if !stats.iter().any(|s| s.config == result.config) {
                stats.push(ToolStat {
                    config: result.config.clone(),
                    summary,
                });
            }

            comparisons.push(LabelComparison {
                result_id: result.id.clone(),
                config: result.config.clone(),
                summary,
                labels_by_match,
            });
        }

        let images: HashSet<&str> = results.iter().map(|r| r.config.image.as_str()).collect();
        let label_entries = self
            .labels
            .iter()
            .filter(|entry| images.contains(entry.image.as_str()))
            .cloned()
            .collect();

        Ok(LabelComparisonOutput {
            results,
            label_entries,
            comparisons_by_result_id: comparisons,
            stats: ImageToolLabelStats::from_stats(stats),
        })
    }

    fn summary_for(&self, config: &ScanConfig) -> Option<Summary> {
        self.summaries
            .iter()
            .rev()
            .find(|s| &s.config == config)
            .map(|s| s.summary)
    }
}

/// The single result set a batch of descriptions refers to
fn result_set_name(descriptions: &[ResultDescription]) -> Result<Option<&str>, CompareError> {
    let mut names: Vec<&str> = descriptions.iter().map(|d| d.result_set.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    match names.as_slice() {
        [] => Ok(None),
        [name] => Ok(Some(name)),
        _ => Err(CompareError::MixedResultSets(
            names.into_iter().map(str::to_string).collect(),
        )),
    }
}

// ============ Fixture Store ============

/// Reads result sets from `<root>/<name>.json`
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    pub fn load_document(&self, name: &str) -> Result<ResultSetDocument, CompareError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(CompareError::ResultSetNotFound {
                name: name.to_string(),
                path,
            });
        }

        debug!(path = %path.display(), "loading result set");
        let content = fs::read_to_string(&path)?;
        let mut document: ResultSetDocument = serde_json::from_str(&content)?;
        if document.name != name {
            debug!(stored = %document.name, name, "result set renamed after its file");
            document.name = name.to_string();
        }
        Ok(document)
    }

    /// Names of all result sets in the store, sorted
    pub fn list_result_sets(&self) -> Result<Vec<String>, CompareError> {
        let pattern = self.root.join("*.json");
        let mut names: Vec<String> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn document_for(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<ResultSetDocument, CompareError> {
        match result_set_name(descriptions)? {
            Some(name) => self.load_document(name),
            None => Ok(ResultSetDocument::default()),
        }
    }
}

impl ComparisonBackend for FixtureStore {
    fn load_result_set(&self, name: &str) -> Result<ResultSet, CompareError> {
        Ok(self.load_document(name)?.result_set())
    }

    fn compare_results(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<RelativeComparison, CompareError> {
        self.document_for(descriptions)?
            .relative_comparison(descriptions)
    }

    fn compare_results_against_labels(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<LabelComparisonOutput, CompareError> {
        self.document_for(descriptions)?
            .label_comparison(descriptions)
    }
}

// ============ Memory Backend ============

/// In-memory backend; also counts label comparisons so callers can verify
/// the no-difference short-circuit.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    documents: HashMap<String, ResultSetDocument>,
    label_comparisons: Cell<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document: ResultSetDocument) -> Self {
        self.documents.insert(document.name.clone(), document);
        self
    }

    pub fn label_comparisons(&self) -> usize {
        self.label_comparisons.get()
    }

    fn document(&self, name: &str) -> Result<&ResultSetDocument, CompareError> {
        self.documents
            .get(name)
            .ok_or_else(|| CompareError::ResultSetNotFound {
                name: name.to_string(),
                path: PathBuf::from(format!("memory://{}", name)),
            })
    }
}

impl ComparisonBackend for MemoryBackend {
    fn load_result_set(&self, name: &str) -> Result<ResultSet, CompareError> {
        Ok(self.document(name)?.result_set())
    }

    fn compare_results(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<RelativeComparison, CompareError> {
        match result_set_name(descriptions)? {
            Some(name) => self.document(name)?.relative_comparison(descriptions),
            None => Ok(RelativeComparison::default()),
        }
    }

    fn compare_results_against_labels(
        &self,
        descriptions: &[ResultDescription],
    ) -> Result<LabelComparisonOutput, CompareError> {
        self.label_comparisons.set(self.label_comparisons.get() + 1);
        match result_set_name(descriptions)? {
            Some(name) => self.document(name)?.label_comparison(descriptions),
            None => Ok(LabelComparisonOutput::default()),
        }
    }
}

// ============ Tests ============

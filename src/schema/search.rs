//! Search configuration, scores and result types.
//!
//! Everything here is plain serializable data consumed or produced by the
//! search engine in `compute`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{CandidateTree, Node};

/// Host name under which local jobs are registered.
pub const LOCALHOST: &str = "localhost";

/// Separator between job count and host in `N:HOST` job entries.
pub const JOB_SEPARATOR: char = ':';

/// Top-level configuration for a program search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Deme optimization algorithm selector (`hc`, `sa` or `un`).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Global stopping conditions.
    #[serde(default)]
    pub termination: TerminationConfig,
    /// Deme sizing parameters shared by all strategies.
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub hillclimbing: HillclimbingConfig,
    #[serde(default)]
    pub annealing: AnnealingConfig,
    #[serde(default)]
    pub univariate: UnivariateConfig,
    /// Metapopulation merge and selection policy.
    #[serde(default)]
    pub metapopulation: MetapopulationConfig,
    /// Reduction effort levels.
    #[serde(default)]
    pub reduction: ReductionConfig,
    /// Continuous knob parameters.
    #[serde(default)]
    pub representation: RepresentationConfig,
    /// Score cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Job slots per host. Only the local entry is used.
    #[serde(default)]
    pub jobs: JobSchedule,
    /// Number of best candidates reported in the result.
    #[serde(default = "default_result_count")]
    pub result_count: usize,
    /// Random seed for reproducibility.
    #[serde(default = "default_random_seed")]
    pub random_seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            termination: TerminationConfig::default(),
            optimization: OptimizationConfig::default(),
            hillclimbing: HillclimbingConfig::default(),
            annealing: AnnealingConfig::default(),
            univariate: UnivariateConfig::default(),
            metapopulation: MetapopulationConfig::default(),
            reduction: ReductionConfig::default(),
            representation: RepresentationConfig::default(),
            cache: CacheConfig::default(),
            jobs: JobSchedule::default(),
            result_count: default_result_count(),
            random_seed: default_random_seed(),
        }
    }
}

fn default_algorithm() -> String {
    "hc".to_string()
}
fn default_result_count() -> usize {
    10
}
fn default_random_seed() -> Option<u64> {
    Some(1)
}

/// Deme optimization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    Hillclimbing,
    SimulatedAnnealing,
    Univariate,
}

impl FromStr for AlgorithmKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hc" | "hillclimbing" => Ok(Self::Hillclimbing),
            "sa" | "simulated-annealing" | "annealing" => Ok(Self::SimulatedAnnealing),
            "un" | "univariate" => Ok(Self::Univariate),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Global termination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// Maximum number of scorer invocations (cache hits are free).
    #[serde(default = "default_max_evals")]
    pub max_evals: u64,
    /// Maximum number of demes to expand.
    #[serde(default)]
    pub max_gens: Option<usize>,
    /// Stop once a candidate reaches this total score.
    #[serde(default)]
    pub max_score: Option<f64>,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            max_evals: default_max_evals(),
            max_gens: None,
            max_score: None,
        }
    }
}

fn default_max_evals() -> u64 {
    10_000
}

/// Deme sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Population size per bit of deme information. Higher spends more
    /// effort per deme.
    #[serde(default = "default_pop_size_ratio")]
    pub pop_size_ratio: f64,
    /// Max distance explored from the exemplar is this value times
    /// `log2(information_theoretic_bits(deme))`.
    #[serde(default = "default_max_dist_ratio")]
    pub max_dist_ratio: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            pop_size_ratio: default_pop_size_ratio(),
            max_dist_ratio: default_max_dist_ratio(),
        }
    }
}

fn default_pop_size_ratio() -> f64 {
    20.0
}
fn default_max_dist_ratio() -> f64 {
    1.0
}

/// Hillclimbing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HillclimbingConfig {
    /// End the deme as soon as a round yields an improvement.
    #[serde(default = "default_terminate_if_improvement")]
    pub terminate_if_improvement: bool,
    /// Neighbors sampled per round once the distance exceeds one.
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
}

impl Default for HillclimbingConfig {
    fn default() -> Self {
        Self {
            terminate_if_improvement: default_terminate_if_improvement(),
            max_neighbors: default_max_neighbors(),
        }
    }
}

fn default_terminate_if_improvement() -> bool {
    true
}
fn default_max_neighbors() -> usize {
    256
}

/// Simulated annealing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealingConfig {
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    /// Multiplicative cooling factor applied after every step.
    #[serde(default = "default_cooling_factor")]
    pub cooling_factor: f64,
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,
    /// Neighbors proposed (and scored together) per step.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum annealing steps per deme.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: default_initial_temperature(),
            cooling_factor: default_cooling_factor(),
            min_temperature: default_min_temperature(),
            batch_size: default_batch_size(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_initial_temperature() -> f64 {
    30.0
}
fn default_cooling_factor() -> f64 {
    0.9
}
fn default_min_temperature() -> f64 {
    0.01
}
fn default_batch_size() -> usize {
    4
}
fn default_max_steps() -> usize {
    500
}

/// Univariate estimation-of-distribution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnivariateConfig {
    /// Generations per deme.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Fraction of each generation used to update the model.
    #[serde(default = "default_selection_ratio")]
    pub selection_ratio: f64,
    /// Model update rate toward the selected tail.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Stop after this many generations without improvement.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
}

impl Default for UnivariateConfig {
    fn default() -> Self {
        Self {
            generations: default_generations(),
            selection_ratio: default_selection_ratio(),
            learning_rate: default_learning_rate(),
            stagnation_limit: Some(5),
        }
    }
}

fn default_generations() -> usize {
    20
}
fn default_selection_ratio() -> f64 {
    0.5
}
fn default_learning_rate() -> f64 {
    0.7
}

/// Metapopulation policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetapopulationConfig {
    /// Maximum candidates merged from one deme.
    #[serde(default)]
    pub max_candidates: Option<usize>,
    /// Allow exemplars to be expanded again.
    #[serde(default)]
    pub revisit: bool,
    /// Keep candidates dominated by an archive member.
    #[serde(default)]
    pub include_dominated: bool,
    /// Soft cap on archive size; lowest ranked entries are evicted beyond it.
    #[serde(default)]
    pub max_size: Option<usize>,
}

/// Reduction effort levels (0 minimum, 3 maximum).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionConfig {
    /// Effort used to canonicalize candidates before caching and scoring.
    #[serde(default = "default_effort")]
    pub candidate_effort: u8,
    /// Effort used while building knobs. Higher gives fewer knobs.
    #[serde(default = "default_effort")]
    pub knob_building_effort: u8,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            candidate_effort: default_effort(),
            knob_building_effort: default_effort(),
        }
    }
}

fn default_effort() -> u8 {
    2
}

/// Maximum reduction effort level.
pub const MAX_EFFORT: u8 = 3;

/// Continuous knob parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepresentationConfig {
    /// Base step of a continuous dimension.
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// Growth factor between successive step scales.
    #[serde(default = "default_expansion")]
    pub expansion: f64,
    /// Number of step scales (precision levels).
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Operators and arguments never offered as knob settings, named as in
    /// the printed tree form (`or`, `*`, `sin`, `#3`).
    #[serde(default)]
    pub ignore_operators: Vec<String>,
}

impl Default for RepresentationConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
            expansion: default_expansion(),
            depth: default_depth(),
            ignore_operators: Vec::new(),
        }
    }
}

impl RepresentationConfig {
    /// Resolve `ignore_operators` to nodes.
    pub fn ignored_nodes(&self) -> Result<BTreeSet<Node>, ConfigError> {
        self.ignore_operators
            .iter()
            .map(|name| {
                Node::from_operator(name).ok_or_else(|| ConfigError::UnknownOperator(name.clone()))
            })
            .collect()
    }
}

fn default_step_size() -> f64 {
    1.0
}
fn default_expansion() -> f64 {
    2.0
}
fn default_depth() -> u32 {
    3
}

/// Score cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Memory budget for keys and values, in bytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: usize,
    /// Number of independently locked shards.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            memory_budget_bytes: default_memory_budget(),
            shards: default_shards(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_memory_budget() -> usize {
    64 * 1024 * 1024
}
fn default_shards() -> usize {
    16
}

/// Job slots per worker host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSchedule(BTreeMap<String, usize>);

impl Default for JobSchedule {
    fn default() -> Self {
        Self::local(1)
    }
}

impl JobSchedule {
    /// Schedule with only local jobs.
    pub fn local(jobs: usize) -> Self {
        Self(BTreeMap::from([(LOCALHOST.to_string(), jobs)]))
    }

    /// Parse `N` (local) and `N:HOST` (remote) entries.
    pub fn parse_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let mut schedule = Self::default();
        for entry in entries {
            let entry = entry.as_ref();
            let (count, host) = match entry.split_once(JOB_SEPARATOR) {
                Some((count, host)) => (count, host),
                None => (entry, LOCALHOST),
            };
            let jobs: usize = count
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidJobEntry(entry.to_string()))?;
            if host.is_empty() {
                return Err(ConfigError::InvalidJobEntry(entry.to_string()));
            }
            schedule.0.insert(host.to_string(), jobs);
        }
        Ok(schedule)
    }

    /// Jobs allocated on the local machine.
    pub fn local_jobs(&self) -> usize {
        self.0.get(LOCALHOST).copied().unwrap_or(0)
    }

    /// Remote hosts and their job counts.
    pub fn remote_hosts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0
            .iter()
            .filter(|(host, _)| host.as_str() != LOCALHOST)
            .map(|(host, &jobs)| (host.as_str(), jobs))
    }
}

// ============================================================================
// Scores and candidates
// ============================================================================

/// Behavioral score vector plus complexity, as returned by a scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Per-case fitness components. Higher is better.
    pub behavior: Vec<f64>,
    /// Program complexity. Lower is better.
    pub complexity: u32,
}

impl Score {
    pub fn new(behavior: Vec<f64>, complexity: u32) -> Self {
        Self {
            behavior,
            complexity,
        }
    }

    /// Sum of the behavioral components.
    pub fn total(&self) -> f64 {
        self.behavior.iter().sum()
    }

    /// Ranking order: higher total first, then lower complexity.
    /// `Ordering::Greater` means `self` ranks better.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.total()
            .total_cmp(&other.total())
            .then_with(|| other.complexity.cmp(&self.complexity))
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Greater
    }

    /// Whether every behavioral component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.behavior.iter().all(|b| b.is_finite())
    }

    /// Strictly better on every behavioral component.
    pub fn dominates(&self, other: &Self) -> bool {
        !self.behavior.is_empty()
            && self.behavior.len() == other.behavior.len()
            && self
                .behavior
                .iter()
                .zip(&other.behavior)
                .all(|(a, b)| a > b)
    }

    /// Approximate footprint in bytes.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.behavior.len() * std::mem::size_of::<f64>()
    }
}

/// A canonical tree with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Canonical (reduced) program.
    pub tree: CandidateTree,
    pub score: Score,
    /// Scorer evaluations consumed when this candidate was found.
    pub evaluations: u64,
}

impl ScoredCandidate {
    pub fn new(tree: CandidateTree, score: Score, evaluations: u64) -> Self {
        Self {
            tree,
            score,
            evaluations,
        }
    }

    /// Ranking order (see [`Score::rank_cmp`]), ties broken by tree order so
    /// the result is total and deterministic.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.score
            .rank_cmp(&other.score)
            .then_with(|| other.tree.cmp(&self.tree))
    }
}

// ============================================================================
// Progress and result types
// ============================================================================

/// Orchestrator state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SearchPhase {
    #[default]
    Init,
    SelectExemplar,
    BuildDeme,
    OptimizeDeme,
    Merge,
    CheckTermination,
    Done,
}

/// Progress update emitted after each state transition of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    /// Demes expanded so far.
    pub demes: usize,
    /// Scorer evaluations consumed so far.
    pub evaluations: u64,
    /// Best total score in the metapopulation.
    pub best_score: Option<f64>,
    pub metapopulation_size: usize,
    pub phase: SearchPhase,
}

/// Per-deme history for analysis.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchHistory {
    /// Best total score after each merge.
    pub best_score: Vec<f64>,
}

/// Statistics from a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    /// Demes expanded (including failed ones).
    pub demes: usize,
    /// Demes aborted by representation errors or zero knobs.
    pub failed_demes: usize,
    /// Scorer evaluations performed.
    pub total_evaluations: u64,
    pub cache_hits: u64,
    pub best_score: Option<f64>,
    pub elapsed_seconds: f64,
    pub stop_reason: StopReason,
}

/// Final result of a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Best candidates, best first.
    pub best: Vec<ScoredCandidate>,
    pub stats: SearchStats,
    pub history: SearchHistory,
}

/// Reason the search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Evaluation budget exhausted.
    MaxEvals,
    /// Deme count limit reached.
    MaxGens,
    /// Configured maximum score attained.
    MaxScore,
    /// Metapopulation has no exemplar left to expand.
    NoExemplars,
    /// Cancelled through the cancel handle.
    Cancelled,
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown optimization algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid job entry: {0}")]
    InvalidJobEntry(String),
    #[error("At least one local job is required")]
    NoLocalJobs,
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SearchConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the algorithm selector.
    pub fn algorithm_kind(&self) -> Result<AlgorithmKind, ConfigError> {
        self.algorithm.parse()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.algorithm_kind()?;

        let invalid = |msg: String| Err(ConfigError::InvalidValue(msg));

        if self.termination.max_evals == 0 {
            return invalid("max_evals must be positive".to_string());
        }
        let positive = [
            ("pop_size_ratio", self.optimization.pop_size_ratio),
            ("max_dist_ratio", self.optimization.max_dist_ratio),
            ("step_size", self.representation.step_size),
            ("initial_temperature", self.annealing.initial_temperature),
            ("min_temperature", self.annealing.min_temperature),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{} must be positive, got {}", name, value));
            }
        }
        if !(self.representation.expansion >= 1.0) {
            return invalid(format!(
                "expansion must be at least 1, got {}",
                self.representation.expansion
            ));
        }
        if self.representation.depth == 0 {
            return invalid("contin depth must be at least 1".to_string());
        }
        self.representation.ignored_nodes()?;
        if !(self.annealing.cooling_factor > 0.0 && self.annealing.cooling_factor < 1.0) {
            return invalid(format!(
                "cooling_factor must be in (0, 1), got {}",
                self.annealing.cooling_factor
            ));
        }
        if self.annealing.batch_size == 0 || self.hillclimbing.max_neighbors == 0 {
            return invalid("batch sizes must be positive".to_string());
        }
        let unit = [
            ("selection_ratio", self.univariate.selection_ratio),
            ("learning_rate", self.univariate.learning_rate),
        ];
        for (name, value) in unit {
            if !(value > 0.0 && value <= 1.0) {
                return invalid(format!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.univariate.generations == 0 {
            return invalid("univariate generations must be positive".to_string());
        }
        if self.reduction.candidate_effort > MAX_EFFORT
            || self.reduction.knob_building_effort > MAX_EFFORT
        {
            return invalid(format!("reduction effort must be at most {}", MAX_EFFORT));
        }
        if self.metapopulation.max_candidates == Some(0) || self.metapopulation.max_size == Some(0)
        {
            return invalid("metapopulation limits must be positive".to_string());
        }
        if self.cache.enabled && (self.cache.memory_budget_bytes == 0 || self.cache.shards == 0) {
            return invalid("cache budget and shard count must be positive".to_string());
        }
        if self.jobs.local_jobs() == 0 {
            return Err(ConfigError::NoLocalJobs);
        }

        Ok(())
    }
}

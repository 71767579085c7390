//! Deme optimization: local search over one exemplar's instance space.
//!
//! A [`Deme`] owns the evaluation pipeline shared by every strategy:
//! decode, clean, reduce, look up, score, record. Strategies only decide
//! which instances to evaluate next.

mod annealing;
mod hillclimbing;
mod neighborhood;
mod univariate;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::compute::cache::ScoreCache;
use crate::compute::representation::{
    FieldLayout, Instance, KnobMapper, RepresentationError, decode, to_field_layout,
};
use crate::compute::scoring::{Reducer, Scorer};
use crate::schema::{AlgorithmKind, CandidateTree, ConfigError, Score, ScoredCandidate, SearchConfig};

pub use annealing::Annealer;
pub use hillclimbing::Hillclimber;
pub use neighborhood::{distance_one, max_distance, sample_at_distance, sample_neighbors};
pub use univariate::UnivariateEda;

// ============================================================================
// Evaluation budget
// ============================================================================

/// Global scorer-invocation budget. Shared by reference across demes and
/// decremented once per scorer call, never for cache hits.
#[derive(Debug)]
pub struct EvalBudget {
    limit: u64,
    used: AtomicU64,
}

impl EvalBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Reserve one evaluation. Returns false once the limit is reached.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.limit
    }
}

// ============================================================================
// Deme
// ============================================================================

/// Result of one deme run.
#[derive(Debug, Clone, Default)]
pub struct DemeOutcome {
    /// Distinct canonical candidates, best first.
    pub candidates: Vec<ScoredCandidate>,
    /// Scorer invocations made by this deme.
    pub evaluations: u64,
    /// Lookups answered by the shared cache.
    pub cache_hits: u64,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

/// Evaluation context for one exemplar.
pub struct Deme<'a> {
    mapper: &'a KnobMapper,
    layout: FieldLayout,
    scorer: &'a dyn Scorer,
    reducer: &'a dyn Reducer,
    budget: &'a EvalBudget,
    cache: Option<&'a ScoreCache>,
    pool: Option<&'a rayon::ThreadPool>,
    cancelled: Option<Arc<AtomicBool>>,
    effort: u8,
    max_score: Option<f64>,
    /// Canonical tree to score; `None` marks a scoring failure.
    memo: HashMap<CandidateTree, Option<Score>>,
    found: HashMap<CandidateTree, ScoredCandidate>,
    best: Option<Score>,
    evaluations: u64,
    cache_hits: u64,
    interrupted: bool,
}

impl<'a> Deme<'a> {
    pub fn new(
        mapper: &'a KnobMapper,
        scorer: &'a dyn Scorer,
        reducer: &'a dyn Reducer,
        budget: &'a EvalBudget,
    ) -> Self {
        Self {
            mapper,
            layout: to_field_layout(mapper),
            scorer,
            reducer,
            budget,
            cache: None,
            pool: None,
            cancelled: None,
            effort: 0,
            max_score: None,
            memo: HashMap::new(),
            found: HashMap::new(),
            best: None,
            evaluations: 0,
            cache_hits: 0,
            interrupted: false,
        }
    }

    pub fn with_cache(mut self, cache: &'a ScoreCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run scoring on a dedicated pool instead of the global one.
    pub fn with_pool(mut self, pool: &'a rayon::ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    /// Reduction effort applied to every decoded candidate.
    pub fn with_effort(mut self, effort: u8) -> Self {
        self.effort = effort;
        self
    }

    /// Stop once a candidate reaches this total score.
    pub fn with_max_score(mut self, max_score: Option<f64>) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn mapper(&self) -> &KnobMapper {
        self.mapper
    }

    /// Best score recorded so far.
    pub fn best_score(&self) -> Option<&Score> {
        self.best.as_ref()
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Whether a strategy should stop issuing batches.
    pub fn should_stop(&self) -> bool {
        let reached = match (self.max_score, &self.best) {
            (Some(max), Some(best)) => best.total() >= max,
            _ => false,
        };
        self.interrupted || reached || self.budget.is_exhausted() || self.is_cancelled()
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Score a batch of instances, returning one entry per instance.
    ///
    /// `None` marks an instance that could not be scored: the scorer
    /// rejected it or returned a non-finite score, the budget ran out, or
    /// the run was cancelled. All
    /// scoring for the batch completes before this returns.
    pub fn evaluate(&mut self, instances: &[Instance]) -> Result<Vec<Option<Score>>, RepresentationError> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }
        if self.is_cancelled() {
            self.interrupted = true;
            return Ok(vec![None; instances.len()]);
        }

        let mapper = self.mapper;
        let reducer = self.reducer;
        let effort = self.effort;
        let trees: Vec<CandidateTree> = self.install(|| {
            instances
                .par_iter()
                .map(|instance| {
                    decode(instance, mapper).map(|tree| reducer.reduce(&tree.clean(), effort))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut queued = HashSet::new();
        let mut pending = Vec::new();
        for tree in &trees {
            if self.memo.contains_key(tree) || queued.contains(tree) {
                continue;
            }
            if let Some(score) = self.cache.and_then(|cache| cache.get(tree)) {
                self.cache_hits += 1;
                self.record(tree.clone(), score);
                continue;
            }
            if !self.budget.try_acquire() {
                continue;
            }
            queued.insert(tree.clone());
            pending.push(tree.clone());
        }

        let scorer = self.scorer;
        let results: Vec<_> = self.install(|| pending.par_iter().map(|tree| scorer.score(tree)).collect());
        self.evaluations += pending.len() as u64;

        if self.is_cancelled() {
            debug!("Discarding {} scored candidates after cancellation", pending.len());
            self.interrupted = true;
            return Ok(vec![None; instances.len()]);
        }

        for (tree, result) in pending.into_iter().zip(results) {
            match result {
                Ok(score) if score.is_finite() => {
                    if let Some(cache) = self.cache {
                        cache.put(tree.clone(), score.clone());
                    }
                    self.record(tree, score);
                }
                Ok(score) => {
                    debug!("Dropping candidate {}: non-finite score {:?}", tree, score.behavior);
                    self.memo.insert(tree, None);
                }
                Err(e) => {
                    debug!("Dropping candidate {}: {}", tree, e);
                    self.memo.insert(tree, None);
                }
            }
        }

        Ok(trees
            .iter()
            .map(|tree| self.memo.get(tree).cloned().flatten())
            .collect())
    }

    fn record(&mut self, tree: CandidateTree, score: Score) {
        if self.best.as_ref().is_none_or(|best| score.is_better_than(best)) {
            self.best = Some(score.clone());
        }
        self.memo.insert(tree.clone(), Some(score.clone()));
        let evaluations = self.budget.used();
        self.found
            .entry(tree.clone())
            .or_insert_with(|| ScoredCandidate::new(tree, score, evaluations));
    }

    /// Consume the deme, keeping at most `max_candidates` of the best
    /// distinct candidates.
    pub fn finish(self, max_candidates: Option<usize>) -> DemeOutcome {
        let mut candidates: Vec<ScoredCandidate> = self.found.into_values().collect();
        candidates.sort_by(|a, b| b.rank_cmp(a));
        if let Some(max) = max_candidates {
            candidates.truncate(max);
        }
        DemeOutcome {
            candidates,
            evaluations: self.evaluations,
            cache_hits: self.cache_hits,
            cancelled: self.interrupted,
        }
    }
}

// ============================================================================
// Strategy selection
// ============================================================================

/// Optimization strategy, selected once per run from the configuration.
#[derive(Debug, Clone)]
pub enum Strategy {
    Hillclimbing(Hillclimber),
    Annealing(Annealer),
    Univariate(UnivariateEda),
}

impl Strategy {
    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        let ratio = config.optimization.max_dist_ratio;
        Ok(match config.algorithm_kind()? {
            AlgorithmKind::Hillclimbing => {
                Strategy::Hillclimbing(Hillclimber::new(config.hillclimbing.clone(), ratio))
            }
            AlgorithmKind::SimulatedAnnealing => {
                Strategy::Annealing(Annealer::new(config.annealing.clone(), ratio))
            }
            AlgorithmKind::Univariate => Strategy::Univariate(UnivariateEda::new(
                config.univariate.clone(),
                config.optimization.pop_size_ratio,
            )),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Hillclimbing(_) => "hillclimbing",
            Strategy::Annealing(_) => "simulated annealing",
            Strategy::Univariate(_) => "univariate",
        }
    }

    /// Explore the deme until the strategy converges or the deme says stop.
    pub fn optimize(&self, deme: &mut Deme<'_>, rng: &mut StdRng) -> Result<(), RepresentationError> {
        match self {
            Strategy::Hillclimbing(s) => s.optimize(deme, rng),
            Strategy::Annealing(s) => s.optimize(deme, rng),
            Strategy::Univariate(s) => s.optimize(deme, rng),
        }
    }
}

/// Best scored instance of a batch.
fn best_of(instances: Vec<Instance>, scores: Vec<Option<Score>>) -> Option<(Instance, Score)> {
    instances
        .into_iter()
        .zip(scores)
        .filter_map(|(instance, score)| score.map(|s| (instance, s)))
        .max_by(|a, b| a.1.rank_cmp(&b.1))
}

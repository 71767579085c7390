//! Search orchestration: the exemplar → deme → merge loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::schema::{
    CandidateTree, ConfigError, Node, ScoredCandidate, SearchConfig, SearchHistory, SearchPhase,
    SearchProgress, SearchResult, SearchStats, Signature, StopReason,
};

use super::cache::{CacheStats, ScoreCache};
use super::deme::{Deme, DemeOutcome, EvalBudget, Strategy};
use super::metapopulation::Metapopulation;
use super::representation::{KnobBuilder, KnobMapper, RepresentationError};
use super::scoring::{Reducer, Scorer};

/// Errors that prevent a search from starting or abort one deme.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Representation(#[from] RepresentationError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Orchestrator states. Each carries the data the next step needs.
enum State {
    Init,
    SelectExemplar,
    BuildDeme(CandidateTree),
    OptimizeDeme(CandidateTree, KnobMapper),
    Merge(CandidateTree, DemeOutcome),
    CheckTermination,
    Done(StopReason),
}

impl State {
    fn phase(&self) -> SearchPhase {
        match self {
            State::Init => SearchPhase::Init,
            State::SelectExemplar => SearchPhase::SelectExemplar,
            State::BuildDeme(_) => SearchPhase::BuildDeme,
            State::OptimizeDeme(..) => SearchPhase::OptimizeDeme,
            State::Merge(..) => SearchPhase::Merge,
            State::CheckTermination => SearchPhase::CheckTermination,
            State::Done(_) => SearchPhase::Done,
        }
    }
}

/// Program search engine.
pub struct SearchEngine<S: Scorer, R: Reducer> {
    config: SearchConfig,
    signature: Signature,
    strategy: Strategy,
    ignored: BTreeSet<Node>,
    scorer: S,
    reducer: R,
    rng: StdRng,
    exemplars: Vec<CandidateTree>,
    metapopulation: Metapopulation,
    cache: Option<ScoreCache>,
    budget: EvalBudget,
    pool: rayon::ThreadPool,
    cancelled: Arc<AtomicBool>,
    phase: SearchPhase,
    history: SearchHistory,
    demes: usize,
    failed_demes: usize,
    cache_hits: u64,
}

impl<S: Scorer, R: Reducer> SearchEngine<S, R> {
    /// Create an engine. The configuration is validated here, so a bad
    /// configuration never starts any deme work.
    pub fn new(config: SearchConfig, signature: Signature, scorer: S, reducer: R) -> Result<Self, SearchError> {
        config.validate()?;
        let strategy = Strategy::from_config(&config)?;
        let ignored = config.representation.ignored_nodes()?;

        let jobs = config.jobs.local_jobs();
        for (host, count) in config.jobs.remote_hosts() {
            warn!("Ignoring {} jobs on remote host {}", count, host);
        }
        let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        let cache = config.cache.enabled.then(|| ScoreCache::from_config(&config.cache));

        Ok(Self {
            signature,
            strategy,
            ignored,
            scorer,
            reducer,
            rng: StdRng::seed_from_u64(seed),
            exemplars: Vec::new(),
            metapopulation: Metapopulation::new(config.metapopulation.clone()),
            cache,
            budget: EvalBudget::new(config.termination.max_evals),
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
            phase: SearchPhase::Init,
            history: SearchHistory::default(),
            demes: 0,
            failed_demes: 0,
            cache_hits: 0,
            config,
        })
    }

    /// Starting programs. Without any, the signature's default exemplar
    /// is used.
    pub fn with_exemplars(mut self, exemplars: Vec<CandidateTree>) -> Self {
        self.exemplars = exemplars;
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.as_ref().map(ScoreCache::stats).unwrap_or_default()
    }

    fn progress(&self) -> SearchProgress {
        SearchProgress {
            demes: self.demes,
            evaluations: self.budget.used(),
            best_score: self.metapopulation.best_score().map(|s| s.total()),
            metapopulation_size: self.metapopulation.len(),
            phase: self.phase,
        }
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }

        if self.budget.is_exhausted() {
            return Some(StopReason::MaxEvals);
        }

        if let Some(max) = self.config.termination.max_gens
            && self.demes >= max
        {
            return Some(StopReason::MaxGens);
        }

        if let Some(target) = self.config.termination.max_score
            && self
                .metapopulation
                .best_score()
                .is_some_and(|s| s.total() >= target)
        {
            return Some(StopReason::MaxScore);
        }

        None
    }

    /// Reduce and score the starting programs into the metapopulation.
    fn initialize(&mut self) {
        let exemplars = if self.exemplars.is_empty() {
            vec![self.signature.default_exemplar()]
        } else {
            self.exemplars.clone()
        };
        let effort = self.config.reduction.candidate_effort;

        let mut scored = Vec::new();
        for exemplar in exemplars {
            let tree = self.reducer.reduce(&exemplar.clean(), effort);
            if let Some(score) = self.cache.as_ref().and_then(|c| c.get(&tree)) {
                self.cache_hits += 1;
                scored.push(ScoredCandidate::new(tree, score, self.budget.used()));
                continue;
            }
            if !self.budget.try_acquire() {
                warn!("Evaluation budget exhausted before scoring exemplar {}", tree);
                break;
            }
            match self.scorer.score(&tree) {
                Ok(score) if !score.is_finite() => {
                    warn!("Dropping exemplar {}: non-finite score", tree)
                }
                Ok(score) => {
                    if let Some(cache) = &self.cache {
                        cache.put(tree.clone(), score.clone());
                    }
                    scored.push(ScoredCandidate::new(tree, score, self.budget.used()));
                }
                Err(e) => warn!("Dropping exemplar {}: {}", tree, e),
            }
        }

        let summary = self.metapopulation.insert(scored);
        info!(
            "Initialized metapopulation with {} exemplars",
            summary.added
        );
    }

    fn build_deme(&self, exemplar: &CandidateTree) -> Result<KnobMapper, RepresentationError> {
        KnobBuilder::new(self.signature, &self.reducer)
            .with_effort(self.config.reduction.knob_building_effort)
            .with_contin(self.config.representation.clone())
            .with_ignored(self.ignored.clone())
            .build(exemplar)
    }

    fn optimize_deme(&mut self, mapper: &KnobMapper) -> Result<DemeOutcome, SearchError> {
        let mut deme = Deme::new(mapper, &self.scorer, &self.reducer, &self.budget)
            .with_pool(&self.pool)
            .with_cancel(Arc::clone(&self.cancelled))
            .with_effort(self.config.reduction.candidate_effort)
            .with_max_score(self.config.termination.max_score);
        if let Some(cache) = &self.cache {
            deme = deme.with_cache(cache);
        }

        self.strategy.optimize(&mut deme, &mut self.rng)?;
        Ok(deme.finish(self.config.metapopulation.max_candidates))
    }

    fn record_history(&mut self) {
        let best = self
            .metapopulation
            .best_score()
            .map(|s| s.total())
            .unwrap_or(f64::NEG_INFINITY);
        self.history.best_score.push(best);
    }

    /// Advance the state machine by one transition.
    fn step<F>(&mut self, state: State, callback: &F) -> State
    where
        F: Fn(&SearchProgress),
    {
        match state {
            State::Init => {
                self.initialize();
                callback(&self.progress());
                State::CheckTermination
            }
            State::CheckTermination => match self.should_stop() {
                Some(reason) => State::Done(reason),
                None => State::SelectExemplar,
            },
            State::SelectExemplar => match self.metapopulation.select_exemplar(&mut self.rng) {
                Some(exemplar) => State::BuildDeme(exemplar),
                None => State::Done(StopReason::NoExemplars),
            },
            State::BuildDeme(exemplar) => match self.build_deme(&exemplar) {
                Ok(mapper) => State::OptimizeDeme(exemplar, mapper),
                Err(e) => {
                    warn!("Cannot build deme for {}: {}", exemplar, e);
                    self.metapopulation.mark_exhausted(&exemplar);
                    self.demes += 1;
                    self.failed_demes += 1;
                    State::CheckTermination
                }
            },
            State::OptimizeDeme(exemplar, mapper) => {
                debug!(
                    "Optimizing deme {} around {} with {} ({} knobs)",
                    self.demes + 1,
                    exemplar,
                    self.strategy.name(),
                    mapper.len()
                );
                match self.optimize_deme(&mapper) {
                    Ok(outcome) => State::Merge(exemplar, outcome),
                    Err(e) => {
                        error!("Aborting deme around {}: {}", exemplar, e);
                        self.metapopulation.mark_exhausted(&exemplar);
                        self.demes += 1;
                        self.failed_demes += 1;
                        State::CheckTermination
                    }
                }
            }
            State::Merge(exemplar, outcome) => {
                self.demes += 1;
                self.cache_hits += outcome.cache_hits;
                if outcome.evaluations == 0 {
                    self.metapopulation.mark_exhausted(&exemplar);
                } else {
                    self.metapopulation.mark_expanded(&exemplar);
                }

                let found = outcome.candidates.len();
                let summary = self.metapopulation.insert(outcome.candidates);
                info!(
                    "Deme {}: {} evaluations, {} candidates, {} merged, best {:?}",
                    self.demes,
                    outcome.evaluations,
                    found,
                    summary.added,
                    self.metapopulation.best_score().map(|s| s.total())
                );
                self.record_history();
                callback(&self.progress());
                State::CheckTermination
            }
            State::Done(reason) => State::Done(reason),
        }
    }

    /// Run the search with a progress callback.
    pub fn run_with_callback<F>(&mut self, callback: F) -> SearchResult
    where
        F: Fn(&SearchProgress),
    {
        let start_time = Instant::now();
        info!(
            "Starting {} search with {} evaluations on {} threads",
            self.strategy.name(),
            self.budget.limit(),
            self.pool.current_num_threads()
        );

        let mut state = State::Init;
        let stop_reason = loop {
            self.phase = state.phase();
            if let State::Done(reason) = state {
                break reason;
            }
            state = self.step(state, &callback);
        };
        callback(&self.progress());
        info!("Search stopped: {:?}", stop_reason);

        let cache_stats = self.cache_stats();
        debug!(
            "Cache: {} hits, {} misses, {} evictions, {} entries",
            cache_stats.hits, cache_stats.misses, cache_stats.evictions, cache_stats.entries
        );

        SearchResult {
            best: self.metapopulation.best(self.config.result_count),
            stats: SearchStats {
                demes: self.demes,
                failed_demes: self.failed_demes,
                total_evaluations: self.budget.used(),
                cache_hits: self.cache_hits,
                best_score: self.metapopulation.best_score().map(|s| s.total()),
                elapsed_seconds: start_time.elapsed().as_secs_f64(),
                stop_reason,
            },
            history: self.history.clone(),
        }
    }

    /// Run the search (blocking).
    pub fn run(&mut self) -> SearchResult {
        self.run_with_callback(|_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::reduction::BasicReducer;
    use crate::compute::scoring::{IdentityReducer, ReferenceScorer, ScoreError};
    use crate::schema::{Node, Score, TerminationConfig};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn config(algorithm: &str, max_evals: u64) -> SearchConfig {
        SearchConfig {
            algorithm: algorithm.to_string(),
            termination: TerminationConfig {
                max_evals,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SearchEngine::new(
            config("tabu", 10),
            Signature::boolean(2),
            ReferenceScorer::boolean(&CandidateTree::arg(0), 2).unwrap(),
            BasicReducer,
        );
        assert!(matches!(
            result,
            Err(SearchError::Config(ConfigError::UnknownAlgorithm(_)))
        ));
    }

    #[test]
    fn test_hillclimbing_scenario() {
        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            let negated = tree.children.iter().any(|c| c.node == Node::NotArg(0));
            Ok(Score::new(vec![if negated { 1.0 } else { 0.0 }], tree.complexity()))
        };
        let mut engine = SearchEngine::new(config("hc", 2), Signature::boolean(1), scorer, IdentityReducer)
            .unwrap()
            .with_exemplars(vec![CandidateTree::not(CandidateTree::arg(0))]);
        let result = engine.run();

        assert_eq!(result.stats.stop_reason, StopReason::MaxEvals);
        assert_eq!(result.stats.total_evaluations, 2);
        assert_eq!(result.best[0].score.total(), 1.0);
        assert_eq!(result.best[0].tree.to_string(), "not(!#1)");
    }

    #[test]
    fn test_unique_evaluations_bounded() {
        for (algorithm, max_evals) in [("hc", 25), ("sa", 40), ("un", 60)] {
            let seen = Mutex::new(std::collections::HashSet::new());
            let calls = AtomicUsize::new(0);
            let reference = ReferenceScorer::boolean(
                &CandidateTree::or(vec![CandidateTree::arg(0), CandidateTree::not_arg(2)]),
                3,
            )
            .unwrap();
            let scorer = |tree: &CandidateTree| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut seen) = seen.lock() {
                    seen.insert(tree.clone());
                }
                reference.score(tree)
            };

            let mut engine =
                SearchEngine::new(config(algorithm, max_evals), Signature::boolean(3), scorer, BasicReducer)
                    .unwrap();
            let result = engine.run();

            let calls = calls.load(Ordering::SeqCst) as u64;
            assert!(calls <= max_evals, "{} made {} calls", algorithm, calls);
            assert_eq!(calls, seen.lock().unwrap().len() as u64);
            assert_eq!(result.stats.total_evaluations, calls);
            assert!(!result.best.is_empty());
        }
    }

    #[test]
    fn test_learns_reference_program() {
        let target = CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::not_arg(1)]);
        let scorer = ReferenceScorer::boolean(&target, 3).unwrap();
        let mut search = config("hc", 5000);
        search.termination.max_score = Some(scorer.max_score());
        search.hillclimbing.terminate_if_improvement = false;

        let mut engine = SearchEngine::new(search, Signature::boolean(3), scorer, BasicReducer).unwrap();
        let progress = Mutex::new(Vec::new());
        let result = engine.run_with_callback(|p| {
            if let Ok(mut progress) = progress.lock() {
                progress.push(p.phase);
            }
        });

        assert_eq!(result.stats.stop_reason, StopReason::MaxScore);
        assert_eq!(result.best[0].score.total(), 0.0);
        assert_eq!(result.best[0].tree, BasicReducer.reduce(&target, 2));
        assert_eq!(progress.lock().unwrap().last(), Some(&SearchPhase::Done));
        assert_eq!(result.history.best_score.len(), result.stats.demes - result.stats.failed_demes);
    }

    #[test]
    fn test_learns_numeric_program_from_default_exemplar() {
        // +(0) has no argument; reaching #1 + 1 needs an argument insertion.
        let signature = Signature::numeric(1);
        let target = CandidateTree::plus(vec![CandidateTree::arg(0), CandidateTree::contin(1.0)]);
        let scorer = ReferenceScorer::for_signature(&target, signature, 7).unwrap();
        let mut search = config("hc", 3000);
        search.termination.max_score = Some(scorer.max_score());

        let mut engine = SearchEngine::new(search, signature, scorer, BasicReducer).unwrap();
        let result = engine.run();

        assert_eq!(result.stats.stop_reason, StopReason::MaxScore);
        assert_eq!(result.best[0].score.total(), 0.0);
        assert_eq!(result.best[0].tree, BasicReducer.reduce(&target, 2));
    }

    #[test]
    fn test_ignored_operator_never_appears() {
        let target = CandidateTree::or(vec![CandidateTree::arg(0), CandidateTree::arg(1)]);
        let scorer = ReferenceScorer::boolean(&target, 2).unwrap();
        let mut search = config("hc", 500);
        search.representation.ignore_operators = vec!["or".to_string()];

        let mut engine = SearchEngine::new(search, Signature::boolean(2), scorer, BasicReducer).unwrap();
        let result = engine.run();

        fn uses_or(tree: &CandidateTree) -> bool {
            tree.node == Node::Or || tree.children.iter().any(uses_or)
        }
        assert!(!result.best.is_empty());
        assert!(result.best.iter().all(|c| !uses_or(&c.tree)));
    }

    #[test]
    fn test_zero_knob_exemplar_is_exhausted() {
        // Negated literals under a division give no knobs at all.
        let literal = CandidateTree::not_arg(0);
        let exemplar = CandidateTree::new(Node::Div, vec![literal.clone(), literal]);
        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            Ok(Score::new(vec![0.0], tree.complexity()))
        };
        let mut engine = SearchEngine::new(config("hc", 100), Signature::numeric(1), scorer, IdentityReducer)
            .unwrap()
            .with_exemplars(vec![exemplar]);
        let result = engine.run();

        assert_eq!(result.stats.stop_reason, StopReason::NoExemplars);
        assert_eq!(result.stats.failed_demes, 1);
        assert_eq!(result.stats.total_evaluations, 1);
    }

    #[test]
    fn test_max_gens() {
        let scorer = ReferenceScorer::boolean(&CandidateTree::arg(2), 3).unwrap();
        let mut search = config("hc", 10_000);
        search.termination.max_gens = Some(2);
        let mut engine = SearchEngine::new(search, Signature::boolean(3), scorer, BasicReducer).unwrap();
        let result = engine.run();
        assert!(matches!(
            result.stats.stop_reason,
            StopReason::MaxGens | StopReason::MaxScore
        ));
        assert!(result.stats.demes <= 2);
    }

    #[test]
    fn test_cancellation() {
        let scorer = ReferenceScorer::boolean(&CandidateTree::arg(0), 2).unwrap();
        let mut engine = SearchEngine::new(config("hc", 100), Signature::boolean(2), scorer, BasicReducer).unwrap();
        let cancel = engine.cancel_handle();

        // Cancel immediately
        cancel.store(true, Ordering::Relaxed);

        let result = engine.run();
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.demes, 0);
    }

    #[test]
    fn test_remote_jobs_ignored() {
        let mut search = config("hc", 10);
        search.jobs = crate::schema::JobSchedule::parse_entries(&["2", "8:worker.example"]).unwrap();
        let scorer = ReferenceScorer::boolean(&CandidateTree::arg(0), 1).unwrap();
        let engine = SearchEngine::new(search, Signature::boolean(1), scorer, BasicReducer).unwrap();
        assert_eq!(engine.pool.current_num_threads(), 2);
    }
}

//! Simulated annealing over instances.

use log::debug;
use rand::Rng;
use rand::rngs::StdRng;

use crate::compute::representation::RepresentationError;
use crate::schema::AnnealingConfig;

use super::neighborhood::{max_distance, sample_at_distance};
use super::{Deme, best_of};

/// Move counts of one annealing run.
#[derive(Debug, Clone, Copy, Default)]
struct Trace {
    steps: usize,
    accepted: usize,
    /// Accepted moves to a strictly lower total score.
    worsening: usize,
}

/// Samples a batch of neighbors per step and moves to the best of them
/// with Metropolis acceptance. The move distance shrinks with the
/// temperature, from `max_dist` down to 1.
#[derive(Debug, Clone)]
pub struct Annealer {
    config: AnnealingConfig,
    max_dist_ratio: f64,
}

impl Annealer {
    pub fn new(config: AnnealingConfig, max_dist_ratio: f64) -> Self {
        Self {
            config,
            max_dist_ratio,
        }
    }

    /// Probability of accepting a move changing the total score by `delta`.
    fn acceptance(delta: f64, temperature: f64) -> f64 {
        if delta >= 0.0 {
            return 1.0;
        }
        let p = (delta / temperature).exp();
        if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
    }

    pub fn optimize(&self, deme: &mut Deme<'_>, rng: &mut StdRng) -> Result<(), RepresentationError> {
        self.anneal(deme, rng).map(|_| ())
    }

    fn anneal(&self, deme: &mut Deme<'_>, rng: &mut StdRng) -> Result<Trace, RepresentationError> {
        let layout = deme.layout().clone();
        let max_dist = max_distance(&layout, self.max_dist_ratio);
        let initial = self.config.initial_temperature;

        let mut current = layout.identity();
        let mut current_score = deme.evaluate(std::slice::from_ref(&current))?.pop().flatten();
        let mut temperature = initial;
        let mut trace = Trace::default();

        while trace.steps < self.config.max_steps
            && temperature >= self.config.min_temperature
            && !deme.should_stop()
        {
            let distance = ((max_dist as f64 * temperature / initial).ceil() as usize).clamp(1, max_dist);
            let batch: Vec<_> = (0..self.config.batch_size)
                .map(|_| sample_at_distance(&layout, &current, distance, rng))
                .collect();
            let scores = deme.evaluate(&batch)?;

            if let Some((instance, score)) = best_of(batch, scores) {
                let accept = match &current_score {
                    None => true,
                    Some(c) if score.is_better_than(c) => true,
                    Some(c) => {
                        rng.gen_bool(Self::acceptance(score.total() - c.total(), temperature))
                    }
                };
                if accept {
                    if current_score.as_ref().is_some_and(|c| score.total() < c.total()) {
                        trace.worsening += 1;
                    }
                    current = instance;
                    current_score = Some(score);
                    trace.accepted += 1;
                }
            }

            temperature *= self.config.cooling_factor;
            trace.steps += 1;
        }

        debug!(
            "Annealing ran {} steps, accepted {} moves ({} worsening), final temperature {:.4}",
            trace.steps, trace.accepted, trace.worsening, temperature
        );
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::deme::EvalBudget;
    use crate::compute::representation::build_knobs;
    use crate::compute::scoring::{IdentityReducer, ScoreError};
    use crate::schema::{CandidateTree, Score, Signature};
    use rand::SeedableRng;

    #[test]
    fn test_acceptance() {
        assert_eq!(Annealer::acceptance(1.0, 1.0), 1.0);
        assert_eq!(Annealer::acceptance(0.0, 1.0), 1.0);
        assert!((Annealer::acceptance(-1.0, 1.0) - (-1.0f64).exp()).abs() < 1e-12);
        assert!(Annealer::acceptance(-1.0, 0.1) < Annealer::acceptance(-1.0, 10.0));
        assert_eq!(Annealer::acceptance(f64::NEG_INFINITY, 1.0), 0.0);
    }

    #[test]
    fn test_finds_constant() {
        // Numeric exemplar +(#1 0): reward constants close to 3.
        let exemplar = CandidateTree::plus(vec![CandidateTree::arg(0), CandidateTree::contin(0.0)]);
        let mapper = build_knobs(&exemplar, 0, Signature::numeric(1), &IdentityReducer).unwrap();
        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            let constant = tree
                .children
                .iter()
                .find_map(|c| match c.node {
                    crate::schema::Node::Contin(v) => Some(v),
                    _ => None,
                })
                .unwrap_or(0.0);
            Ok(Score::new(vec![-(constant - 3.0).abs()], tree.complexity()))
        };
        let budget = EvalBudget::new(400);
        let mut deme = Deme::new(&mapper, &scorer, &IdentityReducer, &budget);
        let annealer = Annealer::new(AnnealingConfig::default(), 1.0);
        annealer
            .optimize(&mut deme, &mut StdRng::seed_from_u64(5))
            .unwrap();

        let outcome = deme.finish(None);
        assert!(outcome.evaluations <= 400);
        assert!(outcome.candidates[0].score.total() > -1.0);
    }

    #[test]
    fn test_hot_start_accepts_worse_moves() {
        // Starting at the optimum, every early move lands on a worse constant.
        let exemplar = CandidateTree::plus(vec![CandidateTree::arg(0), CandidateTree::contin(3.0)]);
        let mapper = build_knobs(&exemplar, 0, Signature::numeric(1), &IdentityReducer).unwrap();
        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            let constant = tree
                .children
                .iter()
                .find_map(|c| match c.node {
                    crate::schema::Node::Contin(v) => Some(v),
                    _ => None,
                })
                .unwrap_or(0.0);
            Ok(Score::new(vec![-(constant - 3.0).abs()], tree.complexity()))
        };
        let budget = EvalBudget::new(400);
        let mut deme = Deme::new(&mapper, &scorer, &IdentityReducer, &budget);
        let config = AnnealingConfig {
            initial_temperature: 100.0,
            max_steps: 20,
            ..Default::default()
        };
        let trace = Annealer::new(config, 1.0)
            .anneal(&mut deme, &mut StdRng::seed_from_u64(11))
            .unwrap();

        assert!(trace.steps > 0);
        assert!(trace.worsening > 0);
        assert!(trace.worsening <= trace.accepted);

        // The optimum found at the start is still reported.
        let outcome = deme.finish(None);
        assert_eq!(outcome.candidates[0].score.total(), 0.0);
    }
}

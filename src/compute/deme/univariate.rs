//! Univariate estimation-of-distribution algorithm.

use std::collections::HashSet;

use log::debug;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::compute::representation::{FieldLayout, FieldSpec, Instance, RepresentationError, Setting};
use crate::schema::{Score, UnivariateConfig};

use super::Deme;

/// Smallest standard deviation kept for a continuous dimension.
const MIN_STD: f64 = 1e-6;

/// Independent per-dimension model.
#[derive(Debug, Clone)]
enum Marginal {
    /// Probability of each setting.
    Disc(Vec<f64>),
    /// Gaussian over the value.
    Contin { mean: f64, std: f64 },
}

#[derive(Debug, Clone)]
struct Model {
    marginals: Vec<Marginal>,
}

impl Model {
    /// Uniform over discrete settings, centred on the identity for
    /// continuous ones.
    fn new(layout: &FieldLayout) -> Self {
        let marginals = layout
            .specs()
            .iter()
            .map(|spec| match spec {
                FieldSpec::Disc(d) => Marginal::Disc(vec![1.0 / d.arity as f64; d.arity]),
                FieldSpec::Contin(c) => Marginal::Contin {
                    mean: c.mean,
                    std: c.step_size,
                },
            })
            .collect();
        Self { marginals }
    }

    fn sample(&self, count: usize, rng: &mut StdRng) -> Vec<Instance> {
        enum Sampler {
            Disc(Option<WeightedIndex<f64>>),
            Contin(Option<Normal<f64>>, f64),
        }
        let samplers: Vec<Sampler> = self
            .marginals
            .iter()
            .map(|m| match m {
                Marginal::Disc(p) => Sampler::Disc(WeightedIndex::new(p).ok()),
                Marginal::Contin { mean, std } => Sampler::Contin(Normal::new(*mean, *std).ok(), *mean),
            })
            .collect();

        (0..count)
            .map(|_| {
                Instance(
                    samplers
                        .iter()
                        .map(|s| match s {
                            Sampler::Disc(Some(d)) => Setting::Disc(d.sample(rng)),
                            Sampler::Disc(None) => Setting::Disc(0),
                            Sampler::Contin(Some(n), _) => Setting::Contin(n.sample(rng)),
                            Sampler::Contin(None, mean) => Setting::Contin(*mean),
                        })
                        .collect(),
                )
            })
            .collect()
    }

    /// Move every marginal toward the empirical distribution of `elite`.
    fn update(&mut self, elite: &[&Instance], rate: f64) {
        let n = elite.len() as f64;
        for (i, marginal) in self.marginals.iter_mut().enumerate() {
            match marginal {
                Marginal::Disc(p) => {
                    let mut freq = vec![0.0; p.len()];
                    for instance in elite {
                        if let Setting::Disc(v) = instance.0[i]
                            && v < freq.len()
                        {
                            freq[v] += 1.0 / n;
                        }
                    }
                    for (p, f) in p.iter_mut().zip(freq) {
                        *p = (1.0 - rate) * *p + rate * f;
                    }
                }
                Marginal::Contin { mean, std } => {
                    let values: Vec<f64> = elite
                        .iter()
                        .filter_map(|inst| match inst.0[i] {
                            Setting::Contin(v) => Some(v),
                            Setting::Disc(_) => None,
                        })
                        .collect();
                    if values.is_empty() {
                        continue;
                    }
                    let m = values.iter().sum::<f64>() / values.len() as f64;
                    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
                    *mean = (1.0 - rate) * *mean + rate * m;
                    *std = ((1.0 - rate) * *std + rate * var.sqrt()).max(MIN_STD);
                }
            }
        }
    }
}

/// Samples generations from a univariate model, keeps the best
/// `selection_ratio` of each and moves the model toward them.
#[derive(Debug, Clone)]
pub struct UnivariateEda {
    config: UnivariateConfig,
    pop_size_ratio: f64,
}

impl UnivariateEda {
    pub fn new(config: UnivariateConfig, pop_size_ratio: f64) -> Self {
        Self {
            config,
            pop_size_ratio,
        }
    }

    /// `ceil(pop_size_ratio * bits)`, at least 2.
    fn population_size(&self, layout: &FieldLayout) -> usize {
        ((self.pop_size_ratio * layout.information_theoretic_bits()).ceil() as usize).max(2)
    }

    pub fn optimize(&self, deme: &mut Deme<'_>, rng: &mut StdRng) -> Result<(), RepresentationError> {
        let layout = deme.layout().clone();
        let size = self.population_size(&layout);
        let mut model = Model::new(&layout);
        let mut best: Option<Score> = None;
        let mut stagnant = 0;
        let mut generation = 0;

        while generation < self.config.generations && !deme.should_stop() {
            let mut population = Vec::with_capacity(size + 1);
            if generation == 0 {
                population.push(layout.identity());
            }
            population.extend(model.sample(size, rng));
            let mut seen = HashSet::new();
            population.retain(|instance| seen.insert(instance.clone()));

            let scores = deme.evaluate(&population)?;
            let mut scored: Vec<(&Instance, Score)> = population
                .iter()
                .zip(scores)
                .filter_map(|(instance, score)| score.map(|s| (instance, s)))
                .collect();
            generation += 1;
            if scored.is_empty() {
                break;
            }

            scored.sort_by(|a, b| b.1.rank_cmp(&a.1));
            let elite_count = ((scored.len() as f64 * self.config.selection_ratio).ceil() as usize)
                .clamp(1, scored.len());
            let elite: Vec<&Instance> = scored[..elite_count].iter().map(|(i, _)| *i).collect();
            model.update(&elite, self.config.learning_rate);

            let leader = &scored[0].1;
            if best.as_ref().is_none_or(|b| leader.is_better_than(b)) {
                best = Some(leader.clone());
                stagnant = 0;
            } else {
                stagnant += 1;
                if self.config.stagnation_limit.is_some_and(|limit| stagnant >= limit) {
                    debug!("Univariate stagnated after {} generations", generation);
                    break;
                }
            }
        }

        debug!(
            "Univariate ran {} generations of {} samples",
            generation, size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::deme::EvalBudget;
    use crate::compute::reduction::BasicReducer;
    use crate::compute::representation::build_knobs;
    use crate::compute::scoring::{ReferenceScorer, Scorer};
    use crate::schema::{CandidateTree, Signature};
    use rand::SeedableRng;

    #[test]
    fn test_model_update_moves_toward_elite() {
        let exemplar = CandidateTree::and(vec![CandidateTree::arg(0)]);
        let mapper = build_knobs(&exemplar, 0, Signature::boolean(2), &BasicReducer).unwrap();
        let layout = crate::compute::representation::to_field_layout(&mapper);
        let mut model = Model::new(&layout);

        let mut chosen = layout.identity();
        chosen.0[0] = Setting::Disc(1);
        model.update(&[&chosen, &chosen], 1.0);

        match &model.marginals[0] {
            Marginal::Disc(p) => assert_eq!(p, &vec![0.0, 1.0]),
            Marginal::Contin { .. } => panic!("expected discrete marginal"),
        }
        let samples = model.sample(10, &mut StdRng::seed_from_u64(0));
        assert!(samples.iter().all(|s| s.0[0] == Setting::Disc(1)));
    }

    #[test]
    fn test_learns_conjunction() {
        let target = CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::not_arg(1)]);
        let scorer = ReferenceScorer::boolean(&target, 3).unwrap();
        let exemplar = CandidateTree::and(vec![]);
        let reducer = BasicReducer;
        let mapper = build_knobs(&exemplar, 2, Signature::boolean(3), &reducer).unwrap();
        let budget = EvalBudget::new(2000);
        let mut deme = Deme::new(&mapper, &scorer as &dyn Scorer, &reducer, &budget).with_effort(2);

        let eda = UnivariateEda::new(UnivariateConfig::default(), 20.0);
        eda.optimize(&mut deme, &mut StdRng::seed_from_u64(11)).unwrap();

        let best = &deme.finish(None).candidates[0];
        assert_eq!(best.score.total(), 0.0);
        assert_eq!(best.tree, reducer_form(&target));
    }

    fn reducer_form(tree: &CandidateTree) -> CandidateTree {
        use crate::compute::scoring::Reducer;
        BasicReducer.reduce(tree, 2)
    }
}

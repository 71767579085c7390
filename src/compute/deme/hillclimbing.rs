//! Discrete hillclimbing with widening neighborhoods.

use log::debug;
use rand::rngs::StdRng;

use crate::compute::representation::RepresentationError;
use crate::schema::HillclimbingConfig;

use super::neighborhood::{distance_one, max_distance, sample_neighbors};
use super::{Deme, best_of};

/// Moves to the best strictly improving neighbor. When a neighborhood
/// holds no improvement the search distance widens, up to
/// `ceil(max_dist_ratio * log2(bits))`; distance 1 is enumerated in full,
/// wider distances are sampled.
#[derive(Debug, Clone)]
pub struct Hillclimber {
    config: HillclimbingConfig,
    max_dist_ratio: f64,
}

impl Hillclimber {
    pub fn new(config: HillclimbingConfig, max_dist_ratio: f64) -> Self {
        Self {
            config,
            max_dist_ratio,
        }
    }

    pub fn optimize(&self, deme: &mut Deme<'_>, rng: &mut StdRng) -> Result<(), RepresentationError> {
        let layout = deme.layout().clone();
        let max_dist = max_distance(&layout, self.max_dist_ratio);

        let mut center = layout.identity();
        let mut center_score = deme.evaluate(std::slice::from_ref(&center))?.pop().flatten();
        let mut distance = 1;
        let mut moves = 0;

        while !deme.should_stop() {
            let neighbors = if distance == 1 {
                distance_one(&layout, &center)
            } else {
                sample_neighbors(&layout, &center, distance, self.config.max_neighbors, rng)
            };
            if neighbors.is_empty() {
                break;
            }

            let scores = deme.evaluate(&neighbors)?;
            match best_of(neighbors, scores) {
                Some((instance, score))
                    if center_score.as_ref().is_none_or(|c| score.is_better_than(c)) =>
                {
                    center = instance;
                    center_score = Some(score);
                    distance = 1;
                    moves += 1;
                    if self.config.terminate_if_improvement {
                        break;
                    }
                }
                _ => {
                    distance += 1;
                    if distance > max_dist {
                        break;
                    }
                }
            }
        }

        debug!(
            "Hillclimbing made {} moves, reached distance {} of {}",
            moves,
            distance.min(max_dist),
            max_dist
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::deme::EvalBudget;
    use crate::compute::representation::build_knobs;
    use crate::compute::scoring::{IdentityReducer, ScoreError};
    use crate::schema::{CandidateTree, Node, Score, Signature};
    use rand::SeedableRng;

    fn contains_negation(tree: &CandidateTree) -> bool {
        tree.node == Node::NotArg(0) || tree.children.iter().any(contains_negation)
    }

    #[test]
    fn test_single_knob_picks_better_setting() {
        // not(#1) has one literal knob of arity 2: #1 or !#1.
        let exemplar = CandidateTree::not(CandidateTree::arg(0));
        let mapper = build_knobs(&exemplar, 0, Signature::boolean(1), &IdentityReducer).unwrap();
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.disc_knobs().next().unwrap().spec().arity, 2);

        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            let value = if contains_negation(tree) { 1.0 } else { 0.0 };
            Ok(Score::new(vec![value], tree.complexity()))
        };
        let budget = EvalBudget::new(2);
        let mut deme = Deme::new(&mapper, &scorer, &IdentityReducer, &budget);
        let climber = Hillclimber::new(HillclimbingConfig::default(), 1.0);
        climber
            .optimize(&mut deme, &mut StdRng::seed_from_u64(1))
            .unwrap();

        let outcome = deme.finish(None);
        assert_eq!(budget.used(), 2);
        let best = &outcome.candidates[0];
        assert_eq!(best.score.total(), 1.0);
        assert_eq!(best.tree.to_string(), "not(!#1)");
    }

    #[test]
    fn test_climbs_to_target() {
        // Reward each present literal #i for i in {0, 2}, penalise others.
        let exemplar = CandidateTree::and(vec![]);
        let mapper = build_knobs(&exemplar, 0, Signature::boolean(3), &IdentityReducer).unwrap();
        let scorer = |tree: &CandidateTree| -> Result<Score, ScoreError> {
            let leaves: Vec<Node> = if tree.is_leaf() {
                vec![tree.node]
            } else {
                tree.children.iter().map(|c| c.node).collect()
            };
            let value = leaves
                .iter()
                .map(|n| match n {
                    Node::Arg(0) | Node::Arg(2) => 1.0,
                    Node::Bool(_) => 0.0,
                    _ => -1.0,
                })
                .sum();
            Ok(Score::new(vec![value], tree.complexity()))
        };
        let budget = EvalBudget::new(500);
        let mut deme = Deme::new(&mapper, &scorer, &IdentityReducer, &budget);
        let climber = Hillclimber::new(
            HillclimbingConfig {
                terminate_if_improvement: false,
                ..Default::default()
            },
            1.0,
        );
        climber
            .optimize(&mut deme, &mut StdRng::seed_from_u64(9))
            .unwrap();

        let best = &deme.finish(None).candidates[0];
        assert_eq!(best.score.total(), 2.0);
        assert_eq!(best.tree, CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::arg(2)]));
    }
}

//! Metapopulation: the cross-deme archive of scored candidates.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;
use rand::Rng;

use crate::schema::{CandidateTree, MetapopulationConfig, Score, ScoredCandidate};

/// Candidate ordered best first.
#[derive(Debug, Clone)]
struct Ranked(ScoredCandidate);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.rank_cmp(&self.0)
    }
}

/// What a merge did to the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    /// Incoming candidates whose tree was already archived.
    pub duplicates: usize,
    /// Incoming candidates dominated by an archive member.
    pub dominated: usize,
    /// Archive members removed because a new candidate dominates them.
    pub displaced: usize,
    /// Archive members evicted by the size cap.
    pub evicted: usize,
    /// Incoming candidates with a non-finite score.
    pub invalid: usize,
}

/// Ranked, deduplicated archive. Every entry has a distinct canonical tree.
#[derive(Debug, Default)]
pub struct Metapopulation {
    config: MetapopulationConfig,
    ranked: BTreeSet<Ranked>,
    index: HashMap<CandidateTree, ScoredCandidate>,
    expanded: HashSet<CandidateTree>,
    /// Exemplars never to be selected again, even with `revisit`.
    exhausted: HashSet<CandidateTree>,
}

impl Metapopulation {
    pub fn new(config: MetapopulationConfig) -> Self {
        Self {
            config,
            ranked: BTreeSet::new(),
            index: HashMap::new(),
            expanded: HashSet::new(),
            exhausted: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, tree: &CandidateTree) -> bool {
        self.index.contains_key(tree)
    }

    /// Entries best first.
    pub fn iter(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.ranked.iter().map(|r| &r.0)
    }

    /// Up to `n` best candidates, best first.
    pub fn best(&self, n: usize) -> Vec<ScoredCandidate> {
        self.iter().take(n).cloned().collect()
    }

    pub fn best_score(&self) -> Option<&Score> {
        self.ranked.first().map(|r| &r.0.score)
    }

    fn remove(&mut self, tree: &CandidateTree) -> Option<ScoredCandidate> {
        let entry = self.index.remove(tree)?;
        self.ranked.remove(&Ranked(entry.clone()));
        Some(entry)
    }

    /// Merge candidates into the archive.
    ///
    /// Candidates are checked against the archive before anything is
    /// committed: non-finite scores and already archived trees are
    /// rejected, and unless `include_dominated` is set, candidates
    /// dominated by a member are dropped and members dominated by a new
    /// candidate are removed. The size cap then evicts the worst entries.
    pub fn insert(&mut self, candidates: Vec<ScoredCandidate>) -> MergeSummary {
        let mut summary = MergeSummary::default();

        let mut incoming: HashMap<CandidateTree, ScoredCandidate> = HashMap::new();
        for candidate in candidates {
            if !candidate.score.is_finite() {
                summary.invalid += 1;
                continue;
            }
            match incoming.get(&candidate.tree) {
                Some(existing) if existing.rank_cmp(&candidate) != Ordering::Less => {
                    summary.duplicates += 1;
                }
                _ => {
                    incoming.insert(candidate.tree.clone(), candidate);
                }
            }
        }
        let mut incoming: Vec<ScoredCandidate> = incoming.into_values().collect();
        incoming.sort_by(|a, b| b.rank_cmp(a));

        for candidate in incoming {
            if self.index.contains_key(&candidate.tree) {
                summary.duplicates += 1;
                continue;
            }
            if !self.config.include_dominated {
                if self.iter().any(|e| e.score.dominates(&candidate.score)) {
                    summary.dominated += 1;
                    continue;
                }
                let displaced: Vec<CandidateTree> = self
                    .iter()
                    .filter(|e| candidate.score.dominates(&e.score))
                    .map(|e| e.tree.clone())
                    .collect();
                for tree in displaced {
                    self.remove(&tree);
                    summary.displaced += 1;
                }
            }
            self.index.insert(candidate.tree.clone(), candidate.clone());
            self.ranked.insert(Ranked(candidate));
            summary.added += 1;
        }

        if let Some(max) = self.config.max_size {
            while self.ranked.len() > max {
                let Some(worst) = self.ranked.pop_last() else {
                    break;
                };
                self.index.remove(&worst.0.tree);
                summary.evicted += 1;
            }
        }

        debug!(
            "Merged {} candidates ({} duplicates, {} dominated, {} displaced, {} evicted), archive size {}",
            summary.added,
            summary.duplicates,
            summary.dominated,
            summary.displaced,
            summary.evicted,
            self.len()
        );
        summary
    }

    /// Next tree to expand into a deme.
    ///
    /// The best unexpanded candidate is preferred. When every candidate
    /// has been expanded, `revisit` allows a rank-weighted pick among the
    /// ones not yet exhausted; otherwise there is nothing left to expand.
    pub fn select_exemplar<R: Rng>(&self, rng: &mut R) -> Option<CandidateTree> {
        let open: Vec<&ScoredCandidate> = self
            .iter()
            .filter(|e| !self.exhausted.contains(&e.tree))
            .collect();
        if let Some(entry) = open.iter().find(|e| !self.expanded.contains(&e.tree)) {
            return Some(entry.tree.clone());
        }
        if !self.config.revisit || open.is_empty() {
            return None;
        }

        // Probability proportional to reversed rank.
        let n = open.len();
        let total: usize = (1..=n).sum();
        let mut target = rng.gen_range(0..total);
        for (i, entry) in open.iter().enumerate() {
            let rank = n - i;
            if target < rank {
                return Some(entry.tree.clone());
            }
            target -= rank;
        }
        open.first().map(|e| e.tree.clone())
    }

    /// Record that `tree` has been expanded.
    pub fn mark_expanded(&mut self, tree: &CandidateTree) {
        self.expanded.insert(tree.clone());
    }

    /// Exclude `tree` from every future selection.
    pub fn mark_exhausted(&mut self, tree: &CandidateTree) {
        self.expanded.insert(tree.clone());
        self.exhausted.insert(tree.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn candidate(arg: usize, behavior: Vec<f64>) -> ScoredCandidate {
        let tree = CandidateTree::arg(arg);
        let complexity = tree.complexity();
        ScoredCandidate::new(tree, Score::new(behavior, complexity), 0)
    }

    #[test]
    fn test_best_ordering() {
        let mut meta = Metapopulation::new(MetapopulationConfig::default());
        meta.insert(vec![
            candidate(0, vec![0.0, -1.0]),
            candidate(1, vec![-1.0, 0.0]),
            candidate(2, vec![0.0, 0.0]),
        ]);
        // #3 dominates nothing strictly, so all three stay.
        assert_eq!(meta.len(), 3);
        let best = meta.best(2);
        assert_eq!(best[0].tree, CandidateTree::arg(2));
        assert_eq!(best.len(), 2);
        assert_eq!(meta.best_score().unwrap().total(), 0.0);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut meta = Metapopulation::new(MetapopulationConfig::default());
        let summary = meta.insert(vec![candidate(0, vec![1.0]), candidate(0, vec![1.0])]);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.duplicates, 1);

        let summary = meta.insert(vec![candidate(0, vec![1.0])]);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn test_domination() {
        let mut meta = Metapopulation::new(MetapopulationConfig::default());
        meta.insert(vec![candidate(0, vec![0.0, 0.0])]);

        let summary = meta.insert(vec![candidate(1, vec![-1.0, -1.0])]);
        assert_eq!(summary.dominated, 1);
        assert!(!meta.contains(&CandidateTree::arg(1)));

        let summary = meta.insert(vec![candidate(2, vec![1.0, 1.0])]);
        assert_eq!(summary.displaced, 1);
        assert!(!meta.contains(&CandidateTree::arg(0)));
        assert_eq!(meta.len(), 1);

        let mut keep_all = Metapopulation::new(MetapopulationConfig {
            include_dominated: true,
            ..Default::default()
        });
        keep_all.insert(vec![candidate(0, vec![0.0]), candidate(1, vec![-5.0])]);
        assert_eq!(keep_all.len(), 2);
    }

    #[test]
    fn test_size_cap_evicts_worst() {
        let mut meta = Metapopulation::new(MetapopulationConfig {
            include_dominated: true,
            max_size: Some(2),
            ..Default::default()
        });
        let summary = meta.insert((0..5).map(|i| candidate(i, vec![i as f64])).collect());
        assert_eq!(summary.evicted, 3);
        let trees: Vec<_> = meta.iter().map(|e| e.tree.clone()).collect();
        assert_eq!(trees, vec![CandidateTree::arg(4), CandidateTree::arg(3)]);
    }

    #[test]
    fn test_invalid_scores_rejected() {
        let mut meta = Metapopulation::new(MetapopulationConfig::default());
        let summary = meta.insert(vec![candidate(0, vec![f64::NAN])]);
        assert_eq!(summary.invalid, 1);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_select_exemplar() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut meta = Metapopulation::new(MetapopulationConfig {
            include_dominated: true,
            ..Default::default()
        });
        assert_eq!(meta.select_exemplar(&mut rng), None);

        meta.insert(vec![candidate(0, vec![1.0]), candidate(1, vec![2.0])]);
        let first = meta.select_exemplar(&mut rng).unwrap();
        assert_eq!(first, CandidateTree::arg(1));
        meta.mark_expanded(&first);
        assert_eq!(meta.select_exemplar(&mut rng), Some(CandidateTree::arg(0)));
        meta.mark_expanded(&CandidateTree::arg(0));
        assert_eq!(meta.select_exemplar(&mut rng), None);

        let mut revisiting = Metapopulation::new(MetapopulationConfig {
            revisit: true,
            include_dominated: true,
            ..Default::default()
        });
        revisiting.insert(vec![candidate(0, vec![1.0])]);
        revisiting.mark_expanded(&CandidateTree::arg(0));
        assert_eq!(revisiting.select_exemplar(&mut rng), Some(CandidateTree::arg(0)));
        revisiting.mark_exhausted(&CandidateTree::arg(0));
        assert_eq!(revisiting.select_exemplar(&mut rng), None);
    }

    proptest! {
        #[test]
        fn prop_no_duplicate_keys(
            batches in prop::collection::vec(
                prop::collection::vec((0usize..6, -3i32..3, -3i32..3), 0..8),
                1..6,
            ),
            include_dominated in any::<bool>(),
            cap in prop::option::of(1usize..5),
        ) {
            let mut meta = Metapopulation::new(MetapopulationConfig {
                include_dominated,
                max_size: cap,
                ..Default::default()
            });
            for batch in batches {
                meta.insert(
                    batch
                        .into_iter()
                        .map(|(arg, a, b)| candidate(arg, vec![a as f64, b as f64]))
                        .collect(),
                );
                let trees: HashSet<_> = meta.iter().map(|e| e.tree.clone()).collect();
                prop_assert_eq!(trees.len(), meta.len());
                prop_assert_eq!(meta.ranked.len(), meta.index.len());
                if let Some(cap) = cap {
                    prop_assert!(meta.len() <= cap);
                }
            }
        }
    }
}

//! Quick search performance test

use knob_search::{
    compute::{BasicReducer, ReferenceScorer, SearchEngine},
    schema::{CandidateTree, JobSchedule, SearchConfig, Signature, TerminationConfig},
};
use std::time::Instant;

/// Boolean multiplexer: `address` selector bits pick one of `2^address` data bits.
fn multiplexer(address: usize) -> CandidateTree {
    let data = 1 << address;
    let rows = (0..data)
        .map(|row| {
            let mut literals: Vec<CandidateTree> = (0..address)
                .map(|bit| {
                    if row >> bit & 1 == 1 {
                        CandidateTree::arg(bit)
                    } else {
                        CandidateTree::not_arg(bit)
                    }
                })
                .collect();
            literals.push(CandidateTree::arg(address + row));
            CandidateTree::and(literals)
        })
        .collect();
    CandidateTree::or(rows)
}

fn main() {
    println!("=== Search Performance Test ===\n");

    let arity = 2 + (1 << 2);
    let target = multiplexer(2);

    for algorithm in ["hc", "sa", "un"] {
        println!("Algorithm: {}", algorithm);

        let scorer = ReferenceScorer::boolean(&target, arity).unwrap();
        let config = SearchConfig {
            algorithm: algorithm.to_string(),
            termination: TerminationConfig {
                max_evals: 20_000,
                max_score: Some(scorer.max_score()),
                ..Default::default()
            },
            random_seed: Some(42),
            ..Default::default()
        };

        let start = Instant::now();
        let mut engine = SearchEngine::new(config, Signature::boolean(arity), scorer, BasicReducer).unwrap();
        let result = engine.run();
        let elapsed = start.elapsed();

        let total_evals = result.stats.total_evaluations;
        let evals_per_sec = total_evals as f64 / elapsed.as_secs_f64();

        println!("  Demes:          {}", result.stats.demes);
        println!("  Evaluations:    {}", total_evals);
        println!("  Cache hits:     {}", result.stats.cache_hits);
        println!("  Elapsed:        {:.2}s", elapsed.as_secs_f64());
        println!("  Evals/sec:      {:.1}", evals_per_sec);
        println!("  Best score:     {:?}", result.stats.best_score);
        println!("  Stop reason:    {:?}", result.stats.stop_reason);
        if let Some(best) = result.best.first() {
            println!("  Best program:   {}", best.tree);
        }
        println!();
    }

    println!("=== Scalability Test (hillclimbing, fixed budget) ===\n");

    for jobs in [1, 2, 4, 8] {
        let scorer = ReferenceScorer::boolean(&target, arity).unwrap();
        let config = SearchConfig {
            termination: TerminationConfig {
                max_evals: 5_000,
                ..Default::default()
            },
            jobs: JobSchedule::local(jobs),
            random_seed: Some(42),
            ..Default::default()
        };

        let start = Instant::now();
        let mut engine = SearchEngine::new(config, Signature::boolean(arity), scorer, BasicReducer).unwrap();
        let result = engine.run();
        let elapsed = start.elapsed();

        println!(
            "  {} jobs: {} evals in {:.2}s ({:.1} evals/s)",
            jobs,
            result.stats.total_evaluations,
            elapsed.as_secs_f64(),
            result.stats.total_evaluations as f64 / elapsed.as_secs_f64()
        );
    }
}

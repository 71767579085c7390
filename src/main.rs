//! Knob search CLI - Learn a reference program from a JSON run file.

use std::fs;
use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use knob_search::{
    compute::{BasicReducer, ReferenceScorer, SearchEngine},
    schema::{CandidateTree, SearchConfig, Signature},
};

/// Run file: search configuration plus the problem to learn.
#[derive(Debug, Serialize, Deserialize)]
struct RunFile {
    #[serde(default)]
    config: SearchConfig,
    signature: Signature,
    /// Program whose behavior is learned.
    reference: CandidateTree,
    /// Starting programs; the signature's default exemplar when empty.
    #[serde(default)]
    exemplars: Vec<CandidateTree>,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <run.json> [-j N[:HOST]]...", args[0]);
        eprintln!();
        eprintln!("Search for a program reproducing the reference in the run file.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  run.json     Path to run file (config, signature, reference, exemplars)");
        eprintln!("  -j N[:HOST]  Job slots; overrides the configured schedule");
        eprintln!();
        eprintln!("Example run file is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_run();
        return;
    }

    let run_path = PathBuf::from(&args[1]);
    let run_str = fs::read_to_string(&run_path).unwrap_or_else(|e| {
        eprintln!("Error reading run file: {}", e);
        std::process::exit(1);
    });
    let mut run: RunFile = serde_json::from_str(&run_str).unwrap_or_else(|e| {
        eprintln!("Error parsing run file: {}", e);
        std::process::exit(1);
    });

    let job_entries: Vec<&str> = args[2..]
        .chunks(2)
        .filter(|pair| pair[0] == "-j")
        .filter_map(|pair| pair.get(1).map(String::as_str))
        .collect();
    if !job_entries.is_empty() {
        run.config.jobs = knob_search::schema::JobSchedule::parse_entries(&job_entries)
            .unwrap_or_else(|e| {
                eprintln!("Error parsing job entries: {}", e);
                std::process::exit(1);
            });
    }

    let seed = run.config.random_seed.unwrap_or(0);
    let scorer = ReferenceScorer::for_signature(&run.reference, run.signature, seed)
        .unwrap_or_else(|e| {
            eprintln!("Error building scorer: {}", e);
            std::process::exit(1);
        });
    if run.config.termination.max_score.is_none() {
        run.config.termination.max_score = Some(scorer.max_score());
    }
    info!(
        "Learning {} over {} cases",
        run.reference,
        scorer.case_count()
    );

    let mut engine = SearchEngine::new(run.config, run.signature, scorer, BasicReducer)
        .unwrap_or_else(|e| {
            eprintln!("Error creating search: {}", e);
            std::process::exit(1);
        })
        .with_exemplars(run.exemplars);

    let result = engine.run_with_callback(|progress| {
        info!(
            "{:?}: demes={} evals={} best={:?} archive={}",
            progress.phase,
            progress.demes,
            progress.evaluations,
            progress.best_score,
            progress.metapopulation_size
        );
    });

    for candidate in &result.best {
        eprintln!(
            "{:.4} (complexity {}) {}",
            candidate.score.total(),
            candidate.score.complexity,
            candidate.tree
        );
    }
    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing result: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_example_run() {
    let run = RunFile {
        config: SearchConfig::default(),
        signature: Signature::boolean(3),
        reference: CandidateTree::or(vec![
            CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::not_arg(1)]),
            CandidateTree::arg(2),
        ]),
        exemplars: Vec::new(),
    };

    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}

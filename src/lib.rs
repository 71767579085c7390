//! Knob search - Evolutionary program search over knob representations.
//!
//! Candidate programs are small typed trees. Each search round picks an
//! exemplar from the metapopulation, turns its loci into knobs, explores
//! the resulting instance space with a local optimizer, and merges the
//! best canonical programs back.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Program trees, configuration, scores and result types
//! - `compute`: Representation, reduction, caching, deme optimization and
//!   the search orchestrator
//!
//! # Example
//!
//! ```rust,no_run
//! use knob_search::{
//!     compute::{BasicReducer, ReferenceScorer, SearchEngine},
//!     schema::{CandidateTree, SearchConfig, Signature},
//! };
//!
//! // Learn and(#1 !#2) from its truth table
//! let target = CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::not_arg(1)]);
//! let scorer = ReferenceScorer::boolean(&target, 2).unwrap();
//!
//! let mut config = SearchConfig::default();
//! config.termination.max_score = Some(scorer.max_score());
//!
//! let mut engine = SearchEngine::new(config, Signature::boolean(2), scorer, BasicReducer).unwrap();
//! let result = engine.run();
//!
//! println!("Best program: {}", result.best[0].tree);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{BasicReducer, ReferenceScorer, SearchEngine, SearchError};
pub use schema::{CandidateTree, SearchConfig, SearchResult, Signature};

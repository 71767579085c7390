//! Compute module - Knob representation, deme optimization and search.

pub mod cache;
pub mod deme;
pub mod metapopulation;
pub mod orchestrator;
pub mod reduction;
pub mod representation;
pub mod scoring;

pub use cache::{CacheStats, ScoreCache};
pub use deme::{Deme, DemeOutcome, EvalBudget, Strategy};
pub use metapopulation::{MergeSummary, Metapopulation};
pub use orchestrator::{SearchEngine, SearchError};
pub use reduction::BasicReducer;
pub use representation::{FieldLayout, Instance, KnobBuilder, KnobMapper, RepresentationError};
pub use scoring::{IdentityReducer, Reducer, ReferenceScorer, ScoreError, Scorer};

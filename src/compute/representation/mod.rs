//! Knob representation of a deme's search space.
//!
//! An exemplar tree is scanned for turnable loci ([`KnobBuilder`]), the knobs
//! are grouped by spec ([`KnobMapper`]), the groups are flattened into a
//! [`FieldLayout`], and [`encode`]/[`decode`] convert between instances of
//! that layout and candidate trees.

mod codec;
mod field_set;
mod knob;
mod knob_mapper;

pub use codec::{decode, encode};
pub use field_set::{ContinSpec, DiscSpec, FieldLayout, FieldSpec, Instance, Setting};
pub use knob::{ContinKnob, DiscKnob};
pub use knob_mapper::{KnobBuilder, KnobMapper, build_knobs, to_field_layout};

/// Knob and instance invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepresentationError {
    #[error("Expected {expected} settings, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Setting {index} does not match the kind of its field")]
    TypeMismatch { index: usize },
    #[error("Setting {setting} of dimension {index} is out of range for arity {arity}")]
    SettingOutOfRange {
        index: usize,
        setting: usize,
        arity: usize,
    },
    #[error("Knob path {path:?} does not exist in the representation")]
    InvalidPath { path: Vec<usize> },
    #[error("Exemplar has no turnable loci")]
    NoKnobs,
}

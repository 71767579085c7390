//! Field layout: the ordered dimensions of a deme's search space.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::RepresentationError;

/// Discrete dimension with `arity` settings. Setting 0 is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscSpec {
    pub arity: usize,
}

impl DiscSpec {
    pub fn new(arity: usize) -> Self {
        Self { arity }
    }
}

/// Continuous dimension centred on `mean`.
///
/// Moves are taken in `depth` step scales: `step_size`, `step_size *
/// expansion`, `step_size * expansion^2`, ...
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContinSpec {
    /// Identity value (the exemplar's constant).
    pub mean: f64,
    pub step_size: f64,
    pub expansion: f64,
    pub depth: u32,
}

impl ContinSpec {
    pub fn new(mean: f64, step_size: f64, expansion: f64, depth: u32) -> Self {
        Self {
            mean,
            step_size,
            expansion,
            depth,
        }
    }

    /// Step sizes from finest to coarsest.
    pub fn step_scales(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.depth).map(move |k| self.step_size * self.expansion.powi(k as i32))
    }
}

impl PartialEq for ContinSpec {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ContinSpec {}

impl PartialOrd for ContinSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContinSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mean
            .total_cmp(&other.mean)
            .then_with(|| self.step_size.total_cmp(&other.step_size))
            .then_with(|| self.expansion.total_cmp(&other.expansion))
            .then_with(|| self.depth.cmp(&other.depth))
    }
}

/// One dimension of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldSpec {
    Disc(DiscSpec),
    Contin(ContinSpec),
}

/// Value of one dimension of an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Setting {
    Disc(usize),
    Contin(f64),
}

impl PartialEq for Setting {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Setting::Disc(a), Setting::Disc(b)) => a == b,
            (Setting::Contin(a), Setting::Contin(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Setting {}

impl Hash for Setting {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Setting::Disc(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Setting::Contin(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
        }
    }
}

/// A point in a deme's search space: one setting per layout dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance(pub Vec<Setting>);

impl Instance {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn settings(&self) -> &[Setting] {
        &self.0
    }

    /// Number of dimensions in which the two instances differ.
    pub fn distance(&self, other: &Instance) -> usize {
        let common = self
            .0
            .iter()
            .zip(&other.0)
            .filter(|(a, b)| a != b)
            .count();
        common + self.0.len().abs_diff(other.0.len())
    }
}

/// Ordered list of field specs for one exemplar.
///
/// Discrete dimensions come first in ascending spec order, followed by the
/// continuous dimensions in ascending spec order. Built only by
/// [`super::to_field_layout`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    specs: Vec<FieldSpec>,
}

impl FieldLayout {
    pub(crate) fn new(specs: Vec<FieldSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn disc_count(&self) -> usize {
        self.specs
            .iter()
            .filter(|s| matches!(s, FieldSpec::Disc(_)))
            .count()
    }

    pub fn contin_count(&self) -> usize {
        self.len() - self.disc_count()
    }

    /// The all-identity instance (the exemplar itself).
    pub fn identity(&self) -> Instance {
        Instance(
            self.specs
                .iter()
                .map(|spec| match spec {
                    FieldSpec::Disc(_) => Setting::Disc(0),
                    FieldSpec::Contin(c) => Setting::Contin(c.mean),
                })
                .collect(),
        )
    }

    /// Information-theoretic size of the space in bits.
    ///
    /// Each continuous dimension counts as `depth` ternary choices.
    pub fn information_theoretic_bits(&self) -> f64 {
        self.specs
            .iter()
            .map(|spec| match spec {
                FieldSpec::Disc(d) => (d.arity as f64).log2(),
                FieldSpec::Contin(c) => c.depth as f64 * 3f64.log2(),
            })
            .sum()
    }

    /// Check that an instance fits this layout.
    pub fn check(&self, instance: &Instance) -> Result<(), RepresentationError> {
        if instance.len() != self.len() {
            return Err(RepresentationError::SizeMismatch {
                expected: self.len(),
                actual: instance.len(),
            });
        }
        for (index, (spec, setting)) in self.specs.iter().zip(instance.settings()).enumerate() {
            match (spec, setting) {
                (FieldSpec::Disc(d), Setting::Disc(v)) => {
                    if *v >= d.arity {
                        return Err(RepresentationError::SettingOutOfRange {
                            index,
                            setting: *v,
                            arity: d.arity,
                        });
                    }
                }
                (FieldSpec::Contin(_), Setting::Contin(v)) => {
                    if !v.is_finite() {
                        return Err(RepresentationError::TypeMismatch { index });
                    }
                }
                _ => return Err(RepresentationError::TypeMismatch { index }),
            }
        }
        Ok(())
    }
}

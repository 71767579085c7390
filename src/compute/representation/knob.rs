//! Knobs: reversible edits bound to one locus of a representation tree.
//!
//! Every knob rewrites only the node label at its own path and never changes
//! the shape of the tree, so knobs at different loci commute. Removal is
//! expressed by turning a leaf into [`Node::Null`], which
//! [`CandidateTree::clean`] later drops.

use crate::schema::{CandidateTree, Node};

use super::{ContinSpec, DiscSpec, RepresentationError};

/// Discrete knob: chooses one of a fixed set of node labels.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscKnob {
    path: Vec<usize>,
    /// `alternatives[0]` is the label the knob was built from.
    alternatives: Vec<Node>,
}

impl DiscKnob {
    pub fn new(path: Vec<usize>, alternatives: Vec<Node>) -> Self {
        Self { path, alternatives }
    }

    pub fn spec(&self) -> DiscSpec {
        DiscSpec::new(self.alternatives.len())
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn alternatives(&self) -> &[Node] {
        &self.alternatives
    }

    /// Rewrite the locus to the label of `setting`.
    pub fn turn(&self, tree: &mut CandidateTree, setting: usize) -> Result<(), RepresentationError> {
        let label = *self.alternatives.get(setting).ok_or(
            RepresentationError::SettingOutOfRange {
                index: 0,
                setting,
                arity: self.alternatives.len(),
            },
        )?;
        let locus = tree
            .subtree_mut(&self.path)
            .ok_or_else(|| RepresentationError::InvalidPath {
                path: self.path.clone(),
            })?;
        locus.node = label;
        Ok(())
    }

    /// Current setting of this knob in `tree`; identity when the locus is
    /// missing or holds a label the knob does not know.
    pub fn setting_of(&self, tree: &CandidateTree) -> usize {
        tree.subtree(&self.path)
            .and_then(|locus| self.alternatives.iter().position(|a| *a == locus.node))
            .unwrap_or(0)
    }
}

/// Continuous knob: sets the value of a numeric constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinKnob {
    path: Vec<usize>,
    spec: ContinSpec,
}

impl ContinKnob {
    pub fn new(path: Vec<usize>, spec: ContinSpec) -> Self {
        Self { path, spec }
    }

    pub fn spec(&self) -> ContinSpec {
        self.spec
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn turn(&self, tree: &mut CandidateTree, value: f64) -> Result<(), RepresentationError> {
        let locus = tree
            .subtree_mut(&self.path)
            .ok_or_else(|| RepresentationError::InvalidPath {
                path: self.path.clone(),
            })?;
        locus.node = Node::Contin(value);
        Ok(())
    }

    pub fn setting_of(&self, tree: &CandidateTree) -> f64 {
        match tree.subtree(&self.path).map(|locus| locus.node) {
            Some(Node::Contin(value)) => value,
            _ => self.spec.mean,
        }
    }
}

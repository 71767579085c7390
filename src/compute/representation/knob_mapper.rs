//! Knob construction and spec-ordered grouping.
//!
//! Building is a two-step pipeline: [`KnobBuilder::build`] scans an exemplar
//! and returns an immutable [`KnobMapper`]; [`to_field_layout`] is a pure
//! projection of that mapper. Both the layout and the codec iterate the same
//! `BTreeMap`s, so dimension order cannot drift from knob order.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::compute::scoring::Reducer;
use crate::schema::{CandidateTree, Node, OutputType, RepresentationConfig, Signature};

use super::{ContinKnob, ContinSpec, DiscKnob, DiscSpec, FieldLayout, FieldSpec, RepresentationError};

/// Knobs of one exemplar grouped by spec.
#[derive(Debug, Clone)]
pub struct KnobMapper {
    /// Exemplar extended with insertion placeholders.
    representation: CandidateTree,
    disc: BTreeMap<DiscSpec, Vec<DiscKnob>>,
    contin: BTreeMap<ContinSpec, Vec<ContinKnob>>,
}

impl KnobMapper {
    /// Tree every decode starts from.
    pub fn representation(&self) -> &CandidateTree {
        &self.representation
    }

    /// Discrete knobs in layout order.
    pub fn disc_knobs(&self) -> impl Iterator<Item = &DiscKnob> {
        self.disc.values().flatten()
    }

    /// Continuous knobs in layout order.
    pub fn contin_knobs(&self) -> impl Iterator<Item = &ContinKnob> {
        self.contin.values().flatten()
    }

    pub fn disc_count(&self) -> usize {
        self.disc.values().map(Vec::len).sum()
    }

    pub fn contin_count(&self) -> usize {
        self.contin.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.disc_count() + self.contin_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Project a mapper onto its field layout.
pub fn to_field_layout(mapper: &KnobMapper) -> FieldLayout {
    let disc = mapper
        .disc
        .iter()
        .flat_map(|(spec, knobs)| knobs.iter().map(move |_| FieldSpec::Disc(*spec)));
    let contin = mapper
        .contin
        .iter()
        .flat_map(|(spec, knobs)| knobs.iter().map(move |_| FieldSpec::Contin(*spec)));
    FieldLayout::new(disc.chain(contin).collect())
}

/// Build the knobs of `exemplar` with default continuous parameters.
pub fn build_knobs(
    exemplar: &CandidateTree,
    effort: u8,
    signature: Signature,
    reducer: &dyn Reducer,
) -> Result<KnobMapper, RepresentationError> {
    KnobBuilder::new(signature, reducer)
        .with_effort(effort)
        .build(exemplar)
}

/// Leaf exemplars have no loci to insert under. Wrap them in the operator
/// whose reduction gives the leaf back.
fn scaffold(exemplar: &CandidateTree, output: OutputType) -> CandidateTree {
    if !exemplar.is_leaf() {
        return exemplar.clone();
    }
    match (output, exemplar.node) {
        (OutputType::Boolean, Node::Bool(true)) => CandidateTree::and(Vec::new()),
        (OutputType::Boolean, Node::Bool(false)) => CandidateTree::or(Vec::new()),
        (OutputType::Boolean, _) => CandidateTree::and(vec![exemplar.clone()]),
        (OutputType::Numeric, _) => CandidateTree::plus(vec![exemplar.clone()]),
    }
}

/// Enumerates the legal local edits of an exemplar.
pub struct KnobBuilder<'a> {
    signature: Signature,
    reducer: &'a dyn Reducer,
    effort: u8,
    contin: RepresentationConfig,
    ignored: BTreeSet<Node>,
}

enum Knob {
    Disc(DiscKnob),
    Contin(ContinKnob),
}

impl<'a> KnobBuilder<'a> {
    pub fn new(signature: Signature, reducer: &'a dyn Reducer) -> Self {
        Self {
            signature,
            reducer,
            effort: 0,
            contin: RepresentationConfig::default(),
            ignored: BTreeSet::new(),
        }
    }

    /// Reduction effort used to prune knobs (0 keeps every knob).
    pub fn with_effort(mut self, effort: u8) -> Self {
        self.effort = effort;
        self
    }

    /// Continuous knob parameters.
    pub fn with_contin(mut self, contin: RepresentationConfig) -> Self {
        self.contin = contin;
        self
    }

    /// Operators and arguments never offered as a setting.
    pub fn with_ignored(mut self, ignored: BTreeSet<Node>) -> Self {
        self.ignored = ignored;
        self
    }

    fn allowed(&self, node: Node) -> bool {
        match node {
            Node::NotArg(i) => {
                !self.ignored.contains(&Node::Not) && !self.ignored.contains(&Node::Arg(i))
            }
            _ => !self.ignored.contains(&node),
        }
    }

    /// Knob whose identity setting is `current`, or none when every
    /// alternative is ignored.
    fn choice(&self, path: &[usize], current: Node, alternatives: &[Node]) -> Option<Knob> {
        let mut settings = vec![current];
        settings.extend(alternatives.iter().copied().filter(|n| self.allowed(*n)));
        (settings.len() >= 2).then(|| Knob::Disc(DiscKnob::new(path.to_vec(), settings)))
    }

    /// Append a placeholder child of `tree` for each argument missing from
    /// its direct leaf children, with a knob choosing among `literals(arg)`.
    fn insert_literals(
        &self,
        tree: &mut CandidateTree,
        path: &mut Vec<usize>,
        literals: fn(usize) -> Vec<Node>,
        knobs: &mut Vec<Knob>,
    ) {
        let present: BTreeSet<usize> = tree
            .children
            .iter()
            .filter_map(|c| match c.node {
                Node::Arg(i) | Node::NotArg(i) if c.is_leaf() => Some(i),
                _ => None,
            })
            .collect();
        for arg in (0..self.signature.arity).filter(|i| !present.contains(i)) {
            path.push(tree.children.len());
            if let Some(knob) = self.choice(path, Node::Null, &literals(arg)) {
                tree.children.push(CandidateTree::null());
                knobs.push(knob);
            }
            path.pop();
        }
    }

    /// Scan `exemplar` and group its knobs by spec.
    pub fn build(&self, exemplar: &CandidateTree) -> Result<KnobMapper, RepresentationError> {
        let mut representation = scaffold(exemplar, self.signature.output);
        let mut knobs = Vec::new();
        let mut path = Vec::new();
        self.visit(
            &mut representation,
            &mut path,
            self.signature.output,
            None,
            &mut knobs,
        );

        let knobs = if self.effort > 0 {
            self.prune(exemplar, &representation, knobs)
        } else {
            knobs
        };

        let mut disc: BTreeMap<DiscSpec, Vec<DiscKnob>> = BTreeMap::new();
        let mut contin: BTreeMap<ContinSpec, Vec<ContinKnob>> = BTreeMap::new();
        for knob in knobs {
            match knob {
                Knob::Disc(k) => disc.entry(k.spec()).or_default().push(k),
                Knob::Contin(k) => contin.entry(k.spec()).or_default().push(k),
            }
        }

        let mapper = KnobMapper {
            representation,
            disc,
            contin,
        };
        if mapper.is_empty() {
            return Err(RepresentationError::NoKnobs);
        }
        debug!(
            "Built {} discrete and {} continuous knobs for {}",
            mapper.disc_count(),
            mapper.contin_count(),
            exemplar
        );
        Ok(mapper)
    }

    /// Pre-order scan. Insertion sites are appended after the existing
    /// children so that every original path stays valid in the exemplar.
    fn visit(
        &self,
        tree: &mut CandidateTree,
        path: &mut Vec<usize>,
        expected: OutputType,
        parent: Option<Node>,
        knobs: &mut Vec<Knob>,
    ) {
        let node = tree.node;
        match node {
            Node::And | Node::Or => {
                let flipped = if node == Node::And { Node::Or } else { Node::And };
                knobs.extend(self.choice(path, node, &[flipped]));
                self.visit_children(tree, path, OutputType::Boolean, knobs);
                let literals = |arg| vec![Node::Arg(arg), Node::NotArg(arg)];
                self.insert_literals(tree, path, literals, knobs);
            }
            Node::Not => self.visit_children(tree, path, OutputType::Boolean, knobs),
            Node::Plus | Node::Times => {
                let flipped = if node == Node::Plus {
                    Node::Times
                } else {
                    Node::Plus
                };
                knobs.extend(self.choice(path, node, &[flipped]));
                self.visit_children(tree, path, OutputType::Numeric, knobs);
                self.insert_literals(tree, path, |arg| vec![Node::Arg(arg)], knobs);
            }
            Node::Exp | Node::Log | Node::Sin => {
                let others: Vec<Node> = [Node::Exp, Node::Log, Node::Sin]
                    .into_iter()
                    .filter(|n| *n != node)
                    .collect();
                knobs.extend(self.choice(path, node, &others));
                self.visit_children(tree, path, OutputType::Numeric, knobs);
            }
            Node::Div => self.visit_children(tree, path, OutputType::Numeric, knobs),
            Node::Bool(b) => knobs.extend(self.choice(path, node, &[Node::Bool(!b)])),
            Node::Contin(value) => {
                let spec = ContinSpec::new(
                    value,
                    self.contin.step_size,
                    self.contin.expansion,
                    self.contin.depth,
                );
                knobs.push(Knob::Contin(ContinKnob::new(path.clone(), spec)));
            }
            Node::Arg(_) | Node::NotArg(_) if expected == OutputType::Boolean => {
                let Some(negated) = node.negated_leaf() else {
                    return;
                };
                let alternatives = if parent.is_some_and(|p| p.is_connective()) {
                    vec![Node::Null, negated]
                } else {
                    vec![negated]
                };
                knobs.extend(self.choice(path, node, &alternatives));
            }
            Node::Arg(current) => {
                let others: Vec<Node> = (0..self.signature.arity)
                    .filter(|&i| i != current)
                    .map(Node::Arg)
                    .collect();
                knobs.extend(self.choice(path, node, &others));
            }
            Node::NotArg(_) | Node::Null => {}
        }
    }

    fn visit_children(
        &self,
        tree: &mut CandidateTree,
        path: &mut Vec<usize>,
        expected: OutputType,
        knobs: &mut Vec<Knob>,
    ) {
        let parent = tree.node;
        for (i, child) in tree.children.iter_mut().enumerate() {
            path.push(i);
            self.visit(child, path, expected, Some(parent), knobs);
            path.pop();
        }
    }

    /// Drop settings (and whole knobs) that reduce to an already covered
    /// canonical tree.
    ///
    /// Effort 1 removes knobs whose every non-identity setting reduces to the
    /// exemplar; effort 2 and above also collapses settings that reduce to
    /// the same canonical tree as an earlier setting.
    fn prune(
        &self,
        exemplar: &CandidateTree,
        representation: &CandidateTree,
        knobs: Vec<Knob>,
    ) -> Vec<Knob> {
        let canonical = |tree: &CandidateTree| self.reducer.reduce(&tree.clean(), self.effort);
        let base = canonical(exemplar);
        let before = knobs.len();

        let kept: Vec<Knob> = knobs
            .into_iter()
            .filter_map(|knob| {
                let Knob::Disc(knob) = knob else {
                    return Some(knob);
                };
                let forms: Vec<Option<CandidateTree>> = (0..knob.alternatives().len())
                    .map(|setting| {
                        let mut turned = representation.clone();
                        knob.turn(&mut turned, setting).ok()?;
                        Some(canonical(&turned))
                    })
                    .collect();

                if self.effort == 1 {
                    let redundant = forms[1..].iter().all(|f| f.as_ref() == Some(&base));
                    return (!redundant).then_some(Knob::Disc(knob));
                }

                let mut seen = vec![base.clone()];
                let mut alternatives = vec![knob.alternatives()[0]];
                for (label, form) in knob.alternatives().iter().zip(&forms).skip(1) {
                    let Some(form) = form else { continue };
                    if !seen.contains(form) {
                        seen.push(form.clone());
                        alternatives.push(*label);
                    }
                }
                (alternatives.len() >= 2)
                    .then(|| Knob::Disc(DiscKnob::new(knob.path().to_vec(), alternatives)))
            })
            .collect();

        debug!(
            "Knob pruning at effort {} kept {} of {} knobs",
            self.effort,
            kept.len(),
            before
        );
        kept
    }
}

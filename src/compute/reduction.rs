//! Canonicalizing reducer for candidate trees.
//!
//! Rules by effort:
//! - 0: placeholder cleanup, flattening of nested same-operator nodes,
//!   canonical child order for commutative operators, duplicate removal
//!   under `and`/`or`.
//! - 1: constant folding and negation normalisation.
//! - 2 and above: complementary literal detection (`and(x !x)`, `or(x !x)`).

use crate::schema::{CandidateTree, Node};

use super::scoring::Reducer;

/// Passes before giving up on reaching a fixpoint.
const MAX_PASSES: usize = 16;

/// Rule-based reducer. Applies its rules until the tree stops changing,
/// which makes it idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicReducer;

impl Reducer for BasicReducer {
    fn reduce(&self, tree: &CandidateTree, effort: u8) -> CandidateTree {
        let mut current = tree.clean();
        for _ in 0..MAX_PASSES {
            let next = simplify(&current, effort);
            if next == current {
                return current;
            }
            current = next;
        }
        current
    }
}

fn simplify(tree: &CandidateTree, effort: u8) -> CandidateTree {
    let children: Vec<CandidateTree> = tree
        .children
        .iter()
        .filter(|c| c.node != Node::Null)
        .map(|c| simplify(c, effort))
        .collect();

    match tree.node {
        Node::And | Node::Or => connective(tree.node, children, effort),
        Node::Plus | Node::Times => arithmetic(tree.node, children, effort),
        Node::Not if effort >= 1 => negation(children),
        Node::Exp | Node::Log | Node::Sin | Node::Div if effort >= 1 => fold_function(tree.node, children),
        node => CandidateTree::new(node, children),
    }
}

/// Children of nested nodes with the same operator, spliced in place.
fn flatten(op: Node, children: Vec<CandidateTree>) -> Vec<CandidateTree> {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        if child.node == op {
            flat.extend(child.children);
        } else {
            flat.push(child);
        }
    }
    flat
}

fn connective(op: Node, children: Vec<CandidateTree>, effort: u8) -> CandidateTree {
    let neutral = CandidateTree::boolean(op == Node::And);
    let absorbing = CandidateTree::boolean(op == Node::Or);

    let mut children = flatten(op, children);

    if effort >= 1 {
        if children.contains(&absorbing) {
            return absorbing;
        }
        children.retain(|c| *c != neutral);
    }

    children.sort();
    children.dedup();

    if effort >= 2 {
        let complementary = children.iter().any(|c| {
            c.is_leaf()
                && matches!(c.node, Node::Arg(_))
                && c.node
                    .negated_leaf()
                    .is_some_and(|neg| children.contains(&CandidateTree::leaf(neg)))
        });
        if complementary {
            return absorbing;
        }
    }

    match children.len() {
        0 => neutral,
        1 => children.into_iter().next().unwrap_or(neutral),
        _ => CandidateTree::new(op, children),
    }
}

fn negation(mut children: Vec<CandidateTree>) -> CandidateTree {
    if children.len() != 1 {
        return CandidateTree::new(Node::Not, children);
    }
    let Some(child) = children.pop() else {
        return CandidateTree::new(Node::Not, children);
    };

    if child.is_leaf()
        && let Some(negated) = child.node.negated_leaf()
    {
        return CandidateTree::leaf(negated);
    }
    if child.node == Node::Not && child.children.len() == 1 {
        return child.children.into_iter().next().unwrap_or_else(CandidateTree::null);
    }
    CandidateTree::not(child)
}

fn arithmetic(op: Node, children: Vec<CandidateTree>, effort: u8) -> CandidateTree {
    let neutral = if op == Node::Plus { 0.0 } else { 1.0 };
    let mut children = flatten(op, children);

    if effort >= 1 {
        let mut constant = neutral;
        let mut folded = 0;
        children.retain(|c| match c.node {
            Node::Contin(value) if c.is_leaf() => {
                constant = if op == Node::Plus {
                    constant + value
                } else {
                    constant * value
                };
                folded += 1;
                false
            }
            _ => true,
        });
        if op == Node::Times && constant == 0.0 && folded > 0 {
            return CandidateTree::contin(0.0);
        }
        if constant != neutral || (folded > 0 && children.is_empty()) {
            children.push(CandidateTree::contin(constant));
        }
    }

    children.sort();

    match children.len() {
        0 => CandidateTree::contin(neutral),
        1 => children
            .into_iter()
            .next()
            .unwrap_or_else(|| CandidateTree::contin(neutral)),
        _ => CandidateTree::new(op, children),
    }
}

/// Evaluate numeric functions of constants when the result is finite.
fn fold_function(op: Node, children: Vec<CandidateTree>) -> CandidateTree {
    let constant = |c: &CandidateTree| match c.node {
        Node::Contin(value) if c.is_leaf() => Some(value),
        _ => None,
    };

    let folded = match (op, children.as_slice()) {
        (Node::Exp, [x]) => constant(x).map(f64::exp),
        (Node::Log, [x]) => constant(x).map(f64::ln),
        (Node::Sin, [x]) => constant(x).map(f64::sin),
        (Node::Div, [num, den]) => match (constant(num), constant(den)) {
            (Some(n), Some(d)) => Some(n / d),
            (_, Some(d)) if d == 1.0 => return num.clone(),
            _ => None,
        },
        _ => None,
    };

    match folded {
        Some(value) if value.is_finite() => CandidateTree::contin(value),
        _ => CandidateTree::new(op, children),
    }
}

//! Scoring and reduction capabilities.
//!
//! The search core only sees the [`Scorer`] and [`Reducer`] traits. This
//! module also provides a tree interpreter and [`ReferenceScorer`], which
//! scores candidates by agreement with a reference program.

use rand::prelude::*;

use crate::schema::{CandidateTree, Node, OutputType, Score, Signature};

/// Scoring failures. The deme drops the candidate and carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("Ill-typed program: {0}")]
    IllTyped(String),
    #[error("Argument #{index} out of range for arity {arity}")]
    ArgumentOutOfRange { index: usize, arity: usize },
    #[error("Scoring failed: {0}")]
    Failed(String),
}

/// Behavioral scorer. Must be deterministic for a given tree.
pub trait Scorer: Send + Sync {
    fn score(&self, tree: &CandidateTree) -> Result<Score, ScoreError>;
}

impl<F> Scorer for F
where
    F: Fn(&CandidateTree) -> Result<Score, ScoreError> + Send + Sync,
{
    fn score(&self, tree: &CandidateTree) -> Result<Score, ScoreError> {
        self(tree)
    }
}

/// Canonicalizer. Must be idempotent: `reduce(reduce(t)) == reduce(t)`.
pub trait Reducer: Send + Sync {
    fn reduce(&self, tree: &CandidateTree, effort: u8) -> CandidateTree;
}

/// Reducer that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReducer;

impl Reducer for IdentityReducer {
    fn reduce(&self, tree: &CandidateTree, _effort: u8) -> CandidateTree {
        tree.clone()
    }
}

/// Runtime value of a program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Contin(f64),
}

impl Value {
    fn as_bool(self) -> Result<bool, ScoreError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Contin(_) => Err(ScoreError::IllTyped("expected boolean".to_string())),
        }
    }

    fn as_contin(self) -> Result<f64, ScoreError> {
        match self {
            Value::Contin(c) => Ok(c),
            Value::Bool(_) => Err(ScoreError::IllTyped("expected number".to_string())),
        }
    }
}

/// Evaluate `tree` on one input vector.
pub fn interpret(tree: &CandidateTree, inputs: &[Value]) -> Result<Value, ScoreError> {
    let arg = |index: usize| {
        inputs.get(index).copied().ok_or(ScoreError::ArgumentOutOfRange {
            index,
            arity: inputs.len(),
        })
    };
    let unary = || -> Result<f64, ScoreError> {
        match tree.children.as_slice() {
            [child] => interpret(child, inputs)?.as_contin(),
            _ => Err(ScoreError::IllTyped(format!("{} takes one argument", tree.node))),
        }
    };

    let value = match tree.node {
        Node::Null => return Err(ScoreError::IllTyped("placeholder in program".to_string())),
        Node::Bool(b) => Value::Bool(b),
        Node::Contin(c) => Value::Contin(c),
        Node::Arg(i) => arg(i)?,
        Node::NotArg(i) => Value::Bool(!arg(i)?.as_bool()?),
        Node::And => {
            let mut result = true;
            for child in &tree.children {
                result &= interpret(child, inputs)?.as_bool()?;
            }
            Value::Bool(result)
        }
        Node::Or => {
            let mut result = false;
            for child in &tree.children {
                result |= interpret(child, inputs)?.as_bool()?;
            }
            Value::Bool(result)
        }
        Node::Not => match tree.children.as_slice() {
            [child] => Value::Bool(!interpret(child, inputs)?.as_bool()?),
            _ => return Err(ScoreError::IllTyped("not takes one argument".to_string())),
        },
        Node::Plus => {
            let mut sum = 0.0;
            for child in &tree.children {
                sum += interpret(child, inputs)?.as_contin()?;
            }
            Value::Contin(sum)
        }
        Node::Times => {
            let mut product = 1.0;
            for child in &tree.children {
                product *= interpret(child, inputs)?.as_contin()?;
            }
            Value::Contin(product)
        }
        Node::Div => match tree.children.as_slice() {
            [num, den] => Value::Contin(
                interpret(num, inputs)?.as_contin()? / interpret(den, inputs)?.as_contin()?,
            ),
            _ => return Err(ScoreError::IllTyped("/ takes two arguments".to_string())),
        },
        Node::Exp => Value::Contin(unary()?.exp()),
        Node::Log => Value::Contin(unary()?.ln()),
        Node::Sin => Value::Contin(unary()?.sin()),
    };
    Ok(value)
}

/// Largest arity for which the full truth table is enumerated.
pub const MAX_TRUTH_TABLE_ARITY: usize = 16;

/// Scores candidates by agreement with a reference program.
///
/// Boolean programs are compared over the full truth table, one score
/// component per row (0 when equal, -1 otherwise). Numeric programs are
/// compared over sampled inputs, one component per sample holding the
/// negated absolute error. A perfect candidate scores 0.
#[derive(Debug, Clone)]
pub struct ReferenceScorer {
    output: OutputType,
    cases: Vec<Vec<Value>>,
    targets: Vec<Value>,
}

impl ReferenceScorer {
    /// Reference scorer for a boolean program of `arity` inputs.
    pub fn boolean(reference: &CandidateTree, arity: usize) -> Result<Self, ScoreError> {
        if arity > MAX_TRUTH_TABLE_ARITY {
            return Err(ScoreError::Failed(format!(
                "truth table arity {} exceeds {}",
                arity, MAX_TRUTH_TABLE_ARITY
            )));
        }
        let cases: Vec<Vec<Value>> = (0..1usize << arity)
            .map(|row| {
                (0..arity)
                    .map(|bit| Value::Bool(row >> bit & 1 == 1))
                    .collect()
            })
            .collect();
        Self::from_cases(reference, OutputType::Boolean, cases)
    }

    /// Reference scorer for a numeric program, sampling `samples` input
    /// vectors uniformly from `[min_input, max_input]`.
    pub fn numeric(
        reference: &CandidateTree,
        arity: usize,
        samples: usize,
        (min_input, max_input): (f64, f64),
        seed: u64,
    ) -> Result<Self, ScoreError> {
        if !(min_input < max_input) {
            return Err(ScoreError::Failed(format!(
                "empty input range [{}, {}]",
                min_input, max_input
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let cases: Vec<Vec<Value>> = (0..samples)
            .map(|_| {
                (0..arity)
                    .map(|_| Value::Contin(rng.gen_range(min_input..max_input)))
                    .collect()
            })
            .collect();
        Self::from_cases(reference, OutputType::Numeric, cases)
    }

    /// Build from a signature using default sampling for numeric outputs.
    pub fn for_signature(
        reference: &CandidateTree,
        signature: Signature,
        seed: u64,
    ) -> Result<Self, ScoreError> {
        match signature.output {
            OutputType::Boolean => Self::boolean(reference, signature.arity),
            OutputType::Numeric => Self::numeric(reference, signature.arity, 20, (0.0, 1.0), seed),
        }
    }

    fn from_cases(
        reference: &CandidateTree,
        output: OutputType,
        cases: Vec<Vec<Value>>,
    ) -> Result<Self, ScoreError> {
        let targets = cases
            .iter()
            .map(|inputs| interpret(reference, inputs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            output,
            cases,
            targets,
        })
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    /// Score of a candidate matching the reference on every case.
    pub fn max_score(&self) -> f64 {
        0.0
    }
}

impl Scorer for ReferenceScorer {
    fn score(&self, tree: &CandidateTree) -> Result<Score, ScoreError> {
        let behavior = self
            .cases
            .iter()
            .zip(&self.targets)
            .map(|(inputs, target)| {
                let value = interpret(tree, inputs)?;
                match (self.output, value, target) {
                    (OutputType::Boolean, Value::Bool(v), Value::Bool(t)) => {
                        Ok(if v == *t { 0.0 } else { -1.0 })
                    }
                    (OutputType::Numeric, Value::Contin(v), Value::Contin(t)) => {
                        let error = (v - t).abs();
                        if error.is_finite() {
                            Ok(-error)
                        } else {
                            Err(ScoreError::Failed("non-finite output".to_string()))
                        }
                    }
                    _ => Err(ScoreError::IllTyped("output type mismatch".to_string())),
                }
            })
            .collect::<Result<Vec<f64>, ScoreError>>()?;

        Ok(Score::new(behavior, tree.complexity()))
    }
}

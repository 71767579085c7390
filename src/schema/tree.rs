//! Candidate program trees.
//!
//! A candidate is an ordered rooted tree of typed nodes. Trees are plain
//! values: they are cloned freely and never shared mutably once scored.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Output type of a program or subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Boolean,
    Numeric,
}

/// A single node of a candidate tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Node {
    /// Placeholder for an absent subtree; only appears inside knob
    /// representations and is removed by [`CandidateTree::clean`].
    Null,
    And,
    Or,
    Not,
    Plus,
    Times,
    Div,
    Exp,
    Log,
    Sin,
    /// Boolean constant.
    Bool(bool),
    /// Numeric constant.
    Contin(f64),
    /// Input argument `#i` (zero based).
    Arg(usize),
    /// Negated boolean literal `!#i`.
    NotArg(usize),
}

impl Node {
    /// Position of the variant in the canonical node order.
    fn rank(&self) -> u8 {
        match self {
            Node::Null => 0,
            Node::And => 1,
            Node::Or => 2,
            Node::Not => 3,
            Node::Plus => 4,
            Node::Times => 5,
            Node::Div => 6,
            Node::Exp => 7,
            Node::Log => 8,
            Node::Sin => 9,
            Node::Bool(_) => 10,
            Node::Contin(_) => 11,
            Node::Arg(_) => 12,
            Node::NotArg(_) => 13,
        }
    }

    /// Whether this is an n-ary boolean connective (`and`/`or`).
    pub fn is_connective(&self) -> bool {
        matches!(self, Node::And | Node::Or)
    }

    /// Whether this is a variadic numeric operator (`+`/`*`).
    pub fn is_numeric_variadic(&self) -> bool {
        matches!(self, Node::Plus | Node::Times)
    }

    /// Operator or argument named as in the printed tree form (`and`, `+`,
    /// `sin`, `#2`). Constants and `null` have no name.
    pub fn from_operator(name: &str) -> Option<Node> {
        let node = match name {
            "and" => Node::And,
            "or" => Node::Or,
            "not" => Node::Not,
            "+" => Node::Plus,
            "*" => Node::Times,
            "/" => Node::Div,
            "exp" => Node::Exp,
            "log" => Node::Log,
            "sin" => Node::Sin,
            _ => {
                let index: usize = name.strip_prefix('#')?.parse().ok()?;
                Node::Arg(index.checked_sub(1)?)
            }
        };
        Some(node)
    }

    /// Negation of a boolean leaf, if it has one.
    pub fn negated_leaf(&self) -> Option<Node> {
        match *self {
            Node::Arg(i) => Some(Node::NotArg(i)),
            Node::NotArg(i) => Some(Node::Arg(i)),
            Node::Bool(b) => Some(Node::Bool(!b)),
            _ => None,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| match (self, other) {
                (Node::Bool(a), Node::Bool(b)) => a.cmp(b),
                (Node::Contin(a), Node::Contin(b)) => a.total_cmp(b),
                (Node::Arg(a), Node::Arg(b)) | (Node::NotArg(a), Node::NotArg(b)) => a.cmp(b),
                _ => Ordering::Equal,
            })
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Node::Bool(b) => b.hash(state),
            Node::Contin(c) => c.to_bits().hash(state),
            Node::Arg(i) | Node::NotArg(i) => i.hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Null => write!(f, "null"),
            Node::And => write!(f, "and"),
            Node::Or => write!(f, "or"),
            Node::Not => write!(f, "not"),
            Node::Plus => write!(f, "+"),
            Node::Times => write!(f, "*"),
            Node::Div => write!(f, "/"),
            Node::Exp => write!(f, "exp"),
            Node::Log => write!(f, "log"),
            Node::Sin => write!(f, "sin"),
            Node::Bool(b) => write!(f, "{}", b),
            Node::Contin(c) => write!(f, "{}", c),
            Node::Arg(i) => write!(f, "#{}", i + 1),
            Node::NotArg(i) => write!(f, "!#{}", i + 1),
        }
    }
}

/// An ordered rooted tree of typed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateTree {
    /// Node at the root of this subtree.
    pub node: Node,
    /// Ordered children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CandidateTree>,
}

impl CandidateTree {
    /// Create a tree from a node and its children.
    pub fn new(node: Node, children: Vec<CandidateTree>) -> Self {
        Self { node, children }
    }

    /// Create a leaf.
    pub fn leaf(node: Node) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    pub fn and(children: Vec<CandidateTree>) -> Self {
        Self::new(Node::And, children)
    }

    pub fn or(children: Vec<CandidateTree>) -> Self {
        Self::new(Node::Or, children)
    }

    pub fn not(child: CandidateTree) -> Self {
        Self::new(Node::Not, vec![child])
    }

    pub fn plus(children: Vec<CandidateTree>) -> Self {
        Self::new(Node::Plus, children)
    }

    pub fn times(children: Vec<CandidateTree>) -> Self {
        Self::new(Node::Times, children)
    }

    pub fn arg(index: usize) -> Self {
        Self::leaf(Node::Arg(index))
    }

    pub fn not_arg(index: usize) -> Self {
        Self::leaf(Node::NotArg(index))
    }

    pub fn boolean(value: bool) -> Self {
        Self::leaf(Node::Bool(value))
    }

    pub fn contin(value: f64) -> Self {
        Self::leaf(Node::Contin(value))
    }

    /// Placeholder leaf used by knob insertion sites.
    pub fn null() -> Self {
        Self::leaf(Node::Null)
    }

    /// Whether this subtree is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of non-placeholder nodes.
    pub fn size(&self) -> usize {
        let own = usize::from(self.node != Node::Null);
        own + self.children.iter().map(Self::size).sum::<usize>()
    }

    /// Complexity used for ranking: the node count.
    pub fn complexity(&self) -> u32 {
        u32::try_from(self.size()).unwrap_or(u32::MAX)
    }

    /// Approximate heap and inline footprint in bytes.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .children
                .iter()
                .map(Self::memory_footprint)
                .sum::<usize>()
    }

    /// Subtree at a child-index path.
    pub fn subtree(&self, path: &[usize]) -> Option<&CandidateTree> {
        path.iter()
            .try_fold(self, |tree, &index| tree.children.get(index))
    }

    /// Mutable subtree at a child-index path.
    pub fn subtree_mut(&mut self, path: &[usize]) -> Option<&mut CandidateTree> {
        path.iter()
            .try_fold(self, |tree, &index| tree.children.get_mut(index))
    }

    /// Remove knob placeholders and collapse degenerate variadic operators.
    ///
    /// An empty `and` becomes `true`, an empty `or` becomes `false`, an empty
    /// `+` becomes `0` and an empty `*` becomes `1`; a variadic operator with
    /// a single child is replaced by that child.
    pub fn clean(&self) -> CandidateTree {
        let children: Vec<CandidateTree> = self
            .children
            .iter()
            .filter(|c| c.node != Node::Null)
            .map(Self::clean)
            .collect();

        let variadic = self.node.is_connective() || self.node.is_numeric_variadic();
        if variadic {
            match children.len() {
                0 => {
                    return Self::leaf(match self.node {
                        Node::And => Node::Bool(true),
                        Node::Or => Node::Bool(false),
                        Node::Plus => Node::Contin(0.0),
                        _ => Node::Contin(1.0),
                    });
                }
                1 => return children.into_iter().next().unwrap_or_else(Self::null),
                _ => {}
            }
        }

        Self::new(self.node, children)
    }
}

impl fmt::Display for CandidateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)?;
        if !self.children.is_empty() {
            write!(f, "(")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Type signature of the programs being learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Number of input arguments.
    pub arity: usize,
    /// Output type of the program.
    #[serde(default)]
    pub output: OutputType,
}

impl Signature {
    pub fn boolean(arity: usize) -> Self {
        Self {
            arity,
            output: OutputType::Boolean,
        }
    }

    pub fn numeric(arity: usize) -> Self {
        Self {
            arity,
            output: OutputType::Numeric,
        }
    }

    /// Starting program when no exemplar is supplied.
    pub fn default_exemplar(&self) -> CandidateTree {
        match self.output {
            OutputType::Boolean => CandidateTree::and(Vec::new()),
            OutputType::Numeric => CandidateTree::plus(vec![CandidateTree::contin(0.0)]),
        }
    }
}

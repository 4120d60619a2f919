//! Data models for the graph description, the static net and its markings.
use std::collections::{
    BTreeMap,
    HashMap,
};
use std::fmt;

use petgraph::prelude::*;
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use tf_core::errors::BuildError;

use crate::expr::{
    Assignment,
    Expr,
};

/// A scalar JSON value that is used as an identifier or a number.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    /// Plain string.
    Str(String),
    /// Any JSON number.
    Num(serde_json::Number),
}

impl Scalar {
    /// Identifier text.
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Num(n) => n.to_string(),
        }
    }

    /// Numeric value; strings are parsed.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Str(s) => s.trim().parse().ok(),
            Self::Num(n) => n.as_f64(),
        }
    }
}

/// A link endpoint: either the bare id or an editor-style `{"id": ...}` object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Endpoint {
    /// Bare identifier or name.
    Bare(Scalar),
    /// Object holding the identifier.
    Object {
        /// The identifier.
        id: Scalar,
    },
}

impl Endpoint {
    /// Identifier text.
    fn into_string(self) -> String {
        match self {
            Self::Bare(s) | Self::Object { id: s } => s.into_string(),
        }
    }
}

/// Flat, permissive shape of every record; validated into [`GraphRecord`].
#[derive(Debug, Deserialize)]
struct RawRecord {
    /// `Place`, `Transition`, or anything else for links.
    #[serde(rename = "type")]
    kind: String,
    /// Node identifier.
    id: Option<Scalar>,
    /// Node name.
    name: Option<String>,
    /// Initial tokens of a place.
    tokens: Option<u32>,
    /// Guard expressions of a transition.
    #[serde(default)]
    conditions: Vec<String>,
    /// Mean execution time of a transition, in seconds.
    exectime: Option<Scalar>,
    /// Attribute assignments of a transition.
    #[serde(default)]
    eventattrs: Vec<String>,
    /// Link source.
    source: Option<Endpoint>,
    /// Link target.
    target: Option<Endpoint>,
    /// Link weight.
    prob: Option<Scalar>,
}

/// A place record from the graph description.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceRecord {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Initial token count.
    pub tokens: u32,
}

/// A transition record from the graph description.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionRecord {
    /// Unique identifier.
    pub id: String,
    /// Display name; empty for a silent transition.
    pub name: String,
    /// Guard expressions.
    pub conditions: Vec<String>,
    /// Mean execution time in seconds.
    pub exectime: f64,
    /// `name = expression` attribute assignments.
    pub eventattrs: Vec<String>,
}

/// A link record from the graph description.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkRecord {
    /// Source id or name.
    pub source: String,
    /// Target id or name.
    pub target: String,
    /// Arc weight, doubling as the stochastic weight of a target transition.
    pub prob: f64,
}

/// One entry of the flat graph description produced by the editor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawRecord")]
pub enum GraphRecord {
    /// `{"type": "Place", ...}`
    Place(PlaceRecord),
    /// `{"type": "Transition", ...}`
    Transition(TransitionRecord),
    /// Any other type.
    Link(LinkRecord),
}

impl TryFrom<RawRecord> for GraphRecord {
    type Error = BuildError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let missing = |field: &str| BuildError::MalformedRecord(format!("{} record without {field}", raw.kind));
        match raw.kind.as_str() {
            "Place" => Ok(Self::Place(PlaceRecord {
                id: raw.id.clone().ok_or_else(|| missing("id"))?.into_string(),
                name: raw.name.clone().unwrap_or_default(),
                tokens: raw.tokens.unwrap_or(0),
            })),
            "Transition" => {
                let exectime = match &raw.exectime {
                    None => 0.0,
                    Some(s) => s.as_f64().ok_or_else(|| missing("numeric exectime"))?,
                };
                if !exectime.is_finite() || exectime < 0.0 {
                    return Err(BuildError::MalformedRecord(format!("negative or non-finite exectime {exectime}")));
                }
                Ok(Self::Transition(TransitionRecord {
                    id: raw.id.clone().ok_or_else(|| missing("id"))?.into_string(),
                    name: raw.name.clone().unwrap_or_default(),
                    conditions: raw.conditions.clone(),
                    exectime,
                    eventattrs: raw.eventattrs.clone(),
                }))
            },
            _ => {
                let prob = match &raw.prob {
                    None => 1.0,
                    Some(s) => s.as_f64().ok_or_else(|| missing("numeric prob"))?,
                };
                Ok(Self::Link(LinkRecord {
                    source: raw.source.clone().ok_or_else(|| missing("source"))?.into_string(),
                    target: raw.target.clone().ok_or_else(|| missing("target"))?.into_string(),
                    prob,
                }))
            },
        }
    }
}

/// A place of the net.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    /// Identifier from the description.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Initial token count, kept for reference; the initial marking is what playout uses.
    pub tokens: u32,
}

/// A parsed guard condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Guard {
    /// The expression as written.
    pub source: String,
    /// Its parse tree.
    pub expr: Expr,
}

/// A transition of the net.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// Identifier from the description.
    pub id: String,
    /// Name from the description.
    pub name: String,
    /// Activity label; `None` for silent transitions.
    pub label: Option<String>,
    /// Guard conditions, combined according to the run's guard policy.
    pub guards: Vec<Guard>,
    /// Mean execution time in seconds.
    pub mean_duration: f64,
    /// Event attribute assignments, evaluated in order.
    pub assignments: Vec<Assignment>,
}

impl Transition {
    /// Whether firing this transition produces an event.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.label.is_some()
    }
}

/// Node payload of the net graph.
#[derive(Clone, Debug, PartialEq)]
pub enum NetNode {
    /// A place.
    Place(Place),
    /// A transition.
    Transition(Transition),
}

impl NetNode {
    /// Display name of the node.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Place(p) => &p.name,
            Self::Transition(t) => &t.name,
        }
    }

    /// Identifier of the node.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Place(p) => &p.id,
            Self::Transition(t) => &t.id,
        }
    }
}

/// Edge payload of the net graph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arc {
    /// Weight from the description. Firing always moves one token per arc; the weight only feeds
    /// the stochastic map.
    pub weight: f64,
}

/// The static net: a bipartite directed graph between places and transitions.
///
/// Immutable once built; all dynamic state lives in [`Marking`].
#[derive(Clone, Debug, Default)]
pub struct PetriNet {
    /// Places, transitions and arcs.
    graph: DiGraph<NetNode, Arc>,
    /// Lookup from node identifier.
    ids: HashMap<String, NodeIndex>,
    /// Lookup from node name; the first node with a given name wins.
    names: HashMap<String, NodeIndex>,
}

impl PetriNet {
    /// Add a node, indexing it by id and name.
    pub(crate) fn add_node(&mut self, node: NetNode) -> Result<NodeIndex, BuildError> {
        if self.ids.contains_key(node.id()) {
            return Err(BuildError::DuplicateId(node.id().to_owned()));
        }
        let (id, name) = (node.id().to_owned(), node.name().to_owned());
        let idx = self.graph.add_node(node);
        self.ids.insert(id, idx);
        self.names.entry(name).or_insert(idx);
        Ok(idx)
    }

    /// Add an arc between a place and a transition.
    pub(crate) fn add_arc(&mut self, source: NodeIndex, target: NodeIndex, weight: f64) -> EdgeIndex {
        self.graph.add_edge(source, target, Arc { weight })
    }

    /// The underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &DiGraph<NetNode, Arc> {
        &self.graph
    }

    /// Resolve an identifier, falling back to a name.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<NodeIndex> {
        self.ids.get(key).or_else(|| self.names.get(key)).copied()
    }

    /// All places.
    pub fn places(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices().filter(|&i| matches!(self.graph[i], NetNode::Place(_)))
    }

    /// All transitions.
    pub fn transitions(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices().filter(|&i| matches!(self.graph[i], NetNode::Transition(_)))
    }

    /// The place at `idx`, if it is one.
    #[must_use]
    pub fn place(&self, idx: NodeIndex) -> Option<&Place> {
        match self.graph.node_weight(idx) {
            Some(NetNode::Place(p)) => Some(p),
            _ => None,
        }
    }

    /// The transition at `idx`, if it is one.
    #[must_use]
    pub fn transition(&self, idx: NodeIndex) -> Option<&Transition> {
        match self.graph.node_weight(idx) {
            Some(NetNode::Transition(t)) => Some(t),
            _ => None,
        }
    }

    /// Name of any node; empty for an unknown index.
    #[must_use]
    pub fn node_name(&self, idx: NodeIndex) -> &str {
        self.graph.node_weight(idx).map_or("", NetNode::name)
    }

    /// Source places of the incoming arcs of `t`, one entry per arc.
    pub fn preset(&self, t: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.edges_directed(t, Direction::Incoming).map(|e| e.source())
    }

    /// Target places of the outgoing arcs of `t`, one entry per arc.
    pub fn postset(&self, t: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.edges_directed(t, Direction::Outgoing).map(|e| e.target())
    }

    /// Names of every event attribute declared on any transition, in net order.
    #[must_use]
    pub fn event_attribute_names(&self) -> Vec<String> {
        self.transitions()
            .filter_map(|t| self.transition(t))
            .flat_map(|t| t.assignments.iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Number of places.
    #[must_use]
    pub fn place_count(&self) -> usize {
        self.places().count()
    }

    /// Number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.transitions().count()
    }
}

/// Token distribution over places. Places without tokens have no entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Marking(BTreeMap<NodeIndex, u32>);

impl Marking {
    /// The empty marking.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens currently at `place`.
    #[must_use]
    pub fn tokens(&self, place: NodeIndex) -> u32 {
        self.0.get(&place).copied().unwrap_or(0)
    }

    /// Add `count` tokens to `place`. Adding zero tokens leaves the marking untouched.
    pub fn add(&mut self, place: NodeIndex, count: u32) {
        if count > 0 {
            *self.0.entry(place).or_insert(0) += count;
        }
    }

    /// Take one token from `place`, dropping the entry when it empties. Returns `false` if the
    /// place had no tokens.
    pub fn take_one(&mut self, place: NodeIndex) -> bool {
        match self.0.get_mut(&place) {
            None => false,
            Some(n) if *n <= 1 => {
                self.0.remove(&place);
                true
            },
            Some(n) => {
                *n -= 1;
                true
            },
        }
    }

    /// Places holding tokens, with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, u32)> + '_ {
        self.0.iter().map(|(&p, &n)| (p, n))
    }

    /// Whether no place holds a token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of tokens.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.0.values().map(|&n| u64::from(n)).sum()
    }

    /// Render with place names, e.g. `[p1:1, p3:2]`.
    #[must_use]
    pub fn display<'a>(&'a self, net: &'a PetriNet) -> MarkingDisplay<'a> {
        MarkingDisplay { marking: self, net }
    }
}

impl FromIterator<(NodeIndex, u32)> for Marking {
    fn from_iter<I: IntoIterator<Item = (NodeIndex, u32)>>(iter: I) -> Self {
        let mut m = Self::new();
        for (p, n) in iter {
            m.add(p, n);
        }
        m
    }
}

/// [`Marking`] formatter that shows place names.
pub struct MarkingDisplay<'a> {
    /// Marking being shown.
    marking: &'a Marking,
    /// Net supplying the names.
    net: &'a PetriNet,
}

impl fmt::Display for MarkingDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (p, n)) in self.marking.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{n}", self.net.node_name(p))?;
        }
        write!(f, "]")
    }
}

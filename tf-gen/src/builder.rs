//! Turning a flat graph description into a [`PetriNet`] and its markings.
use std::collections::BTreeMap;

use anyhow::Result;
use petgraph::prelude::*;
use tf_core::errors::BuildError;
use tracing::{
    debug,
    info,
    instrument,
};

use crate::expr;
use crate::model::{
    GraphRecord,
    Guard,
    LinkRecord,
    Marking,
    NetNode,
    PetriNet,
    Place,
    Transition,
    TransitionRecord,
};

/// Everything the builder produces from a graph description.
#[derive(Clone, Debug)]
pub struct BuiltNet {
    /// The static net.
    pub net: PetriNet,
    /// Place index to display name.
    pub place_names: BTreeMap<NodeIndex, String>,
    /// Tokens of every place whose token count is non-zero.
    pub initial_marking: Marking,
}

/// Build the net, its place-name index and initial marking from `records`.
///
/// Nodes are added first so that links may refer to nodes listed after them. Link endpoints
/// resolve by id, then by name. A link whose source is a transition runs transition → place;
/// otherwise it runs place → transition.
///
/// # Errors
/// Raises a [`BuildError`] for unknown link endpoints, links that do not join a place and a
/// transition, duplicate ids, and guard or attribute expressions that do not parse.
#[instrument(skip_all, fields(records = records.len()))]
pub fn build_net(records: &[GraphRecord]) -> Result<BuiltNet> {
    let mut net = PetriNet::default();
    let mut place_names = BTreeMap::new();
    let mut initial_marking = Marking::new();

    for record in records {
        match record {
            GraphRecord::Place(p) => {
                let idx = net.add_node(NetNode::Place(Place {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    tokens: p.tokens,
                }))?;
                place_names.insert(idx, p.name.clone());
                initial_marking.add(idx, p.tokens);
            },
            GraphRecord::Transition(t) => {
                net.add_node(NetNode::Transition(build_transition(t)?))?;
            },
            GraphRecord::Link(_) => (),
        }
    }

    for record in records {
        if let GraphRecord::Link(link) = record {
            add_link(&mut net, link)?;
        }
    }

    info!(
        places = net.place_count(),
        transitions = net.transition_count(),
        arcs = net.graph().edge_count(),
        "net built"
    );
    debug!(initial_marking = %initial_marking.display(&net));
    Ok(BuiltNet { net, place_names, initial_marking })
}

/// Parse the guard and attribute expressions of a transition record.
fn build_transition(record: &TransitionRecord) -> Result<Transition, BuildError> {
    let invalid = |expression: &str, source| BuildError::InvalidExpression {
        transition: record.name.clone(),
        expression: expression.to_owned(),
        source,
    };

    let guards = record
        .conditions
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| {
            expr::parse(c)
                .map(|expr| Guard { source: c.clone(), expr })
                .map_err(|e| invalid(c.as_str(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let assignments = record
        .eventattrs
        .iter()
        .filter(|a| !a.trim().is_empty())
        .map(|a| expr::parse_assignment(a).map_err(|e| invalid(a.as_str(), e)))
        .collect::<Result<Vec<_>, _>>()?;

    let name = record.name.trim();
    Ok(Transition {
        id: record.id.clone(),
        name: record.name.clone(),
        label: (!name.is_empty()).then(|| name.to_owned()),
        guards,
        mean_duration: record.exectime,
        assignments,
    })
}

/// Resolve the endpoints of `link` and add the arc.
fn add_link(net: &mut PetriNet, link: &LinkRecord) -> Result<(), BuildError> {
    let source = net.resolve(&link.source).ok_or_else(|| BuildError::UnknownEndpoint(link.source.clone()))?;
    let target = net.resolve(&link.target).ok_or_else(|| BuildError::UnknownEndpoint(link.target.clone()))?;

    let graph = net.graph();
    let valid = match (&graph[source], &graph[target]) {
        (NetNode::Transition(_), NetNode::Place(_)) | (NetNode::Place(_), NetNode::Transition(_)) => true,
        _ => false,
    };
    if !valid {
        return Err(BuildError::InvalidArc { source_id: link.source.clone(), target: link.target.clone() });
    }

    net.add_arc(source, target, link.prob);
    Ok(())
}

/// The structurally implied final marking: one token in every place that has incoming arcs but
/// no outgoing ones.
#[must_use]
pub fn final_marking(net: &PetriNet) -> Marking {
    let graph = net.graph();
    net.places()
        .filter(|&p| {
            graph.edges_directed(p, Direction::Outgoing).next().is_none()
                && graph.edges_directed(p, Direction::Incoming).next().is_some()
        })
        .map(|p| (p, 1))
        .collect()
}

/// Resolve an explicit marking given as place id/name → token count.
///
/// # Errors
/// [`BuildError::UnknownPlace`] if a key does not name a place.
pub fn resolve_marking(net: &PetriNet, tokens: &BTreeMap<String, u32>) -> Result<Marking, BuildError> {
    tokens
        .iter()
        .map(|(key, &n)| match net.resolve(key) {
            Some(idx) if net.place(idx).is_some() => Ok((idx, n)),
            _ => Err(BuildError::UnknownPlace(key.clone())),
        })
        .collect()
}

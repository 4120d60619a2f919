//! Transition engine: enabling, stochastic choice and firing.
use std::collections::HashMap;

use anyhow::{
    anyhow,
    Result,
};
use petgraph::prelude::*;
use petgraph::visit::EdgeRef;
use rand::distributions::{
    Distribution,
    WeightedIndex,
};
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tf_core::errors::{
    ConfigurationError,
    EvaluationError,
};
use tracing::trace;

use crate::context::EvaluationContext;
use crate::model::{
    Marking,
    NetNode,
    PetriNet,
};

/// How the guard conditions of one transition combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GuardPolicy {
    /// Every guard must hold.
    #[default]
    All,
    /// At least one guard must hold.
    Any,
}

/// Selection weight per transition.
pub type StochasticMap = HashMap<NodeIndex, f64>;

/// Something the playout loop can choose to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Choice {
    /// Fire this transition.
    Fire(NodeIndex),
    /// End the trace here; only offered in the final marking.
    Stop,
}

/// Whether every incoming arc of `t` can take a token from its source place.
#[must_use]
pub fn is_enabled(net: &PetriNet, t: NodeIndex, marking: &Marking) -> bool {
    let mut needed: HashMap<NodeIndex, u32> = HashMap::new();
    for p in net.preset(t) {
        *needed.entry(p).or_insert(0) += 1;
    }
    needed.into_iter().all(|(p, n)| marking.tokens(p) >= n)
}

/// Transitions that are enabled by tokens and pass their guards, ordered by index.
///
/// Attribute assignments of every token-enabled transition are evaluated into `ctx` before any
/// guard is checked, so guards can refer to freshly computed values.
///
/// # Errors
/// An [`EvaluationError`] if any assignment or guard cannot be evaluated. A guard that merely
/// evaluates to false is not an error.
pub fn enabled_transitions<R: Rng + ?Sized>(
    net: &PetriNet,
    marking: &Marking,
    ctx: &mut EvaluationContext,
    policy: GuardPolicy,
    rng: &mut R,
) -> Result<Vec<NodeIndex>, EvaluationError> {
    let token_enabled: Vec<NodeIndex> = net.transitions().filter(|&t| is_enabled(net, t, marking)).collect();

    for &t in &token_enabled {
        let Some(transition) = net.transition(t) else { continue };
        for assignment in &transition.assignments {
            let value = ctx.evaluate(&assignment.expr, rng)?;
            trace!(transition = %transition.name, name = %assignment.name, %value, "assigned");
            ctx.bind(&assignment.name, value);
        }
    }

    let mut enabled = Vec::with_capacity(token_enabled.len());
    for t in token_enabled {
        let Some(transition) = net.transition(t) else { continue };
        if transition.guards.is_empty() {
            enabled.push(t);
            continue;
        }

        let mut results = Vec::with_capacity(transition.guards.len());
        for guard in &transition.guards {
            results.push(ctx.evaluate(&guard.expr, rng)?.is_truthy());
        }
        let passes = match policy {
            GuardPolicy::All => results.iter().all(|&b| b),
            GuardPolicy::Any => results.iter().any(|&b| b),
        };
        if passes {
            enabled.push(t);
        } else {
            trace!(transition = %transition.name, "guard not satisfied");
        }
    }
    Ok(enabled)
}

/// Fire `t`: one token leaves the source of every incoming arc and one token enters the target of
/// every outgoing arc.
///
/// # Errors
/// Fails if `t` is not a transition or is not enabled in `marking`.
pub fn execute(net: &PetriNet, t: NodeIndex, marking: &Marking) -> Result<Marking> {
    let transition = net.transition(t).ok_or_else(|| anyhow!("node {} is not a transition", t.index()))?;
    if !is_enabled(net, t, marking) {
        anyhow::bail!("transition {} is not enabled in {}", transition.name, marking.display(net));
    }

    let mut next = marking.clone();
    for p in net.preset(t) {
        next.take_one(p);
    }
    for p in net.postset(t) {
        next.add(p, 1);
    }
    Ok(next)
}

/// Selection weight of each transition, taken from the links that point at it. When several links
/// point at the same transition, the last one wins.
///
/// # Errors
/// [`ConfigurationError::InvalidWeight`] for negative or non-finite weights.
pub fn build_stochastic_map(net: &PetriNet) -> Result<StochasticMap, ConfigurationError> {
    let graph = net.graph();
    let mut map = StochasticMap::new();
    for edge in graph.edge_references() {
        let NetNode::Transition(t) = &graph[edge.target()] else { continue };
        let weight = edge.weight().weight;
        if !weight.is_finite() || weight < 0.0 {
            return Err(ConfigurationError::InvalidWeight { transition: t.name.clone(), weight });
        }
        map.insert(edge.target(), weight);
    }
    Ok(map)
}

/// Check, before any simulation, that every transition that can become enabled has a weight.
///
/// Transitions with incoming arcs always get one from [`build_stochastic_map`]; transitions
/// without any are enabled in every marking and therefore need an explicit entry.
///
/// # Errors
/// [`ConfigurationError::MissingWeight`] naming the first offending transition.
pub fn validate_stochastic_map(net: &PetriNet, map: &StochasticMap) -> Result<(), ConfigurationError> {
    for t in net.transitions() {
        if !map.contains_key(&t) {
            return Err(ConfigurationError::MissingWeight(net.node_name(t).to_owned()));
        }
    }
    Ok(())
}

/// Draw one of `candidates` with probability proportional to its weight.
///
/// [`Choice::Stop`] weighs as much as all real candidates together, so stopping and continuing are
/// equally likely. Returns `None` when there are no candidates or when the draw lands on
/// [`Choice::Stop`].
///
/// # Errors
/// [`ConfigurationError::MissingWeight`] if a candidate has no weight,
/// [`ConfigurationError::NonPositiveWeightSum`] if the weights add up to nothing.
pub fn pick_transition<R: Rng + ?Sized>(
    net: &PetriNet,
    candidates: &[Choice],
    weights: &StochasticMap,
    rng: &mut R,
) -> Result<Option<NodeIndex>> {
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut fire_total = 0.0;
    let mut raw = Vec::with_capacity(candidates.len());
    for choice in candidates {
        let w = match choice {
            Choice::Fire(t) => {
                let w = *weights
                    .get(t)
                    .ok_or_else(|| ConfigurationError::MissingWeight(net.node_name(*t).to_owned()))?;
                fire_total += w;
                Some(w)
            },
            Choice::Stop => None,
        };
        raw.push(w);
    }

    let stop_weight = if candidates.iter().all(|c| *c == Choice::Stop) { 1.0 } else { fire_total };
    let dist_weights: Vec<f64> = raw.into_iter().map(|w| w.unwrap_or(stop_weight)).collect();
    let total: f64 = dist_weights.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return Err(ConfigurationError::NonPositiveWeightSum(total).into());
    }

    let dist = WeightedIndex::new(&dist_weights).map_err(|e| anyhow!("cannot sample candidates: {e}"))?;
    Ok(match candidates[dist.sample(rng)] {
        Choice::Fire(t) => Some(t),
        Choice::Stop => None,
    })
}

#![deny(
    clippy::nursery,
    clippy::pedantic,
    missing_docs,
    clippy::missing_docs_in_private_items,
)]

//! # tf-gen – synthetic event logs from stochastic Petri nets
//!
//! tf-gen plays out a Petri net many times and records every visible firing as an event, producing
//! an event log for process-mining experiments.
//!
//! ## Pipeline overview
//! 1. Net construction ([`build_net`](crate::builder::build_net)) – turn the flat graph description
//!    (places, transitions with guards and attribute expressions, links with weights) into a
//!    [`petgraph::Graph`]-backed [`PetriNet`] plus its initial marking. Expressions are parsed
//!    here, so a typo fails the build instead of a trace halfway through.
//! 2. Playout ([`Simulator`](crate::simulation::Simulator)) – for each trace, repeatedly find the
//!    enabled transitions ([`enabled_transitions`](crate::engine::enabled_transitions)), draw one
//!    by weight ([`pick_transition`](crate::engine::pick_transition)) and fire it
//!    ([`execute`](crate::engine::execute)). Visible firings become timestamped events; time is
//!    jittered around each transition's mean and optionally folded into working hours. Traces are
//!    independent and generated in parallel, each from its own seeded generator.
//! 3. Noise ([`noise`]) – optional perturbations of the finished log: stripped prefixes and
//!    suffixes, duplicated or deleted interior events, swapped timestamps.
//!
//! [`simulation::run`] ties the stages together for the command line.

pub mod builder;
pub mod config;
pub mod context;
pub mod engine;
pub mod expr;
pub mod log;
pub mod model;
pub mod noise;
pub mod simulation;
pub mod utils;
pub mod value;

pub use builder::{
    build_net,
    BuiltNet,
};
pub use config::RunConfig;
pub use log::{
    Event,
    EventLog,
    LogKeys,
    Trace,
};
pub use model::{
    GraphRecord,
    Marking,
    PetriNet,
};
pub use simulation::{
    CaseDataSupplier,
    PlayoutParams,
    Simulator,
};
pub use value::Value;

#[cfg(test)]
mod tests;

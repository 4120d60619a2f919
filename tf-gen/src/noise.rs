//! Noise injection: post-hoc perturbations of a generated log.
//!
//! Every injector selects `round(probability × eligible cases)` distinct cases uniformly at random
//! and perturbs each of them. Cases are never removed from the log, so the number of distinct case
//! identifiers stays the same even when a case loses all of its events.
use anyhow::Result;
use chrono::TimeDelta;
use itertools::Itertools;
use rand::seq::index;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tf_core::errors::ConfigurationError;
use tracing::{
    info,
    instrument,
};

use crate::log::{
    EventLog,
    Trace,
};

/// The available perturbations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseKind {
    /// Drop events from the start of a case.
    StripPrefix,
    /// Drop events from the end of a case.
    StripSuffix,
    /// Repeat an interior event.
    DuplicateInterior,
    /// Remove an interior event.
    DeleteInterior,
    /// Exchange the timestamps of two events of a case.
    SwapTimestamps,
}

/// One configured noise pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoisePass {
    /// What to do.
    pub kind: NoiseKind,
    /// Fraction of eligible cases to perturb.
    pub probability: f64,
    /// Maximum events stripped, or repetitions of the other perturbations.
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Default for [`NoisePass::count`].
const fn default_count() -> usize {
    1
}

impl NoisePass {
    /// Check the probability and count.
    ///
    /// # Errors
    /// See [`check_parameters`].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_parameters(self.probability, self.count)
    }
}

/// `probability` must lie in `[0, 1]` and `count` must be positive.
///
/// # Errors
/// [`ConfigurationError::InvalidProbability`] or [`ConfigurationError::InvalidCount`].
pub fn check_parameters(probability: f64, count: usize) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(ConfigurationError::InvalidProbability(probability));
    }
    if count == 0 {
        return Err(ConfigurationError::InvalidCount);
    }
    Ok(())
}

/// Apply one noise pass, returning the number of cases it touched.
///
/// # Errors
/// Invalid pass parameters.
pub fn apply<R: Rng + ?Sized>(log: &mut EventLog, pass: &NoisePass, rng: &mut R) -> Result<usize> {
    let touched = match pass.kind {
        NoiseKind::StripPrefix => strip_prefix(log, pass.probability, pass.count, rng)?,
        NoiseKind::StripSuffix => strip_suffix(log, pass.probability, pass.count, rng)?,
        NoiseKind::DuplicateInterior => duplicate_interior(log, pass.probability, pass.count, rng)?,
        NoiseKind::DeleteInterior => delete_interior(log, pass.probability, pass.count, rng)?,
        NoiseKind::SwapTimestamps => swap_timestamps(log, pass.probability, pass.count, rng)?,
    };
    Ok(touched)
}

/// Remove between 1 and `max_count` leading events from the selected non-empty cases.
///
/// The subset has `round(probability × non-empty cases)` members. Empty cases are not counted, so
/// on a log without empty cases this is `round(probability × cases)`.
///
/// # Errors
/// Invalid `probability` or `max_count`.
#[instrument(skip(log, rng), fields(cases = log.len()))]
pub fn strip_prefix<R: Rng + ?Sized>(
    log: &mut EventLog,
    probability: f64,
    max_count: usize,
    rng: &mut R,
) -> Result<usize, ConfigurationError> {
    check_parameters(probability, max_count)?;
    let selected = select_cases(log, probability, |t| !t.is_empty(), rng);
    for &i in &selected {
        let events = &mut log.traces[i].events;
        let k = rng.gen_range(1..=max_count).min(events.len());
        events.drain(..k);
    }
    info!(touched = selected.len(), "stripped prefixes");
    Ok(selected.len())
}

/// Remove between 1 and `max_count` trailing events from the selected non-empty cases.
///
/// The subset has `round(probability × non-empty cases)` members. Empty cases are not counted, so
/// on a log without empty cases this is `round(probability × cases)`.
///
/// # Errors
/// Invalid `probability` or `max_count`.
#[instrument(skip(log, rng), fields(cases = log.len()))]
pub fn strip_suffix<R: Rng + ?Sized>(
    log: &mut EventLog,
    probability: f64,
    max_count: usize,
    rng: &mut R,
) -> Result<usize, ConfigurationError> {
    check_parameters(probability, max_count)?;
    let selected = select_cases(log, probability, |t| !t.is_empty(), rng);
    for &i in &selected {
        let events = &mut log.traces[i].events;
        let k = rng.gen_range(1..=max_count).min(events.len());
        events.truncate(events.len() - k);
    }
    info!(touched = selected.len(), "stripped suffixes");
    Ok(selected.len())
}

/// In each selected case of length ≥ 2, `count` times: pick a non-first event, insert a copy right
/// after it and shift every later event by the gap between the picked event and its predecessor.
///
/// Order of timestamps is kept; the copy has the same timestamp as the original.
///
/// # Errors
/// Invalid `probability` or `count`.
#[instrument(skip(log, rng), fields(cases = log.len()))]
pub fn duplicate_interior<R: Rng + ?Sized>(
    log: &mut EventLog,
    probability: f64,
    count: usize,
    rng: &mut R,
) -> Result<usize, ConfigurationError> {
    check_parameters(probability, count)?;
    let key = log.keys.timestamp.clone();
    let selected = select_cases(log, probability, |t| t.len() >= 2, rng);
    for &i in &selected {
        let events = &mut log.traces[i].events;
        for _ in 0..count {
            let at = rng.gen_range(1..events.len());
            let gap = match (events[at - 1].timestamp(&key), events[at].timestamp(&key)) {
                (Some(prev), Some(cur)) => cur - prev,
                _ => TimeDelta::zero(),
            };

            let copy = events[at].clone();
            events.insert(at + 1, copy);
            for later in &mut events[at + 2..] {
                if let Some(ts) = later.timestamp(&key) {
                    later.insert(key.clone(), ts + gap);
                }
            }
        }
    }
    info!(touched = selected.len(), "duplicated interior events");
    Ok(selected.len())
}

/// In each selected case of length > 2, `count` times (while the case is still longer than 2):
/// remove a random event that is neither the first nor the last.
///
/// # Errors
/// Invalid `probability` or `count`.
#[instrument(skip(log, rng), fields(cases = log.len()))]
pub fn delete_interior<R: Rng + ?Sized>(
    log: &mut EventLog,
    probability: f64,
    count: usize,
    rng: &mut R,
) -> Result<usize, ConfigurationError> {
    check_parameters(probability, count)?;
    let selected = select_cases(log, probability, |t| t.len() > 2, rng);
    for &i in &selected {
        let events = &mut log.traces[i].events;
        for _ in 0..count {
            if events.len() <= 2 {
                break;
            }
            let at = rng.gen_range(1..events.len() - 1);
            events.remove(at);
        }
    }
    info!(touched = selected.len(), "deleted interior events");
    Ok(selected.len())
}

/// In each selected case of length ≥ 2, `count` times: exchange the timestamps of two distinct
/// random events. The events keep their positions.
///
/// # Errors
/// Invalid `probability` or `count`.
#[instrument(skip(log, rng), fields(cases = log.len()))]
pub fn swap_timestamps<R: Rng + ?Sized>(
    log: &mut EventLog,
    probability: f64,
    count: usize,
    rng: &mut R,
) -> Result<usize, ConfigurationError> {
    check_parameters(probability, count)?;
    let key = log.keys.timestamp.clone();
    let selected = select_cases(log, probability, |t| t.len() >= 2, rng);
    for &i in &selected {
        let events = &mut log.traces[i].events;
        for _ in 0..count {
            let pair = index::sample(rng, events.len(), 2);
            let (a, b) = (pair.index(0), pair.index(1));
            let ts_a = events[a].0.remove(&key);
            let ts_b = events[b].0.remove(&key);
            if let Some(ts) = ts_b {
                events[a].0.insert(key.clone(), ts);
            }
            if let Some(ts) = ts_a {
                events[b].0.insert(key.clone(), ts);
            }
        }
    }
    info!(touched = selected.len(), "swapped timestamps");
    Ok(selected.len())
}

/// Indices of `round(probability × eligible)` distinct eligible cases, ascending.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn select_cases<R, F>(log: &EventLog, probability: f64, eligible: F, rng: &mut R) -> Vec<usize>
where
    R: Rng + ?Sized,
    F: Fn(&Trace) -> bool,
{
    let candidates: Vec<usize> = log.traces.iter().positions(eligible).collect();
    let amount = ((probability * candidates.len() as f64).round() as usize).min(candidates.len());
    index::sample(rng, candidates.len(), amount)
        .into_iter()
        .map(|i| candidates[i])
        .sorted_unstable()
        .collect()
}

/// Number of distinct case identifiers in `log`.
#[must_use]
pub fn distinct_cases(log: &EventLog) -> usize {
    log.traces
        .iter()
        .filter_map(|t| log.case_id(t))
        .map(ToString::to_string)
        .unique()
        .count()
}

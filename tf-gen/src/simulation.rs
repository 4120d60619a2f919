//! Playout: repeated stochastic simulation of the net into an event log.
//!
//! Every trace starts from a clone of the initial marking and a fresh [`EvaluationContext`], then
//! loops:
//! 1. Find the enabled transitions (tokens and guards). None left means deadlock.
//! 2. In the final marking, add the option to stop.
//! 3. Draw a candidate by weight. Drawing "stop" ends the trace.
//! 4. For a visible transition, advance the trace clock by the jittered duration (folded into
//!    working hours when configured) and record an event carrying the event attributes, the case
//!    attributes and any external case data for that activity.
//! 5. Fire the transition and repeat until the trace has the maximum number of events.
//!
//! Traces are independent: each draws from its own generator, seeded from the run seed and the
//! trace index, so they are generated in parallel and the result does not depend on scheduling.
use std::collections::BTreeMap;

use anyhow::{
    anyhow,
    Result,
};
use chrono::{
    DateTime,
    Datelike,
    TimeDelta,
    Utc,
    Weekday,
};
use indicatif::{
    ProgressBar,
    ProgressFinish,
    ProgressStyle,
};
use lazy_static::lazy_static;
use petgraph::prelude::*;
use rand::rngs::StdRng;
use rand::{
    Rng,
    SeedableRng,
};
use rayon::prelude::*;
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use tf_core::errors::ConfigurationError;
use tracing::{
    debug,
    info,
    instrument,
};

use crate::builder::{
    build_net,
    final_marking,
};
use crate::config::RunConfig;
use crate::context::{
    CaseAttribute,
    EvaluationContext,
};
use crate::engine::{
    build_stochastic_map,
    enabled_transitions,
    execute,
    pick_transition,
    validate_stochastic_map,
    Choice,
    GuardPolicy,
    StochasticMap,
};
use crate::log::{
    Event,
    EventLog,
    LogKeys,
    Trace,
};
use crate::model::{
    GraphRecord,
    Marking,
    PetriNet,
};
use crate::noise;
use crate::value::Value;

lazy_static! {
    /// A trailing bracketed qualifier such as `Approve (2)` or `Ship [express]`.
    static ref LABEL_SUFFIX: Regex = Regex::new(r"\s*[\(\[\{][^\(\)\[\]\{\}]*[\)\]\}]\s*$").unwrap();
}

/// Fraction by which an execution time may deviate from its mean.
const DURATION_JITTER: f64 = 0.1;

/// Hours of the day during which events may happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    /// First hour of the working day.
    pub start: u32,
    /// Hour at which the working day ends.
    pub end: u32,
}

impl WorkingHours {
    /// Check `0 <= start < end <= 24`.
    ///
    /// # Errors
    /// [`ConfigurationError::InvalidWorkingHours`].
    pub const fn validate(&self) -> Result<(), ConfigurationError> {
        if self.start < self.end && self.end <= 24 {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidWorkingHours { start: self.start, end: self.end })
        }
    }

    /// Move `ts` into working time.
    ///
    /// Time past the end of the working day carries over to the start of the next day, as often
    /// as needed. A result on a Saturday or Sunday is then pushed to the following Monday at the
    /// same time of day. Times before the start of the day are left alone.
    #[must_use]
    pub fn fold(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let mut ts = ts;
        if self.end < 24 {
            loop {
                let date = ts.date_naive();
                let Some(day_end) = date.and_hms_opt(self.end, 0, 0) else { break };
                let day_end = day_end.and_utc();
                if ts <= day_end {
                    break;
                }
                let overflow = ts - day_end;
                let Some(next_start) = date.succ_opt().and_then(|d| d.and_hms_opt(self.start, 0, 0)) else {
                    break;
                };
                let Some(next) = next_start.and_utc().checked_add_signed(overflow) else { break };
                ts = next;
            }
        }

        let skip = match ts.weekday() {
            Weekday::Sat => 2,
            Weekday::Sun => 1,
            _ => return ts,
        };
        ts.checked_add_signed(TimeDelta::days(skip)).unwrap_or(ts)
    }
}

/// A value supplied from outside the net for one case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuppliedValue {
    /// Attached to every event of the case.
    Constant(Value),
    /// Attached only to events of the listed activities.
    PerActivity(BTreeMap<String, Value>),
}

/// Attribute name → supplied value, for one case.
pub type CaseData = BTreeMap<String, SuppliedValue>;

/// Source of per-case external data, consulted once at the start of every trace.
pub trait CaseDataSupplier: Sync {
    /// Data for the case with 0-based `case_index`.
    ///
    /// # Errors
    /// Implementation-defined; an error aborts the run.
    fn supply(&self, case_index: usize) -> Result<CaseData>;
}

impl<F> CaseDataSupplier for F
where
    F: Fn(usize) -> Result<CaseData> + Sync,
{
    fn supply(&self, case_index: usize) -> Result<CaseData> {
        self(case_index)
    }
}

/// Fixed per-case data, reused round-robin when there are more cases than entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseDataTable(pub Vec<CaseData>);

impl CaseDataSupplier for CaseDataTable {
    fn supply(&self, case_index: usize) -> Result<CaseData> {
        if self.0.is_empty() {
            return Ok(CaseData::new());
        }
        Ok(self.0[case_index % self.0.len()].clone())
    }
}

/// Why a trace ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// No transition was enabled.
    Deadlock,
    /// The trace was in the final marking and the draw chose to stop.
    FinalMarking,
    /// The trace reached the maximum number of events.
    LengthCap,
    /// Too many silent transitions fired in a row.
    SilentCap,
}

/// Parameters of one playout run.
#[derive(Clone, Debug)]
pub struct PlayoutParams {
    /// Number of traces to generate.
    pub num_traces: usize,
    /// Maximum number of events per trace.
    pub max_trace_length: usize,
    /// Names of the case, activity and timestamp attributes.
    pub keys: LogKeys,
    /// Start of the first trace, in seconds since the epoch.
    pub initial_timestamp: i64,
    /// Offset between the start times of consecutive traces, in seconds.
    pub case_interval_secs: i64,
    /// Marking in which a trace may stop; inferred from the net when `None`.
    pub final_marking: Option<Marking>,
    /// Working hours to fold timestamps into.
    pub working_hours: Option<WorkingHours>,
    /// Case attribute specifications.
    pub case_attributes: Vec<CaseAttribute>,
    /// How guards of one transition combine.
    pub guard_policy: GuardPolicy,
    /// Run seed.
    pub seed: u64,
    /// Maximum number of consecutive silent firings.
    pub max_silent_steps: usize,
}

impl Default for PlayoutParams {
    fn default() -> Self {
        Self {
            num_traces: 10,
            max_trace_length: 100,
            keys: LogKeys::default(),
            initial_timestamp: 10_000_000,
            case_interval_secs: 0,
            final_marking: None,
            working_hours: None,
            case_attributes: Vec::new(),
            guard_policy: GuardPolicy::All,
            seed: 0,
            max_silent_steps: 1000,
        }
    }
}

/// Everything needed to play out traces of one net, validated up front.
pub struct Simulator<'a> {
    /// The net.
    net: &'a PetriNet,
    /// Marking every trace starts from.
    initial_marking: &'a Marking,
    /// Marking in which a trace may stop.
    final_marking: Marking,
    /// Selection weights.
    weights: StochasticMap,
    /// Run parameters.
    params: &'a PlayoutParams,
    /// Event attributes declared anywhere in the net.
    event_attributes: Vec<String>,
}

impl<'a> Simulator<'a> {
    /// Validate the run and prepare the stochastic map and final marking.
    ///
    /// # Errors
    /// A [`ConfigurationError`] for missing or invalid weights, invalid working hours or a zero
    /// maximum trace length.
    pub fn new(net: &'a PetriNet, initial_marking: &'a Marking, params: &'a PlayoutParams) -> Result<Self> {
        let weights = build_stochastic_map(net)?;
        validate_stochastic_map(net, &weights)?;
        if let Some(wh) = &params.working_hours {
            wh.validate()?;
        }
        if params.num_traces > 0 && params.max_trace_length == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "max_trace_length".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }

        let final_marking = params.final_marking.clone().unwrap_or_else(|| final_marking(net));
        debug!(final_marking = %final_marking.display(net), "stopping condition");

        Ok(Self {
            net,
            initial_marking,
            final_marking,
            weights,
            params,
            event_attributes: net.event_attribute_names(),
        })
    }

    /// The marking in which traces may stop.
    #[must_use]
    pub const fn final_marking(&self) -> &Marking {
        &self.final_marking
    }

    /// Play out every trace and collect them into a log, ordered by case index.
    ///
    /// # Errors
    /// The first trace failure (evaluation or configuration error) aborts the whole run.
    #[instrument(skip_all, fields(num_traces = self.params.num_traces, seed = self.params.seed))]
    pub fn playout(&self, supplier: Option<&dyn CaseDataSupplier>, progress: Option<&ProgressBar>) -> Result<EventLog> {
        let traces = (0..self.params.num_traces)
            .into_par_iter()
            .map(|index| {
                let (trace, termination) = self.playout_trace(index, supplier)?;
                debug!(case = index + 1, events = trace.len(), ?termination, "trace finished");
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                Ok(trace)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut log = EventLog::new(self.params.keys.clone());
        log.traces = traces;
        info!(traces = log.len(), events = log.event_count(), "playout complete");
        Ok(log)
    }

    /// Play out the trace with 0-based `index`.
    ///
    /// # Errors
    /// Evaluation errors in guards or attributes, failing case data suppliers, and weight problems
    /// discovered while drawing.
    pub fn playout_trace(
        &self,
        index: usize,
        supplier: Option<&dyn CaseDataSupplier>,
    ) -> Result<(Trace, Termination)> {
        let params = self.params;
        let mut rng = StdRng::seed_from_u64(trace_seed(params.seed, index));

        let mut ctx = EvaluationContext::new(self.event_attributes.iter().cloned());
        ctx.set_case_attributes(&params.case_attributes, &mut rng)?;
        let case_data = supplier.map(|s| s.supply(index)).transpose()?.unwrap_or_default();
        for (name, supplied) in &case_data {
            match supplied {
                SuppliedValue::Constant(v) => ctx.bind(name, v.clone()),
                SuppliedValue::PerActivity(_) => ctx.declare(name),
            }
        }

        let mut trace = Trace::default();
        for (name, value) in ctx.case_attributes() {
            trace.attributes.insert(name.to_owned(), value.clone());
        }
        let case_id = i64::try_from(index + 1)?;
        trace.attributes.insert(params.keys.case.clone(), Value::Int(case_id));

        let offset = params
            .case_interval_secs
            .checked_mul(i64::try_from(index)?)
            .and_then(|o| o.checked_add(params.initial_timestamp))
            .ok_or_else(|| anyhow!("start time of case {case_id} overflows"))?;
        let mut clock = DateTime::from_timestamp(offset, 0)
            .ok_or_else(|| anyhow!("start time {offset} of case {case_id} is out of range"))?;

        let mut marking = self.initial_marking.clone();
        let mut silent_steps = 0;
        let termination = loop {
            if trace.events.len() >= params.max_trace_length {
                break Termination::LengthCap;
            }

            let enabled = enabled_transitions(self.net, &marking, &mut ctx, params.guard_policy, &mut rng)?;
            if enabled.is_empty() {
                break Termination::Deadlock;
            }

            let mut candidates: Vec<Choice> = enabled.into_iter().map(Choice::Fire).collect();
            if marking == self.final_marking {
                candidates.push(Choice::Stop);
            }
            let Some(t) = pick_transition(self.net, &candidates, &self.weights, &mut rng)? else {
                break Termination::FinalMarking;
            };

            let event = self.materialize(t, &mut clock, &mut ctx, &case_data, &mut rng)?;
            marking = execute(self.net, t, &marking)?;

            if let Some(event) = event {
                trace.events.push(event);
                silent_steps = 0;
            } else {
                silent_steps += 1;
                if silent_steps >= params.max_silent_steps {
                    break Termination::SilentCap;
                }
            }
        };

        Ok((trace, termination))
    }

    /// Build the event for firing `t`, advancing `clock`; `None` for silent transitions.
    fn materialize<R: Rng + ?Sized>(
        &self,
        t: NodeIndex,
        clock: &mut DateTime<Utc>,
        ctx: &mut EvaluationContext,
        case_data: &CaseData,
        rng: &mut R,
    ) -> Result<Option<Event>> {
        let transition = self
            .net
            .transition(t)
            .ok_or_else(|| anyhow!("node {} is not a transition", t.index()))?;
        let Some(label) = &transition.label else {
            return Ok(None);
        };

        let activity = strip_label_suffix(label);
        let secs = jittered_duration(transition.mean_duration, rng);
        let mut ts = TimeDelta::try_seconds(secs)
            .and_then(|d| clock.checked_add_signed(d))
            .ok_or_else(|| ConfigurationError::InvalidParameter {
                name: "exectime".into(),
                reason: format!("transition {} moves the clock past {clock} by {secs}s, out of range", transition.name),
            })?;
        if let Some(wh) = &self.params.working_hours {
            ts = wh.fold(ts);
        }
        *clock = ts;

        let mut event = Event::default();
        for (name, value) in ctx.event_attributes().chain(ctx.case_attributes()) {
            event.insert(name, value.clone());
        }
        for (name, supplied) in case_data {
            let value = match supplied {
                SuppliedValue::Constant(v) => Some(v),
                SuppliedValue::PerActivity(by_activity) => by_activity.get(&activity),
            };
            if let Some(value) = value {
                event.insert(name.clone(), value.clone());
                ctx.bind(name, value.clone());
            }
        }

        let keys = &self.params.keys;
        event.insert(keys.activity.clone(), activity);
        event.insert(keys.timestamp.clone(), ts);
        Ok(Some(event))
    }
}

/// Activity name for a label: the label without a trailing bracketed qualifier.
#[must_use]
pub fn strip_label_suffix(label: &str) -> String {
    let stripped = LABEL_SUFFIX.replace(label, "");
    if stripped.trim().is_empty() {
        label.trim().to_owned()
    } else {
        stripped.trim().to_owned()
    }
}

/// Whole seconds drawn uniformly from the mean ±10%, both ends rounded to the nearest second.
///
/// Means beyond the `i64` range saturate; the caller rejects the result if it leaves the clock's
/// range.
#[allow(clippy::cast_possible_truncation)]
pub fn jittered_duration<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> i64 {
    if !mean.is_finite() || mean <= 0.0 {
        return 0;
    }
    let lo = (mean * (1.0 - DURATION_JITTER)).round() as i64;
    let hi = (mean * (1.0 + DURATION_JITTER)).round() as i64;
    if hi <= lo {
        return lo;
    }
    rng.gen_range(lo..=hi)
}

/// Seed of the generator for trace `index`, derived from the run seed (splitmix64).
#[must_use]
pub const fn trace_seed(seed: u64, index: usize) -> u64 {
    let mut z = seed.wrapping_add((index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Play out `params.num_traces` traces of a built net.
///
/// # Errors
/// See [`Simulator::new`] and [`Simulator::playout`].
pub fn playout(
    net: &PetriNet,
    initial_marking: &Marking,
    params: &PlayoutParams,
    supplier: Option<&dyn CaseDataSupplier>,
) -> Result<EventLog> {
    Simulator::new(net, initial_marking, params)?.playout(supplier, None)
}

/// End-to-end run: build the net, play it out with a progress bar, then apply the configured
/// noise passes in order.
///
/// A missing seed is drawn at random and logged so the run can be repeated.
///
/// # Errors
/// Build, configuration and evaluation errors; nothing is produced on failure.
#[instrument(skip_all, fields(records = records.len()))]
pub fn run(records: &[GraphRecord], config: &RunConfig, supplier: Option<&dyn CaseDataSupplier>) -> Result<EventLog> {
    let built = build_net(records)?;
    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, "starting playout");

    let params = config.playout_params(&built.net, seed)?;
    for pass in &config.noise {
        pass.validate()?;
    }
    let simulator = Simulator::new(&built.net, &built.initial_marking, &params)?;

    let pb = ProgressBar::new(params.num_traces as u64)
        .with_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} traces ({percent}%) {msg}",
        )?)
        .with_message(format!("Playing out traces (max length {})", params.max_trace_length))
        .with_finish(ProgressFinish::AndLeave);
    let mut log = simulator.playout(supplier, Some(&pb))?;
    pb.finish_using_style();

    let mut rng = StdRng::seed_from_u64(trace_seed(seed, usize::MAX));
    for pass in &config.noise {
        noise::apply(&mut log, pass, &mut rng)?;
    }
    Ok(log)
}

//! Run configuration, loaded from YAML and overridden from the command line.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Result;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::instrument;

use crate::builder::resolve_marking;
use crate::context::CaseAttribute;
use crate::engine::GuardPolicy;
use crate::log::LogKeys;
use crate::model::PetriNet;
use crate::noise::NoisePass;
use crate::simulation::{
    PlayoutParams,
    WorkingHours,
};

/// Everything that shapes a generation run apart from the net itself.
///
/// Every field has a default, so an empty file (or no file) is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of traces to generate.
    pub num_traces: usize,
    /// Maximum number of events per trace.
    pub max_trace_length: usize,
    /// Trace attribute holding the case identifier.
    pub case_key: String,
    /// Event attribute holding the activity name.
    pub activity_key: String,
    /// Event attribute holding the timestamp.
    pub timestamp_key: String,
    /// Start of the first trace, in seconds since the epoch.
    pub initial_timestamp: i64,
    /// Offset between the start times of consecutive traces, in seconds.
    pub case_interval_secs: i64,
    /// Explicit final marking as place id/name → tokens; inferred from the net when absent.
    pub final_marking: Option<BTreeMap<String, u32>>,
    /// Working hours to fold timestamps into.
    pub working_hours: Option<WorkingHours>,
    /// `name: value` case attribute specifications.
    pub case_attributes: Vec<String>,
    /// How the guards of one transition combine.
    pub guard_policy: GuardPolicy,
    /// Run seed; drawn at random when absent.
    pub seed: Option<u64>,
    /// Maximum number of consecutive silent firings before a trace is cut.
    pub max_silent_steps: usize,
    /// Noise passes applied after playout, in order.
    pub noise: Vec<NoisePass>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let params = PlayoutParams::default();
        Self {
            num_traces: params.num_traces,
            max_trace_length: params.max_trace_length,
            case_key: params.keys.case,
            activity_key: params.keys.activity,
            timestamp_key: params.keys.timestamp,
            initial_timestamp: params.initial_timestamp,
            case_interval_secs: params.case_interval_secs,
            final_marking: None,
            working_hours: None,
            case_attributes: Vec::new(),
            guard_policy: params.guard_policy,
            seed: None,
            max_silent_steps: params.max_silent_steps,
            noise: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Read a YAML configuration file.
    ///
    /// # Errors
    /// I/O failures, malformed YAML and unknown fields.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(BufReader::new(file))?)
    }

    /// Parse a YAML configuration from a string.
    ///
    /// # Errors
    /// Malformed YAML and unknown fields.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Names of the well-known attributes.
    #[must_use]
    pub fn keys(&self) -> LogKeys {
        LogKeys {
            case: self.case_key.clone(),
            activity: self.activity_key.clone(),
            timestamp: self.timestamp_key.clone(),
        }
    }

    /// Resolve the configuration against `net` into playout parameters.
    ///
    /// # Errors
    /// Malformed case attribute specifications and final markings naming unknown places.
    pub fn playout_params(&self, net: &PetriNet, seed: u64) -> Result<PlayoutParams> {
        let case_attributes = self
            .case_attributes
            .iter()
            .map(|spec| CaseAttribute::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let final_marking = self.final_marking.as_ref().map(|m| resolve_marking(net, m)).transpose()?;

        Ok(PlayoutParams {
            num_traces: self.num_traces,
            max_trace_length: self.max_trace_length,
            keys: self.keys(),
            initial_timestamp: self.initial_timestamp,
            case_interval_secs: self.case_interval_secs,
            final_marking,
            working_hours: self.working_hours,
            case_attributes,
            guard_policy: self.guard_policy,
            seed,
            max_silent_steps: self.max_silent_steps,
        })
    }
}

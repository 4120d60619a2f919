//! Error taxonomy shared by the generator.
//!
//! Three families matter to callers:
//!
//! * [`BuildError`] – the graph description cannot be turned into a net.
//! * [`ConfigurationError`] – the net builds, but the run parameters (weights, working hours, noise
//!   settings) make simulation impossible or meaningless.
//! * [`EvaluationError`] – a guard or attribute expression cannot be parsed or evaluated.
//!
//! Library entry points return [`anyhow::Result`] and raise these typed errors, so callers that
//! care can `downcast_ref` to the family they want to handle.
pub use anyhow::{
    anyhow,
    bail,
    ensure,
};
pub use thiserror::Error;

/// Convenience alias for fallible functions with no return value.
pub type EmptyResult = anyhow::Result<()>;

/// Failures while building a net from its graph description.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    /// A link names a source or target that is neither a place nor a transition.
    #[error("link references unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// A link connects two places or two transitions.
    #[error("link {source_id} -> {target} must connect a place and a transition")]
    InvalidArc {
        /// Source identifier as written in the description.
        source_id: String,
        /// Target identifier as written in the description.
        target: String,
    },

    /// A final marking names a place that does not exist.
    #[error("final marking references unknown place: {0}")]
    UnknownPlace(String),

    /// Two nodes share the same identifier.
    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    /// A record in the graph description is malformed.
    #[error("malformed graph record: {0}")]
    MalformedRecord(String),

    /// A guard or attribute expression on a transition does not parse.
    #[error("transition {transition}: invalid expression {expression:?}: {source}")]
    InvalidExpression {
        /// Name of the transition carrying the expression.
        transition: String,
        /// The offending expression text.
        expression: String,
        /// The parse failure.
        #[source]
        source: EvaluationError,
    },
}

/// Run parameters that make simulation impossible.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A transition that can become enabled has no selection weight.
    #[error("no stochastic weight for transition {0}")]
    MissingWeight(String),

    /// A selection weight is negative or not a finite number.
    #[error("invalid stochastic weight {weight} for transition {transition}")]
    InvalidWeight {
        /// Transition carrying the weight.
        transition: String,
        /// The rejected weight.
        weight: f64,
    },

    /// All candidates together weigh nothing, so no draw is possible.
    #[error("candidate weights sum to {0}, expected a positive total")]
    NonPositiveWeightSum(f64),

    /// Working hours are out of range or empty.
    #[error("invalid working hours {start}..{end}: expected 0 <= start < end <= 24")]
    InvalidWorkingHours {
        /// Configured start hour.
        start: u32,
        /// Configured end hour.
        end: u32,
    },

    /// A noise injector was asked for a probability outside `[0, 1]`.
    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),

    /// A noise injector was asked to act zero times.
    #[error("count must be at least 1")]
    InvalidCount,

    /// A case attribute specification is not of the form `name: value`.
    #[error("invalid case attribute specification {0:?}, expected \"name: value\"")]
    InvalidCaseAttribute(String),

    /// Any other out-of-range run parameter.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Name of the parameter.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Failures while parsing or evaluating a guard or attribute expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// The expression text does not parse.
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset of the failure.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// The expression references a name that has no binding.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// The expression calls a function outside the sandbox.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A function was called with the wrong number or kind of arguments.
    #[error("bad arguments to {function}: {message}")]
    BadArguments {
        /// The function called.
        function: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// An operator was applied to values it does not support.
    #[error("cannot apply {op} to {lhs} and {rhs}")]
    TypeMismatch {
        /// The operator.
        op: String,
        /// Type name of the left operand.
        lhs: String,
        /// Type name of the right operand.
        rhs: String,
    },

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
}

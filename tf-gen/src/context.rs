//! Per-trace binding environment for guard conditions and attribute expressions.
use std::collections::BTreeMap;

use rand::Rng;
use tf_core::errors::{
    ConfigurationError,
    EvaluationError,
};
use tracing::trace;

use crate::expr::{
    self,
    Expr,
    Scope,
};
use crate::value::Value;

/// One `name: value` case attribute specification.
///
/// The value is kept as an expression so that things like `randint(1, 5)` differ between cases.
/// Text that does not parse, or that is a single bare word, is taken verbatim as a string.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseAttribute {
    /// Attribute name.
    pub name: String,
    /// How the value is produced for each case.
    pub value: CaseAttributeValue,
}

/// How a case attribute gets its value.
#[derive(Clone, Debug, PartialEq)]
pub enum CaseAttributeValue {
    /// Fixed string, used as-is.
    Raw(String),
    /// Expression evaluated once per case.
    Expr(Expr),
}

impl CaseAttribute {
    /// Parse a `name: value` specification.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::InvalidCaseAttribute`] if there is no `:` or the name is empty.
    pub fn parse(spec: &str) -> Result<Self, ConfigurationError> {
        let (name, raw) = spec
            .split_once(':')
            .ok_or_else(|| ConfigurationError::InvalidCaseAttribute(spec.into()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::InvalidCaseAttribute(spec.into()));
        }

        let raw = raw.trim();
        let value = match expr::parse(raw) {
            Ok(Expr::Ident(_)) | Err(_) => CaseAttributeValue::Raw(raw.to_owned()),
            Ok(e) => CaseAttributeValue::Expr(e),
        };
        Ok(Self { name: name.to_owned(), value })
    }
}

/// Mutable bindings for one trace.
///
/// Two families of names live here: case attributes, fixed once per trace, and event attributes,
/// declared on transitions and recomputed whenever their transition is considered. Anything else
/// that gets bound (for example values from external case data) is visible to expressions but is
/// not reported as an event or case attribute.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    /// Every current binding.
    bindings: BTreeMap<String, Value>,
    /// Declared event attribute names, in declaration order.
    event_attributes: Vec<String>,
    /// Case attribute names set for the current trace, in specification order.
    case_attributes: Vec<String>,
}

impl Scope for EvaluationContext {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

impl EvaluationContext {
    /// Create a context that knows the given event attribute names. All of them start out null.
    pub fn new<I, S>(event_attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut event_attributes: Vec<String> = event_attributes.into_iter().map(Into::into).collect();
        let mut seen = std::collections::HashSet::new();
        event_attributes.retain(|name| seen.insert(name.clone()));

        let mut ctx = Self { event_attributes, ..Self::default() };
        ctx.reset();
        ctx
    }

    /// Forget everything from the previous trace: drop all bindings and declare every event
    /// attribute as null.
    pub fn reset(&mut self) {
        self.bindings.clear();
        self.case_attributes.clear();
        for name in &self.event_attributes {
            self.bindings.insert(name.clone(), Value::Null);
        }
    }

    /// Evaluate and bind the case attributes for a new trace, in order, so later specifications
    /// can refer to earlier ones.
    ///
    /// # Errors
    /// Propagates evaluation failures of expression-valued attributes.
    pub fn set_case_attributes<R: Rng + ?Sized>(
        &mut self,
        specs: &[CaseAttribute],
        rng: &mut R,
    ) -> Result<(), EvaluationError> {
        for spec in specs {
            let value = match &spec.value {
                CaseAttributeValue::Raw(s) => Value::Str(s.clone()),
                CaseAttributeValue::Expr(e) => e.evaluate(&*self, rng)?,
            };
            trace!(name = %spec.name, %value, "case attribute");
            self.bind(&spec.name, value);
            if !self.case_attributes.contains(&spec.name) {
                self.case_attributes.push(spec.name.clone());
            }
        }
        Ok(())
    }

    /// Bind `name` to `value`, replacing any previous binding.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_owned(), value);
    }

    /// Make `name` known as null unless it is already bound.
    pub fn declare(&mut self, name: &str) {
        self.bindings.entry(name.to_owned()).or_insert(Value::Null);
    }

    /// Current value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Evaluate a parsed expression against the current bindings.
    ///
    /// # Errors
    /// See [`Expr::evaluate`].
    pub fn evaluate<R: Rng + ?Sized>(&self, expr: &Expr, rng: &mut R) -> Result<Value, EvaluationError> {
        expr.evaluate(self, rng)
    }

    /// Parse and evaluate `src` in one go.
    ///
    /// # Errors
    /// Parse failures and evaluation failures.
    pub fn evaluate_str<R: Rng + ?Sized>(&self, src: &str, rng: &mut R) -> Result<Value, EvaluationError> {
        expr::parse(src)?.evaluate(self, rng)
    }

    /// Event attributes that currently hold a value, in declaration order.
    pub fn event_attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.named(&self.event_attributes)
    }

    /// Case attributes of the current trace, in specification order.
    pub fn case_attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.named(&self.case_attributes)
    }

    /// Non-null bindings for `names`, in the order given.
    fn named<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = (&'a str, &'a Value)> {
        names.iter().filter_map(|name| match self.bindings.get(name) {
            None | Some(Value::Null) => None,
            Some(v) => Some((name.as_str(), v)),
        })
    }
}

//! Serializable condition rules evaluated over a JSON view of a subject.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "NULL")]
    Null,
    #[serde(rename = "NOT NULL")]
    NotNull,
}

impl RuleOperator {
    pub fn inverse(self) -> RuleOperator {
        use RuleOperator::*;
        match self {
            Eq => NotEq,
            NotEq => Eq,
            Lt => Ge,
            Ge => Lt,
            Gt => Le,
            Le => Gt,
            In => NotIn,
            NotIn => In,
            Null => NotNull,
            NotNull => Null,
        }
    }

    pub fn symbol(self) -> &'static str {
        use RuleOperator::*;
        match self {
            Eq => "=",
            NotEq => "!=",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
            In => "IN",
            NotIn => "NOT IN",
            Null => "NULL",
            NotNull => "NOT NULL",
        }
    }
}

/// A condition over one attribute path, with optional child rules.
///
/// A `precondition` rule only gates its children: when its condition does
/// not hold the rule is skipped, otherwise the children decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub label: String,
    /// Dotted path in the subject (`pmfm.id`, `model.originalData.measurementValues.90`).
    pub controlled_attribute: String,
    pub operator: RuleOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
    #[serde(default)]
    pub precondition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Rule>,
}

/// Rule label to message.
pub type RuleErrors = BTreeMap<String, String>;

impl Rule {
    pub fn new(label: impl Into<String>, attribute: impl Into<String>, operator: RuleOperator) -> Self {
        Self {
            label: label.into(),
            controlled_attribute: attribute.into(),
            operator,
            value: None,
            values: Vec::new(),
            precondition: false,
            message: None,
            children: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_values<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Turn into a precondition gating `children`.
    pub fn when(mut self, children: Vec<Rule>) -> Self {
        self.precondition = true;
        self.children = children;
        self
    }

    /// Same rule with the inverse operator.
    pub fn not(&self) -> Rule {
        Rule {
            label: format!("not-{}", self.label),
            operator: self.operator.inverse(),
            ..self.clone()
        }
    }

    /// Structural check, recursively.
    pub fn check(&self) -> Result<()> {
        if self.controlled_attribute.trim().is_empty() {
            return Err(BatchError::InvalidRule(format!("{}: missing controlled attribute", self.label)));
        }
        match self.operator {
            RuleOperator::In | RuleOperator::NotIn if self.values.is_empty() => {
                return Err(BatchError::InvalidRule(format!(
                    "{}: operator {} needs values",
                    self.label,
                    self.operator.symbol()
                )));
            }
            RuleOperator::Null | RuleOperator::NotNull | RuleOperator::In | RuleOperator::NotIn => {}
            _ if self.value.is_none() => {
                return Err(BatchError::InvalidRule(format!(
                    "{}: operator {} needs a value",
                    self.label,
                    self.operator.symbol()
                )));
            }
            _ => {}
        }
        if self.precondition && self.children.is_empty() {
            return Err(BatchError::InvalidRule(format!("{}: precondition without children", self.label)));
        }
        self.children.iter().try_for_each(Rule::check)
    }

    /// The condition of this rule alone (children ignored).
    pub fn filter(&self, subject: &Value) -> bool {
        let actual = resolve_path(subject, &self.controlled_attribute);
        match self.operator {
            RuleOperator::Null => is_null(actual),
            RuleOperator::NotNull => !is_null(actual),
            RuleOperator::In => self.values.iter().any(|v| loose_eq(actual, Some(v))),
            RuleOperator::NotIn => !self.values.iter().any(|v| loose_eq(actual, Some(v))),
            RuleOperator::Eq => loose_eq(actual, self.value.as_ref()),
            RuleOperator::NotEq => !loose_eq(actual, self.value.as_ref()),
            RuleOperator::Lt => compare(actual, self.value.as_ref()) == Some(Ordering::Less),
            RuleOperator::Gt => compare(actual, self.value.as_ref()) == Some(Ordering::Greater),
            RuleOperator::Le => matches!(
                compare(actual, self.value.as_ref()),
                Some(Ordering::Less | Ordering::Equal)
            ),
            RuleOperator::Ge => matches!(
                compare(actual, self.value.as_ref()),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }

    /// Errors of this rule and its children, `None` when valid.
    pub fn control(&self, subject: &Value) -> Option<RuleErrors> {
        let mut errors = RuleErrors::new();
        self.collect_errors(subject, &mut errors);
        (!errors.is_empty()).then_some(errors)
    }

    pub fn valid(&self, subject: &Value) -> bool {
        self.control(subject).is_none()
    }

    fn collect_errors(&self, subject: &Value, errors: &mut RuleErrors) {
        let holds = self.filter(subject);
        if self.precondition {
            if !holds {
                return;
            }
        } else if !holds {
            errors.insert(self.label.clone(), self.default_message());
        }
        for child in &self.children {
            child.collect_errors(subject, errors);
        }
    }

    fn default_message(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            let expected = match self.operator {
                RuleOperator::Null | RuleOperator::NotNull => String::new(),
                RuleOperator::In | RuleOperator::NotIn => format!(
                    " ({})",
                    self.values.iter().map(display).collect::<Vec<_>>().join(", ")
                ),
                _ => format!(" {}", self.value.as_ref().map(display).unwrap_or_default()),
            };
            format!("{} {}{}", self.controlled_attribute, self.operator.symbol(), expected)
        })
    }
}

/// Evaluation of rule lists.
pub struct RuleUtils;

impl RuleUtils {
    /// Every rule holds.
    pub fn valid(subject: &Value, rules: &[Rule]) -> bool {
        rules.iter().all(|r| r.valid(subject))
    }

    pub fn control(subject: &Value, rules: &[Rule]) -> Option<RuleErrors> {
        let mut errors = RuleErrors::new();
        for rule in rules {
            rule.collect_errors(subject, &mut errors);
        }
        (!errors.is_empty()).then_some(errors)
    }

    pub fn not(rules: &[Rule]) -> Vec<Rule> {
        rules.iter().map(Rule::not).collect()
    }

    pub fn check(rules: &[Rule]) -> Result<()> {
        rules.iter().try_for_each(Rule::check)
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

/// Follow a dotted path through objects and arrays.
fn resolve_path<'a>(subject: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(subject, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn is_null(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers and numeric strings compare as numbers; objects by their `id`.
fn loose_eq(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (a, b) if is_null(a) && is_null(b) => true,
        (Some(Value::Object(map)), Some(b)) if map.contains_key("id") => loose_eq(map.get("id"), Some(b)),
        (Some(a), Some(b)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => display(a) == display(b),
        },
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: Option<&Value>) -> Option<Ordering> {
    let (a, b) = (actual?, expected?);
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::numeric::format_number;
use crate::pmfm::{Pmfm, PmfmType};
use crate::referential::ReferentialRef;

const MULTIPLE_SEPARATOR: char = '|';

/// A measurement value, in model form (strings) or form form (typed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PmfmValue {
    Boolean(bool),
    Number(f64),
    Qualitative(ReferentialRef),
    Multiple(Vec<PmfmValue>),
    Text(String),
    Date(NaiveDate),
}

/// PMFM id (as string) to value.
pub type MeasurementValues = BTreeMap<String, PmfmValue>;

impl PmfmValue {
    pub fn text(value: impl Into<String>) -> Self {
        PmfmValue::Text(value.into())
    }

    /// Model representation of a qualitative value id.
    pub fn qv_id(id: i64) -> Self {
        PmfmValue::Text(id.to_string())
    }

    /// Numeric reading, for model strings and typed numbers alike.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PmfmValue::Number(n) if n.is_finite() => Some(*n),
            PmfmValue::Text(t) => t.trim().parse().ok().filter(|n: &f64| n.is_finite()),
            _ => None,
        }
    }

    /// Qualitative id, for `ReferentialRef` and model strings.
    pub fn as_ref_id(&self) -> Option<i64> {
        match self {
            PmfmValue::Qualitative(r) => Some(r.id),
            PmfmValue::Text(t) => t.trim().parse().ok(),
            PmfmValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// String used for equality and for the flat frame columns.
    pub fn comparable(&self) -> String {
        match self {
            PmfmValue::Boolean(b) => b.to_string(),
            PmfmValue::Number(n) => format_number(*n),
            PmfmValue::Qualitative(r) => r.id.to_string(),
            PmfmValue::Multiple(values) => values
                .iter()
                .map(PmfmValue::comparable)
                .collect::<Vec<_>>()
                .join(&MULTIPLE_SEPARATOR.to_string()),
            PmfmValue::Text(t) => t.trim().to_string(),
            PmfmValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            PmfmValue::Text(t) => t.trim().is_empty(),
            PmfmValue::Multiple(v) => v.is_empty(),
            PmfmValue::Number(n) => n.is_nan(),
            _ => false,
        }
    }
}

/// Conversions between form and model representations.
pub struct PmfmValueUtils;

impl PmfmValueUtils {
    /// Nil equals nil; otherwise compared by id or by textual value.
    pub fn equals(a: Option<&PmfmValue>, b: Option<&PmfmValue>) -> bool {
        let a = a.filter(|v| !v.is_blank());
        let b = b.filter(|v| !v.is_blank());
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                    return x == y;
                }
                a.comparable() == b.comparable()
            }
            _ => false,
        }
    }

    /// Form value to its model string.
    pub fn to_model_value(value: Option<&PmfmValue>, pmfm: &Pmfm) -> Option<PmfmValue> {
        let value = value.filter(|v| !v.is_blank())?;
        if pmfm.is_multiple {
            if let PmfmValue::Multiple(values) = value {
                let joined = values
                    .iter()
                    .filter_map(|v| Self::single_to_model(v, pmfm))
                    .collect::<Vec<_>>()
                    .join(&MULTIPLE_SEPARATOR.to_string());
                return (!joined.is_empty()).then_some(PmfmValue::Text(joined));
            }
        }
        Self::single_to_model(value, pmfm).map(PmfmValue::Text)
    }

    fn single_to_model(value: &PmfmValue, pmfm: &Pmfm) -> Option<String> {
        match pmfm.pmfm_type {
            PmfmType::Qualitative => value.as_ref_id().map(|id| id.to_string()),
            PmfmType::Integer | PmfmType::Double => value.as_f64().map(format_number),
            PmfmType::Boolean => match value {
                PmfmValue::Boolean(b) => Some(b.to_string()),
                PmfmValue::Text(t) => Some(matches!(t.trim(), "true" | "1").to_string()),
                PmfmValue::Number(n) => Some((*n != 0.0).to_string()),
                _ => None,
            },
            PmfmType::Date => match value {
                PmfmValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
                PmfmValue::Text(t) => parse_date(t).map(|d| d.format("%Y-%m-%d").to_string()),
                _ => None,
            },
            PmfmType::String => Some(value.comparable()),
        }
    }

    /// Model value to its typed form value; the PMFM default fills nil.
    pub fn from_model_value(value: Option<&PmfmValue>, pmfm: &Pmfm) -> Option<PmfmValue> {
        let value = value
            .filter(|v| !v.is_blank())
            .or(pmfm.default_value.as_ref())?;
        if pmfm.is_multiple {
            let parts: Vec<PmfmValue> = match value {
                PmfmValue::Multiple(values) => values
                    .iter()
                    .filter_map(|v| Self::single_from_model(v, pmfm))
                    .collect(),
                other => other
                    .comparable()
                    .split(MULTIPLE_SEPARATOR)
                    .filter_map(|s| Self::single_from_model(&PmfmValue::text(s), pmfm))
                    .collect(),
            };
            return (!parts.is_empty()).then_some(PmfmValue::Multiple(parts));
        }
        Self::single_from_model(value, pmfm)
    }

    fn single_from_model(value: &PmfmValue, pmfm: &Pmfm) -> Option<PmfmValue> {
        match pmfm.pmfm_type {
            PmfmType::Qualitative => {
                let id = value.as_ref_id()?;
                let found = pmfm.find_qualitative_value(id).cloned();
                if found.is_none() {
                    tracing::debug!(pmfm_id = pmfm.id, qv_id = id, "unknown qualitative value");
                }
                found.map(PmfmValue::Qualitative)
            }
            PmfmType::Integer => value.as_f64().map(|n| PmfmValue::Number(n.trunc())),
            PmfmType::Double => value.as_f64().map(PmfmValue::Number),
            PmfmType::Boolean => match value {
                PmfmValue::Boolean(b) => Some(PmfmValue::Boolean(*b)),
                PmfmValue::Text(t) => Some(PmfmValue::Boolean(matches!(t.trim(), "true" | "1"))),
                PmfmValue::Number(n) => Some(PmfmValue::Boolean(*n != 0.0)),
                _ => None,
            },
            PmfmType::Date => match value {
                PmfmValue::Date(d) => Some(PmfmValue::Date(*d)),
                PmfmValue::Text(t) => parse_date(t).map(PmfmValue::Date),
                _ => None,
            },
            PmfmType::String => Some(PmfmValue::Text(value.comparable())),
        }
    }

    /// Convert known keys to model form; unknown keys are kept untouched.
    pub fn normalize_values_to_model(values: &MeasurementValues, pmfms: &[Pmfm]) -> MeasurementValues {
        let mut target = values.clone();
        for pmfm in pmfms {
            let key = pmfm.id_key();
            match Self::to_model_value(values.get(&key), pmfm) {
                Some(v) => target.insert(key, v),
                None => target.remove(&key),
            };
        }
        target
    }

    /// Convert known keys to form form; unknown keys are kept untouched.
    pub fn normalize_values_to_form(values: &MeasurementValues, pmfms: &[Pmfm]) -> MeasurementValues {
        let mut target = values.clone();
        for pmfm in pmfms {
            let key = pmfm.id_key();
            match Self::from_model_value(values.get(&key), pmfm) {
                Some(v) => target.insert(key, v),
                None => target.remove(&key),
            };
        }
        target
    }

    /// Human-readable value (qualitative values shown by label).
    pub fn as_display(value: Option<&PmfmValue>, pmfm: &Pmfm) -> String {
        match Self::from_model_value(value, pmfm) {
            Some(PmfmValue::Qualitative(r)) => r.label,
            Some(PmfmValue::Multiple(values)) => values
                .iter()
                .map(|v| match v {
                    PmfmValue::Qualitative(r) => r.label.clone(),
                    other => other.comparable(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.comparable(),
            None => String::new(),
        }
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qualitative_pmfm() -> Pmfm {
        Pmfm::qualitative(
            90,
            "DISCARD_OR_LANDING",
            vec![ReferentialRef::new(190, "LAN", "Landing"), ReferentialRef::new(191, "DIS", "Discard")],
        )
    }

    #[test]
    fn equality_is_representation_agnostic() {
        let qv = PmfmValue::Qualitative(ReferentialRef::new(190, "LAN", "Landing"));
        assert!(PmfmValueUtils::equals(Some(&qv), Some(&PmfmValue::text("190"))));
        assert!(PmfmValueUtils::equals(Some(&PmfmValue::Number(2.0)), Some(&PmfmValue::text("2"))));
        assert!(PmfmValueUtils::equals(None, Some(&PmfmValue::text(" "))));
        assert!(!PmfmValueUtils::equals(Some(&qv), None));
    }

    #[test]
    fn form_model_round_trip_for_each_type() {
        let cases = vec![
            (qualitative_pmfm(), PmfmValue::Qualitative(ReferentialRef::new(191, "DIS", "Discard"))),
            (Pmfm::new(1, "COUNT", PmfmType::Integer), PmfmValue::Number(12.0)),
            (Pmfm::new(2, "LENGTH", PmfmType::Double), PmfmValue::Number(12.5)),
            (Pmfm::new(3, "FLAG", PmfmType::Boolean), PmfmValue::Boolean(true)),
            (
                Pmfm::new(4, "DAY", PmfmType::Date),
                PmfmValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
            ),
        ];
        for (pmfm, form) in cases {
            let model = PmfmValueUtils::to_model_value(Some(&form), &pmfm).unwrap();
            assert!(matches!(model, PmfmValue::Text(_)), "model value of {} is a string", pmfm.id);
            let back = PmfmValueUtils::from_model_value(Some(&model), &pmfm);
            assert_eq!(back, Some(form), "round trip of pmfm {}", pmfm.id);
        }
    }

    #[test]
    fn multiple_values_are_joined() {
        let mut pmfm = qualitative_pmfm();
        pmfm.is_multiple = true;
        let form = PmfmValue::Multiple(vec![
            PmfmValue::Qualitative(ReferentialRef::new(190, "LAN", "Landing")),
            PmfmValue::Qualitative(ReferentialRef::new(191, "DIS", "Discard")),
        ]);
        let model = PmfmValueUtils::to_model_value(Some(&form), &pmfm).unwrap();
        assert_eq!(model, PmfmValue::text("190|191"));
        assert_eq!(PmfmValueUtils::from_model_value(Some(&model), &pmfm), Some(form));
        assert_eq!(PmfmValueUtils::as_display(Some(&model), &pmfm), "LAN, DIS");
    }

    #[test]
    fn normalization_keeps_unknown_keys_and_applies_defaults() {
        let mut pmfm = qualitative_pmfm();
        pmfm.default_value = Some(PmfmValue::text("190"));
        let mut values = MeasurementValues::new();
        values.insert("999".into(), PmfmValue::text("opaque"));
        let form = PmfmValueUtils::normalize_values_to_form(&values, &[pmfm.clone()]);
        assert_eq!(form.get("999"), Some(&PmfmValue::text("opaque")));
        assert!(matches!(form.get("90"), Some(PmfmValue::Qualitative(r)) if r.id == 190));
        let model = PmfmValueUtils::normalize_values_to_model(&form, &[pmfm]);
        assert_eq!(model.get("90"), Some(&PmfmValue::text("190")));
    }
}

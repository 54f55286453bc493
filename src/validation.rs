use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured validation error attached to one field.
///
/// Serialized the way form validators report them: `{"max":{"max":10}}`,
/// `{"required":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationError {
    Required(bool),
    Min { min: f64 },
    Max { max: f64 },
    WeightForIndividualCount(bool),
    /// Rule label to message.
    Rule(BTreeMap<String, String>),
}

/// Field path (`weight.value`, `children.0.samplingRatio`...) to error.
pub type FieldErrors = BTreeMap<String, ValidationError>;

pub mod fields {
    pub const TOTAL_WEIGHT: &str = "weight.value";
    pub const SAMPLING_RATIO: &str = "children.0.samplingRatio";
    pub const SAMPLING_WEIGHT: &str = "children.0.weight.value";
    pub const INDIVIDUAL_COUNT: &str = "individualCount";
}

/// Prefix every path of `errors` with `prefix.`.
pub fn prefix_errors(prefix: &str, errors: FieldErrors) -> FieldErrors {
    errors
        .into_iter()
        .map(|(path, error)| (format!("{prefix}.{path}"), error))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_like_form_errors() {
        assert_eq!(
            serde_json::to_value(ValidationError::Max { max: 10.0 }).unwrap(),
            json!({"max": {"max": 10.0}})
        );
        assert_eq!(
            serde_json::to_value(ValidationError::Required(true)).unwrap(),
            json!({"required": true})
        );
        assert_eq!(
            serde_json::to_value(ValidationError::WeightForIndividualCount(true)).unwrap(),
            json!({"weightForIndividualCount": true})
        );
    }

    #[test]
    fn prefixes_paths() {
        let mut errors = FieldErrors::new();
        errors.insert(fields::TOTAL_WEIGHT.into(), ValidationError::Required(true));
        let prefixed = prefix_errors("children.1", errors);
        assert!(prefixed.contains_key("children.1.weight.value"));
    }
}

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sampling_ratio::SamplingRatioFormat;
use crate::schema::units;

/// Program-level flags consumed by the engine.
///
/// Every field has a default so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramConfig {
    pub sampling_ratio_format: SamplingRatioFormat,
    pub weight_max_decimals: u32,
    pub required_sample_weight: bool,
    pub max_weight: Option<f64>,
    pub allow_discard: bool,
    pub max_tree_depth: usize,
    pub taxon_groups_no_weight: Vec<String>,
    pub taxon_groups_no_landing: Vec<String>,
    pub weight_displayed_unit: String,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            sampling_ratio_format: SamplingRatioFormat::Percent,
            weight_max_decimals: 3,
            required_sample_weight: false,
            max_weight: None,
            allow_discard: true,
            max_tree_depth: 4,
            taxon_groups_no_weight: Vec::new(),
            taxon_groups_no_landing: Vec::new(),
            weight_displayed_unit: units::DEFAULT_WEIGHT_UNIT.to_string(),
        }
    }
}

impl ProgramConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when the taxon group is exempt from weight collection.
    pub fn is_weight_exempt(&self, taxon_group_label: &str) -> bool {
        self.taxon_groups_no_weight
            .iter()
            .any(|l| l.eq_ignore_ascii_case(taxon_group_label))
    }

    /// True when the taxon group skips the landing/discard split.
    pub fn is_landing_exempt(&self, taxon_group_label: &str) -> bool {
        self.taxon_groups_no_landing
            .iter()
            .any(|l| l.eq_ignore_ascii_case(taxon_group_label))
    }
}

/// Options of one solver pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Mandatory: the solver refuses to run without a format.
    pub sampling_ratio_format: Option<SamplingRatioFormat>,
    pub weight_max_decimals: u32,
    pub required_sample_weight: bool,
    pub max_weight: Option<f64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            sampling_ratio_format: None,
            weight_max_decimals: 3,
            required_sample_weight: false,
            max_weight: None,
        }
    }
}

impl From<&ProgramConfig> for SolverOptions {
    fn from(config: &ProgramConfig) -> Self {
        Self {
            sampling_ratio_format: Some(config.sampling_ratio_format),
            weight_max_decimals: config.weight_max_decimals,
            required_sample_weight: config.required_sample_weight,
            max_weight: config.max_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config =
            ProgramConfig::from_json_str(r#"{"samplingRatioFormat":"1/w","taxonGroupsNoWeight":["MNZ"]}"#)
                .unwrap();
        assert_eq!(config.sampling_ratio_format, SamplingRatioFormat::InverseCoefficient);
        assert_eq!(config.weight_max_decimals, 3);
        assert!(config.allow_discard);
        assert!(config.is_weight_exempt("mnz"));
        assert!(!config.is_landing_exempt("MNZ"));
    }

    #[test]
    fn solver_options_carry_the_format() {
        let opts = SolverOptions::from(&ProgramConfig::default());
        assert_eq!(opts.sampling_ratio_format, Some(SamplingRatioFormat::Percent));
        assert_eq!(opts.weight_max_decimals, 3);
    }
}

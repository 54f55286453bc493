use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::measurement::PmfmValue;
use crate::referential::QualitativeValue;
use crate::schema::{method_ids, pmfm_ids, units};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PmfmType {
    Integer,
    Double,
    #[default]
    String,
    Qualitative,
    Boolean,
    Date,
}

/// A measurement parameter definition (Parameter, Matrix, Fraction, Method).
///
/// Only `id` is mandatory; missing flags mean "not required, not hidden,
/// not computed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pmfm {
    pub id: i32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub pmfm_type: PmfmType,
    #[serde(default)]
    pub method_id: Option<i32>,
    #[serde(default)]
    pub unit_label: Option<String>,
    #[serde(default)]
    pub maximum_number_decimals: Option<u32>,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub is_computed: bool,
    #[serde(default)]
    pub is_multiple: bool,
    #[serde(default)]
    pub taxon_group_ids: Vec<i64>,
    #[serde(default)]
    pub qualitative_values: Vec<QualitativeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<PmfmValue>,
    #[serde(default)]
    pub acquisition_level: Option<String>,
}

impl Pmfm {
    pub fn new(id: i32, label: impl Into<String>, pmfm_type: PmfmType) -> Self {
        Self {
            id,
            label: Some(label.into()),
            name: None,
            pmfm_type,
            method_id: None,
            unit_label: None,
            maximum_number_decimals: None,
            precision: None,
            required: false,
            hidden: false,
            is_computed: false,
            is_multiple: false,
            taxon_group_ids: Vec::new(),
            qualitative_values: Vec::new(),
            default_value: None,
            acquisition_level: None,
        }
    }

    pub fn qualitative(id: i32, label: impl Into<String>, values: Vec<QualitativeValue>) -> Self {
        Self {
            qualitative_values: values,
            ..Self::new(id, label, PmfmType::Qualitative)
        }
    }

    pub fn weight(id: i32, label: impl Into<String>, method_id: i32) -> Self {
        Self {
            method_id: Some(method_id),
            unit_label: Some(units::DEFAULT_WEIGHT_UNIT.to_string()),
            maximum_number_decimals: Some(3),
            is_computed: method_ids::CALCULATED_GROUP.contains(&method_id),
            ..Self::new(id, label, PmfmType::Double)
        }
    }

    pub fn id_key(&self) -> String {
        self.id.to_string()
    }

    pub fn label_str(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    pub fn is_qualitative(&self) -> bool {
        self.pmfm_type == PmfmType::Qualitative
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.pmfm_type, PmfmType::Integer | PmfmType::Double)
    }

    pub fn is_date(&self) -> bool {
        self.pmfm_type == PmfmType::Date
    }

    /// Label ends with `WEIGHT`, or a weight unit is declared.
    pub fn is_weight(&self) -> bool {
        self.label_str().to_ascii_uppercase().ends_with("WEIGHT")
            || (self.is_numeric()
                && self
                    .unit_label
                    .as_deref()
                    .is_some_and(|u| units::WEIGHT_TO_KG.iter().any(|(l, _)| *l == u)))
    }

    pub fn is_length(&self) -> bool {
        self.label_str().to_ascii_uppercase().contains("LENGTH")
    }

    pub fn is_dressing(&self) -> bool {
        self.id == pmfm_ids::DRESSING || self.label_str().to_ascii_uppercase().starts_with("DRESSING")
    }

    pub fn is_computed_method(&self) -> bool {
        self.is_computed
            || self
                .method_id
                .is_some_and(|m| method_ids::CALCULATED_GROUP.contains(&m))
    }

    pub fn is_estimated_method(&self) -> bool {
        self.method_id == Some(method_ids::ESTIMATED_BY_OBSERVER)
    }

    /// Qualitative with a number of values inside `range`.
    pub fn has_qv_count(&self, range: RangeInclusive<usize>) -> bool {
        self.is_qualitative() && range.contains(&self.qualitative_values.len())
    }

    /// No taxon-group restriction, or `taxon_group_id` is listed.
    pub fn applies_to_taxon_group(&self, taxon_group_id: Option<i64>) -> bool {
        self.taxon_group_ids.is_empty()
            || taxon_group_id.is_some_and(|id| self.taxon_group_ids.contains(&id))
    }

    pub fn find_qualitative_value(&self, id: i64) -> Option<&QualitativeValue> {
        self.qualitative_values.iter().find(|qv| qv.id == id)
    }

    /// Hidden clone pre-filled with `default_value`.
    pub fn hidden_with_default(&self, default_value: Option<PmfmValue>) -> Pmfm {
        Pmfm {
            hidden: true,
            default_value,
            ..self.clone()
        }
    }
}

/// Options of [`first_qualitative_pmfm`].
#[derive(Debug, Clone)]
pub struct QualitativePmfmFilter {
    pub exclude_hidden: bool,
    pub qv_count: RangeInclusive<usize>,
    pub exclude_pmfm_ids: Vec<i32>,
}

impl Default for QualitativePmfmFilter {
    fn default() -> Self {
        Self {
            exclude_hidden: true,
            qv_count: 2..=3,
            exclude_pmfm_ids: Vec::new(),
        }
    }
}

/// First qualitative PMFM matching `filter`, with its position.
pub fn first_qualitative_pmfm<'a>(
    pmfms: &'a [Pmfm],
    filter: &QualitativePmfmFilter,
) -> Option<(usize, &'a Pmfm)> {
    pmfms.iter().enumerate().find(|(_, p)| {
        p.has_qv_count(filter.qv_count.clone())
            && !(filter.exclude_hidden && p.hidden)
            && !filter.exclude_pmfm_ids.contains(&p.id)
    })
}

/// Weight PMFMs ordered measured, estimated, then computed.
pub fn weight_pmfms_by_priority(pmfms: &[Pmfm]) -> Vec<&Pmfm> {
    let mut weights: Vec<&Pmfm> = pmfms.iter().filter(|p| p.is_weight()).collect();
    weights.sort_by_key(|p| match (p.is_computed_method(), p.is_estimated_method()) {
        (false, false) => 0,
        (false, true) => 1,
        (true, _) => 2,
    });
    weights
}

/// PMFMs applicable to a taxon group.
pub fn filter_by_taxon_group(pmfms: &[Pmfm], taxon_group_id: Option<i64>) -> Vec<Pmfm> {
    pmfms
        .iter()
        .filter(|p| p.applies_to_taxon_group(taxon_group_id))
        .cloned()
        .collect()
}

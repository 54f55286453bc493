//! Weight derivations that need reference data: weight-length relationships
//! and round-weight (alive weight) coefficients.
//!
//! Lookups go through injected services. A failed or empty lookup means
//! "no conversion available" and never aborts the caller.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchWeight};
use crate::context::BatchContext;
use crate::error::Result;
use crate::measurement::PmfmValue;
use crate::numeric::round_half_up;
use crate::pmfm::Pmfm;
use crate::schema::{method_ids, pmfm_ids, qv_ids, units};

/// Decimals of a weight computed from a length, unless the weight PMFM says otherwise.
pub const DEFAULT_WEIGHT_LENGTH_MAX_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightLengthConversionFilter {
    pub reference_taxon_id: i64,
    pub length_pmfm_id: i32,
    pub rectangle_label: String,
    pub sex_id: Option<i64>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightLengthConversion {
    pub conversion_coefficient_a: f64,
    pub conversion_coefficient_b: f64,
    /// Unit the coefficients expect lengths in.
    pub length_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundWeightConversionFilter {
    pub taxon_group_id: i64,
    pub dressing_id: i64,
    pub preservation_id: i64,
    pub location_id: Option<i64>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundWeightConversion {
    /// Alive weight = dressed weight * coefficient.
    pub conversion_coefficient: f64,
}

#[async_trait]
pub trait WeightLengthConversionService: Send + Sync {
    /// Best conversion for an exact filter; `None` when nothing matches.
    async fn find_conversion(&self, filter: &WeightLengthConversionFilter) -> Result<Option<WeightLengthConversion>>;
}

#[async_trait]
pub trait RoundWeightConversionService: Send + Sync {
    async fn find_conversion(&self, filter: &RoundWeightConversionFilter) -> Result<Option<RoundWeightConversion>>;
}

/// Inputs of [`compute_weight_from_length`].
#[derive(Debug, Clone)]
pub struct WeightLengthRequest<'a> {
    /// The individual (or sub-batch) carrying length, sex and count.
    pub batch: &'a Batch,
    /// Candidate length PMFMs; the first one with a value is used.
    pub length_pmfms: &'a [Pmfm],
    /// Target weight PMFM: unit and decimals of the result.
    pub weight_pmfm: Option<&'a Pmfm>,
    /// Group (or grouping-value child) carrying taxon group, dressing and
    /// preservation, for the round-weight step.
    pub parent: Option<&'a Batch>,
}

/// Weight-length lookup with the fallback chain: full filter, then without
/// month, then without year, then the same chain for unsexed individuals.
pub async fn find_applied_conversion(
    service: &dyn WeightLengthConversionService,
    filter: &WeightLengthConversionFilter,
) -> Option<WeightLengthConversion> {
    let mut attempts = fallback_filters(filter);
    if filter.sex_id.is_some_and(|s| s != qv_ids::SEX_UNSEXED as i64) {
        let unsexed = WeightLengthConversionFilter {
            sex_id: Some(qv_ids::SEX_UNSEXED as i64),
            ..filter.clone()
        };
        attempts.extend(fallback_filters(&unsexed));
    }

    for attempt in attempts {
        match service.find_conversion(&attempt).await {
            Ok(Some(conversion)) => return Some(conversion),
            Ok(None) => {
                tracing::debug!(month = ?attempt.month, year = ?attempt.year, sex = ?attempt.sex_id, "no weight-length conversion, retrying");
            }
            Err(err) => {
                tracing::warn!(error = %err, "weight-length conversion lookup failed");
                return None;
            }
        }
    }
    None
}

/// `A * (L*u + 0.5*precision*u)^B * count`, in kilograms.
///
/// `u` converts the length from `length_unit` to the conversion's unit.
/// Returns `None` when the units cannot be reconciled.
pub fn compute_weight_kg(
    conversion: &WeightLengthConversion,
    length: f64,
    length_unit: Option<&str>,
    length_precision: Option<f64>,
    individual_count: i64,
) -> Option<f64> {
    let precision = length_precision.unwrap_or(1.0);
    let u = match (length_unit, conversion.length_unit.as_deref()) {
        (a, b) if a == b => 1.0,
        (Some(from), Some(to)) => length_factor(from)? / length_factor(to)?,
        (from, to) => {
            tracing::warn!(?from, ?to, "unknown length unit, cannot apply weight-length conversion");
            return None;
        }
    };
    let length = length * u + 0.5 * precision * u;
    Some(conversion.conversion_coefficient_a * length.powf(conversion.conversion_coefficient_b) * individual_count as f64)
}

/// Weight computed from the first available length, or `None` when data or
/// reference data is missing.
pub async fn compute_weight_from_length(
    wl_service: &dyn WeightLengthConversionService,
    rw_service: Option<&dyn RoundWeightConversionService>,
    ctx: &BatchContext,
    request: &WeightLengthRequest<'_>,
) -> Option<BatchWeight> {
    let batch = request.batch;
    let Some((length_pmfm, length)) = request.length_pmfms.iter().find_map(|p| {
        batch
            .measurement(p.id)
            .and_then(PmfmValue::as_f64)
            .map(|v| (p, v))
    }) else {
        tracing::warn!(label = %batch.label, "cannot apply conversion: no length found");
        return None;
    };
    let (Some(reference_taxon_id), Some(rectangle_label)) =
        (batch.taxon_name.as_ref().and_then(|t| t.reference_taxon_id), ctx.rectangle_label.clone())
    else {
        tracing::warn!(label = %batch.label, "cannot apply conversion: missing taxon or rectangle");
        return None;
    };
    if length <= 0.0 {
        return None;
    }

    let filter = WeightLengthConversionFilter {
        reference_taxon_id,
        length_pmfm_id: length_pmfm.id,
        rectangle_label,
        sex_id: batch.measurement(pmfm_ids::SEX).and_then(PmfmValue::as_ref_id),
        month: ctx.month(),
        year: ctx.year(),
    };
    let conversion = find_applied_conversion(wl_service, &filter).await?;
    let mut weight_kg = compute_weight_kg(
        &conversion,
        length,
        length_pmfm.unit_label.as_deref(),
        length_pmfm.precision,
        batch.individual_count.unwrap_or(1),
    )?;

    if let (Some(service), Some(parent)) = (rw_service, request.parent) {
        if let Some(coefficient) = find_round_weight_coefficient(service, ctx, parent).await {
            weight_kg = from_alive_weight(weight_kg, coefficient);
        }
    }

    let weight_unit = request
        .weight_pmfm
        .and_then(|p| p.unit_label.as_deref())
        .filter(|u| weight_factor(u).is_some())
        .unwrap_or(units::DEFAULT_WEIGHT_UNIT);
    let value = convert_weight(weight_kg, units::DEFAULT_WEIGHT_UNIT, weight_unit)?;
    let decimals = request
        .weight_pmfm
        .and_then(|p| p.maximum_number_decimals)
        .unwrap_or(DEFAULT_WEIGHT_LENGTH_MAX_DECIMALS);

    let value = round_half_up(value, decimals);
    tracing::debug!(value, unit = weight_unit, "computed weight by length conversion");
    Some(BatchWeight {
        value: Some(value),
        method_id: Some(method_ids::CALCULATED_WEIGHT_LENGTH),
        computed: true,
        estimated: false,
    })
}

/// Round-weight coefficient for the dressing and preservation found on `parent`.
pub async fn find_round_weight_coefficient(
    service: &dyn RoundWeightConversionService,
    ctx: &BatchContext,
    parent: &Batch,
) -> Option<f64> {
    let taxon_group_id = parent.taxon_group.as_ref()?.id;
    let dressing_id = parent.measurement(pmfm_ids::DRESSING).and_then(PmfmValue::as_ref_id)?;
    let preservation_id = parent
        .measurement(pmfm_ids::PRESERVATION)
        .and_then(PmfmValue::as_ref_id)
        .unwrap_or(qv_ids::PRESERVATION_FRESH as i64);
    let filter = RoundWeightConversionFilter {
        taxon_group_id,
        dressing_id,
        preservation_id,
        location_id: ctx.location_id,
        date: ctx.date,
    };
    match service.find_conversion(&filter).await {
        Ok(found) => found.map(|c| c.conversion_coefficient).filter(|c| *c > 0.0),
        Err(err) => {
            tracing::warn!(error = %err, "round weight conversion lookup failed");
            None
        }
    }
}

pub fn to_alive_weight(dressed_weight: f64, coefficient: f64) -> f64 {
    dressed_weight * coefficient
}

pub fn from_alive_weight(alive_weight: f64, coefficient: f64) -> f64 {
    alive_weight / coefficient
}

/// `None` for unknown units.
pub fn convert_weight(value: f64, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    Some(value * weight_factor(from)? / weight_factor(to)?)
}

pub fn weight_factor(unit: &str) -> Option<f64> {
    units::WEIGHT_TO_KG.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)
}

pub fn length_factor(unit: &str) -> Option<f64> {
    units::LENGTH_TO_M.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn fallback_filters(filter: &WeightLengthConversionFilter) -> Vec<WeightLengthConversionFilter> {
    let mut attempts = vec![filter.clone()];
    if filter.month.is_some() {
        attempts.push(WeightLengthConversionFilter {
            month: None,
            ..filter.clone()
        });
        if filter.year.is_some() {
            attempts.push(WeightLengthConversionFilter {
                year: None,
                ..filter.clone()
            });
        }
    }
    attempts
}

//! Weight / sampling-ratio / sampling-weight constraint solver.
//!
//! One pass works on a single parent and its sampling child. It never
//! mutates its input: it returns a [`SamplingPatch`] plus field errors,
//! and the tree adapters at the bottom apply the patch.

use crate::batch::{BatchTree, BatchWeight};
use crate::batch_utils::BatchUtils;
use crate::config::SolverOptions;
use crate::error::{BatchError, Result};
use crate::numeric::round_half_up;
use crate::sampling_ratio::{fraction_text, SamplingRatioFormat, DEFAULT_MAX_DECIMALS};
use crate::schema::method_ids;
use crate::tree::NodeId;
use crate::validation::{fields, FieldErrors, ValidationError};

/// Ratio of the sampling child, with its text and provenance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RatioValue {
    pub ratio: Option<f64>,
    pub text: Option<String>,
    pub computed: bool,
}

/// The three related quantities of a parent / sampling-child pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingState {
    pub total_weight: Option<BatchWeight>,
    pub sampling_ratio: RatioValue,
    pub sampling_weight: Option<BatchWeight>,
    pub has_sampling_child: bool,
    /// The sampling fields can be edited at all.
    pub sampling_enabled: bool,
}

impl Default for SamplingState {
    fn default() -> Self {
        Self {
            total_weight: None,
            sampling_ratio: RatioValue::default(),
            sampling_weight: None,
            has_sampling_child: true,
            sampling_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingField {
    TotalWeight,
    SamplingRatio,
    SamplingWeight,
}

/// Update of one slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Change<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone + PartialEq> Change<T> {
    fn between(before: Option<&T>, after: Option<&T>) -> Self {
        match (before, after) {
            (b, a) if b == a => Change::Keep,
            (_, Some(a)) => Change::Set(a.clone()),
            (_, None) => Change::Clear,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Change::Keep)
    }

    pub fn apply_to(&self, target: &mut Option<T>) {
        match self {
            Change::Keep => {}
            Change::Set(v) => *target = Some(v.clone()),
            Change::Clear => *target = None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingPatch {
    pub total_weight: Change<BatchWeight>,
    pub sampling_ratio: Change<RatioValue>,
    pub sampling_weight: Change<BatchWeight>,
}

impl SamplingPatch {
    fn diff(before: &SamplingState, after: &SamplingState) -> Self {
        let ratio_before = (before.sampling_ratio != RatioValue::default()).then_some(&before.sampling_ratio);
        let ratio_after = (after.sampling_ratio != RatioValue::default()).then_some(&after.sampling_ratio);
        Self {
            total_weight: Change::between(before.total_weight.as_ref(), after.total_weight.as_ref()),
            sampling_ratio: Change::between(ratio_before, ratio_after),
            sampling_weight: Change::between(
                before.sampling_weight.as_ref(),
                after.sampling_weight.as_ref(),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_weight.is_keep() && self.sampling_ratio.is_keep() && self.sampling_weight.is_keep()
    }

    pub fn apply_to(&self, state: &mut SamplingState) {
        self.total_weight.apply_to(&mut state.total_weight);
        self.sampling_weight.apply_to(&mut state.sampling_weight);
        match &self.sampling_ratio {
            Change::Keep => {}
            Change::Set(r) => state.sampling_ratio = r.clone(),
            Change::Clear => state.sampling_ratio = RatioValue::default(),
        }
    }
}

/// Editability of the sampling fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldStates {
    pub sampling_ratio_enabled: bool,
    pub sampling_weight_enabled: bool,
}

/// Which rule of the solver fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverBranch {
    /// No sampling child: nothing to solve.
    NoSamplingChild,
    RatioFromWeights,
    /// Sampling weight above total, recomputed from a valid ratio.
    RecoveredSamplingWeight,
    SamplingWeightExceedsTotal,
    SamplingWeightFromRatio,
    TotalWeightFromRatio,
    Underdetermined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub branch: SolverBranch,
    pub patch: SamplingPatch,
    pub errors: FieldErrors,
    /// Set when the pass decides editability.
    pub field_states: Option<FieldStates>,
}

// ── Pure entry points ───────────────────────────────────────────────────────

/// Recompute after the user edited `changed`: the edited fields become
/// independent inputs, then the solver runs.
pub fn recompute(state: &SamplingState, changed: &[SamplingField], opts: &SolverOptions) -> Result<SolverOutcome> {
    let format = required_format(opts)?;
    let mut edited = state.clone();
    for field in changed {
        match field {
            SamplingField::TotalWeight => mark_entered(&mut edited.total_weight),
            SamplingField::SamplingWeight => mark_entered(&mut edited.sampling_weight),
            SamplingField::SamplingRatio => {
                let ratio = &mut edited.sampling_ratio;
                ratio.computed = false;
                match (ratio.ratio, ratio.text.as_deref()) {
                    (Some(r), None) => ratio.text = format.format(r, DEFAULT_MAX_DECIMALS),
                    (None, Some(text)) => ratio.ratio = format.parse(text, DEFAULT_MAX_DECIMALS),
                    _ => {}
                }
            }
        }
    }
    let mut outcome = compute_sampling_ratio_and_weight(&edited, opts)?;
    // Express the patch against the caller's state.
    let mut after = edited;
    outcome.patch.apply_to(&mut after);
    outcome.patch = SamplingPatch::diff(state, &after);
    Ok(outcome)
}

/// One solver pass over a parent / sampling-child pair.
///
/// Fails only when no sampling-ratio format is configured.
pub fn compute_sampling_ratio_and_weight(state: &SamplingState, opts: &SolverOptions) -> Result<SolverOutcome> {
    let format = required_format(opts)?;
    let mut errors = FieldErrors::new();
    if !state.has_sampling_child {
        return Ok(SolverOutcome {
            branch: SolverBranch::NoSamplingChild,
            patch: SamplingPatch::default(),
            errors,
            field_states: None,
        });
    }

    let decimals = opts.weight_max_decimals;
    let mut next = state.clone();

    let total = state.total_weight.as_ref();
    let total_value = total.and_then(BatchWeight::valid_value);
    let total_computed = total.is_some_and(|w| w.computed);
    let total_in_bounds = check_bounds(total_value, opts, fields::TOTAL_WEIGHT, &mut errors);
    let total_valid = !total_computed && total_in_bounds && total_value.is_some();

    let sampling = state.sampling_weight.as_ref();
    let sampling_value = sampling.and_then(BatchWeight::valid_value);
    let sampling_flagged = sampling.is_some_and(|w| w.computed);
    // A sum of weight-length conversions is an input, even though computed.
    let sampling_computed = sampling
        .is_some_and(|w| w.computed && w.method_id != Some(method_ids::CALCULATED_WEIGHT_LENGTH_SUM));
    let sampling_in_bounds = check_bounds(sampling_value, opts, fields::SAMPLING_WEIGHT, &mut errors);
    let sampling_valid = !sampling_computed && sampling_in_bounds && sampling_value.is_some();

    let ratio_state = &state.sampling_ratio;
    let ratio_computed = ratio_state.computed || format.is_computed_text(ratio_state.text.as_deref());
    let ratio_value = ratio_state
        .ratio
        .filter(|r| r.is_finite() && (0.0..=1.0).contains(r));
    let ratio_valid = !ratio_computed && ratio_value.is_some();

    let branch = match (total_value, sampling_value, ratio_value) {
        (Some(total), Some(sampling_weight), ratio) if total_valid && sampling_valid => {
            if sampling_weight > total {
                match ratio {
                    Some(ratio) if ratio_valid && sampling_flagged => {
                        // Sampling weight from an earlier pass: trust the ratio again.
                        tracing::debug!(total, sampling_weight, ratio, "recovering sampling weight from ratio");
                        next.sampling_weight = Some(calculated(round_half_up(total * ratio, decimals)));
                        SolverBranch::RecoveredSamplingWeight
                    }
                    _ => {
                        errors.insert(fields::SAMPLING_WEIGHT.to_string(), ValidationError::Max { max: total });
                        return Ok(SolverOutcome {
                            branch: SolverBranch::SamplingWeightExceedsTotal,
                            patch: SamplingPatch::default(),
                            errors,
                            field_states: None,
                        });
                    }
                }
            } else {
                let ratio = if total == 0.0 || sampling_weight == 0.0 {
                    0.0
                } else {
                    sampling_weight / total
                };
                next.sampling_ratio = RatioValue {
                    ratio: Some(ratio),
                    text: Some(fraction_text(sampling_weight, total)),
                    computed: true,
                };
                SolverBranch::RatioFromWeights
            }
        }
        (Some(total), _, Some(ratio)) if ratio_valid && total_valid => {
            if sampling_value.is_none() || sampling_flagged {
                let value = round_half_up(total * ratio, decimals);
                let unchanged = sampling.is_some_and(|w| w.computed && w.value == Some(value));
                if !unchanged {
                    next.sampling_weight = Some(calculated(value));
                }
            }
            SolverBranch::SamplingWeightFromRatio
        }
        (_, Some(sampling_weight), Some(ratio)) if ratio_valid && sampling_valid && ratio > 0.0 => {
            if total_value.is_none() || total_computed {
                let value = round_half_up(sampling_weight / ratio, decimals);
                let unchanged = total.is_some_and(|w| w.computed && w.value == Some(value));
                if !unchanged {
                    next.total_weight = Some(calculated(value));
                }
                if let Some(w) = next.sampling_weight.as_mut() {
                    w.computed = false;
                }
            }
            SolverBranch::TotalWeightFromRatio
        }
        _ => {
            if total_computed {
                next.total_weight = None;
            }
            let field_states = if state.sampling_enabled {
                if ratio_computed {
                    next.sampling_ratio = RatioValue::default();
                }
                if sampling_computed {
                    next.sampling_weight = None;
                }
                let sampling_missing = !sampling_valid;
                if sampling_missing && opts.required_sample_weight && total_value != Some(0.0) {
                    errors.insert(fields::SAMPLING_WEIGHT.to_string(), ValidationError::Required(true));
                }
                FieldStates {
                    sampling_ratio_enabled: true,
                    sampling_weight_enabled: true,
                }
            } else {
                FieldStates {
                    sampling_ratio_enabled: false,
                    sampling_weight_enabled: false,
                }
            };
            return Ok(SolverOutcome {
                branch: SolverBranch::Underdetermined,
                patch: SamplingPatch::diff(state, &next),
                errors,
                field_states: Some(field_states),
            });
        }
    };

    Ok(SolverOutcome {
        branch,
        patch: SamplingPatch::diff(state, &next),
        errors,
        field_states: None,
    })
}

/// `{"weightForIndividualCount": true}` when individuals were counted but
/// the weight is zero or negative.
pub fn validate_weight_for_individual_count(
    individual_count: Option<i64>,
    weight: Option<&BatchWeight>,
) -> Option<ValidationError> {
    let counted = individual_count.is_some_and(|c| c > 0);
    let weightless = weight.and_then(|w| w.value).is_some_and(|v| v <= 0.0);
    (counted && weightless).then_some(ValidationError::WeightForIndividualCount(true))
}

// ── Tree adapters ───────────────────────────────────────────────────────────

/// Read the solver state of `node` and its sampling child.
pub fn read_state(tree: &BatchTree, node: NodeId, sampling_enabled: bool) -> Result<SamplingState> {
    let batch = tree.node(node)?;
    let sampling = BatchUtils::get_sampling_child(tree, node).and_then(|s| tree.get(s));
    Ok(SamplingState {
        total_weight: batch.weight.clone(),
        sampling_ratio: sampling
            .map(|s| RatioValue {
                ratio: s.sampling_ratio,
                text: s.sampling_ratio_text.clone(),
                computed: s.sampling_ratio_computed,
            })
            .unwrap_or_default(),
        sampling_weight: sampling.and_then(|s| s.weight.clone()),
        has_sampling_child: sampling.is_some(),
        sampling_enabled,
    })
}

/// Write a patch back onto `node` and its sampling child.
pub fn apply_patch(tree: &mut BatchTree, node: NodeId, patch: &SamplingPatch) -> Result<()> {
    patch.total_weight.apply_to(&mut tree.node_mut(node)?.weight);
    let Some(sampling) = BatchUtils::get_sampling_child(tree, node) else {
        return Ok(());
    };
    let child = tree.node_mut(sampling)?;
    patch.sampling_weight.apply_to(&mut child.weight);
    match &patch.sampling_ratio {
        Change::Keep => {}
        Change::Set(r) => {
            child.sampling_ratio = r.ratio;
            child.sampling_ratio_text = r.text.clone();
            child.sampling_ratio_computed = r.computed;
        }
        Change::Clear => {
            child.sampling_ratio = None;
            child.sampling_ratio_text = None;
            child.sampling_ratio_computed = false;
        }
    }
    Ok(())
}

/// Read, solve and apply on one node.
pub fn solve_node(tree: &mut BatchTree, node: NodeId, opts: &SolverOptions) -> Result<SolverOutcome> {
    let state = read_state(tree, node, true)?;
    let outcome = compute_sampling_ratio_and_weight(&state, opts)?;
    apply_patch(tree, node, &outcome.patch)?;
    Ok(outcome)
}

/// Errors of one node after a tree pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub node: NodeId,
    pub label: String,
    pub branch: Option<SolverBranch>,
    pub errors: FieldErrors,
}

/// Solve every parent / sampling-child pair of the tree.
///
/// Nodes are visited in preorder; each grouping-value child of a group is
/// a pair of its own. Only nodes with a sampling child or an error are
/// reported.
pub fn solve_tree(tree: &mut BatchTree, opts: &SolverOptions) -> Result<Vec<NodeReport>> {
    required_format(opts)?;
    let mut reports = Vec::new();
    for node in tree.iter_preorder() {
        let branch = if BatchUtils::get_sampling_child(tree, node).is_some() {
            Some(solve_node(tree, node, opts)?)
        } else {
            None
        };
        let batch = tree.node(node)?;
        let mut errors = branch.as_ref().map(|o| o.errors.clone()).unwrap_or_default();
        if let Some(error) = validate_weight_for_individual_count(batch.individual_count, batch.weight.as_ref()) {
            errors.insert(fields::INDIVIDUAL_COUNT.to_string(), error);
        }
        if branch.is_some() || !errors.is_empty() {
            reports.push(NodeReport {
                node,
                label: batch.label.clone(),
                branch: branch.map(|o| o.branch),
                errors,
            });
        }
    }
    Ok(reports)
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn required_format(opts: &SolverOptions) -> Result<SamplingRatioFormat> {
    opts.sampling_ratio_format
        .ok_or_else(|| BatchError::MissingOption("samplingRatioFormat".to_string()))
}

fn mark_entered(weight: &mut Option<BatchWeight>) {
    if let Some(w) = weight.as_mut() {
        w.computed = false;
        if w.method_id.is_some_and(|m| method_ids::CALCULATED_GROUP.contains(&m)) {
            w.method_id = Some(method_ids::MEASURED_BY_OBSERVER);
        }
    }
}

fn calculated(value: f64) -> BatchWeight {
    BatchWeight::calculated(value)
}

/// Within the configured maximum; records a `max` error otherwise.
fn check_bounds(value: Option<f64>, opts: &SolverOptions, field: &str, errors: &mut FieldErrors) -> bool {
    match (value, opts.max_weight) {
        (Some(v), Some(max)) if v > max => {
            errors.insert(field.to_string(), ValidationError::Max { max });
            false
        }
        _ => true,
    }
}

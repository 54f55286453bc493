use crate::batch::{BatchTree, BatchWeight};
use crate::batch_utils::BatchUtils;
use crate::config::{ProgramConfig, SolverOptions};
use crate::error::Result;
use crate::group::{BatchGroupUtils, QvPmfmOptions};
use crate::measurement::PmfmValue;
use crate::pmfm::Pmfm;
use crate::sampling_ratio::fraction_text;
use crate::schema::{method_ids, pmfm_ids, qv_ids};
use crate::solver::{compute_sampling_ratio_and_weight, read_state};
use crate::tree::NodeId;
use crate::validation::{fields, prefix_errors, FieldErrors, ValidationError};

/// Options of [`control_batch_groups`].
#[derive(Debug, Clone)]
pub struct ControlOptions<'a> {
    pub config: &'a ProgramConfig,
    /// PMFMs of the sorting-batch level.
    pub sorting_pmfms: &'a [Pmfm],
    pub allow_sampling_batches: bool,
}

impl<'a> ControlOptions<'a> {
    pub fn new(config: &'a ProgramConfig, sorting_pmfms: &'a [Pmfm]) -> Self {
        Self {
            config,
            sorting_pmfms,
            allow_sampling_batches: true,
        }
    }
}

/// Check every species group of the catch before saving.
///
/// Missing values that the program makes implicit (no landing allowed, or
/// zero total weight) are filled in place first. Errors are keyed by
/// `children.<i>` paths relative to the catch.
pub fn control_batch_groups(tree: &mut BatchTree, opts: &ControlOptions) -> Result<FieldErrors> {
    let groups = BatchGroupUtils::from_batch_tree(tree)?;
    let weight_pmfms: Vec<Pmfm> = opts.sorting_pmfms.iter().filter(|p| p.is_weight()).cloned().collect();
    let qv_pmfm = BatchGroupUtils::get_qv_pmfm(opts.sorting_pmfms, &QvPmfmOptions::default());
    let weight_max_decimals = weight_pmfms
        .iter()
        .filter_map(|p| p.maximum_number_decimals)
        .max()
        .unwrap_or(opts.config.weight_max_decimals);

    let mut errors = FieldErrors::new();
    for (index, group) in groups.iter().enumerate() {
        let batch = tree.node(*group)?;
        let taxon_label = batch.taxon_group.as_ref().map(|t| t.label.trim().to_uppercase());
        let no_weight = taxon_label.as_deref().is_some_and(|l| opts.config.is_weight_exempt(l));
        let no_landing = taxon_label.as_deref().is_some_and(|l| opts.config.is_landing_exempt(l));
        let observed = batch.observed_individual_count().unwrap_or(0);
        let label = batch.label.clone();

        let checks = GroupChecks {
            weight_pmfms: &weight_pmfms,
            weight_required: !weight_pmfms.is_empty() && !no_weight,
            individual_count_required: no_weight,
            no_landing,
            sampling_enabled: opts.allow_sampling_batches || observed > 0,
        };
        let solver_opts = SolverOptions {
            weight_max_decimals,
            required_sample_weight: opts.allow_sampling_batches && observed > 0,
            ..SolverOptions::from(opts.config)
        };

        let targets: Vec<(Option<usize>, NodeId)> = match &qv_pmfm {
            Some(_) => tree.children(*group).into_iter().enumerate().map(|(j, c)| (Some(j), c)).collect(),
            None => vec![(None, *group)],
        };

        let mut group_errors = FieldErrors::new();
        for (position, target) in targets {
            let mut target_errors = checks.fill_and_check(tree, target, weight_max_decimals)?;
            if target_errors.is_empty() && !no_weight {
                let state = read_state(tree, target, checks.sampling_enabled)?;
                target_errors = compute_sampling_ratio_and_weight(&state, &solver_opts)?.errors;
            }
            group_errors.extend(match position {
                Some(j) => prefix_errors(&format!("children.{j}"), target_errors),
                None => target_errors,
            });
        }

        if group_errors.is_empty() {
            tracing::debug!(label = %label, "batch group valid");
        } else {
            tracing::info!(label = %label, errors = group_errors.len(), "batch group invalid");
            errors.extend(prefix_errors(&format!("children.{index}"), group_errors));
        }
    }
    Ok(errors)
}

// ── Private helpers ─────────────────────────────────────────────────────────

struct GroupChecks<'a> {
    weight_pmfms: &'a [Pmfm],
    weight_required: bool,
    individual_count_required: bool,
    no_landing: bool,
    sampling_enabled: bool,
}

impl GroupChecks<'_> {
    fn fill_and_check(&self, tree: &mut BatchTree, node: NodeId, max_decimals: u32) -> Result<FieldErrors> {
        {
            let batch = tree.node_mut(node)?;
            if batch.weight.is_none() {
                batch.weight = BatchUtils::get_weight(batch, self.weight_pmfms);
            }
        }
        if self.no_landing {
            self.fill_no_landing_default(tree, node, max_decimals)?;
        }
        if self.sampling_enabled {
            self.fill_sampling_batch_default(tree, node, max_decimals)?;
        }

        let batch = tree.node(node)?;
        let mut errors = FieldErrors::new();
        if self.weight_required && batch.weight_value().is_none() {
            errors.insert(fields::TOTAL_WEIGHT.to_string(), ValidationError::Required(true));
        }
        if self.individual_count_required && batch.individual_count.is_none() {
            errors.insert(fields::INDIVIDUAL_COUNT.to_string(), ValidationError::Required(true));
        }
        Ok(errors)
    }

    /// Landings not allowed for the species: an empty landing is a zero.
    fn fill_no_landing_default(&self, tree: &mut BatchTree, node: NodeId, max_decimals: u32) -> Result<()> {
        let batch = tree.node(node)?;
        let is_landing = batch
            .measurement(pmfm_ids::DISCARD_OR_LANDING)
            .and_then(PmfmValue::as_ref_id)
            == Some(qv_ids::LANDING as i64);
        if !is_landing {
            return Ok(());
        }
        let label = batch.label.clone();

        if self.individual_count_required && batch.individual_count.is_none() {
            BatchUtils::compute_individual_count(tree, node)?;
            let sum = BatchUtils::get_sampling_child(tree, node)
                .and_then(|s| tree.get(s))
                .and_then(|s| s.individual_count)
                .unwrap_or(0);
            if sum == 0 {
                tracing::info!(label = %label, "no landing allowed, individual count forced to 0");
                tree.node_mut(node)?.individual_count = Some(0);
            }
        }
        if self.weight_required && tree.node(node)?.weight_value().is_none() {
            let computed = BatchUtils::compute_weight(tree, node, self.weight_pmfms, max_decimals)?.unwrap_or(0.0);
            if computed == 0.0 {
                tracing::info!(label = %label, "no landing allowed, weight forced to 0");
                tree.node_mut(node)?.weight = Some(self.default_weight(0.0));
            }
        }
        Ok(())
    }

    /// Zero total weight means a zero sample; otherwise derive a missing
    /// ratio from the two weights.
    fn fill_sampling_batch_default(&self, tree: &mut BatchTree, node: NodeId, max_decimals: u32) -> Result<()> {
        let Some(sampling) = BatchUtils::get_sampling_child(tree, node) else {
            return Ok(());
        };
        {
            let sample = tree.node_mut(sampling)?;
            if sample.weight.is_none() {
                sample.weight = BatchUtils::get_weight(sample, self.weight_pmfms);
            }
        }
        if !self.weight_required {
            return Ok(());
        }
        let Some(total) = tree.node(node)?.weight_value() else {
            return Ok(());
        };

        if total == 0.0 {
            let sample = tree.node(sampling)?;
            if sample.weight_value().is_some() {
                return Ok(());
            }
            let untouched = sample.sampling_ratio.is_none() && sample.individual_count.unwrap_or(0) == 0;
            let computed = BatchUtils::compute_weight(tree, node, self.weight_pmfms, max_decimals)?.unwrap_or(0.0);
            if computed == 0.0 && untouched {
                let sample = tree.node_mut(sampling)?;
                tracing::info!(label = %sample.label, "parent weight is 0, sample weight forced to 0");
                sample.weight = Some(self.default_weight(0.0));
                sample.sampling_ratio = Some(0.0);
                sample.sampling_ratio_text = Some("0%".to_string());
                sample.sampling_ratio_computed = true;
            }
        } else if total > 0.0 {
            let sample = tree.node_mut(sampling)?;
            if let (None, Some(weight)) = (sample.sampling_ratio, sample.weight_value()) {
                if (0.0..=total).contains(&weight) {
                    sample.sampling_ratio = Some(if weight == 0.0 { 0.0 } else { weight / total });
                    sample.sampling_ratio_text = Some(fraction_text(weight, total));
                    sample.sampling_ratio_computed = true;
                }
            }
        }
        Ok(())
    }

    /// Weight with the provenance of the first weight PMFM.
    fn default_weight(&self, value: f64) -> BatchWeight {
        let pmfm = self.weight_pmfms.first();
        let method_id = pmfm.and_then(|p| p.method_id);
        BatchWeight {
            value: Some(value),
            method_id,
            computed: pmfm.is_some_and(|p| p.is_computed),
            estimated: method_id == Some(method_ids::ESTIMATED_BY_OBSERVER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::referential::ReferentialRef;
    use crate::sampling_ratio::SamplingRatioFormat;
    use crate::tree::Tree;

    fn weight_pmfm() -> Pmfm {
        Pmfm::weight(pmfm_ids::BATCH_MEASURED_WEIGHT, "BATCH_MEASURED_WEIGHT", method_ids::MEASURED_BY_OBSERVER)
    }

    fn catch_with_group(taxon: &str, weight: Option<f64>) -> (BatchTree, NodeId) {
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1));
        let root = tree.root().unwrap();
        let mut group = Batch::new("SORTING_BATCH#1", 1);
        group.taxon_group = Some(ReferentialRef::new(1, taxon, taxon));
        group.weight = weight.map(BatchWeight::measured);
        let group = tree.add_child(root, group).unwrap();
        (tree, group)
    }

    #[test]
    fn missing_weight_is_required() {
        let config = ProgramConfig::default();
        let pmfms = [weight_pmfm()];
        let (mut tree, _) = catch_with_group("COD", None);
        let errors = control_batch_groups(&mut tree, &ControlOptions::new(&config, &pmfms)).unwrap();
        assert_eq!(errors.get("children.0.weight.value"), Some(&ValidationError::Required(true)));
    }

    #[test]
    fn weight_exempt_group_requires_individual_count() {
        let config = ProgramConfig {
            taxon_groups_no_weight: vec!["MNZ".to_string()],
            ..ProgramConfig::default()
        };
        let pmfms = [weight_pmfm()];
        let (mut tree, _) = catch_with_group("mnz", None);
        let errors = control_batch_groups(&mut tree, &ControlOptions::new(&config, &pmfms)).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("children.0.individualCount"), Some(&ValidationError::Required(true)));
    }

    #[test]
    fn sampling_ratio_filled_from_weights() {
        let config = ProgramConfig {
            sampling_ratio_format: SamplingRatioFormat::Percent,
            ..ProgramConfig::default()
        };
        let pmfms = [weight_pmfm()];
        let (mut tree, group) = catch_with_group("COD", Some(20.0));
        let sampling = BatchUtils::get_or_create_sampling_child(&mut tree, group).unwrap();
        tree.get_mut(sampling).unwrap().weight = Some(BatchWeight::measured(5.0));

        let errors = control_batch_groups(&mut tree, &ControlOptions::new(&config, &pmfms)).unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let sample = tree.get(sampling).unwrap();
        assert_eq!(sample.sampling_ratio, Some(0.25));
        assert_eq!(sample.sampling_ratio_text.as_deref(), Some("5/20"));
    }

    #[test]
    fn zero_total_weight_zeroes_the_sample() {
        let config = ProgramConfig::default();
        let pmfms = [weight_pmfm()];
        let (mut tree, group) = catch_with_group("COD", Some(0.0));
        let sampling = BatchUtils::get_or_create_sampling_child(&mut tree, group).unwrap();

        let errors = control_batch_groups(&mut tree, &ControlOptions::new(&config, &pmfms)).unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let sample = tree.get(sampling).unwrap();
        assert_eq!(sample.weight_value(), Some(0.0));
        assert_eq!(sample.sampling_ratio, Some(0.0));
    }

    #[test]
    fn sample_heavier_than_total_is_reported() {
        let config = ProgramConfig::default();
        let pmfms = [weight_pmfm()];
        let (mut tree, group) = catch_with_group("COD", Some(5.0));
        let sampling = BatchUtils::get_or_create_sampling_child(&mut tree, group).unwrap();
        tree.get_mut(sampling).unwrap().weight = Some(BatchWeight::measured(8.0));

        let errors = control_batch_groups(&mut tree, &ControlOptions::new(&config, &pmfms)).unwrap();
        assert!(errors.contains_key("children.0.children.0.weight.value"), "{errors:?}");
    }
}

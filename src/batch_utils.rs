use crate::batch::{Batch, BatchKind, BatchTree, BatchWeight};
use crate::error::Result;
use crate::measurement::{PmfmValue, PmfmValueUtils};
use crate::numeric::{format_number, round_half_up};
use crate::pmfm::{weight_pmfms_by_priority, Pmfm};
use crate::referential::same_ref_id;
use crate::schema::{acquisition_level, labels, quality_flags};
use crate::tree::NodeId;

/// Helpers over batches and the catch tree.
pub struct BatchUtils;

impl BatchUtils {
    // ── Label conventions ───────────────────────────────────────────────────

    pub fn is_catch_batch(batch: &Batch) -> bool {
        batch.label == acquisition_level::CATCH_BATCH
    }

    /// Root-level group of the sorting level (`SORTING_BATCH#n`).
    pub fn is_sorting_batch(batch: &Batch) -> bool {
        has_level(&batch.label, acquisition_level::SORTING_BATCH)
    }

    pub fn is_individual_batch(batch: &Batch) -> bool {
        has_level(&batch.label, acquisition_level::SORTING_BATCH_INDIVIDUAL)
    }

    pub fn is_sample_batch(batch: &Batch) -> bool {
        batch.label.ends_with(labels::SAMPLING_BATCH_SUFFIX)
    }

    /// `<LEVEL>#<rankOrder>`
    pub fn level_label(level: &str, rank_order: i32) -> String {
        format!("{level}{}{rank_order}", labels::LEVEL_SEPARATOR)
    }

    /// `<parentLabel>.<suffix>`
    pub fn child_label(parent_label: &str, suffix: &str) -> String {
        format!("{parent_label}{}{suffix}", labels::CHILD_SEPARATOR)
    }

    // ── Emptiness ───────────────────────────────────────────────────────────

    /// No weight, count, ratio, taxon, comment nor measurement value.
    pub fn is_empty(batch: &Batch) -> bool {
        batch.weight_value().is_none()
            && batch.individual_count.is_none()
            && batch.sampling_ratio.is_none()
            && batch
                .sampling_ratio_text
                .as_deref()
                .is_none_or(|t| t.trim().is_empty())
            && batch.taxon_group.is_none()
            && batch.taxon_name.is_none()
            && batch.comments.as_deref().is_none_or(|c| c.trim().is_empty())
            && batch
                .measurement_values
                .values()
                .all(|v| PmfmValueUtils::equals(Some(v), None))
    }

    pub fn is_not_empty(batch: &Batch) -> bool {
        !Self::is_empty(batch)
    }

    /// Sampling child holding a weight or an individual count.
    pub fn is_sample_not_empty(tree: &BatchTree, node: NodeId) -> bool {
        Self::get_sampling_child(tree, node)
            .and_then(|s| tree.get(s))
            .is_some_and(|s| s.weight_value().is_some() || s.individual_count.is_some())
    }

    // ── Sampling child ──────────────────────────────────────────────────────

    /// The first child, when its label carries the sampling suffix.
    pub fn get_sampling_child(tree: &BatchTree, node: NodeId) -> Option<NodeId> {
        let first = *tree.children(node).first()?;
        tree.get(first)
            .filter(|b| Self::is_sample_batch(b))
            .map(|_| first)
    }

    /// Existing sampling child, or a new one adopting all current children.
    pub fn get_or_create_sampling_child(tree: &mut BatchTree, node: NodeId) -> Result<NodeId> {
        if let Some(existing) = Self::get_sampling_child(tree, node) {
            return Ok(existing);
        }
        let parent = tree.node(node)?;
        let sampling = Batch {
            label: format!("{}{}", parent.label, labels::SAMPLING_BATCH_SUFFIX),
            rank_order: Some(1),
            operation_id: parent.operation_id,
            sale_id: parent.sale_id,
            ..Batch::default()
        };
        let previous = tree.children(node);
        let sampling_id = tree.insert_child(node, 0, sampling)?;
        for child in previous {
            tree.move_node(child, sampling_id, None)?;
        }
        tracing::debug!(label = %tree.node(sampling_id)?.label, "created sampling batch");
        Ok(sampling_id)
    }

    // ── Levels ──────────────────────────────────────────────────────────────

    /// Descendants (any depth) whose label is at `level`.
    pub fn get_children_by_level(tree: &BatchTree, node: NodeId, level: &str) -> Vec<NodeId> {
        tree.descendants(node)
            .into_iter()
            .filter(|n| tree.get(*n).is_some_and(|b| has_level(&b.label, level)))
            .collect()
    }

    pub fn has_children_with_level(tree: &BatchTree, node: NodeId, level: &str) -> bool {
        tree.descendants(node)
            .into_iter()
            .any(|n| tree.get(n).is_some_and(|b| has_level(&b.label, level)))
    }

    /// Next free rank order among the children of `node`.
    pub fn compute_rank_order(tree: &BatchTree, node: NodeId) -> i32 {
        tree.children(node)
            .into_iter()
            .filter_map(|c| tree.get(c).and_then(|b| b.rank_order))
            .max()
            .unwrap_or(0)
            + 1
    }

    // ── Individual counts ───────────────────────────────────────────────────

    /// Individual counts of the individual-level leaves under `node`,
    /// `None` when none of them carries a count.
    pub fn sum_observed_individual_count(tree: &BatchTree, node: NodeId) -> Option<i64> {
        let counts: Vec<i64> = tree
            .leaves(node)
            .into_iter()
            .filter(|n| *n != node)
            .filter_map(|n| tree.get(n))
            .filter(|b| Self::is_individual_batch(b))
            .filter_map(|b| b.individual_count)
            .collect();
        (!counts.is_empty()).then(|| counts.iter().sum())
    }

    /// Reconcile parent counts with the individuals below them, bottom-up.
    ///
    /// A parent counting fewer individuals than its children is flagged
    /// BAD. Individuals under a parent with no count, or a higher count,
    /// are a sample: they move under a sampling child carrying their sum.
    pub fn compute_individual_count(tree: &mut BatchTree, node: NodeId) -> Result<()> {
        for child in tree.children(node) {
            Self::compute_individual_count(tree, child)?;
        }
        let children = tree.children(node);
        if children.is_empty() {
            return Ok(());
        }
        let counts: Vec<i64> = children
            .iter()
            .filter_map(|c| tree.get(*c).and_then(|b| b.individual_count))
            .collect();
        if counts.is_empty() {
            return Ok(());
        }
        let children_sum: i64 = counts.iter().sum();
        let batch = tree.node(node)?;
        let is_sample = Self::is_sample_batch(batch);
        let individual_count = batch.individual_count;
        let label = batch.label.clone();
        let all_individuals = children
            .iter()
            .all(|c| tree.get(*c).is_some_and(Self::is_individual_batch));

        match individual_count {
            Some(count) if count < children_sum => {
                tracing::warn!(
                    label = %label,
                    count,
                    children_sum,
                    "individual count lower than the children's sum"
                );
                tree.node_mut(node)?.quality_flag_id = Some(quality_flags::BAD);
            }
            Some(count) if count == children_sum => {}
            _ if is_sample || !all_individuals => {}
            _ => {
                let sampling = Self::get_or_create_sampling_child(tree, node)?;
                tree.node_mut(sampling)?.individual_count = Some(children_sum);
            }
        }
        Ok(())
    }

    // ── Weights ─────────────────────────────────────────────────────────────

    /// Weight read from the weight PMFM values, preferring measured, then
    /// estimated, then computed values; falls back to `batch.weight`.
    pub fn get_weight(batch: &Batch, pmfms: &[Pmfm]) -> Option<BatchWeight> {
        weight_pmfms_by_priority(pmfms)
            .into_iter()
            .find_map(|pmfm| {
                let value = batch.measurement(pmfm.id).and_then(PmfmValue::as_f64)?;
                Some(BatchWeight {
                    value: Some(value),
                    method_id: pmfm.method_id,
                    computed: pmfm.is_computed_method(),
                    estimated: pmfm.is_estimated_method(),
                })
            })
            .or_else(|| batch.weight.clone())
    }

    /// Weight PMFM matching the provenance of `weight`.
    pub fn get_weight_pmfm<'a>(weight: &BatchWeight, pmfms: &'a [Pmfm]) -> Option<&'a Pmfm> {
        let candidates = weight_pmfms_by_priority(pmfms);
        let by_method = candidates
            .iter()
            .find(|p| weight.method_id.is_some() && p.method_id == weight.method_id);
        by_method
            .or_else(|| {
                candidates.iter().find(|p| {
                    p.is_computed_method() == weight.computed
                        && p.is_estimated_method() == weight.estimated
                })
            })
            .or_else(|| candidates.first())
            .copied()
    }

    /// Write `weight` into the matching weight PMFM, clearing the others.
    pub fn set_weight_measurement(batch: &mut Batch, weight: Option<&BatchWeight>, pmfms: &[Pmfm]) {
        let target = weight.and_then(|w| Self::get_weight_pmfm(w, pmfms)).map(|p| p.id);
        for pmfm in pmfms.iter().filter(|p| p.is_weight()) {
            let value = match (target, weight.and_then(|w| w.value)) {
                (Some(id), Some(v)) if id == pmfm.id => Some(PmfmValue::text(format_number(v))),
                _ => None,
            };
            batch.set_measurement(pmfm.id, value);
        }
    }

    /// Sum of the children's weights, `None` unless every child has one.
    pub fn sum_calculated_weight(tree: &BatchTree, nodes: &[NodeId], pmfms: &[Pmfm]) -> Option<f64> {
        if nodes.is_empty() {
            return None;
        }
        nodes.iter().try_fold(0.0, |acc, n| {
            let batch = tree.get(*n)?;
            let value = Self::get_weight(batch, pmfms)
                .and_then(|w| w.valid_value())
                .or_else(|| batch.children_weight.as_ref().and_then(|w| w.valid_value()))?;
            Some(acc + value)
        })
    }

    /// Bottom-up weight aggregation: each node gets a calculated
    /// `children_weight`, and its weight when none was entered.
    pub fn compute_weight(
        tree: &mut BatchTree,
        node: NodeId,
        pmfms: &[Pmfm],
        max_decimals: u32,
    ) -> Result<Option<f64>> {
        let children = tree.children(node);
        for child in &children {
            Self::compute_weight(tree, *child, pmfms, max_decimals)?;
        }
        let own = Self::get_weight(tree.node(node)?, pmfms);
        if children.is_empty() {
            return Ok(own.and_then(|w| w.valid_value()));
        }

        // Below a sampling child, only the sample was weighed.
        let sampling = Self::get_sampling_child(tree, node);
        let sum = match sampling {
            Some(s) => {
                let sample = tree.node(s)?;
                match (sample.children_weight.as_ref().and_then(|w| w.value), sample.sampling_ratio) {
                    (Some(w), Some(r)) if r > 0.0 => Some(w / r),
                    _ => None,
                }
            }
            None => Self::sum_calculated_weight(tree, &children, pmfms),
        }
        .map(|v| round_half_up(v, max_decimals));

        let batch = tree.node_mut(node)?;
        batch.children_weight = sum.map(BatchWeight::calculated);
        let keep_own = own.as_ref().is_some_and(|w| !w.computed && w.value.is_some());
        if !keep_own {
            if let Some(value) = sum {
                batch.weight = Some(BatchWeight::calculated(value));
            }
        }
        Ok(batch.weight_value().or(sum))
    }

    // ── Cleanup and merge ───────────────────────────────────────────────────

    /// Remove empty leaves, repeatedly, under `node`.
    pub fn clean_tree(tree: &mut BatchTree, node: NodeId) {
        for child in tree.children(node) {
            Self::clean_tree(tree, child);
            let remove = tree.is_leaf(child) && tree.get(child).is_some_and(Self::is_empty);
            if remove {
                tree.remove_subtree(child);
            }
        }
    }

    /// Same group, same taxon, same measurements: rows can be merged
    /// by adding their individual counts.
    pub fn can_merge_sub_batch(b1: &Batch, b2: &Batch, pmfms: &[Pmfm]) -> bool {
        let same_group = match (b1.parent_group(), b2.parent_group()) {
            (Some(g1), Some(g2)) => g1 == g2,
            (None, None) => true,
            _ => false,
        };
        same_group
            && same_ref_id(b1.taxon_name.as_ref(), b2.taxon_name.as_ref())
            && pmfms.iter().all(|p| {
                PmfmValueUtils::equals(b1.measurement(p.id), b2.measurement(p.id))
            })
    }

    // ── Display ─────────────────────────────────────────────────────────────

    /// `taxonGroup / taxonName`, or whichever is set, or the label.
    pub fn parent_to_string(batch: &Batch) -> String {
        match (&batch.taxon_group, &batch.taxon_name) {
            (Some(tg), Some(tn)) if tg.label != tn.label => format!("{} / {}", tg.label, tn.display()),
            (_, Some(tn)) => tn.display(),
            (Some(tg), None) => tg.display(),
            (None, None) => batch.label.clone(),
        }
    }

    /// Pretty-printed subtree for diagnostics.
    pub fn log_tree(tree: &BatchTree, node: NodeId) -> String {
        tree.pretty_print(node, &describe)
    }
}

fn has_level(label: &str, level: &str) -> bool {
    label
        .strip_prefix(level)
        .is_some_and(|rest| rest.starts_with(labels::LEVEL_SEPARATOR))
}

fn describe(batch: &Batch) -> String {
    let mut parts = vec![if batch.label.is_empty() { "?".to_string() } else { batch.label.clone() }];
    if let Some(id) = batch.id {
        parts.push(format!("id:{id}"));
    }
    if let BatchKind::Group { .. } = batch.kind {
        parts.push("(group)".to_string());
    }
    if let Some(tn) = batch.taxon_name.as_ref().or(batch.taxon_group.as_ref()) {
        parts.push(tn.label.clone());
    }
    if let Some(weight) = &batch.weight {
        if let Some(v) = weight.value {
            let marker = if weight.computed { " (computed)" } else { "" };
            parts.push(format!("weight:{}{marker}", format_number(v)));
        }
    }
    if let Some(ratio) = batch.sampling_ratio {
        let text = batch.sampling_ratio_text.as_deref().unwrap_or("");
        parts.push(format!("ratio:{} ({text})", format_number(ratio)));
    }
    if let Some(count) = batch.individual_count {
        parts.push(format!("count:{count}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referential::ReferentialRef;
    use crate::schema::pmfm_ids;
    use crate::tree::Tree;

    fn individual(rank: i32, count: Option<i64>) -> Batch {
        Batch {
            individual_count: count,
            ..Batch::new(format!("SORTING_BATCH_INDIVIDUAL#{rank}"), rank)
        }
    }

    #[test]
    fn label_conventions() {
        assert!(BatchUtils::is_sorting_batch(&Batch::new("SORTING_BATCH#2", 2)));
        assert!(!BatchUtils::is_sorting_batch(&Batch::new("SORTING_BATCH_INDIVIDUAL#2", 2)));
        assert!(BatchUtils::is_individual_batch(&Batch::new("SORTING_BATCH_INDIVIDUAL#2", 2)));
        assert!(BatchUtils::is_sample_batch(&Batch::new("SORTING_BATCH#2.%", 1)));
        assert_eq!(BatchUtils::child_label("SORTING_BATCH#1", "LAN"), "SORTING_BATCH#1.LAN");
    }

    #[test]
    fn sampling_child_adopts_children() {
        let mut tree = Tree::with_root(Batch::new("SORTING_BATCH#1", 1));
        let root = tree.root().unwrap();
        tree.add_child(root, individual(1, Some(1))).unwrap();
        tree.add_child(root, individual(2, Some(1))).unwrap();

        let sampling = BatchUtils::get_or_create_sampling_child(&mut tree, root).unwrap();
        assert_eq!(tree.children(root), vec![sampling]);
        assert_eq!(tree.get(sampling).unwrap().label, "SORTING_BATCH#1.%");
        assert_eq!(tree.children(sampling).len(), 2);
        assert_eq!(BatchUtils::get_or_create_sampling_child(&mut tree, root).unwrap(), sampling);
        assert_eq!(
            BatchUtils::get_children_by_level(&tree, root, acquisition_level::SORTING_BATCH_INDIVIDUAL).len(),
            2
        );
    }

    #[test]
    fn individual_count_reconciliation() {
        let mut tree = Tree::with_root(Batch {
            individual_count: Some(1),
            ..Batch::new("SORTING_BATCH#1", 1)
        });
        let root = tree.root().unwrap();
        tree.add_child(root, individual(1, Some(2))).unwrap();
        BatchUtils::compute_individual_count(&mut tree, root).unwrap();
        assert_eq!(tree.get(root).unwrap().quality_flag_id, Some(quality_flags::BAD));

        let mut tree = Tree::with_root(Batch {
            individual_count: Some(10),
            ..Batch::new("SORTING_BATCH#1", 1)
        });
        let root = tree.root().unwrap();
        tree.add_child(root, individual(1, Some(2))).unwrap();
        tree.add_child(root, individual(2, Some(3))).unwrap();
        BatchUtils::compute_individual_count(&mut tree, root).unwrap();
        let sampling = BatchUtils::get_sampling_child(&tree, root).unwrap();
        assert_eq!(tree.get(sampling).unwrap().individual_count, Some(5));
        assert_eq!(tree.get(root).unwrap().quality_flag_id, None);
    }

    #[test]
    fn observed_count_ignores_missing_counts() {
        let mut tree = Tree::with_root(Batch::new("SORTING_BATCH#1", 1));
        let root = tree.root().unwrap();
        assert_eq!(BatchUtils::sum_observed_individual_count(&tree, root), None);
        tree.add_child(root, individual(1, Some(4))).unwrap();
        tree.add_child(root, individual(2, None)).unwrap();
        tree.add_child(root, Batch::new("SORTING_BATCH#1.X", 3)).unwrap();
        assert_eq!(BatchUtils::sum_observed_individual_count(&tree, root), Some(4));
    }

    #[test]
    fn weight_from_measurements() {
        let pmfms = vec![
            Pmfm::weight(pmfm_ids::BATCH_CALCULATED_WEIGHT, "BATCH_CALCULATED_WEIGHT", 4),
            Pmfm::weight(pmfm_ids::BATCH_MEASURED_WEIGHT, "BATCH_MEASURED_WEIGHT", 1),
        ];
        let mut batch = Batch::new("SORTING_BATCH#1", 1);
        batch.set_measurement(pmfm_ids::BATCH_CALCULATED_WEIGHT, Some(PmfmValue::text("4.2")));
        let weight = BatchUtils::get_weight(&batch, &pmfms).unwrap();
        assert_eq!(weight.value, Some(4.2));
        assert!(weight.computed);

        batch.set_measurement(pmfm_ids::BATCH_MEASURED_WEIGHT, Some(PmfmValue::Number(5.0)));
        let weight = BatchUtils::get_weight(&batch, &pmfms).unwrap();
        assert_eq!(weight.value, Some(5.0));
        assert!(!weight.computed);

        BatchUtils::set_weight_measurement(&mut batch, Some(&BatchWeight::calculated(3.0)), &pmfms);
        assert_eq!(batch.measurement(pmfm_ids::BATCH_MEASURED_WEIGHT), None);
        assert_eq!(
            batch.measurement(pmfm_ids::BATCH_CALCULATED_WEIGHT),
            Some(&PmfmValue::text("3"))
        );
    }

    #[test]
    fn compute_weight_sums_children() {
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1));
        let root = tree.root().unwrap();
        for (rank, w) in [(1, 1.25), (2, 2.5)] {
            tree.add_child(
                root,
                Batch {
                    weight: Some(BatchWeight::measured(w)),
                    ..Batch::new(format!("SORTING_BATCH#{rank}"), rank)
                },
            )
            .unwrap();
        }
        let total = BatchUtils::compute_weight(&mut tree, root, &[], 3).unwrap();
        assert_eq!(total, Some(3.75));
        let root_batch = tree.get(root).unwrap();
        assert!(root_batch.weight.as_ref().unwrap().computed);
        assert_eq!(root_batch.children_weight.as_ref().unwrap().value, Some(3.75));
    }

    #[test]
    fn clean_tree_drops_empty_leaves() {
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1));
        let root = tree.root().unwrap();
        let group = tree.add_child(root, Batch::new("SORTING_BATCH#1", 1)).unwrap();
        tree.add_child(group, Batch::default()).unwrap();
        tree.add_child(root, individual(1, Some(1))).unwrap();
        BatchUtils::clean_tree(&mut tree, root);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn merge_and_display() {
        let mut a = individual(1, Some(1));
        let mut b = individual(2, Some(3));
        let pmfms = vec![Pmfm::new(pmfm_ids::LENGTH_TOTAL_CM, "LENGTH_TOTAL", crate::pmfm::PmfmType::Double)];
        a.set_measurement(pmfm_ids::LENGTH_TOTAL_CM, Some(PmfmValue::text("12")));
        b.set_measurement(pmfm_ids::LENGTH_TOTAL_CM, Some(PmfmValue::Number(12.0)));
        assert!(BatchUtils::can_merge_sub_batch(&a, &b, &pmfms));
        b.taxon_name = Some(ReferentialRef::new(1, "COD", "Gadus morhua"));
        assert!(!BatchUtils::can_merge_sub_batch(&a, &b, &pmfms));
        assert_eq!(BatchUtils::parent_to_string(&b), "COD - Gadus morhua");

        let tree = Tree::with_root(b);
        assert!(BatchUtils::log_tree(&tree, tree.root().unwrap()).contains("count:3"));
    }
}

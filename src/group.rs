use crate::batch::{Batch, BatchKind, BatchTree};
use crate::batch_utils::BatchUtils;
use crate::error::Result;
use crate::measurement::{PmfmValue, PmfmValueUtils};
use crate::pmfm::{first_qualitative_pmfm, Pmfm, QualitativePmfmFilter};
use crate::referential::ReferentialRef;
use crate::schema::{acquisition_level, pmfm_ids, qv_ids};
use crate::tree::NodeId;

/// Options of [`BatchGroupUtils::map_children_pmfms`].
#[derive(Debug, Clone, Default)]
pub struct ChildrenPmfmsOptions<'a> {
    pub qv_pmfm: Option<&'a Pmfm>,
    pub qv_id: Option<i64>,
    pub is_discard: bool,
}

/// Options of [`BatchGroupUtils::get_qv_pmfm`].
#[derive(Debug, Clone)]
pub struct QvPmfmOptions {
    pub preferred_pmfm_ids: Vec<i32>,
    /// The fallback qualitative PMFM must come first in the list.
    pub only_first: bool,
}

impl Default for QvPmfmOptions {
    fn default() -> Self {
        Self {
            preferred_pmfm_ids: vec![pmfm_ids::DISCARD_OR_LANDING],
            only_first: true,
        }
    }
}

/// Species groups of a catch tree.
pub struct BatchGroupUtils;

impl BatchGroupUtils {
    /// Direct children of the catch (or of its sampling child) labelled
    /// `SORTING_BATCH#n`, turned into groups with their observed count.
    pub fn from_batch_tree(tree: &mut BatchTree) -> Result<Vec<NodeId>> {
        let Some(root) = tree.root() else {
            return Ok(Vec::new());
        };
        let container = BatchUtils::get_sampling_child(tree, root).unwrap_or(root);
        let groups: Vec<NodeId> = tree
            .children(container)
            .into_iter()
            .filter(|c| tree.get(*c).is_some_and(BatchUtils::is_sorting_batch))
            .collect();
        for group in &groups {
            Self::compute_observed_individual_count(tree, *group)?;
        }
        Ok(groups)
    }

    /// Detached copies of each group subtree.
    pub fn group_subtrees(tree: &mut BatchTree) -> Result<Vec<BatchTree>> {
        Self::from_batch_tree(tree)?
            .into_iter()
            .map(|g| tree.copy_subtree(g))
            .collect()
    }

    /// Set the group kind with the sum of its sub-batches' counts.
    pub fn compute_observed_individual_count(tree: &mut BatchTree, group: NodeId) -> Result<Option<i64>> {
        let observed = BatchUtils::sum_observed_individual_count(tree, group);
        tree.node_mut(group)?.kind = BatchKind::Group {
            observed_individual_count: observed,
        };
        Ok(observed)
    }

    /// Same group: same batch, or same rank order under the same parent.
    pub fn equals(g1: &Batch, g2: &Batch) -> bool {
        Batch::equals(g1, g2)
            || (g1.rank_order.is_some() && g1.rank_order == g2.rank_order && g1.parent_id == g2.parent_id)
    }

    /// Add a group under `parent`, with one child per value of `qv_pmfm`.
    pub fn add_group(
        tree: &mut BatchTree,
        parent: NodeId,
        taxon_group: Option<ReferentialRef>,
        taxon_name: Option<ReferentialRef>,
        qv_pmfm: Option<&Pmfm>,
    ) -> Result<NodeId> {
        let rank_order = BatchUtils::compute_rank_order(tree, parent);
        let label = BatchUtils::level_label(acquisition_level::SORTING_BATCH, rank_order);
        let group = Batch {
            taxon_group,
            taxon_name,
            kind: BatchKind::Group {
                observed_individual_count: None,
            },
            ..Batch::new(label.clone(), rank_order)
        };
        let group_id = tree.add_child(parent, group)?;
        if let Some(qv_pmfm) = qv_pmfm {
            for (index, qv) in qv_pmfm.qualitative_values.iter().enumerate() {
                let mut child = Batch::new(BatchUtils::child_label(&label, &qv.label), index as i32 + 1);
                child.set_measurement(qv_pmfm.id, Some(PmfmValue::qv_id(qv.id)));
                tree.add_child(group_id, child)?;
            }
        }
        Ok(group_id)
    }

    /// PMFMs of the children on one grouping-value branch.
    ///
    /// Never mutates `pmfms`; modified entries are clones.
    pub fn map_children_pmfms(pmfms: &[Pmfm], opts: &ChildrenPmfmsOptions) -> Vec<Pmfm> {
        let is_discard = opts.is_discard || opts.qv_id == Some(qv_ids::DISCARD as i64);
        let qv_pmfm_id = opts.qv_pmfm.map(|p| p.id);

        let mut result: Vec<Pmfm> = pmfms
            .iter()
            .filter(|p| Some(p.id) != qv_pmfm_id)
            .filter(|p| p.id != pmfm_ids::DISCARD_REASON || is_discard)
            .map(|p| {
                if !is_discard {
                    return p.clone();
                }
                match p.id {
                    pmfm_ids::DRESSING => p.hidden_with_default(Some(PmfmValue::qv_id(qv_ids::DRESSING_WHOLE as i64))),
                    pmfm_ids::PRESERVATION => {
                        p.hidden_with_default(Some(PmfmValue::qv_id(qv_ids::PRESERVATION_FRESH as i64)))
                    }
                    pmfm_ids::TRAWL_SIZE_CAT => {
                        p.hidden_with_default(Some(PmfmValue::qv_id(qv_ids::SIZE_UNLI_CAT_NONE as i64)))
                    }
                    _ if p.is_weight() && p.is_computed_method() => p.hidden_with_default(None),
                    _ => p.clone(),
                }
            })
            .collect();

        if let (Some(qv_pmfm), Some(qv_id)) = (opts.qv_pmfm, opts.qv_id) {
            let mut grouping = qv_pmfm.hidden_with_default(Some(PmfmValue::qv_id(qv_id)));
            grouping.required = true;
            result.insert(0, grouping);
        }
        result
    }

    /// Child of `group` whose grouping value equals `value`.
    pub fn find_child_by_qv_value(
        tree: &BatchTree,
        group: NodeId,
        qv_pmfm: &Pmfm,
        value: &PmfmValue,
    ) -> Option<NodeId> {
        tree.children(group).into_iter().find(|c| {
            tree.get(*c)
                .is_some_and(|b| PmfmValueUtils::equals(b.measurement(qv_pmfm.id), Some(value)))
        })
    }

    /// The qualitative PMFM splitting groups into per-value children.
    ///
    /// A visible preferred PMFM wins; otherwise the first visible
    /// qualitative PMFM with 2 or 3 values. Discard/landing values are
    /// reordered so landing comes first.
    pub fn get_qv_pmfm(pmfms: &[Pmfm], opts: &QvPmfmOptions) -> Option<Pmfm> {
        let preferred = opts.preferred_pmfm_ids.iter().find_map(|id| {
            pmfms
                .iter()
                .find(|p| p.id == *id && !p.hidden && p.is_qualitative())
        });
        let pmfm = match preferred {
            Some(p) => p,
            None => {
                let (index, p) = first_qualitative_pmfm(pmfms, &QualitativePmfmFilter::default())?;
                if opts.only_first && index != 0 {
                    tracing::debug!(pmfm_id = p.id, index, "qualitative pmfm not in first position");
                    return None;
                }
                p
            }
        };

        let mut pmfm = pmfm.clone();
        if pmfm.id == pmfm_ids::DISCARD_OR_LANDING {
            // Stable: other values keep their order.
            pmfm.qualitative_values
                .sort_by_key(|qv| qv.label != qv_ids::LANDING_LABEL);
        }
        Some(pmfm)
    }
}

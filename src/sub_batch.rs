use crate::batch::{Batch, BatchKind, BatchTree, GroupLink};
use crate::batch_utils::BatchUtils;
use crate::error::Result;
use crate::measurement::{PmfmValue, PmfmValueUtils};
use crate::pmfm::Pmfm;
use crate::schema::acquisition_level;
use crate::tree::NodeId;

/// How the grouping value is copied onto sub-batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueRepresentation {
    /// Id as string, for persistence.
    #[default]
    Model,
    /// Qualitative value object, for editing.
    Form,
}

#[derive(Debug, Clone, Default)]
pub struct SubBatchOptions<'a> {
    pub qv_pmfm: Option<&'a Pmfm>,
    pub representation: ValueRepresentation,
}

/// A sub-batch row of an editing table.
#[derive(Debug, Clone, PartialEq)]
pub struct SubBatchRow {
    pub batch: Batch,
    /// Rows being edited survive orphan deletion.
    pub editing: bool,
}

/// Flat sub-batch lists and their re-attachment to groups.
pub struct SubBatchUtils;

impl SubBatchUtils {
    /// Individual-level batches under each group (per grouping-value child
    /// when a QV PMFM is given), stamped with their group.
    pub fn from_batch_groups(tree: &BatchTree, groups: &[NodeId], opts: &SubBatchOptions) -> Result<Vec<Batch>> {
        let mut result = Vec::new();
        for group in groups {
            let link = GroupLink::of(tree.node(*group)?);
            match opts.qv_pmfm {
                Some(qv_pmfm) => {
                    for qv_child in tree.children(*group) {
                        let Some(value) = tree.node(qv_child)?.measurement(qv_pmfm.id).cloned() else {
                            continue;
                        };
                        let tagged = match opts.representation {
                            ValueRepresentation::Model => PmfmValueUtils::to_model_value(Some(&value), qv_pmfm),
                            ValueRepresentation::Form => PmfmValueUtils::from_model_value(Some(&value), qv_pmfm),
                        };
                        for node in individuals(tree, qv_child) {
                            let mut sub_batch = as_sub_batch(tree.node(node)?, &link);
                            sub_batch.set_measurement(qv_pmfm.id, tagged.clone());
                            result.push(sub_batch);
                        }
                    }
                }
                None => {
                    for node in individuals(tree, *group) {
                        result.push(as_sub_batch(tree.node(node)?, &link));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Attach sub-batches under their group (or grouping-value child), or
    /// under its sampling child when there is one.
    ///
    /// Existing individuals under each target are replaced. Returns the
    /// sub-batches no group could take.
    pub fn link_sub_batches_to_parent(
        tree: &mut BatchTree,
        groups: &[NodeId],
        sub_batches: Vec<Batch>,
        opts: &SubBatchOptions,
    ) -> Result<Vec<Batch>> {
        let mut remaining = sub_batches;
        for group in groups {
            let group_batch = tree.node(*group)?.clone();
            let parents: Vec<NodeId> = match opts.qv_pmfm {
                Some(_) => tree.children(*group),
                None => vec![*group],
            };
            for parent in parents {
                let qv_value = opts
                    .qv_pmfm
                    .and_then(|p| tree.get(parent).and_then(|b| b.measurement(p.id)).cloned());
                let (mine, others): (Vec<Batch>, Vec<Batch>) = remaining.into_iter().partition(|sb| {
                    let same_group = sb.parent_group().is_some_and(|g| g.is_same_batch(&group_batch));
                    let same_value = match opts.qv_pmfm {
                        Some(p) => qv_value.is_some() && PmfmValueUtils::equals(sb.measurement(p.id), qv_value.as_ref()),
                        None => true,
                    };
                    same_group && same_value
                });
                remaining = others;

                let target = BatchUtils::get_sampling_child(tree, parent).unwrap_or(parent);
                for old in individuals(tree, target) {
                    tree.remove_subtree(old);
                }
                let target_id = tree.node(target)?.id;
                for mut sub_batch in mine {
                    sub_batch.parent_id = target_id;
                    sub_batch.kind = BatchKind::SubBatch { parent_group: None };
                    if let (Some(p), ValueRepresentation::Form) = (opts.qv_pmfm, opts.representation) {
                        let model = PmfmValueUtils::to_model_value(sub_batch.measurement(p.id), p);
                        sub_batch.set_measurement(p.id, model);
                    }
                    tree.add_child(target, sub_batch)?;
                }
            }
        }
        if !remaining.is_empty() {
            tracing::warn!(count = remaining.len(), "sub-batches without a matching group");
        }
        Ok(remaining)
    }

    /// Re-resolve every `parent_group` against the current groups.
    pub fn link_sub_batches_to_group(sub_batches: &mut [Batch], groups: &[Batch]) {
        for sub_batch in sub_batches.iter_mut() {
            let resolved = sub_batch
                .parent_group()
                .and_then(|link| resolve_group(link, groups))
                .map(GroupLink::of);
            sub_batch.kind = BatchKind::SubBatch { parent_group: resolved };
        }
    }

    /// Table-side reconciliation after the group list changed: re-link
    /// each row, then drop rows left without a group unless being edited.
    pub fn link_data_to_parent_and_delete_orphan(rows: Vec<SubBatchRow>, groups: &[Batch]) -> Vec<SubBatchRow> {
        let before = rows.len();
        let kept: Vec<SubBatchRow> = rows
            .into_iter()
            .filter_map(|mut row| {
                let resolved = row
                    .batch
                    .parent_group()
                    .and_then(|link| resolve_group(link, groups))
                    .map(GroupLink::of);
                let linked = resolved.is_some();
                row.batch.kind = BatchKind::SubBatch { parent_group: resolved };
                (linked || row.editing).then_some(row)
            })
            .collect();
        if kept.len() < before {
            tracing::debug!(removed = before - kept.len(), "deleted orphan sub-batches");
        }
        kept
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn individuals(tree: &BatchTree, node: NodeId) -> Vec<NodeId> {
    BatchUtils::get_children_by_level(tree, node, acquisition_level::SORTING_BATCH_INDIVIDUAL)
}

fn as_sub_batch(batch: &Batch, link: &GroupLink) -> Batch {
    Batch {
        kind: BatchKind::SubBatch {
            parent_group: Some(link.clone()),
        },
        ..batch.clone()
    }
}

/// Same batch first; then same taxon, when the link names a taxon.
fn resolve_group<'a>(link: &GroupLink, groups: &'a [Batch]) -> Option<&'a Batch> {
    groups.iter().find(|g| link.is_same_batch(g)).or_else(|| {
        if link.taxon_group.is_none() && link.taxon_name.is_none() {
            return None;
        }
        groups.iter().find(|g| link.is_same_taxon(g))
    })
}

/// Grouping value on a sub-batch, whatever its representation.
pub fn sub_batch_qv_id(sub_batch: &Batch, qv_pmfm: &Pmfm) -> Option<i64> {
    sub_batch.measurement(qv_pmfm.id).and_then(PmfmValue::as_ref_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::BatchGroupUtils;
    use crate::referential::ReferentialRef;
    use crate::schema::{pmfm_ids, qv_ids};
    use crate::tree::Tree;

    fn qv_pmfm() -> Pmfm {
        Pmfm::qualitative(
            pmfm_ids::DISCARD_OR_LANDING,
            "DISCARD_OR_LANDING",
            vec![
                ReferentialRef::new(qv_ids::LANDING as i64, "LAN", "Landing"),
                ReferentialRef::new(qv_ids::DISCARD as i64, "DIS", "Discard"),
            ],
        )
    }

    fn individual(rank: i32) -> Batch {
        Batch {
            individual_count: Some(1),
            ..Batch::new(format!("SORTING_BATCH_INDIVIDUAL#{rank}"), rank)
        }
    }

    fn cod() -> ReferentialRef {
        ReferentialRef::new(10, "COD", "Gadus morhua")
    }

    #[test]
    fn flatten_without_grouping_pmfm() {
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1).with_id(1));
        let root = tree.root().unwrap();
        let group = BatchGroupUtils::add_group(&mut tree, root, Some(cod()), None, None).unwrap();
        tree.get_mut(group).unwrap().id = Some(2);
        let sampling = BatchUtils::get_or_create_sampling_child(&mut tree, group).unwrap();
        tree.add_child(sampling, individual(1)).unwrap();
        tree.add_child(sampling, individual(2)).unwrap();

        let opts = SubBatchOptions::default();
        let subs = SubBatchUtils::from_batch_groups(&tree, &[group], &opts).unwrap();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|s| s.parent_group().is_some_and(|g| g.id == Some(2))));

        let left = SubBatchUtils::link_sub_batches_to_parent(&mut tree, &[group], subs, &opts).unwrap();
        assert!(left.is_empty());
        assert_eq!(tree.children(sampling).len(), 2);
        let again = SubBatchUtils::from_batch_groups(&tree, &[group], &opts).unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn form_representation_is_stored_as_model() {
        let pmfm = qv_pmfm();
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1));
        let root = tree.root().unwrap();
        let group = BatchGroupUtils::add_group(&mut tree, root, None, None, Some(&pmfm)).unwrap();
        let discard = tree.children(group)[1];
        tree.add_child(discard, individual(1)).unwrap();

        let opts = SubBatchOptions {
            qv_pmfm: Some(&pmfm),
            representation: ValueRepresentation::Form,
        };
        let subs = SubBatchUtils::from_batch_groups(&tree, &[group], &opts).unwrap();
        assert!(matches!(subs[0].measurement(pmfm.id), Some(PmfmValue::Qualitative(r)) if r.id == 191));
        assert_eq!(sub_batch_qv_id(&subs[0], &pmfm), Some(191));

        SubBatchUtils::link_sub_batches_to_parent(&mut tree, &[group], subs, &opts).unwrap();
        let stored = tree.get(tree.children(discard)[0]).unwrap();
        assert_eq!(stored.measurement(pmfm.id), Some(&PmfmValue::text("191")));
        assert_eq!(stored.parent_group(), None);
    }

    #[test]
    fn relink_by_taxon_when_group_changed() {
        let mut group = Batch::new("SORTING_BATCH#1", 1);
        group.taxon_group = Some(cod());
        let mut sub = individual(1);
        sub.kind = BatchKind::SubBatch {
            parent_group: Some(GroupLink::of(&group)),
        };

        let mut renumbered = Batch::new("SORTING_BATCH#2", 2);
        renumbered.taxon_group = Some(cod());
        let mut subs = vec![sub];
        SubBatchUtils::link_sub_batches_to_group(&mut subs, &[renumbered]);
        assert_eq!(subs[0].parent_group().map(|g| g.label.as_str()), Some("SORTING_BATCH#2"));
    }

    #[test]
    fn orphans_are_deleted_unless_edited() {
        let group = Batch::new("SORTING_BATCH#1", 1);
        let link = GroupLink::of(&group);
        let row = |editing| SubBatchRow {
            batch: Batch {
                kind: BatchKind::SubBatch {
                    parent_group: Some(link.clone()),
                },
                ..individual(1)
            },
            editing,
        };

        let kept = SubBatchUtils::link_data_to_parent_and_delete_orphan(vec![row(false)], &[group.clone()]);
        assert_eq!(kept.len(), 1);

        let other = Batch::new("SORTING_BATCH#9", 9);
        let kept = SubBatchUtils::link_data_to_parent_and_delete_orphan(vec![row(false), row(true)], &[other]);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].editing);
        assert_eq!(kept[0].batch.parent_group(), None);
    }
}

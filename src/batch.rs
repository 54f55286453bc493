use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BatchError, Result};
use crate::measurement::{MeasurementValues, PmfmValue};
use crate::referential::{same_ref_id, ReferentialRef};
use crate::schema::{acquisition_level, method_ids};
use crate::tree::{NodeId, Tree};

/// The catch breakdown tree.
pub type BatchTree = Tree<Batch>;

/// Weight of a batch, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchWeight {
    pub value: Option<f64>,
    #[serde(default)]
    pub method_id: Option<i32>,
    /// Derived by the engine rather than entered.
    #[serde(default)]
    pub computed: bool,
    #[serde(default)]
    pub estimated: bool,
}

impl BatchWeight {
    pub fn measured(value: f64) -> Self {
        Self {
            value: Some(value),
            method_id: Some(method_ids::MEASURED_BY_OBSERVER),
            computed: false,
            estimated: false,
        }
    }

    pub fn estimated(value: f64) -> Self {
        Self {
            value: Some(value),
            method_id: Some(method_ids::ESTIMATED_BY_OBSERVER),
            computed: false,
            estimated: true,
        }
    }

    pub fn calculated(value: f64) -> Self {
        Self {
            value: Some(value),
            method_id: Some(method_ids::CALCULATED),
            computed: true,
            estimated: false,
        }
    }

    /// Present, finite, non-negative.
    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Link from a sub-batch to its group, resolved structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupLink {
    pub id: Option<i64>,
    pub label: String,
    pub rank_order: Option<i32>,
    pub operation_id: Option<i64>,
    pub sale_id: Option<i64>,
    pub taxon_group: Option<ReferentialRef>,
    pub taxon_name: Option<ReferentialRef>,
}

impl GroupLink {
    pub fn of(group: &Batch) -> Self {
        Self {
            id: group.id,
            label: group.label.clone(),
            rank_order: group.rank_order,
            operation_id: group.operation_id,
            sale_id: group.sale_id,
            taxon_group: group.taxon_group.clone(),
            taxon_name: group.taxon_name.clone(),
        }
    }

    /// Same batch identity (see [`Batch::equals`]).
    pub fn is_same_batch(&self, group: &Batch) -> bool {
        Batch::equals(&self.as_batch(), group)
    }

    /// Same taxon group and taxon name ids.
    pub fn is_same_taxon(&self, group: &Batch) -> bool {
        same_ref_id(self.taxon_group.as_ref(), group.taxon_group.as_ref())
            && same_ref_id(self.taxon_name.as_ref(), group.taxon_name.as_ref())
    }

    fn as_batch(&self) -> Batch {
        Batch {
            id: self.id,
            label: self.label.clone(),
            rank_order: self.rank_order,
            operation_id: self.operation_id,
            sale_id: self.sale_id,
            ..Batch::default()
        }
    }
}

/// Role of a batch in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchKind {
    #[default]
    Batch,
    /// Species group at the sorting level.
    #[serde(rename_all = "camelCase")]
    Group { observed_individual_count: Option<i64> },
    /// Individually measured specimen(s), edited as a flat list.
    #[serde(rename_all = "camelCase")]
    SubBatch { parent_group: Option<GroupLink> },
}

impl BatchKind {
    pub fn is_plain(&self) -> bool {
        matches!(self, BatchKind::Batch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Option<i64>,
    #[serde(default)]
    pub label: String,
    pub rank_order: Option<i32>,
    /// Read from `parentId`, or from the `id` of an embedded `parent` object.
    #[serde(default, alias = "parent", deserialize_with = "parent_id_or_object")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub operation_id: Option<i64>,
    #[serde(default)]
    pub sale_id: Option<i64>,
    #[serde(default)]
    pub exhaustive_inventory: Option<bool>,
    #[serde(default)]
    pub sampling_ratio: Option<f64>,
    #[serde(default)]
    pub sampling_ratio_text: Option<String>,
    #[serde(default)]
    pub sampling_ratio_computed: bool,
    #[serde(default)]
    pub individual_count: Option<i64>,
    #[serde(default)]
    pub taxon_group: Option<ReferentialRef>,
    #[serde(default)]
    pub taxon_name: Option<ReferentialRef>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub weight: Option<BatchWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_weight: Option<BatchWeight>,
    #[serde(default)]
    pub measurement_values: MeasurementValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_flag_id: Option<i32>,
    #[serde(default, skip_serializing_if = "BatchKind::is_plain")]
    pub kind: BatchKind,
}

impl Batch {
    pub fn new(label: impl Into<String>, rank_order: i32) -> Self {
        Self {
            label: label.into(),
            rank_order: Some(rank_order),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn measurement(&self, pmfm_id: i32) -> Option<&PmfmValue> {
        self.measurement_values.get(&pmfm_id.to_string())
    }

    pub fn set_measurement(&mut self, pmfm_id: i32, value: Option<PmfmValue>) {
        let key = pmfm_id.to_string();
        match value {
            Some(v) => self.measurement_values.insert(key, v),
            None => self.measurement_values.remove(&key),
        };
    }

    pub fn weight_value(&self) -> Option<f64> {
        self.weight.as_ref().and_then(|w| w.value)
    }

    pub fn observed_individual_count(&self) -> Option<i64> {
        match &self.kind {
            BatchKind::Group {
                observed_individual_count,
            } => *observed_individual_count,
            _ => None,
        }
    }

    pub fn parent_group(&self) -> Option<&GroupLink> {
        match &self.kind {
            BatchKind::SubBatch { parent_group } => parent_group.as_ref(),
            _ => None,
        }
    }

    /// Identity equality by id when both are persisted; otherwise rank
    /// order, operation, sale and label must all match.
    pub fn equals(b1: &Batch, b2: &Batch) -> bool {
        match (b1.id, b2.id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                b1.rank_order == b2.rank_order
                    && b1.operation_id == b2.operation_id
                    && b1.sale_id == b2.sale_id
                    && b1.label.trim() == b2.label.trim()
            }
        }
    }

    fn is_root_candidate(&self) -> bool {
        self.parent_id.is_none()
            && (self.label.trim().is_empty() || self.label == acquisition_level::CATCH_BATCH)
    }

    // ── Tree / array conversions ────────────────────────────────────────────

    /// Rebuild the catch tree from a flat parent-referencing array, linked by
    /// `parent_id` (an embedded `parent` object is folded into it on read).
    ///
    /// Returns `None` when the array is empty or holds no root.
    pub fn from_object_array_as_tree(items: Vec<Batch>) -> Option<BatchTree> {
        if items.is_empty() {
            return None;
        }
        let tree = Tree::from_flat(items, |b| b.id, |b| b.parent_id, Batch::is_root_candidate);
        if tree.is_none() {
            tracing::warn!("no root batch in flat array");
        }
        tree
    }

    /// Flatten the tree in preorder, with `parent_id` taken from the tree.
    pub fn tree_as_object_array(tree: &BatchTree, opts: &FlattenOptions) -> Result<Vec<Batch>> {
        let Some(root) = tree.root() else {
            return Ok(Vec::new());
        };
        let mut result = Vec::with_capacity(tree.len());
        for node in tree.preorder(root) {
            let batch = tree.node(node)?;
            let parent_id = match tree.parent(node) {
                Some(parent) => {
                    let parent_batch = tree.node(parent)?;
                    if opts.require_ids && parent_batch.id.is_none() {
                        return Err(BatchError::MissingId {
                            label: parent_batch.label.clone(),
                        });
                    }
                    parent_batch.id
                }
                None => None,
            };
            if opts.require_ids && node != root && batch.id.is_none() {
                return Err(BatchError::MissingId {
                    label: batch.label.clone(),
                });
            }
            let mut flat = batch.clone();
            flat.parent_id = parent_id;
            if let BatchKind::SubBatch { parent_group } = &mut flat.kind {
                // The group is re-resolved through parent_id.
                *parent_group = None;
            }
            result.push(flat);
        }
        Ok(result)
    }

    /// `parent_id` of every node set from its tree position.
    pub fn sync_parent_ids(tree: &mut BatchTree) {
        for node in tree.iter_preorder() {
            let parent_id = tree.parent(node).and_then(|p| tree.get(p)).and_then(|p| p.id);
            if let Some(batch) = tree.get_mut(node) {
                batch.parent_id = parent_id;
            }
        }
    }

    /// Label path of `node` for diagnostics (`CATCH_BATCH > SORTING_BATCH#1`).
    pub fn path_label(tree: &BatchTree, node: NodeId) -> String {
        let mut labels: Vec<&str> = tree
            .ancestors(node)
            .into_iter()
            .rev()
            .chain(std::iter::once(node))
            .filter_map(|n| tree.get(n).map(|b| b.label.as_str()))
            .collect();
        labels.retain(|l| !l.is_empty());
        labels.join(" > ")
    }
}

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// Fail on nodes without a persisted id.
    pub require_ids: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self { require_ids: true }
    }
}

fn parent_id_or_object<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ParentRef {
        Id(i64),
        Object { id: Option<i64> },
    }
    Ok(match Option::<ParentRef>::deserialize(deserializer)? {
        Some(ParentRef::Id(id)) => Some(id),
        Some(ParentRef::Object { id }) => id,
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted_tree() -> BatchTree {
        let mut tree = Tree::with_root(Batch::new("CATCH_BATCH", 1).with_id(1));
        let root = tree.root().unwrap();
        let group = tree
            .add_child(root, Batch::new("SORTING_BATCH#1", 1).with_id(2))
            .unwrap();
        let sampling = tree
            .add_child(group, Batch::new("SORTING_BATCH#1.%", 1).with_id(3))
            .unwrap();
        tree.add_child(sampling, Batch::new("SORTING_BATCH_INDIVIDUAL#1", 1).with_id(4))
            .unwrap();
        tree
    }

    #[test]
    fn flat_array_uses_tree_parents() {
        let mut tree = persisted_tree();
        let root = tree.root().unwrap();
        let group = tree.children(root)[0];
        tree.get_mut(group).unwrap().parent_id = Some(999);

        let flat = Batch::tree_as_object_array(&tree, &FlattenOptions::default()).unwrap();
        let parents: Vec<Option<i64>> = flat.iter().map(|b| b.parent_id).collect();
        assert_eq!(parents, vec![None, Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn missing_id_names_the_batch() {
        let mut tree = persisted_tree();
        let root = tree.root().unwrap();
        let group = tree.children(root)[0];
        tree.get_mut(group).unwrap().id = None;
        let err = Batch::tree_as_object_array(&tree, &FlattenOptions::default()).unwrap_err();
        assert!(matches!(err, BatchError::MissingId { ref label } if label == "SORTING_BATCH#1"));
        assert!(err.to_string().contains("SORTING_BATCH#1"));

        let relaxed = FlattenOptions { require_ids: false };
        assert_eq!(Batch::tree_as_object_array(&tree, &relaxed).unwrap().len(), 4);
    }

    #[test]
    fn no_root_gives_none() {
        assert!(Batch::from_object_array_as_tree(Vec::new()).is_none());
        let mut orphan = Batch::new("SORTING_BATCH#1", 1).with_id(5);
        orphan.parent_id = Some(1);
        assert!(Batch::from_object_array_as_tree(vec![orphan]).is_none());
    }

    #[test]
    fn root_accepts_blank_label() {
        let root = Batch::default().with_id(1);
        let mut child = Batch::new("SORTING_BATCH#1", 1).with_id(2);
        child.parent_id = Some(1);
        let tree = Batch::from_object_array_as_tree(vec![child, root]).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.get(root).unwrap().id, Some(1));
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn equality_rules() {
        let a = Batch::new("SORTING_BATCH#1", 1);
        let mut b = Batch::new("SORTING_BATCH#1", 1);
        assert!(Batch::equals(&a, &b));
        b.parent_id = Some(42);
        assert!(Batch::equals(&a, &b), "parent linkage is not compared");
        b.sale_id = Some(3);
        assert!(!Batch::equals(&a, &b));
        assert!(Batch::equals(&a.clone().with_id(7), &b.clone().with_id(7)));
        assert!(!Batch::equals(&a.with_id(7), &b.with_id(8)));
    }

    #[test]
    fn kind_is_tagged_in_json() {
        let mut group = Batch::new("SORTING_BATCH#1", 1);
        group.kind = BatchKind::Group {
            observed_individual_count: Some(3),
        };
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["kind"]["type"], "group");
        assert_eq!(json["kind"]["observedIndividualCount"], 3);
        let back: Batch = serde_json::from_value(json).unwrap();
        assert_eq!(back.observed_individual_count(), Some(3));

        let plain = serde_json::to_value(Batch::new("X", 1)).unwrap();
        assert!(plain.get("kind").is_none());
    }
}

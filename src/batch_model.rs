use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::batch::{Batch, BatchTree};
use crate::batch_utils::BatchUtils;
use crate::config::ProgramConfig;
use crate::error::{BatchError, Result};
use crate::measurement::{MeasurementValues, PmfmValue, PmfmValueUtils};
use crate::model_rules::{BatchModelRules, ModelRule};
use crate::pmfm::{first_qualitative_pmfm, Pmfm, QualitativePmfmFilter};
use crate::rule::{Rule, RuleUtils};
use crate::schema::{acquisition_level, pmfm_ids};
use crate::tree::{NodeId, Tree};

/// Visibility and requiredness flags of a model node.
///
/// `None` means "not decided"; rules fill or override it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchModelState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_weight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_weight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_sampling_batch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_batch_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_sample_weight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_sample_weight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_individual_count: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_exhaustive_inventory: Option<bool>,
}

impl BatchModelState {
    /// Overwrite with every flag `other` decides.
    pub fn overlay(&mut self, other: &BatchModelState) {
        fn set(target: &mut Option<bool>, value: Option<bool>) {
            if value.is_some() {
                *target = value;
            }
        }
        set(&mut self.show_weight, other.show_weight);
        set(&mut self.required_weight, other.required_weight);
        set(&mut self.show_sampling_batch, other.show_sampling_batch);
        set(&mut self.sampling_batch_enabled, other.sampling_batch_enabled);
        set(&mut self.show_sample_weight, other.show_sample_weight);
        set(&mut self.required_sample_weight, other.required_sample_weight);
        set(&mut self.show_individual_count, other.show_individual_count);
        set(&mut self.show_exhaustive_inventory, other.show_exhaustive_inventory);
    }

    /// Fill the flags still undecided from `defaults`.
    pub fn fill_defaults(&mut self, defaults: &BatchModelState) {
        let mut merged = defaults.clone();
        merged.overlay(self);
        *self = merged;
    }
}

/// A node of the form-driving model tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchModel {
    pub name: String,
    /// Position in the tree (`children.0.children.1`), empty for the root.
    pub path: String,
    pub original_data: Batch,
    pub pmfms: Vec<Pmfm>,
    pub children_pmfms: Vec<Pmfm>,
    pub state: BatchModelState,
    pub children_state: BatchModelState,
    pub is_leaf: bool,
    pub disabled: bool,
    pub hidden: bool,
}

impl BatchModel {
    pub fn has_visible_pmfms(&self) -> bool {
        self.pmfms.iter().any(|p| !p.hidden)
    }

    fn subject(&self) -> Result<Value> {
        Ok(json!({
            "name": self.name,
            "path": self.path,
            "isLeaf": self.is_leaf,
            "hidden": self.hidden,
            "originalData": serde_json::to_value(&self.original_data)?,
        }))
    }
}

pub type BatchModelTree = Tree<BatchModel>;

/// Selects model nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchModelFilter {
    /// Each listed value must equal the node's data value.
    pub measurement_values: MeasurementValues,
    /// The node must carry all these PMFMs.
    pub pmfm_ids: Vec<i32>,
    pub hidden: Option<bool>,
    pub is_leaf: Option<bool>,
    pub parent_filter: Option<Box<BatchModelFilter>>,
}

impl BatchModelFilter {
    pub fn with_value(mut self, pmfm_id: i32, value: PmfmValue) -> Self {
        self.measurement_values.insert(pmfm_id.to_string(), value);
        self
    }

    pub fn with_parent(mut self, parent: BatchModelFilter) -> Self {
        self.parent_filter = Some(Box::new(parent));
        self
    }

    pub fn matches(&self, tree: &BatchModelTree, node: NodeId) -> bool {
        let Some(model) = tree.get(node) else {
            return false;
        };
        let values_match = self.measurement_values.iter().all(|(key, expected)| {
            PmfmValueUtils::equals(model.original_data.measurement_values.get(key), Some(expected))
        });
        let pmfms_match = self
            .pmfm_ids
            .iter()
            .all(|id| model.pmfms.iter().any(|p| p.id == *id));
        let parent_match = match &self.parent_filter {
            None => true,
            Some(filter) => tree.parent(node).is_some_and(|p| filter.matches(tree, p)),
        };
        values_match
            && pmfms_match
            && self.hidden.is_none_or(|h| h == model.hidden)
            && self.is_leaf.is_none_or(|l| l == model.is_leaf)
            && parent_match
    }
}

/// Options of [`BatchModelUtils::create_model`].
#[derive(Debug, Clone)]
pub struct CreateModelOptions {
    pub catch_pmfms: Vec<Pmfm>,
    /// Mandatory and non-empty.
    pub sorting_pmfms: Vec<Pmfm>,
    pub allow_discard: bool,
    pub max_tree_depth: usize,
    /// Extra PMFM rules, evaluated on `{model, parent, pmfm}`.
    pub rules: Vec<Rule>,
    /// Replaces the default extension rules when set.
    pub model_rules: Option<Vec<ModelRule>>,
    pub root_name: String,
}

impl Default for CreateModelOptions {
    fn default() -> Self {
        Self {
            catch_pmfms: Vec::new(),
            sorting_pmfms: Vec::new(),
            allow_discard: true,
            max_tree_depth: 4,
            rules: Vec::new(),
            model_rules: None,
            root_name: "Catch".to_string(),
        }
    }
}

impl CreateModelOptions {
    pub fn from_config(config: &ProgramConfig, catch_pmfms: Vec<Pmfm>, sorting_pmfms: Vec<Pmfm>) -> Self {
        Self {
            catch_pmfms,
            sorting_pmfms,
            allow_discard: config.allow_discard,
            max_tree_depth: config.max_tree_depth,
            ..Self::default()
        }
    }
}

/// Builder and queries of the model tree.
pub struct BatchModelUtils;

impl BatchModelUtils {
    /// Build the model tree for `data` (or an empty catch).
    ///
    /// Fails only when `sorting_pmfms` is empty.
    pub fn create_model(data: Option<&BatchTree>, opts: &CreateModelOptions) -> Result<BatchModelTree> {
        if opts.sorting_pmfms.is_empty() {
            return Err(BatchError::MissingOption("opts.sortingPmfms".to_string()));
        }
        let mut pmfms = opts.catch_pmfms.clone();
        for pmfm in &opts.sorting_pmfms {
            if !pmfms.iter().any(|p| p.id == pmfm.id) {
                pmfms.push(pmfm.clone());
            }
        }

        let mut rules = BatchModelRules::pmfm_rules(opts.allow_discard);
        rules.extend(opts.rules.iter().cloned());

        let data_root = data.and_then(|d| d.root().map(|r| (d, r)));
        let root_batch = match data_root {
            Some((tree, root)) => tree.node(root)?.clone(),
            None => Batch::new(acquisition_level::CATCH_BATCH, 1),
        };

        let mut builder = Builder {
            tree: Tree::new(),
            rules: &rules,
            max_depth: opts.max_tree_depth,
        };
        let root = builder.from_batch(None, root_batch, data_root, pmfms, 0, String::new())?;
        if let Some(model) = builder.tree.get_mut(root) {
            model.name = opts.root_name.clone();
        }
        let mut tree = builder.tree;

        let model_rules = match &opts.model_rules {
            Some(custom) => custom.clone(),
            None => BatchModelRules::extension_rules(opts.allow_discard),
        };
        let mut all_rules = BatchModelRules::base_rules();
        all_rules.extend(model_rules);
        BatchModelRules::apply(&mut tree, &all_rules)?;
        Self::update_flags(&mut tree);
        Ok(tree)
    }

    pub fn find_by_filter(tree: &BatchModelTree, filter: &BatchModelFilter) -> Vec<NodeId> {
        tree.iter_preorder()
            .into_iter()
            .filter(|n| filter.matches(tree, *n))
            .collect()
    }

    /// Remove matching nodes with their subtrees; returns how many matched.
    pub fn delete_by_filter(tree: &mut BatchModelTree, filter: &BatchModelFilter) -> usize {
        let matching = Self::find_by_filter(tree, filter);
        for node in &matching {
            tree.remove_subtree(*node);
        }
        matching.len()
    }

    pub fn find_by_path(tree: &BatchModelTree, path: &str) -> Option<NodeId> {
        tree.iter_preorder()
            .into_iter()
            .find(|n| tree.get(*n).is_some_and(|m| m.path == path))
    }

    /// Same persisted batch, or same position.
    pub fn equals(a: &BatchModel, b: &BatchModel) -> bool {
        match (a.original_data.id, b.original_data.id) {
            (Some(x), Some(y)) => x == y,
            _ => a.path == b.path,
        }
    }

    /// Disabled: no visible PMFM on an internal node. Hidden root when disabled.
    pub fn update_flags(tree: &mut BatchModelTree) {
        for node in tree.iter_preorder() {
            let is_root = tree.parent(node).is_none();
            if let Some(model) = tree.get_mut(node) {
                model.disabled = !model.has_visible_pmfms() && !model.is_leaf;
                if model.disabled && is_root {
                    model.hidden = true;
                }
            }
        }
    }

    pub fn log_tree(tree: &BatchModelTree) -> String {
        let Some(root) = tree.root() else {
            return String::new();
        };
        tree.pretty_print(root, &|m: &BatchModel| {
            let pmfms: Vec<String> = m
                .pmfms
                .iter()
                .filter(|p| !p.hidden)
                .map(|p| p.label_str().to_string())
                .collect();
            let mut flags = Vec::new();
            if m.is_leaf {
                flags.push("leaf");
            }
            if m.disabled {
                flags.push("disabled");
            }
            if m.hidden {
                flags.push("hidden");
            }
            format!("{} [{}] {}", m.name, pmfms.join(", "), flags.join(" "))
                .trim_end()
                .to_string()
        })
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

struct Builder<'a> {
    tree: BatchModelTree,
    rules: &'a [Rule],
    max_depth: usize,
}

impl Builder<'_> {
    fn from_batch(
        &mut self,
        parent: Option<NodeId>,
        batch: Batch,
        data: Option<(&BatchTree, NodeId)>,
        pmfms: Vec<Pmfm>,
        depth: usize,
        path: String,
    ) -> Result<NodeId> {
        let mut model = BatchModel {
            name: batch.label.clone(),
            path,
            original_data: batch,
            pmfms: Vec::new(),
            children_pmfms: Vec::new(),
            state: BatchModelState::default(),
            children_state: BatchModelState::default(),
            is_leaf: false,
            disabled: false,
            hidden: false,
        };

        let parent_subject = match parent.and_then(|p| self.tree.get(p)) {
            Some(p) => p.subject()?,
            None => Value::Null,
        };
        let model_subject = model.subject()?;
        let mut pmfms_kept = Vec::with_capacity(pmfms.len());
        for pmfm in pmfms {
            let subject = json!({
                "model": model_subject,
                "parent": parent_subject,
                "pmfm": serde_json::to_value(&pmfm)?,
            });
            if RuleUtils::valid(&subject, self.rules) {
                pmfms_kept.push(pmfm);
            }
        }

        let filter = QualitativePmfmFilter {
            exclude_pmfm_ids: vec![pmfm_ids::CHILD_GEAR],
            ..QualitativePmfmFilter::default()
        };
        let split = first_qualitative_pmfm(&pmfms_kept, &filter).map(|(i, p)| (i, p.clone()));

        let node = match parent {
            Some(p) => self.tree.add_child(p, model.clone())?,
            None => {
                self.tree = Tree::with_root(model.clone());
                self.tree.root().ok_or(BatchError::MissingRoot)?
            }
        };

        match split {
            Some((index, qv_pmfm)) => {
                let remaining: Vec<Pmfm> = pmfms_kept.split_off(index + 1);
                pmfms_kept.truncate(index);
                model.pmfms = pmfms_kept;
                if depth < self.max_depth && !remaining.is_empty() {
                    self.add_qv_children(node, &model, data, &qv_pmfm, &remaining, depth)?;
                } else {
                    model.children_pmfms = std::iter::once(qv_pmfm).chain(remaining).collect();
                }
            }
            None => {
                if depth == 0 {
                    tracing::warn!(label = %model.original_data.label, "no grouping pmfm found, building a single-level model");
                }
                model.pmfms = pmfms_kept;
            }
        }

        let has_children = !self.tree.children(node).is_empty();
        let target = self.tree.node_mut(node)?;
        target.pmfms = model.pmfms;
        target.children_pmfms = model.children_pmfms;
        target.is_leaf = !has_children;
        Ok(node)
    }

    fn add_qv_children(
        &mut self,
        node: NodeId,
        model: &BatchModel,
        data: Option<(&BatchTree, NodeId)>,
        qv_pmfm: &Pmfm,
        remaining: &[Pmfm],
        depth: usize,
    ) -> Result<()> {
        let batch = &model.original_data;
        let sampling = data.and_then(|(tree, n)| BatchUtils::get_sampling_child(tree, n).map(|s| (tree, s)));
        let base_label = match sampling {
            Some((tree, s)) => tree.node(s)?.label.clone(),
            None => batch.label.clone(),
        };
        let at_catch_level = depth == 0 || batch.label == acquisition_level::CATCH_BATCH;

        for (index, qv) in qv_pmfm.qualitative_values.iter().enumerate() {
            let qv_value = PmfmValue::qv_id(qv.id);
            let child_qv_pmfm = qv_pmfm.hidden_with_default(Some(qv_value.clone()));

            let existing = [sampling, data]
                .into_iter()
                .flatten()
                .find_map(|(tree, parent)| {
                    tree.children(parent).into_iter().find(|c| {
                        tree.get(*c).is_some_and(|b| {
                            PmfmValueUtils::equals(b.measurement(qv_pmfm.id), Some(&qv_value))
                        })
                    })
                    .map(|c| (tree, c))
                });

            let child_batch = match existing {
                Some((tree, c)) => tree.node(c)?.clone(),
                None => {
                    let label = if at_catch_level {
                        format!("{}#{}", acquisition_level::SORTING_BATCH, qv.label)
                    } else {
                        BatchUtils::child_label(&base_label, &qv.label)
                    };
                    let mut child = Batch::new(label, index as i32 + 1);
                    child.set_measurement(qv_pmfm.id, Some(qv_value.clone()));
                    child
                }
            };

            let child_pmfms: Vec<Pmfm> = std::iter::once(child_qv_pmfm)
                .chain(remaining.iter().cloned())
                .collect();
            let path = if model.path.is_empty() {
                format!("children.{index}")
            } else {
                format!("{}.children.{index}", model.path)
            };
            let child = self.from_batch(Some(node), child_batch, existing, child_pmfms, depth + 1, path)?;
            if let Some(child_model) = self.tree.get_mut(child) {
                child_model.name = qv.name.clone().unwrap_or_else(|| qv.label.clone());
            }
        }
        Ok(())
    }
}

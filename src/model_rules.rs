use serde::{Deserialize, Serialize};

use crate::batch_model::{BatchModelFilter, BatchModelState, BatchModelTree, BatchModelUtils};
use crate::error::{BatchError, Result};
use crate::measurement::PmfmValue;
use crate::pmfm::Pmfm;
use crate::rule::{Rule, RuleOperator};
use crate::schema::{pmfm_ids, qv_ids};
use crate::tree::NodeId;

/// What a model rule does to every node its filter selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ModelAction {
    /// Clear PMFMs, hide the node and prefix children names with its own.
    HideBranch,
    /// Weight and sampling batch shown and required.
    EnableBulkSampling,
    /// Exhaustive inventory without sampling batch.
    ConfigureNonBulk,
    HideChildrenPmfms { pmfm_ids: Vec<i32> },
    /// Overwrite the decided flags.
    SetState { state: BatchModelState },
    /// Fill only the undecided flags.
    DefaultState { state: BatchModelState },
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRule {
    pub label: String,
    pub filter: BatchModelFilter,
    #[serde(flatten)]
    pub action: ModelAction,
}

impl ModelRule {
    pub fn new(label: impl Into<String>, filter: BatchModelFilter, action: ModelAction) -> Self {
        Self {
            label: label.into(),
            filter,
            action,
        }
    }
}

/// Built-in rule sets of the model builder.
pub struct BatchModelRules;

impl BatchModelRules {
    /// PMFM rules evaluated on `{model, parent, pmfm}`: discard-only PMFMs
    /// stay off landing nodes, landing-only PMFMs off discard branches.
    pub fn pmfm_rules(allow_discard: bool) -> Vec<Rule> {
        let data_value = |prefix: &str| format!("{prefix}.originalData.measurementValues.{}", pmfm_ids::DISCARD_OR_LANDING);
        let no_discard_pmfm = || {
            Rule::new("no-discard-pmfm", "pmfm.id", RuleOperator::NotIn)
                .with_values(pmfm_ids::DISCARD_ONLY)
                .with_message("Discard PMFM on a landing batch")
        };
        let no_landing_pmfm = || {
            Rule::new("no-landing-pmfm", "pmfm.id", RuleOperator::NotIn)
                .with_values(pmfm_ids::LANDING_ONLY)
                .with_message("Landing PMFM on a discard batch")
        };

        let mut rules = vec![Rule::new("landing", data_value("model"), RuleOperator::Eq)
            .with_value(qv_ids::LANDING.to_string())
            .when(vec![no_discard_pmfm()])];
        if allow_discard {
            rules.push(
                Rule::new("discard", data_value("model"), RuleOperator::Eq)
                    .with_value(qv_ids::DISCARD.to_string())
                    .when(vec![no_landing_pmfm()]),
            );
            rules.push(
                Rule::new("discard-parent", data_value("parent"), RuleOperator::Eq)
                    .with_value(qv_ids::DISCARD.to_string())
                    .when(vec![no_landing_pmfm()]),
            );
        }
        rules
    }

    /// Structural defaults, applied before any extension rule.
    pub fn base_rules() -> Vec<ModelRule> {
        let leaf = BatchModelFilter {
            is_leaf: Some(true),
            ..BatchModelFilter::default()
        };
        vec![ModelRule::new(
            "leaf-defaults",
            leaf,
            ModelAction::DefaultState {
                state: BatchModelState {
                    show_weight: Some(true),
                    show_sampling_batch: Some(true),
                    sampling_batch_enabled: Some(true),
                    show_individual_count: Some(false),
                    ..BatchModelState::default()
                },
            },
        )]
    }

    /// Discard/landing rules.
    pub fn extension_rules(allow_discard: bool) -> Vec<ModelRule> {
        let discard = || {
            BatchModelFilter::default().with_value(pmfm_ids::DISCARD_OR_LANDING, PmfmValue::qv_id(qv_ids::DISCARD as i64))
        };
        let visible_leaf = BatchModelFilter {
            is_leaf: Some(true),
            hidden: Some(false),
            ..BatchModelFilter::default()
        };
        let leaf_inventory = ModelRule::new(
            "leaf-exhaustive-inventory",
            visible_leaf,
            ModelAction::DefaultState {
                state: BatchModelState {
                    show_exhaustive_inventory: Some(true),
                    ..BatchModelState::default()
                },
            },
        );

        if !allow_discard {
            return vec![ModelRule::new("no-discard", discard(), ModelAction::Remove), leaf_inventory];
        }

        let sorting = |qv: i32| {
            BatchModelFilter::default()
                .with_value(pmfm_ids::BATCH_SORTING, PmfmValue::qv_id(qv as i64))
                .with_parent(discard())
        };
        vec![
            ModelRule::new(
                "discard-branch",
                BatchModelFilter {
                    is_leaf: Some(false),
                    ..discard()
                },
                ModelAction::HideBranch,
            ),
            ModelRule::new("discard-bulk", sorting(qv_ids::BATCH_SORTING_BULK), ModelAction::EnableBulkSampling),
            ModelRule::new("discard-non-bulk", sorting(qv_ids::BATCH_SORTING_NON_BULK), ModelAction::ConfigureNonBulk),
            ModelRule::new(
                "discard-non-bulk-children",
                sorting(qv_ids::BATCH_SORTING_NON_BULK),
                ModelAction::HideChildrenPmfms {
                    pmfm_ids: pmfm_ids::SAMPLING_ONLY.to_vec(),
                },
            ),
            leaf_inventory,
        ]
    }

    /// Apply `rules` in order. A node removed by an earlier rule is skipped.
    pub fn apply(tree: &mut BatchModelTree, rules: &[ModelRule]) -> Result<()> {
        for rule in rules {
            let matching = BatchModelUtils::find_by_filter(tree, &rule.filter);
            if !matching.is_empty() {
                tracing::debug!(rule = %rule.label, count = matching.len(), "applying model rule");
            }
            for node in matching {
                if tree.contains(node) {
                    apply_action(tree, node, &rule.action)?;
                }
            }
        }
        Ok(())
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn apply_action(tree: &mut BatchModelTree, node: NodeId, action: &ModelAction) -> Result<()> {
    match action {
        ModelAction::HideBranch => {
            let name = {
                let model = tree.node_mut(node)?;
                model.pmfms.clear();
                model.state.required_weight = Some(false);
                model.hidden = true;
                model.name.clone()
            };
            for child in tree.children(node) {
                let child_model = tree.node_mut(child)?;
                child_model.name = format!("{name}, {}", child_model.name);
            }
        }
        ModelAction::EnableBulkSampling => {
            tree.node_mut(node)?.state.overlay(&BatchModelState {
                show_weight: Some(true),
                required_weight: Some(true),
                show_sampling_batch: Some(true),
                sampling_batch_enabled: Some(true),
                show_sample_weight: Some(true),
                required_sample_weight: Some(true),
                ..BatchModelState::default()
            });
        }
        ModelAction::ConfigureNonBulk => {
            let model = tree.node_mut(node)?;
            model.state.overlay(&BatchModelState {
                show_weight: Some(true),
                show_sampling_batch: Some(false),
                sampling_batch_enabled: Some(false),
                show_exhaustive_inventory: Some(false),
                ..BatchModelState::default()
            });
            model.original_data.exhaustive_inventory = Some(true);
        }
        ModelAction::HideChildrenPmfms { pmfm_ids: ids } => {
            let hide = |pmfms: &mut Vec<Pmfm>| {
                for pmfm in pmfms.iter_mut().filter(|p| ids.contains(&p.id)) {
                    pmfm.hidden = true;
                }
            };
            hide(&mut tree.node_mut(node)?.children_pmfms);
            for child in tree.children(node) {
                hide(&mut tree.node_mut(child)?.pmfms);
            }
        }
        ModelAction::SetState { state } => tree.node_mut(node)?.state.overlay(state),
        ModelAction::DefaultState { state } => tree.node_mut(node)?.state.fill_defaults(state),
        ModelAction::Remove => {
            if tree.root() == Some(node) {
                return Err(BatchError::InvalidRule("cannot remove the root model node".to_string()));
            }
            tree.remove_subtree(node);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_model::CreateModelOptions;
    use crate::pmfm::PmfmType;
    use crate::referential::ReferentialRef;
    use serde_json::json;

    fn sorting_pmfms() -> Vec<Pmfm> {
        vec![
            Pmfm::qualitative(
                pmfm_ids::DISCARD_OR_LANDING,
                "DISCARD_OR_LANDING",
                vec![
                    ReferentialRef::new(qv_ids::LANDING as i64, "LAN", "Landing"),
                    ReferentialRef::new(qv_ids::DISCARD as i64, "DIS", "Discard"),
                ],
            ),
            Pmfm::new(pmfm_ids::DRESSING, "DRESSING", PmfmType::String),
            Pmfm::qualitative(
                pmfm_ids::BATCH_SORTING,
                "BATCH_SORTING",
                vec![
                    ReferentialRef::new(qv_ids::BATCH_SORTING_BULK as i64, "VRAC", "Bulk"),
                    ReferentialRef::new(qv_ids::BATCH_SORTING_NON_BULK as i64, "H-VRAC", "Non bulk"),
                ],
            ),
            Pmfm::weight(pmfm_ids::BATCH_MEASURED_WEIGHT, "BATCH_MEASURED_WEIGHT", 1),
        ]
    }

    fn build(allow_discard: bool) -> BatchModelTree {
        let opts = CreateModelOptions {
            sorting_pmfms: sorting_pmfms(),
            allow_discard,
            ..CreateModelOptions::default()
        };
        BatchModelUtils::create_model(None, &opts).unwrap()
    }

    fn node(tree: &BatchModelTree, path: &str) -> NodeId {
        BatchModelUtils::find_by_path(tree, path).unwrap()
    }

    #[test]
    fn discard_branch_is_hidden_and_children_renamed() {
        let tree = build(true);
        let discard = tree.get(node(&tree, "children.1")).unwrap();
        assert!(discard.hidden);
        assert!(discard.disabled);
        assert!(discard.pmfms.is_empty());

        let bulk = tree.get(node(&tree, "children.1.children.0")).unwrap();
        assert_eq!(bulk.name, "Discard, Bulk");
        assert_eq!(bulk.state.required_sample_weight, Some(true));
        assert_eq!(bulk.state.sampling_batch_enabled, Some(true));

        let non_bulk = tree.get(node(&tree, "children.1.children.1")).unwrap();
        assert_eq!(non_bulk.state.sampling_batch_enabled, Some(false));
        assert_eq!(non_bulk.state.show_exhaustive_inventory, Some(false));
        assert_eq!(non_bulk.original_data.exhaustive_inventory, Some(true));
    }

    #[test]
    fn landing_and_discard_pmfms_are_separated() {
        let tree = build(true);
        let landing = tree.get(node(&tree, "children.0")).unwrap();
        assert!(landing.is_leaf);
        assert!(landing.pmfms.iter().any(|p| p.id == pmfm_ids::DRESSING));
        assert!(!landing.pmfms.iter().any(|p| p.id == pmfm_ids::BATCH_SORTING));
        assert_eq!(landing.state.show_exhaustive_inventory, Some(true));

        let bulk = tree.get(node(&tree, "children.1.children.0")).unwrap();
        assert!(!bulk.pmfms.iter().any(|p| p.id == pmfm_ids::DRESSING));
        assert!(bulk.pmfms.iter().any(|p| p.id == pmfm_ids::BATCH_MEASURED_WEIGHT));
    }

    #[test]
    fn discard_removed_when_not_allowed() {
        let tree = build(false);
        assert_eq!(tree.len(), 2);
        let root = tree.get(tree.root().unwrap()).unwrap();
        assert!(root.hidden);
        assert!(root.disabled);
    }

    #[test]
    fn hide_children_pmfms() {
        let mut tree = build(true);
        let discard = node(&tree, "children.1");
        let rule = ModelRule::new(
            "hide-weight",
            BatchModelFilter::default().with_value(pmfm_ids::DISCARD_OR_LANDING, PmfmValue::qv_id(qv_ids::DISCARD as i64)),
            ModelAction::HideChildrenPmfms {
                pmfm_ids: vec![pmfm_ids::BATCH_MEASURED_WEIGHT],
            },
        );
        BatchModelRules::apply(&mut tree, &[rule]).unwrap();
        for child in tree.children(discard) {
            let weight = tree.get(child).unwrap().pmfms.iter().find(|p| p.id == pmfm_ids::BATCH_MEASURED_WEIGHT);
            assert!(weight.is_some_and(|p| p.hidden));
        }
    }

    #[test]
    fn rules_deserialize_from_json() {
        let rule: ModelRule = serde_json::from_value(json!({
            "label": "bulk",
            "filter": { "measurementValues": { "176": "390" }, "isLeaf": true },
            "action": "setState",
            "state": { "showWeight": false }
        }))
        .unwrap();
        assert_eq!(rule.filter.is_leaf, Some(true));
        assert!(matches!(rule.action, ModelAction::SetState { ref state } if state.show_weight == Some(false)));
    }
}

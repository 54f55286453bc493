use catch_batch::batch_model::BatchModelState;
use catch_batch::model_rules::{ModelAction, ModelRule};
use catch_batch::pmfm::PmfmType;
use catch_batch::referential::ReferentialRef;
use catch_batch::rule::{Rule, RuleOperator};
use catch_batch::schema::{method_ids, pmfm_ids, qv_ids};
use catch_batch::{
    Batch, BatchModel, BatchModelFilter, BatchModelUtils, CreateModelOptions, Pmfm, PmfmValue, ProgramConfig, Tree,
};

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

#[test]
fn model_nodes_wrap_existing_batches() {
    let mut data = Tree::with_root(Batch::new("CATCH_BATCH", 1).with_id(1));
    let root = data.root().unwrap();
    let mut landing = Batch::new("SORTING_BATCH#LAN", 1).with_id(10);
    landing.set_measurement(pmfm_ids::DISCARD_OR_LANDING, Some(PmfmValue::qv_id(qv_ids::LANDING as i64)));
    data.add_child(root, landing).unwrap();

    let opts = CreateModelOptions {
        sorting_pmfms: sorting_pmfms(),
        ..CreateModelOptions::default()
    };
    let model = BatchModelUtils::create_model(Some(&data), &opts).unwrap();

    let root = model.get(model.root().unwrap()).unwrap();
    assert_eq!(root.original_data.id, Some(1));
    assert_eq!(root.name, "Catch");

    let landing = model.get(BatchModelUtils::find_by_path(&model, "children.0").unwrap()).unwrap();
    assert_eq!(landing.original_data.id, Some(10));
    assert_eq!(landing.name, "Landing");

    let discard = model.get(BatchModelUtils::find_by_path(&model, "children.1").unwrap()).unwrap();
    assert_eq!(discard.original_data.id, None);
    assert_eq!(discard.original_data.label, "SORTING_BATCH#DIS");
}

#[test]
fn program_without_discard_keeps_the_landing_branch_only() {
    let config = ProgramConfig::from_json_str(r#"{"allowDiscard": false}"#).unwrap();
    let opts = CreateModelOptions::from_config(&config, Vec::new(), sorting_pmfms());
    let model = BatchModelUtils::create_model(None, &opts).unwrap();

    let discard = BatchModelFilter::default()
        .with_value(pmfm_ids::DISCARD_OR_LANDING, PmfmValue::qv_id(qv_ids::DISCARD as i64));
    assert!(BatchModelUtils::find_by_filter(&model, &discard).is_empty());
    let landing = BatchModelUtils::find_by_path(&model, "children.0").unwrap();
    assert!(model.get(landing).unwrap().is_leaf);
}

#[test]
fn extra_pmfm_rules_filter_every_node() {
    let opts = CreateModelOptions {
        sorting_pmfms: sorting_pmfms(),
        rules: vec![Rule::new("no-dressing", "pmfm.id", RuleOperator::NotEq).with_value(pmfm_ids::DRESSING)],
        ..CreateModelOptions::default()
    };
    let model = BatchModelUtils::create_model(None, &opts).unwrap();
    for node in model.iter_preorder() {
        let pmfms = &model.get(node).unwrap().pmfms;
        assert!(pmfms.iter().all(|p| p.id != pmfm_ids::DRESSING));
    }
}

#[test]
fn custom_model_rules_replace_the_defaults() {
    let leaves = BatchModelFilter {
        is_leaf: Some(true),
        ..BatchModelFilter::default()
    };
    let opts = CreateModelOptions {
        sorting_pmfms: sorting_pmfms(),
        model_rules: Some(vec![ModelRule::new(
            "no-individual-count",
            leaves.clone(),
            ModelAction::SetState {
                state: BatchModelState {
                    show_individual_count: Some(true),
                    ..BatchModelState::default()
                },
            },
        )]),
        ..CreateModelOptions::default()
    };
    let model = BatchModelUtils::create_model(None, &opts).unwrap();

    let discard = model.get(BatchModelUtils::find_by_path(&model, "children.1").unwrap()).unwrap();
    assert!(!discard.hidden, "default discard rules are not applied");
    for node in BatchModelUtils::find_by_filter(&model, &leaves) {
        let state = &model.get(node).unwrap().state;
        assert_eq!(state.show_individual_count, Some(true));
        assert_eq!(state.show_weight, Some(true));
    }
}

#[test]
fn discard_non_bulk_children_hide_the_sampling_weight() {
    let mut pmfms = sorting_pmfms();
    pmfms.insert(
        3,
        Pmfm::qualitative(
            pmfm_ids::SEX,
            "SEX",
            vec![ReferentialRef::new(186, "M", "Male"), ReferentialRef::new(187, "F", "Female")],
        ),
    );
    pmfms.push(Pmfm::weight(
        pmfm_ids::BATCH_CALCULATED_WEIGHT_LENGTH_SUM,
        "BATCH_CALCULATED_WEIGHT_LENGTH_SUM",
        method_ids::CALCULATED_WEIGHT_LENGTH_SUM,
    ));
    let opts = CreateModelOptions {
        sorting_pmfms: pmfms,
        max_tree_depth: 2,
        ..CreateModelOptions::default()
    };
    let model = BatchModelUtils::create_model(None, &opts).unwrap();

    let sorting = |branch: i32, sorting_qv: i32| {
        let filter = BatchModelFilter::default()
            .with_value(pmfm_ids::BATCH_SORTING, PmfmValue::qv_id(sorting_qv as i64))
            .with_parent(
                BatchModelFilter::default().with_value(pmfm_ids::DISCARD_OR_LANDING, PmfmValue::qv_id(branch as i64)),
            );
        let nodes = BatchModelUtils::find_by_filter(&model, &filter);
        assert_eq!(nodes.len(), 1);
        model.get(nodes[0]).unwrap()
    };
    let wl_sum_hidden = |node: &BatchModel| {
        node.children_pmfms
            .iter()
            .find(|p| p.id == pmfm_ids::BATCH_CALCULATED_WEIGHT_LENGTH_SUM)
            .map(|p| p.hidden)
    };

    let discard_non_bulk = sorting(qv_ids::DISCARD, qv_ids::BATCH_SORTING_NON_BULK);
    assert_eq!(wl_sum_hidden(discard_non_bulk), Some(true));
    let measured = discard_non_bulk
        .children_pmfms
        .iter()
        .find(|p| p.id == pmfm_ids::BATCH_MEASURED_WEIGHT);
    assert!(measured.is_some_and(|p| !p.hidden));

    assert_eq!(wl_sum_hidden(sorting(qv_ids::DISCARD, qv_ids::BATCH_SORTING_BULK)), Some(false));
}

#[test]
fn model_tree_logs_one_line_per_node() {
    let opts = CreateModelOptions {
        sorting_pmfms: sorting_pmfms(),
        ..CreateModelOptions::default()
    };
    let model = BatchModelUtils::create_model(None, &opts).unwrap();
    let text = BatchModelUtils::log_tree(&model);
    assert_eq!(text.lines().count(), model.len());
    assert!(text.lines().next().unwrap().starts_with(" - Catch"));
}

/// Reference identifiers and column names for the batch engine.
/// Single source of truth - exported to Python via PyO3.

// ── Acquisition levels ──────────────────────────────────────────────────────
pub mod acquisition_level {
    pub const CATCH_BATCH: &str = "CATCH_BATCH";
    pub const SORTING_BATCH: &str = "SORTING_BATCH";
    pub const SORTING_BATCH_INDIVIDUAL: &str = "SORTING_BATCH_INDIVIDUAL";
}

// ── Batch labels ────────────────────────────────────────────────────────────
pub mod labels {
    /// Suffix of the sampling child label (`<parentLabel>.%`).
    pub const SAMPLING_BATCH_SUFFIX: &str = ".%";
    pub const LEVEL_SEPARATOR: char = '#';
    pub const CHILD_SEPARATOR: char = '.';
}

// ── PMFM ids ────────────────────────────────────────────────────────────────
pub mod pmfm_ids {
    pub const SEX: i32 = 80;
    pub const LENGTH_TOTAL_CM: i32 = 81;
    pub const DISCARD_OR_LANDING: i32 = 90;
    pub const BATCH_MEASURED_WEIGHT: i32 = 91;
    pub const BATCH_ESTIMATED_WEIGHT: i32 = 92;
    pub const BATCH_CALCULATED_WEIGHT: i32 = 93;
    pub const DISCARD_REASON: i32 = 95;
    pub const BATCH_CALCULATED_WEIGHT_LENGTH: i32 = 122;
    pub const BATCH_CALCULATED_WEIGHT_LENGTH_SUM: i32 = 123;
    pub const PRESERVATION: i32 = 150;
    pub const DRESSING: i32 = 151;
    pub const BATCH_SORTING: i32 = 176;
    pub const CHILD_GEAR: i32 = 400;
    pub const BATCH_GEAR_POSITION: i32 = 411;
    pub const TRAWL_SIZE_CAT: i32 = 418;

    /// PMFMs only meaningful on the discard branch.
    pub const DISCARD_ONLY: [i32; 2] = [DISCARD_REASON, BATCH_SORTING];
    /// PMFMs only meaningful on the landing branch.
    pub const LANDING_ONLY: [i32; 3] = [DRESSING, PRESERVATION, TRAWL_SIZE_CAT];
    /// PMFMs only meaningful under a sampling batch.
    pub const SAMPLING_ONLY: [i32; 1] = [BATCH_CALCULATED_WEIGHT_LENGTH_SUM];
}

// ── Qualitative values ──────────────────────────────────────────────────────
pub mod qv_ids {
    pub const SEX_UNSEXED: i32 = 188;
    pub const LANDING: i32 = 190;
    pub const DISCARD: i32 = 191;
    pub const SIZE_UNLI_CAT_NONE: i32 = 319;
    pub const PRESERVATION_FRESH: i32 = 332;
    pub const DRESSING_WHOLE: i32 = 381;
    pub const BATCH_SORTING_BULK: i32 = 390;
    pub const BATCH_SORTING_NON_BULK: i32 = 391;
    pub const GEAR_POSITION_PORT: i32 = 473;
    pub const GEAR_POSITION_STARBOARD: i32 = 474;

    pub const LANDING_LABEL: &str = "LAN";
    pub const DISCARD_LABEL: &str = "DIS";
}

// ── Methods ─────────────────────────────────────────────────────────────────
pub mod method_ids {
    pub const MEASURED_BY_OBSERVER: i32 = 1;
    pub const OBSERVED_BY_OBSERVER: i32 = 2;
    pub const ESTIMATED_BY_OBSERVER: i32 = 3;
    pub const CALCULATED: i32 = 4;
    pub const CALCULATED_WEIGHT_LENGTH: i32 = 47;
    pub const CALCULATED_WEIGHT_LENGTH_SUM: i32 = 283;

    pub const CALCULATED_GROUP: [i32; 3] =
        [CALCULATED, CALCULATED_WEIGHT_LENGTH, CALCULATED_WEIGHT_LENGTH_SUM];
}

// ── Quality flags ───────────────────────────────────────────────────────────
pub mod quality_flags {
    pub const NOT_QUALIFIED: i32 = 0;
    pub const BAD: i32 = 4;
}

// ── Units ───────────────────────────────────────────────────────────────────
pub mod units {
    /// Weight units and their factor to kilograms.
    pub const WEIGHT_TO_KG: [(&str, f64); 4] =
        [("t", 1000.0), ("kg", 1.0), ("g", 0.001), ("mg", 0.000_001)];
    /// Length units and their factor to meters.
    pub const LENGTH_TO_M: [(&str, f64); 5] = [
        ("km", 1000.0),
        ("m", 1.0),
        ("dm", 0.1),
        ("cm", 0.01),
        ("mm", 0.001),
    ];

    pub const DEFAULT_WEIGHT_UNIT: &str = "kg";
}

// ── Flat batch frame columns ────────────────────────────────────────────────
pub mod batch_columns {
    pub const ID: &str = "id";
    pub const PARENT_ID: &str = "parent_id";
    pub const OPERATION_ID: &str = "operation_id";
    pub const SALE_ID: &str = "sale_id";
    pub const LABEL: &str = "label";
    pub const RANK_ORDER: &str = "rank_order";
    pub const EXHAUSTIVE_INVENTORY: &str = "exhaustive_inventory";
    pub const INDIVIDUAL_COUNT: &str = "individual_count";
    pub const SAMPLING_RATIO: &str = "sampling_ratio";
    pub const SAMPLING_RATIO_TEXT: &str = "sampling_ratio_text";
    pub const SAMPLING_RATIO_COMPUTED: &str = "sampling_ratio_computed";
    pub const TAXON_GROUP_ID: &str = "taxon_group_id";
    pub const TAXON_GROUP_LABEL: &str = "taxon_group_label";
    pub const TAXON_GROUP_NAME: &str = "taxon_group_name";
    pub const TAXON_NAME_ID: &str = "taxon_name_id";
    pub const TAXON_NAME_LABEL: &str = "taxon_name_label";
    pub const TAXON_NAME_NAME: &str = "taxon_name_name";
    pub const TAXON_NAME_REFERENCE_TAXON_ID: &str = "taxon_name_reference_taxon_id";
    pub const WEIGHT: &str = "weight";
    pub const WEIGHT_METHOD_ID: &str = "weight_method_id";
    pub const WEIGHT_COMPUTED: &str = "weight_computed";
    pub const WEIGHT_ESTIMATED: &str = "weight_estimated";
    pub const CHILDREN_WEIGHT: &str = "children_weight";
    pub const CHILDREN_WEIGHT_METHOD_ID: &str = "children_weight_method_id";
    pub const CHILDREN_WEIGHT_COMPUTED: &str = "children_weight_computed";
    pub const CHILDREN_WEIGHT_ESTIMATED: &str = "children_weight_estimated";
    pub const QUALITY_FLAG_ID: &str = "quality_flag_id";
    pub const COMMENTS: &str = "comments";
    /// JSON of the batch kind (group, sub-batch); null for plain batches.
    pub const KIND: &str = "kind";

    /// Prefix of the per-measurement string columns (`pmfm_<id>`).
    pub const PMFM_PREFIX: &str = "pmfm_";
}

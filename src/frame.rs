//! Flat batch array as a polars `DataFrame`: one row per batch, fixed
//! columns plus one `pmfm_<id>` string column per measurement key.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use polars::prelude::*;

use crate::batch::{Batch, BatchWeight};
use crate::error::{BatchError, Result};
use crate::measurement::PmfmValue;
use crate::referential::ReferentialRef;
use crate::schema::{batch_columns, method_ids};

pub fn batches_to_frame(batches: &[Batch]) -> Result<DataFrame> {
    let ids: Vec<Option<i64>> = batches.iter().map(|b| b.id).collect();
    let parent_ids: Vec<Option<i64>> = batches.iter().map(|b| b.parent_id).collect();
    let operation_ids: Vec<Option<i64>> = batches.iter().map(|b| b.operation_id).collect();
    let sale_ids: Vec<Option<i64>> = batches.iter().map(|b| b.sale_id).collect();
    let labels: Vec<&str> = batches.iter().map(|b| b.label.as_str()).collect();
    let rank_orders: Vec<Option<i32>> = batches.iter().map(|b| b.rank_order).collect();
    let exhaustive: Vec<Option<bool>> = batches.iter().map(|b| b.exhaustive_inventory).collect();
    let counts: Vec<Option<i64>> = batches.iter().map(|b| b.individual_count).collect();
    let ratios: Vec<Option<f64>> = batches.iter().map(|b| b.sampling_ratio).collect();
    let ratio_texts: Vec<Option<&str>> = batches.iter().map(|b| b.sampling_ratio_text.as_deref()).collect();
    let ratio_computed: Vec<bool> = batches.iter().map(|b| b.sampling_ratio_computed).collect();
    let quality_flags: Vec<Option<i32>> = batches.iter().map(|b| b.quality_flag_id).collect();
    let comments: Vec<Option<&str>> = batches.iter().map(|b| b.comments.as_deref()).collect();
    let kinds = batches
        .iter()
        .map(|b| if b.kind.is_plain() { Ok(None) } else { serde_json::to_string(&b.kind).map(Some) })
        .collect::<std::result::Result<Vec<Option<String>>, _>>()?;
    let kinds: Vec<Option<&str>> = kinds.iter().map(|k| k.as_deref()).collect();

    let mut columns = vec![
        Column::new(batch_columns::ID.into(), &ids),
        Column::new(batch_columns::PARENT_ID.into(), &parent_ids),
        Column::new(batch_columns::OPERATION_ID.into(), &operation_ids),
        Column::new(batch_columns::SALE_ID.into(), &sale_ids),
        Column::new(batch_columns::LABEL.into(), &labels),
        Column::new(batch_columns::RANK_ORDER.into(), &rank_orders),
        Column::new(batch_columns::EXHAUSTIVE_INVENTORY.into(), &exhaustive),
        Column::new(batch_columns::INDIVIDUAL_COUNT.into(), &counts),
        Column::new(batch_columns::SAMPLING_RATIO.into(), &ratios),
        Column::new(batch_columns::SAMPLING_RATIO_TEXT.into(), &ratio_texts),
        Column::new(batch_columns::SAMPLING_RATIO_COMPUTED.into(), &ratio_computed),
    ];
    columns.extend(TAXON_GROUP.to_columns(batches.iter().map(|b| b.taxon_group.as_ref())));
    columns.extend(TAXON_NAME.to_columns(batches.iter().map(|b| b.taxon_name.as_ref())));
    columns.extend(WEIGHT.to_columns(batches.iter().map(|b| b.weight.as_ref())));
    columns.extend(CHILDREN_WEIGHT.to_columns(batches.iter().map(|b| b.children_weight.as_ref())));
    columns.push(Column::new(batch_columns::QUALITY_FLAG_ID.into(), &quality_flags));
    columns.push(Column::new(batch_columns::COMMENTS.into(), &comments));
    columns.push(Column::new(batch_columns::KIND.into(), &kinds));

    let pmfm_keys: BTreeSet<&str> = batches
        .iter()
        .flat_map(|b| b.measurement_values.keys().map(String::as_str))
        .collect();
    for key in pmfm_keys {
        let values: Vec<Option<String>> = batches
            .iter()
            .map(|b| b.measurement_values.get(key).map(PmfmValue::comparable))
            .collect();
        let values: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
        columns.push(Column::new(format!("{}{key}", batch_columns::PMFM_PREFIX).into(), &values));
    }

    Ok(DataFrame::new(columns)?)
}

/// Rebuild the flat array. Columns may hold any dtype castable to string;
/// only `label` is required.
pub fn batches_from_frame(df: &DataFrame) -> Result<Vec<Batch>> {
    let label = string_column(df, batch_columns::LABEL)?
        .ok_or_else(|| BatchError::MissingColumn(batch_columns::LABEL.to_string()))?;
    let optional = |name: &str| string_column(df, name);
    let id = optional(batch_columns::ID)?;
    let parent_id = optional(batch_columns::PARENT_ID)?;
    let operation_id = optional(batch_columns::OPERATION_ID)?;
    let sale_id = optional(batch_columns::SALE_ID)?;
    let rank_order = optional(batch_columns::RANK_ORDER)?;
    let exhaustive = optional(batch_columns::EXHAUSTIVE_INVENTORY)?;
    let count = optional(batch_columns::INDIVIDUAL_COUNT)?;
    let ratio = optional(batch_columns::SAMPLING_RATIO)?;
    let ratio_text = optional(batch_columns::SAMPLING_RATIO_TEXT)?;
    let ratio_computed = optional(batch_columns::SAMPLING_RATIO_COMPUTED)?;
    let quality_flag = optional(batch_columns::QUALITY_FLAG_ID)?;
    let comments = optional(batch_columns::COMMENTS)?;
    let kind = optional(batch_columns::KIND)?;
    let taxon_group = TAXON_GROUP.read(df)?;
    let taxon_name = TAXON_NAME.read(df)?;
    let weight = WEIGHT.read(df)?;
    let children_weight = CHILDREN_WEIGHT.read(df)?;

    let mut pmfm_columns = Vec::new();
    for name in df.get_column_names_str() {
        if let Some(key) = name.strip_prefix(batch_columns::PMFM_PREFIX) {
            if let Some(column) = string_column(df, name)? {
                pmfm_columns.push((key.to_string(), column));
            }
        }
    }

    let mut batches = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row_label = cell(Some(&label), i)?;
        let mut batch = Batch {
            id: parse(cell(id.as_ref(), i)?, i, batch_columns::ID)?,
            parent_id: parse(cell(parent_id.as_ref(), i)?, i, batch_columns::PARENT_ID)?,
            operation_id: parse(cell(operation_id.as_ref(), i)?, i, batch_columns::OPERATION_ID)?,
            sale_id: parse(cell(sale_id.as_ref(), i)?, i, batch_columns::SALE_ID)?,
            label: row_label.unwrap_or_default().to_string(),
            rank_order: parse(cell(rank_order.as_ref(), i)?, i, batch_columns::RANK_ORDER)?,
            exhaustive_inventory: parse(cell(exhaustive.as_ref(), i)?, i, batch_columns::EXHAUSTIVE_INVENTORY)?,
            individual_count: parse(cell(count.as_ref(), i)?, i, batch_columns::INDIVIDUAL_COUNT)?,
            sampling_ratio: parse(cell(ratio.as_ref(), i)?, i, batch_columns::SAMPLING_RATIO)?,
            sampling_ratio_text: cell(ratio_text.as_ref(), i)?.map(str::to_string),
            sampling_ratio_computed: parse(cell(ratio_computed.as_ref(), i)?, i, batch_columns::SAMPLING_RATIO_COMPUTED)?
                .unwrap_or(false),
            taxon_group: taxon_group.at(i)?,
            taxon_name: taxon_name.at(i)?,
            weight: weight.at(i)?,
            children_weight: children_weight.at(i)?,
            quality_flag_id: parse(cell(quality_flag.as_ref(), i)?, i, batch_columns::QUALITY_FLAG_ID)?,
            comments: cell(comments.as_ref(), i)?.map(str::to_string),
            ..Batch::default()
        };
        if let Some(json) = cell(kind.as_ref(), i)? {
            batch.kind = serde_json::from_str(json).map_err(|e| {
                BatchError::InvalidData(format!("Cannot parse '{json}' in column {} at row {i}: {e}", batch_columns::KIND))
            })?;
        }

        for (key, column) in &pmfm_columns {
            if let Some(value) = cell(Some(column), i)? {
                batch.measurement_values.insert(key.clone(), PmfmValue::text(value));
            }
        }
        batches.push(batch);
    }
    Ok(batches)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = create_file(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Read a CSV with every column as String.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = create_file(path)?;
    ParquetWriter::new(&mut file).finish(df)?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|e| BatchError::InvalidData(format!("{}: {e}", path.display())))?;
    Ok(ParquetReader::new(file).finish()?)
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn create_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| BatchError::InvalidData(format!("{}: {e}", path.display())))
}

fn string_column(df: &DataFrame, name: &str) -> Result<Option<Column>> {
    match df.column(name) {
        Ok(column) => Ok(Some(column.cast(&DataType::String)?)),
        Err(_) => Ok(None),
    }
}

fn cell(column: Option<&Column>, row: usize) -> Result<Option<&str>> {
    match column {
        Some(column) => Ok(column.str()?.get(row).map(str::trim).filter(|s| !s.is_empty())),
        None => Ok(None),
    }
}

fn parse<T: std::str::FromStr>(value: Option<&str>, row: usize, column: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| BatchError::InvalidData(format!("Cannot parse '{v}' in column {column} at row {row}")))
        })
        .transpose()
}

/// Column names of one referential field.
struct RefColumns {
    id: &'static str,
    label: &'static str,
    name: &'static str,
    reference_taxon_id: Option<&'static str>,
}

static TAXON_GROUP: RefColumns = RefColumns {
    id: batch_columns::TAXON_GROUP_ID,
    label: batch_columns::TAXON_GROUP_LABEL,
    name: batch_columns::TAXON_GROUP_NAME,
    reference_taxon_id: None,
};

static TAXON_NAME: RefColumns = RefColumns {
    id: batch_columns::TAXON_NAME_ID,
    label: batch_columns::TAXON_NAME_LABEL,
    name: batch_columns::TAXON_NAME_NAME,
    reference_taxon_id: Some(batch_columns::TAXON_NAME_REFERENCE_TAXON_ID),
};

impl RefColumns {
    fn to_columns<'a>(&self, refs: impl Iterator<Item = Option<&'a ReferentialRef>>) -> Vec<Column> {
        let refs: Vec<Option<&ReferentialRef>> = refs.collect();
        let ids: Vec<Option<i64>> = refs.iter().map(|r| r.map(|r| r.id)).collect();
        let labels: Vec<Option<&str>> = refs.iter().map(|r| r.map(|r| r.label.as_str())).collect();
        let names: Vec<Option<&str>> = refs.iter().map(|r| r.and_then(|r| r.name.as_deref())).collect();
        let mut columns = vec![
            Column::new(self.id.into(), &ids),
            Column::new(self.label.into(), &labels),
            Column::new(self.name.into(), &names),
        ];
        if let Some(column) = self.reference_taxon_id {
            let reference_ids: Vec<Option<i64>> = refs.iter().map(|r| r.and_then(|r| r.reference_taxon_id)).collect();
            columns.push(Column::new(column.into(), &reference_ids));
        }
        columns
    }

    fn read(&self, df: &DataFrame) -> Result<RefCells<'_>> {
        Ok(RefCells {
            names: self,
            id: string_column(df, self.id)?,
            label: string_column(df, self.label)?,
            name: string_column(df, self.name)?,
            reference_taxon_id: match self.reference_taxon_id {
                Some(column) => string_column(df, column)?,
                None => None,
            },
        })
    }
}

struct RefCells<'a> {
    names: &'a RefColumns,
    id: Option<Column>,
    label: Option<Column>,
    name: Option<Column>,
    reference_taxon_id: Option<Column>,
}

impl RefCells<'_> {
    /// A reference exists when its id cell is set.
    fn at(&self, row: usize) -> Result<Option<ReferentialRef>> {
        let Some(id) = parse::<i64>(cell(self.id.as_ref(), row)?, row, self.names.id)? else {
            return Ok(None);
        };
        let reference_taxon_id = match self.names.reference_taxon_id {
            Some(column) => parse(cell(self.reference_taxon_id.as_ref(), row)?, row, column)?,
            None => None,
        };
        Ok(Some(ReferentialRef {
            id,
            label: cell(self.label.as_ref(), row)?.unwrap_or_default().to_string(),
            name: cell(self.name.as_ref(), row)?.map(str::to_string),
            reference_taxon_id,
        }))
    }
}

/// Column names of one weight field.
struct WeightColumns {
    value: &'static str,
    method_id: &'static str,
    computed: &'static str,
    estimated: &'static str,
}

static WEIGHT: WeightColumns = WeightColumns {
    value: batch_columns::WEIGHT,
    method_id: batch_columns::WEIGHT_METHOD_ID,
    computed: batch_columns::WEIGHT_COMPUTED,
    estimated: batch_columns::WEIGHT_ESTIMATED,
};

static CHILDREN_WEIGHT: WeightColumns = WeightColumns {
    value: batch_columns::CHILDREN_WEIGHT,
    method_id: batch_columns::CHILDREN_WEIGHT_METHOD_ID,
    computed: batch_columns::CHILDREN_WEIGHT_COMPUTED,
    estimated: batch_columns::CHILDREN_WEIGHT_ESTIMATED,
};

impl WeightColumns {
    /// `computed` and `estimated` are written for every present weight, so a
    /// weight without value still comes back.
    fn to_columns<'a>(&self, weights: impl Iterator<Item = Option<&'a BatchWeight>>) -> Vec<Column> {
        let weights: Vec<Option<&BatchWeight>> = weights.collect();
        let values: Vec<Option<f64>> = weights.iter().map(|w| w.and_then(|w| w.value)).collect();
        let methods: Vec<Option<i32>> = weights.iter().map(|w| w.and_then(|w| w.method_id)).collect();
        let computed: Vec<Option<bool>> = weights.iter().map(|w| w.map(|w| w.computed)).collect();
        let estimated: Vec<Option<bool>> = weights.iter().map(|w| w.map(|w| w.estimated)).collect();
        vec![
            Column::new(self.value.into(), &values),
            Column::new(self.method_id.into(), &methods),
            Column::new(self.computed.into(), &computed),
            Column::new(self.estimated.into(), &estimated),
        ]
    }

    fn read(&self, df: &DataFrame) -> Result<WeightCells<'_>> {
        Ok(WeightCells {
            names: self,
            value: string_column(df, self.value)?,
            method_id: string_column(df, self.method_id)?,
            computed: string_column(df, self.computed)?,
            estimated: string_column(df, self.estimated)?,
        })
    }
}

struct WeightCells<'a> {
    names: &'a WeightColumns,
    value: Option<Column>,
    method_id: Option<Column>,
    computed: Option<Column>,
    estimated: Option<Column>,
}

impl WeightCells<'_> {
    /// Missing flags fall back to the method: estimated by observer, or not computed.
    fn at(&self, row: usize) -> Result<Option<BatchWeight>> {
        let names = self.names;
        let value: Option<f64> = parse(cell(self.value.as_ref(), row)?, row, names.value)?;
        let method_id: Option<i32> = parse(cell(self.method_id.as_ref(), row)?, row, names.method_id)?;
        let computed: Option<bool> = parse(cell(self.computed.as_ref(), row)?, row, names.computed)?;
        let estimated: Option<bool> = parse(cell(self.estimated.as_ref(), row)?, row, names.estimated)?;
        if value.is_none() && method_id.is_none() && computed.is_none() && estimated.is_none() {
            return Ok(None);
        }
        Ok(Some(BatchWeight {
            value,
            method_id,
            computed: computed.unwrap_or(false),
            estimated: estimated.unwrap_or(method_id == Some(method_ids::ESTIMATED_BY_OBSERVER)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchKind, GroupLink};
    use crate::schema::{pmfm_ids, quality_flags};

    fn sample() -> Vec<Batch> {
        let root = Batch::new("CATCH_BATCH", 1).with_id(1);
        let mut group = Batch::new("SORTING_BATCH#1", 1).with_id(2);
        group.parent_id = Some(1);
        group.taxon_group = Some(ReferentialRef::new(10, "COD", "Cod"));
        group.weight = Some(BatchWeight::measured(12.5));
        group.set_measurement(pmfm_ids::DISCARD_OR_LANDING, Some(PmfmValue::qv_id(190)));
        let mut sampling = Batch::new("SORTING_BATCH#1.%", 1).with_id(3);
        sampling.parent_id = Some(2);
        sampling.sampling_ratio = Some(0.5);
        sampling.sampling_ratio_text = Some("50%".to_string());
        sampling.weight = Some(BatchWeight::calculated(6.25));
        vec![root, group, sampling]
    }

    #[test]
    fn frame_columns() {
        let df = batches_to_frame(&sample()).unwrap();
        assert_eq!(df.height(), 3);
        assert!(df.column("pmfm_90").is_ok());
        let weights = df.column(batch_columns::WEIGHT).unwrap().f64().unwrap();
        assert_eq!(weights.get(1), Some(12.5));
        assert_eq!(weights.get(0), None);
    }

    #[test]
    fn frame_round_trip_keeps_structure() {
        let df = batches_to_frame(&sample()).unwrap();
        let back = batches_from_frame(&df).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[1].parent_id, Some(1));
        assert_eq!(back[1].taxon_group.as_ref().map(|r| r.id), Some(10));
        assert_eq!(back[1].measurement(pmfm_ids::DISCARD_OR_LANDING), Some(&PmfmValue::text("190")));
        assert_eq!(back[2].sampling_ratio_text.as_deref(), Some("50%"));
        let weight = back[2].weight.as_ref().unwrap();
        assert_eq!(weight.value, Some(6.25));
        assert!(weight.computed);
        assert_eq!(weight.method_id, Some(method_ids::CALCULATED));
    }

    fn detailed_sample() -> Vec<Batch> {
        let mut batches = sample();
        for batch in &mut batches {
            batch.operation_id = Some(7);
        }
        let group = &mut batches[1];
        group.kind = BatchKind::Group {
            observed_individual_count: Some(3),
        };
        group.weight = Some(BatchWeight::estimated(12.5));
        group.children_weight = Some(BatchWeight::calculated(11.0));
        group.quality_flag_id = Some(quality_flags::BAD);
        group.comments = Some("torn net".to_string());
        batches[2].sampling_ratio_computed = true;

        let mut fish = Batch::new("SORTING_BATCH_INDIVIDUAL#1", 1).with_id(4);
        fish.parent_id = Some(3);
        fish.sale_id = Some(9);
        fish.taxon_name = Some(ReferentialRef::new(2001, "GADU MOR", "Gadus morhua").with_reference_taxon(1001));
        fish.individual_count = Some(2);
        fish.weight = Some(BatchWeight {
            value: None,
            ..BatchWeight::calculated(0.0)
        });
        fish.kind = BatchKind::SubBatch {
            parent_group: Some(GroupLink::of(&batches[1])),
        };
        fish.set_measurement(pmfm_ids::LENGTH_TOTAL_CM, Some(PmfmValue::text("42")));
        batches.push(fish);
        batches
    }

    #[test]
    fn frame_round_trip_is_lossless() {
        let original = detailed_sample();
        let back = batches_from_frame(&batches_to_frame(&original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn csv_round_trip_is_lossless() {
        let original = detailed_sample();
        let mut df = batches_to_frame(&original).unwrap();
        let path = std::env::temp_dir().join(format!("catch-batch-lossless-{}.csv", std::process::id()));
        write_csv(&mut df, &path).unwrap();
        let back = batches_from_frame(&read_csv(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, original);
    }

    #[test]
    fn string_frame_is_parsed() {
        let df = DataFrame::new(vec![
            Column::new(batch_columns::LABEL.into(), &["CATCH_BATCH", "SORTING_BATCH#1"]),
            Column::new(batch_columns::ID.into(), &["1", "2"]),
            Column::new(batch_columns::PARENT_ID.into(), &[None, Some("1")]),
            Column::new(batch_columns::INDIVIDUAL_COUNT.into(), &[None, Some(" 4 ")]),
        ])
        .unwrap();
        let batches = batches_from_frame(&df).unwrap();
        assert_eq!(batches[1].id, Some(2));
        assert_eq!(batches[1].parent_id, Some(1));
        assert_eq!(batches[1].individual_count, Some(4));
        assert_eq!(batches[0].parent_id, None);
    }

    #[test]
    fn bad_cell_is_reported() {
        let df = DataFrame::new(vec![
            Column::new(batch_columns::LABEL.into(), &["CATCH_BATCH"]),
            Column::new(batch_columns::ID.into(), &["one"]),
        ])
        .unwrap();
        let err = batches_from_frame(&df).unwrap_err();
        assert!(err.to_string().contains("column id at row 0"));
    }

    #[test]
    fn csv_round_trip() {
        let mut df = batches_to_frame(&sample()).unwrap();
        let path = std::env::temp_dir().join(format!("catch-batch-{}.csv", std::process::id()));
        write_csv(&mut df, &path).unwrap();
        let back = batches_from_frame(&read_csv(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.len(), 3);
        assert_eq!(back[1].weight.as_ref().and_then(|w| w.value), Some(12.5));
        assert_eq!(back[0].parent_id, None);
        assert_eq!(back[2].label, "SORTING_BATCH#1.%");
    }

    #[test]
    fn parquet_keeps_measurements() {
        let mut df = batches_to_frame(&sample()).unwrap();
        let path = std::env::temp_dir().join(format!("catch-batch-{}.parquet", std::process::id()));
        write_parquet(&mut df, &path).unwrap();
        let back = batches_from_frame(&read_parquet(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, batches_from_frame(&df).unwrap());
    }

    #[test]
    fn label_column_is_required() {
        let df = DataFrame::new(vec![Column::new(batch_columns::ID.into(), &[1i64])]).unwrap();
        assert!(matches!(batches_from_frame(&df), Err(BatchError::MissingColumn(_))));
    }
}

use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;
use serde_json::json;

use crate::batch::{Batch, FlattenOptions};
use crate::config::{ProgramConfig, SolverOptions};
use crate::error::{BatchError, Result};
use crate::frame;
use crate::group::BatchGroupUtils;
use crate::schema;
use crate::solver;

/// Flat JSON array to tree and back, validating ids.
#[pyfunction]
fn normalize_batches(batches_json: &str) -> PyResult<String> {
    let tree = parse_tree(batches_json)?;
    let flat = Batch::tree_as_object_array(&tree, &FlattenOptions::default())?;
    Ok(serde_json::to_string(&flat).map_err(BatchError::from)?)
}

/// Run the sampling solver over the whole tree.
///
/// Returns `{"batches": [...], "reports": [...]}`.
#[pyfunction]
#[pyo3(signature = (batches_json, config_json=None))]
fn solve(batches_json: &str, config_json: Option<&str>) -> PyResult<String> {
    let config = match config_json {
        Some(text) => ProgramConfig::from_json_str(text)?,
        None => ProgramConfig::default(),
    };
    let mut tree = parse_tree(batches_json)?;
    let reports = solver::solve_tree(&mut tree, &SolverOptions::from(&config))?;
    let flat = Batch::tree_as_object_array(&tree, &FlattenOptions { require_ids: false })?;
    let reports: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "label": r.label,
                "branch": r.branch.map(|b| format!("{b:?}")),
                "errors": r.errors,
            })
        })
        .collect();
    let out = json!({ "batches": flat, "reports": reports });
    Ok(out.to_string())
}

/// Species groups of the catch, as a JSON array.
#[pyfunction]
fn batch_groups(batches_json: &str) -> PyResult<String> {
    let mut tree = parse_tree(batches_json)?;
    let groups = BatchGroupUtils::from_batch_tree(&mut tree)?;
    let groups: Vec<&Batch> = groups.iter().filter_map(|g| tree.get(*g)).collect();
    Ok(serde_json::to_string(&groups).map_err(BatchError::from)?)
}

/// Flat JSON array as a DataFrame.
#[pyfunction]
fn batches_frame(batches_json: &str) -> PyResult<PyDataFrame> {
    let batches: Vec<Batch> = serde_json::from_str(batches_json).map_err(BatchError::from)?;
    Ok(PyDataFrame(frame::batches_to_frame(&batches)?))
}

/// DataFrame back to a flat JSON array.
#[pyfunction]
fn frame_batches(df: PyDataFrame) -> PyResult<String> {
    let batches = frame::batches_from_frame(&df.0)?;
    Ok(serde_json::to_string(&batches).map_err(BatchError::from)?)
}

fn parse_tree(batches_json: &str) -> Result<crate::batch::BatchTree> {
    let batches: Vec<Batch> = serde_json::from_str(batches_json)?;
    Batch::from_object_array_as_tree(batches).ok_or(BatchError::MissingRoot)
}

/// Export schema constants as Python submodules
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Acquisition levels
    let levels = PyModule::new(m.py(), "acquisition_level")?;
    levels.add("CATCH_BATCH", schema::acquisition_level::CATCH_BATCH)?;
    levels.add("SORTING_BATCH", schema::acquisition_level::SORTING_BATCH)?;
    levels.add(
        "SORTING_BATCH_INDIVIDUAL",
        schema::acquisition_level::SORTING_BATCH_INDIVIDUAL,
    )?;
    m.add_submodule(&levels)?;

    // PMFM ids
    let pmfm = PyModule::new(m.py(), "pmfm_ids")?;
    pmfm.add("SEX", schema::pmfm_ids::SEX)?;
    pmfm.add("LENGTH_TOTAL_CM", schema::pmfm_ids::LENGTH_TOTAL_CM)?;
    pmfm.add("DISCARD_OR_LANDING", schema::pmfm_ids::DISCARD_OR_LANDING)?;
    pmfm.add("BATCH_MEASURED_WEIGHT", schema::pmfm_ids::BATCH_MEASURED_WEIGHT)?;
    pmfm.add("BATCH_ESTIMATED_WEIGHT", schema::pmfm_ids::BATCH_ESTIMATED_WEIGHT)?;
    pmfm.add("BATCH_CALCULATED_WEIGHT", schema::pmfm_ids::BATCH_CALCULATED_WEIGHT)?;
    pmfm.add("BATCH_SORTING", schema::pmfm_ids::BATCH_SORTING)?;
    pmfm.add("DRESSING", schema::pmfm_ids::DRESSING)?;
    pmfm.add("PRESERVATION", schema::pmfm_ids::PRESERVATION)?;
    m.add_submodule(&pmfm)?;

    // Qualitative values
    let qv = PyModule::new(m.py(), "qv_ids")?;
    qv.add("LANDING", schema::qv_ids::LANDING)?;
    qv.add("DISCARD", schema::qv_ids::DISCARD)?;
    qv.add("BATCH_SORTING_BULK", schema::qv_ids::BATCH_SORTING_BULK)?;
    qv.add("BATCH_SORTING_NON_BULK", schema::qv_ids::BATCH_SORTING_NON_BULK)?;
    m.add_submodule(&qv)?;

    // Frame columns
    let columns = PyModule::new(m.py(), "batch_columns")?;
    columns.add("ID", schema::batch_columns::ID)?;
    columns.add("PARENT_ID", schema::batch_columns::PARENT_ID)?;
    columns.add("LABEL", schema::batch_columns::LABEL)?;
    columns.add("WEIGHT", schema::batch_columns::WEIGHT)?;
    columns.add("SAMPLING_RATIO", schema::batch_columns::SAMPLING_RATIO)?;
    columns.add("PMFM_PREFIX", schema::batch_columns::PMFM_PREFIX)?;
    m.add_submodule(&columns)?;

    Ok(())
}

#[pymodule]
fn catch_batch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(normalize_batches, m)?)?;
    m.add_function(wrap_pyfunction!(solve, m)?)?;
    m.add_function(wrap_pyfunction!(batch_groups, m)?)?;
    m.add_function(wrap_pyfunction!(batches_frame, m)?)?;
    m.add_function(wrap_pyfunction!(frame_batches, m)?)?;
    add_schema_exports(m)?;
    Ok(())
}

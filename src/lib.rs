//! Batch-tree engine for fishing catches: catch, species groups, samples
//! and measured individuals, kept consistent in weight, sampling ratio and
//! individual count.

pub mod batch;
pub mod batch_model;
pub mod batch_utils;
pub mod config;
pub mod context;
pub mod control;
pub mod conversion;
pub mod error;
pub mod frame;
pub mod group;
pub mod measurement;
pub mod model_rules;
pub mod numeric;
pub mod pmfm;
pub mod referential;
pub mod rule;
pub mod sampling_ratio;
pub mod schema;
pub mod solver;
pub mod sub_batch;
pub mod tree;
pub mod validation;

#[cfg(feature = "python")]
mod python;

pub use batch::{Batch, BatchKind, BatchTree, BatchWeight, FlattenOptions, GroupLink};
pub use batch_model::{BatchModel, BatchModelFilter, BatchModelTree, BatchModelUtils, CreateModelOptions};
pub use batch_utils::BatchUtils;
pub use config::{ProgramConfig, SolverOptions};
pub use context::BatchContext;
pub use error::{BatchError, Result};
pub use group::BatchGroupUtils;
pub use measurement::{MeasurementValues, PmfmValue, PmfmValueUtils};
pub use pmfm::Pmfm;
pub use sampling_ratio::SamplingRatioFormat;
pub use sub_batch::SubBatchUtils;
pub use tree::{NodeId, Tree};

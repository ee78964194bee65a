//! Spatial and attribute joins between shapefile and GeoJSON datasets.

pub mod config;
pub mod crs;
pub mod error;
pub mod export;
pub mod feature;
pub mod join;
pub mod loader;
pub mod pipeline;
pub mod validate;

pub use config::{PipelineConfig, Suffixes};
pub use crs::Crs;
pub use error::{ErrorKind, PipelineError, Result, Stage};
pub use export::{export, ExportedFile};
pub use feature::{Feature, FeatureCollection, FieldType, FieldValue, Schema, Side};
pub use join::{attribute_join, spatial_join, AttributeHow, SpatialHow, SpatialPredicate};
pub use loader::ContainerKind;
pub use pipeline::{Diagnostic, Diagnostics, Input, JoinOutcome, JoinSpec, Pipeline};

/// Loads one container with default settings.
pub fn load_container(bytes: &[u8], kind: ContainerKind) -> Result<FeatureCollection> {
    loader::load(bytes, kind, None)
}

/// Runs one join with the default configuration.
pub fn run_join(left: Input<'_>, right: Input<'_>, spec: &JoinSpec) -> Result<JoinOutcome> {
    Pipeline::default().run(left, right, spec)
}

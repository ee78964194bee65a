use std::fmt;

use geo::Rect;
use tracing::{info, info_span, warn};

use crate::config::PipelineConfig;
use crate::crs::{assume_default, reconcile, Crs};
use crate::error::Result;
use crate::export::{to_output_crs, write_geojson, ExportedFile};
use crate::feature::{FeatureCollection, FieldValue, Side};
use crate::join::{
    attribute_join_with, spatial_join_with, AttributeHow, SpatialHow, SpatialPredicate,
};
use crate::loader::{load, ContainerKind};
use crate::validate::validate_geometries;

/// Raw upload plus its declared container kind.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    pub bytes: &'a [u8],
    pub kind: ContainerKind,
}

impl<'a> Input<'a> {
    pub fn new(bytes: &'a [u8], kind: ContainerKind) -> Self {
        Self { bytes, kind }
    }
}

/// Which join to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSpec {
    Spatial {
        predicate: SpatialPredicate,
        how: SpatialHow,
    },
    Attribute {
        left_key: String,
        right_key: String,
        how: AttributeHow,
    },
}

impl JoinSpec {
    /// Builds a spatial spec from raw UI selections.
    pub fn spatial(predicate: &str, how: &str) -> Result<Self> {
        Ok(JoinSpec::Spatial {
            predicate: predicate.parse()?,
            how: how.parse()?,
        })
    }

    /// Builds an attribute spec from raw UI selections.
    pub fn attribute(
        left_key: impl Into<String>,
        right_key: impl Into<String>,
        how: &str,
    ) -> Result<Self> {
        Ok(JoinSpec::Attribute {
            left_key: left_key.into(),
            right_key: right_key.into(),
            how: how.parse()?,
        })
    }
}

/// Something the pipeline assumed or changed along the way.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A collection had no CRS and was labelled with the default.
    DefaultCrsAssumed { side: Side, crs: Crs },
    /// The secondary collection was reprojected into the primary's CRS.
    SecondaryReprojected { from: Crs, to: Crs },
    /// Invalid geometries were found on one side.
    GeometriesRepaired {
        side: Side,
        repaired: usize,
        unrepaired: usize,
    },
    /// The result was reprojected for export.
    OutputReprojected { from: Crs, to: Crs },
    /// The join succeeded but produced no rows.
    EmptyResult,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DefaultCrsAssumed { side, crs } => {
                write!(f, "{} collection has no CRS, assumed {}", side, crs)
            }
            Diagnostic::SecondaryReprojected { from, to } => {
                write!(f, "secondary collection reprojected from {} to {}", from, to)
            }
            Diagnostic::GeometriesRepaired {
                side,
                repaired,
                unrepaired,
            } => write!(
                f,
                "{} collection: {} invalid geometries repaired, {} left as-is",
                side, repaired, unrepaired
            ),
            Diagnostic::OutputReprojected { from, to } => {
                write!(f, "result reprojected from {} to {} for export", from, to)
            }
            Diagnostic::EmptyResult => f.write_str("join matched no rows"),
        }
    }
}

/// Diagnostics collected during one run, in the order they occurred.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, diagnostic: &Diagnostic) -> bool {
        self.0.contains(diagnostic)
    }
}

/// First rows of the non-geometry fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl Preview {
    pub fn of(collection: &FeatureCollection, limit: usize) -> Self {
        Self {
            columns: collection.schema().names().map(str::to_string).collect(),
            rows: collection
                .features()
                .iter()
                .take(limit)
                .map(|f| f.values.clone())
                .collect(),
        }
    }
}

/// Output-CRS bounds and centre, for framing a map preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapExtent {
    pub bounds: Rect<f64>,
    pub center: (f64, f64),
}

impl MapExtent {
    fn of(collection: &FeatureCollection) -> Option<Self> {
        let bounds = collection.total_bounds()?;
        let center = bounds.center();
        Some(Self {
            bounds,
            center: (center.x, center.y),
        })
    }
}

/// Everything a run hands back to the caller.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Join result in the reconciled (primary) CRS.
    pub result: FeatureCollection,
    pub preview: Preview,
    pub geometry_types: Vec<&'static str>,
    pub rows: usize,
    /// Non-geometry columns.
    pub columns: usize,
    pub extent: Option<MapExtent>,
    pub export: ExportedFile,
    pub diagnostics: Diagnostics,
}

impl JoinOutcome {
    /// Zero rows is a successful outcome, not a failure.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Runs joins with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads and validates one input.
    pub fn load(
        &self,
        input: Input<'_>,
        side: Side,
        diagnostics: &mut Diagnostics,
    ) -> Result<FeatureCollection> {
        let _span = info_span!("load", %side).entered();
        let collection = load(input.bytes, input.kind, self.config.scratch_dir())?;
        let (collection, report) = validate_geometries(collection);
        if !report.is_clean() {
            diagnostics.push(Diagnostic::GeometriesRepaired {
                side,
                repaired: report.repaired,
                unrepaired: report.unrepaired,
            });
        }
        Ok(collection)
    }

    pub fn run(&self, left: Input<'_>, right: Input<'_>, spec: &JoinSpec) -> Result<JoinOutcome> {
        let mut diagnostics = Diagnostics::default();
        let primary = self.load(left, Side::Primary, &mut diagnostics)?;
        let secondary = self.load(right, Side::Secondary, &mut diagnostics)?;
        let suffixes = self.config.suffixes();

        let result = match spec {
            JoinSpec::Spatial { predicate, how } => {
                let reconciled = reconcile(primary, secondary, self.config.default_crs())?;
                for side in &reconciled.assumed {
                    diagnostics.push(Diagnostic::DefaultCrsAssumed {
                        side: *side,
                        crs: self.config.default_crs().clone(),
                    });
                }
                if let Some((from, to)) = reconciled.reprojected.clone() {
                    diagnostics.push(Diagnostic::SecondaryReprojected { from, to });
                }
                spatial_join_with(
                    &reconciled.primary,
                    &reconciled.secondary,
                    *predicate,
                    *how,
                    suffixes,
                )?
            }
            JoinSpec::Attribute {
                left_key,
                right_key,
                how,
            } => {
                // Secondary geometry is dropped, so only the primary needs a CRS.
                let (primary, assumed) = assume_default(primary, self.config.default_crs());
                if assumed {
                    diagnostics.push(Diagnostic::DefaultCrsAssumed {
                        side: Side::Primary,
                        crs: self.config.default_crs().clone(),
                    });
                }
                attribute_join_with(&primary, &secondary, left_key, right_key, *how, suffixes)?
            }
        };

        if result.is_empty() {
            warn!("Join produced no rows");
            diagnostics.push(Diagnostic::EmptyResult);
        }
        self.summarize(result, diagnostics)
    }

    fn summarize(
        &self,
        result: FeatureCollection,
        mut diagnostics: Diagnostics,
    ) -> Result<JoinOutcome> {
        let output_crs = self.config.output_crs();
        let (projected, moved) = to_output_crs(&result, output_crs)?;
        if moved {
            diagnostics.push(Diagnostic::OutputReprojected {
                from: result.crs().clone(),
                to: output_crs.clone(),
            });
        }
        let export = write_geojson(&projected, self.config.pretty_output())?;

        let outcome = JoinOutcome {
            preview: Preview::of(&result, self.config.preview_rows()),
            geometry_types: result.geometry_types(),
            rows: result.len(),
            columns: result.schema().len(),
            extent: MapExtent::of(&projected),
            export,
            diagnostics,
            result,
        };
        info!(
            rows = outcome.rows,
            columns = outcome.columns,
            geometry_types = ?outcome.geometry_types,
            "Join finished"
        );
        Ok(outcome)
    }
}

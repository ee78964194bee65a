use std::panic::{self, AssertUnwindSafe};

use geo::{BooleanOps, Geometry, MultiPolygon, Validation};
use tracing::{debug, warn};

use crate::feature::FeatureCollection;

/// Counts from one validator pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Geometries failing the validity check on entry.
    pub invalid: usize,
    /// Invalid geometries that came out valid.
    pub repaired: usize,
    /// Invalid geometries left as they were.
    pub unrepaired: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }
}

/// If any geometry is invalid, rebuilds every areal geometry through a
/// polygon overlay. Points and lines pass through.
pub fn validate_geometries(
    mut collection: FeatureCollection,
) -> (FeatureCollection, ValidationReport) {
    let mut report = ValidationReport {
        invalid: collection.geometries().filter(|g| !is_valid(g)).count(),
        ..ValidationReport::default()
    };
    if report.invalid == 0 {
        return (collection, report);
    }

    debug!(invalid = report.invalid, "Rebuilding areal geometries");
    for geometry in collection.geometries_mut() {
        let was_valid = is_valid(geometry);
        let repaired = if is_areal(geometry) {
            repair(geometry)
        } else {
            None
        };
        match repaired {
            Some(fixed) => {
                if !was_valid {
                    report.repaired += 1;
                }
                *geometry = fixed;
            }
            None if !was_valid => report.unrepaired += 1,
            None => {}
        }
    }

    if report.unrepaired > 0 {
        warn!(
            unrepaired = report.unrepaired,
            "Invalid geometries could not be repaired and are passed through"
        );
    }
    (collection, report)
}

fn is_areal(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_)
    )
}

fn is_valid(geometry: &Geometry<f64>) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| geometry.is_valid())).unwrap_or(false)
}

fn repair(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    let rebuilt = panic::catch_unwind(AssertUnwindSafe(|| overlay(geometry))).ok()??;
    if rebuilt.0.is_empty() {
        return None;
    }
    let fixed = if rebuilt.0.len() == 1 && matches!(geometry, Geometry::Polygon(_)) {
        Geometry::Polygon(rebuilt.0.into_iter().next()?)
    } else {
        Geometry::MultiPolygon(rebuilt)
    };
    is_valid(&fixed).then_some(fixed)
}

// Union with nothing re-nodes the rings: a bowtie splits into two triangles.
fn overlay(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    let empty = MultiPolygon::<f64>::new(vec![]);
    match geometry {
        Geometry::Polygon(p) => Some(p.union(&empty)),
        Geometry::MultiPolygon(mp) => Some(mp.union(&empty)),
        Geometry::Rect(r) => Some(r.to_polygon().union(&empty)),
        Geometry::Triangle(t) => Some(t.to_polygon().union(&empty)),
        _ => None,
    }
}

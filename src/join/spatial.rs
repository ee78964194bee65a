use std::fmt;
use std::str::FromStr;

use geo::{BoundingRect, Geometry, Intersects, Relate};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use tracing::{debug, info};

use super::columns::{assemble, MergedColumns, RowPair};
use super::guarded;
use crate::config::Suffixes;
use crate::crs::ensure_same_crs;
use crate::error::{PipelineError, Result, Stage};
use crate::feature::{FeatureCollection, Side};

/// Geometric relationship tested as `predicate(primary, secondary)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialPredicate {
    Intersects,
    Contains,
    Within,
    Overlaps,
    Crosses,
    Touches,
    Covers,
    CoveredBy,
}

impl SpatialPredicate {
    pub const ALL: [SpatialPredicate; 8] = [
        SpatialPredicate::Intersects,
        SpatialPredicate::Contains,
        SpatialPredicate::Within,
        SpatialPredicate::Overlaps,
        SpatialPredicate::Crosses,
        SpatialPredicate::Touches,
        SpatialPredicate::Covers,
        SpatialPredicate::CoveredBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::Within => "within",
            SpatialPredicate::Overlaps => "overlaps",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Touches => "touches",
            SpatialPredicate::Covers => "covers",
            SpatialPredicate::CoveredBy => "covered_by",
        }
    }

    pub fn evaluate(&self, primary: &Geometry<f64>, secondary: &Geometry<f64>) -> bool {
        if let SpatialPredicate::Intersects = self {
            return primary.intersects(secondary);
        }
        let matrix = primary.relate(secondary);
        match self {
            SpatialPredicate::Intersects => matrix.is_intersects(),
            SpatialPredicate::Contains => matrix.is_contains(),
            SpatialPredicate::Within => matrix.is_within(),
            SpatialPredicate::Overlaps => matrix.is_overlaps(),
            SpatialPredicate::Crosses => matrix.is_crosses(),
            SpatialPredicate::Touches => matrix.is_touches(),
            SpatialPredicate::Covers => matrix.is_covers(),
            SpatialPredicate::CoveredBy => matrix.is_coveredby(),
        }
    }
}

impl fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpatialPredicate {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        SpatialPredicate::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| PipelineError::UnsupportedPredicate(s.to_string()))
    }
}

/// Row-inclusion policy of a spatial join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialHow {
    /// Every primary feature at least once.
    Left,
    /// Every secondary feature at least once, carrying secondary geometry.
    Right,
    /// Matched pairs only.
    Inner,
}

impl FromStr for SpatialHow {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(SpatialHow::Left),
            "right" => Ok(SpatialHow::Right),
            "inner" => Ok(SpatialHow::Inner),
            _ => Err(PipelineError::UnsupportedCardinality {
                value: s.to_string(),
                stage: Stage::SpatialJoin,
            }),
        }
    }
}

type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn build_index(collection: &FeatureCollection) -> RTree<IndexedEnvelope> {
    let entries = collection
        .features()
        .iter()
        .enumerate()
        .filter_map(|(index, feature)| {
            let bbox = feature.geometry.as_ref()?.bounding_rect()?;
            let envelope = Rectangle::from_corners(
                [bbox.min().x, bbox.min().y],
                [bbox.max().x, bbox.max().y],
            );
            Some(GeomWithData::new(envelope, index))
        })
        .collect();
    RTree::bulk_load(entries)
}

/// For each primary row, the secondary rows satisfying the predicate in
/// ascending secondary order.
fn match_rows(
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    predicate: SpatialPredicate,
) -> Vec<Vec<usize>> {
    let index = build_index(secondary);
    primary
        .features()
        .iter()
        .map(|feature| {
            let Some(geometry) = feature.geometry.as_ref() else {
                return Vec::new();
            };
            let Some(bbox) = geometry.bounding_rect() else {
                return Vec::new();
            };
            let envelope =
                AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]);
            let mut candidates: Vec<usize> = index
                .locate_in_envelope_intersecting(&envelope)
                .map(|entry| entry.data)
                .collect();
            candidates.sort_unstable();
            candidates
                .into_iter()
                .filter(|&j| {
                    secondary.features()[j]
                        .geometry
                        .as_ref()
                        .is_some_and(|other| predicate.evaluate(geometry, other))
                })
                .collect()
        })
        .collect()
}

fn correlate(matches: &[Vec<usize>], secondary_len: usize, how: SpatialHow) -> Vec<RowPair> {
    match how {
        SpatialHow::Inner => matches
            .iter()
            .enumerate()
            .flat_map(|(i, js)| js.iter().map(move |&j| RowPair::matched(i, j)))
            .collect(),
        SpatialHow::Left => matches
            .iter()
            .enumerate()
            .flat_map(|(i, js)| {
                if js.is_empty() {
                    vec![RowPair::primary_only(i)]
                } else {
                    js.iter().map(|&j| RowPair::matched(i, j)).collect()
                }
            })
            .collect(),
        SpatialHow::Right => {
            let mut by_secondary = vec![Vec::new(); secondary_len];
            for (i, js) in matches.iter().enumerate() {
                for &j in js {
                    by_secondary[j].push(i);
                }
            }
            by_secondary
                .into_iter()
                .enumerate()
                .flat_map(|(j, is)| {
                    if is.is_empty() {
                        vec![RowPair::secondary_only(j)]
                    } else {
                        is.into_iter().map(|i| RowPair::matched(i, j)).collect()
                    }
                })
                .collect()
        }
    }
}

/// Spatial join with the default `_left`/`_right` suffixes.
pub fn spatial_join(
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    predicate: SpatialPredicate,
    how: SpatialHow,
) -> Result<FeatureCollection> {
    spatial_join_with(primary, secondary, predicate, how, &Suffixes::default())
}

/// Joins `secondary` onto `primary` where `predicate(primary, secondary)`
/// holds. Both collections must already share a CRS. A primary feature
/// matching several secondary features yields one row per match.
pub fn spatial_join_with(
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    predicate: SpatialPredicate,
    how: SpatialHow,
    suffixes: &Suffixes,
) -> Result<FeatureCollection> {
    ensure_same_crs(primary, secondary)?;

    let matches = guarded(
        || match_rows(primary, secondary, predicate),
        PipelineError::SpatialJoinFailed,
    )?;
    debug!(
        matched = matches.iter().filter(|m| !m.is_empty()).count(),
        "Evaluated {} predicate",
        predicate
    );

    let pairs = correlate(&matches, secondary.len(), how);
    let columns = MergedColumns::new(primary.schema(), secondary.schema(), None, suffixes);
    let geometry_from = match how {
        SpatialHow::Right => Side::Secondary,
        SpatialHow::Left | SpatialHow::Inner => Side::Primary,
    };
    let crs = primary.crs().clone();
    let result = assemble(&pairs, primary, secondary, &columns, geometry_from, crs);

    info!(
        predicate = %predicate,
        how = ?how,
        rows = result.len(),
        "Spatial join complete"
    );
    Ok(result)
}

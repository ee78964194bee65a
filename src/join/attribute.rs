use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use tracing::info;

use super::columns::{assemble, MergedColumns, RowPair};
use super::guarded;
use crate::config::Suffixes;
use crate::error::{PipelineError, Result, Stage};
use crate::feature::{Feature, FeatureCollection, FieldValue, Side};

/// Relational join semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeHow {
    Left,
    Right,
    Inner,
    /// Full outer join.
    Outer,
}

impl FromStr for AttributeHow {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(AttributeHow::Left),
            "right" => Ok(AttributeHow::Right),
            "inner" => Ok(AttributeHow::Inner),
            "outer" | "full" => Ok(AttributeHow::Outer),
            _ => Err(PipelineError::UnsupportedCardinality {
                value: s.to_string(),
                stage: Stage::AttributeJoin,
            }),
        }
    }
}

/// Attribute join with the default `_left`/`_right` suffixes.
pub fn attribute_join(
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    left_key: &str,
    right_key: &str,
    how: AttributeHow,
) -> Result<FeatureCollection> {
    attribute_join_with(primary, secondary, left_key, right_key, how, &Suffixes::default())
}

/// Equi-join on the canonical text of both keys. Secondary geometry is
/// dropped. `Outer` rows come out sorted by key text.
pub fn attribute_join_with(
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    left_key: &str,
    right_key: &str,
    how: AttributeHow,
    suffixes: &Suffixes,
) -> Result<FeatureCollection> {
    let left_index = primary
        .schema()
        .index_of(left_key)
        .ok_or_else(|| PipelineError::KeyNotFound {
            key: left_key.to_string(),
            side: Side::Primary,
        })?;
    let right_index = secondary
        .schema()
        .index_of(right_key)
        .ok_or_else(|| PipelineError::KeyNotFound {
            key: right_key.to_string(),
            side: Side::Secondary,
        })?;

    let merged = guarded(
        || {
            let left = primary.with_key_column_as_text(left_index);
            let right = secondary.without_geometry().with_key_column_as_text(right_index);

            let pairs = correlate(&left, left_index, &right, right_index, how);
            let shared_key = (left_key == right_key).then_some((left_index, right_index));
            let columns = MergedColumns::new(left.schema(), right.schema(), shared_key, suffixes);
            assemble(&pairs, &left, &right, &columns, Side::Primary, primary.crs().clone())
        },
        PipelineError::AttributeJoinFailed,
    )?;

    info!(
        left_key,
        right_key,
        how = ?how,
        rows = merged.len(),
        "Attribute join complete"
    );
    Ok(merged)
}

fn key_of(feature: &Feature, index: usize) -> String {
    feature.values.get(index).unwrap_or(&FieldValue::Null).key_string()
}

/// Key string -> row indices, in row order.
fn key_lookup(collection: &FeatureCollection, index: usize) -> HashMap<String, Vec<usize>> {
    let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, feature) in collection.features().iter().enumerate() {
        lookup.entry(key_of(feature, index)).or_default().push(row);
    }
    lookup
}

fn correlate(
    left: &FeatureCollection,
    left_index: usize,
    right: &FeatureCollection,
    right_index: usize,
    how: AttributeHow,
) -> Vec<RowPair> {
    let mut pairs = Vec::new();

    if how == AttributeHow::Right {
        let lookup = key_lookup(left, left_index);
        for (j, feature) in right.features().iter().enumerate() {
            match lookup.get(&key_of(feature, right_index)) {
                Some(rows) => pairs.extend(rows.iter().map(|&i| RowPair::matched(i, j))),
                None => pairs.push(RowPair::secondary_only(j)),
            }
        }
        return pairs;
    }

    let lookup = key_lookup(right, right_index);
    let mut matched_right = HashSet::new();
    for (i, feature) in left.features().iter().enumerate() {
        match lookup.get(&key_of(feature, left_index)) {
            Some(rows) => {
                for &j in rows {
                    matched_right.insert(j);
                    pairs.push(RowPair::matched(i, j));
                }
            }
            None if how != AttributeHow::Inner => pairs.push(RowPair::primary_only(i)),
            None => {}
        }
    }

    if how == AttributeHow::Outer {
        pairs.extend(
            (0..right.len())
                .filter(|j| !matched_right.contains(j))
                .map(RowPair::secondary_only),
        );
        // Full joins come out ordered by key text; ties keep their order.
        let key = |pair: &RowPair| match (pair.primary, pair.secondary) {
            (Some(i), _) => key_of(&left.features()[i], left_index),
            (None, Some(j)) => key_of(&right.features()[j], right_index),
            (None, None) => String::new(),
        };
        pairs.sort_by_cached_key(key);
    }
    pairs
}

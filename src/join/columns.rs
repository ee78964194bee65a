// Joined rows are index pairs until `assemble`, so no bookkeeping column
// reaches the output schema.

use crate::config::Suffixes;
use crate::crs::Crs;
use crate::feature::{Feature, FeatureCollection, FieldValue, Schema, Side};

/// Row correlator: which primary and secondary row make up one output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowPair {
    pub primary: Option<usize>,
    pub secondary: Option<usize>,
}

impl RowPair {
    pub fn matched(primary: usize, secondary: usize) -> Self {
        Self {
            primary: Some(primary),
            secondary: Some(secondary),
        }
    }

    pub fn primary_only(primary: usize) -> Self {
        Self {
            primary: Some(primary),
            secondary: None,
        }
    }

    pub fn secondary_only(secondary: usize) -> Self {
        Self {
            primary: None,
            secondary: Some(secondary),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnSource {
    Primary(usize),
    Secondary(usize),
    /// Join key shared by name: primary value, else secondary value.
    Coalesce(usize, usize),
}

/// Output field names and where each one's values come from.
#[derive(Debug, Clone)]
pub(crate) struct MergedColumns {
    names: Vec<String>,
    sources: Vec<ColumnSource>,
}

impl MergedColumns {
    /// Primary fields then secondary fields. Names present on both sides get
    /// the suffixes, except a `shared_key` which is emitted once.
    pub fn new(
        primary: &Schema,
        secondary: &Schema,
        shared_key: Option<(usize, usize)>,
        suffixes: &Suffixes,
    ) -> Self {
        let mut columns = MergedColumns {
            names: Vec::with_capacity(primary.len() + secondary.len()),
            sources: Vec::with_capacity(primary.len() + secondary.len()),
        };

        for (index, name) in primary.names().enumerate() {
            match shared_key {
                Some((p, s)) if p == index => {
                    columns.push(name.to_string(), ColumnSource::Coalesce(p, s))
                }
                _ if secondary.contains(name) => {
                    columns.push(format!("{}{}", name, suffixes.left), ColumnSource::Primary(index))
                }
                _ => columns.push(name.to_string(), ColumnSource::Primary(index)),
            }
        }
        for (index, name) in secondary.names().enumerate() {
            match shared_key {
                Some((_, s)) if s == index => {}
                _ if primary.contains(name) => {
                    let renamed = format!("{}{}", name, suffixes.right);
                    columns.push(renamed, ColumnSource::Secondary(index))
                }
                _ => columns.push(name.to_string(), ColumnSource::Secondary(index)),
            }
        }
        columns
    }

    fn push(&mut self, name: String, source: ColumnSource) {
        let mut unique = name.clone();
        let mut n = 1;
        while self.names.contains(&unique) {
            unique = format!("{}_{}", name, n);
            n += 1;
        }
        self.names.push(unique);
        self.sources.push(source);
    }

    pub fn schema(&self) -> Schema {
        Schema::from_names(self.names.iter().cloned())
    }

    fn row(&self, primary: Option<&Feature>, secondary: Option<&Feature>) -> Vec<FieldValue> {
        let pick = |feature: Option<&Feature>, index: usize| {
            feature
                .and_then(|f| f.values.get(index))
                .cloned()
                .unwrap_or_default()
        };
        self.sources
            .iter()
            .map(|source| match *source {
                ColumnSource::Primary(i) => pick(primary, i),
                ColumnSource::Secondary(i) => pick(secondary, i),
                ColumnSource::Coalesce(p, s) => match primary {
                    Some(_) => pick(primary, p),
                    None => pick(secondary, s),
                },
            })
            .collect()
    }
}

/// Materializes correlated rows into a collection. Geometry comes from
/// `geometry_from`; a row without that side has no geometry.
pub(crate) fn assemble(
    pairs: &[RowPair],
    primary: &FeatureCollection,
    secondary: &FeatureCollection,
    columns: &MergedColumns,
    geometry_from: Side,
    crs: Crs,
) -> FeatureCollection {
    let features = pairs
        .iter()
        .map(|pair| {
            let p = pair.primary.and_then(|i| primary.features().get(i));
            let s = pair.secondary.and_then(|i| secondary.features().get(i));
            let geometry = match geometry_from {
                Side::Primary => p.and_then(|f| f.geometry.clone()),
                Side::Secondary => s.and_then(|f| f.geometry.clone()),
            };
            Feature::new(geometry, columns.row(p, s))
        })
        .collect();
    FeatureCollection::new(columns.schema(), features, crs)
}

// Rows hold one value per schema field, in schema order.

use std::fmt;

use geo::{BoundingRect, Geometry, Rect};
use serde_json::Value as JsonValue;

use crate::crs::Crs;

const NULL_KEY: &str = "None";

/// Which input of a join a collection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => f.write_str("primary"),
            Side::Secondary => f.write_str("secondary"),
        }
    }
}

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Null => FieldType::Null,
            FieldValue::Bool(_) => FieldType::Boolean,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::String(_) => FieldType::String,
        }
    }

    /// Canonical string form used when comparing join keys.
    ///
    /// Integral numbers drop their fractional part so `1`, `1.0` and `"1"`
    /// compare equal. Null reads as `None`, so null keys match each other.
    pub fn key_string(&self) -> String {
        match self {
            FieldValue::Null => NULL_KEY.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => canonical_number(*n),
            FieldValue::String(s) => s.clone(),
        }
    }

    /// Converts a JSON property value. Nested values keep their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            JsonValue::String(s) => FieldValue::String(s.clone()),
            nested => FieldValue::String(nested.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(JsonValue::Null, JsonValue::Number),
            FieldValue::String(s) => JsonValue::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => f.write_str(&canonical_number(*n)),
            FieldValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

fn canonical_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Declared type of a column, folded over all of its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldType {
    /// No non-null value seen yet.
    #[default]
    Null,
    Boolean,
    Number,
    String,
    /// Values of more than one type; tolerated, keys are compared as strings.
    Mixed,
}

impl FieldType {
    pub fn merge(self, other: FieldType) -> FieldType {
        match (self, other) {
            (FieldType::Null, t) | (t, FieldType::Null) => t,
            (a, b) if a == b => a,
            _ => FieldType::Mixed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

/// Ordered, name-unique field list of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Builds an untyped schema; duplicate names after the first are dropped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Schema::default();
        for name in names {
            let name = name.into();
            if !schema.contains(&name) {
                schema.fields.push(Field {
                    name,
                    field_type: FieldType::Null,
                });
            }
        }
        schema
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn refine(&mut self, features: &[Feature]) {
        for (index, field) in self.fields.iter_mut().enumerate() {
            field.field_type = features
                .iter()
                .filter_map(|f| f.values.get(index))
                .fold(FieldType::Null, |acc, v| acc.merge(v.field_type()));
        }
    }
}

/// One geometry (possibly absent) plus its attribute row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub values: Vec<FieldValue>,
}

impl Feature {
    pub fn new(geometry: Option<Geometry<f64>>, values: Vec<FieldValue>) -> Self {
        Self { geometry, values }
    }
}

/// Ordered features sharing one schema and one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    schema: Schema,
    features: Vec<Feature>,
    crs: Crs,
}

impl FeatureCollection {
    /// Builds a collection, aligning every row to the schema width and
    /// folding column types from the values.
    pub fn new(mut schema: Schema, mut features: Vec<Feature>, crs: Crs) -> Self {
        let width = schema.len();
        for feature in &mut features {
            feature.values.resize(width, FieldValue::Null);
        }
        schema.refine(&features);
        Self {
            schema,
            features,
            crs,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Relabels the CRS without touching coordinates.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }

    pub fn value(&self, row: usize, field: &str) -> Option<&FieldValue> {
        let index = self.schema.index_of(field)?;
        self.features.get(row)?.values.get(index)
    }

    pub fn geometries(&self) -> impl Iterator<Item = &Geometry<f64>> {
        self.features.iter().filter_map(|f| f.geometry.as_ref())
    }

    pub(crate) fn geometries_mut(&mut self) -> impl Iterator<Item = &mut Geometry<f64>> {
        self.features.iter_mut().filter_map(|f| f.geometry.as_mut())
    }

    /// Copy with every geometry removed.
    pub fn without_geometry(&self) -> Self {
        let features = self
            .features
            .iter()
            .map(|f| Feature::new(None, f.values.clone()))
            .collect();
        Self {
            schema: self.schema.clone(),
            features,
            crs: self.crs.clone(),
        }
    }

    /// Copy with one column replaced by its canonical key strings.
    pub(crate) fn with_key_column_as_text(&self, index: usize) -> Self {
        let mut copy = self.clone();
        for feature in &mut copy.features {
            match feature.values.get_mut(index) {
                Some(value) if !value.is_null() => *value = FieldValue::String(value.key_string()),
                _ => {}
            }
        }
        copy.schema.refine(&copy.features);
        copy
    }

    /// Distinct geometry type names in first-seen order.
    pub fn geometry_types(&self) -> Vec<&'static str> {
        let mut types = Vec::new();
        for geometry in self.geometries() {
            let name = geometry_type_name(geometry);
            if !types.contains(&name) {
                types.push(name);
            }
        }
        types
    }

    /// Bounding box over all geometries, if any has an extent.
    pub fn total_bounds(&self) -> Option<Rect<f64>> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        let mut seen = false;

        for geometry in self.geometries() {
            if let Some(bbox) = geometry.bounding_rect() {
                min_x = min_x.min(bbox.min().x);
                min_y = min_y.min(bbox.min().y);
                max_x = max_x.max(bbox.max().x);
                max_y = max_y.max(bbox.max().y);
                seen = true;
            }
        }

        seen.then(|| Rect::new((min_x, min_y), (max_x, max_y)))
    }
}

pub fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon};

    fn collection() -> FeatureCollection {
        let schema = Schema::from_names(["id", "name"]);
        let features = vec![
            Feature::new(
                Some(point!(x: 1.0, y: 2.0).into()),
                vec![FieldValue::Number(1.0), FieldValue::String("a".into())],
            ),
            Feature::new(
                Some(polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 3.0)].into()),
                vec![FieldValue::String("2".into())],
            ),
            Feature::new(
                Some(line_string![(x: -1.0, y: 5.0), (x: 0.0, y: 6.0)].into()),
                vec![FieldValue::Null, FieldValue::Null],
            ),
            Feature::new(None, vec![]),
        ];
        FeatureCollection::new(schema, features, Crs::wgs84())
    }

    #[test]
    fn integral_numbers_share_key_with_text() {
        assert_eq!(FieldValue::Number(1.0).key_string(), "1");
        assert_eq!(FieldValue::String("1".into()).key_string(), "1");
        assert_eq!(FieldValue::Number(2.5).key_string(), "2.5");
        assert_eq!(FieldValue::Bool(true).key_string(), "true");
        assert_eq!(FieldValue::Null.key_string(), "None");
    }

    #[test]
    fn rows_are_padded_and_types_folded() {
        let fc = collection();
        assert!(fc.features().iter().all(|f| f.values.len() == 2));
        assert_eq!(fc.schema().fields()[0].field_type, FieldType::Mixed);
        assert_eq!(fc.schema().fields()[1].field_type, FieldType::String);
        assert_eq!(fc.value(1, "name"), Some(&FieldValue::Null));
    }

    #[test]
    fn duplicate_schema_names_are_dropped() {
        let schema = Schema::from_names(["a", "b", "a"]);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn geometry_types_in_first_seen_order() {
        assert_eq!(
            collection().geometry_types(),
            vec!["Point", "Polygon", "LineString"]
        );
    }

    #[test]
    fn total_bounds_spans_all_geometries() {
        let bounds = collection().total_bounds().unwrap();
        assert_eq!(bounds.min().x, -1.0);
        assert_eq!(bounds.min().y, 0.0);
        assert_eq!(bounds.max().x, 4.0);
        assert_eq!(bounds.max().y, 6.0);
    }

    #[test]
    fn key_column_coercion_leaves_other_columns() {
        let fc = collection().with_key_column_as_text(0);
        assert_eq!(fc.value(0, "id"), Some(&FieldValue::String("1".into())));
        assert_eq!(fc.value(2, "id"), Some(&FieldValue::Null));
        assert_eq!(fc.value(0, "name"), Some(&FieldValue::String("a".into())));
        assert_eq!(fc.schema().fields()[0].field_type, FieldType::String);
    }
}

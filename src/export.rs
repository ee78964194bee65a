use geojson::feature::Id;
use geojson::{Feature, FeatureCollection as GeoJsonCollection, Geometry as GeoJsonGeometry};
use tracing::{debug, info};

use crate::crs::{reproject, Crs};
use crate::error::{PipelineError, Result, Stage};
use crate::feature::FeatureCollection;

pub const GEOJSON_MIME: &str = "application/geo+json";
pub const EXPORT_FILE_NAME: &str = "join_result.geojson";

/// Serialized join result ready to hand to a download.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub file_name: &'static str,
}

/// Expresses `result` in `output_crs`. An undefined CRS is taken to already
/// be the output CRS. The flag reports whether coordinates were transformed.
pub fn to_output_crs(
    result: &FeatureCollection,
    output_crs: &Crs,
) -> Result<(FeatureCollection, bool)> {
    if !result.crs().is_defined() {
        debug!(crs = %output_crs, "Result has no CRS, labelling with output CRS");
        return Ok((result.clone().with_crs(output_crs.clone()), false));
    }
    if result.crs() == output_crs {
        return Ok((result.clone(), false));
    }
    let projected = reproject(result.clone(), output_crs, Stage::Export)?;
    Ok((projected, true))
}

/// Exports `result` as compact WGS84 GeoJSON.
pub fn export(result: &FeatureCollection) -> Result<Vec<u8>> {
    export_to(result, &Crs::wgs84(), false).map(|file| file.bytes)
}

/// Exports `result` in `output_crs`. Zero rows give an empty feature array.
pub fn export_to(
    result: &FeatureCollection,
    output_crs: &Crs,
    pretty: bool,
) -> Result<ExportedFile> {
    let (projected, _) = to_output_crs(result, output_crs)?;
    write_geojson(&projected, pretty)
}

/// Serializes a collection as-is, without reprojection.
pub(crate) fn write_geojson(collection: &FeatureCollection, pretty: bool) -> Result<ExportedFile> {
    let names: Vec<&str> = collection.schema().names().collect();

    let features: Vec<Feature> = collection
        .features()
        .iter()
        .enumerate()
        .map(|(row, feature)| {
            let properties = names
                .iter()
                .zip(&feature.values)
                .map(|(name, value)| (name.to_string(), value.to_json()))
                .collect();
            Feature {
                bbox: None,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|g| GeoJsonGeometry::new(geojson::Value::from(g))),
                id: Some(Id::String(row.to_string())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let feature_collection = GeoJsonCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let bytes = if pretty {
        serde_json::to_vec_pretty(&feature_collection)
    } else {
        serde_json::to_vec(&feature_collection)
    }
    .map_err(|e| PipelineError::ExportFailed(e.to_string()))?;

    info!(
        features = collection.len(),
        bytes = bytes.len(),
        "Serialized result"
    );
    Ok(ExportedFile {
        bytes,
        mime: GEOJSON_MIME,
        file_name: EXPORT_FILE_NAME,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature as Row, FieldValue, Schema};
    use crate::loader::load_geojson;
    use geo::point;
    use serde_json::Value as JsonValue;

    #[test]
    fn empty_result_is_a_valid_document() {
        let empty = FeatureCollection::new(Schema::from_names(["a"]), vec![], Crs::epsg(3857));
        let bytes = export(&empty).unwrap();
        let json: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn exported_bytes_reparse_with_same_fields() {
        let collection = FeatureCollection::new(
            Schema::from_names(["name", "pop", "capital", "note"]),
            vec![
                Row::new(
                    Some(point!(x: 10.75, y: 59.91).into()),
                    vec![
                        FieldValue::String("Oslo".into()),
                        FieldValue::Number(709_000.0),
                        FieldValue::Bool(true),
                        FieldValue::Null,
                    ],
                ),
                Row::new(None, vec![FieldValue::String("Nowhere".into())]),
            ],
            Crs::wgs84(),
        );
        let file = export_to(&collection, &Crs::wgs84(), true).unwrap();
        assert_eq!(file.mime, "application/geo+json");
        assert_eq!(file.file_name, "join_result.geojson");

        let reparsed = load_geojson(&file.bytes).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(
            reparsed.schema().names().collect::<Vec<_>>(),
            vec!["name", "pop", "capital", "note"]
        );
        assert_eq!(reparsed.features()[0].geometry, collection.features()[0].geometry);
        assert_eq!(reparsed.value(0, "pop"), Some(&FieldValue::Number(709_000.0)));
    }

    #[test]
    fn undefined_crs_is_not_transformed() {
        let collection = FeatureCollection::new(
            Schema::default(),
            vec![Row::new(Some(point!(x: 1.0, y: 2.0).into()), vec![])],
            Crs::undefined(),
        );
        let (projected, moved) = to_output_crs(&collection, &Crs::wgs84()).unwrap();
        assert!(!moved);
        assert!(projected.crs().is_wgs84());
        assert_eq!(projected.features()[0].geometry, collection.features()[0].geometry);
    }
}

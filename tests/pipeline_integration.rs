//! End-to-end tests: raw GeoJSON and zip bytes in, exported GeoJSON out.

use std::io::{Cursor, Write};

use geojoin::crs::{reconcile, reproject};
use geojoin::export::{export, GEOJSON_MIME};
use geojoin::loader::load_geojson;
use geojoin::{
    spatial_join, ContainerKind, Crs, Diagnostic, ErrorKind, FieldValue, Input, JoinSpec,
    Pipeline, PipelineConfig, Side, SpatialHow, SpatialPredicate, Stage,
};
use geo::{Contains, Geometry};
use serde_json::{json, Value as JsonValue};
use shapefile::dbase;

// =============================================================================
// Fixtures
// =============================================================================

fn square(x: f64, y: f64, size: f64) -> JsonValue {
    json!({
        "type": "Polygon",
        "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
    })
}

/// Two districts in lon/lat around Oslo.
fn districts() -> Vec<u8> {
    json!({
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": square(10.60, 59.85, 0.10), "properties": {"district": "West", "code": 1}},
            {"type": "Feature", "geometry": square(10.70, 59.85, 0.10), "properties": {"district": "East", "code": 2}}
        ]
    })
    .to_string()
    .into_bytes()
}

/// Three schools: one in West, one in East, one outside both.
fn schools(crs: Option<&str>) -> Vec<u8> {
    let mut doc = json!({
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [10.65, 59.90]}, "properties": {"school": "Alpha", "code": "2"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [10.75, 59.90]}, "properties": {"school": "Beta", "code": "9"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [11.50, 60.50]}, "properties": {"school": "Gamma", "code": "1"}}
        ]
    });
    if let Some(name) = crs {
        doc["crs"] = json!({"type": "name", "properties": {"name": name}});
    }
    doc.to_string().into_bytes()
}

/// Zipped point shapefile with two bus stops and no `.prj`.
fn stops_archive() -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("stops.shp");
    let table = dbase::TableWriterBuilder::new()
        .add_character_field(dbase::FieldName::try_from("name").unwrap(), 20)
        .add_numeric_field(dbase::FieldName::try_from("code").unwrap(), 10, 0);
    let mut writer = shapefile::Writer::from_path(&header, table).unwrap();
    for (name, code, x, y) in [("Alpha", 1.0, 10.65, 59.90), ("Beta", 2.0, 10.75, 59.90)] {
        let mut record = dbase::Record::default();
        record.insert("name".to_string(), dbase::FieldValue::Character(Some(name.to_string())));
        record.insert("code".to_string(), dbase::FieldValue::Numeric(Some(code)));
        writer
            .write_shape_and_record(&shapefile::Point::new(x, y), &record)
            .unwrap();
    }
    drop(writer);

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for extension in ["shp", "shx", "dbf"] {
        let bytes = std::fs::read(header.with_extension(extension)).unwrap();
        zip.start_file(format!("stops/stops.{}", extension), options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn geojson(bytes: &[u8]) -> Input<'_> {
    Input::new(bytes, ContainerKind::GeoJson)
}

fn left_intersects() -> JoinSpec {
    JoinSpec::spatial("intersects", "left").unwrap()
}

// =============================================================================
// Integration Tests
// =============================================================================

#[test]
fn spatial_inner_join_exports_matched_rows() {
    let schools = schools(None);
    let districts = districts();
    let spec = JoinSpec::spatial("within", "inner").unwrap();

    let outcome = Pipeline::default()
        .run(geojson(&schools), geojson(&districts), &spec)
        .unwrap();

    assert_eq!(outcome.rows, 2);
    assert_eq!(outcome.columns, 4);
    assert_eq!(outcome.geometry_types, vec!["Point"]);
    assert_eq!(
        outcome.preview.columns,
        vec!["school", "code_left", "district", "code_right"]
    );
    assert_eq!(outcome.export.mime, GEOJSON_MIME);
    assert_eq!(outcome.export.file_name, "join_result.geojson");
    assert!(outcome.diagnostics.is_empty());

    let extent = outcome.extent.unwrap();
    assert!((extent.center.0 - 10.70).abs() < 1e-9);

    let reparsed = load_geojson(&outcome.export.bytes).unwrap();
    assert_eq!(reparsed.len(), outcome.rows);
    assert_eq!(
        reparsed.schema().names().collect::<Vec<_>>(),
        outcome.result.schema().names().collect::<Vec<_>>()
    );
}

#[test]
fn exported_intersects_join_round_trips() {
    let schools = load_geojson(&schools(None)).unwrap();
    let districts = load_geojson(&districts()).unwrap();
    let joined = spatial_join(
        &districts,
        &schools,
        SpatialPredicate::Intersects,
        SpatialHow::Inner,
    )
    .unwrap();

    let reparsed = load_geojson(&export(&joined).unwrap()).unwrap();
    assert_eq!(reparsed.len(), joined.len());
    assert_eq!(
        reparsed.schema().names().collect::<Vec<_>>(),
        joined.schema().names().collect::<Vec<_>>()
    );
    for (a, b) in reparsed.features().iter().zip(joined.features()) {
        assert_eq!(a.geometry, b.geometry);
    }
}

#[test]
fn attribute_outer_join_through_pipeline() {
    let schools = schools(None);
    let districts = districts();
    let spec = JoinSpec::attribute("code", "code", "outer").unwrap();

    let outcome = Pipeline::new(PipelineConfig::default().with_preview_rows(2))
        .run(geojson(&districts), geojson(&schools), &spec)
        .unwrap();

    // districts 1, 2 against schools "2", "9", "1": two matches, one unmatched school
    assert_eq!(outcome.rows, 3);
    assert_eq!(outcome.preview.rows.len(), 2);
    assert_eq!(outcome.preview.columns, vec!["district", "code", "school"]);
    let unmatched = outcome.result.features().last().unwrap();
    assert_eq!(unmatched.geometry, None);
    assert_eq!(outcome.result.value(2, "school"), Some(&FieldValue::String("Beta".into())));
}

#[test]
fn zero_matches_is_a_distinguishable_success() {
    let schools = schools(None);
    let far = json!({
        "type": "FeatureCollection",
        "features": [{"type": "Feature", "geometry": square(-70.0, -40.0, 1.0), "properties": {"district": "Far"}}]
    })
    .to_string()
    .into_bytes();

    let outcome = Pipeline::default()
        .run(geojson(&schools), geojson(&far), &JoinSpec::spatial("intersects", "inner").unwrap())
        .unwrap();

    assert!(outcome.is_empty());
    assert!(outcome.extent.is_none());
    assert!(outcome.diagnostics.contains(&Diagnostic::EmptyResult));
    let json: JsonValue = serde_json::from_slice(&outcome.export.bytes).unwrap();
    assert_eq!(json["features"], json!([]));
}

#[test]
fn secondary_is_reprojected_into_primary_frame() {
    let districts = load_geojson(&districts()).unwrap();
    let schools = load_geojson(&schools(None)).unwrap();

    // Move the schools to Web Mercator first, then reconcile them back.
    let mercator = reproject(schools.clone(), &Crs::epsg(3857), Stage::Reconcile).unwrap();
    assert_ne!(mercator.features()[0].geometry, schools.features()[0].geometry);

    let reconciled = reconcile(districts.clone(), mercator, &Crs::wgs84()).unwrap();
    assert_eq!(
        reconciled.reprojected,
        Some((Crs::epsg(3857), Crs::epsg(4326)))
    );
    assert!(reconciled.primary.crs().is_wgs84());
    assert_eq!(reconciled.primary, districts);

    // Point-in-polygon relationships survive the round trip.
    let west = districts.features()[0].geometry.clone().unwrap();
    let inside: Vec<bool> = reconciled
        .secondary
        .geometries()
        .map(|g| match g {
            Geometry::Point(p) => west.contains(p),
            _ => false,
        })
        .collect();
    assert_eq!(inside, vec![true, false, false]);
}

#[test]
fn mercator_secondary_joins_after_reconciliation() {
    let districts = districts();
    let schools = schools(Some("EPSG:3857"));
    // Coordinates are lon/lat labelled as metres: after reprojection they all
    // collapse near null island and match nothing.
    let outcome = Pipeline::default()
        .run(geojson(&districts), geojson(&schools), &left_intersects())
        .unwrap();

    assert_eq!(outcome.rows, 2);
    assert!(outcome.diagnostics.contains(&Diagnostic::SecondaryReprojected {
        from: Crs::epsg(3857),
        to: Crs::epsg(4326),
    }));
    assert!(outcome
        .result
        .features()
        .iter()
        .all(|f| f.values[2] == FieldValue::Null));
}

#[test]
fn shapefile_without_prj_assumes_default_crs() {
    let scratch = tempfile::tempdir().unwrap();
    let stops = stops_archive();
    let districts = districts();
    let outcome = Pipeline::new(PipelineConfig::default().with_scratch_dir(scratch.path()))
        .run(
            Input::new(&stops, ContainerKind::ShapefileArchive),
            geojson(&districts),
            &JoinSpec::spatial("within", "inner").unwrap(),
        )
        .unwrap();

    assert_eq!(outcome.rows, 2);
    assert_eq!(
        outcome.preview.columns,
        vec!["name", "code_left", "district", "code_right"]
    );
    assert_eq!(outcome.result.value(0, "district"), Some(&FieldValue::String("West".into())));
    assert!(outcome.diagnostics.contains(&Diagnostic::DefaultCrsAssumed {
        side: Side::Primary,
        crs: Crs::wgs84(),
    }));
    assert!(outcome.result.crs().is_wgs84());
    // extraction workspace is gone after a successful load too
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn shapefile_keys_match_geojson_keys() {
    let stops = stops_archive();
    let districts = districts();
    let outcome = Pipeline::default()
        .run(
            Input::new(&stops, ContainerKind::ShapefileArchive),
            geojson(&districts),
            &JoinSpec::attribute("code", "code", "inner").unwrap(),
        )
        .unwrap();

    assert_eq!(outcome.rows, 2);
    assert_eq!(outcome.result.value(1, "district"), Some(&FieldValue::String("East".into())));
    assert_eq!(outcome.geometry_types, vec!["Point"]);
}

#[test]
fn left_join_keeps_every_primary_feature() {
    let schools = schools(None);
    let districts = districts();
    let outcome = Pipeline::default()
        .run(geojson(&schools), geojson(&districts), &left_intersects())
        .unwrap();
    assert_eq!(outcome.rows, 3);
}

#[test]
fn empty_geojson_fails_at_load() {
    let empty = br#"{"type":"FeatureCollection","features":[]}"#;
    let districts = districts();
    let spec = JoinSpec::spatial("intersects", "inner").unwrap();
    let err = Pipeline::default()
        .run(geojson(empty), geojson(&districts), &spec)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyContainer);
    assert_eq!(err.stage(), Stage::Load);
}

#[test]
fn shapeless_archive_fails_without_residue() {
    let scratch = tempfile::tempdir().unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    writer.start_file("layer/layer.dbf", options).unwrap();
    writer.write_all(b"attributes only").unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let districts = districts();
    let pipeline = Pipeline::new(PipelineConfig::default().with_scratch_dir(scratch.path()));
    let err = pipeline
        .run(
            Input::new(&archive, ContainerKind::ShapefileArchive),
            geojson(&districts),
            &JoinSpec::attribute("code", "code", "inner").unwrap(),
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingGeometryHeader);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn missing_key_names_the_side() {
    let schools = schools(None);
    let districts = districts();
    let err = Pipeline::default()
        .run(
            geojson(&districts),
            geojson(&schools),
            &JoinSpec::attribute("code", "district", "left").unwrap(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    assert!(matches!(err, geojoin::PipelineError::KeyNotFound { side: Side::Secondary, .. }));
}

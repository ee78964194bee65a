use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use geo::Geometry;
use geojson::GeoJson;
use serde_json::Value as JsonValue;
use shapefile::dbase;
use shapefile::{Shape, ShapeReader};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::crs::Crs;
use crate::error::{PipelineError, Result};
use crate::feature::{Feature, FeatureCollection, FieldValue, Schema};

/// Declared kind of an uploaded container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    ShapefileArchive,
    GeoJson,
}

impl ContainerKind {
    /// Guesses the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" | "shapefile" | "shp" => Ok(ContainerKind::ShapefileArchive),
            "geojson" | "json" => Ok(ContainerKind::GeoJson),
            other => Err(format!("unknown container kind '{}'", other)),
        }
    }
}

/// Loads a container of the declared kind.
///
/// `scratch` overrides where the extraction workspace for archives is
/// created; the system temp directory is used otherwise.
pub fn load(
    bytes: &[u8],
    kind: ContainerKind,
    scratch: Option<&Path>,
) -> Result<FeatureCollection> {
    let collection = match kind {
        ContainerKind::ShapefileArchive => load_archive(bytes, scratch)?,
        ContainerKind::GeoJson => load_geojson(bytes)?,
    };
    info!(
        features = collection.len(),
        fields = collection.schema().len(),
        crs = %collection.crs(),
        "Loaded container"
    );
    Ok(collection)
}

/// Extracts a zip archive and reads the first shapefile found in it.
pub fn load_archive(bytes: &[u8], scratch: Option<&Path>) -> Result<FeatureCollection> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::CorruptArchive(e.to_string()))?;

    let mut builder = tempfile::Builder::new();
    builder.prefix("geojoin-");
    let workspace = match scratch {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(PipelineError::unreadable)?;

    archive.extract(workspace.path()).map_err(|e| match e {
        ZipError::Io(io) => PipelineError::unreadable(io),
        other => PipelineError::CorruptArchive(other.to_string()),
    })?;

    let header =
        find_geometry_header(workspace.path()).ok_or(PipelineError::MissingGeometryHeader)?;
    debug!(header = %header.display(), "Selected shapefile header");
    let collection = read_shapefile(&header)?;

    if let Err(e) = workspace.close() {
        warn!(error = %e, "Failed to remove extraction workspace");
    }
    Ok(collection)
}

/// First `.shp` file in a sorted recursive walk of `root`.
fn find_geometry_header(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !is_resource_fork(entry.path()))
        .find(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
        })
        .map(|entry| entry.into_path())
}

/// macOS archivers add `__MACOSX/._name.shp` entries that are not shapefiles.
fn is_resource_fork(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "__MACOSX")
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("._"))
}

fn read_shapefile(header: &Path) -> Result<FeatureCollection> {
    let shp = open(header)?;
    let shape_reader = match companion(header, "shx") {
        Some(shx) => ShapeReader::with_shx(shp, open(&shx)?),
        None => ShapeReader::new(shp),
    }
    .map_err(PipelineError::unreadable)?;
    let dbf = companion(header, "dbf")
        .ok_or_else(|| PipelineError::unreadable("shapefile has no .dbf companion"))?;
    let dbase_reader = dbase::Reader::new(open(&dbf)?).map_err(PipelineError::unreadable)?;

    // Record maps are unordered; the .dbf header gives the column order.
    let schema = Schema::from_names(dbase_reader.fields().iter().map(|f| f.name().to_string()));
    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

    let mut features = Vec::new();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item.map_err(PipelineError::unreadable)?;
        let geometry = shape_to_geometry(shape)?;
        let values = schema
            .names()
            .map(|name| record.get(name).map(dbase_value).unwrap_or_default())
            .collect();
        features.push(Feature::new(geometry, values));
    }
    if features.is_empty() {
        return Err(PipelineError::EmptyContainer);
    }

    Ok(FeatureCollection::new(schema, features, read_prj(header)))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(PipelineError::unreadable)
}

/// Sibling of `header` with the same stem and `extension`, ignoring case.
/// Archives written on Windows often carry `STOPS.SHP` next to `STOPS.DBF`.
fn companion(header: &Path, extension: &str) -> Option<PathBuf> {
    let exact = header.with_extension(extension);
    if exact.is_file() {
        return Some(exact);
    }
    let stem = header.file_stem()?.to_str()?;
    let mut siblings: Vec<PathBuf> = fs::read_dir(header.parent()?)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    siblings.sort();
    siblings.into_iter().find(|path| {
        let same_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case(stem));
        let same_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        same_stem && same_extension
    })
}

fn shape_to_geometry(shape: Shape) -> Result<Option<Geometry<f64>>> {
    match shape {
        Shape::NullShape => Ok(None),
        shape => Geometry::<f64>::try_from(shape)
            .map(Some)
            .map_err(PipelineError::unreadable),
    }
}

fn read_prj(header: &Path) -> Crs {
    match companion(header, "prj").map(fs::read_to_string) {
        Some(Ok(wkt)) => Crs::from_prj(&wkt),
        _ => {
            debug!("No .prj next to shapefile, CRS is undefined");
            Crs::undefined()
        }
    }
}

fn dbase_value(value: &dbase::FieldValue) -> FieldValue {
    use dbase::FieldValue as Dbf;

    match value {
        Dbf::Character(Some(s)) => FieldValue::String(s.trim_end().to_string()),
        Dbf::Memo(s) => FieldValue::String(s.clone()),
        Dbf::Numeric(Some(n)) => FieldValue::Number(*n),
        Dbf::Float(Some(n)) => FieldValue::Number(f64::from(*n)),
        Dbf::Integer(n) => FieldValue::Number(f64::from(*n)),
        Dbf::Double(n) | Dbf::Currency(n) => FieldValue::Number(*n),
        Dbf::Logical(Some(b)) => FieldValue::Bool(*b),
        Dbf::Date(Some(date)) => FieldValue::String(format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            date.month(),
            date.day()
        )),
        _ => FieldValue::Null,
    }
}

/// Parses a GeoJSON document. A bare `Feature` or `Geometry` is accepted as
/// a one-feature collection.
pub fn load_geojson(bytes: &[u8]) -> Result<FeatureCollection> {
    let text = std::str::from_utf8(bytes).map_err(PipelineError::unreadable)?;
    let geojson: GeoJson = text.parse().map_err(PipelineError::unreadable)?;

    let (features, crs) = match geojson {
        GeoJson::FeatureCollection(fc) => {
            let crs = fc
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs"))
                .and_then(crs_member)
                .unwrap_or_else(Crs::wgs84);
            (fc.features, crs)
        }
        GeoJson::Feature(feature) => (vec![feature], Crs::wgs84()),
        GeoJson::Geometry(geometry) => (
            vec![geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
            Crs::wgs84(),
        ),
    };
    if features.is_empty() {
        return Err(PipelineError::EmptyContainer);
    }

    let schema = Schema::from_names(
        features
            .iter()
            .filter_map(|f| f.properties.as_ref())
            .flat_map(|properties| properties.keys().cloned()),
    );

    let total_features = features.len();
    let mut rows = Vec::with_capacity(total_features);
    for (feature_count, feature) in features.into_iter().enumerate() {
        if (feature_count + 1) % 10_000 == 0 {
            debug!("Processing feature {}/{}", feature_count + 1, total_features);
        }
        let geometry = feature
            .geometry
            .map(Geometry::<f64>::try_from)
            .transpose()
            .map_err(PipelineError::unreadable)?;
        let values = match &feature.properties {
            Some(properties) => schema
                .names()
                .map(|name| properties.get(name).map(FieldValue::from_json).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        };
        rows.push(Feature::new(geometry, values));
    }

    Ok(FeatureCollection::new(schema, rows, crs))
}

/// Reads a legacy `"crs": {"type": "name", "properties": {"name": ...}}` member.
fn crs_member(member: &JsonValue) -> Option<Crs> {
    let name = member.get("properties")?.get("name")?.as_str()?;
    Some(Crs::parse(name)).filter(Crs::is_defined)
}

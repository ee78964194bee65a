use std::fmt;
use std::sync::OnceLock;

use proj::{Proj, Transform};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{PipelineError, Result, Stage};
use crate::feature::{FeatureCollection, Side};

/// Geographic WGS84, longitude/latitude.
pub const WGS84: &str = "EPSG:4326";

/// Coordinate reference system identifier, or undefined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Crs(Option<String>);

impl Crs {
    pub fn undefined() -> Self {
        Crs(None)
    }

    pub fn wgs84() -> Self {
        Crs(Some(WGS84.to_string()))
    }

    pub fn epsg(code: u32) -> Self {
        Crs(Some(format!("EPSG:{}", code)))
    }

    /// Parses an identifier: `EPSG:n`, OGC URNs/URIs, `CRS84`, or any other
    /// PROJ-understood definition kept verbatim. Blank input is undefined.
    pub fn parse(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Crs::undefined();
        }
        if let Some(code) = epsg_code_in(identifier) {
            return Crs::epsg(code);
        }
        if crs84_regex().is_match(identifier) {
            return Crs::wgs84();
        }
        Crs(Some(identifier.to_string()))
    }

    /// Identifies the CRS described by a shapefile `.prj` WKT.
    pub fn from_prj(wkt: &str) -> Self {
        let wkt = wkt.trim();
        if wkt.is_empty() {
            return Crs::undefined();
        }
        // The top-level AUTHORITY closes the WKT, so the last one wins.
        if let Some(code) = authority_regex()
            .captures_iter(wkt)
            .last()
            .and_then(|c| c[1].parse().ok())
        {
            return Crs::epsg(code);
        }
        if wkt.contains("WGS_1984_Web_Mercator") {
            return Crs::epsg(3857);
        }
        if wkt.starts_with("GEOGCS") && wkt.contains("GCS_WGS_1984") {
            return Crs::wgs84();
        }
        Crs(Some(wkt.to_string()))
    }

    pub fn is_defined(&self) -> bool {
        self.0.is_some()
    }

    pub fn definition(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn epsg_code(&self) -> Option<u32> {
        self.0
            .as_deref()
            .and_then(|s| s.strip_prefix("EPSG:"))
            .and_then(|code| code.parse().ok())
    }

    pub fn is_wgs84(&self) -> bool {
        self.0.as_deref() == Some(WGS84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(definition) => f.write_str(definition),
            None => f.write_str("undefined"),
        }
    }
}

fn epsg_code_in(identifier: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?:epsg:|urn:ogc:def:crs:epsg:[^:]*:",
            r"|https?://www\.opengis\.net/def/crs/epsg/[^/]*/)(\d+)$"
        ))
        .expect("valid EPSG pattern")
    });
    re.captures(identifier).and_then(|c| c[1].parse().ok())
}

fn crs84_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:urn:ogc:def:crs:ogc:[^:]*:)?crs84$").expect("valid CRS84 pattern")
    })
}

fn authority_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).expect("valid AUTHORITY pattern")
    })
}

/// Transforms every geometry of `collection` into `target`.
///
/// A collection already in `target` is returned untouched. The source CRS
/// must be defined; assumption of a default happens in [`reconcile`].
pub fn reproject(
    mut collection: FeatureCollection,
    target: &Crs,
    stage: Stage,
) -> Result<FeatureCollection> {
    let source = collection.crs().clone();
    if &source == target {
        return Ok(collection);
    }
    let failure = |reason: String| PipelineError::Reprojection {
        stage,
        from: source.clone(),
        to: target.clone(),
        reason,
    };
    let (Some(from), Some(to)) = (source.definition(), target.definition()) else {
        return Err(failure("both CRSs must be defined".to_string()));
    };

    let transform = Proj::new_known_crs(from, to, None).map_err(|e| failure(e.to_string()))?;
    debug!(from, to, features = collection.len(), "Reprojecting collection");
    for geometry in collection.geometries_mut() {
        geometry
            .transform(&transform)
            .map_err(|e| failure(e.to_string()))?;
    }
    Ok(collection.with_crs(target.clone()))
}

/// Two collections expressed in one CRS, plus what it took to get there.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub primary: FeatureCollection,
    pub secondary: FeatureCollection,
    /// Sides that had no CRS and were labelled with the default.
    pub assumed: Vec<Side>,
    /// `(from, to)` when the secondary was reprojected.
    pub reprojected: Option<(Crs, Crs)>,
}

/// Labels undefined CRSs with `default_crs` (no coordinate change).
pub fn assume_default(
    collection: FeatureCollection,
    default_crs: &Crs,
) -> (FeatureCollection, bool) {
    if collection.crs().is_defined() {
        (collection, false)
    } else {
        (collection.with_crs(default_crs.clone()), true)
    }
}

/// Brings `secondary` into `primary`'s CRS. The primary is the reference
/// frame and is never reprojected, so swapping the inputs changes the result.
pub fn reconcile(
    primary: FeatureCollection,
    secondary: FeatureCollection,
    default_crs: &Crs,
) -> Result<Reconciled> {
    let mut assumed = Vec::new();
    let (primary, primary_assumed) = assume_default(primary, default_crs);
    if primary_assumed {
        assumed.push(Side::Primary);
    }
    let (secondary, secondary_assumed) = assume_default(secondary, default_crs);
    if secondary_assumed {
        assumed.push(Side::Secondary);
    }

    let target = primary.crs().clone();
    let source = secondary.crs().clone();
    let (secondary, reprojected) = if source == target {
        (secondary, None)
    } else {
        info!(from = %source, to = %target, "Reprojecting secondary collection");
        let secondary = reproject(secondary, &target, Stage::Reconcile)?;
        (secondary, Some((source, target)))
    };

    Ok(Reconciled {
        primary,
        secondary,
        assumed,
        reprojected,
    })
}

/// Fails with `CrsMismatch` unless both collections share one CRS.
pub fn ensure_same_crs(primary: &FeatureCollection, secondary: &FeatureCollection) -> Result<()> {
    if primary.crs() == secondary.crs() {
        Ok(())
    } else {
        Err(PipelineError::CrsMismatch {
            primary: primary.crs().clone(),
            secondary: secondary.crs().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, Schema};
    use geo::{point, Geometry};

    fn points(crs: Crs) -> FeatureCollection {
        let features = vec![Feature::new(Some(point!(x: 10.5, y: 59.9).into()), vec![])];
        FeatureCollection::new(Schema::default(), features, crs)
    }

    #[test]
    fn parses_common_identifiers() {
        assert_eq!(Crs::parse("epsg:3857"), Crs::epsg(3857));
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::25833"), Crs::epsg(25833));
        assert_eq!(
            Crs::parse("http://www.opengis.net/def/crs/EPSG/0/4258"),
            Crs::epsg(4258)
        );
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84"), Crs::wgs84());
        assert_eq!(Crs::parse("  "), Crs::undefined());
        assert_eq!(Crs::parse("+proj=longlat +datum=WGS84").epsg_code(), None);
    }

    #[test]
    fn prj_uses_top_level_authority() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 33N",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],AUTHORITY["EPSG","32633"]]"#;
        assert_eq!(Crs::from_prj(wkt), Crs::epsg(32633));
    }

    #[test]
    fn prj_recognizes_esri_names() {
        let geographic = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert!(Crs::from_prj(geographic).is_wgs84());
        let mercator = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"]]"#;
        assert_eq!(Crs::from_prj(mercator), Crs::epsg(3857));
        assert_eq!(Crs::from_prj(""), Crs::undefined());
    }

    #[test]
    fn undefined_side_is_labelled_not_moved() {
        let reconciled = reconcile(points(Crs::undefined()), points(Crs::wgs84()), &Crs::wgs84())
            .unwrap();
        assert_eq!(reconciled.assumed, vec![Side::Primary]);
        assert!(reconciled.reprojected.is_none());
        assert!(reconciled.primary.crs().is_wgs84());
        assert_eq!(
            reconciled.primary.features()[0].geometry,
            Some(Geometry::Point(point!(x: 10.5, y: 59.9)))
        );
    }

    #[test]
    fn mismatch_is_reported() {
        let err = ensure_same_crs(&points(Crs::wgs84()), &points(Crs::epsg(3857))).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CrsMismatch);
    }
}

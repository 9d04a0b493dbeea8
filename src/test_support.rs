//! Shared fixtures for the unit tests.

use crate::types::{AdminAttributes, EducationCenter, InstitutionKind, Region};
use geo::{polygon, MultiPolygon};
use std::path::PathBuf;
use tempfile::TempDir;

/// Two 0.1° cantons side by side, split at longitude -84.1.
pub const REGIONS_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "CANTÓN": "Oeste", "PROVINCIA": "San José" },
      "geometry": { "type": "Polygon", "coordinates": [[[-84.2, 9.9], [-84.1, 9.9], [-84.1, 10.0], [-84.2, 10.0], [-84.2, 9.9]]] }
    },
    {
      "type": "Feature",
      "properties": { "CANTÓN": "Este", "PROVINCIA": "Heredia" },
      "geometry": { "type": "MultiPolygon", "coordinates": [[[[-84.1, 9.9], [-84.0, 9.9], [-84.0, 10.0], [-84.1, 10.0], [-84.1, 9.9]]]] }
    }
  ]
}"#;

pub fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write fixture");
    path
}

pub fn square(min_lon: f64, min_lat: f64, size: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: min_lon, y: min_lat),
        (x: min_lon + size, y: min_lat),
        (x: min_lon + size, y: min_lat + size),
        (x: min_lon, y: min_lat + size),
        (x: min_lon, y: min_lat),
    ]])
}

pub fn region(name: &str, province: &str, geometry: MultiPolygon<f64>) -> Region {
    Region {
        name: name.to_string(),
        province: province.to_string(),
        geometry,
    }
}

/// The two cantons of [`REGIONS_GEOJSON`].
pub fn two_regions() -> Vec<Region> {
    vec![
        region("Oeste", "San José", square(-84.2, 9.9, 0.1)),
        region("Este", "Heredia", square(-84.1, 9.9, 0.1)),
    ]
}

pub fn center(id: &str, kind: Option<InstitutionKind>, latitude: f64, longitude: f64) -> EducationCenter {
    EducationCenter {
        id: id.to_string(),
        name: format!("Centro {id}"),
        kind,
        latitude,
        longitude,
        admin: AdminAttributes::default(),
    }
}

pub fn public(id: &str, latitude: f64, longitude: f64) -> EducationCenter {
    center(id, Some(InstitutionKind::Public), latitude, longitude)
}

pub fn private(id: &str, latitude: f64, longitude: f64) -> EducationCenter {
    center(id, Some(InstitutionKind::Private), latitude, longitude)
}

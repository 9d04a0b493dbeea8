use crate::aggregate::EnrichedRegion;
use crate::pipeline::Dataset;
use anyhow::{Context, Result};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct RegionRow<'a> {
    name: &'a str,
    province: &'a str,
    total_centers: usize,
    public_centers: usize,
    private_centers: usize,
    population_total: Option<u64>,
    area_km2: f64,
    density_centers_km2: Option<f64>,
    density_population_km2: Option<f64>,
    centers_per_10k_inhabitants: Option<f64>,
}

impl<'a> From<&'a EnrichedRegion> for RegionRow<'a> {
    fn from(r: &'a EnrichedRegion) -> Self {
        Self {
            name: &r.name,
            province: &r.province,
            total_centers: r.counts.total_centers,
            public_centers: r.counts.public_centers,
            private_centers: r.counts.private_centers,
            population_total: r.population_total,
            area_km2: r.metrics.area_km2,
            density_centers_km2: r.metrics.density_centers_km2,
            density_population_km2: r.metrics.density_population_km2,
            centers_per_10k_inhabitants: r.metrics.centers_per_10k_inhabitants,
        }
    }
}

#[derive(Serialize)]
struct AssignmentRow<'a> {
    center_id: &'a str,
    center_name: &'a str,
    kind: &'a str,
    latitude: f64,
    longitude: f64,
    region: Option<&'a str>,
}

/// Enriched region table. Undefined metrics are empty cells.
pub fn write_region_table(regions: &[EnrichedRegion], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for region in regions {
        wtr.serialize(RegionRow::from(region))?;
    }
    wtr.flush()?;
    Ok(())
}

/// One row per center with the region it fell in, empty when unmatched.
pub fn write_assignments(data: &Dataset, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for (i, center) in data.centers.iter().enumerate() {
        wtr.serialize(AssignmentRow {
            center_id: &center.id,
            center_name: &center.name,
            kind: center.kind.map_or("", |k| k.label()),
            latitude: center.latitude,
            longitude: center.longitude,
            region: data.region_of(i).map(|r| r.name.as_str()),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// FeatureCollection pairing each region's properties with a geometry,
/// typically the simplified layer.
pub fn region_feature_collection(
    regions: &[EnrichedRegion],
    geometries: &[MultiPolygon<f64>],
) -> FeatureCollection {
    let features = regions
        .iter()
        .zip(geometries)
        .map(|(region, geometry)| {
            let mut properties = JsonObject::new();
            if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(RegionRow::from(region)) {
                properties.extend(map);
            }
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_region_geojson(
    regions: &[EnrichedRegion],
    geometries: &[MultiPolygon<f64>],
    path: &Path,
) -> Result<()> {
    let collection = region_feature_collection(regions, geometries);
    fs::write(path, collection.to_string())
        .with_context(|| format!("Failed to write {:?}", path))
}

/// Writes `regions.csv`, `assignments.csv` and `regions.geojson` into `dir`.
pub fn write_all(data: &Dataset, dir: &Path, tolerance: f64) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output dir {:?}", dir))?;

    let regions_csv = dir.join("regions.csv");
    write_region_table(&data.regions, &regions_csv)?;

    let assignments_csv = dir.join("assignments.csv");
    write_assignments(data, &assignments_csv)?;

    let geojson = dir.join("regions.geojson");
    write_region_geojson(&data.regions, &data.simplified_regions(tolerance), &geojson)?;

    info!("Wrote outputs to {:?}", dir);
    Ok(vec![regions_csv, assignments_csv, geojson])
}

//! Per-region statistics: counts, projected area, densities and per-capita
//! rates.

use crate::data::PopulationTable;
use crate::error::{Metric, ReprojectionError, UndefinedMetric, UndefinedReason};
use crate::join::KindCounts;
use crate::projection::{Crs, Transformer};
use crate::types::{Region, RegionGeometry};
use geo::{Area, MultiPolygon};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionCounts {
    pub total_centers: usize,
    pub public_centers: usize,
    pub private_centers: usize,
}

/// Metrics derived from counts, population and area. `None` means undefined;
/// the reason is in `warnings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub area_m2: f64,
    pub area_km2: f64,
    pub density_centers_km2: Option<f64>,
    pub density_population_km2: Option<f64>,
    pub centers_per_10k_inhabitants: Option<f64>,
    pub warnings: Vec<UndefinedMetric>,
}

impl DerivedMetrics {
    pub fn compute(counts: RegionCounts, population: Option<u64>, area_m2: f64) -> Self {
        let area_km2 = area_m2 / 1_000_000.0;
        let total = counts.total_centers as f64;
        let mut warnings = Vec::new();

        let mut record = |metric: Metric, value: Result<f64, UndefinedReason>| match value {
            Ok(v) => Some(v),
            Err(reason) => {
                warnings.push(UndefinedMetric { metric, reason });
                None
            }
        };

        let density_centers_km2 = record(
            Metric::DensityCentersKm2,
            ratio(total, area_km2, UndefinedReason::ZeroArea),
        );

        let density_population_km2 = record(
            Metric::DensityPopulationKm2,
            population
                .ok_or(UndefinedReason::MissingPopulation)
                .and_then(|p| ratio(p as f64, area_km2, UndefinedReason::ZeroArea)),
        );

        let centers_per_10k_inhabitants = record(
            Metric::CentersPer10kInhabitants,
            population
                .ok_or(UndefinedReason::MissingPopulation)
                .and_then(|p| ratio(total, p as f64, UndefinedReason::ZeroPopulation))
                .map(|rate| rate * 10_000.0),
        );

        Self {
            area_m2,
            area_km2,
            density_centers_km2,
            density_population_km2,
            centers_per_10k_inhabitants,
            warnings,
        }
    }
}

fn ratio(numerator: f64, denominator: f64, zero: UndefinedReason) -> Result<f64, UndefinedReason> {
    if denominator == 0.0 {
        return Err(zero);
    }
    let value = numerator / denominator;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(UndefinedReason::NonFinite)
    }
}

/// One row of the enriched region table.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRegion {
    pub name: String,
    pub province: String,
    /// Source geometry, still in WGS84.
    #[serde(skip)]
    pub geometry: MultiPolygon<f64>,
    #[serde(flatten)]
    pub counts: RegionCounts,
    pub population_total: Option<u64>,
    #[serde(flatten)]
    pub metrics: DerivedMetrics,
}

impl RegionGeometry for EnrichedRegion {
    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }
}

/// Transformer for area measurement; geographic targets are refused.
fn area_transformer(crs: &Crs) -> Result<Transformer, ReprojectionError> {
    if !crs.is_projected() {
        return Err(ReprojectionError::NotProjected(crs.code()));
    }
    crs.transformer()
}

/// Area of a WGS84 geometry measured in `crs`, in square metres.
pub fn projected_area_m2(geometry: &MultiPolygon<f64>, crs: &Crs) -> Result<f64, ReprojectionError> {
    let transformer = area_transformer(crs)?;
    Ok(transformer.project(geometry)?.unsigned_area())
}

/// Merges the count series and population onto the region table and derives
/// the metrics. Regions keep their input order.
pub fn enrich_regions(
    regions: Vec<Region>,
    counts: &KindCounts,
    population: &PopulationTable,
    crs: &Crs,
) -> Result<Vec<EnrichedRegion>, ReprojectionError> {
    info!("Computing areas in {} for {} regions", crs.code(), regions.len());
    let transformer = area_transformer(crs)?;

    let mut enriched = Vec::with_capacity(regions.len());
    let mut missing_population = 0usize;

    for (index, region) in regions.into_iter().enumerate() {
        let region_counts = RegionCounts {
            total_centers: counts.total.get(index),
            public_centers: counts.public.get(index),
            private_centers: counts.private.get(index),
        };
        let population_total = population.get(&region.name);
        if population_total.is_none() {
            missing_population += 1;
        }

        let area_m2 = transformer.project(&region.geometry)?.unsigned_area();
        if area_m2 <= 0.0 {
            warn!("Region '{}' has zero projected area", region.name);
        }

        let metrics = DerivedMetrics::compute(region_counts, population_total, area_m2);
        enriched.push(EnrichedRegion {
            name: region.name,
            province: region.province,
            geometry: region.geometry,
            counts: region_counts,
            population_total,
            metrics,
        });
    }

    if missing_population > 0 {
        warn!("{} regions have no population total", missing_population);
    }
    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{join_centers, RegionIndex};
    use crate::test_support::{private, public, region, square, two_regions};
    use approx::assert_relative_eq;
    use geo::GeodesicArea;

    fn counts(total: usize, public: usize, private: usize) -> RegionCounts {
        RegionCounts {
            total_centers: total,
            public_centers: public,
            private_centers: private,
        }
    }

    #[test]
    fn density_from_counts_and_area() {
        let m = DerivedMetrics::compute(counts(42, 30, 12), Some(84_000), 21_000_000.0);
        assert_eq!(m.area_km2, 21.0);
        assert_eq!(m.density_centers_km2, Some(2.0));
        assert_eq!(m.density_population_km2, Some(4000.0));
        assert_relative_eq!(m.centers_per_10k_inhabitants.unwrap(), 5.0);
        assert!(m.warnings.is_empty());
    }

    #[test]
    fn missing_population_leaves_center_density_defined() {
        let m = DerivedMetrics::compute(counts(42, 42, 0), None, 21_000_000.0);
        assert_eq!(m.density_centers_km2, Some(2.0));
        assert_eq!(m.density_population_km2, None);
        assert_eq!(m.centers_per_10k_inhabitants, None);
        assert_eq!(
            m.warnings,
            vec![
                UndefinedMetric {
                    metric: Metric::DensityPopulationKm2,
                    reason: UndefinedReason::MissingPopulation
                },
                UndefinedMetric {
                    metric: Metric::CentersPer10kInhabitants,
                    reason: UndefinedReason::MissingPopulation
                },
            ]
        );
    }

    #[test]
    fn zero_population_makes_only_the_rate_undefined() {
        let m = DerivedMetrics::compute(counts(3, 3, 0), Some(0), 1_000_000.0);
        assert_eq!(m.density_population_km2, Some(0.0));
        assert_eq!(m.centers_per_10k_inhabitants, None);
        assert_eq!(m.warnings[0].reason, UndefinedReason::ZeroPopulation);
    }

    #[test]
    fn zero_area_is_surfaced_as_undefined() {
        let m = DerivedMetrics::compute(counts(5, 5, 0), Some(100), 0.0);
        assert_eq!(m.density_centers_km2, None);
        assert_eq!(m.density_population_km2, None);
        assert_relative_eq!(m.centers_per_10k_inhabitants.unwrap(), 500.0);
        assert!(m
            .warnings
            .iter()
            .all(|w| w.reason == UndefinedReason::ZeroArea));
    }

    #[test]
    fn projected_area_agrees_with_geodesic_area() {
        let geometry = square(-84.2, 9.9, 0.1);
        let crs = Crs::from_code("EPSG:5367").unwrap();
        let projected = projected_area_m2(&geometry, &crs).unwrap();
        let geodesic = geometry.geodesic_area_unsigned();

        assert!(projected > 0.0);
        assert_relative_eq!(projected, geodesic, max_relative = 1e-3);
        // About 11.1 km by 10.95 km.
        assert!((projected / 1e6 - 121.7).abs() < 1.0);
    }

    #[test]
    fn geographic_crs_is_refused_for_areas() {
        let geometry = square(-84.2, 9.9, 0.1);
        assert_eq!(
            projected_area_m2(&geometry, &Crs::wgs84()),
            Err(ReprojectionError::NotProjected("EPSG:4326".into()))
        );
    }

    #[test]
    fn enrich_merges_counts_and_population() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        let centers = vec![
            public("a", 9.95, -84.15),
            private("b", 9.96, -84.15),
            public("c", 9.2, -84.15),
        ];
        let join = join_centers(&regions, &index, &centers);
        let kind_counts = KindCounts::from_join(&join, &centers, regions.len());
        let population: PopulationTable = [("Oeste".to_string(), 20_000)].into_iter().collect();
        let crs = Crs::from_code("EPSG:5367").unwrap();

        let enriched = enrich_regions(regions, &kind_counts, &population, &crs).unwrap();

        let oeste = &enriched[0];
        assert_eq!(oeste.counts, counts(2, 1, 1));
        assert_eq!(oeste.population_total, Some(20_000));
        assert_eq!(
            oeste.metrics.density_centers_km2,
            Some(2.0 / oeste.metrics.area_km2)
        );
        assert_relative_eq!(oeste.metrics.centers_per_10k_inhabitants.unwrap(), 1.0);

        let este = &enriched[1];
        assert_eq!(este.counts, counts(0, 0, 0));
        assert_eq!(este.metrics.density_centers_km2, Some(0.0));
        assert_eq!(este.population_total, None);
        assert_eq!(este.metrics.centers_per_10k_inhabitants, None);
    }

    #[test]
    fn reprojection_failure_aborts_enrichment() {
        // Coordinates already in metres cannot be projected again.
        let regions = vec![region("R", "P", square(500_000.0, 1_000_000.0, 1_000.0))];
        let kind_counts = KindCounts::from_join(&Default::default(), &[], 1);
        let crs = Crs::from_code("EPSG:5367").unwrap();
        assert!(matches!(
            enrich_regions(regions, &kind_counts, &PopulationTable::default(), &crs),
            Err(ReprojectionError::OutOfDomain { .. } | ReprojectionError::NonFinite { .. })
        ));
    }
}

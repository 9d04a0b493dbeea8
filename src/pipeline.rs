use crate::aggregate::{enrich_regions, EnrichedRegion};
use crate::cache::{ContentKey, KeyBuilder, MemoCache};
use crate::config::{AppConfig, ProcessingConfig};
use crate::data::{load_sources, PopulationTable};
use crate::error::PipelineError;
use crate::join::{join_centers, JoinResult, KindCounts, RegionIndex};
use crate::projection::Crs;
use crate::proximity::{ProximityIndex, ProximityResult, SearchOutcome, SearchQuery};
use crate::simplify::{simplify_multipolygon, vertex_count};
use crate::types::{EducationCenter, Region};
use geo::{MultiPolygon, Point};
use std::sync::Arc;
use tracing::info;

/// The fully derived, read-only view of one load: enriched regions, centers,
/// the center→region assignment and the indices that answer lookups.
pub struct Dataset {
    pub regions: Vec<EnrichedRegion>,
    pub centers: Vec<EducationCenter>,
    pub join: JoinResult,
    pub crs: Crs,
    region_index: RegionIndex,
    proximity: ProximityIndex,
    /// Tolerance of the published layer; only this one is memoized.
    layer_tolerance: f64,
    /// Digest of every region geometry, taken once at load.
    geometry_key: ContentKey,
    simplified: MemoCache<Vec<MultiPolygon<f64>>>,
}

impl Dataset {
    pub fn load(config: &AppConfig) -> Result<Self, PipelineError> {
        let crs = Crs::from_code(&config.processing.projection)?;
        let sources = load_sources(&config.input)?;
        Ok(
            Self::from_parts(sources.regions, sources.centers, &sources.population, crs)?
                .with_layer_tolerance(config.processing.simplify_tolerance),
        )
    }

    pub fn from_parts(
        regions: Vec<Region>,
        centers: Vec<EducationCenter>,
        population: &PopulationTable,
        crs: Crs,
    ) -> Result<Self, PipelineError> {
        let region_index = RegionIndex::build(&regions);
        let join = join_centers(&regions, &region_index, &centers);
        let counts = KindCounts::from_join(&join, &centers, regions.len());
        let regions = enrich_regions(regions, &counts, population, &crs)?;
        let proximity = ProximityIndex::build(&centers);
        let geometry_key = regions
            .iter()
            .fold(KeyBuilder::new("region_geometry"), |key, r| {
                key.multipolygon(&r.geometry)
            })
            .finish();

        info!(
            "Dataset ready: {} regions, {} centers",
            regions.len(),
            centers.len()
        );

        Ok(Self {
            regions,
            centers,
            join,
            crs,
            region_index,
            proximity,
            layer_tolerance: ProcessingConfig::default().simplify_tolerance,
            geometry_key,
            simplified: MemoCache::new(),
        })
    }

    pub fn with_layer_tolerance(mut self, tolerance: f64) -> Self {
        self.layer_tolerance = tolerance;
        self
    }

    /// Region a center was assigned to, if any.
    pub fn region_of(&self, center_index: usize) -> Option<&EnrichedRegion> {
        self.join
            .region_of(center_index)
            .and_then(|r| self.regions.get(r))
    }

    /// Region containing an arbitrary WGS84 point.
    pub fn region_at(&self, latitude: f64, longitude: f64) -> Option<&EnrichedRegion> {
        self.region_index
            .locate(&self.regions, Point::new(longitude, latitude))
            .and_then(|r| self.regions.get(r))
    }

    pub fn nearby(&self, latitude: f64, longitude: f64, radius_km: f64) -> Vec<ProximityResult<'_>> {
        self.proximity
            .within_radius(&self.centers, Point::new(longitude, latitude), radius_km)
    }

    pub fn search(&self, query: &SearchQuery, radius_km: f64) -> Option<SearchOutcome<'_>> {
        self.proximity.search(&self.centers, query, radius_km)
    }

    /// Region geometries simplified at `tolerance`, in table order. The
    /// configured layer tolerance is computed once and shared; any other
    /// tolerance is computed per call and not retained.
    pub fn simplified_regions(&self, tolerance: f64) -> Arc<Vec<MultiPolygon<f64>>> {
        if tolerance.to_bits() != self.layer_tolerance.to_bits() {
            return Arc::new(self.simplify_all(tolerance));
        }

        let key = KeyBuilder::new("simplify_regions")
            .key(self.geometry_key)
            .f64(tolerance)
            .finish();
        self.simplified
            .get_or_insert_with(key, || self.simplify_all(tolerance))
    }

    fn simplify_all(&self, tolerance: f64) -> Vec<MultiPolygon<f64>> {
        let simplified: Vec<MultiPolygon<f64>> = self
            .regions
            .iter()
            .map(|r| simplify_multipolygon(&r.geometry, tolerance))
            .collect();
        info!(
            "Simplified {} regions at tolerance {}: {} -> {} vertices",
            self.regions.len(),
            tolerance,
            self.regions.iter().map(|r| vertex_count(&r.geometry)).sum::<usize>(),
            simplified.iter().map(vertex_count).sum::<usize>()
        );
        simplified
    }
}

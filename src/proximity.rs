//! "Centers within R km of a point" queries.
//!
//! ## Two-Stage Filtering
//!
//! 1. **R-tree filter**: a latitude/longitude box around the query point,
//!    sized from the exact angular radius so it never excludes a match.
//! 2. **Haversine filter**: great-circle distance on a sphere of mean Earth
//!    radius decides membership and ordering.
//!
//! The box only saves work. Results depend on stage 2 alone, which is why the
//! box falls back to a full scan whenever it would wrap a pole or the
//! antimeridian.

use crate::types::EducationCenter;
use geo::{HaversineDistance, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::cmp::Ordering;

/// Mean Earth radius used by `geo`'s haversine, in kilometres.
pub const MEAN_EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance in kilometres between two WGS84 points.
pub fn haversine_km(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b) / 1000.0
}

#[derive(Clone)]
struct CenterNode {
    index: usize,
    point: [f64; 2],
}

impl RTreeObject for CenterNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProximityResult<'a> {
    pub center: &'a EducationCenter,
    pub distance_km: f64,
    #[serde(skip)]
    pub index: usize,
}

/// What a search is anchored on.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Coordinate { latitude: f64, longitude: f64 },
    /// A center identifier; resolved directly, no radius search.
    Center(String),
}

#[derive(Debug, Clone)]
pub enum SearchOutcome<'a> {
    Nearby(Vec<ProximityResult<'a>>),
    Located(&'a EducationCenter),
}

/// Point index over the center table. Lookups take the same slice the index
/// was built from.
pub struct ProximityIndex {
    tree: RTree<CenterNode>,
}

impl ProximityIndex {
    pub fn build(centers: &[EducationCenter]) -> Self {
        let nodes = centers
            .iter()
            .enumerate()
            .map(|(index, c)| CenterNode {
                index,
                point: [c.longitude, c.latitude],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(nodes),
        }
    }

    /// Centers within `radius_km` of `query`, nearest first; equal distances
    /// keep input order. A negative or non-finite radius, or a non-finite
    /// query point, matches nothing.
    pub fn within_radius<'a>(
        &self,
        centers: &'a [EducationCenter],
        query: Point<f64>,
        radius_km: f64,
    ) -> Vec<ProximityResult<'a>> {
        let valid_query = query.x().is_finite() && query.y().is_finite();
        if !valid_query || !radius_km.is_finite() || radius_km < 0.0 {
            return Vec::new();
        }

        let candidates: Vec<usize> = match search_box(query, radius_km) {
            Some(envelope) => self
                .tree
                .locate_in_envelope(&envelope)
                .map(|node| node.index)
                .collect(),
            None => (0..centers.len()).collect(),
        };

        let mut results: Vec<ProximityResult<'a>> = candidates
            .into_iter()
            .filter_map(|index| {
                let center = centers.get(index)?;
                let distance_km = haversine_km(query, center.point());
                (distance_km <= radius_km).then_some(ProximityResult {
                    center,
                    distance_km,
                    index,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });
        results
    }

    pub fn search<'a>(
        &self,
        centers: &'a [EducationCenter],
        query: &SearchQuery,
        radius_km: f64,
    ) -> Option<SearchOutcome<'a>> {
        match query {
            SearchQuery::Coordinate {
                latitude,
                longitude,
            } => Some(SearchOutcome::Nearby(self.within_radius(
                centers,
                Point::new(*longitude, *latitude),
                radius_km,
            ))),
            SearchQuery::Center(id) => locate_center(centers, id).map(SearchOutcome::Located),
        }
    }
}

/// Lon/lat box containing every point within `radius_km` of `query`, or
/// `None` when such a box would cross a pole or the antimeridian.
fn search_box(query: Point<f64>, radius_km: f64) -> Option<AABB<[f64; 2]>> {
    // Absorbs rounding in the degree conversions.
    const PAD_DEG: f64 = 1e-9;

    let angular = radius_km / MEAN_EARTH_RADIUS_KM;
    if angular >= std::f64::consts::FRAC_PI_2 {
        return None;
    }
    let lat = query.y();
    let dlat = angular.to_degrees() + PAD_DEG;
    if lat + dlat >= 90.0 || lat - dlat <= -90.0 {
        return None;
    }

    let ratio = angular.sin() / lat.to_radians().cos();
    if ratio >= 1.0 {
        return None;
    }
    let dlon = ratio.asin().to_degrees() + PAD_DEG;
    let lon = query.x();
    if lon - dlon < -180.0 || lon + dlon > 180.0 {
        return None;
    }

    Some(AABB::from_corners([lon - dlon, lat - dlat], [lon + dlon, lat + dlat]))
}

/// Direct lookup by identifier.
pub fn locate_center<'a>(centers: &'a [EducationCenter], id: &str) -> Option<&'a EducationCenter> {
    let id = id.trim();
    centers.iter().find(|c| c.id == id)
}

/// First center carrying exactly this name.
pub fn find_by_name<'a>(centers: &'a [EducationCenter], name: &str) -> Option<&'a EducationCenter> {
    centers.iter().find(|c| c.name == name)
}

/// Sorted, de-duplicated center names for pickers.
pub fn center_names(centers: &[EducationCenter]) -> Vec<&str> {
    let mut names: Vec<&str> = centers.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{private, public};
    use approx::assert_abs_diff_eq;

    const ORIGIN_LAT: f64 = 9.9281;
    const ORIGIN_LON: f64 = -84.0907;

    /// Latitude offset putting a point `km` due north of the origin.
    fn north(km: f64) -> f64 {
        ORIGIN_LAT + (km / MEAN_EARTH_RADIUS_KM).to_degrees()
    }

    fn origin() -> Point<f64> {
        Point::new(ORIGIN_LON, ORIGIN_LAT)
    }

    #[test]
    fn haversine_matches_known_distance() {
        // San José to Liberia is roughly 167 km as the crow flies.
        let liberia = Point::new(-85.4378, 10.6346);
        let d = haversine_km(origin(), liberia);
        assert!((d - 167.0).abs() < 15.0, "got {d}");
    }

    #[test]
    fn only_centers_within_radius_are_returned() {
        let centers = vec![
            public("far", north(1.3), ORIGIN_LON),
            public("near", north(0.8), ORIGIN_LON),
        ];
        let index = ProximityIndex::build(&centers);

        let results = index.within_radius(&centers, origin(), 1.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].center.id, "near");
        assert_abs_diff_eq!(results[0].distance_km, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn results_are_sorted_and_ties_keep_input_order() {
        let centers = vec![
            public("c", north(0.5), ORIGIN_LON),
            private("a", north(0.2), ORIGIN_LON),
            public("b", north(0.5), ORIGIN_LON),
            public("z", north(5.0), ORIGIN_LON),
            public("o", ORIGIN_LAT, ORIGIN_LON),
        ];
        let index = ProximityIndex::build(&centers);

        let results = index.within_radius(&centers, origin(), 1.0);
        let ids: Vec<&str> = results.iter().map(|r| r.center.id.as_str()).collect();
        assert_eq!(ids, vec!["o", "a", "c", "b"]);
        assert!(results.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
        assert!(results.iter().all(|r| r.distance_km <= 1.0));
    }

    #[test]
    fn repeated_queries_are_identical() {
        let centers: Vec<_> = (0..50)
            .map(|i| {
                let offset = (i as f64) * 0.0007;
                public(&i.to_string(), ORIGIN_LAT + offset, ORIGIN_LON - offset)
            })
            .collect();
        let index = ProximityIndex::build(&centers);

        let first: Vec<(usize, f64)> = index
            .within_radius(&centers, origin(), 2.0)
            .iter()
            .map(|r| (r.index, r.distance_km))
            .collect();
        let second: Vec<(usize, f64)> = index
            .within_radius(&centers, origin(), 2.0)
            .iter()
            .map(|r| (r.index, r.distance_km))
            .collect();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn prefilter_never_drops_a_match() {
        // Points scattered east and west where a fixed 0.01° box would cut
        // off matches at this latitude.
        let centers: Vec<_> = (0..40)
            .map(|i| {
                let dlon = (i as f64 - 20.0) * 0.0006;
                public(&i.to_string(), ORIGIN_LAT + 0.0005, ORIGIN_LON + dlon)
            })
            .collect();
        let index = ProximityIndex::build(&centers);

        for radius in [0.1, 0.5, 1.0, 1.5] {
            let indexed: Vec<usize> = index
                .within_radius(&centers, origin(), radius)
                .iter()
                .map(|r| r.index)
                .collect();
            let mut brute: Vec<(f64, usize)> = centers
                .iter()
                .enumerate()
                .map(|(i, c)| (haversine_km(origin(), c.point()), i))
                .filter(|(d, _)| *d <= radius)
                .collect();
            brute.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let brute: Vec<usize> = brute.into_iter().map(|(_, i)| i).collect();
            assert_eq!(indexed, brute, "radius {radius}");
        }
    }

    #[test]
    fn queries_near_the_antimeridian_fall_back_to_a_scan() {
        let centers = vec![public("east", 0.0, 179.999), public("west", 0.0, -179.999)];
        let index = ProximityIndex::build(&centers);

        let results = index.within_radius(&centers, Point::new(180.0, 0.0), 1.0);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn invalid_radius_or_query_matches_nothing() {
        let centers = vec![public("a", ORIGIN_LAT, ORIGIN_LON)];
        let index = ProximityIndex::build(&centers);

        assert!(index.within_radius(&centers, origin(), -1.0).is_empty());
        assert!(index.within_radius(&centers, origin(), f64::NAN).is_empty());
        assert!(index
            .within_radius(&centers, Point::new(f64::NAN, 0.0), 1.0)
            .is_empty());
        assert_eq!(index.within_radius(&centers, origin(), 0.0).len(), 1);
    }

    #[test]
    fn center_query_is_a_direct_lookup() {
        let centers = vec![public("a", ORIGIN_LAT, ORIGIN_LON), private("b", north(3.0), ORIGIN_LON)];
        let index = ProximityIndex::build(&centers);

        match index.search(&centers, &SearchQuery::Center("b".into()), 1.0) {
            Some(SearchOutcome::Located(center)) => assert_eq!(center.id, "b"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(index
            .search(&centers, &SearchQuery::Center("missing".into()), 1.0)
            .is_none());

        let coordinate = SearchQuery::Coordinate {
            latitude: ORIGIN_LAT,
            longitude: ORIGIN_LON,
        };
        match index.search(&centers, &coordinate, 1.0) {
            Some(SearchOutcome::Nearby(results)) => assert_eq!(results.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn name_lookup_and_listing() {
        let mut centers = vec![public("1", 0.0, 0.0), public("2", 0.0, 0.0), public("3", 0.0, 0.0)];
        centers[0].name = "Liceo".into();
        centers[1].name = "Escuela".into();
        centers[2].name = "Liceo".into();

        assert_eq!(center_names(&centers), vec!["Escuela", "Liceo"]);
        assert_eq!(find_by_name(&centers, "Liceo").map(|c| c.id.as_str()), Some("1"));
        assert!(find_by_name(&centers, "Colegio").is_none());
    }
}

//! Point-in-polygon assignment of education centers to regions.
//!
//! Region bounding boxes go into an R-tree; each center is checked with an
//! exact `contains` against the few regions whose box it falls in, so the
//! join costs O(N_points × log N_regions) plus the containment tests.

use crate::error::JoinMismatch;
use crate::types::{EducationCenter, InstitutionKind, RegionGeometry};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use tracing::{debug, info};

/// Region bounding box as stored in the R-tree.
struct RegionEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RegionEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Bounding-box index over a region table. Lookups take the same slice the
/// index was built from.
pub struct RegionIndex {
    tree: RTree<RegionEnvelope>,
    len: usize,
}

impl RegionIndex {
    pub fn build<R: RegionGeometry>(regions: &[R]) -> Self {
        let items: Vec<RegionEnvelope> = regions
            .iter()
            .enumerate()
            .filter_map(|(index, region)| {
                let rect = region.geometry().bounding_rect()?;
                Some(RegionEnvelope {
                    index,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(items),
            len: regions.len(),
        }
    }

    /// Index of the region strictly containing `point`. Points on a boundary
    /// are not contained; with overlapping regions the earliest one wins.
    pub fn locate<R: RegionGeometry>(&self, regions: &[R], point: Point<f64>) -> Option<usize> {
        debug_assert_eq!(regions.len(), self.len);
        let envelope = AABB::from_point([point.x(), point.y()]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.index)
            .filter(|&index| {
                regions
                    .get(index)
                    .is_some_and(|region| region.geometry().contains(&point))
            })
            .min()
    }
}

/// Center → region assignment for one load.
#[derive(Debug, Clone, Default)]
pub struct JoinResult {
    /// Parallel to the center slice the join ran over.
    pub assignments: Vec<Option<usize>>,
    pub mismatches: Vec<JoinMismatch>,
}

impl JoinResult {
    pub fn region_of(&self, center_index: usize) -> Option<usize> {
        self.assignments.get(center_index).copied().flatten()
    }

    pub fn matched(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_some()).count()
    }
}

pub fn join_centers<R: RegionGeometry>(
    regions: &[R],
    index: &RegionIndex,
    centers: &[EducationCenter],
) -> JoinResult {
    let mut result = JoinResult {
        assignments: Vec::with_capacity(centers.len()),
        mismatches: Vec::new(),
    };

    for (center_index, center) in centers.iter().enumerate() {
        let assignment = index.locate(regions, center.point());
        if assignment.is_none() {
            debug!(
                "Center {} at ({}, {}) is outside every region",
                center.id, center.latitude, center.longitude
            );
            result.mismatches.push(JoinMismatch {
                center_index,
                center_id: center.id.clone(),
                latitude: center.latitude,
                longitude: center.longitude,
            });
        }
        result.assignments.push(assignment);
    }

    info!(
        "Joined {} of {} centers to regions ({} outside all regions)",
        result.matched(),
        centers.len(),
        result.mismatches.len()
    );
    result
}

/// Number of matched centers per region, optionally restricted to one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSeries {
    counts: Vec<usize>,
}

impl CountSeries {
    pub fn count(
        join: &JoinResult,
        centers: &[EducationCenter],
        region_count: usize,
        kind: Option<InstitutionKind>,
    ) -> Self {
        let mut counts = vec![0; region_count];
        for (center, assignment) in centers.iter().zip(&join.assignments) {
            let Some(region) = *assignment else { continue };
            if kind.is_none() || center.kind == kind {
                counts[region] += 1;
            }
        }
        Self { counts }
    }

    /// Zero for regions nothing was assigned to.
    pub fn get(&self, region: usize) -> usize {
        self.counts.get(region).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// The three independent count passes: all centers, public, private.
#[derive(Debug, Clone)]
pub struct KindCounts {
    pub total: CountSeries,
    pub public: CountSeries,
    pub private: CountSeries,
}

impl KindCounts {
    pub fn from_join(join: &JoinResult, centers: &[EducationCenter], region_count: usize) -> Self {
        Self {
            total: CountSeries::count(join, centers, region_count, None),
            public: CountSeries::count(join, centers, region_count, Some(InstitutionKind::Public)),
            private: CountSeries::count(join, centers, region_count, Some(InstitutionKind::Private)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{center, private, public, region, square, two_regions};
    use geo::{polygon, MultiPolygon};

    #[test]
    fn assigns_points_to_containing_region() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        let centers = vec![
            public("a", 9.95, -84.15),
            private("b", 9.95, -84.05),
            public("c", 9.91, -84.01),
        ];

        let join = join_centers(&regions, &index, &centers);
        assert_eq!(join.assignments, vec![Some(0), Some(1), Some(1)]);
        assert!(join.mismatches.is_empty());
    }

    #[test]
    fn points_outside_every_region_are_recorded_not_dropped() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        let centers = vec![public("in", 9.95, -84.15), public("sea", 8.0, -86.0)];

        let join = join_centers(&regions, &index, &centers);
        assert_eq!(join.assignments.len(), 2);
        assert_eq!(join.region_of(1), None);
        assert_eq!(join.mismatches.len(), 1);
        assert_eq!(join.mismatches[0].center_id, "sea");
        assert_eq!(join.mismatches[0].center_index, 1);
    }

    #[test]
    fn bounding_box_hit_is_not_containment() {
        // L-shaped region whose bounding box covers the empty corner.
        let l_shape = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 2.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]]);
        let regions = vec![region("L", "P", l_shape)];
        let index = RegionIndex::build(&regions);

        assert_eq!(index.locate(&regions, Point::new(0.5, 1.5)), Some(0));
        assert_eq!(index.locate(&regions, Point::new(1.5, 1.5)), None);
    }

    #[test]
    fn shared_border_point_is_not_contained() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        assert_eq!(index.locate(&regions, Point::new(-84.1, 9.95)), None);
    }

    #[test]
    fn overlapping_regions_prefer_the_first() {
        let regions = vec![
            region("big", "P", square(0.0, 0.0, 10.0)),
            region("small", "P", square(1.0, 1.0, 1.0)),
        ];
        let index = RegionIndex::build(&regions);
        assert_eq!(index.locate(&regions, Point::new(1.5, 1.5)), Some(0));
    }

    #[test]
    fn count_series_are_independent_and_consistent() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        let centers = vec![
            public("a", 9.95, -84.15),
            public("b", 9.96, -84.15),
            private("c", 9.97, -84.15),
            private("d", 9.95, -84.05),
            public("e", 5.0, -80.0),
        ];
        let join = join_centers(&regions, &index, &centers);
        let counts = KindCounts::from_join(&join, &centers, regions.len());

        assert_eq!(counts.total.get(0), 3);
        assert_eq!(counts.public.get(0), 2);
        assert_eq!(counts.private.get(0), 1);
        assert_eq!(counts.total.get(1), 1);
        assert_eq!(counts.public.get(1), 0);
        assert_eq!(counts.total.total(), 4);

        for region in 0..regions.len() {
            assert_eq!(
                counts.total.get(region),
                counts.public.get(region) + counts.private.get(region)
            );
        }
    }

    #[test]
    fn unclassified_centers_count_in_total_only() {
        let regions = two_regions();
        let index = RegionIndex::build(&regions);
        let centers = vec![public("a", 9.95, -84.15), center("x", None, 9.96, -84.15)];
        let join = join_centers(&regions, &index, &centers);
        let counts = KindCounts::from_join(&join, &centers, regions.len());

        assert_eq!(counts.total.get(0), 2);
        assert_eq!(counts.public.get(0), 1);
        assert_eq!(counts.private.get(0), 0);
    }
}

//! Vertex reduction of region polygons for map layers.
//!
//! Each ring is run through Douglas-Peucker. A simplified ring is only kept
//! when the geometry stays valid: at least four coordinates, no
//! self-intersection, no crossing with any other ring of the multipolygon,
//! holes still inside their shell, and no part moving into or out of another
//! part. Anything else falls back to the original ring, so the output never
//! has more vertices than the input.

use geo::algorithm::contains::Contains;
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{BoundingRect, Coord, Intersects, Line, LineString, MultiPolygon, Polygon, Rect, Simplify};
use std::ops::Range;

/// Simplified copy of `geometry` with at most `tolerance` deviation, in the
/// geometry's own units. Tolerances that are not strictly positive return an
/// unchanged copy.
pub fn simplify_multipolygon(geometry: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    if !(tolerance > 0.0) || !tolerance.is_finite() {
        return geometry.clone();
    }

    // All rings of all parts, shell first within each part's range.
    let mut originals: Vec<&LineString<f64>> = Vec::new();
    let mut parts: Vec<Range<usize>> = Vec::with_capacity(geometry.0.len());
    for polygon in geometry {
        let start = originals.len();
        originals.push(polygon.exterior());
        originals.extend(polygon.interiors());
        parts.push(start..originals.len());
    }

    let mut rings: Vec<LineString<f64>> = originals
        .iter()
        .map(|ring| simplify_ring(ring, tolerance))
        .collect();
    let mut reverted: Vec<bool> = originals
        .iter()
        .zip(&rings)
        .map(|(original, ring)| ring.0.len() == original.0.len())
        .collect();

    // Every conflict names at least one simplified ring and each pass reverts
    // it, so this ends at the latest when all rings are original again.
    loop {
        let conflicting = first_conflict(geometry, &parts, &rings, &reverted);
        if conflicting.is_empty() {
            break;
        }
        for i in conflicting {
            if !reverted[i] {
                rings[i] = originals[i].clone();
                reverted[i] = true;
            }
        }
    }

    let mut rings = rings.into_iter();
    MultiPolygon::new(
        parts
            .iter()
            .map(|range| {
                let mut part: Vec<LineString<f64>> = rings.by_ref().take(range.len()).collect();
                let interiors = part.split_off(1);
                Polygon::new(part.swap_remove(0), interiors)
            })
            .collect(),
    )
}

/// Douglas-Peucker on one closed ring, or the ring itself if the result is
/// degenerate or self-intersecting.
fn simplify_ring(ring: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    let simplified = ring.simplify(&tolerance);
    if simplified.0.len() < 4
        || simplified.0.len() >= ring.0.len()
        || !is_simple_ring(&simplified)
    {
        return ring.clone();
    }
    simplified
}

/// Rings to revert for the first problem found: two rings that cross, a
/// hole outside its shell, or a part whose containment of another part
/// changed. Empty when the current rings are consistent.
fn first_conflict(
    geometry: &MultiPolygon<f64>,
    parts: &[Range<usize>],
    rings: &[LineString<f64>],
    reverted: &[bool],
) -> Vec<usize> {
    let bounds: Vec<Option<Rect<f64>>> = rings.iter().map(|ring| ring.bounding_rect()).collect();

    for i in 0..rings.len() {
        for j in (i + 1)..rings.len() {
            if reverted[i] && reverted[j] {
                continue;
            }
            let overlap = match (bounds[i], bounds[j]) {
                (Some(a), Some(b)) => a.intersects(&b),
                _ => false,
            };
            if overlap && rings_cross(&rings[i], &rings[j]) {
                return vec![i, j];
            }
        }
    }

    for range in parts {
        let shell = range.start;
        for hole in (shell + 1)..range.end {
            if (!reverted[shell] || !reverted[hole]) && !hole_inside_shell(&rings[shell], &rings[hole]) {
                return vec![shell, hole];
            }
        }
    }

    // No rings cross at this point, so one vertex per shell tells whether a
    // part lies inside another. Douglas-Peucker keeps the first vertex.
    for (p, range) in parts.iter().enumerate() {
        if range.clone().all(|i| reverted[i]) {
            continue;
        }
        let current = Polygon::new(
            rings[range.start].clone(),
            rings[(range.start + 1)..range.end].to_vec(),
        );
        let original = &geometry.0[p];
        let (current_box, original_box) = (bounds[range.start], original.bounding_rect());

        for (q, other) in parts.iter().enumerate() {
            let Some(anchor) = rings[other.start].0.first() else {
                continue;
            };
            if p == q {
                continue;
            }
            let now = in_rect(current_box, anchor) && current.contains(anchor);
            let before = in_rect(original_box, anchor) && original.contains(anchor);
            if now != before {
                let mut conflicting: Vec<usize> = range.clone().collect();
                conflicting.push(other.start);
                return conflicting;
            }
        }
    }

    Vec::new()
}

fn in_rect(rect: Option<Rect<f64>>, coord: &Coord<f64>) -> bool {
    rect.is_some_and(|r| {
        coord.x >= r.min().x && coord.x <= r.max().x && coord.y >= r.min().y && coord.y <= r.max().y
    })
}

fn hole_inside_shell(shell: &LineString<f64>, hole: &LineString<f64>) -> bool {
    let shell = Polygon::new(shell.clone(), vec![]);
    hole.0.iter().any(|coord| shell.contains(coord))
}

/// True when no two non-adjacent segments touch and adjacent segments only
/// share their common vertex.
pub fn is_simple_ring(ring: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = ring.lines().collect();
    let n = segments.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return false,
            }
        }
    }
    true
}

fn rings_cross(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    a.lines()
        .any(|sa| b.lines().any(|sb| line_intersection(sa, sb).is_some()))
}

pub fn vertex_count(geometry: &MultiPolygon<f64>) -> usize {
    geometry
        .iter()
        .map(|p| {
            p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>()
        })
        .sum()
}

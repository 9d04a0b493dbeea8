//! Province and institution-kind views over the loaded tables, plus the
//! summary counts and rankings shown next to the map.

use crate::aggregate::EnrichedRegion;
use crate::types::{EducationCenter, InstitutionKind};
use serde::Serialize;
use std::cmp::Ordering;

/// Case- and whitespace-insensitive form used to compare province labels
/// coming from different files ("San José" vs "SAN JOSE " vs "sanjosé").
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CenterFilter {
    pub province: Option<String>,
    pub kind: Option<InstitutionKind>,
}

impl CenterFilter {
    pub fn matches(&self, center: &EducationCenter) -> bool {
        let province_ok = self
            .province
            .as_deref()
            .map_or(true, |p| normalize_text(&center.admin.province) == normalize_text(p));
        let kind_ok = self.kind.map_or(true, |k| center.kind == Some(k));
        province_ok && kind_ok
    }

    pub fn apply<'a>(&self, centers: &'a [EducationCenter]) -> Vec<&'a EducationCenter> {
        centers.iter().filter(|c| self.matches(c)).collect()
    }
}

/// Indices of the regions belonging to `province`.
pub fn regions_in_province(regions: &[EnrichedRegion], province: &str) -> Vec<usize> {
    let wanted = normalize_text(province);
    regions
        .iter()
        .enumerate()
        .filter(|(_, r)| normalize_text(&r.province) == wanted)
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub total: usize,
    pub public: usize,
    pub private: usize,
}

impl<'a> FromIterator<&'a EducationCenter> for KindSummary {
    fn from_iter<I: IntoIterator<Item = &'a EducationCenter>>(iter: I) -> Self {
        let mut summary = Self::default();
        for center in iter {
            summary.total += 1;
            match center.kind {
                Some(InstitutionKind::Public) => summary.public += 1,
                Some(InstitutionKind::Private) => summary.private += 1,
                None => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankBy {
    CenterDensity,
    PopulationDensity,
    CentersPer10k,
    TotalCenters,
}

impl RankBy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "density" | "center_density" | "density_centers_km2" => Some(Self::CenterDensity),
            "population_density" | "density_population_km2" => Some(Self::PopulationDensity),
            "per_10k" | "centers_per_10k_inhabitants" => Some(Self::CentersPer10k),
            "total" | "total_centers" => Some(Self::TotalCenters),
            _ => None,
        }
    }

    fn value(self, region: &EnrichedRegion) -> Option<f64> {
        match self {
            Self::CenterDensity => region.metrics.density_centers_km2,
            Self::PopulationDensity => region.metrics.density_population_km2,
            Self::CentersPer10k => region.metrics.centers_per_10k_inhabitants,
            Self::TotalCenters => Some(region.counts.total_centers as f64),
        }
    }
}

/// Region indices ordered by `by`, highest first. Regions where the metric is
/// undefined come last; ties keep table order.
pub fn rank_regions(regions: &[EnrichedRegion], by: RankBy) -> Vec<usize> {
    let mut order: Vec<usize> = (0..regions.len()).collect();
    order.sort_by(|&a, &b| match (by.value(&regions[a]), by.value(&regions[b])) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    order
}

/// Distinct non-empty province labels of the center table, sorted.
pub fn provinces(centers: &[EducationCenter]) -> Vec<&str> {
    let mut names: Vec<&str> = centers
        .iter()
        .map(|c| c.admin.province.trim())
        .filter(|p| !p.is_empty())
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

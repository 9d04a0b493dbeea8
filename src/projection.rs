//! WGS84 to target-CRS transforms, backed by PROJ.
//!
//! A [`Crs`] only records the validated code and whether its axes are
//! metric; the PROJ handle itself lives in a [`Transformer`] built for the
//! duration of one batch of work, since PROJ contexts are not shareable
//! across threads.

use crate::error::ReprojectionError;
use geo::{Coord, MapCoords, MultiPolygon};
use proj::Proj;

pub const WGS84: &str = "EPSG:4326";

/// Reference points used to tell degree-based from metric axes. Some
/// projections only cover part of the globe, so more than one is tried.
const REFERENCE_POINTS: [(f64, f64); 3] = [(-84.0, 10.0), (0.0, 0.0), (0.0, 45.0)];

/// Longitude step between the two points of an axis-unit check, in degrees.
const AXIS_CHECK_STEP_DEG: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    code: String,
    projected: bool,
}

impl Crs {
    pub fn wgs84() -> Self {
        Self {
            code: WGS84.to_string(),
            projected: false,
        }
    }

    /// Validates `code` (anything PROJ understands, usually `EPSG:<n>`) by
    /// building a WGS84 → `code` transform.
    pub fn from_code(code: &str) -> Result<Self, ReprojectionError> {
        let code = code.trim();
        let transformer = Transformer::new(code)?;
        let projected = transformer.has_metric_axes();
        Ok(Self {
            code: code.to_string(),
            projected,
        })
    }

    pub fn code(&self) -> String {
        self.code.clone()
    }

    /// True when coordinates come out in linear units rather than degrees.
    pub fn is_projected(&self) -> bool {
        self.projected
    }

    pub fn transformer(&self) -> Result<Transformer, ReprojectionError> {
        Transformer::new(&self.code)
    }
}

/// A live WGS84 → target transform.
pub struct Transformer {
    code: String,
    proj: Proj,
}

impl Transformer {
    fn new(code: &str) -> Result<Self, ReprojectionError> {
        let proj = Proj::new_known_crs(WGS84, code, None)
            .map_err(|e| ReprojectionError::UnknownCrs(format!("{code}: {e}")))?;
        Ok(Self {
            code: code.to_string(),
            proj,
        })
    }

    fn has_metric_axes(&self) -> bool {
        REFERENCE_POINTS.iter().any(|&(lon, lat)| {
            let a = self.project_coord(Coord { x: lon, y: lat });
            let b = self.project_coord(Coord {
                x: lon + AXIS_CHECK_STEP_DEG,
                y: lat,
            });
            match (a, b) {
                (Ok(a), Ok(b)) => (b.x - a.x).hypot(b.y - a.y) > 1.0,
                _ => false,
            }
        })
    }

    /// Projects one `(lon, lat)` coordinate in degrees.
    pub fn project_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, ReprojectionError> {
        let (lon, lat) = (coord.x, coord.y);
        let out_of_domain = || ReprojectionError::OutOfDomain {
            crs: self.code.clone(),
            x: lon,
            y: lat,
        };
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(out_of_domain());
        }

        let (x, y) = self.proj.convert((lon, lat)).map_err(|_| out_of_domain())?;
        if !x.is_finite() || !y.is_finite() {
            return Err(ReprojectionError::NonFinite {
                crs: self.code.clone(),
                x: lon,
                y: lat,
            });
        }
        Ok(Coord { x, y })
    }

    /// Reprojects a WGS84 multipolygon; the first failing vertex aborts.
    pub fn project(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, ReprojectionError> {
        geometry.try_map_coords(|coord| self.project_coord(coord))
    }
}

use geo::{MultiPolygon, Point};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstitutionKind {
    Public,
    Private,
}

impl InstitutionKind {
    /// Accepts the dataset's Spanish labels (`PÚBLICO`, `PRIVADO`) as well as
    /// the English ones, ignoring case and the accent.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = raw.trim().to_uppercase().replace('Ú', "U");
        match folded.as_str() {
            "PUBLICO" | "PUBLIC" => Some(Self::Public),
            "PRIVADO" | "PRIVATE" => Some(Self::Private),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Private => "PRIVATE",
        }
    }
}

/// An administrative polygon as loaded from the region dataset, in WGS84.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub province: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdminAttributes {
    pub province: String,
    pub regional: String,
    pub circuit: String,
    pub region_name: String,
    pub district: String,
    pub locality: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EducationCenter {
    pub id: String,
    pub name: String,
    /// `None` when the source label is neither public nor private.
    pub kind: Option<InstitutionKind>,
    pub latitude: f64,
    pub longitude: f64,
    pub admin: AdminAttributes,
}

impl EducationCenter {
    /// WGS84 point, x = longitude.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Anything carrying a WGS84 region polygon.
pub trait RegionGeometry {
    fn geometry(&self) -> &MultiPolygon<f64>;
}

impl RegionGeometry for Region {
    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }
}

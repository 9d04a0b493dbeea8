use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub regions: PathBuf, // .shp or .geojson
    pub centers_csv: PathBuf,
    pub population_csv: PathBuf,
    #[serde(default)]
    pub region_fields: RegionFields,
    #[serde(default)]
    pub center_columns: CenterColumns,
    #[serde(default)]
    pub population_columns: PopulationColumns,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegionFields {
    pub name: String,
    pub province: String,
}

impl Default for RegionFields {
    fn default() -> Self {
        Self {
            name: "CANTÓN".into(),
            province: "PROVINCIA".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CenterColumns {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub latitude: String,
    pub longitude: String,
    pub province: String,
    pub regional: String,
    pub circuit: String,
    pub region_name: String,
    pub district: String,
    pub locality: String,
    pub address: String,
}

impl Default for CenterColumns {
    fn default() -> Self {
        Self {
            id: "CODSABER".into(),
            name: "CENTRO_EDU".into(),
            kind: "TIPO_INSTI".into(),
            latitude: "LATITUD".into(),
            longitude: "LONGITUD".into(),
            province: "PROVINCIA".into(),
            regional: "REGIONAL".into(),
            circuit: "CIRCUITO".into(),
            region_name: "CANTON".into(),
            district: "DISTRITO".into(),
            locality: "POBLADO".into(),
            address: "DIRECCION".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PopulationColumns {
    pub region: String,
    pub total: String,
}

impl Default for PopulationColumns {
    fn default() -> Self {
        Self {
            region: "CANTÓN".into(),
            total: "POBLACION TOTAL".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Projected CRS used for areas and densities.
    pub projection: String,
    /// Douglas-Peucker tolerance in degrees (0.001 is roughly 100 m).
    pub simplify_tolerance: f64,
    pub search_radius_km: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            projection: "EPSG:5367".into(),
            simplify_tolerance: 0.001,
            search_radius_km: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub url: String,
    pub limit: u32,
    pub timeout_secs: u64,
    pub country_codes: Option<String>,
    pub user_agent: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: "https://nominatim.openstreetmap.org/search".into(),
            limit: 5,
            timeout_secs: 3,
            country_codes: Some("cr".into()),
            user_agent: concat!("edu-atlas/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML configuration")
    }
}

use crate::config::{CenterColumns, InputConfig, PopulationColumns, RegionFields};
use crate::error::DataLoadError;
use crate::types::{AdminAttributes, EducationCenter, InstitutionKind, Region};
use csv::{ByteRecord, ReaderBuilder};
use geo::MultiPolygon;
use shapefile::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything read from disk for one load, before any derivation.
#[derive(Debug, Clone)]
pub struct SourceData {
    pub regions: Vec<Region>,
    pub centers: Vec<EducationCenter>,
    pub population: PopulationTable,
}

/// Total population per region name. Rows with an unusable total are left
/// out, so lookups for them come back as missing.
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    totals: HashMap<String, u64>,
}

impl PopulationTable {
    pub fn get(&self, region: &str) -> Option<u64> {
        self.totals.get(region.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

impl FromIterator<(String, u64)> for PopulationTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            totals: iter.into_iter().collect(),
        }
    }
}

pub fn load_sources(input: &InputConfig) -> Result<SourceData, DataLoadError> {
    info!("Loading data...");

    let regions = load_regions(&input.regions, &input.region_fields)?;
    info!("Loaded {} regions from {:?}", regions.len(), input.regions);

    let centers = load_centers(&input.centers_csv, &input.center_columns)?;
    info!("Loaded {} education centers from {:?}", centers.len(), input.centers_csv);

    let population = load_population(&input.population_csv, &input.population_columns)?;
    info!("Loaded population for {} regions", population.len());

    Ok(SourceData {
        regions,
        centers,
        population,
    })
}

/// Loads region polygons from a Shapefile or a GeoJSON FeatureCollection,
/// picked by extension.
pub fn load_regions(path: &Path, fields: &RegionFields) -> Result<Vec<Region>, DataLoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| DataLoadError::UnsupportedFormat(path.to_path_buf()))?;

    let regions = match extension.as_str() {
        "shp" => load_shapefile_regions(path, fields)?,
        "json" | "geojson" => load_geojson_regions(path, fields)?,
        _ => return Err(DataLoadError::UnsupportedFormat(path.to_path_buf())),
    };

    if regions.is_empty() {
        return Err(DataLoadError::parse(path, "no region features found"));
    }
    Ok(regions)
}

fn load_shapefile_regions(path: &Path, fields: &RegionFields) -> Result<Vec<Region>, DataLoadError> {
    use shapefile::dbase::FieldValue;

    let mut reader = Reader::from_path(path).map_err(|e| DataLoadError::parse(path, e))?;
    let mut regions = Vec::new();

    for (n, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| DataLoadError::parse(path, e))?;

        let text_field = |field: &str| match record.get(field) {
            Some(FieldValue::Character(Some(s))) => Ok(s.trim().to_string()),
            Some(FieldValue::Memo(s)) => Ok(s.trim().to_string()),
            Some(FieldValue::Character(None)) => {
                Err(DataLoadError::invalid_feature(path, n, format!("field '{field}' is null")))
            }
            Some(_) => Err(DataLoadError::invalid_feature(
                path,
                n,
                format!("field '{field}' must be a string"),
            )),
            None => Err(DataLoadError::MissingColumn {
                path: path.to_path_buf(),
                column: field.to_string(),
            }),
        };
        let name = text_field(&fields.name)?;
        let province = text_field(&fields.province)?;

        let convert_err = |e: &dyn std::fmt::Debug| {
            DataLoadError::invalid_feature(path, n, format!("failed to convert polygon: {e:?}"))
        };
        let geometry = match shape {
            shapefile::Shape::Polygon(polygon) => {
                let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| convert_err(&e))?;
                mp
            }
            shapefile::Shape::PolygonM(polygon) => {
                let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| convert_err(&e))?;
                mp
            }
            shapefile::Shape::PolygonZ(polygon) => {
                let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| convert_err(&e))?;
                mp
            }
            other => {
                return Err(DataLoadError::invalid_feature(
                    path,
                    n,
                    format!("expected a polygon shape, found {:?}", other.shapetype()),
                ))
            }
        };

        regions.push(validated_region(path, n, name, province, geometry)?);
    }

    Ok(regions)
}

fn load_geojson_regions(path: &Path, fields: &RegionFields) -> Result<Vec<Region>, DataLoadError> {
    use geojson::GeoJson;

    debug!("Loading GeoJSON from {:?}...", path);
    let file = File::open(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // Loads the whole collection into memory; region layers are small.
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .map_err(|e| DataLoadError::parse(path, e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(DataLoadError::parse(path, "GeoJSON must be a FeatureCollection")),
    };

    let mut regions = Vec::with_capacity(collection.features.len());

    for (n, feature) in collection.features.into_iter().enumerate() {
        let text_property = |field: &str| {
            match feature.properties.as_ref().and_then(|props| props.get(field)) {
                Some(serde_json::Value::String(s)) => Ok(s.trim().to_string()),
                Some(serde_json::Value::Number(num)) => Ok(num.to_string()),
                _ => Err(DataLoadError::invalid_feature(
                    path,
                    n,
                    format!("missing or non-text property '{field}'"),
                )),
            }
        };
        let name = text_property(&fields.name)?;
        let province = text_property(&fields.province)?;

        let geometry = match feature.geometry {
            Some(geometry) => {
                let value: geo::Geometry<f64> = geometry.value.try_into().map_err(|e| {
                    DataLoadError::invalid_feature(path, n, format!("failed to convert geometry: {e}"))
                })?;
                match value {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        return Err(DataLoadError::invalid_feature(
                            path,
                            n,
                            "geometry must be a Polygon or MultiPolygon",
                        ))
                    }
                }
            }
            None => return Err(DataLoadError::invalid_feature(path, n, "feature has no geometry")),
        };

        regions.push(validated_region(path, n, name, province, geometry)?);
    }

    Ok(regions)
}

fn validated_region(
    path: &Path,
    feature: usize,
    name: String,
    province: String,
    geometry: MultiPolygon<f64>,
) -> Result<Region, DataLoadError> {
    if name.is_empty() {
        return Err(DataLoadError::invalid_feature(path, feature, "region name is empty"));
    }
    let degenerate = geometry.0.is_empty()
        || geometry
            .iter()
            .any(|polygon| polygon.exterior().0.len() < 4);
    if degenerate {
        return Err(DataLoadError::invalid_feature(
            path,
            feature,
            format!("region '{name}' has an empty or degenerate polygon"),
        ));
    }
    Ok(Region {
        name,
        province,
        geometry,
    })
}

/// Header lookup for the CSV sources, tolerant of a UTF-8 BOM and padding.
struct Columns<'a> {
    path: &'a Path,
    indices: HashMap<String, usize>,
}

impl<'a> Columns<'a> {
    fn new(path: &'a Path, headers: &ByteRecord) -> Self {
        let indices = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (decode_field(h).trim_start_matches('\u{feff}').trim().to_string(), i))
            .collect();
        Self { path, indices }
    }

    fn required(&self, name: &str) -> Result<usize, DataLoadError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| DataLoadError::MissingColumn {
                path: self.path.to_path_buf(),
                column: name.to_string(),
            })
    }

    fn optional(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }
}

/// CSV fields are UTF-8 when they validate as such, Latin-1 otherwise.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn field(record: &ByteRecord, idx: Option<usize>) -> String {
    idx.and_then(|i| record.get(i))
        .map(|b| decode_field(b).trim().to_string())
        .unwrap_or_default()
}

fn open_csv(path: &Path) -> Result<(csv::Reader<File>, ByteRecord), DataLoadError> {
    let file = File::open(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr
        .byte_headers()
        .map_err(|e| DataLoadError::parse(path, e))?
        .clone();
    Ok((rdr, headers))
}

/// Loads the education center table. Every row must carry a usable
/// coordinate; a single bad row fails the whole load.
pub fn load_centers(
    path: &Path,
    columns: &CenterColumns,
) -> Result<Vec<EducationCenter>, DataLoadError> {
    let (mut rdr, headers) = open_csv(path)?;
    let cols = Columns::new(path, &headers);

    let id_idx = cols.required(&columns.id)?;
    let name_idx = cols.required(&columns.name)?;
    let kind_idx = cols.required(&columns.kind)?;
    let lat_idx = cols.required(&columns.latitude)?;
    let lon_idx = cols.required(&columns.longitude)?;

    let province_idx = cols.optional(&columns.province);
    let regional_idx = cols.optional(&columns.regional);
    let circuit_idx = cols.optional(&columns.circuit);
    let region_idx = cols.optional(&columns.region_name);
    let district_idx = cols.optional(&columns.district);
    let locality_idx = cols.optional(&columns.locality);
    let address_idx = cols.optional(&columns.address);

    let mut centers = Vec::new();
    let mut unclassified = 0usize;

    for (n, result) in rdr.byte_records().enumerate() {
        let record = result.map_err(|e| DataLoadError::parse(path, e))?;
        // Header is line 1.
        let line = record.position().map_or(n + 2, |p| p.line() as usize);

        let id = field(&record, Some(id_idx));
        if id.is_empty() {
            return Err(DataLoadError::invalid_line(path, line, "empty center identifier"));
        }

        let coordinate = |idx: usize, label: &str, limit: f64| {
            let raw = field(&record, Some(idx));
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.abs() <= limit)
                .ok_or_else(|| DataLoadError::invalid_line(path, line, format!("invalid {label} '{raw}'")))
        };
        let latitude = coordinate(lat_idx, "latitude", 90.0)?;
        let longitude = coordinate(lon_idx, "longitude", 180.0)?;

        let raw_kind = field(&record, Some(kind_idx));
        let kind = InstitutionKind::parse(&raw_kind);
        if kind.is_none() {
            unclassified += 1;
            debug!("Center {} has unrecognised institution kind '{}'", id, raw_kind);
        }

        centers.push(EducationCenter {
            id,
            name: field(&record, Some(name_idx)),
            kind,
            latitude,
            longitude,
            admin: AdminAttributes {
                province: field(&record, province_idx),
                regional: field(&record, regional_idx),
                circuit: field(&record, circuit_idx),
                region_name: field(&record, region_idx),
                district: field(&record, district_idx),
                locality: field(&record, locality_idx),
                address: field(&record, address_idx),
            },
        });
    }

    if unclassified > 0 {
        warn!("{} centers are neither public nor private", unclassified);
    }
    Ok(centers)
}

/// Loads the population table. Only the region and total columns are read,
/// so a province column never collides with the region table's own.
pub fn load_population(
    path: &Path,
    columns: &PopulationColumns,
) -> Result<PopulationTable, DataLoadError> {
    let (mut rdr, headers) = open_csv(path)?;
    let cols = Columns::new(path, &headers);
    let region_idx = cols.required(&columns.region)?;
    let total_idx = cols.required(&columns.total)?;

    let mut totals = HashMap::new();
    for result in rdr.byte_records() {
        let record = result.map_err(|e| DataLoadError::parse(path, e))?;
        let region = field(&record, Some(region_idx));
        if region.is_empty() {
            continue;
        }

        let raw = field(&record, Some(total_idx));
        match parse_count(&raw) {
            Some(total) => {
                if totals.insert(region.clone(), total).is_some() {
                    warn!("Duplicate population row for '{}'; keeping the last one", region);
                }
            }
            None => warn!("Population for '{}' is missing or invalid: '{}'", region, raw),
        }
    }

    Ok(PopulationTable { totals })
}

/// Accepts plain integers as well as thousands separators and a `.0` suffix.
fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ',' | ' ' | '_')).collect();
    cleaned
        .parse::<u64>()
        .ok()
        .or_else(|| {
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
        })
}

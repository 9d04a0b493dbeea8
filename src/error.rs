use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal failures of the load pipeline. No partial dataset is produced.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),
    #[error(transparent)]
    Reprojection(#[from] ReprojectionError),
}

#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("failed to open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{path:?}: required column '{column}' not found")]
    MissingColumn { path: PathBuf, column: String },
    /// A region feature failed validation; `feature` is its 0-based
    /// position in the source file.
    #[error("{path:?}: feature #{feature}: {message}")]
    InvalidFeature {
        path: PathBuf,
        feature: usize,
        message: String,
    },
    /// A CSV row failed validation; `line` is the 1-based line in the file,
    /// header included.
    #[error("{path:?}: line {line}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("unsupported geometry format: {0:?}")]
    UnsupportedFormat(PathBuf),
}

impl DataLoadError {
    pub(crate) fn parse(path: &std::path::Path, message: impl ToString) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_feature(path: &std::path::Path, feature: usize, message: impl ToString) -> Self {
        Self::InvalidFeature {
            path: path.to_path_buf(),
            feature,
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid_line(path: &std::path::Path, line: usize, message: impl ToString) -> Self {
        Self::InvalidRecord {
            path: path.to_path_buf(),
            line,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ReprojectionError {
    #[error("unknown coordinate reference system '{0}'")]
    UnknownCrs(String),
    #[error("{0} is a geographic CRS; areas must be measured in a projected CRS")]
    NotProjected(String),
    #[error("coordinate ({x}, {y}) is outside the domain of {crs}")]
    OutOfDomain { crs: String, x: f64, y: f64 },
    #[error("{crs} produced a non-finite coordinate for ({x}, {y})")]
    NonFinite { crs: String, x: f64, y: f64 },
}

/// A center that fell outside every region polygon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinMismatch {
    pub center_index: usize,
    pub center_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    DensityCentersKm2,
    DensityPopulationKm2,
    CentersPer10kInhabitants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    ZeroArea,
    MissingPopulation,
    ZeroPopulation,
    NonFinite,
}

/// A derived metric that could not be computed for one region row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UndefinedMetric {
    pub metric: Metric,
    pub reason: UndefinedReason,
}

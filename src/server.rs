use crate::aggregate::EnrichedRegion;
use crate::config::AppConfig;
use crate::filter::{provinces, rank_regions, regions_in_province, CenterFilter, KindSummary, RankBy};
use crate::geocode::{GeocodeCandidate, Geocoder};
use crate::output::region_feature_collection;
use crate::pipeline::Dataset;
use crate::proximity::center_names;
use crate::types::{EducationCenter, InstitutionKind};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

pub struct AppState {
    pub dataset: Dataset,
    pub geocoder: Geocoder,
    pub config: AppConfig,
}

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn bad_request(message: String) -> ApiError {
    (StatusCode::BAD_REQUEST, message)
}

#[derive(Deserialize, Default)]
pub struct RegionParams {
    province: Option<String>,
    rank: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct LayerParams {
    tolerance: Option<f64>,
}

#[derive(Deserialize, Default)]
pub struct CenterParams {
    province: Option<String>,
    kind: Option<String>,
}

#[derive(Deserialize)]
pub struct PointParams {
    lat: f64,
    lon: f64,
    radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct GeocodeParams {
    q: String,
}

#[derive(Debug, Serialize)]
pub struct CenterView {
    #[serde(flatten)]
    center: EducationCenter,
    region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NearbyView {
    #[serde(flatten)]
    center: CenterView,
    distance_km: f64,
}

impl CenterParams {
    fn filter(&self) -> Result<CenterFilter, ApiError> {
        let kind = match self.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(raw) => Some(
                InstitutionKind::parse(raw)
                    .ok_or_else(|| bad_request(format!("unknown institution kind '{raw}'")))?,
            ),
            None => None,
        };
        Ok(CenterFilter {
            province: self.province.clone().filter(|p| !p.trim().is_empty()),
            kind,
        })
    }
}

impl AppState {
    fn center_view(&self, index: usize) -> Option<CenterView> {
        let center = self.dataset.centers.get(index)?;
        Some(CenterView {
            center: center.clone(),
            region: self.dataset.region_of(index).map(|r| r.name.clone()),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/api/regions", get(regions_handler))
        .route("/api/regions.geojson", get(region_layer_handler))
        .route("/api/centers", get(centers_handler))
        .route("/api/centers/:id", get(center_handler))
        .route("/api/nearby", get(nearby_handler))
        .route("/api/region_at", get(region_at_handler))
        .route("/api/center_names", get(center_names_handler))
        .route("/api/provinces", get(provinces_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/geocode", get(geocode_handler));

    let app = match &state.config.server.static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: AppConfig, dataset: Dataset) -> Result<()> {
    let geocoder = Geocoder::new(config.geocoder.clone())?;
    let port = config.server.port;
    let state = Arc::new(AppState {
        dataset,
        geocoder,
        config,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn regions_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegionParams>,
) -> ApiResult<Vec<EnrichedRegion>> {
    let regions = &state.dataset.regions;
    let mut order: Vec<usize> = match params.rank.as_deref() {
        Some(raw) => {
            let by = RankBy::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown ranking '{raw}'")))?;
            rank_regions(regions, by)
        }
        None => (0..regions.len()).collect(),
    };
    if let Some(province) = params.province.as_deref().filter(|p| !p.trim().is_empty()) {
        let keep = regions_in_province(regions, province);
        order.retain(|i| keep.contains(i));
    }
    Ok(Json(order.into_iter().map(|i| regions[i].clone()).collect()))
}

async fn region_layer_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LayerParams>,
) -> ApiResult<FeatureCollection> {
    let tolerance = params
        .tolerance
        .unwrap_or(state.config.processing.simplify_tolerance);
    if !tolerance.is_finite() {
        return Err(bad_request("tolerance must be finite".into()));
    }
    let geometries = state.dataset.simplified_regions(tolerance);
    Ok(Json(region_feature_collection(
        &state.dataset.regions,
        &geometries,
    )))
}

async fn centers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CenterParams>,
) -> ApiResult<Vec<CenterView>> {
    let filter = params.filter()?;
    let views = state
        .dataset
        .centers
        .iter()
        .enumerate()
        .filter(|(_, c)| filter.matches(c))
        .filter_map(|(i, _)| state.center_view(i))
        .collect();
    Ok(Json(views))
}

async fn center_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CenterView> {
    let id = id.trim();
    state
        .dataset
        .centers
        .iter()
        .position(|c| c.id == id)
        .and_then(|i| state.center_view(i))
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no center with id '{id}'")))
}

async fn nearby_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointParams>,
) -> ApiResult<Vec<NearbyView>> {
    let radius_km = params
        .radius_km
        .unwrap_or(state.config.processing.search_radius_km);
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(bad_request(format!("invalid radius {radius_km}")));
    }

    let views = state
        .dataset
        .nearby(params.lat, params.lon, radius_km)
        .iter()
        .filter_map(|hit| {
            Some(NearbyView {
                center: state.center_view(hit.index)?,
                distance_km: hit.distance_km,
            })
        })
        .collect();
    Ok(Json(views))
}

async fn region_at_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointParams>,
) -> Json<Option<EnrichedRegion>> {
    Json(state.dataset.region_at(params.lat, params.lon).cloned())
}

async fn center_names_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(
        center_names(&state.dataset.centers)
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

async fn provinces_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(
        provinces(&state.dataset.centers)
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CenterParams>,
) -> ApiResult<KindSummary> {
    let filter = params.filter()?;
    Ok(Json(filter.apply(&state.dataset.centers).into_iter().collect()))
}

async fn geocode_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GeocodeParams>,
) -> Json<Vec<GeocodeCandidate>> {
    debug!("Geocode request '{}'", params.q);
    Json(state.geocoder.search(&params.q).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PopulationTable;
    use crate::projection::Crs;
    use crate::test_support::{private, public, two_regions};

    fn state() -> Arc<AppState> {
        let mut centers = vec![
            public("a", 9.95, -84.15),
            private("b", 9.951, -84.15),
            public("c", 9.95, -84.05),
        ];
        centers[0].admin.province = "San José".into();
        centers[1].admin.province = "San José".into();
        centers[2].admin.province = "Heredia".into();

        let population: PopulationTable = [("Oeste".to_string(), 10_000)].into_iter().collect();
        let dataset = Dataset::from_parts(
            two_regions(),
            centers,
            &population,
            Crs::from_code("EPSG:5367").unwrap(),
        )
        .unwrap();

        let config = AppConfig::from_toml(
            r#"
            [input]
            regions = "r.geojson"
            centers_csv = "c.csv"
            population_csv = "p.csv"
            "#,
        )
        .unwrap();
        Arc::new(AppState {
            dataset,
            geocoder: Geocoder::new(config.geocoder.clone()).unwrap(),
            config,
        })
    }

    fn center_params(province: Option<&str>, kind: Option<&str>) -> CenterParams {
        CenterParams {
            province: province.map(String::from),
            kind: kind.map(String::from),
        }
    }

    #[tokio::test]
    async fn regions_can_be_ranked_and_filtered() {
        let Json(regions) = regions_handler(
            State(state()),
            Query(RegionParams {
                province: None,
                rank: Some("total".into()),
            }),
        )
        .await
        .unwrap();
        let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Oeste", "Este"]);

        let Json(heredia) = regions_handler(
            State(state()),
            Query(RegionParams {
                province: Some("heredia".into()),
                rank: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(heredia.len(), 1);
        assert_eq!(heredia[0].name, "Este");

        let bad = regions_handler(
            State(state()),
            Query(RegionParams {
                province: None,
                rank: Some("area".into()),
            }),
        )
        .await;
        assert_eq!(bad.unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn centers_carry_their_region() {
        let Json(views) =
            centers_handler(State(state()), Query(center_params(Some("san josé"), Some("PÚBLICO"))))
                .await
                .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].center.id, "a");
        assert_eq!(views[0].region.as_deref(), Some("Oeste"));

        let Json(view) = center_handler(State(state()), Path("c".into())).await.unwrap();
        assert_eq!(view.region.as_deref(), Some("Este"));

        let missing = center_handler(State(state()), Path("zzz".into())).await;
        assert_eq!(missing.unwrap_err().0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn nearby_and_region_lookup() {
        let Json(hits) = nearby_handler(
            State(state()),
            Query(PointParams {
                lat: 9.95,
                lon: -84.15,
                radius_km: None,
            }),
        )
        .await
        .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.center.center.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].distance_km, 0.0);

        let Json(region) = region_at_handler(
            State(state()),
            Query(PointParams {
                lat: 9.95,
                lon: -84.05,
                radius_km: None,
            }),
        )
        .await;
        assert_eq!(region.map(|r| r.name), Some("Este".to_string()));
    }

    #[tokio::test]
    async fn summary_respects_filters() {
        let Json(all) = summary_handler(State(state()), Query(center_params(None, None)))
            .await
            .unwrap();
        assert_eq!(
            all,
            KindSummary {
                total: 3,
                public: 2,
                private: 1
            }
        );

        let Json(sj) = summary_handler(State(state()), Query(center_params(Some("SAN JOSÉ"), None)))
            .await
            .unwrap();
        assert_eq!(sj.total, 2);

        let bad = summary_handler(State(state()), Query(center_params(None, Some("mixed")))).await;
        assert_eq!(bad.unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pickers_list_names_and_provinces() {
        let Json(names) = center_names_handler(State(state())).await;
        assert_eq!(names, vec!["Centro a", "Centro b", "Centro c"]);

        let Json(provinces) = provinces_handler(State(state())).await;
        assert_eq!(provinces, vec!["Heredia", "San José"]);
    }

    #[tokio::test]
    async fn region_layer_is_a_feature_collection() {
        let Json(layer) = region_layer_handler(State(state()), Query(LayerParams::default()))
            .await
            .unwrap();
        assert_eq!(layer.features.len(), 2);
    }
}

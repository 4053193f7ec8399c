//! The command surface (§6): one Axum route per command family, each a
//! thin translation from a JSON body into the calls the teacher's
//! `registry`/`commands` modules already expose. Every route answers with
//! the same terminal-reply shape the text command line would: a single
//! success/warn/fail payload, never a stream of progress lines (progress
//! is logged via `tracing`, not returned to the caller).

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use sps_exposure_core::{CameraId, ExposureConfig, KeywordRegistry, RemoteClient};

use crate::commands;
use crate::detector::{LightSource, LightSourceTable, Window};
use crate::registry::{ExposureRegistry, Outcome};
use crate::visit::{ExpType, ExposureRequest};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ExposureRegistry>,
    pub client: Arc<dyn RemoteClient>,
    pub keywords: KeywordRegistry,
    pub config: ExposureConfig,
    pub light_sources: Arc<LightSourceTable>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/expose/bias", post(expose_bias))
        .route("/expose/dark", post(expose_dark))
        .route("/expose/object", post(expose_object))
        .route("/expose/flat", post(expose_flat))
        .route("/expose/arc", post(expose_arc))
        .route("/expose/domeflat", post(expose_domeflat))
        .route("/erase", post(erase))
        .route("/exposure/abort/:visit", post(abort))
        .route("/exposure/finish/:visit", post(finish))
        .route("/exposure/status", get(status))
        .route("/rda", post(rda))
        .route("/slit", post(slit))
        .route("/bia", post(bia))
        .route("/iis", post(iis))
        .route("/ccd-motors", post(ccd_motors))
        .route("/fpa", post(fpa))
        .route("/declare-light-source", post(declare_light_source))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WindowBody {
    row0: u32,
    nrows: u32,
}

impl From<WindowBody> for Window {
    fn from(w: WindowBody) -> Self {
        Window { row0: w.row0, nrows: w.nrows }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ExposeBody {
    visit: u64,
    exptime: f64,
    cams: Vec<String>,
    do_lamps: bool,
    do_shutter_timing: bool,
    do_iis: bool,
    do_test: bool,
    do_science_check: bool,
    do_slide_slit: bool,
    slide_slit_pixel_range: Option<(f64, f64)>,
    blue_window: Option<WindowBody>,
    red_window: Option<WindowBody>,
}

impl Default for ExposeBody {
    fn default() -> Self {
        Self {
            visit: 0,
            exptime: 0.0,
            cams: Vec::new(),
            do_lamps: false,
            do_shutter_timing: false,
            do_iis: false,
            do_test: false,
            do_science_check: false,
            do_slide_slit: false,
            slide_slit_pixel_range: None,
            blue_window: None,
            red_window: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct TerminalReply {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_ids: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

fn parse_cams(cams: &[String]) -> Result<Vec<CameraId>, String> {
    cams.iter().map(|c| CameraId::from_str(c)).collect()
}

async fn expose(state: AppState, exptype: ExpType, body: ExposeBody) -> impl IntoResponse {
    let cams = match parse_cams(&body.cams) {
        Ok(cams) => cams,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(ErrorReply { error: err })).into_response(),
    };

    let req = ExposureRequest {
        visit: body.visit,
        exptype,
        exptime: body.exptime,
        cams,
        do_lamps: body.do_lamps,
        do_shutter_timing: body.do_shutter_timing,
        do_iis: body.do_iis,
        do_test: body.do_test,
        do_science_check: body.do_science_check,
        do_slide_slit: body.do_slide_slit,
        slide_slit_pixel_range: body.slide_slit_pixel_range,
        blue_window: body.blue_window.map(Window::from),
        red_window: body.red_window.map(Window::from),
    };

    let sources = state.light_sources.snapshot();
    let exposure = match state.registry.submit(&req, &sources).await {
        Ok(exposure) => exposure,
        Err(err) => return (StatusCode::CONFLICT, Json(ErrorReply { error: err })).into_response(),
    };

    match state.registry.run_to_completion(exposure).await {
        Outcome::Success { file_ids } => {
            Json(TerminalReply { status: "success", file_ids: Some(file_ids), failures: None }).into_response()
        }
        Outcome::StorableWithFailures { file_ids, failures } => Json(TerminalReply {
            status: "warn",
            file_ids: Some(file_ids),
            failures: Some(failures),
        })
        .into_response(),
        Outcome::Failed { failures } => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(TerminalReply { status: "fail", file_ids: None, failures: Some(failures) }))
                .into_response()
        }
    }
}

async fn expose_bias(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Bias, body).await
}

async fn expose_dark(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Dark, body).await
}

async fn expose_object(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Object, body).await
}

async fn expose_flat(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Flat, body).await
}

async fn expose_arc(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Arc, body).await
}

async fn expose_domeflat(State(state): State<AppState>, Json(body): Json<ExposeBody>) -> impl IntoResponse {
    expose(state, ExpType::Domeflat, body).await
}

#[derive(Debug, Deserialize)]
struct EraseBody {
    cams: Vec<String>,
}

async fn erase(State(state): State<AppState>, Json(body): Json<EraseBody>) -> impl IntoResponse {
    let cams = match parse_cams(&body.cams) {
        Ok(cams) => cams,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(ErrorReply { error: err })).into_response(),
    };
    let threads = commands::erase_threads(&cams, &state.config);
    run_and_reply(&state, threads).await
}

async fn abort(State(state): State<AppState>, Path(visit): Path<u64>) -> impl IntoResponse {
    match state.registry.abort(visit) {
        Ok(exposure) => {
            exposure.abort("operator requested abort").await;
            StatusCode::OK.into_response()
        }
        Err(err) => (StatusCode::NOT_FOUND, Json(ErrorReply { error: err })).into_response(),
    }
}

async fn finish(State(state): State<AppState>, Path(visit): Path<u64>) -> impl IntoResponse {
    match state.registry.finish(visit) {
        Ok(exposure) => {
            exposure.finish().await;
            StatusCode::OK.into_response()
        }
        Err(err) => (StatusCode::NOT_FOUND, Json(ErrorReply { error: err })).into_response(),
    }
}

async fn status(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.status_lines())
}

#[derive(Debug, Deserialize)]
struct SpecNumsBody {
    spec_nums: Vec<u8>,
    value: String,
}

async fn run_and_reply(state: &AppState, threads: Vec<sps_exposure_core::CmdThread>) -> axum::response::Response {
    match commands::run_batch(threads, state.client.as_ref(), &state.keywords).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(failures) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(TerminalReply { status: "fail", file_ids: None, failures: Some(failures) }))
                .into_response()
        }
    }
}

async fn rda(State(state): State<AppState>, Json(body): Json<SpecNumsBody>) -> impl IntoResponse {
    let threads = commands::rda_threads(&body.spec_nums, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

async fn slit(State(state): State<AppState>, Json(body): Json<SpecNumsBody>) -> impl IntoResponse {
    let threads = commands::slit_threads(&body.spec_nums, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

async fn bia(State(state): State<AppState>, Json(body): Json<SpecNumsBody>) -> impl IntoResponse {
    let threads = commands::bia_threads(&body.spec_nums, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

async fn iis(State(state): State<AppState>, Json(body): Json<SpecNumsBody>) -> impl IntoResponse {
    let threads = commands::iis_threads(&body.spec_nums, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

#[derive(Debug, Deserialize)]
struct CamsValueBody {
    cams: Vec<String>,
    value: String,
}

async fn ccd_motors(State(state): State<AppState>, Json(body): Json<CamsValueBody>) -> impl IntoResponse {
    let cams = match parse_cams(&body.cams) {
        Ok(cams) => cams,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(ErrorReply { error: err })).into_response(),
    };
    let threads = commands::ccd_motors_threads(&cams, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

async fn fpa(State(state): State<AppState>, Json(body): Json<CamsValueBody>) -> impl IntoResponse {
    let cams = match parse_cams(&body.cams) {
        Ok(cams) => cams,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(ErrorReply { error: err })).into_response(),
    };
    let threads = commands::ccd_motors_threads(&cams, &body.value, &state.config);
    run_and_reply(&state, threads).await
}

fn parse_light_source(value: &str) -> Option<LightSource> {
    match value {
        "pfi" => Some(LightSource::Pfi),
        "dcb" => Some(LightSource::Dcb),
        _ => None,
    }
}

async fn declare_light_source(State(state): State<AppState>, Json(body): Json<SpecNumsBody>) -> impl IntoResponse {
    let Some(source) = parse_light_source(&body.value) else {
        return (StatusCode::BAD_REQUEST, Json(ErrorReply { error: format!("unknown light source {:?}", body.value) }))
            .into_response();
    };
    let threads = commands::declare_light_source_threads(&body.spec_nums, &body.value, &state.config);
    let response = run_and_reply(&state, threads).await;
    if response.status() == StatusCode::OK {
        for spec_num in &body.spec_nums {
            state.light_sources.declare(*spec_num, source);
        }
    }
    response
}

//! The two composite routes of §6: `occs/list.<fmt>` and
//! `occs/single.<fmt>`. Both share a handler; the only difference is which
//! `QueryKind` it asks the adapters to build URLs for.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use gateway_core::{
    CompositeDriver, DriverOptions, Error as CoreError, PaleoAdapter, QuaternaryAdapter, QueryKind,
    RequestContext,
};

use crate::render::{self, Blocks, Format};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/occs/:resource", get(occs_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn occs_handler(
    Path(resource): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some((op, fmt_ext)) = resource.rsplit_once('.') else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(fmt) = Format::parse(fmt_ext) else {
        return (StatusCode::BAD_REQUEST, format!("unknown format '{fmt_ext}'")).into_response();
    };
    let query_kind = match op {
        "list" => QueryKind::List,
        "single" => QueryKind::Single,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    let params: BTreeMap<String, String> = raw.into_iter().collect();
    let (req, mut warnings) = match RequestContext::parse(&params) {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    let show = req.show.clone();

    tracing::debug!(enabled = ?req.enabled, ?query_kind, "dispatching composite query");

    let paleo = PaleoAdapter::new(state.paleo_base_url.clone());
    let quaternary = QuaternaryAdapter::new(state.quaternary_base_url.clone());
    let opts = DriverOptions { timeout: state.timeout, retries: state.retries };

    let driver = CompositeDriver::new(req, state.http.clone(), paleo, quaternary, query_kind, opts)
        .run()
        .await;

    warnings.extend(driver.warnings());
    if warnings.iter().any(|w| w.starts_with("TIMEOUT")) {
        tracing::warn!("composite request exceeded its deadline");
    }
    for diag in driver.diagnostics() {
        tracing::debug!(
            label = %diag.label,
            http_status = ?diag.http_status,
            retries = diag.retry_count,
            removed = diag.removed,
            records = diag.record_count,
            "subquery finished"
        );
    }

    let records = driver.results();
    let diagnostics = show.iter().any(|s| s == "diagnostics").then(|| driver.diagnostics());
    let urls = show.iter().any(|s| s == "urls").then(|| driver.urls(true));
    let blocks = Blocks { records, warnings, diagnostics, urls };

    match render::render(fmt, blocks) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, fmt.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render composite response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(e: CoreError) -> Response {
    if e.is_caller_fault() {
        tracing::error!(error = %e, "rejecting request");
        (StatusCode::BAD_REQUEST, e.to_string()).into_response()
    } else {
        tracing::error!(error = %e, "internal invariant violated");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

use std::net::SocketAddr;

use anyhow::{Context, Error};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;

use pyjail_exec::{
    ErrorCategory, ExecutionError, NsjailLauncher, ScriptExecutor, UnsandboxedLauncher,
};

use crate::Opt;

/// The only endpoint of the service.
pub const EXECUTE_PATH: &str = "/execute";

/// Room for the JSON syntax around the script.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Body of all the failed responses.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<&'a str>,
}

/// Build the router of the service.
pub fn build_app(executor: ScriptExecutor) -> Router {
    let body_limit = body_limit(executor.config().max_script_bytes);
    Router::new()
        .route(EXECUTE_PATH, post(execute))
        .with_state(executor)
        .layer(DefaultBodyLimit::max(body_limit))
}

/// The maximum size of a request body containing a script of `max_script_bytes`: JSON escaping
/// can make each byte up to 6 bytes long.
fn body_limit(max_script_bytes: usize) -> usize {
    max_script_bytes
        .saturating_mul(6)
        .saturating_add(BODY_LIMIT_SLACK)
}

async fn execute(
    State(executor): State<ScriptExecutor>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return failure(
            StatusCode::BAD_REQUEST,
            "Request must be application/json.".into(),
            None,
        );
    }
    // a body that is not JSON at all is treated like one without the script
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    match tokio::task::spawn_blocking(move || executor.execute(&body)).await {
        Ok(Ok(success)) => (StatusCode::OK, Json(success)).into_response(),
        Ok(Err(err)) => error_response(&err),
        Err(e) => {
            error!("The execution task failed: {}", e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error.".into(),
                None,
            )
        }
    }
}

/// Whether the request declares a JSON body.
fn is_json(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.contains('/') && mime.ends_with("+json"))
}

/// The status code for a failed execution.
fn status_of(err: &ExecutionError) -> StatusCode {
    match err.category() {
        ErrorCategory::Validation | ErrorCategory::Script => StatusCode::BAD_REQUEST,
        ErrorCategory::Timeout => StatusCode::REQUEST_TIMEOUT,
        ErrorCategory::Configuration | ErrorCategory::Infrastructure => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &ExecutionError) -> Response {
    failure(status_of(err), err.public_message(), err.stdout())
}

fn failure(status: StatusCode, error: String, stdout: Option<&str>) -> Response {
    (status, Json(ErrorBody { error, stdout })).into_response()
}

/// Serve the application on `addr` until Ctrl+C or SIGTERM.
pub async fn serve(addr: SocketAddr, executor: ScriptExecutor) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, build_app(executor))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("The HTTP server failed")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install the Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install the SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Entry point of the service.
pub fn main_server(opt: Opt) -> Result<(), Error> {
    let config = opt.sandbox.to_config();
    debug!("Configuration: {:#?}", config);
    let executor = if opt.sandbox.no_sandbox {
        warn!("Running WITHOUT any sandbox, the scripts have full access to this machine!");
        if let Err(e) = config.check_binaries(false) {
            warn!("{}", e);
        }
        ScriptExecutor::new(config, UnsandboxedLauncher)
    } else {
        // a broken setup is reported on each request too
        if let Err(e) = config.check_binaries(true) {
            warn!("{}", e);
        }
        ScriptExecutor::new(config, NsjailLauncher)
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the tokio runtime")?;
    runtime.block_on(serve(opt.addr, executor))
}

//! HTTP delivery of normalized event logs
//!
//! `GET /<logical path>` answers with the normalized JSON array for one log.
//! The configured FTP path is special: the raw FTP log is re-parsed on every
//! request. Any other path is read as NDJSON from the log directory.

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ftp::{parse_log, FtpLineParser};
use crate::normalize::{parse_ndjson, Normalizer};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0}")]
    BadRequest(String),

    #[error("log not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeliveryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DeliveryError::NotFound(_) => StatusCode::NOT_FOUND,
            DeliveryError::Internal(reason) => {
                error!("Delivery failed: {}", reason);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            [(header::CACHE_CONTROL, "no-cache")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Where a logical path's records come from
#[derive(Debug, PartialEq, Eq)]
enum Source {
    Ftp,
    File(PathBuf),
}

pub struct DeliveryState {
    log_dir: PathBuf,
    ftp_logical_path: String,
    ftp_raw_log: PathBuf,
    parser: FtpLineParser,
    normalizer: Normalizer,
}

impl DeliveryState {
    pub fn new(
        log_dir: PathBuf,
        ftp_logical_path: String,
        ftp_raw_log: PathBuf,
        parser: FtpLineParser,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            log_dir,
            ftp_logical_path: ftp_logical_path.trim_start_matches('/').to_string(),
            ftp_raw_log,
            parser,
            normalizer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.general.log_dir.clone(),
            config.ftp.logical_path.clone(),
            config.ftp.raw_log_path.clone(),
            FtpLineParser::new(config.ftp.timestamp_format),
            Normalizer::new(config.normalizer.max_records),
        )
    }

    fn resolve(&self, logical: &str) -> Result<Source, DeliveryError> {
        let logical = logical.trim_start_matches('/');
        if !logical.ends_with(".json") {
            return Err(DeliveryError::BadRequest(format!(
                "only .json logs are served: {}",
                logical
            )));
        }

        let relative = FsPath::new(logical);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(DeliveryError::BadRequest(format!("invalid log path: {}", logical)));
        }

        if logical == self.ftp_logical_path {
            Ok(Source::Ftp)
        } else {
            Ok(Source::File(self.log_dir.join(relative)))
        }
    }

    /// Normalized JSON body for one logical path
    async fn render(self: Arc<Self>, logical: String) -> Result<Vec<u8>, DeliveryError> {
        let records = match self.resolve(&logical)? {
            Source::Ftp => {
                let state = self.clone();
                let events = tokio::task::spawn_blocking(move || {
                    parse_log(&state.parser, &state.ftp_raw_log)
                })
                .await
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;

                events
                    .iter()
                    .map(serde_json::to_value)
                    .filter_map(|v| match v {
                        Ok(serde_json::Value::Object(map)) => Some(Ok(map)),
                        Ok(_) => None,
                        Err(e) => Some(Err(DeliveryError::Internal(e.to_string()))),
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            Source::File(path) => {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(DeliveryError::NotFound(logical));
                    }
                    Err(e) => {
                        return Err(DeliveryError::Internal(format!("{}: {}", path.display(), e)));
                    }
                };
                parse_ndjson(&String::from_utf8_lossy(&bytes))
            }
        };

        let rows = self.normalizer.normalize(records);
        debug!("Serving {} normalized records for {}", rows.len(), logical);
        serde_json::to_vec(&rows).map_err(|e| DeliveryError::Internal(e.to_string()))
    }
}

async fn get_log(
    State(state): State<Arc<DeliveryState>>,
    Path(logical): Path<String>,
) -> Result<Response, DeliveryError> {
    let body = state.render(logical).await.inspect_err(|e| {
        if !matches!(e, DeliveryError::Internal(_)) {
            warn!("Rejected log request: {}", e);
        }
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

pub fn router(state: Arc<DeliveryState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/{*path}", get(get_log))
        .layer(cors)
        .with_state(state)
}

/// Run the delivery server until the process exits
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let addr = config.delivery.bind_addr()?;
    let state = Arc::new(DeliveryState::from_config(config));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind delivery server on {}", addr))?;

    info!(
        "Delivery server listening on {} (logs from {})",
        addr,
        config.general.log_dir.display()
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(dir: &TempDir) -> Arc<DeliveryState> {
        Arc::new(DeliveryState::new(
            dir.path().to_path_buf(),
            "dionaea/ftp_parsed.json".to_string(),
            dir.path().join("dionaea.log"),
            FtpLineParser::default(),
            Normalizer::default(),
        ))
    }

    async fn get(state: Arc<DeliveryState>, uri: &str) -> (StatusCode, Response) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_serves_normalized_ndjson() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ssh_honeypot.json"),
            "{\"event_type\":\"connection\",\"src_ip\":\"1.2.3.4\"}\nnot json\n{\"event_type\":\"command\",\"command\":\"ls\"}\n",
        )
        .unwrap();

        let (status, response) = get(state(&dir), "/ssh_honeypot.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let body = json_body(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["command"], Value::Null);
        assert_eq!(rows[1]["src_ip"], Value::Null);
        assert_eq!(rows[1]["id"], 2);
        assert_eq!(rows[1]["count"], 1);
    }

    #[tokio::test]
    async fn test_ftp_path_reparses_raw_log() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("dionaea.log");
        std::fs::write(
            &raw,
            "[02122025 11:53:15] ftp con 0x1a USER admin\n[02122025 11:53:17] ftp con 0x1a PASS secret\n",
        )
        .unwrap();
        let state = state(&dir);

        let (status, response) = get(state.clone(), "/dionaea/ftp_parsed.json").await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[1]["username"], "admin");
        assert_eq!(body[1]["password"], "secret");

        std::fs::write(&raw, "").unwrap();
        let (_, response) = get(state, "/dionaea/ftp_parsed.json").await;
        let body = json_body(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["event_type"], "no_activity");
        assert_eq!(body[0]["count"], 0);
    }

    #[tokio::test]
    async fn test_missing_ftp_log_serves_zero_count_placeholder() {
        let dir = TempDir::new().unwrap();

        let (status, response) = get(state(&dir), "/dionaea/ftp_parsed.json").await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["event_type"], "no_activity");
        assert_eq!(body[0]["count"], 0);
        assert_eq!(body[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_paths() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let (status, _) = get(state.clone(), "/ssh_honeypot.log").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(state.clone(), "/logs/../../secret.json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, response) = get(state, "/absent.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("absent.json"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let dir = TempDir::new().unwrap();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/ssh_honeypot.json")
            .header(header::ORIGIN, "http://dashboard.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = router(state(&dir)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[test]
    fn test_resolve_logical_paths() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        assert_eq!(state.resolve("dionaea/ftp_parsed.json").unwrap(), Source::Ftp);
        assert_eq!(
            state.resolve("web/access.json").unwrap(),
            Source::File(dir.path().join("web/access.json"))
        );
        assert!(state.resolve("/etc/passwd").is_err());
    }
}

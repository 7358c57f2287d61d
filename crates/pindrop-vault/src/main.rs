//! pindrop-vault - hold pin-locked secrets you cannot read
//!
//! stores aes-gcm envelopes next to opaque registration records and hands
//! each one out exactly once, to whoever finishes the pake login. the server
//! key lives in the data dir, so registrations survive restarts.
//!
//! usage:
//!   pindrop-vault --port 8080                        # defaults
//!   pindrop-vault --ttl-minutes 60 --max-payload-mb 25
//!
//! data stored in ~/.pindrop-vault/

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use pindrop::classify::{PIN_REJECTED_CODE, PIN_REJECTED_MESSAGE};
use pindrop::transport::{
    CreateSecretReply, CreateSecretRequest, ErrorReply, LoginStartReply, LoginStartRequest,
    RegisterStartReply, RegisterStartRequest, RevealRequest, SecretId,
};
use pindrop::{Envelope, PayloadKind, ServerError, ServerExchange};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// pindrop-vault - hold pin-locked secrets you cannot read
#[derive(Parser)]
#[command(name = "pindrop-vault")]
#[command(about = "pindrop vault - hold pin-locked secrets you cannot read")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// bind address (default: 0.0.0.0)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// data directory (default: ~/.pindrop-vault)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// default secret lifetime when a create request names none
    #[arg(long, default_value = "15")]
    ttl_minutes: u32,

    /// largest accepted sealed payload, in mebibytes
    #[arg(long, default_value = "10")]
    max_payload_mb: usize,

    /// how long a started login may wait for its finalization
    #[arg(long, default_value = "120")]
    session_ttl_secs: u64,

    /// how often expired secrets and sessions are swept
    #[arg(long, default_value = "60")]
    sweep_secs: u64,

    /// metrics port (prometheus endpoint, default: api_port + 1000)
    #[arg(long)]
    metrics_port: Option<u16>,
}

/// secret stored in db
#[derive(Clone, Serialize, Deserialize)]
struct StoredSecret {
    /// opaque registration record, needed to answer the login
    opaque_record: Vec<u8>,
    /// the sealed payload exactly as uploaded
    envelope: Envelope,
    /// creation timestamp (unix seconds)
    created_at: u64,
    /// hard expiry (unix seconds)
    expires_at: u64,
}

/// app state shared across handlers
struct AppState {
    /// embedded database
    db: sled::Db,
    /// pake server state
    exchange: ServerExchange,
    /// ttl applied when a create request names none
    default_ttl_minutes: u32,
    /// largest accepted sealed payload in bytes
    max_payload: usize,
}

type SharedState = Arc<AppState>;

// === error replies ===

/// json error reply, `{"error": ..., "code": ...}`
struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// any rejection a wrong pin could have caused carries the machine code
    fn pin_rejected(status: StatusCode) -> Self {
        Self {
            status,
            message: PIN_REJECTED_MESSAGE.into(),
            code: Some(PIN_REJECTED_CODE),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorReply {
            error: self.message,
            code: self.code.map(str::to_owned),
        };
        (self.status, Json(body)).into_response()
    }
}

// === handlers ===

async fn register_start(
    State(state): State<SharedState>,
    Json(req): Json<RegisterStartRequest>,
) -> Result<Json<RegisterStartReply>, ApiError> {
    let start = Instant::now();
    counter!("pindrop_requests_total", "endpoint" => "register_start").increment(1);

    if req.request.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "request is required"));
    }

    let secret_id = SecretId::from(Uuid::new_v4().to_string());
    let response = state
        .exchange
        .registration_response(&secret_id, &req.request)
        .map_err(|e| match e {
            ServerError::Malformed(detail) => {
                counter!("pindrop_errors_total", "endpoint" => "register_start", "error" => "malformed").increment(1);
                ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request: {detail}"))
            }
            other => {
                counter!("pindrop_errors_total", "endpoint" => "register_start", "error" => "protocol").increment(1);
                error!("registration start failed: {}", other);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "opaque registration failed")
            }
        })?;

    histogram!("pindrop_request_duration_seconds", "endpoint" => "register_start")
        .record(start.elapsed().as_secs_f64());

    Ok(Json(RegisterStartReply { secret_id, response }))
}

async fn create_secret(
    State(state): State<SharedState>,
    Json(req): Json<CreateSecretRequest>,
) -> Result<(StatusCode, Json<CreateSecretReply>), ApiError> {
    let start = Instant::now();
    counter!("pindrop_requests_total", "endpoint" => "create_secret").increment(1);

    if let Some(0) = req.ttl_minutes {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "TTL must be a positive number of minutes",
        ));
    }
    if req.secret_id.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "secret ID is required"));
    }
    if req.opaque_upload.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "opaque upload is required",
        ));
    }
    if ServerExchange::validate_upload(&req.opaque_upload).is_err() {
        counter!("pindrop_errors_total", "endpoint" => "create_secret", "error" => "bad_upload").increment(1);
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "invalid opaque upload"));
    }
    if req.envelope.payload.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "File or message is required",
        ));
    }
    if req.envelope.payload.len() > state.max_payload {
        counter!("pindrop_errors_total", "endpoint" => "create_secret", "error" => "too_large").increment(1);
        let message = match req.envelope.payload_type {
            PayloadKind::Text => format!("message exceeds {} bytes", state.max_payload),
            PayloadKind::File => format!("file size exceeds {} bytes", state.max_payload),
        };
        return Err(ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, message));
    }

    let ttl_minutes = req.ttl_minutes.unwrap_or(state.default_ttl_minutes);
    let now = unix_now();
    let stored = StoredSecret {
        opaque_record: req.opaque_upload,
        envelope: req.envelope,
        created_at: now,
        expires_at: now + u64::from(ttl_minutes) * 60,
    };

    let stored_bytes = serde_json::to_vec(&stored)
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to save secret"))?;
    state
        .db
        .insert(req.secret_id.as_str(), stored_bytes)
        .map_err(|e| {
            error!("db insert failed: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to save secret")
        })?;

    counter!("pindrop_secrets_created_total").increment(1);
    gauge!("pindrop_secrets_current").set(state.db.len() as f64);
    histogram!("pindrop_request_duration_seconds", "endpoint" => "create_secret")
        .record(start.elapsed().as_secs_f64());

    info!(
        "stored secret {} ({} bytes, ttl {}m)",
        id_prefix(&req.secret_id),
        stored.envelope.payload.len(),
        ttl_minutes
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSecretReply {
            secret_id: req.secret_id,
            expires_in_minutes: ttl_minutes,
        }),
    ))
}

async fn login_start(
    State(state): State<SharedState>,
    Json(req): Json<LoginStartRequest>,
) -> Result<Json<LoginStartReply>, ApiError> {
    let start = Instant::now();
    counter!("pindrop_requests_total", "endpoint" => "login_start").increment(1);

    if req.secret_id.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "secretId is required"));
    }

    let stored = load_secret(&state, &req.secret_id)?.ok_or_else(|| {
        counter!("pindrop_errors_total", "endpoint" => "login_start", "error" => "not_found").increment(1);
        ApiError::pin_rejected(StatusCode::NOT_FOUND)
    })?;

    if unix_now() >= stored.expires_at {
        remove_expired(&state, &req.secret_id);
        return Err(ApiError::new(StatusCode::GONE, "secret expired"));
    }
    if stored.opaque_record.is_empty() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "opaque record missing",
        ));
    }

    let (session_id, response) = state
        .exchange
        .login_start(&req.secret_id, &stored.opaque_record, &req.request)
        .map_err(|e| {
            counter!("pindrop_errors_total", "endpoint" => "login_start", "error" => "protocol").increment(1);
            error!("login start failed: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "opaque login failed")
        })?;

    gauge!("pindrop_sessions_current").set(state.exchange.session_count() as f64);
    histogram!("pindrop_request_duration_seconds", "endpoint" => "login_start")
        .record(start.elapsed().as_secs_f64());

    Ok(Json(LoginStartReply { session_id, response }))
}

async fn reveal_secret(
    State(state): State<SharedState>,
    Json(req): Json<RevealRequest>,
) -> Result<Json<Envelope>, ApiError> {
    let start = Instant::now();
    counter!("pindrop_requests_total", "endpoint" => "reveal_secret").increment(1);

    if req.session_id.is_empty() || req.finalization.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "session_id and finalization are required",
        ));
    }

    state
        .exchange
        .login_finish(&req.session_id, &req.secret_id, &req.finalization)
        .map_err(|e| match e {
            ServerError::Malformed(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid finalization")
            }
            ServerError::SessionExpired => {
                ApiError::new(StatusCode::BAD_REQUEST, "session expired, try again")
            }
            _ => {
                counter!("pindrop_errors_total", "endpoint" => "reveal_secret", "error" => "verify_failed").increment(1);
                ApiError::pin_rejected(StatusCode::BAD_REQUEST)
            }
        })?;
    gauge!("pindrop_sessions_current").set(state.exchange.session_count() as f64);

    let stored = load_secret(&state, &req.secret_id)?.ok_or_else(|| {
        counter!("pindrop_errors_total", "endpoint" => "reveal_secret", "error" => "not_found").increment(1);
        ApiError::pin_rejected(StatusCode::NOT_FOUND)
    })?;

    if unix_now() >= stored.expires_at {
        remove_expired(&state, &req.secret_id);
        return Err(ApiError::new(StatusCode::GONE, "secret expired"));
    }

    // single use: the secret is gone before the envelope leaves the vault
    state.db.remove(req.secret_id.as_str()).map_err(|e| {
        error!("db remove failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load secret")
    })?;

    counter!("pindrop_secrets_revealed_total").increment(1);
    gauge!("pindrop_secrets_current").set(state.db.len() as f64);
    histogram!("pindrop_request_duration_seconds", "endpoint" => "reveal_secret")
        .record(start.elapsed().as_secs_f64());

    info!("secret {} revealed and deleted", id_prefix(&req.secret_id));

    Ok(Json(stored.envelope))
}

#[derive(Serialize)]
struct ServerInfoResponse {
    version: String,
    secrets: u64,
    pending_sessions: usize,
    default_ttl_minutes: u32,
    max_payload_bytes: usize,
}

async fn server_info(State(state): State<SharedState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        secrets: state.db.len() as u64,
        pending_sessions: state.exchange.session_count(),
        default_ttl_minutes: state.default_ttl_minutes,
        max_payload_bytes: state.max_payload,
    })
}

async fn health() -> &'static str {
    "ok"
}

// === helpers ===

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// uuids are long; logs only need the first block. ids come from clients
/// too, so cut on a char boundary.
fn id_prefix(id: &SecretId) -> &str {
    let s = id.as_str();
    match s.char_indices().nth(8) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn load_secret(state: &AppState, id: &SecretId) -> Result<Option<StoredSecret>, ApiError> {
    let entry = state.db.get(id.as_str()).map_err(|e| {
        error!("db read failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load secret")
    })?;
    match entry {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            error!("stored secret unreadable: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load secret")
        }),
    }
}

fn remove_expired(state: &AppState, id: &SecretId) {
    if state.db.remove(id.as_str()).is_ok() {
        counter!("pindrop_expired_swept_total").increment(1);
        gauge!("pindrop_secrets_current").set(state.db.len() as f64);
    }
}

/// periodic sweep of expired secrets and stale login sessions
fn spawn_sweeper(state: SharedState, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let secrets = sweep_expired(&state);
            let sessions = state.exchange.sweep_sessions();
            if secrets > 0 || sessions > 0 {
                info!("swept {} expired secrets, {} stale sessions", secrets, sessions);
            }
            gauge!("pindrop_secrets_current").set(state.db.len() as f64);
            gauge!("pindrop_sessions_current").set(state.exchange.session_count() as f64);
        }
    });
}

fn sweep_expired(state: &AppState) -> usize {
    let now = unix_now();
    let mut removed = 0;
    for item in state.db.iter() {
        let Ok((key, value)) = item else { continue };
        // unreadable entries are dead weight, sweep them with the expired
        let expired = serde_json::from_slice::<StoredSecret>(&value)
            .map(|stored| now >= stored.expires_at)
            .unwrap_or(true);
        if expired && state.db.remove(&key).is_ok() {
            counter!("pindrop_expired_swept_total").increment(1);
            removed += 1;
        }
    }
    removed
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pindrop_vault=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    // setup prometheus metrics exporter
    let metrics_port = args.metrics_port.unwrap_or(args.port + 1000);
    let metrics_addr: std::net::SocketAddr = format!("{}:{}", args.bind, metrics_port)
        .parse()
        .expect("invalid metrics address");

    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("failed to install prometheus metrics exporter");

    let data_dir = args.data_dir.unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{}/.pindrop-vault", home)
    });
    std::fs::create_dir_all(&data_dir).expect("failed to create data dir");

    let db = sled::open(format!("{}/db", data_dir)).expect("failed to open database");

    // the opaque server key must outlive restarts or stored records go dark
    let key_path = format!("{}/server.key", data_dir);
    let exchange = if std::path::Path::new(&key_path).exists() {
        let key_bytes = std::fs::read(&key_path).expect("failed to read server key");
        ServerExchange::from_setup_bytes(&key_bytes).expect("invalid server key")
    } else {
        let exchange = ServerExchange::new();
        std::fs::write(&key_path, exchange.setup_bytes()).expect("failed to write server key");
        warn!("generated new server key at {}", key_path);
        exchange
    };
    let exchange = exchange.with_session_ttl(Duration::from_secs(args.session_ttl_secs));

    info!("pindrop-vault v{}", env!("CARGO_PKG_VERSION"));
    info!("  data: {}", data_dir);
    info!("  bind: {}:{}", args.bind, args.port);
    info!("  metrics: {}:{}", args.bind, metrics_port);
    info!("  default ttl: {}m", args.ttl_minutes);
    info!("  max payload: {}mb", args.max_payload_mb);
    info!("  stored secrets: {}", db.len());

    // set initial gauge values
    gauge!("pindrop_secrets_current").set(db.len() as f64);

    let max_payload = args.max_payload_mb * 1024 * 1024;
    let state = Arc::new(AppState {
        db,
        exchange,
        default_ttl_minutes: args.ttl_minutes,
        max_payload,
    });

    spawn_sweeper(state.clone(), Duration::from_secs(args.sweep_secs));

    let app = Router::new()
        .route("/", get(server_info))
        .route("/health", get(health))
        .route("/opaque/register/start", post(register_start))
        .route("/opaque/login/start", post(login_start))
        .route("/secrets", post(create_secret))
        .route("/secrets/reveal", post(reveal_secret))
        // sealed payloads ride base64 in json, give them headroom over the cap
        .layer(DefaultBodyLimit::max(max_payload * 2))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("listening on {}", addr);

    axum::serve(listener, app).await.unwrap();
}

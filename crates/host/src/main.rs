use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use host_api::ApiContext;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{BrowseArgs, CommandName, DrosseEvent, FileArgs, ImportArgs, SaveArgs, UuidArgs},
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

mod config;
mod discover;

use config::{load_settings, normalize_database_url};

const MAX_COMMAND_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<DrosseEvent>,
}

type HttpError = (StatusCode, Json<ApiError>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };
    let (events, _) = broadcast::channel(256);

    let socket = discover::bind(&settings.discovery_bind).await?;
    let discovery = tokio::spawn(discover::listen(socket, api.clone(), events.clone()));

    let app = build_router(Arc::new(AppState { api, events }));
    let addr: SocketAddr = settings.bind.parse()?;
    info!(%addr, "drosse host listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        stopped = discovery => match stopped {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(err) => return Err(err.into()),
        },
    }
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/commands/:name",
            post(run_command).layer(RequestBodyLimitLayer::new(MAX_COMMAND_BYTES)),
        )
        .route("/events", get(ws_handler))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| http_error(ApiError::new(ErrorCode::Unavailable, e.to_string())))?;
    Ok("ok")
}

async fn run_command(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<Value>, HttpError> {
    let command: CommandName = name
        .parse()
        .map_err(|message: String| http_error(ApiError::not_found(message)))?;
    debug!(%command, "host command");

    let api = &state.api;
    let result = match command {
        CommandName::List => to_json(host_api::list_drosses(api).await),
        CommandName::Save => {
            let args: SaveArgs = decode_args(command, args)?;
            to_json(host_api::save_drosses(api, &args.drosses).await)
        }
        CommandName::Start => {
            let args: UuidArgs = decode_args(command, args)?;
            to_json(host_api::start_drosse(api, &args.uuid).await)
        }
        CommandName::Stop => {
            let args: UuidArgs = decode_args(command, args)?;
            to_json(host_api::stop_drosse(api, &args.uuid).await)
        }
        CommandName::Import => {
            let args: ImportArgs = decode_args(command, args)?;
            to_json(host_api::import_folder(&args.path).await)
        }
        CommandName::Open => {
            let args: FileArgs = decode_args(command, args)?;
            to_json(host_api::open_file(api, &args.uuid, &args.file).await)
        }
        CommandName::File => {
            let args: FileArgs = decode_args(command, args)?;
            to_json(host_api::read_file(api, &args.uuid, &args.file).await)
        }
        CommandName::Browse => {
            let args: BrowseArgs = decode_args(command, args)?;
            to_json(host_api::browse(&args.dir).await)
        }
    };

    result.map(Json).map_err(|err| {
        warn!(%command, code = ?err.code, message = %err.message, "host command failed");
        http_error(err)
    })
}

fn decode_args<A: DeserializeOwned>(command: CommandName, args: Value) -> Result<A, HttpError> {
    serde_json::from_value(args).map_err(|e| {
        http_error(ApiError::validation(format!(
            "invalid arguments for {command}: {e}"
        )))
    })
}

fn to_json<T: Serialize>(result: Result<T, ApiError>) -> Result<Value, ApiError> {
    result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| ApiError::internal(e.to_string()))
    })
}

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    debug!("event stream client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream client lagging; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    debug!("event stream client disconnected");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

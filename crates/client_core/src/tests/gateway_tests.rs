use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use shared::{domain::Drosse, error::ErrorCode};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct HostState {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn command(
    State(state): State<HostState>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.calls.lock().await.push((name.clone(), args.clone()));
    match name.as_str() {
        "list" => Ok(Json(json!({ "a": { "uuid": "a", "up": true, "port": 8000 } }))),
        "save" | "start" | "stop" => Ok(Json(json!({ "ok": true }))),
        "import" => Ok(Json(json!({ "path": args["path"], "accepted": true }))),
        "open" => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "not_found", "message": "drosse ghost is not registered" })),
        )),
        "browse" => Ok(Json(json!([{ "path": "/tmp/mocks", "selectable": true }]))),
        _ => Err((StatusCode::BAD_GATEWAY, Json(json!("upstream exploded")))),
    }
}

async fn spawn_host() -> std::io::Result<(String, HostState)> {
    let state = HostState::default();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/commands/:name", post(command))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

#[tokio::test]
async fn commands_round_trip_through_the_host() {
    let (url, state) = spawn_host().await.expect("spawn host");
    let gateway = HttpCommandGateway::new(url);
    assert!(!gateway.base_url().ends_with('/'));

    let listed = gateway.list().await.expect("list").expect("persisted");
    assert!(listed[&DrosseId::from("a")].up);

    let mut drosses = DrosseMap::new();
    drosses.insert(DrosseId::from("b"), Drosse::new("b"));
    gateway.save(&drosses).await.expect("save");
    gateway.start(&DrosseId::from("b")).await.expect("start");

    let imported = gateway.import("/tmp/mocks").await.expect("import");
    assert_eq!(imported.path, "/tmp/mocks");
    assert!(imported.accepted);

    let entries = gateway.browse("/tmp").await.expect("browse");
    assert_eq!(entries.len(), 1);

    let calls = state.calls.lock().await;
    let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["list", "save", "start", "import", "browse"]);
    assert_eq!(calls[1].1["drosses"]["b"]["uuid"], json!("b"));
    assert_eq!(calls[2].1, json!({ "uuid": "b" }));
}

#[tokio::test]
async fn host_errors_are_decoded_as_rejections() {
    let (url, _) = spawn_host().await.expect("spawn host");
    let gateway = HttpCommandGateway::new(url);

    let err = gateway
        .open(&DrosseId::from("ghost"), "routes.json")
        .await
        .expect_err("must be rejected");
    match err {
        GatewayError::Rejected(api_error) => assert_eq!(api_error.code, ErrorCode::NotFound),
        other => panic!("unexpected error: {other}"),
    }

    let err = gateway
        .file(&DrosseId::from("a"), "routes.json")
        .await
        .expect_err("must fail");
    assert!(matches!(err, GatewayError::Transport(_)), "unexpected: {err}");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let gateway = HttpCommandGateway::new(format!("http://{addr}"));
    let err = gateway.list().await.expect_err("must fail");
    assert!(matches!(err, GatewayError::Transport(_)), "unexpected: {err}");
}

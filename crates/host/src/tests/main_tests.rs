use super::*;
use axum::{body, body::Body, http::Request};
use client_core::{CommandGateway, EventSource, HttpCommandGateway, WsEventSource};
use futures::StreamExt;
use serde_json::json;
use shared::domain::{Drosse, DrosseId, DrosseMap};
use std::{fs, time::Duration};
use tower::ServiceExt;

async fn test_state() -> Arc<AppState> {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (events, _) = broadcast::channel(32);
    Arc::new(AppState {
        api: ApiContext { storage },
        events,
    })
}

fn command(name: &str, args: Value) -> Request<Body> {
    Request::post(format!("/commands/{name}"))
        .header("content-type", "application/json")
        .body(Body::from(args.to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = build_router(test_state().await);
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn save_then_list_round_trips_the_registry() {
    let app = build_router(test_state().await);

    let response = app
        .clone()
        .oneshot(command("list", json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, Value::Null);

    let response = app
        .clone()
        .oneshot(command(
            "save",
            json!({ "drosses": { "a": { "uuid": "a", "open": true, "port": 8000 } } }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true }));

    let response = app
        .oneshot(command("list", json!({})))
        .await
        .expect("response");
    let listed = json_body(response).await;
    assert_eq!(listed["a"]["open"], json!(true));
    assert_eq!(listed["a"]["available"], json!(false));
}

#[tokio::test]
async fn unknown_command_is_not_found() {
    let app = build_router(test_state().await);
    let response = app
        .oneshot(command("restart", json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], json!("not_found"));
}

#[tokio::test]
async fn invalid_arguments_are_rejected() {
    let app = build_router(test_state().await);
    let response = app
        .oneshot(command("start", json!({ "id": "a" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], json!("validation"));
}

#[tokio::test]
async fn file_commands_for_unknown_drosse_are_not_found() {
    let app = build_router(test_state().await);
    let response = app
        .oneshot(command("open", json!({ "uuid": "ghost", "file": "routes.json" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn browse_reports_selectable_folders() {
    let tmp = tempfile::tempdir().expect("tmp");
    let users = tmp.path().join("users");
    fs::create_dir_all(&users).expect("mkdir");
    fs::write(users.join(host_api::DROSSE_CONFIG_FILE), "module.exports = {}").expect("config");

    let app = build_router(test_state().await);
    let response = app
        .oneshot(command(
            "browse",
            json!({ "dir": tmp.path().display().to_string() }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let entries = json_body(response).await;
    assert_eq!(entries[0]["selectable"], json!(true));
}

#[tokio::test]
async fn client_gateway_and_event_stream_talk_to_the_host() {
    let state = test_state().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = build_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let host_url = format!("http://{addr}");

    let gateway = HttpCommandGateway::new(host_url.clone());
    let mut drosses = DrosseMap::new();
    drosses.insert(DrosseId::from("a"), Drosse::new("a"));
    gateway.save(&drosses).await.expect("save");
    let listed = gateway.list().await.expect("list").expect("saved");
    assert!(listed.contains_key(&DrosseId::from("a")));

    let source = WsEventSource::new(&host_url).expect("url");
    let mut stream = source.subscribe().await.expect("subscribe");
    let down = DrosseEvent::Down {
        uuid: DrosseId::from("a"),
    };
    // the socket task subscribes right after the upgrade
    let mut delivered = false;
    for _ in 0..50 {
        if state.events.send(down.clone()).is_ok() {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered, "event stream never subscribed");

    let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("event in time");
    assert_eq!(received, Some(down));
}

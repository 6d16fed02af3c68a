use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rockcast_session::{FetchError, StatusClient, StatusSource};

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

fn json_body(body: &'static str) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], body)
}

#[tokio::test]
async fn test_fetch_parses_live_document() -> anyhow::Result<()> {
    let base = serve(Router::new().route(
        "/status.json",
        get(|| async {
            json_body(
                r#"{"artist":"Metallica","song":"Fuel","playlist":"Heavy_Rotation_12",
                    "kbps":"192","nextsongs":[{"song":"One"}],"listeners":40}"#,
            )
        }),
    ))
    .await?;

    let client = StatusClient::new(format!("{base}/status.json"), Duration::from_secs(5))?;
    let snap = client.fetch().await?;

    assert_eq!(snap.current_track, "Metallica - Fuel");
    assert_eq!(snap.next_track, "One");
    assert_eq!(snap.playlist_name, "Heavy Rotation");
    assert_eq!(snap.bitrate_label, "192 kbps MP3");
    assert!(snap.fetched_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_non_200_is_a_status_error() -> anyhow::Result<()> {
    let base = serve(Router::new().route(
        "/status.json",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
    ))
    .await?;

    let client = StatusClient::new(format!("{base}/status.json"), Duration::from_secs(5))?;
    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Status(503)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_rejected() -> anyhow::Result<()> {
    let base = serve(
        Router::new()
            .route("/broken", get(|| async { json_body("{\"song\": ") }))
            .route("/array", get(|| async { json_body("[1, 2, 3]") })),
    )
    .await?;

    let broken = StatusClient::new(format!("{base}/broken"), Duration::from_secs(5))?;
    assert!(matches!(broken.fetch().await, Err(FetchError::Malformed(_))));

    let array = StatusClient::new(format!("{base}/array"), Duration::from_secs(5))?;
    assert!(matches!(array.fetch().await, Err(FetchError::NotAnObject)));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_transport_error() -> anyhow::Result<()> {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = StatusClient::new(format!("http://{addr}/status.json"), Duration::from_secs(2))?;
    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "got {err:?}");
    assert!(!err.to_string().is_empty());
    Ok(())
}

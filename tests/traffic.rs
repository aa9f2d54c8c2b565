use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use podtraffic::error::AppError;
use podtraffic::settings::Settings;
use podtraffic::traffic::{Generator, HttpTransport, CLIENT_HOST_HEADER};
use podtraffic::{logging, Exit};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

type Hits = Arc<Mutex<Vec<String>>>;

/// A backend that records the identity header of every request it receives.
async fn spawn_backend() -> (u16, Hits) {
    let hits: Hits = Arc::default();
    let recorded = Arc::clone(&hits);
    let app = Router::new().route(
        "/",
        get(move |headers: HeaderMap| {
            let recorded = Arc::clone(&recorded);
            async move {
                let client = headers
                    .get(CLIENT_HOST_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_owned();
                recorded.lock().unwrap().push(client);
                "ok"
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (port, hits)
}

fn settings(backend_port: u16, rate: f64) -> Arc<Settings> {
    Arc::new(Settings {
        backend_port,
        backend_endpoints: vec!["127.0.0.1".to_owned()],
        request_rate: rate,
        num_threads: 20,
        pod_name: "pod-X".to_owned(),
        ..Settings::default()
    })
}

#[tokio::test]
async fn generator_sends_identity_to_backend() {
    let _ = logging::try_init();
    let (port, hits) = spawn_backend().await;

    let transport = Arc::new(HttpTransport::new().unwrap());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Generator::new(settings(port, 20.0), transport).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    cancel.cancel();
    let report = handle.await.unwrap();

    // give the last in-flight sends a moment to land
    tokio::time::sleep(Duration::from_millis(200)).await;
    let hits = hits.lock().unwrap();
    assert!(report.ticks >= 5, "only {} ticks", report.ticks);
    assert!(hits.len() >= 5, "only {} requests arrived", hits.len());
    assert!(hits.iter().all(|client| client == "pod-X"));
}

#[tokio::test]
async fn generator_survives_unreachable_backend() {
    let _ = logging::try_init();
    // grab a free port and release it so nothing listens there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let transport = Arc::new(HttpTransport::new().unwrap());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Generator::new(settings(port, 20.0), transport).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    cancel.cancel();
    let report = handle.await.unwrap();

    assert!(report.ticks >= 5, "only {} ticks", report.ticks);
    assert!(report.dispatched >= 5, "only {} sends", report.dispatched);
}

#[tokio::test]
async fn run_quits_without_backends() {
    let _ = logging::try_init();
    let exit = podtraffic::run(Settings::default()).await.unwrap();
    assert_eq!(exit, Exit::NoBackends);
}

#[tokio::test(start_paused = true)]
async fn run_exits_when_lifetime_is_up() {
    let _ = logging::try_init();
    let backend_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let settings = Settings {
        listen_port: 0,
        backend_port,
        backend_endpoints: vec!["127.0.0.1".to_owned()],
        lifetime: Some("10s".to_owned()),
        ..Settings::default()
    };

    let start = tokio::time::Instant::now();
    let exit = podtraffic::run(settings).await.unwrap();
    let lived = start.elapsed();

    assert_eq!(exit, Exit::LifetimeExpired);
    assert!(lived >= Duration::from_secs(10), "lived {lived:?}");
    assert!(lived <= Duration::from_secs(40), "lived {lived:?}");
}

#[tokio::test]
async fn run_fails_when_port_is_taken() {
    let _ = logging::try_init();
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let settings = Settings {
        listen_port: taken.local_addr().unwrap().port(),
        backend_endpoints: vec!["127.0.0.1".to_owned()],
        ..Settings::default()
    };

    let err = podtraffic::run(settings).await.unwrap_err();
    assert!(matches!(err, AppError::Server(_)), "unexpected error: {err}");
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Uri};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::settings::Settings;
use crate::traffic::CLIENT_HOST_HEADER;

/// What this instance answers with.
#[derive(Debug, Clone)]
pub struct EchoState {
    service_name: Arc<str>,
    pod_name: Arc<str>,
}

impl EchoState {
    pub fn new(service_name: &str, pod_name: &str) -> Self {
        Self {
            service_name: service_name.into(),
            pod_name: pod_name.into(),
        }
    }

    /// Response body: `"<service> - <pod>\n"`.
    pub fn identity(&self) -> String {
        format!("{} - {}\n", self.service_name, self.pod_name)
    }
}

impl From<&Settings> for EchoState {
    fn from(settings: &Settings) -> Self {
        Self::new(&settings.service_name, &settings.pod_name)
    }
}

pub fn router(state: EchoState) -> Router {
    Router::new().route("/", get(echo)).with_state(state)
}

async fn echo(
    State(state): State<EchoState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> String {
    // a non-utf8 header is logged as if absent
    let client = headers
        .get(CLIENT_HOST_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    log::info!("[{client}] {uri}, from {remote}");
    state.identity()
}

pub struct Server {
    listener: TcpListener,
    state: EchoState,
}

impl Server {
    pub async fn bind(addr: SocketAddr, state: EchoState) -> Result<Server, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        log::debug!("echo server bound to {}", listener.local_addr()?);
        Ok(Server { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Serves until `cancel` fires, then finishes in-flight requests.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), std::io::Error> {
        log::info!(
            "[{}] server starting on {}",
            self.state.service_name,
            self.local_addr()?
        );
        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

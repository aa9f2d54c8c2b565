//! Round-robin traffic generator.
//!
//! Sends one GET per tick to the next backend endpoint. Sends run on their own
//! tasks so a slow or failing request never holds up the ticker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::settings::{Settings, DEFAULT_REQUEST_RATE, MAX_NUM_THREADS};

/// Header carrying the sender's pod name.
pub const CLIENT_HOST_HEADER: &str = "x-client-host";

/// How often idle pooled connections are dropped.
pub const IDLE_RECYCLE_PERIOD: Duration = Duration::from_secs(60);

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One outbound GET.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub client_host: String,
    pub issued_at: Instant,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends the request and returns the response status code.
    async fn send(&self, request: &OutboundRequest) -> Result<u16, TransportError>;

    /// Drops pooled connections that are not currently in use.
    fn close_idle_connections(&self) {}
}

/// [`Transport`] over a pooled `reqwest` client.
pub struct HttpTransport {
    client: ArcSwap<Client>,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: ArcSwap::from_pointee(Client::builder().build()?),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<u16, TransportError> {
        let client = self.client.load_full();
        let response = client
            .get(&request.url)
            .header(CLIENT_HOST_HEADER, &request.client_host)
            .send()
            .await?;
        let status = response.status().as_u16();
        // Drain the body so the connection goes back to the pool.
        response.bytes().await?;
        Ok(status)
    }

    // reqwest has no explicit idle-close, so swap in a fresh client. The old
    // pool is dropped once the sends still holding it complete.
    fn close_idle_connections(&self) {
        match Client::builder().build() {
            Ok(client) => {
                self.client.store(Arc::new(client));
                log::debug!("idle connections closed");
            }
            Err(err) => log::warn!("failed to rebuild http client, keeping the old one: {err}"),
        }
    }
}

/// Time between two ticks for `rate` requests per second.
///
/// Rates that are not finite and positive, or too slow for the interval to fit
/// in a `Duration`, are treated as the default rate.
pub fn request_interval(rate: f64) -> Duration {
    let interval = if rate.is_finite() && rate > 0.0 {
        Duration::try_from_secs_f64(1.0 / rate).ok()
    } else {
        None
    };
    interval
        .unwrap_or_else(|| Duration::from_secs_f64(1.0 / DEFAULT_REQUEST_RATE))
        .max(MIN_INTERVAL)
}

pub fn target_url(endpoint: &str, backend_port: u16) -> String {
    format!("http://{endpoint}:{backend_port}/")
}

/// Cycles through endpoints starting at index 0.
#[derive(Debug, Clone)]
pub struct EndpointCycle {
    endpoints: Arc<[String]>,
    next: usize,
}

impl EndpointCycle {
    pub fn new(endpoints: impl Into<Arc<[String]>>) -> Self {
        Self {
            endpoints: endpoints.into(),
            next: 0,
        }
    }

    /// Returns `None` only when there are no endpoints.
    pub fn next_endpoint(&mut self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.next;
        self.next = (idx + 1) % self.endpoints.len();
        Some(&self.endpoints[idx])
    }
}

/// Counters collected while the generator ran.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorReport {
    pub ticks: u64,
    pub dispatched: u64,
    /// Ticks dropped because `num_threads` sends were already in flight.
    pub skipped: u64,
}

pub struct Generator<T> {
    settings: Arc<Settings>,
    transport: Arc<T>,
}

impl<T: Transport> Generator<T> {
    pub fn new(settings: Arc<Settings>, transport: Arc<T>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> GeneratorReport {
        let mut report = GeneratorReport::default();
        let mut endpoints = EndpointCycle::new(self.settings.backend_endpoints.clone());
        if self.settings.backend_endpoints.is_empty() {
            log::warn!("no backend endpoints, traffic generator not started");
            return report;
        }

        let period = request_interval(self.settings.request_rate);
        let bound = self.settings.num_threads.clamp(1, MAX_NUM_THREADS);
        let permits = Arc::new(Semaphore::new(bound));
        log::info!(
            "sending {} requests per second (every {:?}) to {} endpoints, at most {} in flight",
            self.settings.request_rate,
            period,
            self.settings.backend_endpoints.len(),
            bound,
        );

        let recycler = tokio::spawn(recycle_idle_connections(
            Arc::clone(&self.transport),
            IDLE_RECYCLE_PERIOD,
            cancel.child_token(),
        ));

        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            report.ticks += 1;

            let Some(endpoint) = endpoints.next_endpoint() else {
                break;
            };
            let request = OutboundRequest {
                url: target_url(endpoint, self.settings.backend_port),
                client_host: self.settings.pod_name.clone(),
                issued_at: Instant::now(),
            };

            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                log::warn!(
                    "{} sends still in flight, skipping request to {}",
                    bound,
                    request.url
                );
                report.skipped += 1;
                continue;
            };

            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                let _permit = permit;
                match transport.send(&request).await {
                    Ok(status) => log::info!(
                        "Sent to {}, received [{}] in {:?}",
                        request.url,
                        status,
                        request.issued_at.elapsed()
                    ),
                    Err(err) => log::warn!("request to {} failed: {}", request.url, err),
                }
            });
            report.dispatched += 1;
        }

        if let Err(err) = recycler.await {
            log::error!("connection recycler stopped abnormally: {err}");
        }
        log::info!(
            "traffic generator stopped after {} ticks ({} sent, {} skipped)",
            report.ticks,
            report.dispatched,
            report.skipped
        );
        report
    }
}

async fn recycle_idle_connections<T: Transport>(
    transport: Arc<T>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => transport.close_idle_connections(),
        }
    }
}

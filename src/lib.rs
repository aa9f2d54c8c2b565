//! Synthetic peer-to-peer traffic for exercising cluster networking.
//!
//! One process serves its identity on `GET /` and sends round-robin GETs to its
//! peers, optionally exiting after a jittered lifetime to simulate churn.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod error;
pub mod housekeeping;
pub mod lifetime;
pub mod logging;
pub mod server;
pub mod settings;
pub mod traffic;

use crate::error::AppError;
use crate::server::{EchoState, Server};
use crate::settings::Settings;
use crate::traffic::{Generator, HttpTransport};

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// No backend endpoints were configured; nothing was started.
    NoBackends,
    LifetimeExpired,
    Interrupted,
}

/// Runs the generator, lifetime controller, housekeeping and echo server until
/// one of them ends the process.
pub async fn run(settings: Settings) -> Result<Exit, AppError> {
    if settings.backend_endpoints.is_empty() {
        log::info!("No backend endpoint set. Quit.");
        return Ok(Exit::NoBackends);
    }

    let settings = Arc::new(settings);
    let lifespan = lifetime::lifespan(settings.lifetime.as_deref());
    let transport = Arc::new(HttpTransport::new()?);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.listen_port));
    let server = Server::bind(addr, EchoState::from(settings.as_ref())).await?;

    let cancel = CancellationToken::new();
    let generator = tokio::spawn(
        Generator::new(Arc::clone(&settings), transport).run(cancel.child_token()),
    );
    let housekeeping = tokio::spawn(housekeeping::run(
        housekeeping::RECLAIM_PERIOD,
        cancel.child_token(),
    ));
    let expiry = async {
        match lifespan {
            Some(lifespan) => lifetime::expire(lifespan, cancel.child_token()).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        res = server.run(cancel.child_token()) => match res {
            // the server only stops on its own when it fails
            Ok(()) => Ok(Exit::Interrupted),
            Err(err) => Err(AppError::Server(err)),
        },
        true = expiry => Ok(Exit::LifetimeExpired),
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                log::info!("interrupted, shutting down");
                Ok(Exit::Interrupted)
            }
            Err(err) => Err(AppError::Signal(err)),
        }
    };

    cancel.cancel();
    generator.await?;
    housekeeping.await?;
    outcome
}

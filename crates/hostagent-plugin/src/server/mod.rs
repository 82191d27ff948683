//! gRPC server for the plugin.
//!
//! Serves the lifecycle service over TCP or a Unix socket, as chosen by the
//! plugin manager.

mod config;
mod plugin_svc;

pub use config::{Listen, ServerConfig};
pub use plugin_svc::{PluginServiceImpl, start_options, status_response};

use std::future::Future;

use thiserror::Error;
use tonic::transport::Server;
use tracing::info;

use hostagent_proto::guest_agent_plugin_server::GuestAgentPluginServer;

use crate::service::LifecycleService;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// gRPC server handle.
pub struct PluginServer {
    config: ServerConfig,
    service: LifecycleService,
}

impl PluginServer {
    pub const fn new(config: ServerConfig, service: LifecycleService) -> Self {
        Self { config, service }
    }

    /// Get the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn builder(&self) -> Server {
        Server::builder()
            .http2_keepalive_interval(Some(self.config.keepalive_interval))
            .http2_keepalive_timeout(Some(self.config.keepalive_timeout))
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let svc = GuestAgentPluginServer::new(PluginServiceImpl::new(self.service.clone()));
        match &self.config.listen {
            config::Listen::Tcp(addr) => {
                info!(%addr, "Starting gRPC server on TCP");
                self.builder()
                    .add_service(svc)
                    .serve_with_shutdown(*addr, shutdown)
                    .await?;
            }
            #[cfg(unix)]
            config::Listen::Unix(path) => {
                use tokio::net::UnixListener;
                use tokio_stream::wrappers::UnixListenerStream;

                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let stream = UnixListenerStream::new(UnixListener::bind(path)?);

                info!(path = %path.display(), "Starting gRPC server on Unix socket");
                self.builder()
                    .add_service(svc)
                    .serve_with_incoming_shutdown(stream, shutdown)
                    .await?;
            }
        }
        Ok(())
    }

    /// Serve until the process is killed.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }
}

//! `GuestAgentPlugin` gRPC service implementation.

use std::path::PathBuf;

use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use hostagent_proto::guest_agent_plugin_server::GuestAgentPlugin;
use hostagent_proto::start_request::ServiceConfig;
use hostagent_proto::{
    ApplyRequest, ApplyResponse, GetStatusRequest, StartRequest, StartResponse,
    Status as PluginStatus, StopRequest, StopResponse,
};

use crate::lifecycle::{RUNNING_MESSAGE, StatusReport};
use crate::preflight::CustomConfig;
use crate::service::{LifecycleService, StartOptions};

/// Lifecycle RPCs backed by a [`LifecycleService`].
#[derive(Clone)]
pub struct PluginServiceImpl {
    service: LifecycleService,
}

impl PluginServiceImpl {
    pub const fn new(service: LifecycleService) -> Self {
        Self { service }
    }
}

/// Translate a Start request into domain options.
pub fn start_options(request: StartRequest) -> StartOptions {
    let state_dir = request
        .config
        .map(|c| c.state_directory_path)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    let custom_config = request.service_config.map(|c| match c {
        ServiceConfig::StringConfig(text) => CustomConfig::Text(text),
        ServiceConfig::StructConfig(s) => CustomConfig::Structured(s),
    });
    StartOptions {
        state_dir,
        custom_config,
    }
}

/// Wire form of a status report.
pub fn status_response(report: StatusReport) -> Result<PluginStatus, Status> {
    match report {
        StatusReport::Healthy => Ok(PluginStatus {
            code: 0,
            results: vec![RUNNING_MESSAGE.to_string()],
        }),
        StatusReport::NotRunning(message) => Ok(PluginStatus {
            code: 1,
            results: vec![message],
        }),
        StatusReport::Fatal(err) => Err(Status::internal(err.message)),
    }
}

#[tonic::async_trait]
impl GuestAgentPlugin for PluginServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "Start"))]
    async fn start(
        &self,
        request: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let options = start_options(request.into_inner());
        info!(
            state_dir = ?options.state_dir,
            custom_config = options.custom_config.is_some(),
            "Received a Start request"
        );
        self.service.start(options).await?;
        Ok(Response::new(StartResponse {}))
    }

    #[instrument(skip(self, request), fields(rpc = "Stop"))]
    async fn stop(&self, request: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        let req = request.into_inner();
        let deadline = req
            .deadline
            .and_then(|d| std::time::Duration::try_from(d).ok());
        info!(cleanup = req.cleanup, ?deadline, "Received a Stop request");
        self.service.stop(req.cleanup).await?;
        Ok(Response::new(StopResponse {}))
    }

    #[instrument(skip(self, request), fields(rpc = "GetStatus"))]
    async fn get_status(
        &self,
        request: Request<GetStatusRequest>,
    ) -> Result<Response<PluginStatus>, Status> {
        let query = request.into_inner().data;
        let report = self.service.status().await;
        info!(query, code = ?report.code(), "Received a GetStatus request");
        status_response(report).map(Response::new)
    }

    #[instrument(skip(self, request), fields(rpc = "Apply"))]
    async fn apply(
        &self,
        request: Request<ApplyRequest>,
    ) -> Result<Response<ApplyResponse>, Status> {
        let data = request.into_inner().data;
        self.service.apply(data.as_ref().map(|any| any.type_url.as_str()));
        Ok(Response::new(ApplyResponse {}))
    }
}

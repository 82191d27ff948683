//! gRPC round trips against a served plugin.
//!
//! A real tonic client talks to [`PluginServer`] over loopback TCP while the
//! subagents are shell scripts from a temporary install tree.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::panic)] // Tests use unwrap for brevity

mod common;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

use common::{Fixture, LONG_RUNNING, eventually};
use hostagent_plugin::lifecycle::{NOT_RUNNING_MESSAGE, RUNNING_MESSAGE};
use hostagent_plugin::server::{PluginServer, ServerConfig};
use hostagent_proto::guest_agent_plugin_client::GuestAgentPluginClient;
use hostagent_proto::prost_types::{self, value::Kind};
use hostagent_proto::start_request::{self, ServiceConfig};
use hostagent_proto::{ApplyRequest, GetStatusRequest, StartRequest, StopRequest};

struct Served {
    client: GuestAgentPluginClient<Channel>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Served {
    async fn close(self) {
        let Self {
            client,
            shutdown,
            task,
        } = self;
        drop(client);
        let _ = shutdown.send(());
        task.await.unwrap();
    }
}

fn free_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn serve(fixture: &Fixture) -> Served {
    let addr = free_port();
    let server = PluginServer::new(ServerConfig::tcp(addr), fixture.service());
    let (shutdown, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .serve_with_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    let url = format!("http://{addr}");
    for _ in 0..100 {
        if let Ok(client) = GuestAgentPluginClient::connect(url.clone()).await {
            return Served {
                client,
                shutdown,
                task,
            };
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {addr} never accepted connections");
}

fn start_request(fixture: &Fixture, service_config: Option<ServiceConfig>) -> StartRequest {
    StartRequest {
        config: Some(start_request::Config {
            state_directory_path: fixture.layout.state_dir().display().to_string(),
        }),
        service_config,
    }
}

fn bool_struct(section: &str, key: &str, value: bool) -> prost_types::Struct {
    let inner = prost_types::Struct {
        fields: BTreeMap::from([(
            key.to_string(),
            prost_types::Value {
                kind: Some(Kind::BoolValue(value)),
            },
        )]),
    };
    prost_types::Struct {
        fields: BTreeMap::from([(
            section.to_string(),
            prost_types::Value {
                kind: Some(Kind::StructValue(inner)),
            },
        )]),
    }
}

#[tokio::test]
async fn start_status_stop_over_grpc() {
    let fixture = Fixture::new(LONG_RUNNING, 0);
    let mut served = serve(&fixture).await;

    let status = served
        .client
        .get_status(GetStatusRequest::default())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.code, 1);
    assert_eq!(status.results, [NOT_RUNNING_MESSAGE]);

    let config = ServiceConfig::StructConfig(bool_struct("metrics", "enabled", true));
    served
        .client
        .start(start_request(&fixture, Some(config)))
        .await
        .unwrap();

    let status = served
        .client
        .get_status(GetStatusRequest {
            data: "health".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.code, 0);
    assert_eq!(status.results, [RUNNING_MESSAGE]);

    let written = std::fs::read_to_string(fixture.layout.user_config()).unwrap();
    assert!(written.contains("metrics:"), "{written}");
    assert!(written.contains("enabled: true"), "{written}");

    served
        .client
        .stop(StopRequest {
            cleanup: true,
            deadline: Some(prost_types::Duration {
                seconds: 5,
                nanos: 0,
            }),
        })
        .await
        .unwrap();

    let status = served
        .client
        .get_status(GetStatusRequest::default())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.code, 1);

    served.close().await;
}

#[tokio::test]
async fn rejected_config_maps_to_failed_precondition() {
    let fixture = Fixture::new(LONG_RUNNING, 1);
    let mut served = serve(&fixture).await;

    let err = served
        .client
        .start(start_request(&fixture, None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::FailedPrecondition);

    let status = served
        .client
        .get_status(GetStatusRequest::default())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.code, 1);
    assert!(status.results[0].contains("Start() failed"), "{:?}", status.results);

    served.close().await;
}

#[tokio::test]
async fn exhausted_subagent_reports_internal_error() {
    let fixture = Fixture::new(LONG_RUNNING, 0);
    fixture.subagent("wrapper", &fixture.layout.wrapper_binary(), "exit 2");
    let mut served = serve(&fixture).await;

    served
        .client
        .start(start_request(&fixture, None))
        .await
        .unwrap();

    let client = served.client.clone();
    let failed = eventually(Duration::from_secs(5), move || {
        let mut client = client.clone();
        async move {
            client
                .get_status(GetStatusRequest::default())
                .await
                .is_err_and(|status| status.code() == tonic::Code::Internal)
        }
    })
    .await;
    assert!(failed, "status never reported the exhausted retries");

    served.close().await;
}

#[tokio::test]
async fn apply_is_accepted_in_any_state() {
    let fixture = Fixture::new(LONG_RUNNING, 0);
    let mut served = serve(&fixture).await;

    served
        .client
        .apply(ApplyRequest {
            data: Some(prost_types::Any {
                type_url: "type.googleapis.com/google.protobuf.Empty".into(),
                value: Vec::new(),
            }),
        })
        .await
        .unwrap();
    served
        .client
        .apply(ApplyRequest::default())
        .await
        .unwrap();

    served.close().await;
}

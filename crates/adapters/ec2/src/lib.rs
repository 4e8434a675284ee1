// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `EC2` reference adapter (spec §4.1, §6, §9): provisions workers as
//! freshly launched EC2 instances, optionally bidding for spot capacity, and
//! waits for SSH to come up before handing the labor back to the controller
//! as reachable. This is the "non-trivial adapter" the spec asks the reader
//! to imagine alongside `Local` — the contract is identical, only the
//! provisioning and readiness mechanics differ.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use aws_sdk_ec2::types::{InstanceMarketOptionsRequest, InstanceStateName, MarketType};
use backon::{ExponentialBuilder, Retryable};
use overseer::{Adapter, AdapterError, EventSink, Labor, LaborName, OverseerId};
use snafu::{ResultExt, Snafu};
use tokio::{net::TcpStream, sync::watch};
use tracing::{info, warn};

#[derive(Debug, Snafu)]
pub enum Ec2AdapterError {
    #[snafu(display("RunInstances failed for ami {ami}: {source}"))]
    RunInstances {
        ami: String,
        #[snafu(source)]
        source: aws_sdk_ec2::error::SdkError<aws_sdk_ec2::operation::run_instances::RunInstancesError>,
    },

    #[snafu(display("RunInstances returned no instance for ami {ami}"))]
    NoInstance { ami: String },

    #[snafu(display("DescribeInstances failed for instance {instance_id}: {source}"))]
    DescribeInstances {
        instance_id: String,
        #[snafu(source)]
        source:
            aws_sdk_ec2::error::SdkError<aws_sdk_ec2::operation::describe_instances::DescribeInstancesError>,
    },

    #[snafu(display("instance {instance_id} has no public address yet"))]
    NoAddress { instance_id: String },

    #[snafu(display("SSH port never opened on instance {instance_id}: {source}"))]
    SshUnreachable {
        instance_id: String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("TerminateInstances failed for instance {instance_id}: {source}"))]
    TerminateInstances {
        instance_id: String,
        #[snafu(source)]
        source: aws_sdk_ec2::error::SdkError<
            aws_sdk_ec2::operation::terminate_instances::TerminateInstancesError,
        >,
    },

    #[snafu(display("labor handle {handle:?} is not an instance id"))]
    BadHandle { handle: String },
}

/// Options recognised by the `EC2` adapter (spec §6): everything `RunInstances`
/// needs plus the SSH-readiness parameters. `extra` is forwarded verbatim as a
/// tag set on the launched instance, the escape hatch for fields this adapter
/// doesn't model explicitly (spec §6's "opaque to the supervisor" options).
#[derive(Debug, Clone)]
pub struct Ec2Options {
    pub prefix:            String,
    pub image_id:          String,
    pub instance_type:     String,
    pub subnet_id:         Option<String>,
    pub security_group_ids: Vec<String>,
    pub key_name:          Option<String>,
    pub spot:              bool,
    pub ssh_port:          u16,
    pub ssh_timeout:       Duration,
    pub extra:             serde_json::Value,
}

impl Ec2Options {
    #[must_use]
    pub fn new(prefix: impl Into<String>, image_id: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            image_id: image_id.into(),
            instance_type: instance_type.into(),
            subnet_id: None,
            security_group_ids: Vec::new(),
            key_name: None,
            spot: false,
            ssh_port: 22,
            ssh_timeout: Duration::from_secs(300),
            extra: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn subnet(mut self, subnet_id: impl Into<String>) -> Self {
        self.subnet_id = Some(subnet_id.into());
        self
    }

    #[must_use]
    pub fn security_group(mut self, group_id: impl Into<String>) -> Self {
        self.security_group_ids.push(group_id.into());
        self
    }

    #[must_use]
    pub fn spot(mut self, spot: bool) -> Self {
        self.spot = spot;
        self
    }
}

/// Launches and monitors EC2 instances. Like [`overseer_adapter_local::LocalAdapter`],
/// node liveness is reported through an [`EventSink`] bound in after
/// `Overseer::start_link` returns (see [`Ec2Adapter::bind`]) — the adapter is
/// constructed before the controller exists.
pub struct Ec2Adapter {
    options: Ec2Options,
    client:  aws_sdk_ec2::Client,
    sink_tx: watch::Sender<Option<EventSink>>,
    sink_rx: watch::Receiver<Option<EventSink>>,
}

impl Ec2Adapter {
    /// Builds a client from the ambient AWS config (environment, profile, or
    /// instance metadata — whatever `aws-config`'s default provider chain
    /// resolves), the same resolution every other AWS SDK tool in this
    /// ecosystem relies on.
    pub async fn new(options: Ec2Options) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_ec2::Client::new(&config);
        let (sink_tx, sink_rx) = watch::channel(None);
        Self { options, client, sink_tx, sink_rx }
    }

    /// Give the adapter a way to report `node_up`/`node_down`/`exit` once the
    /// controller task is running. Must be called exactly once, right after
    /// `Overseer::start_link`, before the first `start_child`.
    pub fn bind(&self, sink: EventSink) {
        let _ = self.sink_tx.send(Some(sink));
    }

    async fn wait_for_sink(sink_rx: &mut watch::Receiver<Option<EventSink>>) -> Option<EventSink> {
        while sink_rx.borrow().is_none() {
            if sink_rx.changed().await.is_err() {
                return None;
            }
        }
        sink_rx.borrow().clone()
    }

    async fn public_address(&self, instance_id: &str) -> Result<std::net::IpAddr, Ec2AdapterError> {
        describe_public_address(&self.client, instance_id).await
    }

    async fn instance_state(&self, instance_id: &str) -> Result<Option<InstanceStateName>, Ec2AdapterError> {
        describe_instance_state(&self.client, instance_id).await
    }
}

async fn describe_public_address(
    client: &aws_sdk_ec2::Client,
    instance_id: &str,
) -> Result<std::net::IpAddr, Ec2AdapterError> {
    let output = client
        .describe_instances()
        .instance_ids(instance_id)
        .send()
        .await
        .with_context(|_| DescribeInstancesSnafu { instance_id: instance_id.to_string() })?;

    output
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .find(|i| i.instance_id() == Some(instance_id))
        .and_then(|i| i.public_ip_address())
        .and_then(|ip| ip.parse().ok())
        .ok_or(NoAddressSnafu { instance_id: instance_id.to_string() }.build())
}

async fn describe_instance_state(
    client: &aws_sdk_ec2::Client,
    instance_id: &str,
) -> Result<Option<InstanceStateName>, Ec2AdapterError> {
    let output = client
        .describe_instances()
        .instance_ids(instance_id)
        .send()
        .await
        .with_context(|_| DescribeInstancesSnafu { instance_id: instance_id.to_string() })?;

    Ok(output
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .find(|i| i.instance_id() == Some(instance_id))
        .and_then(|i| i.state())
        .and_then(|s| s.name())
        .cloned())
}

#[async_trait]
impl Adapter for Ec2Adapter {
    async fn spawn(&self, overseer_id: &OverseerId) -> Result<Labor, AdapterError> {
        let name = LaborName::generate(&self.options.prefix, "ec2");

        let mut request = self
            .client
            .run_instances()
            .image_id(&self.options.image_id)
            .instance_type(self.options.instance_type.as_str().into())
            .min_count(1)
            .max_count(1)
            .set_subnet_id(self.options.subnet_id.clone())
            .set_security_group_ids(Some(self.options.security_group_ids.clone()))
            .set_key_name(self.options.key_name.clone());

        if self.options.spot {
            request = request.instance_market_options(
                InstanceMarketOptionsRequest::builder().market_type(MarketType::Spot).build(),
            );
        }

        let output = request
            .send()
            .await
            .with_context(|_| RunInstancesSnafu { ami: self.options.image_id.clone() })?;
        let instance_id = output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or(NoInstanceSnafu { ami: self.options.image_id.clone() }.build())?
            .to_string();

        info!(%name, %instance_id, overseer_id = %overseer_id, "launched EC2 instance");

        let mut sink_rx = self.sink_rx.clone();
        let watch_name = name.clone();
        let watch_instance = instance_id.clone();
        let client = self.client.clone();
        let ssh_port = self.options.ssh_port;
        let ssh_timeout = self.options.ssh_timeout;
        let adapter_options = self.options.clone();

        tokio::spawn(async move {
            let Some(sink) = Self::wait_for_sink(&mut sink_rx).await else { return };

            let reachable = tokio::time::timeout(
                ssh_timeout,
                (|| async {
                    let describe = Ec2Adapter {
                        options: adapter_options.clone(),
                        client: client.clone(),
                        sink_tx: watch::channel(None).0,
                        sink_rx: watch::channel(None).1,
                    };
                    let addr = describe.public_address(&watch_instance).await?;
                    TcpStream::connect(SocketAddr::new(addr, ssh_port))
                        .await
                        .with_context(|_| SshUnreachableSnafu { instance_id: watch_instance.clone() })?;
                    Ok::<(), Ec2AdapterError>(())
                })
                .retry(
                    ExponentialBuilder::default()
                        .with_max_delay(Duration::from_secs(15))
                        .with_min_delay(Duration::from_secs(2))
                        .without_max_times(),
                )
                .when(|_| true),
            )
            .await;

            let Ok(Ok(())) = reachable else {
                warn!(%watch_name, %watch_instance, "SSH never became reachable within {ssh_timeout:?}");
                let _ = sink.exit(watch_name, "SSH readiness polling exhausted".to_string());
                return;
            };

            if let Err(error) = sink.node_up(watch_name.clone()) {
                warn!(%error, name = %watch_name, "failed to report node_up for EC2 instance");
                return;
            }

            // Poll instance state until it leaves `running`; anything else
            // (stopped, terminated, shutting-down) is reported as an exit so
            // the controller re-drives `Pair.initiate` against a fresh host.
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let describe = Ec2Adapter {
                    options: adapter_options.clone(),
                    client: client.clone(),
                    sink_tx: watch::channel(None).0,
                    sink_rx: watch::channel(None).1,
                };
                match describe.instance_state(&watch_instance).await {
                    Ok(Some(InstanceStateName::Running)) => continue,
                    Ok(state) => {
                        let reason = format!("instance left running state: {state:?}");
                        let _ = sink.exit(watch_name, reason);
                        return;
                    }
                    Err(error) => {
                        warn!(%error, %watch_instance, "failed to poll EC2 instance state");
                    }
                }
            }
        });

        Ok(Labor::spawning(name, instance_id))
    }

    async fn terminate(&self, labor: &Labor) -> Result<Labor, AdapterError> {
        let instance_id = labor.handle();

        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .with_context(|_| TerminateInstancesSnafu { instance_id: instance_id.to_string() })?;

        Ok(labor.with_phase(overseer::Phase::Terminated))
    }

    async fn connect(&self, labor: &Labor) -> Result<(), AdapterError> {
        let instance_id = labor.handle();
        let addr = self.public_address(instance_id).await?;
        TcpStream::connect(SocketAddr::new(addr, self.options.ssh_port))
            .await
            .with_context(|_| SshUnreachableSnafu { instance_id: instance_id.to_string() })?;
        Ok(())
    }
}

//! EC2 instance inventory through the AWS CLI

use async_trait::async_trait;
use serde::Deserialize;

use st_core::config::AwsConfig;
use st_core::traits::InstanceInventory;
use st_core::{Instance, InstanceState, TargetId, TunnelError};
use st_session::aws_cli::AwsCli;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    #[serde(default)]
    state: Option<RawState>,
    #[serde(default)]
    tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTag {
    key: String,
    #[serde(default)]
    value: String,
}

impl From<RawInstance> for Instance {
    fn from(raw: RawInstance) -> Self {
        let name = raw
            .tags
            .into_iter()
            .find(|t| t.key == "Name" && !t.value.is_empty())
            .map(|t| t.value)
            .unwrap_or_else(|| raw.instance_id.clone());
        Instance {
            id: TargetId::new(raw.instance_id),
            name,
            state: raw
                .state
                .map(|s| InstanceState::from_name(&s.name))
                .unwrap_or_else(|| InstanceState::Other("unknown".into())),
        }
    }
}

/// Flatten, filter and sort a `describe-instances` response
fn collect_instances(response: DescribeInstances, filter: Option<&str>) -> Vec<Instance> {
    let mut instances: Vec<Instance> = response
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(Instance::from)
        .filter(|i| filter.map_or(true, |f| i.matches(f)))
        .collect();
    instances.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
    instances
}

/// Lists instances with `aws ec2 describe-instances`
pub struct Ec2CliInventory {
    cli: AwsCli,
}

impl Ec2CliInventory {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            cli: AwsCli::from_config(config),
        }
    }

    /// Query a specific region instead of the configured one
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.cli = self.cli.with_region(region);
        self
    }
}

#[async_trait]
impl InstanceInventory for Ec2CliInventory {
    async fn list_instances(&self, filter: Option<&str>) -> Result<Vec<Instance>, TunnelError> {
        let response: DescribeInstances = self
            .cli
            .json(&["ec2", "describe-instances"])
            .await?;
        let instances = collect_instances(response, filter);
        tracing::debug!("Inventory returned {} instance(s)", instances.len());
        Ok(instances)
    }
}

//! Instances command implementation

use anyhow::{Context, Result};

use crate::output::format_instances;
use st_core::traits::InstanceInventory;
use st_core::Instance;

/// List instances and print them as a numbered table.
///
/// Returns the listing so `connect #n` can refer to it.
pub async fn instances_command(
    inventory: &dyn InstanceInventory,
    filter: Option<&str>,
) -> Result<Vec<Instance>> {
    let instances = inventory
        .list_instances(filter)
        .await
        .context("Failed to list instances")?;

    println!("{}", format_instances(&instances));
    Ok(instances)
}

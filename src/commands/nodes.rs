use anyhow::Result;
use colored::Colorize;
use executor::NodeRegistry;
use std::path::Path;

use crate::Context;
use crate::{config, ui};

pub fn run(_ctx: &Context, params: &Path) -> Result<()> {
    let params = config::load_params(params)?;
    let registry = NodeRegistry::build(&params.nodes)?;

    ui::header("Nodes");
    for node in registry.nodes() {
        println!(
            "  {:<16} {:<20} {}",
            node.ip.bold(),
            node.name,
            node.roles.join(", ").dimmed()
        );
    }

    ui::section("Roles");
    for role in registry.roles() {
        let ips: Vec<&str> = registry
            .nodes_with_role(role)
            .into_iter()
            .map(|n| n.ip.as_str())
            .collect();
        ui::kv(role, &ips.join(", "));
    }
    Ok(())
}

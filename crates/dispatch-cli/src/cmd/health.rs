//! `dispatch health`: probe the gateway.


use clap::Args;
use dispatch_core::gateway::Health;

use super::{Context, gateway_failure};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};

/// Arguments for `dispatch health`.
#[derive(Args, Debug, Default)]
pub struct HealthArgs {}

/// Execute `dispatch health`.
///
/// # Errors
///
/// Returns an error if the gateway is unreachable or unhealthy.
pub fn run_health(_args: &HealthArgs, ctx: &Context) -> anyhow::Result<()> {
    let gateway = ctx.gateway();
    let health = gateway
        .health()
        .map_err(|err| gateway_failure(ctx.output, "health check failed", &err))?;

    let base_url = gateway.base_url().to_string();
    render_mode(
        ctx.output,
        &health,
        |h: &Health, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                h.status, h.service, h.version, h.connected_clients
            )
        },
        |h: &Health, w| {
            let marker = if h.status == "healthy" { "✓" } else { "⚠" };
            pretty_section(w, "Gateway Health")?;
            pretty_kv(w, "Endpoint", &base_url)?;
            pretty_kv(w, "Status", format!("{marker} {}", h.status))?;
            pretty_kv(w, "Service", format!("{} {}", h.service, h.version))?;
            pretty_kv(w, "Clients", h.connected_clients.to_string())?;
            pretty_rule(w)
        },
    )
}

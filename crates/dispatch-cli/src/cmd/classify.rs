//! `dispatch classify`: ask the backend to classify an issue.
//!
//! The backend answers immediately; the classification itself arrives later
//! on the realtime stream (see `dispatch watch`).

use clap::Args;
use dispatch_core::gateway::CommandGateway;
use dispatch_core::model::IssueId;
use tracing::info;

use super::{Context, gateway_failure};
use crate::output::render_success;

/// Arguments for `dispatch classify`.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Issue id to classify.
    pub id: IssueId,
}

/// Execute `dispatch classify <id>`.
///
/// # Errors
///
/// Returns an error if the backend rejects or never receives the request.
pub fn run_classify(args: &ClassifyArgs, ctx: &Context) -> anyhow::Result<()> {
    ctx.gateway()
        .trigger_classification(args.id)
        .map_err(|err| gateway_failure(ctx.output, "classification request failed", &err))?;

    info!(issue_id = args.id, "classification requested");
    render_success(
        ctx.output,
        &format!("classification requested for issue {}", args.id),
    )
}

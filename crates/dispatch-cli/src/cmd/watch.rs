//! `dispatch watch`: run a live session and print what changes.
//!
//! Loads the snapshot, connects to the realtime stream, and prints one line
//! per status change or applied classification until the link stops for
//! good (intentional close or retry ceiling reached).

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use dispatch_core::decode::DecodeFailure;
use dispatch_core::error::ErrorCode;
use dispatch_core::model::IssueId;
use dispatch_core::reconnect::{ConnectionStatus, RetryState, StopReason};
use dispatch_core::session::{CommandKind, Session, SessionHandle, SessionObserver};
use dispatch_core::store::{CommandError, Reconciler};
use dispatch_core::transport::WsTransport;
use serde_json::json;
use tracing::{info, warn};

use super::Context;
use super::issues::{IssuesArgs, issue_row};
use crate::output::{CliError, OutputMode, render_error};

/// Arguments for `dispatch watch`.
#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    #[command(flatten)]
    pub filters: IssuesArgs,

    /// Reconnection attempts before giving up (overrides config).
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Delay between reconnection attempts in milliseconds (overrides config).
    #[arg(long, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,
}

impl WatchArgs {
    /// Retry policy with any flag overrides applied.
    pub fn retry(&self, base: RetryState) -> RetryState {
        RetryState::new(
            self.max_attempts.unwrap_or(base.ceiling()),
            self.retry_delay_ms
                .map_or(base.base_delay(), Duration::from_millis),
        )
    }
}

/// Execute `dispatch watch`.
///
/// # Errors
///
/// Returns an error if the link gives up after exhausting its retries.
pub fn run_watch(args: &WatchArgs, ctx: &Context) -> anyhow::Result<()> {
    let mut config = ctx.config.session(args.filters.query());
    config.retry = args.retry(config.retry);
    info!(
        ws_url = %config.ws_url,
        max_attempts = config.retry.ceiling(),
        "starting watch"
    );

    let session = Session::new(
        config,
        WsTransport::new().with_connect_timeout(ctx.config.connect_timeout()),
        Arc::new(ctx.gateway()),
    );
    let mut printer = WatchPrinter::new(ctx.output, session.handle(), io::stdout());
    let summary = session.run(&mut printer);

    info!(
        channels = summary.channels_opened,
        decode_failures = summary.decode_failures,
        issues = summary.store.len(),
        "watch finished"
    );

    if summary.stopped == Some(StopReason::RetriesExhausted) {
        let message = format!(
            "realtime link gave up after {} connection attempts",
            summary.channels_opened
        );
        render_error(
            ctx.output,
            &CliError::with_code(message.clone(), ErrorCode::BackendUnreachable),
        )?;
        anyhow::bail!(message);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

/// Observer that writes one line per change and ends the session once the
/// link has stopped on its own.
pub struct WatchPrinter<W: Write> {
    output: OutputMode,
    handle: SessionHandle,
    out: W,
}

impl<W: Write> WatchPrinter<W> {
    pub const fn new(output: OutputMode, handle: SessionHandle, out: W) -> Self {
        Self {
            output,
            handle,
            out,
        }
    }

    fn emit(&mut self, json: &serde_json::Value, human: &str) {
        let written = if self.output.is_json() {
            serde_json::to_writer(&mut self.out, json)
                .map_err(io::Error::from)
                .and_then(|()| writeln!(self.out))
        } else {
            writeln!(self.out, "{human}")
        };
        if let Err(err) = written.and_then(|()| self.out.flush()) {
            // Nobody is reading any more (closed pipe); stop the session.
            warn!(error = %err, "watch output closed");
            self.handle.shutdown();
        }
    }

    fn pretty(&self) -> bool {
        self.output == OutputMode::Pretty
    }
}

impl<W: Write> SessionObserver for WatchPrinter<W> {
    fn on_status(&mut self, status: ConnectionStatus) {
        let human = if self.pretty() {
            let marker = match status {
                ConnectionStatus::Connected => "●",
                ConnectionStatus::Connecting => "◐",
                ConnectionStatus::Disconnected => "○",
            };
            format!("{marker} {status}")
        } else {
            format!("status\t{status}")
        };
        self.emit(&json!({ "event": "status", "status": status }), &human);
    }

    fn on_stopped(&mut self, reason: StopReason) {
        let human = if self.pretty() {
            format!("■ stopped ({reason})")
        } else {
            format!("stopped\t{reason}")
        };
        self.emit(
            &json!({ "event": "stopped", "reason": reason.as_str() }),
            &human,
        );
        self.handle.shutdown();
    }

    fn on_snapshot(&mut self, store: &Reconciler) {
        let stats = store.local_stats();
        let human = if self.pretty() {
            format!(
                "✓ loaded {} issues ({} classified)",
                stats.total_issues, stats.classified_issues
            )
        } else {
            format!("snapshot\t{}\t{}", stats.total_issues, stats.classified_issues)
        };
        self.emit(
            &json!({
                "event": "snapshot",
                "total_issues": stats.total_issues,
                "classified_issues": stats.classified_issues,
            }),
            &human,
        );
    }

    fn on_issue_updated(&mut self, store: &Reconciler, issue_id: IssueId) {
        let Some(issue) = store.get(issue_id) else {
            return;
        };
        let human = if self.pretty() {
            format!(
                "↻ #{} {} → {} / {}",
                issue.number,
                issue.title,
                issue.category.as_deref().unwrap_or("-"),
                issue.priority.as_deref().unwrap_or("-"),
            )
        } else {
            format!("update\t{}", issue_row(issue))
        };
        self.emit(&json!({ "event": "update", "issue": issue }), &human);
    }

    fn on_decode_failure(&mut self, _raw: &str, failure: &DecodeFailure) {
        let human = if self.pretty() {
            format!("⚠ dropped realtime message: {failure}")
        } else {
            format!("dropped\t{}\t{failure}", failure.code())
        };
        self.emit(
            &json!({
                "event": "dropped",
                "error_code": failure.code().code(),
                "message": failure.to_string(),
            }),
            &human,
        );
    }

    fn on_command_failed(&mut self, command: CommandKind, error: &CommandError) {
        let human = if self.pretty() {
            format!("⚠ {command} failed: {error}")
        } else {
            format!("failed\t{command}\t{}\t{error}", error.code())
        };
        self.emit(
            &json!({
                "event": "command_failed",
                "command": command.to_string(),
                "error_code": error.code().code(),
                "message": error.to_string(),
            }),
            &human,
        );
    }
}

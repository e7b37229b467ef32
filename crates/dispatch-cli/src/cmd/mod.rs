//! Subcommand handlers and the state they share.

pub mod classify;
pub mod correct;
pub mod health;
pub mod issues;
pub mod show;
pub mod stats;
pub mod watch;

use dispatch_core::config::DispatchConfig;
use dispatch_core::gateway::{GatewayError, HttpGateway};
use dispatch_core::store::CommandError;

use crate::output::{CliError, OutputMode, render_error};

/// Resolved configuration and output mode handed to every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: DispatchConfig,
    pub output: OutputMode,
}

impl Context {
    /// REST client rooted at the configured API URL.
    pub fn gateway(&self) -> HttpGateway {
        HttpGateway::new(&self.config.endpoints.api_url, self.config.http_timeout())
    }
}

/// Report a failed REST call on stderr and turn it into the command's error.
pub fn gateway_failure(output: OutputMode, what: &str, err: &GatewayError) -> anyhow::Error {
    let rendered = render_error(
        output,
        &CliError::with_code(format!("{what}: {err}"), err.code()),
    );
    if let Err(render_err) = rendered {
        return render_err;
    }
    anyhow::anyhow!("{what}: {err}")
}

/// Report a rejected consumer command on stderr.
pub fn command_failure(output: OutputMode, what: &str, err: &CommandError) -> anyhow::Error {
    let rendered = render_error(
        output,
        &CliError::with_code(format!("{what}: {err}"), err.code()),
    );
    if let Err(render_err) = rendered {
        return render_err;
    }
    anyhow::anyhow!("{what}: {err}")
}

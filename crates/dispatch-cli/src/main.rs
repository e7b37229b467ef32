#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use clap::Subcommand;
use dispatch_core::config::{DispatchConfig, load_config, load_config_from};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "dispatch: live issue-classification dashboard client",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides --json, FORMAT and the config file).
    #[arg(long, global = true, value_enum, value_name = "MODE")]
    format: Option<OutputMode>,

    /// REST API base URL (overrides DISPATCH_API_URL and config).
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    /// Realtime WebSocket URL (overrides DISPATCH_WS_URL and config).
    #[arg(long, global = true, value_name = "URL")]
    ws_url: Option<String>,

    /// Read configuration from this file instead of the user config.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Read",
        about = "List issues",
        long_about = "Fetch the issue snapshot with optional filters.",
        after_help = "EXAMPLES:\n    # List every issue\n    dispatch issues\n\n    # Only high-priority bugs in one repository\n    dispatch issues --repository acme/web --category bug --priority high\n\n    # Emit machine-readable output\n    dispatch issues --json"
    )]
    Issues(cmd::issues::IssuesArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one issue",
        long_about = "Show full details and classification for a single issue by id.",
        after_help = "EXAMPLES:\n    # Show an issue\n    dispatch show 42\n\n    # Emit machine-readable output\n    dispatch show 42 --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show classification stats",
        long_about = "Show classification counts from the gateway, or recount them from a snapshot.",
        after_help = "EXAMPLES:\n    # Gateway stats\n    dispatch stats\n\n    # Recount locally from the issue list\n    dispatch stats --local"
    )]
    Stats(cmd::stats::StatsArgs),

    #[command(
        next_help_heading = "Read",
        about = "Probe the gateway",
        long_about = "Call the gateway health endpoint and report its status.",
        after_help = "EXAMPLES:\n    # Check the configured gateway\n    dispatch health\n\n    # Check another deployment\n    dispatch health --api-url https://dispatch.example.com"
    )]
    Health(cmd::health::HealthArgs),

    #[command(
        next_help_heading = "Commands",
        about = "Request classification of an issue",
        long_about = "Ask the backend to classify an issue. The result arrives on the realtime stream.",
        after_help = "EXAMPLES:\n    # Classify issue 42\n    dispatch classify 42\n\n    # Watch for the result in another terminal\n    dispatch watch"
    )]
    Classify(cmd::classify::ClassifyArgs),

    #[command(
        next_help_heading = "Commands",
        about = "Correct an issue's classification",
        long_about = "Save a manual category, priority, or tag list for an issue.",
        after_help = "EXAMPLES:\n    # Recategorize\n    dispatch correct 42 --category bug --priority high\n\n    # Replace tags\n    dispatch correct 42 --tags \"ui, login\"\n\n    # Emit machine-readable output\n    dispatch correct 42 --priority low --json"
    )]
    Correct(cmd::correct::CorrectArgs),

    #[command(
        next_help_heading = "Realtime",
        about = "Follow live classification updates",
        long_about = "Load the snapshot, connect to the realtime stream, and print changes until the link stops.",
        after_help = "EXAMPLES:\n    # Follow updates\n    dispatch watch\n\n    # Give up after the first failed connection\n    dispatch watch --max-attempts 0\n\n    # JSON lines for scripting\n    dispatch watch --json"
    )]
    Watch(cmd::watch::WatchArgs),
}

impl Cli {
    /// Layer CLI flags over the loaded config.
    fn apply_overrides(&self, config: &mut DispatchConfig) {
        if let Some(url) = &self.api_url {
            config.endpoints.api_url.clone_from(url);
        }
        if let Some(url) = &self.ws_url {
            config.endpoints.ws_url.clone_from(url);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("DISPATCH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "dispatch=debug,info"
        } else {
            "dispatch=info,warn"
        })
    });

    let format = env::var("DISPATCH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// File (or `--config`), then env, then CLI flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env(|key| env::var(key).ok());
            config
        }
        None => load_config()?,
    };
    cli.apply_overrides(&mut config);
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    // Before the config loads, only the flags and FORMAT can pick the mode.
    let early_output = resolve_output_mode(cli.format, cli.json, None);
    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            let code = err
                .downcast_ref::<dispatch_core::config::ConfigError>()
                .map(dispatch_core::config::ConfigError::code);
            let message = format!("{err:#}");
            let cli_error = code.map_or_else(
                || CliError::new(message.clone()),
                |code| CliError::with_code(message.clone(), code),
            );
            render_error(early_output, &cli_error)?;
            return Err(err);
        }
    };

    let output = resolve_output_mode(cli.format, cli.json, config.output.as_deref());
    if let Err(err) = config.validate() {
        render_error(output, &CliError::with_code(err.to_string(), err.code()))?;
        return Err(err.into());
    }
    debug!(
        api_url = %config.endpoints.api_url,
        ws_url = %config.endpoints.ws_url,
        ?output,
        "configuration resolved"
    );

    let ctx = cmd::Context { config, output };
    match cli.command {
        Commands::Issues(ref args) => cmd::issues::run_issues(args, &ctx),
        Commands::Show(ref args) => cmd::show::run_show(args, &ctx),
        Commands::Stats(ref args) => cmd::stats::run_stats(args, &ctx),
        Commands::Health(ref args) => cmd::health::run_health(args, &ctx),
        Commands::Classify(ref args) => cmd::classify::run_classify(args, &ctx),
        Commands::Correct(ref args) => cmd::correct::run_correct(args, &ctx),
        Commands::Watch(ref args) => cmd::watch::run_watch(args, &ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_before_subcommand() {
        let cli = Cli::parse_from(["dispatch", "--json", "issues"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Issues(_)));
    }

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["dispatch", "stats", "--local", "--json"]);
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Stats(cmd::stats::StatsArgs { local: true })
        ));
    }

    #[test]
    fn format_flag_accepts_value_enum() {
        let cli = Cli::parse_from(["dispatch", "--format", "text", "health"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
        assert!(Cli::try_parse_from(["dispatch", "--format", "yaml", "health"]).is_err());
    }

    #[test]
    fn endpoint_flags_override_config() {
        let cli = Cli::parse_from([
            "dispatch",
            "issues",
            "--api-url",
            "http://10.0.0.5:8002",
            "--ws-url",
            "ws://10.0.0.5:8002/ws",
        ]);
        let mut config = DispatchConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.endpoints.api_url, "http://10.0.0.5:8002");
        assert_eq!(config.endpoints.ws_url, "ws://10.0.0.5:8002/ws");
    }

    #[test]
    fn issues_filters_parse() {
        let cli = Cli::parse_from([
            "dispatch", "issues", "-r", "acme/web", "--priority", "high", "-n", "10",
        ]);
        let Commands::Issues(args) = cli.command else {
            panic!("expected issues");
        };
        assert_eq!(args.repository.as_deref(), Some("acme/web"));
        assert_eq!(args.priority.as_deref(), Some("high"));
        assert_eq!(args.limit, Some(10));
        assert!(args.category.is_none());
    }

    #[test]
    fn show_requires_numeric_id() {
        assert!(Cli::try_parse_from(["dispatch", "show", "42"]).is_ok());
        assert!(Cli::try_parse_from(["dispatch", "show", "abc"]).is_err());
    }

    #[test]
    fn correct_requires_at_least_one_field() {
        assert!(Cli::try_parse_from(["dispatch", "correct", "42"]).is_err());
        let cli = Cli::parse_from(["dispatch", "correct", "42", "--tags", ""]);
        let Commands::Correct(args) = cli.command else {
            panic!("expected correct");
        };
        assert_eq!(args.tags.as_deref(), Some(""));
    }

    #[test]
    fn watch_retry_flags_parse() {
        let cli = Cli::parse_from([
            "dispatch",
            "watch",
            "--max-attempts",
            "0",
            "--retry-delay-ms",
            "100",
            "--repository",
            "acme/web",
        ]);
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.max_attempts, Some(0));
        assert_eq!(args.retry_delay_ms, Some(100));
        assert_eq!(args.filters.repository.as_deref(), Some("acme/web"));
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["dispatch", "issues"],
            vec!["dispatch", "show", "1"],
            vec!["dispatch", "stats"],
            vec!["dispatch", "health"],
            vec!["dispatch", "classify", "1"],
            vec!["dispatch", "correct", "1", "--category", "bug"],
            vec!["dispatch", "watch"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(
                result.is_ok(),
                "failed to parse {args:?}: {:?}",
                result.err()
            );
        }
    }
}

//! `dispatch stats`: classification counts, from the gateway or recounted locally.

use std::io::{self, Write};

use clap::Args;
use dispatch_core::gateway::{IssueQuery, SnapshotSource};
use dispatch_core::model::{Bucket, Stats};
use dispatch_core::store::Reconciler;

use super::{Context, gateway_failure};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};

/// Arguments for `dispatch stats`.
#[derive(Args, Debug, Default)]
pub struct StatsArgs {
    /// Recount from a fresh issue snapshot instead of asking the gateway.
    #[arg(long)]
    pub local: bool,
}

/// Execute `dispatch stats`.
///
/// # Errors
///
/// Returns an error if the gateway call fails or output rendering fails.
pub fn run_stats(args: &StatsArgs, ctx: &Context) -> anyhow::Result<()> {
    let gateway = ctx.gateway();
    let stats = if args.local {
        let issues = gateway
            .fetch_issues(&IssueQuery::default())
            .map_err(|err| gateway_failure(ctx.output, "failed to load issues", &err))?;
        let mut store = Reconciler::new();
        store.load_snapshot(issues);
        store.local_stats()
    } else {
        gateway
            .fetch_stats()
            .map_err(|err| gateway_failure(ctx.output, "failed to load stats", &err))?
    };

    render_mode(ctx.output, &stats, render_stats_text, render_stats_pretty)
}

fn render_stats_text(stats: &Stats, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "total\t{}", stats.total_issues)?;
    writeln!(w, "classified\t{}", stats.classified_issues)?;
    writeln!(w, "pending\t{}", stats.pending_issues)?;
    if let Some(clients) = stats.connected_clients {
        writeln!(w, "clients\t{clients}")?;
    }
    for bucket in &stats.categories {
        writeln!(w, "category:{}\t{}", bucket.name, bucket.count)?;
    }
    for bucket in &stats.priorities {
        writeln!(w, "priority:{}\t{}", bucket.name, bucket.count)?;
    }
    Ok(())
}

fn render_stats_pretty(stats: &Stats, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Classification Stats")?;
    pretty_kv(w, "Total", stats.total_issues.to_string())?;
    pretty_kv(
        w,
        "Classified",
        format!(
            "{} ({:.1}%)",
            stats.classified_issues,
            stats.percentage(stats.classified_issues)
        ),
    )?;
    pretty_kv(w, "Pending", stats.pending_issues.to_string())?;
    if let Some(clients) = stats.connected_clients {
        pretty_kv(w, "Clients", clients.to_string())?;
    }
    render_breakdown(w, stats, "Categories", &stats.categories)?;
    render_breakdown(w, stats, "Priorities", &stats.priorities)?;
    pretty_rule(w)
}

fn render_breakdown(
    w: &mut dyn Write,
    stats: &Stats,
    heading: &str,
    buckets: &[Bucket],
) -> io::Result<()> {
    if buckets.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    writeln!(w, "{heading}")?;
    for bucket in buckets {
        writeln!(
            w,
            "  {:<14} {:>5}  {:>5.1}%",
            bucket.name,
            bucket.count,
            stats.percentage(bucket.count)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stats {
        Stats {
            total_issues: 4,
            classified_issues: 3,
            pending_issues: 1,
            connected_clients: None,
            categories: vec![Bucket {
                name: "bug".into(),
                count: 3,
            }],
            priorities: Vec::new(),
        }
    }

    #[test]
    fn text_omits_unknown_client_count() {
        let mut buf = Vec::new();
        render_stats_text(&sample(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(!text.contains("clients"));
        assert!(text.contains("category:bug\t3"));
    }

    #[test]
    fn pretty_shows_percentages_and_skips_empty_breakdowns() {
        let mut buf = Vec::new();
        render_stats_pretty(&sample(), &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("3 (75.0%)"));
        assert!(text.contains("Categories"));
        assert!(!text.contains("Priorities"));
    }
}

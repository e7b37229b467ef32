//! `dispatch issues`: list cached issues from a fresh snapshot.

use std::io::{self, Write};

use clap::Args;
use dispatch_core::gateway::{IssueQuery, SnapshotSource};
use dispatch_core::model::Issue;
use dispatch_core::store::Reconciler;
use tracing::debug;

use super::{Context, gateway_failure};
use crate::output::{pretty_rule, pretty_section, render_mode};

/// Arguments for `dispatch issues`.
#[derive(Args, Debug, Default)]
pub struct IssuesArgs {
    /// Only issues from this repository (`owner/name`).
    #[arg(long, short = 'r')]
    pub repository: Option<String>,

    /// Only issues in this category.
    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Only issues with this priority.
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// Maximum number of issues to fetch.
    #[arg(long, short = 'n')]
    pub limit: Option<u32>,
}

impl IssuesArgs {
    pub fn query(&self) -> IssueQuery {
        IssueQuery {
            repository: self.repository.clone(),
            category: self.category.clone(),
            priority: self.priority.clone(),
            limit: self.limit,
        }
    }
}

/// Execute `dispatch issues`.
///
/// The snapshot goes through a [`Reconciler`] so duplicate ids collapse the
/// same way they do in a live session.
///
/// # Errors
///
/// Returns an error if the snapshot fetch fails or output rendering fails.
pub fn run_issues(args: &IssuesArgs, ctx: &Context) -> anyhow::Result<()> {
    let gateway = ctx.gateway();
    let issues = gateway
        .fetch_issues(&args.query())
        .map_err(|err| gateway_failure(ctx.output, "failed to load issues", &err))?;

    let mut store = Reconciler::new();
    let loaded = store.load_snapshot(issues);
    debug!(loaded, base_url = gateway.base_url(), "issue snapshot loaded");

    render_mode(
        ctx.output,
        &store.issues(),
        |issues, w| render_issues_text(issues, w),
        |issues, w| render_issues_pretty(issues, w),
    )
}

/// Tab-separated issue rows with a header line.
pub fn render_issues_text(issues: &[Issue], w: &mut dyn Write) -> io::Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    writeln!(w, "id\tnumber\tstatus\tcategory\tpriority\trepository\ttitle")?;
    for issue in issues {
        writeln!(w, "{}", issue_row(issue))?;
    }
    Ok(())
}

fn render_issues_pretty(issues: &[Issue], w: &mut dyn Write) -> io::Result<()> {
    if issues.is_empty() {
        writeln!(w, "No issues found.")?;
        return Ok(());
    }

    pretty_section(w, &format!("Issues ({})", issues.len()))?;
    for issue in issues {
        writeln!(
            w,
            "{:>5}  {:<10} {:<12} {:<8} {}",
            format!("#{}", issue.number),
            issue.status,
            issue.category.as_deref().unwrap_or("-"),
            issue.priority.as_deref().unwrap_or("-"),
            truncate(&issue.title, 40),
        )?;
    }
    pretty_rule(w)
}

/// One tab-separated line describing an issue.
pub fn issue_row(issue: &Issue) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        issue.id,
        issue.number,
        issue.status,
        issue.category.as_deref().unwrap_or("-"),
        issue.priority.as_deref().unwrap_or("-"),
        issue.repository,
        issue.title,
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_carries_every_filter() {
        let args = IssuesArgs {
            repository: Some("acme/web".into()),
            category: None,
            priority: Some("high".into()),
            limit: Some(20),
        };
        assert_eq!(
            args.query(),
            IssueQuery {
                repository: Some("acme/web".into()),
                category: None,
                priority: Some("high".into()),
                limit: Some(20),
            }
        );
    }

    #[test]
    fn text_rows_use_dash_for_missing_fields() {
        let issue = Issue::new(7, 12, "Crash on save", "acme/app");
        assert_eq!(
            issue_row(&issue),
            "7\t12\tpending\t-\t-\tacme/app\tCrash on save"
        );
    }

    #[test]
    fn empty_text_output_prints_nothing() {
        let mut buf = Vec::new();
        render_issues_text(&[], &mut buf).expect("render");
        assert!(buf.is_empty());
    }

    #[test]
    fn pretty_output_truncates_long_titles() {
        let title = "x".repeat(60);
        let mut buf = Vec::new();
        render_issues_pretty(&[Issue::new(1, 1, title, "acme/app")], &mut buf).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Issues (1)"));
        assert!(text.contains('…'));
        assert!(!text.contains(&"x".repeat(41)));
    }
}

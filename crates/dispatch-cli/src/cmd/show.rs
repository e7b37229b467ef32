//! `dispatch show`: display one issue with its classification.

use std::io::{self, Write};

use clap::Args;
use dispatch_core::model::{Issue, IssueId};

use super::{Context, gateway_failure};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};

/// Arguments for `dispatch show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Issue id (the backend's id, not the repository issue number).
    pub id: IssueId,
}

/// Execute `dispatch show <id>`.
///
/// # Errors
///
/// Returns an error if the issue cannot be fetched or output rendering fails.
pub fn run_show(args: &ShowArgs, ctx: &Context) -> anyhow::Result<()> {
    let issue = ctx
        .gateway()
        .fetch_issue(args.id)
        .map_err(|err| gateway_failure(ctx.output, &format!("failed to load issue {}", args.id), &err))?;

    render_mode(ctx.output, &issue, render_issue_text, render_issue_pretty)
}

fn render_issue_text(issue: &Issue, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "id\t{}", issue.id)?;
    writeln!(w, "number\t{}", issue.number)?;
    writeln!(w, "title\t{}", issue.title)?;
    writeln!(w, "repository\t{}", issue.repository)?;
    writeln!(w, "status\t{}", issue.status)?;
    writeln!(w, "category\t{}", issue.category.as_deref().unwrap_or("-"))?;
    writeln!(w, "priority\t{}", issue.priority.as_deref().unwrap_or("-"))?;
    writeln!(w, "confidence\t{}", confidence_label(issue.confidence))?;
    writeln!(w, "tags\t{}", issue.tags.join(","))?;
    writeln!(w, "updated_at\t{}", issue.updated_at)
}

fn render_issue_pretty(issue: &Issue, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("#{} {}", issue.number, issue.title))?;
    pretty_kv(w, "ID", issue.id.to_string())?;
    pretty_kv(w, "Repository", &issue.repository)?;
    pretty_kv(w, "Status", issue.status.to_string())?;
    pretty_kv(w, "Category", issue.category.as_deref().unwrap_or("-"))?;
    pretty_kv(w, "Priority", issue.priority.as_deref().unwrap_or("-"))?;
    pretty_kv(w, "Confidence", confidence_label(issue.confidence))?;
    if !issue.tags.is_empty() {
        pretty_kv(w, "Tags", issue.tags.join(", "))?;
    }
    pretty_kv(w, "Created", &issue.created_at)?;
    pretty_kv(w, "Updated", &issue.updated_at)?;
    pretty_rule(w)
}

/// Confidence as a whole percentage, or `-` when unclassified.
pub fn confidence_label(confidence: Option<f64>) -> String {
    confidence.map_or_else(|| "-".to_string(), |c| format!("{:.0}%", c * 100.0))
}

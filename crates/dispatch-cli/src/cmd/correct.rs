//! `dispatch correct`: save a manual classification for one issue.
//!
//! Runs the same draft/commit cycle as an interactive edit: the issue's
//! current classification seeds the draft, the given fields overwrite it,
//! and only the backend's answer is reported back.

use clap::{ArgGroup, Args};
use dispatch_core::model::IssueId;
use dispatch_core::store::{CommandError, EditField, Reconciler};

use super::{Context, command_failure, gateway_failure};
use crate::output::render_mode;

/// Arguments for `dispatch correct`.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("fields")
        .required(true)
        .multiple(true)
        .args(["category", "priority", "tags"])
))]
pub struct CorrectArgs {
    /// Issue id to correct.
    pub id: IssueId,

    /// New category (e.g. `bug`, `feature`).
    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// New priority (e.g. `critical`, `high`, `medium`, `low`).
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// Replacement tags, comma-separated. Pass "" to clear.
    #[arg(long, short = 't')]
    pub tags: Option<String>,
}

impl CorrectArgs {
    /// Form-field writes in the order the dashboard form applies them.
    pub fn fields(&self) -> Vec<EditField> {
        let mut fields = Vec::new();
        if let Some(category) = &self.category {
            fields.push(EditField::Category(category.clone()));
        }
        if let Some(priority) = &self.priority {
            fields.push(EditField::Priority(priority.clone()));
        }
        if let Some(tags) = &self.tags {
            fields.push(EditField::Tags(tags.clone()));
        }
        fields
    }
}

/// Execute `dispatch correct <id>`.
///
/// # Errors
///
/// Returns an error if the issue cannot be fetched, the draft is incomplete,
/// or the backend rejects the correction.
pub fn run_correct(args: &CorrectArgs, ctx: &Context) -> anyhow::Result<()> {
    let gateway = ctx.gateway();
    let issue = gateway
        .fetch_issue(args.id)
        .map_err(|err| gateway_failure(ctx.output, &format!("failed to load issue {}", args.id), &err))?;

    let mut store = Reconciler::new();
    store.load_snapshot(vec![issue]);
    let what = format!("failed to correct issue {}", args.id);

    store
        .begin_edit(args.id)
        .map_err(|err| command_failure(ctx.output, &what, &CommandError::Edit(err)))?;
    for field in args.fields() {
        store
            .update_edit(field)
            .map_err(|err| command_failure(ctx.output, &what, &CommandError::Edit(err)))?;
    }

    let saved = store
        .commit_edit(&gateway)
        .map_err(|err| command_failure(ctx.output, &what, &err))?;

    render_mode(
        ctx.output,
        saved,
        |issue, w| writeln!(w, "{}", super::issues::issue_row(issue)),
        |issue, w| {
            writeln!(
                w,
                "✓ issue #{} now {} / {}",
                issue.number,
                issue.category.as_deref().unwrap_or("-"),
                issue.priority.as_deref().unwrap_or("-"),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_follow_form_order() {
        let args = CorrectArgs {
            id: 3,
            category: Some("bug".into()),
            priority: None,
            tags: Some("ui, login".into()),
        };
        assert_eq!(
            args.fields(),
            vec![
                EditField::Category("bug".into()),
                EditField::Tags("ui, login".into()),
            ]
        );
    }
}

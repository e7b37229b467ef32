use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use super::edit::{CommandError, EditError, EditField, PendingEdit};
use crate::decode::DomainEvent;
use crate::gateway::{CommandGateway, Correction, GatewayError};
use crate::model::{Bucket, Classification, Issue, IssueId, Stats, priority_rank};

/// What happened to an inbound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The issue was found and overwritten.
    Updated,
    /// No issue with that id is cached; the update was dropped.
    Missing,
}

/// The in-memory issue collection plus the single pending edit slot.
///
/// Every mutation either applies completely or not at all, and leaves each
/// issue's `status` consistent with its classification fields.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    issues: Vec<Issue>,
    index: HashMap<IssueId, usize>,
    pending: Option<PendingEdit>,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached issues in snapshot order.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    #[must_use]
    pub fn get(&self, issue_id: IssueId) -> Option<&Issue> {
        self.index.get(&issue_id).map(|&pos| &self.issues[pos])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn get_mut(&mut self, issue_id: IssueId) -> Option<&mut Issue> {
        let pos = *self.index.get(&issue_id)?;
        self.issues.get_mut(pos)
    }

    // -----------------------------------------------------------------------
    // Server-driven updates
    // -----------------------------------------------------------------------

    /// Replace the whole collection with a fresh snapshot.
    ///
    /// Duplicate ids keep the position of their first occurrence and the
    /// value of their last. The pending edit is left alone.
    pub fn load_snapshot(&mut self, snapshot: Vec<Issue>) -> usize {
        let mut issues: Vec<Issue> = Vec::with_capacity(snapshot.len());
        let mut index: HashMap<IssueId, usize> = HashMap::with_capacity(snapshot.len());

        for mut issue in snapshot {
            issue.refresh_status();
            if let Some(&pos) = index.get(&issue.id) {
                issues[pos] = issue;
            } else {
                index.insert(issue.id, issues.len());
                issues.push(issue);
            }
        }

        self.issues = issues;
        self.index = index;
        info!(count = self.issues.len(), "loaded issue snapshot");
        self.issues.len()
    }

    /// Overwrite the classification of one issue.
    ///
    /// Last write wins by arrival order. A pending edit for the same issue
    /// keeps its draft text; a later commit submits the draft, not these
    /// values.
    pub fn apply_classification(
        &mut self,
        issue_id: IssueId,
        classification: &Classification,
    ) -> Applied {
        let Some(issue) = self.get_mut(issue_id) else {
            debug!(issue_id, "classification for unknown issue dropped");
            return Applied::Missing;
        };
        issue.apply_classification(classification);
        debug!(
            issue_id,
            category = %classification.category,
            priority = %classification.priority,
            "classification applied"
        );
        Applied::Updated
    }

    /// Apply a decoded realtime event.
    pub fn apply_event(&mut self, event: &DomainEvent) -> Applied {
        match event {
            DomainEvent::ClassificationUpdate {
                issue_id,
                classification,
            } => self.apply_classification(*issue_id, classification),
        }
    }

    // -----------------------------------------------------------------------
    // Pending edit
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn pending_edit(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn is_editing(&self, issue_id: IssueId) -> bool {
        self.pending.as_ref().is_some_and(|edit| edit.issue_id == issue_id)
    }

    /// Whether the consumer should offer "classify" for this issue.
    #[must_use]
    pub fn can_trigger_classification(&self, issue_id: IssueId) -> bool {
        self.get(issue_id)
            .is_some_and(|issue| !issue.has_classification() && !self.is_editing(issue_id))
    }

    /// Start editing an issue, discarding any other draft.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::IssueNotFound`] if the issue is not cached; the
    /// existing draft is kept in that case.
    pub fn begin_edit(&mut self, issue_id: IssueId) -> Result<&PendingEdit, EditError> {
        let issue = self.get(issue_id).ok_or(EditError::IssueNotFound(issue_id))?;
        let draft = PendingEdit::from_issue(issue);
        if let Some(previous) = self.pending.take() {
            debug!(
                discarded = previous.issue_id,
                issue_id, "pending edit replaced"
            );
        }
        let edit: &PendingEdit = self.pending.insert(draft);
        Ok(edit)
    }

    /// Write one form field into the draft.
    ///
    /// # Errors
    ///
    /// Returns [`EditError::NoPendingEdit`] if nothing is being edited.
    pub fn update_edit(&mut self, field: EditField) -> Result<&PendingEdit, EditError> {
        let edit = self.pending.as_mut().ok_or(EditError::NoPendingEdit)?;
        match field {
            EditField::Category(value) => edit.category = value,
            EditField::Priority(value) => edit.priority = value,
            EditField::Tags(value) => edit.tags_text = value,
        }
        Ok(&*edit)
    }

    /// Drop the draft without touching any issue.
    pub fn cancel_edit(&mut self) -> Option<PendingEdit> {
        self.pending.take()
    }

    /// First half of a commit: validate the draft and mark it submitting.
    ///
    /// # Errors
    ///
    /// Fails without side effects when there is no draft, the draft is
    /// already on the wire, its issue is no longer cached, or category or
    /// priority is blank.
    pub fn prepare_commit(&mut self) -> Result<Correction, EditError> {
        let Some(edit) = self.pending.as_ref() else {
            return Err(EditError::NoPendingEdit);
        };
        if edit.submitting {
            return Err(EditError::SubmitInFlight(edit.issue_id));
        }
        if !self.index.contains_key(&edit.issue_id) {
            return Err(EditError::IssueNotFound(edit.issue_id));
        }
        if let Some(field) = edit.missing_field() {
            return Err(EditError::Incomplete {
                issue_id: edit.issue_id,
                field,
            });
        }

        let correction = edit.to_correction();
        if let Some(edit) = self.pending.as_mut() {
            edit.submitting = true;
        }
        Ok(correction)
    }

    /// Second half of a commit: fold the backend's answer into the store.
    ///
    /// On success the returned issue replaces the cached one (its id is kept)
    /// and the draft is cleared if it still belongs to that issue. On failure
    /// the draft stays so the user can retry.
    ///
    /// # Errors
    ///
    /// Returns the [`GatewayError`] unchanged when the backend call failed.
    pub fn settle_commit(
        &mut self,
        issue_id: IssueId,
        result: Result<Issue, GatewayError>,
    ) -> Result<Option<&Issue>, GatewayError> {
        match result {
            Ok(updated) => {
                if self.is_editing(issue_id) {
                    self.pending = None;
                }
                let Some(issue) = self.get_mut(issue_id) else {
                    debug!(issue_id, "correction for issue no longer cached");
                    return Ok(None);
                };
                *issue = Issue {
                    id: issue_id,
                    ..updated
                };
                issue.refresh_status();
                info!(issue_id, "correction saved");
                Ok(self.get(issue_id))
            }
            Err(err) => {
                if let Some(edit) = self.pending.as_mut().filter(|e| e.issue_id == issue_id) {
                    edit.submitting = false;
                }
                Err(err)
            }
        }
    }

    /// Submit the draft through `gateway` and fold the answer back in.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Edit`] when the draft cannot be submitted and
    /// [`CommandError::Gateway`] when the backend call fails. In both cases
    /// the cached issue is untouched and the draft is kept.
    pub fn commit_edit<G>(&mut self, gateway: &G) -> Result<&Issue, CommandError>
    where
        G: CommandGateway + ?Sized,
    {
        let correction = self.prepare_commit()?;
        let issue_id = correction.issue_id;
        let result = gateway.submit_correction(&correction);
        self.settle_commit(issue_id, result)?
            .ok_or(CommandError::Edit(EditError::IssueNotFound(issue_id)))
    }

    // -----------------------------------------------------------------------
    // Derived views
    // -----------------------------------------------------------------------

    /// Counts over the cached collection, shaped like the gateway's stats.
    #[must_use]
    pub fn local_stats(&self) -> Stats {
        let mut categories: BTreeMap<&str, u64> = BTreeMap::new();
        let mut priorities: BTreeMap<&str, u64> = BTreeMap::new();
        let mut classified = 0_u64;

        for issue in &self.issues {
            if issue.has_classification() {
                classified += 1;
            }
            if let Some(category) = issue.category.as_deref().filter(|c| !c.is_empty()) {
                *categories.entry(category).or_default() += 1;
            }
            if let Some(priority) = issue.priority.as_deref().filter(|p| !p.is_empty()) {
                *priorities.entry(priority).or_default() += 1;
            }
        }

        let mut categories: Vec<Bucket> = categories
            .into_iter()
            .map(|(name, count)| Bucket {
                name: name.to_string(),
                count,
            })
            .collect();
        categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

        let mut priorities: Vec<Bucket> = priorities
            .into_iter()
            .map(|(name, count)| Bucket {
                name: name.to_string(),
                count,
            })
            .collect();
        priorities.sort_by_key(|bucket| priority_rank(&bucket.name));

        let total = self.issues.len() as u64;
        Stats {
            total_issues: total,
            classified_issues: classified,
            pending_issues: total - classified,
            connected_clients: None,
            categories,
            priorities,
        }
    }
}

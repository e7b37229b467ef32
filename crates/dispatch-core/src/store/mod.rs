//! Entity Store & Reconciler.
//!
//! Holds the cached issue collection and the single pending edit, and folds
//! every server-side change into them under one merge policy: last write
//! wins by arrival order, with no version checks. The backend is the source
//! of truth for ordering; the store never blocks a realtime update on a
//! network round-trip.
//!
//! # Pending edit
//!
//! At most one issue is being edited at a time. Starting an edit on another
//! issue silently discards the previous draft. Realtime updates for the
//! edited issue change the cached issue but never the draft, so committing
//! a draft can overwrite a classification that arrived after the edit began.

pub mod edit;
pub mod reconciler;

pub use edit::{CommandError, EditError, EditField, PendingEdit, parse_tags};
pub use reconciler::{Applied, Reconciler};

//! crates/survey_sync_core/src/sync.rs
//!
//! Translates a draft into store writes.
//!
//! Every save is a full replace: the stored document ends up holding exactly the
//! draft's fields, whatever another writer put there in the meantime. There is no
//! version check, so concurrent writers race and the last write to arrive wins.

use crate::context::SyncContext;
use crate::domain::{CollectionSnapshot, ProjectId, ProjectPayload, RowList, SubjectId};
use crate::draft::{DraftBinding, DraftState};
use crate::errors::{DeleteError, SaveError, ValidationError};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SyncController {
    context: Arc<SyncContext>,
    /// Id returned by the last create, until a snapshot shows it.
    pending_create: Option<ProjectId>,
}

impl SyncController {
    pub fn new(context: Arc<SyncContext>) -> Self {
        Self {
            context,
            pending_create: None,
        }
    }

    /// Writes the draft to the store and returns the id it is bound to.
    ///
    /// An unbound draft is created and then bound to the new id; a bound draft
    /// replaces its document. On any error the draft is left exactly as it was.
    pub async fn save(&mut self, draft: &mut DraftState) -> Result<ProjectId, SaveError> {
        if draft.title().trim().is_empty() {
            return Err(ValidationError::BlankTitle.into());
        }
        let author = self
            .context
            .identity()
            .current()
            .ok_or(SaveError::IdentityUnresolved)?;

        let payload = build_payload(draft, author);
        let store = self.context.store();
        let collection = self.context.collection();

        match draft.binding().clone() {
            DraftBinding::Bound(id) => {
                store.replace(collection, &id, &payload).await.map_err(|e| {
                    error!("Failed to replace project {}: {}", id, e);
                    SaveError::Store(e)
                })?;
                info!("Replaced project {}", id);
                Ok(id)
            }
            DraftBinding::Unbound => {
                let id = store.create(collection, &payload).await.map_err(|e| {
                    error!("Failed to create project: {}", e);
                    SaveError::Store(e)
                })?;
                info!("Created project {}", id);
                draft.bind(id.clone());
                self.pending_create = Some(id.clone());
                Ok(id)
            }
        }
    }

    /// Deletes the project at `id`. The caller must already have confirmed the
    /// deletion with the user.
    ///
    /// If the draft is bound to `id` it is reset, but only after the store call
    /// succeeded.
    pub async fn delete(&mut self, id: &ProjectId, draft: &mut DraftState) -> Result<(), DeleteError> {
        if self.context.identity().current().is_none() {
            return Err(DeleteError::IdentityUnresolved);
        }

        self.context
            .store()
            .delete(self.context.collection(), id)
            .await
            .map_err(|e| {
                error!("Failed to delete project {}: {}", id, e);
                DeleteError::Store(e)
            })?;
        info!("Deleted project {}", id);

        if draft.bound_id() == Some(id) {
            draft.reset();
        }
        if self.pending_create.as_ref() == Some(id) {
            self.pending_create = None;
        }
        Ok(())
    }

    /// Resets the draft when the project it is bound to has vanished from the feed.
    ///
    /// A project this controller just created is exempt until a snapshot has shown
    /// it once. Returns whether the draft was reset.
    pub fn reconcile(&mut self, snapshot: &CollectionSnapshot, draft: &mut DraftState) -> bool {
        let Some(bound) = draft.bound_id() else {
            return false;
        };

        if snapshot.contains(bound) {
            if self.pending_create.as_ref() == Some(bound) {
                self.pending_create = None;
            }
            return false;
        }
        if self.pending_create.as_ref() == Some(bound) {
            return false;
        }

        warn!("Project {} disappeared remotely; resetting the draft.", bound);
        draft.reset();
        true
    }
}

fn build_payload(draft: &DraftState, author: SubjectId) -> ProjectPayload {
    ProjectPayload {
        tema_central: draft.title().to_string(),
        acesso_rows: draft.rows(RowList::Acesso).to_vec(),
        qualidade_rows: draft.rows(RowList::Qualidade).to_vec(),
        author,
    }
}

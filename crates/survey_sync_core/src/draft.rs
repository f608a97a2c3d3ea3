//! crates/survey_sync_core/src/draft.rs
//!
//! The in-memory working copy of exactly one project.
//! Nothing in this module talks to a store.

use crate::domain::{Project, ProjectId, Row, RowField, RowId, RowList};
use chrono::Utc;

/// Blank rows restored per list by `DraftState::reset`.
pub const DEFAULT_SCAFFOLD_ROWS: usize = 1;

/// Whether a draft is tied to a stored project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftBinding {
    /// A new project that has never been created in the store.
    Unbound,
    Bound(ProjectId),
}

/// Hands out row ids from the wall clock in milliseconds, bumped past every id
/// issued or observed so far.
#[derive(Debug, Clone, Default)]
struct RowIdGenerator {
    last: RowId,
}

impl RowIdGenerator {
    fn next(&mut self) -> RowId {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }

    fn observe(&mut self, id: RowId) {
        self.last = self.last.max(id);
    }
}

#[derive(Debug, Clone)]
pub struct DraftState {
    binding: DraftBinding,
    tema_central: String,
    acesso_rows: Vec<Row>,
    qualidade_rows: Vec<Row>,
    scaffold_rows: usize,
    row_ids: RowIdGenerator,
}

impl Default for DraftState {
    fn default() -> Self {
        Self::new()
    }
}

impl DraftState {
    /// An unbound draft with one blank row per list.
    pub fn new() -> Self {
        Self::with_scaffold(DEFAULT_SCAFFOLD_ROWS)
    }

    /// An unbound draft whose resets restore `scaffold_rows` blank rows per list.
    pub fn with_scaffold(scaffold_rows: usize) -> Self {
        let mut draft = Self {
            binding: DraftBinding::Unbound,
            tema_central: String::new(),
            acesso_rows: Vec::new(),
            qualidade_rows: Vec::new(),
            scaffold_rows,
            row_ids: RowIdGenerator::default(),
        };
        draft.reset();
        draft
    }

    /// Drops every unsaved edit and starts a new, unbound project.
    pub fn reset(&mut self) {
        self.binding = DraftBinding::Unbound;
        self.tema_central.clear();
        for list in RowList::ALL {
            let rows: Vec<Row> = (0..self.scaffold_rows)
                .map(|_| Row::blank(self.row_ids.next()))
                .collect();
            *self.rows_mut(list) = rows;
        }
    }

    /// Replaces the draft with `project`, dropping every unsaved edit.
    pub fn load(&mut self, project: &Project) {
        self.binding = DraftBinding::Bound(project.id.clone());
        self.tema_central = project.tema_central.clone();
        self.acesso_rows = project.acesso_rows.clone();
        self.qualidade_rows = project.qualidade_rows.clone();
        for row in project.acesso_rows.iter().chain(&project.qualidade_rows) {
            self.row_ids.observe(row.id);
        }
    }

    pub fn set_title(&mut self, text: impl Into<String>) {
        self.tema_central = text.into();
    }

    /// Appends a blank row to `list` and returns its freshly assigned id.
    pub fn add_row(&mut self, list: RowList) -> RowId {
        let id = self.row_ids.next();
        self.rows_mut(list).push(Row::blank(id));
        id
    }

    /// Removes the row with `id` from `list`. Returns false when no such row exists.
    pub fn remove_row(&mut self, list: RowList, id: RowId) -> bool {
        let rows = self.rows_mut(list);
        let before = rows.len();
        rows.retain(|row| row.id != id);
        rows.len() != before
    }

    /// Sets one field of the row with `id`. Returns false when no such row exists.
    pub fn update_row(
        &mut self,
        list: RowList,
        id: RowId,
        field: RowField,
        value: impl Into<String>,
    ) -> bool {
        match self.rows_mut(list).iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.set(field, value.into());
                true
            }
            None => false,
        }
    }

    pub fn binding(&self) -> &DraftBinding {
        &self.binding
    }

    pub fn bound_id(&self) -> Option<&ProjectId> {
        match &self.binding {
            DraftBinding::Bound(id) => Some(id),
            DraftBinding::Unbound => None,
        }
    }

    pub fn title(&self) -> &str {
        &self.tema_central
    }

    pub fn rows(&self, list: RowList) -> &[Row] {
        match list {
            RowList::Acesso => &self.acesso_rows,
            RowList::Qualidade => &self.qualidade_rows,
        }
    }

    /// Ties an unbound draft to the id a create just returned.
    pub(crate) fn bind(&mut self, id: ProjectId) {
        self.binding = DraftBinding::Bound(id);
    }

    fn rows_mut(&mut self, list: RowList) -> &mut Vec<Row> {
        match list {
            RowList::Acesso => &mut self.acesso_rows,
            RowList::Qualidade => &mut self.qualidade_rows,
        }
    }
}

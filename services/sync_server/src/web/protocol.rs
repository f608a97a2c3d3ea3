//! services/sync_server/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between an editing client and the
//! sync server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use survey_sync_core::domain::{
    CollectionSnapshot, Project, ProjectId, Row, RowField, RowId, RowList, SubjectId,
};
use survey_sync_core::draft::{DraftBinding, DraftState};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the editing session. This must be the first message sent on the connection.
    Init {
        #[serde(default)]
        token: Option<String>,
    },

    /// Starts a new, unbound project. Unsaved edits are dropped.
    Reset,

    /// Opens an existing project. Unsaved edits are dropped.
    Load { project_id: ProjectId },

    SetTitle { text: String },

    AddRow { list: RowList },

    RemoveRow { list: RowList, row_id: RowId },

    UpdateRow {
        list: RowList,
        row_id: RowId,
        field: RowField,
        value: String,
    },

    Save,

    /// Deletes a project. The client is expected to have confirmed this with the user.
    Delete { project_id: ProjectId },

    /// Reopens the live feed after it failed.
    Resubscribe,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the identity the session writes as, plus the problem options per list.
    SessionInitialized {
        subject_id: SubjectId,
        acesso_options: Vec<String>,
        qualidade_options: Vec<String>,
    },

    /// The full set of projects, most recently written first.
    Snapshot { projects: Vec<ProjectView> },

    /// The current working copy.
    Draft {
        project_id: Option<ProjectId>,
        tema_central: String,
        acesso_rows: Vec<Row>,
        qualidade_rows: Vec<Row>,
    },

    Saved { project_id: ProjectId },

    Deleted { project_id: ProjectId },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

impl ServerMessage {
    pub fn session_initialized(subject_id: SubjectId) -> Self {
        ServerMessage::SessionInitialized {
            subject_id,
            acesso_options: owned_options(RowList::Acesso),
            qualidade_options: owned_options(RowList::Qualidade),
        }
    }

    pub fn snapshot(snapshot: &CollectionSnapshot) -> Self {
        ServerMessage::Snapshot {
            projects: snapshot.recent_first().into_iter().map(ProjectView::from).collect(),
        }
    }

    pub fn draft(draft: &DraftState) -> Self {
        let project_id = match draft.binding() {
            DraftBinding::Bound(id) => Some(id.clone()),
            DraftBinding::Unbound => None,
        };
        ServerMessage::Draft {
            project_id,
            tema_central: draft.title().to_string(),
            acesso_rows: draft.rows(RowList::Acesso).to_vec(),
            qualidade_rows: draft.rows(RowList::Qualidade).to_vec(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// A stored project as listed to clients, spelled like the draft frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProjectView {
    pub project_id: ProjectId,
    pub tema_central: String,
    pub acesso_rows: Vec<Row>,
    pub qualidade_rows: Vec<Row>,
    pub author: SubjectId,
    pub updated_at: DateTime<Utc>,
}

impl From<&Project> for ProjectView {
    fn from(project: &Project) -> Self {
        Self {
            project_id: project.id.clone(),
            tema_central: project.tema_central.clone(),
            acesso_rows: project.rows(RowList::Acesso).to_vec(),
            qualidade_rows: project.rows(RowList::Qualidade).to_vec(),
            author: project.author.clone(),
            updated_at: project.updated_at,
        }
    }
}

fn owned_options(list: RowList) -> Vec<String> {
    list.options().iter().map(|o| o.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn decodes_row_updates() {
        let json = r#"{"type":"update_row","list":"qualidade","row_id":17,"field":"detalhe","value":"nulos"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateRow {
                list: RowList::Qualidade,
                row_id: 17,
                field: RowField::Detalhe,
                value: "nulos".to_string(),
            }
        );
    }

    #[test]
    fn session_frames_list_the_problem_options() {
        let json = serde_json::to_value(ServerMessage::session_initialized(SubjectId::new("anon-1")))
            .unwrap();
        assert_eq!(json["subject_id"], "anon-1");
        assert_eq!(json["acesso_options"].as_array().unwrap().len(), RowList::Acesso.options().len());
    }

    #[test]
    fn init_token_is_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Init { token: None });
    }

    #[test]
    fn draft_frames_carry_the_binding() {
        let draft = DraftState::new();
        let json = serde_json::to_value(ServerMessage::draft(&draft)).unwrap();
        assert_eq!(json["type"], "draft");
        assert!(json["project_id"].is_null());
        assert_eq!(json["acesso_rows"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn empty_snapshot_frames_list_nothing() {
        let json = serde_json::to_value(ServerMessage::snapshot(&CollectionSnapshot::default()))
            .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "snapshot", "projects": [] }));
    }

    #[test]
    fn snapshot_and_draft_frames_spell_fields_alike() {
        let id = ProjectId::new("p1");
        let project = Project {
            id: id.clone(),
            tema_central: "Censo".to_string(),
            acesso_rows: vec![Row::blank(1)],
            qualidade_rows: vec![],
            author: SubjectId::new("anon-1"),
            updated_at: Utc::now(),
        };
        let mut draft = DraftState::new();
        draft.load(&project);

        let snapshot = CollectionSnapshot::new(HashMap::from([(id, project)]));
        let listed = serde_json::to_value(ServerMessage::snapshot(&snapshot)).unwrap();
        let listed = &listed["projects"][0];
        let drafted = serde_json::to_value(ServerMessage::draft(&draft)).unwrap();

        for field in ["project_id", "tema_central", "acesso_rows", "qualidade_rows"] {
            assert_eq!(listed[field], drafted[field], "field {}", field);
        }
        assert!(listed.get("temaCentral").is_none());
        assert!(listed["updated_at"].is_string());
    }
}

//! crates/survey_sync_core/src/domain.rs
//!
//! Defines the pure, core data structures for survey documents.
//! The serde attributes pin the on-the-wire document shape; nothing in here
//! knows about a particular store or identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

//=========================================================================================
// Identifiers
//=========================================================================================

/// The opaque subject identifier yielded by the identity provider.
/// Stamped as `author` on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The store-assigned id of a project. It is never part of the document body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-assigned row id, unique within its containing list.
pub type RowId = i64;

/// The collection all projects of one deployment live under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// The projects collection for the given deployment identifier.
    pub fn projects(app_id: &str) -> Self {
        Self(format!("artifacts/{}/public/data/projects", app_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Rows
//=========================================================================================

/// Problem categories offered for rows of the access list.
pub const ACESSO_OPTIONS: [&str; 6] = [
    "Indisponibilidade de Origem (Dados não capturados)",
    "Necessidade de Solicitação Personalizada (TI/DBA)",
    "Dificuldade de Extração (Latência/Volume excessivo)",
    "Restrição de Acesso/Segurança (LGPD/Compliance)",
    "API/Interface Inexistente ou Instável",
    "Dependência de Processamento Manual/Terceiros",
];

/// Problem categories offered for rows of the quality list.
pub const QUALIDADE_OPTIONS: [&str; 6] = [
    "Inconsistência Inter-sistemas (Discrepância entre fontes)",
    "Violação de Domínio (Dados fora da faixa esperada)",
    "Baixa Completitude (Presença excessiva de nulos/vazios)",
    "Inconformidade de Formato (Sujidade/Falta de padrão)",
    "Anacronismo (Dados obsoletos/fora de tempo)",
    "Redundância ou Duplicidade de Registros",
];

/// Names one of the two row lists of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowList {
    Acesso,
    Qualidade,
}

impl RowList {
    pub const ALL: [RowList; 2] = [RowList::Acesso, RowList::Qualidade];

    /// The fixed option set a row's `problema` is picked from.
    pub fn options(self) -> &'static [&'static str] {
        match self {
            RowList::Acesso => &ACESSO_OPTIONS,
            RowList::Qualidade => &QUALIDADE_OPTIONS,
        }
    }
}

/// The editable fields of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowField {
    Variavel,
    Problema,
    Detalhe,
}

/// One line item of a row list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(default)]
    pub variavel: String,
    #[serde(default)]
    pub problema: String,
    #[serde(default)]
    pub detalhe: String,
}

impl Row {
    pub fn blank(id: RowId) -> Self {
        Self {
            id,
            variavel: String::new(),
            problema: String::new(),
            detalhe: String::new(),
        }
    }

    pub fn set(&mut self, field: RowField, value: String) {
        match field {
            RowField::Variavel => self.variavel = value,
            RowField::Problema => self.problema = value,
            RowField::Detalhe => self.detalhe = value,
        }
    }
}

//=========================================================================================
// Projects
//=========================================================================================

/// The document body sent on every write.
///
/// There is no `updatedAt` here: stores stamp it with their own clock on every
/// create and replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    #[serde(default)]
    pub tema_central: String,
    #[serde(default)]
    pub acesso_rows: Vec<Row>,
    #[serde(default)]
    pub qualidade_rows: Vec<Row>,
    pub author: SubjectId,
}

/// A persisted project as the store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub tema_central: String,
    #[serde(default)]
    pub acesso_rows: Vec<Row>,
    #[serde(default)]
    pub qualidade_rows: Vec<Row>,
    pub author: SubjectId,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn from_payload(id: ProjectId, payload: ProjectPayload, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tema_central: payload.tema_central,
            acesso_rows: payload.acesso_rows,
            qualidade_rows: payload.qualidade_rows,
            author: payload.author,
            updated_at,
        }
    }

    /// The body of this project, without its id and timestamp.
    pub fn payload(&self) -> ProjectPayload {
        ProjectPayload {
            tema_central: self.tema_central.clone(),
            acesso_rows: self.acesso_rows.clone(),
            qualidade_rows: self.qualidade_rows.clone(),
            author: self.author.clone(),
        }
    }

    pub fn rows(&self, list: RowList) -> &[Row] {
        match list {
            RowList::Acesso => &self.acesso_rows,
            RowList::Qualidade => &self.qualidade_rows,
        }
    }
}

/// One server-side change to a collection, as pushed by a store subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    /// The document was created or fully replaced.
    Upserted(Project),
    Removed(ProjectId),
}

//=========================================================================================
// Snapshots
//=========================================================================================

/// Every project currently known to a feed, keyed by id.
///
/// Snapshots are immutable once published; a feed publishes a new one on every push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSnapshot {
    projects: HashMap<ProjectId, Project>,
}

impl CollectionSnapshot {
    pub fn new(projects: HashMap<ProjectId, Project>) -> Self {
        Self { projects }
    }

    pub fn get(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn contains(&self, id: &ProjectId) -> bool {
        self.projects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Projects ordered by most recent write first, ties broken by id.
    pub fn recent_first(&self) -> Vec<&Project> {
        let mut projects: Vec<&Project> = self.projects.values().collect();
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        projects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn collection_path_is_scoped_by_deployment() {
        let path = CollectionPath::projects("survey-prod");
        assert_eq!(path.as_str(), "artifacts/survey-prod/public/data/projects");
    }

    #[test]
    fn payload_uses_camel_case_wire_names() {
        let payload = ProjectPayload {
            tema_central: "ERP".to_string(),
            acesso_rows: vec![Row::blank(7)],
            qualidade_rows: vec![],
            author: SubjectId::new("user-1"),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["temaCentral"], "ERP");
        assert_eq!(json["acessoRows"][0]["id"], 7);
        assert_eq!(json["qualidadeRows"].as_array().unwrap().len(), 0);
        assert_eq!(json["author"], "user-1");
        assert!(json.get("updatedAt").is_none());
    }

    #[test]
    fn missing_body_fields_fall_back_to_empty() {
        let json = serde_json::json!({ "author": "someone" });
        let payload: ProjectPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.tema_central, "");
        assert!(payload.acesso_rows.is_empty());
        assert!(payload.qualidade_rows.is_empty());
    }

    #[test]
    fn each_list_has_its_own_problem_options() {
        assert!(RowList::Acesso
            .options()
            .contains(&"API/Interface Inexistente ou Instável"));
        assert!(!RowList::Qualidade
            .options()
            .contains(&"API/Interface Inexistente ou Instável"));
    }

    #[test]
    fn recent_first_orders_by_updated_at() {
        let stamp = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let project = |id: &str, secs| Project {
            id: ProjectId::new(id),
            tema_central: id.to_string(),
            acesso_rows: vec![],
            qualidade_rows: vec![],
            author: SubjectId::new("a"),
            updated_at: stamp(secs),
        };
        let mut map = HashMap::new();
        for p in [project("old", 10), project("new", 30), project("mid", 20)] {
            map.insert(p.id.clone(), p);
        }
        let snapshot = CollectionSnapshot::new(map);
        let order: Vec<&str> = snapshot.recent_first().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["new", "mid", "old"]);
    }
}

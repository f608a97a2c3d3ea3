pub mod context;
pub mod domain;
pub mod draft;
pub mod errors;
pub mod feed;
pub mod identity;
pub mod memory;
pub mod ports;
pub mod sync;

pub use context::SyncContext;
pub use domain::{
    CollectionPath, CollectionSnapshot, DocumentChange, Project, ProjectId, ProjectPayload, Row,
    RowField, RowId, RowList, SubjectId,
};
pub use draft::{DraftBinding, DraftState};
pub use errors::{DeleteError, FeedError, IdentityError, SaveError, ValidationError};
pub use feed::{CollectionFeed, FeedEvent, FeedSubscription};
pub use identity::IdentitySession;
pub use ports::{ChangeStream, DocumentStore, IdentityProvider, PortError, PortResult};
pub use sync::SyncController;

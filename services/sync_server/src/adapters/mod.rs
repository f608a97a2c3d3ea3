pub mod db;
pub mod identity;

pub use db::PgDocumentStore;
pub use identity::JwtIdentityProvider;

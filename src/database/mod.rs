pub mod datastore;
pub mod manager;
pub mod models;

pub use datastore::{Datastore, Transactional};
pub use manager::{DatabaseError, PgDatastore, PgTransaction};
pub use models::{Account, Membership, Role};

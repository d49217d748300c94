//! External collaborator traits and in-memory test doubles.

pub mod http;
pub mod ledger;
pub mod object_store;
pub mod pg;
pub mod resource;
pub mod sink;
pub mod tenants;

pub use http::{HttpEventSink, HttpLedgerClient, HttpObjectStore};
pub use ledger::{InMemoryLedger, LedgerClient, LedgerReceipt, LedgerRecord};
pub use object_store::{DeleteOutcome, InMemoryObjectStore, ObjectStoreClient};
pub use pg::{PgResourceStore, PgTenantDirectory};
pub use resource::{InMemoryResourceStore, ResourceStore};
pub use sink::{EventSink, InMemoryEventSink};
pub use tenants::{StaticTenantDirectory, TenantDirectory};

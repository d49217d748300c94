pub mod types;

pub use types::{RequestId, ResourceId, SagaId, TenantId, UserId};

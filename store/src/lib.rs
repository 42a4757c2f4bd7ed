pub mod memory;
pub mod model;
pub mod sqlx_store;
pub mod traits;

pub use memory::InMemoryStore;
pub use sqlx_store::SqlxStore;
pub use traits::{BarStore, ExchangeStore, SessionStore, Store, WorkflowStore};

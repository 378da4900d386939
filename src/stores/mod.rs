//! Built-in collaborator implementations

mod logging;
mod memory;

pub use logging::TracingStore;
pub use memory::{MemoryStore, StoreCall};

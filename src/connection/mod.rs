//! Per-connection runtime
//!
//! - [`serve`] moves bytes between a socket and a [`Session`](crate::session::Session)
//! - [`Dispatcher`] forwards decoded records to the collaborators in order
//! - [`SessionHandle`] is what the listener's registry sees of a connection

mod dispatch;
mod handle;
mod handler;


pub use dispatch::{Dispatcher, deliver_batch};
pub use handle::SessionHandle;
pub use handler::{ConnectionContext, ConnectionSummary, serve};

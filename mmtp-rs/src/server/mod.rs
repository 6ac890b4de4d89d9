//! Connection-oriented MMTP server.
//!
//! - [`server`]: accept loops (plain + TLS) and shared state
//! - [`session`]: per-connection framing and action dispatch
//! - [`mailbox`]: per-address message queues
//! - [`limits`]: per-source connection cap
//! - [`tls`]: certificate loading

pub mod limits;
pub mod mailbox;
pub mod server;
pub mod session;
pub mod tls;

pub use mailbox::{MailboxStats, MailboxStore};
pub use server::{MtpServer, ServerContext};
pub use session::Session;

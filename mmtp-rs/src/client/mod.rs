//! MMTP client: connection handling and request correlation.
//!
//! - [`connection`]: transport setup, welcome handshake and the request API
//! - [`correlator`]: pending-request table keyed by request id

pub mod connection;
pub mod correlator;

pub use connection::{MailboxSummary, MtpClient, SendReceipt, ServerFeatures, Transport};
pub use correlator::Correlator;

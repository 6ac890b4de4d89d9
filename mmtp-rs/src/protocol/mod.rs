//! MMTP protocol core.
//!
//! - [`address`]: `(local)%(domain)` address syntax
//! - [`packet`]: wire-level packet model
//! - [`integrity`]: content hashing and verification
//! - [`hashcash`]: proof-of-work generation and checking
//! - [`tags`]: tag taxonomy, normalization and filtering
//! - [`engine`]: packet composition and validation

pub mod address;
pub mod engine;
pub mod hashcash;
pub mod integrity;
pub mod packet;
pub mod tags;

pub use engine::{BuildOptions, BuildResult, BuildWarning, ProcessOptions, ProtocolEngine};
pub use packet::{Content, HashCashToken, MessagePacket, PacketMeta, PacketType, TagSet};
pub use tags::{TagInput, TagTaxonomy};

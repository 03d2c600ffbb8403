//! Core library for the messenger broadcast chat service.
//!
//! The daemon glue (transport negotiation, read/write loops) lives in the
//! `messengerd` crate; everything here is transport-agnostic. A session talks
//! to its peer exclusively through the bounded mpsc channel handed to it at
//! construction, which is the same channel the broadcast registry fans out
//! on, so replies and broadcasts share one strictly-ordered outbound queue.

pub mod error;
pub mod registry;
pub mod session;
pub mod store;

pub use error::StoreError;
pub use registry::{Registry, SessionId};
pub use session::{Session, SessionControl};
pub use store::{AuthOutcome, ChatStore, RegisterOutcome};

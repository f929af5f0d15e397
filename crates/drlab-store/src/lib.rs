//! In-memory conversation state: transcripts, unread counts, presence,
//! typing, and optimistic-send reconciliation.
//!
//! The store is a plain single-owner struct. One task (the session event
//! loop) owns it and applies every mutation in arrival order; readers get
//! snapshots through the owning task. There is no interior locking.

pub mod models;
pub mod store;

mod error;

pub use error::StoreError;
pub use models::{Conversation, Delivery, Message, MessageBody, User};
pub use store::{ApplyOutcome, ConversationStore};

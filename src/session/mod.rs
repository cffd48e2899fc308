//! Conversation session core
//!
//! - `store`: ordered, deduplicated turn log
//! - `policy`: where the transient cache breakpoint goes
//! - `identity`: conversation id, title and file name
//! - `coordinator`: the interactive exchange loop
//! - `catalog`: listing and cleaning stored conversations

pub mod catalog;
pub mod coordinator;
pub mod identity;
pub mod policy;
pub mod store;

pub use coordinator::{Collaborators, Conversation, ExchangeState, InputSource, SessionCoordinator};
pub use identity::{ConversationIdentity, ConversationRecord};
pub use store::{MessageStore, ReconcileReport};

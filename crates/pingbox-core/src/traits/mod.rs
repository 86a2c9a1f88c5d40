//! Collaborator seams: everything the engine talks to but does not own.

pub mod generator;
pub mod store;
pub mod transport;

pub use generator::TextGenerator;
pub use store::{ItemRepository, MessageLogRepository, ReminderRepository, Store, UserRepository};
pub use transport::Transport;

pub mod assembler;
pub mod credentials;
pub mod export;
pub mod presenter;
pub mod session;
pub mod settings;
pub mod store;
pub mod tree;

pub use assembler::{assemble, StreamAssembler, Termination};
pub use credentials::{CredentialProvider, StoredCredentials};
pub use session::{BranchStep, ChatSession, Focus, Selection, SendReport, SessionError};
pub use settings::{AppSettings, SettingsService};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use tree::ConversationTree;

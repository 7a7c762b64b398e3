pub mod llm_model;
pub mod message;
pub mod room;

pub use llm_model::{LlmModel, Pricing};
pub use message::{new_message_id, BranchSlot, Message, Role};
pub use room::Room;

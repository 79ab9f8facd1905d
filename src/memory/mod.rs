//! 记忆层：单线程消息日志（短期）与进程级线程存储

pub mod conversation;
pub mod thread_store;

pub use conversation::{ConversationMemory, Message, Role};
pub use thread_store::{RetentionPolicy, ThreadLog, ThreadStore};

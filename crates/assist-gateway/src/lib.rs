//! Server half of the assistant: HTTP routes, the chat service that drives
//! the root agent, conversation storage, and the cancellation registry.
pub mod agent_executor;
pub mod cancellation_registry;
pub mod chat_service;
pub mod gateway_server;
pub mod storage;

pub use agent_executor::*;
pub use cancellation_registry::*;
pub use chat_service::*;
pub use gateway_server::*;
pub use storage::*;

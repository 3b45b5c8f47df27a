//! In-process publish/subscribe bus.

pub mod handler;
pub mod handles;
pub mod queue;
pub mod service;
pub mod topic;

pub use handler::{handler, handler_fn, same_handler, HandlerRef, MessageHandler, MessageHandlerDyn};
pub use handles::{Publisher, Subscriber};
pub use service::PubSubService;
pub use topic::Topic;

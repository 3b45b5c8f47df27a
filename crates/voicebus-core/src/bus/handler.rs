//! Subscriber callback abstraction.
//!
//! Follows the same blanket-impl pattern as `BoxAudioProcessor`:
//! 1. `MessageHandler` uses native async fn in traits (RPITIT)
//! 2. An object-safe `MessageHandlerDyn` with boxed futures is blanket-implemented
//! 3. Subscribers are stored as `HandlerRef = Arc<dyn MessageHandlerDyn>`
//!
//! Subscription identity is the `Arc` allocation: subscribing the same
//! `HandlerRef` twice to one topic is a no-op, while two separately built
//! handlers wrapping identical closures are distinct subscribers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use voicebus_types::bus::Message;

/// A subscriber callback invoked by the dispatch worker for every message on a topic.
///
/// Returning `Err` (or panicking) is contained by the bus: the failure is
/// counted and logged, and delivery continues to the remaining subscribers.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Arc<Message>) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Object-safe version of [`MessageHandler`] with boxed futures.
pub trait MessageHandlerDyn: Send + Sync {
    fn handle_boxed(
        &self,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

impl<T: MessageHandler> MessageHandlerDyn for T {
    fn handle_boxed(
        &self,
        message: Arc<Message>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(self.handle(message))
    }
}

/// Shared, type-erased subscriber handle.
pub type HandlerRef = Arc<dyn MessageHandlerDyn>;

/// Wrap a concrete handler into a [`HandlerRef`].
pub fn handler<H: MessageHandler + 'static>(handler: H) -> HandlerRef {
    Arc::new(handler)
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn handle(&self, message: Arc<Message>) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.f)(message)
    }
}

/// Build a [`HandlerRef`] from an async closure.
///
/// ```ignore
/// let h = handler_fn(|msg| async move {
///     println!("got {}", msg.id);
///     Ok(())
/// });
/// bus.subscribe("news", h.clone());
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerRef
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Whether two handles refer to the same subscriber.
///
/// Compares the data pointer only; vtable pointers for the same type may
/// differ across codegen units.
pub fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

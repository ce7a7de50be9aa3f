use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;

/// Answers calls for one name registered with `Bridge::on_call`.
///
/// Any `Fn(Vec<Value>) -> impl Future<Output = Result<Value, HandlerError>>`
/// is a handler. Returning `Err` (or panicking) sends a `reject` whose text
/// is the flattened error; the caller only ever sees that string.
#[async_trait]
pub trait CallHandler: Send + Sync {
    async fn handle(&self, args: Vec<Value>) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> CallHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, args: Vec<Value>) -> Result<Value, HandlerError> {
        (self)(args).await
    }
}

/// Render a panic payload the way `std` prints it.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

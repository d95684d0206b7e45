use async_trait::async_trait;
use std::sync::Arc;

/// Fire-and-forget alerting sink.
///
/// Implementations log and swallow their own delivery failures; callers never
/// see an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(&self, message: &str) {
        (**self).notify(message).await
    }
}

//! Event handlers

use std::future::Future;

use async_trait::async_trait;

use crate::event_store::Event;

/// A bus subscriber.
///
/// Closures `Fn(Event) -> impl Future<Output = anyhow::Result<()>>` implement
/// this trait, so simple handlers need no struct.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self)(event).await
    }
}

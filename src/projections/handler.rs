//! Stateless side-effect handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::events::Event;
use crate::projections::{ProcessingStore, Subscriber};

type HandleFn = Box<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Reacts to events for side effects (sending emails, calling APIs)
/// without maintaining a read model. Handlers share the checkpoint and
/// advisory-lock machinery with projections, so delivery is at least once
/// and reactors must tolerate redelivery.
pub struct Handler {
    name: String,
    reactors: HashMap<String, HandleFn>,
}

impl Handler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reactors: HashMap::new(),
        }
    }

    /// Registers a reactor for an event type. Returns the handler for
    /// chaining.
    pub fn on<F, Fut>(mut self, event_type: impl Into<String>, react: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.reactors.insert(
            event_type.into(),
            Box::new(move |event| Box::pin(react(event))),
        );
        self
    }
}

#[async_trait]
impl Subscriber for Handler {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_types(&self) -> Vec<String> {
        self.reactors.keys().cloned().collect()
    }

    /// Invokes registered reactors for matching events. The first error
    /// aborts the batch. The processing store is unused — handlers hold no
    /// state.
    async fn process(&self, events: &[Event], _store: &dyn ProcessingStore) -> Result<()> {
        for event in events {
            if let Some(react) = self.reactors.get(&event.event_type) {
                react(event.clone()).await?;
            }
        }
        Ok(())
    }
}

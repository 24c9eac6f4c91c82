//! Stateful read-model projections.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::projections::{ProcessingStore, Subscriber};
use crate::store::Backend;

type ApplyFn<T> = Box<dyn Fn(Event, Option<T>) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;

/// Builds a typed read model from event streams, keyed by stream id.
///
/// Register an applier per event type with [`on`](Projection::on), then add
/// the projection to a [`Daemon`](crate::projections::Daemon). For each
/// dispatched event the current state is loaded (absent for a stream's
/// first event), the applier produces the next state, and the result is
/// upserted — or the read model deleted when the applier returns `None`.
///
/// ```ignore
/// let summaries = Projection::<OrderSummary>::new(&store, "order_summaries")
///     .on("OrderCreated", |event, _state| async move {
///         Ok(Some(OrderSummary::created(&event)))
///     })
///     .on("OrderPaid", |_event, state| async move {
///         Ok(state.map(OrderSummary::paid))
///     });
/// ```
pub struct Projection<T> {
    name: String,
    codec: Arc<dyn Codec>,
    appliers: HashMap<String, ApplyFn<T>>,
}

impl<T> Projection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a projection writing to the `whisker_{name}` collection.
    pub fn new(backend: &dyn Backend, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            codec: backend.codec(),
            appliers: HashMap::new(),
        }
    }

    /// Registers an applier for an event type. Returns the projection for
    /// chaining.
    pub fn on<F, Fut>(mut self, event_type: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Event, Option<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        self.appliers.insert(
            event_type.into(),
            Box::new(move |event, state| Box::pin(apply(event, state))),
        );
        self
    }
}

#[async_trait]
impl<T> Subscriber for Projection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn event_types(&self) -> Vec<String> {
        self.appliers.keys().cloned().collect()
    }

    async fn process(&self, events: &[Event], store: &dyn ProcessingStore) -> Result<()> {
        for event in events {
            let Some(apply) = self.appliers.get(&event.event_type) else {
                continue;
            };
            let stream_id = event.stream_id.clone();

            let mut state = None;
            let mut version = 0;
            if let Some((bytes, stored_version)) = store.load_state(&stream_id).await? {
                version = stored_version;
                let value = self.codec.unmarshal(&bytes).map_err(|e| {
                    Error::codec(
                        format!("projection {}: unmarshal state for {stream_id}", self.name),
                        e,
                    )
                })?;
                state = Some(serde_json::from_value(value).map_err(|e| {
                    Error::codec(
                        format!("projection {}: unmarshal state for {stream_id}", self.name),
                        Box::new(e),
                    )
                })?);
            }

            match apply(event.clone(), state).await? {
                None => store.delete_state(&stream_id).await?,
                Some(next) => {
                    let value = serde_json::to_value(&next).map_err(|e| {
                        Error::codec(
                            format!("projection {}: marshal state for {stream_id}", self.name),
                            Box::new(e),
                        )
                    })?;
                    let bytes = self.codec.marshal(&value).map_err(|e| {
                        Error::codec(
                            format!("projection {}: marshal state for {stream_id}", self.name),
                            e,
                        )
                    })?;
                    store.upsert_state(&stream_id, &bytes, version).await?;
                }
            }
        }
        Ok(())
    }
}

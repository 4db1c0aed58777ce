//! Pipeline stage adapter.
//!
//! Turns plain per-item functions into connected stages of a pull-based
//! stream. A pipeline starts from a lazily evaluated source and ends in a
//! sink; downstream demand drives every upstream stage, so a slow sink
//! naturally slows the source down.
//!
//! Any stage error is fatal: it is yielded once and the sinks stop there.
//! Order is preserved by every stage except [`Pipeline::parallel_transform`].

use std::future::Future;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, error};

use crate::errors::{BoxError, PipelineError};

/// A chain of stages producing items of type `T`.
pub struct Pipeline<T> {
    stream: BoxStream<'static, Result<T, PipelineError>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Readable source: calls `producer` once, on first demand, and emits
    /// the returned items one at a time.
    pub fn from_source<F, Fut, I, E>(name: &str, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<I, E>> + Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stage = name.to_string();
        let stream = stream::once(async move {
            let items = producer().await.map_err(|e| PipelineError::stage(&stage, e))?;
            debug!(stage = %stage, "Source produced its items");
            Ok::<_, PipelineError>(stream::iter(items.into_iter().map(Ok)))
        })
        .try_flatten();

        Self {
            stream: stream.boxed(),
        }
    }

    /// Source over items already in memory.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            stream: stream::iter(items.into_iter().map(Ok)).boxed(),
        }
    }

    /// Synchronous one-to-one stage.
    pub fn map<U, F>(self, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        Pipeline {
            stream: self.stream.map_ok(f).boxed(),
        }
    }

    /// Asynchronous one-to-one stage, one item at a time.
    pub fn transform<U, F, Fut, E>(self, name: &str, mut f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stage = name.to_string();
        let stream = self.stream.and_then(move |item| {
            let stage = stage.clone();
            let fut = f(item);
            async move { fut.await.map_err(|e| PipelineError::stage(stage, e)) }
        });

        Pipeline {
            stream: stream.boxed(),
        }
    }

    /// Asynchronous one-to-many stage; the returned items are flattened into
    /// the stream in order.
    pub fn expand<U, F, Fut, I, E>(self, name: &str, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<I, E>> + Send + 'static,
        I: IntoIterator<Item = U> + Send + 'static,
        I::IntoIter: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let expanded = self.transform(name, f);
        let stream = expanded
            .stream
            .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
            .try_flatten();

        Pipeline {
            stream: stream.boxed(),
        }
    }

    /// Keep the items for which `predicate` holds.
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            stream: self
                .stream
                .try_filter(move |item| future::ready(predicate(item)))
                .boxed(),
        }
    }

    /// Keep the items for which the asynchronous `predicate` resolves to
    /// `true`. A predicate error is fatal like any other stage error.
    pub fn filter_async<F, Fut, E>(self, name: &str, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stage = name.to_string();
        let stream = self
            .stream
            .and_then(move |item| {
                let stage = stage.clone();
                let verdict = predicate(&item);
                async move {
                    match verdict.await {
                        Ok(keep) => Ok(keep.then_some(item)),
                        Err(e) => Err(PipelineError::stage(stage, e)),
                    }
                }
            })
            .try_filter_map(|kept| future::ok(kept));

        Self {
            stream: stream.boxed(),
        }
    }

    /// Asynchronous one-to-one stage with up to `parallelism` items in flight.
    ///
    /// Exactly one output per input, emitted in completion order: consumers
    /// must not rely on input order once `parallelism` is above one.
    pub fn parallel_transform<U, F, Fut, E>(
        self,
        name: &str,
        parallelism: usize,
        mut f: F,
    ) -> Pipeline<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stage = name.to_string();
        let stream = self
            .stream
            .map(move |item| {
                let stage = stage.clone();
                let pending = item.map(&mut f);
                async move {
                    match pending {
                        Ok(fut) => fut.await.map_err(|e| PipelineError::stage(stage, e)),
                        Err(e) => Err(e),
                    }
                }
            })
            .buffer_unordered(parallelism.max(1));

        Pipeline {
            stream: stream.boxed(),
        }
    }

    /// Group items into vectors of up to `size`; the last one may be short.
    pub fn chunks(self, size: usize) -> Pipeline<Vec<T>> {
        Pipeline {
            stream: self
                .stream
                .try_chunks(size.max(1))
                .map_err(|e| e.1)
                .boxed(),
        }
    }

    /// Collect every item, stopping at the first error.
    pub async fn collect(self) -> Result<Vec<T>, PipelineError> {
        self.stream.try_collect::<Vec<T>>().await.map_err(log_failure)
    }

    /// Run `sink` on every item in order, returning how many were consumed.
    pub async fn for_each<F, Fut, E>(self, name: &str, mut sink: F) -> Result<usize, PipelineError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError> + 'static,
    {
        let mut stream = self.stream;
        let mut consumed = 0;
        while let Some(item) = stream.try_next().await.map_err(log_failure)? {
            sink(item)
                .await
                .map_err(|e| log_failure(PipelineError::stage(name, e)))?;
            consumed += 1;
        }
        Ok(consumed)
    }

    /// The underlying stream, ending after the first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<T, PipelineError>> {
        self.stream
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            })
            .boxed()
    }
}

fn log_failure(e: PipelineError) -> PipelineError {
    error!(error = %e, "Pipeline failed");
    e
}

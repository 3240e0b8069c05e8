//! Aggregation of a primary response and its server pushes.
//!
//! A [`PushGroup`] is created for each exchange that may receive PUSH_PROMISE
//! frames. The exchange driver reports announced pushes, completed pushes,
//! failures, and the point after which no more promises can arrive (the
//! primary response is complete). The group resolves one overall outcome:
//!
//! - success once every announced push completed and no more can arrive
//! - failure as soon as any push fails; the first error wins and nothing
//!   resolved later can turn the outcome back into a success
//!
//! The primary response has its own completion, independent of the pushes.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{HeaderMap, Method, Uri};

use crate::completion::Completion;
use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// A PUSH_PROMISE as seen by the exchange layer.
#[derive(Debug, Clone)]
pub struct PushPromise {
    pub promised_stream_id: u32,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Decides whether a promised push is wanted.
pub trait PushPromiseHandler: Send + Sync {
    fn accept(&self, promise: &PushPromise) -> bool;
}

impl<F> PushPromiseHandler for F
where
    F: Fn(&PushPromise) -> bool + Send + Sync,
{
    fn accept(&self, promise: &PushPromise) -> bool {
        self(promise)
    }
}

type Observer<T> = Box<dyn FnOnce(&Result<T>) + Send>;

#[derive(Debug, Default)]
struct PushState {
    number_of_pushes: usize,
    remaining_pushes: usize,
    no_more_pushes: bool,
    error: Option<Error>,
}

/// Completion tracker for one primary response plus its pushes.
pub struct PushGroup<T> {
    state: Mutex<PushState>,
    result: Completion<Result<()>>,
    no_more_pushes: Completion<()>,
    main_response: Completion<Result<T>>,
    /// `None` once the main response has resolved.
    observers: Mutex<Option<Vec<Observer<T>>>>,
    handler: Option<Arc<dyn PushPromiseHandler>>,
    enable_push: bool,
}

impl<T> PushGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Group without a push handler: promises are rejected, but the driver
    /// may still account pushes directly.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PushState::default()),
            result: Completion::new(),
            no_more_pushes: Completion::new(),
            main_response: Completion::new(),
            observers: Mutex::new(Some(Vec::new())),
            handler: None,
            enable_push: true,
        }
    }

    /// Group that consults `handler` for each promise.
    pub fn with_handler(config: &TransportConfig, handler: Arc<dyn PushPromiseHandler>) -> Self {
        Self {
            handler: Some(handler),
            enable_push: config.enable_push,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, PushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_if_completed(&self, state: &PushState) {
        if state.remaining_pushes == 0
            && state.no_more_pushes
            && state.error.is_none()
            && self.result.complete(Ok(()))
        {
            tracing::debug!("Push group complete ({} pushes)", state.number_of_pushes);
        }
    }

    /// Record an announced push.
    ///
    /// Fails if [`no_more_pushes`](Self::no_more_pushes) has already latched:
    /// a promise after the final response is a protocol violation.
    pub fn add_push(&self) -> Result<()> {
        let mut state = self.lock();
        if state.no_more_pushes {
            tracing::warn!("PUSH_PROMISE announced after the push set was closed");
            return Err(Error::http_protocol(
                "PUSH_PROMISE received after the final response",
            ));
        }
        state.number_of_pushes += 1;
        state.remaining_pushes += 1;
        tracing::trace!(
            "Push added (total {}, remaining {})",
            state.number_of_pushes,
            state.remaining_pushes
        );
        Ok(())
    }

    /// Record that one announced push finished.
    pub fn push_completed(&self) {
        let mut state = self.lock();
        if state.remaining_pushes == 0 {
            tracing::warn!("Push completed with no pushes outstanding");
        } else {
            state.remaining_pushes -= 1;
        }
        tracing::trace!("Push completed (remaining {})", state.remaining_pushes);
        self.check_if_completed(&state);
    }

    /// Latch that no further pushes will be announced.
    ///
    /// Once latched the flag stays set; passing `false` only re-evaluates.
    /// The no-more-pushes signal resolves on the first latch whether or not
    /// the group has failed.
    pub fn no_more_pushes(&self, no_more: bool) {
        let mut state = self.lock();
        state.no_more_pushes |= no_more;
        self.check_if_completed(&state);
        if state.no_more_pushes {
            self.no_more_pushes.complete(());
        }
    }

    /// Fail the group. Only the first error is recorded, and none once the
    /// group has already resolved.
    pub fn push_error(&self, err: Error) {
        let mut state = self.lock();
        // The outcome is only ever resolved under the state lock
        if state.error.is_some() || self.result.is_complete() {
            tracing::trace!("Ignoring push error on resolved group: {}", err);
            return;
        }
        tracing::debug!("Push group failed: {}", err);
        state.error = Some(err.clone());
        self.result.complete(Err(err));
    }

    /// Decide on a PUSH_PROMISE.
    ///
    /// Returns a handle for the pushed response when push is enabled and the
    /// handler accepts it; the push is then counted in the group.
    pub fn accept_push_request(self: &Arc<Self>, promise: PushPromise) -> Option<PushedResponse<T>> {
        if !self.enable_push {
            tracing::debug!("Rejecting push {}: push disabled", promise.promised_stream_id);
            return None;
        }
        let Some(handler) = self.handler.as_ref() else {
            tracing::debug!("Rejecting push {}: no handler", promise.promised_stream_id);
            return None;
        };
        if !handler.accept(&promise) {
            tracing::debug!("Push {} for {} declined", promise.promised_stream_id, promise.uri);
            return None;
        }
        self.add_push().ok()?;
        Some(PushedResponse {
            group: Arc::clone(self),
            promise,
            resolved: false,
        })
    }

    /// Total pushes ever announced.
    pub fn number_of_pushes(&self) -> usize {
        self.lock().number_of_pushes
    }

    /// Announced pushes that have not completed.
    pub fn remaining_pushes(&self) -> usize {
        self.lock().remaining_pushes
    }

    /// The recorded group error, if any.
    pub fn error(&self) -> Option<Error> {
        self.lock().error.clone()
    }

    /// Handle on the overall outcome.
    pub fn result(&self) -> Completion<Result<()>> {
        self.result.clone()
    }

    /// Wait for the overall outcome.
    pub async fn wait(&self) -> Result<()> {
        self.result.wait().await
    }

    /// Resolves once the push set is fixed.
    pub fn no_more_pushes_signal(&self) -> Completion<()> {
        self.no_more_pushes.clone()
    }

    /// Handle on the primary response.
    pub fn main_response(&self) -> Completion<Result<T>> {
        self.main_response.clone()
    }

    /// Register a callback fired exactly once when the primary response
    /// resolves. Fires immediately if it already has.
    pub fn on_main_response<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match observers.as_mut() {
            Some(pending) => pending.push(Box::new(callback)),
            None => {
                drop(observers);
                if let Some(result) = self.main_response.peek() {
                    callback(&result);
                }
            }
        }
    }

    /// Resolve the primary response. Returns `false` if it was already resolved.
    pub fn main_response_completed(&self, result: Result<T>) -> bool {
        let observers = {
            let mut slot = self
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(observers) = slot.take() else {
                return false;
            };
            self.main_response.complete(result.clone());
            observers
        };
        for observer in observers {
            observer(&result);
        }
        true
    }

    /// Drive the primary response from `response` on a background task.
    pub fn set_main_response<F>(self: &Arc<Self>, response: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let group = Arc::clone(self);
        tokio::spawn(async move {
            let result = response.await;
            group.main_response_completed(result);
        });
    }
}

impl<T> Default for PushGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PushGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PushGroup")
            .field("number_of_pushes", &state.number_of_pushes)
            .field("remaining_pushes", &state.remaining_pushes)
            .field("no_more_pushes", &state.no_more_pushes)
            .field("error", &state.error)
            .finish()
    }
}

/// An accepted push. Resolve it with [`complete`](Self::complete) or
/// [`fail`](Self::fail); dropping it unresolved counts as completed.
pub struct PushedResponse<T>
where
    T: Clone + Send + Sync + 'static,
{
    group: Arc<PushGroup<T>>,
    promise: PushPromise,
    resolved: bool,
}

impl<T> PushedResponse<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn promise(&self) -> &PushPromise {
        &self.promise
    }

    /// The pushed response was fully received.
    pub fn complete(mut self) {
        self.resolved = true;
        self.group.push_completed();
    }

    /// The pushed response failed; fails the whole group.
    pub fn fail(mut self, err: Error) {
        self.resolved = true;
        self.group.push_error(err);
    }
}

impl<T> Drop for PushedResponse<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.resolved {
            tracing::debug!(
                "Push {} dropped without outcome, counting as completed",
                self.promise.promised_stream_id
            );
            self.group.push_completed();
        }
    }
}

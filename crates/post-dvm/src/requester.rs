//! Job requester.
//!
//! `Building -> AwaitingResponse -> {Fulfilled | TimedOut | Canceled}`. The response
//! subscription is opened before the request is published and released on every exit path.

use crate::config::ClientConfig;
use crate::error::{DvmError, Result};
use crate::job::JobOutput;
use crate::post::Post;
use crate::shutdown::ShutdownSignal;
use nostr::dvm::{Correlation, correlate, create_job_request_event, job_response_filter};
use nostr::{Event, Filter, Keypair, finalize_event, short_hex, unix_now_secs, verify_event};
use nostr_client::{EventStream, ManagedRelay, RelayConnector, RetryPolicy};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

/// How far before the request the response subscription reaches back.
pub const RESPONSE_LOOKBACK_SECS: u64 = 60;

/// Client for one responder protocol, holding its own identity and relay handle.
pub struct DvmClient {
    keys: Keypair,
    relay: Arc<ManagedRelay>,
}

impl DvmClient {
    pub fn new(keys: Keypair, relay: Arc<ManagedRelay>) -> Self {
        Self { keys, relay }
    }

    pub async fn connect(config: &ClientConfig, connector: Arc<dyn RelayConnector>) -> Result<Self> {
        let relay =
            ManagedRelay::connect(&config.relay_url, connector, RetryPolicy::default()).await?;
        Ok(Self::new(config.keys.clone(), Arc::new(relay)))
    }

    pub fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    /// Request a post by id.
    pub async fn request_post(
        &self,
        responder: &str,
        post_id: &str,
        timeout: Duration,
    ) -> Result<Post> {
        self.request_job(responder, post_id, timeout).await
    }

    /// Publish a job request and wait for the correlated response.
    ///
    /// `timeout` bounds the whole call, publishing included.
    pub async fn request_job<R: JobOutput>(
        &self,
        responder: &str,
        argument: &str,
        timeout: Duration,
    ) -> Result<R> {
        self.request_job_with_cancel(responder, argument, timeout, &ShutdownSignal::new())
            .await
    }

    /// Like [`DvmClient::request_job`], also returning [`DvmError::Canceled`] once `cancel`
    /// fires.
    pub async fn request_job_with_cancel<R: JobOutput>(
        &self,
        responder: &str,
        argument: &str,
        timeout: Duration,
        cancel: &ShutdownSignal,
    ) -> Result<R> {
        let mut limits = Limits::new(timeout, cancel);

        let template = create_job_request_event(argument, unix_now_secs()?);
        let request = finalize_event(&template, &self.keys.private_key)?;
        let since = request.created_at.saturating_sub(RESPONSE_LOOKBACK_SECS);
        info!(
            "requesting {} from DVM {} (request {})",
            argument,
            short_hex(responder),
            request.short_id()
        );

        let subscription = ResponseSubscription {
            relay: Arc::clone(&self.relay),
            id: format!("post-dvm-response-{}", request.short_id()),
            filters: vec![job_response_filter(responder, since)],
            open: true,
        };
        let outcome = self
            .await_response(&request, responder, &subscription, &mut limits)
            .await;
        subscription.close().await;
        outcome
    }

    async fn await_response<R: JobOutput>(
        &self,
        request: &Event,
        responder: &str,
        subscription: &ResponseSubscription,
        limits: &mut Limits<'_>,
    ) -> Result<R> {
        let mut stream = limits.bound(subscription.open_stream()).await??;
        limits.bound(self.relay.publish(request)).await??;
        debug!("request {} published; awaiting response", request.short_id());

        loop {
            let next = match limits.bound(stream.recv()).await {
                Ok(next) => next,
                Err(error) => {
                    if matches!(error, DvmError::Timeout(_)) {
                        warn!(
                            "no response to {} from {} within {:?}",
                            request.short_id(),
                            short_hex(responder),
                            limits.timeout
                        );
                    }
                    return Err(error);
                }
            };

            match next {
                Some(event) => {
                    if let Some(output) = accept_response(&event, &request.id, responder) {
                        info!(
                            "response {} received for request {}",
                            event.short_id(),
                            request.short_id()
                        );
                        return Ok(output);
                    }
                }
                None => {
                    let delay = self.relay.policy().delay;
                    warn!("response subscription ended; resubscribing in {:?}", delay);
                    limits.bound(tokio::time::sleep(delay)).await?;
                    stream = limits.bound(subscription.open_stream()).await??;
                }
            }
        }
    }
}

/// Deadline and cancellation shared by every wait of one request.
struct Limits<'a> {
    cancel: &'a ShutdownSignal,
    expired: Pin<Box<Sleep>>,
    timeout: Duration,
}

impl<'a> Limits<'a> {
    fn new(timeout: Duration, cancel: &'a ShutdownSignal) -> Self {
        Self {
            cancel,
            expired: Box::pin(tokio::time::sleep(timeout)),
            timeout,
        }
    }

    /// Run `work` unless the request is canceled or runs out of time first.
    async fn bound<T>(&mut self, work: impl Future<Output = T>) -> Result<T> {
        let cancel = self.cancel;
        let timeout = self.timeout;
        tokio::select! {
            biased;
            () = cancel.wait() => Err(DvmError::Canceled),
            () = &mut self.expired => Err(DvmError::Timeout(timeout)),
            output = work => Ok(output),
        }
    }
}

/// Response subscription of one request. Closed on every exit, including when the request
/// future is dropped before it completes.
struct ResponseSubscription {
    relay: Arc<ManagedRelay>,
    id: String,
    filters: Vec<Filter>,
    open: bool,
}

impl ResponseSubscription {
    async fn open_stream(&self) -> nostr_client::Result<EventStream> {
        self.relay.subscribe(&self.id, self.filters.clone()).await
    }

    async fn close(mut self) {
        self.open = false;
        if let Err(error) = self.relay.unsubscribe(&self.id).await {
            debug!("closing response subscription {}: {}", self.id, error);
        }
    }
}

impl Drop for ResponseSubscription {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("response subscription {} left open: no runtime to close it", self.id);
            return;
        };
        let relay = Arc::clone(&self.relay);
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            if let Err(error) = relay.unsubscribe(&id).await {
                debug!("closing abandoned response subscription {}: {}", id, error);
            }
        });
    }
}

/// Decide whether `event` answers `request_id`, and decode it if so.
///
/// A response tagged with the request id is accepted once it decodes. A response from the
/// responder carrying no `e` tag at all is accepted only if the decoded value is well formed
/// (see [`Correlation::Untagged`]). Responses tagged for another request, events from anyone
/// else, and events with bad signatures are ignored.
pub fn accept_response<R: JobOutput>(event: &Event, request_id: &str, responder: &str) -> Option<R> {
    let correlation = correlate(event, request_id, responder);
    if !correlation.is_candidate() {
        debug!("ignoring event {} ({:?})", event.short_id(), correlation);
        return None;
    }

    if !matches!(verify_event(event), Ok(true)) {
        warn!("ignoring response {} with invalid signature", event.short_id());
        return None;
    }

    let output: R = match serde_json::from_str(&event.content) {
        Ok(output) => output,
        Err(error) => {
            warn!("could not decode response {}: {}", event.short_id(), error);
            return None;
        }
    };

    match correlation {
        Correlation::Tagged => Some(output),
        Correlation::Untagged if output.is_well_formed() => {
            warn!(
                "accepting response {} without request reference",
                event.short_id()
            );
            Some(output)
        }
        _ => {
            debug!("ignoring incomplete untagged response {}", event.short_id());
            None
        }
    }
}

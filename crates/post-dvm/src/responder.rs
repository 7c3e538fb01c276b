//! Job responder.
//!
//! Listens for job requests, runs the fetch collaborator for each one, and publishes a response
//! tagged with the request id and requester. Requests are handled one at a time in arrival order.

use crate::config::DvmConfig;
use crate::error::Result;
use crate::job::JobFetcher;
use crate::shutdown::ShutdownSignal;
use nostr::dvm::{JobRequest, create_job_response_event, job_request_filter};
use nostr::{Event, Keypair, finalize_event, short_hex, unix_now_secs, verify_event};
use nostr_client::{EventStream, ManagedRelay, RelayConnector, RetryPolicy};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How far before subscription start requests are still picked up.
pub const STARTUP_LOOKBACK_SECS: u64 = 1;
/// How far before the newest request seen a resubscription reaches back.
pub const RESUBSCRIBE_SLACK_SECS: u64 = 10;
/// Answered request ids remembered for duplicate suppression.
pub const HANDLED_REQUEST_CAPACITY: usize = 4096;

/// Bounded set of request ids, evicting the oldest first.
#[derive(Debug)]
pub struct HandledRequests {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl HandledRequests {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Record `id`. Returns `false` if it was already recorded.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.ids.remove(&evicted);
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The DVM: `Idle -> Subscribed -> Processing -> Subscribed -> ... -> Stopped`.
pub struct Dvm<F: JobFetcher> {
    keys: Keypair,
    relay: Arc<ManagedRelay>,
    fetcher: F,
    shutdown: ShutdownSignal,
    keepalive_interval: Duration,
}

impl<F: JobFetcher> Dvm<F> {
    pub fn new(keys: Keypair, relay: Arc<ManagedRelay>, fetcher: F) -> Self {
        Self {
            keys,
            relay,
            fetcher,
            shutdown: ShutdownSignal::new(),
            keepalive_interval: Duration::from_secs(crate::config::DEFAULT_KEEPALIVE_SECS),
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Connect to the configured relay. A failed initial connection is returned as-is.
    pub async fn connect(
        config: &DvmConfig,
        connector: Arc<dyn RelayConnector>,
        fetcher: F,
    ) -> Result<Self> {
        let relay =
            ManagedRelay::connect(&config.relay_url, connector, RetryPolicy::default()).await?;
        Ok(Self::new(config.keys.clone(), Arc::new(relay), fetcher)
            .with_keepalive_interval(config.keepalive_interval))
    }

    pub fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    /// Ask the run loop to exit. Safe to call any number of times from any task; returns
    /// `true` only for the call that initiated shutdown.
    pub fn stop(&self) -> bool {
        let first = self.shutdown.trigger();
        if first {
            info!("DVM {} stopping", short_hex(&self.public_key_hex()));
        }
        first
    }

    /// A clone of the shutdown signal, for wiring to OS signals.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Subscribe to job requests and serve them until [`Dvm::stop`] is called.
    ///
    /// Failing to open the initial subscription is returned to the caller. After that, per-job
    /// failures are logged and the job is dropped; a lost subscription is reopened.
    pub async fn run(&self) -> Result<()> {
        let public_key = self.public_key_hex();
        let subscription_id = format!("post-dvm-jobs-{}", short_hex(&public_key));
        let since = unix_now_secs()?.saturating_sub(STARTUP_LOOKBACK_SECS);

        let mut stream = self
            .relay
            .subscribe(&subscription_id, vec![job_request_filter(since)])
            .await?;
        info!(
            "DVM {} listening for job requests on {}",
            short_hex(&public_key),
            self.relay.url()
        );

        let keepalive = tokio::spawn(keepalive_loop(
            Arc::clone(&self.relay),
            self.shutdown.clone(),
            self.keepalive_interval,
        ));

        let mut handled = HandledRequests::new(HANDLED_REQUEST_CAPACITY);
        let mut last_seen = since;

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                next = stream.recv() => next,
            };

            match next {
                Some(event) => {
                    last_seen = last_seen.max(event.created_at);
                    self.handle_event(&event, &mut handled).await;
                }
                None => {
                    warn!("job subscription on {} ended", self.relay.url());
                    // Never reach back past startup.
                    let resume_from = last_seen.saturating_sub(RESUBSCRIBE_SLACK_SECS).max(since);
                    match self.resubscribe(&subscription_id, resume_from).await {
                        Some(resumed) => stream = resumed,
                        None => break,
                    }
                }
            }
        }

        keepalive.abort();
        if let Err(error) = self.relay.unsubscribe(&subscription_id).await {
            debug!("closing job subscription: {}", error);
        }
        info!("DVM {} stopped", short_hex(&public_key));
        Ok(())
    }

    /// Reopen the job subscription, retrying until it succeeds or shutdown is requested.
    ///
    /// Every attempt is preceded by a pause: the relay's retry delay before the first one,
    /// the keepalive interval after a failure.
    async fn resubscribe(&self, subscription_id: &str, since: u64) -> Option<EventStream> {
        let mut pause = self.relay.policy().delay;
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            tokio::select! {
                biased;
                () = self.shutdown.wait() => return None,
                () = tokio::time::sleep(pause) => {}
            }
            match self
                .relay
                .subscribe(subscription_id, vec![job_request_filter(since)])
                .await
            {
                Ok(stream) => {
                    info!("resubscribed to job requests since {}", since);
                    return Some(stream);
                }
                Err(error) => {
                    warn!("resubscribing to job requests failed: {}", error);
                    pause = self.keepalive_interval;
                }
            }
        }
    }

    async fn handle_event(&self, event: &Event, handled: &mut HandledRequests) {
        let request = match JobRequest::from_event(event) {
            Ok(request) => request,
            Err(error) => {
                debug!("ignoring event {}: {}", event.short_id(), error);
                return;
            }
        };

        if !matches!(verify_event(event), Ok(true)) {
            warn!("ignoring request {} with invalid signature", event.short_id());
            return;
        }

        // Recorded before processing: a request is answered or dropped exactly once.
        if !handled.insert(&request.id) {
            debug!("request {} already handled", event.short_id());
            return;
        }

        info!(
            "job request {} from {} for {}",
            short_hex(&request.id),
            short_hex(&request.requester),
            request.argument
        );

        if let Err(error) = self.process(&request).await {
            warn!("dropping job {}: {}", short_hex(&request.id), error);
        }
    }

    /// Fetch, serialize, sign, and publish the response for one request.
    pub async fn process(&self, request: &JobRequest) -> Result<Event> {
        let started = Instant::now();
        let output = self.fetcher.fetch(&request.argument).await?;
        debug!("fetched {} in {:?}", request.argument, started.elapsed());

        let content = serde_json::to_string(&output)?;
        let template = create_job_response_event(request, content, unix_now_secs()?);
        let response = finalize_event(&template, &self.keys.private_key)?;

        let confirmation = self.relay.publish(&response).await?;
        info!(
            "published response {} for request {} to {} in {:?}",
            response.short_id(),
            short_hex(&request.id),
            confirmation.relay_url,
            started.elapsed()
        );
        Ok(response)
    }
}

async fn keepalive_loop(relay: Arc<ManagedRelay>, shutdown: ShutdownSignal, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            _ = ticker.tick() => match relay.ensure_connected().await {
                Ok(true) => info!("keepalive reconnected to {}", relay.url()),
                Ok(false) => debug!("keepalive: {} connected", relay.url()),
                Err(error) => warn!("keepalive reconnect to {} failed: {}", relay.url(), error),
            },
        }
    }
    debug!("keepalive stopped");
}

//! End-to-end responder/requester flows over the in-process relay.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nostr::dvm::{KIND_JOB_REQUEST, KIND_TEXT_NOTE};
use nostr::{Event, EventTemplate, Keypair, finalize_event, unix_now_secs};
use nostr_client::{ClientError, ManagedRelay, MemoryRelayHub, RelayTransport, RetryPolicy};
use post_dvm::{
    Dvm, DvmClient, DvmError, FetchError, JobFetcher, Post, Result as DvmResult, ShutdownSignal,
};
use tokio::task::JoinHandle;

type BoxError = Box<dyn Error + Send + Sync>;
type TestResult = Result<(), BoxError>;

const HALFIN_POST_ID: &str = "1110302988";

/// Serves posts from a fixed table and counts lookups.
#[derive(Clone)]
struct FixedFetcher {
    posts: Arc<HashMap<String, Post>>,
    calls: Arc<AtomicUsize>,
    outage: Option<(String, MemoryRelayHub)>,
}

impl FixedFetcher {
    fn new(posts: Vec<Post>) -> Self {
        Self {
            posts: Arc::new(posts.into_iter().map(|post| (post.id.clone(), post)).collect()),
            calls: Arc::new(AtomicUsize::new(0)),
            outage: None,
        }
    }

    /// While looking up `argument`, make the relay drop publishers and refuse reconnects.
    fn with_outage_on(mut self, argument: &str, hub: &MemoryRelayHub) -> Self {
        self.outage = Some((argument.to_string(), hub.clone()));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobFetcher for FixedFetcher {
    type Output = Post;

    async fn fetch(&self, argument: &str) -> Result<Post, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((failing, hub)) = &self.outage
            && failing == argument
        {
            hub.set_drop_publishers(true).await;
            hub.set_refuse_connections(true).await;
        }
        self.posts
            .get(argument)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(argument.to_string()))
    }
}

fn halfin() -> Post {
    Post {
        id: HALFIN_POST_ID.to_string(),
        username: "halfin".to_string(),
        name: "halfin".to_string(),
        text: "Running bitcoin".to_string(),
        permanent_url: "https://twitter.com/halfin/status/1110302988".to_string(),
        timestamp: 1_231_644_832,
        ..Post::default()
    }
}

fn satoshi() -> Post {
    Post {
        id: "42".to_string(),
        username: "satoshi".to_string(),
        text: "Chancellor on brink of second bailout for banks".to_string(),
        ..Post::default()
    }
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(20))
}

async fn managed(hub: &MemoryRelayHub) -> Result<Arc<ManagedRelay>, BoxError> {
    let relay = ManagedRelay::connect("memory://relay", Arc::new(hub.clone()), quick_policy()).await?;
    Ok(Arc::new(relay))
}

/// Polling budget for conditions the relay reaches asynchronously.
struct Patience {
    until: Instant,
}

impl Patience {
    fn new() -> Self {
        Self {
            until: Instant::now() + Duration::from_secs(5),
        }
    }

    async fn wait(&self, what: &str) -> TestResult {
        if Instant::now() > self.until {
            return Err(format!("timed out waiting for {what}").into());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }
}

async fn wait_for_subscriptions(hub: &MemoryRelayHub, at_least: usize) -> TestResult {
    let patience = Patience::new();
    while hub.subscription_count().await < at_least {
        patience.wait("subscriptions").await?;
    }
    Ok(())
}

async fn wait_for_subscriptions_closed(hub: &MemoryRelayHub) -> TestResult {
    let patience = Patience::new();
    while hub.subscription_count().await > 0 {
        patience.wait("subscriptions to close").await?;
    }
    Ok(())
}

async fn wait_for_request(hub: &MemoryRelayHub) -> TestResult {
    let patience = Patience::new();
    loop {
        let events = hub.published_events().await;
        if events.iter().any(|event| event.kind == KIND_JOB_REQUEST) {
            return Ok(());
        }
        patience.wait("a job request").await?;
    }
}

struct RunningDvm {
    dvm: Arc<Dvm<FixedFetcher>>,
    fetcher: FixedFetcher,
    task: JoinHandle<DvmResult<()>>,
}

impl RunningDvm {
    async fn stop(self) -> TestResult {
        self.dvm.stop();
        tokio::time::timeout(Duration::from_secs(5), self.task).await???;
        Ok(())
    }
}

async fn start_dvm(hub: &MemoryRelayHub, posts: Vec<Post>) -> Result<RunningDvm, BoxError> {
    start_dvm_with(hub, FixedFetcher::new(posts)).await
}

async fn start_dvm_with(
    hub: &MemoryRelayHub,
    fetcher: FixedFetcher,
) -> Result<RunningDvm, BoxError> {
    let subscriptions_before = hub.subscription_count().await;
    let dvm = Arc::new(
        Dvm::new(Keypair::generate(), managed(hub).await?, fetcher.clone())
            .with_keepalive_interval(Duration::from_millis(50)),
    );
    let task = {
        let dvm = Arc::clone(&dvm);
        tokio::spawn(async move { dvm.run().await })
    };
    wait_for_subscriptions(hub, subscriptions_before + 1).await?;
    Ok(RunningDvm { dvm, fetcher, task })
}

async fn client(hub: &MemoryRelayHub) -> Result<DvmClient, BoxError> {
    Ok(DvmClient::new(Keypair::generate(), managed(hub).await?))
}

fn responses(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|event| event.kind == KIND_TEXT_NOTE)
        .collect()
}

#[tokio::test]
async fn round_trip_returns_fetched_post() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, vec![halfin()]).await?;
    let client = client(&hub).await?;

    let post = client
        .request_post(
            &running.dvm.public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(5),
        )
        .await?;
    assert_eq!(post.username, "halfin");
    assert_eq!(post.text, "Running bitcoin");

    let events = hub.published_events().await;
    let request = events
        .iter()
        .find(|event| event.kind == KIND_JOB_REQUEST)
        .ok_or("request not published")?;
    assert_eq!(request.content, HALFIN_POST_ID);
    assert!(request.tags.is_empty());
    assert_eq!(request.pubkey, client.public_key_hex());

    let answers = responses(&events);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].pubkey, running.dvm.public_key_hex());
    assert_eq!(
        answers[0].tags,
        vec![
            vec!["e".to_string(), request.id.clone()],
            vec!["p".to_string(), client.public_key_hex()],
        ]
    );

    running.stop().await
}

#[tokio::test]
async fn failed_fetch_is_observed_as_timeout() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, vec![halfin()]).await?;
    let client = client(&hub).await?;

    let timeout = Duration::from_millis(400);
    let started = Instant::now();
    let result = client
        .request_post(&running.dvm.public_key_hex(), "404", timeout)
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(DvmError::Timeout(limit)) if limit == timeout));
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(
        elapsed < timeout + Duration::from_millis(500),
        "returned late after {elapsed:?}"
    );
    assert_eq!(running.fetcher.calls(), 1);
    assert!(responses(&hub.published_events().await).is_empty());

    // Only the responder's own subscription is left open.
    assert_eq!(hub.subscription_count().await, 1);
    running.stop().await
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_answer() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, vec![halfin(), satoshi()]).await?;
    let client = client(&hub).await?;
    let responder = running.dvm.public_key_hex();
    let timeout = Duration::from_secs(5);

    let (first, second) = tokio::join!(
        client.request_post(&responder, HALFIN_POST_ID, timeout),
        client.request_post(&responder, "42", timeout),
    );
    assert_eq!(first?.username, "halfin");
    assert_eq!(second?.username, "satoshi");

    running.stop().await
}

fn signed(
    author: &Keypair,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: &str,
) -> Result<Event, BoxError> {
    let template = EventTemplate {
        created_at: unix_now_secs()?,
        kind,
        tags,
        content: content.to_string(),
    };
    Ok(finalize_event(&template, &author.private_key)?)
}

/// Publishes `answers` from `responder` as soon as a job request shows up on the relay.
fn answer_when_requested(
    hub: &MemoryRelayHub,
    responder: Keypair,
    answers: Vec<(Vec<Vec<String>>, String)>,
) -> JoinHandle<TestResult> {
    let hub = hub.clone();
    tokio::spawn(async move {
        let relay = hub.connect().await?;
        wait_for_request(&hub).await?;
        for (tags, content) in answers {
            relay
                .publish(&signed(&responder, KIND_TEXT_NOTE, tags, &content)?)
                .await?;
        }
        Ok(())
    })
}

#[tokio::test]
async fn untagged_well_formed_response_is_accepted_as_fallback() -> TestResult {
    let hub = MemoryRelayHub::new();
    let responder = Keypair::generate();
    let client = client(&hub).await?;

    let wrong_post = serde_json::to_string(&satoshi())?;
    let empty_text = r#"{"ID":"1110302988","Username":"halfin","Text":""}"#.to_string();
    let right_post = serde_json::to_string(&halfin())?;
    let publisher = answer_when_requested(
        &hub,
        responder.clone(),
        vec![
            (
                vec![vec!["e".to_string(), "0".repeat(64)]],
                wrong_post,
            ),
            (Vec::new(), empty_text),
            (Vec::new(), "not json".to_string()),
            (Vec::new(), right_post),
        ],
    );

    let post = client
        .request_post(
            &responder.public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(5),
        )
        .await?;
    assert_eq!(post.username, "halfin");
    assert_eq!(post.text, "Running bitcoin");
    publisher.await??;
    Ok(())
}

#[tokio::test]
async fn response_tagged_for_another_request_is_never_accepted() -> TestResult {
    let hub = MemoryRelayHub::new();
    let responder = Keypair::generate();
    let client = client(&hub).await?;

    let publisher = answer_when_requested(
        &hub,
        responder.clone(),
        vec![(
            vec![vec!["e".to_string(), "f".repeat(64)]],
            serde_json::to_string(&halfin())?,
        )],
    );

    let result = client
        .request_post(
            &responder.public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_millis(300),
        )
        .await;
    assert!(matches!(result, Err(DvmError::Timeout(_))));
    publisher.await??;
    Ok(())
}

#[tokio::test]
async fn cancellation_is_distinct_from_timeout() -> TestResult {
    let hub = MemoryRelayHub::new();
    let client = client(&hub).await?;
    let cancel = ShutdownSignal::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.trigger();
        })
    };

    let started = Instant::now();
    let result: DvmResult<Post> = client
        .request_job_with_cancel(
            &Keypair::generate().public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(10),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(DvmError::Canceled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(hub.subscription_count().await, 0);
    trigger.await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_stop_is_idempotent() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, Vec::new()).await?;

    let mut stops = Vec::new();
    for _ in 0..8 {
        let dvm = Arc::clone(&running.dvm);
        stops.push(tokio::spawn(async move { dvm.stop() }));
    }
    let mut initiated = 0;
    for stop in stops {
        if stop.await? {
            initiated += 1;
        }
    }
    assert_eq!(initiated, 1);
    assert!(!running.dvm.stop());

    tokio::time::timeout(Duration::from_secs(5), running.task).await???;
    assert_eq!(hub.subscription_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn survives_connection_loss_without_answering_twice() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, vec![halfin(), satoshi()]).await?;
    let client = client(&hub).await?;
    let responder = running.dvm.public_key_hex();

    let first = client
        .request_post(&responder, HALFIN_POST_ID, Duration::from_secs(5))
        .await?;
    assert_eq!(first.username, "halfin");

    hub.break_all_connections().await;
    // The responder notices the lost stream and resubscribes; the earlier request is
    // redelivered but must not be answered again.
    wait_for_subscriptions(&hub, 1).await?;

    let second = client
        .request_post(&responder, "42", Duration::from_secs(5))
        .await?;
    assert_eq!(second.username, "satoshi");

    assert_eq!(responses(&hub.published_events().await).len(), 2);
    assert_eq!(running.fetcher.calls(), 2);
    assert!(hub.connection_count().await >= 4);
    running.stop().await
}

fn request_aged(age_secs: u64) -> Result<Event, BoxError> {
    let template = EventTemplate {
        created_at: unix_now_secs()?.saturating_sub(age_secs),
        kind: KIND_JOB_REQUEST,
        tags: Vec::new(),
        content: HALFIN_POST_ID.to_string(),
    };
    Ok(finalize_event(&template, &Keypair::generate().private_key)?)
}

#[tokio::test]
async fn requests_from_before_startup_are_ignored() -> TestResult {
    let hub = MemoryRelayHub::new();
    let relay = hub.connect().await?;
    relay.publish(&request_aged(120)?).await?;

    let running = start_dvm(&hub, vec![halfin()]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(running.fetcher.calls(), 0);
    running.stop().await
}

#[tokio::test]
async fn resubscribing_never_reaches_back_past_startup() -> TestResult {
    let hub = MemoryRelayHub::new();
    let relay = hub.connect().await?;
    // Inside the resubscribe slack, but older than the responder.
    relay.publish(&request_aged(6)?).await?;

    let running = start_dvm(&hub, vec![halfin()]).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running.fetcher.calls(), 0);

    hub.break_all_connections().await;
    wait_for_subscriptions(&hub, 1).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(running.fetcher.calls(), 0);
    assert!(responses(&hub.published_events().await).is_empty());
    running.stop().await
}

#[tokio::test]
async fn abandoned_request_releases_its_subscription() -> TestResult {
    let hub = MemoryRelayHub::new();
    let client = client(&hub).await?;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        client.request_post(
            &Keypair::generate().public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(10),
        ),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(hub.subscription_requests().await, 1);

    wait_for_subscriptions_closed(&hub).await
}

#[tokio::test]
async fn closed_response_subscription_is_reopened_at_a_steady_pace() -> TestResult {
    let hub = MemoryRelayHub::new();
    let client = client(&hub).await?;
    hub.set_close_subscriptions(true).await;

    let timeout = Duration::from_millis(300);
    let result = client
        .request_post(&Keypair::generate().public_key_hex(), HALFIN_POST_ID, timeout)
        .await;
    assert!(matches!(result, Err(DvmError::Timeout(_))));

    // At most one attempt per retry delay.
    let requests = hub.subscription_requests().await;
    assert!(requests >= 2, "only {requests} subscription requests");
    assert!(requests <= 20, "{requests} subscription requests in {timeout:?}");
    Ok(())
}

#[tokio::test]
async fn responder_reopens_closed_subscription_at_a_steady_pace() -> TestResult {
    let hub = MemoryRelayHub::new();
    let running = start_dvm(&hub, vec![halfin()]).await?;
    let before = hub.subscription_requests().await;

    hub.set_close_subscriptions(true).await;
    hub.break_all_connections().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let requests = hub.subscription_requests().await.saturating_sub(before);
    assert!(requests >= 2, "only {requests} subscription requests");
    assert!(requests <= 20, "{requests} subscription requests in 300ms");

    hub.set_close_subscriptions(false).await;
    wait_for_subscriptions(&hub, 1).await?;
    let client = client(&hub).await?;
    let post = client
        .request_post(
            &running.dvm.public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(5),
        )
        .await?;
    assert_eq!(post.username, "halfin");
    running.stop().await
}

#[tokio::test]
async fn unreachable_relay_cannot_outlast_the_deadline() -> TestResult {
    let hub = MemoryRelayHub::new();
    let slow_retries = RetryPolicy::new(5, Duration::from_secs(1));
    let relay = ManagedRelay::connect("memory://relay", Arc::new(hub.clone()), slow_retries).await?;
    let client = DvmClient::new(Keypair::generate(), Arc::new(relay));
    hub.set_refuse_connections(true).await;
    hub.break_all_connections().await;

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let result = client
        .request_post(&Keypair::generate().public_key_hex(), HALFIN_POST_ID, timeout)
        .await;
    assert!(matches!(result, Err(DvmError::Timeout(limit)) if limit == timeout));
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[tokio::test]
async fn exhausted_request_publish_is_a_transport_error() -> TestResult {
    let hub = MemoryRelayHub::new();
    let client = client(&hub).await?;
    hub.set_drop_publishers(true).await;
    hub.set_refuse_connections(true).await;

    let started = Instant::now();
    let result = client
        .request_post(
            &Keypair::generate().public_key_hex(),
            HALFIN_POST_ID,
            Duration::from_secs(5),
        )
        .await;
    assert!(matches!(
        &result,
        Err(DvmError::Transport(ClientError::RetriesExhausted {
            operation,
            attempts: 3,
            ..
        })) if operation == "publish"
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(hub.subscription_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn exhausted_response_publish_drops_only_that_job() -> TestResult {
    let hub = MemoryRelayHub::new();
    let fetcher =
        FixedFetcher::new(vec![halfin(), satoshi()]).with_outage_on(HALFIN_POST_ID, &hub);
    let running = start_dvm_with(&hub, fetcher).await?;
    let client = client(&hub).await?;
    let responder = running.dvm.public_key_hex();

    let first = client
        .request_post(&responder, HALFIN_POST_ID, Duration::from_millis(500))
        .await;
    assert!(matches!(first, Err(DvmError::Timeout(_))));
    assert!(responses(&hub.published_events().await).is_empty());

    hub.set_drop_publishers(false).await;
    hub.set_refuse_connections(false).await;
    wait_for_subscriptions(&hub, 1).await?;

    let second = client
        .request_post(&responder, "42", Duration::from_secs(5))
        .await?;
    assert_eq!(second.username, "satoshi");
    assert_eq!(running.fetcher.calls(), 2);
    assert_eq!(responses(&hub.published_events().await).len(), 1);
    running.stop().await
}

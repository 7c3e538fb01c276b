//! Post lookup Data Vending Machine over Nostr.
//!
//! - [`Dvm`]: the responder. Listens for job requests, fetches the post, publishes the result.
//! - [`DvmClient`]: the requester. Publishes a request and waits for the correlated response.
//!
//! Wire formats and correlation rules live in [`nostr::dvm`]; relay plumbing lives in
//! [`nostr_client`].

pub mod config;
pub mod error;
pub mod job;
pub mod post;
pub mod post_url;
pub mod requester;
pub mod responder;
pub mod shutdown;
pub mod syndication;

pub use config::{ClientConfig, ConfigError, DvmConfig};
pub use error::{DvmError, Result};
pub use job::{FetchError, JobFetcher, JobOutput};
pub use post::Post;
pub use post_url::{PostUrlError, extract_post_id};
pub use requester::{DvmClient, accept_response};
pub use responder::{Dvm, HandledRequests};
pub use shutdown::ShutdownSignal;
pub use syndication::{SyndicationConfig, SyndicationFetcher};

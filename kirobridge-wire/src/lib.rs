// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `kirobridge` Wire
//!
//! The two protocol clients and their shared plumbing:
//!
//! - **`cbor`**: the minimal binary-envelope codec used by the web portal
//!   RPC protocol (request/response maps only, not a general-purpose CBOR
//!   implementation)
//! - **`portal`**: the usage-query client speaking Smithy RPC-v2 CBOR to
//!   the web portal (usage/limits, user info, token refresh, OAuth code
//!   exchange)
//! - **`assistant`**: the JSON client for the generative-response endpoint,
//!   including the conversation-state folding and the best-effort response
//!   fragment parser
//! - **`retry`**: retry strategy for transient failures
//!
//! Both clients classify backend failures into the [`WireError`] taxonomy;
//! turning `Suspended`/`Unauthorized` into pool bans is the caller's job
//! (the assistant client reports outcomes itself through [`OutcomeSink`]).

pub mod assistant;
pub mod cbor;
pub mod error;
pub mod portal;
pub mod retry;

pub use assistant::{
    parse_response, resolve_model_id, AssistantClient, ChatMessage, ChatRole, GenerateOptions,
    OutcomeSink,
};
pub use cbor::{CborError, Value};
pub use error::WireError;
pub use portal::{MintedCredential, PortalClient, RefreshedTokens, UserInfo};
pub use retry::RetryStrategy;

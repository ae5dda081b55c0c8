//! Docker Registry v2 protocol: auth negotiation, token caching and
//! manifest-digest retrieval.

pub mod auth;
pub mod challenge;
pub mod client;
pub mod library;
pub mod token;

pub use auth::{default_docker_config_path, load_authentications, RegistryAuthEntry};
pub use challenge::{AuthFlow, ChallengeResponse};
pub use client::{ManifestSource, RegistryClient};
pub use library::LibraryHelper;
pub use token::TokenCache;

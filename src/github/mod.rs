//! GitHub integration for the App.
//!
//! This module provides:
//! - JWT generation and installation access token minting
//! - A single-flight cache of installation access tokens
//! - A user-level API client for the OAuth login flow

pub mod api_client;
pub mod token_cache;
pub mod token_manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use api_client::{GitHubClient, GitHubEndpoints};
pub use token_cache::{Clock, InstallationTokenCache, SystemClock};
pub use token_manager::{
    generate_app_jwt, AppCredentials, GitHubTokenIssuer, InstallationToken, TokenError, TokenIssuer,
};

/// REST API version sent with every request
pub const API_VERSION: &str = "2022-11-28";

pub const USER_AGENT: &str = "doghouse";

//! Clients for the Milestone XProtect management server.
//!
//! Two collaborators live here:
//! - [`AuthBroker`]: acquires and caches the OAuth bearer and the
//!   ImageServer session token (SOAP Login)
//! - [`ConfigClient`]: configuration REST calls (camera list, recording
//!   server resolution)

pub mod auth;
pub mod config;
pub mod error;

pub use auth::AuthBroker;
pub use config::ConfigClient;
pub use error::{MilestoneError, MilestoneResult};

use std::time::Duration;

/// Build the shared HTTP client.
///
/// `tls_verify = false` accepts self-signed certificates, which Milestone
/// installations commonly use on internal networks.
pub fn build_http_client(tls_verify: bool) -> MilestoneResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(!tls_verify)
        .build()?;
    Ok(client)
}

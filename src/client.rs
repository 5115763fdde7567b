//! # Remote API Client Module
//!
//! Client HTTP verso il servizio di compressione remoto.
//! Ogni job riceve il proprio `ShrinkRequest` immutabile, costruito all'avvio.

use crate::error::ShrinkError;
use reqwest::{Client, Url};
use std::time::Duration;

/// Basic auth user expected by the service
pub const API_USER: &str = "api";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client bound to one shrink endpoint and credential
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    endpoint: Url,
    api_key: String,
}

/// Request descriptor owned by a single upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkRequest {
    pub url: Url,
    pub username: &'static str,
    pub password: String,
}

impl ApiClient {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, ShrinkError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ShrinkError::Validation(format!("invalid endpoint {}: {}", endpoint, e)))?;

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("tinypng-batch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Build the immutable descriptor for one upload
    pub fn shrink_request(&self) -> ShrinkRequest {
        ShrinkRequest {
            url: self.endpoint.clone(),
            username: API_USER,
            password: self.api_key.clone(),
        }
    }
}

impl ShrinkRequest {
    /// Resolve the `Location` header of a shrink response against the endpoint
    pub fn resolve_location(&self, location: &str) -> Result<Url, ShrinkError> {
        self.url
            .join(location)
            .map_err(|e| ShrinkError::Protocol(format!("invalid result location {}: {}", location, e)))
    }
}

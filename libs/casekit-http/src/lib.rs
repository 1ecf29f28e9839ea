#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client infrastructure for the case vault crates.
//!
//! A hyper-based client with:
//! - TLS via rustls (HTTPS only by default)
//! - Connection pooling
//! - A per-request timeout
//! - A size limit on buffered response bodies
//!
//! # Example
//!
//! ```ignore
//! use casekit_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let data: MyData = client
//!     .post("https://api.dropboxapi.com/2/users/get_current_account")
//!     .bearer("sl.token")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod client;
mod config;
mod error;
mod request;
mod response;
mod tls;

pub use client::{HttpClient, HttpClientBuilder};
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use error::{HttpError, InvalidUriKind};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, parse_retry_after};

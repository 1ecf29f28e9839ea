#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Credential lifecycle for the storage gateway.
//!
//! The [`CredentialBroker`] owns the single current bearer credential. It
//! seeds itself from a [`TokenStore`], refreshes through an ordered list of
//! [`CredentialSource`]s when the credential nears expiry, and guarantees
//! that concurrent callers share one refresh.

pub mod broker;
pub mod config;
pub mod credential;
pub mod error;
pub mod flow;
pub(crate) mod http_error;
pub mod source;
pub mod store;

pub use broker::{BrokerState, Clock, CredentialBroker, CredentialBrokerBuilder};
pub use config::{AuthConfig, ConnectorConfig, OAuthConfig};
pub use credential::Credential;
pub use error::AuthError;
pub use flow::OAuthFlow;
pub use source::{ConnectorSource, CredentialSource, OAuthRefreshSource};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};

pub use casekit_utils::SecretString;

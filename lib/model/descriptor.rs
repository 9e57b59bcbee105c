//! The registry endpoint type, plus re-exports of the OCI descriptor primitives used
//! throughout the crate so callers need not depend on `oci_spec` directly.

use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};

pub use oci_spec::image::{Descriptor, Digest, DigestAlgorithm, Platform};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Credentials used to authenticate against a [`RegistryEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    /// The basic-auth username.
    pub username: String,
    /// The basic-auth password or token.
    pub secret: String,
}

/// A registry a [`crate::registry::RegistryClient`] is instantiated against.
#[derive(Debug, Clone, Getters, Setters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct RegistryEndpoint {
    /// The registry's base URL, e.g. `https://registry.example.com`.
    base_url: String,

    /// Basic-auth credentials, if the registry requires authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<RegistryCredentials>,

    /// Whether to accept a self-signed or otherwise unverifiable TLS certificate.
    #[serde(default)]
    insecure_tls: bool,

    /// An optional cap on outbound requests per second to this endpoint. `None` or
    /// a non-positive value disables rate limiting.
    #[serde(default)]
    qps: Option<u32>,
}

impl RegistryEndpoint {
    /// Constructs a new endpoint with no credentials and no rate limit.
    pub fn new(base_url: impl Into<String>) -> Self {
        RegistryEndpoint {
            base_url: base_url.into(),
            credentials: None,
            insecure_tls: false,
            qps: None,
        }
    }
}

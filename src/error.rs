//! Pipeline errors
//!
//! Every variant is fatal. Caller bugs are not reported here; they panic.

use crate::cluster::FetchError;
use crate::identity::GenerationError;
use crate::tls::TlsError;

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("failed to read cluster state: {0}")]
    Fetch(#[from] FetchError),

    #[error("control plane already installed in namespace {0}; use `meshctl upgrade` instead")]
    AlreadyInstalled(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid trust anchors: {0}")]
    MalformedTrustAnchors(#[source] TlsError),

    #[error("invalid issuer credentials: {0}")]
    MalformedIssuerCredential(#[source] TlsError),

    #[error("issuer credentials are not valid for the trust anchors: {0}")]
    InvalidIssuerCredential(#[source] TlsError),

    #[error("failed to generate identity: {0}")]
    Generation(#[from] GenerationError),
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

//! Mesh identity reconciliation
//!
//! A control plane that already has an identity keeps it: the stored
//! trust anchors and the issuer credential in the issuer secret are read
//! back, checked, and passed through unchanged. A new identity is only
//! generated when the stored configuration has none. Rotating a working
//! identity would break every proxy that trusts the old anchors.

pub mod generate;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{
    ClusterStore, ISSUER_CRT_NAME, ISSUER_KEY_NAME, ISSUER_SECRET_NAME,
};
use crate::error::{Result, UpgradeError};
use crate::model::IdentityContext;
use crate::options::IdentityOptions;
use crate::tls::{self, Cred};

pub use generate::{
    GeneratedIdentity, GenerationError, GenerationRequest, IdentityGenerator,
    RcgenIdentityGenerator,
};

/// The issuer's private key and certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerCredential {
    pub key_pem: String,
    pub crt_pem: String,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    Reused,
    Generated,
}

/// A complete identity ready to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// Replicas of the identity component
    pub replicas: u32,
    pub trust_domain: String,
    pub trust_anchors_pem: String,
    pub issuance_lifetime: Duration,
    pub clock_skew_allowance: Duration,
    pub issuer: IssuerCredential,
    pub origin: IdentityOrigin,
}

impl ResolvedIdentity {
    pub fn to_identity_context(&self) -> IdentityContext {
        IdentityContext {
            trust_domain: self.trust_domain.clone(),
            trust_anchors_pem: self.trust_anchors_pem.clone(),
            issuance_lifetime: self.issuance_lifetime,
            clock_skew_allowance: self.clock_skew_allowance,
        }
    }
}

/// The stored identity, if it is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Absent,
    Present(ExistingIdentity),
}

/// A stored identity context with both a trust domain and trust anchors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingIdentity {
    trust_domain: String,
    trust_anchors_pem: String,
    issuance_lifetime: Duration,
    clock_skew_allowance: Duration,
}

impl ExistingIdentity {
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    pub fn trust_anchors_pem(&self) -> &str {
        &self.trust_anchors_pem
    }
}

impl Identity {
    /// Classify a stored identity context.
    ///
    /// A context missing either the trust domain or the trust anchors was
    /// written by a version without identity support and counts as absent.
    pub fn from_context(context: Option<&IdentityContext>) -> Self {
        match context {
            Some(ctx) if !ctx.trust_domain.is_empty() && !ctx.trust_anchors_pem.is_empty() => {
                Identity::Present(ExistingIdentity {
                    trust_domain: ctx.trust_domain.clone(),
                    trust_anchors_pem: ctx.trust_anchors_pem.clone(),
                    issuance_lifetime: ctx.issuance_lifetime,
                    clock_skew_allowance: ctx.clock_skew_allowance,
                })
            }
            _ => Identity::Absent,
        }
    }
}

pub struct IdentityReconciler<'a> {
    cluster: &'a dyn ClusterStore,
    generator: &'a dyn IdentityGenerator,
    namespace: &'a str,
}

impl<'a> IdentityReconciler<'a> {
    pub fn new(
        cluster: &'a dyn ClusterStore,
        generator: &'a dyn IdentityGenerator,
        namespace: &'a str,
    ) -> Self {
        Self {
            cluster,
            generator,
            namespace,
        }
    }

    /// Reuse the existing identity or generate a new one.
    pub async fn reconcile(
        &self,
        identity: Identity,
        options: &IdentityOptions,
        replicas: u32,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity> {
        match identity {
            Identity::Absent => {
                info!(namespace = %self.namespace, "No identity configured, generating one");
                self.generate(options, replicas, now)
            }
            Identity::Present(existing) => {
                let issuer = self.fetch_issuer(&existing, now).await?;
                info!(
                    trust_domain = %existing.trust_domain,
                    issuer_expiry = %issuer.not_after,
                    "Reusing existing identity"
                );
                Ok(ResolvedIdentity {
                    replicas,
                    trust_domain: existing.trust_domain,
                    trust_anchors_pem: existing.trust_anchors_pem,
                    issuance_lifetime: existing.issuance_lifetime,
                    clock_skew_allowance: existing.clock_skew_allowance,
                    issuer,
                    origin: IdentityOrigin::Reused,
                })
            }
        }
    }

    fn generate(
        &self,
        options: &IdentityOptions,
        replicas: u32,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity> {
        let request = GenerationRequest {
            namespace: self.namespace.to_string(),
            trust_domain: options.trust_domain.clone(),
            issuer_lifetime: options.issuer_lifetime,
            anchor_lifetime: options.anchor_lifetime,
            clock_skew_allowance: options.clock_skew_allowance,
            now,
        };
        let generated = self.generator.generate(&request)?;

        Ok(ResolvedIdentity {
            replicas,
            trust_domain: options.trust_domain.clone(),
            trust_anchors_pem: generated.trust_anchors_pem,
            issuance_lifetime: options.issuance_lifetime,
            clock_skew_allowance: options.clock_skew_allowance,
            issuer: generated.issuer,
            origin: IdentityOrigin::Generated,
        })
    }

    /// Read the issuer secret and check it against the stored anchors.
    async fn fetch_issuer(
        &self,
        existing: &ExistingIdentity,
        now: DateTime<Utc>,
    ) -> Result<IssuerCredential> {
        let roots = tls::decode_pem_cert_pool(&existing.trust_anchors_pem)
            .map_err(UpgradeError::MalformedTrustAnchors)?;
        debug!(anchors = roots.len(), "Decoded trust anchors");

        let secret = self.cluster.secret(self.namespace, ISSUER_SECRET_NAME).await?;
        let field = |name: &str| {
            secret
                .get(name)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };
        let key_pem = field(ISSUER_KEY_NAME);
        let crt_pem = field(ISSUER_CRT_NAME);

        let key = tls::decode_pem_key(&key_pem).map_err(UpgradeError::MalformedIssuerCredential)?;
        let crt = tls::decode_pem_crt(&crt_pem).map_err(UpgradeError::MalformedIssuerCredential)?;
        let not_after = crt.not_after;

        Cred::new(key, crt)
            .verify(&roots, now)
            .map_err(UpgradeError::InvalidIssuerCredential)?;

        Ok(IssuerCredential {
            key_pem,
            crt_pem,
            not_after,
        })
    }
}

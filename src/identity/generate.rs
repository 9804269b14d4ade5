//! Identity generation
//!
//! Creates a fresh trust anchor and an issuer certificate signed by it.
//! Only used when the stored configuration has no usable identity.

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::time::Duration;
use tracing::info;

use super::IssuerCredential;
use crate::tls::{self, TlsError};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("lifetime {0:?} is out of range")]
    LifetimeOutOfRange(Duration),

    #[error("failed to generate key: {0}")]
    Key(String),

    #[error("failed to sign certificate: {0}")]
    Certificate(String),

    #[error("generated certificate is unreadable: {0}")]
    Decode(#[from] TlsError),
}

/// Inputs for a new identity
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub namespace: String,
    pub trust_domain: String,
    pub issuer_lifetime: Duration,
    pub anchor_lifetime: Duration,
    pub clock_skew_allowance: Duration,
    pub now: DateTime<Utc>,
}

/// A freshly generated trust anchor and issuer
#[derive(Debug, Clone)]
pub struct GeneratedIdentity {
    pub trust_anchors_pem: String,
    pub issuer: IssuerCredential,
}

pub trait IdentityGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedIdentity, GenerationError>;
}

/// Generates ECDSA P-256 credentials with rcgen
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenIdentityGenerator;

impl RcgenIdentityGenerator {
    fn params(
        common_name: String,
        path_len: BasicConstraints,
        not_before: DateTime<Utc>,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Result<CertificateParams, GenerationError> {
        let not_after = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(GenerationError::LifetimeOutOfRange(lifetime))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(path_len);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = offset(not_before, lifetime)?;
        params.not_after = offset(not_after, lifetime)?;
        Ok(params)
    }
}

impl IdentityGenerator for RcgenIdentityGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedIdentity, GenerationError> {
        let skew = chrono::Duration::from_std(request.clock_skew_allowance)
            .map_err(|_| GenerationError::LifetimeOutOfRange(request.clock_skew_allowance))?;
        let not_before = request.now - skew;

        let anchor_key = KeyPair::generate().map_err(|e| GenerationError::Key(e.to_string()))?;
        let anchor = Self::params(
            format!("root.{}", request.trust_domain),
            BasicConstraints::Unconstrained,
            not_before,
            request.anchor_lifetime,
            request.now,
        )?
        .self_signed(&anchor_key)
        .map_err(|e| GenerationError::Certificate(e.to_string()))?;

        let issuer_key = KeyPair::generate().map_err(|e| GenerationError::Key(e.to_string()))?;
        let issuer = Self::params(
            format!("identity.{}.{}", request.namespace, request.trust_domain),
            BasicConstraints::Constrained(0),
            not_before,
            request.issuer_lifetime,
            request.now,
        )?
        .signed_by(&issuer_key, &anchor, &anchor_key)
        .map_err(|e| GenerationError::Certificate(e.to_string()))?;

        let crt_pem = issuer.pem();
        let not_after = tls::decode_pem_crt(&crt_pem)?.not_after;

        info!(
            trust_domain = %request.trust_domain,
            issuer_expiry = %not_after,
            "Generated new trust anchor and issuer"
        );

        Ok(GeneratedIdentity {
            trust_anchors_pem: anchor.pem(),
            issuer: IssuerCredential {
                key_pem: issuer_key.serialize_pem(),
                crt_pem,
                not_after,
            },
        })
    }
}

fn offset(at: DateTime<Utc>, lifetime: Duration) -> Result<time::OffsetDateTime, GenerationError> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|_| GenerationError::LifetimeOutOfRange(lifetime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{decode_pem_cert_pool, decode_pem_key, Cred};

    fn request(now: DateTime<Utc>) -> GenerationRequest {
        GenerationRequest {
            namespace: "mesh-system".to_string(),
            trust_domain: "cluster.local".to_string(),
            issuer_lifetime: Duration::from_secs(8760 * 3600),
            anchor_lifetime: Duration::from_secs(87600 * 3600),
            clock_skew_allowance: Duration::from_secs(20),
            now,
        }
    }

    #[test]
    fn test_generated_issuer_verifies_against_anchor() {
        let now = Utc::now();
        let generated = RcgenIdentityGenerator.generate(&request(now)).unwrap();

        let roots = decode_pem_cert_pool(&generated.trust_anchors_pem).unwrap();
        let crt = tls::decode_pem_crt(&generated.issuer.crt_pem).unwrap();
        let key = decode_pem_key(&generated.issuer.key_pem).unwrap();
        assert_eq!(Cred::new(key, crt).verify(&roots, now), Ok(()));
    }

    #[test]
    fn test_issuer_expiry_follows_lifetime() {
        let now = Utc::now();
        let generated = RcgenIdentityGenerator.generate(&request(now)).unwrap();

        let expected = now + chrono::Duration::hours(8760);
        let drift = (generated.issuer.not_after - expected).num_seconds().abs();
        assert!(drift <= 1, "issuer expiry drifted by {}s", drift);
    }

    #[test]
    fn test_backdated_by_clock_skew() {
        let now = Utc::now();
        let generated = RcgenIdentityGenerator.generate(&request(now)).unwrap();

        let crt = tls::decode_pem_crt(&generated.issuer.crt_pem).unwrap();
        let skewed = now - chrono::Duration::seconds(20);
        assert!((crt.not_before - skewed).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_each_run_is_distinct() {
        let now = Utc::now();
        let first = RcgenIdentityGenerator.generate(&request(now)).unwrap();
        let second = RcgenIdentityGenerator.generate(&request(now)).unwrap();

        assert_ne!(first.issuer.key_pem, second.issuer.key_pem);
        assert_ne!(first.issuer.crt_pem, second.issuer.crt_pem);
        assert_ne!(first.trust_anchors_pem, second.trust_anchors_pem);
    }

    #[test]
    fn test_lifetime_out_of_range() {
        let mut req = request(Utc::now());
        req.issuer_lifetime = Duration::from_secs(u64::MAX);
        assert!(matches!(
            RcgenIdentityGenerator.generate(&req),
            Err(GenerationError::LifetimeOutOfRange(_))
        ));
    }
}

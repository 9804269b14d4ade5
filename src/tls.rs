//! PEM decoding and issuer credential verification
//!
//! Verification mirrors what a proxy does when it trusts an issuer: the
//! certificate must be inside its validity window and be signed by a trust
//! anchor that is itself a CA and currently valid. There is no hostname check; issuer certificates
//! name a service identity, not a host.

use chrono::{DateTime, Utc};
use rcgen::KeyPair;
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsError {
    #[error("no PEM certificates found")]
    NoCertificates,

    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("invalid private key: {0}")]
    PrivateKey(String),

    #[error("certificate expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("certificate is not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("trust anchor expired at {0}")]
    AnchorExpired(DateTime<Utc>),

    #[error("trust anchor is not valid before {0}")]
    AnchorNotYetValid(DateTime<Utc>),

    #[error("trust anchor is not a CA certificate")]
    AnchorNotCa,

    #[error("certificate is not signed by any trust anchor")]
    UnknownIssuer,

    #[error("private key does not match the certificate")]
    KeyMismatch,
}

/// A set of trust anchors, kept as DER
#[derive(Debug, Clone, Default)]
pub struct CertPool {
    anchors: Vec<Vec<u8>>,
}

impl CertPool {
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// A parsed certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crt {
    der: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Crt {
    fn from_der(der: Vec<u8>) -> Result<Self, TlsError> {
        let (not_before, not_after) = {
            let cert = parse(&der)?;
            let validity = cert.validity();
            (
                timestamp(validity.not_before.timestamp())?,
                timestamp(validity.not_after.timestamp())?,
            )
        };
        Ok(Self {
            der,
            not_before,
            not_after,
        })
    }
}

/// Decode every certificate in a PEM bundle.
pub fn decode_pem_cert_pool(pem: &str) -> Result<CertPool, TlsError> {
    let mut anchors = Vec::new();
    for block in Pem::iter_from_buffer(pem.as_bytes()) {
        let block = block.map_err(|e| TlsError::Pem(e.to_string()))?;
        if block.label != CERTIFICATE_LABEL {
            continue;
        }
        parse(&block.contents)?;
        anchors.push(block.contents);
    }

    if anchors.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(CertPool { anchors })
}

/// Decode the first certificate of a PEM block sequence.
pub fn decode_pem_crt(pem: &str) -> Result<Crt, TlsError> {
    for block in Pem::iter_from_buffer(pem.as_bytes()) {
        let block = block.map_err(|e| TlsError::Pem(e.to_string()))?;
        if block.label == CERTIFICATE_LABEL {
            return Crt::from_der(block.contents);
        }
    }
    Err(TlsError::NoCertificates)
}

/// Decode a PKCS#8 private key.
pub fn decode_pem_key(pem: &str) -> Result<KeyPair, TlsError> {
    KeyPair::from_pem(pem).map_err(|e| TlsError::PrivateKey(e.to_string()))
}

/// A private key and its certificate
pub struct Cred {
    pub key: KeyPair,
    pub crt: Crt,
}

impl Cred {
    pub fn new(key: KeyPair, crt: Crt) -> Self {
        Self { key, crt }
    }

    /// Check the credential against `roots` at time `now`.
    pub fn verify(&self, roots: &CertPool, now: DateTime<Utc>) -> Result<(), TlsError> {
        let crt = parse(&self.crt.der)?;

        if crt.public_key().subject_public_key.data.as_ref() != self.key.public_key_raw() {
            return Err(TlsError::KeyMismatch);
        }

        if now < self.crt.not_before {
            return Err(TlsError::NotYetValid(self.crt.not_before));
        }
        if now > self.crt.not_after {
            return Err(TlsError::Expired(self.crt.not_after));
        }

        // Another anchor with the same key may still vouch for the issuer,
        // so a rejected anchor is only reported once none is usable.
        let mut rejected = None;
        for der in &roots.anchors {
            let anchor = parse(der)?;
            if crt.verify_signature(Some(anchor.public_key())).is_err() {
                continue;
            }
            match check_anchor(&anchor, now) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    rejected.get_or_insert(e);
                }
            }
        }

        Err(rejected.unwrap_or(TlsError::UnknownIssuer))
    }
}

/// An anchor must be a CA and inside its own validity window.
fn check_anchor(anchor: &X509Certificate<'_>, now: DateTime<Utc>) -> Result<(), TlsError> {
    match anchor.basic_constraints() {
        Ok(Some(constraints)) if constraints.value.ca => {}
        _ => return Err(TlsError::AnchorNotCa),
    }

    let not_before = timestamp(anchor.validity().not_before.timestamp())?;
    if now < not_before {
        return Err(TlsError::AnchorNotYetValid(not_before));
    }
    let not_after = timestamp(anchor.validity().not_after.timestamp())?;
    if now > not_after {
        return Err(TlsError::AnchorExpired(not_after));
    }
    Ok(())
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, TlsError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| TlsError::Certificate(e.to_string()))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TlsError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TlsError::Certificate(format!("timestamp {} out of range", secs)))
}

//! Issuing and checking signed deletion certificates.

use chrono::{Duration, SecondsFormat, Utc};
use common::certificate::{DeletionCertificate, DeletionCounts, DeletionMethod, VerificationStatus};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{hmac_sha256, hmac_sha256_verify};

/// Signs certificates with HMAC-SHA256 under a dedicated secret.
pub struct CertificateSigner {
    key: Zeroizing<Vec<u8>>,
    validity: Duration,
}

impl CertificateSigner {
    pub fn new(secret: &[u8], validity_days: i64) -> Self {
        Self {
            key: Zeroizing::new(secret.to_vec()),
            validity: Duration::days(validity_days),
        }
    }

    /// Build and sign a certificate valid from now for the configured window.
    pub fn issue(
        &self,
        tenant_id: &str,
        deletion_request_id: Uuid,
        subject_ids: Vec<String>,
        method: DeletionMethod,
        counts: DeletionCounts,
        verification: VerificationStatus,
    ) -> DeletionCertificate {
        let issued_at = Utc::now();
        let mut certificate = DeletionCertificate {
            certificate_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_owned(),
            deletion_request_id,
            subject_ids,
            method,
            counts,
            verification,
            issued_at,
            valid_until: issued_at + self.validity,
            signature: String::new(),
        };
        certificate.signature =
            hex::encode(hmac_sha256(&self.key, &[&canonical_bytes(&certificate)]));
        certificate
    }

    /// Whether `certificate` carries a valid signature from this signer.
    pub fn verify(&self, certificate: &DeletionCertificate) -> bool {
        match hex::decode(&certificate.signature) {
            Ok(sig) => hmac_sha256_verify(&self.key, &[&canonical_bytes(certificate)], &sig),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for CertificateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateSigner")
            .field("validity_days", &self.validity.num_days())
            .finish_non_exhaustive()
    }
}

/// Length-prefixed encoding of every field except the signature.
fn canonical_bytes(c: &DeletionCertificate) -> Vec<u8> {
    let mut out = Vec::new();
    let mut field = |bytes: &[u8]| {
        out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
        out.extend_from_slice(bytes);
    };

    field(c.certificate_id.as_bytes());
    field(c.tenant_id.as_bytes());
    field(c.deletion_request_id.as_bytes());
    field(&(c.subject_ids.len() as u64).to_be_bytes());
    for subject in &c.subject_ids {
        field(subject.as_bytes());
    }
    field(method_label(c.method).as_bytes());
    field(&(c.counts.processed as u64).to_be_bytes());
    field(&(c.counts.deleted as u64).to_be_bytes());
    field(&(c.counts.failed as u64).to_be_bytes());
    field(verification_label(c.verification).as_bytes());
    field(c.issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    field(c.valid_until.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    out
}

pub(crate) fn verification_label(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Verified => "verified",
        VerificationStatus::Partial => "partial",
    }
}

pub(crate) fn method_label(method: DeletionMethod) -> &'static str {
    match method {
        DeletionMethod::CryptoShred => "crypto_shred",
        DeletionMethod::SecureOverwrite => "secure_overwrite",
        DeletionMethod::Hybrid => "hybrid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(signer: &CertificateSigner) -> DeletionCertificate {
        signer.issue(
            "acme",
            Uuid::new_v4(),
            vec!["c-1".into(), "c-2".into()],
            DeletionMethod::CryptoShred,
            DeletionCounts {
                processed: 2,
                deleted: 2,
                failed: 0,
            },
            VerificationStatus::Verified,
        )
    }

    #[test]
    fn issued_certificate_verifies() {
        let signer = CertificateSigner::new(b"certificate-secret", 2557);
        let cert = issue(&signer);
        assert_eq!(cert.signature.len(), 64);
        assert!(signer.verify(&cert));
        assert_eq!((cert.valid_until - cert.issued_at).num_days(), 2557);
    }

    #[test]
    fn any_edit_invalidates_signature() {
        let signer = CertificateSigner::new(b"certificate-secret", 30);
        let cert = issue(&signer);

        let mut edited = cert.clone();
        edited.verification = VerificationStatus::Partial;
        assert!(!signer.verify(&edited));

        let mut edited = cert.clone();
        edited.subject_ids.pop();
        assert!(!signer.verify(&edited));

        let mut edited = cert.clone();
        edited.valid_until += Duration::days(1);
        assert!(!signer.verify(&edited));

        let mut edited = cert;
        edited.signature = "zz".into();
        assert!(!signer.verify(&edited));
    }

    #[test]
    fn other_secret_rejects() {
        let cert = issue(&CertificateSigner::new(b"one", 30));
        assert!(!CertificateSigner::new(b"two", 30).verify(&cert));
    }
}

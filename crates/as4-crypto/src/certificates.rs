//! Certificate material and the trust store seam.
//!
//! Certificates are held as RSA key pairs with X.509-style identity fields;
//! PEM/DER loading lives at the deployment edge and is out of scope here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use as4_core::security::SecurityTokenReference;

use crate::error::CryptoError;

/// One certificate entry: identity fields plus the RSA key pair. The private
/// half is present only for locally held identities.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub alias: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub public_key: RsaPublicKey,
    pub private_key: Option<RsaPrivateKey>,
}

impl Certificate {
    pub fn new(
        alias: impl Into<String>,
        subject: impl Into<String>,
        issuer: impl Into<String>,
        serial: impl Into<String>,
        public_key: RsaPublicKey,
    ) -> Self {
        Self {
            alias: alias.into(),
            subject: subject.into(),
            issuer: issuer.into(),
            serial: serial.into(),
            public_key,
            private_key: None,
        }
    }

    pub fn with_private_key(mut self, private_key: RsaPrivateKey) -> Self {
        self.private_key = Some(private_key);
        self
    }

    pub fn private_key(&self) -> Result<&RsaPrivateKey, CryptoError> {
        self.private_key
            .as_ref()
            .ok_or_else(|| CryptoError::MissingPrivateKey(self.alias.clone()))
    }

    /// DER encoding of the public key, used as the BinarySecurityToken body.
    pub fn token_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.public_key
            .to_pkcs1_der()
            .map(|der| der.as_bytes().to_vec())
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// SHA-256 key identifier over the DER public key.
    pub fn key_identifier(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(Sha256::digest(self.token_der()?).to_vec())
    }

    /// Builds the token reference of the requested style for this certificate.
    pub fn token_reference(
        &self,
        style: TokenReferenceStyle,
    ) -> Result<SecurityTokenReference, CryptoError> {
        match style {
            TokenReferenceStyle::BinarySecurityToken => {
                Ok(SecurityTokenReference::BinarySecurityToken {
                    token_b64: BASE64.encode(self.token_der()?),
                })
            }
            TokenReferenceStyle::IssuerSerial => Ok(SecurityTokenReference::IssuerSerial {
                issuer: self.issuer.clone(),
                serial: self.serial.clone(),
            }),
            TokenReferenceStyle::KeyIdentifier => Ok(SecurityTokenReference::KeyIdentifier {
                identifier_b64: BASE64.encode(self.key_identifier()?),
            }),
        }
    }
}

/// How the sender points the receiver at its certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenReferenceStyle {
    #[default]
    BinarySecurityToken,
    IssuerSerial,
    KeyIdentifier,
}

/// Lookup and trust decisions over installed certificates.
pub trait CertificateRepository {
    /// Certificate by local alias.
    fn find(&self, alias: &str) -> Option<&Certificate>;
    /// Certificate matching a token reference received on the wire.
    fn resolve(&self, reference: &SecurityTokenReference) -> Option<&Certificate>;
    /// Whether the certificate chains to an installed trust anchor.
    fn is_trusted(&self, certificate: &Certificate) -> bool;
}

/// Flat in-memory store; trust is an explicit per-alias flag.
#[derive(Debug, Default)]
pub struct InMemoryCertificateRepository {
    certificates: Vec<Certificate>,
    trusted: Vec<String>,
}

impl InMemoryCertificateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, certificate: Certificate, trusted: bool) {
        if trusted {
            self.trusted.push(certificate.alias.clone());
        }
        self.certificates.push(certificate);
    }
}

impl CertificateRepository for InMemoryCertificateRepository {
    fn find(&self, alias: &str) -> Option<&Certificate> {
        self.certificates.iter().find(|c| c.alias == alias)
    }

    fn resolve(&self, reference: &SecurityTokenReference) -> Option<&Certificate> {
        self.certificates.iter().find(|candidate| {
            match reference {
                SecurityTokenReference::BinarySecurityToken { token_b64 } => candidate
                    .token_der()
                    .is_ok_and(|der| BASE64.encode(der) == *token_b64),
                SecurityTokenReference::IssuerSerial { issuer, serial } => {
                    candidate.issuer == *issuer && candidate.serial == *serial
                }
                SecurityTokenReference::KeyIdentifier { identifier_b64 } => candidate
                    .key_identifier()
                    .is_ok_and(|id| BASE64.encode(id) == *identifier_b64),
            }
        })
    }

    fn is_trusted(&self, certificate: &Certificate) -> bool {
        self.trusted.iter().any(|alias| *alias == certificate.alias)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Certificate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rsa::RsaPrivateKey;

    /// Deterministic key pair for tests; 1024 bits keeps generation fast.
    pub fn certificate(alias: &str, seed: u64) -> Certificate {
        let mut rng = StdRng::seed_from_u64(seed);
        let private_key =
            RsaPrivateKey::new(&mut rng, 1024).expect("test key generation should work");
        let public_key = private_key.to_public_key();
        Certificate::new(
            alias,
            format!("CN={alias}"),
            "CN=test-ca",
            format!("{seed}"),
            public_key,
        )
        .with_private_key(private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::certificate;
    use super::{CertificateRepository, InMemoryCertificateRepository, TokenReferenceStyle};

    #[test]
    fn resolves_by_every_reference_style() {
        let cert = certificate("gw-a", 1);
        let mut repo = InMemoryCertificateRepository::new();
        repo.install(cert.clone(), true);

        for style in [
            TokenReferenceStyle::BinarySecurityToken,
            TokenReferenceStyle::IssuerSerial,
            TokenReferenceStyle::KeyIdentifier,
        ] {
            let reference = cert.token_reference(style).expect("reference should build");
            let found = repo.resolve(&reference).expect("certificate should resolve");
            assert_eq!(found.alias, "gw-a");
        }
    }

    #[test]
    fn trust_is_per_alias() {
        let mut repo = InMemoryCertificateRepository::new();
        repo.install(certificate("trusted", 2), true);
        repo.install(certificate("stranger", 3), false);

        let trusted = repo.find("trusted").expect("installed");
        let stranger = repo.find("stranger").expect("installed");
        assert!(repo.is_trusted(trusted));
        assert!(!repo.is_trusted(stranger));
    }

    #[test]
    fn unknown_reference_does_not_resolve() {
        let repo = InMemoryCertificateRepository::new();
        let reference = certificate("ghost", 4)
            .token_reference(TokenReferenceStyle::IssuerSerial)
            .expect("reference should build");
        assert!(repo.resolve(&reference).is_none());
    }
}

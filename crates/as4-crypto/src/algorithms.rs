//! Algorithm URI registry and symmetric cipher dispatch.
//!
//! Every algorithm is addressed by its XML-DSig/XML-ENC URI; an unknown URI
//! is rejected up front rather than silently downgraded.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{CryptoRng, RngCore};

use crate::error::CryptoError;

/// RSA-SHA256 signature method.
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// SHA-256 digest method.
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// Exclusive canonicalization.
pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// SwA transform: the signed octets of an attachment reference are its raw
/// content bytes.
pub const ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Content-Signature-Transform";

/// RSA-OAEP (MGF1 with SHA-1 mask, SHA-256 digest) key transport.
pub const RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

pub const AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const AES192_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes192-gcm";
pub const AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";
pub const AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const TRIPLEDES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";

type Aes192Gcm = AesGcm<aes::Aes192, U12>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TdesCbcEnc = cbc::Encryptor<des::TdesEde3>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;

/// Symmetric data-encryption algorithms addressable from an EncryptedData
/// EncryptionMethod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricCipher {
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    Aes128Cbc,
    Aes256Cbc,
    TripleDesCbc,
}

impl SymmetricCipher {
    pub fn from_uri(uri: &str) -> Result<Self, CryptoError> {
        match uri {
            AES128_GCM => Ok(SymmetricCipher::Aes128Gcm),
            AES192_GCM => Ok(SymmetricCipher::Aes192Gcm),
            AES256_GCM => Ok(SymmetricCipher::Aes256Gcm),
            AES128_CBC => Ok(SymmetricCipher::Aes128Cbc),
            AES256_CBC => Ok(SymmetricCipher::Aes256Cbc),
            TRIPLEDES_CBC => Ok(SymmetricCipher::TripleDesCbc),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            SymmetricCipher::Aes128Gcm => AES128_GCM,
            SymmetricCipher::Aes192Gcm => AES192_GCM,
            SymmetricCipher::Aes256Gcm => AES256_GCM,
            SymmetricCipher::Aes128Cbc => AES128_CBC,
            SymmetricCipher::Aes256Cbc => AES256_CBC,
            SymmetricCipher::TripleDesCbc => TRIPLEDES_CBC,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            SymmetricCipher::Aes128Gcm | SymmetricCipher::Aes128Cbc => 16,
            SymmetricCipher::Aes192Gcm | SymmetricCipher::TripleDesCbc => 24,
            SymmetricCipher::Aes256Gcm | SymmetricCipher::Aes256Cbc => 32,
        }
    }

    /// IV length per the XML-ENC profile of each algorithm.
    pub fn iv_len(self) -> usize {
        match self {
            SymmetricCipher::Aes128Gcm
            | SymmetricCipher::Aes192Gcm
            | SymmetricCipher::Aes256Gcm => 12,
            SymmetricCipher::Aes128Cbc | SymmetricCipher::Aes256Cbc => 16,
            SymmetricCipher::TripleDesCbc => 8,
        }
    }

    pub fn generate_key(self, rng: &mut (impl RngCore + CryptoRng)) -> Vec<u8> {
        let mut key = vec![0_u8; self.key_len()];
        rng.fill_bytes(&mut key);
        key
    }

    pub fn generate_iv(self, rng: &mut (impl RngCore + CryptoRng)) -> Vec<u8> {
        let mut iv = vec![0_u8; self.iv_len()];
        rng.fill_bytes(&mut iv);
        iv
    }

    /// Encrypts `plaintext` and returns the XML-ENC wire form: IV followed
    /// by ciphertext (and GCM tag where applicable).
    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if key.len() != self.key_len() || iv.len() != self.iv_len() {
            return Err(CryptoError::EncryptionFailed);
        }
        let body = match self {
            SymmetricCipher::Aes128Gcm => aead_encrypt::<Aes128Gcm>(key, iv, plaintext)?,
            SymmetricCipher::Aes192Gcm => aead_encrypt::<Aes192Gcm>(key, iv, plaintext)?,
            SymmetricCipher::Aes256Gcm => aead_encrypt::<Aes256Gcm>(key, iv, plaintext)?,
            SymmetricCipher::Aes128Cbc => Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::EncryptionFailed)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            SymmetricCipher::Aes256Cbc => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::EncryptionFailed)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            SymmetricCipher::TripleDesCbc => TdesCbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::EncryptionFailed)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };
        let mut out = Vec::with_capacity(iv.len() + body.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decrypts the IV-prefixed wire form produced by [`Self::encrypt`].
    pub fn decrypt(self, key: &[u8], wire: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if key.len() != self.key_len() || wire.len() < self.iv_len() {
            return Err(CryptoError::DecryptionFailed);
        }
        let (iv, body) = wire.split_at(self.iv_len());
        match self {
            SymmetricCipher::Aes128Gcm => aead_decrypt::<Aes128Gcm>(key, iv, body),
            SymmetricCipher::Aes192Gcm => aead_decrypt::<Aes192Gcm>(key, iv, body),
            SymmetricCipher::Aes256Gcm => aead_decrypt::<Aes256Gcm>(key, iv, body),
            SymmetricCipher::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::DecryptionFailed)?
                .decrypt_padded_vec_mut::<Pkcs7>(body)
                .map_err(|_| CryptoError::DecryptionFailed),
            SymmetricCipher::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::DecryptionFailed)?
                .decrypt_padded_vec_mut::<Pkcs7>(body)
                .map_err(|_| CryptoError::DecryptionFailed),
            SymmetricCipher::TripleDesCbc => TdesCbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::DecryptionFailed)?
                .decrypt_padded_vec_mut::<Pkcs7>(body)
                .map_err(|_| CryptoError::DecryptionFailed),
        }
    }
}

fn aead_encrypt<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn aead_decrypt<C: Aead + KeyInit>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::{SymmetricCipher, AES128_GCM};
    use crate::error::CryptoError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ALL: [SymmetricCipher; 6] = [
        SymmetricCipher::Aes128Gcm,
        SymmetricCipher::Aes192Gcm,
        SymmetricCipher::Aes256Gcm,
        SymmetricCipher::Aes128Cbc,
        SymmetricCipher::Aes256Cbc,
        SymmetricCipher::TripleDesCbc,
    ];

    #[test]
    fn every_cipher_round_trips() {
        let mut rng = StdRng::seed_from_u64(7);
        for cipher in ALL {
            let key = cipher.generate_key(&mut rng);
            let iv = cipher.generate_iv(&mut rng);
            let wire = cipher
                .encrypt(&key, &iv, b"attachment payload")
                .expect("encrypt should work");
            assert_eq!(&wire[..cipher.iv_len()], iv.as_slice());
            let plain = cipher.decrypt(&key, &wire).expect("decrypt should work");
            assert_eq!(plain, b"attachment payload");
        }
    }

    #[test]
    fn uri_mapping_round_trips() {
        for cipher in ALL {
            assert_eq!(
                SymmetricCipher::from_uri(cipher.uri()).expect("known uri"),
                cipher
            );
        }
    }

    #[test]
    fn unknown_uri_is_unsupported() {
        let err = SymmetricCipher::from_uri("http://www.w3.org/2001/04/xmlenc#rc4")
            .expect_err("rc4 must not be supported");
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let mut rng = StdRng::seed_from_u64(8);
        let cipher = SymmetricCipher::from_uri(AES128_GCM).expect("known uri");
        let key = cipher.generate_key(&mut rng);
        let other_key = cipher.generate_key(&mut rng);
        let iv = cipher.generate_iv(&mut rng);
        let wire = cipher.encrypt(&key, &iv, b"data").expect("encrypt should work");
        let err = cipher
            .decrypt(&other_key, &wire)
            .expect_err("wrong key must fail");
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn iv_lengths_follow_the_profile() {
        assert_eq!(SymmetricCipher::Aes256Gcm.iv_len(), 12);
        assert_eq!(SymmetricCipher::Aes128Cbc.iv_len(), 16);
        assert_eq!(SymmetricCipher::TripleDesCbc.iv_len(), 8);
    }
}

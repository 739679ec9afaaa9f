//! P-256 public keys in the chain's compressed wire encoding.

use std::cmp::Ordering;
use std::fmt;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::EncodedPoint;
use thiserror::Error;

use crate::crypto::hash;
use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoError, IoResult};
use crate::util::{UInt160, UInt256};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid public key prefix {0:#04x}")]
    InvalidPrefix(u8),
    #[error("encoded point is not on the P-256 curve")]
    NotOnCurve,
    #[error("invalid key encoding: {0}")]
    Encoding(String),
}

/// A P-256 public key; `None` is the point at infinity (wire byte `0x00`).
///
/// Wire form is SEC1: 33-byte compressed (`0x02`/`0x03` prefix) on encode,
/// with 65-byte uncompressed (`0x04`) also accepted on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: Option<p256::PublicKey>,
}

impl PublicKey {
    /// The point at infinity.
    pub fn infinity() -> Self {
        PublicKey { point: None }
    }

    pub fn is_infinity(&self) -> bool {
        self.point.is_none()
    }

    /// Parses the wire encoding, validating curve membership.
    pub fn from_bytes(data: &[u8]) -> Result<Self, KeyError> {
        match data.first() {
            Some(0x00) if data.len() == 1 => Ok(PublicKey::infinity()),
            Some(0x02) | Some(0x03) | Some(0x04) => {
                let point = EncodedPoint::from_bytes(data)
                    .map_err(|e| KeyError::Encoding(e.to_string()))?;
                let key: Option<p256::PublicKey> =
                    p256::PublicKey::from_encoded_point(&point).into();
                key.map(|point| PublicKey { point: Some(point) })
                    .ok_or(KeyError::NotOnCurve)
            }
            Some(&prefix) => Err(KeyError::InvalidPrefix(prefix)),
            None => Err(KeyError::Encoding("empty input".into())),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let data = hex::decode(s).map_err(|e| KeyError::Encoding(e.to_string()))?;
        PublicKey::from_bytes(&data)
    }

    /// Compressed wire encoding; a single `0x00` for infinity.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.point {
            None => vec![0x00],
            Some(point) => point.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// The single-signature verification script for this key.
    pub fn verification_script(&self) -> Vec<u8> {
        let encoded = self.to_bytes();
        let mut script = Vec::with_capacity(encoded.len() + 2);
        script.push(encoded.len() as u8);
        script.extend_from_slice(&encoded);
        script.push(0xac); // CHECKSIG
        script
    }

    /// Script hash of [`Self::verification_script`], the key's account id.
    pub fn script_hash(&self) -> UInt160 {
        hash::hash160(&self.verification_script())
    }

    /// Verifies a 64-byte `r ‖ s` signature over a 32-byte digest.
    pub fn verify(&self, signature: &[u8], digest: &UInt256) -> bool {
        let Some(point) = &self.point else {
            return false;
        };
        if signature.len() != 64 {
            return false;
        }
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        VerifyingKey::from(point).verify_prehash(&digest.0, &sig).is_ok()
    }

    fn coordinates(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let point = self.point.as_ref()?.to_encoded_point(false);
        Some((point.x()?.to_vec(), point.y()?.to_vec()))
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    /// Keys order by X then Y coordinate; infinity sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.coordinates(), other.coordinates()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((ax, ay)), Some((bx, by))) => ax.cmp(&bx).then_with(|| ay.cmp(&by)),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl Encodable for PublicKey {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_bytes(&self.to_bytes())
    }
}

impl Decodable for PublicKey {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let prefix = r.read_u8()?;
        let body_len = match prefix {
            0x00 => 0,
            0x02 | 0x03 => 32,
            0x04 => 64,
            other => {
                return Err(IoError::InvalidFormat(format!(
                    "invalid public key prefix {other:#04x}"
                )))
            }
        };
        let mut data = Vec::with_capacity(1 + body_len);
        data.push(prefix);
        data.extend_from_slice(&r.read_bytes(body_len)?);
        PublicKey::from_bytes(&data).map_err(|e| IoError::InvalidFormat(e.to_string()))
    }
}

/// A private/public key pair. Signing is needed for witness construction
/// and the test fixtures; the wallet file formats live outside this crate.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn random() -> Self {
        let signing = SigningKey::random(&mut rand::thread_rng());
        let public = PublicKey {
            point: Some(p256::PublicKey::from(signing.verifying_key())),
        };
        KeyPair { signing, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Signs a 32-byte digest, returning the 64-byte `r ‖ s` form.
    pub fn sign(&self, digest: &UInt256) -> Vec<u8> {
        let signature: Signature = self
            .signing
            .sign_prehash(&digest.0)
            .expect("p256 prehash signing cannot fail for a 32-byte digest");
        signature.to_bytes().to_vec()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish()
    }
}

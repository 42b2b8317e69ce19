//! Signed attestations over ledger snapshots.
//!
//! An auditor signs the digest of an [`Attestation`] with an ed25519 key; an
//! [`AuditorSet`] accepts the attestation once a quorum of its members has
//! produced valid signatures.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{Address, LedgerSnapshot};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attestation {
    pub ledger_id: Address,
    pub height: u64,
    pub event_count: u64,
    #[serde(with = "serde_hash")]
    pub state_root: [u8; 32],
}

impl Attestation {
    pub fn of(snapshot: &LedgerSnapshot) -> Self {
        Self {
            ledger_id: snapshot.ledger_id.clone(),
            height: snapshot.height,
            event_count: snapshot.event_count,
            state_root: snapshot.state_root,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"fractions-attestation-v1");
        hasher.update((self.ledger_id.len() as u64).to_le_bytes());
        hasher.update(self.ledger_id.as_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.event_count.to_le_bytes());
        hasher.update(self.state_root);
        hasher.finalize().into()
    }

    /// Whether this attestation describes `snapshot`.
    pub fn matches(&self, snapshot: &LedgerSnapshot) -> bool {
        *self == Self::of(snapshot)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditorSignature {
    pub auditor_id: String,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedAttestation {
    pub attestation: Attestation,
    pub signatures: Vec<AuditorSignature>,
}

impl SignedAttestation {
    pub fn new(attestation: Attestation) -> Self {
        Self {
            attestation,
            signatures: Vec::new(),
        }
    }

    /// Add (or replace) the signature of `auditor_id`.
    pub fn sign(&mut self, auditor_id: impl Into<String>, key: &SigningKey) {
        let auditor_id = auditor_id.into();
        let signature = key.sign(&self.attestation.digest());
        self.signatures.retain(|sig| sig.auditor_id != auditor_id);
        self.signatures.push(AuditorSignature {
            auditor_id,
            signature: signature.to_bytes().to_vec(),
        });
    }
}

#[derive(Clone)]
pub struct AuditorSet {
    pub quorum: usize,
    pub members: BTreeMap<String, VerifyingKey>,
}

impl AuditorSet {
    pub fn new(members: Vec<(String, VerifyingKey)>, quorum: usize) -> Self {
        Self {
            quorum,
            members: members.into_iter().collect(),
        }
    }

    pub fn verify(&self, signed: &SignedAttestation) -> Result<(), VerificationError> {
        let digest = signed.attestation.digest();
        let mut verified = BTreeSet::new();
        for sig in &signed.signatures {
            let key = self
                .members
                .get(&sig.auditor_id)
                .ok_or_else(|| VerificationError::UnknownAuditor(sig.auditor_id.clone()))?;
            let signature = Signature::from_slice(&sig.signature)
                .map_err(|_| VerificationError::MalformedSignature(sig.auditor_id.clone()))?;
            key.verify_strict(&digest, &signature)
                .map_err(|_| VerificationError::InvalidSignature(sig.auditor_id.clone()))?;
            verified.insert(sig.auditor_id.clone());
        }
        if verified.len() < self.quorum {
            return Err(VerificationError::InsufficientQuorum {
                expected: self.quorum,
                actual: verified.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("signature from unknown auditor {0}")]
    UnknownAuditor(String),
    #[error("malformed signature from auditor {0}")]
    MalformedSignature(String),
    #[error("invalid signature from auditor {0}")]
    InvalidSignature(String),
    #[error("attestation signed by {actual} auditors, quorum {expected}")]
    InsufficientQuorum { expected: usize, actual: usize },
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

pub(crate) mod serde_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&encoded, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}

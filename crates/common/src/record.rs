//! Persisted shapes of protected fields.
//!
//! These are the values the external record store keeps: an encrypted field
//! record per PII column plus the searchable hash record that sits next to it
//! in the hash columns. Byte fields travel as standard base64.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of contact field being protected.
///
/// Drives normalisation and token policy in the search index and is bound
/// into the cipher's associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    FirstName,
    LastName,
    Email,
    Phone,
    Address,
}

impl FieldType {
    /// Stable label used for domain separation and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::FirstName => "first_name",
            FieldType::LastName => "last_name",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Address => "address",
        }
    }

    /// Whether the type is a personal name (first or last).
    pub fn is_name(&self) -> bool {
        matches!(self, FieldType::FirstName | FieldType::LastName)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "first_name" => Ok(FieldType::FirstName),
            "last_name" => Ok(FieldType::LastName),
            "email" => Ok(FieldType::Email),
            "phone" => Ok(FieldType::Phone),
            "address" => Ok(FieldType::Address),
            other => Err(format!("unknown field type: {other}")),
        }
    }
}

/// A self-describing encrypted field.
///
/// Serialised with a `"format"` tag so that new layouts can be added without
/// breaking stored values; decoding is an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum EncryptedFieldRecord {
    V1(FieldRecordV1),
}

impl EncryptedFieldRecord {
    /// Key version the record was sealed under.
    pub fn key_version(&self) -> u32 {
        match self {
            EncryptedFieldRecord::V1(r) => r.key_version,
        }
    }

    /// Field type the record was sealed as.
    pub fn field_type(&self) -> FieldType {
        match self {
            EncryptedFieldRecord::V1(r) => r.field_type,
        }
    }

    /// Length of the raw ciphertext (excluding tag).
    pub fn ciphertext_len(&self) -> usize {
        match self {
            EncryptedFieldRecord::V1(r) => r.ciphertext.len(),
        }
    }
}

/// Layout of a `v1` encrypted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecordV1 {
    /// AEAD ciphertext without the tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce, unique per encryption.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// 128-bit authentication tag.
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    /// Per-field random salt feeding the field key derivation.
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    /// Key version used for the field key.
    pub key_version: u32,
    /// Type of the protected value.
    pub field_type: FieldType,
    /// When the value was sealed.
    pub encrypted_at: DateTime<Utc>,
}

/// Deterministic lookup material stored next to an encrypted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableHash {
    /// Exact-match hash of the normalised value (hex).
    pub exact: String,
    /// Blind partial-match tokens (hex). Empty for exact-only field types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

/// A field ready to persist: encrypted value plus its lookup hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedField {
    pub record: EncryptedFieldRecord,
    pub search: SearchableHash,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

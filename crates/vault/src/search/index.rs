//! [`SearchIndex`]: exact-match hashes, partial-match tokens, query expansion.

use std::collections::{BTreeSet, HashSet};

use common::protocol::{Combine, MatchMode, NameQuery, QueryField};
use common::record::{FieldType, SearchableHash};
use common::VaultError;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{normalize, CandidateSet, Criterion};
use crate::crypto::{hmac_sha256, SALT_LEN};
use crate::keys::KeyBytes;

/// Shortest word that produces tokens, and the shortest partial query.
const MIN_TOKEN_CHARS: usize = 2;

/// Longest prefix token, in characters.
const MAX_PREFIX_CHARS: usize = 10;

const NGRAM_CHARS: usize = 3;

/// Token digests are truncated to this many bytes (32 hex characters).
const TOKEN_BYTES: usize = 16;

/// Tunables for [`SearchIndex`].
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub iterations: u32,
    pub default_country_code: String,
    pub max_tokens: usize,
    pub partial_fields: Vec<FieldType>,
}

/// Derives lookup values from plaintext.
pub struct SearchIndex {
    pepper: KeyBytes,
    salt: [u8; SALT_LEN],
    iterations: u32,
    default_country_code: String,
    max_tokens: usize,
    partial_fields: BTreeSet<FieldType>,
}

impl SearchIndex {
    /// `pepper` must stay secret; the salt is derived from `install_id`, so two
    /// processes of one install produce identical hashes.
    pub fn new(pepper: KeyBytes, install_id: &str, settings: SearchSettings) -> Self {
        let digest = Sha256::new()
            .chain_update(b"pii-vault/search-salt/")
            .chain_update(install_id.as_bytes())
            .finalize();
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&digest[..SALT_LEN]);

        Self {
            pepper,
            salt,
            iterations: settings.iterations,
            default_country_code: settings.default_country_code,
            max_tokens: settings.max_tokens,
            partial_fields: settings.partial_fields.into_iter().collect(),
        }
    }

    /// Phones are always exact-match only.
    pub fn supports_partial(&self, field_type: FieldType) -> bool {
        field_type != FieldType::Phone && self.partial_fields.contains(&field_type)
    }

    /// Canonical form used by every derivation below.
    pub fn normalize(&self, field_type: FieldType, value: &str) -> Result<String, VaultError> {
        normalize(field_type, value, &self.default_country_code)
    }

    /// Deterministic exact-match hash of `value` (64 hex characters).
    pub fn exact_hash(&self, field_type: FieldType, value: &str) -> Result<String, VaultError> {
        let normalized = self.normalize(field_type, value)?;
        Ok(self.slow_hash(field_type.as_str(), &normalized))
    }

    /// Partial-match tokens of `value`: words, prefixes, then trigrams,
    /// deduplicated and capped. Empty for field types without partial search.
    pub fn tokens(&self, value: &str, field_type: FieldType) -> Result<Vec<String>, VaultError> {
        if !self.supports_partial(field_type) {
            return Ok(Vec::new());
        }
        let normalized = self.normalize(field_type, value)?;
        Ok(token_texts(&normalized, self.max_tokens)
            .iter()
            .map(|t| self.token_hash(field_type, t))
            .collect())
    }

    /// Exact hash and tokens for one stored field.
    pub fn protect(
        &self,
        field_type: FieldType,
        value: &str,
    ) -> Result<SearchableHash, VaultError> {
        Ok(SearchableHash {
            exact: self.exact_hash(field_type, value)?,
            tokens: self.tokens(value, field_type)?,
        })
    }

    /// Hash over the sorted pair of normalised names; argument order is
    /// irrelevant.
    pub fn full_name_hash(&self, first: &str, last: &str) -> Result<String, VaultError> {
        let mut parts = [
            self.normalize(FieldType::FirstName, first)?,
            self.normalize(FieldType::LastName, last)?,
        ];
        parts.sort();
        Ok(self.slow_hash("full_name", &parts.join("\u{1f}")))
    }

    /// Expand query fields into the lookup values a matching subject carries.
    ///
    /// Each exact field, each word of a partial field and the full name become
    /// one criterion; `combine` decides whether a subject needs all of them.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EmptyOrInvalidSearchInput`] for an empty query, a
    /// blank or invalid value, a partial query on a field type without partial
    /// search, or a partial query shorter than two characters.
    pub fn match_query(
        &self,
        fields: &[QueryField],
        full_name: Option<&NameQuery>,
        combine: Combine,
    ) -> Result<CandidateSet, VaultError> {
        if fields.is_empty() && full_name.is_none() {
            return Err(VaultError::EmptyOrInvalidSearchInput(
                "query has no fields".into(),
            ));
        }

        let mut candidates = CandidateSet {
            combine,
            ..CandidateSet::default()
        };
        for field in fields {
            match field.mode {
                MatchMode::Exact => {
                    let hash = self.exact_hash(field.field_type, &field.value)?;
                    candidates.criteria.insert(Criterion::Exact(hash));
                }
                MatchMode::Partial => {
                    if !self.supports_partial(field.field_type) {
                        return Err(VaultError::EmptyOrInvalidSearchInput(format!(
                            "partial search is not enabled for {}",
                            field.field_type
                        )));
                    }
                    let normalized = self.normalize(field.field_type, &field.value)?;
                    let texts = query_texts(&normalized);
                    if texts.is_empty() {
                        return Err(VaultError::EmptyOrInvalidSearchInput(format!(
                            "partial query needs at least {MIN_TOKEN_CHARS} characters"
                        )));
                    }
                    candidates.criteria.extend(
                        texts
                            .iter()
                            .map(|t| Criterion::Token(self.token_hash(field.field_type, t))),
                    );
                }
            }
        }
        if let Some(name) = full_name {
            let hash = self.full_name_hash(&name.first, &name.last)?;
            candidates.criteria.insert(Criterion::FullName(hash));
        }
        Ok(candidates)
    }

    /// PBKDF2-HMAC-SHA256 over `pepper ‖ domain ‖ 0x00 ‖ normalised`.
    fn slow_hash(&self, domain: &str, normalized: &str) -> String {
        let mut password = Zeroizing::new(Vec::with_capacity(
            self.pepper.as_bytes().len() + domain.len() + 1 + normalized.len(),
        ));
        password.extend_from_slice(self.pepper.as_bytes());
        password.extend_from_slice(domain.as_bytes());
        password.push(0);
        password.extend_from_slice(normalized.as_bytes());

        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&password, &self.salt, self.iterations, &mut out);
        hex::encode(out)
    }

    fn token_hash(&self, field_type: FieldType, text: &str) -> String {
        let mac = hmac_sha256(
            self.pepper.as_bytes(),
            &[b"token/", field_type.as_str().as_bytes(), &[0], text.as_bytes()],
        );
        hex::encode(&mac[..TOKEN_BYTES])
    }
}

fn words(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
}

/// Plaintext tokens in priority order, so the cap drops trigrams first.
fn token_texts(normalized: &str, max: usize) -> Vec<String> {
    let words: Vec<Vec<char>> = words(normalized).map(|w| w.chars().collect()).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |token: String| {
        if out.len() < max && seen.insert(token.clone()) {
            out.push(token);
        }
    };

    for word in &words {
        push(word.iter().collect());
    }
    for word in &words {
        for len in MIN_TOKEN_CHARS..=word.len().min(MAX_PREFIX_CHARS) {
            push(word[..len].iter().collect());
        }
    }
    for word in &words {
        for gram in word.windows(NGRAM_CHARS) {
            push(gram.iter().collect());
        }
    }
    out
}

/// The stored token each query word should hit: the word itself, or its
/// longest prefix token when the word is longer than that.
fn query_texts(normalized: &str) -> Vec<String> {
    words(normalized)
        .map(|w| w.chars().take(MAX_PREFIX_CHARS).collect())
        .collect()
}

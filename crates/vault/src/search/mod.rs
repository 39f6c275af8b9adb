//! Blind search index over encrypted fields.
//!
//! Lookup values are derived from normalised plaintext independently of the
//! field cipher, so equality and prefix queries run against hash columns
//! without decrypting anything.
//!
//! # Trade-off
//!
//! Exact hashes use one salt per install, shared by every record of a field
//! type. That keeps equality search a single indexed lookup, but it means an
//! attacker holding the salt can test guesses against all rows at once. The
//! secret pepper (derived from the master key, never stored) and the slow
//! PBKDF2 derivation bound that attack; neither removes it.

pub mod index;
pub mod normalize;

pub use index::{SearchIndex, SearchSettings};
pub use normalize::normalize;

use std::collections::BTreeSet;

use common::protocol::Combine;

/// One lookup value a matching subject must carry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Criterion {
    /// Exact hash of one field.
    Exact(String),
    /// Token hash of one query word.
    Token(String),
    /// Order-independent full-name hash.
    FullName(String),
}

/// Lookup values produced from a query, matched against stored columns.
///
/// Under [`Combine::All`] a subject matches when every criterion hits one of
/// its columns; under [`Combine::Any`] one hit is enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    pub criteria: BTreeSet<Criterion>,
    pub combine: Combine,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Whether a subject with the given full-name hash and field hashes
    /// satisfies the query. `fields` yields each protected field's exact hash
    /// and tokens.
    pub fn matches<'a, I, T>(&self, name_hash: Option<&str>, fields: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, T)>,
        T: IntoIterator<Item = &'a str>,
    {
        if self.criteria.is_empty() {
            return false;
        }
        let mut exact = BTreeSet::new();
        let mut tokens = BTreeSet::new();
        for (hash, field_tokens) in fields {
            exact.insert(hash);
            tokens.extend(field_tokens);
        }
        let hit = |c: &Criterion| match c {
            Criterion::Exact(h) => exact.contains(h.as_str()),
            Criterion::Token(t) => tokens.contains(t.as_str()),
            Criterion::FullName(h) => name_hash == Some(h.as_str()),
        };
        match self.combine {
            Combine::All => self.criteria.iter().all(hit),
            Combine::Any => self.criteria.iter().any(hit),
        }
    }
}

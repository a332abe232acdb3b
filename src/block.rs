//! Block structure, content hashing and proof-of-work

use crate::error::ChainError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

/// Payload carried by every genesis block.
pub const GENESIS_DATA: &str = "Genesis Block";

/// Blocks older than this, measured at validation time, are stale.
pub const MAX_BLOCK_AGE_SECS: i64 = 60;

/// How many nonces to try between checks of the stop condition.
const STOP_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub data: String,
    /// `None` only for the genesis block.
    pub previous_hash: Option<String>,
    /// Base64 SHA-256 of the block content; empty until computed.
    pub hash: String,
    /// Number of leading `'0'` characters the hash must start with.
    pub difficulty: u32,
    pub nonce: u64,
}

impl Block {
    /// Create an unsealed block with `nonce = 0` and an empty hash.
    pub fn new(
        index: u64,
        data: impl Into<String>,
        timestamp: DateTime<Utc>,
        previous_hash: Option<String>,
        difficulty: u32,
    ) -> Self {
        Block {
            index,
            timestamp,
            data: data.into(),
            previous_hash,
            hash: String::new(),
            difficulty,
            nonce: 0,
        }
    }

    /// Hash of `index, data, timestamp, previous_hash, difficulty, nonce`
    /// concatenated in that order, without touching `self.hash`.
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_string());
        hasher.update(&self.data);
        hasher.update(self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true));
        hasher.update(self.previous_hash.as_deref().unwrap_or_default());
        hasher.update(self.difficulty.to_string());
        hasher.update(self.nonce.to_string());
        STANDARD.encode(hasher.finalize())
    }

    /// Recompute the hash and store it.
    pub fn compute_hash(&mut self) -> &str {
        self.hash = self.calculate_hash();
        &self.hash
    }

    pub fn is_hash_valid(&self) -> bool {
        let difficulty = self.difficulty as usize;
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Well-formedness, hash consistency and freshness relative to `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> bool {
        self.check(now).is_ok()
    }

    /// Same rules as [`Block::validate`], reporting the first one broken.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), ChainError> {
        if self.index == 0 {
            return Err(ChainError::InvalidBlock(
                "index must be greater than zero".to_string(),
            ));
        }
        if self.data.is_empty() {
            return Err(ChainError::InvalidBlock(format!(
                "block {} has no data",
                self.index
            )));
        }
        if self.hash.is_empty() {
            return Err(ChainError::InvalidBlock(format!(
                "block {} has no hash",
                self.index
            )));
        }
        let expected = self.calculate_hash();
        if expected != self.hash {
            return Err(ChainError::InvalidBlock(format!(
                "block {} hash mismatch. Expected {}, but got {}.",
                self.index, expected, self.hash
            )));
        }
        if self.timestamp < now - Duration::seconds(MAX_BLOCK_AGE_SECS) {
            return Err(ChainError::InvalidBlock(format!(
                "block {} is stale (timestamp {})",
                self.index,
                self.timestamp.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Search nonces upward from the current one until the hash meets the difficulty.
    pub fn mine(&mut self) {
        self.mine_until(|| false);
    }

    /// Like [`Block::mine`] but gives up when `should_stop` returns true.
    /// Returns whether the block was sealed.
    pub fn mine_until(&mut self, should_stop: impl Fn() -> bool) -> bool {
        self.compute_hash();
        let mut attempts: u64 = 0;
        while !self.is_hash_valid() {
            attempts += 1;
            if attempts % STOP_CHECK_INTERVAL == 0 && should_stop() {
                return false;
            }
            self.nonce += 1;
            self.compute_hash();
        }
        true
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Data: {} Timestamp: {} Hash: {} Previous Hash: {} Nonce: {} Difficulty {}",
            self.data,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.hash,
            self.previous_hash.as_deref().unwrap_or("-"),
            self.nonce,
            self.difficulty
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_block(index: u64, difficulty: u32) -> Block {
        let mut block = Block::new(
            index,
            format!("Block {}", index),
            Utc::now(),
            Some("previous".to_string()),
            difficulty,
        );
        block.mine();
        block
    }

    #[test]
    fn test_compute_hash_is_deterministic() {
        let mut block = Block::new(3, "payload", Utc::now(), Some("abc".into()), 1);
        let first = block.compute_hash().to_string();
        let second = block.compute_hash().to_string();
        assert_eq!(first, second);
        assert_eq!(first, block.calculate_hash());
        assert!(!first.is_empty());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = Block::new(3, "payload", Utc::now(), Some("abc".into()), 1);
        let original = base.calculate_hash();

        let mut changed = base.clone();
        changed.index = 4;
        assert_ne!(original, changed.calculate_hash());

        let mut changed = base.clone();
        changed.data = "other".into();
        assert_ne!(original, changed.calculate_hash());

        let mut changed = base.clone();
        changed.timestamp = base.timestamp + Duration::nanoseconds(1);
        assert_ne!(original, changed.calculate_hash());

        let mut changed = base.clone();
        changed.previous_hash = None;
        assert_ne!(original, changed.calculate_hash());

        let mut changed = base.clone();
        changed.difficulty = 2;
        assert_ne!(original, changed.calculate_hash());

        let mut changed = base.clone();
        changed.nonce = 1;
        assert_ne!(original, changed.calculate_hash());
    }

    #[test]
    fn test_mined_block_has_smallest_valid_nonce() {
        let block = sealed_block(1, 1);
        assert!(block.is_hash_valid());
        assert!(block.hash.starts_with('0'));

        let mut probe = block.clone();
        for nonce in 0..block.nonce {
            probe.nonce = nonce;
            probe.compute_hash();
            assert!(!probe.is_hash_valid(), "nonce {} already satisfied", nonce);
        }
    }

    #[test]
    fn test_mining_starts_from_initial_nonce() {
        let mut block = Block::new(1, "Block 1", Utc::now(), Some("p".into()), 1);
        block.nonce = 500;
        block.mine();
        assert!(block.nonce >= 500);
        assert!(block.is_hash_valid());
    }

    #[test]
    fn test_zero_difficulty_accepts_any_hash() {
        let mut block = Block::new(1, "Block 1", Utc::now(), Some("p".into()), 0);
        block.mine();
        assert_eq!(block.nonce, 0);
        assert!(block.is_hash_valid());
    }

    #[test]
    fn test_mine_until_honours_stop() {
        // 40 leading zeros will not be found before the first stop check.
        let mut block = Block::new(1, "Block 1", Utc::now(), Some("p".into()), 40);
        assert!(!block.mine_until(|| true));
        assert!(!block.is_hash_valid());
    }

    #[test]
    fn test_validate_accepts_fresh_sealed_block() {
        let block = sealed_block(1, 1);
        assert!(block.validate(Utc::now()));
    }

    #[test]
    fn test_validate_rejects_malformed_blocks() {
        let now = Utc::now();

        let mut genesis_like = sealed_block(1, 1);
        genesis_like.index = 0;
        genesis_like.mine();
        assert!(!genesis_like.validate(now));

        let mut empty = Block::new(1, "", now, Some("p".into()), 1);
        empty.mine();
        assert!(!empty.validate(now));

        let unhashed = Block::new(1, "Block 1", now, Some("p".into()), 1);
        assert!(!unhashed.validate(now));

        let mut tampered = sealed_block(1, 1);
        tampered.data = "Block 99".into();
        assert!(!tampered.validate(now));
    }

    #[test]
    fn test_validate_rejects_stale_block() {
        let now = Utc::now();
        let mut block = Block::new(
            1,
            "Block 1",
            now - Duration::seconds(MAX_BLOCK_AGE_SECS + 1),
            Some("p".into()),
            1,
        );
        block.mine();
        assert!(!block.validate(now));
        assert!(block.validate(now - Duration::seconds(2)));
    }

    #[test]
    fn test_check_reports_reason() {
        let mut block = sealed_block(2, 1);
        block.nonce += 1;
        let err = block.check(Utc::now()).unwrap_err();
        assert!(err.to_string().contains("hash mismatch"));
    }

    #[test]
    fn test_display_lists_fields() {
        let block = sealed_block(1, 1);
        let rendered = block.to_string();
        assert!(rendered.starts_with("Data: Block 1"));
        assert!(rendered.contains(&block.hash));
        assert!(rendered.contains("Previous Hash: previous"));
    }
}

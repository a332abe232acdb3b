//! The ledger: genesis bootstrap, append rules, mining templates and difficulty retargeting

use crate::block::{Block, GENESIS_DATA};
use crate::error::ChainError;
use crate::events::{BlockStatus, ChainEvent, EventBus};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DIFFICULTY_ADJUSTMENT_INTERVAL: usize = 5;
/// Seconds.
pub const TARGET_BLOCK_TIME: u64 = 5;
pub const GENESIS_DIFFICULTY: u32 = 1;
/// Difficulty used until the chain holds a full adjustment window.
pub const BOOTSTRAP_DIFFICULTY: u32 = 1;

/// Tunables for difficulty retargeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Seconds per block the network aims for.
    pub target_block_time: u64,
    /// Blocks per retarget window.
    pub difficulty_adjustment_interval: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            target_block_time: TARGET_BLOCK_TIME,
            difficulty_adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
        }
    }
}

impl ChainParams {
    /// Time one full window should take.
    pub fn expected_window_time(&self) -> Duration {
        let secs = self
            .target_block_time
            .saturating_mul(self.difficulty_adjustment_interval as u64);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// Chain handle shared by the mining and sync loops.
pub type SharedChain = Arc<RwLock<Blockchain>>;

#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    params: ChainParams,
    events: EventBus,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Create a chain holding a freshly mined genesis block.
    pub fn new() -> Self {
        Self::with_params(ChainParams::default())
    }

    pub fn with_params(params: ChainParams) -> Self {
        let genesis = Self::create_genesis_block();
        info!("Genesis block mined: {}", genesis.hash);
        Blockchain {
            blocks: vec![genesis],
            params,
            events: EventBus::new(),
        }
    }

    /// Wrap an existing block sequence. Linkage is not checked here;
    /// run [`Blockchain::validate_chain`] first on anything from outside.
    pub fn from_blocks(blocks: Vec<Block>, params: ChainParams) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::InvalidChain(
                "a chain needs at least a genesis block".to_string(),
            ));
        }
        Ok(Blockchain {
            blocks,
            params,
            events: EventBus::new(),
        })
    }

    pub fn into_shared(self) -> SharedChain {
        Arc::new(RwLock::new(self))
    }

    fn create_genesis_block() -> Block {
        let mut genesis = Block::new(0, GENESIS_DATA, Utc::now(), None, GENESIS_DIFFICULTY);
        genesis.mine();
        genesis
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn params(&self) -> ChainParams {
        self.params
    }

    pub fn latest(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Unsealed successor of the current tip, stamped `now`, carrying the retargeted difficulty.
    pub fn next_block_at(&self, now: DateTime<Utc>) -> Option<Block> {
        let latest = self.latest()?;
        let index = latest.index + 1;
        let mut block = Block::new(
            index,
            format!("Block {}", index),
            now,
            Some(latest.hash.clone()),
            latest.difficulty,
        );
        block.difficulty = self.compute_difficulty();
        Some(block)
    }

    pub fn next_block(&self) -> Option<Block> {
        self.next_block_at(Utc::now())
    }

    /// Build and seal the next block. The block is not appended.
    pub fn mine(&self) -> Option<Block> {
        let mut block = self.next_block()?;
        block.mine();
        Some(block)
    }

    /// Difficulty for the block that would follow the current tip.
    ///
    /// Looks back one window: more than twice as fast as the target raises the
    /// reference block's difficulty by one, more than twice as slow lowers it by
    /// one (never below zero), anything else keeps it.
    pub fn compute_difficulty(&self) -> u32 {
        let interval = self.params.difficulty_adjustment_interval;
        if interval == 0 || self.blocks.len() < interval {
            return BOOTSTRAP_DIFFICULTY;
        }
        let reference = &self.blocks[self.blocks.len() - interval];
        let latest = match self.blocks.last() {
            Some(block) => block,
            None => return BOOTSTRAP_DIFFICULTY,
        };

        let expected = self.params.expected_window_time();
        let actual = latest.timestamp - reference.timestamp;

        if actual < expected / 2 {
            reference.difficulty.saturating_add(1)
        } else if actual > expected * 2 {
            reference.difficulty.saturating_sub(1)
        } else {
            reference.difficulty
        }
    }

    /// Append `block` if it is valid and extends the tip. Either way a
    /// [`ChainEvent::Block`] is published. Returns whether it was appended.
    pub fn append(&mut self, block: Block) -> bool {
        self.append_at(block, Utc::now())
    }

    pub fn append_at(&mut self, block: Block, now: DateTime<Utc>) -> bool {
        let status = match self.check_extends_tip(&block, now) {
            Ok(()) => BlockStatus::Accepted,
            Err(e) => {
                warn!("Rejected block {}: {}", block.index, e);
                BlockStatus::Rejected
            }
        };

        if status == BlockStatus::Accepted {
            debug!(
                "Appended block {} (difficulty {}, nonce {})",
                block.index, block.difficulty, block.nonce
            );
            self.blocks.push(block.clone());
        }
        self.events.publish(ChainEvent::Block { block, status });
        status == BlockStatus::Accepted
    }

    fn check_extends_tip(&self, block: &Block, now: DateTime<Utc>) -> Result<(), ChainError> {
        block.check(now)?;
        let tip = self
            .latest()
            .ok_or_else(|| ChainError::InvalidBlock("the chain is empty".to_string()))?;
        if block.index != tip.index + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block index. Expected {}, but got {}.",
                tip.index + 1,
                block.index
            )));
        }
        if block.previous_hash.as_deref() != Some(tip.hash.as_str()) {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid previous block hash. Expected {}, but got {}.",
                tip.hash,
                block.previous_hash.as_deref().unwrap_or("none")
            )));
        }
        Ok(())
    }

    /// Swap the whole block sequence. Callers validate beforehand.
    pub fn replace_blocks(&mut self, blocks: Vec<Block>) {
        let length = blocks.len();
        self.blocks = blocks;
        self.events.publish(ChainEvent::Replaced { length });
    }

    /// Whether `candidate` is a complete, valid chain as of now.
    pub fn validate_chain(candidate: &[Block]) -> bool {
        Self::validate_chain_at(candidate, Utc::now())
    }

    pub fn validate_chain_at(candidate: &[Block], now: DateTime<Utc>) -> bool {
        match Self::check_chain_at(candidate, now) {
            Ok(()) => true,
            Err(e) => {
                debug!("Candidate chain rejected: {}", e);
                false
            }
        }
    }

    pub fn check_chain_at(candidate: &[Block], now: DateTime<Utc>) -> Result<(), ChainError> {
        let genesis = candidate
            .first()
            .ok_or_else(|| ChainError::InvalidChain("empty chain".to_string()))?;

        if genesis.index != 0 || genesis.data != GENESIS_DATA || genesis.previous_hash.is_some() {
            return Err(ChainError::InvalidChain(
                "first block is not a genesis block".to_string(),
            ));
        }
        if genesis.hash != genesis.calculate_hash() || !genesis.is_hash_valid() {
            return Err(ChainError::InvalidChain(
                "genesis block hash does not hold".to_string(),
            ));
        }

        for pair in candidate.windows(2) {
            let (previous, block) = (&pair[0], &pair[1]);
            if block.previous_hash.as_deref() != Some(previous.hash.as_str()) {
                return Err(ChainError::InvalidChain(format!(
                    "block {} does not link to block {}",
                    block.index, previous.index
                )));
            }
            if block.index != previous.index + 1 {
                return Err(ChainError::InvalidChain(format!(
                    "block index {} does not follow {}",
                    block.index, previous.index
                )));
            }
            block
                .check(now)
                .map_err(|e| ChainError::InvalidChain(e.to_string()))?;
        }
        Ok(())
    }
}

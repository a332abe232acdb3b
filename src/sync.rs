//! Chain synchronization with the single peer
//!
//! Every cycle sends the whole local chain, waits for the peer's chain and
//! adopts it when it is strictly longer and valid. Both ends of a connection
//! run the same cycle, so each frame sent is answered by one frame received.
//! Sending and receiving overlap: neither side waits for its own write to
//! drain before reading the peer's frame.

use crate::block::Block;
use crate::chain::{Blockchain, SharedChain};
use crate::config::SyncConfig;
use crate::error::{ChainError, Result};
use crate::network::PeerLink;
use crate::shutdown::ShutdownListener;
use crate::wire::{decode_chain, encode_chain, read_frame, write_frame};
use parking_lot::Mutex;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// What one exchange cycle did with the peer's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Adopted { length: usize },
    KeptLocal { local: usize, remote: usize },
    Rejected { remote: usize },
    /// The peer sent something that did not decode into a chain.
    NoCandidate { reason: String },
}

/// Sync statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub cycles: u64,
    pub adopted: u64,
    pub kept_local: u64,
    pub rejected: u64,
    pub malformed: u64,
    /// Cycles abandoned before any byte was exchanged.
    pub skipped: u64,
    pub reconnects: u64,
}

pub struct ChainSynchronizer {
    chain: SharedChain,
    config: SyncConfig,
    stats: Mutex<SyncStats>,
}

impl ChainSynchronizer {
    pub fn new(chain: SharedChain, config: SyncConfig) -> Self {
        Self {
            chain,
            config,
            stats: Mutex::new(SyncStats::default()),
        }
    }

    pub fn stats(&self) -> SyncStats {
        *self.stats.lock()
    }

    /// Replace the local chain with `candidate` if it is strictly longer and valid.
    ///
    /// Validation runs without holding the lock; the length is checked again
    /// under the write lock before the swap.
    pub fn adopt_candidate(&self, candidate: Vec<Block>) -> SyncOutcome {
        let local = self.chain.read().len();
        let remote = candidate.len();
        if remote <= local {
            return SyncOutcome::KeptLocal { local, remote };
        }
        if !Blockchain::validate_chain(&candidate) {
            warn!("Peer chain of {} blocks failed validation", remote);
            return SyncOutcome::Rejected { remote };
        }

        let mut chain = self.chain.write();
        if remote <= chain.len() {
            return SyncOutcome::KeptLocal {
                local: chain.len(),
                remote,
            };
        }
        chain.replace_blocks(candidate);
        info!("Adopted peer chain: {} blocks (was {})", remote, local);
        SyncOutcome::Adopted { length: remote }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.io_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ChainError::Timeout(limit))?,
            None => fut.await,
        }
    }

    /// One send-receive-adopt cycle. Errors for which [`ChainError::is_link_failure`]
    /// holds mean the stream is no longer usable; a payload that fails to decode
    /// is reported as [`SyncOutcome::NoCandidate`].
    pub async fn sync_once<S>(&self, stream: &mut S) -> Result<SyncOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let snapshot = self.chain.read().blocks().to_vec();
        let payload = encode_chain(&snapshot)?;
        let max_frame_bytes = self.config.max_frame_bytes;

        let (mut reader, mut writer) = tokio::io::split(stream);
        let ((), received) = self
            .with_timeout(async {
                tokio::try_join!(
                    write_frame(&mut writer, &payload, max_frame_bytes),
                    read_frame(&mut reader, max_frame_bytes),
                )
            })
            .await?;

        let outcome = match decode_chain(&received) {
            Ok(candidate) => self.adopt_candidate(candidate),
            Err(e) => {
                warn!("Malformed chain from peer: {}", e);
                SyncOutcome::NoCandidate {
                    reason: e.to_string(),
                }
            }
        };
        self.record(&outcome);
        Ok(outcome)
    }

    fn record(&self, outcome: &SyncOutcome) {
        let mut stats = self.stats.lock();
        stats.cycles += 1;
        match outcome {
            SyncOutcome::Adopted { .. } => stats.adopted += 1,
            SyncOutcome::KeptLocal { .. } => stats.kept_local += 1,
            SyncOutcome::Rejected { .. } => stats.rejected += 1,
            SyncOutcome::NoCandidate { .. } => stats.malformed += 1,
        }
    }

    /// Run cycles over one stream until shutdown (`Ok`) or link failure (`Err`).
    pub async fn run_stream<S>(&self, mut stream: S, shutdown: &mut ShutdownListener) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => return Ok(()),
                outcome = self.sync_once(&mut stream) => {
                    match outcome {
                        Ok(outcome) => debug!("Sync cycle: {:?}", outcome),
                        Err(e) if e.is_link_failure() => return Err(e),
                        Err(e) => {
                            warn!("Sync cycle skipped: {}", e);
                            self.stats.lock().skipped += 1;
                        }
                    }
                }
            }
            tokio::select! {
                _ = shutdown.triggered() => return Ok(()),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Keep the peer link up and synchronizing until shutdown. Lost links are
    /// re-established per the reconnect policy; the failure count resets after
    /// any link that completed a cycle.
    pub async fn run(&self, link: PeerLink, mut shutdown: ShutdownListener) -> Result<SyncStats> {
        let policy = self.config.reconnect_policy();
        let mut failures: u32 = 0;

        loop {
            let established = tokio::select! {
                _ = shutdown.triggered() => break,
                stream = link.establish() => stream,
            };

            match established {
                Ok(stream) => {
                    let cycles_before = self.stats().cycles;
                    match self.run_stream(stream, &mut shutdown).await {
                        Ok(()) => break,
                        Err(e) => warn!("Sync link {} lost: {}", link.describe(), e),
                    }
                    if self.stats().cycles > cycles_before {
                        failures = 0;
                    }
                }
                Err(e) => warn!("Could not reach peer ({}): {}", link.describe(), e),
            }

            if failures >= policy.max_attempts {
                return Err(ChainError::NetworkError(format!(
                    "giving up on peer ({}) after {} reconnect attempts",
                    link.describe(),
                    failures
                )));
            }
            failures += 1;
            self.stats.lock().reconnects += 1;

            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }

        info!("Sync loop stopped: {:?}", self.stats());
        Ok(self.stats())
    }
}

//! Proof-of-work mining loop
//!
//! Each round snapshots the tip under a read lock, seals the template with no
//! lock held and appends under the write lock. If the chain was swapped while
//! sealing, the append rejects the block and the next round starts from the new tip.

use crate::chain::SharedChain;
use crate::shutdown::ShutdownListener;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinerStats {
    pub blocks_accepted: u64,
    pub blocks_rejected: u64,
}

pub struct Miner {
    chain: SharedChain,
}

impl Miner {
    pub fn new(chain: SharedChain) -> Self {
        Self { chain }
    }

    /// One template-seal-append round. `None` if shutdown interrupted the search
    /// or the chain had no tip; otherwise whether the block was appended.
    pub fn mine_once(&self, shutdown: &ShutdownListener) -> Option<bool> {
        let mut block = self.chain.read().next_block()?;
        debug!(
            "Mining block {} at difficulty {}",
            block.index, block.difficulty
        );
        if !block.mine_until(|| shutdown.is_triggered()) {
            return None;
        }
        Some(self.chain.write().append(block))
    }

    /// Mine until shutdown fires. Blocks the calling thread; run it on a
    /// dedicated thread or `spawn_blocking`.
    pub fn run(&self, shutdown: ShutdownListener) -> MinerStats {
        let mut stats = MinerStats::default();
        info!("Miner started");
        while !shutdown.is_triggered() {
            match self.mine_once(&shutdown) {
                Some(true) => stats.blocks_accepted += 1,
                Some(false) => stats.blocks_rejected += 1,
                None if shutdown.is_triggered() => break,
                None => std::thread::yield_now(),
            }
        }
        info!(
            "Miner stopped: {} blocks accepted, {} rejected",
            stats.blocks_accepted, stats.blocks_rejected
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Blockchain, ChainParams};
    use crate::events::ChainEvent;
    use crate::shutdown::ShutdownSignal;
    use std::time::Duration;

    fn easy_chain() -> SharedChain {
        Blockchain::with_params(ChainParams {
            target_block_time: 5,
            difficulty_adjustment_interval: 1000,
        })
        .into_shared()
    }

    #[test]
    fn test_mine_once_appends() {
        let chain = easy_chain();
        let events = chain.read().subscribe();
        let signal = ShutdownSignal::new();
        let miner = Miner::new(chain.clone());

        assert_eq!(miner.mine_once(&signal.listener()), Some(true));
        assert_eq!(chain.read().len(), 2);
        assert!(events.try_recv().unwrap().is_accepted());
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let chain = easy_chain();
        let events = chain.read().subscribe();
        let signal = ShutdownSignal::new();
        let listener = signal.listener();
        let miner = Miner::new(chain.clone());

        let handle = std::thread::spawn(move || miner.run(listener));

        // wait for a couple of blocks, then stop
        for _ in 0..2 {
            let event = events
                .recv_timeout(Duration::from_secs(10))
                .expect("miner produced no block");
            assert!(matches!(event, ChainEvent::Block { .. }));
        }
        signal.trigger();

        let stats = handle.join().unwrap();
        assert!(stats.blocks_accepted >= 2);
        assert_eq!(chain.read().len() as u64, 1 + stats.blocks_accepted);
        assert!(Blockchain::validate_chain(chain.read().blocks()));
    }

    #[test]
    fn test_run_returns_immediately_when_already_stopped() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let stats = Miner::new(easy_chain()).run(signal.listener());
        assert_eq!(stats, MinerStats::default());
    }
}

//! Ordered block-ingest queue between the network and the ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::block::Block;
use crate::core::Blockchain;

use super::{NetworkError, NetworkResult};

/// Bound of the queue channel; a full channel blocks the sending peer's
/// protocol loop, throttling upstream peers.
pub const BLOCK_QUEUE_CAPACITY: usize = 200;

/// How far ahead of the current height buffered blocks may reach.
const MAX_BUFFER_AHEAD: u32 = 2000;

/// Sender half feeding the queue task.
#[derive(Clone)]
pub struct BlockQueue {
    tx: mpsc::Sender<Block>,
}

impl BlockQueue {
    pub fn new() -> (BlockQueue, mpsc::Receiver<Block>) {
        let (tx, rx) = mpsc::channel(BLOCK_QUEUE_CAPACITY);
        (BlockQueue { tx }, rx)
    }

    /// Queues a block, suspending when the queue is full.
    pub async fn put_block(&self, block: Block) -> NetworkResult<()> {
        self.tx
            .send(block)
            .await
            .map_err(|_| NetworkError::ServerShutdown)
    }
}

/// The queue task: buffers out-of-order arrivals and feeds the ledger
/// the lowest-indexed contiguous run. Cancellation discards the buffer.
pub async fn run(
    chain: Arc<Blockchain>,
    mut rx: mpsc::Receiver<Block>,
    cancel: CancellationToken,
) {
    let mut buffered: BTreeMap<u32, Block> = BTreeMap::new();
    loop {
        let block = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(buffered = buffered.len(), "block queue discarded");
                return;
            }
            block = rx.recv() => match block {
                Some(block) => block,
                None => return,
            },
        };

        let height = chain.block_height();
        if block.index() <= height || block.index() > height + MAX_BUFFER_AHEAD {
            continue;
        }
        buffered.insert(block.index(), block);

        // Commit the contiguous prefix.
        while let Some(next) = buffered.remove(&(chain.block_height() + 1)) {
            let index = next.index();
            if let Err(err) = chain.add_block(&next) {
                warn!(index, %err, "queued block rejected");
                break;
            }
        }
        // Anything at or below the new height is stale now.
        let height = chain.block_height();
        buffered.retain(|index, _| *index > height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::new_test_chain;

    #[tokio::test]
    async fn commits_out_of_order_blocks_in_index_order() {
        let fixture = new_test_chain(1);
        let b1 = fixture.next_block(Vec::new());
        fixture.chain.add_block(&b1).unwrap();
        let b2 = fixture.next_block(Vec::new());
        fixture.chain.add_block(&b2).unwrap();
        let b3 = fixture.next_block(Vec::new());

        // Rebuild a fresh chain and replay 3, 1, 2 through the queue.
        let chain = Arc::new(new_chain_sharing_validators(&fixture));

        let (queue, rx) = BlockQueue::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(chain.clone(), rx, cancel.clone()));

        queue.put_block(b3.clone()).await.unwrap();
        queue.put_block(b1.clone()).await.unwrap();
        queue.put_block(b2.clone()).await.unwrap();

        // Give the queue task a chance to drain.
        tokio::task::yield_now().await;
        for _ in 0..100 {
            if chain.block_height() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(chain.block_height(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stale_blocks_are_dropped() {
        let fixture = new_test_chain(1);
        fixture.grow(2);
        let chain = Arc::new(new_chain_sharing_validators(&fixture));

        let (queue, rx) = BlockQueue::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(chain.clone(), rx, cancel.clone()));

        // Index 0 duplicates genesis; it must be ignored, not an error.
        queue
            .put_block(chain.genesis_block().clone())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(chain.block_height(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    /// A fresh chain configured with the fixture's validator set, so the
    /// fixture's signed blocks validate against it.
    fn new_chain_sharing_validators(
        fixture: &crate::testutil::TestChain,
    ) -> crate::core::Blockchain {
        let mut protocol = crate::config::ProtocolConfig::default();
        protocol.standby_validators = fixture
            .validators
            .iter()
            .map(|pair| pair.public_key().to_string())
            .collect();
        crate::core::Blockchain::new(
            Arc::new(crate::core::storage::MemoryStore::new()),
            protocol,
            100,
        )
        .unwrap()
    }
}

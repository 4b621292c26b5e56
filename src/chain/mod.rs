pub mod events;
pub mod rpc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ExchangeEvent;

pub use rpc::RpcChain;

/// Read-only view of the chain the scan engine runs against. Implemented by
/// the Polygon JSON-RPC client; tests drive the engine with in-memory fakes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head.
    async fn latest_block(&self) -> Result<u64>;

    /// Timestamp (unix seconds) of one block.
    async fn block_timestamp(&self, number: u64) -> Result<u64>;

    /// Decoded OrdersMatched events for one inclusive block range. Callers
    /// chunk ranges themselves; per-call ordering is not guaranteed.
    async fn exchange_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ExchangeEvent>>;
}

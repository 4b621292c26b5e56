use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::Address;

use super::ChainClient;
use crate::error::{AppError, Result};
use crate::types::ExchangeEvent;

abigen!(
    CtfExchange,
    r#"[
        event OrdersMatched(bytes32 indexed takerOrderHash, address indexed takerOrderMaker, uint256 makerAssetId, uint256 takerAssetId, uint256 makerAmountFilled, uint256 takerAmountFilled)
    ]"#
);

/// Polygon JSON-RPC implementation of [`ChainClient`], bound to one CTF
/// Exchange contract instance.
pub struct RpcChain {
    provider: Arc<Provider<Http>>,
    exchange: CtfExchange<Provider<Http>>,
}

impl RpcChain {
    pub fn new(rpc_url: &str, exchange_address: Address) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AppError::Config(format!("invalid RPC url {rpc_url}: {e}")))?;
        let provider = Arc::new(provider);
        let exchange = CtfExchange::new(exchange_address, Arc::clone(&provider));
        Ok(Self { provider, exchange })
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block(number)
            .await?
            .ok_or_else(|| AppError::Contract(format!("block {number} not found")))?;
        Ok(block.timestamp.as_u64())
    }

    async fn exchange_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ExchangeEvent>> {
        let entries = self
            .exchange
            .orders_matched_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query_with_meta()
            .await
            .map_err(|e| AppError::Contract(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|(ev, meta)| ExchangeEvent {
                block_number: meta.block_number.as_u64(),
                log_index: meta.log_index.as_u64(),
                tx_hash: meta.transaction_hash,
                taker: ev.taker_order_maker,
                maker_asset_id: ev.maker_asset_id,
                taker_asset_id: ev.taker_asset_id,
                maker_amount_filled: ev.maker_amount_filled,
                taker_amount_filled: ev.taker_amount_filled,
            })
            .collect())
    }
}

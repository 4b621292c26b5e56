use crate::config::COLLATERAL_DECIMALS;
use crate::types::{ExchangeEvent, TradeDetails, TradeDirection};
use crate::utils::{to_lower_address, units_to_usd};

/// Classify a decoded OrdersMatched event as a USD-denominated trade.
///
/// Exactly one side must be the collateral asset (asset id 0 = USDC). The
/// taker paying collateral means they bought the outcome token; the taker
/// receiving collateral means they sold it. Events where neither or both
/// sides are collateral are not priceable and yield None.
pub fn extract_trade_details(event: &ExchangeEvent) -> Option<TradeDetails> {
    let maker_is_collateral = event.maker_asset_id.is_zero();
    let taker_is_collateral = event.taker_asset_id.is_zero();

    if maker_is_collateral == taker_is_collateral {
        return None;
    }

    let (usd_value, token_id, direction) = if taker_is_collateral {
        (
            units_to_usd(event.taker_amount_filled, COLLATERAL_DECIMALS),
            event.maker_asset_id.to_string(),
            TradeDirection::Buy,
        )
    } else {
        (
            units_to_usd(event.maker_amount_filled, COLLATERAL_DECIMALS),
            event.taker_asset_id.to_string(),
            TradeDirection::Sell,
        )
    };

    Some(TradeDetails {
        wallet: to_lower_address(&event.taker),
        usd_value,
        token_id,
        direction,
        tx_hash: format!("{:#x}", event.tx_hash),
    })
}

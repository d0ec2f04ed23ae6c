//! Protocol-wide yield and valuation math.

use crate::contracts::{ContractClients, ContractResult};
use crate::network::{RESERVE_DECIMALS, TOKEN_DECIMALS};
use crate::oracle::PriceOracle;
use crate::units::format_units;

/// Rebases per day.
pub const REBASES_PER_DAY: i32 = 3;

/// Fraction of the circulating supply distributed at the next rebase.
pub fn staking_rebase(distribute: u128, circulating_supply: u128) -> f64 {
    if circulating_supply == 0 {
        return 0.0;
    }
    distribute as f64 / circulating_supply as f64
}

/// Compounded yield over five days of rebases.
pub fn five_day_rate(rebase: f64) -> f64 {
    (1.0 + rebase).powi(5 * REBASES_PER_DAY) - 1.0
}

/// Compounded yield over a year of rebases.
pub fn staking_apy(rebase: f64) -> f64 {
    (1.0 + rebase).powi(365 * REBASES_PER_DAY) - 1.0
}

/// Treasury value in USD: stablecoin reserves plus the marked-down value of
/// the liquidity position.
pub fn treasury_balance(stable_reserve: u128, lp_valuation: u128, lp_markdown: u128) -> f64 {
    format_units(stable_reserve, RESERVE_DECIMALS)
        + format_units(lp_valuation, TOKEN_DECIMALS) * format_units(lp_markdown, RESERVE_DECIMALS)
}

/// Reserve-per-token price from pair reserves, scaled by `10^9`.
pub fn index_price(reserves: (u128, u128)) -> f64 {
    let (stable, token) = reserves;
    if token == 0 {
        return 0.0;
    }
    stable as f64 / token as f64
}

pub fn market_price(index_price: f64, reserve_usd_price: f64) -> f64 {
    format_index(index_price) * reserve_usd_price
}

fn format_index(index_price: f64) -> f64 {
    index_price / 10f64.powi(TOKEN_DECIMALS as i32)
}

/// Current USD price of the protocol token.
pub async fn fetch_market_price(
    clients: &ContractClients,
    oracle: &PriceOracle,
    reserve_symbol: &str,
) -> ContractResult<f64> {
    let reserves = clients.liquidity_pair()?.get_reserves().await?;
    let reserve_price = oracle.usd_price(reserve_symbol).await;
    Ok(market_price(index_price(reserves), reserve_price))
}

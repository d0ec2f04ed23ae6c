use std::time::Duration;

use crate::network::{seconds_until_block, TOKEN_DECIMALS};
use crate::units::format_units;

const BPS_DIVISOR: u128 = 10_000;

/// Relative discount of the bond price against the market price.
pub fn bond_discount(market_price: f64, bond_price: f64) -> f64 {
    if bond_price <= 0.0 || !bond_price.is_finite() {
        return 0.0;
    }
    (market_price - bond_price) / bond_price
}

/// Highest bond price accepted for a deposit, rounded to the nearest unit.
/// `None` when the price is too large to scale.
pub fn max_premium(bond_price: u128, slippage_bps: u32) -> Option<u128> {
    let numerator = bond_price
        .checked_mul(BPS_DIVISOR + u128::from(slippage_bps))?
        .checked_add(BPS_DIVISOR / 2)?;
    Some(numerator / BPS_DIVISOR)
}

pub fn debt_ratio(standardized_debt_ratio: u128) -> f64 {
    format_units(standardized_debt_ratio, TOKEN_DECIMALS)
}

/// Largest reserve deposit whose payout fits under `max_payout`.
pub fn max_bond_price(max_payout: u128, payout_per_unit: u128) -> f64 {
    if payout_per_unit == 0 {
        return 0.0;
    }
    format_units(max_payout, TOKEN_DECIMALS) / format_units(payout_per_unit, TOKEN_DECIMALS)
}

/// Remaining time until a bond position fully vests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VestingCountdown {
    FullyVested,
    Remaining(Duration),
}

pub fn vesting_countdown(current_block: u64, maturation_block: u64) -> VestingCountdown {
    if maturation_block <= current_block {
        VestingCountdown::FullyVested
    } else {
        VestingCountdown::Remaining(seconds_until_block(current_block, maturation_block))
    }
}

/// Duration of a fresh bond's vesting term.
pub fn vesting_term(vesting_blocks: u64) -> Duration {
    seconds_until_block(0, vesting_blocks)
}

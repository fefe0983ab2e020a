//! Protocol fee split and the prepaid automation fee.

use crate::ContractError;

const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FeeSplit {
    pub net: i128,
    pub fee: i128,
}

/// `fee = floor(amount * fee_bps / 10_000)`, the rest goes to the payee.
pub(crate) fn split_protocol_fee(amount: i128, fee_bps: u32) -> Result<FeeSplit, ContractError> {
    let fee = amount
        .checked_mul(fee_bps as i128)
        .ok_or(ContractError::ArithmeticOverflow)?
        / BPS_DENOMINATOR;
    Ok(FeeSplit {
        net: amount - fee,
        fee,
    })
}

/// Automation fee for covering `duration` seconds of scheduled withdrawals.
///
/// Charges `duration / interval + 1` runs, so an exact multiple still pays
/// for one extra run.
pub(crate) fn auto_withdraw_fee(
    fee_per_run: i128,
    duration: u64,
    interval: u64,
) -> Result<i128, ContractError> {
    if interval == 0 {
        return Err(ContractError::InvalidStreamParams);
    }
    let runs = (duration / interval) as i128 + 1;
    fee_per_run
        .checked_mul(runs)
        .ok_or(ContractError::ArithmeticOverflow)
}

/// Prepaid automation fee held for the duration of one invocation.
///
/// Every charge draws from the same pool, so a batch is funded once and the
/// leftover is refunded once.
#[derive(Debug)]
pub(crate) struct FeeBudget {
    remaining: i128,
}

impl FeeBudget {
    pub fn new(prepaid: i128) -> Self {
        Self { remaining: prepaid }
    }

    pub fn charge(&mut self, amount: i128) -> Result<(), ContractError> {
        if amount > self.remaining {
            return Err(ContractError::InsufficientAutoWithdrawFee);
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn remaining(&self) -> i128 {
        self.remaining
    }
}

//! Accepted assets and their protocol fee rates.
//!
//! The lifecycle only ever reads this table. Writes go through the admin
//! entry points `set_asset` / `remove_asset`.

use soroban_sdk::{Address, Env};

use crate::storage::{TTL_EXTEND_TO, TTL_THRESHOLD};
use crate::{ContractError, DataKey};

/// 100% expressed in basis points.
pub const MAX_FEE_BPS: u32 = 10_000;

pub(crate) fn is_accepted(env: &Env, asset: &Address) -> bool {
    env.storage()
        .persistent()
        .has(&DataKey::Asset(asset.clone()))
}

pub(crate) fn fee_rate_bps(env: &Env, asset: &Address) -> Option<u32> {
    env.storage().persistent().get(&DataKey::Asset(asset.clone()))
}

pub(crate) fn set_asset(env: &Env, asset: &Address, fee_bps: u32) -> Result<(), ContractError> {
    if fee_bps > MAX_FEE_BPS {
        return Err(ContractError::InvalidFeeRate);
    }
    let key = DataKey::Asset(asset.clone());
    env.storage().persistent().set(&key, &fee_bps);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
    Ok(())
}

pub(crate) fn remove_asset(env: &Env, asset: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::Asset(asset.clone()));
}

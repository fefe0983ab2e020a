use soroban_sdk::Env;

use crate::{Config, ContractError, DataKey, Stream};

/// First id handed out. Ids below this are reserved for external use.
pub const STREAM_ID_BASE: u64 = 100_000;

pub(crate) const TTL_THRESHOLD: u32 = 17_280;
pub(crate) const TTL_EXTEND_TO: u32 = 120_960;

pub(crate) fn has_config(env: &Env) -> bool {
    env.storage().instance().has(&DataKey::Config)
}

pub(crate) fn get_config(env: &Env) -> Result<Config, ContractError> {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .ok_or(ContractError::NotInitialized)
}

pub(crate) fn set_config(env: &Env, config: &Config) {
    env.storage().instance().set(&DataKey::Config, config);
    env.storage()
        .instance()
        .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
}

pub(crate) fn init_stream_counter(env: &Env) {
    env.storage()
        .instance()
        .set(&DataKey::NextStreamId, &STREAM_ID_BASE);
}

fn peek_next_id(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextStreamId)
        .unwrap_or(STREAM_ID_BASE)
}

/// Number of streams ever created.
pub(crate) fn stream_count(env: &Env) -> u64 {
    peek_next_id(env) - STREAM_ID_BASE
}

/// Allocates the next id. Must only be called once the stream is certain to
/// be persisted within the same invocation.
pub(crate) fn next_stream_id(env: &Env) -> Result<u64, ContractError> {
    let stream_id = peek_next_id(env);
    let next = stream_id
        .checked_add(1)
        .ok_or(ContractError::ArithmeticOverflow)?;
    env.storage().instance().set(&DataKey::NextStreamId, &next);
    Ok(stream_id)
}

pub(crate) fn load_stream(env: &Env, stream_id: u64) -> Result<Stream, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::Stream(stream_id))
        .ok_or(ContractError::StreamNotFound)
}

pub(crate) fn save_stream(env: &Env, stream: &Stream) {
    let key = DataKey::Stream(stream.stream_id);
    env.storage().persistent().set(&key, stream);

    // Closed streams are kept for audit, so every write refreshes the TTL.
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

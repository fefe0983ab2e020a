use soroban_sdk::{token, Address, Env};

use crate::ContractError;

/// Pulls `amount` of `asset` from `from` into the contract.
pub(crate) fn take(env: &Env, asset: &Address, from: &Address, amount: i128) -> Result<(), ContractError> {
    transfer(env, asset, from, &env.current_contract_address(), amount)
}

/// Pays `amount` of `asset` held by the contract out to `to`.
pub(crate) fn release(env: &Env, asset: &Address, to: &Address, amount: i128) -> Result<(), ContractError> {
    transfer(env, asset, &env.current_contract_address(), to, amount)
}

fn transfer(
    env: &Env,
    asset: &Address,
    from: &Address,
    to: &Address,
    amount: i128,
) -> Result<(), ContractError> {
    if amount == 0 {
        return Ok(());
    }
    if amount < 0 {
        return Err(ContractError::CustodyTransferFailed);
    }

    // A failed token call must surface as our own error so the whole
    // invocation is rolled back with a meaningful code.
    let token_client = token::Client::new(env, asset);
    match token_client.try_transfer(from, to, &amount) {
        Ok(Ok(())) => Ok(()),
        _ => Err(ContractError::CustodyTransferFailed),
    }
}

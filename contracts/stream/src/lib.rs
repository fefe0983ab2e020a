#![no_std]

mod accrual;
mod custody;
mod fees;
mod permissions;
mod registry;
mod storage;

use soroban_sdk::{contract, contractimpl, contracttype, symbol_short, Address, Env, Vec};

use crate::fees::FeeBudget;

pub use crate::permissions::Permission;
pub use crate::registry::MAX_FEE_BPS;
pub use crate::storage::STREAM_ID_BASE;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Global configuration for the streaming ledger.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub admin: Address,
    /// Receives the protocol fee cut of every recipient payout.
    pub fee_recipient: Address,
    /// Receives prepaid automation fees; performs scheduled withdrawals.
    pub automation_account: Address,
    /// Asset automation fees are paid in.
    pub native_token: Address,
    /// Flat automation fee per scheduled withdrawal run.
    pub auto_withdraw_fee: i128,
    /// Adapter allowed to act on behalf of an originating party.
    pub delegate: Option<Address>,
    /// The only asset streams may be funded with through `delegate`.
    pub delegate_asset: Option<Address>,
}

/// Who is calling and on whose behalf.
///
/// `immediate` must authorize the invocation. `originator` only matters when
/// `immediate` is the delegate a stream was created through; direct callers
/// pass themselves in both fields.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallerContext {
    pub immediate: Address,
    pub originator: Address,
}

impl CallerContext {
    pub fn direct(caller: Address) -> Self {
        Self {
            immediate: caller.clone(),
            originator: caller,
        }
    }
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamStatus {
    Active = 0,
    Paused = 1,
    Closed = 2,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cliff {
    pub amount: i128,
    pub due_at: u64,
    pub released: bool,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PauseState {
    pub paused_at: u64,
    /// Paused time not yet consumed by a withdrawal.
    pub accumulated: u64,
    pub paused_by: Option<Address>,
    pub is_paused: bool,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Permissions {
    pub pause: Permission,
    pub close: Permission,
    pub recipient: Permission,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stream {
    pub stream_id: u64,
    /// Set when the stream was created through the configured delegate.
    pub delegate: Option<Address>,
    pub sender: Address,
    pub recipient: Address,
    pub asset: Address,
    pub deposit: i128,
    pub rate_per_interval: i128,
    pub remaining: i128,
    pub start_time: u64,
    pub stop_time: u64,
    pub interval: u64,
    pub last_withdraw_time: u64,
    pub created_at: u64,
    pub auto_withdraw_interval: u64,
    pub auto_withdraw: bool,
    pub closed: bool,
    pub cliff: Cliff,
    pub permissions: Permissions,
    pub pause: PauseState,
}

impl Stream {
    pub fn status(&self) -> StreamStatus {
        if self.closed {
            StreamStatus::Closed
        } else if self.pause.is_paused {
            StreamStatus::Paused
        } else {
            StreamStatus::Active
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateStreamParams {
    pub recipient: Address,
    pub asset: Address,
    pub deposit: i128,
    pub start_time: u64,
    pub stop_time: u64,
    pub interval: u64,
    pub cliff_amount: i128,
    pub cliff_time: u64,
    pub auto_withdraw: bool,
    pub auto_withdraw_interval: u64,
    pub permissions: Permissions,
}

#[soroban_sdk::contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    InvalidStreamParams = 1,
    NonDivisibleSchedule = 2,
    StreamNotFound = 3,
    StreamClosed = 4,
    StreamPaused = 5,
    StreamExpired = 6,
    StreamNotPaused = 7,
    PermissionDenied = 8,
    InsufficientAutoWithdrawFee = 9,
    NothingToWithdraw = 10,
    LengthMismatch = 11,
    CustodyTransferFailed = 12,
    AssetNotAccepted = 13,
    NotInitialized = 14,
    AlreadyInitialized = 15,
    InvalidFeeRate = 16,
    ArithmeticOverflow = 17,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamEvent {
    /// (stream_id, deposit)
    Created(u64, i128),
    /// (stream_id, new_stop_time, added_deposit)
    Extended(u64, u64, i128),
    /// (stream_id, gross_amount, protocol_fee)
    Withdrew(u64, i128, i128),
    Paused(u64, Address),
    /// (stream_id, paused_duration)
    Resumed(u64, u64),
    /// (stream_id, paid_to_recipient, refunded_to_sender)
    Closed(u64, i128, i128),
    RecipientSet(u64, Address),
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Config,         // Instance storage for global settings.
    NextStreamId,   // Instance storage for the auto-incrementing ID counter.
    Stream(u64),    // Persistent storage for individual stream data.
    Asset(Address), // Persistent storage: accepted asset -> protocol fee bps.
}

fn overflow<T>(value: Option<T>) -> Result<T, ContractError> {
    value.ok_or(ContractError::ArithmeticOverflow)
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl CadenceStream {
    /// Checks creation parameters and returns the per-interval rate.
    fn validate_stream_params(
        env: &Env,
        sender: &Address,
        params: &CreateStreamParams,
        now: u64,
    ) -> Result<i128, ContractError> {
        let invalid = params.recipient == *sender
            || params.recipient == env.current_contract_address()
            || params.deposit <= 0
            || params.interval == 0
            || params.start_time < now
            || params.stop_time <= params.start_time
            || params.cliff_amount < 0
            || params.cliff_amount > params.deposit
            || (params.cliff_amount > 0 && params.cliff_time > params.stop_time)
            || (params.auto_withdraw && params.auto_withdraw_interval == 0);
        if invalid {
            return Err(ContractError::InvalidStreamParams);
        }

        let span = params.stop_time - params.start_time;
        if span % params.interval != 0 {
            return Err(ContractError::NonDivisibleSchedule);
        }
        let intervals = (span / params.interval) as i128;
        let streamed = params.deposit - params.cliff_amount;

        // Integer division must reconstruct the streamed amount exactly.
        let rate = streamed / intervals;
        if overflow(rate.checked_mul(intervals))? != streamed {
            return Err(ContractError::NonDivisibleSchedule);
        }
        Ok(rate)
    }

    fn is_delegated_creation(config: &Config, ctx: &CallerContext, asset: &Address) -> bool {
        config.delegate.as_ref() == Some(&ctx.immediate)
            && config.delegate_asset.as_ref() == Some(asset)
    }

    fn open_fee_budget(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        prepaid_fee: i128,
    ) -> Result<FeeBudget, ContractError> {
        if prepaid_fee < 0 {
            return Err(ContractError::InvalidStreamParams);
        }
        custody::take(env, &config.native_token, &ctx.immediate, prepaid_fee)?;
        Ok(FeeBudget::new(prepaid_fee))
    }

    fn charge_automation_fee(
        env: &Env,
        config: &Config,
        budget: &mut FeeBudget,
        fee: i128,
    ) -> Result<(), ContractError> {
        budget.charge(fee)?;
        custody::release(env, &config.native_token, &config.automation_account, fee)
    }

    fn refund_fee_budget(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        budget: FeeBudget,
    ) -> Result<(), ContractError> {
        custody::release(env, &config.native_token, &ctx.immediate, budget.remaining())
    }

    /// Pays a recipient-directed amount and returns the protocol fee taken.
    ///
    /// The delegate collecting for the recipient is paid gross; it applies its
    /// own fee layer downstream.
    fn pay_recipient(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream: &Stream,
        amount: i128,
    ) -> Result<i128, ContractError> {
        if amount == 0 {
            return Ok(0);
        }
        if permissions::is_delegated(stream, ctx) && ctx.originator == stream.recipient {
            custody::release(env, &stream.asset, &ctx.immediate, amount)?;
            return Ok(0);
        }

        let fee_bps = registry::fee_rate_bps(env, &stream.asset).unwrap_or(0);
        let split = fees::split_protocol_fee(amount, fee_bps)?;
        custody::release(env, &stream.asset, &stream.recipient, split.net)?;
        custody::release(env, &stream.asset, &config.fee_recipient, split.fee)?;
        Ok(split.fee)
    }

    /// Returns unearned funds to the sender. Never charged a fee.
    fn refund_sender(
        env: &Env,
        ctx: &CallerContext,
        stream: &Stream,
        amount: i128,
    ) -> Result<(), ContractError> {
        let to = if permissions::is_delegated(stream, ctx) && ctx.originator == stream.sender {
            &ctx.immediate
        } else {
            &stream.sender
        };
        custody::release(env, &stream.asset, to, amount)
    }

    /// Moves the withdrawal anchor past `elapsed` intervals plus any paused
    /// time, consuming the latter.
    fn consume_elapsed(stream: &mut Stream, elapsed: u64) -> Result<(), ContractError> {
        if elapsed == 0 {
            return Ok(());
        }
        let advance = overflow(
            elapsed
                .checked_mul(stream.interval)
                .and_then(|t| t.checked_add(stream.pause.accumulated)),
        )?;
        stream.last_withdraw_time = overflow(stream.last_withdraw_time.checked_add(advance))?;
        stream.pause.accumulated = 0;
        Ok(())
    }

    /// Books the recipient's current entitlement against the stream and
    /// returns it. Funds are not moved here.
    fn accrue_withdrawal(stream: &mut Stream, now: u64) -> Result<i128, ContractError> {
        let elapsed = accrual::elapsed_intervals(stream, now);
        let amount = accrual::recipient_share(stream, now)?;
        if amount == 0 {
            return Ok(0);
        }

        stream.remaining = overflow(stream.remaining.checked_sub(amount))?;
        Self::consume_elapsed(stream, elapsed)?;
        if accrual::cliff_due(stream, now) {
            stream.cliff.released = true;
        }
        Ok(amount)
    }

    /// Slides the schedule forward by the paused span and clears the pause.
    fn apply_resume(stream: &mut Stream, now: u64) -> Result<u64, ContractError> {
        let from = stream.pause.paused_at.max(stream.start_time);
        let duration = now.saturating_sub(from);

        stream.pause.accumulated = overflow(stream.pause.accumulated.checked_add(duration))?;
        stream.stop_time = overflow(stream.stop_time.checked_add(duration))?;
        stream.pause = PauseState {
            accumulated: stream.pause.accumulated,
            ..PauseState::default()
        };
        Ok(duration)
    }

    fn require_open(stream: &Stream) -> Result<(), ContractError> {
        if stream.closed {
            return Err(ContractError::StreamClosed);
        }
        Ok(())
    }

    fn require_running(stream: &Stream) -> Result<(), ContractError> {
        Self::require_open(stream)?;
        if stream.pause.is_paused {
            return Err(ContractError::StreamPaused);
        }
        Ok(())
    }

    fn create_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        params: CreateStreamParams,
        now: u64,
        budget: &mut FeeBudget,
    ) -> Result<u64, ContractError> {
        let delegated = Self::is_delegated_creation(config, ctx, &params.asset);
        let sender = if delegated {
            ctx.originator.clone()
        } else {
            ctx.immediate.clone()
        };

        let rate = Self::validate_stream_params(env, &sender, &params, now)?;
        if !registry::is_accepted(env, &params.asset) {
            return Err(ContractError::AssetNotAccepted);
        }

        custody::take(env, &params.asset, &ctx.immediate, params.deposit)?;

        if params.auto_withdraw {
            let fee = fees::auto_withdraw_fee(
                config.auto_withdraw_fee,
                params.stop_time - params.start_time,
                params.auto_withdraw_interval,
            )?;
            Self::charge_automation_fee(env, config, budget, fee)?;
        }

        // Only allocate the id once every fallible step above has passed.
        let stream_id = storage::next_stream_id(env)?;
        let mut stream = Stream {
            stream_id,
            delegate: if delegated {
                Some(ctx.immediate.clone())
            } else {
                None
            },
            sender,
            recipient: params.recipient,
            asset: params.asset,
            deposit: params.deposit,
            rate_per_interval: rate,
            remaining: params.deposit,
            start_time: params.start_time,
            stop_time: params.stop_time,
            interval: params.interval,
            last_withdraw_time: params.start_time,
            created_at: now,
            auto_withdraw_interval: params.auto_withdraw_interval,
            auto_withdraw: params.auto_withdraw,
            closed: false,
            cliff: Cliff {
                amount: params.cliff_amount,
                due_at: params.cliff_time,
                released: params.cliff_amount == 0,
            },
            permissions: params.permissions,
            pause: PauseState::default(),
        };

        let cliff_paid = if accrual::cliff_due(&stream, now) {
            stream.cliff.released = true;
            stream.remaining -= stream.cliff.amount;
            stream.cliff.amount
        } else {
            0
        };

        storage::save_stream(env, &stream);
        Self::pay_recipient(env, config, ctx, &stream, cliff_paid)?;

        env.events().publish(
            (symbol_short!("created"), stream_id),
            StreamEvent::Created(stream_id, stream.deposit),
        );
        Ok(stream_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn extend_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream_id: u64,
        new_stop_time: u64,
        now: u64,
        budget: &mut FeeBudget,
    ) -> Result<i128, ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_running(&stream)?;
        if now > stream.stop_time {
            return Err(ContractError::StreamExpired);
        }
        if permissions::resolve_caller(&stream, ctx) != stream.sender {
            return Err(ContractError::PermissionDenied);
        }
        if new_stop_time <= stream.stop_time {
            return Err(ContractError::InvalidStreamParams);
        }

        let span = new_stop_time - stream.stop_time;
        if span % stream.interval != 0 {
            return Err(ContractError::NonDivisibleSchedule);
        }
        let added_intervals = (span / stream.interval) as i128;
        let added = overflow(added_intervals.checked_mul(stream.rate_per_interval))?;

        stream.deposit = overflow(stream.deposit.checked_add(added))?;
        stream.remaining = overflow(stream.remaining.checked_add(added))?;
        stream.stop_time = new_stop_time;
        storage::save_stream(env, &stream);

        custody::take(env, &stream.asset, &ctx.immediate, added)?;
        if stream.auto_withdraw {
            let fee =
                fees::auto_withdraw_fee(config.auto_withdraw_fee, span, stream.auto_withdraw_interval)?;
            Self::charge_automation_fee(env, config, budget, fee)?;
        }

        env.events().publish(
            (symbol_short!("extended"), stream_id),
            StreamEvent::Extended(stream_id, new_stop_time, added),
        );
        Ok(added)
    }

    fn withdraw_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream_id: u64,
        now: u64,
    ) -> Result<i128, ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_running(&stream)?;

        let amount = Self::accrue_withdrawal(&mut stream, now)?;
        if amount == 0 {
            return Err(ContractError::NothingToWithdraw);
        }

        // CEI: update state before external token transfer.
        storage::save_stream(env, &stream);
        let fee = Self::pay_recipient(env, config, ctx, &stream, amount)?;

        env.events().publish(
            (symbol_short!("withdrew"), stream_id),
            StreamEvent::Withdrew(stream_id, amount, fee),
        );
        Ok(amount)
    }

    fn pause_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream_id: u64,
        now: u64,
    ) -> Result<(), ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_running(&stream)?;
        if now > stream.stop_time {
            return Err(ContractError::StreamExpired);
        }

        let caller = permissions::resolve_caller(&stream, ctx);
        permissions::authorize(stream.permissions.pause, &stream, &caller)?;

        // Settle what is already due so nothing is stranded while paused.
        let due = Self::accrue_withdrawal(&mut stream, now)?;

        stream.pause.is_paused = true;
        stream.pause.paused_at = now;
        stream.pause.paused_by = Some(caller.clone());
        storage::save_stream(env, &stream);

        if due > 0 {
            let fee = Self::pay_recipient(env, config, ctx, &stream, due)?;
            env.events().publish(
                (symbol_short!("withdrew"), stream_id),
                StreamEvent::Withdrew(stream_id, due, fee),
            );
        }

        env.events().publish(
            (symbol_short!("paused"), stream_id),
            StreamEvent::Paused(stream_id, caller),
        );
        Ok(())
    }

    fn resume_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream_id: u64,
        now: u64,
    ) -> Result<u64, ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_open(&stream)?;
        if !stream.pause.is_paused {
            return Err(ContractError::StreamNotPaused);
        }

        let caller = permissions::resolve_caller(&stream, ctx);
        let is_pauser = stream.pause.paused_by.as_ref() == Some(&caller);
        if !is_pauser && caller != config.admin {
            return Err(ContractError::PermissionDenied);
        }

        let duration = Self::apply_resume(&mut stream, now)?;
        storage::save_stream(env, &stream);

        env.events().publish(
            (symbol_short!("resumed"), stream_id),
            StreamEvent::Resumed(stream_id, duration),
        );
        Ok(duration)
    }

    fn close_one(
        env: &Env,
        config: &Config,
        ctx: &CallerContext,
        stream_id: u64,
        now: u64,
    ) -> Result<(i128, i128), ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_open(&stream)?;

        let caller = permissions::resolve_caller(&stream, ctx);
        permissions::authorize(stream.permissions.close, &stream, &caller)?;

        if stream.pause.is_paused {
            Self::apply_resume(&mut stream, now)?;
        }

        let elapsed = accrual::elapsed_intervals(&stream, now);
        let to_recipient = accrual::recipient_share(&stream, now)?;
        let to_sender = accrual::sender_share(&stream, now)?;

        Self::consume_elapsed(&mut stream, elapsed)?;
        stream.cliff.released = true;
        stream.remaining = 0;
        stream.closed = true;
        storage::save_stream(env, &stream);

        Self::pay_recipient(env, config, ctx, &stream, to_recipient)?;
        Self::refund_sender(env, ctx, &stream, to_sender)?;

        env.events().publish(
            (symbol_short!("closed"), stream_id),
            StreamEvent::Closed(stream_id, to_recipient, to_sender),
        );
        Ok((to_recipient, to_sender))
    }

    fn set_recipient_one(
        env: &Env,
        ctx: &CallerContext,
        stream_id: u64,
        new_recipient: Address,
    ) -> Result<(), ContractError> {
        let mut stream = storage::load_stream(env, stream_id)?;
        Self::require_running(&stream)?;

        // Evaluated against the immediate caller; delegates get no say here.
        permissions::authorize(stream.permissions.recipient, &stream, &ctx.immediate)?;

        if new_recipient == stream.sender || new_recipient == env.current_contract_address() {
            return Err(ContractError::InvalidStreamParams);
        }

        stream.recipient = new_recipient.clone();
        storage::save_stream(env, &stream);

        env.events().publish(
            (symbol_short!("recipient"), stream_id),
            StreamEvent::RecipientSet(stream_id, new_recipient),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct CadenceStream;

#[contractimpl]
impl CadenceStream {
    /// Initialise the contract.
    ///
    /// Must be called exactly once before any other operation. Persists the
    /// admin, the fee and automation destinations, the asset automation fees
    /// are paid in and the per-run automation fee. The id counter starts at
    /// [`STREAM_ID_BASE`]. No delegate is configured initially.
    ///
    /// # Errors
    /// - `AlreadyInitialized` on a second call
    /// - `InvalidStreamParams` if `auto_withdraw_fee` is negative
    pub fn init(
        env: Env,
        admin: Address,
        fee_recipient: Address,
        automation_account: Address,
        native_token: Address,
        auto_withdraw_fee: i128,
    ) -> Result<(), ContractError> {
        if storage::has_config(&env) {
            return Err(ContractError::AlreadyInitialized);
        }
        if auto_withdraw_fee < 0 {
            return Err(ContractError::InvalidStreamParams);
        }
        let config = Config {
            admin,
            fee_recipient,
            automation_account,
            native_token,
            auto_withdraw_fee,
            delegate: None,
            delegate_asset: None,
        };
        storage::set_config(&env, &config);
        storage::init_stream_counter(&env);
        Ok(())
    }

    /// Create a stream funded by `ctx.immediate`.
    ///
    /// The deposit is split into `(stop_time - start_time) / interval` equal
    /// interval payments after setting aside `cliff_amount`, which becomes
    /// claimable at `cliff_time`.
    ///
    /// # Parameters
    /// - `ctx`: caller context. When `ctx.immediate` is the configured delegate
    ///   and `params.asset` is the delegate asset, the stream's sender is
    ///   `ctx.originator` and the delegate is recorded on the stream.
    /// - `params`: stream schedule, cliff, automation and permission settings.
    /// - `prepaid_fee`: native-token amount made available for the automation
    ///   fee. Any excess is refunded before returning.
    ///
    /// # Errors
    /// - `InvalidStreamParams`: recipient equals sender or this contract,
    ///   non-positive deposit, zero interval, start in the past,
    ///   `stop_time <= start_time`, cliff larger than the deposit or due after
    ///   `stop_time`, automation enabled with a zero interval
    /// - `NonDivisibleSchedule`: the span is not a whole number of intervals,
    ///   or `deposit - cliff_amount` does not split evenly across them
    /// - `AssetNotAccepted`, `InsufficientAutoWithdrawFee`,
    ///   `CustodyTransferFailed`
    ///
    /// # Events
    /// - `created(stream_id)` with `StreamEvent::Created`
    /// - `withdrew(stream_id)` is *not* emitted for a cliff released at
    ///   creation; the payout is visible in token events
    ///
    /// # Examples
    /// - deposit 1000, start 100, stop 1100, interval 100 gives a rate of 100
    /// - deposit 1050 with a 50 cliff over the same schedule also gives 100
    pub fn create(
        env: Env,
        ctx: CallerContext,
        params: CreateStreamParams,
        prepaid_fee: i128,
    ) -> Result<u64, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut budget = Self::open_fee_budget(&env, &config, &ctx, prepaid_fee)?;
        let stream_id = Self::create_one(&env, &config, &ctx, params, now, &mut budget)?;
        Self::refund_fee_budget(&env, &config, &ctx, budget)?;
        Ok(stream_id)
    }

    /// Create several streams in one invocation.
    ///
    /// Streams are created in order. The prepaid automation fee is pooled
    /// across all of them and the leftover refunded once. Any failure aborts
    /// the whole batch.
    pub fn create_streams(
        env: Env,
        ctx: CallerContext,
        streams: Vec<CreateStreamParams>,
        prepaid_fee: i128,
    ) -> Result<Vec<u64>, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut budget = Self::open_fee_budget(&env, &config, &ctx, prepaid_fee)?;
        let mut created_ids = Vec::new(&env);
        for params in streams.iter() {
            let stream_id = Self::create_one(&env, &config, &ctx, params, now, &mut budget)?;
            created_ids.push_back(stream_id);
        }
        Self::refund_fee_budget(&env, &config, &ctx, budget)?;
        Ok(created_ids)
    }

    /// Push a stream's stop time out to `new_stop_time`.
    ///
    /// The added span is funded at the existing rate; `ctx.immediate` pays the
    /// extra deposit. Only the sender may extend, directly or through the
    /// delegate the stream was created with. Streams with automation enabled
    /// are charged the automation fee for the added span.
    ///
    /// # Errors
    /// - `StreamClosed`, `StreamPaused`, `StreamExpired` (`now > stop_time`)
    /// - `PermissionDenied` unless the resolved caller is the sender
    /// - `InvalidStreamParams` if `new_stop_time <= stop_time`
    /// - `NonDivisibleSchedule` if the added span is not a whole number of
    ///   intervals
    /// - `InsufficientAutoWithdrawFee`, `CustodyTransferFailed`
    ///
    /// Returns the amount added to the deposit.
    pub fn extend(
        env: Env,
        ctx: CallerContext,
        stream_id: u64,
        new_stop_time: u64,
        prepaid_fee: i128,
    ) -> Result<i128, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut budget = Self::open_fee_budget(&env, &config, &ctx, prepaid_fee)?;
        let added =
            Self::extend_one(&env, &config, &ctx, stream_id, new_stop_time, now, &mut budget)?;
        Self::refund_fee_budget(&env, &config, &ctx, budget)?;
        Ok(added)
    }

    pub fn extend_streams(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
        new_stop_times: Vec<u64>,
        prepaid_fee: i128,
    ) -> Result<Vec<i128>, ContractError> {
        ctx.immediate.require_auth();
        if stream_ids.len() != new_stop_times.len() {
            return Err(ContractError::LengthMismatch);
        }
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut budget = Self::open_fee_budget(&env, &config, &ctx, prepaid_fee)?;
        let mut added = Vec::new(&env);
        for (stream_id, new_stop_time) in stream_ids.iter().zip(new_stop_times.iter()) {
            added.push_back(Self::extend_one(
                &env,
                &config,
                &ctx,
                stream_id,
                new_stop_time,
                now,
                &mut budget,
            )?);
        }
        Self::refund_fee_budget(&env, &config, &ctx, budget)?;
        Ok(added)
    }

    /// Pay out everything the recipient has earned so far.
    ///
    /// Anyone may trigger a withdrawal; the funds always go to the recipient
    /// (net of the asset's protocol fee). When the stream's delegate calls on
    /// behalf of the recipient, the gross amount goes to the delegate instead
    /// and no protocol fee is taken.
    ///
    /// # Errors
    /// - `StreamClosed`, `StreamPaused`
    /// - `NothingToWithdraw` when no whole interval has elapsed and no cliff
    ///   is due
    ///
    /// Returns the gross amount withdrawn.
    ///
    /// # Examples
    /// - deposit 1000 over `[100, 1100)` in intervals of 100: withdrawing at
    ///   t=600 pays 500, leaves 500 remaining and moves the anchor to 600
    pub fn withdraw(env: Env, ctx: CallerContext, stream_id: u64) -> Result<i128, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        Self::withdraw_one(&env, &config, &ctx, stream_id, now)
    }

    pub fn withdraw_streams(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
    ) -> Result<Vec<i128>, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut amounts = Vec::new(&env);
        for stream_id in stream_ids.iter() {
            amounts.push_back(Self::withdraw_one(&env, &config, &ctx, stream_id, now)?);
        }
        Ok(amounts)
    }

    /// Pause a running stream.
    ///
    /// Gated by the stream's `pause` permission, checked against the resolved
    /// caller. Anything already due to the recipient is paid out first.
    ///
    /// # Errors
    /// - `StreamClosed`, `StreamPaused` (already paused), `StreamExpired`
    /// - `PermissionDenied`
    pub fn pause(env: Env, ctx: CallerContext, stream_id: u64) -> Result<(), ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        Self::pause_one(&env, &config, &ctx, stream_id, now)
    }

    pub fn pause_streams(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
    ) -> Result<(), ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        for stream_id in stream_ids.iter() {
            Self::pause_one(&env, &config, &ctx, stream_id, now)?;
        }
        Ok(())
    }

    /// Resume a paused stream.
    ///
    /// Only the identity that paused the stream, or the admin, may resume it.
    /// The schedule slides forward by the paused span (measured from
    /// `start_time` if the pause began earlier), so no value is gained or lost.
    ///
    /// # Errors
    /// - `StreamClosed`, `StreamNotPaused`, `PermissionDenied`
    ///
    /// Returns the paused duration credited back.
    pub fn resume(env: Env, ctx: CallerContext, stream_id: u64) -> Result<u64, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        Self::resume_one(&env, &config, &ctx, stream_id, now)
    }

    pub fn resume_streams(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
    ) -> Result<(), ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        for stream_id in stream_ids.iter() {
            Self::resume_one(&env, &config, &ctx, stream_id, now)?;
        }
        Ok(())
    }

    /// Close a stream for good.
    ///
    /// Gated by the stream's `close` permission. A paused stream is resumed
    /// first. The recipient receives what it has earned (net of protocol fee)
    /// and the sender gets the unearned remainder back without a fee. Closed
    /// streams stay readable but accept no further transitions.
    ///
    /// # Errors
    /// - `StreamClosed`, `PermissionDenied`, `CustodyTransferFailed`
    ///
    /// Returns `(paid_to_recipient, refunded_to_sender)`.
    pub fn close(
        env: Env,
        ctx: CallerContext,
        stream_id: u64,
    ) -> Result<(i128, i128), ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();
        Self::close_one(&env, &config, &ctx, stream_id, now)
    }

    pub fn close_streams(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
    ) -> Result<Vec<(i128, i128)>, ContractError> {
        ctx.immediate.require_auth();
        let config = storage::get_config(&env)?;
        let now = env.ledger().timestamp();

        let mut settled = Vec::new(&env);
        for stream_id in stream_ids.iter() {
            settled.push_back(Self::close_one(&env, &config, &ctx, stream_id, now)?);
        }
        Ok(settled)
    }

    /// Hand the receiving side of a stream to `new_recipient`.
    ///
    /// Gated by the stream's `recipient` permission against `ctx.immediate`
    /// only. Balances are untouched.
    ///
    /// # Errors
    /// - `StreamClosed`, `StreamPaused`, `PermissionDenied`
    /// - `InvalidStreamParams` if `new_recipient` is the sender or this contract
    pub fn set_recipient(
        env: Env,
        ctx: CallerContext,
        stream_id: u64,
        new_recipient: Address,
    ) -> Result<(), ContractError> {
        ctx.immediate.require_auth();
        Self::set_recipient_one(&env, &ctx, stream_id, new_recipient)
    }

    pub fn set_recipients(
        env: Env,
        ctx: CallerContext,
        stream_ids: Vec<u64>,
        new_recipients: Vec<Address>,
    ) -> Result<(), ContractError> {
        ctx.immediate.require_auth();
        if stream_ids.len() != new_recipients.len() {
            return Err(ContractError::LengthMismatch);
        }
        for (stream_id, new_recipient) in stream_ids.iter().zip(new_recipients.iter()) {
            Self::set_recipient_one(&env, &ctx, stream_id, new_recipient)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_stream(env: Env, stream_id: u64) -> Result<Stream, ContractError> {
        storage::load_stream(&env, stream_id)
    }

    pub fn get_stream_status(env: Env, stream_id: u64) -> Result<StreamStatus, ContractError> {
        Ok(storage::load_stream(&env, stream_id)?.status())
    }

    /// Whole intervals accrued to the recipient since the last withdrawal.
    pub fn elapsed_intervals(env: Env, stream_id: u64) -> Result<u64, ContractError> {
        let stream = storage::load_stream(&env, stream_id)?;
        Ok(accrual::elapsed_intervals(&stream, env.ledger().timestamp()))
    }

    /// What `who` could take out of the stream right now.
    ///
    /// | Caller    | Value                                              |
    /// |-----------|----------------------------------------------------|
    /// | recipient | earned and not yet withdrawn, cliff included       |
    /// | sender    | `remaining` minus the recipient's share            |
    /// | anyone    | 0                                                  |
    ///
    /// The two shares always add up to `remaining` while the stream is open.
    pub fn entitlement(env: Env, stream_id: u64, who: Address) -> Result<i128, ContractError> {
        let stream = storage::load_stream(&env, stream_id)?;
        accrual::entitlement(&stream, env.ledger().timestamp(), &who)
    }

    pub fn stream_count(env: Env) -> u64 {
        storage::stream_count(&env)
    }

    pub fn get_config(env: Env) -> Result<Config, ContractError> {
        storage::get_config(&env)
    }

    pub fn is_accepted(env: Env, asset: Address) -> bool {
        registry::is_accepted(&env, &asset)
    }

    pub fn fee_rate_bps(env: Env, asset: Address) -> Option<u32> {
        registry::fee_rate_bps(&env, &asset)
    }
}

#[contractimpl]
impl CadenceStream {
    /// Rotate the admin key. Requires the current admin's authorization.
    pub fn set_admin(env: Env, new_admin: Address) -> Result<(), ContractError> {
        let mut config = storage::get_config(&env)?;
        let old_admin = config.admin.clone();
        old_admin.require_auth();

        config.admin = new_admin.clone();
        storage::set_config(&env, &config);

        env.events().publish(
            (symbol_short!("admin"), symbol_short!("updated")),
            (old_admin, new_admin),
        );
        Ok(())
    }

    pub fn set_fee_recipient(env: Env, fee_recipient: Address) -> Result<(), ContractError> {
        let mut config = storage::get_config(&env)?;
        config.admin.require_auth();
        config.fee_recipient = fee_recipient;
        storage::set_config(&env, &config);
        Ok(())
    }

    /// Change where automation fees go and how much each run costs. Applies to
    /// fees charged from now on; streams already paid for are unaffected.
    pub fn set_automation(
        env: Env,
        automation_account: Address,
        auto_withdraw_fee: i128,
    ) -> Result<(), ContractError> {
        let mut config = storage::get_config(&env)?;
        config.admin.require_auth();
        if auto_withdraw_fee < 0 {
            return Err(ContractError::InvalidStreamParams);
        }
        config.automation_account = automation_account;
        config.auto_withdraw_fee = auto_withdraw_fee;
        storage::set_config(&env, &config);
        Ok(())
    }

    /// Register the native-asset adapter and the wrapped asset it streams.
    ///
    /// Streams already created through a previous delegate keep it.
    pub fn set_delegate(env: Env, delegate: Address, asset: Address) -> Result<(), ContractError> {
        let mut config = storage::get_config(&env)?;
        config.admin.require_auth();
        config.delegate = Some(delegate);
        config.delegate_asset = Some(asset);
        storage::set_config(&env, &config);
        Ok(())
    }

    pub fn clear_delegate(env: Env) -> Result<(), ContractError> {
        let mut config = storage::get_config(&env)?;
        config.admin.require_auth();
        config.delegate = None;
        config.delegate_asset = None;
        storage::set_config(&env, &config);
        Ok(())
    }

    /// Accept `asset` for new streams with a protocol fee of `fee_bps`, or
    /// update the rate of an already accepted asset.
    ///
    /// # Errors
    /// - `InvalidFeeRate` if `fee_bps` exceeds [`MAX_FEE_BPS`]
    pub fn set_asset(env: Env, asset: Address, fee_bps: u32) -> Result<(), ContractError> {
        let config = storage::get_config(&env)?;
        config.admin.require_auth();
        registry::set_asset(&env, &asset, fee_bps)?;

        env.events()
            .publish((symbol_short!("asset"), asset), fee_bps);
        Ok(())
    }

    /// Stop accepting `asset` for new streams. Existing streams keep running
    /// and are paid out without a protocol fee.
    pub fn remove_asset(env: Env, asset: Address) -> Result<(), ContractError> {
        let config = storage::get_config(&env)?;
        config.admin.require_auth();
        registry::remove_asset(&env, &asset);
        Ok(())
    }
}

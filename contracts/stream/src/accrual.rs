//! Time and balance accounting.
//!
//! Pure functions over a [`Stream`] snapshot and a single clock reading. Nothing
//! here touches storage or moves funds.

use soroban_sdk::Address;

use crate::{ContractError, Stream};

/// Which side of a stream an identity is on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Party {
    Sender,
    Recipient,
}

pub(crate) fn party_of(stream: &Stream, who: &Address) -> Option<Party> {
    if who == &stream.sender {
        Some(Party::Sender)
    } else if who == &stream.recipient {
        Some(Party::Recipient)
    } else {
        None
    }
}

/// Whole intervals accrued to the recipient since the last withdrawal.
///
/// While paused the clock is held at `paused_at`; `resume` credits the
/// paused span back through `pause.accumulated` and a later `stop_time`.
pub(crate) fn elapsed_intervals(stream: &Stream, now: u64) -> u64 {
    let now = if stream.pause.is_paused {
        now.min(stream.pause.paused_at)
    } else {
        now
    };

    let anchor = stream
        .last_withdraw_time
        .saturating_add(stream.pause.accumulated);
    if now < anchor {
        return 0;
    }

    now.min(stream.stop_time).saturating_sub(anchor) / stream.interval
}

pub(crate) fn cliff_due(stream: &Stream, now: u64) -> bool {
    !stream.cliff.released && now >= stream.cliff.due_at
}

/// Amount the recipient could withdraw right now, cliff included.
pub(crate) fn recipient_share(stream: &Stream, now: u64) -> Result<i128, ContractError> {
    if stream.closed {
        return Ok(0);
    }

    let intervals = elapsed_intervals(stream, now) as i128;
    let mut share = intervals
        .checked_mul(stream.rate_per_interval)
        .ok_or(ContractError::ArithmeticOverflow)?;

    if cliff_due(stream, now) {
        share = share
            .checked_add(stream.cliff.amount)
            .ok_or(ContractError::ArithmeticOverflow)?;
    }
    Ok(share)
}

/// Portion of the remaining balance not yet earned by the recipient.
pub(crate) fn sender_share(stream: &Stream, now: u64) -> Result<i128, ContractError> {
    if stream.closed {
        return Ok(0);
    }
    stream
        .remaining
        .checked_sub(recipient_share(stream, now)?)
        .ok_or(ContractError::ArithmeticOverflow)
}

/// Query view: what `who` is entitled to at `now`. Strangers get zero.
pub(crate) fn entitlement(stream: &Stream, now: u64, who: &Address) -> Result<i128, ContractError> {
    match party_of(stream, who) {
        Some(Party::Recipient) => recipient_share(stream, now),
        Some(Party::Sender) => sender_share(stream, now),
        None => Ok(0),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use soroban_sdk::{testutils::Address as _, Address, Env};

    use super::*;
    use crate::{Cliff, PauseState, Permission, Permissions};

    /// deposit 1000, start 100, stop 1100, interval 100, rate 100.
    pub(crate) fn sample_stream(env: &Env) -> Stream {
        Stream {
            stream_id: 100_000,
            delegate: None,
            sender: Address::generate(env),
            recipient: Address::generate(env),
            asset: Address::generate(env),
            deposit: 1000,
            rate_per_interval: 100,
            remaining: 1000,
            start_time: 100,
            stop_time: 1100,
            interval: 100,
            last_withdraw_time: 100,
            created_at: 0,
            auto_withdraw_interval: 0,
            auto_withdraw: false,
            closed: false,
            cliff: Cliff {
                amount: 0,
                due_at: 0,
                released: true,
            },
            permissions: Permissions {
                pause: Permission::Either,
                close: Permission::Either,
                recipient: Permission::SenderOnly,
            },
            pause: PauseState::default(),
        }
    }

    #[test]
    fn nothing_accrues_before_start() {
        let env = Env::default();
        let stream = sample_stream(&env);
        assert_eq!(elapsed_intervals(&stream, 0), 0);
        assert_eq!(elapsed_intervals(&stream, 199), 0);
        assert_eq!(elapsed_intervals(&stream, 200), 1);
    }

    #[test]
    fn mid_stream_split() {
        let env = Env::default();
        let stream = sample_stream(&env);

        assert_eq!(elapsed_intervals(&stream, 600), 5);
        assert_eq!(entitlement(&stream, 600, &stream.recipient), Ok(500));
        assert_eq!(entitlement(&stream, 600, &stream.sender), Ok(500));
    }

    #[test]
    fn capped_at_stop_time() {
        let env = Env::default();
        let stream = sample_stream(&env);
        assert_eq!(elapsed_intervals(&stream, 5_000), 10);
        assert_eq!(entitlement(&stream, 5_000, &stream.recipient), Ok(1000));
        assert_eq!(entitlement(&stream, 5_000, &stream.sender), Ok(0));
    }

    #[test]
    fn partial_interval_is_floored() {
        let env = Env::default();
        let stream = sample_stream(&env);
        assert_eq!(elapsed_intervals(&stream, 699), 5);
    }

    #[test]
    fn stranger_entitled_to_nothing() {
        let env = Env::default();
        let stream = sample_stream(&env);
        let stranger = Address::generate(&env);
        assert_eq!(entitlement(&stream, 600, &stranger), Ok(0));
    }

    #[test]
    fn accumulated_pause_offsets_the_anchor() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        stream.last_withdraw_time = 700;
        stream.pause.accumulated = 200;
        stream.stop_time = 1300;

        assert_eq!(elapsed_intervals(&stream, 850), 0);
        assert_eq!(elapsed_intervals(&stream, 1000), 1);
        assert_eq!(elapsed_intervals(&stream, 2000), 4);
    }

    #[test]
    fn clock_is_held_while_paused() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        stream.pause.is_paused = true;
        stream.pause.paused_at = 450;

        assert_eq!(elapsed_intervals(&stream, 900), 3);
    }

    #[test]
    fn cliff_counts_once_due() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        stream.deposit = 1050;
        stream.remaining = 1050;
        stream.cliff = Cliff {
            amount: 50,
            due_at: 300,
            released: false,
        };

        assert_eq!(recipient_share(&stream, 299), Ok(100));
        assert_eq!(recipient_share(&stream, 300), Ok(250));
        assert_eq!(sender_share(&stream, 300), Ok(800));
    }

    #[test]
    fn shares_always_sum_to_remaining() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        stream.deposit = 1300;
        stream.remaining = 1300;
        stream.cliff = Cliff {
            amount: 300,
            due_at: 550,
            released: false,
        };

        for now in (0..1300).step_by(37) {
            let r = recipient_share(&stream, now).unwrap();
            let s = sender_share(&stream, now).unwrap();
            assert_eq!(r + s, stream.remaining, "at t={now}");
        }
    }

    #[test]
    fn closed_stream_owes_nothing() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        stream.closed = true;
        stream.remaining = 0;
        assert_eq!(entitlement(&stream, 600, &stream.recipient), Ok(0));
        assert_eq!(entitlement(&stream, 600, &stream.sender), Ok(0));
    }
}

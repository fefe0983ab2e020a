//! Who may pause, close, or reassign a stream.

use soroban_sdk::{contracttype, Address};

use crate::{CallerContext, ContractError, Stream};

/// Capability attached to a gated stream action.
///
/// Evaluated by membership only. The discriminants are storage tags and carry
/// no ordering.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Permission {
    Nobody = 0,
    SenderOnly = 1,
    RecipientOnly = 2,
    Either = 3,
}

impl Permission {
    pub fn allows(self, is_sender: bool, is_recipient: bool) -> bool {
        match self {
            Permission::Nobody => false,
            Permission::SenderOnly => is_sender,
            Permission::RecipientOnly => is_recipient,
            Permission::Either => is_sender || is_recipient,
        }
    }
}

/// True when the immediate caller is the delegate the stream was created
/// through. Identity checks then act on the originator instead.
pub(crate) fn is_delegated(stream: &Stream, ctx: &CallerContext) -> bool {
    stream.delegate.as_ref() == Some(&ctx.immediate)
}

/// Identity used for sender/recipient checks on this stream.
pub(crate) fn resolve_caller(stream: &Stream, ctx: &CallerContext) -> Address {
    if is_delegated(stream, ctx) {
        ctx.originator.clone()
    } else {
        ctx.immediate.clone()
    }
}

pub(crate) fn authorize(
    permission: Permission,
    stream: &Stream,
    caller: &Address,
) -> Result<(), ContractError> {
    if permission.allows(caller == &stream.sender, caller == &stream.recipient) {
        Ok(())
    } else {
        Err(ContractError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use soroban_sdk::{testutils::Address as _, Address, Env};

    use super::*;
    use crate::accrual::tests::sample_stream;

    #[test]
    fn lattice_membership() {
        assert!(!Permission::Nobody.allows(true, false));
        assert!(!Permission::Nobody.allows(false, true));

        assert!(Permission::SenderOnly.allows(true, false));
        assert!(!Permission::SenderOnly.allows(false, true));

        assert!(Permission::RecipientOnly.allows(false, true));
        assert!(!Permission::RecipientOnly.allows(true, false));

        assert!(Permission::Either.allows(true, false));
        assert!(Permission::Either.allows(false, true));
        assert!(!Permission::Either.allows(false, false));
    }

    #[test]
    fn stranger_is_denied_even_for_either() {
        let env = Env::default();
        let stream = sample_stream(&env);
        let stranger = Address::generate(&env);

        assert_eq!(
            authorize(Permission::Either, &stream, &stranger),
            Err(ContractError::PermissionDenied)
        );
        assert_eq!(authorize(Permission::Either, &stream, &stream.sender), Ok(()));
    }

    #[test]
    fn delegate_resolves_to_originator() {
        let env = Env::default();
        let mut stream = sample_stream(&env);
        let gateway = Address::generate(&env);
        stream.delegate = Some(gateway.clone());

        let via_gateway = CallerContext {
            immediate: gateway.clone(),
            originator: stream.sender.clone(),
        };
        assert!(is_delegated(&stream, &via_gateway));
        assert_eq!(resolve_caller(&stream, &via_gateway), stream.sender);
    }

    #[test]
    fn originator_ignored_for_non_delegates() {
        let env = Env::default();
        let stream = sample_stream(&env);
        let other = Address::generate(&env);

        // Claiming to act for the sender does not help a caller that is not
        // the stream's delegate.
        let ctx = CallerContext {
            immediate: other.clone(),
            originator: stream.sender.clone(),
        };
        assert!(!is_delegated(&stream, &ctx));
        assert_eq!(resolve_caller(&stream, &ctx), other);
    }
}

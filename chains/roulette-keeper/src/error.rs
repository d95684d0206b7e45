//! Recovery classification for keeper errors.

use crate::actions::ActionError;
use crate::claims::ClaimError;
use crate::state::StateError;
use core_logic::{ErrorKind, PhaseError};

/// Kind of the first classifiable error in the chain.
///
/// An exhausted phase is always fatal even when its last attempt timed out.
/// Without a keeper error in the chain the bare network cause decides, and
/// unknown errors are fatal.
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    for cause in error.chain() {
        if cause.downcast_ref::<PhaseError>().is_some() {
            return ErrorKind::Fatal;
        }
        if let Some(e) = cause.downcast_ref::<ClaimError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<ActionError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<StateError>() {
            return e.kind();
        }
    }
    core_logic::classify(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use core_logic::NetworkError;

    #[test]
    fn test_action_error_through_context() {
        let err: anyhow::Result<()> = Err(ActionError::Network(NetworkError::from_status(
            429,
            "https://relay.example.com",
        )))
        .context("close_bets");
        assert_eq!(classify(&err.unwrap_err()), ErrorKind::RateLimited);
    }

    #[test]
    fn test_exhausted_phase_is_fatal() {
        let err = anyhow::Error::new(PhaseError::Exhausted {
            phase: "get_random".to_string(),
            attempts: 3,
            last_error: "timeout".to_string(),
        });
        assert_eq!(classify(&err), ErrorKind::Fatal);
    }

    #[test]
    fn test_state_not_found_is_fatal() {
        let err = anyhow::Error::new(StateError::Unavailable {
            address: "GameSession".to_string(),
        });
        assert_eq!(classify(&err), ErrorKind::Fatal);
        assert_eq!(classify(&anyhow::anyhow!("???")), ErrorKind::Fatal);
    }

    #[test]
    fn test_bare_network_error_keeps_its_kind() {
        let err = anyhow::Error::new(NetworkError::from_status(503, "https://api.example.com"))
            .context("player-round-bets");
        assert_eq!(classify(&err), ErrorKind::Transient);
    }

    #[test]
    fn test_incomplete_claims_keep_their_kind() {
        let err = anyhow::Error::new(ClaimError::Incomplete {
            round: 9,
            kind: ErrorKind::Transient,
            failures: 2,
            endpoints: vec!["https://api.example.com".to_string()],
        });
        assert_eq!(classify(&err), ErrorKind::Transient);
    }
}

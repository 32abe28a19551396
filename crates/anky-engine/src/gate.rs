//! Eligibility gate
//!
//! A session qualifies for an artifact when the client flagged it and the
//! writer kept going for at least the configured minimum.

use anky_utils::types::WritingSession;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotFlagged,
    TooShort { elapsed: Duration, required: Duration },
}

impl Eligibility {
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => f.write_str("eligible"),
            Self::NotFlagged => f.write_str("session is not flagged as an anky"),
            Self::TooShort { elapsed, required } => write!(
                f,
                "session lasted {}s, {}s required",
                elapsed.as_secs(),
                required.as_secs()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityGate {
    min_elapsed: Duration,
}

impl EligibilityGate {
    #[must_use]
    pub const fn new(min_elapsed: Duration) -> Self {
        Self { min_elapsed }
    }

    #[must_use]
    pub fn evaluate(&self, session: &WritingSession) -> Eligibility {
        if !session.is_anky {
            return Eligibility::NotFlagged;
        }
        let elapsed = Duration::from_secs(session.elapsed_secs);
        if elapsed < self.min_elapsed {
            return Eligibility::TooShort {
                elapsed,
                required: self.min_elapsed,
            };
        }
        Eligibility::Eligible
    }
}

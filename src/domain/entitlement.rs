use crate::domain::models::{Entitlement, InterviewMode};
use serde::Serialize;

pub const TRIAL_USED_MESSAGE: &str = "Trial used. Please upgrade to continue.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum SessionAccess {
    Granted { consumes_trial: bool },
    Denied { message: String },
}

/// Decides whether a user may open a new interview session.
///
/// Active plans are unlimited. Without one, a single quick session is
/// allowed as a trial; opening it consumes the trial.
pub fn access_for(entitlement: &Entitlement, mode: InterviewMode) -> SessionAccess {
    if entitlement.is_active() {
        return SessionAccess::Granted {
            consumes_trial: false,
        };
    }
    if !entitlement.trial_used && mode == InterviewMode::Quick {
        return SessionAccess::Granted {
            consumes_trial: true,
        };
    }
    SessionAccess::Denied {
        message: TRIAL_USED_MESSAGE.to_string(),
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Delivery lifecycle status of a submission.
///
/// The string form is the stable wire/storage representation and is shared
/// by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmailStatus {
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "INTAKING")]
    Intaking,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "CALLING-SENT-CALLBACK")]
    CallingSentCallback,
    #[serde(rename = "CALLING-FAILED-CALLBACK")]
    CallingFailedCallback,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "INVALID")]
    Invalid,
    #[serde(rename = "SENT-ACKNOWLEDGED")]
    SentAcknowledged,
    #[serde(rename = "FAILED-ACKNOWLEDGED")]
    FailedAcknowledged,
}

impl EmailStatus {
    /// Status written by every successful insert.
    pub const INITIAL: EmailStatus = EmailStatus::Accepted;

    /// Statuses in which the external consumer holds the submission.
    pub const IN_FLIGHT: [EmailStatus; 4] = [
        EmailStatus::Intaking,
        EmailStatus::Processing,
        EmailStatus::CallingSentCallback,
        EmailStatus::CallingFailedCallback,
    ];

    /// Statuses that never change again.
    pub const TERMINAL: [EmailStatus; 3] = [
        EmailStatus::Invalid,
        EmailStatus::SentAcknowledged,
        EmailStatus::FailedAcknowledged,
    ];

    pub const ALL: [EmailStatus; 11] = [
        EmailStatus::Accepted,
        EmailStatus::Intaking,
        EmailStatus::Ready,
        EmailStatus::Processing,
        EmailStatus::CallingSentCallback,
        EmailStatus::CallingFailedCallback,
        EmailStatus::Sent,
        EmailStatus::Failed,
        EmailStatus::Invalid,
        EmailStatus::SentAcknowledged,
        EmailStatus::FailedAcknowledged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Accepted => "ACCEPTED",
            EmailStatus::Intaking => "INTAKING",
            EmailStatus::Ready => "READY",
            EmailStatus::Processing => "PROCESSING",
            EmailStatus::CallingSentCallback => "CALLING-SENT-CALLBACK",
            EmailStatus::CallingFailedCallback => "CALLING-FAILED-CALLBACK",
            EmailStatus::Sent => "SENT",
            EmailStatus::Failed => "FAILED",
            EmailStatus::Invalid => "INVALID",
            EmailStatus::SentAcknowledged => "SENT-ACKNOWLEDGED",
            EmailStatus::FailedAcknowledged => "FAILED-ACKNOWLEDGED",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Status a stalled submission is forced back to on requeue.
    ///
    /// Only in-flight statuses have a target; everything else is not
    /// requeuable.
    pub fn requeue_target(&self) -> Option<EmailStatus> {
        match self {
            EmailStatus::Intaking => Some(EmailStatus::Accepted),
            EmailStatus::Processing => Some(EmailStatus::Ready),
            EmailStatus::CallingSentCallback => Some(EmailStatus::Sent),
            EmailStatus::CallingFailedCallback => Some(EmailStatus::Failed),
            _ => None,
        }
    }

    /// Forward edges the consumer may report.
    ///
    /// Requeue edges are not listed here; they are only reachable through
    /// [`EmailStatus::requeue_target`].
    pub fn can_advance_to(&self, next: EmailStatus) -> bool {
        use EmailStatus::*;

        matches!(
            (self, next),
            (Accepted, Intaking)
                | (Accepted, Invalid)
                | (Intaking, Ready)
                | (Intaking, Processing)
                | (Intaking, Invalid)
                | (Ready, Processing)
                | (Processing, CallingSentCallback)
                | (Processing, CallingFailedCallback)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Invalid)
                | (Sent, CallingSentCallback)
                | (Sent, SentAcknowledged)
                | (Failed, CallingFailedCallback)
                | (Failed, FailedAcknowledged)
                | (CallingSentCallback, Sent)
                | (CallingSentCallback, SentAcknowledged)
                | (CallingFailedCallback, Failed)
                | (CallingFailedCallback, FailedAcknowledged)
        )
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown email status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EmailStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_form_round_trips() {
        for status in EmailStatus::ALL {
            assert_eq!(status.as_str().parse::<EmailStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("_META".parse::<EmailStatus>().is_err());
        assert!("accepted".parse::<EmailStatus>().is_err());
    }

    #[test]
    fn test_requeue_mapping() {
        assert_eq!(
            EmailStatus::Intaking.requeue_target(),
            Some(EmailStatus::Accepted)
        );
        assert_eq!(
            EmailStatus::Processing.requeue_target(),
            Some(EmailStatus::Ready)
        );
        assert_eq!(
            EmailStatus::CallingSentCallback.requeue_target(),
            Some(EmailStatus::Sent)
        );
        assert_eq!(
            EmailStatus::CallingFailedCallback.requeue_target(),
            Some(EmailStatus::Failed)
        );

        for status in EmailStatus::ALL {
            assert_eq!(status.requeue_target().is_some(), status.is_in_flight());
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_outgoing_edges() {
        for from in EmailStatus::TERMINAL {
            for to in EmailStatus::ALL {
                assert!(!from.can_advance_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_forward_path() {
        use EmailStatus::*;

        let path = [
            Accepted,
            Intaking,
            Ready,
            Processing,
            CallingSentCallback,
            SentAcknowledged,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }

        assert!(Accepted.can_advance_to(Invalid));
        assert!(Processing.can_advance_to(Invalid));
        assert!(!Accepted.can_advance_to(Accepted));
        assert!(!Processing.can_advance_to(Accepted));
    }
}

//! Ticket expiration policies.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use super::TicketState;

/// Decides how long a ticket lives.
///
/// Policies are serialized together with the ticket, so a ticket read back on
/// another node expires exactly as it would have on the node that issued it.
/// All durations are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// The ticket never expires and is never purged by the store.
    NeverExpires,
    /// The ticket expires a fixed time after creation.
    HardTimeout { time_to_kill: i64 },
    /// The ticket expires after a period without use.
    Timeout { time_to_idle: i64 },
    /// The ticket expires after a number of uses or a period without use,
    /// whichever comes first.
    MultiUseOrTimeout { number_of_uses: u32, time_to_kill: i64 },
    /// The ticket expires at the end of its maximum lifetime or after a
    /// period without use, whichever comes first.
    TicketGrantingTicket {
        max_time_to_live: i64,
        time_to_kill: i64,
    },
}

impl ExpirationPolicy {
    /// Creates a [`ExpirationPolicy::HardTimeout`] policy.
    pub fn hard_timeout(time_to_kill: i64) -> Self {
        Self::HardTimeout { time_to_kill }
    }

    /// Creates a [`ExpirationPolicy::Timeout`] policy.
    pub fn timeout(time_to_idle: i64) -> Self {
        Self::Timeout { time_to_idle }
    }

    /// Creates a [`ExpirationPolicy::MultiUseOrTimeout`] policy.
    pub fn multi_use(number_of_uses: u32, time_to_kill: i64) -> Self {
        Self::MultiUseOrTimeout {
            number_of_uses,
            time_to_kill,
        }
    }

    /// Creates a [`ExpirationPolicy::TicketGrantingTicket`] policy.
    pub fn ticket_granting(max_time_to_live: i64, time_to_kill: i64) -> Self {
        Self::TicketGrantingTicket {
            max_time_to_live,
            time_to_kill,
        }
    }

    /// Stateless time-to-live in seconds. `< 1` means never auto-expire.
    pub fn time_to_live(&self) -> i64 {
        match *self {
            Self::NeverExpires => 0,
            Self::HardTimeout { time_to_kill } => time_to_kill,
            Self::Timeout { time_to_idle } => time_to_idle,
            Self::MultiUseOrTimeout { time_to_kill, .. } => time_to_kill,
            Self::TicketGrantingTicket {
                max_time_to_live, ..
            } => max_time_to_live,
        }
    }

    /// Time-to-live in seconds given the ticket's usage history.
    pub fn time_to_live_for(&self, state: &TicketState) -> i64 {
        self.time_to_live_for_at(state, Timestamp::now())
    }

    /// Time-to-live in seconds given the ticket's usage history at `now`.
    ///
    /// For ticket-granting tickets this is the time left until the first of
    /// the two limits is reached, never less than one second so an already
    /// expired ticket still becomes eligible for passive expiry.
    pub fn time_to_live_for_at(&self, state: &TicketState, now: Timestamp) -> i64 {
        match *self {
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                if max_time_to_live < 1 {
                    return max_time_to_live;
                }
                let hard = remaining(state.created_at, max_time_to_live, now);
                let idle = remaining(state.last_used_at, time_to_kill, now);
                hard.min(idle).max(1)
            }
            _ => self.time_to_live(),
        }
    }

    /// Returns whether the ticket is expired right now.
    pub fn is_expired(&self, state: &TicketState) -> bool {
        self.is_expired_at(state, Timestamp::now())
    }

    /// Returns whether the ticket is expired at `now`.
    pub fn is_expired_at(&self, state: &TicketState, now: Timestamp) -> bool {
        match *self {
            Self::NeverExpires => false,
            Self::HardTimeout { time_to_kill } => passed(state.created_at, time_to_kill, now),
            Self::Timeout { time_to_idle } => passed(state.last_used_at, time_to_idle, now),
            Self::MultiUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                state.use_count >= number_of_uses
                    || passed(state.last_used_at, time_to_kill, now)
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                passed(state.created_at, max_time_to_live, now)
                    || passed(state.last_used_at, time_to_kill, now)
            }
        }
    }
}

/// Returns true once `now` is strictly after `since + seconds`.
fn passed(since: Timestamp, seconds: i64, now: Timestamp) -> bool {
    match since.checked_add(SignedDuration::from_secs(seconds)) {
        Ok(deadline) => now > deadline,
        Err(_) => false,
    }
}

/// Seconds left until `since + seconds`, negative once passed.
fn remaining(since: Timestamp, seconds: i64, now: Timestamp) -> i64 {
    seconds.saturating_sub(now.duration_since(since).as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    #[test]
    fn test_never_expires() {
        let policy = ExpirationPolicy::NeverExpires;
        let state = TicketState::new(at(0));
        assert_eq!(policy.time_to_live(), 0);
        assert!(!policy.is_expired_at(&state, at(1_000_000)));
    }

    #[test]
    fn test_hard_timeout() {
        let policy = ExpirationPolicy::hard_timeout(10);
        let mut state = TicketState::new(at(100));
        state.record_use_at(at(109));

        assert_eq!(policy.time_to_live(), 10);
        assert!(!policy.is_expired_at(&state, at(110)));
        assert!(policy.is_expired_at(&state, at(111)));
    }

    #[test]
    fn test_sliding_timeout() {
        let policy = ExpirationPolicy::timeout(10);
        let mut state = TicketState::new(at(100));
        state.record_use_at(at(108));

        assert!(!policy.is_expired_at(&state, at(115)));
        assert!(policy.is_expired_at(&state, at(119)));
    }

    #[test]
    fn test_multi_use_or_timeout() {
        let policy = ExpirationPolicy::multi_use(1, 10);
        let mut state = TicketState::new(at(100));
        assert!(!policy.is_expired_at(&state, at(101)));

        state.record_use_at(at(101));
        assert!(policy.is_expired_at(&state, at(101)));

        let fresh = TicketState::new(at(100));
        assert!(policy.is_expired_at(&fresh, at(111)));
    }

    #[test]
    fn test_ticket_granting_expiry() {
        let policy = ExpirationPolicy::ticket_granting(100, 20);
        let mut state = TicketState::new(at(0));

        assert!(!policy.is_expired_at(&state, at(15)));
        assert!(policy.is_expired_at(&state, at(21)));

        state.record_use_at(at(90));
        assert!(!policy.is_expired_at(&state, at(100)));
        assert!(policy.is_expired_at(&state, at(101)));
    }

    #[test]
    fn test_ticket_granting_stateful_ttl() {
        let policy = ExpirationPolicy::ticket_granting(100, 20);
        let mut state = TicketState::new(at(0));

        assert_eq!(policy.time_to_live(), 100);
        assert_eq!(policy.time_to_live_for_at(&state, at(5)), 15);

        state.record_use_at(at(90));
        assert_eq!(policy.time_to_live_for_at(&state, at(95)), 5);
        assert_eq!(policy.time_to_live_for_at(&state, at(500)), 1);
    }

    #[test]
    fn test_stateless_policies_ignore_state() {
        let state = TicketState::new(at(0));
        let policy = ExpirationPolicy::multi_use(3, 42);
        assert_eq!(policy.time_to_live_for_at(&state, at(30)), 42);
    }

    #[test]
    fn test_policy_serialization_shape() {
        let json = serde_json::to_value(ExpirationPolicy::hard_timeout(10)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "policy": "hard_timeout", "time_to_kill": 10 })
        );
    }
}

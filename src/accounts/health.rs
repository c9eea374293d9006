//! Circuit breaker: the pure state-transition rules applied to an
//! [`Account`]'s health fields on every success/failure report (§3 invariant,
//! §4.1 "Reporting", §7).
//!
//! Generalizes the teacher's `provider_health.rs` tracker — which models a
//! time-based cooldown-with-backoff circuit breaker — down to the simpler
//! strict error-count breaker this design specifies: `errorCount ≥
//! maxErrorCount ⇔ ¬isHealthy`, with no backoff window attached to recovery
//! (recovery happens only via an explicit health-check probe, §4.1).

use chrono::Utc;

use super::Account;

/// Applied after every upstream/transport failure that counts against the
/// breaker (context-limit-exceeded errors never call this — §4.1, §8).
pub fn record_error(account: &mut Account, message: impl Into<String>, global_max_errors: u32) {
    account.error_count = account.error_count.saturating_add(1);
    account.last_error_time = Some(Utc::now());
    account.last_error_message = Some(message.into());

    let threshold = account.effective_max_error_count(global_max_errors);
    if account.error_count >= threshold {
        account.is_healthy = false;
    }
    debug_assert_eq!(
        account.error_count >= threshold,
        !account.is_healthy,
        "circuit breaker invariant violated"
    );
}

/// Applied after every successful upstream call: zeroes the counter and
/// re-asserts health (§4.1).
pub fn record_success(account: &mut Account) {
    account.error_count = 0;
    account.is_healthy = true;
    account.last_used_at = Some(Utc::now());
}

/// Health-check probes use a breaker threshold of 1: a single probe failure
/// immediately flips the account unhealthy (§4.1 "Health checker").
pub fn record_probe_result(account: &mut Account, ok: bool, message: Option<String>) {
    if ok {
        record_success(account);
    } else {
        account.error_count = account.error_count.max(1);
        account.is_healthy = false;
        account.last_error_time = Some(Utc::now());
        account.last_error_message = message.or(account.last_error_message.clone());
    }
}

/// Admin-forced recovery: clears the breaker without requiring a probe.
pub fn clear_cooldown(account: &mut Account) {
    account.error_count = 0;
    account.is_healthy = true;
    account.last_error_message = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::credentials::ProviderCredentials;

    fn account() -> Account {
        Account::new(
            "a".to_string(),
            "us-east-1".to_string(),
            ProviderCredentials::social_stub(),
        )
    }

    #[test]
    fn three_consecutive_errors_trip_breaker_at_threshold_three() {
        let mut a = account();
        record_error(&mut a, "e1", 3);
        assert!(a.is_healthy);
        record_error(&mut a, "e2", 3);
        assert!(a.is_healthy);
        record_error(&mut a, "e3", 3);
        assert!(!a.is_healthy);
        assert_eq!(a.error_count, 3);
        assert_eq!(a.last_error_message.as_deref(), Some("e3"));
    }

    #[test]
    fn success_resets_breaker() {
        let mut a = account();
        record_error(&mut a, "e1", 3);
        record_error(&mut a, "e2", 3);
        record_success(&mut a);
        assert!(a.is_healthy);
        assert_eq!(a.error_count, 0);
    }

    #[test]
    fn per_account_override_takes_precedence_over_global() {
        let mut a = account();
        a.max_error_count = Some(1);
        record_error(&mut a, "e1", 3);
        assert!(!a.is_healthy);
    }

    #[test]
    fn probe_failure_flips_unhealthy_immediately() {
        let mut a = account();
        record_probe_result(&mut a, false, Some("probe failed".to_string()));
        assert!(!a.is_healthy);
        assert_eq!(a.error_count, 1);
    }
}

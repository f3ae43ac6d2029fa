//! Retry and Catch routing for failed states.
//!
//! Stateless: the attempt counters live on the execution record and are
//! passed in. Retry rules are consulted before Catch rules; the first rule
//! whose matcher list names the error kind (or `ALL`) wins. Fatal kinds
//! match nothing and always propagate.

use std::collections::BTreeMap;
use std::time::Duration;

use idprov_types::error::ErrorInfo;
use idprov_types::workflow::{CatchRule, ResultPath, RetryRule};

/// Longest delay ever scheduled, regardless of rule settings.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// What to do with a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Route<'a> {
    /// Re-invoke the same state after `delay`. `rule` indexes the Retry list.
    Retry { rule: usize, delay: Duration },
    /// Move to `next`, writing the error object at `result_path`.
    Catch {
        next: &'a str,
        result_path: &'a ResultPath,
    },
    /// No rule applies; the failure leaves this execution.
    Propagate,
}

/// Delay before the retry that follows `used` earlier retries of `rule`.
///
/// `interval * backoff_rate^used`, capped at `max_delay_secs` when set.
pub fn retry_delay(rule: &RetryRule, used: u32) -> Duration {
    let exponent = i32::try_from(used).unwrap_or(i32::MAX);
    let secs = rule.interval_secs as f64 * rule.backoff_rate.powi(exponent);
    let mut delay = if secs.is_finite() && secs < MAX_RETRY_DELAY.as_secs_f64() {
        Duration::from_secs_f64(secs.max(0.0))
    } else {
        MAX_RETRY_DELAY
    };
    if let Some(cap) = rule.max_delay_secs {
        delay = delay.min(Duration::from_secs(cap));
    }
    delay
}

/// Route `error` through the Retry rules, then the Catch rules.
///
/// `retry_counts` holds the retries already scheduled per rule index for the
/// current state entry. A rule with `max_attempts = N` allows `N - 1`
/// retries; once exhausted the error falls through to Catch.
pub fn route_failure<'a>(
    retry: &[RetryRule],
    catch: &'a [CatchRule],
    error: &ErrorInfo,
    retry_counts: &BTreeMap<usize, u32>,
) -> Route<'a> {
    if let Some((index, rule)) = retry.iter().enumerate().find(|(_, r)| r.matches(&error.error)) {
        let used = retry_counts.get(&index).copied().unwrap_or(0);
        if used + 1 < rule.max_attempts {
            return Route::Retry {
                rule: index,
                delay: retry_delay(rule, used),
            };
        }
    }
    route_catch(catch, error)
}

/// Route `error` through Catch rules only.
pub fn route_catch<'a>(catch: &'a [CatchRule], error: &ErrorInfo) -> Route<'a> {
    match catch.iter().find(|c| c.matches(&error.error)) {
        Some(rule) => Route::Catch {
            next: &rule.next,
            result_path: &rule.result_path,
        },
        None => Route::Propagate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_types::error::kinds;

    fn catch_all() -> Vec<CatchRule> {
        vec![CatchRule::new(&["ALL"], "Iterator failure", ResultPath::at("$.error_output").unwrap())]
    }

    #[test]
    fn delay_grows_by_backoff_rate() {
        let rule = RetryRule::new(&["Timeout"], 2, 5, 2.0);
        assert_eq!(retry_delay(&rule, 0), Duration::from_secs(2));
        assert_eq!(retry_delay(&rule, 1), Duration::from_secs(4));
        assert_eq!(retry_delay(&rule, 3), Duration::from_secs(16));
    }

    #[test]
    fn delay_respects_cap() {
        let rule = RetryRule::new(&["OnboardingTaskNotCompleted"], 600, 5, 2.0).with_max_delay(600);
        assert_eq!(retry_delay(&rule, 0), Duration::from_secs(600));
        assert_eq!(retry_delay(&rule, 4), Duration::from_secs(600));

        let runaway = RetryRule::new(&["x"], 1, 5000, 10.0);
        assert_eq!(retry_delay(&runaway, 4000), MAX_RETRY_DELAY);
    }

    #[test]
    fn max_attempts_counts_total_invocations() {
        let retry = vec![RetryRule::new(&["HTTPError"], 120, 3, 1.0)];
        let catch = catch_all();
        let error = ErrorInfo::new("HTTPError", "502");
        let mut counts = BTreeMap::new();

        // Attempt 1 failed: retry.
        assert!(matches!(route_failure(&retry, &catch, &error, &counts), Route::Retry { rule: 0, .. }));
        counts.insert(0, 1);
        // Attempt 2 failed: retry.
        assert!(matches!(route_failure(&retry, &catch, &error, &counts), Route::Retry { rule: 0, .. }));
        counts.insert(0, 2);
        // Attempt 3 failed: exhausted, caught.
        assert_eq!(
            route_failure(&retry, &catch, &error, &counts),
            Route::Catch {
                next: "Iterator failure",
                result_path: &ResultPath::at("$.error_output").unwrap(),
            }
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let retry = vec![
            RetryRule::new(&["ThrottlingException"], 10, 2, 1.0),
            RetryRule::new(&["ALL"], 1, 5, 1.0),
        ];
        let error = ErrorInfo::new("ThrottlingException", "slow down");
        let mut counts = BTreeMap::new();
        counts.insert(0, 1);
        // Rule 0 matched and is exhausted; rule 1 is not consulted.
        assert_eq!(route_failure(&retry, &[], &error, &counts), Route::Propagate);
    }

    #[test]
    fn unmatched_kind_skips_retry() {
        let retry = vec![RetryRule::new(&["Timeout"], 1, 3, 2.0)];
        let error = ErrorInfo::new("ValidateCfnTemplateError", "bad template");
        assert!(matches!(
            route_failure(&retry, &catch_all(), &error, &BTreeMap::new()),
            Route::Catch { .. }
        ));
    }

    #[test]
    fn fatal_kinds_propagate() {
        let retry = vec![RetryRule::new(&["ALL"], 1, 3, 2.0)];
        let error = ErrorInfo::new(kinds::EXECUTION_TIMEOUT, "budget exhausted");
        assert_eq!(route_failure(&retry, &catch_all(), &error, &BTreeMap::new()), Route::Propagate);
    }
}

use crate::loadbalancing::{LoadBalancer, Preferences};

use super::{RetryDecision, RetryPolicy, RetryPolicyContext};

/// Retries retryable failures until `max_attempts` attempts have been made.
#[derive(Debug, Clone, Copy)]
pub struct RetryNTimes {
    max_attempts: usize,
}

impl RetryNTimes {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl RetryPolicy for RetryNTimes {
    fn evaluate(
        &self,
        context: &RetryPolicyContext<'_>,
        load_balancer: &dyn LoadBalancer,
        preferences: &Preferences,
    ) -> RetryDecision {
        let retryable = context.last_error().map_or(true, |e| e.is_retryable());
        let next_origin = load_balancer.choose(preferences).filter(|candidate| {
            !context
                .previously_attempted_origins()
                .iter()
                .any(|tried| tried == candidate)
        });

        RetryDecision {
            should_retry: retryable && context.current_retry_count() < self.max_attempts,
            next_origin,
        }
    }
}

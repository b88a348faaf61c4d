//! Deadline → rate limit → handler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::request::InboundRequest;
use crate::resilience::{DeadlineContext, DeadlineEnforcer, DeadlineOutcome, TimedOut};
use crate::security::{Decision, RateLimiter};

#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome<T> {
    Completed(T),
    /// The rate limiter refused the caller; the handler never ran.
    Rejected(Decision),
    TimedOut(TimedOut),
}

impl<T> GuardOutcome<T> {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardOutcome::Completed(_) => "completed",
            GuardOutcome::Rejected(_) => "rejected",
            GuardOutcome::TimedOut(_) => "timed_out",
        }
    }
}

/// Composes the per-request guards in front of a handler.
///
/// The deadline is outermost, so a slow store during the rate-limit check
/// counts against the request's budget.
#[derive(Debug, Clone)]
pub struct RequestGuard {
    deadline: Arc<DeadlineEnforcer>,
    limiter: Arc<RateLimiter>,
}

impl RequestGuard {
    pub fn new(deadline: Arc<DeadlineEnforcer>, limiter: Arc<RateLimiter>) -> Self {
        Self { deadline, limiter }
    }

    /// Handler errors propagate unchanged.
    pub async fn handle<F, Fut, T, E>(
        &self,
        handler_name: &str,
        request: InboundRequest,
        budget: Option<Duration>,
        handler: F,
    ) -> Result<GuardOutcome<T>, E>
    where
        F: FnOnce(InboundRequest, DeadlineContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let limiter = &self.limiter;
        let outcome = self
            .deadline
            .run(handler_name, budget, |ctx| async move {
                let decision = limiter.try_consume(request.caller_id()).await;
                if !decision.is_allowed() {
                    tracing::debug!(
                        caller = %request.caller_id(),
                        kind = request.kind(),
                        decision = decision.as_str(),
                        "Request rejected by rate limiter"
                    );
                    return Ok(GuardOutcome::Rejected(decision));
                }
                tracing::trace!(
                    caller = %request.caller_id(),
                    remaining = ?ctx.remaining(),
                    "Request admitted"
                );
                handler(request, ctx).await.map(GuardOutcome::Completed)
            })
            .await?;

        let outcome = match outcome {
            DeadlineOutcome::Completed(outcome) => outcome,
            DeadlineOutcome::TimedOut(timed_out) => GuardOutcome::TimedOut(timed_out),
        };
        tracing::debug!(handler = handler_name, outcome = outcome.as_str(), "Request finished");
        Ok(outcome)
    }
}

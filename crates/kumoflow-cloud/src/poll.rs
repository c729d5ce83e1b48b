//! Async operation convergence poller
//!
//! A mutating call against a cloud management plane returns as soon as the
//! operation is accepted, not when it finishes. [`Convergence`] bridges the
//! gap: it repeatedly probes the resource status and blocks the caller until
//! the status matches a target set, the configured timeout expires, or an
//! unrecoverable error occurs.
//!
//! Management planes are eventually consistent. A read issued right after an
//! accepted write may not see it yet, and a single stale "succeeded" read can
//! flip back to "in progress" on the next one. Two knobs absorb this:
//! `continuous_target` requires the target to be observed that many times in
//! a row before convergence is declared, and [`MissingBehavior`] states how a
//! not-found read is classified (pending during create-convergence, converged
//! during delete-convergence).

use crate::descriptor::ResourceDescriptor;
use crate::error::CloudError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

/// One observation of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<S> {
    /// The resource exists and reports this status.
    Status(S),
    /// The read path reported the resource as not found.
    Missing,
}

/// How an [`Observation::Missing`] read is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingBehavior {
    /// Not-found is an in-flight state. Used for create-convergence, where
    /// the read path may lag the accepted write.
    Pending,
    /// Not-found proves convergence. Used for delete-convergence, where
    /// absence is the goal.
    Converged,
    /// Not-found is an error: the resource is expected to exist.
    Fatal,
}

/// Whether a fetch error aborts the loop or is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    Transient,
    Fatal,
}

/// Classification of a single poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The observation matched the target set.
    Target,
    /// The observation is still in flight.
    Pending,
    /// The observation matched neither set.
    Diverged,
}

/// Status-fetch capability driving a convergence loop.
///
/// Implementations own the wire shape: they derive the status value from
/// whatever the read call returns and map a not-found response to
/// [`Observation::Missing`]. Error classification and recovery live here
/// too, next to the service-specific knowledge they need.
#[async_trait]
pub trait StatusProbe: Send {
    type Status: Clone + PartialEq + Debug + Send + Sync;

    /// Issue one read against the remote service.
    async fn observe(&mut self) -> Result<Observation<Self::Status>, CloudError>;

    /// Classify a fetch error. The default treats every error as fatal;
    /// probes override this for errors they know to be transient, such as a
    /// dependency violation raised while a parent resource finishes its own
    /// cleanup.
    fn classify(&self, _error: &CloudError) -> Transience {
        Transience::Fatal
    }

    /// Invoked after a transient error, before polling resumes. Probes that
    /// must re-trigger the original operation override this (the gallery
    /// image delete probe reissues its DELETE here); the default does
    /// nothing. A recovery failure aborts the loop.
    async fn recover(&mut self) -> Result<(), CloudError> {
        Ok(())
    }
}

/// Failure of a convergence loop.
///
/// Timeouts are distinguishable from fetch failures, and every variant
/// carries the resource identity, the last observed status, and the elapsed
/// time, so a stuck remote operation can be told apart from a loop that gave
/// up too early.
#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("timed out waiting for {resource} after {elapsed:?} (last status: {last_status})")]
    TimedOut {
        resource: String,
        last_status: String,
        elapsed: Duration,
    },

    #[error("{resource} entered unexpected status {status} after {elapsed:?}")]
    Diverged {
        resource: String,
        status: String,
        elapsed: Duration,
    },

    #[error("polling {resource} failed after {elapsed:?} (last status: {last_status}): {source}")]
    Failed {
        resource: String,
        last_status: String,
        elapsed: Duration,
        #[source]
        source: Box<CloudError>,
    },
}

/// Convergence loop configuration.
///
/// `pending` and `target` are the status sets the loop classifies against.
/// Defaults suit management-plane operations: polls at least 10 seconds
/// apart, a 30 minute overall budget, a single target observation, and
/// not-found treated as fatal.
#[derive(Debug, Clone)]
pub struct Convergence<S> {
    pending: Vec<S>,
    target: Vec<S>,
    interval: Duration,
    timeout: Duration,
    continuous_target: u32,
    missing: MissingBehavior,
}

impl<S> Convergence<S>
where
    S: Clone + PartialEq + Debug + Send + Sync,
{
    pub fn new(pending: impl Into<Vec<S>>, target: impl Into<Vec<S>>) -> Self {
        Self {
            pending: pending.into(),
            target: target.into(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
            continuous_target: 1,
            missing: MissingBehavior::Fatal,
        }
    }

    /// Minimum delay between poll attempts. Also the rate bound against the
    /// remote service when many loops run concurrently.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Require the target to be observed this many times consecutively.
    /// Any non-target observation resets the run.
    pub fn with_continuous_target(mut self, count: u32) -> Self {
        self.continuous_target = count.max(1);
        self
    }

    pub fn with_missing(mut self, missing: MissingBehavior) -> Self {
        self.missing = missing;
        self
    }

    /// Classify one observation against the pending/target sets.
    pub fn classify(&self, observation: &Observation<S>) -> PollOutcome {
        match observation {
            Observation::Status(status) => {
                if self.target.contains(status) {
                    PollOutcome::Target
                } else if self.pending.contains(status) {
                    PollOutcome::Pending
                } else {
                    PollOutcome::Diverged
                }
            }
            Observation::Missing => match self.missing {
                MissingBehavior::Converged => PollOutcome::Target,
                MissingBehavior::Pending => PollOutcome::Pending,
                MissingBehavior::Fatal => PollOutcome::Diverged,
            },
        }
    }

    /// Block until the probed status converges on the target set.
    ///
    /// The first fetch fires immediately; subsequent fetches are spaced by
    /// the configured interval. Returns the final observed status, or `None`
    /// when convergence was proven by absence. Once the deadline is observed
    /// no further fetches are issued.
    pub async fn wait<P>(
        &self,
        resource: &ResourceDescriptor,
        probe: &mut P,
    ) -> Result<Option<S>, ConvergeError>
    where
        P: StatusProbe<Status = S>,
    {
        let started = Instant::now();
        let mut streak: u32 = 0;
        let mut last_status: Option<S> = None;

        loop {
            if started.elapsed() >= self.timeout {
                return Err(ConvergeError::TimedOut {
                    resource: resource.to_string(),
                    last_status: format_status(&last_status),
                    elapsed: started.elapsed(),
                });
            }

            match probe.observe().await {
                Ok(observation) => {
                    last_status = match &observation {
                        Observation::Status(status) => Some(status.clone()),
                        Observation::Missing => None,
                    };

                    match self.classify(&observation) {
                        PollOutcome::Target => {
                            streak += 1;
                            tracing::debug!(
                                "{} reported target status {:?} ({}/{})",
                                resource,
                                last_status,
                                streak,
                                self.continuous_target
                            );
                            if streak >= self.continuous_target {
                                tracing::info!(
                                    "{} converged after {:?} (status: {:?})",
                                    resource,
                                    started.elapsed(),
                                    last_status
                                );
                                return Ok(last_status);
                            }
                        }
                        PollOutcome::Pending => {
                            streak = 0;
                            tracing::debug!("{} still pending (status: {:?})", resource, last_status);
                        }
                        PollOutcome::Diverged => {
                            return Err(match observation {
                                Observation::Status(status) => ConvergeError::Diverged {
                                    resource: resource.to_string(),
                                    status: format!("{status:?}"),
                                    elapsed: started.elapsed(),
                                },
                                Observation::Missing => ConvergeError::Failed {
                                    resource: resource.to_string(),
                                    last_status: format_status(&last_status),
                                    elapsed: started.elapsed(),
                                    source: Box::new(CloudError::ResourceNotFound(
                                        resource.to_string(),
                                    )),
                                },
                            });
                        }
                    }
                }
                Err(error) => match probe.classify(&error) {
                    Transience::Transient => {
                        streak = 0;
                        tracing::warn!(
                            "transient error while polling {}: {} (retrying)",
                            resource,
                            error
                        );
                        if let Err(recovery) = probe.recover().await {
                            return Err(ConvergeError::Failed {
                                resource: resource.to_string(),
                                last_status: format_status(&last_status),
                                elapsed: started.elapsed(),
                                source: Box::new(recovery),
                            });
                        }
                    }
                    Transience::Fatal => {
                        return Err(ConvergeError::Failed {
                            resource: resource.to_string(),
                            last_status: format_status(&last_status),
                            elapsed: started.elapsed(),
                            source: Box::new(error),
                        });
                    }
                },
            }

            sleep(self.interval).await;
        }
    }
}

fn format_status<S: Debug>(status: &Option<S>) -> String {
    match status {
        Some(status) => format!("{status:?}"),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestStatus {
        Creating,
        Succeeded,
        Failed,
    }

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new("sub", "rg", "Microsoft.Test").with_segment("things", "one")
    }

    /// Probe that replays a fixed script of observations.
    struct Scripted {
        script: VecDeque<Result<Observation<TestStatus>, CloudError>>,
        calls: usize,
    }

    impl Scripted {
        fn new(script: Vec<Result<Observation<TestStatus>, CloudError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl StatusProbe for Scripted {
        type Status = TestStatus;

        async fn observe(&mut self) -> Result<Observation<TestStatus>, CloudError> {
            self.calls += 1;
            self.script.pop_front().unwrap_or_else(|| {
                panic!("probe polled more often than scripted ({} calls)", self.calls)
            })
        }
    }

    /// Probe whose first fetch fails with a retryable dependency violation.
    struct FlakyDelete {
        calls: usize,
        recoveries: usize,
    }

    #[async_trait]
    impl StatusProbe for FlakyDelete {
        type Status = TestStatus;

        async fn observe(&mut self) -> Result<Observation<TestStatus>, CloudError> {
            self.calls += 1;
            if self.calls == 1 {
                Err(CloudError::DependencyViolation(
                    "nested resources are still being deleted".to_string(),
                ))
            } else {
                Ok(Observation::Missing)
            }
        }

        fn classify(&self, error: &CloudError) -> Transience {
            match error {
                CloudError::DependencyViolation(_) => Transience::Transient,
                _ => Transience::Fatal,
            }
        }

        async fn recover(&mut self) -> Result<(), CloudError> {
            self.recoveries += 1;
            Ok(())
        }
    }

    fn fast(convergence: Convergence<TestStatus>) -> Convergence<TestStatus> {
        convergence
            .with_interval(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_continuous_target_resets_on_pending() {
        use Observation::Status;
        use TestStatus::*;

        // With threshold 3, [T, T, P, T, T, T] converges on the 6th read,
        // not the 5th.
        let mut probe = Scripted::new(vec![
            Ok(Status(Succeeded)),
            Ok(Status(Succeeded)),
            Ok(Status(Creating)),
            Ok(Status(Succeeded)),
            Ok(Status(Succeeded)),
            Ok(Status(Succeeded)),
        ]);
        let convergence =
            fast(Convergence::new(vec![Creating], vec![Succeeded])).with_continuous_target(3);

        let result = convergence.wait(&descriptor(), &mut probe).await.unwrap();
        assert_eq!(result, Some(Succeeded));
        assert_eq!(probe.calls, 6);
    }

    #[tokio::test]
    async fn test_delete_missing_on_first_attempt_converges_immediately() {
        use TestStatus::*;

        let mut probe = Scripted::new(vec![Ok(Observation::Missing)]);
        let convergence = fast(Convergence::new(vec![Creating, Succeeded], Vec::new()))
            .with_missing(MissingBehavior::Converged);

        let result = convergence.wait(&descriptor(), &mut probe).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(probe.calls, 1);
    }

    #[tokio::test]
    async fn test_create_missing_is_pending_not_error() {
        use Observation::Status;
        use TestStatus::*;

        let mut probe = Scripted::new(vec![
            Ok(Observation::Missing),
            Ok(Status(Creating)),
            Ok(Status(Succeeded)),
        ]);
        let convergence = fast(Convergence::new(vec![Creating], vec![Succeeded]))
            .with_missing(MissingBehavior::Pending);

        let result = convergence.wait(&descriptor(), &mut probe).await.unwrap();
        assert_eq!(result, Some(Succeeded));
        assert_eq!(probe.calls, 3);
    }

    #[tokio::test]
    async fn test_timeout_issues_no_fetch_after_expiry() {
        use TestStatus::*;

        // A zero budget expires before the first fetch: the loop must report
        // the timeout without touching the probe.
        let mut probe = Scripted::new(Vec::new());
        let convergence = Convergence::new(vec![Creating], vec![Succeeded])
            .with_interval(Duration::from_millis(1))
            .with_timeout(Duration::ZERO);

        let result = convergence.wait(&descriptor(), &mut probe).await;
        assert!(matches!(result, Err(ConvergeError::TimedOut { .. })));
        assert_eq!(probe.calls, 0);
    }

    #[tokio::test]
    async fn test_timeout_while_pending_is_reported() {
        use Observation::Status;
        use TestStatus::*;

        let script = (0..64).map(|_| Ok(Status(Creating))).collect();
        let mut probe = Scripted::new(script);
        let convergence = Convergence::new(vec![Creating], vec![Succeeded])
            .with_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(40));

        let result = convergence.wait(&descriptor(), &mut probe).await;
        match result {
            Err(ConvergeError::TimedOut { last_status, .. }) => {
                assert_eq!(last_status, "Creating");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(probe.calls >= 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        use TestStatus::*;

        let mut probe = Scripted::new(vec![Err(CloudError::ApiError(
            "malformed response".to_string(),
        ))]);
        let convergence = fast(Convergence::new(vec![Creating], vec![Succeeded]));

        let result = convergence.wait(&descriptor(), &mut probe).await;
        assert!(matches!(result, Err(ConvergeError::Failed { .. })));
        assert_eq!(probe.calls, 1);
    }

    #[tokio::test]
    async fn test_diverged_status_aborts() {
        use Observation::Status;
        use TestStatus::*;

        let mut probe = Scripted::new(vec![Ok(Status(Creating)), Ok(Status(Failed))]);
        let convergence = fast(Convergence::new(vec![Creating], vec![Succeeded]));

        let result = convergence.wait(&descriptor(), &mut probe).await;
        match result {
            Err(ConvergeError::Diverged { status, .. }) => assert_eq!(status, "Failed"),
            other => panic!("expected diverged, got {other:?}"),
        }
        assert_eq!(probe.calls, 2);
    }

    #[tokio::test]
    async fn test_transient_error_triggers_recovery_and_continues() {
        use TestStatus::*;

        let mut probe = FlakyDelete {
            calls: 0,
            recoveries: 0,
        };
        let convergence = fast(Convergence::new(vec![Creating, Succeeded], Vec::new()))
            .with_missing(MissingBehavior::Converged);

        let result = convergence.wait(&descriptor(), &mut probe).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(probe.calls, 2);
        assert_eq!(probe.recoveries, 1);
    }

    #[tokio::test]
    async fn test_missing_is_fatal_by_default() {
        use TestStatus::*;

        let mut probe = Scripted::new(vec![Ok(Observation::Missing)]);
        let convergence = fast(Convergence::new(vec![Creating], vec![Succeeded]));

        let result = convergence.wait(&descriptor(), &mut probe).await;
        match result {
            Err(ConvergeError::Failed { source, .. }) => {
                assert!(matches!(*source, CloudError::ResourceNotFound(_)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_against_sets() {
        use Observation::Status;
        use TestStatus::*;

        let convergence = Convergence::new(vec![Creating], vec![Succeeded])
            .with_missing(MissingBehavior::Pending);
        assert_eq!(convergence.classify(&Status(Succeeded)), PollOutcome::Target);
        assert_eq!(convergence.classify(&Status(Creating)), PollOutcome::Pending);
        assert_eq!(convergence.classify(&Status(Failed)), PollOutcome::Diverged);
        assert_eq!(
            convergence.classify(&Observation::Missing),
            PollOutcome::Pending
        );
    }
}

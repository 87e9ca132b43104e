//! Threshold-triggered identity rotation.

use crate::config::HandlerConfig;
use crate::control::CircuitController;
use crate::error::RotationError;
use crate::identity::IdentityProvider;

use log::{info, warn};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Hook invoked once before a rotation failure is returned to the caller.
///
/// Failures inside the hook are not caught.
pub trait Checkpoint: Send + Sync {
    fn checkpoint(&self);
}

impl<F> Checkpoint for F
where
    F: Fn() + Send + Sync,
{
    fn checkpoint(&self) {
        self()
    }
}

/// Snapshot of the rotation counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationStats {
    /// Successful requests since the last rotation.
    pub requests_since_rotation: u32,
    /// Failed requests since the last rotation.
    pub failures_since_rotation: u32,
    /// User agent currently presented.
    pub user_agent: String,
    /// Successful rotations over the lifetime of the handler.
    pub rotations: u64,
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// Counters, thresholds and the current identity.
///
/// Rotation resets both counters together; a single recorded outcome can
/// trigger at most one rotation.
pub(crate) struct Rotator {
    requests_before_rotation: NonZeroU32,
    failures_before_rotation: NonZeroU32,
    requests: u32,
    failures: u32,
    rotations: u64,
    user_agent: String,
    controller: Arc<dyn CircuitController>,
    identity: Arc<dyn IdentityProvider>,
    autosave: Option<Arc<dyn Checkpoint>>,
}

impl Rotator {
    pub(crate) fn new(
        config: &HandlerConfig,
        controller: Arc<dyn CircuitController>,
        identity: Arc<dyn IdentityProvider>,
        autosave: Option<Arc<dyn Checkpoint>>,
    ) -> Self {
        Self {
            requests_before_rotation: config.requests_before_rotation,
            failures_before_rotation: config.failures_before_rotation,
            requests: 0,
            failures: 0,
            rotations: 0,
            user_agent: identity.next_identity(),
            controller,
            identity,
            autosave,
        }
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) fn set_autosave(&mut self, autosave: Arc<dyn Checkpoint>) {
        self.autosave = Some(autosave);
    }

    /// Count an attempt and rotate if its counter reached the threshold.
    pub(crate) async fn record(&mut self, outcome: Outcome) -> Result<(), RotationError> {
        let due = match outcome {
            Outcome::Success => {
                self.requests += 1;
                self.requests >= self.requests_before_rotation.get()
            }
            Outcome::Failure => {
                self.failures += 1;
                self.failures >= self.failures_before_rotation.get()
            }
        };

        if due {
            info!(
                "Rotating identity after {} requests and {} failures",
                self.requests, self.failures
            );
            self.rotate().await?;
        }
        Ok(())
    }

    /// Rotate now. On failure the checkpoint hook runs, then the error is returned.
    pub(crate) async fn rotate(&mut self) -> Result<(), RotationError> {
        if let Err(e) = self.controller.rotate().await {
            warn!("Identity rotation failed: {}", e);
            if let Some(autosave) = &self.autosave {
                autosave.checkpoint();
            }
            return Err(e);
        }

        self.user_agent = self.identity.next_identity();
        self.requests = 0;
        self.failures = 0;
        self.rotations += 1;
        Ok(())
    }

    pub(crate) fn stats(&self) -> RotationStats {
        RotationStats {
            requests_since_rotation: self.requests,
            failures_since_rotation: self.failures,
            user_agent: self.user_agent.clone(),
            rotations: self.rotations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingController {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CircuitController for CountingController {
        async fn rotate(&self) -> Result<(), RotationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RotationError::Signal("552 Unrecognized signal".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Sequence(AtomicUsize);

    impl IdentityProvider for Sequence {
        fn next_identity(&self) -> String {
            format!("agent-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn rotator(requests: u32, failures: u32, fail: bool) -> (Rotator, Arc<CountingController>) {
        let config = HandlerConfig::builder()
            .requests_before_rotation(requests)
            .failures_before_rotation(failures)
            .build()
            .unwrap();
        let controller = Arc::new(CountingController {
            calls: AtomicUsize::new(0),
            fail,
        });
        let rotator = Rotator::new(
            &config,
            controller.clone(),
            Arc::new(Sequence(AtomicUsize::new(0))),
            None,
        );
        (rotator, controller)
    }

    #[tokio::test]
    async fn success_threshold_rotates_once_and_resets() {
        let (mut rotator, controller) = rotator(3, 5, false);
        assert_eq!(rotator.user_agent(), "agent-0");

        rotator.record(Outcome::Failure).await.unwrap();
        rotator.record(Outcome::Success).await.unwrap();
        rotator.record(Outcome::Success).await.unwrap();
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);

        rotator.record(Outcome::Success).await.unwrap();
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);

        let stats = rotator.stats();
        assert_eq!(stats.requests_since_rotation, 0);
        assert_eq!(stats.failures_since_rotation, 0);
        assert_eq!(stats.user_agent, "agent-1");
        assert_eq!(stats.rotations, 1);
    }

    #[tokio::test]
    async fn failure_threshold_rotates_once_and_resets() {
        let (mut rotator, controller) = rotator(10, 2, false);

        rotator.record(Outcome::Success).await.unwrap();
        rotator.record(Outcome::Failure).await.unwrap();
        rotator.record(Outcome::Failure).await.unwrap();

        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rotator.stats().requests_since_rotation, 0);
        assert_eq!(rotator.stats().failures_since_rotation, 0);
    }

    #[tokio::test]
    async fn failed_rotation_keeps_state_and_runs_checkpoint() {
        let (mut rotator, controller) = rotator(1, 1, true);
        let saved = Arc::new(AtomicUsize::new(0));
        let hook = saved.clone();
        rotator.set_autosave(Arc::new(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        }));

        let err = rotator.record(Outcome::Success).await.unwrap_err();
        assert!(matches!(err, RotationError::Signal(_)));
        assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
        assert_eq!(saved.load(Ordering::SeqCst), 1);

        let stats = rotator.stats();
        assert_eq!(stats.requests_since_rotation, 1);
        assert_eq!(stats.user_agent, "agent-0");
        assert_eq!(stats.rotations, 0);
    }
}

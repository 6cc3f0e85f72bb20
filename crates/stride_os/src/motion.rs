#![forbid(unsafe_code)]

use std::collections::VecDeque;

use stride_kernel_contracts::motion::{
    MotionInitError, MotionObservation, MotionPlatformKind, MotionWindow,
};

/// Scripted stand-in for a platform's absolute step counter. Each queued
/// reading is the sensor's cumulative total for the queried day window; once
/// the script runs dry the counter holds its last value, like a sensor that
/// simply stopped registering movement.
#[derive(Debug, Clone)]
pub struct ScriptedAbsoluteCounter {
    readings: VecDeque<u64>,
    last_reading: u64,
}

impl ScriptedAbsoluteCounter {
    pub fn new(readings: Vec<u64>) -> Self {
        Self {
            readings: readings.into(),
            last_reading: 0,
        }
    }

    fn query_count(&mut self, _window: MotionWindow) -> u64 {
        if let Some(reading) = self.readings.pop_front() {
            self.last_reading = reading;
        }
        self.last_reading
    }
}

/// Scripted stand-in for a platform's live step stream. Queued bursts are
/// steps registered by the device between polls; the subscription folds them
/// into a counter that is cumulative since the subscription began.
#[derive(Debug, Clone)]
pub struct ScriptedIncrementalFeed {
    bursts: VecDeque<u64>,
}

impl ScriptedIncrementalFeed {
    pub fn new(bursts: Vec<u64>) -> Self {
        Self {
            bursts: bursts.into(),
        }
    }

    fn next_burst(&mut self) -> u64 {
        self.bursts.pop_front().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct IncrementalSubscription {
    emitted_total: u64,
}

#[derive(Debug, Clone)]
enum MotionCapability {
    Absolute(ScriptedAbsoluteCounter),
    Incremental {
        feed: ScriptedIncrementalFeed,
        subscription: Option<IncrementalSubscription>,
    },
    Unavailable,
}

/// The device's motion sample source, resolved once at initialization into a
/// tagged variant. Nothing downstream probes the platform again.
#[derive(Debug, Clone)]
pub struct MotionSourceRuntime {
    capability: MotionCapability,
    permission_granted: bool,
}

impl MotionSourceRuntime {
    pub fn absolute(counter: ScriptedAbsoluteCounter) -> Self {
        Self {
            capability: MotionCapability::Absolute(counter),
            permission_granted: true,
        }
    }

    pub fn incremental(feed: ScriptedIncrementalFeed) -> Self {
        Self {
            capability: MotionCapability::Incremental {
                feed,
                subscription: None,
            },
            permission_granted: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            capability: MotionCapability::Unavailable,
            permission_granted: true,
        }
    }

    pub fn with_permission_denied(mut self) -> Self {
        self.permission_granted = false;
        self
    }

    pub fn platform_kind(&self) -> MotionPlatformKind {
        match &self.capability {
            MotionCapability::Absolute(_) => MotionPlatformKind::Absolute,
            MotionCapability::Incremental { .. } => MotionPlatformKind::Incremental,
            MotionCapability::Unavailable => MotionPlatformKind::Unavailable,
        }
    }

    /// Capability check plus the one-time permission prompt. On incremental
    /// platforms this also opens the subscription.
    pub fn initialize(&mut self) -> Result<MotionPlatformKind, MotionInitError> {
        if matches!(self.capability, MotionCapability::Unavailable) {
            return Err(MotionInitError::SensorUnavailable);
        }
        if !self.permission_granted {
            return Err(MotionInitError::PermissionDenied);
        }
        if let MotionCapability::Incremental { subscription, .. } = &mut self.capability {
            *subscription = Some(IncrementalSubscription { emitted_total: 0 });
        }
        Ok(self.platform_kind())
    }

    /// One raw reading for the reconcile tick. `None` only when the source
    /// was never initialized (no subscription) or is unavailable.
    pub fn observe(&mut self, window: MotionWindow) -> Option<MotionObservation> {
        match &mut self.capability {
            MotionCapability::Absolute(counter) => Some(MotionObservation::AbsoluteWindowCount {
                window,
                count: counter.query_count(window),
            }),
            MotionCapability::Incremental { feed, subscription } => {
                let subscription = subscription.as_mut()?;
                subscription.emitted_total =
                    subscription.emitted_total.saturating_add(feed.next_burst());
                Some(MotionObservation::IncrementalEmission {
                    session_count: subscription.emitted_total,
                })
            }
            MotionCapability::Unavailable => None,
        }
    }

    /// Drop and reopen the subscription. Models an app restart or permission
    /// re-grant: the emitted sequence restarts near zero.
    pub fn resubscribe(&mut self) {
        if let MotionCapability::Incremental { subscription, .. } = &mut self.capability {
            *subscription = Some(IncrementalSubscription { emitted_total: 0 });
        }
    }

    /// Tear down the live stream. Idempotent; absolute counters have nothing
    /// to release.
    pub fn unsubscribe(&mut self) {
        if let MotionCapability::Incremental { subscription, .. } = &mut self.capability {
            *subscription = None;
        }
    }
}

//! Timed commands and the revert to the default preset that follows them.
//!
//! Durations come in as seconds from the query string. Anything that is not a
//! positive number, `"0"` included, means the command stays on indefinitely.
//! A duration too large to represent as a delay is refused outright.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{error::BridgeError, uart::Transport, wled::revert_command};

/// Added on top of the requested duration so the set transition has finished
/// before the revert starts
pub const REVERT_GRACE_MS: u64 = 250;

pub const INVALID_DURATION: &str = "Invalid duration";

/// What happens when a revert is already pending and another command arrives
/// for the same device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum RevertPolicy {
    /// Every armed revert fires, even if a newer command has gone out since
    #[default]
    AllFire,
    /// A new command cancels whatever revert is pending for the device
    LastWins,
}

/// A requested duration and the delay it turns into
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RevertDuration {
    pub seconds: f64,
    pub delay: Duration,
}

impl fmt::Display for RevertDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.seconds)
    }
}

/// Read a `duration` query value in seconds. Missing, empty, zero, negative
/// or garbage all mean "no revert".
pub fn parse_duration(raw: Option<&str>) -> Result<Option<RevertDuration>, BridgeError> {
    let Some(seconds) = raw.and_then(|raw| raw.trim().parse::<f64>().ok()) else {
        return Ok(None);
    };
    if !(seconds.is_finite() && seconds > 0.0) {
        return Ok(None);
    }

    let delay = revert_delay(seconds).ok_or(BridgeError::InvalidParameters(INVALID_DURATION))?;
    Ok(Some(RevertDuration { seconds, delay }))
}

/// `seconds` plus the grace period, or `None` if that overflows a [`Duration`]
pub fn revert_delay(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()?
        .checked_add(Duration::from_millis(REVERT_GRACE_MS))
}

type PendingMap = HashMap<String, PendingRevert>;

struct PendingRevert {
    id: u64,
    cancel: oneshot::Sender<()>,
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forget revert `id` once it is past the point of being cancelled
fn release(pending: &Mutex<PendingMap>, device: &str, id: u64) {
    let mut pending = lock(pending);
    if pending.get(device).is_some_and(|p| p.id == id) {
        pending.remove(device);
    }
}

/// Sleep out `delay`. False if the wait was cancelled first.
async fn wait_out(delay: Duration, cancel: Option<oneshot::Receiver<()>>) -> bool {
    match cancel {
        Some(cancel) => tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel => false,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

/// Sends the default preset back to the device once a timed command runs out
#[derive(Clone)]
pub struct RevertScheduler {
    transport: Arc<dyn Transport>,
    policy: RevertPolicy,
    pending: Arc<Mutex<PendingMap>>,
    next_id: Arc<AtomicU64>,
}

impl RevertScheduler {
    pub fn new(transport: Arc<dyn Transport>, policy: RevertPolicy) -> Self {
        Self {
            transport,
            policy,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> RevertPolicy {
        self.policy
    }

    /// Claim the device's revert slot. Under [`RevertPolicy::LastWins`] this
    /// cancels the previous holder and hands back a receiver that fires when
    /// this one is cancelled in turn.
    fn register(&self) -> (u64, Option<oneshot::Receiver<()>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.policy != RevertPolicy::LastWins {
            return (id, None);
        }

        let (cancel, cancelled) = oneshot::channel();
        let previous = lock(&self.pending).insert(
            self.transport.device().to_string(),
            PendingRevert { id, cancel },
        );
        if let Some(previous) = previous {
            previous.cancel.send(()).ok();
        }

        (id, Some(cancelled))
    }

    /// A new command is about to go out. Under [`RevertPolicy::LastWins`] the
    /// pending revert for this device is dropped, otherwise nothing happens.
    pub fn supersede(&self) {
        if self.policy != RevertPolicy::LastWins {
            return;
        }

        let previous = lock(&self.pending).remove(self.transport.device());
        if let Some(previous) = previous {
            previous.cancel.send(()).ok();
            info!("Cancelled pending revert on {}", self.transport.device());
        }
    }

    /// Fire-and-forget: the revert goes out after `delay` on its own task.
    /// Its outcome is only logged.
    pub fn arm(&self, delay: Duration) -> JoinHandle<()> {
        let (id, cancelled) = self.register();
        let device = self.transport.device().to_string();
        let transport = self.transport.clone();
        let pending = self.pending.clone();

        info!("Revert armed on {} in {}ms", device, delay.as_millis());

        tokio::spawn(async move {
            if !wait_out(delay, cancelled).await {
                return;
            }
            release(&pending, &device, id);

            match transport.send(&revert_command()).await {
                Ok(()) => info!("Reverted {} to the default preset", device),
                Err(e) => error!("Revert on {} failed: {}", device, e),
            }
        })
    }

    /// Blocking: wait out `delay` on the caller's task, then send the revert.
    /// Returns false when a newer command cancelled the revert first.
    pub async fn hold(&self, delay: Duration) -> Result<bool, BridgeError> {
        let (id, cancelled) = self.register();
        let device = self.transport.device();

        if !wait_out(delay, cancelled).await {
            info!("Revert on {} superseded by a newer command", device);
            return Ok(false);
        }
        release(&self.pending, device, id);

        self.transport.send(&revert_command()).await?;
        info!("Reverted {} to the default preset", device);
        Ok(true)
    }

    /// Number of reverts that can still be cancelled
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

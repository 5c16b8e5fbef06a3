//! Wall clock used for SAS token expiry

use crate::config::TimeSection;
use crate::error::{HubError, HubResult};
use chrono::Utc;
use tracing::warn;

/// Earliest plausible wall-clock time (2020-01-01T00:00:00Z). Anything
/// before it means the clock was never synchronized.
pub const MIN_SYNCED_EPOCH: u64 = 1_577_836_800;

/// Source of the current time in epoch seconds
pub trait Clock: Send {
    /// `None` while the clock is not synchronized
    fn now_epoch(&self) -> Option<u64>;
}

/// System clock via chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> Option<u64> {
        let now = u64::try_from(Utc::now().timestamp()).ok()?;
        (now >= MIN_SYNCED_EPOCH).then_some(now)
    }
}

/// Absolute token expiry: now + lifetime, or the configured fallback when the
/// clock is not synchronized
pub fn compute_expiry(clock: &dyn Clock, time: &TimeSection) -> HubResult<u64> {
    match clock.now_epoch() {
        Some(now) => Ok(now.saturating_add(time.sas_lifetime_secs)),
        None => {
            let fallback = time.fallback_expiry_epoch.ok_or(HubError::Time)?;
            warn!(
                fallback_expiry = fallback,
                "Clock not synchronized, using fixed token expiry"
            );
            Ok(fallback)
        }
    }
}

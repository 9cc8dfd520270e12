//! Lock configuration.

use std::time::Duration;

use crate::error::{LockError, LockResult};
use crate::key::Lockspace;
use crate::timeout::Timeout;

/// Longest accepted lease window (100 years).
pub const MAX_LOCK_FOR: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Which acquisition strategy a runner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    /// Native advisory lock held by one dedicated connection.
    SessionScoped,
    /// Row lock held by one open transaction.
    Transactional,
    /// TTL-stamped record renewed in the background.
    #[default]
    Lease,
}

impl StrategyKind {
    /// Poll cadence used by blocking acquires when none is configured.
    ///
    /// Row locks wait inside the backend, so the transactional value only
    /// applies if a caller drives its own retry loop.
    pub fn default_spin_interval(self) -> Duration {
        match self {
            Self::SessionScoped => Duration::from_millis(5),
            Self::Transactional | Self::Lease => Duration::from_millis(500),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionScoped => "session",
            Self::Transactional => "transactional",
            Self::Lease => "lease",
        }
    }
}

/// Per-attempt acquisition behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Keep retrying while the lock is held elsewhere.
    pub blocking: bool,
    /// Give up a blocking acquire after this long.
    pub block_timeout: Timeout,
    /// Sleep between attempts of a blocking acquire.
    pub spin_interval: Duration,
}

impl AcquireOptions {
    /// A single attempt.
    pub fn non_blocking() -> Self {
        Self {
            blocking: false,
            block_timeout: None,
            spin_interval: StrategyKind::Lease.default_spin_interval(),
        }
    }

    /// Retry every `spin_interval` until acquired or `block_timeout` passes.
    pub fn blocking(block_timeout: Timeout, spin_interval: Duration) -> Self {
        Self {
            blocking: true,
            block_timeout,
            spin_interval,
        }
    }
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::non_blocking()
    }
}

/// Full set of recognized lock options.
///
/// Build with [`LockOptions::builder`]; `build()` validates everything so a
/// bad combination never surfaces at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub strategy: StrategyKind,
    pub blocking: bool,
    pub block_timeout: Timeout,
    /// `None` uses [`StrategyKind::default_spin_interval`]. Ignored by the
    /// transactional strategy, whose row lock waits natively in the backend.
    pub spin_interval: Option<Duration>,
    /// Run a watchdog while the lock is held.
    pub watchdog: bool,
    /// Liveness poll cadence for the session and transactional strategies.
    pub check_every: Duration,
    /// Lease renewal cadence. Must be shorter than `lock_for`.
    pub renew_every: Duration,
    /// Lease validity window, at most [`MAX_LOCK_FOR`].
    pub lock_for: Duration,
    pub lockspace: Lockspace,
    /// How long stopping a watchdog may take before its task is aborted.
    pub watchdog_stop_timeout: Duration,
}

impl LockOptions {
    pub fn builder() -> LockOptionsBuilder {
        LockOptionsBuilder::new()
    }

    pub fn spin_interval(&self) -> Duration {
        self.spin_interval
            .unwrap_or_else(|| self.strategy.default_spin_interval())
    }

    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            blocking: self.blocking,
            block_timeout: self.block_timeout,
            spin_interval: self.spin_interval(),
        }
    }

    /// Watchdog poll cadence for the configured strategy.
    pub fn watchdog_interval(&self) -> Duration {
        match self.strategy {
            StrategyKind::Lease => self.renew_every,
            StrategyKind::SessionScoped | StrategyKind::Transactional => self.check_every,
        }
    }

    /// Checks every constraint the options must satisfy.
    pub fn validate(&self) -> LockResult<()> {
        validate_interval("check_every", self.check_every)?;
        validate_lease(self.renew_every, self.lock_for)?;
        validate_interval("watchdog_stop_timeout", self.watchdog_stop_timeout)?;
        if let Some(spin) = self.spin_interval {
            validate_interval("spin_interval", spin)?;
        }
        Ok(())
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            blocking: false,
            block_timeout: None,
            spin_interval: None,
            watchdog: true,
            check_every: Duration::from_secs(10),
            renew_every: Duration::from_secs(10),
            lock_for: Duration::from_secs(30),
            lockspace: Lockspace::DEFAULT,
            watchdog_stop_timeout: Duration::from_secs(1),
        }
    }
}

pub(crate) fn validate_interval(name: &str, value: Duration) -> LockResult<()> {
    if value.is_zero() {
        return Err(LockError::configuration(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

pub(crate) fn validate_lease(renew_every: Duration, lock_for: Duration) -> LockResult<()> {
    validate_interval("renew_every", renew_every)?;
    validate_interval("lock_for", lock_for)?;
    if lock_for > MAX_LOCK_FOR {
        return Err(LockError::configuration(format!(
            "lock_for ({lock_for:?}) must not exceed {MAX_LOCK_FOR:?}"
        )));
    }
    if renew_every >= lock_for {
        return Err(LockError::configuration(format!(
            "renew_every ({renew_every:?}) must be less than lock_for ({lock_for:?})"
        )));
    }
    Ok(())
}

/// Builder for [`LockOptions`].
#[derive(Debug, Clone)]
pub struct LockOptionsBuilder {
    options: LockOptions,
    lockspace: i64,
}

impl LockOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: LockOptions::default(),
            lockspace: i64::from(Lockspace::DEFAULT.get()),
        }
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.options.strategy = strategy;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.options.blocking = blocking;
        self
    }

    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.options.block_timeout = Some(timeout);
        self
    }

    pub fn spin_interval(mut self, interval: Duration) -> Self {
        self.options.spin_interval = Some(interval);
        self
    }

    pub fn watchdog(mut self, enabled: bool) -> Self {
        self.options.watchdog = enabled;
        self
    }

    pub fn check_every(mut self, interval: Duration) -> Self {
        self.options.check_every = interval;
        self
    }

    pub fn renew_every(mut self, interval: Duration) -> Self {
        self.options.renew_every = interval;
        self
    }

    pub fn lock_for(mut self, duration: Duration) -> Self {
        self.options.lock_for = duration;
        self
    }

    /// Accepts any integer; out-of-range values are rejected by `build()`.
    pub fn lockspace(mut self, lockspace: i64) -> Self {
        self.lockspace = lockspace;
        self
    }

    pub fn watchdog_stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.watchdog_stop_timeout = timeout;
        self
    }

    /// Validates and returns the options.
    pub fn build(self) -> LockResult<LockOptions> {
        let mut options = self.options;
        options.lockspace = Lockspace::new(self.lockspace)?;
        options.validate()?;
        Ok(options)
    }
}

impl Default for LockOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LockOptions::builder().build().unwrap();
        assert_eq!(options.strategy, StrategyKind::Lease);
        assert!(!options.blocking);
        assert!(options.watchdog);
        assert_eq!(options.renew_every, Duration::from_secs(10));
        assert_eq!(options.lock_for, Duration::from_secs(30));
        assert_eq!(options.check_every, Duration::from_secs(10));
        assert_eq!(options.lockspace, Lockspace::DEFAULT);
        assert_eq!(options.spin_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_overrides() {
        let options = LockOptions::builder()
            .strategy(StrategyKind::SessionScoped)
            .blocking(true)
            .block_timeout(Duration::from_secs(1))
            .lockspace(2)
            .check_every(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(options.lockspace.get(), 2);
        assert_eq!(options.spin_interval(), Duration::from_millis(5));
        assert_eq!(options.watchdog_interval(), Duration::from_secs(60));

        let acquire = options.acquire_options();
        assert!(acquire.blocking);
        assert_eq!(acquire.block_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_validates_renewal_window() {
        let build = |renew: f64, lock_for: f64| {
            LockOptions::builder()
                .renew_every(Duration::from_secs_f64(renew))
                .lock_for(Duration::from_secs_f64(lock_for))
                .build()
        };
        assert!(build(0.0, 30.0).is_err());
        assert!(build(1.0, 30.0).is_ok());
        assert!(build(1.0, 0.0).is_err());
        assert!(build(4.0, 2.0).is_err());
        assert!(build(1.0, 1.0).is_err());
        assert!(build(1.0, 1.00001).is_ok());
    }

    #[test]
    fn test_rejects_unbounded_lease_window() {
        let build = |lock_for: Duration| {
            LockOptions::builder()
                .renew_every(Duration::from_secs(1))
                .lock_for(lock_for)
                .build()
        };
        assert!(matches!(build(Duration::MAX), Err(LockError::Configuration(_))));
        assert!(build(MAX_LOCK_FOR + Duration::from_secs(1)).is_err());
        assert!(build(MAX_LOCK_FOR).is_ok());
    }

    #[test]
    fn test_validates_lockspace_and_check_interval() {
        assert!(matches!(
            LockOptions::builder().lockspace(i64::from(i32::MAX) + 1).build(),
            Err(LockError::Configuration(_))
        ));
        assert!(matches!(
            LockOptions::builder().lockspace(i64::from(i32::MIN) - 1).build(),
            Err(LockError::Configuration(_))
        ));
        assert!(LockOptions::builder().check_every(Duration::ZERO).build().is_err());
        assert!(LockOptions::builder().spin_interval(Duration::ZERO).build().is_err());
    }
}

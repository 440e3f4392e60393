//! Monotonic time source used for blink intervals and debug phase timing.

/// Milliseconds since boot.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Elapsed time per wake phase, logged only in debug configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimer {
    enabled: bool,
    boot_ms: u64,
    lap_ms: u64,
}

impl PhaseTimer {
    pub const fn new(enabled: bool, now_ms: u64) -> Self {
        Self {
            enabled,
            boot_ms: now_ms,
            lap_ms: now_ms,
        }
    }

    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Close the current phase and return its length.
    pub fn lap(&mut self, phase: &str, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.lap_ms);
        self.lap_ms = now_ms;
        if self.enabled {
            log::info!("{} phase: {} ms", phase, elapsed);
        }
        elapsed
    }

    /// Time since the timer was started.
    pub fn since_boot(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.boot_ms)
    }
}

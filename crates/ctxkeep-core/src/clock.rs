//! Time and budget sources injected into the engine.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{CtxKeepError, Result};

/// Source of "now" for scoring and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Source of the current token budget.
///
/// Failures surface as [`CtxKeepError::Capacity`].
pub trait BudgetSource: Send + Sync {
    fn current_budget(&self) -> Result<u64>;
}

/// Budget that never changes.
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget(pub u64);

impl BudgetSource for FixedBudget {
    fn current_budget(&self) -> Result<u64> {
        if self.0 == 0 {
            return Err(CtxKeepError::Capacity(
                "token budget is zero".to_string(),
            ));
        }
        Ok(self.0)
    }
}

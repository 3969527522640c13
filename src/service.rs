//! Facade used by the chat bot and the HTTP API.

use std::sync::Arc;

use crate::publish::{ScheduleHandle, ScheduleSnapshot};
use crate::rates::{AllSourcesFailed, InvalidConfigError, RateCache, RateQuote};

#[derive(Clone)]
pub struct RateService {
    cache: Arc<RateCache>,
    schedule: ScheduleHandle,
}

impl RateService {
    pub fn new(cache: Arc<RateCache>, schedule: ScheduleHandle) -> Self {
        Self { cache, schedule }
    }

    /// Same cache as the scheduler; may trigger one refresh.
    pub async fn get_current_rate(&self) -> Result<RateQuote, AllSourcesFailed> {
        self.cache.get_rate().await
    }

    pub fn set_publish_interval(&self, secs: i64) -> Result<(), InvalidConfigError> {
        self.schedule.set_interval(secs)
    }

    pub fn get_schedule_status(&self) -> ScheduleSnapshot {
        self.schedule.snapshot()
    }
}

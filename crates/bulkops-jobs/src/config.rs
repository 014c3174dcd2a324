use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ITEMS: usize = 1_000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max items in flight per job.
    pub batch_size: usize,
    pub item_timeout: Duration,
    pub batch_pause: Duration,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
    pub max_items: usize,
    pub worker_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            batch_pause: DEFAULT_BATCH_PAUSE,
            lease_ttl: DEFAULT_LEASE_TTL,
            lease_renew_interval: DEFAULT_LEASE_RENEW_INTERVAL,
            max_items: DEFAULT_MAX_ITEMS,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl EngineConfig {
    /// Replaces zero values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.item_timeout.is_zero() {
            self.item_timeout = DEFAULT_ITEM_TIMEOUT;
        }
        if self.lease_ttl.is_zero() {
            self.lease_ttl = DEFAULT_LEASE_TTL;
        }
        if self.lease_renew_interval.is_zero() || self.lease_renew_interval >= self.lease_ttl {
            self.lease_renew_interval = (self.lease_ttl / 3).max(Duration::from_millis(10));
        }
        if self.max_items == 0 {
            self.max_items = DEFAULT_MAX_ITEMS;
        }
        if self.worker_id.trim().is_empty() {
            self.worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        }
        self
    }
}

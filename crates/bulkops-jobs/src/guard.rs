use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

/// Process-local set of job ids that currently have an execution in flight.
#[derive(Debug, Default)]
pub struct DispatchGuard {
    in_flight: Mutex<HashSet<String>>,
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, job_id: &str) -> bool {
        self.lock().insert(job_id.to_string())
    }

    pub fn release(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    /// Like [`DispatchGuard::try_acquire`], but the id is released when the permit drops,
    /// including on panic unwinding.
    pub fn acquire(self: &Arc<Self>, job_id: &str) -> Option<DispatchPermit> {
        self.try_acquire(job_id).then(|| DispatchPermit {
            guard: Arc::clone(self),
            job_id: job_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.lock().contains(job_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.in_flight.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug)]
pub struct DispatchPermit {
    guard: Arc<DispatchGuard>,
    job_id: String,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.guard.release(&self.job_id);
    }
}

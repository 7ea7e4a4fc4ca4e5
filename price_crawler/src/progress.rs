//! Per-vendor progress reporting
//!
//! A side channel on top of `log`. Nothing here can fail: a poisoned lock or
//! an unknown task id just drops the update.

use std::sync::Mutex;

#[derive(Debug)]
struct Task {
    name: String,
    total: usize,
    done: usize,
    /// Last reported decile, to keep debug output bounded
    reported: usize,
}

/// Progress tracker owned by one vendor pull
#[derive(Debug)]
pub struct ProgressTracker {
    vendor: String,
    tasks: Mutex<Vec<Task>>,
}

/// Handle to a registered task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(usize);

impl ProgressTracker {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a named task with an expected number of steps
    pub fn start_task(&self, name: impl Into<String>, total: usize) -> TaskId {
        let name = name.into();
        log::debug!("[{}] {} (0/{})", self.vendor, name, total);
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.push(Task {
                    name,
                    total,
                    done: 0,
                    reported: 0,
                });
                TaskId(tasks.len() - 1)
            }
            Err(_) => TaskId(usize::MAX),
        }
    }

    pub fn advance(&self, task: TaskId, by: usize) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };
        let Some(t) = tasks.get_mut(task.0) else {
            return;
        };
        t.done = t.done.saturating_add(by);
        if t.total > 0 {
            let decile = (t.done.min(t.total) * 10) / t.total;
            if decile > t.reported {
                t.reported = decile;
                log::debug!("[{}] {} ({}/{})", self.vendor, t.name, t.done, t.total);
            }
        }
    }

    /// Mark a task complete and log a one-line summary
    pub fn finish(&self, task: TaskId, message: &str) {
        let Ok(tasks) = self.tasks.lock() else {
            return;
        };
        if let Some(t) = tasks.get(task.0) {
            log::info!("[{}] {}: {}", self.vendor, t.name, message);
        }
    }
}

//! Active-task registry
//!
//! At most one task object per id may have a live worker. The registry is only
//! touched in short, non-async critical sections, so a `parking_lot` mutex is
//! enough.

use crate::error::{Error, Result};
use crate::task::DownloadTask;
use crate::types::TaskId;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct ActiveRegistry {
    tasks: Mutex<HashMap<TaskId, DownloadTask>>,
}

impl ActiveRegistry {
    /// Register a task about to get a worker
    ///
    /// Fails if any task with the same id (the same object or another one
    /// pointing the same URL at the same path) is already running.
    pub(crate) fn insert(&self, task: &DownloadTask) -> Result<()> {
        let id = task.id();
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&id) {
            return Err(Error::AlreadyInUse {
                id,
                operation: "start".to_string(),
            });
        }
        tasks.insert(id, task.clone());
        Ok(())
    }

    /// Unregister a task whose worker exited
    ///
    /// Only removes the entry if it belongs to this very task object.
    pub(crate) fn remove(&self, id: TaskId, task: &DownloadTask) {
        let mut tasks = self.tasks.lock();
        if tasks.get(&id).is_some_and(|entry| entry.same_task(task)) {
            tasks.remove(&id);
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<DownloadTask> {
        self.tasks.lock().get(&id).cloned()
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.tasks.lock().contains_key(&id)
    }

    pub(crate) fn tasks(&self) -> Vec<DownloadTask> {
        self.tasks.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

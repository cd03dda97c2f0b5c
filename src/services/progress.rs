//! Fan-in over a fixed group of concurrently running tasks.
//!
//! Every task is spawned onto the runtime when the group is built. Tracking
//! turns completions into a single percentage and stops at the first failure;
//! tasks still in flight at that point are detached and keep running.

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::models::ProgressState;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("A task group needs at least one task")]
pub struct EmptyTaskGroup;

/// First failure observed while tracking a group. `index` is the task's
/// position in the order it was handed to [`TaskGroup::spawn_all`].
#[derive(Error, Debug)]
pub enum TaskFailure<E> {
    #[error("task {index} failed: {error}")]
    Failed { index: usize, error: E },

    #[error("task {index} did not complete: {source}")]
    Aborted {
        index: usize,
        #[source]
        source: JoinError,
    },
}

impl<E> TaskFailure<E> {
    pub fn index(&self) -> usize {
        match self {
            TaskFailure::Failed { index, .. } | TaskFailure::Aborted { index, .. } => *index,
        }
    }
}

/// `round(100 * completed / total)` with halves rounding up.
pub fn percentage(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = u128::from(completed.min(total));
    let total = u128::from(total);
    ((200 * completed + total) / (2 * total)) as u8
}

pub struct TaskGroup<T, E> {
    handles: Vec<JoinHandle<Result<T, E>>>,
}

impl<T, E> TaskGroup<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Spawns every task right away. An empty collection is rejected because
    /// there is no meaningful percentage for zero tasks.
    pub fn spawn_all<I, F>(tasks: I) -> Result<Self, EmptyTaskGroup>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
        if handles.is_empty() {
            return Err(EmptyTaskGroup);
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for the group, calling `on_progress` once per completed task after
    /// the completion has been counted. Results come back in task order.
    pub async fn track<C>(self, mut on_progress: C) -> Result<Vec<T>, TaskFailure<E>>
    where
        C: FnMut(ProgressState),
    {
        let total = self.handles.len();
        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut completed = 0usize;

        let mut pending: FuturesUnordered<_> = self
            .handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| handle.map(move |joined| (index, joined)))
            .collect();

        while let Some((index, joined)) = pending.next().await {
            match joined {
                Ok(Ok(value)) => {
                    results[index] = Some(value);
                    completed += 1;
                    on_progress(ProgressState {
                        completed,
                        total,
                        percentage: percentage(completed as u64, total as u64),
                    });
                }
                Ok(Err(error)) => return Err(TaskFailure::Failed { index, error }),
                Err(source) => return Err(TaskFailure::Aborted { index, source }),
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

//! Dependency-ordered async task execution.
//!
//! Tasks are registered with the ids of the tasks they depend on. A run
//! starts every task whose predecessors have all completed, as concurrently
//! as [`DagConfig::max_parallelism`] allows, and stops scheduling new work
//! on the first failure.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::error::{SchedError, SchedResult, TaskError};

type TaskFn = Arc<dyn Fn(CancelToken) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Callback invoked once per failing task with its id and error. A task
/// that panics is reported with its panic message.
pub type ErrorObserver = Arc<dyn Fn(&str, &TaskError) + Send + Sync>;

/// Executor options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Upper bound on concurrently running tasks; 0 means unbounded.
    pub max_parallelism: usize,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Task ids in completion order.
    pub completed: Vec<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

struct DagNode {
    id: String,
    predecessors: Vec<String>,
    task: TaskFn,
}

/// A directed acyclic graph of async tasks.
pub struct DagExecutor {
    config: DagConfig,
    nodes: Vec<DagNode>,
    index: HashMap<String, usize>,
    observer: Option<ErrorObserver>,
}

impl DagExecutor {
    /// Creates an empty executor.
    pub fn new(config: DagConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            observer: None,
        }
    }

    /// Installs a callback that sees every task failure.
    pub fn with_error_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, &TaskError) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Registers a task. Predecessors may be registered later; they are
    /// resolved when the graph runs.
    pub fn add_task<F, Fut>(
        &mut self,
        id: impl Into<String>,
        predecessors: &[&str],
        task: F,
    ) -> SchedResult<()>
    where
        F: Fn(CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(SchedError::Conflict(format!("task {} already registered", id)));
        }
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(DagNode {
            id,
            predecessors: predecessors.iter().map(|p| p.to_string()).collect(),
            task: Arc::new(move |token| task(token).boxed()),
        });
        Ok(())
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no task is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn successors(&self) -> SchedResult<(Vec<Vec<usize>>, Vec<usize>)> {
        let mut successors = vec![Vec::new(); self.nodes.len()];
        let mut in_degree = vec![0usize; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for pred in &node.predecessors {
                let &p = self.index.get(pred).ok_or_else(|| {
                    SchedError::InvalidArgument(format!(
                        "task {} depends on unknown task {}",
                        node.id, pred
                    ))
                })?;
                successors[p].push(i);
                in_degree[i] += 1;
            }
        }
        Ok((successors, in_degree))
    }

    /// Runs the graph to completion.
    ///
    /// Every task receives a clone of `cancel`. Firing it makes `run` return
    /// [`SchedError::Cancelled`] without waiting for, or aborting, tasks
    /// already in flight. On a task failure no further tasks start; the
    /// in-flight ones are drained and the first failure is returned. A graph
    /// in which some tasks can never become ready fails with
    /// [`SchedError::InvalidArgument`].
    #[instrument(skip(self, cancel), fields(tasks = self.nodes.len()))]
    pub async fn run(&self, cancel: &CancelToken) -> SchedResult<RunReport> {
        let started = Instant::now();
        let (successors, mut in_degree) = self.successors()?;
        let mut ready: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let limit = match self.config.max_parallelism {
            0 => usize::MAX,
            n => n,
        };
        debug!(limit = self.config.max_parallelism, "dag run starting");

        let mut running: JoinSet<(usize, Result<Result<(), TaskError>, String>)> = JoinSet::new();
        let mut completed = Vec::with_capacity(self.nodes.len());
        let mut first_error: Option<SchedError> = None;

        loop {
            if let Some(reason) = cancel.cancelled_reason() {
                running.detach_all();
                return Err(SchedError::Cancelled(reason));
            }
            if first_error.is_none() {
                while running.len() < limit {
                    let Some(i) = ready.pop_front() else { break };
                    let fut = (self.nodes[i].task)(cancel.clone());
                    running.spawn(async move {
                        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                        (i, outcome.map_err(panic_message))
                    });
                }
            }
            if running.is_empty() {
                if let Some(err) = first_error {
                    return Err(err);
                }
                if completed.len() == self.nodes.len() {
                    break;
                }
                return Err(SchedError::InvalidArgument(format!(
                    "cycle or deadlock: {} of {} tasks can never run",
                    self.nodes.len() - completed.len(),
                    self.nodes.len()
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => continue,
                joined = running.join_next() => match joined {
                    Some(Ok((i, Ok(Ok(()))))) => {
                        let id = &self.nodes[i].id;
                        debug!(task = %id, "task completed");
                        completed.push(id.clone());
                        for &s in &successors[i] {
                            in_degree[s] -= 1;
                            if in_degree[s] == 0 {
                                ready.push_back(s);
                            }
                        }
                    }
                    Some(Ok((i, Ok(Err(source))))) => {
                        let id = &self.nodes[i].id;
                        debug!(task = %id, "task failed");
                        if let Some(observer) = &self.observer {
                            observer(id, &source);
                        }
                        if first_error.is_none() {
                            first_error = Some(SchedError::Task { id: id.clone(), source });
                        }
                    }
                    Some(Ok((i, Err(panic)))) => {
                        let id = &self.nodes[i].id;
                        debug!(task = %id, "task panicked");
                        if let Some(observer) = &self.observer {
                            let source: TaskError = format!("task panicked: {}", panic).into();
                            observer(id, &source);
                        }
                        if first_error.is_none() {
                            first_error = Some(SchedError::Internal(format!(
                                "task {} panicked: {}",
                                id, panic
                            )));
                        }
                    }
                    Some(Err(join_err)) => {
                        if first_error.is_none() {
                            first_error = Some(SchedError::Internal(format!(
                                "task did not finish: {}",
                                join_err
                            )));
                        }
                    }
                    None => {}
                },
            }
        }

        let elapsed = started.elapsed();
        debug!(tasks = completed.len(), elapsed_ms = elapsed.as_millis() as u64, "dag run finished");
        Ok(RunReport { completed, elapsed })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

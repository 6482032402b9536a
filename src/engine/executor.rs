//! # Execution Engine Module
//!
//! Runs a set of tasks to completion, one at a time, in (group, order) order.
//! Each task is driven through a retry state machine; exhausted tasks fall
//! through to their ordered backup chain. Progress is reported as a lazy,
//! finite, non-restartable event stream that the caller drains; pause and
//! stop are cooperative flags observed only between task dispatches, so an
//! in-flight attempt always runs to completion.

use crate::engine::actuator::{InputActuator, ScreenSource};
use crate::engine::error::{AutomationError, ErrorInfo, Result};
use crate::engine::group::GroupTree;
use crate::engine::jitter::{JitterSource, RandomJitter, clamp_to_screen, in_bounds};
use crate::engine::matcher::ImageMatcher;
use crate::engine::retry::RetryPolicy;
use crate::engine::task::{Point, Task, TaskParameters, TaskStatus};
use chrono::Utc;
use image::GrayImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Backup chains have no depth limit in the data model; cap nesting
/// defensively when executing.
pub const MAX_BACKUP_DEPTH: usize = 8;

/// Default jitter radius for pointer coordinates, in pixels
pub const DEFAULT_CLICK_OFFSET_PX: i64 = 5;

const PAUSE_POLL: Duration = Duration::from_millis(10);

/// A single observable step of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        task_id: String,
        name: String,
    },
    /// A non-terminal attempt failed; the task may retry or fall back
    AttemptFailed {
        task_id: String,
        attempt: u32,
        error: ErrorInfo,
    },
    /// Timeout fast-fail: no retries, no backup chain
    TaskTimedOut {
        task_id: String,
        error: ErrorInfo,
    },
    BackupStarted {
        parent_id: String,
        task_id: String,
        name: String,
    },
    /// Final word on a task. For a primary task with backups this carries the
    /// overall outcome: Succeeded if any backup succeeded.
    TaskFinished {
        task_id: String,
        status: TaskStatus,
    },
}

/// Cooperative pause/stop flags shared with the driving side.
///
/// Both are checked only at task boundaries; neither interrupts an in-flight
/// attempt.
#[derive(Clone, Default)]
pub struct ExecutionControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl ExecutionControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Terminate the stream at the next task boundary
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// Stable sort by (group name, order ascending). Tasks in the same group with
/// equal order keep their original relative order.
pub fn sort_tasks(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.order.cmp(&b.order)));
    tasks
}

/// Walks tasks through the retry/backup state machine, driving the matcher
/// and the injected input collaborators
pub struct ExecutionEngine {
    matcher: ImageMatcher,
    actuator: Arc<dyn InputActuator>,
    screen: Arc<dyn ScreenSource>,
    jitter: Arc<dyn JitterSource>,
    retry_policy: RetryPolicy,
    control: ExecutionControl,
    /// Pointer jitter radius; 0 disables randomized offsets
    click_offset_px: i64,
}

impl ExecutionEngine {
    pub fn new(
        matcher: ImageMatcher,
        actuator: Arc<dyn InputActuator>,
        screen: Arc<dyn ScreenSource>,
    ) -> Self {
        Self {
            matcher,
            actuator,
            screen,
            jitter: Arc::new(RandomJitter),
            retry_policy: RetryPolicy::default(),
            control: ExecutionControl::default(),
            click_offset_px: DEFAULT_CLICK_OFFSET_PX,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_click_offset(mut self, pixels: i64) -> Self {
        self.click_offset_px = pixels;
        self
    }

    /// Handle for pausing or stopping a run from another thread
    pub fn control(&self) -> ExecutionControl {
        self.control.clone()
    }

    pub fn matcher(&self) -> &ImageMatcher {
        &self.matcher
    }

    /// Run the given tasks in (group, order) order, returning the lazy event
    /// stream. Nothing executes until the stream is polled.
    pub fn execute(&self, tasks: Vec<Task>) -> ExecutionStream<'_> {
        let sorted = sort_tasks(tasks);
        info!("execution scheduled for {} tasks", sorted.len());
        ExecutionStream {
            engine: self,
            queue: VecDeque::from(sorted),
            pending: VecDeque::new(),
            finished: Vec::new(),
            done: false,
        }
    }

    /// Run every task across the tree whose status is `Ready`
    pub fn execute_ready(&self, tree: &GroupTree) -> ExecutionStream<'_> {
        self.execute(tree.ready_tasks())
    }

    /// Drive one task (and, on exhaustion, its backup chain) through the
    /// state machine. Returns the overall outcome; the task entity keeps its
    /// own attempt outcome.
    fn run_task(
        &self,
        task: &mut Task,
        events: &mut VecDeque<ProgressEvent>,
        depth: usize,
    ) -> TaskStatus {
        events.push_back(ProgressEvent::TaskStarted {
            task_id: task.id.clone(),
            name: task.name.clone(),
        });
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        debug!(
            "task '{}' dispatched, up to {} retries",
            task.name, task.retry_count
        );

        let budget = Duration::from_secs(task.timeout);
        let mut attempt: u32 = 0;
        let own_status = loop {
            attempt += 1;
            let started = Instant::now();
            match self.attempt(task) {
                Ok(()) => break TaskStatus::Succeeded,
                Err(err) => {
                    // A failed attempt that overran the budget is a timeout
                    // no matter what actually went wrong inside it.
                    let err = if !err.fast_fail() && started.elapsed() > budget {
                        AutomationError::Timeout(task.timeout)
                    } else {
                        err
                    };

                    if err.fast_fail() {
                        warn!("task '{}' timed out, aborting", task.name);
                        events.push_back(ProgressEvent::TaskTimedOut {
                            task_id: task.id.clone(),
                            error: ErrorInfo::new(Some(task.id.clone()), &err)
                                .with_attempt(attempt),
                        });
                        task.status = TaskStatus::Failed;
                        task.completed_at = Some(Utc::now());
                        events.push_back(ProgressEvent::TaskFinished {
                            task_id: task.id.clone(),
                            status: TaskStatus::Failed,
                        });
                        return TaskStatus::Failed;
                    }

                    debug!("task '{}' attempt {attempt} failed: {err}", task.name);
                    events.push_back(ProgressEvent::AttemptFailed {
                        task_id: task.id.clone(),
                        attempt,
                        error: ErrorInfo::new(Some(task.id.clone()), &err).with_attempt(attempt),
                    });

                    if attempt > task.retry_count {
                        break TaskStatus::Failed;
                    }
                    self.retry_policy.sleep(attempt - 1);
                }
            }
        };

        task.completed_at = Some(Utc::now());

        if own_status == TaskStatus::Succeeded {
            task.status = TaskStatus::Succeeded;
            info!("task '{}' succeeded on attempt {attempt}", task.name);
            events.push_back(ProgressEvent::TaskFinished {
                task_id: task.id.clone(),
                status: TaskStatus::Succeeded,
            });
            return TaskStatus::Succeeded;
        }

        task.status = TaskStatus::Failed;

        let mut overall = TaskStatus::Failed;
        if !task.backup_tasks.is_empty() {
            if depth >= MAX_BACKUP_DEPTH {
                warn!(
                    "task '{}': backup chain deeper than {MAX_BACKUP_DEPTH}, not descending",
                    task.name
                );
            } else {
                info!(
                    "task '{}' exhausted retries, trying {} backup task(s)",
                    task.name,
                    task.backup_tasks.len()
                );
                let parent_id = task.id.clone();
                for backup in task.backup_tasks.iter_mut() {
                    events.push_back(ProgressEvent::BackupStarted {
                        parent_id: parent_id.clone(),
                        task_id: backup.id.clone(),
                        name: backup.name.clone(),
                    });
                    // The chain stops at the first backup that succeeds.
                    if self.run_task(backup, events, depth + 1) == TaskStatus::Succeeded {
                        overall = TaskStatus::Succeeded;
                        break;
                    }
                }
            }
        }

        events.push_back(ProgressEvent::TaskFinished {
            task_id: task.id.clone(),
            status: overall,
        });
        overall
    }

    /// Execute one attempt of a task
    fn attempt(&self, task: &Task) -> Result<()> {
        match &task.parameters {
            TaskParameters::Click {
                location,
                count,
                interval_ms,
                hold_ms,
            } => {
                let target = self.place(*location);
                self.actuator.click(target, *count, *interval_ms, *hold_ms)
            }
            TaskParameters::Drag {
                start,
                end,
                duration_ms,
            } => {
                let start = self.place(*start);
                let end = self.place(*end);
                let path = [start, end];
                self.actuator.drag(start, end, &path, *duration_ms)
            }
            TaskParameters::Type { text, interval_ms } => {
                let interval = self.jitter.scaled_delay(*interval_ms);
                self.actuator.type_text(text, interval)
            }
            TaskParameters::Swipe {
                start,
                end,
                duration_ms,
            } => {
                let start = self.place(*start);
                let end = self.place(*end);
                let duration = self.jitter.scaled_delay(*duration_ms);
                self.actuator.swipe(start, end, duration)
            }
            TaskParameters::Match {
                template,
                threshold,
            } => {
                let screen = self.screen.capture()?;
                let image = load_template(template)?;
                match self
                    .matcher
                    .match_template_with(&screen, Some(&image), *threshold)?
                {
                    Some(result) => {
                        debug!(
                            "template '{template}' found at ({}, {}) score {:.3}",
                            result.location.0, result.location.1, result.score
                        );
                        Ok(())
                    }
                    None => Err(AutomationError::Attempt(format!(
                        "no match for template '{template}'"
                    ))),
                }
            }
        }
    }

    /// Jitter a pointer coordinate, then correct it onto the screen.
    /// Out-of-bounds coordinates are clamped and logged, never fatal.
    fn place(&self, at: Point) -> Point {
        let (width, height) = self.screen.dimensions();
        let jittered = if self.click_offset_px > 0 {
            self.jitter.offset(at, self.click_offset_px)
        } else {
            at
        };
        if in_bounds(jittered, width, height) {
            jittered
        } else {
            let corrected = clamp_to_screen(jittered, width, height);
            warn!(
                "{}",
                AutomationError::CoordinateOutOfBounds {
                    x: jittered.x,
                    y: jittered.y,
                    width,
                    height,
                }
            );
            corrected
        }
    }
}

fn load_template(path: &str) -> Result<GrayImage> {
    let img = image::open(path)
        .map_err(|e| AutomationError::TemplateMissing(format!("{path}: {e}")))?;
    Ok(img.into_luma8())
}

/// Lazy, finite, non-restartable sequence of progress events.
///
/// Each call to `next` first drains events already produced; when none are
/// pending it observes the pause/stop flags and then dispatches the next
/// task, running it (retries, backups and all) to completion.
pub struct ExecutionStream<'a> {
    engine: &'a ExecutionEngine,
    queue: VecDeque<Task>,
    pending: VecDeque<ProgressEvent>,
    finished: Vec<Task>,
    done: bool,
}

impl ExecutionStream<'_> {
    /// Recover the task entities, finished ones first (with final statuses
    /// and timestamps), then any tasks never dispatched.
    pub fn into_tasks(self) -> Vec<Task> {
        let mut tasks = self.finished;
        tasks.extend(self.queue);
        tasks
    }
}

impl Iterator for ExecutionStream<'_> {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.done {
                return None;
            }

            // Suspension point: the only place pause/stop are observed.
            while self.engine.control.is_paused() && !self.engine.control.is_stopped() {
                thread::sleep(PAUSE_POLL);
            }
            if self.engine.control.is_stopped() {
                info!("execution stopped, {} task(s) left undispatched", self.queue.len());
                self.done = true;
                return None;
            }

            let Some(mut task) = self.queue.pop_front() else {
                self.done = true;
                return None;
            };
            self.engine.run_task(&mut task, &mut self.pending, 0);
            self.finished.push(task);
        }
    }
}

/*!
# Screenflow

A visual automation engine for driving repetitive on-screen interactions
(click, drag, type, swipe) gated by image recognition, with hierarchical task
organization and retryable execution.

## Overview

Screenflow organizes automatable tasks into a named group tree. A run walks a
task set in (group, order) order, drives each task through a bounded retry
state machine, and falls through to ordered backup-task chains when a task
exhausts its retries. Match tasks locate a template image on a screen capture
despite unknown scale; match computations are memoized in a size- and
TTL-bounded cache.

## Key Components

* **ExecutionEngine**: walks a task set sequentially and reports progress as a
  lazy event stream the caller drains
* **ImageMatcher**: multi-scale normalized-correlation template search over a
  bounded worker pool
* **MatchCache**: LRU + TTL bounded cache for match results
* **GroupTree**: arena-backed group hierarchy with CRUD, traversal, and the
  persisted tree document
* **InputActuator / ScreenSource / JitterSource**: collaborator traits for
  input injection, screen capture, and humanized timing

## Usage Example

```rust,no_run
use screenflow::{
    ExecutionEngine, GroupTree, ImageMatcher, LoggingActuator, MatcherConfig, Point,
    StaticScreen, Task, TaskParameters, ROOT_GROUP_NAME,
};
use std::sync::Arc;

fn main() -> screenflow::Result<()> {
    let mut tree = GroupTree::new();
    tree.create_group("login", ROOT_GROUP_NAME)?;
    tree.add_task_to_group(
        "login",
        Task::new(
            "open form",
            TaskParameters::Click {
                location: Point::new(640, 360),
                count: 1,
                interval_ms: 100,
                hold_ms: 0,
            },
        )
        .with_retry_count(2),
    )?;

    let engine = ExecutionEngine::new(
        ImageMatcher::new(MatcherConfig::default()),
        Arc::new(LoggingActuator),
        Arc::new(StaticScreen::new(image::GrayImage::new(1280, 720))),
    );

    let mut stream = engine.execute_ready(&tree);
    for event in &mut stream {
        println!("{}", serde_json::to_string(&event).unwrap());
    }

    // Write final statuses back onto the tree.
    for task in stream.into_tasks() {
        tree.update_task(&task);
    }
    Ok(())
}
```

## Error Handling

Attempt-level failures never escape a run: they are converted into structured
events on the stream. Management calls on [`GroupTree`] fail synchronously
(`GroupNotFound`, protected root), since those reflect usage errors rather
than runtime faults.
*/

pub mod engine;

// Re-export all public APIs for easier access
pub use engine::actuator::{InputActuator, LoggingActuator, ScreenSource, StaticScreen};
pub use engine::cache::{CacheCost, LruTtlCache, MatchCache};
pub use engine::error::{AutomationError, ErrorInfo, Result};
pub use engine::executor::{
    ExecutionControl, ExecutionEngine, ExecutionStream, ProgressEvent, sort_tasks,
};
pub use engine::group::{
    ExecutionRule, GroupTree, TaskGroup, TreeDocument, ROOT_GROUP_NAME,
};
pub use engine::jitter::{JitterSource, NoJitter, RandomJitter};
pub use engine::matcher::{ImageMatcher, MatchResult, MatcherConfig};
pub use engine::retry::RetryPolicy;
pub use engine::task::{Point, Task, TaskParameters, TaskStatus};

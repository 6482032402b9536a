pub mod actuator;
pub mod cache;
pub mod error;
pub mod executor;
pub mod group;
pub mod jitter;
pub mod matcher;
pub mod retry;
pub mod task;

// Re-export key types for easier access
pub use actuator::{InputActuator, LoggingActuator, ScreenSource, StaticScreen};
pub use cache::{CacheCost, LruTtlCache, MatchCache};
pub use error::{AutomationError, ErrorInfo, Result};
pub use executor::{
    ExecutionControl, ExecutionEngine, ExecutionStream, ProgressEvent, sort_tasks,
};
pub use group::{ExecutionRule, GroupTree, TaskGroup, TreeDocument, ROOT_GROUP_NAME};
pub use jitter::{JitterSource, NoJitter, RandomJitter};
pub use matcher::{ImageMatcher, MatchResult, MatcherConfig};
pub use retry::RetryPolicy;
pub use task::{Point, Task, TaskParameters, TaskStatus};

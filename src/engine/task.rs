use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A screen coordinate. Signed so jittered offsets can be computed before
/// flooring at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Lifecycle status of a task. Transitions during a run are owned exclusively
/// by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Ready,
    Running,
    Succeeded,
    Failed,
}

/// Per-type task parameters, tagged by `task_type` on the wire so the
/// persisted form carries `"task_type": ..., "parameters": {...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "parameters", rename_all = "snake_case")]
pub enum TaskParameters {
    Click {
        location: Point,
        #[serde(default = "default_click_count")]
        count: u32,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default)]
        hold_ms: u64,
    },
    Drag {
        start: Point,
        end: Point,
        #[serde(default = "default_duration_ms")]
        duration_ms: u64,
    },
    Type {
        text: String,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
    },
    Swipe {
        start: Point,
        end: Point,
        #[serde(default = "default_duration_ms")]
        duration_ms: u64,
    },
    Match {
        /// Path to the template image to search for on screen
        template: String,
        /// Optional per-task override of the matcher threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },
}

impl TaskParameters {
    /// The `task_type` discriminant as it appears on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskParameters::Click { .. } => "click",
            TaskParameters::Drag { .. } => "drag",
            TaskParameters::Type { .. } => "type",
            TaskParameters::Swipe { .. } => "swipe",
            TaskParameters::Match { .. } => "match",
        }
    }
}

fn default_click_count() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    100
}

fn default_duration_ms() -> u64 {
    500
}

fn default_timeout() -> u64 {
    30
}

/// A single automatable action plus its retry/backup policy.
///
/// `order` positions the task within its group; it need not be globally
/// unique. `backup_tasks` is an ordered fallback chain: each backup is
/// independently retryable and may carry its own nested backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "generate_task_id")]
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub parameters: TaskParameters,
    /// Name of the owning group
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub retry_count: u32,
    /// Attempt budget in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub backup_tasks: Vec<Task>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn generate_task_id() -> String {
    Uuid::new_v4().to_string()
}

impl Task {
    pub fn new(name: impl Into<String>, parameters: TaskParameters) -> Self {
        Self {
            id: generate_task_id(),
            name: name.into(),
            parameters,
            group: String::new(),
            retry_count: 0,
            timeout: default_timeout(),
            status: TaskStatus::Ready,
            order: 0,
            backup_tasks: Vec::new(),
            created_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = timeout_secs;
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn add_backup_task(&mut self, task: Task) {
        self.backup_tasks.push(task);
    }

    pub fn remove_backup_task(&mut self, task_id: &str) {
        self.backup_tasks.retain(|t| t.id != task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_splits_type_and_parameters() {
        let task = Task::new(
            "open menu",
            TaskParameters::Click {
                location: Point::new(120, 48),
                count: 2,
                interval_ms: 150,
                hold_ms: 0,
            },
        )
        .with_group("menus");

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["task_type"], json!("click"));
        assert_eq!(value["parameters"]["location"]["x"], json!(120));
        assert_eq!(value["parameters"]["count"], json!(2));
        assert_eq!(value["group"], json!("menus"));
        assert_eq!(value["status"], json!("Ready"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let task: Task = serde_json::from_value(json!({
            "name": "login button",
            "task_type": "match",
            "parameters": { "template": "assets/login.png" },
            "group": "auth"
        }))
        .unwrap();

        assert!(!task.id.is_empty());
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.timeout, 30);
        assert_eq!(task.status, TaskStatus::Ready);
        assert!(task.backup_tasks.is_empty());
        assert_eq!(task.parameters.type_name(), "match");
    }

    #[test]
    fn test_backup_tasks_round_trip_recursively() {
        let mut primary = Task::new(
            "type name",
            TaskParameters::Type {
                text: "hello".into(),
                interval_ms: 40,
            },
        );
        let mut backup = Task::new(
            "fallback swipe",
            TaskParameters::Swipe {
                start: Point::new(10, 400),
                end: Point::new(10, 100),
                duration_ms: 300,
            },
        );
        backup.add_backup_task(Task::new(
            "nested click",
            TaskParameters::Click {
                location: Point::new(5, 5),
                count: 1,
                interval_ms: 100,
                hold_ms: 0,
            },
        ));
        primary.add_backup_task(backup);

        let json = serde_json::to_string(&primary).unwrap();
        let restored: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, primary);
        assert_eq!(restored.backup_tasks[0].backup_tasks.len(), 1);
    }

    #[test]
    fn test_remove_backup_task() {
        let mut task = Task::new(
            "primary",
            TaskParameters::Type {
                text: "x".into(),
                interval_ms: 10,
            },
        );
        let backup = Task::new(
            "backup",
            TaskParameters::Type {
                text: "y".into(),
                interval_ms: 10,
            },
        );
        let backup_id = backup.id.clone();
        task.add_backup_task(backup);
        assert_eq!(task.backup_tasks.len(), 1);

        task.remove_backup_task(&backup_id);
        assert!(task.backup_tasks.is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Task::new(
            "a",
            TaskParameters::Type {
                text: String::new(),
                interval_ms: 10,
            },
        );
        let b = Task::new(
            "b",
            TaskParameters::Type {
                text: String::new(),
                interval_ms: 10,
            },
        );
        assert_ne!(a.id, b.id);
    }
}

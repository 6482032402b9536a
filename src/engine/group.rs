//! # Group Tree Module
//!
//! Hierarchical ownership of task groups and their tasks. The tree is an
//! arena of groups keyed by generated id; a group's parent is held as an id,
//! never a second owning pointer, so moves and deletes cannot create
//! ownership cycles. The tree is rooted at exactly one group with a reserved
//! name; that root can never be deleted or reparented.
//!
//! Group names are not enforced unique: lookups return the first match in
//! pre-order, consistent with the persisted document shape.

use crate::engine::error::{AutomationError, Result};
use crate::engine::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Reserved name of the tree root
pub const ROOT_GROUP_NAME: &str = "root";

pub type GroupId = String;

/// Aggregate behavior declared for a group when it is run as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRule {
    #[default]
    Continue,
    SkipOnFail,
    AllSuccess,
}

/// A named group owning an ordered set of tasks and child groups
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub id: GroupId,
    pub name: String,
    /// Back-reference for traversal only; ownership is top-down
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub tasks: Vec<Task>,
    pub execution_rule: ExecutionRule,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskGroup {
    fn new(name: impl Into<String>, parent: Option<GroupId>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            parent,
            children: Vec::new(),
            tasks: Vec::new(),
            execution_rule: ExecutionRule::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted shape of a group subtree (see `TreeDocument`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDoc {
    pub name: String,
    #[serde(default)]
    pub execution_rule: ExecutionRule,
    #[serde(default)]
    pub children: Vec<GroupDoc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Root document exchanged with the persistence gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeDocument {
    pub root_group: GroupDoc,
}

/// Arena-backed group hierarchy with a CRUD and traversal API
pub struct GroupTree {
    nodes: HashMap<GroupId, TaskGroup>,
    root: GroupId,
}

impl GroupTree {
    pub fn new() -> Self {
        let root = TaskGroup::new(ROOT_GROUP_NAME, None);
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            nodes,
            root: root_id,
        }
    }

    pub fn root(&self) -> &TaskGroup {
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: &str) -> Option<&TaskGroup> {
        self.nodes.get(id)
    }

    /// Group ids in pre-order (parent before children, children in insertion
    /// order)
    fn preorder_ids(&self, from: &GroupId) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut stack = vec![from.clone()];
        while let Some(id) = stack.pop() {
            if let Some(group) = self.nodes.get(&id) {
                out.push(id);
                for child in group.children.iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        out
    }

    /// First group with this name in pre-order. Names are not unique; with
    /// duplicates the first one discovered wins.
    pub fn find_group(&self, name: &str) -> Option<&TaskGroup> {
        self.find_group_id(name).map(|id| &self.nodes[&id])
    }

    fn find_group_id(&self, name: &str) -> Option<GroupId> {
        self.preorder_ids(&self.root)
            .into_iter()
            .find(|id| self.nodes[id].name == name)
    }

    /// Create a group under the named parent, appended after its existing
    /// children
    pub fn create_group(&mut self, name: &str, parent_name: &str) -> Result<GroupId> {
        let parent_id = self
            .find_group_id(parent_name)
            .ok_or_else(|| AutomationError::GroupNotFound(parent_name.to_string()))?;

        let group = TaskGroup::new(name, Some(parent_id.clone()));
        let group_id = group.id.clone();
        self.nodes.insert(group_id.clone(), group);

        let parent = self.nodes.get_mut(&parent_id).expect("parent resolved above");
        parent.children.push(group_id.clone());
        parent.updated_at = Utc::now();

        info!("created group '{name}' under '{parent_name}'");
        Ok(group_id)
    }

    /// Detach the named group and everything beneath it, tasks included
    pub fn delete_group(&mut self, name: &str) -> Result<()> {
        if name == self.root().name {
            return Err(AutomationError::RootGroupProtected(name.to_string()));
        }
        let group_id = self
            .find_group_id(name)
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))?;

        self.detach(&group_id);
        let removed = self.preorder_ids(&group_id);
        for id in &removed {
            self.nodes.remove(id);
        }

        info!("deleted group '{name}' ({} nodes)", removed.len());
        Ok(())
    }

    /// Re-parent a subtree under the named destination.
    ///
    /// The destination is resolved before the subtree is detached, and no
    /// check is made that it lies outside the moved subtree.
    pub fn move_group(&mut self, name: &str, new_parent_name: &str) -> Result<()> {
        if name == self.root().name {
            return Err(AutomationError::RootGroupProtected(name.to_string()));
        }
        let group_id = self
            .find_group_id(name)
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))?;
        let new_parent_id = self
            .find_group_id(new_parent_name)
            .ok_or_else(|| AutomationError::GroupNotFound(new_parent_name.to_string()))?;

        self.detach(&group_id);

        let new_parent = self
            .nodes
            .get_mut(&new_parent_id)
            .expect("destination resolved above");
        new_parent.children.push(group_id.clone());
        new_parent.updated_at = Utc::now();

        let group = self.nodes.get_mut(&group_id).expect("group resolved above");
        group.parent = Some(new_parent_id);
        group.updated_at = Utc::now();

        info!("moved group '{name}' under '{new_parent_name}'");
        Ok(())
    }

    fn detach(&mut self, group_id: &GroupId) {
        let parent_id = self.nodes.get(group_id).and_then(|g| g.parent.clone());
        if let Some(parent_id) = parent_id
            && let Some(parent) = self.nodes.get_mut(&parent_id)
        {
            parent.children.retain(|c| c != group_id);
            parent.updated_at = Utc::now();
        }
    }

    pub fn get_tasks_by_group(&self, name: &str) -> Result<&[Task]> {
        self.find_group(name)
            .map(|g| g.tasks.as_slice())
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))
    }

    /// Replace the group's tasks wholesale, stamping the owning group name
    pub fn set_tasks_for_group(&mut self, name: &str, mut tasks: Vec<Task>) -> Result<()> {
        let group_id = self
            .find_group_id(name)
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))?;
        for task in &mut tasks {
            task.group = name.to_string();
        }
        let group = self.nodes.get_mut(&group_id).expect("group resolved above");
        group.tasks = tasks;
        group.updated_at = Utc::now();
        Ok(())
    }

    pub fn add_task_to_group(&mut self, name: &str, mut task: Task) -> Result<()> {
        let group_id = self
            .find_group_id(name)
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))?;
        task.group = name.to_string();
        let group = self.nodes.get_mut(&group_id).expect("group resolved above");
        group.tasks.push(task);
        group.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_task_from_group(&mut self, name: &str, task_id: &str) -> Result<()> {
        let group_id = self
            .find_group_id(name)
            .ok_or_else(|| AutomationError::GroupNotFound(name.to_string()))?;
        let group = self.nodes.get_mut(&group_id).expect("group resolved above");
        let before = group.tasks.len();
        group.tasks.retain(|t| t.id != task_id);
        if group.tasks.len() == before {
            warn!("task '{task_id}' not present in group '{name}'");
        }
        group.updated_at = Utc::now();
        Ok(())
    }

    /// Flatten the tree in pre-order
    pub fn get_all_groups(&self) -> Vec<&TaskGroup> {
        self.preorder_ids(&self.root)
            .iter()
            .map(|id| &self.nodes[id])
            .collect()
    }

    /// Every task across the tree with status `Ready`, in pre-order group
    /// order
    pub fn ready_tasks(&self) -> Vec<Task> {
        self.get_all_groups()
            .iter()
            .flat_map(|g| g.tasks.iter())
            .filter(|t| t.status == TaskStatus::Ready)
            .cloned()
            .collect()
    }

    /// Write a task's fields back over the stored task with the same id.
    /// Returns false when no group owns such a task.
    pub fn update_task(&mut self, task: &Task) -> bool {
        let ids = self.preorder_ids(&self.root);
        for id in ids {
            let group = self.nodes.get_mut(&id).expect("id from preorder walk");
            if let Some(slot) = group.tasks.iter_mut().find(|t| t.id == task.id) {
                *slot = task.clone();
                group.updated_at = Utc::now();
                return true;
            }
        }
        false
    }

    /// Convert the tree to the nested persistence document
    pub fn to_tree_map(&self) -> TreeDocument {
        TreeDocument {
            root_group: self.subtree_doc(&self.root),
        }
    }

    fn subtree_doc(&self, id: &GroupId) -> GroupDoc {
        let group = &self.nodes[id];
        GroupDoc {
            name: group.name.clone(),
            execution_rule: group.execution_rule,
            children: group.children.iter().map(|c| self.subtree_doc(c)).collect(),
            tasks: group.tasks.clone(),
        }
    }

    /// Rebuild a tree from the nested persistence document. Group ids and
    /// timestamps are re-stamped; the document does not carry them.
    pub fn from_tree_map(doc: TreeDocument) -> Self {
        let mut nodes = HashMap::new();
        let root_id = Self::insert_doc(&mut nodes, doc.root_group, None);
        Self {
            nodes,
            root: root_id,
        }
    }

    fn insert_doc(
        nodes: &mut HashMap<GroupId, TaskGroup>,
        doc: GroupDoc,
        parent: Option<GroupId>,
    ) -> GroupId {
        let mut group = TaskGroup::new(doc.name, parent);
        group.execution_rule = doc.execution_rule;
        group.tasks = doc.tasks;
        let id = group.id.clone();
        nodes.insert(id.clone(), group);

        for child in doc.children {
            let child_id = Self::insert_doc(nodes, child, Some(id.clone()));
            nodes
                .get_mut(&id)
                .expect("inserted above")
                .children
                .push(child_id);
        }
        id
    }

    // Load tree from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        let doc: TreeDocument =
            serde_json::from_str(json_str).map_err(AutomationError::from_serde)?;
        Ok(Self::from_tree_map(doc))
    }

    // Load tree from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json_str = fs::read_to_string(path).map_err(AutomationError::from_io)?;
        Self::from_json(&json_str)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_tree_map()).map_err(AutomationError::from_serde)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?).map_err(AutomationError::from_io)
    }
}

impl Default for GroupTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::TaskParameters;

    fn type_task(name: &str) -> Task {
        Task::new(
            name,
            TaskParameters::Type {
                text: "x".into(),
                interval_ms: 10,
            },
        )
    }

    #[test]
    fn test_create_and_find() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("B", "A").unwrap();

        let b = tree.find_group("B").unwrap();
        let a = tree.find_group("A").unwrap();
        assert_eq!(b.parent.as_deref(), Some(a.id.as_str()));
        assert_eq!(a.children.len(), 1);
    }

    #[test]
    fn test_create_under_missing_parent_is_group_not_found() {
        let mut tree = GroupTree::new();
        let err = tree.create_group("B", "A").unwrap_err();
        assert!(matches!(err, AutomationError::GroupNotFound(name) if name == "A"));
    }

    #[test]
    fn test_root_deletion_always_rejected() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();

        let err = tree.delete_group(ROOT_GROUP_NAME).unwrap_err();
        assert!(matches!(err, AutomationError::RootGroupProtected(_)));
        assert!(tree.move_group(ROOT_GROUP_NAME, "A").is_err());
    }

    #[test]
    fn test_delete_removes_whole_subtree() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("B", "A").unwrap();
        tree.add_task_to_group("B", type_task("t")).unwrap();

        tree.delete_group("A").unwrap();
        assert!(tree.find_group("A").is_none());
        assert!(tree.find_group("B").is_none());
        assert_eq!(tree.get_all_groups().len(), 1);
    }

    #[test]
    fn test_move_reparents_subtree() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("B", ROOT_GROUP_NAME).unwrap();
        tree.create_group("C", "A").unwrap();

        tree.move_group("C", "B").unwrap();
        let b = tree.find_group("B").unwrap();
        let c = tree.find_group("C").unwrap();
        assert_eq!(c.parent.as_deref(), Some(b.id.as_str()));
        assert!(tree.find_group("A").unwrap().children.is_empty());
    }

    #[test]
    fn test_duplicate_names_resolve_to_first_preorder_match() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("dup", "A").unwrap();
        tree.create_group("B", ROOT_GROUP_NAME).unwrap();
        tree.create_group("dup", "B").unwrap();

        // "A" precedes "B" among root's children, so A's "dup" wins.
        let found = tree.find_group("dup").unwrap();
        let a = tree.find_group("A").unwrap();
        assert_eq!(found.parent.as_deref(), Some(a.id.as_str()));
    }

    #[test]
    fn test_preorder_flattening() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("A1", "A").unwrap();
        tree.create_group("B", ROOT_GROUP_NAME).unwrap();

        let names: Vec<_> = tree.get_all_groups().iter().map(|g| g.name.clone()).collect();
        assert_eq!(names, vec!["root", "A", "A1", "B"]);
    }

    #[test]
    fn test_task_management() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();

        let task = type_task("t1");
        let task_id = task.id.clone();
        tree.add_task_to_group("A", task).unwrap();
        assert_eq!(tree.get_tasks_by_group("A").unwrap().len(), 1);
        assert_eq!(tree.get_tasks_by_group("A").unwrap()[0].group, "A");

        tree.set_tasks_for_group("A", vec![type_task("t2"), type_task("t3")])
            .unwrap();
        assert_eq!(tree.get_tasks_by_group("A").unwrap().len(), 2);

        // The replaced set no longer contains the original task.
        tree.remove_task_from_group("A", &task_id).unwrap();
        assert_eq!(tree.get_tasks_by_group("A").unwrap().len(), 2);

        assert!(tree.get_tasks_by_group("missing").is_err());
    }

    #[test]
    fn test_ready_tasks_spans_the_tree() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("B", ROOT_GROUP_NAME).unwrap();

        let mut done = type_task("done");
        done.status = TaskStatus::Succeeded;
        tree.add_task_to_group("A", done).unwrap();
        tree.add_task_to_group("A", type_task("a1")).unwrap();
        tree.add_task_to_group("B", type_task("b1")).unwrap();

        let ready = tree.ready_tasks();
        let names: Vec<_> = ready.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["a1", "b1"]);
    }

    #[test]
    fn test_update_task_writes_back_status() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        let task = type_task("t");
        let mut finished = task.clone();
        tree.add_task_to_group("A", task).unwrap();

        finished.status = TaskStatus::Succeeded;
        finished.group = "A".into();
        assert!(tree.update_task(&finished));
        assert_eq!(
            tree.get_tasks_by_group("A").unwrap()[0].status,
            TaskStatus::Succeeded
        );
    }

    #[test]
    fn test_tree_document_round_trip() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.create_group("A1", "A").unwrap();
        let mut task = type_task("t").with_order(3);
        task.add_backup_task(type_task("fallback"));
        tree.add_task_to_group("A1", task).unwrap();

        let json = tree.to_json().unwrap();
        let restored = GroupTree::from_json(&json).unwrap();

        let names: Vec<_> = restored
            .get_all_groups()
            .iter()
            .map(|g| g.name.clone())
            .collect();
        assert_eq!(names, vec!["root", "A", "A1"]);
        let tasks = restored.get_tasks_by_group("A1").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].order, 3);
        assert_eq!(tasks[0].backup_tasks.len(), 1);
    }

    #[test]
    fn test_document_shape_matches_gateway_contract() {
        let mut tree = GroupTree::new();
        tree.create_group("A", ROOT_GROUP_NAME).unwrap();
        tree.add_task_to_group("A", type_task("t")).unwrap();

        let value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
        assert_eq!(value["root_group"]["name"], "root");
        assert_eq!(value["root_group"]["execution_rule"], "continue");
        let group_a = &value["root_group"]["children"][0];
        assert_eq!(group_a["name"], "A");
        assert_eq!(group_a["tasks"][0]["task_type"], "type");
        assert!(group_a["tasks"][0]["parameters"].is_object());
    }
}

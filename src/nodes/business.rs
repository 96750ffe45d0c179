//! Business-context strategies.
//!
//! Task-assignment and onboarding workflows share every node contract; they
//! only differ in how an approval is labelled, which business fields are
//! copied onto pending approvals, who counts as a stakeholder and whose
//! manager a `manager` assignee points at.

use serde_json::Map;

use crate::engine::types::WorkflowInstance;
use crate::template::display_value;

pub const TASK_ASSIGNMENT: &str = "task_assignment";
pub const ONBOARDING: &str = "onboarding";

/// Whose direct manager a `manager` assignee resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerSubject {
    /// Employee record looked up by login/user id.
    User(String),
    /// Employee record looked up by employee id.
    Employee(String),
}

pub trait BusinessContext: Send + Sync {
    fn business_type(&self) -> &str;

    /// Short title shown on pending approvals and notifications.
    fn title(&self, instance: &WorkflowInstance) -> String;

    /// Instance variables copied onto each pending approval for display.
    fn snapshot_keys(&self) -> &[&'static str];

    /// Variables holding user ids of people who may watch but not act.
    fn stakeholder_keys(&self) -> &[&'static str];

    fn manager_subject(&self, instance: &WorkflowInstance) -> ManagerSubject;

    fn snapshot(&self, instance: &WorkflowInstance) -> Map<String, serde_json::Value> {
        let mut data = Map::new();
        data.insert("title".to_string(), self.title(instance).into());
        for key in self.snapshot_keys() {
            if let Some(value) = instance.variables.get(*key) {
                data.insert(key.to_string(), value.clone());
            }
        }
        data
    }
}

fn var_or(instance: &WorkflowInstance, key: &str, fallback: &str) -> String {
    instance
        .variables
        .get(key)
        .map(display_value)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Approvals gating a task assignment produced by the scoring service.
pub struct TaskAssignmentContext;

impl BusinessContext for TaskAssignmentContext {
    fn business_type(&self) -> &str {
        TASK_ASSIGNMENT
    }

    fn title(&self, instance: &WorkflowInstance) -> String {
        format!(
            "Task assignment: {}",
            var_or(instance, "task_title", &instance.business_id)
        )
    }

    fn snapshot_keys(&self) -> &[&'static str] {
        &[
            "task_id",
            "task_title",
            "project_id",
            "assignee_id",
            "assignment_strategy",
            "score",
            "priority",
            "due_date",
        ]
    }

    fn stakeholder_keys(&self) -> &[&'static str] {
        &["assignee_id"]
    }

    fn manager_subject(&self, instance: &WorkflowInstance) -> ManagerSubject {
        ManagerSubject::User(instance.started_by.clone())
    }
}

/// Approvals gating a new hire's onboarding request.
pub struct OnboardingContext;

impl BusinessContext for OnboardingContext {
    fn business_type(&self) -> &str {
        ONBOARDING
    }

    fn title(&self, instance: &WorkflowInstance) -> String {
        format!(
            "Onboarding: {}",
            var_or(instance, "employee_name", &instance.business_id)
        )
    }

    fn snapshot_keys(&self) -> &[&'static str] {
        &[
            "employee_id",
            "employee_name",
            "email",
            "position_id",
            "department_id",
            "start_date",
        ]
    }

    fn stakeholder_keys(&self) -> &[&'static str] {
        &["employee_user_id"]
    }

    /// The new hire's manager when the request names the employee; the
    /// requester's manager otherwise.
    fn manager_subject(&self, instance: &WorkflowInstance) -> ManagerSubject {
        match instance.variables.get("employee_id").map(display_value) {
            Some(id) if !id.is_empty() => ManagerSubject::Employee(id),
            _ => ManagerSubject::User(instance.started_by.clone()),
        }
    }
}

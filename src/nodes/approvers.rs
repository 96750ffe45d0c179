//! Approver resolution: turn an approval node's assignee references into
//! concrete user ids.

use std::collections::HashSet;
use std::str::FromStr;

use tracing::warn;

use crate::directory::OrgDirectory;
use crate::engine::definition::Assignee;
use crate::engine::types::WorkflowInstance;
use crate::nodes::business::{BusinessContext, ManagerSubject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeKind {
    User,
    Role,
    Department,
    Manager,
    DepartmentManager,
    Starter,
    Variable,
}

impl FromStr for AssigneeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(AssigneeKind::User),
            "role" => Ok(AssigneeKind::Role),
            "department" => Ok(AssigneeKind::Department),
            "manager" => Ok(AssigneeKind::Manager),
            "department_manager" => Ok(AssigneeKind::DepartmentManager),
            "starter" => Ok(AssigneeKind::Starter),
            "variable" => Ok(AssigneeKind::Variable),
            other => Err(format!("unknown assignee type '{}'", other)),
        }
    }
}

/// Resolved approvers plus the reasons any entry was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub users: Vec<String>,
    pub skipped: Vec<String>,
}

/// Resolve every assignee, deduplicating while keeping first-seen order.
/// Entries that resolve to nobody are skipped; a `backup` user stands in for them.
pub async fn resolve_assignees(
    assignees: &[Assignee],
    instance: &WorkflowInstance,
    directory: &dyn OrgDirectory,
    business: &dyn BusinessContext,
) -> Resolution {
    let mut resolution = Resolution::default();
    let mut seen = HashSet::new();

    for assignee in assignees {
        let users = match resolve_one(assignee, instance, directory, business).await {
            Ok(users) if !users.is_empty() => users,
            outcome => {
                let reason = match outcome {
                    Err(reason) => reason,
                    Ok(_) => format!("{} '{}' resolved to nobody", assignee.kind, assignee.value),
                };
                match assignee.backup.as_deref().filter(|b| !b.is_empty()) {
                    Some(backup) => {
                        warn!(instance_id = %instance.id, reason = %reason, backup = %backup, "Using backup approver");
                        vec![backup.to_string()]
                    }
                    None => {
                        warn!(instance_id = %instance.id, reason = %reason, "Skipping unresolvable assignee");
                        resolution.skipped.push(reason);
                        continue;
                    }
                }
            }
        };

        for user in users {
            if seen.insert(user.clone()) {
                resolution.users.push(user);
            }
        }
    }

    resolution
}

async fn resolve_one(
    assignee: &Assignee,
    instance: &WorkflowInstance,
    directory: &dyn OrgDirectory,
    business: &dyn BusinessContext,
) -> Result<Vec<String>, String> {
    let kind: AssigneeKind = assignee.kind.parse()?;
    let value = assignee.value.trim();

    match kind {
        AssigneeKind::User => Ok(vec![value.to_string()]),
        AssigneeKind::Starter => Ok(vec![instance.started_by.clone()]),
        AssigneeKind::Role => directory
            .users_with_role(value)
            .await
            .map_err(|e| format!("role '{}' lookup failed: {:#}", value, e)),
        AssigneeKind::Department => directory
            .department_members(value)
            .await
            .map_err(|e| format!("department '{}' lookup failed: {:#}", value, e)),
        AssigneeKind::Manager | AssigneeKind::DepartmentManager => {
            resolve_manager(&business.manager_subject(instance), directory)
                .await
                .map(|user| vec![user])
        }
        AssigneeKind::Variable => match instance.variables.get(value) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(vec![s.trim().to_string()]),
            Some(serde_json::Value::Number(n)) => Ok(vec![n.to_string()]),
            Some(_) => Err(format!("variable '{}' does not hold a user id", value)),
            None => Err(format!("variable '{}' is not set", value)),
        },
    }
}

/// Follow an employee record's direct-manager reference to the manager's user id.
pub async fn resolve_manager(
    subject: &ManagerSubject,
    directory: &dyn OrgDirectory,
) -> Result<String, String> {
    let employee = match subject {
        ManagerSubject::User(user_id) => directory.employee_for_user(user_id).await,
        ManagerSubject::Employee(employee_id) => directory.employee(employee_id).await,
    }
    .map_err(|e| format!("employee lookup failed: {:#}", e))?
    .ok_or_else(|| format!("no employee record for {:?}", subject))?;

    let manager_id = employee
        .manager_id
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| format!("no direct manager for employee '{}'", employee.id))?;

    let manager = directory
        .employee(manager_id)
        .await
        .map_err(|e| format!("manager lookup failed: {:#}", e))?
        .ok_or_else(|| format!("manager '{}' has no employee record", manager_id))?;

    Ok(manager.user_id)
}

//! Organisation directory: the engine's window onto users, employees and
//! departments owned by the surrounding HR backend.
//!
//! Approval nodes only need three lookups: who holds a role, who belongs to a
//! department, and who an employee's direct manager is.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Employee record as far as approver resolution cares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    /// Login/user id the employee acts as.
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    /// Employee id of the direct manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
}

impl Employee {
    pub fn new(id: &str, user_id: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: String::new(),
            department_id: None,
            manager_id: None,
        }
    }

    pub fn in_department(mut self, department_id: &str) -> Self {
        self.department_id = Some(department_id.to_string());
        self
    }

    pub fn reporting_to(mut self, manager_id: &str) -> Self {
        self.manager_id = Some(manager_id.to_string());
        self
    }
}

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// User ids holding `role`.
    async fn users_with_role(&self, role: &str) -> Result<Vec<String>>;

    /// User ids of every employee in `department_id`.
    async fn department_members(&self, department_id: &str) -> Result<Vec<String>>;

    async fn employee(&self, employee_id: &str) -> Result<Option<Employee>>;

    async fn employee_for_user(&self, user_id: &str) -> Result<Option<Employee>>;
}

/// Directory held in memory, optionally loaded from a YAML or JSON file:
///
/// ```yaml
/// roles:
///   hr: ["10", "11"]
/// employees:
///   - { id: "e1", user_id: "7", department_id: "eng", manager_id: "e2" }
///   - { id: "e2", user_id: "8", department_id: "eng" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDirectory {
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub employees: Vec<Employee>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: &str, users: &[&str]) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .extend(users.iter().map(|u| u.to_string()));
        self
    }

    pub fn with_employee(mut self, employee: Employee) -> Self {
        self.employees.push(employee);
        self
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file: {}", path.display()))?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let directory = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse directory file: {}", path.display()))?
        } else {
            serde_yml::from_str(&contents)
                .with_context(|| format!("Failed to parse directory file: {}", path.display()))?
        };
        Ok(directory)
    }
}

#[async_trait]
impl OrgDirectory for InMemoryDirectory {
    async fn users_with_role(&self, role: &str) -> Result<Vec<String>> {
        Ok(self.roles.get(role).cloned().unwrap_or_default())
    }

    async fn department_members(&self, department_id: &str) -> Result<Vec<String>> {
        Ok(self
            .employees
            .iter()
            .filter(|e| e.department_id.as_deref() == Some(department_id))
            .map(|e| e.user_id.clone())
            .collect())
    }

    async fn employee(&self, employee_id: &str) -> Result<Option<Employee>> {
        Ok(self.employees.iter().find(|e| e.id == employee_id).cloned())
    }

    async fn employee_for_user(&self, user_id: &str) -> Result<Option<Employee>> {
        Ok(self
            .employees
            .iter()
            .find(|e| e.user_id == user_id)
            .cloned())
    }
}

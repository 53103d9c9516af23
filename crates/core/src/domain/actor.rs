use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "manager" => Some(Self::Manager),
            _ => None,
        }
    }
}

/// Authenticated caller of a workflow operation. Token verification happens
/// upstream; by the time an `Actor` exists its identity and role are trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: UserId(user_id.into()), role }
    }

    pub fn employee(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Employee)
    }

    pub fn manager(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Manager)
    }

    /// Only managers may approve or reject expenses and see every owner's records.
    pub fn is_approver(&self) -> bool {
        matches!(self.role, Role::Manager)
    }

    pub fn can_view(&self, owner_id: &UserId) -> bool {
        self.is_approver() || &self.user_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::{Actor, Role, UserId};

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" Manager "), Some(Role::Manager));
        assert_eq!(Role::parse("EMPLOYEE"), Some(Role::Employee));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn employees_only_view_their_own_expenses() {
        let employee = Actor::employee("u-1");
        assert!(!employee.is_approver());
        assert!(employee.can_view(&UserId("u-1".to_string())));
        assert!(!employee.can_view(&UserId("u-2".to_string())));

        let manager = Actor::manager("m-1");
        assert!(manager.is_approver());
        assert!(manager.can_view(&UserId("u-2".to_string())));
    }
}

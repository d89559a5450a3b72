//! Per-user partitioning of the data by sabha type.

use serde::Serialize;

use crate::error::{AttendanceError, Result};
use crate::models::{AdminUser, SabhaType};

/// What a logged-in user may see and do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub allowed: Vec<SabhaType>,
    pub is_admin: bool,
    pub can_delete: bool,
}

impl Permissions {
    /// Admins see every sabha type and may delete. Everyone else sees exactly
    /// their assigned types, which may be none.
    pub fn for_user(user: &AdminUser) -> Self {
        if user.is_admin {
            return Permissions::admin();
        }

        let mut allowed = Vec::new();
        for sabha_type in SabhaType::ALL {
            if user.allowed_sabha_types.contains(&sabha_type) {
                allowed.push(sabha_type);
            }
        }
        Permissions {
            allowed,
            is_admin: false,
            can_delete: user.can_delete,
        }
    }

    pub fn admin() -> Self {
        Permissions {
            allowed: SabhaType::ALL.to_vec(),
            is_admin: true,
            can_delete: true,
        }
    }

    pub fn can_view(&self, sabha_type: SabhaType) -> bool {
        self.allowed.contains(&sabha_type)
    }

    pub fn has_any(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn require_any(&self) -> Result<()> {
        if self.has_any() {
            Ok(())
        } else {
            Err(AttendanceError::denied(
                "You do not have access to any sabha type.",
            ))
        }
    }

    pub fn require_view(&self, sabha_type: SabhaType) -> Result<()> {
        if self.can_view(sabha_type) {
            Ok(())
        } else {
            Err(AttendanceError::denied(format!(
                "You do not have permission for {}.",
                sabha_type.display()
            )))
        }
    }

    pub fn require_delete(&self) -> Result<()> {
        if self.can_delete {
            Ok(())
        } else {
            Err(AttendanceError::denied("You do not have permission to delete."))
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AttendanceError::denied("Administrator access required."))
        }
    }

    /// Narrow an optional requested type to what this user may see.
    /// `None` means every allowed type.
    pub fn scope(&self, requested: Option<SabhaType>) -> Vec<SabhaType> {
        match requested {
            Some(t) if self.can_view(t) => vec![t],
            Some(_) => Vec::new(),
            None => self.allowed.clone(),
        }
    }
}

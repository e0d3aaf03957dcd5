//! Permission evaluation over the identity's role graph.
//!
//! Pure functions of the identity snapshot: no I/O, no caching, safe to
//! call at every render or decision point. Superusers short-circuit to
//! `true` without consulting the role graph.

use crate::Identity;

impl Identity {
    /// True iff the identity is a superuser or any held role's
    /// permission set contains `name`.
    pub fn has_permission(&self, name: &str) -> bool {
        if self.is_superuser {
            return true;
        }
        self.roles
            .iter()
            .any(|role| role.permissions.iter().any(|p| p.name == name))
    }

    /// True iff any held role's name equals `name`.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    /// Satisfied by at least one match. Use for gates where any of
    /// several capabilities suffices.
    pub fn has_any_permission<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|name| self.has_permission(name.as_ref()))
    }

    /// Requires every element to match. Use for gates that genuinely
    /// need the full set; an empty list is trivially satisfied.
    pub fn has_all_permissions<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|name| self.has_permission(name.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Permission, Role};
    use uuid::Uuid;

    fn permission(name: &str) -> Permission {
        let (resource, action) = name.split_once('.').unwrap();
        Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            description: None,
        }
    }

    fn role(name: &str, permissions: &[&str]) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            is_system_role: false,
            permissions: permissions.iter().map(|p| permission(p)).collect(),
        }
    }

    fn identity(superuser: bool, roles: Vec<Role>) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            username: None,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone_number: None,
            timezone: "UTC".to_string(),
            language: "en".to_string(),
            is_active: true,
            is_verified: true,
            is_superuser: superuser,
            is_two_factor_enabled: false,
            roles,
        }
    }

    #[test]
    fn test_permission_through_role() {
        let subject = identity(false, vec![role("User Manager", &["users.read", "users.update"])]);
        assert!(subject.has_permission("users.read"));
        assert!(!subject.has_permission("users.delete"));
    }

    #[test]
    fn test_superuser_overrides_empty_role_set() {
        let subject = identity(true, vec![]);
        assert!(subject.has_permission("anything.whatsoever"));
        assert!(subject.has_all_permissions(&["users.create", "roles.delete", "audit.read"]));
    }

    #[test]
    fn test_has_role() {
        let subject = identity(false, vec![role("Administrator", &[])]);
        assert!(subject.has_role("Administrator"));
        assert!(!subject.has_role("User Manager"));
    }

    #[test]
    fn test_any_vs_all_semantics() {
        let subject = identity(false, vec![role("r", &["a.read", "b.read"])]);

        // "A" held, "C" not: any passes, all does not.
        assert!(subject.has_any_permission(&["a.read", "c.read"]));
        assert!(!subject.has_all_permissions(&["a.read", "c.read"]));

        assert!(subject.has_all_permissions(&["a.read", "b.read"]));
        assert!(!subject.has_any_permission(&["c.read", "d.read"]));
    }

    #[test]
    fn test_empty_lists() {
        let subject = identity(false, vec![]);
        let none: &[&str] = &[];
        assert!(!subject.has_any_permission(none));
        assert!(subject.has_all_permissions(none));
    }

    #[test]
    fn test_permission_collected_across_roles() {
        let subject = identity(
            false,
            vec![role("viewer", &["users.read"]), role("editor", &["users.update"])],
        );
        assert!(subject.has_all_permissions(&["users.read", "users.update"]));
    }
}

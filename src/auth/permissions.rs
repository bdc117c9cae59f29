/*!
 * # Permissions
 *
 * Administrative permissions carried in the `permissions` claim of staff tokens.
 * Holders of the `admin` role bypass every check.
 */

pub const ADMIN_ROLE: &str = "admin";

pub mod consts {
    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_UPDATE: &str = "orders:update";
    pub const ORDERS_REFUND: &str = "orders:refund";
    pub const SUBMISSIONS_MANAGE: &str = "submissions:manage";
}

/// Every permission the API checks, for token issuance and documentation.
pub fn all_permissions() -> Vec<&'static str> {
    vec![
        consts::ORDERS_READ,
        consts::ORDERS_UPDATE,
        consts::ORDERS_REFUND,
        consts::SUBMISSIONS_MANAGE,
    ]
}

pub fn is_known_permission(permission: &str) -> bool {
    all_permissions().contains(&permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_names_are_resource_colon_action() {
        for p in all_permissions() {
            let (resource, action) = p.split_once(':').unwrap();
            assert!(!resource.is_empty() && !action.is_empty());
        }
        assert!(is_known_permission("orders:refund"));
        assert!(!is_known_permission("orders:delete"));
    }
}

//! Authorization guard: table-driven role hierarchy checks.
//!
//! SUPER_ADMIN > STAFF_ADMIN > USER. Every denial is a uniform `Forbidden`
//! regardless of whether the resource exists, so unauthorized callers cannot
//! enumerate accounts through error shapes.

use uuid::Uuid;

use crate::account::Role;
use crate::error::{Error, Result};

/// Privilege rank. Kept as an explicit table so the ordering is auditable in
/// one place.
const fn rank(role: Role) -> u8 {
    match role {
        Role::User => 0,
        Role::StaffAdmin => 1,
        Role::SuperAdmin => 2,
    }
}

/// Check that the caller meets a minimum role, without any ownership scoping.
pub const fn require_role(caller: Role, required: Role) -> Result<()> {
    if rank(caller) >= rank(required) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Authorize the caller to act on a resource owned by `owner_id` with role
/// `owner_role`.
///
/// - USER: only their own resources.
/// - STAFF_ADMIN: USER resources plus their own, never other admin accounts.
/// - SUPER_ADMIN: everything.
pub fn authorize(
    caller_id: Uuid,
    caller_role: Role,
    owner_id: Uuid,
    owner_role: Role,
) -> Result<()> {
    if caller_id == owner_id {
        return Ok(());
    }
    match caller_role {
        Role::SuperAdmin => Ok(()),
        Role::StaffAdmin if owner_role == Role::User => Ok(()),
        Role::StaffAdmin | Role::User => Err(Error::Forbidden),
    }
}

/// Gate account creation by role: only SUPER_ADMIN creates STAFF_ADMIN
/// accounts, and SUPER_ADMIN accounts are never created through actor-driven
/// paths (bootstrap registration is the single creation path).
pub const fn may_create(actor: Role, new_role: Role) -> Result<()> {
    match new_role {
        Role::User => Ok(()),
        Role::StaffAdmin => require_role(actor, Role::SuperAdmin),
        Role::SuperAdmin => Err(Error::Forbidden),
    }
}

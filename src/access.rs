use serde::{Deserialize, Serialize};

use crate::errors::{LoanError, Result};
use crate::state::Loan;
use crate::types::{Actor, BranchId, Role, UserId};

/// the slice of the loan book an actor can see: everything for ADMIN, one
/// branch for a BRANCH_MANAGER that has one, assigned loans for a CREDIT_OFFICER
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    All,
    Branch(BranchId),
    Officer(UserId),
}

impl Scope {
    pub fn for_actor(actor: &Actor) -> Self {
        match (actor.role, actor.branch_id) {
            (Role::Admin, _) => Scope::All,
            (Role::BranchManager, Some(branch_id)) => Scope::Branch(branch_id),
            // a manager without a branch is not restricted
            (Role::BranchManager, None) => Scope::All,
            (Role::CreditOfficer, _) => Scope::Officer(actor.user_id),
        }
    }

    pub fn admits(&self, loan: &Loan) -> bool {
        match self {
            Scope::All => true,
            Scope::Branch(branch_id) => loan.branch_id == *branch_id,
            Scope::Officer(user_id) => loan.assigned_officer_id == *user_id,
        }
    }
}

/// read or edit access to one loan; `action` completes "do not have permission to ..."
pub fn ensure_in_scope(actor: &Actor, loan: &Loan, action: &str) -> Result<()> {
    if Scope::for_actor(actor).admits(loan) {
        Ok(())
    } else {
        Err(LoanError::denied(format!(
            "You do not have permission to {}",
            action
        )))
    }
}

/// staff outside ADMIN may only work inside their own branch
pub fn ensure_branch(actor: &Actor, branch_id: BranchId, action: &str) -> Result<()> {
    match actor.branch_id {
        Some(own) if !actor.is_admin() && own != branch_id => Err(LoanError::denied(format!(
            "You do not have permission to {}",
            action
        ))),
        _ => Ok(()),
    }
}

/// management operations: credit officers are refused with `officer_message`,
/// managers are held to their branch
pub fn ensure_can_manage(
    actor: &Actor,
    loan: &Loan,
    officer_message: &str,
    action: &str,
) -> Result<()> {
    if actor.role == Role::CreditOfficer {
        return Err(LoanError::denied(officer_message));
    }
    ensure_in_scope(actor, loan, action)
}

/// loan product administration
pub fn ensure_admin(actor: &Actor, action: &str) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(LoanError::denied(format!(
            "Only admins can {}",
            action
        )))
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type LoanId = Uuid;
pub type LoanTypeId = Uuid;
pub type ScheduleItemId = Uuid;
pub type RepaymentId = Uuid;
pub type AllocationId = Uuid;
pub type CustomerId = Uuid;
pub type BranchId = Uuid;
pub type UserId = Uuid;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    /// captured, still editable
    Draft,
    /// submitted for approval
    PendingApproval,
    /// approved, waiting for disbursement
    Approved,
    /// funds released, repayments accepted
    Active,
    /// every installment paid
    Completed,
    /// borrower stopped paying
    Defaulted,
    /// written off as loss
    WrittenOff,
    /// abandoned before disbursement
    Canceled,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 8] = [
        LoanStatus::Draft,
        LoanStatus::PendingApproval,
        LoanStatus::Approved,
        LoanStatus::Active,
        LoanStatus::Completed,
        LoanStatus::Defaulted,
        LoanStatus::WrittenOff,
        LoanStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Draft => "DRAFT",
            LoanStatus::PendingApproval => "PENDING_APPROVAL",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Completed => "COMPLETED",
            LoanStatus::Defaulted => "DEFAULTED",
            LoanStatus::WrittenOff => "WRITTEN_OFF",
            LoanStatus::Canceled => "CANCELED",
        }
    }

    /// statuses that count against the one-open-loan-per-customer rule
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            LoanStatus::Active | LoanStatus::PendingApproval | LoanStatus::Approved
        )
    }

    /// reaching one of these stamps `closed_at`
    pub fn closes_loan(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::WrittenOff | LoanStatus::Canceled
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// calendar granularity of the repayment cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TermUnit {
    Day,
    Week,
    Month,
}

/// schedule item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,
    Partial,
    Overdue,
    Paid,
}

impl ScheduleStatus {
    /// items that can still receive money
    pub fn accepts_payment(&self) -> bool {
        !matches!(self, ScheduleStatus::Paid)
    }
}

/// how a repayment was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Cheque,
}

/// staff role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    BranchManager,
    CreditOfficer,
}

/// the authenticated staff member on whose behalf an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub branch_id: Option<BranchId>,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role, branch_id: Option<BranchId>) -> Self {
        Self {
            user_id,
            role,
            branch_id,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin, None)
    }

    pub fn branch_manager(user_id: UserId, branch_id: BranchId) -> Self {
        Self::new(user_id, Role::BranchManager, Some(branch_id))
    }

    pub fn credit_officer(user_id: UserId, branch_id: BranchId) -> Self {
        Self::new(user_id, Role::CreditOfficer, Some(branch_id))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

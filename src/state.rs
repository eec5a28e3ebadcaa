use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{
    AllocationId, BranchId, CustomerId, LoanId, LoanStatus, LoanTypeId, RepaymentId,
    RepaymentMethod, Role, ScheduleItemId, ScheduleStatus, TermUnit, UserId,
};

/// a loan as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub loan_number: String,
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    pub loan_type_id: Option<LoanTypeId>,

    // terms
    pub principal_amount: Money,
    pub term_count: u32,
    pub term_unit: TermUnit,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub processing_fee_amount: Money,
    pub penalty_fee_per_day_amount: Money,

    // servicing
    pub status: LoanStatus,
    pub created_by_user_id: UserId,
    pub assigned_officer_id: UserId,
    pub notes: Option<String>,

    // dates
    pub disbursed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// append a note block, separated from earlier notes by a blank line
    pub fn append_notes(&mut self, notes: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{}\n\n{}", existing, notes),
            None => notes.to_string(),
        });
    }
}

/// loan product with principal bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanType {
    pub id: LoanTypeId,
    pub name: String,
    pub description: Option<String>,
    pub min_amount: Money,
    pub max_amount: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LoanType {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// usable for new or edited loans
    pub fn is_available(&self) -> bool {
        self.is_active && !self.is_deleted()
    }

    /// inclusive bounds check
    pub fn accepts(&self, amount: Money) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

/// one installment due on a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentScheduleItem {
    pub id: ScheduleItemId,
    pub loan_id: LoanId,
    pub sequence: u32,
    pub due_date: DateTime<Utc>,
    pub principal_due: Money,
    pub interest_due: Money,
    pub fee_due: Money,
    pub total_due: Money,
    pub paid_amount: Money,
    pub status: ScheduleStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RepaymentScheduleItem {
    pub fn outstanding(&self) -> Money {
        self.total_due - self.paid_amount
    }

    pub fn is_paid(&self) -> bool {
        self.status == ScheduleStatus::Paid
    }

    /// apply money received; returns true when this call settled the item
    pub fn apply_payment(&mut self, amount: Money, now: DateTime<Utc>) -> bool {
        self.paid_amount += amount;

        if self.paid_amount >= self.total_due {
            let newly_paid = self.status != ScheduleStatus::Paid;
            self.status = ScheduleStatus::Paid;
            self.closed_at = Some(now);
            newly_paid
        } else {
            self.status = ScheduleStatus::Partial;
            self.closed_at = None;
            false
        }
    }

    /// take back money previously applied
    pub fn reverse_payment(&mut self, amount: Money) {
        self.paid_amount -= amount;

        self.status = if !self.paid_amount.is_positive() {
            ScheduleStatus::Pending
        } else if self.paid_amount < self.total_due {
            ScheduleStatus::Partial
        } else {
            ScheduleStatus::Paid
        };
        self.closed_at = None;
    }
}

/// money received against a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: RepaymentId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub method: RepaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub received_by_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Repayment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// still inside the correction window at `now`
    pub fn within_window(&self, now: DateTime<Utc>, window_hours: i64) -> bool {
        now - self.created_at <= Duration::hours(window_hours)
    }
}

/// portion of one repayment applied to one schedule item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentAllocation {
    pub id: AllocationId,
    pub repayment_id: RepaymentId,
    pub schedule_item_id: ScheduleItemId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl RepaymentAllocation {
    pub fn new(
        repayment_id: RepaymentId,
        schedule_item_id: ScheduleItemId,
        amount: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            repayment_id,
            schedule_item_id,
            amount,
            created_at,
        }
    }
}

/// officer reassignment history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanAssignment {
    pub id: Uuid,
    pub loan_id: LoanId,
    pub old_officer_id: UserId,
    pub new_officer_id: UserId,
    pub old_branch_id: BranchId,
    pub new_branch_id: BranchId,
    pub changed_by_user_id: UserId,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

// records owned by the surrounding back office; the loan book only reads them

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub code: String,
    pub name: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub branch_id: BranchId,
    pub current_officer_id: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub branch_id: Option<BranchId>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StaffUser {
    pub fn is_available(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

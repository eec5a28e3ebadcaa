pub mod memory;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::state::{
    Branch, Customer, Loan, LoanAssignment, LoanType, Repayment, RepaymentAllocation,
    RepaymentScheduleItem, StaffUser,
};
use crate::types::{
    BranchId, CustomerId, LoanId, LoanStatus, LoanTypeId, RepaymentId, RepaymentMethod,
    ScheduleItemId, UserId,
};

pub use memory::MemoryStore;

/// loan list filter; every set field must match
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub status: Option<LoanStatus>,
    pub branch_id: Option<BranchId>,
    pub assigned_officer_id: Option<UserId>,
    pub customer_id: Option<CustomerId>,
    /// case-insensitive match on loan number, customer first/last name or code
    pub search: Option<String>,
}

/// repayment list filter
#[derive(Debug, Clone, Default)]
pub struct RepaymentFilter {
    pub loan_id: Option<LoanId>,
    pub received_by_user_id: Option<UserId>,
    pub method: Option<RepaymentMethod>,
    pub paid_from: Option<DateTime<Utc>>,
    pub paid_to: Option<DateTime<Utc>>,
}

/// loan type list filter
#[derive(Debug, Clone, Default)]
pub struct LoanTypeFilter {
    pub is_active: Option<bool>,
    /// case-insensitive match on name or description
    pub search: Option<String>,
}

/// storage backend
pub trait Store: Send + Sync {
    /// open a serializable transaction; it holds the store until committed or dropped
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>>;
}

/// one unit of work against the store.
///
/// Reads skip soft-deleted rows unless stated otherwise. Lists come back
/// newest first unless stated otherwise.
pub trait StoreTx {
    // ── back office records ──

    fn branch(&self, id: BranchId) -> Result<Option<Branch>>;
    fn customer(&self, id: CustomerId) -> Result<Option<Customer>>;
    fn staff_user(&self, id: UserId) -> Result<Option<StaffUser>>;

    // ── loan types ──

    fn loan_type(&self, id: LoanTypeId) -> Result<Option<LoanType>>;
    fn loan_type_by_name(&self, name: &str) -> Result<Option<LoanType>>;
    fn insert_loan_type(&mut self, loan_type: LoanType) -> Result<()>;
    /// also used for soft delete
    fn update_loan_type(&mut self, loan_type: &LoanType) -> Result<()>;
    /// ordered by name
    fn list_loan_types(&self, filter: &LoanTypeFilter) -> Result<Vec<LoanType>>;

    // ── loans ──

    fn loan(&self, id: LoanId) -> Result<Option<Loan>>;
    fn insert_loan(&mut self, loan: Loan) -> Result<()>;
    /// also used for soft delete
    fn update_loan(&mut self, loan: &Loan) -> Result<()>;
    fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>>;
    /// a live loan of the customer in an open status
    fn open_loan_for_customer(&self, customer_id: CustomerId) -> Result<Option<Loan>>;
    /// most recently created loan, deleted ones included
    fn latest_loan(&self) -> Result<Option<Loan>>;
    fn count_open_loans_for_type(&self, loan_type_id: LoanTypeId) -> Result<usize>;

    // ── schedule ──

    /// ordered by sequence
    fn schedule_items(&self, loan_id: LoanId) -> Result<Vec<RepaymentScheduleItem>>;
    fn insert_schedule_items(&mut self, items: Vec<RepaymentScheduleItem>) -> Result<()>;
    fn update_schedule_item(&mut self, item: &RepaymentScheduleItem) -> Result<()>;
    /// physically remove a loan's schedule ahead of regeneration; returns the count removed
    fn delete_schedule_items(&mut self, loan_id: LoanId) -> Result<usize>;

    // ── repayments ──

    fn repayment(&self, id: RepaymentId) -> Result<Option<Repayment>>;
    fn insert_repayment(&mut self, repayment: Repayment) -> Result<()>;
    /// also used for soft delete
    fn update_repayment(&mut self, repayment: &Repayment) -> Result<()>;
    /// newest paid first
    fn list_repayments(&self, filter: &RepaymentFilter) -> Result<Vec<Repayment>>;

    // ── allocations ──

    fn insert_allocations(&mut self, allocations: Vec<RepaymentAllocation>) -> Result<()>;
    /// in insertion order
    fn allocations_for_repayment(&self, repayment_id: RepaymentId)
        -> Result<Vec<RepaymentAllocation>>;
    /// in insertion order
    fn allocations_for_item(&self, item_id: ScheduleItemId) -> Result<Vec<RepaymentAllocation>>;
    fn delete_allocations_for_repayment(&mut self, repayment_id: RepaymentId) -> Result<usize>;

    // ── assignment history ──

    fn insert_assignment(&mut self, assignment: LoanAssignment) -> Result<()>;
    fn assignments_for_loan(&self, loan_id: LoanId) -> Result<Vec<LoanAssignment>>;

    /// publish every write made through this transaction
    fn commit(self: Box<Self>) -> Result<()>;
}

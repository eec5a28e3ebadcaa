use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use super::{LoanFilter, LoanTypeFilter, RepaymentFilter, Store, StoreTx};
use crate::errors::{LoanError, Result};
use crate::state::{
    Branch, Customer, Loan, LoanAssignment, LoanType, Repayment, RepaymentAllocation,
    RepaymentScheduleItem, StaffUser,
};
use crate::types::{
    BranchId, CustomerId, LoanId, LoanTypeId, RepaymentId, ScheduleItemId, UserId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    branches: Vec<Branch>,
    customers: Vec<Customer>,
    staff_users: Vec<StaffUser>,
    loan_types: Vec<LoanType>,
    loans: Vec<Loan>,
    schedule_items: Vec<RepaymentScheduleItem>,
    repayments: Vec<Repayment>,
    allocations: Vec<RepaymentAllocation>,
    assignments: Vec<LoanAssignment>,
}

/// in-process store.
///
/// A transaction takes the lock for its whole life and works on a copy of
/// the tables, so transactions are serial and a dropped one leaves nothing
/// behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_branch(&self, branch: Branch) {
        self.tables.lock().branches.push(branch);
    }

    pub fn seed_customer(&self, customer: Customer) {
        self.tables.lock().customers.push(customer);
    }

    pub fn seed_staff_user(&self, user: StaffUser) {
        self.tables.lock().staff_users.push(user);
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let guard = self.tables.lock();
        let working = guard.clone();
        trace!("memory transaction opened");
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
}

fn missing(entity: &str, id: impl std::fmt::Display) -> LoanError {
    LoanError::Storage {
        message: format!("{} {} does not exist", entity, id),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

impl<'a> StoreTx for MemoryTx<'a> {
    fn branch(&self, id: BranchId) -> Result<Option<Branch>> {
        Ok(self
            .working
            .branches
            .iter()
            .find(|b| b.id == id && b.deleted_at.is_none())
            .cloned())
    }

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self
            .working
            .customers
            .iter()
            .find(|c| c.id == id && c.deleted_at.is_none())
            .cloned())
    }

    fn staff_user(&self, id: UserId) -> Result<Option<StaffUser>> {
        Ok(self
            .working
            .staff_users
            .iter()
            .find(|u| u.id == id && u.deleted_at.is_none())
            .cloned())
    }

    fn loan_type(&self, id: LoanTypeId) -> Result<Option<LoanType>> {
        Ok(self
            .working
            .loan_types
            .iter()
            .find(|t| t.id == id && !t.is_deleted())
            .cloned())
    }

    fn loan_type_by_name(&self, name: &str) -> Result<Option<LoanType>> {
        Ok(self
            .working
            .loan_types
            .iter()
            .find(|t| t.name == name && !t.is_deleted())
            .cloned())
    }

    fn insert_loan_type(&mut self, loan_type: LoanType) -> Result<()> {
        self.working.loan_types.push(loan_type);
        Ok(())
    }

    fn update_loan_type(&mut self, loan_type: &LoanType) -> Result<()> {
        let row = self
            .working
            .loan_types
            .iter_mut()
            .find(|t| t.id == loan_type.id)
            .ok_or_else(|| missing("loan type", loan_type.id))?;
        *row = loan_type.clone();
        Ok(())
    }

    fn list_loan_types(&self, filter: &LoanTypeFilter) -> Result<Vec<LoanType>> {
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut types: Vec<LoanType> = self
            .working
            .loan_types
            .iter()
            .filter(|t| !t.is_deleted())
            .filter(|t| filter.is_active.map_or(true, |active| t.is_active == active))
            .filter(|t| match &search {
                Some(needle) => {
                    contains_ci(&t.name, needle)
                        || t.description.as_deref().map_or(false, |d| contains_ci(d, needle))
                }
                None => true,
            })
            .cloned()
            .collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self
            .working
            .loans
            .iter()
            .find(|l| l.id == id && !l.is_deleted())
            .cloned())
    }

    fn insert_loan(&mut self, loan: Loan) -> Result<()> {
        self.working.loans.push(loan);
        Ok(())
    }

    fn update_loan(&mut self, loan: &Loan) -> Result<()> {
        let row = self
            .working
            .loans
            .iter_mut()
            .find(|l| l.id == loan.id)
            .ok_or_else(|| missing("loan", loan.id))?;
        *row = loan.clone();
        Ok(())
    }

    fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>> {
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let customers = &self.working.customers;

        Ok(self
            .working
            .loans
            .iter()
            .rev()
            .filter(|l| !l.is_deleted())
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .filter(|l| filter.branch_id.map_or(true, |b| l.branch_id == b))
            .filter(|l| {
                filter
                    .assigned_officer_id
                    .map_or(true, |o| l.assigned_officer_id == o)
            })
            .filter(|l| filter.customer_id.map_or(true, |c| l.customer_id == c))
            .filter(|l| match &search {
                Some(needle) => {
                    contains_ci(&l.loan_number, needle)
                        || customers.iter().any(|c| {
                            c.id == l.customer_id
                                && (contains_ci(&c.first_name, needle)
                                    || contains_ci(&c.last_name, needle)
                                    || contains_ci(&c.code, needle))
                        })
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    fn open_loan_for_customer(&self, customer_id: CustomerId) -> Result<Option<Loan>> {
        Ok(self
            .working
            .loans
            .iter()
            .find(|l| l.customer_id == customer_id && !l.is_deleted() && l.status.is_open())
            .cloned())
    }

    fn latest_loan(&self) -> Result<Option<Loan>> {
        // insertion order breaks created_at ties
        Ok(self
            .working
            .loans
            .iter()
            .enumerate()
            .max_by_key(|(idx, l)| (l.created_at, *idx))
            .map(|(_, l)| l.clone()))
    }

    fn count_open_loans_for_type(&self, loan_type_id: LoanTypeId) -> Result<usize> {
        Ok(self
            .working
            .loans
            .iter()
            .filter(|l| {
                l.loan_type_id == Some(loan_type_id) && !l.is_deleted() && l.status.is_open()
            })
            .count())
    }

    fn schedule_items(&self, loan_id: LoanId) -> Result<Vec<RepaymentScheduleItem>> {
        let mut items: Vec<RepaymentScheduleItem> = self
            .working
            .schedule_items
            .iter()
            .filter(|i| i.loan_id == loan_id && i.deleted_at.is_none())
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sequence);
        Ok(items)
    }

    fn insert_schedule_items(&mut self, items: Vec<RepaymentScheduleItem>) -> Result<()> {
        self.working.schedule_items.extend(items);
        Ok(())
    }

    fn update_schedule_item(&mut self, item: &RepaymentScheduleItem) -> Result<()> {
        let row = self
            .working
            .schedule_items
            .iter_mut()
            .find(|i| i.id == item.id)
            .ok_or_else(|| missing("schedule item", item.id))?;
        *row = item.clone();
        Ok(())
    }

    fn delete_schedule_items(&mut self, loan_id: LoanId) -> Result<usize> {
        let before = self.working.schedule_items.len();
        self.working.schedule_items.retain(|i| i.loan_id != loan_id);
        Ok(before - self.working.schedule_items.len())
    }

    fn repayment(&self, id: RepaymentId) -> Result<Option<Repayment>> {
        Ok(self
            .working
            .repayments
            .iter()
            .find(|r| r.id == id && !r.is_deleted())
            .cloned())
    }

    fn insert_repayment(&mut self, repayment: Repayment) -> Result<()> {
        self.working.repayments.push(repayment);
        Ok(())
    }

    fn update_repayment(&mut self, repayment: &Repayment) -> Result<()> {
        let row = self
            .working
            .repayments
            .iter_mut()
            .find(|r| r.id == repayment.id)
            .ok_or_else(|| missing("repayment", repayment.id))?;
        *row = repayment.clone();
        Ok(())
    }

    fn list_repayments(&self, filter: &RepaymentFilter) -> Result<Vec<Repayment>> {
        let mut repayments: Vec<Repayment> = self
            .working
            .repayments
            .iter()
            .rev()
            .filter(|r| !r.is_deleted())
            .filter(|r| filter.loan_id.map_or(true, |id| r.loan_id == id))
            .filter(|r| {
                filter
                    .received_by_user_id
                    .map_or(true, |id| r.received_by_user_id == id)
            })
            .filter(|r| filter.method.map_or(true, |m| r.method == m))
            .filter(|r| filter.paid_from.map_or(true, |from| r.paid_at >= from))
            .filter(|r| filter.paid_to.map_or(true, |to| r.paid_at <= to))
            .cloned()
            .collect();
        // stable, so equal paid_at keeps newest inserted first
        repayments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        Ok(repayments)
    }

    fn insert_allocations(&mut self, allocations: Vec<RepaymentAllocation>) -> Result<()> {
        self.working.allocations.extend(allocations);
        Ok(())
    }

    fn allocations_for_repayment(
        &self,
        repayment_id: RepaymentId,
    ) -> Result<Vec<RepaymentAllocation>> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|a| a.repayment_id == repayment_id)
            .cloned()
            .collect())
    }

    fn allocations_for_item(&self, item_id: ScheduleItemId) -> Result<Vec<RepaymentAllocation>> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|a| a.schedule_item_id == item_id)
            .cloned()
            .collect())
    }

    fn delete_allocations_for_repayment(&mut self, repayment_id: RepaymentId) -> Result<usize> {
        let before = self.working.allocations.len();
        self.working
            .allocations
            .retain(|a| a.repayment_id != repayment_id);
        Ok(before - self.working.allocations.len())
    }

    fn insert_assignment(&mut self, assignment: LoanAssignment) -> Result<()> {
        self.working.assignments.push(assignment);
        Ok(())
    }

    fn assignments_for_loan(&self, loan_id: LoanId) -> Result<Vec<LoanAssignment>> {
        Ok(self
            .working
            .assignments
            .iter()
            .rev()
            .filter(|a| a.loan_id == loan_id)
            .cloned()
            .collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        trace!("memory transaction committed");
        Ok(())
    }
}

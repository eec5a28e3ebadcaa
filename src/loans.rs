use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::access::{ensure_branch, ensure_can_manage, ensure_in_scope, Scope};
use crate::book::LoanBook;
use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::events::AuditAction;
use crate::lifecycle;
use crate::payments::{RepaymentSchedule, ScheduleTerms};
use crate::state::{Loan, LoanAssignment, LoanType};
use crate::store::{LoanFilter, RepaymentFilter, StoreTx};
use crate::types::{
    Actor, CustomerId, LoanId, LoanStatus, LoanTypeId, Role, ScheduleStatus, TermUnit, UserId,
};
use crate::views::{
    AllocationView, LoanDetail, LoanSummary, LoanView, Page, PageRequest, ScheduleItemView,
};

/// input for a new loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    pub customer_id: CustomerId,
    pub loan_type_id: Option<LoanTypeId>,
    pub principal_amount: Money,
    pub term_count: u32,
    pub term_unit: TermUnit,
    pub start_date: DateTime<Utc>,
    pub processing_fee_amount: Money,
    pub penalty_fee_per_day_amount: Money,
    /// annual flat rate used for the initial schedule only
    pub interest_rate: Rate,
    pub notes: Option<String>,
}

impl NewLoan {
    /// fee-free, interest-free loan without a product
    pub fn new(
        customer_id: CustomerId,
        principal_amount: Money,
        term_count: u32,
        term_unit: TermUnit,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id,
            loan_type_id: None,
            principal_amount,
            term_count,
            term_unit,
            start_date,
            processing_fee_amount: Money::ZERO,
            penalty_fee_per_day_amount: Money::ZERO,
            interest_rate: Rate::ZERO,
            notes: None,
        }
    }

    pub fn loan_type(mut self, loan_type_id: LoanTypeId) -> Self {
        self.loan_type_id = Some(loan_type_id);
        self
    }

    pub fn interest_rate(mut self, rate: Rate) -> Self {
        self.interest_rate = rate;
        self
    }

    pub fn fees(mut self, processing_fee: Money, penalty_fee_per_day: Money) -> Self {
        self.processing_fee_amount = processing_fee;
        self.penalty_fee_per_day_amount = penalty_fee_per_day;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// edits to a DRAFT loan; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanChanges {
    pub loan_type_id: Option<LoanTypeId>,
    pub principal_amount: Option<Money>,
    pub term_count: Option<u32>,
    pub term_unit: Option<TermUnit>,
    pub start_date: Option<DateTime<Utc>>,
    pub processing_fee_amount: Option<Money>,
    pub penalty_fee_per_day_amount: Option<Money>,
    pub notes: Option<String>,
}

impl LoanChanges {
    fn touches_schedule(&self) -> bool {
        self.principal_amount.is_some()
            || self.term_count.is_some()
            || self.term_unit.is_some()
            || self.start_date.is_some()
    }
}

fn ensure_fees(processing: Money, penalty: Money) -> Result<()> {
    if processing.is_negative() || penalty.is_negative() {
        return Err(LoanError::validation("fee amounts cannot be negative"));
    }
    Ok(())
}

/// usable loan type that admits `principal`
fn checked_loan_type(
    tx: &dyn StoreTx,
    loan_type_id: LoanTypeId,
    principal: Money,
) -> Result<LoanType> {
    let loan_type = tx
        .loan_type(loan_type_id)?
        .filter(LoanType::is_available)
        .ok_or(LoanError::NotFound {
            entity: "loan type",
        })?;

    if !loan_type.accepts(principal) {
        return Err(LoanError::validation(format!(
            "principal amount must be between {} and {}",
            loan_type.min_amount, loan_type.max_amount
        )));
    }
    Ok(loan_type)
}

/// one open loan per customer; `except` is the loan being moved into an open status
fn ensure_no_open_loan(
    tx: &dyn StoreTx,
    customer_id: CustomerId,
    except: Option<LoanId>,
) -> Result<()> {
    match tx.open_loan_for_customer(customer_id)? {
        Some(open) if Some(open.id) != except => {
            Err(LoanError::conflict("customer already has an active loan"))
        }
        _ => Ok(()),
    }
}

fn find_loan(tx: &dyn StoreTx, id: LoanId) -> Result<Loan> {
    tx.loan(id)?.ok_or(LoanError::NotFound { entity: "loan" })
}

fn loan_view(tx: &dyn StoreTx, loan: Loan) -> Result<LoanView> {
    let customer = tx.customer(loan.customer_id)?;
    let loan_type = match loan.loan_type_id {
        Some(id) => tx.loan_type(id)?,
        None => None,
    };
    Ok(LoanView::new(loan, customer.as_ref(), loan_type.as_ref()))
}

/// loan orchestrator
pub struct LoanService<'a> {
    book: &'a LoanBook,
}

impl<'a> LoanService<'a> {
    pub(crate) fn new(book: &'a LoanBook) -> Self {
        Self { book }
    }

    /// create a DRAFT loan with its repayment schedule
    pub fn create_loan(&self, actor: &Actor, input: NewLoan) -> Result<LoanView> {
        let config = self.book.config();
        let terms = ScheduleTerms {
            principal: input.principal_amount,
            term_count: input.term_count,
            term_unit: input.term_unit,
            start_date: input.start_date,
            interest_rate: input.interest_rate,
        };
        terms.validate()?;
        ensure_fees(input.processing_fee_amount, input.penalty_fee_per_day_amount)?;

        let mut tx = self.book.store().begin()?;

        let customer = tx
            .customer(input.customer_id)?
            .ok_or(LoanError::NotFound { entity: "customer" })?;
        tx.branch(customer.branch_id)?
            .ok_or(LoanError::NotFound { entity: "branch" })?;
        ensure_branch(actor, customer.branch_id, "create loans for this customer")?;

        if let Some(loan_type_id) = input.loan_type_id {
            checked_loan_type(tx.as_ref(), loan_type_id, input.principal_amount)?;
        }

        ensure_no_open_loan(tx.as_ref(), customer.id, None)?;

        // the customer's officer, unless they have left or been deactivated
        let assigned_officer_id = match customer.current_officer_id {
            Some(officer_id) => match tx.staff_user(officer_id)? {
                Some(officer) if officer.is_available() => officer.id,
                _ => {
                    debug!(
                        customer_id = %customer.id,
                        %officer_id,
                        "customer officer unavailable, assigning creator"
                    );
                    actor.user_id
                }
            },
            None => actor.user_id,
        };

        // derived from the last issued number, not an atomic sequence
        let next_number = tx
            .latest_loan()?
            .and_then(|last| config.parse_loan_number(&last.loan_number))
            .map_or(1, |n| n + 1);

        let schedule = RepaymentSchedule::generate(terms, config.currency_scale)?;
        let now = self.book.now();

        let loan = Loan {
            id: Uuid::new_v4(),
            loan_number: config.loan_number(next_number),
            customer_id: customer.id,
            branch_id: customer.branch_id,
            loan_type_id: input.loan_type_id,
            principal_amount: input.principal_amount,
            term_count: input.term_count,
            term_unit: input.term_unit,
            start_date: input.start_date,
            end_date: schedule.end_date,
            processing_fee_amount: input.processing_fee_amount,
            penalty_fee_per_day_amount: input.penalty_fee_per_day_amount,
            status: LoanStatus::Draft,
            created_by_user_id: actor.user_id,
            assigned_officer_id,
            notes: input.notes,
            disbursed_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        tx.insert_loan(loan.clone())?;
        tx.insert_schedule_items(schedule.to_items(loan.id))?;
        let view = loan_view(tx.as_ref(), loan)?;
        tx.commit()?;

        info!(
            loan_id = %view.loan.id,
            loan_number = %view.loan.loan_number,
            principal = %view.loan.principal_amount,
            installments = schedule.installments.len(),
            actor = %actor.user_id,
            "loan created"
        );
        self.book.audit::<(), _>(
            AuditAction::LoanCreated,
            view.loan.id,
            actor,
            None,
            Some(&view.loan),
        );

        Ok(view)
    }

    /// loans visible to `actor`, newest first.
    ///
    /// Explicit filters narrow the actor's scope, they never widen it.
    pub fn list_loans(
        &self,
        actor: &Actor,
        filter: &LoanFilter,
        page: PageRequest,
    ) -> Result<Page<LoanView>> {
        let tx = self.book.store().begin()?;
        let scope = Scope::for_actor(actor);

        let visible: Vec<Loan> = tx
            .list_loans(filter)?
            .into_iter()
            .filter(|loan| scope.admits(loan))
            .collect();

        let page = Page::paginate(visible, page, self.book.config());
        let items = page
            .items
            .iter()
            .cloned()
            .map(|loan| loan_view(tx.as_ref(), loan))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
        })
    }

    /// one loan with schedule, repayments and assignment history
    pub fn get_loan(&self, actor: &Actor, id: LoanId) -> Result<LoanDetail> {
        let tx = self.book.store().begin()?;
        let loan = find_loan(tx.as_ref(), id)?;
        ensure_in_scope(actor, &loan, "view this loan")?;

        let schedule_items = tx.schedule_items(id)?;
        let repayments = tx.list_repayments(&RepaymentFilter {
            loan_id: Some(id),
            ..RepaymentFilter::default()
        })?;
        let assignments = tx.assignments_for_loan(id)?;

        Ok(LoanDetail {
            view: loan_view(tx.as_ref(), loan)?,
            schedule_items,
            repayments,
            assignments,
        })
    }

    /// edit a DRAFT loan; any change to the schedule terms regenerates the schedule
    pub fn update_loan(&self, actor: &Actor, id: LoanId, changes: LoanChanges) -> Result<LoanView> {
        let config = self.book.config();
        let mut tx = self.book.store().begin()?;

        let mut loan = find_loan(tx.as_ref(), id)?;
        if loan.status != LoanStatus::Draft {
            return Err(LoanError::invalid_state(
                loan.status,
                "only draft loans can be updated",
            ));
        }
        ensure_in_scope(actor, &loan, "update this loan")?;

        let principal = changes.principal_amount.unwrap_or(loan.principal_amount);
        if let Some(loan_type_id) = changes.loan_type_id {
            checked_loan_type(tx.as_ref(), loan_type_id, principal)?;
        } else if let (Some(_), Some(loan_type_id)) = (changes.principal_amount, loan.loan_type_id) {
            if let Some(current) = tx.loan_type(loan_type_id)? {
                if !current.accepts(principal) {
                    return Err(LoanError::validation(format!(
                        "principal amount must be between {} and {}",
                        current.min_amount, current.max_amount
                    )));
                }
            }
        }

        ensure_fees(
            changes.processing_fee_amount.unwrap_or(loan.processing_fee_amount),
            changes
                .penalty_fee_per_day_amount
                .unwrap_or(loan.penalty_fee_per_day_amount),
        )?;

        let before = loan.clone();
        let regenerate = changes.touches_schedule();

        if let Some(loan_type_id) = changes.loan_type_id {
            loan.loan_type_id = Some(loan_type_id);
        }
        loan.principal_amount = principal;
        loan.term_count = changes.term_count.unwrap_or(loan.term_count);
        loan.term_unit = changes.term_unit.unwrap_or(loan.term_unit);
        loan.start_date = changes.start_date.unwrap_or(loan.start_date);
        if let Some(fee) = changes.processing_fee_amount {
            loan.processing_fee_amount = fee;
        }
        if let Some(fee) = changes.penalty_fee_per_day_amount {
            loan.penalty_fee_per_day_amount = fee;
        }
        if let Some(notes) = changes.notes {
            loan.notes = Some(notes);
        }

        if regenerate {
            // the rate is not stored on the loan, so the new schedule is interest free
            let terms = ScheduleTerms {
                principal: loan.principal_amount,
                term_count: loan.term_count,
                term_unit: loan.term_unit,
                start_date: loan.start_date,
                interest_rate: Rate::ZERO,
            };
            let schedule = RepaymentSchedule::generate(terms, config.currency_scale)?;
            loan.end_date = schedule.end_date;

            let removed = tx.delete_schedule_items(loan.id)?;
            tx.insert_schedule_items(schedule.to_items(loan.id))?;
            debug!(loan_id = %loan.id, removed, added = schedule.installments.len(), "schedule regenerated");
        }

        loan.updated_at = self.book.now();
        tx.update_loan(&loan)?;
        let view = loan_view(tx.as_ref(), loan)?;
        tx.commit()?;

        info!(loan_id = %id, regenerated = regenerate, actor = %actor.user_id, "loan updated");
        self.book.audit(AuditAction::LoanUpdated, id, actor, Some(&before), Some(&view.loan));

        Ok(view)
    }

    /// manual status change along the lifecycle table; `notes` are appended
    pub fn update_status(
        &self,
        actor: &Actor,
        id: LoanId,
        status: LoanStatus,
        notes: Option<&str>,
    ) -> Result<LoanView> {
        let mut tx = self.book.store().begin()?;

        let mut loan = find_loan(tx.as_ref(), id)?;
        ensure_can_manage(
            actor,
            &loan,
            "Credit officers cannot change loan status",
            "update this loan",
        )?;

        let before = loan.clone();
        let change = lifecycle::transition(&mut loan, status, self.book.now())?;
        if change.to.is_open() && !change.from.is_open() {
            ensure_no_open_loan(tx.as_ref(), loan.customer_id, Some(loan.id))?;
        }
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            loan.append_notes(notes);
        }

        tx.update_loan(&loan)?;
        let view = loan_view(tx.as_ref(), loan)?;
        tx.commit()?;

        info!(loan_id = %id, from = %change.from, to = %change.to, actor = %actor.user_id, "loan status updated");
        self.book.audit(
            AuditAction::LoanStatusUpdated,
            id,
            actor,
            Some(&before),
            Some(&view.loan),
        );

        Ok(view)
    }

    /// release funds: APPROVED -> ACTIVE, stamping `disbursed_at` (now when not given)
    pub fn disburse(
        &self,
        actor: &Actor,
        id: LoanId,
        disbursed_at: Option<DateTime<Utc>>,
    ) -> Result<LoanView> {
        let mut tx = self.book.store().begin()?;

        let mut loan = find_loan(tx.as_ref(), id)?;
        let before = loan.clone();
        lifecycle::disburse(&mut loan, disbursed_at, self.book.now())?;
        ensure_can_manage(
            actor,
            &before,
            "Only branch managers and admins can disburse loans",
            "disburse this loan",
        )?;

        tx.update_loan(&loan)?;
        let view = loan_view(tx.as_ref(), loan)?;
        tx.commit()?;

        info!(loan_id = %id, actor = %actor.user_id, "loan disbursed");
        self.book.audit(AuditAction::LoanDisbursed, id, actor, Some(&before), Some(&view.loan));

        Ok(view)
    }

    /// hand the loan to another officer of the same branch and record the change
    pub fn assign(
        &self,
        actor: &Actor,
        id: LoanId,
        new_officer_id: UserId,
        reason: Option<String>,
    ) -> Result<LoanView> {
        let mut tx = self.book.store().begin()?;

        let mut loan = find_loan(tx.as_ref(), id)?;
        ensure_can_manage(
            actor,
            &loan,
            "Credit officers cannot reassign loans",
            "reassign this loan",
        )?;

        let officer = tx
            .staff_user(new_officer_id)?
            .filter(|u| u.is_available())
            .ok_or(LoanError::NotFound { entity: "officer" })?;
        if officer.role == Role::Admin {
            return Err(LoanError::validation("cannot assign loan to an admin"));
        }
        if officer.branch_id != Some(loan.branch_id) {
            return Err(LoanError::validation(
                "officer must belong to the same branch as the loan",
            ));
        }

        let before = loan.clone();
        let now = self.book.now();
        loan.assigned_officer_id = officer.id;
        loan.updated_at = now;

        tx.update_loan(&loan)?;
        tx.insert_assignment(LoanAssignment {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            old_officer_id: before.assigned_officer_id,
            new_officer_id: officer.id,
            old_branch_id: before.branch_id,
            new_branch_id: loan.branch_id,
            changed_by_user_id: actor.user_id,
            reason,
            changed_at: now,
        })?;
        let view = loan_view(tx.as_ref(), loan)?;
        tx.commit()?;

        info!(
            loan_id = %id,
            from_officer = %before.assigned_officer_id,
            to_officer = %officer.id,
            actor = %actor.user_id,
            "loan reassigned"
        );
        self.book.audit(AuditAction::LoanAssigned, id, actor, Some(&before), Some(&view.loan));

        Ok(view)
    }

    /// soft delete a DRAFT or PENDING_APPROVAL loan
    pub fn delete_loan(&self, actor: &Actor, id: LoanId) -> Result<()> {
        let mut tx = self.book.store().begin()?;

        let mut loan = find_loan(tx.as_ref(), id)?;
        if !matches!(loan.status, LoanStatus::Draft | LoanStatus::PendingApproval) {
            return Err(LoanError::invalid_state(
                loan.status,
                "only draft or pending approval loans can be deleted",
            ));
        }
        ensure_in_scope(actor, &loan, "delete this loan")?;

        let before = loan.clone();
        let now = self.book.now();
        loan.deleted_at = Some(now);
        loan.updated_at = now;

        tx.update_loan(&loan)?;
        tx.commit()?;

        info!(loan_id = %id, actor = %actor.user_id, "loan deleted");
        self.book.audit::<_, ()>(AuditAction::LoanDeleted, id, actor, Some(&before), None);

        Ok(())
    }

    /// schedule in sequence order with the allocations each item received
    pub fn schedule(&self, actor: &Actor, id: LoanId) -> Result<Vec<ScheduleItemView>> {
        let tx = self.book.store().begin()?;
        let loan = find_loan(tx.as_ref(), id)?;
        ensure_in_scope(actor, &loan, "view this loan")?;

        tx.schedule_items(id)?
            .into_iter()
            .map(|item| {
                let mut allocations = Vec::new();
                for allocation in tx.allocations_for_item(item.id)? {
                    if let Some(repayment) = tx.repayment(allocation.repayment_id)? {
                        allocations.push(AllocationView::new(&allocation, &repayment));
                    }
                }
                Ok(ScheduleItemView {
                    outstanding: item.outstanding(),
                    item,
                    allocations,
                })
            })
            .collect()
    }

    /// expected, paid, outstanding and overdue totals
    pub fn summary(&self, actor: &Actor, id: LoanId) -> Result<LoanSummary> {
        let tx = self.book.store().begin()?;
        let loan = find_loan(tx.as_ref(), id)?;
        ensure_in_scope(actor, &loan, "view this loan")?;

        let items = tx.schedule_items(id)?;
        let repayments = tx.list_repayments(&RepaymentFilter {
            loan_id: Some(id),
            ..RepaymentFilter::default()
        })?;

        Ok(LoanSummary::compute(&loan, &items, &repayments))
    }

    /// flag unpaid installments whose due date has passed; returns how many changed
    pub fn mark_overdue(&self, actor: &Actor, id: LoanId) -> Result<usize> {
        let mut tx = self.book.store().begin()?;
        let loan = find_loan(tx.as_ref(), id)?;
        ensure_in_scope(actor, &loan, "update this loan")?;

        let now = self.book.now();
        let mut flagged = 0;
        for mut item in tx.schedule_items(id)? {
            let unpaid = matches!(item.status, ScheduleStatus::Pending | ScheduleStatus::Partial);
            if unpaid && item.due_date < now {
                item.status = ScheduleStatus::Overdue;
                tx.update_schedule_item(&item)?;
                flagged += 1;
            }
        }
        tx.commit()?;

        if flagged > 0 {
            info!(loan_id = %id, flagged, "installments marked overdue");
        }
        Ok(flagged)
    }

    /// officer reassignments, newest first
    pub fn assignment_history(&self, actor: &Actor, id: LoanId) -> Result<Vec<LoanAssignment>> {
        let tx = self.book.store().begin()?;
        let loan = find_loan(tx.as_ref(), id)?;
        ensure_in_scope(actor, &loan, "view this loan")?;
        tx.assignments_for_loan(id)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{ensure_can_manage, ensure_in_scope, Scope};
use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::events::AuditAction;
use crate::lifecycle;
use crate::payments::{is_fully_paid, PaymentAllocator};
use crate::state::{Loan, Repayment};
use crate::store::{RepaymentFilter, StoreTx};
use crate::types::{Actor, LoanId, LoanStatus, RepaymentId, RepaymentMethod};
use crate::views::{Page, PageRequest, RepaymentReceipt, RepaymentReversal, RepaymentView};

/// input for recording money received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRepayment {
    pub loan_id: LoanId,
    pub amount: Money,
    /// defaults to now
    pub paid_at: Option<DateTime<Utc>>,
    pub method: RepaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl NewRepayment {
    pub fn new(loan_id: LoanId, amount: Money, method: RepaymentMethod) -> Self {
        Self {
            loan_id,
            amount,
            paid_at: None,
            method,
            reference: None,
            notes: None,
        }
    }

    pub fn paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// correctable fields of a repayment; amounts are fixed once allocated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepaymentChanges {
    pub method: Option<RepaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

fn find_repayment(tx: &dyn StoreTx, id: RepaymentId) -> Result<Repayment> {
    tx.repayment(id)?.ok_or(LoanError::NotFound { entity: "repayment" })
}

fn owning_loan(tx: &dyn StoreTx, repayment: &Repayment) -> Result<Loan> {
    tx.loan(repayment.loan_id)?
        .ok_or(LoanError::NotFound { entity: "loan" })
}

fn repayment_view(tx: &dyn StoreTx, repayment: Repayment, loan: &Loan) -> Result<RepaymentView> {
    let allocations = tx.allocations_for_repayment(repayment.id)?;
    Ok(RepaymentView {
        repayment,
        loan_number: loan.loan_number.clone(),
        allocations,
    })
}

/// repayment orchestrator
pub struct RepaymentService<'a> {
    book: &'a LoanBook,
}

impl<'a> RepaymentService<'a> {
    pub(crate) fn new(book: &'a LoanBook) -> Self {
        Self { book }
    }

    fn ensure_window(&self, repayment: &Repayment, action: &'static str) -> Result<()> {
        let window_hours = self.book.config().repayment_edit_window_hours;
        if repayment.within_window(self.book.now(), window_hours) {
            Ok(())
        } else {
            Err(LoanError::TimeWindowExpired {
                action,
                window_hours,
            })
        }
    }

    /// record a repayment on an ACTIVE loan and allocate it oldest installment first.
    ///
    /// The loan completes when every installment ends up paid.
    pub fn create_repayment(&self, actor: &Actor, input: NewRepayment) -> Result<RepaymentReceipt> {
        if !input.amount.is_positive() {
            return Err(LoanError::validation("repayment amount must be positive"));
        }

        let mut tx = self.book.store().begin()?;

        let mut loan = tx
            .loan(input.loan_id)?
            .ok_or(LoanError::NotFound { entity: "loan" })?;
        ensure_in_scope(actor, &loan, "record repayments on this loan")?;
        if loan.status != LoanStatus::Active {
            return Err(LoanError::invalid_state(
                loan.status,
                "can only make payments on active loans",
            ));
        }

        let now = self.book.now();
        let repayment = Repayment {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            amount: input.amount,
            paid_at: input.paid_at.unwrap_or(now),
            method: input.method,
            reference: input.reference,
            notes: input.notes,
            received_by_user_id: actor.user_id,
            created_at: now,
            deleted_at: None,
        };
        tx.insert_repayment(repayment.clone())?;

        let mut items = tx.schedule_items(loan.id)?;
        let outcome = PaymentAllocator::new().allocate(repayment.id, &mut items, repayment.amount, now);
        for item in items.iter().filter(|i| outcome.touched_items.contains(&i.id)) {
            tx.update_schedule_item(item)?;
        }
        tx.insert_allocations(outcome.allocations.clone())?;

        if !items.is_empty() && is_fully_paid(&items) {
            lifecycle::complete(&mut loan, now);
            tx.update_loan(&loan)?;
        }

        let view = repayment_view(tx.as_ref(), repayment, &loan)?;
        tx.commit()?;

        if outcome.unallocated.is_positive() {
            warn!(
                loan_id = %loan.id,
                repayment_id = %view.repayment.id,
                unallocated = %outcome.unallocated,
                "repayment exceeds outstanding balance"
            );
        }
        info!(
            loan_id = %loan.id,
            repayment_id = %view.repayment.id,
            amount = %view.repayment.amount,
            installments = outcome.allocations.len(),
            loan_status = %loan.status,
            actor = %actor.user_id,
            "repayment recorded"
        );
        self.book.audit::<(), _>(
            AuditAction::RepaymentCreated,
            view.repayment.id,
            actor,
            None,
            Some(&view),
        );

        Ok(RepaymentReceipt {
            repayment: view,
            allocated: outcome.allocated,
            unallocated: outcome.unallocated,
            loan_status: loan.status,
        })
    }

    /// repayments visible to `actor`, newest paid first
    pub fn list_repayments(
        &self,
        actor: &Actor,
        filter: &RepaymentFilter,
        page: PageRequest,
    ) -> Result<Page<RepaymentView>> {
        let tx = self.book.store().begin()?;
        let scope = Scope::for_actor(actor);

        let mut visible = Vec::new();
        for repayment in tx.list_repayments(filter)? {
            // repayments of deleted loans drop out with the loan
            if let Some(loan) = tx.loan(repayment.loan_id)? {
                if scope.admits(&loan) {
                    visible.push((repayment, loan));
                }
            }
        }

        let page = Page::paginate(visible, page, self.book.config());
        let items = page
            .items
            .into_iter()
            .map(|(repayment, loan)| repayment_view(tx.as_ref(), repayment, &loan))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
        })
    }

    pub fn get_repayment(&self, actor: &Actor, id: RepaymentId) -> Result<RepaymentView> {
        let tx = self.book.store().begin()?;
        let repayment = find_repayment(tx.as_ref(), id)?;
        let loan = owning_loan(tx.as_ref(), &repayment)?;
        ensure_in_scope(actor, &loan, "view this repayment")?;

        repayment_view(tx.as_ref(), repayment, &loan)
    }

    /// correct method, reference or notes inside the edit window
    pub fn update_repayment(
        &self,
        actor: &Actor,
        id: RepaymentId,
        changes: RepaymentChanges,
    ) -> Result<RepaymentView> {
        let mut tx = self.book.store().begin()?;

        let mut repayment = find_repayment(tx.as_ref(), id)?;
        let loan = owning_loan(tx.as_ref(), &repayment)?;
        ensure_in_scope(actor, &loan, "update this repayment")?;
        self.ensure_window(&repayment, "update")?;

        let before = repayment.clone();
        if let Some(method) = changes.method {
            repayment.method = method;
        }
        if let Some(reference) = changes.reference {
            repayment.reference = Some(reference);
        }
        if let Some(notes) = changes.notes {
            repayment.notes = Some(notes);
        }

        tx.update_repayment(&repayment)?;
        let view = repayment_view(tx.as_ref(), repayment, &loan)?;
        tx.commit()?;

        info!(repayment_id = %id, actor = %actor.user_id, "repayment updated");
        self.book.audit(AuditAction::RepaymentUpdated, id, actor, Some(&before), Some(&view));

        Ok(view)
    }

    /// reverse a repayment inside the edit window.
    ///
    /// Its allocations are taken back out of the schedule and removed, the
    /// repayment is soft deleted, and the loan returns to ACTIVE whenever any
    /// installment is left unpaid.
    pub fn delete_repayment(&self, actor: &Actor, id: RepaymentId) -> Result<RepaymentReversal> {
        let mut tx = self.book.store().begin()?;

        let mut repayment = find_repayment(tx.as_ref(), id)?;
        let mut loan = owning_loan(tx.as_ref(), &repayment)?;
        ensure_can_manage(
            actor,
            &loan,
            "Credit officers cannot delete repayments",
            "delete this repayment",
        )?;
        self.ensure_window(&repayment, "deletion")?;

        let now = self.book.now();
        let before = repayment.clone();

        let allocations = tx.allocations_for_repayment(id)?;
        let mut items = tx.schedule_items(loan.id)?;
        let reversal = PaymentAllocator::new().reverse(&allocations, &mut items);
        if !reversal.missing_items.is_empty() {
            warn!(
                repayment_id = %id,
                missing = reversal.missing_items.len(),
                "allocations point at schedule items that no longer exist"
            );
        }
        for item in items.iter().filter(|i| reversal.touched_items.contains(&i.id)) {
            tx.update_schedule_item(item)?;
        }
        let allocations_removed = tx.delete_allocations_for_repayment(id)?;

        repayment.deleted_at = Some(now);
        tx.update_repayment(&repayment)?;

        if items.iter().any(|i| !i.is_paid()) {
            let change = lifecycle::reopen(&mut loan, now);
            tx.update_loan(&loan)?;
            if change.from != change.to {
                info!(loan_id = %loan.id, from = %change.from, "loan reopened after reversal");
            }
        }

        tx.commit()?;

        info!(
            repayment_id = %id,
            loan_id = %loan.id,
            reversed = %reversal.reversed,
            actor = %actor.user_id,
            "repayment deleted"
        );
        self.book.audit::<_, ()>(AuditAction::RepaymentDeleted, id, actor, Some(&before), None);

        Ok(RepaymentReversal {
            repayment_id: id,
            reversed: reversal.reversed,
            allocations_removed,
            loan_status: loan.status,
        })
    }
}

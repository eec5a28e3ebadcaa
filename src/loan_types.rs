use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::ensure_admin;
use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::events::AuditAction;
use crate::state::LoanType;
use crate::store::{LoanTypeFilter, StoreTx};
use crate::types::{Actor, LoanTypeId};
use crate::views::{Page, PageRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoanType {
    pub name: String,
    pub description: Option<String>,
    pub min_amount: Money,
    pub max_amount: Money,
}

impl NewLoanType {
    pub fn new(name: impl Into<String>, min_amount: Money, max_amount: Money) -> Self {
        Self {
            name: name.into(),
            description: None,
            min_amount,
            max_amount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanTypeChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub min_amount: Option<Money>,
    pub max_amount: Option<Money>,
    pub is_active: Option<bool>,
}

fn validate_bounds(min_amount: Money, max_amount: Money) -> Result<()> {
    if !min_amount.is_positive() {
        return Err(LoanError::validation("minimum amount must be positive"));
    }
    if max_amount <= min_amount {
        return Err(LoanError::validation(
            "maximum amount must be greater than minimum amount",
        ));
    }
    Ok(())
}

fn find_loan_type(tx: &dyn StoreTx, id: LoanTypeId) -> Result<LoanType> {
    tx.loan_type(id)?.ok_or(LoanError::NotFound { entity: "loan type" })
}

fn ensure_name_free(tx: &dyn StoreTx, name: &str) -> Result<()> {
    if tx.loan_type_by_name(name)?.is_some() {
        return Err(LoanError::conflict("loan type with this name already exists"));
    }
    Ok(())
}

/// loan product administration
pub struct LoanTypeService<'a> {
    book: &'a LoanBook,
}

impl<'a> LoanTypeService<'a> {
    pub(crate) fn new(book: &'a LoanBook) -> Self {
        Self { book }
    }

    pub fn create_loan_type(&self, actor: &Actor, input: NewLoanType) -> Result<LoanType> {
        ensure_admin(actor, "manage loan types")?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(LoanError::validation("loan type name is required"));
        }
        validate_bounds(input.min_amount, input.max_amount)?;

        let mut tx = self.book.store().begin()?;
        ensure_name_free(tx.as_ref(), &name)?;

        let loan_type = LoanType {
            id: Uuid::new_v4(),
            name,
            description: input.description,
            min_amount: input.min_amount,
            max_amount: input.max_amount,
            is_active: true,
            created_at: self.book.now(),
            deleted_at: None,
        };
        tx.insert_loan_type(loan_type.clone())?;
        tx.commit()?;

        info!(loan_type_id = %loan_type.id, name = %loan_type.name, "loan type created");
        self.book.audit::<(), _>(
            AuditAction::LoanTypeCreated,
            loan_type.id,
            actor,
            None,
            Some(&loan_type),
        );

        Ok(loan_type)
    }

    /// ordered by name
    pub fn list_loan_types(&self, filter: &LoanTypeFilter, page: PageRequest) -> Result<Page<LoanType>> {
        let tx = self.book.store().begin()?;
        let all = tx.list_loan_types(filter)?;
        Ok(Page::paginate(all, page, self.book.config()))
    }

    pub fn get_loan_type(&self, id: LoanTypeId) -> Result<LoanType> {
        let tx = self.book.store().begin()?;
        find_loan_type(tx.as_ref(), id)
    }

    pub fn update_loan_type(
        &self,
        actor: &Actor,
        id: LoanTypeId,
        changes: LoanTypeChanges,
    ) -> Result<LoanType> {
        ensure_admin(actor, "manage loan types")?;
        let mut tx = self.book.store().begin()?;

        let mut loan_type = find_loan_type(tx.as_ref(), id)?;
        let before = loan_type.clone();

        if let Some(name) = changes.name.map(|n| n.trim().to_string()) {
            if name.is_empty() {
                return Err(LoanError::validation("loan type name is required"));
            }
            if name != loan_type.name {
                ensure_name_free(tx.as_ref(), &name)?;
                loan_type.name = name;
            }
        }

        let min_amount = changes.min_amount.unwrap_or(loan_type.min_amount);
        let max_amount = changes.max_amount.unwrap_or(loan_type.max_amount);
        validate_bounds(min_amount, max_amount)?;
        loan_type.min_amount = min_amount;
        loan_type.max_amount = max_amount;

        if let Some(description) = changes.description {
            loan_type.description = Some(description);
        }
        if let Some(is_active) = changes.is_active {
            loan_type.is_active = is_active;
        }

        tx.update_loan_type(&loan_type)?;
        tx.commit()?;

        info!(loan_type_id = %id, "loan type updated");
        self.book.audit(
            AuditAction::LoanTypeUpdated,
            id,
            actor,
            Some(&before),
            Some(&loan_type),
        );

        Ok(loan_type)
    }

    /// flip the active flag
    pub fn toggle_status(&self, actor: &Actor, id: LoanTypeId) -> Result<LoanType> {
        ensure_admin(actor, "manage loan types")?;
        let mut tx = self.book.store().begin()?;

        let mut loan_type = find_loan_type(tx.as_ref(), id)?;
        let before = loan_type.clone();
        loan_type.is_active = !loan_type.is_active;

        tx.update_loan_type(&loan_type)?;
        tx.commit()?;

        info!(loan_type_id = %id, is_active = loan_type.is_active, "loan type toggled");
        self.book.audit(
            AuditAction::LoanTypeStatusToggled,
            id,
            actor,
            Some(&before),
            Some(&loan_type),
        );

        Ok(loan_type)
    }

    /// soft delete and deactivate; refused while open loans use the type
    pub fn delete_loan_type(&self, actor: &Actor, id: LoanTypeId) -> Result<()> {
        ensure_admin(actor, "manage loan types")?;
        let mut tx = self.book.store().begin()?;

        let mut loan_type = find_loan_type(tx.as_ref(), id)?;
        if tx.count_open_loans_for_type(id)? > 0 {
            return Err(LoanError::conflict(
                "cannot delete loan type with active loans, deactivate it instead",
            ));
        }

        let before = loan_type.clone();
        loan_type.deleted_at = Some(self.book.now());
        loan_type.is_active = false;

        tx.update_loan_type(&loan_type)?;
        tx.commit()?;

        info!(loan_type_id = %id, "loan type deleted");
        self.book.audit::<_, ()>(AuditAction::LoanTypeDeleted, id, actor, Some(&before), None);

        Ok(())
    }
}

/// serializable views handed back to callers
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::LoanBookConfig;
use crate::decimal::Money;
use crate::state::{
    Customer, Loan, LoanAssignment, LoanType, Repayment, RepaymentAllocation,
    RepaymentScheduleItem,
};
use crate::types::{LoanId, LoanStatus, RepaymentId, RepaymentMethod, ScheduleStatus};

/// requested page; zero means "use the default"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(page: usize, limit: usize) -> Self {
        Self { page, limit }
    }

    /// page >= 1 and limit clamped to the configured maximum
    pub fn resolve(&self, config: &LoanBookConfig) -> (usize, usize) {
        let page = self.page.max(1);
        let limit = match self.limit {
            0 => config.default_page_size,
            n => n.min(config.max_page_size),
        };
        (page, limit)
    }
}

/// one page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// cut one page out of an already filtered and ordered list
    pub fn paginate(all: Vec<T>, request: PageRequest, config: &LoanBookConfig) -> Self {
        let (page, limit) = request.resolve(config);
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        Page {
            items,
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

/// loan with the names a list screen needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub customer_code: Option<String>,
    pub customer_name: Option<String>,
    pub loan_type_name: Option<String>,
}

impl LoanView {
    pub fn new(loan: Loan, customer: Option<&Customer>, loan_type: Option<&LoanType>) -> Self {
        LoanView {
            customer_code: customer.map(|c| c.code.clone()),
            customer_name: customer.map(|c| c.full_name()),
            loan_type_name: loan_type.map(|t| t.name.clone()),
            loan,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// loan with its schedule, repayments and assignment history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanDetail {
    #[serde(flatten)]
    pub view: LoanView,
    pub schedule_items: Vec<RepaymentScheduleItem>,
    pub repayments: Vec<Repayment>,
    pub assignments: Vec<LoanAssignment>,
}

impl LoanDetail {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// allocation joined with the repayment that made it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationView {
    pub id: uuid::Uuid,
    pub amount: Money,
    pub repayment_id: RepaymentId,
    pub repayment_amount: Money,
    pub paid_at: DateTime<Utc>,
    pub method: RepaymentMethod,
}

impl AllocationView {
    pub fn new(allocation: &RepaymentAllocation, repayment: &Repayment) -> Self {
        AllocationView {
            id: allocation.id,
            amount: allocation.amount,
            repayment_id: repayment.id,
            repayment_amount: repayment.amount,
            paid_at: repayment.paid_at,
            method: repayment.method,
        }
    }
}

/// schedule row for the schedule screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItemView {
    #[serde(flatten)]
    pub item: RepaymentScheduleItem,
    pub outstanding: Money,
    pub allocations: Vec<AllocationView>,
}

/// repayment totals for one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub loan_number: String,
    pub principal_amount: Money,
    pub total_expected: Money,
    pub total_paid: Money,
    pub total_outstanding: Money,
    pub overdue_amount: Money,
    pub overdue_count: usize,
    /// two decimals, "0.00" when nothing is expected
    pub completion_percentage: String,
    pub status: LoanStatus,
}

impl LoanSummary {
    /// `items` and `repayments` must be the loan's live rows
    pub fn compute(loan: &Loan, items: &[RepaymentScheduleItem], repayments: &[Repayment]) -> Self {
        let total_expected: Money = items.iter().map(|i| i.total_due).sum();
        let total_paid: Money = repayments.iter().map(|r| r.amount).sum();

        let overdue: Vec<&RepaymentScheduleItem> = items
            .iter()
            .filter(|i| i.status == ScheduleStatus::Overdue)
            .collect();
        let overdue_amount: Money = overdue.iter().map(|i| i.outstanding()).sum();

        LoanSummary {
            loan_id: loan.id,
            loan_number: loan.loan_number.clone(),
            principal_amount: loan.principal_amount,
            total_expected,
            total_paid,
            total_outstanding: total_expected - total_paid,
            overdue_amount,
            overdue_count: overdue.len(),
            completion_percentage: two_places(total_paid.percent_of(total_expected)),
            status: loan.status,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn two_places(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// repayment with its loan number and allocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentView {
    #[serde(flatten)]
    pub repayment: Repayment,
    pub loan_number: String,
    pub allocations: Vec<RepaymentAllocation>,
}

impl RepaymentView {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// result of recording a repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentReceipt {
    pub repayment: RepaymentView,
    pub allocated: Money,
    /// overpayment not applied to any installment
    pub unallocated: Money,
    pub loan_status: LoanStatus,
}

/// result of deleting a repayment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentReversal {
    pub repayment_id: RepaymentId,
    pub reversed: Money,
    pub allocations_removed: usize,
    pub loan_status: LoanStatus,
}

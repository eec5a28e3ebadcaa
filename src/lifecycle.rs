use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LoanError, Result};
use crate::state::Loan;
use crate::types::LoanStatus;

/// targets reachable from `from` through a manual status update
pub fn allowed_transitions(from: LoanStatus) -> &'static [LoanStatus] {
    match from {
        LoanStatus::Draft => &[LoanStatus::PendingApproval, LoanStatus::Canceled],
        LoanStatus::PendingApproval => &[LoanStatus::Approved, LoanStatus::Canceled],
        LoanStatus::Approved => &[LoanStatus::Active, LoanStatus::Canceled],
        LoanStatus::Active => &[
            LoanStatus::Completed,
            LoanStatus::Defaulted,
            LoanStatus::WrittenOff,
        ],
        LoanStatus::Defaulted => &[LoanStatus::WrittenOff, LoanStatus::Active],
        LoanStatus::Completed | LoanStatus::WrittenOff | LoanStatus::Canceled => &[],
    }
}

pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn validate_transition(from: LoanStatus, to: LoanStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(LoanError::InvalidTransition { from, to })
    }
}

/// record of one applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: LoanStatus,
    pub to: LoanStatus,
    pub at: DateTime<Utc>,
}

/// apply a manual status change.
///
/// APPROVED -> ACTIVE is in the table but must go through [`disburse`] so that
/// `disbursed_at` is always stamped.
pub fn transition(loan: &mut Loan, to: LoanStatus, now: DateTime<Utc>) -> Result<StatusChange> {
    let from = loan.status;
    validate_transition(from, to)?;

    if from == LoanStatus::Approved && to == LoanStatus::Active {
        return Err(LoanError::invalid_state(
            from,
            "approved loans become active through disbursement",
        ));
    }

    Ok(set_status(loan, to, now))
}

/// APPROVED -> ACTIVE with the disbursement stamp
pub fn disburse(
    loan: &mut Loan,
    disbursed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<StatusChange> {
    if loan.status != LoanStatus::Approved {
        return Err(LoanError::invalid_state(
            loan.status,
            "only approved loans can be disbursed",
        ));
    }

    let change = set_status(loan, LoanStatus::Active, now);
    loan.disbursed_at = Some(disbursed_at.unwrap_or(now));
    Ok(change)
}

/// automatic completion once every installment is paid
pub fn complete(loan: &mut Loan, now: DateTime<Utc>) -> StatusChange {
    set_status(loan, LoanStatus::Completed, now)
}

/// put a loan back into servicing after a reversal left money owing.
///
/// Deliberately unguarded: whatever the current status, the loan returns to
/// ACTIVE and `closed_at` is cleared.
pub fn reopen(loan: &mut Loan, now: DateTime<Utc>) -> StatusChange {
    let change = StatusChange {
        from: loan.status,
        to: LoanStatus::Active,
        at: now,
    };
    loan.status = LoanStatus::Active;
    loan.closed_at = None;
    loan.updated_at = now;
    change
}

fn set_status(loan: &mut Loan, to: LoanStatus, now: DateTime<Utc>) -> StatusChange {
    let change = StatusChange {
        from: loan.status,
        to,
        at: now,
    };
    loan.status = to;
    if to.closes_loan() {
        loan.closed_at = Some(now);
    }
    loan.updated_at = now;
    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::types::TermUnit;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn draft_loan(now: DateTime<Utc>) -> Loan {
        Loan {
            id: Uuid::new_v4(),
            loan_number: "LN00000001".to_string(),
            customer_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            loan_type_id: None,
            principal_amount: Money::from_major(1_000),
            term_count: 10,
            term_unit: TermUnit::Month,
            start_date: now,
            end_date: now,
            processing_fee_amount: Money::ZERO,
            penalty_fee_per_day_amount: Money::ZERO,
            status: LoanStatus::Draft,
            created_by_user_id: Uuid::new_v4(),
            assigned_officer_id: Uuid::new_v4(),
            notes: None,
            disbursed_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_table_matches_lifecycle() {
        assert!(can_transition(LoanStatus::Draft, LoanStatus::PendingApproval));
        assert!(can_transition(LoanStatus::Defaulted, LoanStatus::Active));
        assert!(!can_transition(LoanStatus::Draft, LoanStatus::Active));
        assert!(!can_transition(LoanStatus::Active, LoanStatus::Canceled));

        for terminal in [LoanStatus::Completed, LoanStatus::WrittenOff, LoanStatus::Canceled] {
            for to in LoanStatus::ALL {
                assert!(!can_transition(terminal, to), "{} -> {}", terminal, to);
            }
        }
    }

    #[test]
    fn test_draft_to_active_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = draft_loan(now);

        let err = transition(&mut loan, LoanStatus::Active, now).unwrap_err();
        assert_eq!(
            err,
            LoanError::InvalidTransition {
                from: LoanStatus::Draft,
                to: LoanStatus::Active
            }
        );
        assert_eq!(loan.status, LoanStatus::Draft);
    }

    #[test]
    fn test_approval_path_then_disburse() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = draft_loan(now);

        transition(&mut loan, LoanStatus::PendingApproval, now).unwrap();
        transition(&mut loan, LoanStatus::Approved, now).unwrap();

        // manual activation is refused, disbursement is the way in
        assert!(transition(&mut loan, LoanStatus::Active, now).is_err());

        let change = disburse(&mut loan, None, now).unwrap();
        assert_eq!(change.from, LoanStatus::Approved);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.disbursed_at, Some(now));
        assert_eq!(loan.closed_at, None);
    }

    #[test]
    fn test_disburse_requires_approval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = draft_loan(now);

        let err = disburse(&mut loan, None, now).unwrap_err();
        assert!(matches!(err, LoanError::InvalidState { status: LoanStatus::Draft, .. }));
    }

    #[test]
    fn test_closing_statuses_stamp_closed_at() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = draft_loan(now);

        transition(&mut loan, LoanStatus::Canceled, now).unwrap();
        assert_eq!(loan.closed_at, Some(now));
    }

    #[test]
    fn test_complete_and_reopen() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut loan = draft_loan(now);
        loan.status = LoanStatus::Active;

        complete(&mut loan, now);
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.closed_at, Some(now));

        let change = reopen(&mut loan, now);
        assert_eq!(change.from, LoanStatus::Completed);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.closed_at, None);
    }
}

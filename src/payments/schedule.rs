use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::state::RepaymentScheduleItem;
use crate::types::{LoanId, ScheduleStatus, TermUnit};

/// inputs to schedule generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTerms {
    pub principal: Money,
    pub term_count: u32,
    pub term_unit: TermUnit,
    pub start_date: DateTime<Utc>,
    pub interest_rate: Rate,
}

impl ScheduleTerms {
    pub fn validate(&self) -> Result<()> {
        if !self.principal.is_positive() {
            return Err(LoanError::validation("principal amount must be positive"));
        }
        if self.term_count == 0 {
            return Err(LoanError::validation("term count must be a positive integer"));
        }
        let pct = self.interest_rate.as_percentage();
        if pct < Decimal::ZERO || pct > dec!(100) {
            return Err(LoanError::validation("interest rate must be between 0 and 100"));
        }
        Ok(())
    }
}

/// one generated installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledInstallment {
    pub sequence: u32,
    pub due_date: DateTime<Utc>,
    pub principal_due: Money,
    pub interest_due: Money,
    pub fee_due: Money,
    pub total_due: Money,
}

/// flat simple-interest repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepaymentSchedule {
    pub terms: ScheduleTerms,
    pub end_date: DateTime<Utc>,
    pub installments: Vec<ScheduledInstallment>,
    pub total_interest: Money,
    /// principal left over by the even split, not assigned to any installment
    pub principal_remainder: Money,
    /// interest left over by the even split, not assigned to any installment
    pub interest_remainder: Money,
    pub total_due: Money,
}

impl RepaymentSchedule {
    /// generate `term_count` installments with amounts truncated at `scale` places
    pub fn generate(terms: ScheduleTerms, scale: u32) -> Result<Self> {
        terms.validate()?;

        let n = terms.term_count;
        let end_date = end_date(terms.start_date, n, terms.term_unit)?;

        let (principal_due, principal_remainder) = terms.principal.split(n, scale);

        let total_interest = terms.principal
            * terms.interest_rate.as_decimal()
            * year_fraction(n, terms.term_unit);
        let (interest_due, interest_remainder) = total_interest.split(n, scale);

        let fee_due = Money::ZERO.with_scale(scale);
        let total_due = principal_due + interest_due + fee_due;

        let mut installments = Vec::with_capacity(n as usize);
        for sequence in 1..=n {
            installments.push(ScheduledInstallment {
                sequence,
                due_date: advance(terms.start_date, terms.term_unit, sequence)?,
                principal_due,
                interest_due,
                fee_due,
                total_due,
            });
        }

        let schedule_total = installments.iter().map(|i| i.total_due).sum();

        Ok(Self {
            terms,
            end_date,
            installments,
            total_interest,
            principal_remainder,
            interest_remainder,
            total_due: schedule_total,
        })
    }

    /// get installment for a 1-based sequence number
    pub fn get_installment(&self, sequence: u32) -> Option<&ScheduledInstallment> {
        sequence
            .checked_sub(1)
            .and_then(|idx| self.installments.get(idx as usize))
    }

    /// materialize as fresh PENDING schedule items for `loan_id`
    pub fn to_items(&self, loan_id: LoanId) -> Vec<RepaymentScheduleItem> {
        self.installments
            .iter()
            .map(|i| RepaymentScheduleItem {
                id: Uuid::new_v4(),
                loan_id,
                sequence: i.sequence,
                due_date: i.due_date,
                principal_due: i.principal_due,
                interest_due: i.interest_due,
                fee_due: i.fee_due,
                total_due: i.total_due,
                paid_amount: Money::ZERO,
                status: ScheduleStatus::Pending,
                closed_at: None,
                deleted_at: None,
            })
            .collect()
    }
}

/// fraction of a year covered by `count` units
pub fn year_fraction(count: u32, unit: TermUnit) -> Decimal {
    let count = Decimal::from(count);
    match unit {
        TermUnit::Day => count / dec!(365),
        TermUnit::Week => count * dec!(7) / dec!(365),
        TermUnit::Month => count / dec!(12),
    }
}

/// move `date` forward by `count` units.
///
/// Months use calendar arithmetic from the start date each time, so a loan
/// starting on the 31st lands on the last day of shorter months.
pub fn advance(date: DateTime<Utc>, unit: TermUnit, count: u32) -> Result<DateTime<Utc>> {
    let moved = match unit {
        TermUnit::Day => date.checked_add_signed(Duration::days(count as i64)),
        TermUnit::Week => date.checked_add_signed(Duration::weeks(count as i64)),
        TermUnit::Month => date.checked_add_months(Months::new(count)),
    };

    moved.ok_or_else(|| LoanError::validation("schedule date out of range"))
}

/// maturity date of a loan
pub fn end_date(start: DateTime<Utc>, term_count: u32, unit: TermUnit) -> Result<DateTime<Utc>> {
    advance(start, unit, term_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn terms(principal: i64, n: u32, unit: TermUnit, rate: Decimal) -> ScheduleTerms {
        ScheduleTerms {
            principal: Money::from_major(principal),
            term_count: n,
            term_unit: unit,
            start_date: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            interest_rate: Rate::from_percentage(rate),
        }
    }

    #[test]
    fn test_zero_rate_monthly_schedule() {
        let schedule = RepaymentSchedule::generate(terms(1_000, 10, TermUnit::Month, dec!(0)), 2)
            .unwrap();

        assert_eq!(schedule.installments.len(), 10);
        for (idx, installment) in schedule.installments.iter().enumerate() {
            assert_eq!(installment.sequence, idx as u32 + 1);
            assert_eq!(installment.principal_due, Money::from_major(100));
            assert!(installment.interest_due.is_zero());
            assert!(installment.fee_due.is_zero());
            assert_eq!(installment.total_due.to_string(), "100.00");
        }

        assert_eq!(
            schedule.get_installment(1).unwrap().due_date,
            Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.end_date,
            Utc.with_ymd_and_hms(2024, 11, 15, 0, 0, 0).unwrap()
        );
        assert!(schedule.get_installment(0).is_none());
        assert!(schedule.get_installment(11).is_none());
    }

    #[test]
    fn test_flat_interest_monthly() {
        // 1200 over 12 months at 12%: 144 interest, 12 per installment
        let schedule = RepaymentSchedule::generate(terms(1_200, 12, TermUnit::Month, dec!(12)), 2)
            .unwrap();

        assert_eq!(schedule.total_interest, Money::from_major(144));
        for installment in &schedule.installments {
            assert_eq!(installment.principal_due, Money::from_major(100));
            assert_eq!(installment.interest_due, Money::from_major(12));
            assert_eq!(installment.total_due, Money::from_major(112));
        }
        assert_eq!(schedule.total_due, Money::from_major(1_344));
    }

    #[test]
    fn test_weekly_year_fraction() {
        // 3650 over 10 weeks at 10%: 3650 * 0.10 * 70/365 = 70
        let schedule = RepaymentSchedule::generate(terms(3_650, 10, TermUnit::Week, dec!(10)), 2)
            .unwrap();

        assert_eq!(schedule.total_interest, Money::from_major(70));
        assert_eq!(schedule.installments[0].interest_due, Money::from_major(7));
        assert_eq!(
            schedule.installments[1].due_date,
            Utc.with_ymd_and_hms(2024, 1, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_schedule_dates() {
        let schedule = RepaymentSchedule::generate(terms(300, 30, TermUnit::Day, dec!(0)), 2)
            .unwrap();

        assert_eq!(
            schedule.installments[29].due_date,
            Utc.with_ymd_and_hms(2024, 2, 14, 0, 0, 0).unwrap()
        );
        assert_eq!(schedule.end_date, schedule.installments[29].due_date);
    }

    #[test]
    fn test_remainder_not_redistributed() {
        let schedule = RepaymentSchedule::generate(terms(1_000, 3, TermUnit::Month, dec!(0)), 2)
            .unwrap();

        let principal_total: Money = schedule.installments.iter().map(|i| i.principal_due).sum();
        assert_eq!(principal_total, Money::from_decimal(dec!(999.99)));
        assert_eq!(schedule.principal_remainder, Money::from_decimal(dec!(0.01)));

        // last installment carries the same share as the others
        assert_eq!(schedule.installments[2].principal_due, schedule.installments[0].principal_due);
    }

    #[test]
    fn test_month_end_start() {
        let mut t = terms(300, 3, TermUnit::Month, dec!(0));
        t.start_date = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();

        let schedule = RepaymentSchedule::generate(t, 2).unwrap();
        assert_eq!(
            schedule.installments[0].due_date,
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.installments[1].due_date,
            Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = RepaymentSchedule::generate(terms(2_500, 7, TermUnit::Week, dec!(18)), 2).unwrap();
        let b = RepaymentSchedule::generate(terms(2_500, 7, TermUnit::Week, dec!(18)), 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_terms() {
        assert!(RepaymentSchedule::generate(terms(1_000, 0, TermUnit::Month, dec!(0)), 2).is_err());
        assert!(RepaymentSchedule::generate(terms(0, 10, TermUnit::Month, dec!(0)), 2).is_err());
        assert!(RepaymentSchedule::generate(terms(1_000, 10, TermUnit::Month, dec!(101)), 2).is_err());
    }

    #[test]
    fn test_items_start_pending() {
        let schedule = RepaymentSchedule::generate(terms(1_000, 4, TermUnit::Month, dec!(0)), 2)
            .unwrap();
        let loan_id = Uuid::new_v4();
        let items = schedule.to_items(loan_id);

        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.loan_id == loan_id));
        assert!(items.iter().all(|i| i.status == ScheduleStatus::Pending));
        assert!(items.iter().all(|i| i.paid_amount.is_zero()));
    }
}

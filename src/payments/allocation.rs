use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimal::Money;
use crate::state::{RepaymentAllocation, RepaymentScheduleItem};
use crate::types::{RepaymentId, ScheduleItemId, ScheduleStatus};

/// result of spreading one repayment over a loan's schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<RepaymentAllocation>,
    pub allocated: Money,
    /// overpayment beyond everything outstanding; kept on the repayment, applied nowhere
    pub unallocated: Money,
    /// schedule items whose balances changed, in allocation order
    pub touched_items: Vec<ScheduleItemId>,
}

/// result of taking a repayment's allocations back out of the schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalOutcome {
    pub reversed: Money,
    pub touched_items: Vec<ScheduleItemId>,
    /// allocations that pointed at items no longer present in the schedule
    pub missing_items: Vec<ScheduleItemId>,
}

/// oldest-due-first allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentAllocator;

impl PaymentAllocator {
    pub fn new() -> Self {
        Self
    }

    /// allocate `amount` against `items`, mutating them in place.
    ///
    /// Eligible items are PENDING, PARTIAL or OVERDUE and not deleted, walked
    /// by due date then sequence. Each takes `min(remaining, outstanding)`.
    pub fn allocate(
        &self,
        repayment_id: RepaymentId,
        items: &mut [RepaymentScheduleItem],
        amount: Money,
        now: DateTime<Utc>,
    ) -> AllocationOutcome {
        let mut order: Vec<usize> = (0..items.len())
            .filter(|&idx| {
                let item = &items[idx];
                item.deleted_at.is_none() && item.status.accepts_payment()
            })
            .collect();
        order.sort_by_key(|&idx| (items[idx].due_date, items[idx].sequence));

        let mut remaining = amount;
        let mut allocations = Vec::new();
        let mut touched_items = Vec::new();

        for idx in order {
            if !remaining.is_positive() {
                break;
            }

            let item = &mut items[idx];
            let outstanding = item.outstanding();
            if !outstanding.is_positive() {
                continue;
            }

            let applied = remaining.min(outstanding);
            item.apply_payment(applied, now);
            remaining -= applied;

            debug!(
                schedule_item_id = %item.id,
                sequence = item.sequence,
                applied = %applied,
                status = ?item.status,
                "allocated repayment to installment"
            );

            allocations.push(RepaymentAllocation::new(repayment_id, item.id, applied, now));
            touched_items.push(item.id);
        }

        let unallocated = remaining.max(Money::ZERO);

        AllocationOutcome {
            allocated: amount - unallocated,
            allocations,
            unallocated,
            touched_items,
        }
    }

    /// undo `allocations` against `items`, mutating them in place
    pub fn reverse(
        &self,
        allocations: &[RepaymentAllocation],
        items: &mut [RepaymentScheduleItem],
    ) -> ReversalOutcome {
        let mut reversed = Money::ZERO;
        let mut touched_items = Vec::new();
        let mut missing_items = Vec::new();

        for allocation in allocations {
            match items.iter_mut().find(|i| i.id == allocation.schedule_item_id) {
                Some(item) => {
                    item.reverse_payment(allocation.amount);
                    reversed += allocation.amount;
                    touched_items.push(item.id);

                    debug!(
                        schedule_item_id = %item.id,
                        reversed = %allocation.amount,
                        status = ?item.status,
                        "reversed allocation"
                    );
                }
                None => missing_items.push(allocation.schedule_item_id),
            }
        }

        ReversalOutcome {
            reversed,
            touched_items,
            missing_items,
        }
    }
}

/// every live installment is paid
pub fn is_fully_paid(items: &[RepaymentScheduleItem]) -> bool {
    items
        .iter()
        .filter(|i| i.deleted_at.is_none())
        .all(|i| i.status == ScheduleStatus::Paid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::schedule::{RepaymentSchedule, ScheduleTerms};
    use crate::types::TermUnit;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn schedule(principal: i64, n: u32) -> Vec<RepaymentScheduleItem> {
        let terms = ScheduleTerms {
            principal: Money::from_major(principal),
            term_count: n,
            term_unit: TermUnit::Month,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            interest_rate: Rate::ZERO,
        };
        RepaymentSchedule::generate(terms, 2).unwrap().to_items(Uuid::new_v4())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_partial_allocation_across_items() {
        let mut items = schedule(1_000, 10);
        let allocator = PaymentAllocator::new();

        let outcome = allocator.allocate(Uuid::new_v4(), &mut items, Money::from_major(250), now());

        assert_eq!(outcome.allocations.len(), 3);
        assert_eq!(outcome.allocated, Money::from_major(250));
        assert!(outcome.unallocated.is_zero());

        assert_eq!(items[0].status, ScheduleStatus::Paid);
        assert_eq!(items[0].closed_at, Some(now()));
        assert_eq!(items[1].status, ScheduleStatus::Paid);
        assert_eq!(items[2].status, ScheduleStatus::Partial);
        assert_eq!(items[2].paid_amount, Money::from_decimal(dec!(50.00)));
        assert_eq!(items[2].closed_at, None);
        assert!(items[3..].iter().all(|i| i.paid_amount.is_zero()));
    }

    #[test]
    fn test_oldest_due_first_regardless_of_slice_order() {
        let mut items = schedule(200, 2);
        items.reverse();
        let later_id = items[0].id;

        let outcome = PaymentAllocator::new().allocate(
            Uuid::new_v4(),
            &mut items,
            Money::from_major(100),
            now(),
        );

        assert_eq!(outcome.allocations.len(), 1);
        let later = items.iter().find(|i| i.id == later_id).unwrap();
        assert!(later.paid_amount.is_zero());
        assert_eq!(later.status, ScheduleStatus::Pending);
    }

    #[test]
    fn test_due_date_beats_sequence() {
        let mut items = schedule(200, 2);
        // push installment 1 past installment 2
        items[0].due_date = items[1].due_date + Duration::days(1);

        PaymentAllocator::new().allocate(Uuid::new_v4(), &mut items, Money::from_major(100), now());

        assert_eq!(items[1].status, ScheduleStatus::Paid);
        assert_eq!(items[0].status, ScheduleStatus::Pending);
    }

    #[test]
    fn test_overdue_items_are_eligible() {
        let mut items = schedule(200, 2);
        items[0].status = ScheduleStatus::Overdue;

        PaymentAllocator::new().allocate(Uuid::new_v4(), &mut items, Money::from_major(50), now());

        assert_eq!(items[0].status, ScheduleStatus::Partial);
        assert_eq!(items[0].paid_amount, Money::from_major(50));
    }

    #[test]
    fn test_overpayment_is_left_unallocated() {
        let mut items = schedule(300, 3);

        let outcome = PaymentAllocator::new().allocate(
            Uuid::new_v4(),
            &mut items,
            Money::from_major(350),
            now(),
        );

        assert_eq!(outcome.allocated, Money::from_major(300));
        assert_eq!(outcome.unallocated, Money::from_major(50));
        assert!(is_fully_paid(&items));
        assert!(items.iter().all(|i| i.paid_amount <= i.total_due));
    }

    #[test]
    fn test_paid_and_deleted_items_skipped() {
        let mut items = schedule(300, 3);
        items[0].paid_amount = items[0].total_due;
        items[0].status = ScheduleStatus::Paid;
        items[1].deleted_at = Some(now());

        let outcome = PaymentAllocator::new().allocate(
            Uuid::new_v4(),
            &mut items,
            Money::from_major(100),
            now(),
        );

        assert_eq!(outcome.touched_items, vec![items[2].id]);
        assert!(items[1].paid_amount.is_zero());
    }

    #[test]
    fn test_reverse_restores_prior_state() {
        let mut items = schedule(1_000, 10);
        let allocator = PaymentAllocator::new();

        // an earlier repayment leaves installment 1 partially paid
        allocator.allocate(Uuid::new_v4(), &mut items, Money::from_major(30), now());
        let before = items.clone();

        let outcome = allocator.allocate(Uuid::new_v4(), &mut items, Money::from_major(420), now());
        let reversal = allocator.reverse(&outcome.allocations, &mut items);

        assert_eq!(reversal.reversed, Money::from_major(420));
        assert!(reversal.missing_items.is_empty());
        for (after, prior) in items.iter().zip(before.iter()) {
            assert_eq!(after.paid_amount, prior.paid_amount);
            assert_eq!(after.status, prior.status);
        }
    }

    #[test]
    fn test_reverse_reports_missing_items() {
        let mut items = schedule(100, 1);
        let stray = RepaymentAllocation::new(Uuid::new_v4(), Uuid::new_v4(), Money::from_major(10), now());

        let reversal = PaymentAllocator::new().reverse(&[stray.clone()], &mut items);

        assert!(reversal.reversed.is_zero());
        assert_eq!(reversal.missing_items, vec![stray.schedule_item_id]);
    }

    #[test]
    fn test_exact_total_pays_everything() {
        let terms = ScheduleTerms {
            principal: Money::from_major(1_000),
            term_count: 3,
            term_unit: TermUnit::Week,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            interest_rate: Rate::from_percentage(dec!(20)),
        };
        let schedule = RepaymentSchedule::generate(terms, 2).unwrap();
        let mut items = schedule.to_items(Uuid::new_v4());
        let allocator = PaymentAllocator::new();

        // pay the expected total in three uneven chunks
        let total = schedule.total_due;
        let first = Money::from_decimal(dec!(123.45));
        let second = Money::from_decimal(dec!(400.00));
        let third = total - first - second;

        for amount in [first, second, third] {
            allocator.allocate(Uuid::new_v4(), &mut items, amount, now());
        }

        assert!(is_fully_paid(&items));
    }
}

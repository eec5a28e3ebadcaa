pub mod allocation;
pub mod schedule;

pub use allocation::{is_fully_paid, AllocationOutcome, PaymentAllocator, ReversalOutcome};
pub use schedule::{
    advance, end_date, year_fraction, RepaymentSchedule, ScheduleTerms, ScheduledInstallment,
};

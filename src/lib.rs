pub mod access;
pub mod book;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod loan_types;
pub mod loans;
pub mod payments;
pub mod repayments;
pub mod state;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use book::{LoanBook, LoanBookBuilder};
pub use config::{ConfigError, LoanBookConfig};
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LoanError, Result};
pub use events::{
    AuditAction, AuditError, AuditEvent, AuditQuery, AuditSink, ChannelSink, EntityKind,
    EventStore, NullSink,
};
pub use loan_types::{LoanTypeChanges, LoanTypeService, NewLoanType};
pub use loans::{LoanChanges, LoanService, NewLoan};
pub use payments::{PaymentAllocator, RepaymentSchedule, ScheduleTerms};
pub use repayments::{NewRepayment, RepaymentChanges, RepaymentService};
pub use state::{
    Branch, Customer, Loan, LoanAssignment, LoanType, Repayment, RepaymentAllocation,
    RepaymentScheduleItem, StaffUser,
};
pub use store::{LoanFilter, LoanTypeFilter, MemoryStore, RepaymentFilter, Store, StoreTx};
pub use types::{
    Actor, BranchId, CustomerId, LoanId, LoanStatus, LoanTypeId, RepaymentId, RepaymentMethod,
    Role, ScheduleStatus, TermUnit, UserId,
};
pub use views::{
    LoanDetail, LoanSummary, LoanView, Page, PageRequest, RepaymentReceipt, RepaymentReversal,
    RepaymentView, ScheduleItemView,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

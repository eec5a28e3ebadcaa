use std::sync::{mpsc, Arc};

use chrono::{Duration, TimeZone, Utc};
use microloan_book::{
    Actor, AuditAction, AuditQuery, Branch, ChannelSink, Customer, EntityKind, ErrorKind,
    EventStore, LoanBook, LoanError, LoanFilter, LoanStatus, MemoryStore, Money, NewLoan,
    NewLoanType, NewRepayment, PageRequest, Rate, RepaymentFilter, RepaymentMethod,
    RepaymentSchedule, Role, SafeTimeProvider, ScheduleStatus, ScheduleTerms, StaffUser,
    TermUnit, TimeSource, Uuid,
};
use rust_decimal_macros::dec;

struct Harness {
    book: LoanBook,
    time: SafeTimeProvider,
    audit: Arc<EventStore>,
    store: Arc<MemoryStore>,
    admin: Actor,
    branch_id: Uuid,
}

fn setup() -> Harness {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(EventStore::new());

    let branch_id = Uuid::new_v4();
    store.seed_branch(Branch {
        id: branch_id,
        code: "GUL".to_string(),
        name: "Gulu".to_string(),
        deleted_at: None,
    });

    let book = LoanBook::builder()
        .store(store.clone())
        .audit_sink(audit.clone())
        .set_time(&time)
        .build()
        .unwrap();

    Harness {
        book,
        time,
        audit,
        store,
        admin: Actor::admin(Uuid::new_v4()),
        branch_id,
    }
}

fn add_customer(b: &Harness, branch_id: Uuid, code: &str, officer: Option<Uuid>) -> Uuid {
    if branch_id != b.branch_id {
        b.store.seed_branch(Branch {
            id: branch_id,
            code: format!("BR-{}", code),
            name: "Outlying".to_string(),
            deleted_at: None,
        });
    }
    let id = Uuid::new_v4();
    b.store.seed_customer(Customer {
        id,
        code: code.to_string(),
        first_name: "Amina".to_string(),
        last_name: code.to_string(),
        branch_id,
        current_officer_id: officer,
        deleted_at: None,
    });
    id
}

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
}

/// DRAFT -> PENDING_APPROVAL -> APPROVED -> disbursed
fn active_loan(b: &Harness, customer_id: Uuid, principal: i64, terms: u32) -> Uuid {
    let loans = b.book.loans();
    let view = loans
        .create_loan(
            &b.admin,
            NewLoan::new(customer_id, Money::from_major(principal), terms, TermUnit::Month, start()),
        )
        .unwrap();
    let id = view.loan.id;
    loans.update_status(&b.admin, id, LoanStatus::PendingApproval, None).unwrap();
    loans.update_status(&b.admin, id, LoanStatus::Approved, None).unwrap();
    loans.disburse(&b.admin, id, None).unwrap();
    id
}

fn pay(b: &Harness, loan_id: Uuid, amount: Money) -> microloan_book::RepaymentReceipt {
    b.book
        .repayments()
        .create_repayment(&b.admin, NewRepayment::new(loan_id, amount, RepaymentMethod::Cash))
        .unwrap()
}

#[test]
fn test_schedule_splits_principal_by_truncation() {
    let schedule = RepaymentSchedule::generate(
        ScheduleTerms {
            principal: Money::from_major(1_000),
            term_count: 3,
            term_unit: TermUnit::Week,
            start_date: start(),
            interest_rate: Rate::ZERO,
        },
        2,
    )
    .unwrap();

    let principal: Money = schedule.installments.iter().map(|i| i.principal_due).sum();
    assert_eq!(principal, Money::from_decimal(dec!(999.99)));
    for installment in &schedule.installments {
        assert_eq!(installment.principal_due, Money::from_decimal(dec!(333.33)));
        assert_eq!(
            installment.total_due,
            installment.principal_due + installment.interest_due
        );
        assert!(installment.fee_due.is_zero());
    }
}

#[test]
fn test_schedule_regeneration_is_deterministic() {
    let terms = ScheduleTerms {
        principal: Money::from_major(2_400),
        term_count: 12,
        term_unit: TermUnit::Month,
        start_date: start(),
        interest_rate: Rate::from_percentage(dec!(18)),
    };
    let first = RepaymentSchedule::generate(terms.clone(), 2).unwrap();
    let second = RepaymentSchedule::generate(terms, 2).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_thousand_over_ten_months_paying_250() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-250", None);
    let loan_id = active_loan(&b, customer, 1_000, 10);

    let schedule = b.book.loans().schedule(&b.admin, loan_id).unwrap();
    assert_eq!(schedule.len(), 10);
    assert!(schedule
        .iter()
        .all(|i| i.item.total_due == Money::from_decimal(dec!(100.00))));

    let receipt = pay(&b, loan_id, Money::from_decimal(dec!(250.00)));
    assert_eq!(receipt.allocated, Money::from_decimal(dec!(250.00)));
    assert!(receipt.unallocated.is_zero());

    let schedule = b.book.loans().schedule(&b.admin, loan_id).unwrap();
    assert_eq!(schedule[0].item.status, ScheduleStatus::Paid);
    assert_eq!(schedule[1].item.status, ScheduleStatus::Paid);
    assert_eq!(schedule[2].item.status, ScheduleStatus::Partial);
    assert_eq!(schedule[2].item.paid_amount, Money::from_decimal(dec!(50.00)));
    assert_eq!(schedule[2].outstanding, Money::from_decimal(dec!(50.00)));

    // the next payment lands on the partial installment first
    pay(&b, loan_id, Money::from_decimal(dec!(60.00)));
    let schedule = b.book.loans().schedule(&b.admin, loan_id).unwrap();
    assert_eq!(schedule[2].item.status, ScheduleStatus::Paid);
    assert_eq!(schedule[3].item.paid_amount, Money::from_decimal(dec!(10.00)));
    assert_eq!(schedule[2].allocations.len(), 2);
}

#[test]
fn test_paying_total_expected_completes_loan() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-301", None);
    let loan_id = active_loan(&b, customer, 1_000, 3);

    let expected = b.book.loans().summary(&b.admin, loan_id).unwrap().total_expected;
    assert_eq!(expected, Money::from_decimal(dec!(999.99)));

    pay(&b, loan_id, Money::from_decimal(dec!(400)));
    let receipt = pay(&b, loan_id, Money::from_decimal(dec!(599.99)));
    assert_eq!(receipt.loan_status, LoanStatus::Completed);

    let detail = b.book.loans().get_loan(&b.admin, loan_id).unwrap();
    assert!(detail.view.loan.closed_at.is_some());
    assert!(detail
        .schedule_items
        .iter()
        .all(|i| i.status == ScheduleStatus::Paid && i.closed_at.is_some()));

    let summary = b.book.loans().summary(&b.admin, loan_id).unwrap();
    assert!(summary.total_outstanding.is_zero());
    assert_eq!(summary.completion_percentage, "100.00");

    // completed loans refuse further money
    let err = b
        .book
        .repayments()
        .create_repayment(
            &b.admin,
            NewRepayment::new(loan_id, Money::from_major(1), RepaymentMethod::Cash),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
}

#[test]
fn test_reversal_restores_schedule() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-410", None);
    let loan_id = active_loan(&b, customer, 1_000, 10);

    pay(&b, loan_id, Money::from_decimal(dec!(130)));
    let before: Vec<_> = b
        .book
        .loans()
        .schedule(&b.admin, loan_id)
        .unwrap()
        .into_iter()
        .map(|i| (i.item.paid_amount, i.item.status))
        .collect();

    let receipt = pay(&b, loan_id, Money::from_decimal(dec!(245.50)));
    let reversal = b
        .book
        .repayments()
        .delete_repayment(&b.admin, receipt.repayment.repayment.id)
        .unwrap();
    assert_eq!(reversal.reversed, Money::from_decimal(dec!(245.50)));
    assert_eq!(reversal.loan_status, LoanStatus::Active);

    let after: Vec<_> = b
        .book
        .loans()
        .schedule(&b.admin, loan_id)
        .unwrap()
        .into_iter()
        .map(|i| (i.item.paid_amount, i.item.status))
        .collect();
    assert_eq!(before, after);

    assert!(matches!(
        b.book
            .repayments()
            .get_repayment(&b.admin, receipt.repayment.repayment.id),
        Err(LoanError::NotFound { .. })
    ));
}

#[test]
fn test_lifecycle_rules() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-500", None);
    let loans = b.book.loans();
    let view = loans
        .create_loan(
            &b.admin,
            NewLoan::new(customer, Money::from_major(600), 6, TermUnit::Week, start()),
        )
        .unwrap();
    let id = view.loan.id;

    let err = loans
        .update_status(&b.admin, id, LoanStatus::Active, None)
        .unwrap_err();
    assert_eq!(
        err,
        LoanError::InvalidTransition {
            from: LoanStatus::Draft,
            to: LoanStatus::Active
        }
    );

    loans.update_status(&b.admin, id, LoanStatus::PendingApproval, None).unwrap();
    loans.update_status(&b.admin, id, LoanStatus::Approved, None).unwrap();
    assert!(loans.disburse(&b.admin, id, None).is_ok());

    let loan = loans.get_loan(&b.admin, id).unwrap().view.loan;
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.disbursed_at, Some(b.time.now()));

    // already active
    assert_eq!(
        loans.disburse(&b.admin, id, None).unwrap_err().kind(),
        ErrorKind::InvalidStateTransition
    );
}

#[test]
fn test_loan_type_bounds_on_create() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-600", None);
    let loan_type = b
        .book
        .loan_types()
        .create_loan_type(
            &b.admin,
            NewLoanType::new("Market vendor", Money::from_major(500), Money::from_major(5_000)),
        )
        .unwrap();

    let err = b
        .book
        .loans()
        .create_loan(
            &b.admin,
            NewLoan::new(customer, Money::from_major(400), 4, TermUnit::Week, start())
                .loan_type(loan_type.id),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);

    let view = b
        .book
        .loans()
        .create_loan(
            &b.admin,
            NewLoan::new(customer, Money::from_major(500), 4, TermUnit::Week, start())
                .loan_type(loan_type.id),
        )
        .unwrap();
    assert_eq!(view.loan_type_name.as_deref(), Some("Market vendor"));
}

#[test]
fn test_repayment_deletion_window() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-700", None);
    let loan_id = active_loan(&b, customer, 1_000, 10);
    let receipt = pay(&b, loan_id, Money::from_major(100));

    b.time
        .test_control()
        .unwrap()
        .advance(Duration::hours(25));

    let err = b
        .book
        .repayments()
        .delete_repayment(&b.admin, receipt.repayment.repayment.id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimeWindowExpired);

    // nothing was reversed
    let schedule = b.book.loans().schedule(&b.admin, loan_id).unwrap();
    assert_eq!(schedule[0].item.status, ScheduleStatus::Paid);
}

#[test]
fn test_role_scoping() {
    let b = setup();
    let other_branch = Uuid::new_v4();

    let officer = StaffUser {
        id: Uuid::new_v4(),
        email: "okello@example.org".to_string(),
        role: Role::CreditOfficer,
        branch_id: Some(b.branch_id),
        is_active: true,
        deleted_at: None,
    };
    b.store.seed_staff_user(officer.clone());

    let mine = add_customer(&b, b.branch_id, "CUS-801", Some(officer.id));
    let colleague = add_customer(&b, b.branch_id, "CUS-802", None);
    let far = add_customer(&b, other_branch, "CUS-803", None);

    let loans = b.book.loans();
    let mine_loan = loans
        .create_loan(&b.admin, NewLoan::new(mine, Money::from_major(300), 3, TermUnit::Month, start()))
        .unwrap();
    assert_eq!(mine_loan.loan.assigned_officer_id, officer.id);
    loans
        .create_loan(&b.admin, NewLoan::new(colleague, Money::from_major(300), 3, TermUnit::Month, start()))
        .unwrap();
    let far_loan = loans
        .create_loan(&b.admin, NewLoan::new(far, Money::from_major(300), 3, TermUnit::Month, start()))
        .unwrap();

    let everything = loans
        .list_loans(&b.admin, &LoanFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(everything.total, 3);

    let manager = Actor::branch_manager(Uuid::new_v4(), b.branch_id);
    let branch_view = loans
        .list_loans(&manager, &LoanFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(branch_view.total, 2);

    // an explicit branch filter cannot widen the manager's view
    let widened = loans
        .list_loans(
            &manager,
            &LoanFilter {
                branch_id: Some(other_branch),
                ..LoanFilter::default()
            },
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(widened.total, 0);

    let as_officer = Actor::credit_officer(officer.id, b.branch_id);
    let own = loans
        .list_loans(&as_officer, &LoanFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(own.total, 1);
    assert_eq!(own.items[0].loan.id, mine_loan.loan.id);

    assert_eq!(
        loans.get_loan(&manager, far_loan.loan.id).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
    assert_eq!(
        loans
            .update_status(&as_officer, mine_loan.loan.id, LoanStatus::PendingApproval, None)
            .unwrap_err()
            .kind(),
        ErrorKind::PermissionDenied
    );

    // searching by customer code
    let found = loans
        .list_loans(
            &b.admin,
            &LoanFilter {
                search: Some("cus-803".to_string()),
                ..LoanFilter::default()
            },
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(found.total, 1);
}

#[test]
fn test_repayment_listing_follows_loan_scope() {
    let b = setup();
    let here = add_customer(&b, b.branch_id, "CUS-901", None);
    let there = add_customer(&b, Uuid::new_v4(), "CUS-902", None);
    let here_loan = active_loan(&b, here, 500, 5);
    let there_loan = active_loan(&b, there, 500, 5);

    pay(&b, here_loan, Money::from_major(100));
    pay(&b, there_loan, Money::from_major(100));
    b.time.test_control().unwrap().advance(Duration::hours(2));
    pay(&b, here_loan, Money::from_major(50));

    let manager = Actor::branch_manager(Uuid::new_v4(), b.branch_id);
    let page = b
        .book
        .repayments()
        .list_repayments(&manager, &RepaymentFilter::default(), PageRequest::default())
        .unwrap();
    assert_eq!(page.total, 2);
    // newest paid first
    assert_eq!(page.items[0].repayment.amount, Money::from_major(50));

    let by_loan = b
        .book
        .repayments()
        .list_repayments(
            &b.admin,
            &RepaymentFilter {
                loan_id: Some(there_loan),
                ..RepaymentFilter::default()
            },
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(by_loan.total, 1);
}

#[test]
fn test_audit_trail() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-950", None);
    let loan_id = active_loan(&b, customer, 1_000, 10);
    let receipt = pay(&b, loan_id, Money::from_major(100));
    b.book
        .repayments()
        .delete_repayment(&b.admin, receipt.repayment.repayment.id)
        .unwrap();

    let trail = b.audit.entity_trail(EntityKind::Loan, loan_id);
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::LoanDisbursed,
            AuditAction::LoanStatusUpdated,
            AuditAction::LoanStatusUpdated,
            AuditAction::LoanCreated,
        ]
    );
    assert!(trail[3].before.is_none());
    assert_eq!(trail[0].after.as_ref().unwrap()["status"], "ACTIVE");

    let (repayment_events, total) = b.audit.query(&AuditQuery {
        entity: Some(EntityKind::Repayment),
        ..AuditQuery::default()
    });
    assert_eq!(total, 2);
    assert_eq!(repayment_events[0].action, AuditAction::RepaymentDeleted);
    assert!(repayment_events.iter().all(|e| e.actor_id == b.admin.user_id));

    // failed operations leave no trace
    let before = b.audit.len();
    assert!(b
        .book
        .loans()
        .update_status(&b.admin, loan_id, LoanStatus::Draft, None)
        .is_err());
    assert_eq!(b.audit.len(), before);
}

#[test]
fn test_audit_failure_does_not_fail_operation() {
    let (tx, rx) = mpsc::channel();
    drop(rx);
    let store = Arc::new(MemoryStore::new());
    let customer_id = Uuid::new_v4();
    let branch_id = Uuid::new_v4();
    store.seed_branch(Branch {
        id: branch_id,
        code: "LIR".to_string(),
        name: "Lira".to_string(),
        deleted_at: None,
    });
    store.seed_customer(Customer {
        id: customer_id,
        code: "CUS-999".to_string(),
        first_name: "Sarah".to_string(),
        last_name: "Apio".to_string(),
        branch_id,
        current_officer_id: None,
        deleted_at: None,
    });
    let book = LoanBook::builder()
        .store(store)
        .audit_sink(Arc::new(ChannelSink::new(tx)))
        .build()
        .unwrap();

    let admin = Actor::admin(Uuid::new_v4());
    let view = book
        .loans()
        .create_loan(
            &admin,
            NewLoan::new(customer_id, Money::from_major(200), 2, TermUnit::Month, start()),
        )
        .unwrap();
    assert!(book.loans().get_loan(&admin, view.loan.id).is_ok());
}

#[test]
fn test_audit_events_reach_channel_consumer() {
    let (tx, rx) = mpsc::channel();
    let store = Arc::new(MemoryStore::new());
    let book = LoanBook::builder()
        .store(store)
        .audit_sink(Arc::new(ChannelSink::new(tx)))
        .build()
        .unwrap();

    let admin = Actor::admin(Uuid::new_v4());
    let loan_type = book
        .loan_types()
        .create_loan_type(
            &admin,
            NewLoanType::new("Boda boda", Money::from_major(800), Money::from_major(3_000)),
        )
        .unwrap();
    book.loan_types().toggle_status(&admin, loan_type.id).unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, AuditAction::LoanTypeCreated);
    assert_eq!(events[1].action, AuditAction::LoanTypeStatusToggled);
    assert_eq!(events[1].entity, EntityKind::LoanType);
    assert_eq!(events[1].after.as_ref().unwrap()["is_active"], false);
}

#[test]
fn test_listing_far_past_the_last_page_is_empty() {
    let b = setup();
    let customer = add_customer(&b, b.branch_id, "CUS-990", None);
    active_loan(&b, customer, 500, 5);

    let loans = b
        .book
        .loans()
        .list_loans(&b.admin, &LoanFilter::default(), PageRequest::new(usize::MAX, 50))
        .unwrap();
    assert_eq!(loans.total, 1);
    assert!(loans.items.is_empty());

    let repayments = b
        .book
        .repayments()
        .list_repayments(&b.admin, &RepaymentFilter::default(), PageRequest::new(usize::MAX, 50))
        .unwrap();
    assert!(repayments.items.is_empty());
}

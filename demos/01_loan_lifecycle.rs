/// loan lifecycle - from draft to completion, with a product, an officer and overdue tracking
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microloan_book::{
    Actor, Branch, Customer, EntityKind, EventStore, LoanBook, LoanStatus, MemoryStore, Money,
    NewLoan, NewLoanType, NewRepayment, Rate, RepaymentMethod, Role, SafeTimeProvider,
    StaffUser, TermUnit, TimeSource, Uuid,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== loan lifecycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(MemoryStore::new());
    let branch_id = Uuid::new_v4();
    store.seed_branch(Branch {
        id: branch_id,
        code: "MBR".to_string(),
        name: "Mbarara".to_string(),
        deleted_at: None,
    });
    let officer_id = Uuid::new_v4();
    store.seed_staff_user(StaffUser {
        id: officer_id,
        email: "officer@mbarara.example.org".to_string(),
        role: Role::CreditOfficer,
        branch_id: Some(branch_id),
        is_active: true,
        deleted_at: None,
    });
    let customer_id = Uuid::new_v4();
    store.seed_customer(Customer {
        id: customer_id,
        code: "CUS-042".to_string(),
        first_name: "Joseph".to_string(),
        last_name: "Tumusiime".to_string(),
        branch_id,
        current_officer_id: None,
        deleted_at: None,
    });

    let audit = Arc::new(EventStore::new());
    let book = LoanBook::builder()
        .store(store)
        .audit_sink(audit.clone())
        .set_time(&time)
        .build()?;

    let admin = Actor::admin(Uuid::new_v4());
    let manager = Actor::branch_manager(Uuid::new_v4(), branch_id);

    // 1. product
    println!("1. loan product");
    println!("---------------");
    let product = book.loan_types().create_loan_type(
        &admin,
        NewLoanType::new("Small business", Money::from_major(500), Money::from_major(5_000)),
    )?;
    println!("  {} ({} - {})", product.name, product.min_amount, product.max_amount);

    // 2. origination
    println!("\n2. origination");
    println!("--------------");
    let loans = book.loans();
    let loan = loans.create_loan(
        &manager,
        NewLoan::new(
            customer_id,
            Money::from_major(1_200),
            6,
            TermUnit::Month,
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        )
        .loan_type(product.id)
        .interest_rate(Rate::from_percentage(dec!(24)))
        .notes("stock for a hardware shop"),
    )?;
    let id = loan.loan.id;
    println!("  {} for {:?}: {}", loan.loan.loan_number, loan.customer_name, loan.loan.status);

    for item in loans.schedule(&manager, id)? {
        println!(
            "    #{} due {} principal {} interest {} total {}",
            item.item.sequence,
            item.item.due_date.format("%Y-%m-%d"),
            item.item.principal_due,
            item.item.interest_due,
            item.item.total_due
        );
    }

    // 3. approval, disbursement, assignment
    println!("\n3. approval and disbursement");
    println!("----------------------------");
    loans.update_status(&manager, id, LoanStatus::PendingApproval, Some("documents verified"))?;
    loans.update_status(&manager, id, LoanStatus::Approved, None)?;
    let active = loans.disburse(&manager, id, None)?;
    println!("  status: {}", active.loan.status);
    println!("  disbursed at: {:?}", active.loan.disbursed_at);

    loans.assign(&manager, id, officer_id, Some("field follow-up".to_string()))?;
    println!("  assigned to officer {}", officer_id);

    // 4. servicing: a missed month
    println!("\n4. servicing");
    println!("------------");
    controller.advance(Duration::days(45));
    let officer = Actor::credit_officer(officer_id, branch_id);
    let flagged = loans.mark_overdue(&officer, id)?;
    let summary = loans.summary(&officer, id)?;
    println!("  {} installment(s) overdue, {} owing", flagged, summary.overdue_amount);

    let receipt = book.repayments().create_repayment(
        &officer,
        NewRepayment::new(id, summary.total_expected, RepaymentMethod::MobileMoney)
            .reference("MM-20240222-88"),
    )?;
    println!("  paid {} in full: loan is {}", receipt.allocated, receipt.loan_status);

    // 5. audit trail
    println!("\n5. audit trail");
    println!("--------------");
    for event in audit.entity_trail(EntityKind::Loan, id).iter().rev() {
        println!("  {} {} by {}", event.recorded_at.format("%Y-%m-%d %H:%M"), event.action, event.actor_id);
    }

    Ok(())
}

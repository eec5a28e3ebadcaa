/// repayment reversal - the 24 hour correction window
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use microloan_book::{
    Actor, Branch, Customer, LoanBook, LoanStatus, MemoryStore, Money, NewLoan, NewRepayment,
    RepaymentChanges, RepaymentMethod, SafeTimeProvider, TermUnit, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== repayment reversal ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(MemoryStore::new());
    let branch_id = Uuid::new_v4();
    store.seed_branch(Branch {
        id: branch_id,
        code: "ARU".to_string(),
        name: "Arua".to_string(),
        deleted_at: None,
    });
    let customer_id = Uuid::new_v4();
    store.seed_customer(Customer {
        id: customer_id,
        code: "CUS-310".to_string(),
        first_name: "Esther".to_string(),
        last_name: "Akello".to_string(),
        branch_id,
        current_officer_id: None,
        deleted_at: None,
    });

    let book = LoanBook::builder().store(store).set_time(&time).build()?;
    let manager = Actor::branch_manager(Uuid::new_v4(), branch_id);

    let loans = book.loans();
    let loan = loans.create_loan(
        &manager,
        NewLoan::new(customer_id, Money::from_major(800), 8, TermUnit::Week, time.now()),
    )?;
    let id = loan.loan.id;
    loans.update_status(&manager, id, LoanStatus::PendingApproval, None)?;
    loans.update_status(&manager, id, LoanStatus::Approved, None)?;
    loans.disburse(&manager, id, None)?;

    // an amount keyed in wrong
    let repayments = book.repayments();
    let wrong = repayments.create_repayment(
        &manager,
        NewRepayment::new(id, Money::from_major(350), RepaymentMethod::Cash),
    )?;
    print_schedule(&book, &manager, id)?;

    // fix the reference a few hours later
    controller.advance(Duration::hours(3));
    repayments.update_repayment(
        &manager,
        wrong.repayment.repayment.id,
        RepaymentChanges {
            reference: Some("RCPT-0192".to_string()),
            ..RepaymentChanges::default()
        },
    )?;

    // reverse it inside the window
    let reversal = repayments.delete_repayment(&manager, wrong.repayment.repayment.id)?;
    println!(
        "\nreversed {} across {} installment(s), loan {}",
        reversal.reversed, reversal.allocations_removed, reversal.loan_status
    );

    let right = repayments.create_repayment(
        &manager,
        NewRepayment::new(id, Money::from_major(150), RepaymentMethod::Cash),
    )?;
    print_schedule(&book, &manager, id)?;

    // a day later the window is closed
    controller.advance(Duration::hours(25));
    match repayments.delete_repayment(&manager, right.repayment.repayment.id) {
        Ok(_) => println!("\nunexpected: reversal accepted"),
        Err(err) => println!("\nreversal refused: {}", err),
    }

    Ok(())
}

fn print_schedule(
    book: &LoanBook,
    actor: &Actor,
    id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    println!();
    for item in book.loans().schedule(actor, id)? {
        println!(
            "  #{} {:?} paid {} of {}",
            item.item.sequence, item.item.status, item.item.paid_amount, item.item.total_due
        );
    }
    Ok(())
}

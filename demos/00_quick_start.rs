/// quick start - minimal example to get started
use std::sync::Arc;

use chrono::Utc;
use microloan_book::{
    Actor, Branch, Customer, LoanBook, LoanStatus, MemoryStore, Money, NewLoan, NewRepayment,
    RepaymentMethod, TermUnit, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // a customer registered at some branch
    let store = Arc::new(MemoryStore::new());
    let branch_id = Uuid::new_v4();
    store.seed_branch(Branch {
        id: branch_id,
        code: "KLA".to_string(),
        name: "Kampala".to_string(),
        deleted_at: None,
    });
    let customer_id = Uuid::new_v4();
    store.seed_customer(Customer {
        id: customer_id,
        code: "CUS-001".to_string(),
        first_name: "Grace".to_string(),
        last_name: "Nakato".to_string(),
        branch_id,
        current_officer_id: None,
        deleted_at: None,
    });

    let book = LoanBook::builder().store(store).build()?;
    let admin = Actor::admin(Uuid::new_v4());

    // 1000 over 10 months
    let loans = book.loans();
    let loan = loans.create_loan(
        &admin,
        NewLoan::new(customer_id, Money::from_major(1_000), 10, TermUnit::Month, Utc::now()),
    )?;
    let id = loan.loan.id;

    // approve and disburse
    loans.update_status(&admin, id, LoanStatus::PendingApproval, None)?;
    loans.update_status(&admin, id, LoanStatus::Approved, None)?;
    loans.disburse(&admin, id, None)?;

    // make a payment
    book.repayments().create_repayment(
        &admin,
        NewRepayment::new(id, Money::from_major(250), RepaymentMethod::Cash),
    )?;

    // print current state
    println!("{}", loans.summary(&admin, id)?.to_json_pretty()?);

    Ok(())
}

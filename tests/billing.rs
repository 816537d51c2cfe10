//! Financial aggregator tests: spend figures, invoice views, and invoice
//! status changes.

use std::sync::Arc;

use rust_decimal_macros::dec;
use tadqiq::{
    Actor, AdminData, ClientData, Engine, EngineConfig, ExpertData, FinancialAggregator,
    InvoiceQuery, InvoiceStatus, Ledger, MemoryLedger, NewRequest, Offering, PoolMatcher,
    RecordingNotifier, Request, RequestStatus, Role, RoleProfile, TadqiqError, Transition, User,
    UserId, VatCalculator,
};
use uuid::Uuid;

struct Harness {
    ledger: Arc<MemoryLedger>,
    engine: Engine,
    pool: PoolMatcher,
    billing: FinancialAggregator,
    client: Actor,
    expert: Actor,
    admin: Actor,
}

async fn harness() -> Harness {
    let config = EngineConfig {
        paid_on_creation: true,
        ..EngineConfig::default()
    };
    let ledger = Arc::new(MemoryLedger::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let client = Actor::new(UserId(Uuid::new_v4()), Role::Client);
    let expert = Actor::new(UserId(Uuid::new_v4()), Role::Expert);
    let admin = Actor::new(UserId(Uuid::new_v4()), Role::Admin);
    for user in [
        User {
            id: client.user_id,
            display_name: "Rawabi Foods".into(),
            profile: RoleProfile::Client(ClientData {
                company_name: Some("Rawabi Foods LLC".into()),
                vat_number: Some("310123456700003".into()),
            }),
        },
        User {
            id: expert.user_id,
            display_name: "Imran (auditor)".into(),
            profile: RoleProfile::Expert(ExpertData {
                approved: true,
                specialties: vec!["zakat".into()],
            }),
        },
        User {
            id: admin.user_id,
            display_name: "Ops".into(),
            profile: RoleProfile::Admin(AdminData::default()),
        },
    ] {
        ledger.create_user(user).await.unwrap();
    }

    let engine = Engine::new(ledger.clone(), notifier.clone(), config.clone());
    let pool = PoolMatcher::new(ledger.clone(), notifier.clone(), config.clone());
    let billing = FinancialAggregator::new(ledger.clone(), VatCalculator::new(config.vat_rate));

    Harness {
        ledger,
        engine,
        pool,
        billing,
        client,
        expert,
        admin,
    }
}

async fn submit(h: &Harness, client: Actor, offering: Offering, base: rust_decimal::Decimal) -> Request {
    h.engine
        .submit(
            client,
            NewRequest {
                client_id: client.user_id,
                offering,
                base_amount: base,
                currency: None,
            },
        )
        .await
        .unwrap()
}

/// Pool-accept and drive straight through to completion.
async fn complete(h: &Harness, request: &Request) -> Request {
    h.pool.accept(request.id, h.expert).await.unwrap();
    for transition in [
        Transition::StartWork,
        Transition::SubmitForReview,
        Transition::ClientApprove,
        Transition::AdminApprove,
    ] {
        let actor = match transition {
            Transition::StartWork | Transition::SubmitForReview => h.expert,
            Transition::ClientApprove => h.client,
            _ => h.admin,
        };
        h.engine.transition(actor, request.id, transition).await.unwrap();
    }
    h.ledger.get_request(request.id).await.unwrap()
}

fn plan(name: &str) -> Offering {
    Offering::Plan {
        id: Uuid::new_v4(),
        name: name.into(),
    }
}

#[test_log::test(tokio::test)]
async fn cancelled_requests_are_excluded_from_spend() {
    let h = harness().await;

    let completed = submit(&h, h.client, plan("Monthly bookkeeping"), dec!(1000.00)).await;
    complete(&h, &completed).await;

    let cancelled = submit(&h, h.client, plan("Annual audit"), dec!(2000.00)).await;
    h.engine
        .transition(h.client, cancelled.id, Transition::Cancel)
        .await
        .unwrap();

    // [1000 completed, 2000 cancelled] -> 1000 * 1.15
    let spend = h.billing.client_spend(h.client, h.client.user_id).await.unwrap();
    assert_eq!(spend, dec!(1150.00));
}

#[test_log::test(tokio::test)]
async fn in_flight_requests_count_toward_spend_but_unpaid_ones_do_not() {
    let h = harness().await;

    let completed = submit(&h, h.client, plan("Monthly bookkeeping"), dec!(1000.00)).await;
    complete(&h, &completed).await;

    // Matched but not finished: already committed spend.
    let in_flight = submit(&h, h.client, plan("Payroll review"), dec!(200.00)).await;
    h.pool.accept(in_flight.id, h.expert).await.unwrap();

    let spend = h.billing.client_spend(h.client, h.client.user_id).await.unwrap();
    assert_eq!(spend, dec!(1380.00));

    // A request still awaiting payment confirmation is not spend. Build one
    // via an engine whose policy starts at PendingPayment.
    let unpaid_engine = Engine::new(
        h.ledger.clone(),
        Arc::new(RecordingNotifier::new()),
        EngineConfig::default(),
    );
    let unpaid = unpaid_engine
        .submit(
            h.client,
            NewRequest {
                client_id: h.client.user_id,
                offering: plan("Future engagement"),
                base_amount: dec!(9999.00),
                currency: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(unpaid.status, RequestStatus::PendingPayment);

    let spend = h.billing.client_spend(h.client, h.client.user_id).await.unwrap();
    assert_eq!(spend, dec!(1380.00));
}

#[test_log::test(tokio::test)]
async fn spend_is_visible_to_its_client_and_admins_only() {
    let h = harness().await;

    assert!(h
        .billing
        .client_spend(h.admin, h.client.user_id)
        .await
        .is_ok());

    let as_expert = h.billing.client_spend(h.expert, h.client.user_id).await;
    assert!(matches!(as_expert, Err(TadqiqError::Forbidden(_))));

    let other_client = Actor::new(UserId(Uuid::new_v4()), Role::Client);
    let peeking = h.billing.client_spend(other_client, h.client.user_id).await;
    assert!(matches!(peeking, Err(TadqiqError::Forbidden(_))));
}

#[test_log::test(tokio::test)]
async fn invoice_views_resolve_description_and_vat_breakdown() {
    let h = harness().await;

    let request = submit(&h, h.client, plan("Quarterly VAT filing"), dec!(500.00)).await;
    complete(&h, &request).await;

    let views = h
        .billing
        .list_invoices(h.client, InvoiceQuery::default())
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.invoice.amount, dec!(575.00));
    assert_eq!(view.vat_amount, dec!(75.00));
    assert_eq!(view.description, "Quarterly VAT filing");
    assert_eq!(view.invoice.currency, "SAR");

    // Display math never touches the stored amount: list again, same values.
    let again = h
        .billing
        .list_invoices(h.client, InvoiceQuery::default())
        .await
        .unwrap();
    assert_eq!(again[0].invoice.amount, dec!(575.00));
    assert_eq!(again[0].vat_amount, dec!(75.00));

    // Custom offerings fall back to their free-text description.
    let custom = submit(
        &h,
        h.client,
        Offering::Custom {
            description: "Transfer pricing memo".into(),
        },
        dec!(100.00),
    )
    .await;
    complete(&h, &custom).await;
    let views = h
        .billing
        .list_invoices(h.client, InvoiceQuery::default())
        .await
        .unwrap();
    assert!(views.iter().any(|v| v.description == "Transfer pricing memo"));
}

#[test_log::test(tokio::test)]
async fn invoice_visibility_follows_roles() {
    let h = harness().await;
    let request = submit(&h, h.client, plan("Monthly bookkeeping"), dec!(100.00)).await;
    complete(&h, &request).await;

    // Another client with their own invoice sees only theirs.
    let other = Actor::new(UserId(Uuid::new_v4()), Role::Client);
    h.ledger
        .create_user(User {
            id: other.user_id,
            display_name: "Second Client".into(),
            profile: RoleProfile::Client(ClientData::default()),
        })
        .await
        .unwrap();
    let theirs = submit(&h, other, plan("Annual audit"), dec!(700.00)).await;
    // Complete with the other client approving their own request.
    h.pool.accept(theirs.id, h.expert).await.unwrap();
    h.engine
        .transition(h.expert, theirs.id, Transition::StartWork)
        .await
        .unwrap();
    h.engine
        .transition(h.expert, theirs.id, Transition::SubmitForReview)
        .await
        .unwrap();
    h.engine
        .transition(other, theirs.id, Transition::ClientApprove)
        .await
        .unwrap();
    h.engine
        .transition(h.admin, theirs.id, Transition::AdminApprove)
        .await
        .unwrap();

    let mine = h
        .billing
        .list_invoices(h.client, InvoiceQuery::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].invoice.client_id, h.client.user_id);

    let all = h
        .billing
        .list_invoices(h.admin, InvoiceQuery::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let scoped = h
        .billing
        .list_invoices(
            h.admin,
            InvoiceQuery {
                client_id: Some(other.user_id),
            },
        )
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].invoice.client_id, other.user_id);

    let refused = h.billing.list_invoices(h.expert, InvoiceQuery::default()).await;
    assert!(matches!(refused, Err(TadqiqError::Forbidden(_))));
}

#[test_log::test(tokio::test)]
async fn invoice_status_is_the_only_mutable_field() {
    let h = harness().await;
    let request = submit(&h, h.client, plan("Monthly bookkeeping"), dec!(100.00)).await;
    complete(&h, &request).await;

    let invoice = h
        .billing
        .list_invoices(h.admin, InvoiceQuery::default())
        .await
        .unwrap()
        .remove(0)
        .invoice;
    assert_eq!(invoice.status, InvoiceStatus::Issued);

    // Non-admins may not settle invoices.
    let refused = h.billing.mark_paid(h.client, invoice.id).await;
    assert!(matches!(refused, Err(TadqiqError::Forbidden(_))));

    let paid = h.billing.mark_paid(h.admin, invoice.id).await.unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    // Amount untouched by the status change.
    assert_eq!(paid.amount, invoice.amount);

    // Paid is terminal: neither settling again nor voiding is legal.
    let again = h.billing.mark_paid(h.admin, invoice.id).await;
    assert!(matches!(
        again,
        Err(TadqiqError::InvalidInvoiceTransition { .. })
    ));
    let voided = h.billing.void(h.admin, invoice.id).await;
    assert!(matches!(
        voided,
        Err(TadqiqError::InvalidInvoiceTransition { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn spend_reflects_every_status_write_immediately() {
    let h = harness().await;

    let request = submit(&h, h.client, plan("Monthly bookkeeping"), dec!(400.00)).await;
    let spend = h.billing.client_spend(h.client, h.client.user_id).await.unwrap();
    assert_eq!(spend, dec!(460.00));

    // Cancelling drops it from the aggregate on the very next read.
    h.engine
        .transition(h.client, request.id, Transition::Cancel)
        .await
        .unwrap();
    let spend = h.billing.client_spend(h.client, h.client.user_id).await.unwrap();
    assert_eq!(spend, dec!(0.00));
}

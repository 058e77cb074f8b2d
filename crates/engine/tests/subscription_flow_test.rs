//! End-to-end subscription flows against in-memory stores
//!
//! Run with: cargo test -p newsletter-engine --test subscription_flow_test

use std::sync::Arc;

use chrono::{Duration, Utc};

use newsletter_engine::clock::{Clock, ManualClock};
use newsletter_engine::notify::InMemoryNotifier;
use newsletter_engine::persistence::{
    ExecutionStore, InMemoryExecutionStore, InMemoryMembershipStore, MembershipStore,
};
use newsletter_engine::{
    EngineConfig, EngineError, ExecutionEvent, ExecutionState, Intent, MembershipRecord,
    NotificationStatus, ResumeSignal, SubscriptionEngine, SubscriptionRequest, TerminalOutcome,
};

const CALLBACK: &str = "https://news.example.com/confirm";

struct TestEnv {
    engine: Arc<SubscriptionEngine>,
    store: Arc<InMemoryExecutionStore>,
    members: Arc<InMemoryMembershipStore>,
    notifier: Arc<InMemoryNotifier>,
    clock: Arc<ManualClock>,
}

fn env_with_members(members: Vec<&str>) -> TestEnv {
    let clock = Arc::new(ManualClock::default());
    let now = Utc::now();
    let store = Arc::new(InMemoryExecutionStore::new());
    let members = Arc::new(InMemoryMembershipStore::with_members(
        members.into_iter().map(|m| MembershipRecord::new(m, now)),
    ));
    let notifier = Arc::new(InMemoryNotifier::new());

    let engine = SubscriptionEngine::new(store.clone(), members.clone(), notifier.clone())
        .with_config(EngineConfig::default())
        .with_clock(clock.clone());

    TestEnv {
        engine: Arc::new(engine),
        store,
        members,
        notifier,
        clock,
    }
}

fn env() -> TestEnv {
    env_with_members(vec![])
}

#[test_log::test(tokio::test)]
async fn test_join_round_trip() {
    let env = env();

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    assert!(handle.admissible);
    assert_eq!(env.notifier.sent_count(), 1);

    let token = env.notifier.last_token().unwrap();
    let result = env
        .engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();

    assert_eq!(result.execution_id, handle.execution_id);
    assert_eq!(result.outcome, TerminalOutcome::Completed);
    assert_eq!(result.intent, Intent::Join);

    let record = env.members.get("a@x.com").await.unwrap().unwrap();
    assert_eq!(record.joined_at, env.clock.now());
}

#[test_log::test(tokio::test)]
async fn test_join_then_leave_restores_membership() {
    let env = env();

    env.engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();
    env.engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();
    assert!(env.members.contains("a@x.com"));

    let handle = env
        .engine
        .start(SubscriptionRequest::leave("a@x.com", CALLBACK))
        .await
        .unwrap();
    assert!(handle.admissible);

    let leave = env.notifier.last().unwrap();
    assert_eq!(leave.intent, Intent::Leave);
    assert_eq!(leave.subject(), "We are sorry to see you go :(");

    let token = env.notifier.last_token().unwrap();
    let result = env
        .engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(result.outcome, TerminalOutcome::Completed);
    assert_eq!(result.intent, Intent::Leave);
    assert_eq!(env.members.member_count(), 0);
}

#[tokio::test]
async fn test_join_when_already_member_is_discarded() {
    let env = env_with_members(vec!["a@x.com"]);

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();

    assert!(!handle.admissible);
    assert_eq!(handle.state, ExecutionState::Discarded);
    assert_eq!(handle.outcome(), Some(TerminalOutcome::Discarded));
    assert_eq!(handle.notification, NotificationStatus::Skipped);
    assert_eq!(env.notifier.sent_count(), 0);
    assert_eq!(env.store.token_count(), 0);
    assert!(env.members.contains("a@x.com"));
}

#[tokio::test]
async fn test_leave_when_member_is_admissible() {
    let env = env_with_members(vec!["a@x.com"]);

    let handle = env
        .engine
        .start(SubscriptionRequest::leave("a@x.com", CALLBACK))
        .await
        .unwrap();

    assert!(handle.admissible);
    assert_eq!(handle.state, ExecutionState::Suspended);
    assert_eq!(env.store.token_count(), 1);
}

#[tokio::test]
async fn test_token_is_single_use() {
    let env = env();

    env.engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();

    env.engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();

    let second = env.engine.resume(&token, ResumeSignal::Confirmed).await;
    assert!(matches!(second, Err(EngineError::InvalidTokenState)));
    assert_eq!(env.members.member_count(), 1);
}

#[tokio::test]
async fn test_confirmation_two_days_late_expires() {
    let env = env();

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();

    env.clock.advance(Duration::days(2));

    let result = env
        .engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(result.outcome, TerminalOutcome::Expired);
    assert_eq!(env.members.member_count(), 0);

    let execution = env.engine.get_execution(handle.execution_id).await.unwrap();
    assert_eq!(execution.state, ExecutionState::Expired);

    let history = env.engine.history(handle.execution_id).await.unwrap();
    assert!(matches!(
        history.last(),
        Some((_, ExecutionEvent::Expired { .. }))
    ));

    let again = env.engine.resume(&token, ResumeSignal::Confirmed).await;
    assert!(matches!(again, Err(EngineError::InvalidTokenState)));
}

#[tokio::test]
async fn test_notification_contains_link_and_subject() {
    let env = env();

    env.engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();

    let sent = env.notifier.last().unwrap();
    let token = env.notifier.last_token().unwrap();
    assert_eq!(sent.subject(), "Welcome to our fancy newsletter");
    assert_eq!(sent.confirmation_url, format!("{}?token={}", CALLBACK, token));
    assert_eq!(
        sent.text_body(),
        format!("Please click on the link: {}", sent.confirmation_url)
    );
}

#[tokio::test]
async fn test_notification_failure_then_expiry() {
    let env = env();
    env.notifier.set_failing(true);

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    assert_eq!(handle.state, ExecutionState::Suspended);
    assert!(matches!(
        handle.notification,
        NotificationStatus::Failed { .. }
    ));

    env.clock.advance(Duration::hours(25));
    let expired = env.engine.expire_overdue().await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].execution_id, handle.execution_id);
}

#[tokio::test]
async fn test_membership_store_outage_during_validation() {
    let env = env();
    env.members.set_unavailable(true);

    let result = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await;
    assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
    assert_eq!(env.notifier.sent_count(), 0);

    let live = env.store.find_live_for_identity("a@x.com").await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].state, ExecutionState::Validating);

    env.members.set_unavailable(false);
    let handle = env.engine.retry_validation(live[0].id).await.unwrap();
    assert_eq!(handle.state, ExecutionState::Suspended);
    assert_eq!(env.notifier.sent_count(), 1);
}

#[tokio::test]
async fn test_membership_store_outage_during_commit_keeps_token() {
    let env = env();

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();

    env.members.set_unavailable(true);
    let result = env.engine.resume(&token, ResumeSignal::Confirmed).await;
    assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));

    let history = env.engine.history(handle.execution_id).await.unwrap();
    assert!(history
        .iter()
        .any(|(_, e)| matches!(e, ExecutionEvent::CommitRolledBack { .. })));

    env.members.set_unavailable(false);
    let result = env
        .engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(result.outcome, TerminalOutcome::Completed);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_resumes_commit_exactly_once() {
    let env = env();

    env.engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = env.engine.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            engine.resume(&token, ResumeSignal::Confirmed).await
        }));
    }

    let mut completed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert_eq!(result.outcome, TerminalOutcome::Completed);
                completed += 1;
            }
            Err(EngineError::InvalidTokenState) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(rejected, 7);
    assert_eq!(env.members.member_count(), 1);
}

#[tokio::test]
async fn test_sweep_races_with_confirmation() {
    let env = env();

    let handle = env
        .engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    let token = env.notifier.last_token().unwrap();

    env.clock.advance(Duration::days(1) + Duration::seconds(1));

    let expired = env.engine.expire_overdue().await.unwrap();
    assert_eq!(expired.len(), 1);

    let late = env.engine.resume(&token, ResumeSignal::Confirmed).await;
    assert!(matches!(late, Err(EngineError::InvalidTokenState)));

    let execution = env.engine.get_execution(handle.execution_id).await.unwrap();
    assert_eq!(execution.state, ExecutionState::Expired);
    assert_eq!(env.members.member_count(), 0);
}

#[tokio::test]
async fn test_custom_confirmation_window() {
    let clock = Arc::new(ManualClock::default());
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = SubscriptionEngine::new(
        Arc::new(InMemoryExecutionStore::new()),
        Arc::new(InMemoryMembershipStore::new()),
        notifier.clone(),
    )
    .with_config(EngineConfig {
        confirmation_window: Duration::minutes(15),
        ..EngineConfig::default()
    })
    .with_clock(clock.clone());

    let handle = engine
        .start(SubscriptionRequest::join("a@x.com", CALLBACK))
        .await
        .unwrap();
    assert_eq!(handle.expires_at, Some(clock.now() + Duration::minutes(15)));

    clock.advance(Duration::minutes(16));
    let token = notifier.last_token().unwrap();
    let result = engine
        .resume(&token, ResumeSignal::Confirmed)
        .await
        .unwrap();
    assert_eq!(result.outcome, TerminalOutcome::Expired);
}

#[tokio::test]
async fn test_get_unknown_execution() {
    let env = env();
    let result = env.engine.get_execution(uuid::Uuid::now_v7()).await;
    assert!(matches!(result, Err(EngineError::ExecutionNotFound(_))));
}

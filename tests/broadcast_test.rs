//! End-to-end runs through `BroadcastService` with in-memory stores.

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use common::{email_recipients, recipients, Harness, InMemoryUserStore, RecordingEmail, ScriptedTelegram};
use tgcast::broadcast::model::{BroadcastPayload, BroadcastRequest, ChannelSelection, Counts, RunStatus};
use tgcast::broadcast::{AudienceResolver, BroadcastError, Channel, DeliveryError, UserStore};
use tgcast::core::BroadcastSettings;

fn telegram_request(target: &str) -> BroadcastRequest {
    BroadcastRequest {
        channel: ChannelSelection::Telegram,
        target: target.to_string(),
        email_target: None,
        payload: BroadcastPayload {
            text: Some("<b>News</b>".to_string()),
            ..Default::default()
        },
    }
}

fn both_request(target: &str, email_target: Option<&str>) -> BroadcastRequest {
    BroadcastRequest {
        channel: ChannelSelection::Both,
        target: target.to_string(),
        email_target: email_target.map(str::to_string),
        payload: BroadcastPayload {
            text: Some("News".to_string()),
            media: None,
            email_subject: Some("News".to_string()),
            email_html: Some("<p>News</p>".to_string()),
        },
    }
}

fn counts(total: u64, sent: u64, failed: u64, blocked: u64) -> Counts {
    Counts {
        total,
        sent,
        failed,
        blocked,
    }
}

#[tokio::test]
async fn test_tariff_audience_all_sent_completes() {
    let users = InMemoryUserStore::new().with_audience("tariff_7", recipients(&[11, 12, 13]));
    let harness = Harness::new(users, ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("tariff_7")).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counts, counts(3, 3, 0, 0));
    assert!(finished.completed_at.is_some());
    assert_eq!(harness.telegram.delivered(), vec![11, 12, 13]);
}

#[tokio::test]
async fn test_both_channels_aggregate_into_one_run() {
    let users = InMemoryUserStore::new()
        .with_audience("all", recipients(&[1, 2, 3, 4, 5]))
        .with_audience("all_email", email_recipients(&[(1, "a@example.com"), (6, "b@example.com")]));
    let harness = Harness::new(users, ScriptedTelegram::new().blocked(3));

    let run = harness.service.submit(both_request("all", None)).await.unwrap();
    assert_eq!(run.email_selector.as_deref(), Some("all_email"));

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Partial);
    assert_eq!(finished.counts, counts(7, 6, 0, 1));

    let mut sent = harness.email.sent();
    sent.sort();
    assert_eq!(sent, vec!["a@example.com".to_string(), "b@example.com".to_string()]);
}

#[tokio::test]
async fn test_counters_never_exceed_total() {
    let users = InMemoryUserStore::new()
        .with_audience("all", recipients(&[1, 2, 3, 4, 5]))
        .with_audience("email_active", email_recipients(&[(1, "a@example.com"), (2, "b@example.com")]));
    let telegram = ScriptedTelegram::new()
        .blocked(2)
        .script(4, vec![Err(DeliveryError::RecipientPermanentError("bad markup".to_string()))]);
    let email = RecordingEmail::new().rejecting("b@example.com");
    let harness = Harness::with_email(users, telegram, email, BroadcastSettings::unthrottled());

    let run = harness
        .service
        .submit(both_request("all", Some("email_active")))
        .await
        .unwrap();
    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.counts, counts(7, 4, 1, 2));

    let history = harness.runs.history(run.id);
    assert!(!history.is_empty());
    let mut total_seen = None;
    for (snapshot, _) in &history {
        assert!(snapshot.attempted() <= snapshot.total, "{:?}", snapshot);
        if snapshot.total > 0 {
            // total is fixed once resolved
            assert_eq!(*total_seen.get_or_insert(snapshot.total), snapshot.total);
        }
    }
    assert_eq!(finished.counts.attempted(), finished.counts.total);
}

#[tokio::test]
async fn test_every_recipient_failing_fails_the_run() {
    let users = InMemoryUserStore::new().with_audience("trial", recipients(&[1, 2]));
    let permanent = || vec![Err(DeliveryError::RecipientPermanentError("chat not writable".to_string()))];
    let telegram = ScriptedTelegram::new().script(1, permanent()).script(2, permanent());
    let harness = Harness::new(users, telegram);

    let run = harness.service.submit(telegram_request("trial")).await.unwrap();
    let finished = harness.service.wait(run.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(finished.counts, counts(2, 0, 2, 0));
}

#[tokio::test]
async fn test_empty_audience_completes() {
    let harness = Harness::new(InMemoryUserStore::new(), ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("custom_today")).await.unwrap();
    let finished = harness.service.wait(run.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counts, Counts::default());
}

#[tokio::test]
async fn test_unknown_selector_is_rejected_without_a_run() {
    let harness = Harness::new(InMemoryUserStore::new(), ScriptedTelegram::new());

    let err = harness.service.submit(telegram_request("everyone")).await.unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidSelector(_)));

    let err = harness.service.submit(telegram_request("tariff_99")).await.unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidSelector(_)));

    // email token on the telegram channel
    let err = harness.service.submit(telegram_request("all_email")).await.unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidSelector(_)));

    assert_eq!(harness.runs.run_count(), 0);
}

#[tokio::test]
async fn test_payload_not_fitting_channel_is_rejected() {
    let harness = Harness::new(InMemoryUserStore::new(), ScriptedTelegram::new());
    let request = BroadcastRequest {
        channel: ChannelSelection::Email,
        target: "all_email".to_string(),
        email_target: None,
        payload: BroadcastPayload {
            text: Some("no subject".to_string()),
            ..Default::default()
        },
    };

    let err = harness.service.submit(request).await.unwrap_err();
    assert!(matches!(err, BroadcastError::InvalidRequest(_)));
    assert_eq!(harness.runs.run_count(), 0);
}

#[tokio::test]
async fn test_preview_matches_resolved_audience() {
    let users = InMemoryUserStore::new().with_audience("tariff_7", recipients(&[11, 12, 13]));
    let harness = Harness::new(users, ScriptedTelegram::new());

    assert_eq!(harness.service.preview("tariff_7").await.unwrap(), 3);
    assert_eq!(harness.service.preview("expired").await.unwrap(), 0);

    let resolver = AudienceResolver::new(Arc::clone(&harness.users) as Arc<dyn UserStore>);
    let resolved = resolver.resolve("tariff_7", Channel::Telegram).await.unwrap();
    assert_eq!(resolved.len(), 3);
    assert!(matches!(
        resolver.resolve("tariff_7", Channel::Email).await,
        Err(BroadcastError::InvalidSelector(_))
    ));
    assert!(matches!(
        harness.service.preview("nobody").await,
        Err(BroadcastError::InvalidSelector(_))
    ));
}

#[tokio::test]
async fn test_stop_during_resolution_cancels_with_total_set() {
    let (users, gate) = InMemoryUserStore::gated();
    let users = users.with_audience("all", recipients(&[1, 2, 3]));
    let resolving = users.resolving();
    let harness = Harness::new(users, ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("all")).await.unwrap();
    resolving.notified().await;

    let stopped = harness.service.stop(run.id).await.unwrap();
    assert_eq!(stopped.status, RunStatus::Cancelling);
    gate.notify_one();

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Cancelled);
    assert_eq!(finished.counts, counts(3, 0, 0, 0));
    assert!(harness.telegram.delivered().is_empty());
}

#[tokio::test]
async fn test_concurrent_stops_cancel_exactly_once() {
    let (users, gate) = InMemoryUserStore::gated();
    let users = users.with_audience("all", recipients(&[1, 2, 3]));
    let resolving = users.resolving();
    let harness = Harness::new(users, ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("all")).await.unwrap();
    resolving.notified().await;

    let registry = harness.service.registry();
    let results = futures_util::future::join_all((0..8).map(|_| async { registry.request_stop(run.id) })).await;
    assert!(results.iter().all(|signaled| *signaled));
    gate.notify_one();

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Cancelled);
    let cancelled = harness
        .runs
        .statuses(run.id)
        .into_iter()
        .filter(|status| *status == RunStatus::Cancelled)
        .count();
    assert_eq!(cancelled, 1);

    // finished: nothing left to stop
    assert!(!registry.request_stop(run.id));
}

#[tokio::test]
async fn test_stop_unknown_run() {
    let harness = Harness::new(InMemoryUserStore::new(), ScriptedTelegram::new());

    assert!(!harness.service.registry().request_stop(404));
    assert!(matches!(
        harness.service.stop(404).await,
        Err(BroadcastError::RunNotFound(404))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_dispatch_passes_through_cancelling() {
    let ids: Vec<i64> = (1..=100).collect();
    let users = InMemoryUserStore::new().with_audience("all", recipients(&ids));
    let settings = BroadcastSettings {
        telegram_interval: Duration::from_millis(40),
        ..BroadcastSettings::unthrottled()
    };
    let harness = Harness::with_email(users, ScriptedTelegram::new(), RecordingEmail::new(), settings);

    let run = harness.service.submit(telegram_request("all")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.service.stop(run.id).await.unwrap();

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Cancelled);
    assert_eq!(finished.counts.total, 100);
    assert!(finished.counts.sent >= 1);
    assert!(finished.counts.sent < 100);
    assert_eq!(finished.counts.sent, harness.telegram.delivered().len() as u64);

    let statuses = harness.runs.statuses(run.id);
    assert_eq!(
        statuses,
        vec![RunStatus::InProgress, RunStatus::Cancelling, RunStatus::Cancelled]
    );
}

#[tokio::test]
async fn test_resolution_failure_fails_the_run() {
    let (users, gate) = InMemoryUserStore::gated();
    let users = users.with_audience("all", recipients(&[1, 2]));
    let resolving = users.resolving();
    let harness = Harness::new(users, ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("all")).await.unwrap();
    resolving.notified().await;
    harness.users.set_unavailable(true);
    gate.notify_one();

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error.as_deref().unwrap_or_default().contains("user store is down"));
    assert!(harness.telegram.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_write_failures_do_not_stop_dispatch() {
    let users = InMemoryUserStore::new().with_audience("active", recipients(&[1, 2, 3]));
    let harness = Harness::new(users, ScriptedTelegram::new());
    // More failures than one write's attempts: the in_progress write is dropped.
    harness.runs.fail_next_updates(BroadcastSettings::unthrottled().store_write_attempts + 1);

    let run = harness.service.submit(telegram_request("active")).await.unwrap();
    let finished = harness.service.wait(run.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counts, counts(3, 3, 0, 0));
    assert_eq!(harness.telegram.delivered(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_final_write_survives_store_outage() {
    let (users, gate) = InMemoryUserStore::gated();
    let users = users.with_audience("all", recipients(&[1, 2]));
    let resolving = users.resolving();
    let harness = Harness::new(users, ScriptedTelegram::new());

    let run = harness.service.submit(telegram_request("all")).await.unwrap();
    resolving.notified().await;
    // Every write from here on fails for a while: total, progress and the
    // first attempts at the terminal record.
    harness.runs.fail_next_updates(50);
    gate.notify_one();

    let finished = harness.service.wait(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counts, counts(2, 2, 0, 0));
    assert!(finished.completed_at.is_some());
    assert_eq!(harness.telegram.delivered(), vec![1, 2]);

    // Nothing left for a restart to mark as interrupted.
    assert_eq!(harness.service.recover_interrupted().await.unwrap(), 0);
    assert_eq!(harness.service.status(run.id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_recover_interrupted_marks_orphans_failed() {
    let harness = Harness::new(InMemoryUserStore::new(), ScriptedTelegram::new());
    let in_progress = harness.runs.insert_with_status(RunStatus::InProgress);
    harness.runs.insert_with_status(RunStatus::Queued);
    let done = harness.runs.insert_with_status(RunStatus::Completed);

    assert_eq!(harness.service.recover_interrupted().await.unwrap(), 2);
    assert_eq!(harness.service.status(in_progress).await.unwrap().status, RunStatus::Failed);
    assert_eq!(harness.service.status(done).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let users = InMemoryUserStore::new().with_audience("all", recipients(&[1]));
    let harness = Harness::new(users, ScriptedTelegram::new());

    let first = harness.service.submit(telegram_request("all")).await.unwrap();
    let second = harness.service.submit(telegram_request("all")).await.unwrap();
    harness.service.wait(first.id).await.unwrap();
    harness.service.wait(second.id).await.unwrap();

    let page = harness
        .service
        .list(tgcast::broadcast::Pagination { limit: 1, offset: 0 })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, second.id);
}

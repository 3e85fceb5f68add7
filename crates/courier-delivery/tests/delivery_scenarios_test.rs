//! Delivery lifecycle scenarios driven through a test environment.

use std::time::Duration;

use courier_core::DeliveryEvent;
use courier_delivery::{
    client::{ClientConfig, TASK_ID_HEADER},
    DeliveryOutcome, DispatcherConfig, QueueError, TaskQueue,
};
use courier_testing::{notify_payload, TaskBuilder, TestEnv};
use serde_json::json;

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

#[tokio::test]
async fn successful_target_is_delivered_once() {
    let env = TestEnv::new().await;
    env.http_mock.respond_to("GET", "/ok", 200).await;
    let task_id = env.submit(&notify_payload(&env.http_mock.url("/ok"), "GET")).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { status_code: 200 }]);
    assert_eq!(env.http_mock.requests_to("/ok").await.len(), 1);
    assert_eq!(env.queue.submit_count(), 1);
    assert!(env.clock.sleeps().is_empty());

    match env.events.events_for(task_id).as_slice() {
        [DeliveryEvent::Succeeded(event)] => {
            assert_eq!(event.status_code, 200);
            assert_eq!(event.attempt_number, 1);
        },
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn failing_target_is_retried_with_doubling_delays_then_dead_lettered() {
    let env = TestEnv::new().await;
    env.http_mock.respond_with("/fail", 500).await;
    let task_id = env.submit(&notify_payload(&env.http_mock.url("/fail"), "POST")).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 4);
    for (k, expected_delay) in [(1, 2), (2, 4), (3, 8)] {
        assert_eq!(
            outcomes[k as usize - 1],
            DeliveryOutcome::RetryScheduled {
                retry_count: k,
                delay: Duration::from_secs(expected_delay)
            }
        );
    }
    assert!(matches!(
        &outcomes[3],
        DeliveryOutcome::DeadLettered { reason } if reason.contains("exhausted")
    ));

    assert_eq!(env.clock.sleeps(), secs(&[2, 4, 8]));
    assert_eq!(env.http_mock.requests_to("/fail").await.len(), 4);
    assert_eq!(env.queue.submit_count(), 4, "one intake submission plus three retries");

    let retry_counts: Vec<u32> =
        env.queue.submissions().iter().map(|task| task.retry_count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2, 3]);

    let events = env.events.events_for(task_id);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events.last(),
        Some(DeliveryEvent::DeadLettered(event)) if event.retry_count == 3
    ));

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.tasks_processed, 4);
    assert_eq!(stats.failed_attempts, 4);
    assert_eq!(stats.retries_scheduled, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.pending_retries, 0);
    assert_eq!(stats.in_flight_deliveries, 0);
}

#[tokio::test]
async fn recovering_target_stops_retrying() {
    let env = TestEnv::new().await;
    env.http_mock.fail_then_succeed("/flaky", 2, 503).await;
    env.submit(&notify_payload(&env.http_mock.url("/flaky"), "POST")).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2], DeliveryOutcome::Delivered { status_code: 200 });
    assert_eq!(env.clock.sleeps(), secs(&[2, 4]));
    assert_eq!(env.queue.submit_count(), 3);
}

#[tokio::test]
async fn client_errors_are_retried_like_server_errors() {
    let env = TestEnv::new().await;
    env.http_mock.respond_with("/gone", 404).await;
    env.submit(&notify_payload(&env.http_mock.url("/gone"), "POST")).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(env.http_mock.requests_to("/gone").await.len(), 4);
}

#[tokio::test]
async fn invalid_method_is_rejected_without_retrying() {
    let env = TestEnv::new().await;
    env.http_mock.respond_with("/ok", 200).await;
    let task_id = env.submit(&notify_payload(&env.http_mock.url("/ok"), "NOT A METHOD")).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], DeliveryOutcome::Rejected { .. }));
    assert!(env.http_mock.received_requests().await.is_empty());
    assert!(env.clock.sleeps().is_empty());
    assert_eq!(env.queue.submit_count(), 1);

    match env.events.events_for(task_id).as_slice() {
        [DeliveryEvent::Rejected(event)] => assert!(event.error_message.contains("method")),
        other => panic!("unexpected events: {other:?}"),
    }
    assert_eq!(env.dispatcher.stats().await.rejected, 1);
}

#[tokio::test]
async fn unreachable_target_counts_as_failed_attempt() {
    let env = TestEnv::new().await;
    let task = TaskBuilder::new().target("http://127.0.0.1:9/closed").max_retries(1).build();
    env.queue.submit(task).await.unwrap();

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], DeliveryOutcome::RetryScheduled { retry_count: 1, .. }));
    assert!(matches!(outcomes[1], DeliveryOutcome::DeadLettered { .. }));
}

#[tokio::test]
async fn slow_target_times_out_and_is_retried() {
    let config = DispatcherConfig {
        worker_count: 1,
        client_config: ClientConfig { timeout: Duration::from_millis(200), ..Default::default() },
        ..Default::default()
    };
    let env = TestEnv::with_config(8, config).await;
    env.http_mock.respond_with_delay("/slow", 200, Duration::from_secs(2)).await;
    let task = TaskBuilder::new().target(env.http_mock.url("/slow")).build();
    env.queue.submit(task).await.unwrap();

    let outcome = env.process_next().await.unwrap();

    assert_eq!(
        outcome,
        DeliveryOutcome::RetryScheduled { retry_count: 1, delay: Duration::from_secs(2) }
    );
}

#[tokio::test]
async fn zero_retry_ceiling_dead_letters_on_first_failure() {
    let env = TestEnv::new().await;
    env.http_mock.respond_with("/fail", 500).await;
    let task = TaskBuilder::new().target(env.http_mock.url("/fail")).max_retries(0).build();
    env.queue.submit(task).await.unwrap();

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], DeliveryOutcome::DeadLettered { .. }));
    assert_eq!(env.queue.submit_count(), 1);
}

#[tokio::test]
async fn headers_and_body_reach_the_target() {
    let env = TestEnv::new().await;
    env.http_mock.respond_to("PUT", "/hook", 204).await;
    let payload = json!({
        "target_url": env.http_mock.url("/hook"),
        "method": "PUT",
        "headers": {"X-Signature": "abc", "Content-Type": "application/json"},
        "body": "{\"event\":\"order.created\"}",
    });
    let task_id = env.submit(&payload).await;

    let outcomes = env.run_until_terminal().await;

    assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { status_code: 204 }]);
    let requests = env.http_mock.requests_to("/hook").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers["x-signature"], "abc");
    assert_eq!(requests[0].headers[TASK_ID_HEADER], task_id.to_string().as_str());
    assert_eq!(requests[0].body, b"{\"event\":\"order.created\"}");
}

#[tokio::test]
async fn rejected_resubmission_is_reported_as_dead_letter() {
    let env = TestEnv::new().await;
    env.http_mock.respond_with("/fail", 500).await;
    let task = TaskBuilder::new().target(env.http_mock.url("/fail")).build();
    let task_id = task.id;
    env.queue.submit(task).await.unwrap();
    env.queue.fail_submissions_with(QueueError::Backend { message: "connection reset".into() });

    let outcome = env.process_next().await.unwrap();
    assert!(matches!(outcome, DeliveryOutcome::RetryScheduled { retry_count: 1, .. }));

    match env.events.wait_for_terminal(task_id).await {
        DeliveryEvent::DeadLettered(event) => {
            assert!(event.reason.contains("connection reset"));
            assert_eq!(event.retry_count, 1);
        },
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn started_workers_drain_the_queue() {
    let mut env = TestEnv::new().await;
    env.http_mock.respond_with("/ok", 200).await;
    env.http_mock.respond_with("/fail", 500).await;

    env.dispatcher.start().await.unwrap();
    let delivered = env.submit(&notify_payload(&env.http_mock.url("/ok"), "POST")).await;
    let failed = env.submit(&notify_payload(&env.http_mock.url("/fail"), "POST")).await;

    assert!(matches!(env.events.wait_for_terminal(delivered).await, DeliveryEvent::Succeeded(_)));
    assert!(matches!(env.events.wait_for_terminal(failed).await, DeliveryEvent::DeadLettered(_)));

    let mut sleeps = env.clock.sleeps();
    sleeps.sort();
    assert_eq!(sleeps, secs(&[2, 4, 8]));

    let stats = env.dispatcher.stats().await;
    assert_eq!(stats.active_workers, 2);
    assert_eq!(stats.successful_deliveries, 1);
    assert_eq!(stats.dead_lettered, 1);

    env.dispatcher.shutdown().await.unwrap();
}

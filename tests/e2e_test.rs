//! End-to-end notification flows: intake, queue, workers and targets.

use std::time::Duration;

use axum::http::StatusCode;
use courier_core::DeliveryEvent;
use courier_delivery::TaskQueue;
use courier_testing::{notify_payload, TestEnv};
use serde_json::json;

#[tokio::test]
async fn accepted_notification_is_delivered_once() {
    let mut env = TestEnv::new().await;
    env.http_mock.respond_to("GET", "/ok", 200).await;
    env.dispatcher.start().await.unwrap();

    let task_id = env.submit(&notify_payload(&env.http_mock.url("/ok"), "GET")).await;

    match env.events.wait_for_terminal(task_id).await {
        DeliveryEvent::Succeeded(event) => {
            assert_eq!(event.status_code, 200);
            assert_eq!(event.attempt_number, 1);
        },
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert_eq!(env.http_mock.requests_to("/ok").await.len(), 1);
    assert_eq!(env.queue.submit_count(), 1);
    assert!(env.clock.sleeps().is_empty());

    env.dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_target_gets_three_retries_then_dead_letter() {
    let mut env = TestEnv::new().await;
    env.http_mock.respond_with("/fail", 500).await;
    env.dispatcher.start().await.unwrap();

    let task_id = env.submit(&notify_payload(&env.http_mock.url("/fail"), "POST")).await;

    match env.events.wait_for_terminal(task_id).await {
        DeliveryEvent::DeadLettered(event) => assert_eq!(event.retry_count, 3),
        other => panic!("unexpected terminal event: {other:?}"),
    }

    assert_eq!(
        env.clock.sleeps(),
        vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]
    );
    assert_eq!(env.http_mock.requests_to("/fail").await.len(), 4);
    assert_eq!(env.queue.submit_count(), 4);

    let retries: Vec<u32> = env
        .events
        .events_for(task_id)
        .iter()
        .filter_map(|event| match event {
            DeliveryEvent::RetryScheduled(retry) => Some(retry.retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2, 3]);

    env.dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_target_never_reaches_the_queue() {
    let env = TestEnv::new().await;

    let (status, body) = env.post_notify(&json!({"target_url": "", "method": "POST"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "E1002");
    assert_eq!(env.queue.submit_count(), 0);
}

#[tokio::test]
async fn full_queue_applies_backpressure_without_changing_contents() {
    let env = TestEnv::with_capacity(3).await;
    let mut accepted = Vec::new();
    for i in 0..3 {
        accepted.push(env.submit(&notify_payload(&format!("http://localhost/{i}"), "POST")).await);
    }

    let (status, body) =
        env.post_notify(&notify_payload("http://localhost/overflow", "POST")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "E3001");
    assert_eq!(env.queue.depth().await.unwrap(), 3);

    for expected in accepted {
        assert_eq!(env.queue.retrieve().await.unwrap().id, expected);
    }
}

#[tokio::test]
async fn invalid_method_is_dropped_as_fatal() {
    let mut env = TestEnv::new().await;
    env.http_mock.respond_with("/ok", 200).await;
    env.dispatcher.start().await.unwrap();

    let task_id = env.submit(&notify_payload(&env.http_mock.url("/ok"), "BAD METHOD")).await;

    assert!(matches!(env.events.wait_for_terminal(task_id).await, DeliveryEvent::Rejected(_)));
    assert_eq!(env.events.events_for(task_id).len(), 1);
    assert!(env.clock.sleeps().is_empty());
    assert!(env.http_mock.received_requests().await.is_empty());
    assert_eq!(env.queue.submit_count(), 1);

    env.dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn many_notifications_are_each_delivered_exactly_once() {
    let mut env = TestEnv::new().await;
    env.http_mock.respond_with("/bulk", 200).await;
    env.dispatcher.start().await.unwrap();

    let mut task_ids = Vec::new();
    for _ in 0..20 {
        task_ids.push(env.submit(&notify_payload(&env.http_mock.url("/bulk"), "POST")).await);
    }
    for task_id in &task_ids {
        env.events.wait_for_terminal(*task_id).await;
    }

    assert_eq!(env.http_mock.requests_to("/bulk").await.len(), 20);
    assert_eq!(env.dispatcher.stats().await.successful_deliveries, 20);

    env.dispatcher.shutdown().await.unwrap();
}

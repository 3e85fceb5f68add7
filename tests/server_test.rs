use std::{net::SocketAddr, sync::Arc, time::Duration};

use courier_api::{serve, AppState};
use courier_delivery::{queue::MemoryQueue, TaskQueue};
use tokio::sync::oneshot;

fn free_local_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn served_intake_accepts_notifications_and_shuts_down() {
    let queue = Arc::new(MemoryQueue::new(8));
    let addr = free_local_addr();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(serve(
        AppState::with_queue(queue.clone()),
        addr,
        Duration::from_secs(5),
        async move {
            let _ = shutdown_rx.await;
        },
    ));

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/notify");
    let mut response = None;
    for _ in 0..50 {
        match client
            .post(&url)
            .body(r#"{"target_url":"http://localhost/hook","method":"POST"}"#)
            .send()
            .await
        {
            Ok(r) => {
                response = Some(r);
                break;
            },
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let response = response.expect("server should start listening");

    assert_eq!(response.status().as_u16(), 202);
    assert!(response.headers().contains_key("x-request-id"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(queue.depth().await.unwrap(), 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop after shutdown signal")
        .unwrap()
        .unwrap();
}

#![no_main]

//! Fuzz target for intake payload parsing.
//!
//! Arbitrary bytes go through the same steps as a `POST /notify` body:
//! JSON parsing, validation, task creation and outbound request building.
//! None of them may panic.

use chrono::Utc;
use courier_core::{NotificationRequest, Task};
use courier_delivery::client::DeliveryClient;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<NotificationRequest>(data) else {
        return;
    };
    if request.validate().is_err() {
        return;
    }

    let task = Task::new(request, 3, Utc::now());
    if let Ok(client) = DeliveryClient::with_defaults() {
        let _ = client.build_request(&task);
    }
});

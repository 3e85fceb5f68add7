#![no_main]

//! Fuzz target for decoding queued task records.
//!
//! Anything that decodes must survive a re-encode and decode unchanged.

use courier_core::Task;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(task) = serde_json::from_slice::<Task>(data) else {
        return;
    };

    let encoded = serde_json::to_vec(&task).unwrap();
    let decoded: Task = serde_json::from_slice(&encoded).unwrap();
    assert_eq!(decoded, task);
});

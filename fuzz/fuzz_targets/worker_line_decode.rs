#![no_main]

use libfuzzer_sys::fuzz_target;
use physics_worker::{classify_worker_message, decode_worker_line, WorkerReply};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    for line in input.split('\n') {
        let Some(Ok(message)) = decode_worker_line(line) else {
            continue;
        };
        match classify_worker_message(message) {
            WorkerReply::Success { id, .. } | WorkerReply::Failure { id, .. } => {
                assert!(!id.is_empty());
            }
            WorkerReply::Uncorrelated => {}
        }
    }
});

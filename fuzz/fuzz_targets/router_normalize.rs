#![no_main]

use libfuzzer_sys::fuzz_target;
use physics_router::ToolRouter;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let input: &str = &input;
    let (name, raw_arguments) = input.split_once('\n').unwrap_or((input, "{}"));
    let arguments = serde_json::from_str::<Value>(raw_arguments).unwrap_or(Value::Null);
    let router = ToolRouter::default();
    if let Ok(routed) = router.route(name, &arguments) {
        if let Some(method) = routed.method {
            assert!(routed.tool.supports(method));
        }
        assert!(!routed.params.contains_key("session_id"));
        assert!(routed.worker_method.starts_with(routed.tool.name));
    }
});

//! Handler faults are reported once, by the middleware, and never reach the
//! process panic hook. Kept in its own binary since the hook is global.

use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::StatusCode;
use axum::routing::get;
use instrumented_service::observability::install_panic_hook;
use instrumented_service::HttpServer;

mod common;

use common::{test_config, CapturedLogs, TestApp};

static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

async fn divide_by_zero() -> String {
    let divisor = std::hint::black_box(0u32);
    (100 / divisor).to_string()
}

#[tokio::test]
async fn test_handler_fault_reported_once() {
    // Stands in for the default stderr printer.
    std::panic::set_hook(Box::new(|_| {
        HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }));
    install_panic_hook();

    let logs = CapturedLogs::start();
    let routes = HttpServer::routes().route("/divide", get(divide_by_zero));
    let app = TestApp::with_routes(routes, test_config());

    let res = app.get("/divide").await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);

    let mentions: Vec<_> = logs
        .lines()
        .into_iter()
        .filter(|l| l.to_string().contains("attempt to divide by zero"))
        .collect();
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0]["message"], "unhandled fault");
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 0);

    // Panics outside a request still reach the previous hook.
    let outside = std::panic::catch_unwind(|| panic!("outside any request"));
    assert!(outside.is_err());
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);

    let _ = std::panic::take_hook();
}

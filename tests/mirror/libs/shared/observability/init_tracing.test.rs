use quotaforge_observability::init_tracing;
use std::panic;
use tracing::{info, instrument};

#[instrument(name = "mirror_test_operation")]
fn traced_operation() {
    info!("executing traced operation");
}

#[tokio::test]
async fn init_tracing_installs_subscriber_and_panic_hook() {
    init_tracing("quotaforge-integrity-test");

    traced_operation();

    let result = panic::catch_unwind(|| {
        panic!("deliberate panic for hook verification");
    });

    assert!(result.is_err(), "the panic hook must let the unwind proceed");
}

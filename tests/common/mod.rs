//! Shared test setup, mirroring the teacher's `tracing_subscriber::fmt()...init()`
//! wiring at its own binary entry points.

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

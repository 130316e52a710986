//! 把契约套件编译为标准 Rust 测试。

#[test]
fn state_machine() {
    lamina_contract_tests::run_state_machine();
}

#[test]
fn cancellation() {
    lamina_contract_tests::run_cancellation();
}

#[test]
fn graceful_shutdown() {
    lamina_contract_tests::run_graceful_shutdown();
}

#[test]
fn backpressure() {
    lamina_contract_tests::run_backpressure();
}

#[test]
fn oob() {
    lamina_contract_tests::run_oob();
}

#[test]
fn roundtrip() {
    lamina_contract_tests::run_roundtrip();
}

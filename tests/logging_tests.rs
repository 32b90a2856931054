use channel_digest::setup_logging;

#[test]
fn test_logging_setup() {
    // Calling twice must not panic: the second call finds a subscriber already installed.
    let result = std::panic::catch_unwind(|| {
        setup_logging();
        setup_logging();
    });

    assert!(result.is_ok(), "setup_logging function should not panic");
}

//! Installs the global log subscriber, so it runs in its own test binary.

#[test]
fn second_init_fails() {
    converge::logger::init().unwrap();
    assert!(converge::logger::init().is_err());
}

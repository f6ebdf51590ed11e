use assert_cmd::Command;

#[test]
fn version_flag_matches_package() {
    let ver = env!("CARGO_PKG_VERSION");
    assert!(ver.split('.').count() >= 2);
    Command::cargo_bin("db3sync")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains(ver));
}

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("blogfeed")
        .expect("blogfeed binary")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("blogfeed")
        .expect("blogfeed binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("blogfeed"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("like post|comment"));
}

#[test]
fn unknown_command_fails_with_message() {
    let home = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("blogfeed")
        .expect("blogfeed binary")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("BLOGFEED_STORAGE__PATH", home.path().join("state.db"))
        .arg("frobnicate")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::starts_with("error: "));
}

#[test]
fn whoami_starts_signed_out() {
    let home = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("blogfeed")
        .expect("blogfeed binary")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("BLOGFEED_STORAGE__PATH", home.path().join("state.db"))
        .arg("whoami")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in."));
}

#[test]
fn non_numeric_post_id_is_rejected() {
    let home = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("blogfeed")
        .expect("blogfeed binary")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("BLOGFEED_STORAGE__PATH", home.path().join("state.db"))
        .env("BLOGFEED_API__BASE_URL", "http://127.0.0.1:9/api/")
        .env("BLOGFEED_API__TIMEOUT", "2s")
        .args(["delete", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("post id must be a number"));
}

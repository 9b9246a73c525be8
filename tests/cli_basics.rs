use assert_cmd::Command;
use predicates::prelude::*;

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("shelfsync").expect("binary builds");
    // keep the ambient environment from leaking real credentials in
    for name in [
        "SHELFSYNC_DIRECTORY_URL",
        "SHELFSYNC_DIRECTORY_TOKEN",
        "SHELFSYNC_BOOKS_DB_ID",
        "SHELFSYNC_SERIES_DB_ID",
        "SHELFSYNC_DATA_DIR",
    ] {
        cmd.env_remove(name);
    }
    cmd
}

#[test]
fn help_lists_the_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("upsert"))
        .stdout(predicate::str::contains("webhook"))
        .stdout(predicate::str::contains("cascade"));
}

#[test]
fn missing_configuration_is_reported() {
    cmd()
        .args(["cascade", "--asin", "B001", "--status", "finished"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SHELFSYNC_DIRECTORY_TOKEN"));
}

#[test]
fn unknown_status_is_rejected() {
    cmd()
        .env("SHELFSYNC_DIRECTORY_TOKEN", "token")
        .env("SHELFSYNC_BOOKS_DB_ID", "books-db")
        .env("SHELFSYNC_SERIES_DB_ID", "series-db")
        .args(["cascade", "--asin", "B001", "--status", "unread"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}

#![deny(clippy::all, clippy::pedantic)]

use assert_cmd::Command;
use httpmock::MockServer;
use predicates::str::contains;
use std::io::Write;
use tempfile::NamedTempFile;

fn cli() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("query-sync-cli"));
    cmd.env_remove("QUERY_SYNC__TRANSPORT__BASE_URL")
        .env_remove("QUERY_SYNC_CONFIG_FILE")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn list_prints_normalized_page() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/api/briefs").query_param("status", "open");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"id":1,"title":"Q3"},{"id":2,"title":"Q4"}]"#);
    });

    let assert = cli()
        .arg("--base-url")
        .arg(server.url("/api/"))
        .arg("briefs")
        .arg("list")
        .arg("--param")
        .arg("status=open")
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"total_count\": 2"));
    assert!(output.contains("\"title\": \"Q4\""));
    mock.assert();
}

#[test]
fn patch_reads_body_from_file_and_uses_env_base_url() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("PATCH")
            .path("/api/briefs/7")
            .json_body(serde_json::json!({"title": "renamed"}));
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":7,"title":"renamed"}"#);
    });

    let mut body = NamedTempFile::new().expect("tmp file");
    body.write_all(br#"{"title":"renamed"}"#).expect("write body");

    cli()
        .env("QUERY_SYNC__TRANSPORT__BASE_URL", server.url("/api/"))
        .arg("briefs")
        .arg("patch")
        .arg("7")
        .arg("--file")
        .arg(body.path())
        .assert()
        .success()
        .stdout(contains("\"title\": \"renamed\""));
    mock.assert();
}

#[test]
fn server_errors_fail_the_command() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/briefs/404");
        then.status(404).body("no such brief");
    });

    cli()
        .arg("--base-url")
        .arg(server.url("/api/"))
        .arg("briefs")
        .arg("get")
        .arg("404")
        .assert()
        .failure()
        .stderr(contains("no such brief"));
}

#[test]
fn missing_base_url_fails_fast() {
    cli()
        .arg("briefs")
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("MissingBaseUrl"));
}

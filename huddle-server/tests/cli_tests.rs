use assert_cmd::Command;
use huddle_server::auth::AuthConfig;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn huddle() -> Command {
    let mut cmd = Command::cargo_bin("huddle-server").unwrap();
    cmd.env_remove("HUDDLE_JWT_SECRET")
        .env_remove("HUDDLE_AUTH_AUDIENCE")
        .env_remove("HUDDLE_SEED");
    cmd
}

#[test]
fn token_subcommand_mints_a_verifiable_token() -> Result<(), Box<dyn std::error::Error>> {
    let output = huddle()
        .args(["token", "alice", "--admin", "--jwt-secret", "cli-secret"])
        .output()?;
    assert!(output.status.success());

    let token = String::from_utf8(output.stdout)?;
    let verifier = AuthConfig {
        secret: "cli-secret".into(),
        expected_aud: None,
        leeway_secs: 0,
    }
    .verifier();
    let claims = verifier.verify(token.trim())?;
    assert_eq!(claims.sub, "alice");
    assert!(claims.admin);
    Ok(())
}

#[test]
fn token_secret_can_come_from_env() {
    huddle()
        .env("HUDDLE_JWT_SECRET", "env-secret")
        .args(["token", "bob"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[\w-]+\.[\w-]+\.[\w-]+\n$").unwrap());
}

#[test]
fn serve_refuses_to_start_without_a_secret() {
    huddle()
        .args(["serve", "--listen-addr", "127.0.0.1:0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JWT secret is required"));
}

#[test]
fn serve_rejects_a_broken_seed_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let seed = dir.path().join("seed.yml");
    fs::write(
        &seed,
        r#"
users: []
activities:
  - creator: ghost
    datetime: 2026-10-20T18:00:00Z
    title: Haunting
"#,
    )?;

    huddle()
        .args(["serve", "--listen-addr", "127.0.0.1:0", "--jwt-secret", "s"])
        .arg("--seed")
        .arg(&seed)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a seeded user"));
    Ok(())
}

mod common;

use common::{
    environment::PqTestEnvironment,
    fixtures::{basic_profile, gecko_profile},
};
use predicates::prelude::*;

#[test]
fn test_sessions_are_isolated() {
    let env = PqTestEnvironment::new();
    let firefox = env.write_profile("firefox.json", &gecko_profile("Firefox"));
    let thunderbird = env.write_profile("thunderbird.json", &gecko_profile("Thunderbird"));

    env.load_session(&firefox, "alpha");
    env.load_session(&thunderbird, "beta");

    env.assert_cmd_success(&["profile", "info", "--session", "alpha"], "Product: Firefox");
    env.assert_cmd_success(
        &["profile", "info", "--session", "beta"],
        "Product: Thunderbird",
    );
    env.assert_cmd_success(
        &["profile", "info", "--session", "beta"],
        "2 threads across 2 processes",
    );

    let listing = env.assert_cmd_success(&["list-sessions"], "Found 2 running sessions");
    assert!(listing.contains("alpha") && listing.contains("beta"));
    assert!(listing.contains("ready"), "listing: {listing}");

    env.assert_cmd_success(&["stop", "--session", "alpha"], "Stopped session: alpha");
    env.assert_cmd_failure(&["profile", "info", "--session", "alpha"], "No active session");
    env.assert_cmd_success(
        &["profile", "info", "--session", "beta"],
        "Product: Thunderbird",
    );
    env.assert_cmd_success(&["list-sessions"], "Found 1 running sessions");
}

#[test]
fn test_stop_all() {
    let env = PqTestEnvironment::new();
    let profile = env.write_profile("basic.json", &basic_profile());

    env.load_session(&profile, "one");
    env.load_session(&profile, "two");
    env.assert_cmd_success(&["load", &profile], "Session started: ");

    env.pq_cmd()
        .args(["stop", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped session: one"))
        .stdout(predicate::str::contains("Stopped session: two"));

    assert!(env.session_files().is_empty());
    assert_eq!(env.current_session(), None);
    env.assert_cmd_success(&["list-sessions"], "Found 0 running sessions");
    env.assert_cmd_success(&["stop", "--all"], "No active sessions");
}

#[test]
fn test_list_sessions_cleans_up_stale_files() {
    let env = PqTestEnvironment::new();
    std::fs::create_dir_all(env.session_dir()).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    let metadata = serde_json::json!({
        "id": "crashed",
        "socketPath": env.socket_path("crashed"),
        "pid": dead_pid,
        "profilePath": "/profiles/gone.json",
        "status": "ready",
        "createdAt": "2024-01-01T00:00:00Z",
    });
    std::fs::write(env.metadata_path("crashed"), metadata.to_string()).unwrap();
    std::fs::write(env.socket_path("crashed"), b"").unwrap();

    env.assert_cmd_success(&["list-sessions"], "Found 0 running sessions");
    assert!(env.session_files().is_empty());
}

#[test]
fn test_stale_session_id_can_be_reused() {
    let env = PqTestEnvironment::new();
    let profile = env.write_profile("basic.json", &basic_profile());
    std::fs::create_dir_all(env.session_dir()).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    let metadata = serde_json::json!({
        "id": "again",
        "socketPath": env.socket_path("again"),
        "pid": dead_pid,
        "profilePath": profile,
        "status": "ready",
        "createdAt": "2024-01-01T00:00:00Z",
    });
    std::fs::write(env.metadata_path("again"), metadata.to_string()).unwrap();
    std::fs::write(env.socket_path("again"), b"").unwrap();

    env.load_session(&profile, "again");
    let meta = env.read_metadata("again").unwrap();
    assert_ne!(meta["pid"].as_u64(), Some(dead_pid as u64));
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragmill_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragmill");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ragmill.sqlite"

[defaults]
tenant = "default"
chunk_tokens = 128
overlap_tokens = 16
top_k = 5
similarity_threshold = 0.7
"#,
        root.display()
    );

    let config_path = config_dir.join("ragmill.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragmill(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragmill_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragmill binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Pull the source id out of `source add` output ("added source <id> (...)").
fn parse_source_id(stdout: &str) -> String {
    stdout
        .lines()
        .find(|l| l.starts_with("added source "))
        .and_then(|l| l.split_whitespace().nth(2))
        .unwrap_or_else(|| panic!("no source id in output: {}", stdout))
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragmill(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("ragmill.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ragmill(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ragmill(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_commands_work_without_explicit_init() {
    let (_tmp, config_path) = setup_test_env();

    // No init: every command migrates on connect.
    let (stdout, stderr, success) = run_ragmill(&config_path, &["agent", "list"]);
    assert!(success, "agent list failed: {}{}", stdout, stderr);
    assert!(stdout.contains("No agents registered"));

    let (stdout, stderr, success) = run_ragmill(&config_path, &["stats"]);
    assert!(success, "stats failed: {}{}", stdout, stderr);
    assert!(stdout.contains("No agents registered"));
}

#[test]
fn test_agent_register_and_show() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragmill(
        &config_path,
        &["agent", "register", "sales-bot", "--name", "Sales Bot"],
    );
    assert!(success, "register failed: {}{}", stdout, stderr);
    assert!(stdout.contains("registered agent sales-bot"));

    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "show", "sales-bot"]);
    assert!(success);
    assert!(stdout.contains("Sales Bot"));
    let chunk_line = stdout
        .lines()
        .find(|l| l.contains("chunk_tokens"))
        .unwrap_or_default();
    assert!(chunk_line.ends_with("128"), "got: {}", chunk_line);
}

#[test]
fn test_agent_register_rejects_bad_overlap() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) = run_ragmill(
        &config_path,
        &[
            "agent",
            "register",
            "a1",
            "--chunk-tokens",
            "100",
            "--overlap-tokens",
            "100",
        ],
    );
    assert!(!success, "overlap >= chunk size must be rejected");
    assert!(
        stderr.contains("overlap_tokens"),
        "Should name the bad knob, got: {}",
        stderr
    );
}

#[test]
fn test_agent_list() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);

    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "list"]);
    assert!(success);
    assert!(stdout.contains("No agents registered"));

    run_ragmill(&config_path, &["agent", "register", "bot-a"]);
    run_ragmill(&config_path, &["agent", "register", "bot-b"]);

    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "list"]);
    assert!(success);
    assert!(stdout.contains("bot-a"));
    assert!(stdout.contains("bot-b"));
}

#[test]
fn test_agent_show_missing_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) = run_ragmill(&config_path, &["agent", "show", "ghost"]);
    assert!(!success);
    assert!(
        stderr.contains("not found"),
        "Should report not found, got: {}",
        stderr
    );
}

#[test]
fn test_agent_deactivate_keeps_record() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    run_ragmill(&config_path, &["agent", "register", "bot-a"]);

    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "deactivate", "bot-a"]);
    assert!(success);
    assert!(stdout.contains("deactivated"));

    // Still visible, just inactive.
    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "show", "bot-a"]);
    assert!(success);
    let active_line = stdout
        .lines()
        .find(|l| l.contains("active"))
        .unwrap_or_default();
    assert!(active_line.ends_with("false"), "got: {}", active_line);
}

#[test]
fn test_source_add_text() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragmill(
        &config_path,
        &[
            "source",
            "add",
            "sales-bot",
            "--text",
            "Summer offer: trail running shoes at thirty percent off.",
        ],
    );
    assert!(success, "source add failed: {}{}", stdout, stderr);
    assert!(stdout.contains("added source"));
    assert!(stdout.contains("status:   pending"));

    // The agent was created on first use.
    let (stdout, _, success) = run_ragmill(&config_path, &["agent", "show", "sales-bot"]);
    assert!(success);
    assert!(stdout.contains("sales-bot"));
}

#[test]
fn test_source_add_url_requires_location() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) = run_ragmill(
        &config_path,
        &["source", "add", "sales-bot", "--kind", "url"],
    );
    assert!(!success);
    assert!(
        stderr.contains("location"),
        "Should mention missing location, got: {}",
        stderr
    );
}

#[test]
fn test_source_add_unknown_kind_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) = run_ragmill(
        &config_path,
        &["source", "add", "sales-bot", "--kind", "web", "--text", "x"],
    );
    assert!(!success);
    assert!(
        stderr.contains("Unknown source kind"),
        "Should reject the kind, got: {}",
        stderr
    );
}

#[test]
fn test_source_list() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, _, _) = run_ragmill(
        &config_path,
        &["source", "add", "bot-a", "--text", "First source body."],
    );
    let id = parse_source_id(&stdout);

    let (stdout, _, success) = run_ragmill(&config_path, &["source", "list", "bot-a"]);
    assert!(success);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("pending"));
}

#[test]
fn test_process_with_disabled_provider_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, _, _) = run_ragmill(
        &config_path,
        &[
            "source",
            "add",
            "bot-a",
            "--text",
            "Offer text that would need an embedding to index.",
        ],
    );
    let id = parse_source_id(&stdout);

    let (_, stderr, success) = run_ragmill(&config_path, &["process", &id]);
    assert!(!success, "process must fail without an embedding provider");
    assert!(
        stderr.contains("disabled"),
        "Should mention the disabled provider, got: {}",
        stderr
    );

    // The source is marked failed and keeps the error message.
    let (stdout, _, _) = run_ragmill(&config_path, &["source", "list", "bot-a"]);
    assert!(stdout.contains("failed"), "got: {}", stdout);
    assert!(stdout.contains("disabled"));
}

#[test]
fn test_search_blank_query_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    run_ragmill(&config_path, &["agent", "register", "bot-a"]);

    let (stdout, _, success) = run_ragmill(&config_path, &["search", "bot-a", "  "]);
    assert!(success, "Blank query should not panic");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_errors_when_provider_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    run_ragmill(&config_path, &["agent", "register", "bot-a"]);

    let (_, stderr, success) = run_ragmill(&config_path, &["search", "bot-a", "summer offer"]);
    assert!(!success, "Search needs a working embedding provider");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_search_missing_agent_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) = run_ragmill(&config_path, &["search", "ghost", "anything"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_source_delete_missing_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (_, stderr, success) =
        run_ragmill(&config_path, &["source", "delete", "nonexistent-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_source_delete() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, _, _) = run_ragmill(
        &config_path,
        &["source", "add", "bot-a", "--text", "Disposable source body."],
    );
    let id = parse_source_id(&stdout);

    let (stdout, _, success) = run_ragmill(&config_path, &["source", "delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (stdout, _, _) = run_ragmill(&config_path, &["source", "list", "bot-a"]);
    assert!(!stdout.contains(&id));
}

#[test]
fn test_stats_empty() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    let (stdout, _, success) = run_ragmill(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("No agents registered"));
}

#[test]
fn test_stats_lists_agents() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    run_ragmill(&config_path, &["agent", "register", "bot-a"]);

    let (stdout, _, success) = run_ragmill(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("bot-a"));
    assert!(stdout.contains("never"));
}

#[test]
fn test_tenant_flag_scopes_listing() {
    let (_tmp, config_path) = setup_test_env();

    run_ragmill(&config_path, &["init"]);
    run_ragmill(
        &config_path,
        &["--tenant", "acme", "agent", "register", "acme-bot"],
    );

    let (stdout, _, _) = run_ragmill(&config_path, &["agent", "list"]);
    assert!(
        stdout.contains("No agents registered"),
        "Default tenant must not see acme's agents, got: {}",
        stdout
    );

    let (stdout, _, _) = run_ragmill(&config_path, &["--tenant", "acme", "agent", "list"]);
    assert!(stdout.contains("acme-bot"));
}

#[test]
fn test_bad_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"/tmp/x.sqlite\"\n\n[defaults]\nchunk_tokens = 10\noverlap_tokens = 10\n",
    )
    .unwrap();

    let (_, stderr, success) = run_ragmill(&bad, &["init"]);
    assert!(!success, "Config with overlap >= chunk size must be rejected");
    assert!(stderr.contains("overlap_tokens"), "got: {}", stderr);
}

use std::collections::HashMap;

use super::*;

#[test]
fn trims_trailing_slash_from_api_url() {
    assert_eq!(
        normalize_api_url("https://boards.example.com/api/").expect("url"),
        "https://boards.example.com/api"
    );
}

#[test]
fn rejects_non_http_api_url() {
    assert!(normalize_api_url("ftp://boards.example.com").is_err());
    assert!(normalize_api_url("not a url").is_err());
}

#[test]
fn app_prefixed_env_wins_over_short_name() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("KANBAN_API_URL", "http://a.example/api"),
        ("APP__API_URL", "http://b.example/api"),
        ("KANBAN_TIMEOUT_SECS", "not-a-number"),
        ("APP__TIMEOUT_SECS", "3"),
    ]);
    let mut settings = ClientSettings::default();
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.api_url, "http://b.example/api");
    assert_eq!(settings.request_timeout_secs, 3);
    assert_eq!(settings.session_file, None);
}

#[test]
fn file_settings_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kanban.toml");
    fs::write(
        &path,
        "api_url = \"http://127.0.0.1:9000/api/\"\nsession_file = \"/tmp/kanban-session\"\ndefault_column_color = \"#101010\"\n",
    )
    .expect("write");

    let settings = load_settings(Some(&path)).expect("settings");
    assert_eq!(settings.api_url, "http://127.0.0.1:9000/api");
    assert_eq!(
        settings.session_file,
        Some(PathBuf::from("/tmp/kanban-session"))
    );
    assert_eq!(settings.default_column_color, "#101010");
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
}

#[test]
fn malformed_settings_file_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kanban.toml");
    fs::write(&path, "request_timeout_secs = \"soon\"\n").expect("write");

    let err = load_settings(Some(&path)).expect_err("bad toml");
    assert!(err.to_string().contains("kanban.toml"));
}

#[test]
fn missing_settings_file_keeps_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings(Some(&dir.path().join("absent.toml"))).expect("settings");
    assert_eq!(settings.default_column_color, "#4B5EAA");
}

use crate::config::{FileConfig, load_project_config};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_project_config() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    let mivna_dir = project_root.join(".mivna");
    fs::create_dir_all(&mivna_dir).unwrap();

    let config_content = r#"
backend_url = "https://acme.example.co"
default_org = "acme"
bootstrap_timeout_ms = 2500

[backend]
max_retries = 5
retry_base_ms = 250
"#;

    fs::write(mivna_dir.join("config.toml"), config_content).unwrap();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(
        project_cfg.backend_url,
        Some("https://acme.example.co".to_string())
    );
    assert_eq!(project_cfg.default_org, Some("acme".to_string()));
    assert_eq!(project_cfg.bootstrap_timeout_ms, Some(2500));

    assert!(project_cfg.backend.is_some());
    let backend_cfg = project_cfg.backend.unwrap();
    assert_eq!(backend_cfg.max_retries, Some(5));
    assert_eq!(backend_cfg.retry_base_ms, Some(250));
}

#[test]
fn test_load_project_config_not_exists() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_load_project_config_ignores_bad_toml() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    let mivna_dir = project_root.join(".mivna");
    fs::create_dir_all(&mivna_dir).unwrap();
    fs::write(mivna_dir.join("config.toml"), "backend_url = [not toml").unwrap();

    let project_cfg = load_project_config(project_root).unwrap();
    assert_eq!(project_cfg, FileConfig::default());
}

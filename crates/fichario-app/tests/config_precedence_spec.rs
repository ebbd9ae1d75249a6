use std::{
    env,
    ffi::OsString,
    fs,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;

use fichario_app::config;
use fichario_app::services::IngestionMode;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("config env mutex poisoned")
}

fn snapshot_env(vars: &[&'static str]) -> Vec<(&'static str, Option<OsString>)> {
    vars.iter().map(|&name| (name, env::var_os(name))).collect()
}

fn restore_env(vars: Vec<(&'static str, Option<OsString>)>) {
    for (name, value) in vars {
        match value {
            Some(val) => env::set_var(name, val),
            None => env::remove_var(name),
        }
    }
}

const TRACKED: &[&str] = &[
    "FICHARIO__SERVER__LISTEN_ADDR",
    "FICHARIO__STORAGE__UPLOAD_DIR",
    "FICHARIO__ANALYZER__MODEL",
    "FICHARIO__ANALYZER__INGESTION",
];

#[test]
fn config_precedence_follows_documented_order() {
    let _guard = env_guard();
    let env_snapshot = snapshot_env(TRACKED);
    let original_dir = env::current_dir().expect("capture current dir");
    for name in TRACKED {
        env::remove_var(name);
    }

    // Defaults only.
    let workspace = TempDir::new().expect("temp workspace");
    env::set_current_dir(workspace.path()).expect("change to workspace");
    let defaults = config::load().expect("load default config");
    assert_eq!(defaults.server.listen_addr, "127.0.0.1:5000");
    assert_eq!(defaults.analyzer.model, "gemini-2.0-flash");
    assert_eq!(defaults.analyzer.ingestion, IngestionMode::Multimodal);
    assert!(defaults.storage.upload_dir.ends_with("uploads"));

    // A local config/settings file overrides the defaults.
    fs::create_dir_all(workspace.path().join("config")).expect("create config dir");
    fs::write(
        workspace.path().join("config/settings.toml"),
        "[server]\nlisten_addr = \"127.0.0.1:9003\"\n\n[analyzer]\ningestion = \"text_layer\"\n",
    )
    .expect("write config file");
    let from_file = config::load().expect("load config from file");
    assert_eq!(from_file.server.listen_addr, "127.0.0.1:9003");
    assert_eq!(from_file.analyzer.ingestion, IngestionMode::TextLayer);

    // Environment variables win over the file.
    env::set_var("FICHARIO__SERVER__LISTEN_ADDR", "127.0.0.1:9005");
    env::set_var("FICHARIO__ANALYZER__MODEL", "gemini-2.5-pro");
    let from_env = config::load().expect("load config with env override");
    assert_eq!(from_env.server.listen_addr, "127.0.0.1:9005");
    assert_eq!(from_env.analyzer.model, "gemini-2.5-pro");
    assert_eq!(from_env.analyzer.ingestion, IngestionMode::TextLayer);

    env::set_current_dir(&original_dir).expect("restore current dir");
    restore_env(env_snapshot);
}

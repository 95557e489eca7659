use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::db::SharedDb;
use crate::llm::LlmGateway;
use crate::retrieval::QueryService;
use crate::scheduler::Scheduler;
use crate::types::{expand_home, Config};

/// Shared application state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: SharedDb,
    pub llm: Arc<LlmGateway>,
    pub queries: Arc<QueryService>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        db: SharedDb,
        llm: Arc<LlmGateway>,
        shutdown: CancellationToken,
    ) -> Self {
        let queries = QueryService::new(
            db.clone(),
            llm.clone(),
            Duration::from_secs(config.llm.query_timeout_secs),
            shutdown.clone(),
        );
        Self {
            config: Arc::new(config),
            db,
            llm,
            queries: Arc::new(queries),
            scheduler: None,
            shutdown,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

/// Get the config file path (~/.prism/config.json, or `PRISM_CONFIG`)
pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("PRISM_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(expand_home(path.trim()));
        }
    }
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".prism").join("config.json"))
}

/// Load configuration. A missing file means defaults; a file that exists
/// but does not parse is an error. Environment overrides apply last.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    let mut config = if path.exists() {
        let content =
            fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?
    } else {
        log::info!("Config: {} not found, using defaults", path.display());
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());
    if let Some(db) = set("PRISM_DB") {
        config.database_path = db;
    }
    if let Some(dir) = set("PRISM_TRANSCRIPTS_DIR") {
        config.transcripts_dir = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_replace_paths() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "PRISM_DB" => Some("/tmp/prism-test.db".to_string()),
            "PRISM_TRANSCRIPTS_DIR" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.database_path, "/tmp/prism-test.db");
        assert_eq!(config.transcripts_dir, Config::default().transcripts_dir);
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "userName": "Sam", "pipeline": { "workers": 4 } }"#).unwrap();
        assert_eq!(config.user_name.as_deref(), Some("Sam"));
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.debounce_ms, 500);
        assert_eq!(config.llm.query_timeout_secs, 30);
        assert_eq!(config.learner.schedule, "0 0 2 * * *");
    }
}

//! File-backed trigger source — events.json under the OpsPilot home dir.
//!
//! The real calendar integration lives behind the `TriggerSource` trait;
//! this source reads a flat JSON array of events, which is enough for
//! wiring, demos, and manual testing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use opspilot_core::config::OpsPilotConfig;
use opspilot_core::error::Result;
use opspilot_core::traits::TriggerSource;
use opspilot_core::types::TriggerEvent;

pub struct FileTriggerSource {
    path: PathBuf,
}

impl FileTriggerSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Default events file (~/.opspilot/events.json).
    pub fn with_defaults() -> Self {
        Self::new(&OpsPilotConfig::home_dir().join("events.json"))
    }

    fn load(&self) -> Vec<TriggerEvent> {
        if !self.path.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {e}", self.path.display());
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TriggerSource for FileTriggerSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn upcoming(&self, lookahead: Duration) -> Result<Vec<TriggerEvent>> {
        let horizon = Utc::now() + lookahead;
        Ok(self
            .load()
            .into_iter()
            .filter(|e| e.fire_at <= horizon)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let source = FileTriggerSource::new(Path::new("/nonexistent/events.json"));
        let events = source.upcoming(Duration::minutes(5)).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_lookahead_filter() {
        let dir = std::env::temp_dir().join("opspilot-source-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("events.json");

        let events = vec![
            TriggerEvent {
                uid: "due".into(),
                title: "due now".into(),
                instructions: String::new(),
                fire_at: Utc::now() - Duration::minutes(1),
                occurrence: "o1".into(),
                recurring: false,
                delivery: Vec::new(),
            },
            TriggerEvent {
                uid: "far".into(),
                title: "far future".into(),
                instructions: String::new(),
                fire_at: Utc::now() + Duration::hours(2),
                occurrence: "o1".into(),
                recurring: false,
                delivery: Vec::new(),
            },
        ];
        std::fs::write(&path, serde_json::to_string(&events).unwrap()).unwrap();

        let source = FileTriggerSource::new(&path);
        let upcoming = source.upcoming(Duration::minutes(5)).await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].uid, "due");
        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Session and plan persistence.
//!
//! Backends:
//! - **memory**: process-local maps, for tests and one-shot runs
//! - **sqlite**: a single database file holding sessions, message logs,
//!   compactions and plans

pub mod in_memory;
mod manager;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::{InMemoryPlanStore, InMemorySessionBackend};
pub use manager::SessionManager;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqlitePlanStore, SqliteSessionBackend};

use rago_config::StoreConfig;
use rago_core::error::StoreError;
use rago_core::plan::PlanStore;
use rago_core::session::SessionBackend;
use std::sync::Arc;

/// The session backend and plan store selected by configuration.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionBackend>,
    pub plans: Arc<dyn PlanStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionBackend::new()),
            plans: Arc::new(InMemoryPlanStore::new()),
        }
    }

    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let path = config.db_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
                }
                let sessions = SqliteSessionBackend::new(&path.display().to_string()).await?;
                let plans = sessions.plan_store().await?;
                Ok(Self {
                    sessions: Arc::new(sessions),
                    plans: Arc::new(plans),
                })
            }
            "memory" => Ok(Self::in_memory()),
            other => Err(StoreError::Storage(format!("unknown store backend '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backend_selection() {
        let memory = StoreConfig {
            backend: "memory".into(),
            path: None,
        };
        assert_eq!(Stores::from_config(&memory).await.unwrap().sessions.name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let sqlite = StoreConfig {
            backend: "sqlite".into(),
            path: Some(dir.path().join("nested").join("sessions.db")),
        };
        let stores = Stores::from_config(&sqlite).await.unwrap();
        assert_eq!(stores.plans.name(), "sqlite");

        let bogus = StoreConfig {
            backend: "redis".into(),
            path: None,
        };
        assert!(Stores::from_config(&bogus).await.is_err());
    }
}

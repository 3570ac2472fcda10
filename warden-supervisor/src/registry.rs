//! Agent registry trait and an in-memory implementation

use crate::{Result, SupervisorError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use warden_core::agent::{AgentConfig, AgentRecord, AgentStatus};

/// Registry that physically starts, stops, pauses and resumes agents
///
/// The lifecycle manager is the only intended caller. `Ok(false)` reports a
/// refused or failed operation; `Err` reports that the registry itself broke.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// List all known agents
    async fn list_agents(&self) -> Result<Vec<AgentRecord>>;

    /// Look up a single agent
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>>;

    /// Start an agent
    async fn start_agent(&self, agent_id: &str, config: Option<&AgentConfig>) -> Result<bool>;

    /// Stop an agent
    async fn stop_agent(&self, agent_id: &str) -> Result<bool>;

    /// Pause an agent
    async fn pause_agent(&self, agent_id: &str) -> Result<bool>;

    /// Resume a paused agent
    async fn resume_agent(&self, agent_id: &str) -> Result<bool>;
}

/// In-process registry keeping agent records in memory
///
/// Workers report liveness through [`InMemoryRegistry::heartbeat`].
#[derive(Default)]
pub struct InMemoryRegistry {
    records: Arc<RwLock<HashMap<String, AgentRecord>>>,
    configs: Arc<RwLock<HashMap<String, AgentConfig>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stopped agent, replacing any previous record
    pub async fn register(&self, agent_id: impl Into<String>, name: impl Into<String>) {
        let record = AgentRecord::new(agent_id, name);
        debug!(agent_id = %record.id, "Registered agent");
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Record that the agent reported in
    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(agent_id)
            .ok_or_else(|| SupervisorError::AgentNotFound(agent_id.to_string()))?;
        record.last_seen = Utc::now();
        Ok(())
    }

    /// Overwrite the reported status, e.g. when a worker crashes
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(agent_id)
            .ok_or_else(|| SupervisorError::AgentNotFound(agent_id.to_string()))?;
        record.status = status;
        Ok(())
    }

    /// Configuration passed to the most recent start, if any
    pub async fn last_config(&self, agent_id: &str) -> Option<AgentConfig> {
        self.configs.read().await.get(agent_id).cloned()
    }

    async fn transition(
        &self,
        agent_id: &str,
        allowed: &[AgentStatus],
        to: AgentStatus,
    ) -> Result<bool> {
        let mut records = self.records.write().await;

        let Some(record) = records.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "Agent is not registered");
            return Ok(false);
        };

        if !allowed.contains(&record.status) {
            debug!(
                agent_id = %agent_id,
                status = ?record.status,
                target = ?to,
                "Refusing registry transition"
            );
            return Ok(false);
        }

        record.status = to;
        record.last_seen = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl AgentRegistry for InMemoryRegistry {
    async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let records = self.records.read().await;
        Ok(records.get(agent_id).cloned())
    }

    async fn start_agent(&self, agent_id: &str, config: Option<&AgentConfig>) -> Result<bool> {
        let started = self
            .transition(
                agent_id,
                &[AgentStatus::Stopped, AgentStatus::Failed],
                AgentStatus::Running,
            )
            .await?;

        if started {
            if let Some(config) = config {
                self.configs
                    .write()
                    .await
                    .insert(agent_id.to_string(), config.clone());
            }
        }

        Ok(started)
    }

    async fn stop_agent(&self, agent_id: &str) -> Result<bool> {
        self.transition(
            agent_id,
            &[
                AgentStatus::Running,
                AgentStatus::Paused,
                AgentStatus::Failed,
                AgentStatus::Stopped,
            ],
            AgentStatus::Stopped,
        )
        .await
    }

    async fn pause_agent(&self, agent_id: &str) -> Result<bool> {
        self.transition(agent_id, &[AgentStatus::Running], AgentStatus::Paused)
            .await
    }

    async fn resume_agent(&self, agent_id: &str) -> Result<bool> {
        self.transition(agent_id, &[AgentStatus::Paused], AgentStatus::Running)
            .await
    }
}

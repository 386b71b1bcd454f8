//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::cache::RedisCache;

const COMPONENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
///
/// Components that were disabled at startup (SKIP_EXTERNALS) report as
/// Warning and degrade the overall status instead of failing it.
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    cache: Option<RedisCache>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, cache: Option<RedisCache>) -> Self {
        Self { db_pool, cache }
    }

    /// Check all components concurrently and aggregate an overall state.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let (database, cache) = futures::join!(self.check_database(), self.check_cache());
        health_status.checks.insert("database".to_string(), database);
        health_status.checks.insert("cache".to_string(), cache);

        health_status.status = classify(&health_status.checks);
        health_status
    }

    async fn check_database(&self) -> ComponentHealth {
        let Some(pool) = &self.db_pool else {
            return ComponentHealth::warning(None, Some("disabled by configuration".to_string()));
        };

        match timeout(COMPONENT_TIMEOUT, check_database_health(pool)).await {
            Ok(Ok(response_time)) => {
                info!("Database health check: OK ({}ms)", response_time);
                ComponentHealth::up(Some(response_time))
            }
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }

    async fn check_cache(&self) -> ComponentHealth {
        let Some(cache) = &self.cache else {
            return ComponentHealth::warning(None, Some("disabled by configuration".to_string()));
        };

        match timeout(COMPONENT_TIMEOUT, check_cache_health(cache)).await {
            Ok(Ok(response_time)) => {
                info!("Cache health check: OK ({}ms)", response_time);
                ComponentHealth::up(Some(response_time))
            }
            Ok(Err(e)) => {
                error!("Cache health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Cache health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}

fn classify(checks: &HashMap<String, ComponentHealth>) -> HealthState {
    let mut state = HealthState::Healthy;
    for health in checks.values() {
        match health.status {
            ComponentState::Down => return HealthState::Unhealthy,
            ComponentState::Warning => state = HealthState::Degraded,
            ComponentState::Up => {}
        }
    }
    state
}

pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}

pub async fn check_cache_health(
    cache: &RedisCache,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match cache.get_connection().await {
        Ok(mut conn) => {
            let result: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut *conn).await;
            match result {
                Ok(_) => Ok(start.elapsed().as_millis()),
                Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            }
        }
        Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert!(matches!(up_health.status, ComponentState::Up));
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert!(matches!(down_health.status, ComponentState::Down));
        assert_eq!(down_health.details, Some("Test error".to_string()));

        let warning_health = ComponentHealth::warning(Some(500), Some("Slow response".to_string()));
        assert!(matches!(warning_health.status, ComponentState::Warning));
        assert_eq!(warning_health.response_time_ms, Some(500));
        assert_eq!(warning_health.details, Some("Slow response".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_components_degrade_instead_of_failing() {
        let checker = HealthChecker::new(None, None);
        let status = checker.check_health().await;

        assert!(matches!(status.status, HealthState::Degraded));
        assert!(status
            .checks
            .values()
            .all(|c| matches!(c.status, ComponentState::Warning)));
    }

    #[test]
    fn test_any_down_component_is_unhealthy() {
        let mut checks = HashMap::new();
        checks.insert("database".to_string(), ComponentHealth::up(Some(2)));
        checks.insert(
            "cache".to_string(),
            ComponentHealth::down(Some("connection refused".to_string())),
        );

        assert!(matches!(classify(&checks), HealthState::Unhealthy));
    }
}

//! # Sync Settings
//!
//! The behavioural half of the process-wide configuration. Credentials and
//! file/env loading live in `attio-sync`; these are the values the pure
//! policy functions read.

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_UPSERT_MATCH_FIELD};

// =============================================================================
// Execution Mode
// =============================================================================

/// How failures without an error handler are surfaced.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  STRICT (development)            │  LENIENT (production, default)       │
/// │  ─────────────────────           │  ─────────────────────────────       │
/// │  • log, then return Err          │  • log, then return Failed outcome   │
/// │  • bugs surface immediately      │  • workers keep running              │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Strict,
    #[default]
    Lenient,
}

impl ExecutionMode {
    pub fn is_strict(&self) -> bool {
        matches!(self, ExecutionMode::Strict)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Strict => write!(f, "strict"),
            ExecutionMode::Lenient => write!(f, "lenient"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" | "development" | "test" => Ok(ExecutionMode::Strict),
            "lenient" | "production" | "staging" => Ok(ExecutionMode::Lenient),
            other => Err(format!(
                "Unknown execution mode: '{}'. Valid options: strict, lenient",
                other
            )),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Master switch. When false nothing is synced or removed.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,

    /// Enqueue deferred tasks instead of calling the CRM inline.
    #[serde(default)]
    pub background_mode: bool,

    /// Entities per batch for bulk operations.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rate-limit retries performed by the call guard.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attribute used to match existing records on upsert.
    #[serde(default = "default_upsert_match_field")]
    pub upsert_match_field: String,

    /// Failure surfacing when no error handler is configured.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_upsert_match_field() -> String {
    DEFAULT_UPSERT_MATCH_FIELD.to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            sync_enabled: true,
            background_mode: false,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            upsert_match_field: default_upsert_match_field(),
            execution_mode: ExecutionMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert!(settings.sync_enabled);
        assert!(!settings.background_mode);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.upsert_match_field, "email");
        assert_eq!(settings.execution_mode, ExecutionMode::Lenient);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let settings: SyncSettings = serde_json::from_str(r#"{"batch_size": 25}"#).unwrap();
        assert_eq!(settings.batch_size, 25);
        assert!(settings.sync_enabled);
        assert_eq!(settings.upsert_match_field, "email");
    }

    #[test]
    fn test_execution_mode_parsing() {
        assert_eq!("development".parse::<ExecutionMode>().unwrap(), ExecutionMode::Strict);
        assert_eq!("production".parse::<ExecutionMode>().unwrap(), ExecutionMode::Lenient);
        assert!("chaotic".parse::<ExecutionMode>().is_err());
    }
}

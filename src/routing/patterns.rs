//! Registry of human-validated correlation patterns.
//!
//! The first occurrence of a correlation-key class is always escalated;
//! once a human validates the grouping, subsequent occurrences follow
//! normal banding. Validations persist across restarts and are never
//! auto-cleared.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

/// One human validation of a pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub validated_by: String,
    pub validated_at: DateTime<Utc>,
}

/// Persisted set of validated correlation-key classes.
pub struct PatternRegistry {
    path: Option<PathBuf>,
    validated: RwLock<HashMap<String, ValidationRecord>>,
}

impl PatternRegistry {
    /// Load the registry from disk, starting empty if the file does not
    /// exist. A corrupt file is treated as empty with a warning rather
    /// than refusing to start.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let validated = match Self::read_file(&path) {
            Ok(entries) => entries,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), "Pattern registry unreadable, starting empty: {}", e);
                }
                HashMap::new()
            }
        };
        Self {
            path: Some(path),
            validated: RwLock::new(validated),
        }
    }

    /// In-memory registry for tests.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            validated: RwLock::new(HashMap::new()),
        }
    }

    fn read_file(path: &Path) -> Result<HashMap<String, ValidationRecord>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open pattern registry: {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse pattern registry: {}", path.display()))
    }

    /// Whether a human has validated this correlation-key class.
    pub fn is_validated(&self, key_class: &str) -> bool {
        self.validated.read().unwrap().contains_key(key_class)
    }

    /// Record a human validation and persist it.
    pub fn mark_validated(&self, key_class: &str, validated_by: &str) -> Result<()> {
        {
            let mut validated = self.validated.write().unwrap();
            validated.insert(
                key_class.to_string(),
                ValidationRecord {
                    validated_by: validated_by.to_string(),
                    validated_at: Utc::now(),
                },
            );
        }
        info!(pattern = %key_class, by = %validated_by, "Correlation pattern validated");
        self.save()
    }

    pub fn len(&self) -> usize {
        self.validated.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist atomically: write to a temporary file, then rename, so the
    /// registry is never left in a partial state.
    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let temp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path)
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
            let mut writer = BufWriter::new(file);
            let validated = self.validated.read().unwrap();
            serde_json::to_writer_pretty(&mut writer, &*validated)
                .with_context(|| format!("Failed to serialize registry to: {}", temp_path.display()))?;
            writer.flush()?;
            writer
                .get_ref()
                .sync_all()
                .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;
        }

        fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }
}

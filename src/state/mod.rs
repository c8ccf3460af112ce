// State module - Persistent storage for settings and the process list

use crate::config::GlobalSettings;
use crate::error::{Result, WardenError};
use crate::process::ProcessRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Everything the watchdog persists: global settings plus the process list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default)]
    pub settings: GlobalSettings,

    #[serde(default)]
    pub processes: Vec<ProcessRecord>,
}

impl SettingsDocument {
    pub fn new(settings: GlobalSettings, processes: Vec<ProcessRecord>) -> Self {
        Self {
            settings,
            processes,
        }
    }

    /// Validate the document structure
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        // Check for duplicate process names (case-insensitive)
        let mut seen_names = HashSet::new();
        for process in &self.processes {
            process.validate()?;

            if !seen_names.insert(process.key()) {
                return Err(WardenError::ConfigValidationError(format!(
                    "Duplicate process name found: {}",
                    process.name
                )));
            }
        }

        Ok(())
    }

    /// Carry the restart bookkeeping of `live` over to the records of this
    /// document with the same name. Everything else, including records only
    /// one side knows, stays as this document has it.
    pub fn merge_runtime(&mut self, live: &[ProcessRecord]) {
        for record in &mut self.processes {
            let key = record.key();
            if let Some(current) = live.iter().find(|l| l.key() == key) {
                record.restart_count = current.restart_count;
                record.auto_restart_enabled = current.auto_restart_enabled;
                record.last_restart_at = current.last_restart_at;
                record.last_scheduled_restart_at = current.last_scheduled_restart_at;
            }
        }
    }
}

/// On-disk encoding, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Ok(DocumentFormat::Json),
            Some("toml") => Ok(DocumentFormat::Toml),
            Some(ext) => Err(WardenError::InvalidConfig(format!(
                "Unsupported settings file format: {}",
                ext
            ))),
            None => Err(WardenError::InvalidConfig(
                "Settings file has no extension".to_string(),
            )),
        }
    }
}

/// Settings store handles persistence of the settings document to disk
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    format: DocumentFormat,
}

impl SettingsStore {
    /// Create a new settings store. The format follows the file extension.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = DocumentFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    /// Load the document from disk. A missing file yields the defaults.
    pub fn load(&self) -> Result<SettingsDocument> {
        if !self.path.exists() {
            return Ok(SettingsDocument::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            WardenError::SettingsLoadError(format!("Failed to read settings file: {}", e))
        })?;

        let mut document: SettingsDocument = match self.format {
            DocumentFormat::Json => serde_json::from_str(&content).map_err(|e| {
                WardenError::SettingsLoadError(format!("Failed to parse settings file: {}", e))
            })?,
            DocumentFormat::Toml => toml::from_str(&content).map_err(|e| {
                WardenError::SettingsLoadError(format!("Failed to parse settings file: {}", e))
            })?,
        };

        document.validate()?;

        // Runtime state does not survive a restart of the watchdog
        for process in &mut document.processes {
            process.is_running = false;
            process.pid = None;
            process.check_counter = 0;
        }

        Ok(document)
    }

    /// Save the document with an atomic write
    pub fn save(&self, document: &SettingsDocument) -> Result<()> {
        document.validate()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                WardenError::SettingsSaveError(format!(
                    "Failed to create settings directory: {}",
                    e
                ))
            })?;
        }

        let encoded = match self.format {
            DocumentFormat::Json => serde_json::to_string_pretty(document)
                .map_err(|e| WardenError::SerializationError(e.to_string()))?,
            DocumentFormat::Toml => toml::to_string_pretty(document)
                .map_err(|e| WardenError::SerializationError(e.to_string()))?,
        };

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                WardenError::SettingsSaveError(format!(
                    "Failed to create temp settings file: {}",
                    e
                ))
            })?;

            let mut writer = BufWriter::new(file);
            writer.write_all(encoded.as_bytes()).map_err(|e| {
                WardenError::SettingsSaveError(format!("Failed to write settings file: {}", e))
            })?;
            writer.flush().map_err(|e| {
                WardenError::SettingsSaveError(format!("Failed to flush settings file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            WardenError::SettingsSaveError(format!(
                "Failed to rename temp settings file: {}",
                e
            ))
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }
}

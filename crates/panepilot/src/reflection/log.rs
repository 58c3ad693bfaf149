//! The bounded, persisted log of past reflections.
//!
//! Stored as a pretty-printed JSON array. The newest [`REFLECTION_LOG_LIMIT`]
//! entries are kept; older ones are dropped on load and on every push.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::CommandReflection;

pub const REFLECTION_LOG_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct ReflectionLog {
    path: PathBuf,
    entries: Vec<CommandReflection>,
    limit: usize,
}

impl ReflectionLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
            limit: REFLECTION_LOG_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[CommandReflection] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read entries from disk. A missing or empty file is not an error.
    /// Returns the number of entries kept.
    pub fn load(&mut self) -> Result<usize, String> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(format!("Failed to read reflection log: {e}")),
        };
        if json.trim().is_empty() {
            return Ok(0);
        }
        let loaded: Vec<CommandReflection> = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse reflection log: {e}"))?;
        self.entries.extend(loaded);
        self.prune();
        Ok(self.entries.len())
    }

    /// Append and prune. Returns the number of entries dropped.
    pub fn push(&mut self, reflection: CommandReflection) -> usize {
        self.entries.push(reflection);
        self.prune()
    }

    fn prune(&mut self) -> usize {
        if self.limit == 0 || self.entries.len() <= self.limit {
            return 0;
        }
        let dropped = self.entries.len() - self.limit;
        self.entries.drain(..dropped);
        info!("Reflection log trimmed, removed {dropped} older entries");
        dropped
    }

    /// Write the log atomically: temp file, then rename.
    pub fn persist(&self) -> Result<(), String> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create reflection log dir: {e}"))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| format!("Failed to serialize reflection log: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("Failed to write temp reflection log: {e}"))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("Failed to rename reflection log: {e}"))
    }

    /// Push and persist, logging rather than failing on write errors.
    pub fn record(&mut self, reflection: CommandReflection) {
        self.push(reflection);
        if let Err(e) = self.persist() {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reflection(n: usize) -> CommandReflection {
        CommandReflection {
            command: format!("cmd-{n}"),
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReflectionLog::new(dir.path().join("lessons-learned.json"));
        assert_eq!(log.load().unwrap(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn push_keeps_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReflectionLog::new(dir.path().join("log.json"));
        let mut dropped = 0;
        for n in 0..=REFLECTION_LOG_LIMIT {
            dropped += log.push(reflection(n));
        }
        assert_eq!(dropped, 1);
        assert_eq!(log.len(), REFLECTION_LOG_LIMIT);
        assert_eq!(log.entries()[0].command, "cmd-1");
        assert_eq!(
            log.entries().last().unwrap().command,
            format!("cmd-{REFLECTION_LOG_LIMIT}")
        );
    }

    #[test]
    fn persist_and_reload_prunes_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("log.json");

        let mut log = ReflectionLog::new(path.clone()).with_limit(0);
        for n in 0..5 {
            log.push(reflection(n));
        }
        log.persist().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let mut reloaded = ReflectionLog::new(path).with_limit(3);
        assert_eq!(reloaded.load().unwrap(), 3);
        assert_eq!(reloaded.entries()[0].command, "cmd-2");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = ReflectionLog::new(path).load().unwrap_err();
        assert!(err.contains("parse"));
    }
}

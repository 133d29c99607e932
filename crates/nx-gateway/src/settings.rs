//! Live console settings
//!
//! The policy engine reads an `Arc` snapshot on every check, so a concurrent
//! update never produces a torn read: a validation sees either the old
//! settings or the new ones. Updates are serialized and only go live once
//! they are on disk.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use nx_core::config::{self, ConsoleConfig};
use nx_core::ConfigError;

/// Process-wide console settings with optional persistence
pub struct ConsoleSettings {
    current: RwLock<Arc<ConsoleConfig>>,
    path: Option<PathBuf>,
    /// Held across read-modify-save-swap
    update_lock: Mutex<()>,
}

impl ConsoleSettings {
    /// In-memory settings, never written to disk
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            path: None,
            update_lock: Mutex::new(()),
        }
    }

    /// Settings persisted to `path`.
    ///
    /// A previously saved file wins over `initial`; an unreadable file is
    /// logged and ignored.
    pub fn load_or(initial: ConsoleConfig, path: PathBuf) -> Self {
        let config = if path.exists() {
            match config::load_config::<ConsoleConfig>(&path) {
                Ok(saved) => {
                    tracing::info!("Loaded console settings from {:?}", path);
                    saved
                }
                Err(e) => {
                    tracing::warn!("Ignoring console settings at {:?}: {}", path, e);
                    initial
                }
            }
        } else {
            initial
        };

        Self {
            current: RwLock::new(Arc::new(config)),
            path: Some(path),
            update_lock: Mutex::new(()),
        }
    }

    /// Current settings
    pub fn snapshot(&self) -> Arc<ConsoleConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Whether new consoles may be opened
    pub fn is_enabled(&self) -> bool {
        self.snapshot().enabled
    }

    /// Flip the global console switch
    pub fn set_enabled(&self, enabled: bool) -> Result<Arc<ConsoleConfig>, ConfigError> {
        let updated = self.update(|config| config.enabled = enabled)?;
        tracing::info!(
            "Console access {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(updated)
    }

    /// Apply a change and persist the result.
    ///
    /// On a failed save the live settings are left untouched.
    pub fn update<F>(&self, change: F) -> Result<Arc<ConsoleConfig>, ConfigError>
    where
        F: FnOnce(&mut ConsoleConfig),
    {
        let _serialized = self.update_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut next = ConsoleConfig::clone(&self.snapshot());
        change(&mut next);

        if let Some(path) = &self.path {
            config::save_config(path, &next)?;
            tracing::debug!("Saved console settings to {:?}", path);
        }

        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let settings = ConsoleSettings::new(ConsoleConfig::default());
        let before = settings.snapshot();

        settings.update(|c| c.allow_sudo = true).unwrap();

        assert!(!before.allow_sudo);
        assert!(settings.snapshot().allow_sudo);
    }

    #[test]
    fn test_toggle() {
        let settings = ConsoleSettings::new(ConsoleConfig::default());
        assert!(settings.is_enabled());
        settings.set_enabled(false).unwrap();
        assert!(!settings.is_enabled());
    }

    #[test]
    fn test_persisted_settings_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");

        let settings = ConsoleSettings::load_or(ConsoleConfig::default(), path.clone());
        settings
            .update(|c| c.blocked_paths = vec!["/srv".to_string()])
            .unwrap();
        settings.set_enabled(false).unwrap();

        let reloaded = ConsoleSettings::load_or(ConsoleConfig::default(), path);
        let snapshot = reloaded.snapshot();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.blocked_paths, vec!["/srv".to_string()]);
    }

    #[test]
    fn test_failed_save_keeps_live_settings() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let settings =
            ConsoleSettings::load_or(ConsoleConfig::default(), blocker.join("console.toml"));
        assert!(settings.set_enabled(false).is_err());
        assert!(settings.is_enabled());

        assert!(settings.update(|c| c.allow_sudo = true).is_err());
        assert!(!settings.snapshot().allow_sudo);
    }

    #[test]
    fn test_concurrent_updates_all_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");
        let settings = Arc::new(ConsoleSettings::load_or(
            ConsoleConfig::default(),
            path.clone(),
        ));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let settings = Arc::clone(&settings);
                std::thread::spawn(move || {
                    settings
                        .update(|c| c.blocked_paths.push(format!("/srv/{}", i)))
                        .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let live = settings.snapshot();
        assert_eq!(
            live.blocked_paths.len(),
            ConsoleConfig::default().blocked_paths.len() + 8
        );
        let reloaded = ConsoleSettings::load_or(ConsoleConfig::default(), path);
        assert_eq!(*reloaded.snapshot(), *live);
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::storage::StorageError;
use crate::traits::StorageBackend;

pub const PREFERENCES_KEY: &str = "user_preferences";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub email: bool,
    pub push: bool,
    pub pipeline_alerts: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: false,
            pipeline_alerts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardPreferences {
    pub refresh_interval_secs: u64,
    pub compact_mode: bool,
    pub default_view: String,
}

impl Default for DashboardPreferences {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            compact_mode: false,
            default_view: "overview".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPreferences {
    pub theme: Theme,
    pub language: String,
    pub timezone: String,
    pub notifications: NotificationPreferences,
    pub dashboard: DashboardPreferences,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            notifications: NotificationPreferences::default(),
            dashboard: DashboardPreferences::default(),
        }
    }
}

// Owns the current preferences and writes every change back to storage.
// Subscribers see each committed value.
pub struct PreferencesManager {
    backend: Arc<dyn StorageBackend>,
    current: Mutex<UserPreferences>,
    notifier: watch::Sender<UserPreferences>,
}

impl PreferencesManager {
    // Missing or unreadable stored preferences fall back to defaults.
    pub async fn load(backend: Arc<dyn StorageBackend>) -> Result<Self, StorageError> {
        let prefs: UserPreferences = match backend.get_item(PREFERENCES_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Stored preferences are corrupt, using defaults: {}", e);
                UserPreferences::default()
            }),
            None => UserPreferences::default(),
        };

        let (notifier, _) = watch::channel(prefs.clone());
        Ok(Self {
            backend,
            current: Mutex::new(prefs),
            notifier,
        })
    }

    pub async fn get(&self) -> UserPreferences {
        self.current.lock().await.clone()
    }

    // Example:
    // prefs.update(|p| p.theme = Theme::Dark).await?;
    pub async fn update<F>(&self, change: F) -> Result<UserPreferences, StorageError>
    where
        F: FnOnce(&mut UserPreferences),
    {
        let mut current = self.current.lock().await;
        let mut next = current.clone();
        change(&mut next);
        if next == *current {
            return Ok(next);
        }

        self.persist(&next).await?;
        *current = next.clone();
        self.notifier.send_replace(next.clone());
        debug!("Preferences updated");
        Ok(next)
    }

    pub async fn reset(&self) -> Result<UserPreferences, StorageError> {
        self.update(|prefs| *prefs = UserPreferences::default()).await
    }

    pub fn subscribe(&self) -> watch::Receiver<UserPreferences> {
        self.notifier.subscribe()
    }

    async fn persist(&self, prefs: &UserPreferences) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(prefs)?;
        self.backend.set_item(PREFERENCES_KEY, &encoded).await
    }
}

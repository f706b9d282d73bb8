use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::debounce::Debouncer;
use crate::error::ProviderError;
use crate::provider::{Provider, ProviderKind, ProviderOptions, create_provider};
use crate::wordpress::WordPressClient;

/// Key the settings blob is stored under.
pub const STORAGE_KEY: &str = "postforge-settings";
pub const PERSIST_QUIET_PERIOD: Duration = Duration::from_secs(1);

/// Non-secret configuration. The WordPress application password is never
/// part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub site_url: String,
    pub username: String,
    pub sitemap_url: String,
    pub url_limit: usize,
    pub provider: ProviderKind,
    pub api_keys: BTreeMap<ProviderKind, String>,
    /// Model id, only used by providers that accept free text.
    pub model: String,
    pub image_provider: Option<ProviderKind>,
    /// Relay prefix for sitemap fetches and link checks.
    pub cors_relay: Option<String>,
    pub target_word_count: u32,
    pub remember: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            username: String::new(),
            sitemap_url: String::new(),
            url_limit: 50,
            provider: ProviderKind::Gemini,
            api_keys: BTreeMap::new(),
            model: String::new(),
            image_provider: None,
            cors_relay: None,
            target_word_count: 1500,
            remember: true,
        }
    }
}

impl Settings {
    /// Entered key, else `POSTFORGE_<PROVIDER>_API_KEY`.
    pub fn api_key(&self, kind: ProviderKind) -> Option<String> {
        self.api_keys
            .get(&kind)
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty())
            .or_else(|| {
                std::env::var(kind.api_key_env())
                    .ok()
                    .map(|key| key.trim().to_owned())
                    .filter(|key| !key.is_empty())
            })
    }

    pub fn provider_options(&self, kind: ProviderKind) -> ProviderOptions {
        ProviderOptions {
            api_key: self.api_key(kind).unwrap_or_default(),
            model: Some(self.model.clone()).filter(|m| !m.trim().is_empty()),
            base_url: std::env::var(kind.base_url_env()).ok(),
            client: None,
        }
    }

    pub fn image_provider(&self) -> ProviderKind {
        self.image_provider.unwrap_or(self.provider)
    }

    pub fn cors_relay(&self) -> Option<&str> {
        self.cors_relay
            .as_deref()
            .map(str::trim)
            .filter(|relay| !relay.is_empty())
    }

    pub fn text_provider(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        create_provider(self.provider, &self.provider_options(self.provider))
    }

    pub fn image_provider_client(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        let kind = self.image_provider();
        create_provider(kind, &self.provider_options(kind))
    }

    pub fn wordpress_client(&self, application_password: &str) -> anyhow::Result<WordPressClient> {
        if self.site_url.trim().is_empty() {
            anyhow::bail!("site url is not configured");
        }
        if self.username.trim().is_empty() {
            anyhow::bail!("WordPress username is not configured");
        }
        if application_password.trim().is_empty() {
            anyhow::bail!("WordPress application password is missing (POSTFORGE_WP_APP_PASSWORD)");
        }
        Ok(WordPressClient::new(
            &self.site_url,
            &self.username,
            application_password,
        ))
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<Settings>>;
    async fn save(&self, settings: &Settings) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsSettingsStore {
    base_dir: PathBuf,
}

impl LocalFsSettingsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `$POSTFORGE_CONFIG_DIR`, else the platform config dir.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(dir) = std::env::var("POSTFORGE_CONFIG_DIR")
            && !dir.trim().is_empty()
        {
            return Ok(Self::new(dir));
        }
        let base = dirs::config_dir().context("no config directory on this platform")?;
        Ok(Self::new(base.join("postforge")))
    }

    pub fn path(&self) -> PathBuf {
        self.base_dir.join(format!("{STORAGE_KEY}.json"))
    }
}

#[async_trait]
impl SettingsStore for LocalFsSettingsStore {
    async fn load(&self) -> anyhow::Result<Option<Settings>> {
        let path = self.path();
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        write_json_atomic(&self.path(), settings)
            .await
            .context("write settings")
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let path = self.path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove: {}", path.display())),
        }
    }
}

/// Debounced writer in front of a [`SettingsStore`].
pub struct PersistedSettings {
    store: Arc<dyn SettingsStore>,
    writer: Debouncer<Settings>,
}

impl PersistedSettings {
    pub fn new(store: Arc<dyn SettingsStore>, quiet: Duration) -> Self {
        let target = Arc::clone(&store);
        let writer = Debouncer::new(quiet, move |settings: Settings| {
            let target = Arc::clone(&target);
            async move {
                match target.save(&settings).await {
                    Ok(()) => tracing::debug!("settings saved"),
                    Err(err) => tracing::warn!(error = %format!("{err:#}"), "save settings failed"),
                }
            }
        });
        Self { store, writer }
    }

    pub async fn load(&self) -> anyhow::Result<Settings> {
        Ok(self.store.load().await?.unwrap_or_default())
    }

    /// Schedules a write, or clears storage when the user opted out.
    pub async fn update(&self, settings: &Settings) -> anyhow::Result<()> {
        if settings.remember {
            self.writer.call(settings.clone());
            return Ok(());
        }
        self.reset().await
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        self.writer.cancel();
        self.store.clear().await.context("clear settings")
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        saves: Mutex<Vec<Settings>>,
        clears: Mutex<usize>,
    }

    #[async_trait]
    impl SettingsStore for RecordingStore {
        async fn load(&self) -> anyhow::Result<Option<Settings>> {
            Ok(self.saves.lock().unwrap_or_else(|e| e.into_inner()).last().cloned())
        }

        async fn save(&self, settings: &Settings) -> anyhow::Result<()> {
            self.saves
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(settings.clone());
            Ok(())
        }

        async fn clear(&self) -> anyhow::Result<()> {
            *self.clears.lock().unwrap_or_else(|e| e.into_inner()) += 1;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_are_written_once_with_last_values() -> anyhow::Result<()> {
        let store = Arc::new(RecordingStore::default());
        let persisted = PersistedSettings::new(store.clone(), PERSIST_QUIET_PERIOD);

        let mut settings = Settings::default();
        for n in 0..10 {
            settings.site_url = format!("https://site-{n}.example");
            persisted.update(&settings).await?;
            tokio::time::sleep(Duration::from_millis(90)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let saves = store.saves.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].site_url, "https://site-9.example");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn opting_out_clears_storage_and_drops_pending_write() -> anyhow::Result<()> {
        let store = Arc::new(RecordingStore::default());
        let persisted = PersistedSettings::new(store.clone(), PERSIST_QUIET_PERIOD);

        let mut settings = Settings::default();
        persisted.update(&settings).await?;
        settings.remember = false;
        persisted.update(&settings).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.saves.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
        assert_eq!(*store.clears.lock().unwrap_or_else(|e| e.into_inner()), 1);
        Ok(())
    }

    #[tokio::test]
    async fn local_store_round_trips_and_clears() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsSettingsStore::new(temp.path());
        assert_eq!(store.load().await?, None);

        let mut settings = Settings::default();
        settings.username = "editor".to_owned();
        settings
            .api_keys
            .insert(ProviderKind::Openai, "sk-entered".to_owned());
        store.save(&settings).await?;

        let raw = std::fs::read_to_string(store.path())?;
        assert!(raw.contains("\"username\": \"editor\""));
        assert!(!raw.to_lowercase().contains("password"));
        assert_eq!(store.load().await?, Some(settings));

        store.clear().await?;
        store.clear().await?;
        assert_eq!(store.load().await?, None);
        Ok(())
    }

    #[test]
    fn entered_key_wins_over_blank() {
        let mut settings = Settings::default();
        settings
            .api_keys
            .insert(ProviderKind::Claude, "  sk-ant  ".to_owned());
        assert_eq!(settings.api_key(ProviderKind::Claude).as_deref(), Some("sk-ant"));
        assert_eq!(settings.image_provider(), ProviderKind::Gemini);
    }

    #[test]
    fn wordpress_client_needs_site_user_and_password() {
        let mut settings = Settings::default();
        assert!(settings.wordpress_client("pw").is_err());
        settings.site_url = "https://blog.example/".to_owned();
        settings.username = "admin".to_owned();
        assert!(settings.wordpress_client("  ").is_err());
        let client = settings.wordpress_client("pw").map(|c| c.site_url().to_owned());
        assert_eq!(client.ok().as_deref(), Some("https://blog.example"));
    }
}

//! Application state container.
//!
//! All state lives in one [`AppState`] value that only changes through the
//! closed set of [`Action`]s applied by the pure [`reduce`] function.
//! [`Store::dispatch`] applies one transition under a lock, so concurrently
//! running operations each finish by dispatching a discrete transition and
//! never race on a read-modify-write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::formats::{ArticleDraft, DuplicateFinding, ImageSlot, PostSummary, PublishMode};
use crate::provider::{KeyStatus, ProviderKind};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    #[default]
    Config,
    Content,
    ReviewPublish,
}

impl WizardStep {
    pub fn next(self) -> Self {
        match self {
            WizardStep::Config => WizardStep::Content,
            WizardStep::Content | WizardStep::ReviewPublish => WizardStep::ReviewPublish,
        }
    }

    pub fn back(self) -> Self {
        match self {
            WizardStep::Config | WizardStep::Content => WizardStep::Config,
            WizardStep::ReviewPublish => WizardStep::Content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    FetchSitemap,
    LoadPosts,
    AnalyzePosts,
    Generate,
    RegenerateImage,
    Publish,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Credential {
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: KeyStatus,
}

pub type CredentialSet = BTreeMap<ProviderKind, Credential>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishResult {
    Success {
        post_id: u64,
        link: String,
        mode: PublishMode,
    },
    Failure {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppState {
    pub step: WizardStep,
    pub settings: Settings,
    pub credentials: CredentialSet,
    pub sitemap_urls: Vec<String>,
    pub posts: Vec<PostSummary>,
    pub source_text: String,
    pub editing_post: Option<u64>,
    pub draft: Option<ArticleDraft>,
    pub duplicate: Option<DuplicateFinding>,
    pub publish_mode: PublishMode,
    pub result: Option<PublishResult>,
    /// Append order; see [`AppState::log_newest_first`].
    pub log: Vec<String>,
    pub busy: BTreeSet<Operation>,
}

impl AppState {
    pub fn with_settings(settings: Settings) -> Self {
        reduce(Self::default(), Action::UpdateSettings(settings))
    }

    pub fn log_newest_first(&self) -> Vec<String> {
        self.log.iter().rev().cloned().collect()
    }

    /// Post the next publish should overwrite, if any.
    pub fn target_post_id(&self) -> Option<u64> {
        self.editing_post
            .or_else(|| self.duplicate.as_ref().map(|finding| finding.post_id))
    }

    pub fn is_busy(&self, operation: Operation) -> bool {
        self.busy.contains(&operation)
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    UpdateSettings(Settings),
    SetKeyStatus {
        provider: ProviderKind,
        status: KeyStatus,
    },
    NextStep,
    BackStep,
    SitemapLoaded(Vec<String>),
    PostsLoaded(Vec<PostSummary>),
    KeywordIdentified {
        post_id: u64,
        keyword: String,
    },
    EditPost {
        post_id: u64,
        source_text: String,
    },
    SetSourceText(String),
    DraftGenerated {
        draft: ArticleDraft,
        duplicate: Option<DuplicateFinding>,
    },
    DraftEdited(ArticleDraft),
    ImageUpdated {
        slot: ImageSlot,
        image: Option<String>,
    },
    SetPublishMode(PublishMode),
    Published {
        post_id: u64,
        link: String,
        mode: PublishMode,
    },
    PublishFailed(String),
    Log(String),
    Begin(Operation),
    Finish(Operation),
    /// Starts a new article; configuration and fetched lists are kept.
    Reset,
}

pub fn reduce(mut state: AppState, action: Action) -> AppState {
    match action {
        Action::UpdateSettings(settings) => {
            for kind in ProviderKind::ALL {
                let secret = settings.api_key(kind).unwrap_or_default();
                let entry = state.credentials.entry(kind).or_default();
                if entry.secret != secret {
                    entry.secret = secret;
                    entry.status = KeyStatus::Idle;
                }
            }
            state.settings = settings;
        }
        Action::SetKeyStatus { provider, status } => {
            state.credentials.entry(provider).or_default().status = status;
        }
        Action::NextStep => state.step = state.step.next(),
        Action::BackStep => state.step = state.step.back(),
        Action::SitemapLoaded(urls) => state.sitemap_urls = urls,
        Action::PostsLoaded(posts) => state.posts = posts,
        Action::KeywordIdentified { post_id, keyword } => {
            if let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id) {
                post.keyword = Some(keyword);
            }
        }
        Action::EditPost {
            post_id,
            source_text,
        } => {
            state.editing_post = Some(post_id);
            state.source_text = source_text;
            state.publish_mode = PublishMode::Update;
            state.draft = None;
            state.duplicate = None;
            state.result = None;
            state.step = WizardStep::Content;
        }
        Action::SetSourceText(text) => state.source_text = text,
        Action::DraftGenerated { draft, duplicate } => {
            state.publish_mode = if duplicate.is_some() || state.editing_post.is_some() {
                PublishMode::Update
            } else {
                PublishMode::New
            };
            state.draft = Some(draft);
            state.duplicate = duplicate;
            state.result = None;
            state.step = WizardStep::ReviewPublish;
        }
        Action::DraftEdited(draft) => state.draft = Some(draft),
        Action::ImageUpdated { slot, image } => {
            if let Some(draft) = state.draft.as_mut() {
                draft.set_image(&slot, image);
            }
        }
        Action::SetPublishMode(mode) => state.publish_mode = mode,
        Action::Published {
            post_id,
            link,
            mode,
        } => {
            if mode == PublishMode::Update
                && let Some(post) = state.posts.iter_mut().find(|p| p.id == post_id)
            {
                post.updated_in_session = true;
            }
            state.result = Some(PublishResult::Success {
                post_id,
                link,
                mode,
            });
        }
        Action::PublishFailed(message) => {
            state.result = Some(PublishResult::Failure { message });
        }
        Action::Log(line) => state.log.push(line),
        Action::Begin(operation) => {
            state.busy.insert(operation);
        }
        Action::Finish(operation) => {
            state.busy.remove(&operation);
        }
        Action::Reset => {
            state.source_text.clear();
            state.editing_post = None;
            state.draft = None;
            state.duplicate = None;
            state.publish_mode = PublishMode::New;
            state.result = None;
            state.log.clear();
            state.step = WizardStep::Content;
        }
    }
    state
}

#[derive(Debug, Default)]
pub struct Store {
    state: Mutex<AppState>,
}

impl Store {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn dispatch(&self, action: Action) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = std::mem::take(&mut *guard);
        *guard = reduce(current, action);
    }

    pub fn snapshot(&self) -> AppState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reads one field without cloning the whole state.
    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Appends a progress line to the log stream.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{line}");
        self.dispatch(Action::Log(line));
    }

    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::warn!("{line}");
        self.dispatch(Action::Log(format!("warning: {line}")));
    }

    /// Marks `kind`'s key as validating and returns the secret to check.
    /// `None` when the key is blank or a check of the same key is running.
    pub fn begin_key_check(&self, kind: ProviderKind) -> Option<String> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let credential = guard.credentials.get(&kind)?;
        if credential.secret.is_empty() || credential.status == KeyStatus::Validating {
            return None;
        }
        let secret = credential.secret.clone();
        let current = std::mem::take(&mut *guard);
        *guard = reduce(
            current,
            Action::SetKeyStatus {
                provider: kind,
                status: KeyStatus::Validating,
            },
        );
        Some(secret)
    }

    /// Records the result of a key check unless the key was edited while it
    /// ran. Returns whether the status was applied.
    pub fn finish_key_check(&self, kind: ProviderKind, secret: &str, status: KeyStatus) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let unchanged = guard
            .credentials
            .get(&kind)
            .is_some_and(|credential| credential.secret == secret);
        if unchanged {
            let current = std::mem::take(&mut *guard);
            *guard = reduce(
                current,
                Action::SetKeyStatus {
                    provider: kind,
                    status,
                },
            );
        }
        unchanged
    }

    /// Marks `operation` busy unless it already is. The flag clears when the
    /// guard drops.
    pub fn try_begin(self: &Arc<Self>, operation: Operation) -> Option<BusyGuard> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_busy(operation) {
            return None;
        }
        let current = std::mem::take(&mut *guard);
        *guard = reduce(current, Action::Begin(operation));
        Some(BusyGuard {
            store: Arc::clone(self),
            operation,
        })
    }
}

pub struct BusyGuard {
    store: Arc<Store>,
    operation: Operation,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.store.dispatch(Action::Finish(self.operation));
    }
}

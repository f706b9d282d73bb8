use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use axum::routing::{get, post, put};
use clap::Parser;
use serde::Deserialize;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use postforge::analyze::analyze_posts;
use postforge::debounce::Debouncer;
use postforge::error::PublishError;
use postforge::formats::{ArticleDraft, ImageSlot, PostSummary, PublishMode};
use postforge::pipeline::{ContentPipeline, PipelineOptions, PipelineResult};
use postforge::prompt::UpdateContext;
use postforge::provider::{KeyStatus, ProviderKind};
use postforge::publish::{PublishOutcome, publish_draft};
use postforge::runner::{DEFAULT_DELAY, Outcome};
use postforge::settings::{
    LocalFsSettingsStore, PERSIST_QUIET_PERIOD, PersistedSettings, Settings,
};
use postforge::sitemap::fetch_sitemap_urls;
use postforge::state::{Action, AppState, Operation, Store, WizardStep};
use postforge::wordpress::WordPressClient;

const KEY_CHECK_QUIET_PERIOD: Duration = Duration::from_millis(800);

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Static web assets directory (serve if exists).
    #[arg(long, default_value = "web/dist")]
    web_dir: PathBuf,

    /// WordPress application password; can also be sent with the settings.
    #[arg(long, env = "POSTFORGE_WP_APP_PASSWORD", hide_env_values = true)]
    wp_password: Option<String>,
}

#[derive(Clone)]
struct AppCtx {
    store: Arc<Store>,
    persisted: Arc<PersistedSettings>,
    /// Held in memory only.
    wp_password: Arc<RwLock<String>>,
    /// One debouncer per provider so edits to different keys never cancel each other.
    key_check: Arc<BTreeMap<ProviderKind, Debouncer<ProviderKind>>>,
    http: reqwest::Client,
}

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

impl AppCtx {
    fn settings(&self) -> Settings {
        self.store.read(|state| state.settings.clone())
    }

    fn wordpress(&self) -> Result<WordPressClient, ApiError> {
        let password = self
            .wp_password
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.settings()
            .wordpress_client(&password)
            .map(|wp| wp.with_client(self.http.clone()))
            .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))
    }

    fn begin(&self, operation: Operation) -> Result<postforge::state::BusyGuard, ApiError> {
        self.store
            .try_begin(operation)
            .ok_or_else(|| (StatusCode::CONFLICT, format!("{operation:?} is already running")))
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    postforge::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(addr = %args.addr, web_dir = %args.web_dir.display(), "starting postforge-app");

    let settings_store = LocalFsSettingsStore::from_env()?;
    tracing::info!(path = %settings_store.path().display(), "settings location");
    let persisted = Arc::new(PersistedSettings::new(
        Arc::new(settings_store),
        PERSIST_QUIET_PERIOD,
    ));
    let settings = persisted.load().await?;
    let store = Arc::new(Store::new(AppState::with_settings(settings)));

    let key_check: BTreeMap<ProviderKind, Debouncer<ProviderKind>> = ProviderKind::ALL
        .into_iter()
        .map(|kind| {
            let check_store = Arc::clone(&store);
            let debouncer = Debouncer::new(KEY_CHECK_QUIET_PERIOD, move |kind: ProviderKind| {
                let store = Arc::clone(&check_store);
                async move { check_key(&store, kind).await }
            });
            (kind, debouncer)
        })
        .collect();

    let ctx = AppCtx {
        store,
        persisted,
        wp_password: Arc::new(RwLock::new(args.wp_password.unwrap_or_default())),
        key_check: Arc::new(key_check),
        http: reqwest::Client::new(),
    };

    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/state", get(get_state))
        .route("/api/settings", put(put_settings).delete(delete_settings))
        .route("/api/step/next", post(step_next))
        .route("/api/step/back", post(step_back))
        .route("/api/sitemap", post(load_sitemap))
        .route("/api/posts/load", post(load_posts))
        .route("/api/posts/analyze", post(analyze))
        .route("/api/posts/:id/edit", post(edit_post))
        .route("/api/generate", post(generate))
        .route("/api/publish", post(publish))
        .route("/api/images/:slot/regenerate", post(regenerate_image))
        .route("/api/reset", post(reset))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let web_index = args.web_dir.join("index.html");
    if web_index.exists() {
        let static_files = ServeDir::new(args.web_dir).not_found_service(ServeFile::new(web_index));
        app = app.fallback_service(static_files);
    } else {
        app = app.fallback(|| async {
            Html(
                r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>postforge</title></head>
  <body>
    <h1>postforge</h1>
    <p>web assets not found. The JSON API is served under <code>/api</code>.</p>
  </body>
</html>
"#,
            )
        });
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "install ctrl-c handler");
            }
        })
        .await?;
    Ok(())
}

async fn check_key(store: &Store, kind: ProviderKind) {
    let Some(secret) = store.begin_key_check(kind) else {
        return;
    };
    let settings = store.read(|state| state.settings.clone());
    let status = match postforge::provider::create_provider(kind, &settings.provider_options(kind)) {
        Ok(provider) => provider.validate_key().await,
        Err(_) => KeyStatus::Invalid,
    };
    if store.finish_key_check(kind, &secret, status) {
        store.log(format!("{kind} key is {status:?}"));
    }
}

async fn get_state(State(ctx): State<AppCtx>) -> Json<AppState> {
    let mut state = ctx.store.snapshot();
    state.log = state.log_newest_first();
    Json(state)
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    #[serde(flatten)]
    settings: Settings,
    #[serde(default)]
    wp_password: Option<String>,
}

async fn put_settings(
    State(ctx): State<AppCtx>,
    Json(update): Json<SettingsUpdate>,
) -> Result<StatusCode, ApiError> {
    if let Some(password) = update.wp_password {
        *ctx.wp_password.write().unwrap_or_else(|e| e.into_inner()) = password;
    }

    let selected = update.settings.provider;
    ctx.store.dispatch(Action::UpdateSettings(update.settings.clone()));
    ctx.persisted
        .update(&update.settings)
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;

    let needs_check = ctx.store.read(|state| {
        state.credentials.get(&selected).is_some_and(|credential| {
            credential.status == KeyStatus::Idle && !credential.secret.is_empty()
        })
    });
    if needs_check && let Some(debouncer) = ctx.key_check.get(&selected) {
        debouncer.call(selected);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_settings(State(ctx): State<AppCtx>) -> Result<StatusCode, ApiError> {
    ctx.persisted
        .reset()
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    for debouncer in ctx.key_check.values() {
        debouncer.cancel();
    }
    ctx.store.dispatch(Action::UpdateSettings(Settings::default()));
    ctx.store.log("Stored settings cleared");
    Ok(StatusCode::NO_CONTENT)
}

async fn step_next(State(ctx): State<AppCtx>) -> Json<WizardStep> {
    ctx.store.dispatch(Action::NextStep);
    Json(ctx.store.read(|state| state.step))
}

async fn step_back(State(ctx): State<AppCtx>) -> Json<WizardStep> {
    ctx.store.dispatch(Action::BackStep);
    Json(ctx.store.read(|state| state.step))
}

async fn load_sitemap(State(ctx): State<AppCtx>) -> ApiResult<Vec<String>> {
    let _guard = ctx.begin(Operation::FetchSitemap)?;
    let settings = ctx.settings();
    if settings.sitemap_url.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "sitemap url is not configured".to_owned()));
    }

    ctx.store.log(format!("Fetching sitemap {}", settings.sitemap_url));
    let urls = fetch_sitemap_urls(
        &ctx.http,
        &settings.sitemap_url,
        settings.url_limit,
        settings.cors_relay(),
    )
    .await
    .map_err(|err| {
        ctx.store.log(format!("Sitemap fetch failed: {err:#}"));
        (StatusCode::BAD_GATEWAY, format!("{err:#}"))
    })?;

    ctx.store.log(format!("Loaded {} URL(s) from the sitemap", urls.len()));
    ctx.store.dispatch(Action::SitemapLoaded(urls.clone()));
    Ok(Json(urls))
}

async fn load_posts(State(ctx): State<AppCtx>) -> ApiResult<Vec<PostSummary>> {
    let _guard = ctx.begin(Operation::LoadPosts)?;
    let wp = ctx.wordpress()?;

    let user = wp
        .current_user()
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, err.to_string()))?;
    if !user.can_publish() {
        return Err((
            StatusCode::FORBIDDEN,
            format!("WordPress user {} cannot publish posts", user.name),
        ));
    }
    let posts = wp
        .list_posts(&user)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, err.to_string()))?;

    ctx.store.log(format!("Loaded {} post(s) as {}", posts.len(), user.name));
    ctx.store.dispatch(Action::PostsLoaded(posts.clone()));
    Ok(Json(posts))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    ids: Vec<u64>,
}

async fn analyze(
    State(ctx): State<AppCtx>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Vec<Outcome<String>>> {
    let _guard = ctx.begin(Operation::AnalyzePosts)?;
    let wp = ctx.wordpress()?;
    let provider = ctx
        .settings()
        .text_provider()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let ids = if request.ids.is_empty() {
        ctx.store.read(|state| {
            state
                .posts
                .iter()
                .filter(|post| post.editable && post.keyword.is_none())
                .map(|post| post.id)
                .collect()
        })
    } else {
        request.ids
    };
    Ok(Json(
        analyze_posts(provider, &wp, &ctx.store, ids, DEFAULT_DELAY).await,
    ))
}

async fn edit_post(State(ctx): State<AppCtx>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    let wp = ctx.wordpress()?;
    let post = wp
        .get_post(id)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, err.to_string()))?;
    ctx.store.log(format!("Editing post {id}: {}", post.title.text()));
    ctx.store.dispatch(Action::EditPost {
        post_id: id,
        source_text: post.content.text().to_owned(),
    });
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    source_text: Option<String>,
    #[serde(default = "default_true")]
    check_duplicates: bool,
}

fn default_true() -> bool {
    true
}

async fn generate(
    State(ctx): State<AppCtx>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<PipelineResult> {
    let _guard = ctx.begin(Operation::Generate)?;
    if let Some(text) = request.source_text {
        ctx.store.dispatch(Action::SetSourceText(text));
    }
    let state = ctx.store.snapshot();
    if state.source_text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "source text is empty".to_owned()));
    }

    let text_provider = state
        .settings
        .text_provider()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let image_provider = state
        .settings
        .image_provider_client()
        .unwrap_or_else(|_| Arc::clone(&text_provider));

    let update_target = state.editing_post.map(|id| {
        match state.posts.iter().find(|post| post.id == id) {
            Some(post) => UpdateContext {
                title: post.title.clone(),
                link: post.link.clone(),
            },
            None => UpdateContext {
                title: format!("post {id}"),
                link: String::new(),
            },
        }
    });

    let mut pipeline = ContentPipeline::new(
        text_provider,
        image_provider,
        PipelineOptions {
            cors_relay: state.settings.cors_relay().map(str::to_owned),
            internal_links: state.sitemap_urls.clone(),
            target_word_count: state.settings.target_word_count,
            update_target,
            check_duplicates: request.check_duplicates,
        },
    )
    .with_http(ctx.http.clone());
    if let Ok(wp) = ctx.wordpress() {
        pipeline = pipeline.with_wordpress(wp);
    }

    pipeline
        .run(&ctx.store, &state.source_text)
        .await
        .map(Json)
        .map_err(|err| (StatusCode::BAD_GATEWAY, format!("{err:#}")))
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    #[serde(default)]
    mode: Option<PublishMode>,
    /// The reviewed draft, when edited since generation.
    #[serde(default)]
    draft: Option<ArticleDraft>,
}

async fn publish(
    State(ctx): State<AppCtx>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<PublishOutcome> {
    let _guard = ctx.begin(Operation::Publish)?;
    if let Some(draft) = request.draft {
        ctx.store.dispatch(Action::DraftEdited(draft));
    }
    if let Some(mode) = request.mode {
        ctx.store.dispatch(Action::SetPublishMode(mode));
    }

    let state = ctx.store.snapshot();
    let draft = state
        .draft
        .as_ref()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "no draft to publish".to_owned()))?;
    let wp = ctx.wordpress()?;

    publish_draft(&wp, &ctx.store, draft, state.publish_mode, state.target_post_id())
        .await
        .map(Json)
        .map_err(|err| match err {
            PublishError::MissingPostId => (StatusCode::BAD_REQUEST, err.to_string()),
            other => (StatusCode::BAD_GATEWAY, other.to_string()),
        })
}

async fn regenerate_image(
    State(ctx): State<AppCtx>,
    Path(slot): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _guard = ctx.begin(Operation::RegenerateImage)?;
    let state = ctx.store.snapshot();
    let draft = state
        .draft
        .as_ref()
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "no draft".to_owned()))?;
    let slot = ImageSlot::parse(&slot);
    if draft.image_prompt(&slot).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("draft has no {slot}")));
    }

    let text_provider = state
        .settings
        .text_provider()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    let image_provider = state
        .settings
        .image_provider_client()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    ContentPipeline::new(text_provider, image_provider, PipelineOptions::default())
        .regenerate_image(&ctx.store, draft, &slot)
        .await
        .map_err(|err| (StatusCode::BAD_GATEWAY, format!("{err:#}")))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset(State(ctx): State<AppCtx>) -> StatusCode {
    ctx.store.dispatch(Action::Reset);
    StatusCode::NO_CONTENT
}

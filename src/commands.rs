//! Implementations behind the `postforge` subcommands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::AsyncReadExt as _;

use crate::analyze::analyze_posts;
use crate::cli::{
    ConfigSetArgs, GenerateArgs, PostShowArgs, PostsAnalyzeArgs, PostsListArgs, PublishArgs,
    RegenerateImageArgs, SitemapArgs, ValidateKeyArgs, WordPressArgs,
};
use crate::formats::{DraftFile, ImageSlot};
use crate::pipeline::{ContentPipeline, PipelineOptions};
use crate::prompt::UpdateContext;
use crate::provider::KeyStatus;
use crate::publish::publish_draft;
use crate::runner::Outcome;
use crate::settings::{LocalFsSettingsStore, Settings, SettingsStore};
use crate::sitemap::fetch_sitemap_urls;
use crate::state::{Action, AppState, Store};
use crate::wordpress::WordPressClient;

async fn load_settings() -> anyhow::Result<(LocalFsSettingsStore, Settings)> {
    let store = LocalFsSettingsStore::from_env()?;
    let settings = store.load().await?.unwrap_or_default();
    Ok((store, settings))
}

fn wordpress(settings: &Settings, args: &WordPressArgs) -> anyhow::Result<WordPressClient> {
    let mut settings = settings.clone();
    if let Some(site_url) = &args.site_url {
        settings.site_url = site_url.clone();
    }
    if let Some(username) = &args.username {
        settings.username = username.clone();
    }
    settings.wordpress_client(args.password.as_deref().unwrap_or_default())
}

pub async fn config_show() -> anyhow::Result<()> {
    let (store, mut settings) = load_settings().await?;
    for key in settings.api_keys.values_mut() {
        *key = mask(key);
    }
    println!("# {}", store.path().display());
    println!(
        "{}",
        serde_json::to_string_pretty(&settings).context("serialize settings")?
    );
    Ok(())
}

pub async fn config_set(args: ConfigSetArgs) -> anyhow::Result<()> {
    let (store, mut settings) = load_settings().await?;
    apply(&mut settings, args);

    if settings.remember {
        store.save(&settings).await?;
        tracing::info!(path = %store.path().display(), "settings saved");
    } else {
        store.clear().await?;
        tracing::info!("remember is off; stored settings removed");
    }
    Ok(())
}

pub async fn config_reset() -> anyhow::Result<()> {
    let store = LocalFsSettingsStore::from_env()?;
    store.clear().await?;
    tracing::info!(path = %store.path().display(), "settings reset");
    Ok(())
}

fn apply(settings: &mut Settings, args: ConfigSetArgs) {
    if let Some(site_url) = args.site_url {
        settings.site_url = site_url.trim().to_owned();
    }
    if let Some(username) = args.username {
        settings.username = username.trim().to_owned();
    }
    if let Some(sitemap_url) = args.sitemap_url {
        settings.sitemap_url = sitemap_url.trim().to_owned();
    }
    if let Some(limit) = args.url_limit {
        settings.url_limit = limit;
    }
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(key) = args.api_key {
        settings
            .api_keys
            .insert(settings.provider, key.trim().to_owned());
    }
    if let Some(model) = args.model {
        settings.model = model.trim().to_owned();
    }
    if let Some(image_provider) = args.image_provider {
        settings.image_provider = Some(image_provider);
    }
    if let Some(relay) = args.cors_relay {
        settings.cors_relay = Some(relay.trim().to_owned()).filter(|r| !r.is_empty());
    }
    if let Some(words) = args.target_word_count {
        settings.target_word_count = words;
    }
    if let Some(remember) = args.remember {
        settings.remember = remember;
    }
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}

pub async fn validate_key(args: ValidateKeyArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let kind = args.provider.unwrap_or(settings.provider);
    let provider = crate::provider::create_provider(kind, &settings.provider_options(kind))?;
    match provider.validate_key().await {
        KeyStatus::Valid => {
            println!("{kind}: valid");
            Ok(())
        }
        status => anyhow::bail!("{kind}: key is {status:?}"),
    }
}

pub async fn sitemap(args: SitemapArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let root = args.url.unwrap_or_else(|| settings.sitemap_url.clone());
    if root.trim().is_empty() {
        anyhow::bail!("no sitemap url given or configured");
    }
    let limit = args.limit.unwrap_or(settings.url_limit);
    let urls = fetch_sitemap_urls(&reqwest::Client::new(), &root, limit, settings.cors_relay()).await?;

    let mut text = urls.join("\n");
    text.push('\n');
    match args.out {
        Some(path) => {
            write_file(&path, text.as_bytes()).await?;
            tracing::info!(urls = urls.len(), path = %path.display(), "sitemap urls written");
        }
        None => print!("{text}"),
    }
    Ok(())
}

pub async fn posts_list(args: PostsListArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let wp = wordpress(&settings, &args.wordpress)?;
    let user = wp.current_user().await.context("verify WordPress user")?;
    let posts = wp.list_posts(&user).await.context("list posts")?;
    for post in posts {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            post.id,
            post.modified.format("%Y-%m-%d %H:%M"),
            if post.editable { "editable" } else { "read-only" },
            post.title,
            post.link
        );
    }
    Ok(())
}

pub async fn posts_show(args: PostShowArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let wp = wordpress(&settings, &args.wordpress)?;
    let post = wp.get_post(args.id).await.with_context(|| format!("get post {}", args.id))?;
    println!("{}", post.content.text());
    Ok(())
}

pub async fn posts_analyze(args: PostsAnalyzeArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let wp = wordpress(&settings, &args.wordpress)?;
    let provider = settings.text_provider()?;

    let ids = if args.ids.is_empty() {
        let user = wp.current_user().await.context("verify WordPress user")?;
        wp.list_posts(&user)
            .await
            .context("list posts")?
            .into_iter()
            .filter(|post| post.editable)
            .map(|post| post.id)
            .collect()
    } else {
        args.ids
    };

    let store = Store::new(AppState::with_settings(settings));
    let outcomes = analyze_posts(
        provider,
        &wp,
        &store,
        ids.clone(),
        Duration::from_millis(args.delay_ms),
    )
    .await;

    let mut failed = 0usize;
    for (id, outcome) in ids.iter().zip(&outcomes) {
        match outcome {
            Outcome::Fulfilled(keyword) => println!("{id}\t{keyword}"),
            Outcome::Rejected(_) => failed += 1,
        }
    }
    if failed > 0 {
        tracing::warn!(failed, total = outcomes.len(), "some posts could not be analyzed");
    }
    Ok(())
}

pub async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let text_provider = settings.text_provider()?;
    let image_provider = match settings.image_provider_client() {
        Ok(provider) => provider,
        Err(err) => {
            tracing::warn!(error = %err, "image provider unavailable; using the text provider");
            Arc::clone(&text_provider)
        }
    };
    let wp = match wordpress(&settings, &args.wordpress) {
        Ok(wp) => Some(wp),
        Err(err) if args.post_id.is_none() => {
            tracing::info!(reason = %format!("{err:#}"), "WordPress not configured; duplicate check disabled");
            None
        }
        Err(err) => return Err(err),
    };

    let store = Store::new(AppState::with_settings(settings.clone()));
    let mut update_target = None;
    let source = match (args.post_id, &wp) {
        (Some(id), Some(wp)) => {
            let post = wp.get_post(id).await.with_context(|| format!("get post {id}"))?;
            let source = post.content.text().to_owned();
            store.dispatch(Action::EditPost {
                post_id: id,
                source_text: source.clone(),
            });
            update_target = Some(UpdateContext {
                title: post.title.text().to_owned(),
                link: post.link.clone(),
            });
            source
        }
        _ => {
            let path = args
                .source
                .as_deref()
                .context("--source or --post-id is required")?;
            read_source(path).await?
        }
    };

    let internal_links = match &args.links {
        Some(path) => read_lines(path).await?,
        None if !settings.sitemap_url.trim().is_empty() => {
            match fetch_sitemap_urls(
                &reqwest::Client::new(),
                &settings.sitemap_url,
                settings.url_limit,
                settings.cors_relay(),
            )
            .await
            {
                Ok(urls) => urls,
                Err(err) => {
                    store.warn(format!("Sitemap unavailable, no internal links: {err:#}"));
                    Vec::new()
                }
            }
        }
        None => Vec::new(),
    };

    let mut pipeline = ContentPipeline::new(
        text_provider,
        image_provider,
        PipelineOptions {
            cors_relay: settings.cors_relay().map(str::to_owned),
            internal_links,
            target_word_count: settings.target_word_count,
            update_target,
            check_duplicates: !args.no_duplicate_check,
        },
    );
    if let Some(wp) = wp {
        pipeline = pipeline.with_wordpress(wp);
    }

    pipeline.run(&store, &source).await?;

    let state = store.snapshot();
    let draft = state.draft.clone().context("pipeline finished without a draft")?;
    let file = DraftFile {
        draft,
        publish_mode: state.publish_mode,
        target_post_id: state.target_post_id(),
        duplicate: state.duplicate.clone(),
    };
    write_draft(&args.out, &file).await?;
    tracing::info!(path = %args.out.display(), mode = ?file.publish_mode, "draft written");
    Ok(())
}

pub async fn publish(args: PublishArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let file = read_draft(&args.draft).await?;
    let wp = wordpress(&settings, &args.wordpress)?;

    let mode = args.mode.unwrap_or(file.publish_mode);
    let post_id = args.post_id.or(file.target_post_id);
    let store = Store::new(AppState::with_settings(settings));

    let outcome = publish_draft(&wp, &store, &file.draft, mode, post_id).await?;
    if !outcome.failed_uploads.is_empty() {
        tracing::warn!(failed = ?outcome.failed_uploads, "some images were not uploaded");
    }
    println!("{}", outcome.link);
    Ok(())
}

pub async fn regenerate_image(args: RegenerateImageArgs) -> anyhow::Result<()> {
    let (_, settings) = load_settings().await?;
    let mut file = read_draft(&args.draft).await?;
    let slot = ImageSlot::parse(&args.slot);

    let text_provider = settings.text_provider()?;
    let image_provider = settings.image_provider_client()?;
    let pipeline = ContentPipeline::new(text_provider, image_provider, PipelineOptions::default());

    let store = Store::new(AppState::with_settings(settings));
    let image = pipeline.regenerate_image(&store, &file.draft, &slot).await?;
    file.draft.set_image(&slot, Some(image));
    write_draft(&args.draft, &file).await?;
    tracing::info!(%slot, path = %args.draft.display(), "image replaced");
    Ok(())
}

async fn read_source(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("read source from stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read source: {}", path.display()))
}

async fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read links: {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

async fn read_draft(path: &Path) -> anyhow::Result<DraftFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read draft: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse draft: {}", path.display()))
}

async fn write_draft(path: &Path, file: &DraftFile) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(file).context("serialize draft")?;
    write_file(path, &data).await
}

async fn write_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("write: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    #[test]
    fn secrets_are_masked_except_the_tail() {
        assert_eq!(mask("sk-1234567890"), "*********7890");
        assert_eq!(mask("short"), "*****");
    }

    #[test]
    fn api_key_is_stored_for_the_selected_provider() {
        let mut settings = Settings::default();
        apply(
            &mut settings,
            ConfigSetArgs {
                site_url: Some(" https://blog.example ".to_owned()),
                username: None,
                sitemap_url: None,
                url_limit: Some(20),
                provider: Some(ProviderKind::Openrouter),
                api_key: Some("sk-or".to_owned()),
                model: Some("openai/gpt-4o".to_owned()),
                image_provider: None,
                cors_relay: Some("".to_owned()),
                target_word_count: None,
                remember: None,
            },
        );
        assert_eq!(settings.site_url, "https://blog.example");
        assert_eq!(settings.url_limit, 20);
        assert_eq!(
            settings.api_keys.get(&ProviderKind::Openrouter).map(String::as_str),
            Some("sk-or")
        );
        assert_eq!(settings.cors_relay, None);
    }
}

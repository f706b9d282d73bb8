use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::formats::PublishMode;
use crate::provider::ProviderKind;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Check that the configured API key is accepted by the provider.
    ValidateKey(ValidateKeyArgs),
    /// Collect page URLs from the configured sitemap.
    Sitemap(SitemapArgs),
    Posts {
        #[command(subcommand)]
        command: PostsCommand,
    },
    /// Generate an article draft from source text.
    Generate(GenerateArgs),
    /// Publish (or update) a draft written by `generate`.
    Publish(PublishArgs),
    /// Generate one image of a draft again.
    RegenerateImage(RegenerateImageArgs),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the stored settings (API keys masked).
    Show,
    Set(ConfigSetArgs),
    /// Delete the stored settings.
    Reset,
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub site_url: Option<String>,

    /// WordPress username.
    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub sitemap_url: Option<String>,

    /// Maximum URLs collected from the sitemap.
    #[arg(long)]
    pub url_limit: Option<usize>,

    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// API key for the selected provider (or `--provider`).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Model id (OpenRouter only).
    #[arg(long)]
    pub model: Option<String>,

    /// Provider used for images (default: the text provider).
    #[arg(long)]
    pub image_provider: Option<ProviderKind>,

    /// Relay prefix for sitemap fetches and link checks; empty to unset.
    #[arg(long)]
    pub cors_relay: Option<String>,

    #[arg(long)]
    pub target_word_count: Option<u32>,

    /// Keep settings on disk (`false` deletes them).
    #[arg(long)]
    pub remember: Option<bool>,
}

#[derive(Debug, Args)]
pub struct WordPressArgs {
    /// Overrides the configured site URL.
    #[arg(long)]
    pub site_url: Option<String>,

    /// Overrides the configured username.
    #[arg(long)]
    pub username: Option<String>,

    /// WordPress application password (never stored).
    #[arg(long, env = "POSTFORGE_WP_APP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateKeyArgs {
    /// Provider to check (default: the selected provider).
    #[arg(long)]
    pub provider: Option<ProviderKind>,
}

#[derive(Debug, Args)]
pub struct SitemapArgs {
    /// Sitemap URL (default: the configured one).
    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// Write URLs to this file instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum PostsCommand {
    /// List published posts.
    List(PostsListArgs),
    /// Identify the main keyword of posts, one at a time.
    Analyze(PostsAnalyzeArgs),
    /// Print the raw content of one post.
    Show(PostShowArgs),
}

#[derive(Debug, Args)]
pub struct PostsListArgs {
    #[command(flatten)]
    pub wordpress: WordPressArgs,
}

#[derive(Debug, Args)]
pub struct PostsAnalyzeArgs {
    #[command(flatten)]
    pub wordpress: WordPressArgs,

    /// Post ids (default: every editable post).
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<u64>,

    /// Pause between posts.
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct PostShowArgs {
    #[command(flatten)]
    pub wordpress: WordPressArgs,

    #[arg(long)]
    pub id: u64,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Source text file (`-` for stdin). Ignored with `--post-id`.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Rewrite this existing post instead of writing a new one.
    #[arg(long)]
    pub post_id: Option<u64>,

    /// File with internal-link candidates, one URL per line (default: the sitemap).
    #[arg(long)]
    pub links: Option<PathBuf>,

    #[arg(long)]
    pub no_duplicate_check: bool,

    /// Output path for the draft JSON.
    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub wordpress: WordPressArgs,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Draft JSON written by `generate`.
    #[arg(long)]
    pub draft: PathBuf,

    /// Overrides the mode recorded in the draft file.
    #[arg(long, value_enum)]
    pub mode: Option<PublishMode>,

    /// Overrides the target post recorded in the draft file.
    #[arg(long)]
    pub post_id: Option<u64>,

    #[command(flatten)]
    pub wordpress: WordPressArgs,
}

#[derive(Debug, Args)]
pub struct RegenerateImageArgs {
    /// Draft JSON written by `generate`; updated in place.
    #[arg(long)]
    pub draft: PathBuf,

    /// `featured` or an infographic id.
    #[arg(long)]
    pub slot: String,
}

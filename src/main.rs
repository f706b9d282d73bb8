use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use postforge::cli::{Cli, Command, ConfigCommand, PostsCommand};
use postforge::commands;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    postforge::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Config {
            command: ConfigCommand::Show,
        } => commands::config_show().await.context("config show")?,
        Command::Config {
            command: ConfigCommand::Set(args),
        } => commands::config_set(args).await.context("config set")?,
        Command::Config {
            command: ConfigCommand::Reset,
        } => commands::config_reset().await.context("config reset")?,
        Command::ValidateKey(args) => commands::validate_key(args).await.context("validate key")?,
        Command::Sitemap(args) => commands::sitemap(args).await.context("sitemap")?,
        Command::Posts {
            command: PostsCommand::List(args),
        } => commands::posts_list(args).await.context("posts list")?,
        Command::Posts {
            command: PostsCommand::Analyze(args),
        } => commands::posts_analyze(args).await.context("posts analyze")?,
        Command::Posts {
            command: PostsCommand::Show(args),
        } => commands::posts_show(args).await.context("posts show")?,
        Command::Generate(args) => commands::generate(args).await.context("generate")?,
        Command::Publish(args) => commands::publish(args).await.context("publish")?,
        Command::RegenerateImage(args) => commands::regenerate_image(args)
            .await
            .context("regenerate image")?,
    }

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::prompt;
use crate::provider::{Provider, TextRequest};
use crate::runner::{Outcome, Progress, run_sequential};
use crate::state::{Action, Store};
use crate::wordpress::WordPressClient;

/// Identifies the main keyword of each post, one post at a time with
/// `delay` between them. Results land in the store as they arrive.
pub async fn analyze_posts(
    provider: Arc<dyn Provider>,
    wordpress: &WordPressClient,
    store: &Store,
    post_ids: Vec<u64>,
    delay: Duration,
) -> Vec<Outcome<String>> {
    let total = post_ids.len();
    store.log(format!("Analyzing {total} post(s)"));

    let ids = post_ids.clone();
    let mut report = |index: usize, ok: bool, progress: Progress<'_, String>| {
        let id = ids[index];
        match progress {
            Progress::Fulfilled(keyword) => {
                store.dispatch(Action::KeywordIdentified {
                    post_id: id,
                    keyword: keyword.clone(),
                });
                store.log(format!("[{}/{total}] post {id}: {keyword}", index + 1));
            }
            Progress::Rejected(reason) => {
                store.warn(format!("[{}/{total}] post {id} failed: {reason}", index + 1));
            }
        }
        tracing::debug!(index, ok, "analysis progress");
    };

    run_sequential(
        post_ids,
        delay,
        |id| {
            let provider = Arc::clone(&provider);
            async move { identify_keyword(provider.as_ref(), wordpress, id).await }
        },
        Some(&mut report),
    )
    .await
}

async fn identify_keyword(
    provider: &dyn Provider,
    wordpress: &WordPressClient,
    post_id: u64,
) -> anyhow::Result<String> {
    let post = wordpress
        .get_post(post_id)
        .await
        .with_context(|| format!("load post {post_id}"))?;
    let request = TextRequest::new(prompt::keyword_prompt(post.title.text(), post.content.text()));
    let answer = provider
        .generate_text(&request)
        .await
        .context("identify keyword")?;
    let keyword = answer
        .lines()
        .map(|line| line.trim().trim_matches(|c: char| c == '"' || c == '`' || c == '*'))
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_lowercase();
    if keyword.is_empty() {
        anyhow::bail!("model returned no keyword");
    }
    Ok(keyword)
}

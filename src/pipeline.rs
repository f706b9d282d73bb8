//! Content pipeline: draft generation, then reference-link repair, duplicate
//! detection and image generation side by side.
//!
//! Only draft generation is on the critical path. The three follow-up phases
//! recover locally: a failure is logged and the draft keeps whatever the
//! phase could not improve.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::formats::{ArticleDraft, DuplicateFinding, GeneratedArticle, ImageSlot};
use crate::html;
use crate::prompt::{self, DraftPrompt, LinkReplacements, UpdateContext};
use crate::provider::{Provider, TextRequest, parse_json_response};
use crate::sitemap::relay_url;
use crate::state::{Action, Store};
use crate::wordpress::{WordPressClient, slug_from_url};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub cors_relay: Option<String>,
    /// Existing site URLs offered as internal links and duplicate candidates.
    pub internal_links: Vec<String>,
    pub target_word_count: u32,
    /// Set when the draft rewrites an existing post.
    pub update_target: Option<UpdateContext>,
    pub check_duplicates: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub draft: ArticleDraft,
    pub duplicate: Option<DuplicateFinding>,
}

pub struct ContentPipeline {
    text_provider: Arc<dyn Provider>,
    image_provider: Arc<dyn Provider>,
    http: reqwest::Client,
    wordpress: Option<WordPressClient>,
    options: PipelineOptions,
}

impl ContentPipeline {
    pub fn new(
        text_provider: Arc<dyn Provider>,
        image_provider: Arc<dyn Provider>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            text_provider,
            image_provider,
            http: reqwest::Client::new(),
            wordpress: None,
            options,
        }
    }

    pub fn with_wordpress(mut self, wordpress: WordPressClient) -> Self {
        self.wordpress = Some(wordpress);
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Runs every phase and commits the result to the store. Fails only when
    /// the draft itself could not be produced, in which case nothing is
    /// committed.
    pub async fn run(&self, store: &Store, source: &str) -> anyhow::Result<PipelineResult> {
        let mut draft = match self.generate_draft(store, source).await {
            Ok(draft) => draft,
            Err(err) => {
                store.log(format!("Draft generation failed: {err:#}"));
                return Err(err);
            }
        };

        let (content, duplicate, images) = tokio::join!(
            self.verify_reference_links(store, &draft.title, &draft.content),
            self.check_duplicate(store, &draft),
            self.generate_images(store, &draft),
        );

        draft.content = content;
        for (slot, image) in images {
            if let Ok(image) = image {
                draft.set_image(&slot, Some(image));
            }
        }

        store.dispatch(Action::DraftGenerated {
            draft: draft.clone(),
            duplicate: duplicate.clone(),
        });
        store.log("Draft ready for review");
        Ok(PipelineResult { draft, duplicate })
    }

    pub async fn generate_draft(&self, store: &Store, source: &str) -> anyhow::Result<ArticleDraft> {
        if source.trim().is_empty() {
            anyhow::bail!("source text is empty");
        }
        store.log(format!(
            "Generating draft with {} ({})",
            self.text_provider.kind(),
            self.text_provider.model()
        ));

        let prompt = prompt::draft_prompt(&DraftPrompt {
            source_text: source,
            internal_links: &self.options.internal_links,
            target_word_count: self.options.target_word_count,
            update: self.options.update_target.as_ref(),
        });
        let request = TextRequest::new(prompt)
            .with_system(prompt::PERSONA)
            .with_schema(prompt::article_schema());
        let raw = self
            .text_provider
            .generate_text(&request)
            .await
            .context("generate article")?;
        let article: GeneratedArticle =
            parse_json_response(&raw).context("parse generated article")?;
        let draft = ArticleDraft::from(article);

        let unmatched = draft.unmatched_placeholders();
        if !unmatched.is_empty() {
            store.warn(format!(
                "Placeholders without a declared infographic stay as text: {}",
                unmatched.join(", ")
            ));
        }
        store.log(format!(
            "Draft generated: \"{}\" with {} infographic(s)",
            draft.title,
            draft.infographics.len()
        ));
        Ok(draft)
    }

    /// Returns the content with dead reference links replaced, or the
    /// original content when anything goes wrong.
    pub async fn verify_reference_links(&self, store: &Store, title: &str, content: &str) -> String {
        match self.repair_reference_links(store, title, content).await {
            Ok(repaired) => repaired,
            Err(err) => {
                store.warn(format!("Reference check skipped: {err:#}"));
                content.to_owned()
            }
        }
    }

    async fn repair_reference_links(
        &self,
        store: &Store,
        title: &str,
        content: &str,
    ) -> anyhow::Result<String> {
        let links = html::reference_links(content);
        if links.is_empty() {
            store.log("No reference links to verify");
            return Ok(content.to_owned());
        }
        store.log(format!("Checking {} reference link(s)", links.len()));

        let mut checks = JoinSet::new();
        for link in links.iter().cloned() {
            let client = self.http.clone();
            let target = relay_url(self.options.cors_relay.as_deref(), &link);
            checks.spawn(async move {
                let live = is_live(&client, &target).await;
                (link, live)
            });
        }
        let mut live: HashMap<String, bool> = HashMap::new();
        while let Some(joined) = checks.join_next().await {
            let (link, ok) = joined.context("join link check")?;
            live.insert(link, ok);
        }

        let broken: Vec<String> = links
            .into_iter()
            .filter(|link| !live.get(link).copied().unwrap_or(false))
            .collect();
        if broken.is_empty() {
            store.log("All reference links are live");
            return Ok(content.to_owned());
        }
        for link in &broken {
            store.warn(format!("Dead reference link: {link}"));
        }

        let request = TextRequest::new(prompt::link_replacement_prompt(title, &broken))
            .with_schema(prompt::link_replacement_schema())
            .with_web_search();
        let raw = self
            .text_provider
            .generate_text(&request)
            .await
            .context("ask for replacement links")?;
        let answer: LinkReplacements =
            parse_json_response(&raw).context("parse replacement links")?;

        let replacements: HashMap<String, String> = answer
            .replacements
            .into_iter()
            .map(|r| (r.original.trim().to_owned(), r.replacement.trim().to_owned()))
            .filter(|(original, replacement)| {
                broken.contains(original)
                    && (replacement.starts_with("http://") || replacement.starts_with("https://"))
            })
            .collect();
        if replacements.len() < broken.len() {
            store.warn(format!(
                "{} dead link(s) had no usable replacement",
                broken.len() - replacements.len()
            ));
        }
        store.log(format!("Replaced {} reference link(s)", replacements.len()));
        Ok(html::replace_reference_hrefs(content, &replacements))
    }

    /// New posts only. Any failure means "publish as new".
    pub async fn check_duplicate(&self, store: &Store, draft: &ArticleDraft) -> Option<DuplicateFinding> {
        if !self.options.check_duplicates
            || self.options.update_target.is_some()
            || self.options.internal_links.is_empty()
        {
            return None;
        }
        let wordpress = self.wordpress.as_ref()?;

        match self.find_duplicate(store, wordpress, draft).await {
            Ok(finding) => finding,
            Err(err) => {
                store.warn(format!("Duplicate check failed, publishing as new: {err:#}"));
                None
            }
        }
    }

    async fn find_duplicate(
        &self,
        store: &Store,
        wordpress: &WordPressClient,
        draft: &ArticleDraft,
    ) -> anyhow::Result<Option<DuplicateFinding>> {
        store.log("Checking for an existing post on the same topic");
        let request = TextRequest::new(prompt::duplicate_check_prompt(
            draft,
            &self.options.internal_links,
        ));
        let answer = self
            .text_provider
            .generate_text(&request)
            .await
            .context("ask for duplicate candidate")?;

        let Some(url) = prompt::parse_duplicate_answer(&answer, &self.options.internal_links)
        else {
            store.log("No duplicate found");
            return Ok(None);
        };
        let slug = slug_from_url(&url).with_context(|| format!("derive slug from {url}"))?;
        let Some(post) = wordpress
            .find_post_by_slug(&slug)
            .await
            .with_context(|| format!("look up post by slug {slug}"))?
        else {
            store.log(format!("Candidate {url} is not a published post"));
            return Ok(None);
        };

        store.log(format!(
            "Likely duplicate of post {} ({url}); switching to update",
            post.id
        ));
        Ok(Some(DuplicateFinding {
            url,
            post_id: post.id,
        }))
    }

    /// One task per image slot, all at once. Results come back in slot order.
    pub async fn generate_images(
        &self,
        store: &Store,
        draft: &ArticleDraft,
    ) -> Vec<(ImageSlot, anyhow::Result<String>)> {
        let slots = draft.image_slots();
        store.log(format!(
            "Generating {} image(s) with {}",
            slots.len(),
            self.image_provider.kind()
        ));

        let mut tasks = JoinSet::new();
        for (index, slot) in slots.iter().enumerate() {
            let provider = Arc::clone(&self.image_provider);
            let prompt = image_prompt(draft, slot);
            tasks.spawn(async move {
                let result = match prompt {
                    Some(prompt) => provider.generate_image(&prompt).await.map_err(anyhow::Error::from),
                    None => Err(anyhow::anyhow!("no such image slot")),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<anyhow::Result<String>>> = slots.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(err) => tracing::error!(error = %err, "image task panicked"),
            }
        }

        slots
            .into_iter()
            .zip(results)
            .map(|(slot, result)| {
                let result = result.unwrap_or_else(|| Err(anyhow::anyhow!("image task aborted")));
                match &result {
                    Ok(_) => store.log(format!("Generated {slot}")),
                    Err(err) => store.warn(format!("Image for {slot} failed: {err:#}")),
                }
                (slot, result)
            })
            .collect()
    }

    /// Re-runs one image task and stores the result in the current draft.
    pub async fn regenerate_image(
        &self,
        store: &Store,
        draft: &ArticleDraft,
        slot: &ImageSlot,
    ) -> anyhow::Result<String> {
        let prompt = image_prompt(draft, slot)
            .with_context(|| format!("draft has no {slot}"))?;
        store.log(format!("Regenerating {slot}"));
        let image = match self.image_provider.generate_image(&prompt).await {
            Ok(image) => image,
            Err(err) => {
                store.warn(format!("Image for {slot} failed: {err}"));
                return Err(err.into());
            }
        };
        store.dispatch(Action::ImageUpdated {
            slot: slot.clone(),
            image: Some(image.clone()),
        });
        store.log(format!("Regenerated {slot}"));
        Ok(image)
    }
}

fn image_prompt(draft: &ArticleDraft, slot: &ImageSlot) -> Option<String> {
    match slot {
        ImageSlot::Featured => Some(prompt::featured_image_prompt(draft)),
        ImageSlot::Infographic(id) => draft.infographic(id).map(prompt::infographic_image_prompt),
    }
}

async fn is_live(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(response) => {
            let ok = response.status().is_success();
            tracing::debug!(url, status = %response.status(), ok, "link checked");
            ok
        }
        Err(err) => {
            tracing::debug!(url, error = %err, "link check failed");
            false
        }
    }
}

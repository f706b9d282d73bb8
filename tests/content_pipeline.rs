mod http_stub;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use http_stub::{Reply, StubServer};
use postforge::error::ProviderError;
use postforge::formats::{DuplicateFinding, ImageSlot, PublishMode};
use postforge::pipeline::{ContentPipeline, PipelineOptions};
use postforge::provider::{Provider, ProviderKind, TextRequest};
use postforge::state::{Store, WizardStep};
use postforge::wordpress::WordPressClient;

/// Answers each prompt kind with a canned reply.
struct ScriptedProvider {
    article: String,
    replacement: String,
    duplicate_answer: String,
    failing_image: &'static str,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn check_key(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        if request.prompt.contains("no longer resolve") {
            assert!(request.web_search, "replacement lookup should search the web");
            let original = request
                .prompt
                .lines()
                .find_map(|line| line.strip_prefix("- http"))
                .map(|rest| format!("http{rest}"))
                .unwrap_or_default();
            return Ok(format!(
                "```json\n{}\n```",
                json!({ "replacements": [{ "original": original, "replacement": self.replacement }] })
            ));
        }
        if request.prompt.contains("already has an article") {
            return Ok(self.duplicate_answer.clone());
        }
        Ok(self.article.clone())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        if prompt.contains(self.failing_image) {
            return Err(ProviderError::InvalidResponse("image model overloaded".to_owned()));
        }
        Ok("aW1hZ2U=".to_owned())
    }
}

fn article(content: &str, infographics: serde_json::Value) -> String {
    json!({
        "title": "Best Coffee Grinders",
        "slug": "best-coffee-grinders",
        "metaDescription": "Which grinder to buy.",
        "content": content,
        "tags": ["Coffee"],
        "categories": ["Reviews"],
        "infographics": infographics,
        "featuredImagePrompt": "a burr grinder on a counter"
    })
    .to_string()
}

fn link_host() -> StubServer {
    StubServer::spawn(|request| match request.path() {
        "/ok-one" | "/ok-two" => Reply::json(json!({})),
        _ => Reply::not_found(),
    })
}

#[tokio::test]
async fn dead_reference_is_replaced_and_failed_image_leaves_empty_slot() -> anyhow::Result<()> {
    let host = link_host();
    let content = format!(
        "<h2>Grinders</h2><p>Body.</p><p>INFOGRAPHIC-PLACEHOLDER-a</p>\
<h2>References</h2><ul>\
<li><a href=\"{ok1}\">One</a></li>\
<li><a href=\"{dead}\">Two</a></li>\
<li><a href=\"{ok2}\">Three</a></li>\
</ul>",
        ok1 = host.url("/ok-one"),
        dead = host.url("/gone"),
        ok2 = host.url("/ok-two"),
    );
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider {
        article: article(
            &content,
            json!([
                { "id": "a", "title": "Burr sizes", "type": "bar", "data": "{}", "imagePrompt": "chart A" },
                { "id": "b", "title": "Grind times", "type": "bar", "data": "{}", "imagePrompt": "chart B" },
                { "id": "c", "title": "Price bands", "type": "bar", "data": "{}", "imagePrompt": "chart C" }
            ]),
        ),
        replacement: "https://replacement.example/new-source".to_owned(),
        duplicate_answer: "null".to_owned(),
        failing_image: "Burr sizes",
    });

    let store = Store::default();
    let pipeline = ContentPipeline::new(
        Arc::clone(&provider),
        provider,
        PipelineOptions {
            target_word_count: 1500,
            ..PipelineOptions::default()
        },
    );
    let result = pipeline.run(&store, "notes about grinders").await?;

    let html = &result.draft.content;
    assert_eq!(html.matches("<a ").count(), 3);
    assert!(html.contains(&format!("href=\"{}\"", host.url("/ok-one"))));
    assert!(html.contains(&format!("href=\"{}\"", host.url("/ok-two"))));
    assert!(html.contains("href=\"https://replacement.example/new-source\""));
    assert!(!html.contains(&host.url("/gone")));

    let draft = &result.draft;
    assert_eq!(draft.image(&ImageSlot::Featured), Some("aW1hZ2U="));
    assert_eq!(draft.image(&ImageSlot::Infographic("a".to_owned())), None);
    assert_eq!(draft.image(&ImageSlot::Infographic("b".to_owned())), Some("aW1hZ2U="));
    assert_eq!(draft.image(&ImageSlot::Infographic("c".to_owned())), Some("aW1hZ2U="));

    let state = store.snapshot();
    assert_eq!(state.step, WizardStep::ReviewPublish);
    assert_eq!(state.draft.as_ref(), Some(draft));
    assert_eq!(state.log.last().map(String::as_str), Some("Draft ready for review"));
    assert!(
        state
            .log
            .iter()
            .any(|line| line.contains("infographic a failed") && line.contains("overloaded"))
    );

    let heads: Vec<_> = host.requests().into_iter().filter(|r| r.method == "HEAD").collect();
    assert_eq!(heads.len(), 3);
    Ok(())
}

#[tokio::test]
async fn duplicate_candidate_switches_to_update() -> anyhow::Result<()> {
    let wordpress = StubServer::spawn(|request| {
        if request.path() == "/wp-json/wp/v2/posts" && request.url.contains("slug=best-grinders") {
            return Reply::json(json!([{
                "id": 42,
                "link": "https://blog.example/2024/best-grinders/",
                "slug": "best-grinders"
            }]));
        }
        Reply::json(json!([]))
    });
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider {
        article: article("<p>No references here.</p>", json!([])),
        replacement: String::new(),
        duplicate_answer: "https://blog.example/2024/best-grinders/".to_owned(),
        failing_image: "never",
    });

    let store = Store::default();
    let pipeline = ContentPipeline::new(
        Arc::clone(&provider),
        provider,
        PipelineOptions {
            internal_links: vec![
                "https://blog.example/2024/best-grinders/".to_owned(),
                "https://blog.example/about/".to_owned(),
            ],
            target_word_count: 1500,
            check_duplicates: true,
            ..PipelineOptions::default()
        },
    )
    .with_wordpress(WordPressClient::new(&wordpress.base_url, "editor", "pw"));

    let result = pipeline.run(&store, "notes").await?;
    let expected = DuplicateFinding {
        url: "https://blog.example/2024/best-grinders/".to_owned(),
        post_id: 42,
    };
    assert_eq!(result.duplicate.as_ref(), Some(&expected));

    let state = store.snapshot();
    assert_eq!(state.publish_mode, PublishMode::Update);
    assert_eq!(state.target_post_id(), Some(42));
    Ok(())
}

#[tokio::test]
async fn failed_duplicate_lookup_publishes_as_new() -> anyhow::Result<()> {
    let wordpress = StubServer::spawn(|_| {
        Reply::status(500, json!({ "code": "db_error", "message": "database down" }))
    });
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider {
        article: article("<p>Body.</p>", json!([])),
        replacement: String::new(),
        duplicate_answer: "https://blog.example/best-grinders/".to_owned(),
        failing_image: "never",
    });

    let store = Store::default();
    let pipeline = ContentPipeline::new(
        Arc::clone(&provider),
        provider,
        PipelineOptions {
            internal_links: vec!["https://blog.example/best-grinders/".to_owned()],
            check_duplicates: true,
            ..PipelineOptions::default()
        },
    )
    .with_wordpress(WordPressClient::new(&wordpress.base_url, "editor", "pw"));

    let result = pipeline.run(&store, "notes").await?;
    assert_eq!(result.duplicate, None);

    let state = store.snapshot();
    assert_eq!(state.publish_mode, PublishMode::New);
    assert!(state.log.iter().any(|line| line.contains("database down")));
    assert_eq!(state.log.last().map(String::as_str), Some("Draft ready for review"));
    Ok(())
}

//! Prompt text and response schemas sent to the language model.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::formats::{ArticleDraft, Infographic};
use crate::html::PLACEHOLDER_PREFIX;

/// Body text sent for keyword identification is cut to this many chars.
const KEYWORD_EXCERPT_CHARS: usize = 4000;

pub const PERSONA: &str = "You are a senior SEO content strategist and editor for a WordPress blog.\n\
You write clear, well-structured, trustworthy articles for real readers first and search engines second.\n\
Voice: confident, practical, specific. Short paragraphs. No filler, no hype, no clichés.\n\
Never invent statistics, quotes or studies. Cite only sources you are confident exist.\n";

/// Context added when the draft rewrites a post that already exists.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct DraftPrompt<'a> {
    pub source_text: &'a str,
    pub internal_links: &'a [String],
    pub target_word_count: u32,
    pub update: Option<&'a UpdateContext>,
}

pub fn draft_prompt(input: &DraftPrompt<'_>) -> String {
    let links = if input.internal_links.is_empty() {
        "(none available)".to_owned()
    } else {
        input
            .internal_links
            .iter()
            .map(|link| format!("- {link}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut prompt = format!(
        "Task: Turn the source material below into a complete, publish-ready blog article.\n\
\n\
Structure (HTML body, no <html>/<head>/<body> wrappers, no <h1>):\n\
- Open with a short introduction that states who the article is for and what they will learn.\n\
- Use <h2> for main sections and <h3> for subsections.\n\
- Include a section headed \"Frequently Asked Questions\" with 4-6 question/answer pairs.\n\
- End with a section headed \"References\" containing an unordered list of <a href> links to authoritative external sources.\n\
- Target length: about {words} words.\n\
\n\
Internal links:\n\
- Link naturally to 3-6 relevant pages from this list of existing site URLs. Use only URLs from the list.\n\
{links}\n\
\n\
Infographics:\n\
- Plan 1-3 infographics that make the article easier to understand.\n\
- Declare each one in the \"infographics\" array with a unique id, title, type, data and imagePrompt.\n\
- Mark where each one goes in the body with a paragraph containing only the token {prefix}{{id}}, for example <p>{prefix}1</p>.\n\
- Every placeholder in the body MUST match a declared infographic id, and every declared infographic MUST have exactly one placeholder.\n\
\n\
Metadata:\n\
- slug: lowercase, hyphen-separated, no stop words, at most 6 words.\n\
- metaDescription: 140-160 characters.\n\
- tags and categories: short names an editor would already use on this site.\n\
- featuredImagePrompt: a description of a photographic header image without any text in it.\n\
\n\
Source material:\n\
<<<\n\
{source}\n\
>>>\n",
        words = input.target_word_count,
        prefix = PLACEHOLDER_PREFIX,
        source = input.source_text.trim(),
    );

    if let Some(update) = input.update {
        prompt.push_str(&format!(
            "\n\
UPDATE MODE:\n\
- The source material is the current body of the published post \"{title}\" ({link}).\n\
- Refresh and improve it: keep what is still accurate, fix what is outdated, fill gaps.\n\
- Keep the existing slug unless it is clearly broken.\n\
- Do not link the post to itself.\n",
            title = update.title,
            link = update.link,
        ));
    }

    prompt.push_str("\nOutput:\n- Output ONLY the JSON object described by the schema.\n");
    prompt
}

pub fn article_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "slug": { "type": "string" },
            "metaDescription": { "type": "string" },
            "content": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } },
            "categories": { "type": "array", "items": { "type": "string" } },
            "infographics": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "type": { "type": "string" },
                        "data": { "type": "string", "description": "JSON-encoded data the visual shows" },
                        "imagePrompt": { "type": "string" }
                    },
                    "required": ["id", "title", "type", "data", "imagePrompt"]
                }
            },
            "featuredImagePrompt": { "type": "string" }
        },
        "required": [
            "title", "slug", "metaDescription", "content",
            "tags", "categories", "infographics", "featuredImagePrompt"
        ]
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkReplacements {
    #[serde(default)]
    pub replacements: Vec<LinkReplacement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkReplacement {
    pub original: String,
    pub replacement: String,
}

pub fn link_replacement_prompt(article_title: &str, broken: &[String]) -> String {
    let list = broken
        .iter()
        .map(|url| format!("- {url}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task: The reference links below, cited in the article \"{article_title}\", no longer resolve.\n\
Search the web and find one live, authoritative replacement for each that supports the same claim.\n\
\n\
Broken links:\n\
{list}\n\
\n\
Hard rules:\n\
- Return exactly one entry per broken link, keyed by the original URL as given.\n\
- Only return URLs you have confirmed exist.\n\
\n\
Output:\n\
- Output ONLY the JSON object described by the schema.\n"
    )
}

pub fn link_replacement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "replacements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original": { "type": "string" },
                        "replacement": { "type": "string" }
                    },
                    "required": ["original", "replacement"]
                }
            }
        },
        "required": ["replacements"]
    })
}

pub fn duplicate_check_prompt(draft: &ArticleDraft, candidates: &[String]) -> String {
    let list = candidates
        .iter()
        .map(|url| format!("- {url}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Task: Decide whether this site already has an article covering the same topic as the new draft.\n\
\n\
New draft:\n\
- Title: {title}\n\
- Summary: {summary}\n\
\n\
Existing URLs:\n\
{list}\n\
\n\
Output:\n\
- Output ONLY the single best-matching URL from the list, copied exactly.\n\
- If no existing URL covers substantially the same topic, output ONLY the word null.\n",
        title = draft.title,
        summary = draft.meta_description,
    )
}

/// Interprets the duplicate-check answer. Only a URL from `candidates` counts
/// (a trailing slash is ignored); "null" or anything else yields `None`.
pub fn parse_duplicate_answer(answer: &str, candidates: &[String]) -> Option<String> {
    let answer = answer
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'')
        .trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("null") {
        return None;
    }
    let url = answer
        .split_whitespace()
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(|url| url.trim_end_matches(['.', ',', ')']))?;
    candidates
        .iter()
        .find(|candidate| candidate.trim_end_matches('/') == url.trim_end_matches('/'))
        .cloned()
}

pub fn keyword_prompt(title: &str, body: &str) -> String {
    let excerpt: String = body.chars().take(KEYWORD_EXCERPT_CHARS).collect();
    format!(
        "Task: Identify the primary SEO keyword this blog post targets.\n\
\n\
Title: {title}\n\
\n\
Body excerpt:\n\
<<<\n\
{excerpt}\n\
>>>\n\
\n\
Output:\n\
- Output ONLY the keyword phrase (2-5 words, lowercase), nothing else.\n"
    )
}

pub fn featured_image_prompt(draft: &ArticleDraft) -> String {
    format!(
        "{prompt}\n\nWide 16:9 editorial photograph for a blog article titled \"{title}\". No text, no logos, no watermarks.",
        prompt = draft.featured_image.prompt.trim(),
        title = draft.title,
    )
}

pub fn infographic_image_prompt(info: &Infographic) -> String {
    let data = match &info.data {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    format!(
        "{prompt}\n\nClean flat-design {kind} infographic titled \"{title}\". Legible labels, generous whitespace, white background.\nData to show: {data}",
        prompt = info.image_prompt.trim(),
        kind = if info.visual_type.is_empty() { "data" } else { info.visual_type.as_str() },
        title = info.title,
    )
}

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::html;

/// Article package as the model returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArticle {
    pub title: String,
    pub slug: String,
    pub meta_description: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub infographics: Vec<InfographicBlueprint>,
    #[serde(default)]
    pub featured_image_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfographicBlueprint {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub visual_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub image_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDraft {
    pub title: String,
    pub slug: String,
    pub meta_description: String,
    pub content: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub featured_image: FeaturedImage,
    pub infographics: Vec<Infographic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedImage {
    pub prompt: String,
    /// Base64-encoded image bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Infographic {
    pub id: String,
    pub title: String,
    pub visual_type: String,
    pub data: serde_json::Value,
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl From<GeneratedArticle> for ArticleDraft {
    fn from(article: GeneratedArticle) -> Self {
        Self {
            title: article.title.trim().to_owned(),
            slug: article.slug.trim().to_owned(),
            meta_description: article.meta_description.trim().to_owned(),
            content: article.content,
            tags: ordered_set(article.tags),
            categories: ordered_set(article.categories),
            featured_image: FeaturedImage {
                prompt: article.featured_image_prompt,
                image: None,
            },
            infographics: article
                .infographics
                .into_iter()
                .map(|blueprint| Infographic {
                    id: blueprint.id,
                    title: blueprint.title,
                    visual_type: blueprint.visual_type,
                    data: blueprint.data,
                    image_prompt: blueprint.image_prompt,
                    image: None,
                })
                .collect(),
        }
    }
}

impl ArticleDraft {
    pub fn infographic(&self, id: &str) -> Option<&Infographic> {
        self.infographics.iter().find(|info| info.id == id)
    }

    pub fn image_slots(&self) -> Vec<ImageSlot> {
        std::iter::once(ImageSlot::Featured)
            .chain(
                self.infographics
                    .iter()
                    .map(|info| ImageSlot::Infographic(info.id.clone())),
            )
            .collect()
    }

    pub fn image_prompt(&self, slot: &ImageSlot) -> Option<&str> {
        match slot {
            ImageSlot::Featured => Some(self.featured_image.prompt.as_str()),
            ImageSlot::Infographic(id) => self.infographic(id).map(|i| i.image_prompt.as_str()),
        }
    }

    pub fn image(&self, slot: &ImageSlot) -> Option<&str> {
        match slot {
            ImageSlot::Featured => self.featured_image.image.as_deref(),
            ImageSlot::Infographic(id) => self.infographic(id).and_then(|i| i.image.as_deref()),
        }
        .filter(|data| !data.is_empty())
    }

    /// Returns false when the slot does not exist in this draft.
    pub fn set_image(&mut self, slot: &ImageSlot, image: Option<String>) -> bool {
        match slot {
            ImageSlot::Featured => {
                self.featured_image.image = image;
                true
            }
            ImageSlot::Infographic(id) => {
                match self.infographics.iter_mut().find(|info| &info.id == id) {
                    Some(info) => {
                        info.image = image;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Title used as alt text for the slot's image.
    pub fn image_title(&self, slot: &ImageSlot) -> String {
        match slot {
            ImageSlot::Featured => self.title.clone(),
            ImageSlot::Infographic(id) => self
                .infographic(id)
                .map(|info| info.title.clone())
                .unwrap_or_else(|| self.title.clone()),
        }
    }

    /// Placeholder ids present in the body that no infographic declares.
    pub fn unmatched_placeholders(&self) -> Vec<String> {
        let declared: Vec<&str> = self.infographics.iter().map(|info| info.id.as_str()).collect();
        html::undeclared_placeholder_ids(&self.content, &declared)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ImageSlot {
    Featured,
    Infographic(String),
}

impl ImageSlot {
    /// `featured` or an infographic id.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "featured" => ImageSlot::Featured,
            id => ImageSlot::Infographic(id.to_owned()),
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSlot::Featured => f.write_str("featured image"),
            ImageSlot::Infographic(id) => write!(f, "infographic {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: u64,
    pub title: String,
    pub link: String,
    pub modified: NaiveDateTime,
    pub editable: bool,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub updated_in_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateFinding {
    pub url: String,
    pub post_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    New,
    Update,
}

/// What `generate` writes to disk and `publish` reads back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftFile {
    pub draft: ArticleDraft,
    #[serde(default)]
    pub publish_mode: PublishMode,
    #[serde(default)]
    pub target_post_id: Option<u64>,
    #[serde(default)]
    pub duplicate: Option<DuplicateFinding>,
}

/// Case-insensitive de-duplication that keeps the first spelling and order.
pub fn ordered_set(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty() && seen.insert(item.to_lowercase()))
        .collect()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text.trim().to_owned(),
        Raw::Number(number) => number.to_string(),
    })
}

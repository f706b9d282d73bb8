//! Publishing a reviewed draft to WordPress.
//!
//! Images are uploaded first, all at once, and every upload is allowed to
//! settle before the body is assembled. Only the final create/update call is
//! fatal; nothing already uploaded is rolled back when it fails.

use std::collections::HashMap;

use base64::Engine as _;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::PublishError;
use crate::formats::{ArticleDraft, ImageSlot, PublishMode};
use crate::html;
use crate::state::{Action, Store};
use crate::wordpress::{PostPayload, Taxonomy, WordPressClient, WpMedia, WpTerm};

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub post_id: u64,
    pub link: String,
    pub mode: PublishMode,
    pub uploaded: usize,
    pub failed_uploads: Vec<String>,
    pub skipped_tags: Vec<String>,
    pub skipped_categories: Vec<String>,
}

pub async fn publish(
    wp: &WordPressClient,
    store: &Store,
    draft: &ArticleDraft,
) -> Result<PublishOutcome, PublishError> {
    publish_draft(wp, store, draft, PublishMode::New, None).await
}

pub async fn update(
    wp: &WordPressClient,
    store: &Store,
    draft: &ArticleDraft,
    post_id: Option<u64>,
) -> Result<PublishOutcome, PublishError> {
    publish_draft(wp, store, draft, PublishMode::Update, post_id).await
}

pub async fn publish_draft(
    wp: &WordPressClient,
    store: &Store,
    draft: &ArticleDraft,
    mode: PublishMode,
    post_id: Option<u64>,
) -> Result<PublishOutcome, PublishError> {
    let target = match (mode, post_id) {
        (PublishMode::Update, None) => {
            let err = PublishError::MissingPostId;
            store.log(format!("Publish failed: {err}"));
            store.dispatch(Action::PublishFailed(err.to_string()));
            return Err(err);
        }
        (PublishMode::Update, Some(id)) => Some(id),
        (PublishMode::New, _) => None,
    };

    match write_post(wp, store, draft, mode, target).await {
        Ok(outcome) => {
            store.log(format!("Published post {}: {}", outcome.post_id, outcome.link));
            store.dispatch(Action::Published {
                post_id: outcome.post_id,
                link: outcome.link.clone(),
                mode,
            });
            Ok(outcome)
        }
        Err(err) => {
            store.log(format!("Publish failed: {err}"));
            store.dispatch(Action::PublishFailed(err.to_string()));
            Err(err)
        }
    }
}

async fn write_post(
    wp: &WordPressClient,
    store: &Store,
    draft: &ArticleDraft,
    mode: PublishMode,
    target: Option<u64>,
) -> Result<PublishOutcome, PublishError> {
    let uploads = upload_images(wp, store, draft).await;

    let mut figures: HashMap<String, String> = HashMap::new();
    let mut featured_media = None;
    for (slot, media) in &uploads.uploaded {
        match slot {
            ImageSlot::Featured => featured_media = Some(media.id),
            ImageSlot::Infographic(id) => {
                figures.insert(
                    id.clone(),
                    html::render_figure(&media.source_url, &draft.image_title(slot)),
                );
            }
        }
    }

    let mut content = html::substitute_placeholders(&draft.content, &figures);
    let orphaned: Vec<String> = draft
        .infographics
        .iter()
        .map(|info| info.id.clone())
        .filter(|id| !figures.contains_key(id))
        .collect();
    if !orphaned.is_empty() {
        store.warn(format!(
            "Removed placeholders for infographics without an uploaded image: {}",
            orphaned.join(", ")
        ));
        content = html::strip_placeholders(&content, &orphaned);
    }

    let (tags, skipped_tags) = resolve_taxonomy(wp, store, Taxonomy::Tags, &draft.tags).await;
    let (categories, skipped_categories) =
        resolve_taxonomy(wp, store, Taxonomy::Categories, &draft.categories).await;

    let payload = PostPayload {
        title: draft.title.clone(),
        slug: draft.slug.clone(),
        content,
        status: "publish".to_owned(),
        excerpt: draft.meta_description.clone(),
        tags,
        categories,
        featured_media,
    };

    let post = match target {
        Some(id) => {
            store.log(format!("Updating post {id}"));
            wp.update_post(id, &payload).await?
        }
        None => {
            store.log("Creating post");
            wp.create_post(&payload).await?
        }
    };

    Ok(PublishOutcome {
        post_id: post.id,
        link: post.link,
        mode,
        uploaded: uploads.uploaded.len(),
        failed_uploads: uploads.failed,
        skipped_tags,
        skipped_categories,
    })
}

struct Uploads {
    uploaded: Vec<(ImageSlot, WpMedia)>,
    failed: Vec<String>,
}

async fn upload_images(wp: &WordPressClient, store: &Store, draft: &ArticleDraft) -> Uploads {
    let mut tasks = JoinSet::new();
    let mut failed = Vec::new();

    for slot in draft.image_slots() {
        let Some(encoded) = draft.image(&slot) else {
            continue;
        };
        let bytes = match decode_image(&slot, encoded) {
            Ok(bytes) => bytes,
            Err(err) => {
                store.warn(err.to_string());
                failed.push(slot.to_string());
                continue;
            }
        };
        let (mime, extension) = sniff_image(&bytes);
        let filename = format!("{}-{}.{extension}", file_stem(&draft.slug), slot_key(&slot));
        let title = draft.image_title(&slot);
        let wp = wp.clone();

        tasks.spawn(async move {
            let result = upload_one(&wp, bytes, &filename, mime, &title).await;
            (slot, result)
        });
    }

    let mut uploaded = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, Ok((media, patch_error)))) => {
                if let Some(err) = patch_error {
                    store.warn(format!("Uploaded {slot} but could not set its alt text: {err}"));
                }
                store.log(format!("Uploaded {slot} as media {}", media.id));
                uploaded.push((slot, media));
            }
            Ok((slot, Err(err))) => {
                store.warn(format!("Upload of {slot} failed: {err}"));
                failed.push(slot.to_string());
            }
            Err(err) => tracing::error!(error = %err, "upload task panicked"),
        }
    }

    Uploads { uploaded, failed }
}

/// Uploads the bytes, then patches alt text and title. A failed patch does
/// not fail the upload.
async fn upload_one(
    wp: &WordPressClient,
    bytes: Vec<u8>,
    filename: &str,
    mime: &str,
    title: &str,
) -> Result<(WpMedia, Option<PublishError>), PublishError> {
    let media = wp.upload_media(bytes, filename, mime).await?;
    let patch_error = wp.update_media(media.id, title, title).await.err().map(PublishError::from);
    Ok((media, patch_error))
}

async fn resolve_taxonomy(
    wp: &WordPressClient,
    store: &Store,
    taxonomy: Taxonomy,
    requested: &[String],
) -> (Vec<u64>, Vec<String>) {
    if requested.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let existing = match wp.list_terms(taxonomy).await {
        Ok(terms) => terms,
        Err(err) => {
            store.warn(format!("Could not load {}: {err}", taxonomy.path()));
            Vec::new()
        }
    };
    let (ids, skipped) = resolve_terms(requested, &existing);
    if !skipped.is_empty() {
        store.warn(format!(
            "Skipped {} not found on the site: {}",
            taxonomy.path(),
            skipped.join(", ")
        ));
    }
    (ids, skipped)
}

/// Matches names to existing terms case-insensitively. Returns the matched
/// ids and the names that matched nothing. Terms are never created.
pub fn resolve_terms(requested: &[String], existing: &[WpTerm]) -> (Vec<u64>, Vec<String>) {
    let by_name: HashMap<String, u64> = existing
        .iter()
        .map(|term| (term.name.trim().to_lowercase(), term.id))
        .collect();

    let mut ids = Vec::new();
    let mut skipped = Vec::new();
    for name in requested {
        match by_name.get(&name.trim().to_lowercase()) {
            Some(id) if !ids.contains(id) => ids.push(*id),
            Some(_) => {}
            None => skipped.push(name.clone()),
        }
    }
    (ids, skipped)
}

fn decode_image(slot: &ImageSlot, encoded: &str) -> Result<Vec<u8>, PublishError> {
    // Tolerate data URLs.
    let payload = match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| PublishError::InvalidImage {
            slot: slot.to_string(),
            reason: err.to_string(),
        })
}

fn sniff_image(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ("image/jpeg", "jpg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ("image/webp", "webp")
    } else {
        ("image/png", "png")
    }
}

fn slot_key(slot: &ImageSlot) -> String {
    match slot {
        ImageSlot::Featured => "featured".to_owned(),
        ImageSlot::Infographic(id) => format!("infographic-{id}"),
    }
}

fn file_stem(slug: &str) -> &str {
    let slug = slug.trim();
    if slug.is_empty() { "image" } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(id: u64, name: &str) -> WpTerm {
        WpTerm {
            id,
            name: name.to_owned(),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn terms_match_case_insensitively_and_unknown_names_are_skipped() {
        let existing = vec![term(3, "Coffee"), term(8, "Espresso"), term(9, "Tea")];
        let (ids, skipped) = resolve_terms(
            &names(&["coffee", "ESPRESSO", "Grinders", "Burrs", "Beans"]),
            &existing,
        );
        assert_eq!(ids, vec![3, 8]);
        assert_eq!(skipped, names(&["Grinders", "Burrs", "Beans"]));
    }

    #[test]
    fn repeated_names_resolve_once() {
        let (ids, skipped) = resolve_terms(&names(&["Tea", " tea "]), &[term(9, "Tea")]);
        assert_eq!(ids, vec![9]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn image_type_is_sniffed_from_magic_bytes() {
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]).0, "image/jpeg");
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 ").0, "image/webp");
        assert_eq!(sniff_image(b"\x89PNG\r\n\x1a\n").0, "image/png");
    }

    #[test]
    fn data_urls_and_bad_base64() {
        let slot = ImageSlot::Featured;
        assert_eq!(decode_image(&slot, "data:image/png;base64,aGk=").ok(), Some(b"hi".to_vec()));
        assert!(matches!(
            decode_image(&slot, "***"),
            Err(PublishError::InvalidImage { .. })
        ));
    }

    #[tokio::test]
    async fn update_without_post_id_fails_before_any_request() {
        // Nothing listens on the discard port; reaching the network would
        // surface a WordPress error instead.
        let wp = WordPressClient::new("http://127.0.0.1:9", "admin", "pw");
        let store = Store::default();
        let result = update(&wp, &store, &ArticleDraft::default(), None).await;
        assert!(matches!(result, Err(PublishError::MissingPostId)));
        assert!(matches!(
            store.snapshot().result,
            Some(crate::state::PublishResult::Failure { .. })
        ));
    }
}

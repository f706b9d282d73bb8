//! Helpers that treat generated article HTML as data. Every function takes
//! the HTML as an immutable input and returns a new string.

use std::collections::HashMap;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node};

pub const PLACEHOLDER_PREFIX: &str = "INFOGRAPHIC-PLACEHOLDER-";

pub fn placeholder(id: &str) -> String {
    format!("{PLACEHOLDER_PREFIX}{id}")
}

/// Every `http(s)` link inside the article's references section, in document
/// order and without duplicates.
///
/// The section is either the content following a heading that mentions
/// references or sources (up to the next heading of the same or a higher
/// level), or any element whose id or class contains `references`.
pub fn reference_links(html: &str) -> Vec<String> {
    let document = Html::parse_fragment(html);
    let mut links: Vec<String> = Vec::new();
    for (_, href) in reference_anchors(&document) {
        if !links.contains(&href) {
            links.push(href);
        }
    }
    links
}

/// All `href` attribute values in document order.
pub fn all_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_fragment(html);
    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| element.value().name() == "a")
        .filter_map(|element| element.value().attr("href").map(str::to_owned))
        .collect()
}

/// Rewrites the `href` of every references-section anchor whose link is a key
/// of `replacements`. Anchors elsewhere in the article are left alone.
pub fn replace_reference_hrefs(html: &str, replacements: &HashMap<String, String>) -> String {
    let mut document = Html::parse_fragment(html);
    let targets: Vec<(NodeId, String)> = reference_anchors(&document)
        .into_iter()
        .filter_map(|(id, href)| {
            replacements
                .get(&href)
                .filter(|new| !new.is_empty() && **new != href)
                .map(|new| (id, new.clone()))
        })
        .collect();
    if targets.is_empty() {
        return html.to_owned();
    }

    for (id, new) in targets {
        let Some(mut node) = document.tree.get_mut(id) else {
            continue;
        };
        if let Node::Element(element) = node.value() {
            for (name, value) in element.attrs.iter_mut() {
                if &*name.local == "href" {
                    *value = new.as_str().into();
                }
            }
        }
    }
    document.root_element().inner_html()
}

fn reference_anchors(document: &Html) -> Vec<(NodeId, String)> {
    let mut anchors = Vec::new();
    let mut open_section: Option<u8> = None;

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };

        if let Some(level) = heading_level(element.value().name()) {
            let text = element.text().collect::<String>().to_lowercase();
            if text.contains("reference") || text.contains("sources") {
                open_section = Some(level);
            } else if open_section.is_some_and(|open| level <= open) {
                open_section = None;
            }
            continue;
        }

        if element.value().name() != "a" {
            continue;
        }
        if open_section.is_none() && !inside_references_container(&element) {
            continue;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.starts_with("http://") || href.starts_with("https://") {
            anchors.push((element.id(), href.to_owned()));
        }
    }

    anchors
}

/// Ids of placeholder tokens in the body that match none of `declared`, in
/// order of appearance.
pub fn undeclared_placeholder_ids(html: &str, declared: &[&str]) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
        let after = &rest[start + PLACEHOLDER_PREFIX.len()..];
        let token_len = match declared_id(after, declared) {
            Some(id) => id.len(),
            None => {
                let len = scanned_id_len(after);
                let id = after[..len].to_owned();
                if len > 0 && !ids.contains(&id) {
                    ids.push(id);
                }
                len
            }
        };
        rest = &after[token_len..];
    }
    ids
}

/// Replaces each placeholder whose id is a key of `replacements`. A token
/// that is the sole content of a paragraph replaces the paragraph as well.
pub fn substitute_placeholders(html: &str, replacements: &HashMap<String, String>) -> String {
    let declared: Vec<&str> = replacements.keys().map(String::as_str).collect();
    rewrite_placeholders(html, &declared, |id| replacements.get(id).cloned())
}

/// Removes the placeholders of the given ids.
pub fn strip_placeholders(html: &str, ids: &[String]) -> String {
    let declared: Vec<&str> = ids.iter().map(String::as_str).collect();
    rewrite_placeholders(html, &declared, |_| Some(String::new()))
}

pub fn render_figure(src: &str, title: &str) -> String {
    let title_attr = escape_attr(title);
    let caption = escape_text(title);
    format!(
        "<figure class=\"wp-block-image size-large\"><img src=\"{}\" alt=\"{title_attr}\" title=\"{title_attr}\"/><figcaption>{caption}</figcaption></figure>",
        escape_attr(src)
    )
}

fn rewrite_placeholders(
    html: &str,
    declared: &[&str],
    replacement_for: impl Fn(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find(PLACEHOLDER_PREFIX) {
        let id_start = start + PLACEHOLDER_PREFIX.len();
        let after = &rest[id_start..];
        let Some((id, replacement)) =
            declared_id(after, declared).and_then(|id| Some((id, replacement_for(id)?)))
        else {
            out.push_str(&rest[..id_start]);
            rest = after;
            continue;
        };

        let before = &rest[..start];
        let tail = &after[id.len()..];
        match (before.strip_suffix("<p>"), tail.strip_prefix("</p>")) {
            (Some(before_paragraph), Some(after_paragraph)) => {
                out.push_str(before_paragraph);
                out.push_str(&replacement);
                rest = after_paragraph;
            }
            _ => {
                out.push_str(before);
                out.push_str(&replacement);
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

/// The longest declared id that `text` starts with and that ends on a token
/// boundary, so `1` never matches inside `10`.
fn declared_id<'a>(text: &str, declared: &[&'a str]) -> Option<&'a str> {
    declared
        .iter()
        .copied()
        .filter(|id| {
            !id.is_empty()
                && text.starts_with(id)
                && text[id.len()..].chars().next().is_none_or(|c| !is_id_char(c))
        })
        .max_by_key(|id| id.len())
}

fn scanned_id_len(text: &str) -> usize {
    text.find(|c: char| !is_id_char(c)).unwrap_or(text.len())
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn inside_references_container(element: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| {
            let value = ancestor.value();
            value
                .id()
                .is_some_and(|id| id.to_lowercase().contains("references"))
                || value
                    .classes()
                    .any(|class| class.to_lowercase().contains("references"))
        })
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<h2>Intro</h2>
<p>See <a href="https://example.com/inline">inline</a>.</p>
<h2>References</h2>
<ul>
  <li><a href="https://a.example/one">One</a></li>
  <li><a href="https://b.example/two">Two</a></li>
  <li><a href="/relative">Relative</a></li>
</ul>
<h2>FAQ</h2>
<p><a href="https://example.com/faq">faq</a></p>"#;

    #[test]
    fn reference_links_only_come_from_the_references_section() {
        assert_eq!(
            reference_links(ARTICLE),
            vec!["https://a.example/one", "https://b.example/two"]
        );
    }

    #[test]
    fn reference_container_by_class_is_recognised() {
        let html = r#"<div class="article-references"><a href="https://c.example/">c</a></div>
<p><a href="https://d.example/">d</a></p>"#;
        assert_eq!(reference_links(html), vec!["https://c.example/"]);
    }

    #[test]
    fn subheadings_stay_inside_the_section() {
        let html = r#"<h2>Sources</h2><h3>Books</h3><a href="https://e.example/">e</a><h2>Next</h2><a href="https://f.example/">f</a>"#;
        assert_eq!(reference_links(html), vec!["https://e.example/"]);
    }

    #[test]
    fn replace_reference_hrefs_returns_new_html() {
        let replacements = HashMap::from([(
            "https://a.example/one".to_owned(),
            "https://a.example/fixed".to_owned(),
        )]);
        let out = replace_reference_hrefs(ARTICLE, &replacements);
        assert!(out.contains(r#"href="https://a.example/fixed""#));
        assert!(!out.contains("https://a.example/one"));
        assert!(ARTICLE.contains("https://a.example/one"));
        assert_eq!(all_hrefs(&out).len(), all_hrefs(ARTICLE).len());
    }

    #[test]
    fn replace_reference_hrefs_handles_escaped_ampersands() {
        let html = r#"<h2>References</h2><a href="https://x.example/?a=1&amp;b=2">x</a>"#;
        let replacements = HashMap::from([(
            "https://x.example/?a=1&b=2".to_owned(),
            "https://y.example/".to_owned(),
        )]);
        let out = replace_reference_hrefs(html, &replacements);
        assert_eq!(all_hrefs(&out), vec!["https://y.example/"]);
    }

    #[test]
    fn unquoted_and_padded_hrefs_are_rewritten() {
        let html = "<h2>References</h2><ul><li><a href=https://a.example/one>One</a></li>\
<li><a href = \"https://b.example/two\" >Two</a></li></ul>";
        let replacements = HashMap::from([
            ("https://a.example/one".to_owned(), "https://a.example/new".to_owned()),
            ("https://b.example/two".to_owned(), "https://b.example/new".to_owned()),
        ]);
        let out = replace_reference_hrefs(html, &replacements);
        assert_eq!(
            all_hrefs(&out),
            vec!["https://a.example/new", "https://b.example/new"]
        );
    }

    #[test]
    fn links_outside_references_keep_their_href() {
        let html = r#"<p><a href="https://a.example/one">body</a></p>
<h2>References</h2><p><a href="https://a.example/one">ref</a></p>"#;
        let replacements = HashMap::from([(
            "https://a.example/one".to_owned(),
            "https://a.example/new".to_owned(),
        )]);
        let out = replace_reference_hrefs(html, &replacements);
        assert_eq!(
            all_hrefs(&out),
            vec!["https://a.example/one", "https://a.example/new"]
        );
    }

    #[test]
    fn nothing_to_replace_returns_input_unchanged() {
        let replacements = HashMap::from([(
            "https://example.com/inline".to_owned(),
            "https://example.com/other".to_owned(),
        )]);
        assert_eq!(replace_reference_hrefs(ARTICLE, &replacements), ARTICLE);
    }

    #[test]
    fn undeclared_ids_respect_token_boundaries() {
        let html = "<p>INFOGRAPHIC-PLACEHOLDER-1</p><p>INFOGRAPHIC-PLACEHOLDER-10</p>INFOGRAPHIC-PLACEHOLDER-";
        assert_eq!(undeclared_placeholder_ids(html, &[]), vec!["1", "10"]);
        assert_eq!(undeclared_placeholder_ids(html, &["1"]), vec!["10"]);
    }

    #[test]
    fn hyphenated_ids_are_matched_whole() {
        let html = "<p>INFOGRAPHIC-PLACEHOLDER-chart-1</p><p>INFOGRAPHIC-PLACEHOLDER-chart-12</p>";
        let replacements = HashMap::from([("chart-1".to_owned(), "<figure/>".to_owned())]);
        assert_eq!(
            substitute_placeholders(html, &replacements),
            "<figure/><p>INFOGRAPHIC-PLACEHOLDER-chart-12</p>"
        );
        assert_eq!(
            strip_placeholders(html, &["chart-12".to_owned()]),
            "<p>INFOGRAPHIC-PLACEHOLDER-chart-1</p>"
        );
        assert_eq!(
            undeclared_placeholder_ids(html, &["chart-1", "chart-12"]),
            Vec::<String>::new()
        );
    }

    #[test]
    fn longest_declared_id_wins() {
        let html = "<p>INFOGRAPHIC-PLACEHOLDER-a-b</p>";
        let replacements = HashMap::from([
            ("a".to_owned(), "[a]".to_owned()),
            ("a-b".to_owned(), "[a-b]".to_owned()),
        ]);
        assert_eq!(substitute_placeholders(html, &replacements), "[a-b]");
    }

    #[test]
    fn substitution_replaces_wrapping_paragraph() {
        let html = "<p>a</p><p>INFOGRAPHIC-PLACEHOLDER-1</p><p>INFOGRAPHIC-PLACEHOLDER-10</p>";
        let replacements = HashMap::from([("1".to_owned(), "<figure>1</figure>".to_owned())]);
        assert_eq!(
            substitute_placeholders(html, &replacements),
            "<p>a</p><figure>1</figure><p>INFOGRAPHIC-PLACEHOLDER-10</p>"
        );
    }

    #[test]
    fn inline_placeholder_is_replaced_in_place() {
        let html = "<p>before INFOGRAPHIC-PLACEHOLDER-2 after</p>";
        let replacements = HashMap::from([("2".to_owned(), "[img]".to_owned())]);
        assert_eq!(
            substitute_placeholders(html, &replacements),
            "<p>before [img] after</p>"
        );
    }

    #[test]
    fn strip_removes_only_named_placeholders() {
        let html = "<p>INFOGRAPHIC-PLACEHOLDER-1</p><p>x</p><p>INFOGRAPHIC-PLACEHOLDER-7</p>";
        assert_eq!(
            strip_placeholders(html, &["1".to_owned()]),
            "<p>x</p><p>INFOGRAPHIC-PLACEHOLDER-7</p>"
        );
    }

    #[test]
    fn figure_escapes_title() {
        let figure = render_figure("https://site/wp-content/a.png", "Tea & \"Coffee\"");
        assert!(figure.contains(r#"alt="Tea &amp; &quot;Coffee&quot;""#));
        assert!(figure.contains("<figcaption>Tea &amp; \"Coffee\"</figcaption>"));
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("valid regex"));

const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&amp;", "&"),
];

/// Removes markup from editor HTML, leaving the visible text.
pub fn strip_html(html: &str) -> String {
    let mut text = MARKUP.replace_all(html, " ").into_owned();
    for (entity, replacement) in ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }
    text
}

/// Collects `#word` tags from note content, lowercased and deduplicated.
pub fn extract_tags(content: &str) -> BTreeSet<String> {
    if content.is_empty() {
        return BTreeSet::new();
    }
    let text = strip_html(content);
    TAG.captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .map(|word| word.as_str().to_lowercase())
        .collect()
}

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// Minimum number of characters a selector match needs before it is accepted as the article body.
pub const MIN_CONTENT_CHARS: usize = 200;

/// Probed in order; the first match longer than `MIN_CONTENT_CHARS` wins.
pub const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".article-body",
    "#article-body",
    ".story-body",
    ".content",
    "main",
    "#content",
];

// Compile selectors and patterns once
static SELECTORS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|raw| (*raw, Selector::parse(raw).expect("Failed to parse content selector")))
        .collect()
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body").expect("Failed to parse body selector")
});

static H1_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1").expect("Failed to parse h1 selector")
});

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Failed to compile title pattern")
});

/// Text pulled out of a page, plus which selector produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: Option<String>,
    pub content: String,
    pub matched_selector: Option<&'static str>,
}

/// Case-insensitive `<title>` match, entity-decoded and whitespace-collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| fragment_text(m.as_str()))
        .filter(|title| !title.is_empty())
}

pub fn extract_page(html: &str) -> PageText {
    let document = Html::parse_document(html);
    let title = extract_title(html).or_else(|| {
        document
            .select(&H1_SELECTOR)
            .next()
            .map(readable_text)
            .filter(|t| !t.is_empty())
    });

    for (raw, selector) in SELECTORS.iter() {
        for element in document.select(selector) {
            let text = readable_text(element);
            if text.chars().count() > MIN_CONTENT_CHARS {
                return PageText {
                    title,
                    content: text,
                    matched_selector: Some(*raw),
                };
            }
        }
    }

    let content = document
        .select(&BODY_SELECTOR)
        .next()
        .map(readable_text)
        .unwrap_or_else(|| fragment_text(html));

    PageText {
        title,
        content,
        matched_selector: None,
    }
}

/// Visible text of an element, skipping script, style and noscript bodies.
pub fn readable_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
            });
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    collapse_whitespace(&out)
}

/// Text of an HTML fragment with tags dropped and every named or numeric entity decoded.
pub fn fragment_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    collapse_whitespace(&parsed.root_element().text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}

/// Cuts `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

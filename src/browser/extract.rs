//! Visible article text from a loaded page.
//!
//! The live DOM is asked for candidate blocks first. A block is kept only if
//! it is rendered, long enough, dense with words and free of skip words. When
//! nothing survives, the raw markup is parsed offline with `scraper` and
//! block-level text is kept unless it looks like subscription or cookie
//! chrome. Either way the joined text must reach a minimum length.

use crate::config::ScrapingConfig;
use chromiumoxide::Page;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

/// Collects `{text, visible, within}` for each candidate element in
/// selector order. `within` lists the indexes of other candidates
/// that contain the element, so nesting can be resolved after filtering.
const COLLECT_BLOCKS_JS: &str = r#"(() => {
    const selectors = [
        'article', 'main', '[role="main"]', 'section',
        '[class*="article-body"]', '[class*="story-body"]', '[class*="content"]',
        'p', 'li'
    ];
    const seen = new Set();
    const elements = [];
    for (const selector of selectors) {
        for (const el of document.querySelectorAll(selector)) {
            if (seen.has(el)) continue;
            seen.add(el);
            elements.push(el);
        }
    }
    return elements.map(el => {
        const rect = el.getBoundingClientRect();
        const within = [];
        elements.forEach((other, i) => {
            if (other !== el && other.contains(el)) within.push(i);
        });
        return {
            text: el.innerText || '',
            visible: rect.width > 0 && rect.height > 0,
            within,
        };
    });
})()"#;

static FALLBACK_BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, li, blockquote, h1, h2, h3, pre").unwrap());
static BOILERPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(subscribe|cookies?|sign in|follow us)\b").unwrap());

/// A candidate element reported by the page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub visible: bool,
    /// Indexes of candidates that contain this one.
    #[serde(default)]
    pub within: Vec<usize>,
}

/// Thresholds for accepting page text.
#[derive(Debug, Clone)]
pub struct TextRules {
    pub min_block_length: usize,
    pub min_word_density: f64,
    pub min_page_text_length: usize,
    skip_words: Vec<String>,
}

impl TextRules {
    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self {
            min_block_length: config.min_block_length,
            min_word_density: config.min_word_density,
            min_page_text_length: config.min_page_text_length,
            skip_words: config
                .skip_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    fn has_skip_word(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.skip_words.iter().any(|w| lowered.contains(w.as_str()))
    }
}

/// Extract article text from a page that has finished loading.
pub async fn extract_text(page: &Page, rules: &TextRules) -> Option<String> {
    let blocks: Vec<TextBlock> = match page.evaluate(COLLECT_BLOCKS_JS).await {
        Ok(result) => result.into_value().unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "Block collection script failed");
            Vec::new()
        }
    };

    let mut kept = select_blocks(&blocks, rules);
    if kept.is_empty() {
        debug!(candidates = blocks.len(), "No live blocks survived; parsing raw markup");
        match page.content().await {
            Ok(html) => kept = fallback_blocks(&html, rules),
            Err(e) => debug!(error = %e, "Could not read page markup"),
        }
    }
    assemble(kept, rules.min_page_text_length)
}

/// Filter live-DOM blocks.
///
/// Blocks are judged one at a time in cascade order. A block that passes
/// shadows every candidate nested in it or wrapping it; a rejected block
/// shadows nothing.
pub fn select_blocks(blocks: &[TextBlock], rules: &TextRules) -> Vec<String> {
    let mut taken: Vec<usize> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        let text = block.text.trim();
        let accepted = block.visible
            && text.chars().count() >= rules.min_block_length
            && word_density(text) >= rules.min_word_density
            && !rules.has_skip_word(text);
        if !accepted {
            continue;
        }
        let overlaps = taken
            .iter()
            .any(|&t| block.within.contains(&t) || blocks[t].within.contains(&i));
        if overlaps {
            continue;
        }
        taken.push(i);
        kept.push(text);
    }
    kept.into_iter().map(str::to_string).unique().collect()
}

/// Whitespace tokens per four characters.
pub fn word_density(text: &str) -> f64 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0.0;
    }
    text.split_whitespace().count() as f64 / (chars as f64 / 4.0)
}

/// Block-level text from raw markup, for pages whose live DOM gave nothing.
pub fn fallback_blocks(html: &str, rules: &TextRules) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&FALLBACK_BLOCKS)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| collapse_whitespace(&text))
        .filter(|text| text.chars().count() > rules.min_block_length)
        .filter(|text| !BOILERPLATE.is_match(text))
        .unique()
        .collect()
}

/// Join blocks and enforce the minimum total length.
pub fn assemble(blocks: Vec<String>, min_total: usize) -> Option<String> {
    let text = blocks
        .iter()
        .map(|b| collapse_whitespace(b))
        .filter(|b| !b.is_empty())
        .join("\n");
    if text.chars().count() >= min_total && !text.is_empty() {
        Some(text)
    } else {
        debug!(chars = text.chars().count(), min_total, "Page text too short");
        None
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().join(" ")
}

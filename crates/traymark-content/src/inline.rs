//! Inline pattern scanning
//!
//! Recognizes Markdown-style inline constructs (images, links, bare URLs,
//! bold, italic) in a single left-to-right pass over one block of text.
//! Overlapping matches are resolved by earliest start offset, ties by
//! pattern priority; later overlapping matches are discarded.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::nodes::{ContentNode, InlineNode};

/// Regex for Markdown images: `![alt](url)`
static IMAGE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").unwrap());

/// Regex for Markdown links: `[text](url)`
static LINK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap());

/// Regex for a bare URL wrapped in parentheses: `(https://...)`
static PAREN_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((https?://[^\s)]+)\)").unwrap());

/// Regex for detecting bare URLs in text
static URL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>\[\]()]+").unwrap());

/// Regex for Markdown bold: `**text**`
static BOLD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());

/// Regex for Markdown headers promoted out of free text: `#` to `####`
static HEADING_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,4})\s+(.*)$").unwrap());

/// Options threaded through inline scanning
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Set under a `code`/`pre` ancestor: no pattern family is active and
    /// text passes through verbatim, so code samples never grow links.
    pub code_context: bool,
}

/// One accepted pattern match within a text block
struct PatternMatch {
    start: usize,
    end: usize,
    priority: u8,
    nodes: Vec<InlineNode>,
}

/// Scan one block of text into an ordered inline node sequence.
///
/// Plain segments between matches are preserved verbatim, including
/// internal whitespace; only fully-empty segments are dropped.
pub fn scan_inline(text: &str, opts: &ScanOptions) -> Vec<InlineNode> {
    if text.is_empty() {
        return Vec::new();
    }
    if opts.code_context {
        return vec![InlineNode::PlainText(text.to_string())];
    }

    let mut matches = collect_matches(text);
    matches.sort_by(|a, b| (a.start, a.priority).cmp(&(b.start, b.priority)));

    let mut result = Vec::new();
    let mut cursor = 0;
    for m in matches {
        if m.start < cursor {
            // Overlaps an already-accepted match
            continue;
        }
        if m.start > cursor {
            result.push(InlineNode::PlainText(text[cursor..m.start].to_string()));
        }
        result.extend(m.nodes);
        cursor = m.end;
    }
    if cursor < text.len() {
        result.push(InlineNode::PlainText(text[cursor..].to_string()));
    }
    result
}

/// Scan free text in block position, promoting leading `#`-`####` lines
/// to headings and grouping the remaining lines into paragraph flow.
pub fn scan_block_text(text: &str, opts: &ScanOptions) -> Vec<ContentNode> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if opts.code_context {
        return vec![ContentNode::Text(text.to_string())];
    }

    let mut nodes = Vec::new();
    let mut flow: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(cap) = HEADING_REGEX.captures(line) {
            flush_paragraph(&mut nodes, &mut flow, opts);
            nodes.push(ContentNode::Heading {
                level: cap[1].len() as u8,
                text: cap[2].trim().to_string(),
            });
        } else {
            flow.push(line);
        }
    }
    flush_paragraph(&mut nodes, &mut flow, opts);
    nodes
}

fn flush_paragraph(nodes: &mut Vec<ContentNode>, flow: &mut Vec<&str>, opts: &ScanOptions) {
    if flow.is_empty() {
        return;
    }
    let joined = flow.join("\n");
    flow.clear();
    if joined.trim().is_empty() {
        return;
    }
    let inline = scan_inline(&joined, opts);
    if !inline.is_empty() {
        nodes.push(ContentNode::Paragraph(inline));
    }
}

fn collect_matches(text: &str) -> Vec<PatternMatch> {
    let mut matches = Vec::new();

    for cap in IMAGE_REGEX.captures_iter(text) {
        let whole = cap.get(0).unwrap();
        matches.push(PatternMatch {
            start: whole.start(),
            end: whole.end(),
            priority: 0,
            nodes: vec![InlineNode::ImageRef {
                url: cap[2].to_string(),
                alt_text: cap[1].to_string(),
            }],
        });
    }

    for cap in LINK_REGEX.captures_iter(text) {
        let whole = cap.get(0).unwrap();
        // Image syntax must win; regex has no lookbehind, so check the byte
        // before the `[` for `!`
        if whole.start() > 0 && text.as_bytes()[whole.start() - 1] == b'!' {
            continue;
        }
        matches.push(PatternMatch {
            start: whole.start(),
            end: whole.end(),
            priority: 1,
            nodes: vec![InlineNode::Link {
                url: cap[2].to_string(),
                display_text: cap[1].to_string(),
            }],
        });
    }

    for cap in PAREN_URL_REGEX.captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let url = cap[1].to_string();
        matches.push(PatternMatch {
            start: whole.start(),
            end: whole.end(),
            priority: 2,
            nodes: vec![
                InlineNode::PlainText("(".to_string()),
                InlineNode::Link {
                    url: url.clone(),
                    display_text: url,
                },
                InlineNode::PlainText(")".to_string()),
            ],
        });
    }

    for mat in URL_REGEX.find_iter(text) {
        let trimmed = trim_url_punctuation(mat.as_str());
        if trimmed.ends_with("://") {
            continue;
        }
        matches.push(PatternMatch {
            start: mat.start(),
            end: mat.start() + trimmed.len(),
            priority: 3,
            nodes: vec![InlineNode::Link {
                url: trimmed.to_string(),
                display_text: trimmed.to_string(),
            }],
        });
    }

    for cap in BOLD_REGEX.captures_iter(text) {
        let whole = cap.get(0).unwrap();
        matches.push(PatternMatch {
            start: whole.start(),
            end: whole.end(),
            priority: 4,
            nodes: vec![InlineNode::Bold(cap[1].to_string())],
        });
    }

    for (start, end, value) in find_italics(text) {
        matches.push(PatternMatch {
            start,
            end,
            priority: 5,
            nodes: vec![InlineNode::Italic(value)],
        });
    }

    matches
}

/// Strip trailing sentence punctuation that a bare URL swallowed
fn trim_url_punctuation(url: &str) -> &str {
    url.trim_end_matches(|c| matches!(c, '.' | ',' | ';' | '!' | '?' | '\'' | '"' | '}' | ']' | ')'))
}

/// Hand-rolled italic scan: `_text_` with word-boundary guards.
///
/// An italic span opens at an underscore whose outside-left neighbor is
/// absent or non-word, and closes at the next underscore, whose
/// outside-right neighbor must also be absent or non-word. The inner run
/// must be non-empty and must not start or end with whitespace. This keeps
/// `snake_case_identifiers` out of italics entirely.
fn find_italics(text: &str) -> Vec<(usize, usize, String)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut found = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].1 != '_' {
            i += 1;
            continue;
        }
        let before = if i == 0 { None } else { Some(chars[i - 1].1) };
        if !italic_boundary(before) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && chars[j].1 != '_' {
            j += 1;
        }
        if j >= chars.len() {
            // No closing underscore anywhere after this point
            break;
        }

        let inner = &text[chars[i].0 + '_'.len_utf8()..chars[j].0];
        let after = chars.get(j + 1).map(|&(_, c)| c);
        if !inner.is_empty() && inner.trim() == inner && italic_boundary(after) {
            found.push((chars[i].0, chars[j].0 + '_'.len_utf8(), inner.to_string()));
            i = j + 1;
        } else {
            i += 1;
        }
    }

    found
}

/// True when the character outside an italic delimiter does not continue a word
fn italic_boundary(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(ch) => !ch.is_alphanumeric() && ch != '_',
    }
}

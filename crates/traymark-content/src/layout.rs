//! Inline layout assembly
//!
//! Single source of truth for flowing parsed content into
//! width-constrained display lines. Consecutive flowable blocks
//! (paragraph fragments split around inline code or hard breaks) are
//! regrouped into one flow, words wrap at whitespace and run
//! boundaries, and words wider than the line are force-broken by
//! character.
//!
//! All width calculations use unicode display width, not byte length.

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::nodes::{ContentNode, InlineNode};

/// Options for line assembly
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Maximum display columns per line; 0 means unbounded
    pub max_width: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self { max_width: 80 }
    }
}

/// Kind of rendered line, for presentation styling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Text,
    Heading(u8),
    ListItem,
    Code,
}

/// One styled run within a rendered line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRun {
    Text {
        text: String,
        bold: bool,
        italic: bool,
        code: bool,
    },
    Link {
        text: String,
        url: String,
    },
    /// Image slot; the presentation layer resolves `url` against the
    /// image cache and falls back to `alt_text` while pixels are missing
    Image {
        url: String,
        alt_text: String,
    },
}

/// One display line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderLine {
    pub kind: LineKind,
    pub runs: Vec<TextRun>,
}

/// Assemble parsed content into display lines.
pub fn assemble(nodes: &[ContentNode], opts: &LayoutOptions) -> Vec<RenderLine> {
    let width = if opts.max_width == 0 {
        usize::MAX
    } else {
        opts.max_width
    };
    let mut lines = Vec::new();
    render_blocks(nodes, width, &mut lines);
    lines
}

fn render_blocks(nodes: &[ContentNode], width: usize, out: &mut Vec<RenderLine>) {
    let mut idx = 0;
    while idx < nodes.len() {
        match &nodes[idx] {
            ContentNode::Paragraph(_) | ContentNode::InlineCode(_) | ContentNode::LineBreak => {
                let end = flow_group_end(nodes, idx);
                let tokens = flow_tokens(&nodes[idx..end]);
                fill_lines(&tokens, width, LineKind::Text, out);
                idx = end;
            }
            ContentNode::Heading { level, text } => {
                let mut tokens = Vec::new();
                push_words(text, &RunStyle::Bold, &mut tokens);
                fill_lines(&tokens, width, LineKind::Heading(*level), out);
                idx += 1;
            }
            ContentNode::CodeBlock(code) => {
                code_lines(code, out);
                idx += 1;
            }
            ContentNode::ListBlock { ordered, items } => {
                list_lines(*ordered, items, width, out);
                idx += 1;
            }
            ContentNode::Text(text) => {
                fill_lines(&text_tokens(text), width, LineKind::Text, out);
                idx += 1;
            }
            ContentNode::Div(children) => {
                render_blocks(children, width, out);
                idx += 1;
            }
        }
    }
}

/// Extent of one flow group starting at `start`.
///
/// A group continues across InlineCode and LineBreak nodes and across
/// paragraphs that follow such a connector; two adjacent paragraphs stay
/// separate blocks.
fn flow_group_end(nodes: &[ContentNode], start: usize) -> usize {
    let mut end = start + 1;
    while end < nodes.len() {
        let joinable = match (&nodes[end - 1], &nodes[end]) {
            (ContentNode::Paragraph(_), ContentNode::Paragraph(_)) => false,
            (_, ContentNode::Paragraph(_)) => true,
            (_, ContentNode::InlineCode(_) | ContentNode::LineBreak) => true,
            _ => false,
        };
        if !joinable {
            break;
        }
        end += 1;
    }
    end
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunStyle {
    Plain,
    Bold,
    Italic,
    Code,
    Link(String),
}

enum FlowToken {
    Word { text: String, style: RunStyle },
    Space,
    HardBreak,
    Image { url: String, alt_text: String },
}

fn flow_tokens(nodes: &[ContentNode]) -> Vec<FlowToken> {
    let mut tokens = Vec::new();
    for node in nodes {
        match node {
            ContentNode::Paragraph(children) => {
                for inline in children {
                    push_inline_tokens(inline, &mut tokens);
                }
            }
            ContentNode::InlineCode(code) => {
                // Code spans stay atomic; internal spacing is meaningful
                tokens.push(FlowToken::Word {
                    text: code.clone(),
                    style: RunStyle::Code,
                });
            }
            ContentNode::LineBreak => {
                if matches!(tokens.last(), Some(FlowToken::Space)) {
                    tokens.pop();
                }
                tokens.push(FlowToken::HardBreak);
            }
            _ => {}
        }
    }
    tokens
}

fn push_inline_tokens(inline: &InlineNode, tokens: &mut Vec<FlowToken>) {
    match inline {
        InlineNode::PlainText(text) => push_words(text, &RunStyle::Plain, tokens),
        InlineNode::Bold(text) => push_words(text, &RunStyle::Bold, tokens),
        InlineNode::Italic(text) => push_words(text, &RunStyle::Italic, tokens),
        InlineNode::Link { url, display_text } => {
            push_words(display_text, &RunStyle::Link(url.clone()), tokens)
        }
        InlineNode::ImageRef { url, alt_text } => tokens.push(FlowToken::Image {
            url: url.clone(),
            alt_text: alt_text.clone(),
        }),
    }
}

/// Split text into word tokens, collapsing whitespace to single spaces
/// while keeping edge whitespace as inter-run spacing.
fn push_words(text: &str, style: &RunStyle, tokens: &mut Vec<FlowToken>) {
    if text.is_empty() {
        return;
    }
    if text.starts_with(char::is_whitespace) {
        push_space(tokens);
    }
    let mut first = true;
    for word in text.split_whitespace() {
        if !first {
            push_space(tokens);
        }
        tokens.push(FlowToken::Word {
            text: word.to_string(),
            style: style.clone(),
        });
        first = false;
    }
    if text.ends_with(char::is_whitespace) {
        push_space(tokens);
    }
}

fn push_space(tokens: &mut Vec<FlowToken>) {
    if !matches!(tokens.last(), Some(FlowToken::Space)) {
        tokens.push(FlowToken::Space);
    }
}

fn text_tokens(text: &str) -> Vec<FlowToken> {
    let mut tokens = Vec::new();
    let mut first = true;
    for line in text.lines() {
        if !first {
            tokens.push(FlowToken::HardBreak);
        }
        push_words(line, &RunStyle::Plain, &mut tokens);
        first = false;
    }
    tokens
}

/// Greedy line fill over a token stream.
fn fill_lines(tokens: &[FlowToken], max_width: usize, kind: LineKind, out: &mut Vec<RenderLine>) {
    let mut line = LineBuilder::new(kind);
    let mut space_pending = false;

    for token in tokens {
        match token {
            FlowToken::Space => {
                if !line.is_empty() {
                    space_pending = true;
                }
            }
            FlowToken::HardBreak => {
                out.push(line.take());
                space_pending = false;
            }
            FlowToken::Word { text, style } => {
                let sep = usize::from(space_pending);
                let word_width = display_width(text);
                if !line.is_empty() && line.width + sep + word_width > max_width {
                    out.push(line.take());
                    space_pending = false;
                }
                if line.is_empty() && word_width > max_width {
                    force_break(text, style, max_width, &mut line, out);
                } else {
                    line.push_text(text, style, space_pending);
                }
                space_pending = false;
            }
            FlowToken::Image { url, alt_text } => {
                let image_width = display_width(alt_text).max(1);
                let sep = usize::from(space_pending);
                if !line.is_empty() && line.width + sep + image_width > max_width {
                    out.push(line.take());
                    space_pending = false;
                }
                if space_pending && !line.is_empty() {
                    line.push_str(" ", &RunStyle::Plain);
                }
                line.push_image(url.clone(), alt_text.clone(), image_width);
                space_pending = false;
            }
        }
    }

    if !line.is_empty() {
        out.push(line.take());
    }
}

/// Break a word wider than the line by characters, respecting display width
fn force_break(
    text: &str,
    style: &RunStyle,
    max_width: usize,
    line: &mut LineBuilder,
    out: &mut Vec<RenderLine>,
) {
    let mut chunk = String::new();
    let mut chunk_width = 0usize;

    for c in text.chars() {
        let char_width = UnicodeWidthChar::width(c).unwrap_or(0);
        if chunk_width + char_width > max_width && !chunk.is_empty() {
            line.push_str(&chunk, style);
            out.push(line.take());
            chunk.clear();
            chunk_width = 0;
        }
        chunk.push(c);
        chunk_width += char_width;
    }
    if !chunk.is_empty() {
        line.push_str(&chunk, style);
    }
}

fn code_lines(code: &str, out: &mut Vec<RenderLine>) {
    for line in code.lines() {
        out.push(RenderLine {
            kind: LineKind::Code,
            runs: vec![TextRun::Text {
                text: line.to_string(),
                bold: false,
                italic: false,
                code: true,
            }],
        });
    }
}

fn list_lines(ordered: bool, items: &[Vec<ContentNode>], width: usize, out: &mut Vec<RenderLine>) {
    for (idx, item) in items.iter().enumerate() {
        let marker = if ordered {
            format!("{}. ", idx + 1)
        } else {
            "\u{2022} ".to_string()
        };
        let marker_width = display_width(&marker);
        let inner_width = width.saturating_sub(marker_width).max(1);

        let mut item_lines = Vec::new();
        render_blocks(item, inner_width, &mut item_lines);

        if item_lines.is_empty() {
            out.push(RenderLine {
                kind: LineKind::ListItem,
                runs: vec![plain_run(marker.clone())],
            });
            continue;
        }

        for (line_idx, mut line) in item_lines.into_iter().enumerate() {
            let prefix = if line_idx == 0 {
                marker.clone()
            } else {
                " ".repeat(marker_width)
            };
            line.runs.insert(0, plain_run(prefix));
            if line.kind != LineKind::Code {
                line.kind = LineKind::ListItem;
            }
            out.push(line);
        }
    }
}

fn plain_run(text: String) -> TextRun {
    TextRun::Text {
        text,
        bold: false,
        italic: false,
        code: false,
    }
}

#[inline]
fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

enum LinePiece {
    Run(String, RunStyle),
    Image { url: String, alt_text: String },
}

impl LinePiece {
    fn into_run(self) -> TextRun {
        match self {
            LinePiece::Run(text, style) => match style {
                RunStyle::Plain => TextRun::Text {
                    text,
                    bold: false,
                    italic: false,
                    code: false,
                },
                RunStyle::Bold => TextRun::Text {
                    text,
                    bold: true,
                    italic: false,
                    code: false,
                },
                RunStyle::Italic => TextRun::Text {
                    text,
                    bold: false,
                    italic: true,
                    code: false,
                },
                RunStyle::Code => TextRun::Text {
                    text,
                    bold: false,
                    italic: false,
                    code: true,
                },
                RunStyle::Link(url) => TextRun::Link { text, url },
            },
            LinePiece::Image { url, alt_text } => TextRun::Image { url, alt_text },
        }
    }
}

struct LineBuilder {
    kind: LineKind,
    pieces: Vec<LinePiece>,
    width: usize,
}

impl LineBuilder {
    fn new(kind: LineKind) -> Self {
        Self {
            kind,
            pieces: Vec::new(),
            width: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    fn push_text(&mut self, text: &str, style: &RunStyle, space_before: bool) {
        if space_before {
            // Spaces inherit the surrounding style when it continues,
            // otherwise they stay plain so links and emphasis don't
            // bleed into separators
            let space_style = match self.pieces.last() {
                Some(LinePiece::Run(_, last)) if last == style => style.clone(),
                _ => RunStyle::Plain,
            };
            self.push_str(" ", &space_style);
        }
        self.push_str(text, style);
    }

    fn push_str(&mut self, text: &str, style: &RunStyle) {
        self.width += display_width(text);
        if let Some(LinePiece::Run(existing, existing_style)) = self.pieces.last_mut() {
            if existing_style == style {
                existing.push_str(text);
                return;
            }
        }
        self.pieces.push(LinePiece::Run(text.to_string(), style.clone()));
    }

    fn push_image(&mut self, url: String, alt_text: String, width: usize) {
        self.width += width;
        self.pieces.push(LinePiece::Image { url, alt_text });
    }

    fn take(&mut self) -> RenderLine {
        let runs = self.pieces.drain(..).map(LinePiece::into_run).collect();
        self.width = 0;
        RenderLine {
            kind: self.kind,
            runs,
        }
    }
}

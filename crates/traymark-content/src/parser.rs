//! Hybrid HTML/Markdown content parsing
//!
//! Item descriptions arrive as HTML-ish markup with literal Markdown
//! syntax mixed into the text. html5ever error-corrects the markup the
//! way a browser would, and the resulting tree is walked into an ordered
//! [`ContentNode`] sequence. The walk never fails: malformed input
//! degrades to a diagnostic text node so callers always have something
//! renderable.

use std::io;

use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use tracing::warn;

use crate::inline::{scan_block_text, scan_inline, ScanOptions};
use crate::nodes::{ContentNode, InlineNode};

/// Class-attribute marker for source-credit containers that must be kept
/// as one opaque text run
const ATTRIBUTION_MARKER: &str = "attribution";

/// Parse one raw content string into an ordered node sequence.
///
/// Empty or whitespace-only input yields an empty sequence. Unparseable
/// input yields a single [`ContentNode::Text`] carrying a diagnostic plus
/// the raw string; this function never returns an error.
pub fn parse_content(raw: &str) -> Vec<ContentNode> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let dom = match parse_dom(raw) {
        Ok(dom) => dom,
        Err(err) => {
            warn!(error = %err, "content parse failed, degrading to raw text");
            return vec![ContentNode::Text(format!(
                "content could not be parsed ({err}): {raw}"
            ))];
        }
    };

    match find_body(&dom.document) {
        Some(body) => parse_children(&body),
        None => vec![ContentNode::Text(raw.to_string())],
    }
}

fn parse_dom(raw: &str) -> io::Result<RcDom> {
    let opts = ParseOpts {
        tree_builder: TreeBuilderOpts {
            scripting_enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut reader = io::Cursor::new(raw.as_bytes());
    parse_document(RcDom::default(), opts)
        .from_utf8()
        .read_from(&mut reader)
}

/// html5ever always synthesizes html/head/body; fragment content lands
/// under body.
fn find_body(handle: &Handle) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data {
        if name.local.as_ref() == "body" {
            return Some(handle.clone());
        }
    }
    for child in handle.children.borrow().iter() {
        if let Some(found) = find_body(child) {
            return Some(found);
        }
    }
    None
}

/// Parse a container's children into block nodes.
///
/// A container whose direct children mix non-whitespace text with anchor
/// elements is rebuilt as one flow so inline adjacency survives; anchors
/// are never processed in isolation in that case.
fn parse_children(handle: &Handle) -> Vec<ContentNode> {
    if has_mixed_inline(handle) {
        return parse_flow(handle);
    }

    let mut nodes = Vec::new();
    for child in handle.children.borrow().iter() {
        nodes.extend(parse_node(child));
    }
    nodes
}

/// Parse one DOM node into zero or more block nodes.
///
/// Unknown tags recurse into their children and splice the results into
/// the parent position without emitting a wrapper. `pre` and `code`
/// capture their inner text without recursing, so nothing under them is
/// ever pattern-scanned.
fn parse_node(handle: &Handle) -> Vec<ContentNode> {
    match &handle.data {
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            if text.trim().is_empty() {
                Vec::new()
            } else {
                scan_block_text(&text, &ScanOptions::default())
            }
        }
        NodeData::Element { name, .. } => {
            if is_attribution(handle) {
                return attribution_node(handle);
            }
            match name.local.as_ref() {
                "p" => parse_flow(handle),
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    let level = name.local.as_bytes()[1] - b'0';
                    vec![ContentNode::Heading {
                        level,
                        text: inner_text(handle).trim().to_string(),
                    }]
                }
                "ul" => vec![parse_list(handle, false)],
                "ol" => vec![parse_list(handle, true)],
                "pre" => vec![ContentNode::CodeBlock(inner_text(handle))],
                "code" => vec![ContentNode::InlineCode(inner_text(handle))],
                "br" => vec![ContentNode::LineBreak],
                "div" => vec![ContentNode::Div(parse_children(handle))],
                "a" => anchor_node(handle),
                "img" => image_node(handle),
                "script" | "style" => Vec::new(),
                _ => parse_children(handle),
            }
        }
        _ => Vec::new(),
    }
}

/// Parse inline-level children (paragraph content or a mixed container)
/// into block nodes by rebuilding one combined text with Markdown-style
/// markers for anchors and images, then re-scanning it.
///
/// `br` and `code` children close the open flow and land as their own
/// nodes; the layout stage groups the pieces back into a single flow.
fn parse_flow(handle: &Handle) -> Vec<ContentNode> {
    let opts = ScanOptions::default();
    let mut nodes = Vec::new();
    let mut buf = String::new();

    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                if !text.trim().is_empty() {
                    buf.push_str(&text);
                }
            }
            NodeData::Element { name, .. } => match name.local.as_ref() {
                "a" => push_anchor_marker(child, &mut buf),
                "img" => push_image_marker(child, &mut buf),
                "br" => {
                    flush_flow(&mut nodes, &mut buf, &opts);
                    nodes.push(ContentNode::LineBreak);
                }
                "code" => {
                    flush_flow(&mut nodes, &mut buf, &opts);
                    nodes.push(ContentNode::InlineCode(inner_text(child)));
                }
                "pre" => {
                    flush_flow(&mut nodes, &mut buf, &opts);
                    nodes.push(ContentNode::CodeBlock(inner_text(child)));
                }
                "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" | "div" => {
                    flush_flow(&mut nodes, &mut buf, &opts);
                    nodes.extend(parse_node(child));
                }
                "script" | "style" => {}
                _ => flow_fragment(child, &mut buf),
            },
            _ => {}
        }
    }

    flush_flow(&mut nodes, &mut buf, &opts);
    nodes
}

fn flush_flow(nodes: &mut Vec<ContentNode>, buf: &mut String, opts: &ScanOptions) {
    if !buf.trim().is_empty() {
        nodes.extend(scan_block_text(buf, opts));
    }
    buf.clear();
}

/// Rebuild the flow text of a nested element: text verbatim, anchors and
/// images as Markdown markers, whitespace-only text nodes dropped.
fn flow_fragment(handle: &Handle, buf: &mut String) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                if !text.trim().is_empty() {
                    buf.push_str(&text);
                }
            }
            NodeData::Element { name, .. } => match name.local.as_ref() {
                "a" => push_anchor_marker(child, buf),
                "img" => push_image_marker(child, buf),
                "br" => buf.push('\n'),
                "script" | "style" => {}
                _ => flow_fragment(child, buf),
            },
            _ => {}
        }
    }
}

fn push_anchor_marker(handle: &Handle, buf: &mut String) {
    let text = inner_text(handle);
    match attr_value(handle, "href") {
        Some(href) => {
            let display = if text.trim().is_empty() { &href } else { &text };
            buf.push_str(&format!("[{display}]({href})"));
        }
        None => buf.push_str(&text),
    }
    // Flattening to text would lose linked thumbnails; keep their markers
    push_descendant_images(handle, buf);
}

/// Append an image marker for every `img` descendant, document order.
fn push_descendant_images(handle: &Handle, buf: &mut String) {
    for child in handle.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if name.local.as_ref() == "img" {
                push_image_marker(child, buf);
                continue;
            }
        }
        push_descendant_images(child, buf);
    }
}

fn push_image_marker(handle: &Handle, buf: &mut String) {
    if let Some(src) = attr_value(handle, "src") {
        let alt = attr_value(handle, "alt").unwrap_or_default();
        buf.push_str(&format!("![{alt}]({src})"));
    }
}

/// Standalone anchor in block position. Image descendants ride along as
/// inline siblings of the link.
fn anchor_node(handle: &Handle) -> Vec<ContentNode> {
    let text = inner_text(handle);
    let mut inline = Vec::new();
    match attr_value(handle, "href") {
        Some(href) => {
            let display_text = if text.trim().is_empty() {
                href.clone()
            } else {
                text
            };
            inline.push(InlineNode::Link {
                url: href,
                display_text,
            });
        }
        None => {
            if !text.trim().is_empty() {
                inline.push(InlineNode::PlainText(text));
            }
        }
    }
    collect_image_refs(handle, &mut inline);
    if inline.is_empty() {
        Vec::new()
    } else {
        vec![ContentNode::Paragraph(inline)]
    }
}

fn collect_image_refs(handle: &Handle, out: &mut Vec<InlineNode>) {
    for child in handle.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if name.local.as_ref() == "img" {
                if let Some(src) = attr_value(child, "src") {
                    out.push(InlineNode::ImageRef {
                        url: src,
                        alt_text: attr_value(child, "alt").unwrap_or_default(),
                    });
                }
                continue;
            }
        }
        collect_image_refs(child, out);
    }
}

/// Standalone image in block position
fn image_node(handle: &Handle) -> Vec<ContentNode> {
    match attr_value(handle, "src") {
        Some(src) => vec![ContentNode::Paragraph(vec![InlineNode::ImageRef {
            url: src,
            alt_text: attr_value(handle, "alt").unwrap_or_default(),
        }])],
        None => Vec::new(),
    }
}

/// Source-credit containers keep their full inner text as one opaque run
/// so punctuation adjacency like "(Source)" survives.
fn attribution_node(handle: &Handle) -> Vec<ContentNode> {
    let mut run = String::new();
    flow_fragment(handle, &mut run);
    if run.trim().is_empty() {
        return Vec::new();
    }
    let inline = scan_inline(&run, &ScanOptions::default());
    if inline.is_empty() {
        Vec::new()
    } else {
        vec![ContentNode::Paragraph(inline)]
    }
}

fn parse_list(handle: &Handle, ordered: bool) -> ContentNode {
    let mut items = Vec::new();
    for child in handle.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if name.local.as_ref() == "li" {
                items.push(parse_children(child));
            }
        }
    }
    ContentNode::ListBlock { ordered, items }
}

fn has_mixed_inline(handle: &Handle) -> bool {
    let children = handle.children.borrow();
    let has_text = children.iter().any(|c| match &c.data {
        NodeData::Text { contents } => !contents.borrow().trim().is_empty(),
        _ => false,
    });
    let has_anchor = children.iter().any(|c| match &c.data {
        NodeData::Element { name, .. } => name.local.as_ref() == "a",
        _ => false,
    });
    has_text && has_anchor
}

fn attr_value(handle: &Handle, attr_name: &str) -> Option<String> {
    if let NodeData::Element { attrs, .. } = &handle.data {
        for attr in attrs.borrow().iter() {
            if attr.name.local.as_ref() == attr_name {
                return Some(attr.value.to_string());
            }
        }
    }
    None
}

fn is_attribution(handle: &Handle) -> bool {
    attr_value(handle, "class").is_some_and(|class| class.contains(ATTRIBUTION_MARKER))
}

/// Concatenated descendant text, verbatim
fn inner_text(handle: &Handle) -> String {
    let mut out = String::new();
    collect_text(handle, &mut out);
    out
}

fn collect_text(handle: &Handle, out: &mut String) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => out.push_str(&contents.borrow()),
            NodeData::Element { .. } => collect_text(child, out),
            _ => {}
        }
    }
}

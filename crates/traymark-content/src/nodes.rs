//! Content node types

/// Block-level content nodes produced by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    /// Plain text in block position
    Text(String),
    /// Heading with level (1-6) and flattened text
    Heading { level: u8, text: String },
    /// Paragraph with inline content
    Paragraph(Vec<InlineNode>),
    /// Ordered or unordered list; each item is its own block sequence
    ListBlock {
        ordered: bool,
        items: Vec<Vec<ContentNode>>,
    },
    /// Preformatted block, monospace, never reflowed
    CodeBlock(String),
    /// Code span outside `pre`
    InlineCode(String),
    /// Hard line break
    LineBreak,
    /// Generic container
    Div(Vec<ContentNode>),
}

/// Inline content flowing left-to-right within a paragraph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineNode {
    /// Plain text run, whitespace preserved verbatim
    PlainText(String),
    /// Hyperlink with display text
    Link { url: String, display_text: String },
    /// Bold span
    Bold(String),
    /// Italic span
    Italic(String),
    /// Image reference; fetching happens elsewhere
    ImageRef { url: String, alt_text: String },
}

impl ContentNode {
    /// Walk this node and its descendants, calling `visit` on every inline node.
    pub fn visit_inline<F: FnMut(&InlineNode)>(&self, visit: &mut F) {
        match self {
            ContentNode::Paragraph(children) => {
                for inline in children {
                    visit(inline);
                }
            }
            ContentNode::ListBlock { items, .. } => {
                for item in items {
                    for node in item {
                        node.visit_inline(visit);
                    }
                }
            }
            ContentNode::Div(children) => {
                for node in children {
                    node.visit_inline(visit);
                }
            }
            _ => {}
        }
    }
}

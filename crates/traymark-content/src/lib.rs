//! Content parsing and inline layout for Traymark popup views
//!
//! Item descriptions arrive from the list service as a hybrid of HTML
//! fragments and literal Markdown syntax. This crate parses them into a
//! typed node sequence and flows that sequence into width-constrained
//! lines a presentation layer can map onto widgets. Image bytes are not
//! fetched here; see the prefetch crate.

pub mod inline;
pub mod layout;
pub mod nodes;
pub mod parser;

pub use inline::{scan_block_text, scan_inline, ScanOptions};
pub use layout::{assemble, LayoutOptions, LineKind, RenderLine, TextRun};
pub use nodes::{ContentNode, InlineNode};
pub use parser::parse_content;

/// Parse one raw content string and flow it into display lines.
pub fn render(raw: &str, opts: &LayoutOptions) -> Vec<RenderLine> {
    let nodes = parser::parse_content(raw);
    layout::assemble(&nodes, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_end_to_end() {
        let lines = render("<h1>Hi</h1><p>body text</p>", &LayoutOptions::default());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, LineKind::Heading(1));
        assert_eq!(lines[1].kind, LineKind::Text);
    }
}

#![forbid(unsafe_code)]

//! AST-aligned chunking.
//!
//! Top-level syntax nodes are packed greedily into chunks of at most
//! `max_chunk_size` bytes, counting the gaps between nodes so comments and
//! blank lines stay with the code around them. A node is never split: a single
//! top-level construct larger than the budget becomes one oversized chunk.

use tree_sitter::Tree;

use crate::types::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chunk_size: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Chunker {
    pub const fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    pub const fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn chunk(&self, file_id: &str, source: &str, tree: &Tree) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        if source.trim().is_empty() {
            return chunks;
        }

        if source.len() <= self.max_chunk_size {
            push_trimmed(&mut chunks, file_id, source, 0, source.len());
            return chunks;
        }

        let root = tree.root_node();
        // (start, end, accumulated size) of the chunk being built
        let mut current: Option<(usize, usize, usize)> = None;

        for child in root.children(&mut root.walk()) {
            let start = child.start_byte();
            let end = child.end_byte();
            let len = end.saturating_sub(start);

            current = match current {
                None => Some((start, end, len)),
                Some((chunk_start, chunk_end, size)) => {
                    let gap = start.saturating_sub(chunk_end);
                    if size + gap + len > self.max_chunk_size {
                        push_trimmed(&mut chunks, file_id, source, chunk_start, chunk_end);
                        Some((start, end, len))
                    } else {
                        Some((chunk_start, end.max(chunk_end), size + gap + len))
                    }
                }
            };
        }

        if let Some((chunk_start, chunk_end, _)) = current {
            push_trimmed(&mut chunks, file_id, source, chunk_start, chunk_end);
        }

        chunks
    }
}

fn push_trimmed(chunks: &mut Vec<Chunk>, file_id: &str, source: &str, start: usize, end: usize) {
    let Some(raw) = source.get(start..end) else {
        return;
    };
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    let leading = raw.len() - raw.trim_start().len();
    let start_byte = start + leading;

    chunks.push(Chunk {
        file_id: file_id.to_string(),
        index: chunks.len(),
        text: text.to_string(),
        start_byte,
        end_byte: start_byte + text.len(),
    });
}

/// Single chunk holding the whole, untrimmed content. Used when no grammar
/// applies. Blank content has no chunks, same as [`Chunker::chunk`].
pub fn whole_file_chunk(file_id: &str, source: &str) -> Option<Chunk> {
    (!source.trim().is_empty()).then(|| Chunk {
        file_id: file_id.to_string(),
        index: 0,
        text: source.to_string(),
        start_byte: 0,
        end_byte: source.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_js(source: &str) -> Tree {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter::Language::new(tree_sitter_javascript::LANGUAGE))
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    fn function_of_size(name: &str, body_lines: usize) -> String {
        let mut out = format!("function {name}() {{\n");
        for i in 0..body_lines {
            out.push_str(&format!("  const v{i} = {i};\n"));
        }
        out.push_str("}\n");
        out
    }

    #[test]
    fn test_small_file_is_single_chunk() {
        let source: String = (0..50).map(|i| format!("let x{i} = {i};\n")).collect();
        let tree = parse_js(&source);
        let chunks = Chunker::new(2000).chunk("a.js", &source, &tree);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, source.trim());
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_source_has_no_chunks() {
        let tree = parse_js("  \n\n");
        assert!(Chunker::default().chunk("a.js", "  \n\n", &tree).is_empty());
    }

    #[test]
    fn test_splits_before_function_that_overflows() {
        let f1 = function_of_size("one", 4);
        let f2 = function_of_size("two", 4);
        let f3 = function_of_size("three", 4);
        let source = format!("{f1}\n{f2}\n{f3}");
        let limit = f1.len() + f2.len() + 4;
        assert!(source.len() > limit);

        let tree = parse_js(&source);
        let chunks = Chunker::new(limit).chunk("a.js", &source, &tree);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("function one"));
        assert!(chunks[0].text.contains("function two"));
        assert!(chunks[1].text.starts_with("function three"));
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_oversized_node_stays_whole() {
        let big = function_of_size("big", 40);
        let small = function_of_size("small", 1);
        let source = format!("{small}\n{big}");
        let tree = parse_js(&source);
        let chunks = Chunker::new(100).chunk("a.js", &source, &tree);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, big.trim());
        assert!(chunks[1].text.len() > 100);
    }

    #[test]
    fn test_gaps_keep_comments() {
        let f1 = function_of_size("one", 2);
        let f2 = function_of_size("two", 2);
        let source = format!("{f1}// about two\n{f2}");
        let tree = parse_js(&source);
        let chunks = Chunker::new(source.len() - 1).chunk("a.js", &source, &tree);

        let joined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.concat().contains("// about two"));
    }

    #[test]
    fn test_spans_point_at_chunk_text() {
        let source = format!(
            "{}\n\n{}",
            function_of_size("one", 3),
            function_of_size("two", 3)
        );
        let tree = parse_js(&source);
        for chunk in Chunker::new(40).chunk("a.js", &source, &tree) {
            assert_eq!(&source[chunk.start_byte..chunk.end_byte], chunk.text);
        }
    }
}

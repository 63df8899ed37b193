#![forbid(unsafe_code)]

use std::io;

use serde::Serialize;

use crate::retrieval::Retrieval;
use crate::types::{ContextFormat, Diagnostic, FileMatches, IssueContext};

#[derive(Serialize)]
struct ContextDocument<'a> {
    query: &'a str,
    files: &'a [FileMatches],
    #[serde(skip_serializing_if = "Option::is_none")]
    issue: Option<&'a IssueContext>,
    diagnostics: &'a [Diagnostic],
}

/// Renders retrieved code as prompt material for a chat model.
pub fn build_context(
    retrieval: &Retrieval,
    query: &str,
    issue: Option<&IssueContext>,
    format: ContextFormat,
) -> io::Result<String> {
    match format {
        ContextFormat::Markdown => Ok(format_context_markdown(retrieval, query, issue)),
        ContextFormat::Json => {
            let document = ContextDocument {
                query,
                files: &retrieval.files,
                issue,
                diagnostics: &retrieval.diagnostics,
            };
            serde_json::to_string_pretty(&document)
                .map_err(|e| io::Error::other(format!("Failed to serialize context: {e}")))
        }
    }
}

fn format_context_markdown(retrieval: &Retrieval, query: &str, issue: Option<&IssueContext>) -> String {
    let mut lines = Vec::new();
    lines.push("## Code Context".to_string());
    lines.push(String::new());
    if !query.trim().is_empty() {
        lines.push(format!("**Query:** {}", query.trim()));
        lines.push(String::new());
    }

    if retrieval.is_empty() {
        lines.push("No relevant code context found.".to_string());
        lines.push(String::new());
    }

    for file in &retrieval.files {
        lines.push(format!("### File: `{}`", file.file_id));
        lines.push(String::new());
        for found in &file.matches {
            lines.push(format!(
                "_chunk {} via {} ({:.2})_",
                found.chunk_index,
                found.method.as_str(),
                found.similarity
            ));
            lines.push(format!("```{}", found.language));
            lines.push(found.text.clone());
            lines.push("```".to_string());
            lines.push(String::new());
        }
    }

    if let Some(issue) = issue {
        lines.push("### Current Issue".to_string());
        lines.push(String::new());
        lines.push(format!("**{}**", issue.title));
        if !issue.body.trim().is_empty() {
            lines.push(String::new());
            lines.push(issue.body.trim().to_string());
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

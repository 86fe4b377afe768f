//! Query intent classification.
//!
//! A pure scoring function over the query text and the request's known
//! document names. The score feeds the routing decision table and the
//! strategy prompts; it never executes anything itself. Scoring is
//! additive and fully deterministic so routing stays reproducible across
//! runs, and the final confidence is clamped to [0, 1].

use once_cell::sync::Lazy;
use regex::Regex;
use switchboard_core::{DocumentRef, Intent, IntentClassification, IntentContext, SuggestedTool};

/// Words that signal the user is talking about uploaded material.
const DOC_KEYWORDS: [&str; 13] = [
    "document",
    "documents",
    "doc",
    "docs",
    "file",
    "files",
    "pdf",
    "pdfs",
    "upload",
    "uploads",
    "uploaded",
    "attachment",
    "attachments",
];

static QUESTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bwhat\s+(does|do|can|is|are|was|were|did)\b",
        r"(?i)\btell\s+me\s+about\b",
        r"(?i)\b(search|find|look\s+up)\b",
        r"(?i)\b(analyze|analyse|summarize|summarise|explain)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static question pattern"))
    .collect()
});

static SEARCH_MY_DOCUMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsearch\s+my\s+(documents|files|docs|uploads)\b")
        .expect("static search-my-documents pattern")
});

static MEMORY_STORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(remember|store|save)\b").expect("static memory-store pattern"));

static MEMORY_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwhat\s+did\b|\btold\b").expect("static memory-query pattern")
});

/// Classify one query against the request's known documents.
pub fn classify_query(query: &str, documents: &[DocumentRef]) -> IntentClassification {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return IntentClassification::unknown();
    }
    let lowered = trimmed.to_lowercase();
    let words = word_set(&lowered);

    let mut score: f32 = 0.0;
    let mut keywords: Vec<String> = Vec::new();

    for keyword in DOC_KEYWORDS {
        if words.iter().any(|w| w == keyword) {
            keywords.push(keyword.to_string());
        }
    }
    let has_doc_keyword = !keywords.is_empty();
    if has_doc_keyword {
        score += 0.5;
    }

    let question_matched = QUESTION_PATTERNS.iter().any(|p| p.is_match(trimmed));
    if question_matched {
        score += 0.3;
    }

    let document_name = match_document_name(&lowered, &words, documents);
    if let Some((_, bonus)) = &document_name {
        score += bonus;
    }

    if !documents.is_empty() {
        score += 0.2;
    }

    if has_doc_keyword && (words.iter().any(|w| w == "about") || lowered.contains("tell me")) {
        score += 0.2;
    }

    if SEARCH_MY_DOCUMENTS.is_match(trimmed) {
        score += 0.3;
    }

    let confidence = score.clamp(0.0, 1.0);
    let context = IntentContext {
        document_name: document_name.map(|(name, _)| name),
        is_question: question_matched || trimmed.ends_with('?'),
        keywords,
    };

    let (intent, suggested_tool) = if confidence >= 0.5 {
        (Intent::Document, Some(SuggestedTool::SearchDocuments))
    } else if confidence >= 0.3 {
        (Intent::Hybrid, Some(SuggestedTool::SearchDocuments))
    } else if MEMORY_STORE.is_match(trimmed) {
        (Intent::Memory, Some(SuggestedTool::StoreMemory))
    } else if MEMORY_QUERY.is_match(trimmed) {
        (Intent::Memory, Some(SuggestedTool::QueryMemory))
    } else if trimmed.starts_with('/') || words.iter().any(|w| w == "command" || w == "commands") {
        (Intent::Command, Some(SuggestedTool::ExecuteCommand))
    } else {
        (Intent::Web, Some(SuggestedTool::WebSearch))
    };

    IntentClassification {
        intent,
        confidence,
        suggested_tool,
        context,
    }
}

/// Lowercased alphanumeric words of the query.
fn word_set(lowered: &str) -> Vec<String> {
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Known filename detection: the full name is worth 0.3; enough of its
/// significant stem words (two, or one for short names) is worth 0.2.
fn match_document_name(
    lowered: &str,
    words: &[String],
    documents: &[DocumentRef],
) -> Option<(String, f32)> {
    for doc in documents {
        let file_name = doc.file_name.to_lowercase();
        if !file_name.is_empty() && lowered.contains(&file_name) {
            return Some((doc.file_name.clone(), 0.3));
        }

        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&file_name);
        let significant: Vec<&str> = stem
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 3)
            .collect();
        if significant.is_empty() {
            continue;
        }
        let hits = significant
            .iter()
            .filter(|w| words.iter().any(|q| q == *w))
            .count();
        let needed = if significant.len() == 1 { 1 } else { 2 };
        if hits >= needed {
            return Some((doc.file_name.clone(), 0.2));
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

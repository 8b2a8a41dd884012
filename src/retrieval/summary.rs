//! Human-readable overview of an agent's knowledge base

use crate::storage::Document;

/// Summarize documents grouped by file type
///
/// Groups appear in the order their type is first seen; titles keep input
/// order. Returns an empty string for an empty slice.
pub fn format_summary(documents: &[Document]) -> String {
    if documents.is_empty() {
        return String::new();
    }

    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for doc in documents {
        match groups.iter_mut().find(|(file_type, _)| *file_type == doc.file_type) {
            Some((_, titles)) => titles.push(&doc.title),
            None => groups.push((doc.file_type.as_str(), vec![doc.title.as_str()])),
        }
    }

    let parts: Vec<String> = groups
        .iter()
        .map(|(file_type, titles)| {
            format!(
                "{} files ({}): {}",
                file_type.to_uppercase(),
                titles.len(),
                titles.join(", ")
            )
        })
        .collect();

    format!(
        "Knowledge base contains {} documents: {}",
        documents.len(),
        parts.join(" | ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, file_type: &str) -> Document {
        Document {
            id: title.to_string(),
            title: title.to_string(),
            file_type: file_type.to_string(),
            upload_date: None,
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(format_summary(&[]), "");
    }

    #[test]
    fn test_grouping() {
        let docs = vec![
            doc("Returns", "pdf"),
            doc("FAQ", "markdown"),
            doc("Warranty", "pdf"),
        ];
        assert_eq!(
            format_summary(&docs),
            "Knowledge base contains 3 documents: PDF files (2): Returns, Warranty | MARKDOWN files (1): FAQ"
        );
    }

    #[test]
    fn test_single_document() {
        assert_eq!(
            format_summary(&[doc("Notes", "text")]),
            "Knowledge base contains 1 documents: TEXT files (1): Notes"
        );
    }
}

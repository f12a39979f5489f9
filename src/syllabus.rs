use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ChapterEntry {
    pub number: i64,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct TopicEntry {
    pub chapter_id: String,
    pub number: i64,
    pub title: String,
}

/// Read-only lookup table for one subject's syllabus, keyed by the opaque
/// chapter/topic ids slots carry. Built from the externally maintained index;
/// this module never writes it.
#[derive(Debug, Clone, Default)]
pub struct SubjectIndex {
    pub chapters: HashMap<String, ChapterEntry>,
    pub topics: HashMap<String, TopicEntry>,
}

/// Display state for a slot's syllabus reference. `NotAssigned` (no reference)
/// and `NotLoaded` (reference present, index not loaded yet) are distinct
/// states callers must not conflate; `Unresolved` means the loaded index has
/// no such entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentLabel {
    NotAssigned,
    NotLoaded,
    Unresolved,
    Resolved(String),
}

impl ContentLabel {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ContentLabel::NotAssigned => json!({ "state": "not_assigned" }),
            ContentLabel::NotLoaded => json!({ "state": "not_loaded" }),
            ContentLabel::Unresolved => json!({ "state": "unresolved" }),
            ContentLabel::Resolved(label) => json!({ "state": "resolved", "label": label }),
        }
    }
}

pub fn resolve(
    chapter_id: Option<&str>,
    topic_id: Option<&str>,
    index: Option<&SubjectIndex>,
) -> ContentLabel {
    let Some(chapter_id) = chapter_id else {
        return ContentLabel::NotAssigned;
    };
    let Some(index) = index else {
        return ContentLabel::NotLoaded;
    };
    let Some(chapter) = index.chapters.get(chapter_id) else {
        return ContentLabel::Unresolved;
    };
    let mut label = format!("Ch {}: {}", chapter.number, chapter.title);
    if let Some(topic_id) = topic_id {
        let Some(topic) = index.topics.get(topic_id) else {
            return ContentLabel::Unresolved;
        };
        if topic.chapter_id != chapter_id {
            return ContentLabel::Unresolved;
        }
        label.push_str(&format!(" · {}.{} {}", chapter.number, topic.number, topic.title));
    }
    ContentLabel::Resolved(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> SubjectIndex {
        let mut index = SubjectIndex::default();
        index.chapters.insert(
            "ch-3".to_string(),
            ChapterEntry {
                number: 3,
                title: "Algebra".to_string(),
            },
        );
        index.topics.insert(
            "tp-2".to_string(),
            TopicEntry {
                chapter_id: "ch-3".to_string(),
                number: 2,
                title: "Quadratics".to_string(),
            },
        );
        index
    }

    #[test]
    fn no_reference_is_not_assigned() {
        assert_eq!(
            resolve(None, None, Some(&sample_index())),
            ContentLabel::NotAssigned
        );
        // A topic without a chapter still counts as unassigned.
        assert_eq!(resolve(None, Some("tp-2"), None), ContentLabel::NotAssigned);
    }

    #[test]
    fn reference_without_loaded_index_is_not_loaded() {
        assert_eq!(resolve(Some("ch-3"), None, None), ContentLabel::NotLoaded);
    }

    #[test]
    fn loaded_index_resolves_chapter_and_topic() {
        let index = sample_index();
        assert_eq!(
            resolve(Some("ch-3"), None, Some(&index)),
            ContentLabel::Resolved("Ch 3: Algebra".to_string())
        );
        assert_eq!(
            resolve(Some("ch-3"), Some("tp-2"), Some(&index)),
            ContentLabel::Resolved("Ch 3: Algebra · 3.2 Quadratics".to_string())
        );
    }

    #[test]
    fn unknown_refs_in_a_loaded_index_are_unresolved() {
        let index = sample_index();
        assert_eq!(
            resolve(Some("ch-9"), None, Some(&index)),
            ContentLabel::Unresolved
        );
        assert_eq!(
            resolve(Some("ch-3"), Some("tp-9"), Some(&index)),
            ContentLabel::Unresolved
        );
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, SlotContent};
use crate::syllabus::{resolve, ChapterEntry, SubjectIndex, TopicEntry};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn db(code: &'static str, e: impl ToString) -> Self {
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Replaces one subject's chapter/topic index wholesale and marks the subject
/// loaded. The syllabus collaborator owns the content; this store copy is a
/// read-only lookup table for display resolution.
fn index_load(conn: &Connection, params: &JsonValue) -> Result<serde_json::Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    let Some(chapters) = params.get("chapters").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing chapters"));
    };

    struct ChapterRow {
        id: String,
        number: i64,
        title: String,
        topics: Vec<(String, i64, String)>,
    }

    let mut rows: Vec<ChapterRow> = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let number = chapter
            .get("number")
            .and_then(|v| v.as_i64())
            .filter(|v| *v >= 1)
            .ok_or_else(|| HandlerErr::bad_params("chapter.number must be an integer >= 1"))?;
        let title = get_required_str(chapter, "title")
            .map_err(|_| HandlerErr::bad_params("chapter.title is required"))?;
        let id = chapter
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut topics = Vec::new();
        if let Some(arr) = chapter.get("topics").and_then(|v| v.as_array()) {
            for topic in arr {
                let t_number = topic
                    .get("number")
                    .and_then(|v| v.as_i64())
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| {
                        HandlerErr::bad_params("topic.number must be an integer >= 1")
                    })?;
                let t_title = get_required_str(topic, "title")
                    .map_err(|_| HandlerErr::bad_params("topic.title is required"))?;
                let t_id = topic
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                topics.push((t_id, t_number, t_title));
            }
        }
        rows.push(ChapterRow {
            id,
            number,
            title,
            topics,
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM syllabus_topics
         WHERE chapter_id IN (SELECT id FROM syllabus_chapters WHERE subject = ?)",
        [&subject],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM syllabus_chapters WHERE subject = ?", [&subject])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;

    let mut chapter_count = 0usize;
    let mut topic_count = 0usize;
    for row in &rows {
        tx.execute(
            "INSERT INTO syllabus_chapters(id, subject, chapter_number, title)
             VALUES(?, ?, ?, ?)",
            params![row.id, subject, row.number, row.title],
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        chapter_count += 1;
        for (t_id, t_number, t_title) in &row.topics {
            tx.execute(
                "INSERT INTO syllabus_topics(id, chapter_id, topic_number, title)
                 VALUES(?, ?, ?, ?)",
                params![t_id, row.id, t_number, t_title],
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
            topic_count += 1;
        }
    }
    tx.execute(
        "INSERT INTO syllabus_subjects_loaded(subject, loaded_at) VALUES(?, ?)
         ON CONFLICT(subject) DO UPDATE SET loaded_at = excluded.loaded_at",
        params![subject, store::now_ts()],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "chapters": chapter_count, "topics": topic_count }))
}

fn subject_loaded(conn: &Connection, subject: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM syllabus_subjects_loaded WHERE subject = ?",
        [subject],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn load_subject_index(conn: &Connection, subject: &str) -> Result<SubjectIndex, HandlerErr> {
    let mut index = SubjectIndex::default();
    let mut stmt = conn
        .prepare("SELECT id, chapter_number, title FROM syllabus_chapters WHERE subject = ?")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let chapters = stmt
        .query_map([subject], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    for (id, number, title) in chapters {
        index.chapters.insert(id, ChapterEntry { number, title });
    }

    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.chapter_id, t.topic_number, t.title
             FROM syllabus_topics t
             JOIN syllabus_chapters c ON c.id = t.chapter_id
             WHERE c.subject = ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let topics = stmt
        .query_map([subject], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    for (id, chapter_id, number, title) in topics {
        index.topics.insert(
            id,
            TopicEntry {
                chapter_id,
                number,
                title,
            },
        );
    }
    Ok(index)
}

/// Decorates a day's slots with display-ready syllabus labels. The tri-state
/// (not assigned / not loaded / resolved) is part of the contract: the
/// dashboard renders each differently and must be able to tell them apart.
fn resolve_day(conn: &Connection, params: &JsonValue) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    let exists = store::class_exists(conn, &class_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let day = store::query_day(conn, &class_id, &date)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut indexes: HashMap<String, Option<SubjectIndex>> = HashMap::new();
    let mut slots = Vec::with_capacity(day.len());
    for slot in &day {
        let mut row = json!({
            "id": slot.id,
            "periodNumber": slot.period_number,
            "kind": slot.kind(),
            "start": slot.start_time,
            "end": slot.end_time,
        });
        let content = match &slot.content {
            SlotContent::Period {
                subject,
                chapter_id,
                topic_id,
                ..
            } => {
                row["subject"] = json!(subject);
                if !indexes.contains_key(subject) {
                    let loaded = subject_loaded(conn, subject)?;
                    let index = if loaded {
                        Some(load_subject_index(conn, subject)?)
                    } else {
                        None
                    };
                    indexes.insert(subject.clone(), index);
                }
                resolve(
                    chapter_id.as_deref(),
                    topic_id.as_deref(),
                    indexes.get(subject).and_then(|i| i.as_ref()),
                )
            }
            SlotContent::Break { name } => {
                row["name"] = json!(name);
                resolve(None, None, None)
            }
        };
        row["content"] = content.to_json();
        slots.push(row);
    }

    Ok(json!({ "date": date, "slots": slots }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &JsonValue) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "syllabus.indexLoad" => Some(with_conn(state, req, index_load)),
        "syllabus.resolveDay" => Some(with_conn(state, req, resolve_day)),
        _ => None,
    }
}

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DB_FILE: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    // The scope-key UNIQUE constraint is the one invariant the store itself
    // enforces; interval disjointness is checked client-side only.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            slot_date TEXT NOT NULL,
            period_number INTEGER NOT NULL,
            kind TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            subject TEXT,
            teacher TEXT,
            chapter_id TEXT,
            topic_id TEXT,
            notes TEXT,
            break_name TEXT,
            status TEXT NOT NULL DEFAULT 'planned',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(class_id, slot_date, period_number),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_day ON time_slots(class_id, slot_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS syllabus_chapters(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            chapter_number INTEGER NOT NULL,
            title TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_syllabus_chapters_subject ON syllabus_chapters(subject)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS syllabus_topics(
            id TEXT PRIMARY KEY,
            chapter_id TEXT NOT NULL,
            topic_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            FOREIGN KEY(chapter_id) REFERENCES syllabus_chapters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_syllabus_topics_chapter ON syllabus_topics(chapter_id)",
        [],
    )?;
    // A row here marks the subject's index as fully loaded; a dangling
    // chapter/topic ref on a slot is "not loaded" until then.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS syllabus_subjects_loaded(
            subject TEXT PRIMARY KEY,
            loaded_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before slot statuses existed lack the column.
    ensure_time_slots_status(&conn)?;

    Ok(conn)
}

fn ensure_time_slots_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "time_slots", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE time_slots ADD COLUMN status TEXT NOT NULL DEFAULT 'planned'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, value.to_string()],
    )?;
    Ok(())
}

pub fn class_exists(conn: &Connection, class_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

/// Kind-conditional slot payload. Periods carry teaching content, breaks only
/// a display name.
#[derive(Debug, Clone)]
pub enum SlotContent {
    Period {
        subject: String,
        teacher: String,
        chapter_id: Option<String>,
        topic_id: Option<String>,
        notes: Option<String>,
    },
    Break {
        name: String,
    },
}

#[derive(Debug, Clone)]
pub struct SlotRecord {
    pub id: String,
    pub period_number: i64,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub content: SlotContent,
}

impl SlotRecord {
    pub fn kind(&self) -> &'static str {
        match self.content {
            SlotContent::Period { .. } => crate::schedule::SLOT_KIND_PERIOD,
            SlotContent::Break { .. } => crate::schedule::SLOT_KIND_BREAK,
        }
    }
}

// The single insert-or-overwrite statement every mutation path shares. An
// overwritten period number keeps its store-assigned row id; the incoming id
// is only used for fresh inserts.
fn write_slot(
    conn: &Connection,
    class_id: &str,
    date: &str,
    slot: &SlotRecord,
    ts: &str,
) -> rusqlite::Result<()> {
    let (subject, teacher, chapter_id, topic_id, notes, break_name) = match &slot.content {
        SlotContent::Period {
            subject,
            teacher,
            chapter_id,
            topic_id,
            notes,
        } => (
            Some(subject.as_str()),
            Some(teacher.as_str()),
            chapter_id.as_deref(),
            topic_id.as_deref(),
            notes.as_deref(),
            None,
        ),
        SlotContent::Break { name } => (None, None, None, None, None, Some(name.as_str())),
    };
    conn.execute(
        "INSERT INTO time_slots(
            id, class_id, slot_date, period_number, kind, start_time, end_time,
            subject, teacher, chapter_id, topic_id, notes, break_name, status,
            created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, slot_date, period_number) DO UPDATE SET
           kind = excluded.kind,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           subject = excluded.subject,
           teacher = excluded.teacher,
           chapter_id = excluded.chapter_id,
           topic_id = excluded.topic_id,
           notes = excluded.notes,
           break_name = excluded.break_name,
           status = excluded.status,
           updated_at = excluded.updated_at",
        params![
            slot.id,
            class_id,
            date,
            slot.period_number,
            slot.kind(),
            slot.start_time,
            slot.end_time,
            subject,
            teacher,
            chapter_id,
            topic_id,
            notes,
            break_name,
            slot.status,
            ts,
            ts
        ],
    )?;
    Ok(())
}

/// Upserts the given slots by their (class, date, period number) scope key in
/// one transaction; a store failure leaves the prior day intact.
pub fn upsert_slots(
    conn: &Connection,
    class_id: &str,
    date: &str,
    slots: &[SlotRecord],
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let ts = now_ts();
    for slot in slots {
        write_slot(&tx, class_id, date, slot, &ts)?;
    }
    tx.commit()?;
    Ok(slots.len())
}

/// Clears the whole day then writes the given slots, atomically. Used by the
/// replace copy policy; a failure after the delete rolls the delete back too.
pub fn replace_day(
    conn: &Connection,
    class_id: &str,
    date: &str,
    slots: &[SlotRecord],
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM time_slots WHERE class_id = ? AND slot_date = ?",
        params![class_id, date],
    )?;
    let ts = now_ts();
    for slot in slots {
        write_slot(&tx, class_id, date, slot, &ts)?;
    }
    tx.commit()?;
    Ok(slots.len())
}

pub fn delete_slot(conn: &Connection, class_id: &str, slot_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM time_slots WHERE class_id = ? AND id = ?",
        params![class_id, slot_id],
    )
}

/// The ScheduleDay projection: the day's slots ordered by start time, then
/// period number. The read path trusts store state and performs no validation.
pub fn query_day(conn: &Connection, class_id: &str, date: &str) -> rusqlite::Result<Vec<SlotRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, period_number, kind, start_time, end_time,
                subject, teacher, chapter_id, topic_id, notes, break_name, status
         FROM time_slots
         WHERE class_id = ? AND slot_date = ?
         ORDER BY start_time, period_number",
    )?;
    let rows = stmt.query_map(params![class_id, date], |r| {
        let kind: String = r.get(2)?;
        let content = if kind == crate::schedule::SLOT_KIND_BREAK {
            SlotContent::Break {
                name: r.get::<_, Option<String>>(10)?.unwrap_or_default(),
            }
        } else {
            SlotContent::Period {
                subject: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                teacher: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
                chapter_id: r.get(7)?,
                topic_id: r.get(8)?,
                notes: r.get(9)?,
            }
        };
        Ok(SlotRecord {
            id: r.get(0)?,
            period_number: r.get(1)?,
            start_time: r.get(3)?,
            end_time: r.get(4)?,
            status: r.get(11)?,
            content,
        })
    })?;
    rows.collect()
}

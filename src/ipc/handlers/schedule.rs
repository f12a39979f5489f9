use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    self, BatchSpec, DayConflict, DraftKind, SlotInterval, TimeOfDay, SLOT_KIND_BREAK,
    SLOT_KIND_PERIOD,
};
use crate::store::{self, SlotContent, SlotRecord};
use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;
use uuid::Uuid;

const STATUS_PLANNED: &str = "planned";

const MAX_PERIOD_COUNT: i64 = 20;
const MAX_DURATION_MINUTES: i64 = 480;

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

#[derive(Clone, Copy)]
struct ScheduleSetupDefaults {
    day_start: TimeOfDay,
    period_minutes: u32,
    break_minutes: u32,
}

fn load_schedule_setup_defaults(conn: &Connection) -> ScheduleSetupDefaults {
    let obj = store::settings_get_json(conn, "setup.schedule")
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let day_start = obj
        .get("defaultDayStart")
        .and_then(|v| v.as_str())
        .and_then(|s| schedule::parse_time(s).ok())
        .unwrap_or(TimeOfDay { hour: 9, minute: 0 });
    let period_minutes = obj
        .get("defaultPeriodMinutes")
        .and_then(|v| v.as_i64())
        .filter(|v| (1..=MAX_DURATION_MINUTES).contains(v))
        .unwrap_or(40) as u32;
    let break_minutes = obj
        .get("defaultBreakMinutes")
        .and_then(|v| v.as_i64())
        .filter(|v| (1..=MAX_DURATION_MINUTES).contains(v))
        .unwrap_or(15) as u32;
    ScheduleSetupDefaults {
        day_start,
        period_minutes,
        break_minutes,
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

fn get_date(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))?;
    Ok(raw)
}

fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let exists = store::class_exists(conn, class_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists {
        Ok(())
    } else {
        Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        })
    }
}

fn load_day(conn: &Connection, class_id: &str, date: &str) -> Result<Vec<SlotRecord>, HandlerErr> {
    store::query_day(conn, class_id, date).map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn day_intervals(slots: &[SlotRecord]) -> Vec<SlotInterval> {
    slots
        .iter()
        .map(|s| SlotInterval {
            id: s.id.clone(),
            period_number: s.period_number,
            start: s.start_time.clone(),
            end: s.end_time.clone(),
        })
        .collect()
}

/// Parses raw user time text for one field, mapping parser errors to
/// field-scoped wire errors so the dashboard can highlight the exact input.
fn parse_time_field(raw: &str, field: &str) -> Result<TimeOfDay, HandlerErr> {
    schedule::parse_time(raw).map_err(|e| HandlerErr {
        code: e.code(),
        message: e.message().to_string(),
        details: Some(json!({ "field": field })),
    })
}

fn missing_field(field: &str) -> HandlerErr {
    HandlerErr {
        code: "missing_required_field",
        message: format!("{} is required", field),
        details: Some(json!({ "field": field })),
    }
}

fn conflict_err(conflict: DayConflict, field_hint: &str) -> HandlerErr {
    match conflict {
        DayConflict::InvalidInterval => HandlerErr {
            code: "invalid_interval",
            message: "end time must be after start time".to_string(),
            details: Some(json!({ "field": field_hint })),
        },
        DayConflict::Conflict {
            slot_id,
            period_number,
        } => HandlerErr {
            code: "conflict",
            message: format!("overlaps slot at period {}", period_number),
            details: Some(json!({ "slotId": slot_id, "periodNumber": period_number })),
        },
    }
}

fn slot_to_json(slot: &SlotRecord) -> serde_json::Value {
    let mut out = json!({
        "id": slot.id,
        "periodNumber": slot.period_number,
        "kind": slot.kind(),
        "start": slot.start_time,
        "end": slot.end_time,
        "status": slot.status,
    });
    match &slot.content {
        SlotContent::Period {
            subject,
            teacher,
            chapter_id,
            topic_id,
            notes,
        } => {
            out["subject"] = json!(subject);
            out["teacher"] = json!(teacher);
            out["chapterId"] = json!(chapter_id);
            out["topicId"] = json!(topic_id);
            out["notes"] = json!(notes);
        }
        SlotContent::Break { name } => {
            out["name"] = json!(name);
        }
    }
    out
}

/// Builds the validated slot content from the request, enforcing the
/// kind-conditional required fields before any store call.
fn parse_slot_content(conn: &Connection, kind: &str, slot: &JsonValue) -> Result<SlotContent, HandlerErr> {
    match kind {
        SLOT_KIND_PERIOD => {
            let subject = parse_opt_string(slot.get("subject"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.subject {}", m)))?
                .ok_or_else(|| missing_field("subject"))?;
            let teacher = parse_opt_string(slot.get("teacher"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.teacher {}", m)))?
                .ok_or_else(|| missing_field("teacher"))?;
            let chapter_id = parse_opt_string(slot.get("chapterId"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.chapterId {}", m)))?;
            let topic_id = parse_opt_string(slot.get("topicId"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.topicId {}", m)))?;
            let notes = parse_opt_string(slot.get("notes"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.notes {}", m)))?;
            if topic_id.is_some() && chapter_id.is_none() {
                return Err(HandlerErr::bad_params("slot.topicId requires slot.chapterId"));
            }
            // A topic already present in the index must belong to the
            // referenced chapter; a not-yet-loaded topic is allowed and
            // surfaces as "not loaded" at resolve time.
            if let (Some(chapter_id), Some(topic_id)) = (&chapter_id, &topic_id) {
                let parent: Option<String> = conn
                    .query_row(
                        "SELECT chapter_id FROM syllabus_topics WHERE id = ?",
                        [topic_id],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
                if let Some(parent) = parent {
                    if parent != *chapter_id {
                        return Err(HandlerErr::bad_params(
                            "slot.topicId does not belong to slot.chapterId",
                        ));
                    }
                }
            }
            Ok(SlotContent::Period {
                subject,
                teacher,
                chapter_id,
                topic_id,
                notes,
            })
        }
        SLOT_KIND_BREAK => {
            let name = parse_opt_string(slot.get("name"))
                .map_err(|m| HandlerErr::bad_params(format!("slot.name {}", m)))?
                .ok_or_else(|| missing_field("name"))?;
            Ok(SlotContent::Break { name })
        }
        other => Err(HandlerErr::bad_params(format!(
            "slot.kind must be period or break, got {}",
            other
        ))),
    }
}

fn save_slot(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    require_class(conn, &class_id)?;

    let Some(slot) = params.get("slot") else {
        return Err(HandlerErr::bad_params("missing slot"));
    };
    let period_number = slot
        .get("periodNumber")
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 1)
        .ok_or_else(|| HandlerErr::bad_params("slot.periodNumber must be an integer >= 1"))?;
    let kind = get_required_str(slot, "kind")?;
    let start_raw = get_required_str(slot, "start")?;
    let end_raw = get_required_str(slot, "end")?;

    let start = parse_time_field(&start_raw, "start")?;
    let end = parse_time_field(&end_raw, "end")?;
    let start_time = start.canonical();
    let end_time = end.canonical();

    let content = parse_slot_content(conn, &kind, slot)?;
    let status = parse_opt_string(slot.get("status"))
        .map_err(|m| HandlerErr::bad_params(format!("slot.status {}", m)))?
        .unwrap_or_else(|| STATUS_PLANNED.to_string());

    // Re-saving a period number overwrites in place, so the occupant of that
    // number is the slot being edited and is excluded from conflict checks.
    let occupant: Option<String> = conn
        .query_row(
            "SELECT id FROM time_slots
             WHERE class_id = ? AND slot_date = ? AND period_number = ?",
            rusqlite::params![class_id, date, period_number],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let explicit_id = parse_opt_string(params.get("slotId"))
        .map_err(|m| HandlerErr::bad_params(format!("slotId {}", m)))?;
    let exclude_id = occupant.clone().or(explicit_id);

    let day = load_day(conn, &class_id, &date)?;
    let intervals = day_intervals(&day);
    schedule::validate_against_day(&start_time, &end_time, &intervals, exclude_id.as_deref())
        .map_err(|c| conflict_err(c, "end"))?;

    let slot_id = occupant.unwrap_or_else(|| Uuid::new_v4().to_string());
    let record = SlotRecord {
        id: slot_id.clone(),
        period_number,
        start_time,
        end_time,
        status,
        content,
    };
    store::upsert_slots(conn, &class_id, &date, std::slice::from_ref(&record))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    Ok((class_id, json!({ "slotId": slot_id })))
}

fn delete_slot(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let slot_id = get_required_str(params, "slotId")?;
    require_class(conn, &class_id)?;

    let deleted = store::delete_slot(conn, &class_id, &slot_id)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "slot not found".to_string(),
            details: None,
        });
    }
    Ok((class_id, json!({ "ok": true })))
}

fn day_open(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    require_class(conn, &class_id)?;

    let day = load_day(conn, &class_id, &date)?;
    let slots: Vec<serde_json::Value> = day.iter().map(slot_to_json).collect();
    Ok((class_id, json!({ "date": date, "slots": slots })))
}

fn suggest_slot(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    require_class(conn, &class_id)?;
    let duration = params
        .get("durationMinutes")
        .and_then(|v| v.as_i64())
        .filter(|v| (1..=MAX_DURATION_MINUTES).contains(v))
        .ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "durationMinutes must be in 1..={}",
                MAX_DURATION_MINUTES
            ))
        })?;

    let defaults = load_schedule_setup_defaults(conn);
    let day = load_day(conn, &class_id, &date)?;
    let intervals = day_intervals(&day);
    let (start, end) = schedule::suggest_next(&intervals, duration as u32, defaults.day_start)
        .map_err(|_| HandlerErr::bad_params("requested duration does not fit before midnight"))?;

    Ok((
        class_id,
        json!({ "start": start.canonical(), "end": end.canonical() }),
    ))
}

fn generate_day(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    require_class(conn, &class_id)?;

    let Some(spec) = params.get("spec") else {
        return Err(HandlerErr::bad_params("missing spec"));
    };
    let defaults = load_schedule_setup_defaults(conn);

    let start = match spec.get("start").and_then(|v| v.as_str()) {
        Some(raw) => parse_time_field(raw, "start")?,
        None => defaults.day_start,
    };
    let period_count = spec
        .get("periodCount")
        .and_then(|v| v.as_i64())
        .filter(|v| (1..=MAX_PERIOD_COUNT).contains(v))
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("spec.periodCount must be in 1..={}", MAX_PERIOD_COUNT))
        })?;
    let period_minutes = match spec.get("periodMinutes") {
        None => defaults.period_minutes as i64,
        Some(v) => v
            .as_i64()
            .filter(|n| (1..=MAX_DURATION_MINUTES).contains(n))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "spec.periodMinutes must be in 1..={}",
                    MAX_DURATION_MINUTES
                ))
            })?,
    };
    let break_minutes = match spec.get("breakMinutes") {
        None => defaults.break_minutes as i64,
        Some(v) => v
            .as_i64()
            .filter(|n| (1..=MAX_DURATION_MINUTES).contains(n))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "spec.breakMinutes must be in 1..={}",
                    MAX_DURATION_MINUTES
                ))
            })?,
    };
    let mut break_after: BTreeSet<u32> = BTreeSet::new();
    if let Some(v) = spec.get("breakAfter") {
        let arr = v
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("spec.breakAfter must be an array of integers"))?;
        for item in arr {
            let n = item
                .as_i64()
                .filter(|n| (1..=MAX_PERIOD_COUNT).contains(n))
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!(
                        "spec.breakAfter entries must be in 1..={}",
                        MAX_PERIOD_COUNT
                    ))
                })?;
            break_after.insert(n as u32);
        }
    }

    let batch = BatchSpec {
        start,
        period_minutes: period_minutes as u32,
        period_count: period_count as u32,
        break_after,
        break_minutes: break_minutes as u32,
    };
    let drafts = schedule::generate_batch(&batch)
        .map_err(|_| HandlerErr::bad_params("generated schedule runs past midnight"))?;

    let records: Vec<SlotRecord> = drafts
        .into_iter()
        .map(|d| SlotRecord {
            id: Uuid::new_v4().to_string(),
            period_number: d.period_number,
            start_time: d.start.canonical(),
            end_time: d.end.canonical(),
            status: STATUS_PLANNED.to_string(),
            content: match d.kind {
                DraftKind::Period => SlotContent::Period {
                    // Skeleton slots; content is assigned through normal
                    // edits afterwards.
                    subject: String::new(),
                    teacher: String::new(),
                    chapter_id: None,
                    topic_id: None,
                    notes: None,
                },
                DraftKind::Break { name } => SlotContent::Break { name },
            },
        })
        .collect();

    let created = store::upsert_slots(conn, &class_id, &date, &records)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    info!("generated {} slots for class {} on {}", created, class_id, date);
    Ok((class_id, json!({ "created": created })))
}

fn copy_day(conn: &Connection, params: &JsonValue) -> Result<(String, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let source_date = get_date(params, "sourceDate")?;
    let target_date = get_date(params, "targetDate")?;
    require_class(conn, &class_id)?;
    if source_date == target_date {
        return Err(HandlerErr::bad_params("sourceDate and targetDate must differ"));
    }
    let include_lessons = parse_bool(params.get("includeLessons"), true)
        .map_err(|m| HandlerErr::bad_params(format!("includeLessons {}", m)))?;
    let include_breaks = parse_bool(params.get("includeBreaks"), true)
        .map_err(|m| HandlerErr::bad_params(format!("includeBreaks {}", m)))?;
    let policy = get_required_str(params, "policy")?;
    if policy != "replace" && policy != "merge" {
        return Err(HandlerErr::bad_params("policy must be replace or merge"));
    }

    let source = load_day(conn, &class_id, &source_date)?;
    let filtered: Vec<&SlotRecord> = source
        .iter()
        .filter(|s| match s.content {
            SlotContent::Period { .. } => include_lessons,
            SlotContent::Break { .. } => include_breaks,
        })
        .collect();
    if filtered.is_empty() {
        return Err(HandlerErr {
            code: "no_source_data",
            message: "nothing to copy from the source date".to_string(),
            details: Some(json!({ "sourceDate": source_date })),
        });
    }

    // Intervals and content are copied unchanged; only the scope key moves to
    // the target date. The source day was valid by construction and target
    // writes reuse the per-period-number identity, so no overlap re-check.
    let drafts: Vec<SlotRecord> = filtered
        .iter()
        .map(|s| SlotRecord {
            id: Uuid::new_v4().to_string(),
            period_number: s.period_number,
            start_time: s.start_time.clone(),
            end_time: s.end_time.clone(),
            status: s.status.clone(),
            content: s.content.clone(),
        })
        .collect();

    let copied = if policy == "replace" {
        store::replace_day(conn, &class_id, &target_date, &drafts)
    } else {
        store::upsert_slots(conn, &class_id, &target_date, &drafts)
    }
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    info!(
        "copied {} slots for class {} from {} to {} ({})",
        copied, class_id, source_date, target_date, policy
    );
    Ok((class_id, json!({ "copied": copied })))
}

fn with_mutation(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &JsonValue) -> Result<(String, serde_json::Value), HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok((class_id, result)) => {
            state.bump_day_revision(&class_id);
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

fn with_read(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &JsonValue) -> Result<(String, serde_json::Value), HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok((class_id, mut result)) => {
            result["revision"] = json!(state.day_revision(&class_id));
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_day_revision(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match get_required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_class(conn, &class_id) {
        return e.response(&req.id);
    }
    ok(&req.id, json!({ "revision": state.day_revision(&class_id) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.saveSlot" => Some(with_mutation(state, req, save_slot)),
        "schedule.deleteSlot" => Some(with_mutation(state, req, delete_slot)),
        "schedule.generateDay" => Some(with_mutation(state, req, generate_day)),
        "schedule.copyDay" => Some(with_mutation(state, req, copy_day)),
        "schedule.dayOpen" => Some(with_read(state, req, day_open)),
        "schedule.suggestSlot" => Some(with_read(state, req, suggest_slot)),
        "schedule.dayRevision" => Some(handle_day_revision(state, req)),
        _ => None,
    }
}

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use crate::store;
use serde_json::{json, Map, Value};

const SECTION_KEY: &str = "setup.schedule";

fn default_section() -> Value {
    json!({
        "defaultDayStart": "09:00:00",
        "defaultPeriodMinutes": 40,
        "defaultBreakMinutes": 15
    })
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "defaultDayStart" => {
                let raw = v
                    .as_str()
                    .ok_or_else(|| "defaultDayStart must be string".to_string())?;
                let parsed = schedule::parse_time(raw)
                    .map_err(|e| format!("defaultDayStart {}", e.message()))?;
                obj.insert(k.clone(), Value::String(parsed.canonical()));
            }
            "defaultPeriodMinutes" => {
                let n = parse_i64_range(v, "defaultPeriodMinutes", 1, 480)?;
                obj.insert(k.clone(), json!(n));
            }
            "defaultBreakMinutes" => {
                let n = parse_i64_range(v, "defaultBreakMinutes", 1, 480)?;
                obj.insert(k.clone(), json!(n));
            }
            _ => return Err(format!("unknown setup field: {}", k)),
        }
    }
    Ok(())
}

fn handle_setup_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut section = default_section();
    match store::settings_get_json(conn, SECTION_KEY) {
        Ok(Some(saved)) => {
            if let (Some(obj), Some(saved_obj)) = (section.as_object_mut(), saved.as_object()) {
                for (k, v) in saved_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    ok(&req.id, json!({ "schedule": section }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut section = default_section();
    match store::settings_get_json(conn, SECTION_KEY) {
        Ok(Some(saved)) => {
            if let (Some(obj), Some(saved_obj)) = (section.as_object_mut(), saved.as_object()) {
                for (k, v) in saved_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(m) = merge_section_patch(&mut section, patch) {
        return err(&req.id, "bad_params", m, None);
    }
    if let Err(e) = store::settings_set_json(conn, SECTION_KEY, &section) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "schedule": section }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.open" => Some(handle_setup_open(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

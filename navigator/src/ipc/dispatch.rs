//! IPC message dispatch: parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, warn};

use super::server::ClientSession;
use crate::gesture::{Gesture, LandmarkFrame, PipelineEvent, Sensitivity};
use crate::state::NavigatorState;

/// Protocol version accepted in the hello handshake.
pub const PROTOCOL_VERSION: i64 = 1;

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(
    state: &mut NavigatorState,
    session: &mut ClientSession,
    raw: &str,
) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id = session.id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(session, msg_id, &value),
        _ if !session.authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("frame") => handle_frame(state, msg_id, &value),
        Some("tick") => handle_tick(state, msg_id, &value),
        Some("key") => handle_key(state, msg_id, &value),
        Some("animation-lock") => handle_animation_lock(state, msg_id, &value),
        Some("sensitivity-get") => handle_sensitivity_get(state, msg_id),
        Some("sensitivity-set") => handle_sensitivity_set(state, msg_id, &value),
        Some("calibrate-start") => handle_calibrate_start(state, msg_id, &value),
        Some("calibrate-cancel") => handle_calibrate_cancel(state, msg_id),
        Some("calibrate-status") => handle_calibrate_status(state, msg_id, &value),
        Some("calibrate-clear") => handle_calibrate_clear(state, msg_id),
        Some("status") => handle_status(state, msg_id),
        Some("debug") => handle_debug(state, msg_id, &value),
        Some("config") => handle_config(state, msg_id),
        Some("config-set") => handle_config_set(state, msg_id, &value),
        Some("reset") => handle_reset(state, msg_id),
        Some(other) => Some(error_response(
            msg_id,
            &format!("unknown message type: {other}"),
        )),
        None => Some(error_response(msg_id, "missing :type field")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(session: &mut ClientSession, msg_id: i64, value: &Value) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(PROTOCOL_VERSION);
    if version != PROTOCOL_VERSION {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    debug!(client_id = session.id, client_name = %client_name, "hello handshake");
    session.authenticated = true;

    Some(format!(
        "(:type :response :id {} :status :ok :version {} :server \"deck-navigator\" :server-version \"{}\")",
        msg_id,
        PROTOCOL_VERSION,
        env!("CARGO_PKG_VERSION"),
    ))
}

fn handle_frame(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let stride = get_int(value, "stride").unwrap_or(4);
    if !(2..=4).contains(&stride) {
        return Some(error_response(msg_id, &format!("invalid stride: {stride}")));
    }
    let Some(list) = get_value(value, "landmarks") else {
        return Some(error_response(msg_id, "missing :landmarks"));
    };
    let coords = match landmark_values(list) {
        Ok(c) => c,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };

    let now = state.resolve_now(get_float(value, "t"));
    let frame = LandmarkFrame::from_flat(&coords, stride as usize);
    state.on_frame(&frame, now);

    Some(format!(
        "(:type :response :id {} :status :ok :gesture :{} :calibrating {})",
        msg_id,
        state.pipeline.current_gesture().as_str(),
        bool_sexp(state.calibration.is_active()),
    ))
}

fn handle_tick(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let now = state.resolve_now(get_float(value, "t"));
    state.tick(now);
    Some(ok_response(msg_id))
}

fn handle_key(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let action = match get_keyword(value, "action").as_deref().and_then(Gesture::parse) {
        Some(g) if g.is_action() => g,
        _ => return Some(error_response(msg_id, "action must be :next, :prev or :select")),
    };
    let now = state.resolve_now(get_float(value, "t"));
    let outcome = match state.key(action, now) {
        PipelineEvent::ActionRefused { reason, .. } => {
            format!(":dispatched nil :reason :{}", reason.as_str())
        }
        _ => ":dispatched t".to_string(),
    };
    Some(format!(
        "(:type :response :id {} :status :ok :action :{} {})",
        msg_id,
        action.as_str(),
        outcome
    ))
}

fn handle_animation_lock(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(locked) = get_bool(value, "locked") else {
        return Some(error_response(msg_id, "missing :locked"));
    };
    state.pipeline.set_animation_lock(locked);
    debug!(locked, "animation lock");
    Some(ok_response(msg_id))
}

fn handle_sensitivity_get(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    let s = state.pipeline.sensitivity();
    Some(format!(
        "(:type :response :id {} :status :ok :value {} :multiplier {:.3})",
        msg_id,
        s,
        s.multiplier()
    ))
}

fn handle_sensitivity_set(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(raw) = get_keyword(value, "value") else {
        return Some(error_response(msg_id, "missing :value"));
    };
    let sensitivity = match raw.parse::<Sensitivity>() {
        Ok(s) => s,
        Err(e) => return Some(error_response(msg_id, &e.to_string())),
    };
    if let Err(e) = state.set_sensitivity(sensitivity) {
        return Some(error_response(msg_id, &e.to_string()));
    }
    handle_sensitivity_get(state, msg_id)
}

fn handle_calibrate_start(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let now = state.resolve_now(get_float(value, "t"));
    state.start_calibration(now);
    Some(ok_response(msg_id))
}

fn handle_calibrate_cancel(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    let cancelled = state.cancel_calibration();
    Some(format!(
        "(:type :response :id {} :status :ok :cancelled {})",
        msg_id,
        bool_sexp(cancelled)
    ))
}

fn handle_calibrate_status(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let now = get_float(value, "t").unwrap_or_else(|| state.last_now_ms());
    let profile = state
        .pipeline
        .calibration()
        .map_or("nil".to_string(), |p| p.to_sexp());
    Some(format!(
        "(:type :response :id {} :status :ok :calibration {} :profile {})",
        msg_id,
        state.calibration.status_sexp(now),
        profile
    ))
}

fn handle_calibrate_clear(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    match state.clear_calibration() {
        Ok(()) => Some(ok_response(msg_id)),
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_status(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :pipeline {})",
        msg_id,
        state.pipeline.status_sexp()
    ))
}

fn handle_debug(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let now = get_float(value, "t").unwrap_or_else(|| state.last_now_ms());
    Some(format!(
        "(:type :response :id {} :status :ok :dispatcher {})",
        msg_id,
        state.pipeline.dispatcher.status_sexp(now)
    ))
}

fn handle_config(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        state.pipeline.config_sexp()
    ))
}

fn handle_config_set(state: &mut NavigatorState, msg_id: i64, value: &Value) -> Option<String> {
    let fields = ["cooldown-ms", "repeat-window-ms", "debounce-ms", "throttle-ms"];
    let mut parsed = [None; 4];
    for (slot, key) in parsed.iter_mut().zip(fields) {
        if let Some(v) = get_float(value, key) {
            if !v.is_finite() || v < 0.0 {
                return Some(error_response(msg_id, &format!("invalid :{key} {v}")));
            }
            *slot = Some(v);
        }
    }

    let [cooldown, repeat, debounce, throttle] = parsed;
    let p = &mut state.pipeline;
    if let Some(v) = cooldown {
        p.dispatcher.config.cooldown_ms = v;
    }
    if let Some(v) = repeat {
        p.dispatcher.config.repeat_window_ms = v;
    }
    if let Some(v) = debounce {
        p.scheduler.config.debounce_ms = v;
    }
    if let Some(v) = throttle {
        p.scheduler.config.throttle_ms = v;
    }
    handle_config(state, msg_id)
}

fn handle_reset(state: &mut NavigatorState, msg_id: i64) -> Option<String> {
    state.reset();
    Some(ok_response(msg_id))
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

fn bool_sexp(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

/// Escape a string for s-expression output.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_key(car: &Value, key: &str) -> bool {
    match car {
        Value::Keyword(k) => k.as_ref() == key,
        Value::Symbol(s) => s.strip_prefix(':') == Some(key),
        _ => false,
    }
}

fn is_nil(value: &Value) -> bool {
    match value {
        Value::Nil | Value::Null => true,
        Value::Bool(b) => !*b,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

/// Find the value following `:key` in an s-expression plist.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;
    while let Value::Cons(pair) = current {
        if is_key(pair.car(), key) {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as a string.
fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = get_value(value, key)?;
    Some(match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => v.strip_prefix(':').unwrap_or(v).to_string(),
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => bool_sexp(*b).to_string(),
        Value::Nil | Value::Null => "nil".to_string(),
        _ => val.to_string(),
    })
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a string value from an s-expression plist.
fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a boolean value from an s-expression plist.
/// Treats "t" as true, "nil" as false.
fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Extract a floating-point value from an s-expression plist.
fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Elements of a proper or dotted list, in order.
fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    loop {
        match current {
            Value::Cons(pair) => {
                items.push(pair.car());
                current = pair.cdr();
            }
            Value::Vector(v) => {
                items.extend(v.iter());
                break;
            }
            Value::Nil | Value::Null => break,
            other => {
                items.push(other);
                break;
            }
        }
    }
    items
}

/// Landmark coordinates from a list of numbers, with `nil` marking a
/// missing value.
fn landmark_values(list: &Value) -> Result<Vec<Option<f64>>, String> {
    list_items(list)
        .into_iter()
        .map(|v| match v {
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| format!("invalid landmark value: {n}")),
            other if is_nil(other) => Ok(None),
            other => Err(format!("invalid landmark value: {other}")),
        })
        .collect()
}

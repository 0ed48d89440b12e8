use serde_json::Value;

const RECORD_SET_TYPE: &str = "DatabaseActivityMonitoringRecord";
const EVENT_LIST: &str = "databaseActivityEventList";

/// Event fields whose values are dropped, per lowercase server type
const EXCLUDED: &[(&str, &str, &[&str])] = &[("sqlserver", "class", &["LOGIN"])];

/// Record set left after filtering, with the event counts before and after.
#[derive(Debug, PartialEq)]
pub struct Pruned {
    /// Record set holding only allowed events
    pub record: Value,
    /// Events in the record set as received
    pub received: usize,
    /// Events kept
    pub kept: usize,
}

/// Activity events worth forwarding: database records with a command, which
/// are not excluded for their server type. Heartbeats are not records.
pub fn is_allowed_event(event: &Value) -> bool {
    if event.get("type").and_then(Value::as_str) != Some("record") || event.get("command").is_none() {
        return false;
    }
    let Some(server) = event.get("serverType").and_then(Value::as_str) else {
        return false;
    };
    let server = server.to_lowercase();

    !EXCLUDED.iter().any(|(kind, field, values)| {
        *kind == server
            && event
                .get(*field)
                .and_then(Value::as_str)
                .map_or(false, |v| values.contains(&v))
    })
}

/// Keep the allowed events of an activity record set.
///
/// Returns `None` when the set must be dropped: it isn't an activity
/// monitoring record set, or no event is left.
pub fn prune(mut record: Value) -> Option<Pruned> {
    let kind = record.get("type").and_then(Value::as_str);
    if kind != Some(RECORD_SET_TYPE) {
        tracing::warn!(?kind, "unexpected record type in activity stream, dropping it");
        return None;
    }
    let Some(events) = record.get_mut(EVENT_LIST).and_then(Value::as_array_mut) else {
        tracing::warn!("record set without an event list, dropping it");
        return None;
    };

    let received = events.len();
    events.retain(is_allowed_event);
    let kept = events.len();

    (kept > 0).then_some(Pruned {
        record,
        received,
        kept,
    })
}

use super::{parse_f64, parse_i64, parse_timestamp_ns, parse_u64, require_argc, unquote};
use crate::error::IngestError;
use crate::types::{ChatEvent, GeneralEvent, ObjectId, RadioEvent, ServerFpsEvent, TimeState};

fn parse_optional_sender(field: &'static str, raw: &str) -> Result<Option<ObjectId>, IngestError> {
    let id = parse_i64(field, raw)?;
    Ok(if id < 0 { None } else { Some(id as ObjectId) })
}

/// `:CHAT:` — a nil sender (system messages) is valid.
pub fn parse_chat(args: &[String]) -> Result<ChatEvent, IngestError> {
    require_argc("chat.args", args, 5)?;

    Ok(ChatEvent {
        sender: parse_optional_sender("chat.sender", &args[0])?,
        frame: parse_u64("chat.frame", &args[1])?,
        channel: unquote(&args[2]),
        payload: unquote(&args[3]),
    })
}

/// `:RADIO:`
pub fn parse_radio(args: &[String]) -> Result<RadioEvent, IngestError> {
    require_argc("radio.args", args, 5)?;

    Ok(RadioEvent {
        sender: parse_optional_sender("radio.sender", &args[0])?,
        frame: parse_u64("radio.frame", &args[1])?,
        radio_type: unquote(&args[2]),
        payload: unquote(&args[3]),
    })
}

/// `:EVENT:` — free-form; `extra_data` remains an opaque JSON value.
pub fn parse_event(args: &[String]) -> Result<GeneralEvent, IngestError> {
    require_argc("event.args", args, 4)?;

    let extra_data = serde_json::from_str(&unquote(&args[2])).unwrap_or(serde_json::Value::Null);

    Ok(GeneralEvent {
        frame: parse_u64("event.frame", &args[0])?,
        name: unquote(&args[1]),
        message: unquote(&args[2]),
        extra_data,
    })
}

/// `:FPS:`
pub fn parse_fps(args: &[String]) -> Result<ServerFpsEvent, IngestError> {
    require_argc("fps.args", args, 4)?;

    Ok(ServerFpsEvent {
        frame: parse_u64("fps.frame", &args[0])?,
        fps: parse_f64("fps.fps", &args[1])?,
        fps_min: parse_f64("fps.fps_min", &args[2])?,
    })
}

/// `:NEW:TIME:STATE:`
pub fn parse_time_state(args: &[String]) -> Result<TimeState, IngestError> {
    require_argc("time_state.args", args, 3)?;

    Ok(TimeState {
        frame: parse_u64("time_state.frame", &args[0])?,
        mission_time: parse_f64("time_state.mission_time", &args[1])?,
        time_unix_nanos: parse_timestamp_ns("time_state.time", &args[2])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_chat_sender_is_valid() {
        let args: Vec<String> = vec!["-1", "100", "side", "hello", "1700000000000000000"]
            .into_iter()
            .map(String::from)
            .collect();
        let chat = parse_chat(&args).unwrap();
        assert_eq!(chat.sender, None);
    }
}

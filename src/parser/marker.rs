use super::{parse_f64, parse_position2d, parse_timestamp_ns, parse_u16, parse_u64, require_argc, unquote};
use crate::error::IngestError;
use crate::types::{DeleteMarker, Marker, MarkerState};

/// `:NEW:MARKER:` — 15 positional fields: name, direction, type, text,
/// frame, sentinel `-1` (unused, reserved), owner, color, size, side,
/// position, shape, alpha, brush, timestamp. The name is the key the
/// marker cache indexes on.
pub fn parse_new_marker(args: &[String]) -> Result<Marker, IngestError> {
    require_argc("new_marker.args", args, 15)?;
    // last field is the standard trailing timestamp; validated, not stored
    // (Marker has no Time field of its own — its frame is authoritative).
    let _ = parse_timestamp_ns("new_marker.time", &args[14])?;

    Ok(Marker {
        id: None,
        name: unquote(&args[0]),
        marker_type: unquote(&args[2]),
        text: unquote(&args[3]),
        frame: parse_u64("new_marker.frame", &args[4])?,
        owner: parse_u16("new_marker.owner", &args[6]).unwrap_or(0),
        color: unquote(&args[7]),
        size: unquote(&args[8]),
        side: unquote(&args[9]),
        position: parse_position2d("new_marker.position", &args[10])?,
        shape: unquote(&args[11]),
        alpha: parse_f64("new_marker.alpha", &args[12])?,
        brush: unquote(&args[13]),
        polyline: None,
        deleted: false,
    })
}

/// `:NEW:MARKER:STATE:` — 5 positional fields: name, frame, position,
/// direction, alpha. `marker_id` is resolved by the handler through the
/// marker cache, not by the parser.
pub struct ParsedMarkerMove {
    pub name: String,
    pub frame: u64,
    pub position: crate::types::Position2D,
    pub direction: f64,
    pub alpha: f64,
}

pub fn parse_new_marker_state(args: &[String]) -> Result<ParsedMarkerMove, IngestError> {
    require_argc("marker_state.args", args, 5)?;

    Ok(ParsedMarkerMove {
        name: unquote(&args[0]),
        frame: parse_u64("marker_state.frame", &args[1])?,
        position: parse_position2d("marker_state.position", &args[2])?,
        direction: parse_f64("marker_state.direction", &args[3])?,
        alpha: parse_f64("marker_state.alpha", &args[4])?,
    })
}

pub fn finish_marker_state(parsed: ParsedMarkerMove, marker_id: u32) -> MarkerState {
    MarkerState {
        marker_id,
        frame: parsed.frame,
        position: parsed.position,
        direction: parsed.direction,
        alpha: parsed.alpha,
    }
}

/// `:DELETE:MARKER:` — 2 positional fields: name, frame.
pub fn parse_delete_marker(args: &[String]) -> Result<DeleteMarker, IngestError> {
    require_argc("delete_marker.args", args, 2)?;

    Ok(DeleteMarker {
        name: unquote(&args[0]),
        end_frame: parse_u64("delete_marker.frame", &args[1])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_lifecycle_create_move_delete() {
        let create_args: Vec<String> = vec![
            "Proj#123",
            "0",
            "mil_dot",
            "",
            "10",
            "-1",
            "0",
            "ColorRed",
            "icon",
            "WEST",
            "[0,0]",
            "ICON",
            "1.0",
            "SolidFull",
            "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let marker = parse_new_marker(&create_args).unwrap();
        assert_eq!(marker.name, "Proj#123");

        let move_args: Vec<String> = vec!["Proj#123", "50", "[1,1]", "45", "0.8"]
            .into_iter()
            .map(String::from)
            .collect();
        let moved = parse_new_marker_state(&move_args).unwrap();
        let state = finish_marker_state(moved, 5);
        assert_eq!(state.marker_id, 5);

        let delete_args: Vec<String> = vec!["Proj#123", "500"].into_iter().map(String::from).collect();
        let deleted = parse_delete_marker(&delete_args).unwrap();
        assert_eq!(deleted.end_frame, 500);
    }
}

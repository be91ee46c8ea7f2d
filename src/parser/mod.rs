//! Pure, deterministic transformation of a command's argument vector into
//! a typed record. One function per command; no I/O, no shared state.
//!
//! Every parser shares the same normalisation and strict-parsing
//! primitives defined here. A parser never panics and never partially
//! mutates its output — on the first invalid field it returns a
//! [`IngestError::ParseError`] describing the field and its raw value.

mod combat;
mod comms;
mod entity;
mod marker;
mod mission;

pub use combat::{
    finish_kill, parse_ace3_death, parse_ace3_unconscious, parse_kill, parse_projectile,
    ParsedKill, ParsedProjectile,
};
pub use comms::{parse_chat, parse_event, parse_fps, parse_radio, parse_time_state};
pub use entity::{parse_new_soldier, parse_new_vehicle, parse_soldier_state, parse_vehicle_state};
pub use marker::{
    finish_marker_state, parse_delete_marker, parse_new_marker, parse_new_marker_state,
    ParsedMarkerMove,
};
pub use mission::parse_new_mission;

use crate::error::IngestError;
use crate::types::{Position2D, Position3D};

/// Strips one layer of outer double quotes if present, then collapses
/// doubled double-quotes (`""`) to a single `"`. These are the host's
/// SQF-quoting artifacts and every argument is normalised this way before
/// any further parsing.
pub fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    inner.replace("\"\"", "\"")
}

pub fn require_argc(field: &'static str, args: &[String], expected: usize) -> Result<(), IngestError> {
    if args.len() != expected {
        return Err(IngestError::parse(
            field,
            format!("expected {expected} arguments, got {}", args.len()),
        ));
    }
    Ok(())
}

pub fn require_min_argc(
    field: &'static str,
    args: &[String],
    min: usize,
) -> Result<(), IngestError> {
    if args.len() < min {
        return Err(IngestError::parse(
            field,
            format!("expected at least {min} arguments, got {}", args.len()),
        ));
    }
    Ok(())
}

/// The last argument of every ingest command is a nanosecond-precision
/// Unix timestamp encoded as a decimal string.
pub fn parse_timestamp_ns(field: &'static str, raw: &str) -> Result<i64, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<i64>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_u16(field: &'static str, raw: &str) -> Result<u16, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<u16>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_u32(field: &'static str, raw: &str) -> Result<u32, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<u32>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_u64(field: &'static str, raw: &str) -> Result<u64, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<u64>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_i64(field: &'static str, raw: &str) -> Result<i64, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<i64>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_i32(field: &'static str, raw: &str) -> Result<i32, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<i32>()
        .map_err(|_| IngestError::parse(field, normalised))
}

pub fn parse_f64(field: &'static str, raw: &str) -> Result<f64, IngestError> {
    let normalised = unquote(raw);
    normalised
        .parse::<f64>()
        .map_err(|_| IngestError::parse(field, normalised))
}

/// Booleans accept only the literal, case-sensitive strings `"true"` and
/// `"false"`.
pub fn parse_bool_strict(field: &'static str, raw: &str) -> Result<bool, IngestError> {
    match unquote(raw).as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(IngestError::parse(field, other)),
    }
}

/// Position strings arrive as `[x,y,z]`, stripped of brackets then split
/// on commas. X/Y/Z are forwarded verbatim; no reprojection happens here.
pub fn parse_position3d(field: &'static str, raw: &str) -> Result<Position3D, IngestError> {
    let normalised = unquote(raw);
    let stripped = normalised
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| IngestError::parse(field, normalised.clone()))?;
    let parts: Vec<&str> = stripped.split(',').map(|s| s.trim()).collect();
    if parts.len() != 3 {
        return Err(IngestError::parse(field, normalised));
    }
    Ok(Position3D {
        x: parts[0]
            .parse()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?,
        y: parts[1]
            .parse()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?,
        z: parts[2]
            .parse()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?,
    })
}

/// As [`parse_position3d`] but accepts a 2-element `[x,y]` form, used by
/// markers, which are always planar.
pub fn parse_position2d(field: &'static str, raw: &str) -> Result<Position2D, IngestError> {
    let normalised = unquote(raw);
    let stripped = normalised
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| IngestError::parse(field, normalised.clone()))?;
    let parts: Vec<&str> = stripped.split(',').map(|s| s.trim()).collect();
    if parts.len() < 2 {
        return Err(IngestError::parse(field, normalised));
    }
    Ok(Position2D {
        x: parts[0]
            .parse()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?,
        y: parts[1]
            .parse()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?,
    })
}

/// Decodes a JSON array field (addons, squad params, crew list) into a
/// typed shape. Genuinely free-form fields (`GeneralEvent.ExtraData`) skip
/// this and keep `serde_json::Value` instead.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, IngestError> {
    let normalised = unquote(raw);
    serde_json::from_str(&normalised).map_err(|_| IngestError::parse(field, normalised))
}

/// Decodes a comma-joined list of ObjectIDs (`VehicleState.Crew`).
pub fn parse_object_id_list(field: &'static str, raw: &str) -> Result<Vec<u16>, IngestError> {
    let normalised = unquote(raw);
    if normalised.is_empty() {
        return Ok(Vec::new());
    }
    normalised
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<u16>()
                .map_err(|_| IngestError::parse(field, normalised.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquote_strips_one_outer_layer() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("hello"), "hello");
    }

    #[test]
    fn unquote_collapses_doubled_quotes() {
        assert_eq!(unquote("\"he said \"\"hi\"\"\""), "he said \"hi\"");
    }

    #[test]
    fn position3d_round_trips_to_f64_precision() {
        let pos = parse_position3d("pos", "[1.5,-2.25,300]").unwrap();
        assert_eq!(pos.x, 1.5);
        assert_eq!(pos.y, -2.25);
        assert_eq!(pos.z, 300.0);
    }

    #[test]
    fn bool_is_case_sensitive() {
        assert!(parse_bool_strict("f", "true").unwrap());
        assert!(parse_bool_strict("f", "False").is_err());
    }

    #[test]
    fn object_id_list_handles_empty() {
        assert_eq!(parse_object_id_list("crew", "").unwrap(), Vec::<u16>::new());
        assert_eq!(parse_object_id_list("crew", "1,2,3").unwrap(), vec![1, 2, 3]);
    }
}

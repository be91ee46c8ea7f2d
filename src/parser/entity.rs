use super::{
    parse_bool_strict, parse_f64, parse_i64, parse_json, parse_object_id_list,
    parse_position3d, parse_timestamp_ns, parse_u16, parse_u64, require_argc,
};
use crate::error::IngestError;
use crate::types::{LifeState, ScoreTuple, Soldier, SoldierState, Stance, Vehicle, VehicleState};

/// `:NEW:SOLDIER:` — positional fields, field order fixed and documented
/// alongside the command surface.
pub fn parse_new_soldier(args: &[String]) -> Result<Soldier, IngestError> {
    require_argc("new_soldier.args", args, 11)?;

    Ok(Soldier {
        object_id: parse_u16("new_soldier.object_id", &args[0])?,
        join_frame: parse_u64("new_soldier.join_frame", &args[1])?,
        unit_type: super::unquote(&args[2]),
        unit_name: super::unquote(&args[3]),
        group_id: super::unquote(&args[4]),
        side: super::unquote(&args[5]),
        is_player: parse_bool_strict("new_soldier.is_player", &args[6])?,
        role_description: super::unquote(&args[7]),
        class_name: super::unquote(&args[8]),
        display_name: super::unquote(&args[9]),
        player_uid: String::new(),
        squad_info: serde_json::Value::Null,
        join_time_unix_nanos: parse_timestamp_ns("new_soldier.time", &args[10])?,
    })
}

/// `:NEW:VEHICLE:` — same pattern as soldier registration.
pub fn parse_new_vehicle(args: &[String]) -> Result<Vehicle, IngestError> {
    require_argc("new_vehicle.args", args, 6)?;

    Ok(Vehicle {
        object_id: parse_u16("new_vehicle.object_id", &args[0])?,
        join_frame: parse_u64("new_vehicle.join_frame", &args[1])?,
        vehicle_class: super::unquote(&args[2]),
        display_name: super::unquote(&args[3]),
        customization: parse_json("new_vehicle.customization", &args[4]).unwrap_or(serde_json::Value::Null),
        join_time_unix_nanos: parse_timestamp_ns("new_vehicle.time", &args[5])?,
    })
}

/// `[infantry,vehicle,armor,air,deaths,total]` comma-joined.
fn parse_score_tuple(field: &'static str, raw: &str) -> Result<ScoreTuple, IngestError> {
    let normalised = super::unquote(raw);
    let parts: Vec<&str> = normalised.split(',').collect();
    if parts.len() != 6 {
        return Err(IngestError::parse(field, normalised));
    }
    let mut values = [0i32; 6];
    for (i, part) in parts.iter().enumerate() {
        values[i] = part
            .trim()
            .parse::<i32>()
            .map_err(|_| IngestError::parse(field, normalised.clone()))?;
    }
    Ok(ScoreTuple {
        infantry_kills: values[0],
        vehicle_kills: values[1],
        armor_kills: values[2],
        air_kills: values[3],
        deaths: values[4],
        total: values[5],
    })
}

fn parse_stance(field: &'static str, raw: &str) -> Result<Stance, IngestError> {
    match super::unquote(raw).as_str() {
        "UP" => Ok(Stance::Up),
        "MIDDLE" => Ok(Stance::Middle),
        "DOWN" => Ok(Stance::Down),
        other => Err(IngestError::parse(field, other)),
    }
}

fn parse_life_state(field: &'static str, raw: &str) -> Result<LifeState, IngestError> {
    match super::unquote(raw).as_str() {
        "ALIVE" => Ok(LifeState::Alive),
        "INCAPACITATED" => Ok(LifeState::Unconscious),
        "DEAD" => Ok(LifeState::Dead),
        other => Err(IngestError::parse(field, other)),
    }
}

/// `:NEW:SOLDIER:STATE:` — positional array, no keying. GroupID/Side may
/// arrive empty (the host omits them to save bandwidth); the handler, not
/// the parser, fills them from the cached registration.
pub fn parse_soldier_state(args: &[String]) -> Result<SoldierState, IngestError> {
    require_argc("soldier_state.args", args, 17)?;

    let in_vehicle_raw = parse_i64("soldier_state.in_vehicle", &args[6])?;

    Ok(SoldierState {
        soldier_id: parse_u16("soldier_state.soldier_id", &args[0])?,
        frame: parse_u64("soldier_state.frame", &args[1])?,
        position: parse_position3d("soldier_state.position", &args[2])?,
        bearing: parse_f64("soldier_state.bearing", &args[3])?,
        life_state: parse_life_state("soldier_state.life_state", &args[4])?,
        // sentinel -1 means "not in a vehicle"
        in_vehicle: if in_vehicle_raw == -1 {
            None
        } else {
            Some(in_vehicle_raw as u16)
        },
        vehicle_role: Some(super::unquote(&args[5])).filter(|s| !s.is_empty()),
        unit_name: super::unquote(&args[7]),
        is_player: parse_bool_strict("soldier_state.is_player", &args[8])?,
        current_role: super::unquote(&args[9]),
        has_stable_vitals: parse_bool_strict("soldier_state.stable_vitals", &args[10])?,
        is_dragged_or_carried: parse_bool_strict("soldier_state.dragged", &args[11])?,
        stance: parse_stance("soldier_state.stance", &args[12])?,
        group_id: super::unquote(&args[13]),
        side: super::unquote(&args[14]),
        score: parse_score_tuple("soldier_state.score", &args[15]).unwrap_or(ScoreTuple {
            infantry_kills: 0,
            vehicle_kills: 0,
            armor_kills: 0,
            air_kills: 0,
            deaths: 0,
            total: 0,
        }),
        time_unix_nanos: parse_timestamp_ns("soldier_state.time", &args[16])?,
    })
}

/// `:NEW:VEHICLE:STATE:` — positional array; crew arrives comma-joined.
pub fn parse_vehicle_state(args: &[String]) -> Result<VehicleState, IngestError> {
    require_argc("vehicle_state.args", args, 16)?;

    Ok(VehicleState {
        vehicle_id: parse_u16("vehicle_state.vehicle_id", &args[0])?,
        frame: parse_u64("vehicle_state.frame", &args[1])?,
        position: parse_position3d("vehicle_state.position", &args[2])?,
        bearing: parse_f64("vehicle_state.bearing", &args[3])?,
        is_alive: parse_bool_strict("vehicle_state.is_alive", &args[4])?,
        crew: parse_object_id_list("vehicle_state.crew", &args[5])?,
        fuel: parse_f64("vehicle_state.fuel", &args[6])?,
        damage: parse_f64("vehicle_state.damage", &args[7])?,
        is_locked: parse_bool_strict("vehicle_state.locked", &args[8])?,
        is_engine_on: parse_bool_strict("vehicle_state.engine_on", &args[9])?,
        side: super::unquote(&args[10]),
        vector_dir: super::unquote(&args[11]),
        vector_up: super::unquote(&args[12]),
        turret_azimuth: parse_f64("vehicle_state.turret_azimuth", &args[13])?,
        turret_elevation: parse_f64("vehicle_state.turret_elevation", &args[14])?,
        time_unix_nanos: parse_timestamp_ns("vehicle_state.time", &args[15])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_soldier() {
        let args: Vec<String> = vec![
            "42", "0", "Man", "Habib", "Alpha", "WEST", "false", "rifleman", "B_Soldier_F",
            "Habib", "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let soldier = parse_new_soldier(&args).unwrap();
        assert_eq!(soldier.object_id, 42);
        assert!(!soldier.is_player);
    }

    #[test]
    fn sentinel_minus_one_means_no_vehicle() {
        let args: Vec<String> = vec![
            "42", "10", "[0,0,0]", "90", "ALIVE", "", "-1", "Habib", "false", "rifleman", "true",
            "false", "UP", "", "WEST", "0,0,0,0,0,0", "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let state = parse_soldier_state(&args).unwrap();
        assert_eq!(state.in_vehicle, None);
        assert_eq!(state.side, "WEST");
    }

    #[test]
    fn vehicle_state_parses_turret_angles() {
        let args: Vec<String> = vec![
            "30", "10", "[0,0,0]", "90", "true", "1,2", "0.8", "0.1", "false", "true", "WEST",
            "[1,0,0]", "[0,0,1]", "45.0", "-5.0", "1700000000000000000",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let state = parse_vehicle_state(&args).unwrap();
        assert_eq!(state.crew, vec![1, 2]);
        assert_eq!(state.turret_azimuth, 45.0);
        assert_eq!(state.turret_elevation, -5.0);
    }
}

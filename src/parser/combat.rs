use serde::Deserialize;

use super::{parse_bool_strict, parse_f64, parse_i64, parse_position3d, parse_timestamp_ns, parse_u16, parse_u64, require_argc, unquote};
use crate::error::IngestError;
use crate::types::{
    Ace3DeathEvent, Ace3UnconsciousEvent, EntityRef, KillEvent, ObjectId, RawHit, TrajectoryPoint,
};

#[derive(Debug, Deserialize)]
struct ProjectileJson {
    #[serde(rename = "firedTime")]
    fired_time: i64,
    #[serde(rename = "firedFrame")]
    fired_frame: u64,
    #[serde(rename = "firerID")]
    firer_id: i64,
    #[serde(rename = "remoteControllerID", default)]
    #[allow(dead_code)]
    remote_controller_id: i64,
    #[serde(rename = "vehicleID", default)]
    vehicle_id: i64,
    #[serde(default)]
    positions: Vec<(i64, serde_json::Value, String)>,
    #[serde(rename = "hitParts", default)]
    hit_parts: Vec<(i64, serde_json::Value, String, u64)>,
    #[serde(rename = "weaponDisplay", default)]
    weapon_display: String,
    #[serde(rename = "magazineDisplay", default)]
    magazine_display: String,
    #[serde(rename = "muzzleDisplay", default)]
    muzzle_display: String,
    #[serde(rename = "simulationType", default)]
    simulation_type: String,
    #[serde(rename = "iconPath", default)]
    icon_path: String,
}

/// Output of the pure projectile parser: the trajectory plus the raw,
/// unclassified hit list. Classification into soldier/vehicle is deferred
/// to the handler (see `crate::handlers`), which is the only layer that
/// may consult the entity cache.
pub struct ParsedProjectile {
    pub firer: Option<ObjectId>,
    pub vehicle: Option<ObjectId>,
    pub capture_frame: u64,
    pub fired_time_unix_nanos: i64,
    pub weapon_display: String,
    pub magazine_display: String,
    pub muzzle_display: String,
    pub simulation_type: String,
    pub icon_path: String,
    pub trajectory: Vec<TrajectoryPoint>,
    pub raw_hits: Vec<RawHit>,
}

pub fn parse_projectile(args: &[String]) -> Result<ParsedProjectile, IngestError> {
    require_argc("projectile.args", args, 1)?;

    let raw = unquote(&args[0]);
    let json: ProjectileJson =
        serde_json::from_str(&raw).map_err(|e| IngestError::parse("projectile.body", e.to_string()))?;

    let trajectory = json
        .positions
        .iter()
        .map(|(_time_ns, _unused, pos)| {
            parse_position3d("projectile.position", pos).map(|position| TrajectoryPoint {
                position,
                frame: json.fired_frame,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw_hits = json
        .hit_parts
        .iter()
        .map(|(entity_id, components, pos, frame)| {
            let position = parse_position3d("projectile.hit_position", pos)?;
            Ok(RawHit {
                entity_id: *entity_id as ObjectId,
                frame: *frame,
                position,
                components_hit: components.as_array().map(|a| a.len() as u32).unwrap_or(0),
            })
        })
        .collect::<Result<Vec<_>, IngestError>>()?;

    Ok(ParsedProjectile {
        firer: if json.firer_id < 0 {
            None
        } else {
            Some(json.firer_id as ObjectId)
        },
        vehicle: if json.vehicle_id < 0 {
            None
        } else {
            Some(json.vehicle_id as ObjectId)
        },
        capture_frame: json.fired_frame,
        fired_time_unix_nanos: json.fired_time,
        weapon_display: json.weapon_display,
        magazine_display: json.magazine_display,
        muzzle_display: json.muzzle_display,
        simulation_type: json.simulation_type,
        icon_path: json.icon_path,
        trajectory,
        raw_hits,
    })
}

/// Raw, unclassified kill; victim/attacker are ObjectIDs only until the
/// handler classifies each into a soldier-xor-vehicle slot.
pub struct ParsedKill {
    pub victim_id: ObjectId,
    pub attacker_id: Option<ObjectId>,
    pub frame: u64,
    pub distance: f64,
}

pub fn parse_kill(args: &[String]) -> Result<ParsedKill, IngestError> {
    require_argc("kill.args", args, 5)?;

    let attacker_raw = parse_i64("kill.attacker_id", &args[1])?;

    Ok(ParsedKill {
        victim_id: parse_u16("kill.victim_id", &args[0])?,
        attacker_id: if attacker_raw < 0 {
            None
        } else {
            Some(attacker_raw as ObjectId)
        },
        frame: parse_u64("kill.frame", &args[2])?,
        distance: parse_f64("kill.distance", &args[3])?,
    })
}

/// Finishes building a [`KillEvent`] once the handler has classified
/// victim/attacker against the entity cache.
pub fn finish_kill(parsed: &ParsedKill, victim: EntityRef, attacker: Option<EntityRef>) -> KillEvent {
    KillEvent {
        victim,
        attacker,
        frame: parsed.frame,
        distance: parsed.distance,
    }
}

pub fn parse_ace3_death(args: &[String]) -> Result<(Ace3DeathEvent, Option<ObjectId>), IngestError> {
    require_argc("ace3_death.args", args, 5)?;

    let damage_source_raw = parse_i64("ace3_death.damage_source", &args[1])?;
    let damage_source_id = if damage_source_raw < 0 {
        None
    } else {
        Some(damage_source_raw as ObjectId)
    };

    let event = Ace3DeathEvent {
        soldier_id: parse_u16("ace3_death.soldier_id", &args[0])?,
        damage_source: None, // classified by the handler
        frame: parse_u64("ace3_death.frame", &args[2])?,
        instigator: unquote(&args[3]),
    };
    Ok((event, damage_source_id))
}

pub fn parse_ace3_unconscious(args: &[String]) -> Result<Ace3UnconsciousEvent, IngestError> {
    require_argc("ace3_unconscious.args", args, 3)?;

    Ok(Ace3UnconsciousEvent {
        soldier_id: parse_u16("ace3_unconscious.soldier_id", &args[0])?,
        frame: parse_u64("ace3_unconscious.frame", &args[1])?,
        is_awake: parse_bool_strict("ace3_unconscious.is_awake", &args[2])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projectile_with_mixed_hits_keeps_entity_ids_unclassified() {
        let body = serde_json::json!({
            "firedTime": 1,
            "firedFrame": 10,
            "firerID": 7,
            "vehicleID": -1,
            "positions": [[1, 0, "[0,0,0]"], [2, 0, "[1,1,1]"]],
            "hitParts": [[7, [], "[0,0,0]", 11], [30, [], "[1,1,1]", 11], [999, [], "[2,2,2]", 11]],
            "weaponDisplay": "Rifle",
            "magazineDisplay": "Mag",
            "muzzleDisplay": "Muzzle",
            "simulationType": "shotBullet",
            "iconPath": "path"
        });
        let args = vec![body.to_string()];

        let parsed = parse_projectile(&args).unwrap();
        assert_eq!(parsed.firer, Some(7));
        assert_eq!(parsed.raw_hits.len(), 3);
        assert_eq!(parsed.trajectory.len(), 2);
    }

    #[test]
    fn kill_with_unclassified_attacker_is_allowed() {
        let args: Vec<String> = vec!["7", "-1", "100", "12.5", "1700000000000000000"]
            .into_iter()
            .map(String::from)
            .collect();
        let parsed = parse_kill(&args).unwrap();
        assert_eq!(parsed.attacker_id, None);
    }
}

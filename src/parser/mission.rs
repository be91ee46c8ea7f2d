use serde::Deserialize;

use super::{parse_timestamp_ns, require_argc, unquote};
use crate::error::IngestError;
use crate::types::{Addon, Mission, PlayableSlots, SideFriendlyMatrix, WorkshopId, World};

#[derive(Debug, Deserialize)]
struct WorldJson {
    #[serde(rename = "worldName")]
    world_name: String,
    #[serde(rename = "worldNameOriginal", default)]
    world_name_original: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "worldSize")]
    world_size: f64,
    latitude: f64,
    longitude: f64,
    author: String,
    #[serde(rename = "workshopID")]
    workshop_id: String,
}

#[derive(Debug, Deserialize)]
struct MissionJson {
    #[serde(rename = "missionName")]
    mission_name: String,
    #[serde(rename = "briefingName")]
    briefing_name: String,
    #[serde(rename = "missionNameSource", default)]
    mission_name_source: String,
    #[serde(rename = "onLoadName", default)]
    on_load_name: String,
    author: String,
    #[serde(rename = "serverName")]
    server_name: String,
    #[serde(rename = "serverProfile", default)]
    server_profile: String,
    #[serde(default)]
    tag: String,
    #[serde(rename = "captureDelay", default)]
    capture_delay: f64,
    #[serde(default)]
    addons: Vec<(String, serde_json::Value)>,
    #[serde(rename = "playableSlots")]
    playable_slots: [u32; 5],
    #[serde(rename = "sideFriendly")]
    side_friendly: [bool; 3],
}

/// Consumes two JSON blobs (world then mission) plus a trailing timestamp.
pub fn parse_new_mission(args: &[String]) -> Result<(World, Mission), IngestError> {
    require_argc("new_mission.args", args, 3)?;

    let world_raw = unquote(&args[0]);
    let world_json: WorldJson = serde_json::from_str(&world_raw)
        .map_err(|e| IngestError::parse("new_mission.world", e.to_string()))?;

    let mission_raw = unquote(&args[1]);
    let mission_json: MissionJson = serde_json::from_str(&mission_raw)
        .map_err(|e| IngestError::parse("new_mission.mission", e.to_string()))?;

    let time = parse_timestamp_ns("new_mission.time", &args[2])?;

    let world = World {
        id: None,
        name: world_json.world_name,
        name_original: world_json.world_name_original,
        display_name: world_json.display_name,
        workshop_id: world_json.workshop_id,
        author: world_json.author,
        world_size: world_json.world_size,
        latitude: world_json.latitude,
        longitude: world_json.longitude,
    };

    let addons = mission_json
        .addons
        .into_iter()
        .map(|(name, workshop_id)| {
            let workshop_id = match workshop_id {
                serde_json::Value::String(s) => WorkshopId::Text(s),
                serde_json::Value::Number(n) => WorkshopId::Number(n.as_i64().unwrap_or(0)),
                _ => WorkshopId::Number(0),
            };
            Addon { name, workshop_id }
        })
        .collect();

    let [east, west, independent, civilian, logic] = mission_json.playable_slots;
    let [east_west, east_independent, west_independent] = mission_json.side_friendly;

    let mission = Mission {
        id: None,
        world_id: None,
        name: mission_json.mission_name,
        briefing_name: mission_json.briefing_name,
        mission_name_source: mission_json.mission_name_source,
        on_load_name: mission_json.on_load_name,
        author: mission_json.author,
        server_name: mission_json.server_name,
        server_profile: mission_json.server_profile,
        tag: mission_json.tag,
        capture_delay: mission_json.capture_delay,
        addons,
        playable_slots: PlayableSlots {
            east,
            west,
            independent,
            civilian,
            logic,
        },
        side_friendly: SideFriendlyMatrix {
            east_west,
            east_independent,
            west_independent,
        },
        start_time_unix_nanos: time,
    };

    Ok((world, mission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bootstrap_example_from_spec() {
        let world = r#"{"worldName":"altis","displayName":"Altis","worldSize":30720,"latitude":-40,"longitude":20,"author":"BIS","workshopID":""}"#;
        let mission = r#"{"missionName":"T","briefingName":"B","author":"A","serverName":"S","tag":"TvT","captureDelay":1.0,"addons":[],"playableSlots":[10,10,5,0,2],"sideFriendly":[false,true,false]}"#;
        let args = vec![world.to_string(), mission.to_string(), "1700000000000000000".to_string()];

        let (world, mission) = parse_new_mission(&args).unwrap();
        assert_eq!(world.name, "altis");
        assert_eq!(world.name_original, "");
        assert_eq!(mission.name, "T");
        assert_eq!(mission.server_profile, "");
        assert_eq!(mission.playable_slots.east, 10);
        assert!(mission.side_friendly.east_independent);
        assert!(!mission.side_friendly.east_west);
    }

    #[test]
    fn missing_required_key_fails() {
        let world = r#"{"worldNameOriginal":"altis"}"#;
        let mission = r#"{"missionName":"T","briefingName":"B","author":"A","serverName":"S","playableSlots":[0,0,0,0,0],"sideFriendly":[false,false,false]}"#;
        let args = vec![world.to_string(), mission.to_string(), "1".to_string()];
        assert!(parse_new_mission(&args).is_err());
    }
}

//! Merges per-way result records into a road-network GeoJSON.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::InputError;
use crate::inputs::read_json;
use crate::model::WayResult;
use crate::orchestrator::result_path;

/// Adds `eaul-<upgradeId>` properties to every feature whose `NAME` has a
/// result record in `results`. Returns the names without a record.
pub fn merge_results(road_network: &mut Value, results: &Path) -> Result<Vec<String>, InputError> {
    let Some(features) = road_network
        .get_mut("features")
        .and_then(Value::as_array_mut)
    else {
        return Err(InputError::Config(
            "road network is not a feature collection".to_string(),
        ));
    };

    let mut missing = Vec::new();
    for feature in features {
        let Some(name) = feature["properties"]["NAME"].as_str().map(str::to_string) else {
            warn!("feature without NAME skipped");
            continue;
        };
        let path = result_path(results, &name);
        if !path.exists() {
            missing.push(name);
            continue;
        }
        let result: WayResult = read_json(&path)?;
        let Some(properties) = feature
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        else {
            warn!(name = %name, "feature without properties");
            continue;
        };
        for (upgrade, value) in result.eaul {
            properties.insert(format!("eaul-{}", upgrade), Value::from(value));
        }
    }
    Ok(missing)
}

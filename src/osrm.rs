//! OSRM HTTP adapter for duration tables and single routes.

use serde::Deserialize;

use crate::engine::{DurationMatrix, RouteSummary};
use crate::error::EngineError;
use crate::model::Coordinate;

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// All-pairs durations for `locations`, in the order given.
    pub fn table(&self, locations: &[Coordinate]) -> Result<DurationMatrix, EngineError> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration",
            self.config.base_url,
            self.config.profile,
            join_coordinates(locations)
        );

        let body: OsrmTableResponse = self.client.get(url).send()?.json()?;
        if body.code != "Ok" {
            return Err(EngineError::Response {
                code: body.code,
                message: body.message.unwrap_or_default(),
            });
        }

        let durations = body.durations.unwrap_or_default();
        if durations.len() != locations.len()
            || durations.iter().any(|row| row.len() != locations.len())
        {
            return Err(EngineError::MalformedTable {
                expected: locations.len(),
                rows: durations.len(),
            });
        }
        Ok(durations)
    }

    /// Fastest route between two points with the traversed node ids.
    pub fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteSummary, EngineError> {
        let url = format!(
            "{}/route/v1/{}/{}?overview=false&annotations=nodes",
            self.config.base_url,
            self.config.profile,
            join_coordinates(&[from, to])
        );

        // OSRM answers NoRoute/NoSegment with a 400 and a JSON body, so the
        // status is not checked before decoding.
        let body: OsrmRouteResponse = self.client.get(url).send()?.json()?;
        match body.code.as_str() {
            "Ok" => {}
            "NoRoute" | "NoSegment" => return Err(EngineError::Unroutable { from, to }),
            _ => {
                return Err(EngineError::Response {
                    code: body.code,
                    message: body.message.unwrap_or_default(),
                });
            }
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or(EngineError::Unroutable { from, to })?;
        let nodes = route
            .legs
            .into_iter()
            .filter_map(|leg| leg.annotation)
            .flat_map(|annotation| annotation.nodes)
            .map(|node| node.to_string())
            .collect();

        Ok(RouteSummary {
            duration: route.duration,
            nodes,
        })
    }

    /// Whether the server accepts requests yet. Any HTTP answer counts.
    pub fn is_ready(&self) -> bool {
        let url = format!(
            "{}/nearest/v1/{}/0,0",
            self.config.base_url, self.config.profile
        );
        self.client.get(url).send().is_ok()
    }
}

fn join_coordinates(locations: &[Coordinate]) -> String {
    locations
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    duration: f64,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    annotation: Option<OsrmAnnotation>,
}

#[derive(Debug, Deserialize)]
struct OsrmAnnotation {
    #[serde(default)]
    nodes: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_are_lon_lat() {
        let joined = join_coordinates(&[Coordinate::new(32.5, -25.9), Coordinate::new(33.0, -19.8)]);
        assert_eq!(joined, "32.500000,-25.900000;33.000000,-19.800000");
    }

    #[test]
    fn test_table_response_keeps_nulls() {
        let body: OsrmTableResponse = serde_json::from_str(
            r#"{"code":"Ok","durations":[[0,12.5],[null,0]]}"#,
        )
        .expect("parse table");
        let durations = body.durations.expect("durations");
        assert_eq!(durations[0][1], Some(12.5));
        assert_eq!(durations[1][0], None);
    }

    #[test]
    fn test_route_response_collects_nodes() {
        let body: OsrmRouteResponse = serde_json::from_str(
            r#"{"code":"Ok","routes":[{"duration":93.1,"legs":[{"annotation":{"nodes":[11,12,13]}}]}]}"#,
        )
        .expect("parse route");
        assert_eq!(body.routes[0].duration, 93.1);
        let nodes = body.routes[0].legs[0].annotation.as_ref().expect("annotation");
        assert_eq!(nodes.nodes, vec![11, 12, 13]);
    }

    #[test]
    fn test_error_response_without_routes() {
        let body: OsrmRouteResponse =
            serde_json::from_str(r#"{"code":"NoSegment","message":"Could not find a matching segment"}"#)
                .expect("parse error");
        assert_eq!(body.code, "NoSegment");
        assert!(body.routes.is_empty());
    }
}

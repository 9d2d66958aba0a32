use crate::core::sparql::{self, QueryResult};
use crate::core::store::TripleStore;
use crate::domain::model::{
    ContentItem, Facility, Term, ToolInfo, ToolResponse, Triple, RDF_TYPE,
};
use crate::domain::ports::ToolBackend;
use crate::utils::error::{ChatError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const EXECUTE_SPARQL: &str = "execute_sparql";
pub const COUNT_TRIPLES: &str = "count_triples";
pub const GET_CLASSES: &str = "get_classes";
pub const GET_PROPERTIES: &str = "get_properties";
pub const SEARCH_BY_TEXT: &str = "search_by_text";
pub const GET_SAMPLE_DATA: &str = "get_sample_data";
pub const GET_FACILITIES_NEAR: &str = "get_facilities_near";

/// SELECT 結果最多顯示的列數
const MAX_TABLE_ROWS: usize = 20;
const DEFAULT_RADIUS_KM: f64 = 50.0;
const EARTH_RADIUS_KM: f64 = 6371.0088;

fn tool(name: &str, description: &str, input_schema: Value) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// The fixed tool catalog exposed by the server.
pub fn tool_catalog() -> Vec<ToolInfo> {
    vec![
        tool(
            EXECUTE_SPARQL,
            "Execute a SPARQL query against the in-memory RDF store",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "SPARQL query to execute"}
                },
                "required": ["query"]
            }),
        ),
        tool(
            COUNT_TRIPLES,
            "Count the total number of triples in the RDF store",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            GET_CLASSES,
            "Get all classes (rdf:type) in the RDF store",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of classes to return", "default": 100}
                }
            }),
        ),
        tool(
            GET_PROPERTIES,
            "Get all properties used in the RDF store",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of properties to return", "default": 100}
                }
            }),
        ),
        tool(
            SEARCH_BY_TEXT,
            "Search for entities containing specific text",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to search for"},
                    "limit": {"type": "integer", "description": "Maximum number of results to return", "default": 50}
                },
                "required": ["text"]
            }),
        ),
        tool(
            GET_SAMPLE_DATA,
            "Get a sample of data from the RDF store",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of triples to return", "default": 10}
                }
            }),
        ),
        tool(
            GET_FACILITIES_NEAR,
            "Get facilities near a specific location",
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "Location name (e.g., 'Washington DC', 'Virginia')"},
                    "facility_type": {"type": "string", "description": "Optional facility type filter"},
                    "limit": {"type": "integer", "description": "Maximum number of results", "default": 20},
                    "lat": {"type": "number", "description": "Optional latitude for radius search"},
                    "lon": {"type": "number", "description": "Optional longitude for radius search"},
                    "radius_km": {"type": "number", "description": "Search radius in kilometres when lat/lon are given", "default": DEFAULT_RADIUS_KM}
                },
                "anyOf": [
                    {"required": ["location"]},
                    {"required": ["lat", "lon"]}
                ]
            }),
        ),
    ]
}

// ---- argument helpers ----

fn arg_str<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

/// 接受數字或數字字串 (模型常以字串傳遞 limit)
fn arg_usize(tool: &str, args: &Value, key: &str, default: usize) -> Result<usize> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ChatError::tool(tool, format!("'{}' must be a non-negative integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ChatError::tool(tool, format!("'{}' must be a non-negative integer", key))),
        Some(_) => Err(ChatError::tool(tool, format!("'{}' must be a non-negative integer", key))),
    }
}

fn arg_f64(tool: &str, args: &Value, key: &str) -> Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChatError::tool(tool, format!("'{}' must be a number", key))),
        Some(_) => Err(ChatError::tool(tool, format!("'{}' must be a number", key))),
    }
}

fn text(content: String) -> Vec<ContentItem> {
    vec![ContentItem::text(content)]
}

fn bullet_triples(triples: &[&Triple]) -> String {
    triples
        .iter()
        .map(|t| format!("• {}\n", t))
        .collect()
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Dispatches tool calls against a shared, read-only store.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    store: Arc<TripleStore>,
    catalog: Vec<ToolInfo>,
}

impl ToolRegistry {
    pub fn new(store: Arc<TripleStore>) -> Self {
        Self {
            store,
            catalog: tool_catalog(),
        }
    }

    pub fn store(&self) -> &TripleStore {
        &self.store
    }

    pub fn catalog(&self) -> &[ToolInfo] {
        &self.catalog
    }

    pub fn execute(&self, name: &str, args: &Value) -> Result<Vec<ContentItem>> {
        match name {
            EXECUTE_SPARQL => self.execute_sparql(args),
            COUNT_TRIPLES => Ok(self.count_triples()),
            GET_CLASSES => self.get_classes(args),
            GET_PROPERTIES => self.get_properties(args),
            SEARCH_BY_TEXT => self.search_by_text(args),
            GET_SAMPLE_DATA => self.get_sample_data(args),
            GET_FACILITIES_NEAR => self.get_facilities_near(args),
            _ => Err(ChatError::ToolNotFound {
                tool: name.to_string(),
                available: self.catalog.iter().map(|t| t.name.clone()).collect(),
            }),
        }
    }

    fn execute_sparql(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let query = arg_str(args, "query");
        if query.trim().is_empty() {
            return Err(ChatError::tool(EXECUTE_SPARQL, "Query cannot be empty"));
        }

        let result = sparql::query(&self.store, query)
            .map_err(|e| ChatError::tool(EXECUTE_SPARQL, format!("SPARQL query failed: {}", e)))?;

        match result {
            QueryResult::Ask(answer) => Ok(text(format!(
                "Query executed successfully. Results: {}",
                answer
            ))),
            QueryResult::Select { rows, .. } if rows.is_empty() => Ok(text(
                "Query executed successfully but returned no results.".to_string(),
            )),
            QueryResult::Select { vars, rows } => {
                let header = vars.join(" | ");
                let mut table = format!("Query Results ({} rows):\n\n", rows.len());
                table.push_str(&header);
                table.push('\n');
                table.push_str(&"-".repeat(header.chars().count()));
                table.push('\n');
                for row in rows.iter().take(MAX_TABLE_ROWS) {
                    let cells: Vec<&str> = row
                        .iter()
                        .map(|cell| cell.as_ref().map(Term::lexical).unwrap_or(""))
                        .collect();
                    table.push_str(&cells.join(" | "));
                    table.push('\n');
                }
                if rows.len() > MAX_TABLE_ROWS {
                    table.push_str(&format!(
                        "... and {} more rows\n",
                        rows.len() - MAX_TABLE_ROWS
                    ));
                }
                Ok(text(table))
            }
        }
    }

    fn count_triples(&self) -> Vec<ContentItem> {
        text(format!("Total triples in RDF store: {}", self.store.len()))
    }

    /// 依出現次數遞減排序；同次數保留首次出現順序
    fn ranked(mut counts: Vec<(String, usize)>, limit: usize) -> Vec<(String, usize)> {
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(limit);
        counts
    }

    fn count_by<'a>(items: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for item in items {
            let entry = counts.entry(item).or_insert(0);
            if *entry == 0 {
                order.push(item.to_string());
            }
            *entry += 1;
        }
        order
            .into_iter()
            .map(|k| {
                let n = counts.get(k.as_str()).copied().unwrap_or(0);
                (k, n)
            })
            .collect()
    }

    fn get_classes(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let limit = arg_usize(GET_CLASSES, args, "limit", 100)?;
        let rdf_type = Term::iri(RDF_TYPE);
        let classes = Self::ranked(
            Self::count_by(
                self.store
                    .matching(None, Some(&rdf_type), None)
                    .map(|t| t.object.lexical()),
            ),
            limit,
        );

        if classes.is_empty() {
            return Ok(text("No classes found".to_string()));
        }
        let mut out = "Classes in RDF store:\n\n".to_string();
        for (class, count) in classes {
            out.push_str(&format!("• {} ({} instances)\n", class, count));
        }
        Ok(text(out))
    }

    fn get_properties(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let limit = arg_usize(GET_PROPERTIES, args, "limit", 100)?;
        let properties = Self::ranked(
            Self::count_by(self.store.iter().map(|t| t.predicate.lexical())),
            limit,
        );

        if properties.is_empty() {
            return Ok(text("No properties found".to_string()));
        }
        let mut out = "Properties in RDF store:\n\n".to_string();
        for (property, count) in properties {
            out.push_str(&format!("• {} (used {} times)\n", property, count));
        }
        Ok(text(out))
    }

    fn search_by_text(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let needle = arg_str(args, "text");
        let limit = arg_usize(SEARCH_BY_TEXT, args, "limit", 50)?;
        if needle.is_empty() {
            return Err(ChatError::tool(SEARCH_BY_TEXT, "Search text cannot be empty"));
        }

        let lowered = needle.to_lowercase();
        let hits: Vec<&Triple> = self
            .store
            .iter()
            .filter(|t| t.object.lexical().to_lowercase().contains(&lowered))
            .take(limit)
            .collect();

        if hits.is_empty() {
            return Ok(text(format!("No results found for '{}'", needle)));
        }
        Ok(text(format!(
            "Search results for '{}' ({} found):\n\n{}",
            needle,
            hits.len(),
            bullet_triples(&hits)
        )))
    }

    fn get_sample_data(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let limit = arg_usize(GET_SAMPLE_DATA, args, "limit", 10)?;
        let sample: Vec<&Triple> = self.store.iter().take(limit).collect();

        if sample.is_empty() {
            return Ok(text("No sample data available".to_string()));
        }
        Ok(text(format!(
            "Sample data from RDF store ({} triples):\n\n{}",
            sample.len(),
            bullet_triples(&sample)
        )))
    }

    fn get_facilities_near(&self, args: &Value) -> Result<Vec<ContentItem>> {
        let location = arg_str(args, "location");
        let facility_type = arg_str(args, "facility_type");
        let limit = arg_usize(GET_FACILITIES_NEAR, args, "limit", 20)?;
        let lat = arg_f64(GET_FACILITIES_NEAR, args, "lat")?;
        let lon = arg_f64(GET_FACILITIES_NEAR, args, "lon")?;
        let radius_km = arg_f64(GET_FACILITIES_NEAR, args, "radius_km")?.unwrap_or(DEFAULT_RADIUS_KM);

        let type_matches = |f: &Facility| {
            facility_type.is_empty()
                || f.facility_type
                    .to_lowercase()
                    .contains(&facility_type.to_lowercase())
        };

        let (header, matches): (String, Vec<(Facility, Option<f64>)>) = match (lat, lon) {
            (Some(lat), Some(lon)) => {
                let mut hits: Vec<(Facility, Option<f64>)> = self
                    .store
                    .facilities()
                    .into_iter()
                    .filter(|f| type_matches(f))
                    .map(|f| {
                        let d = haversine_km(lat, lon, f.lat, f.lon);
                        (f, Some(d))
                    })
                    .filter(|(_, d)| d.is_some_and(|d| d <= radius_km))
                    .collect();
                hits.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                let place = if location.is_empty() {
                    format!("({}, {})", lat, lon)
                } else {
                    format!("'{}' ({}, {})", location, lat, lon)
                };
                (format!("Facilities within {} km of {}:\n\n", radius_km, place), hits)
            }
            (None, None) => {
                if location.is_empty() {
                    return Err(ChatError::tool(GET_FACILITIES_NEAR, "Location cannot be empty"));
                }
                let needle = location.to_lowercase();
                let mut hits: Vec<(Facility, Option<f64>)> = self
                    .store
                    .facilities()
                    .into_iter()
                    .filter(|f| {
                        f.state.to_lowercase().contains(&needle)
                            || f.city.to_lowercase().contains(&needle)
                            || f.name.to_lowercase().contains(&needle)
                    })
                    .filter(|f| type_matches(f))
                    .map(|f| (f, None))
                    .collect();
                hits.sort_by(|a, b| a.0.name.cmp(&b.0.name));
                let header = if facility_type.is_empty() {
                    format!("Facilities near '{}':\n\n", location)
                } else {
                    format!(
                        "Facilities of type '{}' near '{}':\n\n",
                        facility_type, location
                    )
                };
                (header, hits)
            }
            _ => {
                return Err(ChatError::tool(
                    GET_FACILITIES_NEAR,
                    "Both 'lat' and 'lon' are required for a radius search",
                ))
            }
        };

        if matches.is_empty() {
            let target = if location.is_empty() {
                "the given coordinates".to_string()
            } else {
                format!("'{}'", location)
            };
            return Ok(text(format!("No facilities found near {}", target)));
        }

        let mut out = header;
        for (f, distance) in matches.into_iter().take(limit) {
            out.push_str(&format!("📍 **{}**\n", f.name));
            out.push_str(&format!("   Type: {}\n", f.facility_type));
            out.push_str(&format!("   Location: {}, {}\n", f.city, f.state));
            out.push_str(&format!("   Coordinates: {}, {}\n", f.lat, f.lon));
            if let Some(d) = distance {
                out.push_str(&format!("   Distance: {:.1} km\n", d));
            }
            out.push('\n');
        }
        Ok(text(out))
    }
}

/// Error text reported back to callers, in the `Error executing tool` form.
pub fn tool_error_text(name: &str, err: &ChatError) -> String {
    let detail = match err {
        ChatError::ToolError { message, .. } => message.clone(),
        other => other.to_string(),
    };
    format!("Error executing tool '{}': {}", name, detail)
}

impl ToolRegistry {
    /// Runs a tool and folds failures into an error response.
    pub fn respond(&self, name: &str, args: &Value) -> ToolResponse {
        match self.execute(name, args) {
            Ok(content) => ToolResponse::ok(content),
            Err(e) => {
                tracing::error!("Tool call failed: {}, error: {}", name, e);
                ToolResponse::error(tool_error_text(name, &e))
            }
        }
    }
}

/// In-process backend, so the agent can run without the HTTP server.
#[async_trait]
impl ToolBackend for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        Ok(self.catalog.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResponse> {
        Ok(self.respond(name, &arguments))
    }
}

//! Knowledge-graph extraction from tool output and its rendering.
//!
//! Tool and agent text is scraped for triples in several loose formats,
//! assembled into an undirected graph and exported as Graphviz DOT, JSON or
//! a plain-text summary.

use crate::domain::model::{compact_iri, ToolResponse};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::OnceLock;

/// A triple in compact textual form, e.g. `geoint:pentagon rdf:type geoint:Facility`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl TextTriple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value)
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

fn facility_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"📍\s*\*\*([^*]+)\*\*")
}

fn relation_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\[([^\]]+)\]\s*----([^-]+)-+>\s*\[([^\]]+)\]")
}

fn property_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\[\s*----([^-]+)-+>\s*\[([^\]]+)\]\s*")
}

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"[^a-zA-Z0-9\s]")
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\s+")
}

const HEADER_WORDS: [&str; 6] = ["subject", "predicate", "object", "facility", "name", "type"];

// 已知實體名稱對應
const ENTITY_IRIS: [(&str, &str); 13] = [
    ("Pentagon", "geoint:pentagon"),
    ("Andrews AFB", "geoint:andrews_afb"),
    ("Norfolk NB", "geoint:norfolk_nb"),
    ("Fort Meade", "geoint:fort_meade"),
    ("White House", "geoint:white_house"),
    ("Government Building", "geoint:government_building"),
    ("Military Base", "geoint:military_base"),
    ("USA", "geoint:usa"),
    ("Virginia", "geoint:virginia"),
    ("Maryland", "geoint:maryland"),
    ("Arlington", "geoint:arlington"),
    ("Camp Springs", "geoint:camp_springs"),
    ("Norfolk", "geoint:norfolk"),
];

const MENTIONED_FACILITIES: [(&str, &str); 10] = [
    ("Pentagon", "geoint:pentagon"),
    ("White House", "geoint:white_house"),
    ("Joint Base Andrews", "geoint:andrews_afb"),
    ("Quantico", "geoint:quantico"),
    ("DCA Airport", "geoint:dca_airport"),
    ("Dulles", "geoint:iad_airport"),
    ("BWI", "geoint:bwi_airport"),
    ("Norfolk", "geoint:norfolk_nb"),
    ("Fort Belvoir", "geoint:fort_belvoir"),
    ("Capitol", "geoint:capitol_building"),
];

const MENTIONED_LOCATIONS: [(&str, &str); 4] = [
    ("Washington DC", "geoint:washington_dc"),
    ("Virginia", "geoint:virginia"),
    ("Maryland", "geoint:maryland"),
    ("Arlington", "geoint:arlington"),
];

/// Scrapes triples out of tool and agent text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TripleParser;

impl TripleParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_response(&self, response: &ToolResponse) -> Vec<TextTriple> {
        response
            .content
            .iter()
            .filter_map(|item| item.as_text())
            .flat_map(|text| self.parse_text(text))
            .collect()
    }

    pub fn parse_text(&self, text: &str) -> Vec<TextTriple> {
        let mut triples = self.parse_table(text);
        triples.extend(self.parse_facility_blocks(text));
        triples.extend(self.parse_arrows(text));
        triples.extend(self.parse_relations(text));
        triples.extend(self.parse_mentions(text));
        triples
    }

    /// Pipe tables with `subject | predicate | object` headers.
    fn parse_table(&self, text: &str) -> Vec<TextTriple> {
        let mut triples = Vec::new();
        let mut headers: Vec<String> = Vec::new();

        for (i, line) in text.lines().enumerate() {
            if !line.contains('|') || line.trim().starts_with('-') {
                continue;
            }
            let parts: Vec<&str> = line
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();

            if (i == 0 || headers.is_empty()) && parts.iter().any(|p| HEADER_WORDS.contains(p)) {
                headers = parts.iter().map(|p| p.to_string()).collect();
                continue;
            }

            if parts.len() < 3 || headers.is_empty() {
                continue;
            }
            let position = |name: &str| headers.iter().position(|h| h == name);
            let (Some(s), Some(p), Some(o)) =
                (position("subject"), position("predicate"), position("object"))
            else {
                continue;
            };
            let cell = |idx: usize| parts.get(idx).copied().unwrap_or("");
            let (subject, predicate, object) = (cell(s), cell(p), cell(o));
            if !subject.is_empty() && !predicate.is_empty() && !object.is_empty() {
                triples.push(TextTriple::new(
                    clean_term(subject),
                    clean_term(predicate),
                    clean_term(object),
                ));
            }
        }
        triples
    }

    /// `📍 **Name**` blocks followed by `Type:` / `Location:` / `Coordinates:` lines.
    fn parse_facility_blocks(&self, text: &str) -> Vec<TextTriple> {
        let headers: Vec<_> = facility_header().captures_iter(text).collect();
        let mut triples = Vec::new();

        for (i, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = name.as_str().trim();
            let body_end = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(text.len(), |m| m.start());
            let body = &text[whole.end()..body_end];
            let subject = slug_iri(name);

            triples.push(TextTriple::new(&subject, "rdf:type", "geoint:Facility"));
            triples.push(TextTriple::new(&subject, "rdfs:label", quoted(name)));

            for line in body.lines().map(str::trim) {
                if let Some(kind) = line.strip_prefix("Type:") {
                    triples.push(TextTriple::new(
                        &subject,
                        "geoint:facilityType",
                        quoted(kind.trim()),
                    ));
                } else if let Some(location) = line.strip_prefix("Location:") {
                    if let Some((city, state)) = location.trim().split_once(',') {
                        triples.push(TextTriple::new(&subject, "geoint:city", quoted(city.trim())));
                        triples.push(TextTriple::new(&subject, "geoint:state", quoted(state.trim())));
                    }
                } else if let Some(coords) = line.strip_prefix("Coordinates:") {
                    if let Some((lat, lon)) = coords.trim().split_once(',') {
                        triples.push(TextTriple::new(&subject, "geo:lat", lat.trim()));
                        triples.push(TextTriple::new(&subject, "geo:long", lon.trim()));
                    }
                }
            }
        }
        triples
    }

    /// `s → p → o` lines, optionally bulleted.
    fn parse_arrows(&self, text: &str) -> Vec<TextTriple> {
        text.lines()
            .map(str::trim)
            .filter(|line| line.contains('→'))
            .filter_map(|line| {
                let line = line.strip_prefix('•').map_or(line, str::trim);
                let parts: Vec<&str> = line.split('→').map(str::trim).collect();
                match parts.as_slice() {
                    [s, p, o] => Some(TextTriple::new(clean_term(s), clean_term(p), clean_term(o))),
                    _ => None,
                }
            })
            .collect()
    }

    /// `[s] ----p----> [o]` lines; indented `[----p---->[v]` lines attach to
    /// the most recent subject.
    fn parse_relations(&self, text: &str) -> Vec<TextTriple> {
        let mut triples: Vec<TextTriple> = relation_line()
            .captures_iter(text)
            .filter_map(|caps| {
                let (s, p, o) = (caps[1].trim(), caps[2].trim(), caps[3].trim());
                (!s.is_empty() && !p.is_empty() && !o.is_empty()).then(|| {
                    TextTriple::new(entity_iri(s), format!("geoint:{}", p), entity_iri(o))
                })
            })
            .collect();

        let mut current: Option<String> = None;
        for line in text.lines().map(str::trim) {
            if let Some(caps) = relation_line().captures(line) {
                current = Some(caps[1].trim().to_string());
                continue;
            }
            let Some(entity) = current.as_deref() else {
                continue;
            };
            if let Some(caps) = property_line().captures(line) {
                triples.push(TextTriple::new(
                    entity_iri(entity),
                    format!("geoint:{}", caps[1].trim()),
                    quoted(caps[2].trim()),
                ));
            }
        }
        triples
    }

    /// Known facility and place names mentioned anywhere in the text.
    fn parse_mentions(&self, text: &str) -> Vec<TextTriple> {
        let lower = text.to_lowercase();
        let mut triples = Vec::new();

        let groups = [
            (&MENTIONED_FACILITIES[..], "geoint:Facility"),
            (&MENTIONED_LOCATIONS[..], "geoint:Location"),
        ];
        for (names, class) in groups {
            for (name, iri) in names {
                if lower.contains(&name.to_lowercase()) {
                    triples.push(TextTriple::new(*iri, "rdf:type", class));
                    triples.push(TextTriple::new(*iri, "rdfs:label", quoted(name)));
                }
            }
        }
        triples
    }
}

/// Strips surrounding quotes and compacts known namespaces.
pub fn clean_term(term: &str) -> String {
    let term = term.trim();
    let term = term
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(term);
    compact_iri(term)
}

fn slug_iri(name: &str) -> String {
    let cleaned = non_word().replace_all(name, "");
    let slug = whitespace().replace_all(cleaned.trim(), "_").to_lowercase();
    format!("geoint:{}", slug)
}

fn entity_iri(name: &str) -> String {
    ENTITY_IRIS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, iri)| iri.to_string())
        .unwrap_or_else(|| slug_iri(name))
}

/// Title-cases each alphabetic run, as in `andrews afb` → `Andrews Afb`.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_alpha = false;
    for c in value.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn local_name(term: &str) -> &str {
    term.split_once(':').map_or(term, |(_, local)| local)
}

fn readable(term: &str) -> String {
    if term.contains(':') {
        title_case(&local_name(term).replace('_', " "))
    } else {
        term.to_string()
    }
}

pub fn predicate_label(predicate: &str) -> String {
    match local_name(predicate) {
        "type" => "is a".to_string(),
        "label" => "named".to_string(),
        "facilityType" => "type".to_string(),
        "state" => "in state".to_string(),
        "city" => "in city".to_string(),
        "lat" => "latitude".to_string(),
        "long" => "longitude".to_string(),
        other => title_case(&other.replace('_', " ")),
    }
}

pub fn node_color(node_type: &str) -> &'static str {
    match node_type {
        "Facility" => "#FF6B6B",
        "Location" => "#4ECDC4",
        "Government Building" => "#45B7D1",
        "Military Base" => "#96CEB4",
        "Airport" => "#FFEAA7",
        _ => "#DDA0DD",
    }
}

pub fn node_size(node_type: &str) -> u32 {
    match node_type {
        "Facility" => 25,
        "Location" => 20,
        "Government Building" => 30,
        "Military Base" => 28,
        "Airport" => 26,
        _ => 20,
    }
}

pub const UNKNOWN_TYPE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub properties: BTreeMap<String, String>,
}

impl GraphNode {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            label: id.trim_matches('"').to_string(),
            node_type: UNKNOWN_TYPE.to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn color(&self) -> &'static str {
        node_color(&self.node_type)
    }

    pub fn size(&self) -> u32 {
        node_size(&self.node_type)
    }

    /// Type line followed by the node's non-structural properties.
    pub fn tooltip(&self) -> String {
        let mut lines = vec![format!("Type: {}", self.node_type)];
        for (prop, value) in &self.properties {
            lines.push(format!(
                "{}: {}",
                title_case(&local_name(prop).replace('_', " ")),
                value.trim_matches('"')
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub predicate: String,
    pub label: String,
}

/// Undirected graph; one edge per node pair, the latest predicate wins.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    edge_index: HashMap<(String, String), usize>,
}

impl KnowledgeGraph {
    pub fn from_triples(triples: &[TextTriple]) -> Self {
        let mut graph = Self::default();
        for t in triples {
            graph.ensure_node(&t.subject);
            graph.ensure_node(&t.object);
            graph.add_edge(t);
        }
        graph.enrich(triples);
        graph
    }

    pub fn from_responses(responses: &[ToolResponse]) -> Self {
        let parser = TripleParser::new();
        let triples: Vec<TextTriple> = responses
            .iter()
            .flat_map(|r| parser.parse_response(r))
            .collect();
        Self::from_triples(&triples)
    }

    fn ensure_node(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.node_index.get(id) {
            return idx;
        }
        self.nodes.push(GraphNode::new(id));
        self.node_index.insert(id.to_string(), self.nodes.len() - 1);
        self.nodes.len() - 1
    }

    fn add_edge(&mut self, t: &TextTriple) {
        let key = if t.subject <= t.object {
            (t.subject.clone(), t.object.clone())
        } else {
            (t.object.clone(), t.subject.clone())
        };
        let edge = GraphEdge {
            source: t.subject.clone(),
            target: t.object.clone(),
            predicate: t.predicate.clone(),
            label: predicate_label(&t.predicate),
        };
        match self.edge_index.get(&key) {
            Some(&idx) => {
                let existing = &mut self.edges[idx];
                existing.predicate = edge.predicate;
                existing.label = edge.label;
            }
            None => {
                self.edges.push(edge);
                self.edge_index.insert(key, self.edges.len() - 1);
            }
        }
    }

    fn enrich(&mut self, triples: &[TextTriple]) {
        let mut seen_subjects = std::collections::HashSet::new();
        for t in triples {
            let Some(&idx) = self.node_index.get(&t.subject) else {
                continue;
            };
            let node = &mut self.nodes[idx];
            if seen_subjects.insert(t.subject.clone()) {
                node.label = readable(&t.subject);
            }
            match t.predicate.as_str() {
                "rdf:type" => node.node_type = readable(&t.object),
                "rdfs:label" => node.label = t.object.trim_matches('"').to_string(),
                _ => {
                    node.properties
                        .insert(t.predicate.clone(), t.object.clone());
                }
            }
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn display_label(&self, id: &str) -> String {
        self.node(id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Graphviz DOT rendering.
    pub fn to_dot(&self) -> String {
        let escape = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
        let mut out = String::from("graph knowledge {\n");
        out.push_str("  node [shape=ellipse, style=filled, fontname=\"Helvetica\"];\n");
        out.push_str("  edge [color=\"#888888\", penwidth=2];\n");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\", width={:.2}, tooltip=\"{}\"];",
                escape(&node.id),
                escape(&node.label),
                node.color(),
                node.size() as f64 / 20.0,
                escape(&node.tooltip())
            );
        }
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  \"{}\" -- \"{}\" [label=\"{}\"];",
                escape(&edge.source),
                escape(&edge.target),
                escape(&edge.label)
            );
        }
        out.push_str("}\n");
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes
            .iter()
            .map(|n| {
                serde_json::json!({
                    "id": n.id,
                    "label": n.label,
                    "type": n.node_type,
                    "color": n.color(),
                    "size": n.size(),
                    "title": n.tooltip(),
                    "properties": n.properties,
                })
            })
            .collect();
        serde_json::json!({ "nodes": nodes, "edges": self.edges })
    }

    /// 終端機顯示用的摘要
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No graph data to display".to_string();
        }

        let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
        for node in &self.nodes {
            *by_type.entry(node.node_type.as_str()).or_default() += 1;
        }

        let mut out = format!(
            "Knowledge graph: {} nodes, {} edges\n",
            self.nodes.len(),
            self.edges.len()
        );
        let types: Vec<String> = by_type
            .iter()
            .map(|(t, n)| format!("{} ({})", t, n))
            .collect();
        let _ = writeln!(out, "Node types: {}", types.join(", "));
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  {} --[{}]-- {}",
                self.display_label(&edge.source),
                edge.label,
                self.display_label(&edge.target)
            );
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct GraphContext {
    pub user_query: String,
    pub query_entities: Vec<String>,
    pub relevant_triples: Vec<TextTriple>,
}

fn query_entity_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"\b(?:washington\s*dc?|district\s*of\s*columbia)\b", "Washington DC"),
            (r"\bvirginia\b", "Virginia"),
            (r"\bmaryland\b", "Maryland"),
            (r"\bpentagon\b", "Pentagon"),
            (r"\bwhite\s*house\b", "White House"),
            (r"\bandrews\b", "Joint Base Andrews"),
            (r"\bquantico\b", "Quantico"),
            (r"\bdca\b", "DCA Airport"),
            (r"\bdulles\b", "Dulles"),
            (r"\bbwi\b", "BWI"),
            (r"\bnorfolk\b", "Norfolk"),
            (r"\bcapitol\b", "Capitol"),
            (r"\bmilitary\s*base", "Military Base"),
            (r"\bairport", "Airport"),
            (r"\bgovernment\s*building", "Government Building"),
        ]
        .into_iter()
        .filter_map(|(pattern, entity)| Regex::new(pattern).ok().map(|re| (re, entity)))
        .collect()
    })
}

/// Narrows parsed triples to the entities a question is about.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextExtractor {
    parser: TripleParser,
}

impl ContextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_entities(&self, query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        query_entity_patterns()
            .iter()
            .filter(|(re, _)| re.is_match(&lower))
            .map(|(_, entity)| entity.to_string())
            .collect()
    }

    pub fn extract(&self, user_query: &str, sources: &[ToolResponse]) -> GraphContext {
        let query_entities = self.query_entities(user_query);
        let triples: Vec<TextTriple> = sources
            .iter()
            .flat_map(|r| self.parser.parse_response(r))
            .collect();
        let relevant_triples = filter_relevant(triples, &query_entities);

        tracing::debug!(
            "Graph context: entities {:?}, {} relevant triples",
            query_entities,
            relevant_triples.len()
        );
        GraphContext {
            user_query: user_query.to_string(),
            query_entities,
            relevant_triples,
        }
    }
}

/// Direct entity matches plus one hop of neighbours; everything when no
/// entity was recognised.
fn filter_relevant(triples: Vec<TextTriple>, entities: &[String]) -> Vec<TextTriple> {
    if entities.is_empty() {
        return triples;
    }

    let needles: Vec<(String, String)> = entities
        .iter()
        .map(|e| {
            let lower = e.to_lowercase();
            let snake = lower.replace(' ', "_");
            (lower, snake)
        })
        .collect();

    let mut relevant: Vec<TextTriple> = Vec::new();
    let mut anchors = std::collections::HashSet::new();
    for t in &triples {
        let (s, o) = (t.subject.to_lowercase(), t.object.to_lowercase());
        let hit = needles
            .iter()
            .any(|(plain, snake)| s.contains(plain) || o.contains(plain) || s.contains(snake) || o.contains(snake));
        if hit {
            relevant.push(t.clone());
            anchors.insert(t.subject.clone());
            anchors.insert(t.object.clone());
        }
    }

    for t in triples {
        if (anchors.contains(&t.subject) || anchors.contains(&t.object)) && !relevant.contains(&t) {
            relevant.push(t);
        }
    }
    relevant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::TripleStore;
    use crate::core::tools::ToolRegistry;
    use serde_json::json;
    use std::sync::Arc;

    const FACILITY_TEXT: &str = "Facilities near 'Virginia':\n\n📍 **The Pentagon**\n   Type: Government Building\n   Location: Arlington, Virginia\n   Coordinates: 38.8719, -77.0563\n\n📍 **Fort Belvoir**\n   Type: Military Base\n   Location: Fort Belvoir, Virginia\n   Coordinates: 38.7034, -77.1364\n";

    fn has(triples: &[TextTriple], s: &str, p: &str, o: &str) -> bool {
        triples.contains(&TextTriple::new(s, p, o))
    }

    #[test]
    fn test_parse_facility_blocks() {
        let triples = TripleParser::new().parse_facility_blocks(FACILITY_TEXT);
        assert_eq!(triples.len(), 14);
        assert!(has(&triples, "geoint:the_pentagon", "rdfs:label", "\"The Pentagon\""));
        assert!(has(&triples, "geoint:the_pentagon", "geoint:state", "\"Virginia\""));
        assert!(has(&triples, "geoint:fort_belvoir", "geo:long", "-77.1364"));
    }

    #[test]
    fn test_parse_sparql_table() {
        let text = "Query Results (2 rows):\n\nsubject | predicate | object\n---------------------------\nhttp://example.org/geoint/pentagon | http://www.w3.org/2000/01/rdf-schema#label | \"The Pentagon\"\nhttp://example.org/geoint/quantico | http://example.org/geoint/state | Virginia\n";
        let triples = TripleParser::new().parse_table(text);
        assert_eq!(triples.len(), 2);
        assert_eq!(
            triples[0],
            TextTriple::new("geoint:pentagon", "rdfs:label", "The Pentagon")
        );
    }

    #[test]
    fn test_parse_arrows_and_relations() {
        let parser = TripleParser::new();
        let arrows = parser.parse_arrows(
            "• http://example.org/geoint/pentagon → http://example.org/geoint/city → \"Arlington\"\nnot → a triple",
        );
        assert_eq!(
            arrows,
            vec![TextTriple::new("geoint:pentagon", "geoint:city", "Arlington")]
        );

        let text = "[Pentagon] ----locatedIn----> [Virginia]\n    [----city---->[Arlington]\n";
        let relations = parser.parse_relations(text);
        assert!(has(&relations, "geoint:pentagon", "geoint:locatedIn", "geoint:virginia"));
        assert!(has(&relations, "geoint:pentagon", "geoint:city", "\"Arlington\""));
    }

    #[test]
    fn test_mentions_create_typed_nodes() {
        let triples = TripleParser::new().parse_mentions("Dulles is in Virginia");
        assert!(has(&triples, "geoint:iad_airport", "rdf:type", "geoint:Facility"));
        assert!(has(&triples, "geoint:virginia", "rdf:type", "geoint:Location"));
        assert_eq!(triples.len(), 4);
    }

    #[test]
    fn test_graph_enrichment() {
        let triples = TripleParser::new().parse_facility_blocks(FACILITY_TEXT);
        let graph = KnowledgeGraph::from_triples(&triples);

        let pentagon = graph.node("geoint:the_pentagon").unwrap();
        assert_eq!(pentagon.label, "The Pentagon");
        assert_eq!(pentagon.node_type, "Facility");
        assert_eq!(pentagon.color(), "#FF6B6B");
        assert_eq!(pentagon.size(), 25);
        assert!(pentagon.tooltip().contains("Facilitytype: Government Building"));

        let virginia = graph.node("\"Virginia\"").unwrap();
        assert_eq!(virginia.node_type, UNKNOWN_TYPE);
        assert_eq!(virginia.label, "Virginia");

        let edge = graph
            .edges()
            .iter()
            .find(|e| e.predicate == "geoint:city" && e.source == "geoint:the_pentagon")
            .unwrap();
        assert_eq!(edge.label, "in city");
    }

    #[test]
    fn test_undirected_edge_is_deduplicated() {
        let graph = KnowledgeGraph::from_triples(&[
            TextTriple::new("geoint:a", "geoint:near", "geoint:b"),
            TextTriple::new("geoint:b", "geoint:adjacent_to", "geoint:a"),
        ]);
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].label, "Adjacent To");
    }

    #[test]
    fn test_context_extractor_keeps_one_hop() {
        let triples = vec![
            TextTriple::new("geoint:pentagon", "geoint:state", "\"Virginia\""),
            TextTriple::new("geoint:pentagon", "rdfs:label", "\"The Pentagon\""),
            TextTriple::new("geoint:bwi_airport", "geoint:state", "\"Maryland\""),
        ];
        let extractor = ContextExtractor::new();
        let entities = extractor.query_entities("What is in Virginia?");
        assert_eq!(entities, vec!["Virginia"]);

        let relevant = filter_relevant(triples.clone(), &entities);
        assert_eq!(relevant.len(), 2);
        assert!(!relevant.iter().any(|t| t.subject == "geoint:bwi_airport"));

        assert_eq!(filter_relevant(triples, &[]).len(), 3);
    }

    #[test]
    fn test_graph_from_tool_output() {
        let registry = ToolRegistry::new(Arc::new(TripleStore::with_fixture()));
        let response = registry.respond(
            "get_facilities_near",
            &json!({"location": "Maryland", "facility_type": "Airport"}),
        );
        let graph = KnowledgeGraph::from_responses(&[response]);

        let bwi = graph
            .node("geoint:baltimorewashington_international_airport")
            .unwrap();
        assert_eq!(bwi.node_type, "Facility");

        let dot = graph.to_dot();
        assert!(dot.starts_with("graph knowledge {"));
        assert!(dot.contains("--"));

        let exported = graph.to_json();
        assert_eq!(
            exported["nodes"].as_array().unwrap().len(),
            graph.nodes().len()
        );
        assert!(graph.summary().starts_with("Knowledge graph:"));
    }

    #[test]
    fn test_empty_graph_summary() {
        assert_eq!(
            KnowledgeGraph::default().summary(),
            "No graph data to display"
        );
    }
}

use crate::domain::model::{
    Facility, Term, Triple, GEOINT_NS, GEO_NS, RDFS_LABEL, RDF_TYPE,
};
use std::collections::{HashMap, HashSet};

/// In-memory triple store. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TripleStore {
    triples: Vec<Triple>,
    seen: HashSet<Triple>,
}

impl TripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 載入 GEOINT 範例資料
    pub fn with_fixture() -> Self {
        let mut store = Self::new();
        let facilities = fixture_facilities();
        for facility in &facilities {
            store.add_facility(facility);
        }
        tracing::info!("Loaded {} facilities into in-memory RDF store", facilities.len());
        tracing::info!("Total triples in graph: {}", store.len());
        store
    }

    /// Returns false when the triple was already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        if self.seen.contains(&triple) {
            return false;
        }
        self.seen.insert(triple.clone());
        self.triples.push(triple);
        true
    }

    pub fn add_facility(&mut self, facility: &Facility) {
        let subject = Term::iri(facility.iri());
        let geoint = |local: &str| Term::iri(format!("{}{}", GEOINT_NS, local));
        let geo = |local: &str| Term::iri(format!("{}{}", GEO_NS, local));

        let facts = [
            (Term::iri(RDF_TYPE), geoint("Facility")),
            (Term::iri(RDFS_LABEL), Term::string(&facility.name)),
            (geoint("facilityType"), Term::string(&facility.facility_type)),
            (geoint("state"), Term::string(&facility.state)),
            (geoint("city"), Term::string(&facility.city)),
            (geo("lat"), Term::decimal(facility.lat)),
            (geo("long"), Term::decimal(facility.lon)),
            (geoint("facilityId"), Term::string(&facility.id)),
        ];
        for (predicate, object) in facts {
            self.insert(Triple::new(subject.clone(), predicate, object));
        }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.seen.contains(triple)
    }

    /// Pattern lookup; `None` matches anything.
    pub fn matching<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
    ) -> impl Iterator<Item = &'a Triple> + 'a {
        self.triples.iter().filter(move |t| {
            subject.map_or(true, |s| &t.subject == s)
                && predicate.map_or(true, |p| &t.predicate == p)
                && object.map_or(true, |o| &t.object == o)
        })
    }

    /// 從三元組重建設施紀錄
    pub fn facilities(&self) -> Vec<Facility> {
        let facility_class = Term::iri(format!("{}Facility", GEOINT_NS));
        let rdf_type = Term::iri(RDF_TYPE);

        let mut result = Vec::new();
        for typed in self.matching(None, Some(&rdf_type), Some(&facility_class)) {
            let mut props: HashMap<String, &Term> = HashMap::new();
            for t in self.matching(Some(&typed.subject), None, None) {
                props.insert(t.predicate.lexical().to_string(), &t.object);
            }
            let text = |iri: String| props.get(&iri).map(|t| t.lexical().to_string());
            let number = |iri: String| props.get(&iri).and_then(|t| t.as_f64());

            let (Some(name), Some(lat), Some(lon)) = (
                text(RDFS_LABEL.to_string()),
                number(format!("{}lat", GEO_NS)),
                number(format!("{}long", GEO_NS)),
            ) else {
                continue;
            };
            let id = typed
                .subject
                .lexical()
                .strip_prefix(GEOINT_NS)
                .unwrap_or(typed.subject.lexical())
                .to_string();

            result.push(Facility {
                id: text(format!("{}facilityId", GEOINT_NS)).unwrap_or(id),
                name,
                facility_type: text(format!("{}facilityType", GEOINT_NS)).unwrap_or_default(),
                lat,
                lon,
                state: text(format!("{}state", GEOINT_NS)).unwrap_or_default(),
                city: text(format!("{}city", GEOINT_NS)).unwrap_or_default(),
            });
        }
        result
    }
}

fn facility(
    id: &str,
    name: &str,
    facility_type: &str,
    lat: f64,
    lon: f64,
    state: &str,
    city: &str,
) -> Facility {
    Facility {
        id: id.to_string(),
        name: name.to_string(),
        facility_type: facility_type.to_string(),
        lat,
        lon,
        state: state.to_string(),
        city: city.to_string(),
    }
}

pub fn fixture_facilities() -> Vec<Facility> {
    vec![
        facility("pentagon", "The Pentagon", "Government Building", 38.8719, -77.0563, "Virginia", "Arlington"),
        facility("white_house", "White House", "Government Building", 38.8977, -77.0365, "Washington DC", "Washington"),
        facility("andrews_afb", "Joint Base Andrews", "Military Base", 38.7681, -76.8690, "Maryland", "Andrews"),
        facility("quantico", "Marine Corps Base Quantico", "Military Base", 38.5221, -77.3411, "Virginia", "Quantico"),
        facility("dca_airport", "Ronald Reagan Washington National Airport", "Airport", 38.8512, -77.0402, "Virginia", "Arlington"),
        facility("iad_airport", "Washington Dulles International Airport", "Airport", 38.9531, -77.4565, "Virginia", "Dulles"),
        facility("bwi_airport", "Baltimore/Washington International Airport", "Airport", 39.1774, -76.6684, "Maryland", "Baltimore"),
        facility("norfolk_nb", "Naval Station Norfolk", "Military Base", 36.9467, -76.2929, "Virginia", "Norfolk"),
        facility("fort_belvoir", "Fort Belvoir", "Military Base", 38.7034, -77.1364, "Virginia", "Fort Belvoir"),
        facility("capitol_building", "United States Capitol", "Government Building", 38.8899, -77.0091, "Washington DC", "Washington"),
    ]
}

//! OPeNDAP NetCDF collector.
//!
//! Lists the `*.nc` datasets of a Hyrax/THREDDS-style directory page and
//! reads each dataset's DAS (Dataset Attribute Structure), mapping the
//! ACDD attributes of its `NC_GLOBAL` container to DataCite.
//!
//! ```text
//! GET {url}            → <a itemprop="contentUrl" href="cast_001.nc.das"> …
//! GET {url}{uid}.das   → Attributes { NC_GLOBAL { String title "…"; … } }
//! ```
//!
//! File timestamps are not exposed by OPeNDAP, so `since` is ignored.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, warn};

use harvest_agent_core::collector::{Collector, RawRecord};
use harvest_agent_core::datacite;
use harvest_agent_core::metadata::{format_datetime, parse_datetime};
use harvest_agent_core::HarvestError;

pub const PROTOCOL: &str = "OPeNDAP-NetCDF";

const DATA_EXTENSIONS: [&str; 1] = [".nc"];

pub struct OpendapCollector {
    url: Url,
    client: Client,
    username: Option<String>,
    password: Option<String>,
}

impl OpendapCollector {
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let mut base = url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base).map_err(|e| {
            HarvestError::Configuration(format!("Invalid datasource URL '{}': {}", base, e))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::transport("Failed to build HTTP client", e))?;
        Ok(Self {
            url,
            client,
            username: username.filter(|u| !u.is_empty()),
            password,
        })
    }

    async fn request(&self, path: &str) -> Result<String, HarvestError> {
        let url = self
            .url
            .join(path)
            .map_err(|e| HarvestError::Configuration(format!("Invalid path '{}': {}", path, e)))?;
        let mut request = self.client.get(url.clone());
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::transport(format!("Error requesting {}", url), e))?
            .text()
            .await
            .map_err(|e| HarvestError::transport(format!("Error reading {}", url), e))
    }

    async fn datacite_for(&self, filename: &str) -> Result<Value, HarvestError> {
        let text = self.request(&format!("{}.das", filename)).await?;
        let das = parse_das(&text).map_err(|e| {
            HarvestError::response_format(format!(
                "Error parsing Data Attribute Structure for {}: {}",
                filename, e
            ))
        })?;
        let globals = das.get("NC_GLOBAL").ok_or_else(|| {
            HarvestError::response_format("'NC_GLOBAL' not found in Data Attribute Structure")
        })?;
        let href = self
            .url
            .join(filename)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.url, filename));
        netcdf_to_datacite(globals, &href)
    }
}

#[async_trait]
impl Collector for OpendapCollector {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn schema(&self) -> &str {
        datacite::SCHEMA
    }

    async fn list_records(
        &self,
        _since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>, HarvestError> {
        let page = self.request("").await?;
        let mut names = dataset_names(&page);
        if let Some(limit) = limit {
            names.truncate(limit);
        }
        debug!(url = %self.url, count = names.len(), "Found data files");
        Ok(names.into_iter().map(RawRecord::pending).collect())
    }

    async fn fetch_metadata(&self, uid: &str) -> Result<RawRecord, HarvestError> {
        match self.datacite_for(uid).await {
            Ok(metadata) => {
                debug!(uid, url = %self.url, "Fetched metadata");
                Ok(RawRecord::success(uid, metadata))
            }
            Err(e) => {
                warn!(uid, url = %self.url, "Error fetching metadata: {}", e);
                Ok(RawRecord::failed(uid, e.diagnostic()))
            }
        }
    }
}

/// Dataset file names linked from a directory page, sorted and unique.
pub fn dataset_names(page: &str) -> Vec<String> {
    let doc = Html::parse_document(page);
    let selector = match Selector::parse(r#"a[itemprop="contentUrl"][href]"#) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let names: BTreeSet<String> = doc
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            let lower = href.to_lowercase();
            DATA_EXTENSIONS
                .iter()
                .any(|ext| lower.ends_with(&format!("{}.das", ext)))
        })
        .map(|href| href[..href.len() - 4].to_string())
        .collect();
    names.into_iter().collect()
}

/// One attribute of a DAS container: its declared type and raw values.
#[derive(Debug, Clone, PartialEq)]
pub struct DasAttribute {
    pub kind: String,
    pub values: Vec<String>,
}

/// A DAS container; containers may nest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DasContainer {
    pub attributes: BTreeMap<String, DasAttribute>,
    pub containers: BTreeMap<String, DasContainer>,
}

impl DasContainer {
    /// First value of an attribute, trimmed; `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.attributes
            .get(name)
            .and_then(|a| a.values.first())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Semi,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let re = Regex::new(r#""(?:[^"\\]|\\.)*"|[{};,]|[^\s{};,"]+"#).map_err(|e| e.to_string())?;
    Ok(re
        .find_iter(text)
        .map(|m| match m.as_str() {
            "{" => Token::Open,
            "}" => Token::Close,
            ";" => Token::Semi,
            "," => Token::Comma,
            s if s.starts_with('"') => Token::Quoted(unescape(&s[1..s.len() - 1])),
            s => Token::Word(s.to_string()),
        })
        .collect())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a DAS document into its top-level containers.
pub fn parse_das(text: &str) -> Result<BTreeMap<String, DasContainer>, String> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    match tokens.first() {
        Some(Token::Word(w)) if w == "Attributes" => pos += 1,
        _ => return Err("document does not start with 'Attributes'".to_string()),
    }
    if tokens.get(pos) != Some(&Token::Open) {
        return Err("expected '{' after 'Attributes'".to_string());
    }
    pos += 1;
    let root = parse_container(&tokens, &mut pos)?;
    Ok(root.containers)
}

fn parse_container(tokens: &[Token], pos: &mut usize) -> Result<DasContainer, String> {
    let mut container = DasContainer::default();
    loop {
        match tokens.get(*pos) {
            None => return Err("unexpected end of document".to_string()),
            Some(Token::Close) => {
                *pos += 1;
                return Ok(container);
            }
            Some(Token::Word(first)) => {
                if tokens.get(*pos + 1) == Some(&Token::Open) {
                    *pos += 2;
                    let child = parse_container(tokens, pos)?;
                    container.containers.insert(first.clone(), child);
                    continue;
                }
                let name = match tokens.get(*pos + 1) {
                    Some(Token::Word(name)) => name.clone(),
                    _ => return Err(format!("attribute of type {} has no name", first)),
                };
                *pos += 2;
                let mut values = Vec::new();
                loop {
                    match tokens.get(*pos) {
                        Some(Token::Quoted(v)) | Some(Token::Word(v)) => values.push(v.clone()),
                        other => return Err(format!("expected value for {}, got {:?}", name, other)),
                    }
                    *pos += 1;
                    match tokens.get(*pos) {
                        Some(Token::Comma) => *pos += 1,
                        Some(Token::Semi) => {
                            *pos += 1;
                            break;
                        }
                        other => return Err(format!("expected ',' or ';' after {}, got {:?}", name, other)),
                    }
                }
                container.attributes.insert(
                    name,
                    DasAttribute {
                        kind: first.clone(),
                        values,
                    },
                );
            }
            Some(other) => return Err(format!("unexpected token {:?}", other)),
        }
    }
}

/// Map the ACDD global attributes of a NetCDF file to DataCite.
pub fn netcdf_to_datacite(nc: &DasContainer, href: &str) -> Result<Value, HarvestError> {
    let list = |field: &str, separator: char| -> Vec<String> {
        nc.attributes
            .get(field)
            .and_then(|a| a.values.first())
            .map(|v| v.split(separator).map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    };
    let related = |names: &[String], field: &str, name_field: &str| -> Result<Vec<String>, HarvestError> {
        let values = list(field, ';');
        if nc.attributes.contains_key(field) && values.len() != names.len() {
            return Err(HarvestError::InvalidMetadata(format!(
                "{} and {} must contain the same number of values separated by ;",
                name_field, field
            )));
        }
        Ok(values)
    };
    let time = |field: &str| -> Result<Option<chrono::NaiveDateTime>, HarvestError> {
        nc.text(field)
            .map(|v| {
                parse_datetime(&v).map_err(|_| {
                    HarvestError::InvalidMetadata(format!("Invalid date/time for {}", field))
                })
            })
            .transpose()
    };

    let mut dc = Map::new();
    dc.insert("resourceType".into(), json!("NetCDF"));
    dc.insert("resourceTypeGeneral".into(), json!("Dataset"));
    dc.insert(
        "additionalFields".into(),
        json!({"onlineResources": [{"href": href}]}),
    );

    if let Some(id) = nc.text("id") {
        dc.insert(
            "alternateIdentifiers".into(),
            json!([{"alternateIdentifier": id, "alternateIdentiferType": "DatasetID"}]),
        );
    }
    if let Some(title) = nc.text("title") {
        dc.insert("titles".into(), json!([{ "title": title }]));
    }
    if let Some(summary) = nc.text("summary") {
        dc.insert(
            "description".into(),
            json!([{"description": summary, "descriptionType": "Abstract"}]),
        );
    }

    let keywords = list("keywords", ',');
    if !keywords.is_empty() {
        let subjects: Vec<Value> = keywords.iter().map(|k| json!({ "subject": k })).collect();
        dc.insert("subjects".into(), Value::Array(subjects));
    }

    let creators = list("creator_name", ';');
    let creator_affiliations = related(&creators, "creator_institution", "creator_name")?;
    if !creators.is_empty() {
        dc.insert("creators".into(), people(&creators, &creator_affiliations, "creatorName"));
    }

    let contributors = list("contributor_name", ';');
    let contributor_affiliations =
        related(&contributors, "contributor_institution", "contributor_name")?;
    if !contributors.is_empty() {
        dc.insert(
            "contributors".into(),
            people(&contributors, &contributor_affiliations, "contributorName"),
        );
    }

    if let Some(publisher) = nc.text("publisher_name") {
        dc.insert("publisher".into(), json!(publisher));
    }
    if let Some(issued) = time("date_issued")? {
        dc.insert("publicationYear".into(), json!(issued.year()));
    }
    if let (Some(start), Some(end)) = (time("time_coverage_start")?, time("time_coverage_end")?) {
        dc.insert(
            "dates".into(),
            json!([{
                "date": format!("{}/{}", format_datetime(&start), format_datetime(&end)),
                "dateType": "Collected"
            }]),
        );
    }

    let bounds = [
        "geospatial_lat_min",
        "geospatial_lon_min",
        "geospatial_lat_max",
        "geospatial_lon_max",
    ]
    .map(|f| nc.text(f));
    if let [Some(lat1), Some(lon1), Some(lat2), Some(lon2)] = bounds {
        dc.insert(
            "geoLocations".into(),
            json!([{ "geoLocationBox": format!("{} {} {} {}", lat1, lon1, lat2, lon2) }]),
        );
    }

    Ok(Value::Object(dc))
}

fn people(names: &[String], affiliations: &[String], name_key: &str) -> Value {
    Value::Array(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut person = Map::new();
                person.insert(name_key.to_string(), json!(name));
                if let Some(affiliation) = affiliations.get(i) {
                    person.insert("affiliation".to_string(), json!(affiliation));
                }
                Value::Object(person)
            })
            .collect(),
    )
}

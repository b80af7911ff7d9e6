use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::ResolverError;

const CMIP6_FACETS: &[&str] = &[
    "mip_era",
    "activity_id",
    "institution_id",
    "source_id",
    "experiment_id",
    "variant_label",
    "table_id",
    "variable_id",
    "grid_label",
    "version",
];

const CORDEX_FACETS: &[&str] = &[
    "project",
    "product",
    "domain",
    "institute",
    "driving_model",
    "experiment",
    "ensemble",
    "rcm_name",
    "rcm_version",
    "time_frequency",
    "variable",
    "version",
];

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FacetTemplate {
    Cmip6,
    Cordex,
}

impl FacetTemplate {
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            FacetTemplate::Cmip6 => CMIP6_FACETS,
            FacetTemplate::Cordex => CORDEX_FACETS,
        }
    }

    pub fn for_project(project: &str) -> Result<Self, ResolverError> {
        match normalize_project(project).as_str() {
            "CMIP6" => Ok(FacetTemplate::Cmip6),
            "CORDEX" | "CORDEX-Reklies" | "CORDEX-ESD" | "CORDEX-Adjust" => {
                Ok(FacetTemplate::Cordex)
            }
            _ => Err(ResolverError::UnknownProject(project.to_string())),
        }
    }

    /// CORDEX records carry no `retracted` field, so filtering on it matches nothing.
    pub fn filters_retracted(&self) -> bool {
        matches!(self, FacetTemplate::Cmip6)
    }

    // CORDEX identifiers are often written without the trailing version.
    fn accepts_missing_version(&self) -> bool {
        matches!(self, FacetTemplate::Cordex)
    }
}

impl fmt::Display for FacetTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacetTemplate::Cmip6 => write!(f, "CMIP6"),
            FacetTemplate::Cordex => write!(f, "CORDEX"),
        }
    }
}

pub fn normalize_project(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "cmip6" => "CMIP6".to_string(),
        "cordex" => "CORDEX".to_string(),
        "cordex-reklies" => "CORDEX-Reklies".to_string(),
        "cordex-esd" => "CORDEX-ESD".to_string(),
        "cordex-adjust" => "CORDEX-Adjust".to_string(),
        _ => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FacetSet {
    template: FacetTemplate,
    values: Vec<String>,
}

impl FacetSet {
    pub fn parse(identifier: &str, fix_version: bool) -> Result<Self, ResolverError> {
        let mut values = identifier
            .trim()
            .split('.')
            .map(str::to_string)
            .collect::<Vec<_>>();
        let project = values.first().map(String::as_str).unwrap_or_default();
        let template = FacetTemplate::for_project(project)?;
        let expected = template.names().len();
        if values.len() + 1 == expected && template.accepts_missing_version() {
            values.push(WILDCARD.to_string());
        }
        if values.len() != expected {
            return Err(ResolverError::FacetCountMismatch {
                identifier: identifier.to_string(),
                template: template.to_string(),
                expected,
                found: values.len(),
            });
        }

        let facets = Self { template, values };
        Ok(if fix_version {
            facets.fix_version()
        } else {
            facets
        })
    }

    pub fn fix_version(mut self) -> Self {
        if let Some(position) = self.position("version") {
            let value = &mut self.values[position];
            if let Some(stripped) = value.strip_prefix('v') {
                *value = stripped.to_string();
            }
        }
        self
    }

    pub fn template(&self) -> FacetTemplate {
        self.template
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.values[i].as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.template
            .names()
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn project(&self) -> String {
        normalize_project(&self.values[0])
    }

    pub fn is_concrete(&self) -> bool {
        self.values
            .iter()
            .all(|value| value != WILDCARD && !value.contains(['[', ']']))
    }

    pub fn to_identifier(&self) -> String {
        self.values.join(".")
    }

    pub fn query_filters(&self) -> Vec<(String, String)> {
        let project = self.project();
        self.iter()
            .filter(|(_, value)| *value != WILDCARD)
            .filter(|(name, _)| !(project == "CORDEX-Reklies" && *name == "product"))
            .map(|(name, value)| {
                let value = if name == "project" {
                    project.clone()
                } else {
                    value.to_string()
                };
                (name.to_string(), value)
            })
            .collect()
    }

    pub fn matches(&self, other: &FacetSet) -> bool {
        if self.template != other.template {
            return false;
        }
        self.iter()
            .zip(other.iter())
            .all(|((name, pattern), (_, value))| match name {
                _ if pattern == WILDCARD => true,
                "version" => pattern.trim_start_matches('v') == value.trim_start_matches('v'),
                "project" | "mip_era" => normalize_project(pattern) == normalize_project(value),
                _ => pattern == value,
            })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.template.names().iter().position(|n| *n == name)
    }
}

impl fmt::Display for FacetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_identifier())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcreteIdentifier {
    id: String,
    facets: FacetSet,
}

impl ConcreteIdentifier {
    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn facets(&self) -> &FacetSet {
        &self.facets
    }
}

impl PartialOrd for ConcreteIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConcreteIdentifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for ConcreteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for ConcreteIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl FromStr for ConcreteIdentifier {
    type Err = ResolverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let facets = FacetSet::parse(value, false)?;
        if !facets.is_concrete() {
            return Err(ResolverError::MalformedPattern {
                pattern: value.to_string(),
                reason: "identifier still contains a wildcard or bracket group".to_string(),
            });
        }
        Ok(Self {
            id: facets.to_identifier(),
            facets,
        })
    }
}

/// The leftmost bracket group is the outer loop of the product.
pub fn expand(pattern: &str) -> Result<Vec<String>, ResolverError> {
    expand_from(pattern, pattern)
}

fn expand_from(original: &str, rest: &str) -> Result<Vec<String>, ResolverError> {
    let malformed = |reason: &str| ResolverError::MalformedPattern {
        pattern: original.to_string(),
        reason: reason.to_string(),
    };

    let Some(open) = rest.find('[') else {
        if rest.contains(']') {
            return Err(malformed("unmatched ']'"));
        }
        return Ok(vec![rest.to_string()]);
    };

    let prefix = &rest[..open];
    if prefix.contains(']') {
        return Err(malformed("unmatched ']'"));
    }
    let close = rest[open + 1..]
        .find(']')
        .map(|offset| open + 1 + offset)
        .ok_or_else(|| malformed("unclosed '['"))?;
    let group = &rest[open + 1..close];
    if group.contains('[') {
        return Err(malformed("nested bracket groups are not supported"));
    }

    let tails = expand_from(original, &rest[close + 1..])?;
    let mut expanded = Vec::new();
    for alternative in group.split(',') {
        let alternative = alternative
            .trim()
            .trim_matches(|ch| ch == '\'' || ch == '"')
            .trim();
        if alternative.is_empty() {
            return Err(malformed("empty alternative in bracket group"));
        }
        for tail in &tails {
            expanded.push(format!("{prefix}{alternative}{tail}"));
        }
    }
    Ok(expanded)
}

use crate::core::error::LookupError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const WILDCARD_TYPE: &str = "X";

/// Parameters for a bond or an angle term.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct BondParameters {
    pub force_constant: f64,
    pub ideal: f64,
}

/// Parameters for a dihedral or an improper term.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct DihedralParameters {
    pub force_constant: f64,
    pub multiplicity: i32,
    pub ideal: f64,
}

/// A source of bonded force-field parameters keyed by atom types.
///
/// Missing entries are reported as [`LookupError::NoParameters`] so that topology builders
/// can decide to skip the term instead of aborting.
pub trait ForceFieldParameters: Send + Sync {
    /// Bond parameters; the two types may match in either order.
    fn bond_parameters(&self, a: &str, b: &str) -> Result<BondParameters, LookupError>;

    /// Angle parameters; the types may match forward or reversed.
    fn angle_parameters(&self, a: &str, b: &str, c: &str) -> Result<BondParameters, LookupError>;

    /// Every dihedral term for the most specific matching pattern.
    fn dihedral_parameters(
        &self,
        a: &str,
        b: &str,
        c: &str,
        d: &str,
    ) -> Result<Vec<DihedralParameters>, LookupError>;

    /// The first most specific improper term.
    fn improper_parameters(
        &self,
        a: &str,
        b: &str,
        c: &str,
        d: &str,
    ) -> Result<DihedralParameters, LookupError>;
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct BondEntry {
    types: [String; 2],
    force_constant: f64,
    ideal: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct AngleEntry {
    types: [String; 3],
    force_constant: f64,
    ideal: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
struct DihedralEntry {
    types: [String; 4],
    force_constant: f64,
    multiplicity: i32,
    ideal: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParameterFile {
    #[serde(default)]
    bonds: Vec<BondEntry>,
    #[serde(default)]
    angles: Vec<AngleEntry>,
    #[serde(default)]
    dihedrals: Vec<DihedralEntry>,
    #[serde(default)]
    impropers: Vec<DihedralEntry>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

type DihedralPattern = [String; 4];

/// Bonded parameters loaded from a TOML table file.
///
/// ```toml
/// [[bonds]]
/// types = ["C", "N"]
/// force_constant = 370.0
/// ideal = 1.345
///
/// [[dihedrals]]
/// types = ["X", "C", "N", "X"]
/// force_constant = 2.5
/// multiplicity = 2
/// ideal = 180.0
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    bonds: HashMap<(String, String), BondParameters>,
    angles: HashMap<(String, String, String), BondParameters>,
    dihedrals: Vec<(DihedralPattern, DihedralParameters)>,
    impropers: Vec<(DihedralPattern, DihedralParameters)>,
}

fn bond_names(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn angle_names(a: &str, b: &str, c: &str) -> (String, String, String) {
    if a <= c {
        (a.to_string(), b.to_string(), c.to_string())
    } else {
        (c.to_string(), b.to_string(), a.to_string())
    }
}

fn slot_matches(pattern: &str, query: &str, allow_wildcards: bool) -> bool {
    pattern == query || (allow_wildcards && pattern == WILDCARD_TYPE)
}

fn pattern_matches(pattern: &DihedralPattern, query: [&str; 4], allow_wildcards: bool) -> bool {
    let forward = pattern
        .iter()
        .zip(query)
        .all(|(p, q)| slot_matches(p, q, allow_wildcards));
    let reverse = pattern
        .iter()
        .zip(query.iter().rev())
        .all(|(p, q)| slot_matches(p, q, allow_wildcards));
    forward || reverse
}

fn wildcard_count(pattern: &DihedralPattern) -> usize {
    pattern.iter().filter(|t| *t == WILDCARD_TYPE).count()
}

/// Index of the matching pattern with the fewest wildcards; ties go to the earliest entry.
fn find_most_specific(
    entries: &[(DihedralPattern, DihedralParameters)],
    query: [&str; 4],
) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, (pattern, _))| pattern_matches(pattern, query, true))
        .min_by_key(|(index, (pattern, _))| (wildcard_count(pattern), *index))
        .map(|(index, _)| index)
}

fn describe_types(types: &[&str]) -> String {
    types.join(", ")
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ParamLoadError> {
        Self::parse(content, "<memory>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ParamLoadError> {
        let file: ParameterFile = toml::from_str(content).map_err(|e| ParamLoadError::Toml {
            path: origin.to_string(),
            source: e,
        })?;

        let mut table = Self::new();
        for entry in file.bonds {
            let [a, b] = &entry.types;
            table.add_bond(a, b, entry.force_constant, entry.ideal);
        }
        for entry in file.angles {
            let [a, b, c] = &entry.types;
            table.add_angle(a, b, c, entry.force_constant, entry.ideal);
        }
        for entry in file.dihedrals {
            let params = dihedral_params(&entry);
            table.dihedrals.push((entry.types, params));
        }
        for entry in file.impropers {
            let params = dihedral_params(&entry);
            table.impropers.push((entry.types, params));
        }
        Ok(table)
    }

    pub fn add_bond(&mut self, a: &str, b: &str, force_constant: f64, ideal: f64) {
        self.bonds.insert(
            bond_names(a, b),
            BondParameters {
                force_constant,
                ideal,
            },
        );
    }

    pub fn add_angle(&mut self, a: &str, b: &str, c: &str, force_constant: f64, ideal: f64) {
        self.angles.insert(
            angle_names(a, b, c),
            BondParameters {
                force_constant,
                ideal,
            },
        );
    }

    pub fn add_dihedral(&mut self, types: [&str; 4], parameters: DihedralParameters) {
        self.dihedrals.push((types.map(str::to_string), parameters));
    }

    pub fn add_improper(&mut self, types: [&str; 4], parameters: DihedralParameters) {
        self.impropers.push((types.map(str::to_string), parameters));
    }

    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }
}

fn dihedral_params(entry: &DihedralEntry) -> DihedralParameters {
    DihedralParameters {
        force_constant: entry.force_constant,
        multiplicity: entry.multiplicity,
        ideal: entry.ideal,
    }
}

impl ForceFieldParameters for ParameterTable {
    fn bond_parameters(&self, a: &str, b: &str) -> Result<BondParameters, LookupError> {
        self.bonds
            .get(&bond_names(a, b))
            .copied()
            .ok_or_else(|| LookupError::NoParameters {
                kind: "bond",
                types: describe_types(&[a, b]),
            })
    }

    fn angle_parameters(&self, a: &str, b: &str, c: &str) -> Result<BondParameters, LookupError> {
        self.angles
            .get(&angle_names(a, b, c))
            .copied()
            .ok_or_else(|| LookupError::NoParameters {
                kind: "angle",
                types: describe_types(&[a, b, c]),
            })
    }

    fn dihedral_parameters(
        &self,
        a: &str,
        b: &str,
        c: &str,
        d: &str,
    ) -> Result<Vec<DihedralParameters>, LookupError> {
        let query = [a, b, c, d];
        let not_found = || LookupError::NoParameters {
            kind: "dihedral",
            types: describe_types(&query),
        };
        let best = find_most_specific(&self.dihedrals, query).ok_or_else(not_found)?;
        let pattern = &self.dihedrals[best].0;
        let exact = [
            pattern[0].as_str(),
            pattern[1].as_str(),
            pattern[2].as_str(),
            pattern[3].as_str(),
        ];
        Ok(self.dihedrals[best..]
            .iter()
            .filter(|(candidate, _)| pattern_matches(candidate, exact, false))
            .map(|(_, params)| *params)
            .collect())
    }

    fn improper_parameters(
        &self,
        a: &str,
        b: &str,
        c: &str,
        d: &str,
    ) -> Result<DihedralParameters, LookupError> {
        let query = [a, b, c, d];
        find_most_specific(&self.impropers, query)
            .map(|index| self.impropers[index].1)
            .ok_or_else(|| LookupError::NoParameters {
                kind: "improper",
                types: describe_types(&query),
            })
    }
}

//! Search space model: tunable parameters, sampled values, and their literal rendering.
//!
//! Every parameter has a finite domain. Categorical parameters enumerate their literal
//! choices; bounded integers enumerate `min, min + step, ..., <= max`. Samplers work on
//! domain indices, the mutator works on rendered literals.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Largest number of values an integer parameter may enumerate.
pub const MAX_INTEGER_DOMAIN: usize = 1 << 16;

/// A concrete sampled value for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Choice(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Choice(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Choice(value.to_string())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Parameter name → sampled value for one trial.
///
/// Immutable once built; keys iterate in lexicographic order so serialized trials are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment(BTreeMap<String, ParamValue>);

impl Assignment {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Ordered set of literal choices, rendered verbatim.
    Categorical { choices: Vec<String> },
    /// Integers `min..=max` with stride `step`, rendered as `<v>` or `<v> * <unit>`.
    Integer {
        min: i64,
        max: i64,
        step: i64,
        unit: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpaceParameter {
    pub name: String,
    /// Key token located in the artifact. Usually equal to `name`.
    pub anchor: String,
    pub kind: ParamKind,
}

impl SearchSpaceParameter {
    pub fn categorical<I, S>(name: &str, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            anchor: name.to_string(),
            kind: ParamKind::Categorical {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn integer(name: &str, min: i64, max: i64, step: i64) -> Self {
        Self {
            name: name.to_string(),
            anchor: name.to_string(),
            kind: ParamKind::Integer {
                min,
                max,
                step,
                unit: None,
            },
        }
    }

    pub fn with_anchor(mut self, anchor: &str) -> Self {
        self.anchor = anchor.to_string();
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        if let ParamKind::Integer { unit: slot, .. } = &mut self.kind {
            *slot = Some(unit.to_string());
        }
        self
    }

    /// Number of legal values; saturates at `usize::MAX` for ranges wider than `i64`.
    pub fn domain_size(&self) -> usize {
        match &self.kind {
            ParamKind::Categorical { choices } => choices.len(),
            ParamKind::Integer { min, max, step, .. } => {
                if max < min || *step <= 0 {
                    return 0;
                }
                match max.checked_sub(*min) {
                    Some(span) => usize::try_from(span / step)
                        .map_or(usize::MAX, |n| n.saturating_add(1)),
                    None => usize::MAX,
                }
            }
        }
    }

    /// Value at a domain index, or `None` when out of range.
    pub fn value_at(&self, index: usize) -> Option<ParamValue> {
        if index >= self.domain_size() {
            return None;
        }
        match &self.kind {
            ParamKind::Categorical { choices } => {
                choices.get(index).cloned().map(ParamValue::Choice)
            }
            ParamKind::Integer { min, step, .. } => Some(ParamValue::Int(min + step * index as i64)),
        }
    }

    /// Domain index of a value; `None` if the value is not legal for this parameter.
    ///
    /// A bare TOML integer matches the categorical choice with the same text, and a
    /// numeric string matches an integer parameter.
    pub fn index_of(&self, value: &ParamValue) -> Option<usize> {
        match (&self.kind, value) {
            (ParamKind::Categorical { choices }, ParamValue::Choice(choice)) => {
                choices.iter().position(|c| c == choice)
            }
            (ParamKind::Categorical { choices }, ParamValue::Int(v)) => {
                let text = v.to_string();
                choices.iter().position(|c| c.trim() == text)
            }
            (ParamKind::Integer { .. }, ParamValue::Int(v)) => self.integer_index(*v),
            (ParamKind::Integer { .. }, ParamValue::Choice(s)) => {
                self.integer_index(s.trim().parse().ok()?)
            }
        }
    }

    fn integer_index(&self, v: i64) -> Option<usize> {
        let ParamKind::Integer { min, max, step, .. } = &self.kind else {
            return None;
        };
        if *step <= 0 || v < *min || v > *max {
            return None;
        }
        let offset = v.checked_sub(*min)?;
        if offset % step != 0 {
            return None;
        }
        usize::try_from(offset / step).ok()
    }

    /// The domain's own spelling of `value`.
    pub fn canonical(&self, value: &ParamValue) -> Result<ParamValue> {
        self.index_of(value)
            .and_then(|index| self.value_at(index))
            .ok_or_else(|| anyhow!("value '{}' is not legal for parameter {}", value, self.name))
    }

    /// Literal text written into the artifact for `value`.
    pub fn render(&self, value: &ParamValue) -> Result<String> {
        let literal = match (&self.kind, self.canonical(value)?) {
            (ParamKind::Integer { unit: Some(unit), .. }, ParamValue::Int(v)) => {
                format!("{v} * {unit}")
            }
            (_, canonical) => canonical.to_string(),
        };
        Ok(literal)
    }
}

/// Validated, ordered collection of parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    params: Vec<SearchSpaceParameter>,
}

impl SearchSpace {
    pub fn new(params: Vec<SearchSpaceParameter>) -> Result<Self> {
        if params.is_empty() {
            bail!("search space must declare at least one parameter");
        }
        let mut names = HashSet::new();
        let mut anchors = HashSet::new();
        for param in &params {
            if param.name.trim().is_empty() {
                bail!("parameter name must be non-empty");
            }
            if !names.insert(param.name.as_str()) {
                bail!("duplicate parameter name {}", param.name);
            }
            if !anchors.insert(param.anchor.as_str()) {
                bail!("duplicate anchor {} (parameter {})", param.anchor, param.name);
            }
            if param.anchor.trim().is_empty() {
                bail!("{}: anchor must be non-empty", param.name);
            }
            match &param.kind {
                ParamKind::Categorical { choices } => {
                    if choices.is_empty() {
                        bail!("{}: choices must be non-empty", param.name);
                    }
                    if choices.iter().any(|c| c.trim().is_empty()) {
                        bail!("{}: choices must not contain empty literals", param.name);
                    }
                }
                ParamKind::Integer { min, max, step, .. } => {
                    if min > max {
                        bail!("{}: min ({min}) must be <= max ({max})", param.name);
                    }
                    if *step <= 0 {
                        bail!("{}: step must be > 0", param.name);
                    }
                    let size = param.domain_size();
                    if size > MAX_INTEGER_DOMAIN {
                        bail!(
                            "{}: range {min}..={max} step {step} has {} values; at most {MAX_INTEGER_DOMAIN} are allowed (raise `step`)",
                            param.name,
                            if size == usize::MAX { "too many".to_string() } else { size.to_string() },
                        );
                    }
                }
            }
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &[SearchSpaceParameter] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&SearchSpaceParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Ensure `assignment` names exactly the declared parameters, each with a legal value.
    pub fn check_assignment(&self, assignment: &Assignment) -> Result<()> {
        for (name, value) in assignment.iter() {
            let param = self
                .get(name)
                .ok_or_else(|| anyhow!("unknown parameter {name}"))?;
            if param.index_of(value).is_none() {
                bail!("value '{value}' is not legal for parameter {name}");
            }
        }
        for param in &self.params {
            if assignment.get(&param.name).is_none() {
                bail!("assignment is missing parameter {}", param.name);
            }
        }
        Ok(())
    }

    /// Validate `assignment` and respell every value the way the domain enumerates it.
    pub fn canonicalize(&self, assignment: &Assignment) -> Result<Assignment> {
        self.check_assignment(assignment)?;
        let mut values = Vec::with_capacity(assignment.len());
        for (name, value) in assignment.iter() {
            let param = self
                .get(name)
                .ok_or_else(|| anyhow!("unknown parameter {name}"))?;
            values.push((name.clone(), param.canonical(value)?));
        }
        Ok(values.into_iter().collect())
    }

    /// Render every assigned parameter to `(anchor, literal)` pairs in declaration order.
    pub fn render(&self, assignment: &Assignment) -> Result<Vec<(String, String)>> {
        let mut literals = Vec::with_capacity(assignment.len());
        for param in &self.params {
            if let Some(value) = assignment.get(&param.name) {
                literals.push((param.anchor.clone(), param.render(value)?));
            }
        }
        Ok(literals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_param() -> SearchSpaceParameter {
        SearchSpaceParameter::categorical("MinChunk", ["512 * KB", "1 * MB", "2 * MB"])
    }

    #[test]
    fn integer_domain_respects_step() {
        let param = SearchSpaceParameter::integer("TasksPerWorker", 2, 16, 4);
        assert_eq!(param.domain_size(), 4);
        assert_eq!(param.value_at(3), Some(ParamValue::Int(14)));
        assert_eq!(param.value_at(4), None);
        assert_eq!(param.index_of(&ParamValue::Int(10)), Some(2));
        assert_eq!(param.index_of(&ParamValue::Int(11)), None);
        assert_eq!(param.index_of(&ParamValue::Int(18)), None);
    }

    #[test]
    fn renders_integer_with_unit_suffix() {
        let param = SearchSpaceParameter::integer("WorkerBuffer", 32, 512, 32).with_unit("KB");
        assert_eq!(param.render(&ParamValue::Int(64)).expect("render"), "64 * KB");
        let plain = SearchSpaceParameter::integer("PerHostMax", 8, 128, 8);
        assert_eq!(plain.render(&ParamValue::Int(64)).expect("render"), "64");
    }

    #[test]
    fn render_rejects_illegal_values() {
        let param = chunk_param();
        assert_eq!(
            param.render(&ParamValue::from("1 * MB")).expect("render"),
            "1 * MB"
        );
        assert!(param.render(&ParamValue::from("3 * MB")).is_err());
        assert!(param.render(&ParamValue::Int(1)).is_err());
    }

    #[test]
    fn bare_integers_match_numeric_choices() {
        let hosts = SearchSpaceParameter::categorical("PerHostMax", ["8", "16", "32", "64"]);
        assert_eq!(hosts.index_of(&ParamValue::Int(64)), Some(3));
        assert_eq!(hosts.index_of(&ParamValue::Int(12)), None);
        assert_eq!(hosts.render(&ParamValue::Int(16)).expect("render"), "16");

        let buffer = SearchSpaceParameter::integer("WorkerBuffer", 32, 512, 32).with_unit("KB");
        assert_eq!(buffer.index_of(&ParamValue::from("64")), Some(1));
        assert_eq!(buffer.render(&ParamValue::from("64")).expect("render"), "64 * KB");
        assert_eq!(buffer.index_of(&ParamValue::from("64 * KB")), None);
    }

    #[test]
    fn canonicalize_respells_values_in_domain_form() {
        let space = SearchSpace::new(vec![
            SearchSpaceParameter::categorical("PerHostMax", ["32", "64"]),
            SearchSpaceParameter::integer("TasksPerWorker", 2, 16, 2),
        ])
        .expect("space");
        let loose: Assignment = [
            ("PerHostMax", ParamValue::Int(64)),
            ("TasksPerWorker", ParamValue::from("4")),
        ]
        .into_iter()
        .collect();
        let canonical = space.canonicalize(&loose).expect("canonicalize");
        assert_eq!(canonical.get("PerHostMax"), Some(&ParamValue::from("64")));
        assert_eq!(canonical.get("TasksPerWorker"), Some(&ParamValue::Int(4)));

        let illegal: Assignment = [
            ("PerHostMax", ParamValue::Int(48)),
            ("TasksPerWorker", ParamValue::Int(4)),
        ]
        .into_iter()
        .collect();
        assert!(space.canonicalize(&illegal).is_err());
    }

    #[test]
    fn oversized_integer_ranges_are_rejected() {
        let err = SearchSpace::new(vec![SearchSpaceParameter::integer("x", 1, 1 << 30, 1)])
            .unwrap_err();
        assert!(err.to_string().contains("raise `step`"), "{err}");

        let err = SearchSpace::new(vec![SearchSpaceParameter::integer("x", i64::MIN, i64::MAX, 1)])
            .unwrap_err();
        assert!(err.to_string().contains("too many"), "{err}");

        let param = SearchSpaceParameter::integer("x", i64::MIN, i64::MAX, 1);
        assert_eq!(param.domain_size(), usize::MAX);
        assert_eq!(param.index_of(&ParamValue::Int(0)), None);

        let err = SearchSpace::new(vec![SearchSpaceParameter::integer("x", 0, 1 << 20, 16)])
            .unwrap_err();
        assert!(err.to_string().contains("65537 values"), "{err}");
        SearchSpace::new(vec![SearchSpaceParameter::integer("x", 0, 1 << 20, 32)])
            .expect("32769 values fit");
    }

    #[test]
    fn space_rejects_duplicates_and_bad_ranges() {
        let err = SearchSpace::new(vec![chunk_param(), chunk_param()]).unwrap_err();
        assert!(err.to_string().contains("duplicate parameter name"));

        let err = SearchSpace::new(vec![SearchSpaceParameter::integer("x", 5, 1, 1)]).unwrap_err();
        assert!(err.to_string().contains("min (5) must be <= max (1)"));

        let err = SearchSpace::new(vec![SearchSpaceParameter::integer("x", 1, 5, 0)]).unwrap_err();
        assert!(err.to_string().contains("step must be > 0"));

        let err = SearchSpace::new(vec![SearchSpaceParameter::categorical(
            "x",
            Vec::<String>::new(),
        )])
        .unwrap_err();
        assert!(err.to_string().contains("choices must be non-empty"));
    }

    #[test]
    fn check_assignment_requires_every_parameter() {
        let space = SearchSpace::new(vec![
            chunk_param(),
            SearchSpaceParameter::integer("PerHostMax", 8, 128, 8),
        ])
        .expect("space");

        let full: Assignment = [
            ("MinChunk", ParamValue::from("1 * MB")),
            ("PerHostMax", ParamValue::Int(64)),
        ]
        .into_iter()
        .collect();
        space.check_assignment(&full).expect("valid");

        let partial: Assignment = [("MinChunk", "1 * MB")].into_iter().collect();
        let err = space.check_assignment(&partial).unwrap_err();
        assert!(err.to_string().contains("missing parameter PerHostMax"));

        let unknown: Assignment = [
            ("MinChunk", ParamValue::from("1 * MB")),
            ("PerHostMax", ParamValue::Int(64)),
            ("Bogus", ParamValue::Int(1)),
        ]
        .into_iter()
        .collect();
        assert!(space.check_assignment(&unknown).is_err());
    }

    #[test]
    fn render_uses_anchor_and_declaration_order() {
        let space = SearchSpace::new(vec![
            SearchSpaceParameter::integer("hosts", 8, 128, 8).with_anchor("PerHostMax"),
            chunk_param(),
        ])
        .expect("space");
        let assignment: Assignment = [
            ("MinChunk", ParamValue::from("2 * MB")),
            ("hosts", ParamValue::Int(16)),
        ]
        .into_iter()
        .collect();

        let literals = space.render(&assignment).expect("render");
        assert_eq!(
            literals,
            vec![
                ("PerHostMax".to_string(), "16".to_string()),
                ("MinChunk".to_string(), "2 * MB".to_string()),
            ]
        );
    }

    #[test]
    fn assignment_serializes_as_flat_map() {
        let assignment: Assignment = [
            ("MinChunk", ParamValue::from("1 * MB")),
            ("PerHostMax", ParamValue::Int(64)),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&assignment).expect("serialize");
        assert_eq!(json, r#"{"MinChunk":"1 * MB","PerHostMax":64}"#);
        let back: Assignment = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, assignment);
    }
}

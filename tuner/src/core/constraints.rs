//! Feasibility constraints checked before paying for a build.
//!
//! Constraints compare the magnitudes of two rendered literals. A literal is a
//! product of integer terms and unit names (`512 * KB`, `2`, `4 * MB`), evaluated
//! against a unit table.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::space::{Assignment, SearchSpace};

/// Unit name → multiplier (e.g. `KB = 1024`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Units(BTreeMap<String, u64>);

impl Default for Units {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("B".to_string(), 1),
            ("KB".to_string(), 1 << 10),
            ("MB".to_string(), 1 << 20),
            ("GB".to_string(), 1 << 30),
        ]))
    }
}

impl Units {
    pub fn new(table: BTreeMap<String, u64>) -> Self {
        Self(table)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Evaluate a literal such as `16 * MB` to its magnitude.
    pub fn magnitude(&self, literal: &str) -> Result<u64> {
        let mut total: u64 = 1;
        for term in literal.split('*') {
            let term = term.trim();
            if term.is_empty() {
                bail!("empty term in literal '{literal}'");
            }
            let factor = if term.starts_with(|c: char| c.is_ascii_digit()) {
                term.replace('_', "")
                    .parse::<u64>()
                    .with_context(|| format!("parse '{term}' in literal '{literal}'"))?
            } else {
                self.get(term)
                    .ok_or_else(|| anyhow!("unknown unit '{term}' in literal '{literal}'"))?
            };
            total = total
                .checked_mul(factor)
                .ok_or_else(|| anyhow!("literal '{literal}' overflows"))?;
        }
        Ok(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, left: u64, right: u64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }

    /// Operator that describes a violation of `self`.
    fn negated_symbol(self) -> &'static str {
        match self {
            Self::Lt => ">=",
            Self::Le => ">",
            Self::Gt => "<=",
            Self::Ge => "<",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// Ordering invariant between two parameters: `left <op> right`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub left: String,
    pub op: Comparison,
    pub right: String,
}

impl Constraint {
    pub fn new(left: &str, op: Comparison, right: &str) -> Self {
        Self {
            left: left.to_string(),
            op,
            right: right.to_string(),
        }
    }

    /// Returns the violation message, or `None` when the constraint holds.
    ///
    /// Parameters absent from `assignment` leave the constraint vacuously satisfied.
    pub fn violation(
        &self,
        space: &SearchSpace,
        units: &Units,
        assignment: &Assignment,
    ) -> Result<Option<String>> {
        let (Some(left), Some(right)) = (
            rendered(space, assignment, &self.left)?,
            rendered(space, assignment, &self.right)?,
        ) else {
            return Ok(None);
        };
        let left_mag = units.magnitude(&left)?;
        let right_mag = units.magnitude(&right)?;
        if self.op.holds(left_mag, right_mag) {
            return Ok(None);
        }
        Ok(Some(format!(
            "{} ({}) {} {} ({})",
            self.left,
            left,
            self.op.negated_symbol(),
            self.right,
            right
        )))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

fn rendered(space: &SearchSpace, assignment: &Assignment, name: &str) -> Result<Option<String>> {
    let param = space
        .get(name)
        .ok_or_else(|| anyhow!("constraint references unknown parameter {name}"))?;
    assignment
        .get(name)
        .map(|value| param.render(value))
        .transpose()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feasibility {
    Feasible,
    Infeasible { reason: String },
}

/// Check every constraint; all violations are reported together.
pub fn check_feasibility(
    constraints: &[Constraint],
    space: &SearchSpace,
    units: &Units,
    assignment: &Assignment,
) -> Result<Feasibility> {
    let mut violations = Vec::new();
    for constraint in constraints {
        if let Some(reason) = constraint
            .violation(space, units, assignment)
            .with_context(|| format!("check constraint {constraint}"))?
        {
            violations.push(reason);
        }
    }
    if violations.is_empty() {
        return Ok(Feasibility::Feasible);
    }
    Ok(Feasibility::Infeasible {
        reason: violations.join("; "),
    })
}

/// Validate constraints against a space: names must exist and every literal of a
/// compared parameter must evaluate under `units`.
pub fn validate_constraints(
    constraints: &[Constraint],
    space: &SearchSpace,
    units: &Units,
) -> Result<()> {
    for constraint in constraints {
        for name in [&constraint.left, &constraint.right] {
            let param = space.get(name).ok_or_else(|| {
                anyhow!("constraint {constraint} references unknown parameter {name}")
            })?;
            for index in 0..param.domain_size() {
                if let Some(value) = param.value_at(index) {
                    let literal = param.render(&value)?;
                    units
                        .magnitude(&literal)
                        .with_context(|| format!("constraint {constraint}"))?;
                }
            }
        }
    }
    Ok(())
}

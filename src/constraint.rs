//! Version constraint expressions and per-workload dependency sets
//!
//! An expression is a list of clauses separated by `,`. Every clause must
//! hold. A clause is a list of alternatives separated by `||`, any one of
//! which may hold, and an alternative is a whitespace-separated list of
//! comparators that must all hold:
//!
//! ```text
//! >=1.0.0 <2.0.0, !=1.4.2 || ^3.0
//! ```
//!
//! The comma is the merge operator for constraints coming from different
//! containers, so `a,b` always means "a and b" regardless of what `a` and
//! `b` contain.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::str::FromStr;

use semver::Comparator;

use crate::version::Version;
use crate::Error;

/// Separator between independently merged sub-expressions
pub const CLAUSE_SEPARATOR: char = ',';

const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '~', '^'];

/// A parsed constraint expression
#[derive(Clone, Debug)]
pub struct Constraint {
    expr: String,
    clauses: Vec<Clause>,
}

#[derive(Clone, Debug)]
struct Clause {
    text: String,
    alternatives: Vec<Vec<Predicate>>,
}

#[derive(Clone, Debug)]
enum Predicate {
    Any,
    Matches(Comparator),
    Excludes(Comparator),
}

impl Constraint {
    /// Parse a constraint expression
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let clauses = expr
            .split(CLAUSE_SEPARATOR)
            .map(|text| parse_clause(expr, text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expr: expr.to_string(),
            clauses,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Whether every clause accepts `version`
    pub fn matches(&self, version: Version) -> bool {
        self.first_unsatisfied(version).is_none()
    }

    /// The first clause, in written order, that rejects `version`
    pub fn first_unsatisfied(&self, version: Version) -> Option<&str> {
        let version = version.to_semver();
        self.clauses
            .iter()
            .find(|clause| !clause.matches(&version))
            .map(|clause| clause.text.as_str())
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl Clause {
    fn matches(&self, version: &semver::Version) -> bool {
        self.alternatives
            .iter()
            .any(|predicates| predicates.iter().all(|p| p.matches(version)))
    }
}

impl Predicate {
    fn matches(&self, version: &semver::Version) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Matches(cmp) => cmp.matches(version),
            Predicate::Excludes(cmp) => !cmp.matches(version),
        }
    }
}

fn parse_clause(expr: &str, text: &str) -> Result<Clause, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::malformed_constraint(expr, "empty clause"));
    }

    let alternatives = text
        .split("||")
        .map(|alt| parse_alternative(expr, alt))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Clause {
        text: text.to_string(),
        alternatives,
    })
}

fn parse_alternative(expr: &str, text: &str) -> Result<Vec<Predicate>, Error> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(Error::malformed_constraint(expr, "empty alternative"));
    }

    let mut predicates = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        // Hyphen range: `1.2 - 1.4.5`
        if tokens.get(i + 1) == Some(&"-") {
            let upper = tokens
                .get(i + 2)
                .ok_or_else(|| Error::malformed_constraint(expr, "hyphen range without upper bound"))?;
            predicates.push(parse_comparator(expr, ">=", tokens[i])?);
            predicates.push(parse_comparator(expr, "<=", upper)?);
            i += 3;
            continue;
        }

        // An operator may be separated from its version: `>= 1.2`
        let token = tokens[i];
        let (op, version) = if token.chars().all(|c| OPERATOR_CHARS.contains(&c)) {
            let version = tokens.get(i + 1).ok_or_else(|| {
                Error::malformed_constraint(expr, format!("operator '{token}' without version"))
            })?;
            i += 2;
            (token, *version)
        } else {
            i += 1;
            let split = token
                .find(|c: char| !OPERATOR_CHARS.contains(&c))
                .unwrap_or(token.len());
            token.split_at(split)
        };

        predicates.push(parse_comparator(expr, op, version)?);
    }

    Ok(predicates)
}

fn parse_comparator(expr: &str, op: &str, version: &str) -> Result<Predicate, Error> {
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);
    if version.is_empty() {
        return Err(Error::malformed_constraint(expr, format!("operator '{op}' without version")));
    }

    // Wildcard components end the version: `1.2.x` is the partial `1.2`
    let components: Vec<&str> = version
        .split('.')
        .take_while(|c| !matches!(*c, "x" | "X" | "*"))
        .collect();
    if components.is_empty() {
        return Ok(Predicate::Any);
    }
    let version = components
        .iter()
        .map(|c| strip_leading_zeros(c))
        .collect::<Vec<_>>()
        .join(".");

    let (negate, op) = match op {
        "" | "=" | "==" => (false, "="),
        "!=" => (true, "="),
        "~>" => (false, "~"),
        "=>" => (false, ">="),
        "=<" => (false, "<="),
        ">" | ">=" | "<" | "<=" | "~" | "^" => (false, op),
        other => {
            return Err(Error::malformed_constraint(
                expr,
                format!("unknown operator '{other}'"),
            ))
        }
    };

    let comparator = Comparator::parse(&format!("{op}{version}"))
        .map_err(|e| Error::malformed_constraint(expr, e))?;

    Ok(if negate {
        Predicate::Excludes(comparator)
    } else {
        Predicate::Matches(comparator)
    })
}

/// `05` is `5`; components carrying a suffix (`3-rc.1`) are left to semver
fn strip_leading_zeros(component: &str) -> &str {
    if component.len() > 1 && component.bytes().all(|b| b.is_ascii_digit()) {
        let trimmed = component.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    } else {
        component
    }
}

/// Dependency constraints a workload declares, keyed by target service name
///
/// Built up by [`Dependencies::merge`], which appends rather than replaces,
/// so a target declared by several containers carries all of their
/// expressions joined with `,`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependencies(BTreeMap<String, String>);

impl Dependencies {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `expr` for `target`, AND-ing it with anything already declared
    pub fn merge(&mut self, target: impl Into<String>, expr: impl Into<String>) {
        let expr = expr.into();
        match self.0.entry(target.into()) {
            btree_map::Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                merged.push(CLAUSE_SEPARATOR);
                merged.push_str(&expr);
            }
            btree_map::Entry::Vacant(entry) => {
                entry.insert(expr);
            }
        }
    }

    /// Merged expression for `target`
    pub fn get(&self, target: &str) -> Option<&str> {
        self.0.get(target).map(String::as_str)
    }

    /// Iterate `(target, expression)` pairs in target order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no dependency is declared
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dependencies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut deps = Self::new();
        for (target, expr) in iter {
            deps.merge(target, expr);
        }
        deps
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Dependencies {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (target, expr) in iter {
            self.merge(target, expr);
        }
    }
}

/// Expansion of the `GENERATE()` directive: one or more range assignments,
/// each binding a name to a sequence of tokens (an explicit list or a
/// numeric range), expanded as a Cartesian product over a template string
/// containing `${name}` references.
use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("duplicate opcode generated by GENERATE(): {0}")]
    NameCollision(String),
    #[error("empty range assignment for {0}")]
    EmptyRange(String),
}

#[derive(Debug, Clone)]
pub struct RangeAssignment {
    pub name: String,
    pub tokens: Vec<String>,
}

impl RangeAssignment {
    pub fn from_list(name: &str, tokens: &[&str]) -> Self {
        Self { name: name.to_string(), tokens: tokens.iter().map(|s| s.to_string()).collect() }
    }

    pub fn from_numeric_range(name: &str, start: i64, end_inclusive: i64) -> Self {
        let tokens = (start..=end_inclusive).map(|n| n.to_string()).collect();
        Self { name: name.to_string(), tokens }
    }
}

/// Expand `template` (containing `${name}` placeholders) across the
/// Cartesian product of `assignments`, returning one substituted string per
/// tuple. Detects duplicate outputs (a name collision between generated
/// declarations) as an error rather than silently overwriting one.
pub fn expand(assignments: &[RangeAssignment], template: &str) -> Result<Vec<String>, GenerateError> {
    for a in assignments {
        if a.tokens.is_empty() {
            return Err(GenerateError::EmptyRange(a.name.clone()));
        }
    }

    let mut tuples: Vec<Vec<&str>> = vec![Vec::new()];
    for assignment in assignments {
        let mut next = Vec::with_capacity(tuples.len() * assignment.tokens.len());
        for prefix in &tuples {
            for tok in &assignment.tokens {
                let mut extended = prefix.clone();
                extended.push(tok.as_str());
                next.push(extended);
            }
        }
        tuples = next;
    }

    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let mut rendered = template.to_string();
        for (assignment, value) in assignments.iter().zip(tuple.iter()) {
            rendered = rendered.replace(&format!("${{{}}}", assignment.name), value);
        }
        if !seen.insert(rendered.clone()) {
            return Err(GenerateError::NameCollision(rendered));
        }
        results.push(rendered);
    }
    Ok(results)
}

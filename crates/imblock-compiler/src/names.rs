//! Identifier allocation for generated code
//!
//! Workspace variable names are free text; generated code needs identifiers
//! that are valid, unique, and never collide with keywords or primitive
//! names. Clashes get a numeric suffix: `capture` becomes `capture2`.

use std::collections::{HashMap, HashSet};

use imblock_eval::is_reserved;

#[derive(Debug, Default)]
pub struct NameDb {
    /// Workspace variable name to generated identifier.
    variables: HashMap<String, String>,
    /// Every identifier handed out so far.
    taken: HashSet<String>,
    /// Generated identifiers for user variables, in allocation order.
    declared: Vec<String>,
}

impl NameDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for a workspace variable, allocating one on first use.
    pub fn variable(&mut self, name: &str) -> String {
        if let Some(existing) = self.variables.get(name) {
            return existing.clone();
        }
        let ident = self.fresh(&sanitize(name));
        self.variables.insert(name.to_string(), ident.clone());
        self.declared.push(ident.clone());
        ident
    }

    /// A helper identifier distinct from everything allocated so far.
    pub fn distinct(&mut self, base: &str) -> String {
        self.fresh(&sanitize(base))
    }

    /// User variable identifiers, in allocation order.
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while is_reserved(&candidate) || self.taken.contains(&candidate) {
            candidate = format!("{}{}", base, suffix);
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Turn free text into an identifier: invalid characters become `_`, and a
/// leading digit gets a `my_` prefix.
fn sanitize(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if ident.is_empty() {
        ident.push_str("unnamed");
    } else if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "my_");
    }
    ident
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_get_suffix() {
        let mut names = NameDb::new();
        assert_eq!(names.variable("capture"), "capture2");
        assert_eq!(names.variable("while"), "while2");
        assert_eq!(names.variable("position"), "position");
    }

    #[test]
    fn test_same_variable_same_identifier() {
        let mut names = NameDb::new();
        let first = names.variable("step size");
        assert_eq!(first, "step_size");
        assert_eq!(names.variable("step size"), first);
        assert_eq!(names.declared(), &["step_size".to_string()]);
    }

    #[test]
    fn test_sanitized_collisions_stay_distinct() {
        let mut names = NameDb::new();
        assert_eq!(names.variable("a b"), "a_b");
        assert_eq!(names.variable("a-b"), "a_b2");
        assert_eq!(names.variable("2nd"), "my_2nd");
    }

    #[test]
    fn test_helpers_avoid_user_variables() {
        let mut names = NameDb::new();
        names.variable("count");
        assert_eq!(names.distinct("count"), "count2");
        assert_eq!(names.distinct("count"), "count3");
        assert_eq!(names.declared().len(), 1);
    }
}

//! Variable storage for a running program.

use std::collections::BTreeMap;

use crate::value::Value;

/// The runtime environment for executing a compiled program.
///
/// Compiled programs declare every variable at the top level, so there is a
/// single global scope. Redeclaring a variable simply rebinds it.
#[derive(Debug, Default, Clone)]
pub struct Runtime {
    globals: BTreeMap<String, Value>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a variable.
    pub fn define_var(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Get the value of a variable.
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Set the value of an existing variable.
    ///
    /// Returns an error if the variable was never declared.
    pub fn set_var(&mut self, name: &str, value: Value) -> Result<(), String> {
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(format!("Variable '{}' not defined", name)),
        }
    }

    /// All variables, in name order.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.globals.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get_var() {
        let mut rt = Runtime::new();
        rt.define_var("x", Value::Number(42.0));
        assert_eq!(rt.get_var("x"), Some(&Value::Number(42.0)));
    }

    #[test]
    fn test_undefined_var() {
        let rt = Runtime::new();
        assert_eq!(rt.get_var("x"), None);
    }

    #[test]
    fn test_set_var() {
        let mut rt = Runtime::new();
        rt.define_var("x", Value::Number(1.0));
        rt.set_var("x", Value::Number(2.0)).unwrap();
        assert_eq!(rt.get_var("x"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_set_undefined_var_fails() {
        let mut rt = Runtime::new();
        assert!(rt.set_var("x", Value::Number(1.0)).is_err());
    }

    #[test]
    fn test_redeclaration_rebinds() {
        let mut rt = Runtime::new();
        rt.define_var("x", Value::Number(1.0));
        rt.define_var("x", Value::Null);
        assert_eq!(rt.get_var("x"), Some(&Value::Null));
        assert_eq!(rt.vars().count(), 1);
    }
}

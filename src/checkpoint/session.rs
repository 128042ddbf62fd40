use std::collections::BTreeMap;

use ndarray::ArrayD;
use regex::Regex;

use super::Result;

/// The live model state checkpoints are restored into.
pub trait Session {
    /// Returns the training step the session's state corresponds to.
    fn global_step(&self) -> u64;
}

/// A named model variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: ArrayD<f32>,
    pub trainable: bool,
}

/// An in-memory session holding the model's variables by name.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    vars: BTreeMap<String, Variable>,
    global_step: u64,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, replacing any previous one with the same name.
    ///
    /// # Arguments
    /// * `name` - The variable's name.
    /// * `value` - Its initial value.
    /// * `trainable` - Whether the optimizer updates it.
    ///
    /// # Returns
    /// The replaced variable, if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: ArrayD<f32>,
        trainable: bool,
    ) -> Option<Variable> {
        self.vars.insert(name.into(), Variable { value, trainable })
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.vars.get(name).map(|var| &var.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.vars.get_mut(name).map(|var| &mut var.value)
    }

    pub fn is_trainable(&self, name: &str) -> Option<bool> {
        self.vars.get(name).map(|var| var.trainable)
    }

    /// Keeps only the variables whose name satisfies `keep`.
    pub(super) fn retain_names<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.vars.retain(|name, _| keep(name));
    }

    pub fn set_global_step(&mut self, step: u64) {
        self.global_step = step;
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates every variable in name order.
    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.vars.iter().map(|(name, var)| (name.as_str(), var))
    }

    /// Looks up the trainable variables whose name matches `.*key.*`.
    ///
    /// # Arguments
    /// * `key` - A regular expression matched anywhere in the variable names, usually a
    ///           scope. An empty key matches every trainable variable.
    ///
    /// # Returns
    /// The matching variables in name order, or `CkptErr::Pattern` if `key` isn't a
    /// valid regular expression.
    pub fn trainable_variables(&self, key: &str) -> Result<Vec<(&str, &ArrayD<f32>)>> {
        let pattern = Regex::new(&format!("^(?:.*{key}.*)"))?;

        let vars = self
            .variables()
            .filter(|(name, var)| var.trainable && pattern.is_match(name))
            .map(|(name, var)| (name, &var.value))
            .collect();

        Ok(vars)
    }
}

impl Session for VarStore {
    fn global_step(&self) -> u64 {
        self.global_step
    }
}

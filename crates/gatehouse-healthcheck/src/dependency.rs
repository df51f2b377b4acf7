use crate::error::HealthError;
use std::collections::{HashMap, HashSet};

/// Which components rely on which. Strictly acyclic; edges that would
/// close a cycle are rejected at registration.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `component` depends on `dependency`.
    pub fn add_dependency(
        &mut self,
        component: &str,
        dependency: &str,
    ) -> Result<(), HealthError> {
        if component == dependency || self.reaches(dependency, component) {
            return Err(HealthError::CycleDetected {
                component: component.to_string(),
                dependency: dependency.to_string(),
            });
        }
        self.edges
            .entry(component.to_string())
            .or_default()
            .insert(dependency.to_string());
        Ok(())
    }

    /// Direct dependencies of `component`.
    pub fn dependencies_of(&self, component: &str) -> Vec<String> {
        let mut deps: Vec<String> = self
            .edges
            .get(component)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Whether `from` can reach `to` along dependency edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().cloned());
            }
        }
        false
    }
}

//! CE-003: Resource graph assembly and creation order.
//!
//! Builds a DAG from each entity's typed references and `depends_on` edges
//! and computes a creation order using Kahn's algorithm. When several
//! entities are ready at once they are taken in declaration order, so the
//! same declarations always produce the same order.

use super::error::PlanError;
use super::types::{Entity, PlanWarning};
use super::validate;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Declared entities, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    entities: IndexMap<String, Entity>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare entities in order, failing on the first duplicate name.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, PlanError> {
        let mut decls = Self::new();
        for entity in entities {
            decls.declare(entity)?;
        }
        Ok(decls)
    }

    pub fn declare(&mut self, entity: Entity) -> Result<(), PlanError> {
        let name = entity.name().to_string();
        if name.trim().is_empty() {
            return Err(PlanError::input("name", format!("{} with an empty name", entity.kind())));
        }
        if self.entities.contains_key(&name) {
            return Err(PlanError::input(
                "name",
                format!("entity '{}' is declared more than once", name),
            ));
        }
        self.entities.insert(name, entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entities.get_index_of(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// A validated, ordered graph.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// Entity names in creation order
    pub order: Vec<String>,
    pub warnings: Vec<PlanWarning>,
}

/// Order, validate, and collect warnings for a set of declarations.
pub fn assemble(decls: &Declarations) -> Result<Assembly, PlanError> {
    let order = build_creation_order(decls)?;
    validate::validate(decls)?;
    let warnings = validate::warnings(decls);
    for w in &warnings {
        tracing::warn!(entity = %w.entity, code = %w.code, "{}", w.message);
    }
    tracing::debug!(entities = order.len(), "resource graph assembled");
    Ok(Assembly { order, warnings })
}

/// Build a topological creation order from entity references.
/// Uses Kahn's algorithm with declaration-order tie-breaking.
pub fn build_creation_order(decls: &Declarations) -> Result<Vec<String>, PlanError> {
    let names: Vec<&str> = decls.entities.keys().map(String::as_str).collect();
    let n = names.len();

    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];

    for (i, entity) in decls.iter().enumerate() {
        for dep in entity.dependency_names() {
            let j = decls
                .position(&dep)
                .ok_or_else(|| PlanError::DanglingReference {
                    entity: names[i].to_string(),
                    reference: dep.clone(),
                })?;
            dependencies[i].push(j);
            dependents[j].push(i);
            in_degree[i] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != n {
        let cycle = find_cycle(&dependencies, &in_degree)
            .into_iter()
            .map(|i| names[i].to_string())
            .collect();
        return Err(PlanError::CyclicDependency { cycle });
    }

    Ok(order.into_iter().map(|i| names[i].to_string()).collect())
}

/// Walk unresolved dependencies from the first unresolved entity until a
/// node repeats. Every unresolved entity has at least one unresolved
/// dependency, so the walk always closes.
fn find_cycle(dependencies: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let unresolved = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..in_degree.len()).find(|&i| unresolved(i)) else {
        return Vec::new();
    };

    let mut seen_at: HashMap<usize, usize> = HashMap::new();
    let mut path = Vec::new();
    let mut current = start;
    loop {
        if let Some(&pos) = seen_at.get(&current) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(current);
            return cycle;
        }
        seen_at.insert(current, path.len());
        path.push(current);
        match dependencies[current].iter().copied().find(|&d| unresolved(d)) {
            Some(next) => current = next,
            None => return path,
        }
    }
}

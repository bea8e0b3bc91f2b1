//! Left-to-right function composition.
//!
//! `compose([f, g, h]).apply(x)` evaluates `h(g(f(x)))`. Layer stacks in this
//! crate are mostly explicit structs, but the residual transform is expressed
//! as a composition so the stage order reads the same way it executes.

use crate::error::ModelError;

type Stage<'a, T> = Box<dyn Fn(T) -> T + 'a>;

/// A chain of unary stages applied in insertion order.
pub struct Composed<'a, T> {
    stages: Vec<Stage<'a, T>>,
}

impl<'a, T> Composed<'a, T> {
    /// Start a chain with a single stage.
    pub fn new(first: impl Fn(T) -> T + 'a) -> Self {
        Self {
            stages: vec![Box::new(first)],
        }
    }

    /// Append a stage that runs after every stage already in the chain.
    pub fn then(mut self, next: impl Fn(T) -> T + 'a) -> Self {
        self.stages.push(Box::new(next));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn apply(&self, input: T) -> T {
        self.stages.iter().fold(input, |acc, stage| stage(acc))
    }
}

impl<T> std::fmt::Debug for Composed<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composed")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Compose boxed stages left to right. An empty list is rejected.
pub fn compose<'a, T>(stages: Vec<Stage<'a, T>>) -> Result<Composed<'a, T>, ModelError> {
    if stages.is_empty() {
        return Err(ModelError::EmptyComposition);
    }
    Ok(Composed { stages })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_stages_in_order() {
        let chain = Composed::new(|x: i32| x + 1).then(|x| x * 10);
        assert_eq!(chain.apply(2), 30);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn compose_matches_builder() {
        let stages: Vec<Box<dyn Fn(String) -> String>> = vec![
            Box::new(|s| s + "a"),
            Box::new(|s| s + "b"),
            Box::new(|s| s + "c"),
        ];
        let chain = compose(stages).unwrap();
        assert_eq!(chain.apply(String::from(">")), ">abc");
    }

    #[test]
    fn empty_composition_is_rejected() {
        let stages: Vec<Box<dyn Fn(f32) -> f32>> = Vec::new();
        assert_eq!(compose(stages).unwrap_err(), ModelError::EmptyComposition);
    }
}

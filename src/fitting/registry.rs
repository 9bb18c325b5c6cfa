//! Registry of available fitting-model variants.

use std::collections::HashMap;

use super::gauss_tails::GaussTailsModel;
use super::model::FitModel;
use super::svd::SvdModel;

/// Identifier for a fitting-model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Nonlinear Gaussian peak + step + tails model.
    GaussTails,
    /// Linear SVD model.
    Svd,
}

impl ModelKind {
    /// Get the string name of this variant.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::GaussTails => "gauss_tails",
            ModelKind::Svd => "svd",
        }
    }
}

type ModelFactory = Box<dyn Fn() -> Box<dyn FitModel> + Send + Sync>;

/// Registry mapping model kinds to factories.
///
/// Models carry per-pixel scratch state, so workers ask the registry for
/// a private instance instead of sharing one.
pub struct ModelRegistry {
    factories: HashMap<ModelKind, ModelFactory>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with both built-in variants registered.
    pub fn new_with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ModelKind::GaussTails, || {
            Box::new(GaussTailsModel::new()) as Box<dyn FitModel>
        });
        registry.register(ModelKind::Svd, || Box::new(SvdModel::new()) as Box<dyn FitModel>);
        registry
    }

    /// Register a factory for a model kind.
    pub fn register<F>(&mut self, kind: ModelKind, factory: F)
    where
        F: Fn() -> Box<dyn FitModel> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Build a fresh model instance of the given kind.
    pub fn create(&self, kind: ModelKind) -> Option<Box<dyn FitModel>> {
        self.factories.get(&kind).map(|f| f())
    }

    /// Check if a kind is registered.
    pub fn contains(&self, kind: ModelKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Get all registered kinds.
    pub fn kinds(&self) -> Vec<ModelKind> {
        self.factories.keys().copied().collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! String-tag factories for the loop's collaborators.
//!
//! Experiment descriptors name classifiers, query strategies, oracles and
//! stop criteria by tag. The [`Registry`] maps each tag to a constructor
//! taking the descriptor's parameter block. [`Registry::with_defaults`]
//! knows every built-in; more can be added with the `register_*` methods.

use crate::classifier::{BinaryRelevanceCentroid, Classifier, Committee, NearestCentroid};
use crate::density::DensityDiversity;
use crate::multilabel::{BinMin, MeanMaxLoss};
use crate::oracle::{InteractiveOracle, Oracle, SimulatedOracle};
use crate::similarity::DistanceFunction;
use crate::stop::{CombineMode, LabelBudget, MeasureTarget, PassiveLearningMeasure, StopCriterion};
use crate::strategy::{QueryStrategy, UncertaintyMeasure, UncertaintySampling, VoteEntropy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while resolving a tagged component
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown {kind} tag: {tag}")]
    UnknownTag { kind: &'static str, tag: String },

    #[error("Invalid parameter '{name}' for {tag}: {reason}")]
    InvalidParam {
        tag: String,
        name: String,
        reason: String,
    },

    #[error("Missing parameter '{name}' for {tag}")]
    MissingParam { tag: String, name: String },
}

/// A tag plus its free-form parameter block, as written in a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Registered constructor tag
    pub tag: String,
    /// Constructor parameters
    #[serde(default)]
    pub params: serde_yaml::Mapping,
}

impl ComponentSpec {
    /// Spec with no parameters
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: serde_yaml::Mapping::new(),
        }
    }

    /// Add one parameter
    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.params
            .insert(serde_yaml::Value::from(name), value.into());
        self
    }

    /// Typed view of the parameters
    #[must_use]
    pub const fn params(&self) -> Params<'_> {
        Params { spec: self }
    }
}

/// Typed parameter access for one spec
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    spec: &'a ComponentSpec,
}

impl Params<'_> {
    /// Parameter `name` deserialized as `T`, if present
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` if the value does not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, RegistryError> {
        self.spec
            .params
            .get(name)
            .map(|v| {
                serde_yaml::from_value(v.clone()).map_err(|e| RegistryError::InvalidParam {
                    tag: self.spec.tag.clone(),
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Parameter `name`, or `default` when absent
    ///
    /// # Errors
    ///
    /// Returns `InvalidParam` if the value does not deserialize as `T`.
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, RegistryError> {
        Ok(self.get(name)?.unwrap_or(default))
    }

    /// Parameter `name`, which must be present
    ///
    /// # Errors
    ///
    /// Returns `MissingParam` when absent, `InvalidParam` when malformed.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, RegistryError> {
        self.get(name)?.ok_or_else(|| RegistryError::MissingParam {
            tag: self.spec.tag.clone(),
            name: name.to_string(),
        })
    }
}

/// Builds a classifier from its spec
pub type ClassifierFactory = fn(&Registry, &ComponentSpec) -> Result<Box<dyn Classifier>, RegistryError>;

/// Builds a query strategy around an already built classifier
pub type StrategyFactory = fn(
    &Registry,
    &ComponentSpec,
    Box<dyn Classifier>,
) -> Result<Box<dyn QueryStrategy>, RegistryError>;

/// Builds an oracle from its spec
pub type OracleFactory = fn(&ComponentSpec) -> Result<Box<dyn Oracle>, RegistryError>;

/// Builds a stop criterion from its spec
pub type StopFactory = fn(&ComponentSpec) -> Result<Box<dyn StopCriterion>, RegistryError>;

/// Tag-to-constructor tables for every collaborator kind
#[derive(Default)]
pub struct Registry {
    classifiers: BTreeMap<String, ClassifierFactory>,
    strategies: BTreeMap<String, StrategyFactory>,
    oracles: BTreeMap<String, OracleFactory>,
    stop_criteria: BTreeMap<String, StopFactory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("classifiers", &self.classifiers.keys().collect::<Vec<_>>())
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("oracles", &self.oracles.keys().collect::<Vec<_>>())
            .field("stop_criteria", &self.stop_criteria.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in component
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_classifier("nearest_centroid", |_, _| Ok(Box::new(NearestCentroid::new())));
        registry.register_classifier("binary_relevance_centroid", |_, _| {
            Ok(Box::new(BinaryRelevanceCentroid::new()))
        });
        registry.register_classifier("committee", build_committee);

        registry.register_strategy("margin", |_, spec, classifier| {
            uncertainty(spec, UncertaintyMeasure::Margin, classifier)
        });
        registry.register_strategy("least_confident", |_, spec, classifier| {
            uncertainty(spec, UncertaintyMeasure::LeastConfident, classifier)
        });
        registry.register_strategy("entropy", |_, spec, classifier| {
            uncertainty(spec, UncertaintyMeasure::Entropy, classifier)
        });
        registry.register_strategy("vote_entropy", |_, _, classifier| {
            Ok(Box::new(VoteEntropy::new(classifier)))
        });
        registry.register_strategy("bin_min", |_, _, classifier| Ok(Box::new(BinMin::new(classifier))));
        registry.register_strategy("mean_max_loss", |_, _, classifier| {
            Ok(Box::new(MeanMaxLoss::new(classifier)))
        });
        registry.register_strategy("density_diversity", build_density);

        registry.register_oracle("simulated", |_| Ok(Box::new(SimulatedOracle::new())));
        registry.register_oracle("interactive", |_| Ok(Box::new(InteractiveOracle::console())));

        registry.register_stop_criterion("passive_learning_measure", build_passive_measure);
        registry.register_stop_criterion("label_budget", |spec| {
            Ok(Box::new(LabelBudget::new(spec.params().require("limit")?)))
        });

        registry
    }

    /// Register (or replace) a classifier constructor
    pub fn register_classifier(&mut self, tag: &str, factory: ClassifierFactory) {
        self.classifiers.insert(tag.to_string(), factory);
    }

    /// Register (or replace) a query strategy constructor
    pub fn register_strategy(&mut self, tag: &str, factory: StrategyFactory) {
        self.strategies.insert(tag.to_string(), factory);
    }

    /// Register (or replace) an oracle constructor
    pub fn register_oracle(&mut self, tag: &str, factory: OracleFactory) {
        self.oracles.insert(tag.to_string(), factory);
    }

    /// Register (or replace) a stop criterion constructor
    pub fn register_stop_criterion(&mut self, tag: &str, factory: StopFactory) {
        self.stop_criteria.insert(tag.to_string(), factory);
    }

    /// Build a classifier
    ///
    /// # Errors
    ///
    /// Returns `UnknownTag` or the constructor's parameter error.
    pub fn classifier(&self, spec: &ComponentSpec) -> Result<Box<dyn Classifier>, RegistryError> {
        let factory = lookup(&self.classifiers, "classifier", &spec.tag)?;
        factory(self, spec)
    }

    /// Build a query strategy around `classifier`
    ///
    /// # Errors
    ///
    /// Returns `UnknownTag` or the constructor's parameter error.
    pub fn strategy(
        &self,
        spec: &ComponentSpec,
        classifier: Box<dyn Classifier>,
    ) -> Result<Box<dyn QueryStrategy>, RegistryError> {
        let factory = lookup(&self.strategies, "query strategy", &spec.tag)?;
        factory(self, spec, classifier)
    }

    /// Build an oracle
    ///
    /// # Errors
    ///
    /// Returns `UnknownTag` or the constructor's parameter error.
    pub fn oracle(&self, spec: &ComponentSpec) -> Result<Box<dyn Oracle>, RegistryError> {
        let factory = lookup(&self.oracles, "oracle", &spec.tag)?;
        factory(spec)
    }

    /// Build a stop criterion
    ///
    /// # Errors
    ///
    /// Returns `UnknownTag` or the constructor's parameter error.
    pub fn stop_criterion(&self, spec: &ComponentSpec) -> Result<Box<dyn StopCriterion>, RegistryError> {
        let factory = lookup(&self.stop_criteria, "stop criterion", &spec.tag)?;
        factory(spec)
    }

    /// Registered strategy tags, sorted
    #[must_use]
    pub fn strategy_tags(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Registered classifier tags, sorted
    #[must_use]
    pub fn classifier_tags(&self) -> Vec<&str> {
        self.classifiers.keys().map(String::as_str).collect()
    }
}

fn lookup<'a, F>(
    table: &'a BTreeMap<String, F>,
    kind: &'static str,
    tag: &str,
) -> Result<&'a F, RegistryError> {
    table.get(tag).ok_or_else(|| RegistryError::UnknownTag {
        kind,
        tag: tag.to_string(),
    })
}

fn build_committee(
    registry: &Registry,
    spec: &ComponentSpec,
) -> Result<Box<dyn Classifier>, RegistryError> {
    let params = spec.params();
    let member: ComponentSpec =
        params.get_or("member", ComponentSpec::new("nearest_centroid"))?;
    let prototype = registry.classifier(&member)?;
    Ok(Box::new(Committee::new(
        prototype.as_ref(),
        params.get_or("size", 5)?,
        params.get_or("seed", 42)?,
    )))
}

fn uncertainty(
    spec: &ComponentSpec,
    measure: UncertaintyMeasure,
    classifier: Box<dyn Classifier>,
) -> Result<Box<dyn QueryStrategy>, RegistryError> {
    if let Some(extra) = spec.params.keys().next() {
        return Err(RegistryError::InvalidParam {
            tag: spec.tag.clone(),
            name: extra.as_str().unwrap_or("?").to_string(),
            reason: "takes no parameters".to_string(),
        });
    }
    Ok(Box::new(UncertaintySampling::new(measure, classifier)))
}

fn build_density(
    registry: &Registry,
    spec: &ComponentSpec,
    classifier: Box<dyn Classifier>,
) -> Result<Box<dyn QueryStrategy>, RegistryError> {
    let params = spec.params();
    let inner: ComponentSpec = params.require("inner")?;
    if inner.tag == spec.tag {
        return Err(RegistryError::InvalidParam {
            tag: spec.tag.clone(),
            name: "inner".to_string(),
            reason: "cannot wrap itself".to_string(),
        });
    }
    let inner = registry.strategy(&inner, classifier)?;

    Ok(Box::new(
        DensityDiversity::new(inner)
            .with_beta(params.get_or("beta", 1.0)?)
            .with_distance(params.get_or("distance", DistanceFunction::default())?)
            .on_disk(params.get_or("on_disk", false)?),
    ))
}

fn build_passive_measure(spec: &ComponentSpec) -> Result<Box<dyn StopCriterion>, RegistryError> {
    let params = spec.params();
    let measures: Vec<MeasureTarget> = params.get_or(
        "measures",
        vec![MeasureTarget::new(crate::evaluation::ACCURACY, true)],
    )?;
    let mode: CombineMode = params.get_or("mode", CombineMode::default())?;
    Ok(Box::new(PassiveLearningMeasure::new(measures, mode)))
}

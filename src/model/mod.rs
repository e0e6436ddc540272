//! Model parameter storage seen by the aggregation core.
//!
//! The core never owns a model representation of its own. It reads and
//! writes through [`ParameterStore`], which any model type can implement.
//! [`NamedParameters`] is a small ordered implementation used by the demo,
//! the tests and simple callers.

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn};

use crate::error::SecAggError;

/// Name and shape of one trainable parameter tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterSpec {
    /// Fully qualified parameter name (e.g. `"fc1.weight"`).
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
}

impl ParameterSpec {
    /// Number of scalar elements in the tensor.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A named collection of numeric tensors that the aggregation core reads
/// from and writes into.
pub trait ParameterStore {
    /// Trainable parameters, in a stable order.
    fn trainable_parameters(&self) -> Vec<ParameterSpec>;

    /// Read-only view of a parameter.
    fn parameter(&self, name: &str) -> Option<ArrayViewD<'_, f64>>;

    /// Mutable view into the model-owned storage of a parameter.
    fn parameter_mut(&mut self, name: &str) -> Option<ArrayViewMutD<'_, f64>>;
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    name: String,
    value: ArrayD<f64>,
    trainable: bool,
}

/// Insertion-ordered parameter collection.
///
/// # Example
///
/// ```rust
/// use secagg_fl::model::{NamedParameters, ParameterStore};
///
/// let mut params = NamedParameters::new();
/// params.insert_filled("fc.weight", &[2, 3], 1.0).unwrap();
/// params.insert_frozen_filled("bn.running_mean", &[3], 0.0).unwrap();
///
/// assert_eq!(params.trainable_parameters().len(), 1);
/// assert_eq!(params.parameter("fc.weight").unwrap()[[1, 2]], 1.0);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedParameters {
    entries: Vec<Entry>,
}

impl NamedParameters {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a trainable tensor. Re-inserting a name replaces its value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: ArrayD<f64>) {
        self.insert_entry(name.into(), value, true);
    }

    /// Insert a non-trainable tensor (ignored by aggregation).
    pub fn insert_frozen(&mut self, name: impl Into<String>, value: ArrayD<f64>) {
        self.insert_entry(name.into(), value, false);
    }

    /// Insert a trainable tensor built from a flat buffer.
    pub fn insert_from_vec(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        data: Vec<f64>,
    ) -> Result<(), SecAggError> {
        let value = ArrayD::from_shape_vec(IxDyn(shape), data)?;
        self.insert(name, value);
        Ok(())
    }

    /// Insert a trainable tensor with every element set to `value`.
    pub fn insert_filled(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        value: f64,
    ) -> Result<(), SecAggError> {
        self.insert_from_vec(name, shape, vec![value; shape.iter().product()])
    }

    /// Insert a non-trainable tensor with every element set to `value`.
    pub fn insert_frozen_filled(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        value: f64,
    ) -> Result<(), SecAggError> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), vec![value; shape.iter().product()])?;
        self.insert_frozen(name, data);
        Ok(())
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total trainable scalar elements.
    pub fn num_trainable_elements(&self) -> usize {
        self.trainable_parameters()
            .iter()
            .map(ParameterSpec::numel)
            .sum()
    }

    /// Iterate over `(name, tensor)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f64>)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.value))
    }

    fn insert_entry(&mut self, name: String, value: ArrayD<f64>, trainable: bool) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.value = value;
                entry.trainable = trainable;
            }
            None => self.entries.push(Entry {
                name,
                value,
                trainable,
            }),
        }
    }
}

impl ParameterStore for NamedParameters {
    fn trainable_parameters(&self) -> Vec<ParameterSpec> {
        self.entries
            .iter()
            .filter(|e| e.trainable)
            .map(|e| ParameterSpec {
                name: e.name.clone(),
                shape: e.value.shape().to_vec(),
            })
            .collect()
    }

    fn parameter(&self, name: &str) -> Option<ArrayViewD<'_, f64>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.view())
    }

    fn parameter_mut(&mut self, name: &str) -> Option<ArrayViewMutD<'_, f64>> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .map(|e| e.value.view_mut())
    }
}

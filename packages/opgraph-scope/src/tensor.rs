//! Dense `f32` tensor value held by a variable.

use crate::error::{Result, ScopeError};
use serde::{Deserialize, Serialize};

/// Row-major dense tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `data` matches `shape`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(ScopeError::invalid_value(format!(
                "shape {:?} holds {} elements but {} were given",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
        }
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            shape: vec![1],
            data: vec![value],
        }
    }

    /// 1-D tensor from a slice
    pub fn from_slice(values: &[f32]) -> Self {
        Self {
            shape: vec![values.len()],
            data: values.to_vec(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tensor: Tensor = serde_json::from_str(json)?;
        Tensor::new(tensor.shape, tensor.data)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Size of the backing buffer in bytes
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Apply `f` elementwise, keeping the shape
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two same-shaped tensors elementwise
    pub fn zip_with(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Self> {
        if self.shape != other.shape {
            return Err(ScopeError::invalid_value(format!(
                "shape mismatch: {:?} vs {:?}",
                self.shape, other.shape
            )));
        }
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_numel() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_filled_and_nbytes() {
        let t = Tensor::filled(vec![4, 2], 1.5);
        assert_eq!(t.numel(), 8);
        assert_eq!(t.nbytes(), 32);
        assert!(t.data().iter().all(|&v| v == 1.5));
    }

    #[test]
    fn test_zip_with_shape_mismatch() {
        let a = Tensor::filled(vec![2], 1.0);
        let b = Tensor::filled(vec![3], 1.0);
        assert!(a.zip_with(&b, |x, y| x + y).is_err());

        let c = a.zip_with(&a, |x, y| x + y).unwrap();
        assert_eq!(c.data(), &[2.0, 2.0]);
    }

    #[test]
    fn test_json_rejects_inconsistent_shape() {
        let ok = Tensor::from_json(r#"{"shape":[2],"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(ok, Tensor::from_slice(&[1.0, 2.0]));

        assert!(Tensor::from_json(r#"{"shape":[3],"data":[1.0,2.0]}"#).is_err());
        assert!(Tensor::from_json("[1, 2]").is_err());
    }
}

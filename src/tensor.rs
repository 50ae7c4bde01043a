//! Dense n-dimensional tensor used by every layer
//!
//! A `Tensor` is a contiguous, row-major `Vec<f64>` plus its shape. It provides
//! the primitive operations the layers are written against: elementwise
//! arithmetic with NumPy-style broadcasting, reductions over arbitrary axes,
//! reshape/transpose/permute, 2-D matrix multiplication and spatial padding.
//!
//! ## Memory Layout
//!
//! For shape `[2, 3]`, data is stored as
//! `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]`, so the strides are `[3, 1]`.
//!
//! ## Errors
//!
//! Shape violations inside these primitives are programming errors and panic.
//! Layers check their inputs before calling into the tensor and report a
//! [`crate::NnError::ShapeMismatch`] instead.

/// A multi-dimensional array of `f64` values in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f64>,
    shape: Vec<usize>,
}

fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Shape produced by broadcasting `a` against `b`, or `None` if incompatible.
///
/// Trailing dimensions are aligned; a dimension of size 1 stretches to match.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

impl Tensor {
    /// Create a tensor from raw data and a shape.
    ///
    /// # Panics
    ///
    /// Panics if the product of `shape` differs from `data.len()`.
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected
        );
        Self { data, shape }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Tensor of the given shape with every element set to `value`.
    pub fn full(shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self {
            data: vec![value; len],
            shape: shape.to_vec(),
        }
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// A 1-D tensor owning `data`.
    pub fn from_vec(data: Vec<f64>) -> Self {
        let len = data.len();
        Self::new(data, vec![len])
    }

    /// A 0-D tensor holding one value.
    pub fn scalar(value: f64) -> Self {
        Self::new(vec![value], vec![])
    }

    /// Build a tensor by evaluating `f` at every flat (row-major) index.
    pub fn from_fn(shape: &[usize], f: impl FnMut(usize) -> f64) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: (0..len).map(f).collect(),
            shape: shape.to_vec(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    fn offset(&self, idx: &[usize]) -> usize {
        assert_eq!(
            idx.len(),
            self.shape.len(),
            "index {:?} has wrong rank for shape {:?}",
            idx,
            self.shape
        );
        let mut stride = 1;
        let mut off = 0;
        for (&i, &dim) in idx.iter().rev().zip(self.shape.iter().rev()) {
            assert!(i < dim, "index {:?} out of bounds for shape {:?}", idx, self.shape);
            off += i * stride;
            stride *= dim;
        }
        off
    }

    pub fn get(&self, idx: &[usize]) -> f64 {
        self.data[self.offset(idx)]
    }

    pub fn set(&mut self, idx: &[usize], value: f64) {
        let off = self.offset(idx);
        self.data[off] = value;
    }

    /// Same data viewed with a new shape. The element count must not change.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        self.clone().into_reshape(new_shape)
    }

    /// Consuming variant of [`Tensor::reshape`] that reuses the buffer.
    pub fn into_reshape(self, new_shape: &[usize]) -> Tensor {
        let new_len: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_len,
            "cannot reshape {:?} into {:?}",
            self.shape,
            new_shape
        );
        Tensor {
            data: self.data,
            shape: new_shape.to_vec(),
        }
    }

    /// Reshape where at most one dimension may be `-1` and is inferred.
    pub fn reshape_infer(&self, new_shape: &[isize]) -> Tensor {
        let known: usize = new_shape
            .iter()
            .filter(|&&d| d >= 0)
            .map(|&d| d as usize)
            .product();
        let inferred = new_shape.iter().filter(|&&d| d < 0).count();
        assert!(inferred <= 1, "only one dimension can be inferred");
        let shape: Vec<usize> = new_shape
            .iter()
            .map(|&d| {
                if d < 0 {
                    assert!(known > 0 && self.len() % known == 0, "cannot infer dimension");
                    self.len() / known
                } else {
                    d as usize
                }
            })
            .collect();
        self.reshape(&shape)
    }

    /// Transpose of a 2-D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2-D tensor, got {:?}", self.shape);
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut out = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                out[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(out, vec![cols, rows])
    }

    /// Reorder axes: output axis `k` is input axis `axes[k]`.
    pub fn permute(&self, axes: &[usize]) -> Tensor {
        assert_eq!(axes.len(), self.ndim(), "permutation rank mismatch");
        let mut seen = vec![false; axes.len()];
        for &a in axes {
            assert!(a < axes.len() && !seen[a], "invalid permutation {:?}", axes);
            seen[a] = true;
        }

        let new_shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let old_strides = compute_strides(&self.shape);
        // Stride in the source buffer for each output axis.
        let src_strides: Vec<usize> = axes.iter().map(|&a| old_strides[a]).collect();

        let mut out = Vec::with_capacity(self.data.len());
        let mut idx = vec![0usize; new_shape.len()];
        for _ in 0..self.data.len() {
            let src: usize = idx.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
            out.push(self.data[src]);
            for axis in (0..idx.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < new_shape[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        Tensor::new(out, new_shape)
    }

    /// 2-D matrix multiplication `[m, k] @ [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.ndim() == 2 && other.ndim() == 2,
            "matmul requires 2-D tensors: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "matrix dimensions incompatible: {:?} @ {:?}",
            self.shape, other.shape
        );
        let (m, k, n) = (self.shape[0], self.shape[1], other.shape[1]);
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            let row = &mut out[i * n..(i + 1) * n];
            for l in 0..k {
                let a = self.data[i * k + l];
                if a == 0.0 {
                    continue;
                }
                let b_row = &other.data[l * n..(l + 1) * n];
                for (r, &b) in row.iter_mut().zip(b_row) {
                    *r += a * b;
                }
            }
        }
        Tensor::new(out, vec![m, n])
    }

    /// Expand to `target` following broadcasting rules.
    pub fn broadcast_to(&self, target: &[usize]) -> Tensor {
        if self.shape == target {
            return self.clone();
        }
        let out_shape = broadcast_shape(&self.shape, target)
            .filter(|s| s.as_slice() == target)
            .unwrap_or_else(|| panic!("cannot broadcast {:?} to {:?}", self.shape, target));
        let strides = self.broadcast_strides(&out_shape);
        let len: usize = out_shape.iter().product();
        let mut out = Vec::with_capacity(len);
        let mut idx = vec![0usize; out_shape.len()];
        for _ in 0..len {
            let src: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
            out.push(self.data[src]);
            for axis in (0..idx.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < out_shape[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        Tensor::new(out, out_shape)
    }

    /// Source strides when this tensor is read as if it had `out_shape`;
    /// broadcast axes get stride 0.
    fn broadcast_strides(&self, out_shape: &[usize]) -> Vec<usize> {
        let own = compute_strides(&self.shape);
        let lead = out_shape.len() - self.shape.len();
        (0..out_shape.len())
            .map(|i| {
                if i < lead || self.shape[i - lead] == 1 {
                    0
                } else {
                    own[i - lead]
                }
            })
            .collect()
    }

    /// Combine two tensors elementwise after broadcasting them together.
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Tensor {
        if self.shape == other.shape {
            let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
            return Tensor::new(data, self.shape.clone());
        }
        let out_shape = broadcast_shape(&self.shape, &other.shape).unwrap_or_else(|| {
            panic!("shapes {:?} and {:?} are not broadcastable", self.shape, other.shape)
        });
        let sa = self.broadcast_strides(&out_shape);
        let sb = other.broadcast_strides(&out_shape);
        let len: usize = out_shape.iter().product();
        let mut out = Vec::with_capacity(len);
        let mut idx = vec![0usize; out_shape.len()];
        for _ in 0..len {
            let mut ia = 0;
            let mut ib = 0;
            for (axis, &i) in idx.iter().enumerate() {
                ia += i * sa[axis];
                ib += i * sb[axis];
            }
            out.push(f(self.data[ia], other.data[ib]));
            for axis in (0..idx.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < out_shape[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        Tensor::new(out, out_shape)
    }

    pub fn add(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a / b)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor::new(self.data.iter().map(|&x| f(x)).collect(), self.shape.clone())
    }

    pub fn add_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x + scalar)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// In-place `self += other` for tensors of identical shape.
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(self.shape, other.shape, "add_assign shape mismatch");
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Sum over `axes`. With `keepdims` the reduced axes stay with size 1.
    pub fn sum_axes(&self, axes: &[usize], keepdims: bool) -> Tensor {
        for &a in axes {
            assert!(a < self.ndim(), "axis {} out of range for shape {:?}", a, self.shape);
        }
        let kept_shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
            .collect();
        let kept_strides = compute_strides(&kept_shape);
        let mut out = vec![0.0; kept_shape.iter().product()];

        let mut idx = vec![0usize; self.ndim()];
        for &value in &self.data {
            let mut dst = 0;
            for (axis, &i) in idx.iter().enumerate() {
                if kept_shape[axis] != 1 {
                    dst += i * kept_strides[axis];
                }
            }
            out[dst] += value;
            for axis in (0..idx.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < self.shape[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }

        let shape = if keepdims {
            kept_shape
        } else {
            self.shape
                .iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, &d)| d)
                .collect()
        };
        Tensor::new(out, shape)
    }

    /// Number of elements folded into each output by a reduction over `axes`.
    pub fn reduced_count(&self, axes: &[usize]) -> usize {
        axes.iter().map(|&a| self.shape[a]).product()
    }

    pub fn mean_axes(&self, axes: &[usize], keepdims: bool) -> Tensor {
        let n = self.reduced_count(axes) as f64;
        self.sum_axes(axes, keepdims).mul_scalar(1.0 / n)
    }

    /// Population (biased) variance over `axes`.
    pub fn var_axes(&self, axes: &[usize], keepdims: bool) -> Tensor {
        let mean = self.mean_axes(axes, true);
        let centered = self.sub(&mean);
        centered.mul(&centered).mean_axes(axes, keepdims)
    }

    /// Pad the last two axes of a 4-D tensor with a `width`-wide halo of `fill`.
    pub fn pad2d(&self, width: usize, fill: f64) -> Tensor {
        assert_eq!(self.ndim(), 4, "pad2d requires a 4-D tensor, got {:?}", self.shape);
        if width == 0 {
            return self.clone();
        }
        let (n, c, h, w) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        let (ph, pw) = (h + 2 * width, w + 2 * width);
        let mut out = Tensor::full(&[n, c, ph, pw], fill);
        for plane in 0..n * c {
            for y in 0..h {
                let src = plane * h * w + y * w;
                let dst = plane * ph * pw + (y + width) * pw + width;
                out.data[dst..dst + w].copy_from_slice(&self.data[src..src + w]);
            }
        }
        out
    }

    /// Inverse of [`Tensor::pad2d`]: drop a `width`-wide border from the last two axes.
    pub fn crop2d(&self, width: usize) -> Tensor {
        assert_eq!(self.ndim(), 4, "crop2d requires a 4-D tensor, got {:?}", self.shape);
        if width == 0 {
            return self.clone();
        }
        let (n, c, ph, pw) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        assert!(ph > 2 * width && pw > 2 * width, "crop width too large for {:?}", self.shape);
        let (h, w) = (ph - 2 * width, pw - 2 * width);
        let mut out = Tensor::zeros(&[n, c, h, w]);
        for plane in 0..n * c {
            for y in 0..h {
                let src = plane * ph * pw + (y + width) * pw + width;
                let dst = plane * h * w + y * w;
                out.data[dst..dst + w].copy_from_slice(&self.data[src..src + w]);
            }
        }
        out
    }

    /// Largest absolute elementwise difference; infinite if shapes differ.
    pub fn max_abs_diff(&self, other: &Tensor) -> f64 {
        if self.shape != other.shape {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// True when shapes match and every element differs by at most `tol`.
    pub fn approx_eq(&self, other: &Tensor, tol: f64) -> bool {
        self.max_abs_diff(other) <= tol
    }
}

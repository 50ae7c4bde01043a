// Integration tests for the Tensor primitive.
// Covers construction, broadcasting arithmetic, reductions and the spatial
// helpers the layers are built on.

use approx::assert_relative_eq;
use manual_backprop::tensor::{broadcast_shape, Tensor};

fn t(data: &[f64], shape: &[usize]) -> Tensor {
    Tensor::new(data.to_vec(), shape.to_vec())
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_constructors() {
    assert_eq!(Tensor::zeros(&[2, 3]).data(), &[0.0; 6]);
    assert_eq!(Tensor::ones(&[4]).sum(), 4.0);
    assert_eq!(Tensor::full(&[2, 2], 7.5).max(), 7.5);
    assert_eq!(Tensor::from_fn(&[3], |i| i as f64 * 2.0).data(), &[0.0, 2.0, 4.0]);

    let v = Tensor::from_vec(vec![1.0, 2.0, 3.0]);
    assert_eq!(v.shape(), &[3]);

    let s = Tensor::scalar(4.0);
    assert_eq!(s.ndim(), 0);
    assert_eq!(s.len(), 1);
    assert_eq!(s.data(), &[4.0]);
}

#[test]
fn test_scalar_broadcasts_against_anything() {
    let a = Tensor::from_fn(&[2, 3], |i| i as f64);
    assert_eq!(a.add(&Tensor::scalar(1.0)), a.add_scalar(1.0));
    assert_eq!(Tensor::scalar(2.0).mul(&a), a.mul_scalar(2.0));
}

#[test]
#[should_panic(expected = "doesn't match shape")]
fn test_wrong_length_panics() {
    t(&[1.0, 2.0], &[3]);
}

// ============================================================================
// Broadcasting
// ============================================================================

#[test]
fn test_broadcast_shape_rules() {
    assert_eq!(broadcast_shape(&[2, 3], &[3]), Some(vec![2, 3]));
    assert_eq!(broadcast_shape(&[1, 4, 1, 1], &[2, 4, 5, 5]), Some(vec![2, 4, 5, 5]));
    assert_eq!(broadcast_shape(&[3, 1], &[1, 4]), Some(vec![3, 4]));
    assert_eq!(broadcast_shape(&[2, 3], &[4, 3]), None);
}

#[test]
fn test_outer_broadcast() {
    let col = t(&[1.0, 2.0, 3.0], &[3, 1]);
    let row = t(&[10.0, 20.0], &[1, 2]);
    let sum = col.add(&row);
    assert_eq!(sum.shape(), &[3, 2]);
    assert_eq!(sum.data(), &[11.0, 21.0, 12.0, 22.0, 13.0, 23.0]);
    assert_eq!(row.sub(&col).get(&[2, 1]), 17.0);
}

#[test]
fn test_broadcast_to_repeats_values() {
    let channel = t(&[1.0, 2.0], &[1, 2, 1, 1]);
    let expanded = channel.broadcast_to(&[2, 2, 1, 2]);
    assert_eq!(expanded.data(), &[1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
}

#[test]
#[should_panic(expected = "cannot broadcast")]
fn test_incompatible_broadcast_panics() {
    t(&[1.0, 2.0], &[2]).broadcast_to(&[3]);
}

#[test]
fn test_division_and_zip_map() {
    let a = t(&[2.0, 9.0], &[2]);
    let b = t(&[4.0, 3.0], &[2]);
    assert_eq!(a.div(&b).data(), &[0.5, 3.0]);
    assert_eq!(a.zip_map(&b, f64::max).data(), &[4.0, 9.0]);
    assert_eq!(a.map(|x| -x).data(), &[-2.0, -9.0]);
}

#[test]
fn test_add_assign_accumulates() {
    let mut acc = Tensor::zeros(&[2, 2]);
    acc.add_assign(&Tensor::ones(&[2, 2]));
    acc.add_assign(&t(&[1.0, 2.0, 3.0, 4.0], &[2, 2]));
    assert_eq!(acc.data(), &[2.0, 3.0, 4.0, 5.0]);
}

#[test]
#[should_panic(expected = "add_assign shape mismatch")]
fn test_add_assign_does_not_broadcast() {
    let mut acc = Tensor::zeros(&[2, 2]);
    acc.add_assign(&Tensor::ones(&[2]));
}

// ============================================================================
// Reductions
// ============================================================================

#[test]
fn test_sum_axes_with_and_without_keepdims() {
    let a = Tensor::from_fn(&[2, 3, 2], |i| i as f64);
    let kept = a.sum_axes(&[0, 2], true);
    assert_eq!(kept.shape(), &[1, 3, 1]);
    assert_eq!(kept.data(), &[14.0, 22.0, 30.0]);

    let dropped = a.sum_axes(&[1], false);
    assert_eq!(dropped.shape(), &[2, 2]);
    assert_eq!(dropped.data(), &[6.0, 9.0, 24.0, 27.0]);
    assert_eq!(a.reduced_count(&[0, 2]), 4);
}

#[test]
fn test_mean_and_population_variance() {
    let a = t(&[1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 10.0], &[2, 4]);
    let mean = a.mean_axes(&[1], false);
    let var = a.var_axes(&[1], false);
    assert_eq!(mean.data(), &[2.5, 10.0]);
    assert_relative_eq!(var.data()[0], 1.25);
    assert_eq!(var.data()[1], 0.0);
}

// ============================================================================
// Shape manipulation
// ============================================================================

#[test]
fn test_reshape_infer_and_permute() {
    let a = Tensor::from_fn(&[2, 3, 4], |i| i as f64);
    assert_eq!(a.reshape_infer(&[2, -1]).shape(), &[2, 12]);
    assert_eq!(a.reshape_infer(&[-1, 4]).shape(), &[6, 4]);

    let p = a.permute(&[2, 0, 1]);
    assert_eq!(p.shape(), &[4, 2, 3]);
    assert_eq!(p.get(&[3, 1, 2]), a.get(&[1, 2, 3]));
    assert_eq!(p.permute(&[1, 2, 0]), a);
}

#[test]
fn test_matmul_against_transpose() {
    let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let gram = a.matmul(&a.transpose());
    assert_eq!(gram.shape(), &[2, 2]);
    assert_eq!(gram.data(), &[14.0, 32.0, 32.0, 77.0]);
}

#[test]
fn test_pad_and_crop() {
    let a = Tensor::from_fn(&[1, 2, 2, 2], |i| i as f64 + 1.0);
    let padded = a.pad2d(1, f64::NEG_INFINITY);
    assert_eq!(padded.shape(), &[1, 2, 4, 4]);
    assert_eq!(padded.get(&[0, 1, 0, 0]), f64::NEG_INFINITY);
    assert_eq!(padded.get(&[0, 1, 2, 2]), 8.0);
    assert_eq!(padded.crop2d(1), a);
    assert_eq!(a.pad2d(0, 0.0), a);
}

#[test]
fn test_approx_comparison() {
    let a = t(&[1.0, 2.0], &[2]);
    let b = t(&[1.0 + 1e-9, 2.0], &[2]);
    assert!(a.approx_eq(&b, 1e-8));
    assert!(!a.approx_eq(&b, 1e-10));
    assert!(!a.approx_eq(&t(&[1.0, 2.0], &[1, 2]), 1.0));
}

//! Standardization and principal component reduction.
//!
//! Eigenvectors come from power iteration with deflation on the covariance
//! matrix (or on the Gram matrix when there are fewer samples than features),
//! so the fit is deterministic and needs no LAPACK.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use reel_models::ProjectionParams;

const MAX_ITERATIONS: usize = 500;
const TOLERANCE: f64 = 1e-10;
/// Eigenvalues below this fraction of the trace are treated as zero.
const RANK_EPSILON: f64 = 1e-12;

/// Per-feature mean and population standard deviation; zero deviations become 1.
pub fn fit_scaler(x: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = x.nrows().max(1) as f64;
    let mean = x.sum_axis(Axis(0)) / n;
    let mut scale = Array1::zeros(x.ncols());
    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        let var = column.iter().map(|v| (v - mean[j]).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        scale[j] = if std > f64::EPSILON { std } else { 1.0 };
    }
    (mean, scale)
}

/// Apply a fitted scaler.
pub fn standardize(x: &Array2<f64>, mean: &Array1<f64>, scale: &Array1<f64>) -> Array2<f64> {
    let mut z = x.clone();
    for mut row in z.axis_iter_mut(Axis(0)) {
        row -= mean;
        row /= scale;
    }
    z
}

/// Top `k` principal axes of standardized data, one row per axis.
///
/// Always returns at least one axis; fewer than `k` when the data has lower rank.
pub fn fit_components(z: &Array2<f64>, k: usize) -> Array2<f64> {
    let (n, d) = z.dim();
    let k = k.min(n).min(d).max(1);
    let n_f = n.max(1) as f64;

    let axes: Vec<Array1<f64>> = if d <= n {
        let cov = z.t().dot(z) / n_f;
        top_eigenvectors(cov, k)
    } else {
        let gram = z.dot(&z.t()) / n_f;
        top_eigenvectors(gram, k)
            .into_iter()
            .filter_map(|u| {
                let v = z.t().dot(&u);
                let norm = v.dot(&v).sqrt();
                (norm > f64::EPSILON).then(|| v / norm)
            })
            .collect()
    };

    let mut components = Array2::zeros((axes.len().max(1), d));
    if axes.is_empty() {
        // Constant data: any axis projects everything to the same point
        components[[0, 0]] = 1.0;
    }
    for (i, mut axis) in axes.into_iter().enumerate() {
        flip_sign(&mut axis);
        components.row_mut(i).assign(&axis);
    }

    debug!(
        samples = n,
        features = d,
        components = components.nrows(),
        "Fitted principal components"
    );
    components
}

/// Fit scaler and components and return them as a persisted projection record.
pub fn fit_projection(x: &Array2<f64>, max_components: usize) -> (ProjectionParams, Array2<f64>) {
    let (mean, scale) = fit_scaler(x);
    let z = standardize(x, &mean, &scale);
    let components = fit_components(&z, max_components);
    let reduced = z.dot(&components.t());

    let params = ProjectionParams::new(
        mean.to_vec(),
        scale.to_vec(),
        components.outer_iter().map(|row| row.to_vec()).collect(),
    );
    (params, reduced)
}

/// Deterministic sign: the largest-magnitude coordinate is positive.
fn flip_sign(axis: &mut Array1<f64>) {
    let mut best = 0.0f64;
    let mut sign = 1.0;
    for &v in axis.iter() {
        if v.abs() > best {
            best = v.abs();
            sign = v.signum();
        }
    }
    if sign < 0.0 {
        axis.mapv_inplace(|v| -v);
    }
}

/// Leading eigenvectors of a symmetric positive semi-definite matrix.
fn top_eigenvectors(mut a: Array2<f64>, k: usize) -> Vec<Array1<f64>> {
    let dim = a.nrows();
    let trace = a.diag().sum().abs();
    let mut out = Vec::with_capacity(k);

    for _ in 0..k {
        // Start from the heaviest row so the iteration never begins orthogonal to the top axis
        let mut start = 0;
        let mut start_norm = 0.0;
        for (i, row) in a.outer_iter().enumerate() {
            let norm = row.dot(&row);
            if norm > start_norm {
                start_norm = norm;
                start = i;
            }
        }
        if start_norm <= f64::EPSILON || dim == 0 {
            break;
        }

        let mut v = a.row(start).to_owned();
        let norm = v.dot(&v).sqrt();
        v /= norm;

        for _ in 0..MAX_ITERATIONS {
            let w = a.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm <= f64::EPSILON {
                break;
            }
            let w = w / norm;
            let delta = (&w - &v).iter().fold(0.0f64, |m, x| m.max(x.abs()));
            v = w;
            if delta < TOLERANCE {
                break;
            }
        }

        let lambda = v.dot(&a.dot(&v));
        if lambda <= trace * RANK_EPSILON || lambda <= 0.0 {
            break;
        }

        for i in 0..dim {
            for j in 0..dim {
                a[[i, j]] -= lambda * v[i] * v[j];
            }
        }
        out.push(v);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_scaler_handles_constant_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let (mean, scale) = fit_scaler(&x);
        assert_eq!(mean.to_vec(), vec![2.0, 5.0]);
        assert_eq!(scale.to_vec(), vec![1.0, 1.0]);

        let z = standardize(&x, &mean, &scale);
        assert_eq!(z, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_components_find_dominant_axis() {
        // Points spread along (1, 1), tiny noise along (1, -1)
        let x = array![
            [-2.0, -2.0],
            [-1.0, -1.01],
            [0.0, 0.0],
            [1.0, 1.01],
            [2.0, 2.0],
        ];
        let components = fit_components(&x, 1);
        assert_eq!(components.dim(), (1, 2));
        let axis = components.row(0);
        let expected = 1.0 / 2f64.sqrt();
        assert!((axis[0] - expected).abs() < 1e-3);
        assert!((axis[1] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_component_count_is_capped() {
        let x = Array2::from_shape_fn((4, 10), |(i, j)| ((i * 7 + j * 3) % 5) as f64 + i as f64);
        let (params, reduced) = fit_projection(&x, 20);
        assert!(params.output_dim() <= 4);
        assert_eq!(reduced.ncols(), params.output_dim());
        assert_eq!(params.input_dim(), 10);
    }

    #[test]
    fn test_gram_path_matches_projection() {
        // More features than samples goes through the Gram matrix
        let x = Array2::from_shape_fn((6, 12), |(i, j)| ((i + 1) * (j + 2) % 7) as f64);
        let (params, reduced) = fit_projection(&x, 3);

        for (i, row) in x.outer_iter().enumerate() {
            let raw: Vec<f32> = row.iter().map(|&v| v as f32).collect();
            let projected = params.project(&raw).unwrap();
            for (a, b) in projected.iter().zip(reduced.row(i).iter()) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_constant_data_yields_single_axis() {
        let x = Array2::from_elem((5, 3), 2.0);
        let components = fit_components(&x, 3);
        assert_eq!(components.nrows(), 1);
    }
}

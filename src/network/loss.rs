use ndarray::Array2;

/// Transition point between the quadratic and the linear part of the Huber loss.
const BETA: f32 = 1.0;

/// Huber (smooth L1) loss averaged over every element.
pub fn smooth_l1(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Option<f32> {
    (y_pred - y_true)
        .mapv(|d| {
            if d.abs() < BETA {
                0.5 * d * d / BETA
            } else {
                d.abs() - 0.5 * BETA
            }
        })
        .mean()
}

pub fn smooth_l1_prime(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Array2<f32> {
    let n = y_true.len().max(1) as f32;
    (y_pred - y_true).mapv(|d| if d.abs() < BETA { d / BETA } else { d.signum() }) / n
}

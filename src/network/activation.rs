use ndarray::ArrayD;

pub fn relu(x: &ArrayD<f32>) -> ArrayD<f32> {
    x.mapv(|v| v.max(0.0))
}

pub fn relu_prime(x: &ArrayD<f32>) -> ArrayD<f32> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

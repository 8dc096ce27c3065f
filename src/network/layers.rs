use std::fmt::Debug;

use ndarray::{s, Array, Array1, Array2, Array4, ArrayD, Axis, Dimension, Ix1, Ix2, Ix4, IxDyn, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use super::activation::{relu, relu_prime};
use super::incompatible_shape;
use crate::error::Result;

/// A trainable tensor together with the gradient of the last backward pass.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: &'static str,
    pub value: ArrayD<f32>,
    pub grad: ArrayD<f32>,
}

impl Parameter {
    pub fn new(name: &'static str, value: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self { name, value, grad }
    }
}

pub trait Layer: Debug {
    fn name(&self) -> &str;
    // computes the output Y of a layer for a given input X
    fn forward_propagation(&mut self, input: ArrayD<f32>, training: bool) -> Result<ArrayD<f32>>;
    // computes dE/dX for a given dE/dY and stores the parameter gradients
    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>>;

    fn parameters(&self) -> Vec<&Parameter> {
        vec![]
    }
    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![]
    }
    /// Non trainable state that still belongs to the model.
    fn buffers(&self) -> Vec<(&'static str, &ArrayD<f32>)> {
        vec![]
    }
    /// Parameter values and buffers, for loading saved state.
    fn state_mut(&mut self) -> Vec<(&'static str, &mut ArrayD<f32>)> {
        vec![]
    }
    fn clone_box(&self) -> Box<dyn Layer>;
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn standard<D: Dimension>(a: Array<f32, D>) -> Array<f32, D> {
    if a.is_standard_layout() {
        a
    } else {
        a.as_standard_layout().into_owned()
    }
}

fn uniform_init<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> ArrayD<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array::random_using(IxDyn(shape), Uniform::new(-bound, bound), rng)
}

#[derive(Debug, Clone)]
pub struct Linear {
    name: String,
    weight: Parameter,
    bias: Parameter,
    input: Array2<f32>,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        input_size: usize,
        output_size: usize,
        rng: &mut R,
    ) -> Self {
        let weight = uniform_init(&[output_size, input_size], input_size, rng);
        let bias = uniform_init(&[output_size], input_size, rng);
        Self {
            name: name.to_string(),
            weight: Parameter::new("weight", weight),
            bias: Parameter::new("bias", bias),
            input: Array2::zeros((0, input_size)),
        }
    }
}

impl Layer for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, _training: bool) -> Result<ArrayD<f32>> {
        let input = input.into_dimensionality::<Ix2>()?;
        let weights = self.weight.value.view().into_dimensionality::<Ix2>()?;
        let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
        if input.ncols() != weights.ncols() {
            return Err(incompatible_shape());
        }
        let output = input.dot(&weights.t()) + &bias;
        self.input = input;
        Ok(output.into_dyn())
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let output_error = output_error.into_dimensionality::<Ix2>()?;
        let input_error = {
            let weights = self.weight.value.view().into_dimensionality::<Ix2>()?;
            standard(output_error.dot(&weights))
        };
        self.weight.grad = standard(output_error.t().dot(&self.input)).into_dyn();
        self.bias.grad = output_error.sum_axis(Axis(0)).into_dyn();
        Ok(input_error.into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn state_mut(&mut self) -> Vec<(&'static str, &mut ArrayD<f32>)> {
        vec![
            (self.weight.name, &mut self.weight.value),
            (self.bias.name, &mut self.bias.value),
        ]
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

/// 2d convolution without padding, computed as a matrix product over the
/// unrolled input patches.
#[derive(Debug, Clone)]
pub struct Conv2d {
    name: String,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    weight: Parameter,
    bias: Parameter,
    cols: Array2<f32>,
    input_dim: (usize, usize, usize, usize),
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        rng: &mut R,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        Self {
            name: name.to_string(),
            in_channels,
            out_channels,
            kernel_size,
            stride: stride.max(1),
            weight: Parameter::new(
                "weight",
                uniform_init(&[out_channels, in_channels, kernel_size, kernel_size], fan_in, rng),
            ),
            bias: Parameter::new("bias", uniform_init(&[out_channels], fan_in, rng)),
            cols: Array2::zeros((0, fan_in)),
            input_dim: (0, in_channels, 0, 0),
        }
    }

    pub fn output_size(&self, size: usize) -> Option<usize> {
        if size < self.kernel_size {
            None
        } else {
            Some((size - self.kernel_size) / self.stride + 1)
        }
    }

    fn im2col(&self, input: &Array4<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
        let (n, c, _, _) = input.dim();
        let (k, stride) = (self.kernel_size, self.stride);
        let mut cols = Array2::zeros((n * out_h * out_w, c * k * k));
        for b in 0..n {
            for i in 0..out_h {
                for j in 0..out_w {
                    let (top, left) = (i * stride, j * stride);
                    let patch = input.slice(s![b, .., top..top + k, left..left + k]);
                    let mut row = cols.row_mut((b * out_h + i) * out_w + j);
                    for (dst, src) in row.iter_mut().zip(patch.iter()) {
                        *dst = *src;
                    }
                }
            }
        }
        cols
    }

    fn col2im(&self, dcols: &Array2<f32>, out_h: usize, out_w: usize) -> Array4<f32> {
        let (k, stride) = (self.kernel_size, self.stride);
        let mut input_error = Array4::zeros(self.input_dim);
        for b in 0..self.input_dim.0 {
            for i in 0..out_h {
                for j in 0..out_w {
                    let (top, left) = (i * stride, j * stride);
                    let mut patch = input_error.slice_mut(s![b, .., top..top + k, left..left + k]);
                    let row = dcols.row((b * out_h + i) * out_w + j);
                    for (dst, g) in patch.iter_mut().zip(row.iter()) {
                        *dst += *g;
                    }
                }
            }
        }
        input_error
    }
}

impl Layer for Conv2d {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, _training: bool) -> Result<ArrayD<f32>> {
        let input = input.into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = input.dim();
        if c != self.in_channels {
            return Err(incompatible_shape());
        }
        let (out_h, out_w) = match (self.output_size(h), self.output_size(w)) {
            (Some(out_h), Some(out_w)) => (out_h, out_w),
            _ => return Err(incompatible_shape()),
        };
        let cols = self.im2col(&input, out_h, out_w);
        let patch_len = c * self.kernel_size * self.kernel_size;
        let weights = self.weight.value.view().into_shape((self.out_channels, patch_len))?;
        let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
        let output = standard(cols.dot(&weights.t()) + &bias)
            .into_shape((n, out_h, out_w, self.out_channels))?
            .permuted_axes([0, 3, 1, 2])
            .as_standard_layout()
            .into_owned();
        self.cols = cols;
        self.input_dim = (n, c, h, w);
        Ok(output.into_dyn())
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let output_error = output_error.into_dimensionality::<Ix4>()?;
        let (n, oc, out_h, out_w) = output_error.dim();
        let output_error = output_error
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .into_owned()
            .into_shape((n * out_h * out_w, oc))?;
        let patch_len = self.in_channels * self.kernel_size * self.kernel_size;
        let dcols = {
            let weights = self.weight.value.view().into_shape((self.out_channels, patch_len))?;
            output_error.dot(&weights)
        };
        let weights_error = output_error.t().dot(&self.cols);
        self.weight.grad = standard(weights_error)
            .into_shape((self.out_channels, self.in_channels, self.kernel_size, self.kernel_size))?
            .into_dyn();
        self.bias.grad = output_error.sum_axis(Axis(0)).into_dyn();
        Ok(self.col2im(&dcols, out_h, out_w).into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn state_mut(&mut self) -> Vec<(&'static str, &mut ArrayD<f32>)> {
        vec![
            (self.weight.name, &mut self.weight.value),
            (self.bias.name, &mut self.bias.value),
        ]
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

/// Per channel normalisation over (batch, height, width).
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    name: String,
    eps: f32,
    momentum: f32,
    weight: Parameter,
    bias: Parameter,
    running_mean: ArrayD<f32>,
    running_var: ArrayD<f32>,
    x_hat: Array4<f32>,
    inv_std: Array1<f32>,
    batch_statistics: bool,
}

impl BatchNorm2d {
    pub fn new(name: &str, num_features: usize) -> Self {
        Self {
            name: name.to_string(),
            eps: 1e-5,
            momentum: 0.1,
            weight: Parameter::new("weight", ArrayD::ones(IxDyn(&[num_features]))),
            bias: Parameter::new("bias", ArrayD::zeros(IxDyn(&[num_features]))),
            running_mean: ArrayD::zeros(IxDyn(&[num_features])),
            running_var: ArrayD::ones(IxDyn(&[num_features])),
            x_hat: Array4::zeros((0, num_features, 0, 0)),
            inv_std: Array1::zeros(num_features),
            batch_statistics: true,
        }
    }
}

impl Layer for BatchNorm2d {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, training: bool) -> Result<ArrayD<f32>> {
        let input = input.into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = input.dim();
        if c != self.weight.value.len() {
            return Err(incompatible_shape());
        }
        let gamma = self.weight.value.view().into_dimensionality::<Ix1>()?.to_owned();
        let beta = self.bias.value.view().into_dimensionality::<Ix1>()?.to_owned();

        let (mean, var) = if training {
            let m = (n * h * w) as f32;
            let mut mean = Array1::zeros(c);
            let mut var = Array1::zeros(c);
            for (ch, plane) in input.axis_iter(Axis(1)).enumerate() {
                let mu = plane.mean().unwrap_or(0.0);
                mean[ch] = mu;
                var[ch] = plane.mapv(|v| (v - mu) * (v - mu)).mean().unwrap_or(0.0);
            }
            let unbiased = if m > 1.0 { &var * (m / (m - 1.0)) } else { var.clone() };
            let momentum = self.momentum;
            Zip::from(&mut self.running_mean)
                .and(mean.view().into_dyn())
                .for_each(|r, &b| *r = (1.0 - momentum) * *r + momentum * b);
            Zip::from(&mut self.running_var)
                .and(unbiased.view().into_dyn())
                .for_each(|r, &b| *r = (1.0 - momentum) * *r + momentum * b);
            (mean, var)
        } else {
            (
                self.running_mean.view().into_dimensionality::<Ix1>()?.to_owned(),
                self.running_var.view().into_dimensionality::<Ix1>()?.to_owned(),
            )
        };

        let eps = self.eps;
        let inv_std = var.mapv(|v| 1.0 / (v + eps).sqrt());
        let mut x_hat = input;
        for (ch, mut plane) in x_hat.axis_iter_mut(Axis(1)).enumerate() {
            let (mu, inv) = (mean[ch], inv_std[ch]);
            plane.mapv_inplace(|v| (v - mu) * inv);
        }
        let mut output = x_hat.clone();
        for (ch, mut plane) in output.axis_iter_mut(Axis(1)).enumerate() {
            let (g, b) = (gamma[ch], beta[ch]);
            plane.mapv_inplace(|v| v * g + b);
        }
        self.x_hat = x_hat;
        self.inv_std = inv_std;
        self.batch_statistics = training;
        Ok(output.into_dyn())
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let output_error = output_error.into_dimensionality::<Ix4>()?;
        if output_error.dim() != self.x_hat.dim() {
            return Err(incompatible_shape());
        }
        let (n, c, h, w) = output_error.dim();
        let m = (n * h * w).max(1) as f32;
        let gamma = self.weight.value.view().into_dimensionality::<Ix1>()?.to_owned();
        let mut gamma_error = Array1::zeros(c);
        let mut beta_error = Array1::zeros(c);
        let mut input_error = Array4::zeros(output_error.raw_dim());
        for ch in 0..c {
            let dy = output_error.index_axis(Axis(1), ch);
            let x_hat = self.x_hat.index_axis(Axis(1), ch);
            let sum_dy = dy.sum();
            let sum_dy_x_hat = (&dy * &x_hat).sum();
            gamma_error[ch] = sum_dy_x_hat;
            beta_error[ch] = sum_dy;
            let scale = gamma[ch] * self.inv_std[ch];
            let mut dx = input_error.index_axis_mut(Axis(1), ch);
            if self.batch_statistics {
                Zip::from(&mut dx)
                    .and(&dy)
                    .and(&x_hat)
                    .for_each(|d, &g, &xh| *d = scale * (g - sum_dy / m - xh * sum_dy_x_hat / m));
            } else {
                Zip::from(&mut dx).and(&dy).for_each(|d, &g| *d = scale * g);
            }
        }
        self.weight.grad = gamma_error.into_dyn();
        self.bias.grad = beta_error.into_dyn();
        Ok(input_error.into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn buffers(&self) -> Vec<(&'static str, &ArrayD<f32>)> {
        vec![
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ]
    }

    fn state_mut(&mut self) -> Vec<(&'static str, &mut ArrayD<f32>)> {
        vec![
            (self.weight.name, &mut self.weight.value),
            (self.bias.name, &mut self.bias.value),
            ("running_mean", &mut self.running_mean),
            ("running_var", &mut self.running_var),
        ]
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

/// Max pooling with a square window and a stride equal to the window.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    name: String,
    kernel_size: usize,
    argmax: Array4<usize>,
    input_dim: (usize, usize, usize, usize),
}

impl MaxPool2d {
    pub fn new(name: &str, kernel_size: usize) -> Self {
        Self {
            name: name.to_string(),
            kernel_size: kernel_size.max(1),
            argmax: Array4::zeros((0, 0, 0, 0)),
            input_dim: (0, 0, 0, 0),
        }
    }
}

impl Layer for MaxPool2d {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, _training: bool) -> Result<ArrayD<f32>> {
        let input = input.into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = input.dim();
        let k = self.kernel_size;
        let (out_h, out_w) = (h / k, w / k);
        let mut output = Array4::zeros((n, c, out_h, out_w));
        let mut argmax = Array4::zeros((n, c, out_h, out_w));
        for ((b, ch, i, j), out) in output.indexed_iter_mut() {
            let window = input.slice(s![b, ch, i * k..(i + 1) * k, j * k..(j + 1) * k]);
            let mut best = f32::NEG_INFINITY;
            let mut best_pos = 0;
            for (pos, v) in window.iter().enumerate() {
                if *v > best {
                    best = *v;
                    best_pos = pos;
                }
            }
            *out = best;
            argmax[[b, ch, i, j]] = best_pos;
        }
        self.argmax = argmax;
        self.input_dim = (n, c, h, w);
        Ok(output.into_dyn())
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let output_error = output_error.into_dimensionality::<Ix4>()?;
        if output_error.dim() != self.argmax.dim() {
            return Err(incompatible_shape());
        }
        let k = self.kernel_size;
        let mut input_error = Array4::zeros(self.input_dim);
        for ((b, ch, i, j), g) in output_error.indexed_iter() {
            let pos = self.argmax[[b, ch, i, j]];
            input_error[[b, ch, i * k + pos / k, j * k + pos % k]] += *g;
        }
        Ok(input_error.into_dyn())
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

/// Collapses every axis but the batch one.
#[derive(Debug, Clone)]
pub struct Flatten {
    name: String,
    input_shape: Vec<usize>,
}

impl Flatten {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input_shape: vec![],
        }
    }
}

impl Layer for Flatten {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, _training: bool) -> Result<ArrayD<f32>> {
        let shape = input.shape().to_vec();
        let batch = shape.first().copied().unwrap_or(0);
        let features: usize = shape.iter().skip(1).product();
        let output = input
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&[batch, features]))?;
        self.input_shape = shape;
        Ok(output)
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(output_error
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&self.input_shape))?)
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ActivationLayer {
    name: String,
    input: ArrayD<f32>,
    activation: fn(&ArrayD<f32>) -> ArrayD<f32>,
    activation_prime: fn(&ArrayD<f32>) -> ArrayD<f32>,
}

impl ActivationLayer {
    pub fn new(
        name: &str,
        activation: fn(&ArrayD<f32>) -> ArrayD<f32>,
        activation_prime: fn(&ArrayD<f32>) -> ArrayD<f32>,
    ) -> Self {
        Self {
            name: name.to_string(),
            input: ArrayD::zeros(IxDyn(&[0])),
            activation,
            activation_prime,
        }
    }

    pub fn relu(name: &str) -> Self {
        Self::new(name, relu, relu_prime)
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward_propagation(&mut self, input: ArrayD<f32>, _training: bool) -> Result<ArrayD<f32>> {
        self.input = input;
        Ok((self.activation)(&self.input))
    }

    fn backward_propagation(&mut self, output_error: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if output_error.shape() != self.input.shape() {
            return Err(incompatible_shape());
        }
        Ok((self.activation_prime)(&self.input) * output_error)
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const H: f32 = 1e-2;

    fn random(shape: &[usize], seed: u64) -> ArrayD<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array::random_using(IxDyn(shape), Uniform::new(-1.0, 1.0), &mut rng)
    }

    /// Scalar objective sum(layer(x) * r), whose output gradient is r.
    fn objective(layer: &mut dyn Layer, x: &ArrayD<f32>, r: &ArrayD<f32>) -> f32 {
        let output = layer.forward_propagation(x.clone(), true).unwrap();
        (&output * r).sum()
    }

    fn check_input_gradient(layer: &mut dyn Layer, x: &ArrayD<f32>, r: &ArrayD<f32>, tol: f32) {
        layer.forward_propagation(x.clone(), true).unwrap();
        let dx = layer.backward_propagation(r.clone()).unwrap();
        assert_eq!(dx.shape(), x.shape());
        for idx in [0, x.len() / 3, x.len() / 2, x.len() - 1] {
            let mut plus = x.clone();
            plus.as_slice_mut().unwrap()[idx] += H;
            let mut minus = x.clone();
            minus.as_slice_mut().unwrap()[idx] -= H;
            let numeric = (objective(layer, &plus, r) - objective(layer, &minus, r)) / (2.0 * H);
            assert_abs_diff_eq!(dx.as_slice().unwrap()[idx], numeric, epsilon = tol);
        }
    }

    fn check_parameter_gradients(
        layer: &mut dyn Layer,
        x: &ArrayD<f32>,
        r: &ArrayD<f32>,
        tol: f32,
    ) {
        layer.forward_propagation(x.clone(), true).unwrap();
        layer.backward_propagation(r.clone()).unwrap();
        let grads: Vec<ArrayD<f32>> = layer.parameters().iter().map(|p| p.grad.clone()).collect();
        for (p_idx, grad) in grads.iter().enumerate() {
            for idx in [0, grad.len() / 2, grad.len() - 1] {
                layer.parameters_mut()[p_idx].value.as_slice_mut().unwrap()[idx] += H;
                let plus = objective(layer, x, r);
                layer.parameters_mut()[p_idx].value.as_slice_mut().unwrap()[idx] -= 2.0 * H;
                let minus = objective(layer, x, r);
                layer.parameters_mut()[p_idx].value.as_slice_mut().unwrap()[idx] += H;
                let numeric = (plus - minus) / (2.0 * H);
                assert_abs_diff_eq!(grad.as_slice().unwrap()[idx], numeric, epsilon = tol);
            }
        }
    }

    #[test]
    fn linear_shapes_and_gradients() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Linear::new("fc", 5, 3, &mut rng);
        let x = random(&[4, 5], 2);
        let r = random(&[4, 3], 3);
        let out = layer.forward_propagation(x.clone(), true).unwrap();
        assert_eq!(out.shape(), &[4, 3]);
        check_input_gradient(&mut layer, &x, &r, 1e-2);
        check_parameter_gradients(&mut layer, &x, &r, 1e-2);
    }

    #[test]
    fn linear_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Linear::new("fc", 5, 3, &mut rng);
        assert!(layer.forward_propagation(random(&[2, 4], 1), true).is_err());
    }

    #[test]
    fn linear_init_is_bounded_by_fan_in() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = Linear::new("fc", 144, 2, &mut rng);
        let bound = 1.0 / 12.0;
        for p in layer.parameters() {
            assert!(p.value.iter().all(|v| v.abs() <= bound));
        }
    }

    #[test]
    fn conv_output_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Conv2d::new("conv", 1, 8, 4, 2, &mut rng);
        let out = layer
            .forward_propagation(ArrayD::zeros(IxDyn(&[2, 1, 74, 74])), true)
            .unwrap();
        assert_eq!(out.shape(), &[2, 8, 36, 36]);
        assert_eq!(layer.output_size(3), None);
    }

    #[test]
    fn conv_matches_direct_sum() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Conv2d::new("conv", 2, 3, 2, 2, &mut rng);
        let x = random(&[1, 2, 5, 5], 6);
        let out = layer.forward_propagation(x.clone(), true).unwrap();
        let w = layer.weight.value.clone();
        let b = layer.bias.value.clone();
        let (oc, i, j) = (1, 1, 0);
        let mut expected = b[[oc]];
        for c in 0..2 {
            for ki in 0..2 {
                for kj in 0..2 {
                    expected += w[[oc, c, ki, kj]] * x[[0, c, i * 2 + ki, j * 2 + kj]];
                }
            }
        }
        assert_abs_diff_eq!(out[[0, oc, i, j]], expected, epsilon = 1e-5);
    }

    #[test]
    fn conv_gradients() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut layer = Conv2d::new("conv", 2, 3, 3, 2, &mut rng);
        let x = random(&[2, 2, 7, 7], 8);
        let r = random(&[2, 3, 3, 3], 9);
        check_input_gradient(&mut layer, &x, &r, 1e-2);
        check_parameter_gradients(&mut layer, &x, &r, 2e-2);
    }

    #[test]
    fn batch_norm_normalises_in_training() {
        let mut layer = BatchNorm2d::new("bn", 2);
        let x = random(&[4, 2, 3, 3], 10) * 5.0 + 3.0;
        let out = layer.forward_propagation(x, true).unwrap();
        for plane in out.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(plane.mean().unwrap(), 0.0, epsilon = 1e-4);
            let var = plane.mapv(|v| v * v).mean().unwrap();
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
        }
        // running mean moved a tenth of the way towards the batch mean
        assert!(layer.running_mean.iter().all(|m| *m > 0.0));
    }

    #[test]
    fn batch_norm_eval_uses_running_statistics() {
        let mut layer = BatchNorm2d::new("bn", 1);
        let x = ArrayD::from_elem(IxDyn(&[1, 1, 2, 2]), 3.0);
        // fresh running stats: mean 0, var 1
        let out = layer.forward_propagation(x, false).unwrap();
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 3.0 / (1.0f32 + 1e-5).sqrt(), epsilon = 1e-5);
        }
        assert!(layer.running_mean.iter().all(|m| *m == 0.0));
    }

    #[test]
    fn batch_norm_gradients() {
        let mut layer = BatchNorm2d::new("bn", 2);
        layer.weight.value = random(&[2], 11) + 1.5;
        layer.bias.value = random(&[2], 12);
        let x = random(&[3, 2, 2, 2], 13);
        let r = random(&[3, 2, 2, 2], 14);
        check_input_gradient(&mut layer, &x, &r, 2e-2);
        check_parameter_gradients(&mut layer, &x, &r, 2e-2);
    }

    #[test]
    fn max_pool_routes_gradient_to_maximum() {
        let mut layer = MaxPool2d::new("pool", 2);
        let mut x = ArrayD::zeros(IxDyn(&[1, 1, 4, 4]));
        x[[0, 0, 1, 0]] = 5.0;
        x[[0, 0, 2, 3]] = 7.0;
        let out = layer.forward_propagation(x, true).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 2]);
        assert_eq!(out[[0, 0, 0, 0]], 5.0);
        assert_eq!(out[[0, 0, 1, 1]], 7.0);
        let dx = layer
            .backward_propagation(ArrayD::ones(IxDyn(&[1, 1, 2, 2])))
            .unwrap();
        assert_eq!(dx[[0, 0, 1, 0]], 1.0);
        assert_eq!(dx[[0, 0, 2, 3]], 1.0);
        assert_eq!(dx.sum(), 4.0);
    }

    #[test]
    fn flatten_round_trips_shape() {
        let mut layer = Flatten::new("flatten");
        let x = random(&[2, 16, 3, 3], 15);
        let out = layer.forward_propagation(x.clone(), true).unwrap();
        assert_eq!(out.shape(), &[2, 144]);
        let back = layer.backward_propagation(out).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn relu_layer_masks_gradient() {
        let mut layer = ActivationLayer::relu("relu");
        let x = ndarray::arr2(&[[-1.0, 2.0]]).into_dyn();
        layer.forward_propagation(x, true).unwrap();
        let dx = layer
            .backward_propagation(ndarray::arr2(&[[3.0, 3.0]]).into_dyn())
            .unwrap();
        assert_eq!(dx, ndarray::arr2(&[[0.0, 3.0]]).into_dyn());
    }
}

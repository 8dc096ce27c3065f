use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::network::layers::{ActivationLayer, BatchNorm2d, Conv2d, Flatten, Linear, MaxPool2d};
use crate::network::Network;

/// Screen channels fed to the network.
pub const INPUT_CHANNELS: usize = 1;
pub const KERNEL_SIZE: usize = 4;
pub const STRIDE: usize = 2;
pub const POOL_SIZE: usize = 2;

fn conv_size(size: usize) -> usize {
    size.saturating_sub(KERNEL_SIZE) / STRIDE + 1
}

/// Side of the last feature map for a square input of side `input_size`.
pub fn feature_size(input_size: usize) -> usize {
    conv_size(conv_size(conv_size(input_size) / POOL_SIZE))
}

/// Convolutional Q network: three conv/batch-norm/relu blocks, a max pool
/// after the first one and a linear head with one output per action.
///
/// A 74x74 screen leaves a 16x3x3 feature map, so the head sees 144 inputs.
pub fn dqn(input_size: usize, n_actions: usize, seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    let side = feature_size(input_size);
    let conv1 = Conv2d::new("conv1", INPUT_CHANNELS, 8, KERNEL_SIZE, STRIDE, &mut rng);
    let conv2 = Conv2d::new("conv2", 8, 16, KERNEL_SIZE, STRIDE, &mut rng);
    let conv3 = Conv2d::new("conv3", 16, 16, KERNEL_SIZE, STRIDE, &mut rng);
    let head = Linear::new("head", 16 * side * side, n_actions, &mut rng);

    let mut network = Network::new();
    network.add(Box::new(conv1));
    network.add(Box::new(BatchNorm2d::new("bn1", 8)));
    network.add(Box::new(ActivationLayer::relu("relu1")));
    network.add(Box::new(MaxPool2d::new("pool1", POOL_SIZE)));
    network.add(Box::new(conv2));
    network.add(Box::new(BatchNorm2d::new("bn2", 16)));
    network.add(Box::new(ActivationLayer::relu("relu2")));
    network.add(Box::new(conv3));
    network.add(Box::new(BatchNorm2d::new("bn3", 16)));
    network.add(Box::new(ActivationLayer::relu("relu3")));
    network.add(Box::new(Flatten::new("flatten")));
    network.add(Box::new(head));
    network
}

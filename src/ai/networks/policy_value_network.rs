use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;

/// Convolutional policy-value network over `[channels, rows, cols]` planes.
///
/// ```text
/// Input:  [batch, channels, rows, cols]
/// Conv1:  channels -> 32, 3x3 same padding, ReLU
/// Conv2:  32 -> 64, 3x3 same padding, ReLU
/// Flatten: 64 * rows * cols
/// FC_shared: -> hidden, ReLU
/// Policy head: hidden -> actions (logits)
/// Value head:  hidden -> 1 (pre-tanh)
/// ```
#[derive(Module, Debug)]
pub struct PolicyValueNetwork<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    fc_shared: Linear<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct PolicyValueNetworkConfig {
    pub channels: usize,
    pub rows: usize,
    pub cols: usize,
    pub actions: usize,
    #[config(default = 128)]
    pub hidden: usize,
}

impl PolicyValueNetworkConfig {
    /// Flattened width after the convolutional trunk.
    pub fn trunk_width(&self) -> usize {
        64 * self.rows * self.cols
    }

    pub fn input_size(&self) -> usize {
        self.channels * self.rows * self.cols
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PolicyValueNetwork<B> {
        PolicyValueNetwork {
            conv1: Conv2dConfig::new([self.channels, 32], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            fc_shared: LinearConfig::new(self.trunk_width(), self.hidden).init(device),
            policy_head: LinearConfig::new(self.hidden, self.actions).init(device),
            value_head: LinearConfig::new(self.hidden, 1).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> PolicyValueNetwork<B> {
    /// Forward pass: input [batch, c, h, w] -> (logits [batch, actions], value [batch, 1]).
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch_size, _, rows, cols] = input.dims();

        let x = self.relu.forward(self.conv1.forward(input));
        let x = self.relu.forward(self.conv2.forward(x));
        let x = x.reshape([batch_size, 64 * rows * cols]);
        let x = self.relu.forward(self.fc_shared.forward(x));

        let logits = self.policy_head.forward(x.clone());
        let value = self.value_head.forward(x);

        (logits, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_policy_value_network_output_shapes() {
        let device = Default::default();
        let config = PolicyValueNetworkConfig::new(3, 6, 7, 7).with_hidden(16);
        let network = config.init::<TestBackend>(&device);

        let input = Tensor::zeros([2, 3, 6, 7], &device);
        let (logits, value) = network.forward(input);
        assert_eq!(logits.shape().dims, [2, 7]);
        assert_eq!(value.shape().dims, [2, 1]);
    }

    #[test]
    fn test_trunk_width_follows_board() {
        let config = PolicyValueNetworkConfig::new(2, 3, 3, 9);
        assert_eq!(config.trunk_width(), 64 * 9);
        assert_eq!(config.input_size(), 18);
        assert_eq!(config.hidden, 128);
    }
}

//! CNN Model Architecture for Image Classification
//!
//! A small convolutional network built with the Burn framework. Three conv
//! blocks extract features, a global average pool removes the dependency on
//! input size, and a two-layer dense head produces one logit per label.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Width of the hidden dense layer
pub const HIDDEN_UNITS: usize = 128;

/// Configuration for the ImageClassifier CNN model
#[derive(Config, Debug, PartialEq)]
pub struct ImageClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Number of input channels (1, 3 or 4)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first conv block; doubled by each following block
    #[config(default = "16")]
    pub base_filters: usize,

    /// Dropout rate before the output layer
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ImageClassifierConfig {
    /// Build the model on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        ImageClassifier::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU and a 2x2 MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Image classifier CNN
///
/// Architecture:
/// - 3 convolutional blocks: base, 2x base and 4x base filters
/// - Global average pooling
/// - Dense hidden layer with dropout, dense output layer
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> {
    pub fn new(config: &ImageClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let conv1 = ConvBlock::new(config.in_channels, base, device);
        let conv2 = ConvBlock::new(base, base * 2, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 4, HIDDEN_UNITS).init(device);
        let dropout = DropoutConfig::new(config.dropout).init();
        let fc2 = LinearConfig::new(HIDDEN_UNITS, config.num_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            global_pool,
            fc1,
            dropout,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass followed by a softmax over classes
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = ImageClassifierConfig::new(5).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 24], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_grayscale_input() {
        let device = Default::default();
        let model = ImageClassifierConfig::new(2)
            .with_in_channels(1)
            .with_base_filters(4)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([1, 1, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 2]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = ImageClassifierConfig::new(3)
            .with_base_filters(4)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);
        let probs: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();

        for row in probs.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }
}

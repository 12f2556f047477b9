//! Burn ML models for skin-lesion classification.
//!
//! This crate defines the convolutional attention classifier:
//! - `AttnVgg`: VGG-style backbone with grid attention at three depths.
//! - `AttentionBlock`: compatibility-map attention over one feature level.
//!
//! These are pure Burn Modules with no awareness of datasets or checkpoints;
//! the `eval` crate wires them to data loading and weight files.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;

/// Channel width of the deepest feature level; attention operates here.
const FEATURE_DIM: usize = 512;

#[derive(Debug, Clone)]
pub struct AttnVggConfig {
    pub num_classes: usize,
    /// Enable the attention branch. When off, classification uses the
    /// pooled global feature and no attention maps are produced.
    pub attention: bool,
    /// Softmax spatial normalization of the attention maps; sigmoid otherwise.
    pub normalize_attn: bool,
}

impl Default for AttnVggConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            attention: true,
            normalize_attn: false,
        }
    }
}

/// One forward-pass result: class scores plus up to three compatibility maps.
///
/// The maps are raw (pre-normalization) `[batch, 1, h, w]` tensors at strides
/// 8/16/32 relative to the input; visualization applies the configured
/// softmax/sigmoid normalization.
pub struct ClassifierOutput<B: Backend> {
    pub scores: Tensor<B, 2>,
    pub attn: [Option<Tensor<B, 4>>; 3],
}

/// Two 3x3 conv + batch-norm + relu layers followed by a 2x2 max-pool.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: nn::BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: nn::BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |cin: usize, cout: usize| {
            Conv2dConfig::new([cin, cout], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: conv(in_channels, out_channels),
            norm1: nn::BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels, out_channels),
            norm2: nn::BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(input)));
        let x = relu(self.norm2.forward(self.conv2.forward(x)));
        self.pool.forward(x)
    }
}

/// Grid attention over one feature level.
///
/// The compatibility map is `c = conv1x1(l + up(g))` where `g` is the
/// deepest feature map bilinearly upsampled to `l`'s spatial size. With
/// softmax normalization the attended feature is a weighted sum over
/// positions; with sigmoid it is a weighted average.
#[derive(Debug, Module)]
pub struct AttentionBlock<B: Backend> {
    op: Conv2d<B>,
}

impl<B: Backend> AttentionBlock<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            op: Conv2dConfig::new([FEATURE_DIM, 1], [1, 1]).init(device),
        }
    }

    fn forward(
        &self,
        l: Tensor<B, 4>,
        g: Tensor<B, 4>,
        normalize_attn: bool,
    ) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let [batch, channels, height, width] = l.dims();
        let g_up = interpolate(
            g,
            [height, width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        );
        let c = self.op.forward(l.clone() + g_up);

        let f = if normalize_attn {
            let a = softmax(c.clone().reshape([batch, height * width]), 1)
                .reshape([batch, 1, height, width]);
            (a * l).sum_dim(3).sum_dim(2).reshape([batch, channels])
        } else {
            let a = sigmoid(c.clone());
            (a * l).mean_dim(3).mean_dim(2).reshape([batch, channels])
        };
        (c, f)
    }
}

/// VGG-style convolutional classifier with optional grid attention at the
/// outputs of blocks 3, 4, and 5 (spatial strides 8/16/32).
///
/// The global head pools adaptively, so the module accepts any input size;
/// evaluation feeds 224x224 crops while tests use small synthetic images.
#[derive(Debug, Module)]
pub struct AttnVgg<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    block4: ConvBlock<B>,
    block5: ConvBlock<B>,
    avg_pool: AdaptiveAvgPool2d,
    project3: Option<Conv2d<B>>,
    attn1: Option<AttentionBlock<B>>,
    attn2: Option<AttentionBlock<B>>,
    attn3: Option<AttentionBlock<B>>,
    classify: nn::Linear<B>,
    normalize_attn: bool,
}

impl<B: Backend> AttnVgg<B> {
    pub fn new(cfg: AttnVggConfig, device: &B::Device) -> Self {
        let classify_in = if cfg.attention {
            3 * FEATURE_DIM
        } else {
            FEATURE_DIM
        };
        let (project3, attn1, attn2, attn3) = if cfg.attention {
            (
                Some(Conv2dConfig::new([256, FEATURE_DIM], [1, 1]).init(device)),
                Some(AttentionBlock::new(device)),
                Some(AttentionBlock::new(device)),
                Some(AttentionBlock::new(device)),
            )
        } else {
            (None, None, None, None)
        };
        Self {
            block1: ConvBlock::new(3, 64, device),
            block2: ConvBlock::new(64, 128, device),
            block3: ConvBlock::new(128, 256, device),
            block4: ConvBlock::new(256, FEATURE_DIM, device),
            block5: ConvBlock::new(FEATURE_DIM, FEATURE_DIM, device),
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            project3,
            attn1,
            attn2,
            attn3,
            classify: nn::LinearConfig::new(classify_in, cfg.num_classes).init(device),
            normalize_attn: cfg.normalize_attn,
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> ClassifierOutput<B> {
        let x = self.block1.forward(images);
        let x = self.block2.forward(x);
        let l1 = self.block3.forward(x);
        let l2 = self.block4.forward(l1.clone());
        let g = self.block5.forward(l2.clone());

        match (&self.project3, &self.attn1, &self.attn2, &self.attn3) {
            (Some(project3), Some(attn1), Some(attn2), Some(attn3)) => {
                let l1 = project3.forward(l1);
                let (c1, f1) = attn1.forward(l1, g.clone(), self.normalize_attn);
                let (c2, f2) = attn2.forward(l2, g.clone(), self.normalize_attn);
                let (c3, f3) = attn3.forward(g.clone(), g, self.normalize_attn);
                let scores = self.classify.forward(Tensor::cat(vec![f1, f2, f3], 1));
                ClassifierOutput {
                    scores,
                    attn: [Some(c1), Some(c2), Some(c3)],
                }
            }
            _ => {
                let [batch, channels, _, _] = g.dims();
                let pooled = self.avg_pool.forward(g).reshape([batch, channels]);
                ClassifierOutput {
                    scores: self.classify.forward(pooled),
                    attn: [None, None, None],
                }
            }
        }
    }
}

pub mod prelude {
    pub use super::{AttentionBlock, AttnVgg, AttnVggConfig, ClassifierOutput};
}

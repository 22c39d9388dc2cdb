use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::Tensor;
use burn::tensor::activation::{relu, tanh};
use burn::tensor::backend::Backend;

use crate::action::ACTION_DIM;

pub const DEFAULT_HIDDEN: usize = 64;
pub const DEFAULT_STACK: usize = 2;

/// Feed-forward approximator: ReLU hidden stack, tanh-bounded output so every
/// prediction lies in the action range.
#[derive(Module, Debug)]
pub struct ValueNetwork<B: Backend> {
    stack: Vec<Linear<B>>,
    output: Linear<B>,
}

impl<B> ValueNetwork<B>
where
    B: Backend,
    B::Device: Default,
{
    pub fn new(inputs: usize, hidden: usize) -> Self {
        let device = B::Device::default();
        let mut stack = Vec::with_capacity(DEFAULT_STACK);
        let mut width = inputs;
        for _ in 0..DEFAULT_STACK {
            stack.push(LinearConfig::new(width, hidden).init(&device));
            width = hidden;
        }
        let output = LinearConfig::new(width, ACTION_DIM).init(&device);
        Self { stack, output }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut activations = input;
        for layer in &self.stack {
            activations = relu(layer.forward(activations));
        }
        tanh(self.output.forward(activations))
    }
}

use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    optim::GradientsParams,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use core::marker::PhantomData;

const CLIP_EPSILON: f64 = 1e-6;

/// Global L2 norm of every float parameter gradient of the module.
///
/// Parameters without a gradient are skipped.
pub fn grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = GradNormVisitor::<M> {
        grads,
        squared_sum: 0.0,
        phantom: PhantomData,
    };
    module.visit(&mut visitor);

    visitor.squared_sum.sqrt()
}

/// Rescale every gradient by `max_norm / (norm + 1e-6)` when the global norm exceeds `max_norm`.
pub fn clip_grad_norm<B, M>(module: &M, grads: GradientsParams, max_norm: f64) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = grad_norm(module, &grads);

    if norm <= max_norm {
        return grads;
    }

    let mut visitor = GradScaleVisitor::<M> {
        grads,
        scale: max_norm / (norm + CLIP_EPSILON),
        phantom: PhantomData,
    };
    module.visit(&mut visitor);

    visitor.grads
}

struct GradNormVisitor<'a, M> {
    grads: &'a GradientsParams,
    squared_sum: f64,
    phantom: PhantomData<M>,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> ModuleVisitor<B> for GradNormVisitor<'_, M> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id) {
            let squared: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.squared_sum += squared;
        }
    }
}

struct GradScaleVisitor<M> {
    grads: GradientsParams,
    scale: f64,
    phantom: PhantomData<M>,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> ModuleVisitor<B> for GradScaleVisitor<M> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads
                .register::<B::InnerBackend, D>(param.id, grad.mul_scalar(self.scale));
        }
    }
}

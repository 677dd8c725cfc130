use burn::tensor::{activation::relu, backend::Backend, Distribution, Shape, Tensor};

/// Renormalizes each slice along dimension 0 so that its L2 norm does not exceed `max_norm`.
///
/// Slices already under the cap are left untouched. The result is not connected to the
/// input in the autodiff graph.
pub fn project_max_norm<B: Backend, const D: usize>(
    weight: Tensor<B, D>,
    max_norm: f64,
) -> Tensor<B, D> {
    let dims = weight.dims();
    let rows = dims[0];
    let cols = weight.shape().num_elements() / rows;

    let flat: Tensor<B, 2> = weight.detach().reshape([rows, cols]);
    let norms = flat.clone().powf_scalar(2.0).sum_dim(1).sqrt();

    let scale = norms
        .clone()
        .add_scalar(1e-7)
        .recip()
        .mul_scalar(max_norm)
        .mask_fill(norms.lower_equal_elem(max_norm), 1.0);

    (flat * scale).reshape(dims)
}

/// Max-norm projection with a straight-through gradient: the value is that of
/// [`project_max_norm`], while the gradient reaches `weight` unscaled.
pub fn renorm<B: Backend, const D: usize>(weight: Tensor<B, D>, max_norm: f64) -> Tensor<B, D> {
    let projected = project_max_norm(weight.clone(), max_norm);
    projected + (weight.clone() - weight.detach())
}

/// Glorot (Xavier) uniform initialization with unit gain.
pub fn glorot_uniform<B: Backend, const D: usize>(
    shape: [usize; D],
    fan_in: usize,
    fan_out: usize,
    device: &B::Device,
) -> Tensor<B, D> {
    let a = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Tensor::random(Shape::new(shape), Distribution::Uniform(-a, a), device)
}

/// Exponential linear unit with `alpha = 1`.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let negative = -relu(-x.clone());
    relu(x) + negative.exp().sub_scalar(1.0)
}

/// Drops the trailing unit axis of a `[batch, outputs, time, 1]` tensor.
pub fn squeeze_final_output<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [_, _, _, n_last] = x.dims();
    assert!(
        n_last == 1,
        "Final output must have a unit trailing dimension, got {}.",
        n_last
    );
    x.squeeze(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::max_abs;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn renorm_caps_rows_over_the_limit() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[3.0f32, 4.0], [0.3, 0.4]]),
            &device,
        );

        let out = renorm(weight, 1.0);
        let values = out.into_data().to_vec::<f32>().unwrap();

        // First row had norm 5, second row 0.5.
        assert!((values[0] - 0.6).abs() < 1e-5);
        assert!((values[1] - 0.8).abs() < 1e-5);
        assert!((values[2] - 0.3).abs() < 1e-6);
        assert!((values[3] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn renorm_works_on_conv_kernels() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 4>::random(
            [6, 2, 5, 1],
            Distribution::Uniform(-4.0, 4.0),
            &device,
        );

        let out = renorm(weight, 0.5);
        let norms = out
            .reshape([6, 10])
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for norm in norms {
            assert!(norm <= 0.5 + 1e-5, "norm {} exceeds cap", norm);
        }
    }

    #[test]
    fn elu_matches_definition() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-2.0, -0.5, 0.0, 1.5], &device);

        let values = elu(x).into_data().to_vec::<f32>().unwrap();
        let expected = [(-2.0f32).exp() - 1.0, (-0.5f32).exp() - 1.0, 0.0, 1.5];

        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-5);
        }
    }

    #[test]
    fn glorot_bounds() {
        let device = Default::default();
        let w = glorot_uniform::<TestBackend, 2>([20, 30], 30, 20, &device);
        let bound = (6.0f64 / 50.0).sqrt();

        assert!(max_abs(w) <= bound);
    }

    #[test]
    fn renorm_passes_gradients_through_unscaled() {
        type TrainBackend = Autodiff<TestBackend>;

        let device = Default::default();
        let weight = Tensor::<TrainBackend, 2>::from_data(
            TensorData::from([[6.0f32, 8.0]]),
            &device,
        )
        .require_grad();
        let x = Tensor::<TrainBackend, 2>::from_data(TensorData::from([[1.0f32], [0.0]]), &device);

        let out = renorm(weight.clone(), 1.0).matmul(x);
        let value = out.clone().into_data().to_vec::<f32>().unwrap();
        assert!((value[0] - 0.6).abs() < 1e-5);

        let grads = out.sum().backward();
        let grad = weight.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        assert!((grad[0] - 1.0).abs() < 1e-6);
        assert!(grad[1].abs() < 1e-6);
    }

    #[test]
    fn projection_leaves_small_rows_alone() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.1f32, 0.2], [30.0, 40.0]]),
            &device,
        );

        let values = project_max_norm(weight, 2.0)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(&values[0..2], &[0.1, 0.2]);
        assert!((values[2] - 1.2).abs() < 1e-5);
        assert!((values[3] - 1.6).abs() < 1e-5);
    }
}

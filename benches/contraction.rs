use criterion::{criterion_group, criterion_main, Criterion};
use dctn::eps::{contract, contract_with_input, make_unit_theoretical_output_std, Tiling};
use dctn::{EpsesPlusLinear, EpsesSpec, ForwardContext, Initialization};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

fn images(batch: usize, rng: &mut StdRng) -> Array4<f32> {
    Array4::from_shape_simple_fn((batch, 28, 28, 2), || StandardNormal.sample(&mut *rng))
}

fn bench_contraction(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let spec: EpsesSpec = "(4,6),(3,6)".parse().unwrap();
    let cores = make_unit_theoretical_output_std(&spec, 2, &mut rng).unwrap();
    let input = images(64, &mut rng);

    c.bench_function("contract_single_core_sliding", |b| {
        b.iter(|| contract(cores[0].view(), input.view(), Tiling::Sliding).unwrap())
    });
    c.bench_function("contract_single_core_non_overlapping", |b| {
        b.iter(|| contract(cores[0].view(), input.view(), Tiling::NonOverlapping).unwrap())
    });
    c.bench_function("contract_with_input_two_cores", |b| {
        b.iter(|| contract_with_input(&cores, input.view(), Tiling::Sliding).unwrap())
    });
}

fn bench_forward(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let spec: EpsesSpec = "(4,6),(3,6)".parse().unwrap();
    let model = EpsesPlusLinear::new(&spec, &Initialization::UnitTheoreticalOutputStd, 0.9, &mut rng)
        .unwrap();
    let input = images(64, &mut rng);

    c.bench_function("eps_plus_linear_forward_eval", |b| {
        b.iter(|| model.forward(input.view(), &mut ForwardContext::eval()).unwrap())
    });
    let mut ctx = ForwardContext::train(2);
    c.bench_function("eps_plus_linear_forward_train", |b| {
        b.iter(|| model.forward(input.view(), &mut ctx).unwrap())
    });
}

criterion_group!(benches, bench_contraction, bench_forward);
criterion_main!(benches);

//! Criterion benchmarks for the host row-softmax device.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use smax_common::{DeviceCapabilities, Matrix};
use smax_kernels::{HostDevice, Softmax, reference};

fn bench_input(n_rows: usize, n_cols: usize) -> Matrix<f32> {
    let data = (0..n_rows * n_cols).map(|i| ((i * 7919) % 1024) as f32 / 256.0 - 2.0).collect();
    Matrix::from_vec(n_rows, n_cols, data).expect("bench shape")
}

fn bench_row_softmax(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_softmax");
    let runner = Softmax::new(HostDevice::new(DeviceCapabilities::sm90()));

    for (n_rows, n_cols) in [(1823, 781), (4096, 128), (256, 4096), (64, 16384)] {
        let input = bench_input(n_rows, n_cols);
        group.throughput(Throughput::Bytes((2 * n_rows * n_cols * 4) as u64));

        group.bench_with_input(
            BenchmarkId::new("host", format!("{n_rows}x{n_cols}")),
            &input,
            |b, input| b.iter(|| runner.run(black_box(input)).expect("softmax")),
        );
        group.bench_with_input(
            BenchmarkId::new("reference", format!("{n_rows}x{n_cols}")),
            &input,
            |b, input| b.iter(|| reference::softmax_rows(black_box(input))),
        );
    }
    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let runner = Softmax::new(HostDevice::mock());
    let input = bench_input(1823, 781);
    c.bench_function("plan_1823x781", |b| b.iter(|| runner.plan(black_box(&input)).expect("plan")));
}

criterion_group!(benches, bench_row_softmax, bench_planning);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use sitemix::{Mixture, Parameters, Simulator, System, DEFAULT_SEED};

const MULTIVALENT_SIG: &str =
    "A(p[a1.P$m a2.P$m a3.P$m], l[r.A$w], r[l.A]), P(a1[p.A], a2[p.A], a3[p.A], d[d.P$m])";

fn kernel_system(n_agents: u64) -> System {
    let mut params = Parameters::default();
    params.signature_string = Some(MULTIVALENT_SIG.to_owned());
    params.rng_seed = Some(DEFAULT_SEED);
    let mut sys = System::new(params, 0).expect("bench system");
    sys.rc_bond_formation_inter = 1e-3;
    sys.rc_bond_formation_intra = 1e-2;
    for rate in sys.rc_bond_dissociation.iter_mut() {
        *rate = 1.;
    }
    sys.init_agents = vec![n_agents, n_agents];
    sys
}

fn criterion_benchmark(c: &mut Criterion) {
    let sys = kernel_system(500);

    c.bench_function("multivalent 10k events", |b| {
        b.iter(|| {
            let mut mix = Mixture::from_counts(black_box(&sys));
            let mut sim = Simulator::new(DEFAULT_SEED, 0., 0);
            for _ in 0..10_000 {
                if !sim.advance_time(&mix) {
                    break;
                }
                sim.step(&mut mix, &sys);
            }
            sim.event
        })
    });
}

criterion_group! {
    name=benches; config=Criterion::default().sample_size(10); targets=criterion_benchmark
}
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use phylodate::species_tree::SpeciesTree;

fn species_tree(leaves: usize, rng: &mut StdRng) -> SpeciesTree {
    let labels: Vec<String> = (0..leaves).map(|i| format!("t{}", i)).collect();
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    SpeciesTree::from_taxa(&refs, true, rng).expect("valid taxon set")
}

fn bench_dating(criterion: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tree = species_tree(64, &mut rng);

    criterion.bench_function("randomize-64", |bench| {
        bench.iter(|| tree.randomize(&mut rng));
    });

    let mut tree = species_tree(64, &mut rng);
    criterion.bench_function("rank-sweep-64", |bench| {
        bench.iter(|| {
            for rank in 0..tree.tree().inner_node_count() {
                let _ = tree.move_up(rank);
            }
        });
    });

    let mut tree = species_tree(64, &mut rng);
    criterion.bench_function("backup-restore-64", |bench| {
        bench.iter(|| {
            let backup = tree.dating_backup();
            tree.restore_dates(&backup);
        });
    });
}

criterion_group!(benches, bench_dating);
criterion_main!(benches);

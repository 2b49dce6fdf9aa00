//! Integration tests for whole-alignment simulation.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use treevo_sim::base::{is_gap, SeqType, Sequence, State};
use treevo_sim::errors::{BuilderError, ConfigError};
use treevo_sim::evolution::IndelDistribution;
use treevo_sim::model::{ReversibleModel, SubstitutionModel};
use treevo_sim::simulation::{MemorySink, SimulationBuilder, SimulationConfig};
use treevo_sim::tree::{Edge, Phylogeny, ROOT_NAME};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn jc() -> Arc<dyn SubstitutionModel> {
    Arc::new(ReversibleModel::jc().unwrap())
}

/// ((A:0.1,B:0.2)AB:0.05,(C:0.15,D:0.1)CD:0.1)root
fn four_taxa() -> Phylogeny {
    let mut tree = Phylogeny::new("root");
    let ab = tree.add_child(0, "AB", Edge::new(0.05)).unwrap();
    tree.add_child(ab, "A", Edge::new(0.1)).unwrap();
    tree.add_child(ab, "B", Edge::new(0.2)).unwrap();
    let cd = tree.add_child(0, "CD", Edge::new(0.1)).unwrap();
    tree.add_child(cd, "C", Edge::new(0.15)).unwrap();
    tree.add_child(cd, "D", Edge::new(0.1)).unwrap();
    tree
}

fn geometric(p: f64) -> IndelDistribution {
    IndelDistribution::Geometric { p }
}

fn random_root(len: usize, seed: u64) -> Sequence {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let states: Vec<State> = (0..len).map(|_| rng.random_range(0..4)).collect();
    Sequence::from_states(states)
}

fn differences(a: &[State], b: &[State]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x != y).count()
}

#[test]
fn test_zero_length_branches_copy_the_root() {
    let root = random_root(300, 1);
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B", "C"], 0.0))
        .model(jc())
        .length(300)
        .root_sequence(root.clone())
        .seed(1)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();

    assert_eq!(output.transition_matrix_branches + output.rate_matrix_branches, 0);
    for name in ["A", "B", "C"] {
        assert_eq!(sink.get(name).unwrap(), root.as_slice());
    }
}

#[test]
fn test_jukes_cantor_change_fraction_both_methods() {
    let t: f64 = 0.1;
    let expected = 0.75 * (1.0 - (-4.0 * t / 3.0).exp());
    // 0.0 forces P(t) sampling, 10.0 the event loop
    for threshold in [0.0, 10.0] {
        let mut tree = Phylogeny::new("root");
        tree.add_child(0, "A", Edge::new(t)).unwrap();
        tree.add_child(0, "B", Edge::new(0.0)).unwrap();
        let sim = SimulationBuilder::new()
            .tree(tree)
            .model(jc())
            .length(10_000)
            .simulation_threshold(threshold)
            .seed(11)
            .build()
            .unwrap();
        let mut sink = MemorySink::new();
        let output = sim.run(&mut sink).unwrap();
        if threshold == 0.0 {
            assert_eq!(output.transition_matrix_branches, 1);
        } else {
            assert_eq!(output.rate_matrix_branches, 1);
        }

        let fraction =
            differences(sink.get("A").unwrap(), sink.get("B").unwrap()) as f64 / 10_000.0;
        assert!(
            (fraction - expected).abs() < 0.015,
            "threshold {threshold}: fraction {fraction}, expected {expected}"
        );
    }
}

#[test]
fn test_same_seed_same_alignment() {
    let build = |seed| {
        SimulationBuilder::new()
            .tree(four_taxa())
            .model(jc())
            .length(500)
            .seed(seed)
            .build()
            .unwrap()
    };
    let mut first = MemorySink::new();
    let mut second = MemorySink::new();
    let mut other = MemorySink::new();
    build(5).run(&mut first).unwrap();
    build(5).run(&mut second).unwrap();
    build(6).run(&mut other).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, other);
}

#[test]
fn test_zero_indel_rates_match_no_indels() {
    let base = SimulationBuilder::new()
        .tree(four_taxa())
        .model(jc())
        .length(400)
        .seed(21);
    let with_zero = base
        .clone()
        .indels(0.0, 0.0, geometric(0.5), geometric(0.5))
        .build()
        .unwrap();

    let mut plain = MemorySink::new();
    let mut zero = MemorySink::new();
    base.build().unwrap().run(&mut plain).unwrap();
    let output = with_zero.run(&mut zero).unwrap();
    assert_eq!(plain, zero);
    assert_eq!(output.events.insertions + output.events.deletions, 0);
}

#[test]
fn test_indels_align_every_sequence() {
    init_tracing();
    let sim = SimulationBuilder::new()
        .tree(four_taxa())
        .model(jc())
        .length(300)
        .indels(0.2, 0.2, geometric(0.5), geometric(0.5))
        .write_internal_sequences(true)
        .seed(3)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();

    assert!(output.events.insertions > 0);
    assert!(output.events.deletions > 0);
    assert_eq!(output.sequence_length, 300 + output.events.inserted_sites);
    assert_eq!(sink.len(), 7);
    for (name, states) in sink.records() {
        assert_eq!(states.len(), output.sequence_length, "{name}");
    }
    assert!(sink
        .records()
        .iter()
        .any(|(_, states)| states.iter().any(|&s| is_gap(s))));

    // tips come first, internal nodes after them
    let names: Vec<&str> = sink.records().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(&names[..4], &["A", "B", "C", "D"]);
}

#[test]
fn test_internal_output_does_not_change_tips() {
    let base = SimulationBuilder::new()
        .tree(four_taxa())
        .model(jc())
        .length(250)
        .indels(0.3, 0.1, geometric(0.4), geometric(0.6))
        .seed(17);

    let mut tips_only = MemorySink::new();
    let mut with_internal = MemorySink::new();
    base.clone().build().unwrap().run(&mut tips_only).unwrap();
    base.write_internal_sequences(true)
        .build()
        .unwrap()
        .run(&mut with_internal)
        .unwrap();

    for (name, states) in tips_only.records() {
        assert_eq!(with_internal.get(name), Some(states.as_slice()), "{name}");
    }
}

#[test]
fn test_parallel_reconciliation_matches_sequential() {
    let base = SimulationBuilder::new()
        .tree(four_taxa())
        .model(jc())
        .length(200)
        .indels(0.3, 0.3, geometric(0.5), geometric(0.5))
        .rebuild_indel_history(0.25)
        .seed(8);
    let mut sequential = MemorySink::new();
    let mut parallel = MemorySink::new();
    base.clone().build().unwrap().run(&mut sequential).unwrap();
    base.parallel(true)
        .build()
        .unwrap()
        .run(&mut parallel)
        .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn test_ascertainment_keeps_only_variant_sites() {
    let names = ["A", "B", "C", "D", "E", "F"];
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&names, 0.5))
        .model(jc())
        .length(200)
        .ascertainment(2.0)
        .seed(4)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();

    assert_eq!(output.sequence_length, 200);
    for column in 0..200 {
        let first = sink.records()[0].1[column];
        assert!(
            sink.records().iter().any(|(_, s)| s[column] != first),
            "column {column} is constant"
        );
    }
}

#[test]
fn test_ascertainment_with_insertions_keeps_every_variant_site() {
    let names = ["A", "B", "C", "D", "E", "F"];
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&names, 0.5))
        .model(jc())
        .length(200)
        .indels(0.3, 0.05, geometric(0.3), geometric(0.5))
        .ascertainment(2.0)
        .seed(12)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();

    assert!(output.events.inserted_sites > 0);
    // far more than 200 of the simulated columns vary on these branches
    assert!(output.sequence_length > 200, "kept {}", output.sequence_length);
    assert!(output.sequence_length <= 400 + output.events.inserted_sites);
    assert_eq!(sink.len(), names.len());
    for (name, states) in sink.records() {
        assert_eq!(states.len(), output.sequence_length, "{name}");
    }
    for column in 0..output.sequence_length {
        let mut seen = sink
            .records()
            .iter()
            .map(|(_, s)| s[column])
            .filter(|&s| !is_gap(s));
        let first = seen.next();
        assert!(
            first.is_some_and(|f| seen.any(|s| s != f)),
            "column {column} is constant"
        );
    }
}

#[test]
fn test_ascertainment_fails_without_enough_variants() {
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B"], 0.0))
        .model(jc())
        .length(50)
        .ascertainment(1.0)
        .seed(4)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    assert!(sim.run(&mut sink).is_err());
    assert!(sink.is_empty());
}

#[test]
fn test_codon_alignment() {
    let codons = SeqType::Codon.num_states();
    let model: Arc<dyn SubstitutionModel> =
        Arc::new(ReversibleModel::equal_rates(codons).unwrap());

    let result = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B"], 0.1))
        .model(model.clone())
        .seq_type(SeqType::Codon)
        .length(301)
        .build();
    assert!(matches!(
        result,
        Err(BuilderError::Config(ConfigError::CodonLength(301)))
    ));

    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B"], 0.1))
        .model(model)
        .seq_type(SeqType::Codon)
        .length(300)
        .seed(2)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    sim.run(&mut sink).unwrap();
    let a = sink.get("A").unwrap();
    assert_eq!(a.len(), 100);
    assert!(a.iter().all(|&s| (s as usize) < codons));
}

#[test]
fn test_tip_rooted_tree_with_indels() {
    // T1 is the root and a tip
    let mut tree = Phylogeny::new("T1");
    let x = tree.add_child(0, "X", Edge::new(0.1)).unwrap();
    tree.add_child(x, "T2", Edge::new(0.2)).unwrap();
    let y = tree.add_child(x, "Y", Edge::new(0.1)).unwrap();
    tree.add_child(y, "T3", Edge::new(0.1)).unwrap();
    tree.add_child(y, "T4", Edge::new(0.3)).unwrap();

    let sim = SimulationBuilder::new()
        .tree(tree)
        .model(jc())
        .length(200)
        .indels(0.2, 0.2, geometric(0.5), geometric(0.5))
        .write_internal_sequences(true)
        .seed(9)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();

    assert!(sink.get(ROOT_NAME).is_none());
    for name in ["T1", "T2", "T3", "T4", "X", "Y"] {
        assert_eq!(sink.get(name).map(<[State]>::len), Some(output.sequence_length));
    }
}

#[test]
fn test_fundi_permutes_listed_taxa_only() {
    let root = random_root(400, 12);
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B"], 0.0))
        .model(jc())
        .length(400)
        .root_sequence(root.clone())
        .fundi(["A"], 0.5)
        .seed(12)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    sim.run(&mut sink).unwrap();

    assert_eq!(sink.get("B").unwrap(), root.as_slice());
    let a = sink.get("A").unwrap();
    assert_ne!(a, root.as_slice());
    let mut sorted_a = a.to_vec();
    let mut sorted_root = root.into_states();
    sorted_a.sort_unstable();
    sorted_root.sort_unstable();
    assert_eq!(sorted_a, sorted_root);
}

#[test]
fn test_sequencing_error_on_tips() {
    let model: Arc<dyn SubstitutionModel> =
        Arc::new(ReversibleModel::jc().unwrap().with_dna_error(0.1).unwrap());
    let root = random_root(1_000, 30);
    let sim = SimulationBuilder::new()
        .tree(Phylogeny::star(&["A", "B"], 0.0))
        .model(model)
        .length(1_000)
        .root_sequence(root.clone())
        .seed(30)
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    sim.run(&mut sink).unwrap();
    for name in ["A", "B"] {
        assert_eq!(differences(sink.get(name).unwrap(), root.as_slice()), 100);
    }
}

#[test]
fn test_json_configuration() {
    let config = SimulationConfig::from_json(
        r#"{
            "execution": { "seed": 99 },
            "sequence": { "length": 120 },
            "indels": {
                "insertion_rate": 0.1,
                "deletion_rate": 0.1,
                "insertion_distribution": { "kind": "zipf", "a": 1.7, "max": 20 },
                "deletion_distribution": { "kind": "negative_binomial", "r": 1.0, "q": 0.5 }
            }
        }"#,
    )
    .unwrap();
    let sim = SimulationBuilder::from_config(config)
        .tree(four_taxa())
        .model(jc())
        .build()
        .unwrap();
    let mut sink = MemorySink::new();
    let output = sim.run(&mut sink).unwrap();
    assert_eq!(output.seed, 99);
    assert_eq!(sink.len(), 4);
    assert!(sink
        .records()
        .iter()
        .all(|(_, s)| s.len() == output.sequence_length));
}

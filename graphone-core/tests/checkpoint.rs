use std::fs;

use graphone_core::{GraphoneError, ModelConfig, Network, SeqFunc, Task};
use graphone_core::{encode_frames, Alphabet};

fn small() -> ModelConfig {
    ModelConfig {
        hidden_size: 8,
        layers: 2,
        mixer_size: 8,
        dropout: 0.25,
        spacing: 3,
        seed: 42,
        ..ModelConfig::default()
    }
}

#[test]
fn reload_reproduces_emissions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let network = Network::new(&small());
    network.save(&path).unwrap();

    let loaded = Network::load(&path).unwrap();
    assert_eq!(loaded.config(), network.config());

    let letters = Alphabet::letters();
    let frames = encode_frames(&letters.encode("graphone").unwrap(), letters.len(), 3);
    let batch = [frames];
    assert_eq!(
        network.model(Task::Pronounce).apply(&batch),
        loaded.model(Task::Pronounce).apply(&batch)
    );
    assert_eq!(
        network.costs("ship", "ʃIp").unwrap(),
        loaded.costs("ship", "ʃIp").unwrap()
    );

    // Saving the loaded copy gives the same bytes.
    let second = dir.path().join("again.json");
    loaded.save(&second).unwrap();
    assert_eq!(fs::read(&path).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn load_or_new_initialises_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");
    let fresh = Network::load_or_new(&path, &small()).unwrap();
    assert_eq!(fresh.spacing(), 3);
    assert!(!path.exists());

    fresh.save(&path).unwrap();
    let reloaded = Network::load_or_new(&path, &ModelConfig::default()).unwrap();
    assert_eq!(reloaded.spacing(), 3);
}

#[test]
fn corrupt_checkpoints_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");

    fs::write(&path, b"\x00\x01 definitely not json").unwrap();
    assert!(matches!(
        Network::load(&path),
        Err(GraphoneError::Checkpoint(_))
    ));
    assert!(matches!(
        Network::load_or_new(&path, &small()),
        Err(GraphoneError::Checkpoint(_))
    ));

    fs::write(&path, r#"{"format":"something-else","version":1}"#).unwrap();
    assert!(matches!(
        Network::load(&path),
        Err(GraphoneError::Checkpoint(_))
    ));
}

#[test]
fn mismatched_layer_shapes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let narrow = dir.path().join("narrow.json");
    let wide = dir.path().join("wide.json");
    Network::new(&ModelConfig {
        hidden_size: 4,
        ..small()
    })
    .save(&narrow)
    .unwrap();
    Network::new(&ModelConfig {
        hidden_size: 6,
        ..small()
    })
    .save(&wide)
    .unwrap();

    let read = |path: &std::path::Path| -> serde_json::Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    };
    let donor = read(&wide);

    // Every field parses, but the backward stack no longer feeds the mixer.
    let mut spliced = read(&narrow);
    spliced["speller"]["backward"] = donor["speller"]["backward"].clone();
    let path = dir.path().join("spliced.json");
    fs::write(&path, serde_json::to_vec(&spliced).unwrap()).unwrap();
    match Network::load(&path) {
        Err(GraphoneError::Checkpoint(message)) => assert!(message.contains("Spell")),
        other => panic!("expected a checkpoint error, got {other:?}"),
    }

    let mut spliced = read(&narrow);
    spliced["pronouncer"]["mixer"]["dropout"]["rate"] = serde_json::json!(1.0);
    fs::write(&path, serde_json::to_vec(&spliced).unwrap()).unwrap();
    assert!(matches!(
        Network::load(&path),
        Err(GraphoneError::Checkpoint(_))
    ));

    // The untouched file still loads and answers.
    let intact = Network::load(&narrow).unwrap();
    assert!(intact.spell("kæt").is_ok());
}

#[test]
fn overwriting_keeps_a_loadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    Network::new(&small()).save(&path).unwrap();
    let other = Network::new(&ModelConfig {
        seed: 1,
        ..small()
    });
    other.save(&path).unwrap();
    let loaded = Network::load(&path).unwrap();
    assert_eq!(
        loaded.costs("cat", "kæt").unwrap(),
        other.costs("cat", "kæt").unwrap()
    );
    let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(names.len(), 1);
}

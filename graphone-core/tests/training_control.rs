use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use graphone_core::{
    train_network, train_with, Dictionary, GraphoneError, ModelConfig, Network, SeqFunc, Task,
    TrainConfig, TrainState, Trainer,
};

fn toy() -> Dictionary {
    Dictionary::parse("cat,kæt\nbat,bæt\nship,ʃIp\nfish,fIʃ\ndog,dɔg\nzoo,zu\n").unwrap()
}

fn tiny_model() -> ModelConfig {
    ModelConfig {
        hidden_size: 6,
        layers: 1,
        mixer_size: 6,
        dropout: 0.2,
        spacing: 2,
        seed: 5,
        ..ModelConfig::default()
    }
}

fn quick(iterations: usize) -> TrainConfig {
    TrainConfig {
        step_size: 0.01,
        batch_size: 4,
        sub_batch_size: 1,
        concurrency: 3,
        validation_size: 2,
        validation_fraction: 0.0,
        max_iterations: Some(iterations),
        seed: 9,
        ..TrainConfig::default()
    }
}

#[test]
fn interrupt_before_start_still_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let running = Arc::new(AtomicBool::new(false));

    let (network, report) =
        train_network(&path, &toy(), Task::Spell, &tiny_model(), &quick(50), running).unwrap();
    assert!(report.interrupted);
    assert_eq!(report.iterations, 0);
    assert!(path.exists());

    let loaded = Network::load(&path).unwrap();
    assert_eq!(
        loaded.costs("cat", "kæt").unwrap(),
        network.costs("cat", "kæt").unwrap()
    );
}

#[test]
fn stop_during_training_saves_the_last_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let running = Arc::new(AtomicBool::new(true));
    let mut trainer = Trainer::new(
        TrainConfig {
            max_iterations: None,
            ..quick(0)
        },
        Arc::clone(&running),
    );
    let diagnostics = trainer.diagnostics();

    let worker_path = path.clone();
    let worker = thread::spawn(move || {
        train_with(&mut trainer, &worker_path, &toy(), Task::Spell, &tiny_model())
    });

    let deadline = Instant::now() + Duration::from_secs(120);
    while diagnostics.snapshot().iterations < 1 {
        if Instant::now() > deadline {
            running.store(false, Ordering::SeqCst);
            panic!("no iteration finished in time");
        }
        thread::sleep(Duration::from_millis(5));
    }
    let seen = diagnostics.snapshot().iterations;
    running.store(false, Ordering::SeqCst);

    let (network, report) = worker.join().unwrap().unwrap();
    assert!(report.interrupted);
    assert!(report.iterations >= seen);
    assert_eq!(diagnostics.snapshot().iterations, report.iterations);

    let loaded = Network::load(&path).unwrap();
    assert_eq!(
        loaded.model(Task::Spell).parameters(),
        network.model(Task::Spell).parameters()
    );
    assert_eq!(
        loaded.costs("ship", "ʃIp").unwrap(),
        network.costs("ship", "ʃIp").unwrap()
    );
}

#[test]
fn iteration_cap_and_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let mut trainer = Trainer::new(quick(5), Arc::new(AtomicBool::new(true)));
    let diagnostics = trainer.diagnostics();

    let (_, report) = train_with(&mut trainer, &path, &toy(), Task::Pronounce, &tiny_model())
        .unwrap();
    assert_eq!(report.iterations, 5);
    assert!(!report.interrupted);
    // 6 entries in batches of 4: 4, 2, 4, 2, 4.
    assert_eq!(report.epochs, 2);
    assert_eq!(trainer.state(), TrainState::Idle);

    let snap = diagnostics.snapshot();
    assert_eq!(snap.iterations, 5);
    assert_eq!(snap.samples, 16);
    assert_eq!(snap.sub_batches, 16);
    assert!(snap.last_cost > 0.0);
}

#[test]
fn resumes_from_the_saved_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let running = Arc::new(AtomicBool::new(true));
    let (first, _) = train_network(
        &path,
        &toy(),
        Task::Spell,
        &tiny_model(),
        &quick(3),
        Arc::clone(&running),
    )
    .unwrap();

    // A different model config is ignored once a checkpoint exists.
    let other = ModelConfig {
        hidden_size: 32,
        ..tiny_model()
    };
    running.store(false, Ordering::SeqCst);
    let (second, _) = train_network(&path, &toy(), Task::Spell, &other, &quick(3), running).unwrap();
    assert_eq!(second.config(), first.config());
    assert_eq!(
        second.model(Task::Spell).parameters(),
        first.model(Task::Spell).parameters()
    );
}

#[test]
fn worker_count_does_not_change_the_result() {
    let run = |concurrency: usize| {
        let mut network = Network::new(&tiny_model());
        let mut training = toy().with_task(Task::Spell).with_spacing(network.spacing());
        let mut trainer = Trainer::new(
            TrainConfig {
                concurrency,
                validation_size: 0,
                ..quick(4)
            },
            Arc::new(AtomicBool::new(true)),
        );
        let report = trainer
            .run(network.model_mut(Task::Spell), &mut training, None)
            .unwrap();
        (report.last_cost, network)
    };
    let (cost_one, net_one) = run(1);
    let (cost_many, net_many) = run(4);
    assert_eq!(cost_one, cost_many);
    assert_eq!(
        net_one.model(Task::Spell).parameters(),
        net_many.model(Task::Spell).parameters()
    );
}

#[test]
fn unalignable_sample_aborts_the_run() {
    let mut network = Network::new(&ModelConfig {
        spacing: 0,
        ..tiny_model()
    });
    // Three phone frames cannot carry "catt" (needs five).
    let mut training = Dictionary::parse("catt,kæt\ncat,kæt\n")
        .unwrap()
        .with_task(Task::Spell)
        .with_spacing(0);
    let mut trainer = Trainer::new(quick(3), Arc::new(AtomicBool::new(true)));
    let err = trainer
        .run(network.model_mut(Task::Spell), &mut training, None)
        .unwrap_err();
    assert!(matches!(err, GraphoneError::UnalignableSequence { .. }));
    assert_eq!(trainer.state(), TrainState::Idle);
    assert!(!network.model(Task::Spell).dropout_active());
}

#[test]
fn empty_training_set_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        validation_fraction: 1.0,
        ..quick(1)
    };
    let err = train_network(
        &dir.path().join("net.json"),
        &toy(),
        Task::Spell,
        &tiny_model(),
        &config,
        Arc::new(AtomicBool::new(true)),
    )
    .unwrap_err();
    assert!(matches!(err, GraphoneError::Config(_)));
    assert!(!dir.path().join("net.json").exists());
}

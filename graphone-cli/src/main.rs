//! `graphone` command-line entry point.
//!
//! Training runs on a blocking task so Ctrl-C can be observed on the async
//! side; the handler only flips the shared `running` flag and the loop
//! saves the checkpoint before returning.

mod args;
mod settings;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use args::{parse_args, Command, TrainArgs, USAGE};
use graphone_core::{rate, train_network, Dictionary, Network};
use rand::{rngs::StdRng, SeedableRng};
use settings::load_settings;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphone=info,graphone_core=info".parse().unwrap()),
        )
        .init();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => println!("{USAGE}"),
        Command::Train(args) => train(args).await?,
        Command::Spell { net, input, decoder } => {
            let network = Network::load(&net)?;
            println!("{}", network.spell_with(&input, decoder)?);
        }
        Command::Pronounce { net, input, decoder } => {
            let network = Network::load(&net)?;
            println!("{}", network.pronounce_with(&input, decoder)?);
        }
        Command::Costs {
            net,
            spelling,
            phonetic,
        } => {
            let network = Network::load(&net)?;
            let (spell, pronounce) = network.costs(&spelling, &phonetic)?;
            println!("spell cost: {spell:.6}");
            println!("pronounce cost: {pronounce:.6}");
        }
        Command::Rate {
            net,
            data,
            task,
            decoder,
        } => {
            let network = Network::load(&net)?;
            let dictionary = Dictionary::load(&data)?;
            let rating = rate(
                &network,
                &dictionary,
                task,
                decoder,
                &mut StdRng::from_entropy(),
            )?;
            println!(
                "Got {}/{} ({:.2}%)",
                rating.correct,
                rating.total,
                100.0 * rating.accuracy()
            );
        }
        Command::Split {
            data,
            fraction,
            out,
        } => split(&data, fraction, &out)?,
    }
    Ok(())
}

async fn train(args: TrainArgs) -> anyhow::Result<()> {
    let mut settings = load_settings(args.config.as_deref())?;
    settings.apply_overrides(&args);

    let dictionary = Dictionary::load(&args.data)
        .with_context(|| format!("loading dictionary {}", args.data.display()))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current iteration");
            flag.store(false, Ordering::SeqCst);
        }
    });

    let task = args.task;
    let (_, report) = tokio::task::spawn_blocking(move || {
        train_network(
            &args.net,
            &dictionary,
            task,
            &settings.model,
            &settings.train,
            running,
        )
    })
    .await
    .context("training task panicked")??;

    info!(
        "done: iterations={} epochs={} interrupted={}",
        report.iterations, report.epochs, report.interrupted
    );
    Ok(())
}

fn split(data: &Path, fraction: f64, out: &Path) -> anyhow::Result<()> {
    let dictionary = Dictionary::load(data)?;
    let (validation, training) = dictionary.hash_split(fraction);
    validation.write_sorted(&out.join("validation.txt"))?;
    training.write_sorted(&out.join("training.txt"))?;
    info!(
        "wrote {} validation and {} training entries to {}",
        validation.len(),
        training.len(),
        out.display()
    );
    Ok(())
}

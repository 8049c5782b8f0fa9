//! Hand-rolled argument parsing.

use std::path::PathBuf;

use graphone_core::{Decoder, Task};

pub const USAGE: &str = "Usage: graphone <command> [options]

Commands:
  train      --data <dict> [--net <file>] [--task spell|pronounce] [--config <file.json>]
             [--step <f>] [--batch <n>] [--validation <f>] [--workers <n>] [--iterations <n>]
  spell      --input <phones> [--net <file>] [--decoder best-path|prefix]
  pronounce  --input <spelling> [--net <file>] [--decoder best-path|prefix]
  costs      --spelling <word> --phonetic <phones> [--net <file>]
  rate       --data <dict> [--net <file>] [--task spell|pronounce] [--decoder ...]
  split      --data <dict> [--validation <f>] [--out <dir>]";

const DEFAULT_NET: &str = "out_net.json";
const DEFAULT_DATA: &str = "cmudict-IPA.txt";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Train(TrainArgs),
    Spell { net: PathBuf, input: String, decoder: Decoder },
    Pronounce { net: PathBuf, input: String, decoder: Decoder },
    Costs { net: PathBuf, spelling: String, phonetic: String },
    Rate { net: PathBuf, data: PathBuf, task: Task, decoder: Decoder },
    Split { data: PathBuf, fraction: f64, out: PathBuf },
    Help,
}

/// `train` options. `None` leaves the config file (or default) value alone.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainArgs {
    pub net: PathBuf,
    pub data: PathBuf,
    pub task: Task,
    pub config: Option<PathBuf>,
    pub step: Option<f32>,
    pub batch: Option<usize>,
    pub validation: Option<f64>,
    pub workers: Option<usize>,
    pub iterations: Option<usize>,
}

#[derive(Default)]
struct Flags {
    net: Option<PathBuf>,
    data: Option<PathBuf>,
    task: Option<Task>,
    config: Option<PathBuf>,
    decoder: Option<Decoder>,
    input: Option<String>,
    spelling: Option<String>,
    phonetic: Option<String>,
    out: Option<PathBuf>,
    step: Option<f32>,
    batch: Option<usize>,
    validation: Option<f64>,
    workers: Option<usize>,
    iterations: Option<usize>,
}

fn value<I: Iterator<Item = String>>(it: &mut I, flag: &str) -> Result<String, String> {
    it.next().ok_or_else(|| format!("missing value for {flag}"))
}

fn number<T: std::str::FromStr, I: Iterator<Item = String>>(
    it: &mut I,
    flag: &str,
) -> Result<T, String> {
    value(it, flag)?
        .parse::<T>()
        .map_err(|_| format!("invalid value for {flag}"))
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut it = args.into_iter();
    let Some(command) = it.next() else {
        return Ok(Command::Help);
    };
    if matches!(command.as_str(), "--help" | "-h" | "help") {
        return Ok(Command::Help);
    }

    let mut flags = Flags::default();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--net" => flags.net = Some(PathBuf::from(value(&mut it, "--net")?)),
            "--data" => flags.data = Some(PathBuf::from(value(&mut it, "--data")?)),
            "--config" => flags.config = Some(PathBuf::from(value(&mut it, "--config")?)),
            "--out" => flags.out = Some(PathBuf::from(value(&mut it, "--out")?)),
            "--task" => {
                flags.task = Some(
                    value(&mut it, "--task")?
                        .parse::<Task>()
                        .map_err(|e| e.to_string())?,
                )
            }
            "--decoder" => {
                flags.decoder = Some(
                    value(&mut it, "--decoder")?
                        .parse::<Decoder>()
                        .map_err(|e| e.to_string())?,
                )
            }
            "--input" => flags.input = Some(value(&mut it, "--input")?),
            "--spelling" => flags.spelling = Some(value(&mut it, "--spelling")?),
            "--phonetic" => flags.phonetic = Some(value(&mut it, "--phonetic")?),
            "--step" => flags.step = Some(number(&mut it, "--step")?),
            "--batch" => flags.batch = Some(number(&mut it, "--batch")?),
            "--validation" => flags.validation = Some(number(&mut it, "--validation")?),
            "--workers" => flags.workers = Some(number(&mut it, "--workers")?),
            "--iterations" => flags.iterations = Some(number(&mut it, "--iterations")?),
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let net = flags.net.unwrap_or_else(|| PathBuf::from(DEFAULT_NET));
    let data = flags.data.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA));
    let task = flags.task.unwrap_or(Task::Spell);
    let decoder = flags.decoder.unwrap_or_default();
    let required = |v: Option<String>, flag: &str| v.ok_or_else(|| format!("missing {flag}"));

    match command.as_str() {
        "train" => Ok(Command::Train(TrainArgs {
            net,
            data,
            task,
            config: flags.config,
            step: flags.step,
            batch: flags.batch,
            validation: flags.validation,
            workers: flags.workers,
            iterations: flags.iterations,
        })),
        "spell" => Ok(Command::Spell {
            net,
            input: required(flags.input, "--input")?,
            decoder,
        }),
        "pronounce" => Ok(Command::Pronounce {
            net,
            input: required(flags.input, "--input")?,
            decoder,
        }),
        "costs" => Ok(Command::Costs {
            net,
            spelling: required(flags.spelling, "--spelling")?,
            phonetic: required(flags.phonetic, "--phonetic")?,
        }),
        "rate" => Ok(Command::Rate {
            net,
            data,
            task,
            decoder,
        }),
        "split" => Ok(Command::Split {
            data,
            fraction: flags.validation.unwrap_or(0.1),
            out: flags.out.unwrap_or_else(|| PathBuf::from(".")),
        }),
        other => Err(format!("unknown command: {other}")),
    }
}

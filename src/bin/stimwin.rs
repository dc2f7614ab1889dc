use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use tdms_stim::{
    load_config, locate, order_files, process_experiment, sort_files, PipelineConfig, TdmsSource,
};

#[derive(Parser)]
#[command(name = "stimwin", about = "Locate stimulation blocks in TDMS recordings and cut aligned windows")]
struct Args {
    /// YAML pipeline configuration (defaults are used for missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the TDMS files of an experiment, grouped and ordered
    Scan {
        /// Experiment directory
        dir: PathBuf,
    },
    /// Print the stimulation onset and offset
    Locate {
        /// Experiment directory
        dir: PathBuf,
    },
    /// Cut all signals around the stimulation block and summarize them
    Window {
        /// Experiment directory
        dir: PathBuf,

        /// Padding before and after the block, in minutes
        #[arg(long)]
        pad_minutes: Option<f64>,

        /// Skip outlier removal on physiological channels
        #[arg(long)]
        no_outliers: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Scan { dir } => {
            let groups = sort_files(&dir)?;
            for (label, files) in [
                ("high-speed", &groups.highspeed),
                ("low-speed", &groups.lowspeed),
                ("physio", &groups.physio),
                ("recruitment", &groups.recruitment),
            ] {
                println!("{} ({}):", label, files.len());
                for file in files {
                    println!("  {}", file.display());
                }
                if let Some(advisory) = order_files(files).advisory {
                    println!("  warning: {}", advisory);
                }
            }
        }
        Command::Locate { dir } => {
            let groups = sort_files(&dir)?;
            let block = locate(&TdmsSource::new(&cfg.loader), &groups.highspeed, &cfg.stim)?;
            println!("Stimulation onset:  {:.3} ms (file {})", block.start_ms, block.first_file);
            println!("Stimulation offset: {:.3} ms (file {})", block.stop_ms, block.last_file);
            println!("Duration: {:.3} s", block.duration_ms() / 1000.0);
        }
        Command::Window {
            dir,
            pad_minutes,
            no_outliers,
        } => {
            if let Some(pad) = pad_minutes {
                cfg.window.pad_minutes = pad;
            }
            if no_outliers {
                cfg.outliers = None;
            }

            let experiment = process_experiment(&dir, &cfg)?;
            for advisory in &experiment.advisories {
                println!("warning: {}", advisory);
            }
            let window = &experiment.window;
            println!(
                "Window: {:.1} ms to {:.1} ms around a {:.1} ms block",
                -window.pad_ms,
                window.stop_ms + window.pad_ms,
                window.stop_ms
            );
            for (name, samples) in &window.channels {
                println!("  {:<20} {:>10} samples", name, samples.len());
            }
        }
    }

    Ok(())
}

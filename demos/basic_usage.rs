use ndarray::s;
use std::env;
use std::error::Error;
use tdms_stim::{load, process_experiment, PipelineConfig, WindowConfig};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let dir = env::args().nth(1).unwrap_or_else(|| "data/exp12".to_string());

    let cfg = PipelineConfig {
        window: WindowConfig { pad_minutes: 5.0 },
        ..PipelineConfig::default()
    };
    let experiment = process_experiment(&dir, &cfg)?;

    // Print file information
    println!("High-speed files:");
    for (i, path) in experiment.files.highspeed.iter().enumerate() {
        let tdms = load(path)?;
        println!(
            "  {}: {} ({} segments, {} channels)",
            i,
            path.display(),
            tdms.num_segments,
            tdms.num_channels()
        );
    }
    for advisory in &experiment.advisories {
        println!("Warning: {}", advisory);
    }

    // Print the stimulation block
    let block = experiment.block;
    println!("\nStimulation block:");
    println!("  Onset: {:.3} s (file {})", block.start_ms / 1000.0, block.first_file);
    println!("  Offset: {:.3} s (file {})", block.stop_ms / 1000.0, block.last_file);
    println!("  Duration: {:.3} s", block.duration_ms() / 1000.0);

    // Summarize the aligned window
    let window = &experiment.window;
    println!(
        "\nWindow: {:.1} to {:.1} s relative to onset",
        -window.pad_ms / 1000.0,
        (window.stop_ms + window.pad_ms) / 1000.0
    );
    for name in window.names() {
        println!("  {}: {} samples", name, window.channels[name].len());
    }

    // Show the first few blood pressure samples with their times
    if let (Some(bp), Some(t)) = (window.channels.get("mean_bp"), window.time_base("mean_bp")) {
        let n = bp.len().min(5);
        println!("\nmean_bp (first {} samples):", n);
        for (time, value) in t.slice(s![..n]).iter().zip(bp.slice(s![..n]).iter()) {
            println!("  {:>10.1} ms: {:.1} mmHg", time, value);
        }
    }

    Ok(())
}

//! Cam-fps-bench binary: benchmark the configured capture device and report results.
//!
//! Usage: `cam-fps-bench [CONFIG.toml]`. Results are printed to stdout as JSON; the
//! exit status is non-zero when any rate is out of tolerance or nothing was measured.

use std::path::PathBuf;

use cam_fps_bench::{BenchConfig, FpsValidator, V4l2Provider};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> cam_fps_bench::Result<bool> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(BenchConfig::default_path, PathBuf::from);
    let config = BenchConfig::load_from_file(&config_path)?;
    config.validate()?;

    let provider = V4l2Provider::new(&config.device_dir, &config.node_prefix);
    let results = cam_fps_bench::run(&provider, &config)?;

    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(FpsValidator::new(config.tolerance).accept_run(&results))
}

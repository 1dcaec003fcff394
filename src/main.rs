use anyhow::{Context, Result};
use eventmerge::config::PipelineConfig;
use eventmerge::logging::{log, obj, run_id, v_str, Domain, Level};
use eventmerge::pipeline;
use eventmerge::report::ExitCode;
use std::env;
use std::path::PathBuf;

fn usage() -> ! {
    eprintln!("usage: eventmerge <input.csv> <output_dir>");
    std::process::exit(ExitCode::InvalidInput.code());
}

fn run(input: PathBuf, output_dir: PathBuf) -> Result<i32> {
    let cfg = PipelineConfig::from_env();
    log(
        Level::Info,
        Domain::System,
        "run_start",
        obj(&[
            ("run_id", v_str(run_id())),
            ("input", v_str(&input.display().to_string())),
            ("output_dir", v_str(&output_dir.display().to_string())),
            ("stale_bars", serde_json::json!(cfg.stale_bars)),
        ]),
    );

    let outcome = pipeline::run(&input, &output_dir, &cfg)
        .with_context(|| format!("failed to write outputs to {}", output_dir.display()))?;
    Ok(outcome.exit_code.code())
}

fn main() {
    let mut args = env::args().skip(1);
    let (input, output_dir) = match (args.next(), args.next()) {
        (Some(input), Some(output_dir)) => (PathBuf::from(input), PathBuf::from(output_dir)),
        _ => usage(),
    };

    if !input.is_file() {
        eprintln!("input file not found: {}", input.display());
        std::process::exit(ExitCode::InvalidInput.code());
    }

    match run(input, output_dir) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(ExitCode::Fatal.code());
        }
    }
}

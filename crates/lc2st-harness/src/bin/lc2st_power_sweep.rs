use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use lc2st_harness::DIAG_ID;
use lc2st_harness::log::{LogFormat, init_logging};
use lc2st_harness::report::write_report;
use lc2st_harness::scenario::{PowerSweepConfig, power_sweep};

#[derive(Debug)]
struct CliConfig {
    config_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    seed: Option<u64>,
    runs: Option<usize>,
    log_format: LogFormat,
    log_filter: String,
}

fn print_help() {
    let help = "\
lc2st-power-sweep: C2ST rejection rates over Gaussian mean shifts

USAGE:
    cargo run -p lc2st-harness --bin lc2st-power-sweep -- [OPTIONS]

OPTIONS:
    --config <PATH>        Sweep config JSON (defaults for omitted fields)
    --output <PATH>        Write report JSON to file (stdout when omitted)
    --seed <u64>           Override the config seed
    --runs <usize>         Override the number of runs per shift
    --log-format <FMT>     text|json (default text)
    --log-filter <FILTER>  Tracing filter when LC2ST_LOG is unset (default info)
    -h, --help             Show this help
";
    println!("{help}");
}

fn next_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cli = CliConfig {
        config_path: None,
        output_path: None,
        seed: None,
        runs: None,
        log_format: LogFormat::Text,
        log_filter: "info".to_owned(),
    };

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => {
                cli.config_path = Some(PathBuf::from(next_value(args, &mut index, "--config")?));
            }
            "--output" => {
                cli.output_path = Some(PathBuf::from(next_value(args, &mut index, "--output")?));
            }
            "--seed" => {
                let value = next_value(args, &mut index, "--seed")?;
                cli.seed = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid --seed value: {value}"))?,
                );
            }
            "--runs" => {
                let value = next_value(args, &mut index, "--runs")?;
                cli.runs = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid --runs value: {value}"))?,
                );
            }
            "--log-format" => {
                let value = next_value(args, &mut index, "--log-format")?;
                cli.log_format = LogFormat::parse(value).ok_or_else(|| {
                    format!("invalid --log-format value: {value} (expected text|json)")
                })?;
            }
            "--log-filter" => {
                cli.log_filter = next_value(args, &mut index, "--log-filter")?.to_owned();
            }
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            unknown => return Err(format!("unknown option: {unknown}")),
        }
        index += 1;
    }
    Ok(cli)
}

fn load_config(path: Option<&PathBuf>) -> Result<PowerSweepConfig, String> {
    let Some(path) = path else {
        return Ok(PowerSweepConfig::default());
    };
    let payload = std::fs::read(path)
        .map_err(|error| format!("config_read_failed path={} error={error}", path.display()))?;
    serde_json::from_slice::<PowerSweepConfig>(&payload)
        .map_err(|error| format!("config_parse_failed path={} error={error}", path.display()))
}

fn run(args: &[String]) -> Result<(), String> {
    let cli = parse_args(args)?;
    init_logging(cli.log_format, &cli.log_filter)?;

    let mut config = load_config(cli.config_path.as_ref())?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(runs) = cli.runs {
        config.runs = runs;
    }
    let report =
        power_sweep(&config).map_err(|error| format!("power_sweep_failed error={error}"))?;

    if let Some(path) = &cli.output_path {
        write_report(path, &report)?;
    } else {
        let payload = serde_json::to_string_pretty(&report)
            .map_err(|error| format!("report_serialize_failed: {error}"))?;
        println!("{payload}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if error.is_empty() => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR diag_id={DIAG_ID} lc2st-power-sweep failed: {error}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parses_overrides() {
        let cli =
            parse_args(&args(&["--seed", "7", "--runs", "3", "--log-format", "json"])).unwrap();
        assert_eq!(cli.seed, Some(7));
        assert_eq!(cli.runs, Some(3));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.output_path.is_none());
    }

    #[test]
    fn rejects_missing_and_unknown_values() {
        assert_eq!(
            parse_args(&args(&["--seed"])).unwrap_err(),
            "--seed requires a value"
        );
        assert!(parse_args(&args(&["--runs", "many"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).unwrap_err().contains("unknown option"));
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        assert_eq!(load_config(None).unwrap(), PowerSweepConfig::default());
        let err = load_config(Some(&PathBuf::from("/nonexistent/sweep.json"))).unwrap_err();
        assert!(err.starts_with("config_read_failed"), "{err}");
    }
}

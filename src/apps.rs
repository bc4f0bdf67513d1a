use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};

use crate::config::CurationConfig;
use crate::constants::splits::RATIO_SUM_EPSILON;
use crate::pipeline::CurationPipeline;
use crate::splits::{SplitRatios, StratificationKey};

#[derive(Debug, Parser)]
#[command(
    name = "curate",
    disable_help_subcommand = true,
    about = "Curate a multi-annotator content-safety corpus",
    long_about = "Validate raw annotations, merge them into canonical records, remove duplicates, rebalance categories, and write a stratified train/validation/test split with audit reports.",
    after_help = "Flags override values from --config. Set RUST_LOG=info for stage logging."
)]
/// CLI for `curate`.
///
/// Common usage:
/// - `curate --input annotations/ --output-dir corpus/`
/// - Pin the split: `--seed 7 --split-ratios 0.8,0.1,0.1`
/// - Stratify on more keys: `--stratify-by category,language,severity`
struct CurateCli {
    #[arg(
        long = "input",
        value_name = "PATH",
        required = true,
        help = "Annotation .jsonl file or directory; repeat as needed"
    )]
    inputs: Vec<PathBuf>,
    #[arg(
        long = "output-dir",
        value_name = "DIR",
        help = "Directory receiving corpus files and reports"
    )]
    output_dir: PathBuf,
    #[arg(long, value_name = "FILE", help = "JSON curation config")]
    config: Option<PathBuf>,
    #[arg(long, help = "Deterministic seed override for balancing and splitting")]
    seed: Option<u64>,
    #[arg(
        long = "split-ratios",
        value_name = "TRAIN,VALIDATION,TEST",
        value_parser = parse_split_ratios_arg,
        help = "Comma-separated split ratios that must sum to 1.0"
    )]
    split: Option<SplitRatios>,
    #[arg(
        long = "stratify-by",
        value_name = "KEYS",
        value_delimiter = ',',
        help = "Comma-separated stratification keys (category, language, severity, context)"
    )]
    stratify_by: Option<Vec<StratificationKey>>,
    #[arg(
        long = "dedup-threshold",
        value_parser = parse_unit_interval,
        help = "Near-duplicate similarity threshold in (0, 1]"
    )]
    dedup_threshold: Option<f64>,
    #[arg(long = "upsample-cap", help = "Max upsampling as a multiple of natural count")]
    upsample_cap: Option<f64>,
    #[arg(
        long = "balance-tolerance",
        value_parser = parse_unit_interval,
        help = "Allowed per-category deviation from the target share"
    )]
    balance_tolerance: Option<f64>,
    #[arg(long = "no-balance", help = "Skip the balancing stage")]
    no_balance: bool,
}

impl CurateCli {
    fn into_config(self) -> Result<(CurationConfig, Vec<PathBuf>, PathBuf), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => CurationConfig::from_json_file(path)?,
            None => CurationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(ratios) = self.split {
            config.split.ratios = ratios;
        }
        if let Some(keys) = self.stratify_by {
            config.split.keys = keys;
        }
        if let Some(threshold) = self.dedup_threshold {
            config.dedup.near_duplicate_threshold = threshold;
        }
        if let Some(cap) = self.upsample_cap {
            config.balance.upsample_cap = cap;
        }
        if let Some(tolerance) = self.balance_tolerance {
            config.balance.tolerance = tolerance;
        }
        if self.no_balance {
            config.balance.target.clear();
        }
        Ok((config, self.inputs, self.output_dir))
    }
}

/// Run the `curate` command with the given arguments (program name excluded).
pub fn run_curate<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<CurateCli, _>(std::iter::once("curate".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let (config, inputs, output_dir) = cli.into_config()?;
    let pipeline = CurationPipeline::new(config)?;
    let output = pipeline.run_paths(&inputs)?;
    output.write_to(&output_dir)?;
    print!("{}", output.summary());
    Ok(())
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn parse_split_ratios_arg(raw: &str) -> Result<SplitRatios, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        return Err("--split-ratios expects exactly 3 comma-separated values".to_string());
    }
    let parse = |name: &str, value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid {name} ratio '{}': must be a float", value.trim()))
    };
    let ratios = SplitRatios {
        train: parse("train", parts[0])?,
        validation: parse("validation", parts[1])?,
        test: parse("test", parts[2])?,
    };
    let sum = ratios.train + ratios.validation + ratios.test;
    if (sum - 1.0).abs() > RATIO_SUM_EPSILON {
        return Err(format!(
            "split ratios must sum to 1.0, got {:.6} (train={}, validation={}, test={})",
            sum, ratios.train, ratios.validation, ratios.test
        ));
    }
    if ratios.train < 0.0 || ratios.validation < 0.0 || ratios.test < 0.0 {
        return Err("split ratios must be non-negative".to_string());
    }
    Ok(ratios)
}

fn parse_unit_interval(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("could not parse '{raw}' as a float"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside [0, 1]"));
    }
    Ok(value)
}

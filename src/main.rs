//! Command line front end for shuffle-records
//!
//! Shuffles the records of every file matching the input patterns into a
//! deterministic order and writes them as balanced output shards.

use clap::{Arg, ArgAction, Command};
use log::info;
use std::process;

use shuffle_records::{
    config::{ShuffleConfig, ShuffleConfigBuilder},
    error::{ShuffleError, ShuffleResult},
    record_io::Compression,
    shuffle, MemoryStep, EXIT_SUCCESS,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = run();
    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("shuffle-records: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run() -> ShuffleResult<i32> {
    let matches = build_cli().get_matches();
    let config = parse_config_from_matches(&matches)?;

    let summary = shuffle(&config)?;
    info!(
        "Shuffled {} records into {} shards",
        summary.num_records,
        summary.shards.len()
    );
    Ok(EXIT_SUCCESS)
}

fn build_cli() -> Command {
    Command::new("shuffle-records")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shuffle length-delimited record files into balanced shards")
        .long_about("Reorder every record matched by the input patterns into a deterministic, content-derived pseudorandom order and write them as a fixed number of balanced shards. With --memory-step, at most that many records are held in memory at once; the rest are spilled to temporary bucket files.")
        .arg(Arg::new("input-patterns")
            .long("input-patterns")
            .visible_alias("input_pattern_list")
            .help("Comma-separated list of record file glob patterns")
            .value_name("PATTERNS")
            .required(true))
        .arg(Arg::new("output-prefix")
            .long("output-prefix")
            .visible_alias("output_pattern_prefix")
            .help("Path prefix of the output shards")
            .value_name("PREFIX")
            .required(true))
        .arg(Arg::new("output-manifest-path")
            .long("output-manifest-path")
            .visible_alias("output_dataset_config_pbtxt")
            .help("If set, write a human-readable dataset summary to this file")
            .value_name("FILE"))
        .arg(Arg::new("dataset-name")
            .long("dataset-name")
            .visible_alias("output_dataset_name")
            .help("Dataset name recorded in the manifest (required with --output-manifest-path)")
            .value_name("NAME"))
        .arg(Arg::new("num-shards")
            .long("num-shards")
            .visible_alias("direct_num_workers")
            .help("Number of output shards")
            .value_name("N")
            .value_parser(clap::value_parser!(usize))
            .default_value("1"))
        .arg(Arg::new("memory-step")
            .long("memory-step")
            .visible_alias("step")
            .help("How many records may be held in memory at once; -1 holds all of them")
            .value_name("STEP")
            .allow_negative_numbers(true)
            .default_value("-1"))
        .arg(Arg::new("temp-dir")
            .short('T')
            .long("temp-dir")
            .help("Use DIR for bucket spill files instead of the output directory")
            .value_name("DIR"))
        .arg(Arg::new("compression")
            .long("compression")
            .help("Compression of the output shards")
            .value_name("KIND")
            .value_parser(["none", "gzip", "zstd"])
            .default_value("zstd"))
        .arg(Arg::new("label-feature")
            .long("label-feature")
            .help("Example feature holding the integer class label")
            .value_name("NAME")
            .default_value(shuffle_records::config::DEFAULT_LABEL_FEATURE))
        .arg(Arg::new("quiet")
            .short('q')
            .long("quiet")
            .help("Only report errors")
            .action(ArgAction::SetTrue))
}

/// Parse configuration from command line matches
fn parse_config_from_matches(matches: &clap::ArgMatches) -> ShuffleResult<ShuffleConfig> {
    let mut builder = ShuffleConfigBuilder::new();

    if let Some(patterns) = matches.get_one::<String>("input-patterns") {
        builder = builder.input_pattern_list(patterns);
    }
    if let Some(prefix) = matches.get_one::<String>("output-prefix") {
        builder = builder.output_prefix(prefix);
    }
    if let Some(path) = matches.get_one::<String>("output-manifest-path") {
        builder = builder.manifest_path(path);
    }
    if let Some(name) = matches.get_one::<String>("dataset-name") {
        builder = builder.dataset_name(name);
    }
    if let Some(&num_shards) = matches.get_one::<usize>("num-shards") {
        builder = builder.num_shards(num_shards);
    }
    if let Some(step) = matches.get_one::<String>("memory-step") {
        builder = builder.memory_step(step.parse::<MemoryStep>()?);
    }
    if let Some(dir) = matches.get_one::<String>("temp-dir") {
        builder = builder.temp_dir(dir);
    }
    if let Some(kind) = matches.get_one::<String>("compression") {
        builder = builder.compression(kind.parse::<Compression>()?);
    }
    if let Some(feature) = matches.get_one::<String>("label-feature") {
        builder = builder.label_feature(feature);
    }

    if matches.get_flag("quiet") {
        log::set_max_level(log::LevelFilter::Error);
    }

    builder.build().map_err(|e| match e {
        ShuffleError::Config { message } => ShuffleError::Config {
            message: format!("{message} (see --help)"),
        },
        other => other,
    })
}

pub mod builtin;
pub mod catalog;
pub mod cli;
pub mod data;
pub mod demographics;
pub mod duplicate;
pub mod error;
pub mod import;
pub mod io_utils;
pub mod mapping;
pub mod normalize;
pub mod ranges;
pub mod resolve;
pub mod store;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    catalog::PatternCatalog,
    cli::{Cli, Commands, InputArgs, MappingArgs, RangeSourceArgs, RangesCommand},
    data::{Table, parse_gender},
    import::{ImportOptions, import_dataset},
    mapping::{FieldMapping, MappingOptions, infer_mapping_with},
    ranges::{RangePool, read_config},
    resolve::{PatientProfile, classify},
    store::CsvResultStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("lab_intake", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Map(args) => handle_map(&args),
        Commands::Import(args) => handle_import(&args),
        Commands::Resolve(args) => handle_resolve(&args),
        Commands::Ranges(args) => match args.command {
            RangesCommand::Check(args) => handle_ranges_check(&args),
            RangesCommand::Export(args) => handle_ranges_export(&args),
        },
    }
}

fn read_input(args: &InputArgs) -> Result<Table> {
    let encoding = match args.input_encoding.as_deref() {
        Some(label) => Some(io_utils::resolve_encoding(Some(label))?),
        None => None,
    };
    info!(
        "Reading '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(&args.input, args.delimiter))
    );
    let (table, used) = io_utils::read_table(&args.input, args.delimiter, encoding)
        .with_context(|| format!("Reading input {:?}", args.input))?;
    debug!("Decoded input as {}", used.name());
    Ok(table)
}

fn build_mapping(table: &Table, args: &MappingArgs) -> Result<FieldMapping> {
    let options = MappingOptions {
        min_confidence: args.min_confidence,
    };
    infer_mapping_with(
        &table.headers,
        &PatternCatalog::standard(),
        &args.overrides,
        &options,
    )
    .context("Applying mapping overrides")
}

fn handle_map(args: &cli::MapArgs) -> Result<()> {
    let table = read_input(&args.input)?;
    let mapping = build_mapping(&table, &args.mapping)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&mapping)?);
    } else {
        print!("{}", table::render_mapping(&mapping));
    }
    info!(
        "Mapped {} of {} header(s)",
        mapping.len(),
        table.headers.len()
    );
    Ok(())
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let table = read_input(&args.input)?;
    let mapping = build_mapping(&table, &args.mapping)?;
    let mut store = CsvResultStore::open(&args.store)
        .with_context(|| format!("Opening store {:?}", args.store))?;
    let options = ImportOptions {
        check_duplicates: !args.no_duplicate_check,
        update_existing: args.update_existing,
        tolerance_minutes: args.tolerance_minutes,
        processing_date: args
            .processing_date
            .unwrap_or_else(|| Local::now().date_naive()),
        default_test_name: args.default_test_name.clone(),
    };
    info!(
        "Importing {} row(s) from {:?} into {:?}",
        table.len(),
        args.input.input,
        args.store
    );
    let summary = import_dataset(&table, &mapping, &mut store, &options)
        .with_context(|| format!("Importing {:?}", args.input.input))?;
    print!("{}", table::render_summary(&summary));

    if let Some(report) = &args.report {
        let mut writer = io_utils::open_csv_writer(Some(report), b',')?;
        writer.write_record(["row", "reason"])?;
        for failure in &summary.failures {
            writer.write_record([(failure.row_index + 1).to_string(), failure.reason.to_string()])?;
        }
        for failure in &summary.patient_failures {
            writer.write_record([
                (failure.row_index + 1).to_string(),
                format!("patient not saved: {}", failure.reason),
            ])?;
        }
        writer
            .flush()
            .with_context(|| format!("Writing report {report:?}"))?;
        info!("Wrote {} failure(s) to {report:?}", summary.failures.len());
    }
    Ok(())
}

fn load_pool(args: &RangeSourceArgs) -> Result<RangePool> {
    let mut pool = if args.no_builtin {
        RangePool::new()
    } else {
        RangePool::with_builtins()
    };
    for path in &args.ranges {
        pool.load_config(path)
            .with_context(|| format!("Loading ranges from {path:?}"))?;
    }
    Ok(pool)
}

fn handle_resolve(args: &cli::ResolveArgs) -> Result<()> {
    if args.test.trim().is_empty() {
        bail!("Test name must not be empty");
    }
    let pool = load_pool(&args.source)?;
    let profile = PatientProfile::new(
        args.age,
        args.gender.as_deref().and_then(parse_gender),
        args.condition.clone(),
    );
    let decision = pool.resolve(&args.test, &profile);
    let completeness = profile.completeness();
    let classification = args.value.map(|value| (value, classify(value, &decision)));

    if args.json {
        let report = serde_json::json!({
            "decision": decision,
            "demographics": completeness,
            "value": classification.map(|(value, _)| value),
            "status": classification.map(|(_, status)| status),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!(
            "{}",
            table::render_decision(&decision, &completeness, classification)
        );
    }
    Ok(())
}

fn handle_ranges_check(args: &cli::RangesCheckArgs) -> Result<()> {
    for path in &args.ranges {
        let candidates =
            read_config(path).with_context(|| format!("Validating ranges in {path:?}"))?;
        println!(
            "{}: {} range(s) OK",
            path.display(),
            candidates.len()
        );
    }
    Ok(())
}

fn handle_ranges_export(args: &cli::RangesExportArgs) -> Result<()> {
    let source = RangeSourceArgs {
        ranges: args.ranges.clone(),
        no_builtin: !args.include_builtin,
    };
    let pool = load_pool(&source)?;
    write_export(&pool, &args.output, args.include_builtin)?;
    info!("Exported ranges to {:?}", args.output);
    Ok(())
}

fn write_export(pool: &RangePool, output: &Path, include_builtin: bool) -> Result<()> {
    let written = if include_builtin {
        pool.export(output, true)
    } else {
        pool.export_custom(output)
    };
    written.with_context(|| format!("Writing ranges to {output:?}"))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

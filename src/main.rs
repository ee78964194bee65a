use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use geojoin::{ContainerKind, Crs, Input, JoinSpec, Pipeline, PipelineConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("geojoin")
        .version("0.1")
        .about("Joins two vector datasets by location or by attribute and exports GeoJSON")
        .arg(
            Arg::new("left")
                .short('l')
                .long("left")
                .required(true)
                .help("Primary dataset (.zip shapefile or .geojson)"),
        )
        .arg(
            Arg::new("right")
                .short('r')
                .long("right")
                .required(true)
                .help("Secondary dataset (.zip shapefile or .geojson)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Output path (defaults to join_result.geojson)"),
        )
        .arg(
            Arg::new("default-crs")
                .long("default-crs")
                .default_value("EPSG:4326")
                .help("CRS assumed for inputs without one"),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .action(ArgAction::SetTrue)
                .help("Pretty-print the output"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("spatial")
                .about("Join features by spatial relationship")
                .arg(Arg::new("predicate").long("predicate").default_value("intersects"))
                .arg(Arg::new("how").long("how").default_value("inner")),
        )
        .subcommand(
            Command::new("attribute")
                .about("Join features on a shared field value")
                .arg(Arg::new("left-key").long("left-key").required(true))
                .arg(Arg::new("right-key").long("right-key").required(true))
                .arg(Arg::new("how").long("how").default_value("inner")),
        )
}

fn read_input(path: &Path) -> anyhow::Result<(Vec<u8>, ContainerKind)> {
    let kind = ContainerKind::from_path(path)
        .ok_or_else(|| anyhow!("cannot tell container kind of {}", path.display()))?;
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok((bytes, kind))
}

fn join_spec(matches: &ArgMatches) -> anyhow::Result<JoinSpec> {
    let arg = |m: &ArgMatches, name: &str| m.get_one::<String>(name).cloned().unwrap_or_default();
    let spec = match matches.subcommand() {
        Some(("spatial", sub)) => JoinSpec::spatial(&arg(sub, "predicate"), &arg(sub, "how"))?,
        Some(("attribute", sub)) => {
            JoinSpec::attribute(arg(sub, "left-key"), arg(sub, "right-key"), &arg(sub, "how"))?
        }
        _ => return Err(anyhow!("a join subcommand is required")),
    };
    Ok(spec)
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = |name: &str| matches.get_one::<String>(name).map(PathBuf::from);
    let left_path = path("left").context("--left is required")?;
    let right_path = path("right").context("--right is required")?;
    let output = path("output").unwrap_or_else(|| PathBuf::from(geojoin::export::EXPORT_FILE_NAME));

    let (left_bytes, left_kind) = read_input(&left_path)?;
    let (right_bytes, right_kind) = read_input(&right_path)?;
    let spec = join_spec(matches)?;

    let default_crs = matches
        .get_one::<String>("default-crs")
        .map(|s| Crs::parse(s))
        .unwrap_or_else(Crs::wgs84);
    let config = PipelineConfig::default()
        .with_default_crs(default_crs)
        .with_pretty_output(matches.get_flag("pretty"));

    let outcome = Pipeline::new(config).run(
        Input::new(&left_bytes, left_kind),
        Input::new(&right_bytes, right_kind),
        &spec,
    )?;

    for diagnostic in outcome.diagnostics.iter() {
        warn!("{}", diagnostic);
    }
    if outcome.is_empty() {
        warn!("No features matched; writing an empty collection");
    } else {
        info!(
            "{} rows, {} columns, geometry: {}",
            outcome.rows,
            outcome.columns,
            outcome.geometry_types.join(", ")
        );
        info!("Columns: {}", outcome.preview.columns.join(" | "));
        for row in &outcome.preview.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            info!("  {}", cells.join(" | "));
        }
    }

    fs::write(&output, &outcome.export.bytes)
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Result written to {}", output.display());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    if let Err(e) = run(&matches) {
        match e.downcast_ref::<geojoin::PipelineError>() {
            Some(pipeline_error) => error!(
                kind = %pipeline_error.kind(),
                stage = %pipeline_error.stage(),
                "{}",
                pipeline_error
            ),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

use std::fmt::{Display, Write};
use std::fs::File;
use std::path::{Path, PathBuf, absolute};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use clap::builder::styling::Styles;
use clap::{Args, ColorChoice, Parser, Subcommand, ValueEnum, crate_version};
use clap_cargo::style::{ERROR, HEADER, INVALID, LITERAL, PLACEHOLDER, USAGE, VALID};
use strum::Display;
use sys_locale::get_locale;
use tourstitch::brouter::{BRouter, DEFAULT_PROFILE};
use tourstitch::chain::ChainOptions;
use tourstitch::elevation::{ElevationMethod, ElevationOptions};
use tourstitch::index::{IndexError, build_index};
use tourstitch::itinerary::{ItineraryError, PlanOptions, write_bookings};
use tourstitch::measure::{Kilometers, Meters, Miles};
use tourstitch::merge::ConnectorRouter;
use tourstitch::passes::{PassError, PassOptions};
use tourstitch::report::{index_report, itinerary_report};
use tourstitch::{TourError, TourPlan};
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug, enabled, error, info, instrument, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry, fmt};

pub const CLAP_STYLING: Styles = Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

static LONG_VERSION: LazyLock<String> =
    LazyLock::new(|| format!("{} (rustc {})", crate_version!(), env!("RUSTC_VERSION")));

/// Stitch GPX tracks into a day-by-day bicycle tour
///
/// Given a directory of GPX tracks and a JSON list of overnight stays, chains
/// the tracks into one route per day and writes each day as a merged GPX
/// track.
#[derive(Parser)]
#[command(
    name = "tourstitch",
    version,
    long_version = LONG_VERSION.as_str(),
    about,
    color = ColorChoice::Auto,
    styles = CLAP_STYLING,
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,

    /// Configure diagnostic logging level
    ///
    /// Set to DEBUG to see each chaining decision and a performance summary
    /// following execution.
    #[clap(long, short = 'L', default_value_t = Level::ERROR)]
    log_level: Level,

    /// Log to a file
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// The unit of distance used in output on the command line.
    ///
    /// If unspecified, this will default to either km or mi based on your
    /// system locale.
    #[clap(long, short = 'u', default_value_t = DistUnit::Autodetect)]
    distance_unit: DistUnit,
}

#[derive(Copy, Clone, Display, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
enum DistUnit {
    Autodetect,
    M,
    Km,
    Mi,
}

impl DistUnit {
    fn get(self) -> DistUnit {
        match self {
            Self::Autodetect => Self::auto_detect(),
            _ => self,
        }
    }

    fn auto_detect() -> DistUnit {
        let locale = get_locale().unwrap_or_else(|| String::from("en-US"));
        match locale.as_str() {
            "en-US" | "en-GB" => Self::Mi,
            _ => Self::Km,
        }
    }
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Directory of GPX tracks to chain
    tracks: PathBuf,

    /// JSON list of bookings, each with at least `hotel_name` and
    /// `arrival_date`, and `latitude`/`longitude` where known
    bookings: PathBuf,

    /// Directory for the merged day tracks
    #[clap(long, short, default_value = "output")]
    output: PathBuf,

    /// Path of the planned itinerary JSON
    ///
    /// If unspecified, defaults to itinerary.json in the <OUTPUT> directory.
    #[clap(long, short)]
    itinerary: Option<PathBuf>,

    /// Force overwriting the itinerary file, if it already exists.
    #[clap(long, short, action)]
    force: bool,

    /// Largest gap between two tracks that is still chained, in meters
    #[clap(long, short = 'c', default_value_t = 1000.0)]
    max_connection_distance: f64,

    /// Most track segments in one day
    #[clap(long, short = 'n', default_value_t = 20)]
    max_chain_length: usize,

    /// A shorter candidate track up to this much farther away than the
    /// nearest one is preferred, in meters
    #[clap(long, default_value_t = 300.0)]
    tie_break_margin: f64,

    /// Only start on a track within this many meters of the previous stay
    #[clap(long)]
    start_radius: Option<f64>,

    /// Only end on a track within this many meters of the stay
    #[clap(long)]
    target_radius: Option<f64>,

    /// Algorithm for the reported ascent and descent
    #[clap(long, short = 'e', default_value_t = ElevationMethod::Blended)]
    elevation_method: ElevationMethod,

    /// Elevation changes smaller than this are treated as noise, in meters
    #[clap(long, default_value_t = 3.0)]
    elevation_threshold: f64,

    /// Moving average window of the smoothed elevation algorithm, in points
    #[clap(long, default_value_t = 5)]
    window_size: usize,

    /// Fewest points for the segment-based elevation algorithm
    #[clap(long, default_value_t = 10)]
    min_segment_length: usize,

    /// BRouter server used to route the last mile to each stay
    ///
    /// If unspecified, day tracks end where the indexed tracks end.
    #[clap(long, short = 'b')]
    brouter_url: Option<String>,

    /// BRouter profile for connector routes
    #[clap(long, default_value = DEFAULT_PROFILE)]
    brouter_profile: String,

    /// Only request a connector when the day ends farther than this from the
    /// stay, in meters
    #[clap(long, default_value_t = 50.0)]
    connector_min_gap: f64,

    /// JSON list of mountain passes, each with `name`, `latitude` and
    /// `longitude`
    ///
    /// Each pass is assigned to the nearest stay along with a track linking
    /// the two.
    #[clap(long, short = 'p')]
    passes: Option<PathBuf>,

    /// Largest distance from a stay to the end of its pass track, in meters
    #[clap(long, default_value_t = 5000.0)]
    stay_radius: f64,

    /// Largest distance from a pass to the end of its track, in meters
    #[clap(long, default_value_t = 5000.0)]
    pass_radius: f64,
}

impl PlanArgs {
    fn plan_options(&self) -> Result<PlanOptions> {
        for (name, value) in [
            ("Max connection distance", Some(self.max_connection_distance)),
            ("Tie break margin", Some(self.tie_break_margin)),
            ("Start radius", self.start_radius),
            ("Target radius", self.target_radius),
            ("Elevation threshold", Some(self.elevation_threshold)),
            ("Connector min gap", Some(self.connector_min_gap)),
            ("Stay radius", Some(self.stay_radius)),
            ("Pass radius", Some(self.pass_radius)),
        ] {
            if value.is_some_and(|v| v < 0.0) {
                bail!("{name} cannot be negative");
            }
        }

        let chain = ChainOptions::default()
            .with_max_connection_distance(Meters(self.max_connection_distance))
            .with_max_chain_length(self.max_chain_length)
            .with_tie_break_margin(Meters(self.tie_break_margin))
            .with_start_search_radius(self.start_radius.map(Meters))
            .with_target_search_radius(self.target_radius.map(Meters));
        let elevation = ElevationOptions::default()
            .with_method(self.elevation_method)
            .with_threshold(Meters(self.elevation_threshold))
            .with_window_size(self.window_size)
            .with_min_segment_length(self.min_segment_length);
        let passes = PassOptions::default()
            .with_stay_radius(Meters(self.stay_radius))
            .with_pass_radius(Meters(self.pass_radius));
        Ok(PlanOptions::default()
            .with_chain(chain)
            .with_elevation(elevation)
            .with_connector_min_gap(Meters(self.connector_min_gap))
            .with_passes(passes))
    }
}

#[derive(Args, Debug)]
struct IndexArgs {
    /// Directory of GPX tracks
    tracks: PathBuf,

    /// Print the build report as JSON
    #[clap(long, action)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a tour from a track library and a list of bookings
    ///
    /// Sorts the bookings by arrival date, chains a route from each stay to
    /// the next, and writes one merged GPX track per day along with the
    /// planned itinerary as JSON.
    Plan(PlanArgs),

    /// List the tracks a directory would contribute
    Index(IndexArgs),
}

#[instrument(level = "trace", skip_all)]
fn plan_cmd(args: &Cli, sub_args: &PlanArgs) -> Result<String> {
    debug!("plan args: {:?}", sub_args);
    let options = sub_args.plan_options()?;

    let itinerary = match &sub_args.itinerary {
        Some(p) => p,
        None => &sub_args.output.join("itinerary.json"),
    };
    if !sub_args.force && itinerary.exists() {
        if enabled!(Level::ERROR) {
            error!(
                "Itinerary file already exists and may not be overwritten: {:?}",
                itinerary
            );
        }
        bail!("The itinerary file {:?} already exists. Pass --force to overwrite it.", itinerary);
    } else if itinerary.exists() {
        warn!("Itinerary file exists and will be overwritten: {:?}", itinerary);
    }

    let router = match &sub_args.brouter_url {
        Some(url) => Some(
            BRouter::new(url.as_str())
                .context("Setting up the BRouter client")?
                .with_profile(sub_args.brouter_profile.as_str()),
        ),
        None => None,
    };
    let router = router.as_ref().map(|r| r as &dyn ConnectorRouter);

    let res = tourstitch::plan_tour(
        &sub_args.tracks,
        &sub_args.bookings,
        &sub_args.output,
        sub_args.passes.as_deref(),
        &options,
        router,
    );
    let plan = match &res {
        Err(TourError::Index(IndexError::Directory { .. })) => res.context(
            "Reading the <TRACKS> directory. Check that it exists and can be accessed.",
        ),

        Err(TourError::NoTracks(_)) => res.context(concat!(
            "No GPX track could be loaded from the <TRACKS> directory. ",
            "Run the index command to see why files were skipped."
        )),

        Err(TourError::Itinerary(ItineraryError::Io(_))) => {
            res.context("Opening the <BOOKINGS> file. Check that it exists and can be accessed.")
        }

        Err(TourError::Itinerary(ItineraryError::Json(_))) => res.context(
            "The <BOOKINGS> file is not a valid JSON list of bookings. Check that it is correct.",
        ),

        Err(TourError::Passes(PassError::Io(_))) => {
            res.context("Opening the --passes file. Check that it exists and can be accessed.")
        }

        Err(TourError::Passes(PassError::Json(_))) => res.context(concat!(
            "The --passes file is not a valid JSON list of passes with ",
            "name, latitude and longitude. Check that it is correct."
        )),

        Err(TourError::Io(_)) => res.context(concat!(
            "Creating the <OUTPUT> directory. Ensure you have access permissions ",
            "to write there."
        )),

        _ => res.map_err(anyhow::Error::from),
    }?;

    if let Some(parent) = itinerary.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Creating the itinerary directory")?;
    }
    write_bookings(itinerary, &plan.bookings).context("Writing the itinerary file")?;
    info!("Wrote itinerary: {:?}", absolute(itinerary)?);

    match args.distance_unit.get() {
        DistUnit::M => generate_plan_report::<Meters<f64>>(&plan, itinerary),
        DistUnit::Km => generate_plan_report::<Kilometers<f64>>(&plan, itinerary),
        DistUnit::Mi => generate_plan_report::<Miles<f64>>(&plan, itinerary),
        _ => {
            error!(
                "Failed to detect distance unit for report: {}",
                args.distance_unit
            );
            Ok("".to_string())
        }
    }
}

fn generate_plan_report<T>(plan: &TourPlan, itinerary: &Path) -> Result<String>
where
    T: From<Meters<f64>> + Display,
{
    let mut r = itinerary_report::<T>(&plan.bookings)?;
    if !plan.index_report.skipped.is_empty() {
        writeln!(
            &mut r,
            "{} track files were skipped, see the index command",
            plan.index_report.skipped.len()
        )?;
    }
    writeln!(
        &mut r,
        "\nItinerary is in {}",
        absolute(itinerary)
            .unwrap_or(itinerary.to_path_buf())
            .to_string_lossy()
    )?;
    Ok(r)
}

#[instrument(level = "trace", skip_all)]
fn index_cmd(args: &Cli, sub_args: &IndexArgs) -> Result<String> {
    debug!("index args: {:?}", sub_args);
    let (index, report) = build_index(&sub_args.tracks)
        .context("Reading the <TRACKS> directory. Check that it exists and can be accessed.")?;

    if sub_args.json {
        let mut r = serde_json::to_string_pretty(&report)?;
        r.push('\n');
        return Ok(r);
    }
    let r = match args.distance_unit.get() {
        DistUnit::M => index_report::<Meters<f64>>(&index, &report)?,
        DistUnit::Km => index_report::<Kilometers<f64>>(&index, &report)?,
        DistUnit::Mi => index_report::<Miles<f64>>(&index, &report)?,
        _ => {
            error!(
                "Failed to detect distance unit for report: {}",
                args.distance_unit
            );
            "".to_string()
        }
    };
    Ok(r)
}

fn main() -> Result<()> {
    // Intentionally avoid wrapping argument parsing errors in anyhow::Result so
    // we preserve Clap's pretty formatting of usage info.
    let args = Cli::parse();

    let log_w: Box<dyn std::io::Write + Send> = match &args.log_file {
        Some(path) => Box::new(File::create(path).context("Creating the log file")?),
        None => Box::new(std::io::stderr()),
    };
    let (appender, _guard) = tracing_appender::non_blocking(log_w);

    // Enable the TRACE-level span tree layer for fmt logging level DEBUG.
    let fmt_layer = fmt::Layer::new()
        .with_writer(appender)
        .with_ansi(args.log_file.is_none())
        .with_target(false)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .with_filter(LevelFilter::from_level(args.log_level));
    if args.log_level >= Level::DEBUG {
        let span_tree_layer = tracing_span_tree::SpanTree::default().aggregate(true);
        tracing::subscriber::set_global_default(
            Registry::default().with(fmt_layer).with(span_tree_layer),
        )?;
    } else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer))?;
    }

    debug!("tourstitch {}", clap::crate_version!());

    let report = match &args.cmd {
        Commands::Plan(sub_args) => plan_cmd(&args, sub_args),
        Commands::Index(sub_args) => index_cmd(&args, sub_args),
    }?;

    print!("{report}");
    Ok(())
}

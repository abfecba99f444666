//! Command-line front end over the control surface.

use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reelfetch_config::AppConfig;
use reelfetch_events::Event;
use reelfetch_transfer_core::{Descriptor, SearchResult};

use crate::bootstrap::{self, BootstrapDependencies};
use crate::control::{ChosenFolder, ControlSurface, SavedSessionAction};
use crate::error::AppError;

#[derive(Parser)]
#[command(
    name = "reelfetch",
    version,
    about = "Search for movies and fetch them from a peer-to-peer swarm"
)]
struct Cli {
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for results and streamed events"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List seeded, quality-tagged results for a query.
    Search(SearchArgs),
    /// Search, pick one result and follow its transfer.
    Get(GetArgs),
    /// Restore the sessions left by the previous run and follow them.
    Resume,
    /// Stop a saved session while keeping it for the next `resume`.
    Pause(SavedArgs),
    /// Drop a saved session and discard its partial data.
    Cancel(SavedArgs),
    /// Inspect or change the configuration record.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Open the folder containing a path in the file manager.
    Locate(LocateArgs),
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration record.
    Show,
    /// Store a new default download directory.
    SetPath(SetPathArgs),
}

#[derive(Args)]
struct SearchArgs {
    #[arg(help = "Movie title to search for")]
    query: String,
}

#[derive(Args)]
struct GetArgs {
    #[arg(help = "Movie title to search for")]
    query: String,
    #[arg(long, default_value_t = 1, help = "1-based position of the result to fetch")]
    pick: usize,
    #[arg(long, help = "Store this directory as the default destination first")]
    dir: Option<PathBuf>,
}

#[derive(Args)]
struct SavedArgs {
    #[arg(help = "Magnet link of the saved session")]
    magnet: String,
}

#[derive(Args)]
struct SetPathArgs {
    #[arg(help = "Absolute directory new sessions write into")]
    path: PathBuf,
}

#[derive(Args)]
struct LocateArgs {
    #[arg(help = "File or directory to reveal")]
    path: PathBuf,
}

/// Output rendering for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned human-readable columns.
    Table,
    /// One JSON document per item.
    Json,
}

#[derive(Debug)]
enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

type CliResult<T> = Result<T, CliError>;

impl CliError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<AppError> for CliError {
    fn from(err: AppError) -> Self {
        Self::failure(err)
    }
}

/// Parse arguments, run the requested command and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let _context = match bootstrap::init_telemetry(command_label(&cli.command)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {:#}", anyhow::Error::from(err));
            return 3;
        }
    };
    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Search(_) => "search",
        Command::Get(_) => "get",
        Command::Resume => "resume",
        Command::Pause(_) => "pause",
        Command::Cancel(_) => "cancel",
        Command::Config(ConfigCommand::Show) => "config.show",
        Command::Config(ConfigCommand::SetPath(_)) => "config.set_path",
        Command::Locate(_) => "locate",
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let control = bootstrap::build_control(BootstrapDependencies::from_env()?).await?;
    let format = cli.output;
    match cli.command {
        Command::Search(args) => {
            let results = control.search_movies(&args.query).await;
            render_results(&results, format)
        }
        Command::Get(args) => handle_get(&control, args, format).await,
        Command::Resume => {
            let stream = control.subscribe(None);
            let restored = control.restore_previous().await?;
            reelfetch_telemetry::record_restored(restored.len());
            if restored.is_empty() && format == OutputFormat::Table {
                println!("nothing to resume");
            }
            bootstrap::follow(&control, stream, |event| print_event(event, format)).await?;
            Ok(())
        }
        Command::Pause(args) => handle_saved(&control, &args, SavedSessionAction::Pause).await,
        Command::Cancel(args) => handle_saved(&control, &args, SavedSessionAction::Cancel).await,
        Command::Config(ConfigCommand::Show) => render_config(&control.get_config()?, format),
        Command::Config(ConfigCommand::SetPath(args)) => {
            let stored = control.select_folder(&ChosenFolder(Some(args.path)))?;
            if let Some(path) = stored {
                println!("download path: {}", path.display());
            }
            Ok(())
        }
        Command::Locate(args) => {
            let opened = control.show_in_folder(Some(&args.path))?;
            println!("opened {}", opened.display());
            Ok(())
        }
    }
}

async fn handle_get(
    control: &ControlSurface,
    args: GetArgs,
    format: OutputFormat,
) -> CliResult<()> {
    if let Some(dir) = args.dir {
        control.select_folder(&ChosenFolder(Some(dir)))?;
    }
    let results = control.search_movies(&args.query).await;
    let chosen = pick(results, args.pick)?;
    if format == OutputFormat::Table {
        println!("fetching {} ({} seeds)", chosen.title, chosen.seed_count);
    }
    let persisted = bootstrap::fetch_and_follow(
        control,
        chosen,
        |event| print_event(event, format),
        bootstrap::interrupt(),
    )
    .await?;
    if persisted > 0 && format == OutputFormat::Table {
        println!("{persisted} session(s) saved; run `reelfetch resume` to continue");
    }
    Ok(())
}

async fn handle_saved(
    control: &ControlSurface,
    args: &SavedArgs,
    action: SavedSessionAction,
) -> CliResult<()> {
    let descriptor = parse_magnet(&args.magnet)?;
    let changed = control.amend_previous(descriptor, action).await?;
    let verb = match action {
        SavedSessionAction::Pause => "paused",
        SavedSessionAction::Cancel => "cancelled",
    };
    if changed {
        println!("{verb} {}", args.magnet);
    } else {
        println!("no saved session for {}", args.magnet);
    }
    Ok(())
}

fn parse_magnet(value: &str) -> CliResult<Descriptor> {
    Descriptor::parse(value)
        .map_err(|err| CliError::validation(format!("invalid magnet link: {}", err.describe())))
}

fn pick(results: Vec<SearchResult>, position: usize) -> CliResult<SearchResult> {
    if results.is_empty() {
        return Err(CliError::validation("no seeded results with a quality tag"));
    }
    let count = results.len();
    position
        .checked_sub(1)
        .and_then(|index| results.into_iter().nth(index))
        .ok_or_else(|| CliError::validation(format!("--pick must be between 1 and {count}")))
}

fn render_results(results: &[SearchResult], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(results)
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => {
            println!("{:>3} {:>6} {:>10} TITLE", "#", "SEEDS", "SIZE");
            for (index, result) in results.iter().enumerate() {
                let size = result.size.map_or_else(|| "-".to_string(), human_bytes);
                println!(
                    "{:>3} {:>6} {:>10} {}",
                    index + 1,
                    result.seed_count,
                    size,
                    result.title
                );
            }
        }
    }
    Ok(())
}

fn render_config(config: &AppConfig, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(config)
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => println!("download path: {}", config.download_path.display()),
    }
    Ok(())
}

fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to format event: {err}"),
        },
        OutputFormat::Table => println!("{}", describe_event(event)),
    }
}

fn describe_event(event: &Event) -> String {
    match event {
        Event::DownloadStarted { logical_id, .. } => format!("started   {logical_id}"),
        Event::DownloadProgress {
            logical_id,
            percent,
            rate_bytes_per_sec,
            peer_count,
            ..
        } => format!(
            "progress  {logical_id} {percent:>5.1}% {:>12}/s {peer_count} peers",
            human_bytes(*rate_bytes_per_sec)
        ),
        Event::DownloadComplete {
            logical_id,
            title,
            result_file_path,
        } => format!(
            "complete  {logical_id} {title} -> {}",
            result_file_path.as_deref().unwrap_or("<no media file>")
        ),
        Event::DownloadError {
            logical_id,
            message,
        } => format!("error     {logical_id} {message}"),
        Event::RestoreDownloads { entries } => format!("restored  {} session(s)", entries.len()),
        Event::SessionRemoved { logical_id } => format!("removed   {logical_id}"),
        Event::DuplicateSuppressed {
            logical_id,
            descriptor,
        } => format!("duplicate {logical_id} already fetching {descriptor}"),
        Event::ResultFileMissing { logical_id } => {
            format!("warning   {logical_id} finished without a media file")
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use reelfetch_test_support::fixtures::result;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn get_parses_pick_and_dir() {
        let cli = Cli::try_parse_from([
            "reelfetch",
            "get",
            "Heat",
            "--pick",
            "2",
            "--dir",
            "/srv/movies",
            "--output",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.query, "Heat");
        assert_eq!(args.pick, 2);
        assert_eq!(args.dir, Some(PathBuf::from("/srv/movies")));
    }

    #[test]
    fn saved_session_commands_take_a_magnet() {
        let cli = Cli::try_parse_from(["reelfetch", "cancel", "magnet:?xt=urn:btih:abc"])
            .expect("parse cancel");
        assert_eq!(command_label(&cli.command), "cancel");
        let Command::Cancel(args) = cli.command else {
            panic!("expected cancel");
        };
        assert_eq!(args.magnet, "magnet:?xt=urn:btih:abc");

        let cli = Cli::try_parse_from(["reelfetch", "pause", "magnet:?xt=urn:btih:abc"])
            .expect("parse pause");
        assert_eq!(command_label(&cli.command), "pause");
        assert!(Cli::try_parse_from(["reelfetch", "pause"]).is_err());
    }

    #[test]
    fn malformed_magnet_is_a_validation_error() {
        assert!(parse_magnet("magnet:?xt=urn:btih:abc").is_ok());
        let err = parse_magnet("https://example.com/movie").expect_err("not a magnet");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn pick_is_one_based_and_bounded() {
        let results = vec![
            result("1", "A 1080p", 3, None),
            result("2", "B 720p", 1, None),
        ];
        assert_eq!(pick(results.clone(), 2).expect("second").id, "2");
        for position in [0, 3] {
            let err = pick(results.clone(), position).expect_err("out of range");
            assert_eq!(err.exit_code(), 2);
        }
        assert!(matches!(pick(Vec::new(), 1), Err(CliError::Validation(_))));
    }

    #[test]
    fn byte_counts_are_humanized() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1_536), "1.5 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn events_render_as_single_lines() {
        let line = describe_event(&Event::DownloadProgress {
            logical_id: "row".into(),
            percent: 42.5,
            rate_bytes_per_sec: 2_048,
            bytes_downloaded: 10,
            total_bytes: Some(100),
            peer_count: 3,
        });
        assert!(line.starts_with("progress  row  42.5%"));
        assert!(line.contains("2.0 KB/s"));
        assert!(line.ends_with("3 peers"));

        let missing = describe_event(&Event::DownloadComplete {
            logical_id: "row".into(),
            title: "Heat".into(),
            result_file_path: None,
        });
        assert!(missing.ends_with("<no media file>"));
    }
}

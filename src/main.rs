use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use retakr::app::App;
use retakr::config::Config;
use retakr::event::{AppEvent, EventHandler};
use retakr::module::file::ModuleFile;

#[derive(Parser)]
#[command(name = "retakr", version, about = "Take a test module, then retake what you missed")]
struct Cli {
    #[arg(short, long, help = "Module file (JSON) to take")]
    module: PathBuf,

    #[arg(long, help = "Directory for explain records and history")]
    data_dir: Option<PathBuf>,

    #[arg(long, help = "Skip fully correct groups during the retake")]
    skip_correct: bool,
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let first_run = !Config::config_path().exists();
    let mut config = Config::load().unwrap_or_default();
    let defaults = config.clone();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir.to_string_lossy().to_string();
    }
    if cli.skip_correct {
        config.skip_correct_groups = true;
    }
    config.validate();
    init_tracing(&config.log_filter);

    // Command-line overrides stay out of the written file.
    if first_run && let Err(err) = defaults.save() {
        tracing::warn!(path = %Config::config_path().display(), error = %err, "could not write default config");
    }

    let file = ModuleFile::load(&cli.module)?;
    let mut app = App::new(&config, &file)?;
    println!("{}", app.start()?);

    let events = EventHandler::new();
    loop {
        match events.next()? {
            AppEvent::Command(command) => println!("{}", app.handle(command)),
            AppEvent::Invalid(err) => println!("error: {err}"),
            AppEvent::Eof => {
                app.session.cancel();
                break;
            }
        }
        if app.should_quit {
            break;
        }
    }

    Ok(())
}

use directories::ProjectDirs;
use log::{debug, error, info};

use vmsql::cli::Cli;
use vmsql::config::{Config, CONFIG};
use vmsql::logging::setup_logging;

fn main() {
    let project_dirs = match ProjectDirs::from("", "", "vmsql") {
        Some(project_dirs) => project_dirs,
        None => {
            eprintln!("Could not determine project directories");
            std::process::exit(1);
        }
    };

    let config = CONFIG.get_or_init(|| Config::load_config(&project_dirs));

    // Keep the handle alive for the life of the process
    let _logger = match setup_logging(&project_dirs, &config.logging) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("{}", err);
            None
        }
    };

    info!("vmsql {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(&project_dirs, config) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

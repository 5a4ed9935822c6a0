use std::path::{Path, PathBuf};

use anyhow::{self, format_err};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::io::format::{smith_error, smith_output};

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

const SMITH_HEADING_WIDTH: usize = 101;

const SMITH_LOGO: [&str; 6] = [
    "███████╗███╗   ███╗██╗████████╗██╗  ██╗",
    "██╔════╝████╗ ████║██║╚══██╔══╝██║  ██║",
    "███████╗██╔████╔██║██║   ██║   ███████║",
    "╚════██║██║╚██╔╝██║██║   ██║   ██╔══██║",
    "███████║██║ ╚═╝ ██║██║   ██║   ██║  ██║",
    "╚══════╝╚═╝     ╚═╝╚═╝   ╚═╝   ╚═╝  ╚═╝",
];

/// Logs a nicely formatted `smith` heading to the `smith-output` logger.
pub fn log_heading() {
    let version = if let Some(ver) = VERSION {
        format!("v{ver}")
    } else {
        "v unknown".to_string()
    };
    let bar = "─".repeat(SMITH_HEADING_WIDTH);
    smith_output!("╭{bar}╮");
    smith_output!("│{:^SMITH_HEADING_WIDTH$}│", "");
    for line in SMITH_LOGO {
        smith_output!("│{line:^SMITH_HEADING_WIDTH$}│");
    }
    smith_output!("│{:^SMITH_HEADING_WIDTH$}│", "");
    smith_output!(
        "│{:^SMITH_HEADING_WIDTH$}│",
        format!("Spin-free multireference equation generator {version}")
    );
    smith_output!("╰{bar}╯");
    smith_output!("");
}

/// Logs an error and its chain of causes to the `smith-output` logger.
pub fn log_error(err: &anyhow::Error) {
    smith_error!("{err}");
    for cause in err.chain().skip(1) {
        smith_error!("  caused by: {cause}");
    }
}

/// Command-line arguments of the `smith` binary.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// A YAML file configuring the run. Without it, the full CASPT2 generation is run.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The file the generated source text is written to. Without it, the text goes to standard
    /// output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// A file the run log is additionally written to.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Raises the verbosity of diagnostic logging. May be given more than once.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Configures the loggers: diagnostics from all modules go to standard error at a level set by
/// `verbose`, and the `smith-output` target goes to standard error and, if given, to `log`.
///
/// # Errors
///
/// Errors when the log file cannot be created or the logger has already been set.
pub fn setup_logging(log: Option<&Path>, verbose: u8) -> Result<log4rs::Handle, anyhow::Error> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let diagnostics = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}",
        )))
        .build();
    let output = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();

    let mut config = Config::builder()
        .appender(Appender::builder().build("diagnostics", Box::new(diagnostics)))
        .appender(Appender::builder().build("output", Box::new(output)));
    let mut output_logger = Logger::builder().appender("output");
    if let Some(path) = log {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{m}{n}")))
            .append(false)
            .build(path)
            .map_err(|err| format_err!("Unable to create log file `{}`: {err}", path.display()))?;
        config = config.appender(Appender::builder().build("file", Box::new(file)));
        output_logger = output_logger.appender("file");
    }
    let config = config
        .logger(
            output_logger
                .additive(false)
                .build("smith-output", LevelFilter::Info),
        )
        .build(Root::builder().appender("diagnostics").build(level))
        .map_err(|err| format_err!(err))?;
    log4rs::init_config(config).map_err(|err| format_err!(err))
}

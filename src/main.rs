use std::process;

use clap::Parser;

use smith::interfaces::cli::{log_error, log_heading, setup_logging, Cli};
use smith::interfaces::input::Input;
use smith::interfaces::InputHandle;
use smith::io::read_smith_yaml;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = setup_logging(cli.log.as_deref(), cli.verbose) {
        eprintln!("{err}");
        process::exit(1);
    }
    log_heading();

    let outcome = cli
        .config
        .as_ref()
        .map_or_else(|| Ok(Input::default()), read_smith_yaml::<Input, _>)
        .and_then(|input| input.handle(cli.output.as_deref()));
    if let Err(err) = outcome {
        log_error(&err);
        process::exit(1);
    }
}

mod commands;
mod terminal;

use commands::{CommandLine, Commands, history, scan};
use terminal::{logging, print};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    logging::init(commands.log_file.as_deref())?;

    let outcome = match commands.command {
        Commands::Scan(args) => scan::scan(args).await,
        Commands::History(args) => history::history(args),
    };
    print::end_of_program();
    outcome
}

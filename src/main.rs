#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;

mod arch;
mod breakpoint;
mod commands;
mod cpu_state;
mod gdb_connection;
mod gdb_server;
mod run_controller;
mod trace;
mod util;

use commands::exit_result::ExitResult;
use commands::serve_command::ServeCommand;
use commands::trd_options::TrdOptions;
use commands::TrdCommand;
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = TrdOptions::from_args();
    ServeCommand::new(&options).run()
}

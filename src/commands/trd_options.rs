use crate::trace::trace_reader::TraceFormat;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "trd",
    about = "The trace replay debug server: serves gdb's Remote Serial Protocol \
             out of a recorded execution trace instead of a live target.",
    after_help = "Use TRD_LOG to control logging; e.g. TRD_LOG=all:warn,gdb_server:debug"
)]
pub struct TrdOptions {
    /// Path of the execution trace to replay.
    #[structopt(parse(from_os_str))]
    pub trace_file: PathBuf,

    /// Trace file format: `spike`, `sifive-rtl` or `json`.
    #[structopt(short = "f", long = "format", default_value = "spike")]
    pub format: TraceFormat,

    /// TCP port to listen on for the debugger connection.
    #[structopt(long = "port", default_value = "1234")]
    pub port: u16,

    /// Address to bind the listen socket to.
    #[structopt(long = "host", default_value = "localhost")]
    pub host: String,

    /// Keep accepting new debugger connections after a session ends,
    /// rather than shutting down after the first one.
    #[structopt(long = "keep-listening")]
    pub keep_listening: bool,

    /// Also write the parsed trace to <file> in the compact JSON
    /// interchange format (reloadable with `-f json`, much faster than
    /// re-parsing a big simulator log).
    #[structopt(long = "dump-json", parse(from_os_str))]
    pub dump_json: Option<PathBuf>,
}

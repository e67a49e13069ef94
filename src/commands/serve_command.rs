//! Load the trace, bind the listener, and serve debugger sessions.
//!
//! Connections are strictly serial: one debugger at a time, each getting a
//! fresh session (cursor back to -1, breakpoints cleared) over the shared
//! immutable trace. A session error only kills that session; the listener
//! stays up.

use crate::arch::RISCV64;
use crate::commands::exit_result::ExitResult;
use crate::commands::trd_options::TrdOptions;
use crate::commands::TrdCommand;
use crate::gdb_connection::GdbConnection;
use crate::gdb_server::GdbServer;
use crate::log::LogLevel::{LogError, LogInfo};
use crate::trace::trace_reader::{self, TraceFormat};
use std::net::TcpListener;
use std::path::PathBuf;
use std::rc::Rc;

pub struct ServeCommand {
    trace_file: PathBuf,
    format: TraceFormat,
    host: String,
    port: u16,
    keep_listening: bool,
    dump_json: Option<PathBuf>,
}

impl ServeCommand {
    pub fn new(options: &TrdOptions) -> ServeCommand {
        ServeCommand {
            trace_file: options.trace_file.clone(),
            format: options.format,
            host: options.host.clone(),
            port: options.port,
            keep_listening: options.keep_listening,
            dump_json: options.dump_json.clone(),
        }
    }
}

impl TrdCommand for ServeCommand {
    fn run(&mut self) -> ExitResult<()> {
        let trace = match trace_reader::read_trace(&self.trace_file, self.format) {
            Ok(trace) => trace,
            Err(e) => return ExitResult::err_from(e, 2),
        };
        log!(
            LogInfo,
            "loaded {} events from {} trace {:?}",
            trace.len(),
            self.format,
            self.trace_file
        );

        if let Some(path) = &self.dump_json {
            if let Err(e) = trace.dump_compact_json(path) {
                return ExitResult::err_from(e, 2);
            }
            log!(LogInfo, "wrote compact JSON trace to {:?}", path);
        }

        let events = Rc::new(trace.into_events());

        let listener = match TcpListener::bind((self.host.as_str(), self.port)) {
            Ok(listener) => listener,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        log!(
            LogInfo,
            "RSP server listening on {}:{}",
            self.host,
            self.port
        );

        loop {
            let (stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    log!(LogError, "accept failed: {}", e);
                    continue;
                }
            };
            log!(LogInfo, "connection from {}", addr);

            let mut conn = GdbConnection::new(stream);
            let mut server = GdbServer::new(&RISCV64, events.clone());
            match server.serve(&mut conn) {
                Ok(()) => log!(LogInfo, "session ended"),
                Err(e) => log!(LogError, "session error: {}", e),
            }

            if !self.keep_listening {
                return ExitResult::Ok(());
            }
        }
    }
}

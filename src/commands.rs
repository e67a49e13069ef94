use self::exit_result::ExitResult;

pub mod exit_result;
pub mod serve_command;
pub mod trd_options;

pub trait TrdCommand {
    fn run(&mut self) -> ExitResult<()>;
}

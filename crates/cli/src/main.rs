use std::process::ExitCode;

fn main() -> ExitCode {
    kickoff_cli::run()
}

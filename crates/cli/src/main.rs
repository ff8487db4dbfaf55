use std::process::ExitCode;

fn main() -> ExitCode {
    vigil_cli::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    run_sheet_sync::run()
}

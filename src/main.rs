use std::process::exit;

mod cli;

fn main() {
    match cli::run() {
        Ok(code) => exit(code as i32),
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit(cli::ExitCode::Failure as i32);
        }
    }
}

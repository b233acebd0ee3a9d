//! `etl2pcapng` command line entry point

fn main() -> std::process::ExitCode {
    etl2pcapng_lib::run()
}

use std::env;
use std::process;
use std::time::Duration;

use rusty_generals::common::constants;
use rusty_generals::shell::{self, Cluster};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let count = match parse_count(&args) {
        Some(count) => count,
        None => {
            let program = args.first().map(String::as_str).unwrap_or("rusty_generals");
            eprintln!("Usage: {} [number_of_processes]", program);
            process::exit(1);
        }
    };
    if count <= 0 {
        eprintln!("Number of processes must be greater than 0");
        process::exit(1);
    }

    println!("Creating {} generals", count);
    let mut cluster = Cluster::new(
        constants::BASE_PORT,
        Duration::from_millis(constants::ELECTION_PERIOD_MS),
    );
    if let Err(err) = cluster.spawn(count as usize) {
        eprintln!("failed to start the generals: {}", err);
        process::exit(1);
    }

    process::exit(shell::run(&mut cluster));
}

fn parse_count(args: &[String]) -> Option<i64> {
    if args.len() != 2 {
        return None;
    }
    args[1].parse().ok()
}

//! The simulation controller.
//!
//! `controller height width sinisterfile rounds port teams [...]` — binds
//! one listener per `(rounds, port, teams)` triple, prints each bound port,
//! and runs one simulation worker per triple. Workers share the rulebook
//! text and nothing else.

use std::io::Write as _;
use std::sync::Arc;
use std::thread;

use turfwar::errors::{die, Failure, Role};
use turfwar::listener;
use turfwar::logger;
use turfwar::protocol::{number, parse_port};
use turfwar::rulebook;
use turfwar::simulation::{self, SimOutcome, SimulationConfig};

fn main() {
    logger::init_from_env();
    if let Err(failure) = run() {
        die(failure, Role::Controller);
    }
}

fn run() -> Result<(), Failure> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 6 || (args.len() - 3) % 3 != 0 {
        return Err(Failure::Usage);
    }

    let height = number(&args[0])
        .filter(|&h| h >= 1)
        .ok_or(Failure::InvalidHeight)?;
    let width = number(&args[1])
        .filter(|&w| w >= 1)
        .ok_or(Failure::InvalidWidth)?;
    let rulebook_text =
        std::fs::read_to_string(&args[2]).map_err(|_| Failure::OpenSinister)?;
    rulebook::parse_str(&rulebook_text)?;
    let rulebook_text = Arc::new(rulebook_text);

    // validate, bind and announce each simulation in command-line order
    let mut workers = Vec::new();
    for triple in args[3..].chunks(3) {
        let rounds = number(&triple[0])
            .filter(|&r| r >= 1)
            .ok_or(Failure::InvalidRounds)?;
        let port = match triple[1].as_str() {
            "-" => 0,
            other => parse_port(other).ok_or(Failure::InvalidPort)?,
        };
        let teams = number(&triple[2])
            .filter(|&t| t >= 2)
            .ok_or(Failure::InvalidTeams)?;
        let (socket, bound) = listener::open(port).map_err(|_| Failure::PortBusy)?;
        println!("{bound}");
        let _ = std::io::stdout().flush();

        let config = SimulationConfig {
            rounds: rounds as u64,
            num_teams: teams as usize,
            width,
            height,
        };
        let text = Arc::clone(&rulebook_text);
        workers.push(thread::spawn(move || {
            match simulation::run(socket, config, &text) {
                Ok(SimOutcome::Completed) => {}
                // a disconnect ends the whole controller cleanly
                Ok(SimOutcome::AbortedEarly) => std::process::exit(0),
                Err(failure) => die(failure, Role::Controller),
            }
        }));
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

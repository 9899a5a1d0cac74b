//! A team process.
//!
//! Three modes, selected by the argument shape:
//!
//! - `team controllerport teamfile` — join a controller's simulation.
//! - `team wait teamfile sinisterfile` — listen, print the port, fight one
//!   battle as the responder.
//! - `team challenge teamfile sinisterfile targetport` — connect and fight
//!   one battle as the challenger.

use std::io::Write as _;
use std::path::Path;

use turfwar::definitions::Definitions;
use turfwar::errors::{die, Failure, Role};
use turfwar::listener;
use turfwar::logger;
use turfwar::protocol::{parse_port, LineReader};
use turfwar::rulebook;
use turfwar::team_file::{self, Team};
use turfwar::team_runtime;

fn main() {
    logger::init_from_env();
    if let Err(failure) = run() {
        die(failure, Role::Team);
    }
}

fn run() -> Result<(), Failure> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.len() {
        2 => {
            let port = parse_port(&args[0]).ok_or(Failure::InvalidPort)?;
            team_runtime::run_simulation_mode(port, Path::new(&args[1]))
        }
        3 if args[0] == "wait" => {
            let (defs, team) = load_files(&args[1], &args[2])?;
            let (socket, port) = listener::open(0).map_err(|_| Failure::System)?;
            println!("{port}");
            let _ = std::io::stdout().flush();
            team_runtime::wait_for_challenge(&defs, &team, &socket)
        }
        4 if args[0] == "challenge" => {
            let (defs, team) = load_files(&args[1], &args[2])?;
            let port = parse_port(&args[3]).ok_or(Failure::InvalidPort)?;
            team_runtime::run_challenge(&defs, &team, port)
        }
        _ => Err(Failure::Usage),
    }
}

/// Standalone-mode file loading: the whole sinister file must be the five
/// sections and nothing else, then the team file is checked against it.
fn load_files(team_path: &str, sinister_path: &str) -> Result<(Definitions, Team), Failure> {
    let text = std::fs::read_to_string(sinister_path).map_err(|_| Failure::OpenSinister)?;
    let mut reader = LineReader::new(text.as_bytes());
    let defs = rulebook::parse_from(&mut reader)?;
    if reader.read_line().is_some() {
        return Err(Failure::SinisterContents);
    }
    let team = team_file::load(Path::new(team_path), &defs)?;
    Ok((defs, team))
}

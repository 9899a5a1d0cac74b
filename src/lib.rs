//! # Turfwar
//!
//! A distributed turn-based combat simulation on a toroidal grid.
//!
//! Two kinds of cooperating processes speak a newline-delimited TCP
//! protocol:
//!
//! - A **controller** hosts one or more parallel simulations. Each
//!   simulation recruits a fixed number of teams, groups co-located teams
//!   into battle zones every round, dispatches battle orders, waits on a
//!   per-pair completion barrier, and collects movement until the final
//!   round.
//! - A **team** loads a rulebook (the *sinister file*) and a team file,
//!   then either joins a controller's simulation or runs a single
//!   one-on-one battle standalone (`wait`/`challenge` modes).
//!
//! It provides:
//! - The rulebook parser and its in-memory [`definitions`]
//! - The team-file loader and grid data model ([`team_file`])
//! - The typed line protocol spoken by every peer ([`protocol`])
//! - The two-party battle state machine ([`battle`])
//! - The team-side drivers ([`team_runtime`]) and the controller-side
//!   round coordinator ([`simulation`])
//!
//! Battles run concurrently within a round; each one produces a multi-line
//! narrative, and round output is made deterministic by sorting finished
//! narratives lexicographically before printing.
//!
//! # Usage Example
//!
//! A standalone one-on-one battle between two in-process teams:
//!
//! ```no_run
//! use std::thread;
//! use turfwar::{listener, rulebook, team_file, team_runtime};
//!
//! fn main() -> Result<(), turfwar::errors::Failure> {
//!     let rules = std::fs::read_to_string("sinister.txt").unwrap();
//!     let defs = rulebook::parse_str(&rules)?;
//!
//!     let waiting = team_file::load("teams/rockfans.txt".as_ref(), &defs)?;
//!     let (socket, port) = listener::open(0).expect("bind");
//!     let defs_for_waiter = defs.clone();
//!     let waiter =
//!         thread::spawn(move || team_runtime::wait_for_challenge(&defs_for_waiter, &waiting, &socket));
//!
//!     let challenging = team_file::load("teams/paperfans.txt".as_ref(), &defs)?;
//!     team_runtime::run_challenge(&defs, &challenging, port)?;
//!     waiter.join().expect("waiter thread")
//! }
//! ```
//!
//! # Diagnostics
//!
//! stdout and stderr belong to the protocol (ports, zone lines, sorted
//! narratives, one final error line), so diagnostics go to a trace-level
//! log file instead, enabled by pointing `TURFWAR_LOG_DIR` at a directory.
//! See [`logger`].
#![warn(missing_docs)]

pub mod battle;
pub mod definitions;
pub mod errors;
pub mod listener;
pub mod logger;
pub mod protocol;
pub mod rulebook;
pub mod simulation;
pub mod team_file;
pub mod team_runtime;

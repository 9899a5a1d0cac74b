//! The controller-side coordinator for one simulation.
//!
//! One worker owns one listener and its recruited teams; workers share
//! nothing but the immutable rulebook text. Within a worker everything is
//! sequential: recruitment, battle dispatch, the per-pair barrier, and
//! movement all iterate the roster in sorted name order, which makes the
//! controller's observable behavior reproducible.
//!
//! The barrier reads one end-of-battle message from *each* member of every
//! co-located pair. Dispatch therefore creates exactly one battle per pair
//! (the port-listing rule below), so every team sends exactly one
//! `donefighting` per pair it belongs to and the streams stay in step
//! across rounds.

use std::io::{BufReader, Write as _};
use std::net::{TcpListener, TcpStream};

use tracing::{info, instrument, trace, warn};

use crate::errors::Failure;
use crate::listener;
use crate::protocol::{send, ControllerMsg, LineReader, TeamReport};
use crate::team_file::Coords;

/// One `(rounds, port, teams)` triple plus the shared grid dimensions.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Number of rounds to play.
    pub rounds: u64,
    /// Number of teams to recruit before the first round.
    pub num_teams: usize,
    /// Grid width.
    pub width: i64,
    /// Grid height.
    pub height: i64,
}

/// How a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// All rounds played.
    Completed,
    /// A team disconnected mid-round; the game was called off cleanly.
    AbortedEarly,
}

/// A recruited team as the controller sees it.
struct Contender {
    name: String,
    pos: Coords,
    port: u16,
    reader: LineReader<BufReader<TcpStream>>,
    writer: TcpStream,
}

/// Run one simulation to completion on an already-bound listener.
#[instrument(skip(listener, rulebook_text), fields(teams = config.num_teams, rounds = config.rounds))]
pub fn run(
    listener: TcpListener,
    config: SimulationConfig,
    rulebook_text: &str,
) -> Result<SimOutcome, Failure> {
    let mut roster = Vec::with_capacity(config.num_teams);
    for _ in 0..config.num_teams {
        let stream = listener::accept(&listener).map_err(|e| {
            warn!("accept failed: {e:#}");
            Failure::System
        })?;
        roster.push(recruit(stream, &config, rulebook_text)?);
    }
    // canonical iteration order for everything that follows
    roster.sort_by(|a, b| a.name.cmp(&b.name));
    info!(names = ?roster.iter().map(|t| &t.name).collect::<Vec<_>>(), "roster full");

    for round in 0..config.rounds {
        trace!(round, "round start");
        let zones = group_by_zone(&roster.iter().map(|t| t.pos).collect::<Vec<_>>());
        dispatch_battles(&mut roster, &zones);
        if barrier(&mut roster)? {
            info!("early termination after a disconnect");
            broadcast_gameoverman(&mut roster);
            return Ok(SimOutcome::AbortedEarly);
        }
        if round == config.rounds - 1 {
            break;
        }
        collect_movements(&mut roster, &config)?;
    }
    broadcast_gameoverman(&mut roster);
    info!("simulation complete");
    Ok(SimOutcome::Completed)
}

/// Handshake one accepted connection into a [`Contender`]: send the
/// rulebook, read `iwannaplay`, clamp the requested cell onto the grid.
fn recruit(
    stream: TcpStream,
    config: &SimulationConfig,
    rulebook_text: &str,
) -> Result<Contender, Failure> {
    let mut reader = LineReader::new(BufReader::new(
        stream.try_clone().map_err(|_| Failure::System)?,
    ));
    let mut writer = stream;
    send(&mut writer, &ControllerMsg::Sinister.to_string());
    if let Err(e) = writer
        .write_all(rulebook_text.as_bytes())
        .and_then(|()| writer.flush())
    {
        warn!("sending rulebook failed: {e}");
    }

    let line = reader.read_line().ok_or(Failure::Protocol)?;
    let report = TeamReport::decode(&line).map_err(|e| {
        warn!("join message rejected: {e:#}");
        Failure::Protocol
    })?;
    let TeamReport::IWannaPlay { x, y, name, port } = report else {
        warn!("expected a join message, got {report:?}");
        return Err(Failure::Protocol);
    };
    let mut pos = Coords { x, y };
    pos.clamp(config.width, config.height);
    trace!(%name, port, ?pos, "team joined");
    Ok(Contender {
        name,
        pos,
        port,
        reader,
        writer,
    })
}

/// Partition roster indices by cell. The roster is iterated in sorted
/// order, so the first occurrence of a cell defines its zone's order.
fn group_by_zone(positions: &[Coords]) -> Vec<Vec<usize>> {
    let mut zones: Vec<Vec<usize>> = Vec::new();
    for (i, pos) in positions.iter().enumerate() {
        match zones.iter_mut().find(|z| positions[z[0]] == *pos) {
            Some(zone) => zone.push(i),
            None => zones.push(vec![i]),
        }
    }
    zones
}

/// The ports each zone member is told to challenge.
///
/// Exactly one battle per co-located pair: every member except the last is
/// paired ahead against the members between it and the last; the last
/// member challenges everyone before it. Singleton zones get nothing.
fn zone_port_lists(zone: &[usize], ports: &[u16]) -> Vec<(usize, Vec<u16>)> {
    let last = zone.len() - 1;
    zone.iter()
        .enumerate()
        .map(|(j, &team)| {
            let targets = if j < last {
                zone[j + 1..last].iter().map(|&k| ports[k]).collect()
            } else {
                zone[..last].iter().map(|&k| ports[k]).collect()
            };
            (team, targets)
        })
        .collect()
}

fn dispatch_battles(roster: &mut [Contender], zones: &[Vec<usize>]) {
    let ports: Vec<u16> = roster.iter().map(|t| t.port).collect();
    for zone in zones.iter().filter(|z| z.len() >= 2) {
        for (team, targets) in zone_port_lists(zone, &ports) {
            let contender = &mut roster[team];
            let msg = ControllerMsg::Battle {
                x: contender.pos.x,
                y: contender.pos.y,
                ports: targets,
            };
            send(&mut contender.writer, &msg.to_string());
        }
    }
}

/// Read one end-of-battle report from each member of every co-located
/// pair. Returns true when a `disco`/EOF pairing calls the game off.
fn barrier(roster: &mut [Contender]) -> Result<bool, Failure> {
    let mut aborted = false;
    for i in 0..roster.len() {
        for j in i + 1..roster.len() {
            if roster[i].pos != roster[j].pos {
                continue;
            }
            let a = read_report(&mut roster[i])?;
            let b = read_report(&mut roster[j])?;
            match (a, b) {
                (Some(TeamReport::DoneFighting), Some(TeamReport::DoneFighting)) => {}
                (Some(TeamReport::Disco), None) | (None, Some(TeamReport::Disco)) => {
                    aborted = true;
                }
                other => {
                    warn!("unexpected barrier outcome: {other:?}");
                    return Err(Failure::Protocol);
                }
            }
        }
    }
    Ok(aborted)
}

/// Read one report; `None` is EOF.
fn read_report(team: &mut Contender) -> Result<Option<TeamReport>, Failure> {
    let Some(line) = team.reader.read_line() else {
        return Ok(None);
    };
    TeamReport::decode(&line).map(Some).map_err(|e| {
        warn!("report from {:?} rejected: {e:#}", team.name);
        Failure::Protocol
    })
}

/// Ask every team where it travels next and move it, with toroidal wrap.
fn collect_movements(roster: &mut [Contender], config: &SimulationConfig) -> Result<(), Failure> {
    for team in roster.iter_mut() {
        send(&mut team.writer, &ControllerMsg::WhereNow.to_string());
        let Some(TeamReport::Travel(dir)) = read_report(team)? else {
            warn!("expected travel from {:?}", team.name);
            return Err(Failure::Protocol);
        };
        team.pos.step(dir, config.width, config.height);
        trace!(name = %team.name, pos = ?team.pos, "moved");
    }
    Ok(())
}

fn broadcast_gameoverman(roster: &mut [Contender]) {
    for team in roster.iter_mut() {
        send(&mut team.writer, &ControllerMsg::GameOverMan.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zones_preserve_first_occurrence_order() {
        let positions = [
            Coords { x: 0, y: 0 },
            Coords { x: 1, y: 1 },
            Coords { x: 0, y: 0 },
            Coords { x: 2, y: 0 },
            Coords { x: 1, y: 1 },
        ];
        let zones = group_by_zone(&positions);
        assert_eq!(zones, vec![vec![0, 2], vec![1, 4], vec![3]]);
    }

    #[test]
    fn pair_battles_are_created_exactly_once() {
        let ports = [10, 20, 30, 40];

        // zone of two: only the last member challenges
        assert_eq!(
            zone_port_lists(&[0, 1], &ports),
            vec![(0, vec![]), (1, vec![10])]
        );

        // zone of three: one battle per pair, never two
        let lists = zone_port_lists(&[0, 1, 2], &ports);
        assert_eq!(lists, vec![(0, vec![20]), (1, vec![]), (2, vec![10, 20])]);
        let battles: usize = lists.iter().map(|(_, p)| p.len()).sum();
        assert_eq!(battles, 3); // C(3, 2)

        let lists = zone_port_lists(&[0, 1, 2, 3], &ports);
        let battles: usize = lists.iter().map(|(_, p)| p.len()).sum();
        assert_eq!(battles, 6); // C(4, 2)
    }

    #[test]
    fn every_member_fights_once_per_pair_it_is_in() {
        // each team's battle count (challenges plus times challenged)
        // must equal the number of pairs containing it
        let ports = [10, 20, 30];
        let zone = [0usize, 1, 2];
        let lists = zone_port_lists(&zone, &ports);
        let mut fights = [0usize; 3];
        for (team, targets) in &lists {
            fights[*team] += targets.len();
            for port in targets {
                let waiter = ports.iter().position(|p| p == port).unwrap();
                fights[waiter] += 1;
            }
        }
        assert_eq!(fights, [2, 2, 2]);
    }
}

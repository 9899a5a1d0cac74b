//! The three driver modes of a team process.
//!
//! Standalone `wait` and `challenge` run a single battle and print its
//! narrative. Simulation mode hangs off a controller: battles fan out as
//! detached threads (one per accepted challenge, one per port listed in a
//! `battle` order), every thread appends its finished narrative to a shared
//! round accumulator, and the main thread drains, sorts and prints it on
//! each round boundary.
//!
//! Inside a battle thread an opposing team's disconnect degrades to a
//! `disco` report and a quiet thread death; a protocol violation is fatal
//! to the whole process, as everywhere else.

use std::io::{BufReader, Write as _};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{info, instrument, trace, warn};

use crate::battle::{self, BattleError, Peer};
use crate::definitions::Definitions;
use crate::errors::{die, Failure, Role};
use crate::listener;
use crate::protocol::{send, ControllerMsg, LineReader, PeerMsg, TeamReport};
use crate::rulebook;
use crate::team_file::{self, Coords, Team};

/// Sort, print and clear a batch of narratives.
///
/// Lexicographic order over whole multi-line narratives recovers a
/// deterministic transcript from concurrently finishing battles.
fn print_narratives(narratives: &mut Vec<String>) {
    narratives.sort();
    let mut out = std::io::stdout().lock();
    for narrative in narratives.drain(..) {
        let _ = out.write_all(narrative.as_bytes());
    }
    let _ = out.flush();
}

fn standalone_failure(err: BattleError) -> Failure {
    match err {
        BattleError::PeerGone => Failure::TeamGone,
        BattleError::Protocol => Failure::Protocol,
    }
}

/// Respond to a challenge on an already-accepted connection: read the
/// `fightmeirl` greeting, answer `haveatyou`, battle as the responder.
/// Returns the finished narrative.
fn be_challenged(defs: &Definitions, team: &Team, peer: &mut Peer) -> Result<String, BattleError> {
    let PeerMsg::FightMeIrl(name) = peer.read_msg()? else {
        warn!("expected a challenge greeting");
        return Err(BattleError::Protocol);
    };
    peer.name = name;
    let mut narrative = format!("{} has a difference of opinion\n", peer.name);
    peer.send_msg(&PeerMsg::HaveAtYou(team.name.clone()));
    battle::run(defs, team, peer, false, &mut narrative)?;
    Ok(narrative)
}

/// Open hostilities on an already-connected stream: send `fightmeirl`,
/// expect `haveatyou`, battle as the challenger. Returns the narrative.
fn challenge(defs: &Definitions, team: &Team, peer: &mut Peer) -> Result<String, BattleError> {
    peer.send_msg(&PeerMsg::FightMeIrl(team.name.clone()));
    let PeerMsg::HaveAtYou(name) = peer.read_msg()? else {
        warn!("expected the challenge to be accepted");
        return Err(BattleError::Protocol);
    };
    peer.name = name;
    let mut narrative = format!("{} has a difference of opinion\n", peer.name);
    battle::run(defs, team, peer, true, &mut narrative)?;
    Ok(narrative)
}

/// Standalone wait mode, after the caller has bound (and announced) the
/// listening socket: accept one challenger, battle, print.
#[instrument(skip_all, fields(team = %team.name))]
pub fn wait_for_challenge(
    defs: &Definitions,
    team: &Team,
    listener: &TcpListener,
) -> Result<(), Failure> {
    let stream = listener::accept(listener).map_err(|_| Failure::ConnectTeam)?;
    let mut peer = Peer::new(stream).map_err(|_| Failure::System)?;
    let narrative = be_challenged(defs, team, &mut peer).map_err(standalone_failure)?;
    print_narratives(&mut vec![narrative]);
    Ok(())
}

/// Standalone challenge mode: connect to the waiting team and battle.
#[instrument(skip_all, fields(team = %team.name, port))]
pub fn run_challenge(defs: &Definitions, team: &Team, port: u16) -> Result<(), Failure> {
    let stream = listener::connect(port).map_err(|_| Failure::ConnectTeam)?;
    let mut peer = Peer::new(stream).map_err(|_| Failure::System)?;
    let narrative = challenge(defs, team, &mut peer).map_err(standalone_failure)?;
    print_narratives(&mut vec![narrative]);
    Ok(())
}

/// Everything a simulation-mode battle thread needs.
struct SimContext {
    defs: Arc<Definitions>,
    team: Arc<Team>,
    narratives: Mutex<Vec<String>>,
    controller: Mutex<TcpStream>,
}

impl SimContext {
    fn report(&self, report: TeamReport) {
        let mut writer = self.controller.lock().expect("poisoned");
        send(&mut *writer, &report.to_string());
    }

    fn push_narrative(&self, narrative: String) {
        self.narratives.lock().expect("poisoned").push(narrative);
    }
}

/// A battle thread's tail: record the narrative and tell the controller,
/// or degrade a disconnect to `disco`. Protocol violations kill the
/// process.
fn settle_battle(ctx: &SimContext, outcome: Result<String, BattleError>) {
    match outcome {
        Ok(narrative) => {
            ctx.push_narrative(narrative);
            ctx.report(TeamReport::DoneFighting);
        }
        Err(BattleError::PeerGone) => {
            info!("opposing team disconnected mid-battle");
            ctx.report(TeamReport::Disco);
        }
        Err(BattleError::Protocol) => die(Failure::Protocol, Role::Team),
    }
}

fn handle_accepted(ctx: Arc<SimContext>, stream: TcpStream) {
    let Ok(mut peer) = Peer::new(stream) else {
        die(Failure::System, Role::Team);
    };
    let outcome = be_challenged(&ctx.defs, &ctx.team, &mut peer);
    settle_battle(&ctx, outcome);
}

fn handle_battle_order(ctx: Arc<SimContext>, port: u16) {
    let Ok(stream) = listener::connect(port) else {
        die(Failure::ConnectTeam, Role::Team);
    };
    let Ok(mut peer) = Peer::new(stream) else {
        die(Failure::System, Role::Team);
    };
    let outcome = challenge(&ctx.defs, &ctx.team, &mut peer);
    settle_battle(&ctx, outcome);
}

/// Simulation mode: join the controller on `controller_port` and play
/// rounds until `gameoverman`.
///
/// Handshake: expect `sinister`, ingest the inlined rulebook from the same
/// stream, load the team file, bind an ephemeral wait listener, announce
/// with `iwannaplay`. Returns `Ok(())` on a clean game over.
#[instrument(skip(team_path))]
pub fn run_simulation_mode(controller_port: u16, team_path: &Path) -> Result<(), Failure> {
    let stream = listener::connect(controller_port).map_err(|_| Failure::ConnectController)?;
    let mut reader = LineReader::new(BufReader::new(
        stream.try_clone().map_err(|_| Failure::System)?,
    ));

    let greeting = reader.read_line().ok_or(Failure::ControllerGone)?;
    match ControllerMsg::decode(&greeting) {
        Ok(ControllerMsg::Sinister) => {}
        _ => return Err(Failure::Protocol),
    }
    let defs = Arc::new(rulebook::parse_from(&mut reader)?);
    let mut team = team_file::load(team_path, &defs)?;

    let (wait_listener, port) = listener::open(0).map_err(|_| Failure::System)?;
    team.port = port;
    let mut pos = team.pos;
    let mut directions = team.directions.clone();
    let team = Arc::new(team);

    let ctx = Arc::new(SimContext {
        defs,
        team: Arc::clone(&team),
        narratives: Mutex::new(Vec::new()),
        controller: Mutex::new(stream),
    });

    // accept challenges for as long as the process lives
    let acceptor_ctx = Arc::clone(&ctx);
    thread::spawn(move || loop {
        match listener::accept(&wait_listener) {
            Ok(stream) => {
                let ctx = Arc::clone(&acceptor_ctx);
                thread::spawn(move || handle_accepted(ctx, stream));
            }
            Err(e) => {
                warn!("accept failed: {e:#}");
                die(Failure::ConnectTeam, Role::Team);
            }
        }
    });

    ctx.report(TeamReport::IWannaPlay {
        x: pos.x,
        y: pos.y,
        name: team.name.clone(),
        port,
    });
    info!(team = %team.name, port, "joined simulation");

    loop {
        let line = reader.read_line().ok_or(Failure::ControllerGone)?;
        let msg = ControllerMsg::decode(&line).map_err(|e| {
            warn!("controller message rejected: {e:#}");
            Failure::Protocol
        })?;
        match msg {
            ControllerMsg::Battle { x, y, ports } => {
                pos = Coords { x, y };
                println!("Team is in zone {} {}", pos.x, pos.y);
                let _ = std::io::stdout().flush();
                trace!(?ports, "battle orders");
                for port in ports {
                    let ctx = Arc::clone(&ctx);
                    thread::spawn(move || handle_battle_order(ctx, port));
                }
            }
            ControllerMsg::WhereNow => {
                print_narratives(&mut ctx.narratives.lock().expect("poisoned"));
                let dir = *directions.current();
                directions.advance();
                ctx.report(TeamReport::Travel(dir));
            }
            ControllerMsg::GameOverMan => {
                print_narratives(&mut ctx.narratives.lock().expect("poisoned"));
                info!("game over");
                return Ok(());
            }
            ControllerMsg::Sinister => return Err(Failure::Protocol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    const RULEBOOK: &str = "\
fire
water
grass
.
fire weak normal super
water weak normal super
grass weak normal super
.
water +fire
fire +grass
grass +water
.
splash water
ember fire
vine grass
.
A water splash splash splash
B fire ember ember ember
C grass vine vine vine
.
";

    fn team(name: &str, defs: &Definitions) -> Team {
        let src = format!("{name}\nA splash\nA splash\nA splash\nA splash\n0 0\nN\n");
        team_file::parse_str(&src, defs).unwrap()
    }

    #[test]
    fn standalone_pair_completes() {
        let defs = rulebook::parse_str(RULEBOOK).unwrap();
        let (wait_listener, port) = listener::open(0).unwrap();

        let waiting_defs = defs.clone();
        let waiter = thread::spawn(move || {
            let beta = team("Beta", &waiting_defs);
            wait_for_challenge(&waiting_defs, &beta, &wait_listener)
        });

        let alpha = team("Alpha", &defs);
        assert_eq!(run_challenge(&defs, &alpha, port), Ok(()));
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn challenge_against_a_closed_port_fails_to_connect() {
        let defs = rulebook::parse_str(RULEBOOK).unwrap();
        // bind then drop to find a port nothing listens on
        let (listener, port) = listener::open(0).unwrap();
        drop(listener);
        let alpha = team("Alpha", &defs);
        assert_eq!(
            run_challenge(&defs, &alpha, port),
            Err(Failure::ConnectTeam)
        );
    }

    #[test]
    fn waiter_reports_hangup_as_team_loss() {
        let defs = rulebook::parse_str(RULEBOOK).unwrap();
        let (wait_listener, port) = listener::open(0).unwrap();
        let quitter = thread::spawn(move || {
            // connect, say nothing, hang up
            let _ = listener::connect(port).unwrap();
        });
        let beta = team("Beta", &defs);
        assert_eq!(
            wait_for_challenge(&defs, &beta, &wait_listener),
            Err(Failure::TeamGone)
        );
        quitter.join().unwrap();
    }

    #[test]
    fn responder_greets_with_its_own_name() {
        let defs = rulebook::parse_str(RULEBOOK).unwrap();
        let (wait_listener, port) = listener::open(0).unwrap();
        let waiting_defs = defs.clone();
        let waiter = thread::spawn(move || {
            let beta = team("Beta", &waiting_defs);
            wait_for_challenge(&waiting_defs, &beta, &wait_listener)
        });

        let stream = listener::connect(port).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut w = &stream;
        w.write_all(b"fightmeirl Alpha\n").unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "haveatyou Beta\n");
        // hang up mid-battle: both handles must go for the FIN to be sent
        drop(reader);
        drop(stream);
        assert_eq!(waiter.join().unwrap(), Err(Failure::TeamGone));
    }
}

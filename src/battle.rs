//! The two-party battle state machine.
//!
//! Both peers run the same engine over one TCP connection, distinguished
//! only by `go_first` (the challenger writes before reading). Each side
//! simulates the whole battle locally: the sender of an attack applies the
//! damage to its copy of the opposing member and the receiver applies it to
//! its own, so both arrive at the same outcome without ever exchanging
//! health values.
//!
//! The engine appends to a per-battle narrative; the caller decides what to
//! do with it (print, or hand to the round accumulator).

use std::fmt::Write as _;
use std::io::BufReader;
use std::net::TcpStream;

use anyhow::Context;
use tracing::{instrument, trace, warn};

use crate::definitions::Definitions;
use crate::protocol::{send, LineReader, PeerMsg};
use crate::team_file::{Member, Team, MAX_HEALTH, MAX_TEAM_PLAYERS};

/// How a battle handler can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleError {
    /// The opposing team hung up mid-battle.
    PeerGone,
    /// The opposing team broke the protocol.
    Protocol,
}

/// An opposing team on the other end of one connection.
pub struct Peer {
    /// Opposing team name, learned during the greeting exchange.
    pub name: String,
    reader: LineReader<BufReader<TcpStream>>,
    writer: TcpStream,
}

impl Peer {
    /// Wrap a connected stream. The name stays empty until the greeting.
    pub fn new(stream: TcpStream) -> anyhow::Result<Peer> {
        let reader = LineReader::new(BufReader::new(
            stream.try_clone().context("cloning peer stream")?,
        ));
        Ok(Peer {
            name: String::new(),
            reader,
            writer: stream,
        })
    }

    /// Read and decode one message from the peer.
    pub fn read_msg(&mut self) -> Result<PeerMsg, BattleError> {
        let line = self.reader.read_line().ok_or(BattleError::PeerGone)?;
        PeerMsg::decode(&line).map_err(|e| {
            warn!("peer message rejected: {e:#}");
            BattleError::Protocol
        })
    }

    /// Send one message to the peer.
    pub fn send_msg(&mut self, msg: &PeerMsg) {
        send(&mut self.writer, &msg.to_string());
    }
}

/// The sender's view of the live opposing member.
struct Combatant {
    agent: usize,
    health: i32,
}

/// Fight the battle to completion. `narrative` arrives seeded with the
/// opening line and leaves holding the full battle record.
///
/// The loser defaults to the own team and flips only when the fourth
/// opposing member falls.
#[instrument(skip_all, fields(us = %own.name, them = %peer.name, go_first))]
pub fn run(
    defs: &Definitions,
    own: &Team,
    peer: &mut Peer,
    go_first: bool,
    narrative: &mut String,
) -> Result<(), BattleError> {
    let mut own_is_loser = true;
    let mut opponent = if go_first {
        None
    } else {
        Some(read_selected(defs, peer, narrative)?)
    };

    // i walks our slots, fallen counts theirs
    let mut fallen = 0;
    for i in 0..MAX_TEAM_PLAYERS {
        if fallen >= MAX_TEAM_PLAYERS {
            break;
        }
        let mut member = select_member(defs, &own.name, &own.members[i], peer, narrative);

        if i == 0 {
            if go_first {
                opponent = Some(read_selected(defs, peer, narrative)?);
            } else {
                let opp = opponent.as_ref().expect("selected before the loop");
                receive_attack(defs, &mut member, opp, peer, narrative)?;
            }
        }

        while member.health > 0 {
            let opp = opponent.as_mut().expect("opponent is live here");
            send_attack(defs, &mut member, opp, peer, narrative);
            if opp.health <= 0 {
                fallen += 1;
                if fallen == MAX_TEAM_PLAYERS {
                    own_is_loser = false;
                    break;
                }
                opponent = Some(read_selected(defs, peer, narrative)?);
            }
            let opp = opponent.as_ref().expect("opponent is live here");
            receive_attack(defs, &mut member, opp, peer, narrative)?;
        }
    }

    let loser = if own_is_loser { &own.name } else { &peer.name };
    let _ = writeln!(narrative, "Team {loser} was eliminated.");
    trace!(%loser, "battle over");
    Ok(())
}

/// Read the opponent's `iselectyou` and stand up our view of that member.
fn read_selected(
    defs: &Definitions,
    peer: &mut Peer,
    narrative: &mut String,
) -> Result<Combatant, BattleError> {
    let PeerMsg::ISelectYou(name) = peer.read_msg()? else {
        warn!("expected a selection");
        return Err(BattleError::Protocol);
    };
    let Some(agent) = defs.agent_by_name(&name) else {
        warn!("selection names unknown agent {name:?}");
        return Err(BattleError::Protocol);
    };
    let _ = writeln!(narrative, "{} chooses {}", peer.name, name);
    Ok(Combatant {
        agent,
        health: MAX_HEALTH,
    })
}

/// Announce our next member and produce its battle copy.
fn select_member(
    defs: &Definitions,
    own_name: &str,
    template: &Member,
    peer: &mut Peer,
    narrative: &mut String,
) -> Member {
    let copy = template.fresh();
    let agent_name = &defs.agents[copy.agent].name;
    peer.send_msg(&PeerMsg::ISelectYou(agent_name.clone()));
    let _ = writeln!(narrative, "{own_name} chooses {agent_name}");
    copy
}

/// Send our member's next attack and apply its damage to our copy of the
/// opposing member. Advances the attack ring.
fn send_attack(
    defs: &Definitions,
    member: &mut Member,
    opponent: &mut Combatant,
    peer: &mut Peer,
    narrative: &mut String,
) {
    let attack = *member.attacks.current();
    let agent_name = defs.agents[member.agent].name.clone();
    let attack_name = defs.attacks[attack].name.clone();
    peer.send_msg(&PeerMsg::Attack {
        agent: agent_name.clone(),
        attack: attack_name.clone(),
    });

    let eff = defs.effectiveness(attack, opponent.agent);
    opponent.health -= eff.damage();
    let _ = write!(
        narrative,
        "{agent_name} uses {attack_name}: {}",
        defs.effectiveness_string(attack, eff)
    );
    if opponent.health <= 0 {
        let _ = write!(
            narrative,
            " - {} was eliminated.",
            defs.agents[opponent.agent].name
        );
    }
    narrative.push('\n');
    member.attacks.advance();
}

/// Read an attack from the opposing member and apply it to our member.
///
/// The named agent must be the live opposing member's agent and the attack
/// must exist and be legal for it; anything else is a protocol error.
fn receive_attack(
    defs: &Definitions,
    member: &mut Member,
    opponent: &Combatant,
    peer: &mut Peer,
    narrative: &mut String,
) -> Result<(), BattleError> {
    let PeerMsg::Attack { agent, attack } = peer.read_msg()? else {
        warn!("expected an attack");
        return Err(BattleError::Protocol);
    };
    let Some(attack_id) = defs.attack_by_name(&attack) else {
        warn!("unknown attack {attack:?}");
        return Err(BattleError::Protocol);
    };
    if agent != defs.agents[opponent.agent].name || !defs.legal_attack(opponent.agent, attack_id) {
        warn!("illegal attack {attack:?} from {agent:?}");
        return Err(BattleError::Protocol);
    }

    let eff = defs.effectiveness(attack_id, member.agent);
    member.health -= eff.damage();
    let _ = write!(
        narrative,
        "{agent} uses {attack}: {}",
        defs.effectiveness_string(attack_id, eff)
    );
    if member.health <= 0 {
        let _ = write!(
            narrative,
            " - {} was eliminated.",
            defs.agents[member.agent].name
        );
    }
    narrative.push('\n');
    Ok(())
}

//! The line-oriented message protocol spoken by every peer.
//!
//! All traffic is newline-delimited ASCII. The reader grows its buffer as
//! needed and reports EOF-with-empty-buffer as a distinct outcome (peer
//! disconnect) rather than a malformed line. Each message family has its
//! own recogniser returning a tagged variant; a line whose tag or argument
//! list does not fit is a protocol error for the caller to map.

use std::io::{BufRead, Write};

use anyhow::{bail, Context};
use tracing::warn;

use crate::team_file::Direction;

/// Framed line reader over any buffered stream.
pub struct LineReader<R> {
    inner: R,
}

impl<R: BufRead> LineReader<R> {
    /// Wrap a buffered reader.
    pub fn new(inner: R) -> Self {
        LineReader { inner }
    }

    /// Read one line, without its terminator.
    ///
    /// `None` means the peer is gone: EOF before any byte of a new line, or
    /// a read error (a reset connection reads the same as a closed one).
    pub fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.inner.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                Some(line)
            }
            Err(e) => {
                warn!("read error treated as disconnect: {e}");
                None
            }
        }
    }
}

/// Write one `\n`-terminated line, flushing immediately.
///
/// Write errors are logged and swallowed: a dropped peer surfaces as EOF on
/// the next read, which is where disconnection is handled.
pub fn send(stream: &mut impl Write, line: &str) {
    if let Err(e) = stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.write_all(b"\n"))
        .and_then(|()| stream.flush())
    {
        warn!("write to peer failed: {e}");
    }
}

/// Parse a non-negative decimal integer, digits only.
pub fn number(token: &str) -> Option<i64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Parse a port number in (0, 65535].
pub fn parse_port(token: &str) -> Option<u16> {
    match number(token)? {
        p @ 1..=65535 => Some(p as u16),
        _ => None,
    }
}

fn split_tag(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((tag, rest)) => (tag, Some(rest)),
        None => (line, None),
    }
}

/// Messages a team receives from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerMsg {
    /// The rulebook text follows on the same stream.
    Sinister,
    /// Battle orders: zone coordinates plus the ports to challenge.
    Battle {
        /// Zone x coordinate.
        x: i64,
        /// Zone y coordinate.
        y: i64,
        /// Ports of co-located teams this team must challenge.
        ports: Vec<u16>,
    },
    /// Round is over; reply with `travel`.
    WhereNow,
    /// Simulation is over; print and exit.
    GameOverMan,
}

impl ControllerMsg {
    /// Decode one controller line.
    pub fn decode(line: &str) -> anyhow::Result<Self> {
        let (tag, rest) = split_tag(line);
        match (tag, rest) {
            ("sinister", None) => Ok(ControllerMsg::Sinister),
            ("wherenow?", None) => Ok(ControllerMsg::WhereNow),
            ("gameoverman", None) => Ok(ControllerMsg::GameOverMan),
            ("battle", Some(rest)) => {
                let mut tokens = rest.split(' ');
                let x = tokens.next().and_then(number);
                let y = tokens.next().and_then(number);
                let (Some(x), Some(y)) = (x, y) else {
                    bail!("bad battle coordinates: {line:?}");
                };
                let ports = tokens
                    .map(|t| parse_port(t).context("bad battle port"))
                    .collect::<anyhow::Result<Vec<u16>>>()?;
                Ok(ControllerMsg::Battle { x, y, ports })
            }
            _ => bail!("unknown controller message: {line:?}"),
        }
    }
}

impl std::fmt::Display for ControllerMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerMsg::Sinister => write!(f, "sinister"),
            ControllerMsg::WhereNow => write!(f, "wherenow?"),
            ControllerMsg::GameOverMan => write!(f, "gameoverman"),
            ControllerMsg::Battle { x, y, ports } => {
                write!(f, "battle {x} {y}")?;
                for port in ports {
                    write!(f, " {port}")?;
                }
                Ok(())
            }
        }
    }
}

/// Messages the controller receives from a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamReport {
    /// Join request: starting coordinates, team name, wait port.
    IWannaPlay {
        /// Requested x coordinate (clamped by the controller).
        x: i64,
        /// Requested y coordinate (clamped by the controller).
        y: i64,
        /// Team name.
        name: String,
        /// Port the team's wait listener is bound to.
        port: u16,
    },
    /// One battle of the round finished.
    DoneFighting,
    /// Movement reply to `wherenow?`.
    Travel(Direction),
    /// An opposing team disconnected mid-battle.
    Disco,
}

impl TeamReport {
    /// Decode one team-to-controller line.
    pub fn decode(line: &str) -> anyhow::Result<Self> {
        let (tag, rest) = split_tag(line);
        match (tag, rest) {
            ("donefighting", None) => Ok(TeamReport::DoneFighting),
            ("disco", None) => Ok(TeamReport::Disco),
            ("travel", Some(rest)) => {
                // Exactly one direction letter: "travel D" is 8 bytes.
                if line.len() != "travel D".len() {
                    bail!("bad travel message: {line:?}");
                }
                let dir = rest
                    .chars()
                    .next()
                    .and_then(Direction::from_letter)
                    .context("bad travel direction")?;
                Ok(TeamReport::Travel(dir))
            }
            ("iwannaplay", Some(rest)) => {
                let mut tokens = rest.split(' ');
                let x = tokens.next().and_then(number);
                let y = tokens.next().and_then(number);
                let name = tokens.next();
                let port = tokens.next().and_then(parse_port);
                let (Some(x), Some(y), Some(name), Some(port)) = (x, y, name, port) else {
                    bail!("bad iwannaplay message: {line:?}");
                };
                if name.is_empty() || tokens.next().is_some() {
                    bail!("bad iwannaplay message: {line:?}");
                }
                Ok(TeamReport::IWannaPlay {
                    x,
                    y,
                    name: name.to_owned(),
                    port,
                })
            }
            _ => bail!("unknown team message: {line:?}"),
        }
    }
}

impl std::fmt::Display for TeamReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeamReport::DoneFighting => write!(f, "donefighting"),
            TeamReport::Disco => write!(f, "disco"),
            TeamReport::Travel(dir) => write!(f, "travel {}", dir.letter()),
            TeamReport::IWannaPlay { x, y, name, port } => {
                write!(f, "iwannaplay {x} {y} {name} {port}")
            }
        }
    }
}

/// Messages exchanged between two battling teams.
///
/// Names ride to the end of the line, so they may contain spaces; the
/// `attack` payload is one agent token followed by the attack name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMsg {
    /// Challenge greeting carrying the challenger's name.
    FightMeIrl(String),
    /// Challenge acceptance carrying the responder's name.
    HaveAtYou(String),
    /// The sender fields the named agent.
    ISelectYou(String),
    /// The sender's named agent uses the named attack.
    Attack {
        /// The attacking agent, which must be the sender's live member.
        agent: String,
        /// The attack used.
        attack: String,
    },
}

impl PeerMsg {
    /// Decode one team-to-team line.
    pub fn decode(line: &str) -> anyhow::Result<Self> {
        let (tag, rest) = split_tag(line);
        let rest = rest.filter(|r| !r.is_empty());
        match (tag, rest) {
            ("fightmeirl", Some(name)) => Ok(PeerMsg::FightMeIrl(name.to_owned())),
            ("haveatyou", Some(name)) => Ok(PeerMsg::HaveAtYou(name.to_owned())),
            ("iselectyou", Some(name)) => Ok(PeerMsg::ISelectYou(name.to_owned())),
            ("attack", Some(rest)) => {
                let (agent, attack) = rest
                    .split_once(' ')
                    .context("attack message missing attack name")?;
                if agent.is_empty() || attack.is_empty() {
                    bail!("bad attack message: {line:?}");
                }
                Ok(PeerMsg::Attack {
                    agent: agent.to_owned(),
                    attack: attack.to_owned(),
                })
            }
            _ => bail!("unknown peer message: {line:?}"),
        }
    }
}

impl std::fmt::Display for PeerMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerMsg::FightMeIrl(name) => write!(f, "fightmeirl {name}"),
            PeerMsg::HaveAtYou(name) => write!(f, "haveatyou {name}"),
            PeerMsg::ISelectYou(name) => write!(f, "iselectyou {name}"),
            PeerMsg::Attack { agent, attack } => write!(f, "attack {agent} {attack}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn reader_distinguishes_eof_from_blank_line() {
        let data = b"hello\n\nworld";
        let mut reader = LineReader::new(BufReader::new(&data[..]));
        assert_eq!(reader.read_line().as_deref(), Some("hello"));
        assert_eq!(reader.read_line().as_deref(), Some(""));
        // final line without terminator still arrives
        assert_eq!(reader.read_line().as_deref(), Some("world"));
        assert_eq!(reader.read_line(), None);
    }

    #[test]
    fn controller_messages_round_trip() {
        for msg in [
            ControllerMsg::Sinister,
            ControllerMsg::WhereNow,
            ControllerMsg::GameOverMan,
            ControllerMsg::Battle {
                x: 3,
                y: 0,
                ports: vec![4000, 4001],
            },
            ControllerMsg::Battle {
                x: 0,
                y: 0,
                ports: vec![],
            },
        ] {
            assert_eq!(ControllerMsg::decode(&msg.to_string()).unwrap(), msg);
        }
    }

    #[test]
    fn battle_rejects_bad_arguments() {
        assert!(ControllerMsg::decode("battle").is_err());
        assert!(ControllerMsg::decode("battle 1").is_err());
        assert!(ControllerMsg::decode("battle x 1").is_err());
        assert!(ControllerMsg::decode("battle 1 1 0").is_err());
        assert!(ControllerMsg::decode("battle 1 -1 4000").is_err());
        assert!(ControllerMsg::decode("sinister now").is_err());
    }

    #[test]
    fn travel_must_be_exactly_one_letter() {
        assert_eq!(
            TeamReport::decode("travel N").unwrap(),
            TeamReport::Travel(Direction::North)
        );
        assert!(TeamReport::decode("travel").is_err());
        assert!(TeamReport::decode("travel NE").is_err());
        assert!(TeamReport::decode("travel Q").is_err());
        assert!(TeamReport::decode("travel  N").is_err());
    }

    #[test]
    fn iwannaplay_validates_every_field() {
        assert_eq!(
            TeamReport::decode("iwannaplay 2 7 Alpha 4000").unwrap(),
            TeamReport::IWannaPlay {
                x: 2,
                y: 7,
                name: "Alpha".to_owned(),
                port: 4000,
            }
        );
        assert!(TeamReport::decode("iwannaplay -1 7 Alpha 4000").is_err());
        assert!(TeamReport::decode("iwannaplay 2 7 Alpha 0").is_err());
        assert!(TeamReport::decode("iwannaplay 2 7 Alpha 70000").is_err());
        assert!(TeamReport::decode("iwannaplay 2 7 Alpha").is_err());
        assert!(TeamReport::decode("iwannaplay 2 7 Alpha 4000 junk").is_err());
    }

    #[test]
    fn peer_names_run_to_end_of_line() {
        assert_eq!(
            PeerMsg::decode("fightmeirl The Washed Out").unwrap(),
            PeerMsg::FightMeIrl("The Washed Out".to_owned())
        );
        assert_eq!(
            PeerMsg::decode("attack Ogre heavy swing").unwrap(),
            PeerMsg::Attack {
                agent: "Ogre".to_owned(),
                attack: "heavy swing".to_owned(),
            }
        );
        assert!(PeerMsg::decode("attack Ogre").is_err());
        assert!(PeerMsg::decode("iselectyou").is_err());
        assert!(PeerMsg::decode("surrender now").is_err());
    }
}

//! Team files and the grid-side data model: members with their attack
//! rings, positions, and the direction ring a team walks between rounds.
//!
//! Rings are ordered vectors with a cursor; advancement is a modular
//! increment. The original's circular linked lists buy nothing here.

use std::path::Path;

use anyhow::Context;
use tracing::trace;

use crate::definitions::{AgentId, AttackId, Definitions};
use crate::errors::Failure;
use crate::protocol::number;

/// Members per team, fixed.
pub const MAX_TEAM_PLAYERS: usize = 4;

/// Health a member enters a battle with.
pub const MAX_HEALTH: i32 = 10;

/// A circular sequence with a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> Ring<T> {
    /// Build a ring from a non-empty sequence; `None` if empty.
    pub fn new(items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Ring { items, cursor: 0 })
        }
    }

    /// The element under the cursor.
    pub fn current(&self) -> &T {
        &self.items[self.cursor]
    }

    /// Move the cursor one step around the ring.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.items.len();
    }

    /// Ring length.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Never true; rings are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The underlying sequence, in ring order from the start.
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T: Clone> Ring<T> {
    /// A copy of this ring with the cursor back at the start.
    pub fn restarted(&self) -> Self {
        Ring {
            items: self.items.clone(),
            cursor: 0,
        }
    }
}

/// A compass direction from a team file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `N`: y + 1.
    North,
    /// `E`: x + 1.
    East,
    /// `S`: y - 1.
    South,
    /// `W`: x - 1.
    West,
}

impl Direction {
    /// Decode one of `N`, `E`, `S`, `W`.
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'N' => Some(Direction::North),
            'E' => Some(Direction::East),
            'S' => Some(Direction::South),
            'W' => Some(Direction::West),
            _ => None,
        }
    }

    /// The wire letter.
    pub fn letter(self) -> char {
        match self {
            Direction::North => 'N',
            Direction::East => 'E',
            Direction::South => 'S',
            Direction::West => 'W',
        }
    }
}

/// A position on the toroidal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coords {
    /// Column, in `[0, width)` once clamped.
    pub x: i64,
    /// Row, in `[0, height)` once clamped.
    pub y: i64,
}

impl Coords {
    /// Clamp non-negative coordinates onto the grid.
    pub fn clamp(&mut self, width: i64, height: i64) {
        self.x %= width;
        self.y %= height;
    }

    /// Move one step with toroidal wrap-around: a negative coordinate
    /// wraps to `dim - 1`, then both axes are reduced modulo the grid.
    pub fn step(&mut self, dir: Direction, width: i64, height: i64) {
        match dir {
            Direction::North => self.y += 1,
            Direction::East => self.x += 1,
            Direction::South => self.y -= 1,
            Direction::West => self.x -= 1,
        }
        if self.x < 0 {
            self.x = width - 1;
        } else if self.y < 0 {
            self.y = height - 1;
        }
        self.x %= width;
        self.y %= height;
    }
}

/// One team slot: an agent reference, its health, and its attack ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// The agent this member fields.
    pub agent: AgentId,
    /// Remaining health; the member is eliminated at zero or below.
    pub health: i32,
    /// Attacks in file order; the cursor is the next attack to use.
    pub attacks: Ring<AttackId>,
}

impl Member {
    /// A full-health copy with the attack cursor back at the start, as
    /// produced each time the member is selected into a battle.
    pub fn fresh(&self) -> Member {
        Member {
            agent: self.agent,
            health: MAX_HEALTH,
            attacks: self.attacks.restarted(),
        }
    }
}

/// A team as loaded from its team file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Team name.
    pub name: String,
    /// The four members, in file order.
    pub members: [Member; MAX_TEAM_PLAYERS],
    /// Grid position. Raw file coordinates until clamped by a controller.
    pub pos: Coords,
    /// The direction ring walked between rounds.
    pub directions: Ring<Direction>,
    /// Port the team's wait listener is bound to; 0 when not listening.
    pub port: u16,
}

/// Load a team file from disk against parsed definitions.
pub fn load(path: &Path, defs: &Definitions) -> Result<Team, Failure> {
    let src = std::fs::read_to_string(path).map_err(|_| Failure::OpenTeam)?;
    parse_str(&src, defs)
}

/// Parse team-file text against parsed definitions.
///
/// Layout: name line, [`MAX_TEAM_PLAYERS`] member lines
/// (`<agent> <attack>...`), a coordinate line, a direction line, EOF.
pub fn parse_str(src: &str, defs: &Definitions) -> Result<Team, Failure> {
    parse(src, defs).map_err(|e| {
        trace!("team file rejected: {e:#}");
        Failure::TeamContents
    })
}

fn parse(src: &str, defs: &Definitions) -> anyhow::Result<Team> {
    let mut lines = src.lines();
    let mut next_line = || lines.next().context("unexpected end of team file");

    let name = next_line()?;
    if name.is_empty() {
        anyhow::bail!("empty team name");
    }

    let mut members = Vec::with_capacity(MAX_TEAM_PLAYERS);
    for _ in 0..MAX_TEAM_PLAYERS {
        members.push(parse_member(next_line()?, defs)?);
    }
    let members: [Member; MAX_TEAM_PLAYERS] = members
        .try_into()
        .expect("member count is fixed by the loop above");

    let pos = parse_coords(next_line()?)?;
    let directions = parse_directions(next_line()?)?;

    if lines.next().is_some() {
        anyhow::bail!("content after the direction line");
    }

    Ok(Team {
        name: name.to_owned(),
        members,
        pos,
        directions,
        port: 0,
    })
}

fn parse_member(line: &str, defs: &Definitions) -> anyhow::Result<Member> {
    let mut tokens = line.split(' ');
    let agent_name = tokens.next().unwrap_or("");
    let agent = defs
        .agent_by_name(agent_name)
        .with_context(|| format!("unknown agent {agent_name:?}"))?;

    let mut attacks = Vec::new();
    for token in tokens {
        let attack = defs
            .attack_by_name(token)
            .with_context(|| format!("unknown attack {token:?}"))?;
        if !defs.legal_attack(agent, attack) {
            anyhow::bail!("attack {token:?} is not legal for {agent_name:?}");
        }
        attacks.push(attack);
    }
    let attacks = Ring::new(attacks).context("member line lists no attacks")?;

    Ok(Member {
        agent,
        health: MAX_HEALTH,
        attacks,
    })
}

fn parse_coords(line: &str) -> anyhow::Result<Coords> {
    let (x, y) = line.split_once(' ').context("coordinate line needs two values")?;
    let (Some(x), Some(y)) = (number(x), number(y)) else {
        anyhow::bail!("bad coordinates: {line:?}");
    };
    Ok(Coords { x, y })
}

fn parse_directions(line: &str) -> anyhow::Result<Ring<Direction>> {
    let mut dirs = Vec::new();
    for token in line.split(' ') {
        let mut chars = token.chars();
        let dir = chars
            .next()
            .and_then(Direction::from_letter)
            .filter(|_| chars.next().is_none())
            .with_context(|| format!("bad direction {token:?}"))?;
        dirs.push(dir);
    }
    Ring::new(dirs).context("no directions")
}

//! Parser for the sinister file: five `.`-terminated sections (types,
//! effectiveness, relations, attacks, agents) with strict cross-reference
//! and uniqueness checks.
//!
//! The parser consumes exactly the five sections from its reader, so the
//! same stream can carry protocol traffic afterwards (simulation mode
//! inlines the rulebook on the controller connection).

use std::io::BufRead;

use anyhow::{bail, Context};
use tracing::trace;

use crate::definitions::{AgentDef, AttackDef, Definitions, TypeDef, LEGAL_ATTACKS};
use crate::errors::Failure;
use crate::protocol::LineReader;

/// Parse a complete rulebook held in memory.
pub fn parse_str(src: &str) -> Result<Definitions, Failure> {
    parse_from(&mut LineReader::new(src.as_bytes()))
}

/// Parse a rulebook from a stream, consuming exactly the five sections.
pub fn parse_from<R: BufRead>(reader: &mut LineReader<R>) -> Result<Definitions, Failure> {
    parse(reader).map_err(|e| {
        trace!("rulebook rejected: {e:#}");
        Failure::SinisterContents
    })
}

fn parse<R: BufRead>(reader: &mut LineReader<R>) -> anyhow::Result<Definitions> {
    let mut defs = Definitions::default();

    read_section(reader, |line| read_type_name(&mut defs, line))?;
    read_section(reader, |line| read_effectiveness(&mut defs, line))?;
    let mut related = vec![false; defs.types.len()];
    read_section(reader, |line| read_relations(&mut defs, &mut related, line))?;
    read_section(reader, |line| read_attack(&mut defs, line))?;
    read_section(reader, |line| read_agent(&mut defs, line))?;

    if defs.types.is_empty() || defs.attacks.is_empty() || defs.agents.is_empty() {
        bail!("a section is empty");
    }
    for t in &defs.types {
        if !t.has_effectiveness() {
            bail!("type {:?} missing from the effectiveness section", t.name);
        }
    }
    Ok(defs)
}

/// Feed each content line of one section to `process`. Comment lines are
/// skipped; a blank line or EOF before the `.` terminator is an error.
fn read_section<R: BufRead>(
    reader: &mut LineReader<R>,
    mut process: impl FnMut(&str) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    loop {
        let line = reader.read_line().context("EOF inside a section")?;
        if line.is_empty() {
            bail!("blank line inside a section");
        } else if line == "." {
            return Ok(());
        } else if line.starts_with('#') {
            continue;
        }
        process(&line)?;
    }
}

fn read_type_name(defs: &mut Definitions, line: &str) -> anyhow::Result<()> {
    if line.contains(' ') {
        bail!("type name contains a space: {line:?}");
    }
    if defs.type_by_name(line).is_some() {
        bail!("duplicate type {line:?}");
    }
    defs.types.push(TypeDef::new(line.to_owned()));
    Ok(())
}

fn read_effectiveness(defs: &mut Definitions, line: &str) -> anyhow::Result<()> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() != 4 {
        bail!("effectiveness line needs a type and three strings: {line:?}");
    }
    let (name, low, normal, high) = (tokens[0], tokens[1], tokens[2], tokens[3]);
    if low.is_empty() || normal.is_empty() || high.is_empty() {
        bail!("empty effectiveness string: {line:?}");
    }
    let id = defs
        .type_by_name(name)
        .with_context(|| format!("unknown type {name:?}"))?;
    if defs.types[id].has_effectiveness() {
        bail!("type {name:?} appears twice in the effectiveness section");
    }
    defs.types[id].effectiveness = [low.to_owned(), normal.to_owned(), high.to_owned()];
    Ok(())
}

fn read_relations(
    defs: &mut Definitions,
    related: &mut [bool],
    line: &str,
) -> anyhow::Result<()> {
    let mut tokens = line.split(' ');
    let name = tokens.next().unwrap_or("");
    let id = defs
        .type_by_name(name)
        .with_context(|| format!("unknown type {name:?}"))?;
    if related[id] {
        bail!("type {name:?} appears twice in the relations section");
    }
    related[id] = true;

    for token in tokens {
        let (target, op) = if let Some(rest) = token.strip_prefix('+') {
            (rest, '+')
        } else if let Some(rest) = token.strip_prefix('-') {
            (rest, '-')
        } else if let Some(rest) = token.strip_prefix('=') {
            (rest, '=')
        } else {
            bail!("bad relation token {token:?}");
        };
        let target = defs
            .type_by_name(target)
            .with_context(|| format!("unknown type in relation {token:?}"))?;
        match op {
            '+' => defs.types[id].higher.push(target),
            '-' => defs.types[id].lower.push(target),
            _ => {} // "=" relations carry no gameplay meaning
        }
    }
    Ok(())
}

fn read_attack(defs: &mut Definitions, line: &str) -> anyhow::Result<()> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() != 2 {
        bail!("attack line needs a name and a type: {line:?}");
    }
    let (name, type_name) = (tokens[0], tokens[1]);
    if name.is_empty() || type_name.is_empty() {
        bail!("bad attack line: {line:?}");
    }
    if defs.attack_by_name(name).is_some() {
        bail!("duplicate attack {name:?}");
    }
    let type_id = defs
        .type_by_name(type_name)
        .with_context(|| format!("unknown type {type_name:?}"))?;
    defs.attacks.push(AttackDef {
        name: name.to_owned(),
        type_id,
    });
    Ok(())
}

fn read_agent(defs: &mut Definitions, line: &str) -> anyhow::Result<()> {
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() != 2 + LEGAL_ATTACKS {
        bail!("agent line needs a type and {LEGAL_ATTACKS} attacks: {line:?}");
    }
    let (name, type_name, attacks) = (tokens[0], tokens[1], &tokens[2..]);
    if name.is_empty() {
        bail!("bad agent line: {line:?}");
    }
    if defs.agent_by_name(name).is_some() {
        bail!("duplicate agent {name:?}");
    }
    let type_id = defs
        .type_by_name(type_name)
        .with_context(|| format!("unknown type {type_name:?}"))?;
    let mut legal = [0; LEGAL_ATTACKS];
    for (slot, attack_name) in legal.iter_mut().zip(attacks) {
        *slot = defs
            .attack_by_name(attack_name)
            .with_context(|| format!("unknown attack {attack_name:?}"))?;
    }
    defs.agents.push(AgentDef {
        name: name.to_owned(),
        type_id,
        legal_attacks: legal,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Effectiveness;
    use std::io::BufReader;

    const ELEMENTAL: &str = "\
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

    #[test]
    fn parses_the_elemental_rulebook() {
        let defs = parse_str(ELEMENTAL).unwrap();
        assert_eq!(defs.types.len(), 3);
        assert_eq!(defs.attacks.len(), 3);
        assert_eq!(defs.agents.len(), 3);

        let splash = defs.attack_by_name("splash").unwrap();
        let ember = defs.attack_by_name("ember").unwrap();
        let vine = defs.attack_by_name("vine").unwrap();
        let a = defs.agent_by_name("A").unwrap();
        let b = defs.agent_by_name("B").unwrap();
        let c = defs.agent_by_name("C").unwrap();
        assert_eq!(defs.effectiveness(splash, b), Effectiveness::High);
        assert_eq!(defs.effectiveness(ember, a), Effectiveness::Low);
        assert_eq!(defs.effectiveness(vine, c), Effectiveness::Normal);
    }

    #[test]
    fn effectiveness_strings_are_positional() {
        let defs = parse_str(ELEMENTAL).unwrap();
        let water = defs.type_by_name("water").unwrap();
        assert_eq!(
            defs.types[water].effectiveness,
            ["weak".to_owned(), "normal".to_owned(), "super".to_owned()]
        );
    }

    #[test]
    fn comments_are_skipped_inside_sections() {
        let src = ELEMENTAL.replace("water\n", "water\n# a comment\n");
        assert!(parse_str(&src).is_ok());
    }

    #[test]
    fn canonical_form_round_trips() {
        // exercise both relation directions
        let src = ELEMENTAL.replace("water +fire", "water +fire -grass");
        let defs = parse_str(&src).unwrap();
        let reparsed = parse_str(&defs.to_canonical()).unwrap();
        assert_eq!(defs, reparsed);
    }

    #[test]
    fn equals_relations_are_ignored_but_checked() {
        let src = ELEMENTAL.replace("water +fire", "water +fire =grass");
        let defs = parse_str(&src).unwrap();
        let water = defs.type_by_name("water").unwrap();
        assert_eq!(defs.types[water].higher.len(), 1);
        assert_eq!(defs.types[water].lower.len(), 0);

        let bad = ELEMENTAL.replace("water +fire", "water =nosuch");
        assert_eq!(parse_str(&bad), Err(Failure::SinisterContents));
    }

    #[test]
    fn rejects_malformed_rulebooks() {
        for (label, src) in [
            ("duplicate type", ELEMENTAL.replace("water\ngrass", "water\nwater")),
            ("blank line", ELEMENTAL.replace("ember fire\n", "ember fire\n\n")),
            ("truncated", ELEMENTAL.replace("A water splash splash splash\n", "")
                .replace("B fire ember ember ember\n.\n", "B fire ember ember ember\n")
                .replace("C grass vine vine vine\n.\n", "")),
            ("unknown type", ELEMENTAL.replace("splash water", "splash lava")),
            ("duplicate attack", ELEMENTAL.replace("ember fire", "splash fire")),
            ("missing effectiveness", ELEMENTAL.replace("grass weak normal super\n", "")),
            ("double effectiveness", ELEMENTAL
                .replace("grass weak normal super", "fire weak normal super")),
            ("extra effectiveness token", ELEMENTAL
                .replace("fire weak normal super", "fire weak normal super extra")),
            ("consecutive spaces", ELEMENTAL
                .replace("fire weak normal super", "fire weak  normal super")),
            ("duplicate relation line", ELEMENTAL
                .replace("fire +grass", "water -grass")),
            ("bad relation token", ELEMENTAL.replace("water +fire", "water fire")),
            ("trailing space", ELEMENTAL.replace("water +fire", "water +fire ")),
            ("two attacks only", ELEMENTAL
                .replace("A water splash splash splash", "A water splash splash")),
            ("unknown agent attack", ELEMENTAL
                .replace("B fire ember ember ember", "B fire ember ember torch")),
            ("duplicate agent", ELEMENTAL
                .replace("C grass vine vine vine", "A grass vine vine vine")),
            ("spaced type name", ELEMENTAL.replace("grass\n.", "tall grass\n.")),
        ] {
            assert_eq!(
                parse_str(&src),
                Err(Failure::SinisterContents),
                "case: {label}"
            );
        }
    }

    #[test]
    fn rejects_empty_worlds() {
        assert_eq!(
            parse_str(".\n.\n.\n.\n.\n"),
            Err(Failure::SinisterContents)
        );
        // types alone are not enough
        assert_eq!(
            parse_str("fire\n.\nfire a b c\n.\n.\n.\n.\n"),
            Err(Failure::SinisterContents)
        );
    }

    #[test]
    fn leaves_the_stream_at_the_first_line_after_the_rulebook() {
        let src = format!("{ELEMENTAL}battle 0 0\n");
        let mut reader = LineReader::new(BufReader::new(src.as_bytes()));
        parse_from(&mut reader).unwrap();
        assert_eq!(reader.read_line().as_deref(), Some("battle 0 0"));
        assert_eq!(reader.read_line(), None);
    }
}

//! The failure taxonomy shared by the `controller` and `team` binaries.
//!
//! Every way a process can die maps to exactly one stderr line and one exit
//! code. The codes differ between the two binaries for historical reasons
//! (the team reuses low numbers for its own file errors), so the mapping is
//! parameterised by [`Role`].

use std::fmt;
use std::process;

/// Which binary is reporting the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The simulation controller.
    Controller,
    /// A team process (any of its three modes).
    Team,
}

/// A fatal, user-visible failure.
///
/// Implements [`std::error::Error`] so it can travel inside an
/// [`anyhow::Error`] and be recovered with `downcast_ref` at the process
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Bad command line.
    Usage,
    /// Grid height below 1 or not a number.
    InvalidHeight,
    /// Grid width below 1 or not a number.
    InvalidWidth,
    /// Sinister file could not be opened.
    OpenSinister,
    /// Sinister file violated the rulebook grammar.
    SinisterContents,
    /// Round count below 1 or not a number.
    InvalidRounds,
    /// Port outside (0, 65535] or not a number.
    InvalidPort,
    /// Requested listen port could not be bound.
    PortBusy,
    /// Team count below 2 or not a number.
    InvalidTeams,
    /// Team file could not be opened.
    OpenTeam,
    /// Team file violated the team-file grammar.
    TeamContents,
    /// Could not connect to the controller.
    ConnectController,
    /// Could not connect to (or accept) an opposing team.
    ConnectTeam,
    /// EOF on the controller stream.
    ControllerGone,
    /// EOF on an opposing team stream outside simulation mode.
    TeamGone,
    /// A message that does not fit the protocol at the current state.
    Protocol,
    /// Anything the OS refused that has no more specific kind.
    System,
}

const CONTROLLER_USAGE: &str =
    "Usage: controller height width sinisterfile rounds port teams [[rounds port teams] ...]";

const TEAM_USAGE: &str = "Usage: team controllerport teamfile\n   \
     or: team wait teamfile sinisterfile\n   \
     or: team challenge teamfile sinisterfile targetport";

impl Failure {
    /// The single stderr line for this failure.
    pub fn message(&self, role: Role) -> &'static str {
        match self {
            Failure::Usage => match role {
                Role::Controller => CONTROLLER_USAGE,
                Role::Team => TEAM_USAGE,
            },
            Failure::InvalidHeight => "Invalid height",
            Failure::InvalidWidth => "Invalid width",
            Failure::OpenSinister => "Unable to access sinister file",
            Failure::SinisterContents => "Error reading sinister file",
            Failure::InvalidRounds => "Invalid number of rounds",
            Failure::InvalidPort => "Invalid port number",
            Failure::PortBusy => "Unable to listen on port",
            Failure::InvalidTeams => "Invalid number of teams",
            Failure::OpenTeam => "Unable to access team file",
            Failure::TeamContents => "Error reading team file",
            Failure::ConnectController => "Unable to connect to controller",
            Failure::ConnectTeam => "Unable to connect to team",
            Failure::ControllerGone => "Unexpected loss of controller",
            Failure::TeamGone => "Unexpected loss of team",
            Failure::Protocol => "Protocol error",
            Failure::System => "System error",
        }
    }

    /// The exit code for this failure under the given role.
    pub fn exit_code(&self, role: Role) -> i32 {
        match role {
            Role::Controller => match self {
                Failure::Usage => 1,
                Failure::InvalidHeight => 2,
                Failure::InvalidWidth => 3,
                Failure::OpenSinister => 4,
                Failure::SinisterContents => 5,
                Failure::InvalidRounds => 6,
                Failure::InvalidPort => 7,
                Failure::PortBusy => 8,
                Failure::InvalidTeams => 9,
                Failure::Protocol => 19,
                _ => 20,
            },
            Role::Team => match self {
                Failure::Usage => 1,
                Failure::OpenSinister => 2,
                Failure::SinisterContents => 3,
                Failure::OpenTeam => 4,
                Failure::TeamContents => 5,
                Failure::InvalidPort => 6,
                Failure::ConnectController => 7,
                Failure::ConnectTeam => 8,
                Failure::ControllerGone => 9,
                Failure::TeamGone => 10,
                Failure::Protocol => 19,
                _ => 20,
            },
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Role only changes the usage string; Display is for log output.
        write!(f, "{}", self.message(Role::Team))
    }
}

impl std::error::Error for Failure {}

/// Print the failure's stderr line and terminate the process.
///
/// Used by the binaries and by detached handler threads for which an error
/// must be fatal to the whole process (spec: errors are fatal to the owning
/// thread, and protocol errors to the process).
pub fn die(failure: Failure, role: Role) -> ! {
    eprintln!("{}", failure.message(role));
    process::exit(failure.exit_code(role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_differ_by_role() {
        assert_eq!(Failure::SinisterContents.exit_code(Role::Controller), 5);
        assert_eq!(Failure::SinisterContents.exit_code(Role::Team), 3);
        assert_eq!(Failure::Protocol.exit_code(Role::Controller), 19);
        assert_eq!(Failure::Protocol.exit_code(Role::Team), 19);
    }

    #[test]
    fn message_is_single_line() {
        for failure in [
            Failure::InvalidHeight,
            Failure::PortBusy,
            Failure::ControllerGone,
            Failure::System,
        ] {
            assert!(!failure.message(Role::Controller).contains('\n'));
        }
    }

    #[test]
    fn travels_through_anyhow() {
        let err = anyhow::Error::from(Failure::Protocol);
        assert_eq!(
            err.downcast_ref::<Failure>(),
            Some(&Failure::Protocol),
        );
    }
}

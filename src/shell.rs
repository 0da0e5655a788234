//! The operator command surface: a line-oriented prompt driving a
//! [`Cluster`] of generals.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::common::GeneralError;
use crate::protocol::{FaultState, Opinion, Property};
use crate::rpc::client;
use crate::server::registry::ClusterRegistry;
use crate::server::General;

pub const HELP_TEXT: &str =
    "Supported commands: actual-order, g-state, g-kill, g-add, help, whoami, exit";
pub const NO_COORDINATOR: &str = "No primary general is elected, try again later.";
const AUTHOR_TAG: &str = env!("CARGO_PKG_AUTHORS");

const USAGE_ACTUAL_ORDER: &str = "Usage: actual-order [attack/retreat]";
const USAGE_STATE: &str = "Usage: g-state [ID] [faulty/non-faulty]";
const USAGE_KILL: &str = "Usage: g-kill [ID]";
const USAGE_ADD: &str = "Usage: g-add [K]";

/// One live general as tracked by the shell.
pub struct GeneralHandle {
    pub id: u64,
    pub port: u16,
}

/// Operator-side view of the cluster. Owns the registry; the generals only
/// read snapshots of it. All interaction with a running general goes through
/// its RPC endpoint.
pub struct Cluster {
    registry: Arc<ClusterRegistry>,
    generals: Vec<GeneralHandle>,
    base_port: u16,
    election_period: Duration,
}

impl Cluster {
    pub fn new(base_port: u16, election_period: Duration) -> Cluster {
        Cluster {
            registry: Arc::new(ClusterRegistry::new()),
            generals: Vec::new(),
            base_port,
            election_period,
        }
    }

    pub fn generals(&self) -> &[GeneralHandle] {
        &self.generals
    }

    /// Spawns `count` fresh generals, ids and ports one past the current
    /// live maximums.
    pub fn spawn(&mut self, count: usize) -> Result<(), GeneralError> {
        for _ in 0..count {
            let id = self
                .generals
                .iter()
                .map(|general| general.id)
                .max()
                .map_or(1, |max| max + 1);
            let port = self
                .generals
                .iter()
                .map(|general| general.port)
                .max()
                .map_or(self.base_port, |max| max + 1);
            General::start(id, port, self.registry.clone(), self.election_period)?;
            self.registry.register(port);
            self.generals.push(GeneralHandle { id, port });
        }
        Ok(())
    }

    /// Stops the named general and forgets it. Once killed, a general stays
    /// gone until the operator adds a new one.
    pub fn kill(&mut self, id: u64) -> Result<(), GeneralError> {
        let index = self.find(id)?;
        let port = self.generals[index].port;
        if !client::stop(port) {
            warn!("G{} did not acknowledge stop", id);
        }
        self.registry.deregister(port);
        self.generals.remove(index);
        Ok(())
    }

    pub fn set_state(&mut self, id: u64, state: FaultState) -> Result<(), GeneralError> {
        let index = self.find(id)?;
        if !client::set_state(self.generals[index].port, state) {
            warn!("G{} did not acknowledge the state change", id);
        }
        Ok(())
    }

    /// The first coordinator port any live general knows about.
    pub fn find_coordinator(&self) -> Option<u16> {
        self.generals
            .iter()
            .find_map(|general| client::known_coordinator_port(general.port))
    }

    /// One rendered line per live general, in creation order. Generals that
    /// fail to answer are skipped.
    pub fn listing(&self, properties: &[Property]) -> Vec<String> {
        self.generals
            .iter()
            .filter_map(|general| client::list(general.port, properties))
            .collect()
    }

    fn find(&self, id: u64) -> Result<usize, GeneralError> {
        self.generals
            .iter()
            .position(|general| general.id == id)
            .ok_or(GeneralError::UnknownGeneral(id))
    }
}

/// A fully parsed operator command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Help,
    Whoami,
    Exit,
    ActualOrder(Opinion),
    StateList,
    StateSet(u64, FaultState),
    Kill(u64),
    Add(usize),
}

/// Outcome of parsing one input line.
#[derive(Clone, Debug, PartialEq)]
pub enum Parsed {
    /// Blank or whitespace-only line; re-prompt silently.
    Empty,
    Command(Command),
    /// A recognized command with bad arguments; the usage line to print.
    Usage(&'static str),
    /// Unrecognized command word.
    Unknown(String),
}

pub fn parse(line: &str) -> Parsed {
    let args: Vec<&str> = line.split_whitespace().collect();
    if args.is_empty() {
        return Parsed::Empty;
    }
    let (command, rest) = (args[0], &args[1..]);
    match command {
        "help" => Parsed::Command(Command::Help),
        "whoami" => Parsed::Command(Command::Whoami),
        "exit" => Parsed::Command(Command::Exit),
        "actual-order" => match rest {
            [order] => match Opinion::parse(order) {
                Some(order) => Parsed::Command(Command::ActualOrder(order)),
                None => Parsed::Usage(USAGE_ACTUAL_ORDER),
            },
            _ => Parsed::Usage(USAGE_ACTUAL_ORDER),
        },
        "g-state" => match rest {
            [] => Parsed::Command(Command::StateList),
            [id, state] => match (id.parse::<u64>(), FaultState::parse(state)) {
                (Ok(id), Some(state)) => Parsed::Command(Command::StateSet(id, state)),
                _ => Parsed::Usage(USAGE_STATE),
            },
            _ => Parsed::Usage(USAGE_STATE),
        },
        "g-kill" => match rest {
            [id] => match id.parse::<u64>() {
                Ok(id) => Parsed::Command(Command::Kill(id)),
                Err(_) => Parsed::Usage(USAGE_KILL),
            },
            _ => Parsed::Usage(USAGE_KILL),
        },
        "g-add" => match rest {
            [count] => match count.parse::<usize>() {
                Ok(count) => Parsed::Command(Command::Add(count)),
                Err(_) => Parsed::Usage(USAGE_ADD),
            },
            _ => Parsed::Usage(USAGE_ADD),
        },
        unknown => Parsed::Unknown(unknown.to_string()),
    }
}

/// Runs one command against the cluster. Returns false when the shell
/// should exit.
pub fn dispatch(cluster: &mut Cluster, command: Command) -> bool {
    match command {
        Command::Help => println!("{}", HELP_TEXT),
        Command::Whoami => println!("{}", AUTHOR_TAG),
        Command::Exit => return false,
        Command::ActualOrder(order) => actual_order(cluster, order),
        Command::StateList => {
            print_lines(&cluster.listing(&[Property::Id, Property::Role, Property::State]))
        }
        Command::StateSet(id, state) => match cluster.set_state(id, state) {
            Ok(()) => print_lines(&cluster.listing(&[Property::Id, Property::State])),
            Err(err) => println!("{}", err),
        },
        Command::Kill(id) => match cluster.kill(id) {
            Ok(()) => print_lines(&cluster.listing(&[Property::Id, Property::State])),
            Err(err) => println!("{}", err),
        },
        Command::Add(count) => match cluster.spawn(count) {
            Ok(()) => print_lines(&cluster.listing(&[Property::Id, Property::Role])),
            Err(err) => println!("{}", err),
        },
    }
    true
}

fn actual_order(cluster: &mut Cluster, order: Opinion) {
    let coordinator = match cluster.find_coordinator() {
        Some(coordinator) => coordinator,
        None => {
            println!("{}", NO_COORDINATOR);
            return;
        }
    };
    match client::execute_order(coordinator, order) {
        Some(verdict) => {
            print_lines(&cluster.listing(&[
                Property::Id,
                Property::Role,
                Property::Majority,
                Property::State,
            ]));
            println!("{}", verdict);
        }
        None => println!("{}", NO_COORDINATOR),
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

/// The interactive prompt loop. Returns the process exit code: 0 for the
/// `exit` command, 1 when stdin ends.
pub fn run(cluster: &mut Cluster) -> i32 {
    let stdin = io::stdin();
    loop {
        print!("$ ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return 1;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("stdin read failed: {}", err);
                return 1;
            }
        }
        match parse(&line) {
            Parsed::Empty => continue,
            Parsed::Usage(usage) => println!("{}", usage),
            Parsed::Unknown(command) => println!("{}: command not found", command),
            Parsed::Command(command) => {
                if !dispatch(cluster, command) {
                    return 0;
                }
            }
        }
    }
}

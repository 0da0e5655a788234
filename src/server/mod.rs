//! The general: per-node state, RPC handlers, the election tick, and the
//! commander-side order dispatch.

pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::common::constants;
use crate::protocol::{ElectionMessage, FaultState, Opinion, Property, Reply, Request, Role};
use crate::rpc::client;
use crate::rpc::server::{RpcObject, RpcServer};
use crate::rpc::RpcError;

use self::registry::ClusterRegistry;

/// Verdict returned when an order lands on a general that is not the
/// coordinator.
pub const REFUSAL: &str = "Cannot execute order from a secondary general";

/// Mutable per-general fields. All of them share the one lock; handlers must
/// release it before any outbound call.
struct GeneralState {
    role: Role,
    fault: FaultState,
    known_coordinator_port: Option<u16>,
    opinion_buffer: Vec<Opinion>,
    last_majority: Option<Opinion>,
}

impl GeneralState {
    fn new() -> GeneralState {
        GeneralState {
            role: Role::Secondary,
            fault: FaultState::NonFaulty,
            known_coordinator_port: None,
            opinion_buffer: Vec::new(),
            last_majority: None,
        }
    }

    /// Renders the requested properties as the comma-joined listing line.
    fn render(&self, id: u64, properties: &[Property]) -> String {
        properties
            .iter()
            .map(|property| match property {
                Property::Id => format!("G{}", id),
                Property::Role => self.role.to_string(),
                Property::Majority => match self.last_majority {
                    Some(opinion) => format!("majority={}", opinion),
                    None => "majority=undefined".to_string(),
                },
                Property::State => match self.fault {
                    FaultState::Faulty => "state=F".to_string(),
                    FaultState::NonFaulty => "state=NF".to_string(),
                },
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One general: an RPC endpoint plus an election-tick thread, sharing state
/// behind a single mutex.
pub struct General {
    id: u64,
    port: u16,
    registry: Arc<ClusterRegistry>,
    state: Mutex<GeneralState>,
    reports: Condvar,
    running: Arc<AtomicBool>,
    election_period: Duration,
}

impl General {
    /// Boots a general: binds its endpoint, then spawns the serving thread
    /// and the election tick.
    pub fn start(
        id: u64,
        port: u16,
        registry: Arc<ClusterRegistry>,
        election_period: Duration,
    ) -> Result<Arc<General>, RpcError> {
        let running = Arc::new(AtomicBool::new(true));
        let general = Arc::new(General {
            id,
            port,
            registry,
            state: Mutex::new(GeneralState::new()),
            reports: Condvar::new(),
            running: running.clone(),
            election_period,
        });

        let mut server = RpcServer::new(general.clone(), running);
        server.bind((constants::HOST, port))?;
        server.serve()?;

        let ticker = general.clone();
        thread::spawn(move || ticker.election_loop());

        info!("G{} listening on port {}", id, port);
        Ok(general)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn election_loop(self: Arc<Self>) {
        while self.sleep_one_period() {
            self.election_tick();
        }
        debug!("G{} election loop exited", self.id);
    }

    /// Sleeps one election period in short slices so shutdown is prompt.
    /// Returns false once the general has been stopped.
    fn sleep_one_period(&self) -> bool {
        let slice = Duration::from_millis(constants::SHUTDOWN_POLL_MS);
        let mut remaining = self.election_period;
        while remaining > Duration::ZERO {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
        self.running.load(Ordering::SeqCst)
    }

    /// One cadence step: check on the coordinator, and elect if there is
    /// none to check on.
    fn election_tick(&self) {
        let (role, known) = {
            let state = self.state.lock().unwrap();
            (state.role, state.known_coordinator_port)
        };
        if role == Role::Primary {
            return;
        }
        if let Some(coordinator) = known {
            if client::is_alive(coordinator) {
                return;
            }
            info!(
                "G{} lost contact with the coordinator on port {}",
                self.id, coordinator
            );
            self.state.lock().unwrap().known_coordinator_port = None;
        }
        self.run_election();
    }

    /// Bully election, higher id wins. Peers are probed in descending
    /// registry order; the first `Ok` means a higher general is contesting
    /// and this one backs off, a `Coordinator` reply names the sitting
    /// coordinator, and silence is an abstention.
    fn run_election(&self) {
        let snapshot = self.registry.snapshot();
        debug!("G{} starting an election", self.id);
        for &peer in snapshot.iter().rev() {
            if peer == self.port {
                continue;
            }
            match client::send_message(peer, self.port, self.id, ElectionMessage::Election) {
                Some(ElectionMessage::Coordinator) => {
                    info!(
                        "G{} found the sitting coordinator on port {}",
                        self.id, peer
                    );
                    self.state.lock().unwrap().known_coordinator_port = Some(peer);
                    return;
                }
                Some(ElectionMessage::Ok) => {
                    debug!("G{} backed off, port {} outranks it", self.id, peer);
                    return;
                }
                Some(ElectionMessage::Election) | None => continue,
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.role = Role::Primary;
            state.known_coordinator_port = Some(self.port);
        }
        info!("G{} won the election and became primary", self.id);
        for &peer in &snapshot {
            if peer != self.port {
                client::send_message(peer, self.port, self.id, ElectionMessage::Coordinator);
            }
        }
    }

    /// Responder half of the Bully exchange.
    fn on_election_message(
        &self,
        sender_port: u16,
        sender_id: u64,
        message: ElectionMessage,
    ) -> Option<ElectionMessage> {
        match message {
            ElectionMessage::Coordinator => {
                debug!(
                    "G{} acknowledges the coordinator on port {}",
                    self.id, sender_port
                );
                self.state.lock().unwrap().known_coordinator_port = Some(sender_port);
                None
            }
            ElectionMessage::Election => {
                let role = self.state.lock().unwrap().role;
                if role == Role::Primary {
                    Some(ElectionMessage::Coordinator)
                } else if sender_id < self.id {
                    Some(ElectionMessage::Ok)
                } else {
                    None
                }
            }
            ElectionMessage::Ok => None,
        }
    }

    /// Lieutenant half of a round: buffer the opinion, rebroadcast it to the
    /// other lieutenants when it came straight from the coordinator, and
    /// report once the buffer holds one opinion per other general.
    fn on_order(&self, sender_port: u16, opinion: Opinion) {
        let from_coordinator = {
            let mut state = self.state.lock().unwrap();
            state.opinion_buffer.push(opinion);
            state.known_coordinator_port == Some(sender_port)
        };
        if from_coordinator {
            for &peer in &self.registry.snapshot() {
                if peer != self.port && peer != sender_port {
                    client::send_order(peer, self.port, self.mutate(opinion));
                }
            }
        }
        self.report_if_round_complete();
    }

    fn report_if_round_complete(&self) {
        let expected = self.registry.len().saturating_sub(1);
        let report = {
            let mut state = self.state.lock().unwrap();
            if expected == 0 || state.opinion_buffer.len() < expected {
                None
            } else {
                let majority = majority_opinion(&state.opinion_buffer);
                state.last_majority = majority;
                state.opinion_buffer.clear();
                state
                    .known_coordinator_port
                    .map(|coordinator| (coordinator, majority))
            }
        };
        if let Some((coordinator, majority)) = report {
            debug!("G{} reports majority {:?}", self.id, majority);
            client::report_consensus(coordinator, majority);
        }
    }

    /// A majority report from a lieutenant; wakes the dispatching commander.
    fn on_report(&self, majority: Option<Opinion>) {
        let mut state = self.state.lock().unwrap();
        if let Some(opinion) = majority {
            state.opinion_buffer.push(opinion);
        }
        self.reports.notify_all();
    }

    /// Commander half of a round: census the lieutenants, fan the order out,
    /// wait for every report, and compute the verdict.
    fn execute_order(&self, order: Opinion) -> String {
        {
            let state = self.state.lock().unwrap();
            if state.role != Role::Primary {
                return REFUSAL.to_string();
            }
        }

        let snapshot = self.registry.snapshot();
        let n = snapshot.len();
        info!(
            "G{} dispatching order {} to {} lieutenants",
            self.id,
            order,
            n.saturating_sub(1)
        );

        let mut faulty_count = 0;
        for &peer in &snapshot {
            if peer == self.port {
                continue;
            }
            if client::get_state(peer) == Some(FaultState::Faulty) {
                faulty_count += 1;
            }
            client::send_order(peer, self.port, self.mutate(order));
        }

        let majority = self.await_reports(n, order);
        let verdict = verdict(n, faulty_count, majority);
        info!("G{}: {}", self.id, verdict);
        verdict
    }

    /// Blocks until every lieutenant from the dispatch snapshot has
    /// reported. A lieutenant that dies mid-round never reports, so this
    /// wait can block forever.
    fn await_reports(&self, n: usize, order: Opinion) -> Option<Opinion> {
        let mut state = self.state.lock().unwrap();
        while state.opinion_buffer.len() + 1 < n {
            state = self.reports.wait(state).unwrap();
        }
        let majority = if n == 1 {
            // No lieutenants to consult; the commander's own order stands.
            Some(order)
        } else {
            majority_opinion(&state.opinion_buffer)
        };
        state.last_majority = majority;
        state.opinion_buffer.clear();
        majority
    }

    /// A faulty general forwards a lie about half the time, independently
    /// per message.
    fn mutate(&self, opinion: Opinion) -> Opinion {
        let faulty = self.state.lock().unwrap().fault == FaultState::Faulty;
        mutate_opinion(faulty, opinion)
    }

    /// Stops serving. The accept loop is woken so it notices the cleared
    /// flag; the reply to the in-flight `stop` call drains on its own
    /// connection.
    fn on_stop(&self) {
        info!("G{} shutting down", self.id);
        self.running.store(false, Ordering::SeqCst);
        let _ = std::net::TcpStream::connect((constants::HOST, self.port));
    }
}

impl RpcObject for General {
    fn handle_rpc(&self, request: Request) -> Result<Reply, RpcError> {
        let reply = match request {
            Request::List { properties } => {
                Reply::Listing(self.state.lock().unwrap().render(self.id, &properties))
            }
            Request::GetId => Reply::Id(self.id),
            Request::GetState => Reply::State(self.state.lock().unwrap().fault),
            Request::SetState { state } => {
                self.state.lock().unwrap().fault = state;
                Reply::Done
            }
            Request::IsAlive => Reply::Alive(true),
            Request::GetKnownCoordinatorPort => {
                Reply::KnownCoordinatorPort(self.state.lock().unwrap().known_coordinator_port)
            }
            Request::SendMessage {
                sender_port,
                sender_id,
                message,
            } => Reply::Election(self.on_election_message(sender_port, sender_id, message)),
            Request::SendOrder {
                sender_port,
                opinion,
            } => {
                self.on_order(sender_port, opinion);
                Reply::Done
            }
            Request::ExecuteOrder { opinion } => Reply::Verdict(self.execute_order(opinion)),
            Request::ReportConsensus { majority } => {
                self.on_report(majority);
                Reply::Done
            }
            Request::Stop => {
                self.on_stop();
                Reply::Done
            }
        };
        Ok(reply)
    }
}

fn mutate_opinion(faulty: bool, opinion: Opinion) -> Opinion {
    if faulty && rand::thread_rng().gen_bool(0.5) {
        opinion.flipped()
    } else {
        opinion
    }
}

/// The most common opinion in `opinions`. Ties go to the value that appeared
/// first, matching a counting multiset with a stable tiebreak.
pub fn majority_opinion(opinions: &[Opinion]) -> Option<Opinion> {
    let mut counts: Vec<(Opinion, usize)> = Vec::new();
    for &opinion in opinions {
        match counts.iter_mut().find(|(seen, _)| *seen == opinion) {
            Some((_, count)) => *count += 1,
            None => counts.push((opinion, 1)),
        }
    }
    let mut best: Option<(Opinion, usize)> = None;
    for (opinion, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((opinion, count));
        }
    }
    best.map(|(opinion, _)| opinion)
}

/// Formats the commander's verdict line for a round over `n` generals of
/// which `faulty_count` lieutenants were flagged faulty at dispatch.
pub fn verdict(n: usize, faulty_count: usize, majority: Option<Opinion>) -> String {
    let quorum = n / 2 + 1;
    let required = 3 * faulty_count + 1;
    match majority {
        Some(opinion) if required <= n => {
            if faulty_count == 0 {
                format!(
                    "Execute order: {}! Non-faulty nodes in the system - {} out of {} quorum suggest attack",
                    opinion, quorum, n
                )
            } else {
                format!(
                    "Execute order: {}! {} faulty node(s) in the system - {} out of {} quorum suggest retreat",
                    opinion, faulty_count, quorum, n
                )
            }
        }
        _ => format!(
            "Execute order: cannot be determined - not enough generals in the system! {} faulty node(s) in the system - {} out of {} quorum not consistent",
            faulty_count, quorum, n
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Opinion::{Attack, Retreat};

    #[test]
    fn majority_of_empty_buffer_is_undefined() {
        assert_eq!(majority_opinion(&[]), None);
    }

    #[test]
    fn majority_picks_the_most_common_opinion() {
        assert_eq!(majority_opinion(&[Attack]), Some(Attack));
        assert_eq!(
            majority_opinion(&[Retreat, Attack, Retreat]),
            Some(Retreat)
        );
        assert_eq!(
            majority_opinion(&[Attack, Retreat, Retreat, Retreat]),
            Some(Retreat)
        );
    }

    #[test]
    fn majority_ties_break_by_first_appearance() {
        assert_eq!(majority_opinion(&[Attack, Retreat]), Some(Attack));
        assert_eq!(majority_opinion(&[Retreat, Attack]), Some(Retreat));
        assert_eq!(
            majority_opinion(&[Retreat, Attack, Attack, Retreat]),
            Some(Retreat)
        );
    }

    #[test]
    fn verdict_with_no_faults_uses_the_clean_template() {
        assert_eq!(
            verdict(3, 0, Some(Attack)),
            "Execute order: attack! Non-faulty nodes in the system - 2 out of 3 quorum suggest attack"
        );
        assert_eq!(
            verdict(1, 0, Some(Attack)),
            "Execute order: attack! Non-faulty nodes in the system - 1 out of 1 quorum suggest attack"
        );
        // The "suggest attack" tail is fixed; it does not follow the majority.
        assert_eq!(
            verdict(3, 0, Some(Retreat)),
            "Execute order: retreat! Non-faulty nodes in the system - 2 out of 3 quorum suggest attack"
        );
    }

    #[test]
    fn verdict_with_tolerable_faults_keeps_the_fixed_retreat_tail() {
        assert_eq!(
            verdict(4, 1, Some(Attack)),
            "Execute order: attack! 1 faulty node(s) in the system - 3 out of 4 quorum suggest retreat"
        );
        assert_eq!(
            verdict(7, 2, Some(Retreat)),
            "Execute order: retreat! 2 faulty node(s) in the system - 4 out of 7 quorum suggest retreat"
        );
    }

    #[test]
    fn verdict_with_too_many_faults_cannot_be_determined() {
        assert_eq!(
            verdict(3, 1, Some(Retreat)),
            "Execute order: cannot be determined - not enough generals in the system! 1 faulty node(s) in the system - 2 out of 3 quorum not consistent"
        );
    }

    #[test]
    fn verdict_without_a_majority_cannot_be_determined() {
        assert_eq!(
            verdict(5, 0, None),
            "Execute order: cannot be determined - not enough generals in the system! 0 faulty node(s) in the system - 3 out of 5 quorum not consistent"
        );
    }

    #[test]
    fn honest_generals_never_mutate() {
        for _ in 0..100 {
            assert_eq!(mutate_opinion(false, Attack), Attack);
            assert_eq!(mutate_opinion(false, Retreat), Retreat);
        }
    }

    #[test]
    fn faulty_generals_lie_about_half_the_time() {
        const DRAWS: usize = 500;
        let flips = (0..DRAWS)
            .filter(|_| mutate_opinion(true, Attack) == Retreat)
            .count();
        // With p = 1/2 per draw, all-or-nothing outcomes are astronomically
        // unlikely.
        assert!(flips > 0 && flips < DRAWS, "flips = {}", flips);
    }

    #[test]
    fn render_joins_the_requested_properties() {
        let mut state = GeneralState::new();
        assert_eq!(
            state.render(
                3,
                &[Property::Id, Property::Role, Property::Majority, Property::State]
            ),
            "G3, secondary, majority=undefined, state=NF"
        );

        state.role = Role::Primary;
        state.fault = FaultState::Faulty;
        state.last_majority = Some(Attack);
        assert_eq!(
            state.render(
                1,
                &[Property::Id, Property::Role, Property::Majority, Property::State]
            ),
            "G1, primary, majority=attack, state=F"
        );
        assert_eq!(state.render(1, &[Property::Id, Property::State]), "G1, state=F");
    }
}

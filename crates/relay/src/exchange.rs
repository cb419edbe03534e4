use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Trade,
    Battle,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Trade => f.write_str("trade"),
            ExchangeKind::Battle => f.write_str("battle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Offered,
    Started,
    Completed,
    Refused,
    Cancelled,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::Completed | ExchangeState::Refused | ExchangeState::Cancelled
        )
    }
}

/// An inbound packet reinterpreted as a step of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    Accept,
    Refuse,
    Cancel,
    /// Protocol-defined payload relayed to the other party. `action` lets the
    /// protocol rebuild the right packet on the other side.
    Update { action: i32, payload: String },
    Confirm,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Offered { payload: String },
    Started,
    Updated { action: i32, payload: String },
    Confirmed,
    Completed,
    Refused,
    Cancelled,
    Failed { reason: String },
}

/// Something the coordinator wants a participant to be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub to: i32,
    /// The other participant, or the recipient itself for failures.
    pub from: i32,
    pub kind: ExchangeKind,
    pub notice: NoticeKind,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    pub kind: ExchangeKind,
    pub initiator: i32,
    pub counterpart: i32,
    pub state: ExchangeState,
    pub payload: String,
    confirmed: [bool; 2],
}

impl Exchange {
    pub fn new(kind: ExchangeKind, initiator: i32, counterpart: i32, payload: String) -> Self {
        Self {
            kind,
            initiator,
            counterpart,
            state: ExchangeState::Offered,
            payload,
            confirmed: [false; 2],
        }
    }

    pub fn involves(&self, id: i32) -> bool {
        self.initiator == id || self.counterpart == id
    }

    pub fn other(&self, id: i32) -> i32 {
        if id == self.initiator {
            self.counterpart
        } else {
            self.initiator
        }
    }

    /// Applies `event` sent by participant `from`. Events that are not legal
    /// in the current state leave the exchange unchanged and produce nothing.
    pub fn apply(&mut self, from: i32, event: ExchangeEvent) -> Vec<Notice> {
        if self.state.is_terminal() || !self.involves(from) {
            return Vec::new();
        }
        let other = self.other(from);
        match (self.state, event) {
            (ExchangeState::Offered, ExchangeEvent::Accept) if from == self.counterpart => {
                self.state = ExchangeState::Started;
                self.both(from, NoticeKind::Started)
            }
            (ExchangeState::Offered, ExchangeEvent::Refuse) if from == self.counterpart => {
                self.state = ExchangeState::Refused;
                self.both(from, NoticeKind::Refused)
            }
            (ExchangeState::Started, ExchangeEvent::Update { action, payload }) => {
                self.payload.clone_from(&payload);
                self.confirmed = [false; 2];
                vec![self.notice(other, from, NoticeKind::Updated { action, payload })]
            }
            (ExchangeState::Started, ExchangeEvent::Confirm) => {
                let slot = usize::from(from == self.counterpart);
                self.confirmed[slot] = true;
                let done = match self.kind {
                    ExchangeKind::Trade => self.confirmed.iter().all(|c| *c),
                    ExchangeKind::Battle => true,
                };
                if done {
                    self.state = ExchangeState::Completed;
                    self.both(from, NoticeKind::Completed)
                } else {
                    vec![self.notice(other, from, NoticeKind::Confirmed)]
                }
            }
            (_, ExchangeEvent::Cancel) => {
                self.state = ExchangeState::Cancelled;
                self.both(from, NoticeKind::Cancelled)
            }
            (_, ExchangeEvent::Disconnect) => {
                self.state = ExchangeState::Cancelled;
                vec![self.notice(other, from, NoticeKind::Cancelled)]
            }
            (state, event) => {
                log::debug!(
                    "{} {}<->{} ignored {:?} from {} while {:?}",
                    self.kind,
                    self.initiator,
                    self.counterpart,
                    event,
                    from,
                    state
                );
                Vec::new()
            }
        }
    }

    fn notice(&self, to: i32, from: i32, notice: NoticeKind) -> Notice {
        Notice {
            to,
            from,
            kind: self.kind,
            notice,
        }
    }

    fn both(&self, actor: i32, notice: NoticeKind) -> Vec<Notice> {
        let other = self.other(actor);
        vec![
            self.notice(other, actor, notice.clone()),
            self.notice(actor, other, notice),
        ]
    }
}

#[derive(Debug, Default)]
struct Book {
    exchanges: HashMap<u64, Exchange>,
    by_participant: HashMap<(i32, ExchangeKind), u64>,
    next_id: u64,
}

/// Server-side mediator for two-party trades and battles. A session takes
/// part in at most one exchange of each kind.
#[derive(Debug, Default)]
pub struct Coordinator {
    book: Mutex<Book>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an exchange from `from` to `to`. `available` says whether the
    /// counterpart is currently joined.
    pub fn offer(
        &self,
        kind: ExchangeKind,
        from: i32,
        to: i32,
        payload: String,
        available: bool,
    ) -> Vec<Notice> {
        let fail = |reason: String| {
            vec![Notice {
                to: from,
                from,
                kind,
                notice: NoticeKind::Failed { reason },
            }]
        };
        if from == to {
            return fail(format!("You can't {kind} with yourself!"));
        }
        if !available {
            return fail("The player is not on the server.".to_string());
        }

        let mut book = self.lock();
        if book.by_participant.contains_key(&(from, kind)) {
            return fail(format!("You are already in a {kind}!"));
        }
        if book.by_participant.contains_key(&(to, kind)) {
            return fail(format!("The player is already in a {kind}."));
        }

        book.next_id += 1;
        let id = book.next_id;
        let exchange = Exchange::new(kind, from, to, payload.clone());
        book.by_participant.insert((from, kind), id);
        book.by_participant.insert((to, kind), id);
        book.exchanges.insert(id, exchange);
        log::debug!("{kind} offered by {from} to {to}");

        vec![Notice {
            to,
            from,
            kind,
            notice: NoticeKind::Offered { payload },
        }]
    }

    /// Routes an event from `from` to the exchange of `kind` it takes part in.
    pub fn handle(&self, kind: ExchangeKind, from: i32, event: ExchangeEvent) -> Vec<Notice> {
        let mut book = self.lock();
        let Some(&id) = book.by_participant.get(&(from, kind)) else {
            return Vec::new();
        };
        let Some(exchange) = book.exchanges.get_mut(&id) else {
            return Vec::new();
        };
        let notices = exchange.apply(from, event);
        if exchange.state.is_terminal() {
            let (initiator, counterpart) = (exchange.initiator, exchange.counterpart);
            log::debug!("{kind} {initiator}<->{counterpart} ended {:?}", exchange.state);
            book.exchanges.remove(&id);
            book.by_participant.remove(&(initiator, kind));
            book.by_participant.remove(&(counterpart, kind));
        }
        notices
    }

    /// Force-cancels everything `id` takes part in. Only the remaining
    /// participants are notified.
    pub fn disconnect(&self, id: i32) -> Vec<Notice> {
        [ExchangeKind::Trade, ExchangeKind::Battle]
            .into_iter()
            .flat_map(|kind| self.handle(kind, id, ExchangeEvent::Disconnect))
            .collect()
    }

    pub fn state_of(&self, id: i32, kind: ExchangeKind) -> Option<ExchangeState> {
        let book = self.lock();
        let exchange_id = book.by_participant.get(&(id, kind))?;
        book.exchanges.get(exchange_id).map(|e| e.state)
    }

    pub fn active(&self) -> usize {
        self.lock().exchanges.len()
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASH: i32 = 1;
    const MISTY: i32 = 2;
    const BROCK: i32 = 3;

    fn offered(coordinator: &Coordinator, kind: ExchangeKind) {
        let notices = coordinator.offer(kind, ASH, MISTY, "pikachu".into(), true);
        assert_eq!(
            notices,
            vec![Notice {
                to: MISTY,
                from: ASH,
                kind,
                notice: NoticeKind::Offered {
                    payload: "pikachu".into()
                },
            }]
        );
    }

    #[test]
    fn test_offered_ignores_other_events() {
        let mut exchange = Exchange::new(ExchangeKind::Trade, ASH, MISTY, String::new());
        assert!(exchange.apply(MISTY, ExchangeEvent::Confirm).is_empty());
        assert!(
            exchange
                .apply(
                    MISTY,
                    ExchangeEvent::Update {
                        action: 0,
                        payload: "x".into()
                    }
                )
                .is_empty()
        );
        // The initiator cannot accept its own offer.
        assert!(exchange.apply(ASH, ExchangeEvent::Accept).is_empty());
        assert!(exchange.apply(BROCK, ExchangeEvent::Cancel).is_empty());
        assert_eq!(exchange.state, ExchangeState::Offered);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for event in [
            ExchangeEvent::Refuse,
            ExchangeEvent::Cancel,
            ExchangeEvent::Disconnect,
        ] {
            let mut exchange = Exchange::new(ExchangeKind::Trade, ASH, MISTY, String::new());
            let actor = if event == ExchangeEvent::Refuse { MISTY } else { ASH };
            exchange.apply(actor, event);
            let state = exchange.state;
            assert!(state.is_terminal());
            for late in [
                ExchangeEvent::Accept,
                ExchangeEvent::Cancel,
                ExchangeEvent::Confirm,
            ] {
                assert!(exchange.apply(MISTY, late).is_empty());
                assert_eq!(exchange.state, state);
            }
        }
    }

    #[test]
    fn test_trade_runs_to_completion() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Trade);

        let started = coordinator.handle(ExchangeKind::Trade, MISTY, ExchangeEvent::Accept);
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|n| n.notice == NoticeKind::Started));
        assert_eq!(
            coordinator.state_of(ASH, ExchangeKind::Trade),
            Some(ExchangeState::Started)
        );

        let update = coordinator.handle(
            ExchangeKind::Trade,
            ASH,
            ExchangeEvent::Update {
                action: 7,
                payload: "bulbasaur".into(),
            },
        );
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].to, MISTY);

        let first = coordinator.handle(ExchangeKind::Trade, ASH, ExchangeEvent::Confirm);
        assert_eq!(first[0].notice, NoticeKind::Confirmed);
        let done = coordinator.handle(ExchangeKind::Trade, MISTY, ExchangeEvent::Confirm);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|n| n.notice == NoticeKind::Completed));
        assert_eq!(coordinator.active(), 0);
        assert!(coordinator.state_of(ASH, ExchangeKind::Trade).is_none());
    }

    #[test]
    fn test_update_resets_confirmations() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Trade);
        coordinator.handle(ExchangeKind::Trade, MISTY, ExchangeEvent::Accept);
        coordinator.handle(ExchangeKind::Trade, ASH, ExchangeEvent::Confirm);
        coordinator.handle(
            ExchangeKind::Trade,
            MISTY,
            ExchangeEvent::Update {
                action: 0,
                payload: "staryu".into(),
            },
        );
        let notices = coordinator.handle(ExchangeKind::Trade, MISTY, ExchangeEvent::Confirm);
        assert_eq!(notices[0].notice, NoticeKind::Confirmed);
        assert_eq!(
            coordinator.state_of(MISTY, ExchangeKind::Trade),
            Some(ExchangeState::Started)
        );
    }

    #[test]
    fn test_refuse_notifies_both_and_discards() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Battle);
        let notices = coordinator.handle(ExchangeKind::Battle, MISTY, ExchangeEvent::Refuse);
        let mut recipients: Vec<i32> = notices.iter().map(|n| n.to).collect();
        recipients.sort();
        assert_eq!(recipients, vec![ASH, MISTY]);
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn test_disconnect_notifies_only_remaining_party() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Trade);
        offered(&coordinator, ExchangeKind::Battle);
        coordinator.handle(ExchangeKind::Battle, MISTY, ExchangeEvent::Accept);

        let notices = coordinator.disconnect(ASH);
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.to == MISTY && n.from == ASH));
        assert!(notices.iter().all(|n| n.notice == NoticeKind::Cancelled));
        assert_eq!(coordinator.active(), 0);
        assert!(coordinator.disconnect(ASH).is_empty());
    }

    #[test]
    fn test_one_exchange_per_kind() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Trade);

        let busy = coordinator.offer(ExchangeKind::Trade, BROCK, MISTY, String::new(), true);
        assert!(matches!(busy[0].notice, NoticeKind::Failed { .. }));
        assert_eq!(busy[0].to, BROCK);

        let again = coordinator.offer(ExchangeKind::Trade, ASH, BROCK, String::new(), true);
        assert!(matches!(again[0].notice, NoticeKind::Failed { .. }));

        // A battle alongside the trade is fine.
        let battle = coordinator.offer(ExchangeKind::Battle, BROCK, MISTY, String::new(), true);
        assert!(matches!(battle[0].notice, NoticeKind::Offered { .. }));
    }

    #[test]
    fn test_absent_counterpart_fails_locally() {
        let coordinator = Coordinator::new();
        let notices = coordinator.offer(ExchangeKind::Trade, ASH, 99, String::new(), false);
        assert_eq!(
            notices,
            vec![Notice {
                to: ASH,
                from: ASH,
                kind: ExchangeKind::Trade,
                notice: NoticeKind::Failed {
                    reason: "The player is not on the server.".into()
                },
            }]
        );
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn test_battle_completes_on_single_confirm() {
        let coordinator = Coordinator::new();
        offered(&coordinator, ExchangeKind::Battle);
        coordinator.handle(ExchangeKind::Battle, MISTY, ExchangeEvent::Accept);
        let notices = coordinator.handle(ExchangeKind::Battle, ASH, ExchangeEvent::Confirm);
        assert!(notices.iter().all(|n| n.notice == NoticeKind::Completed));
        assert_eq!(coordinator.state_of(MISTY, ExchangeKind::Battle), None);
    }
}

use std::{
    collections::{BTreeSet, HashMap},
    sync::{atomic::Ordering, Arc},
    thread,
    time::Duration,
};

use rand::Rng;
use tracing::{debug, info, trace};

use crate::chopstick::Transfer;
use crate::config::DinnerConfig;
use crate::error::{DinnerError, ProtocolViolation};
use crate::mailbox::TrySendError;
use crate::message::Message;
use crate::table::{Shared, Table};
use crate::{ChopstickId, PhilosopherId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Hungry, // 足りない箸がある
    Eating, // 必要な箸をすべて持っている
    Done,   // 食べ終わって席を立った
}

// 1 人分の実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub philosopher: PhilosopherId,
    pub name: String,
    pub meals: usize,
    pub requests_sent: usize,
    pub requests_dropped: usize,
    pub requests_deferred: usize,
    pub responses_received: usize,
    pub surrendered: usize,
    pub iterations: usize,
    pub state: State,
    pub still_held: Vec<ChopstickId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Leave,
}

// 箸の並び順での呼び名。0 番目が左、1 番目が右
pub fn side_label(position: usize) -> String {
    match position {
        0 => "left".to_string(),
        1 => "right".to_string(),
        n => format!("#{n}"),
    }
}

/// One participant of the dinner.
///
/// Runs its own event loop on its own thread. Everything here except the
/// chopsticks, the mailboxes and the presence flags in [`Shared`] is private
/// to this philosopher and never touched by another thread.
pub struct Philosopher {
    id: PhilosopherId,
    name: String,
    needs: Vec<ChopstickId>,
    neighbors: Vec<PhilosopherId>,
    // 箸ごとの、自分以外にそれを必要とする哲学者
    contenders: HashMap<ChopstickId, Vec<PhilosopherId>>,
    held: BTreeSet<ChopstickId>,
    // 綺麗な箸への要求を保留したもの (要求者, 箸)
    pending: Vec<(PhilosopherId, ChopstickId)>,
    portions: usize,
    eaten: usize,
    think_jitter_us: u64,
    done: bool,
    shared: Arc<Shared>,
    report: Report,
}

impl Philosopher {
    pub(crate) fn new(
        table: &Table,
        id: PhilosopherId,
        config: &DinnerConfig,
        shared: Arc<Shared>,
    ) -> Self {
        let seat = &table.seats()[id];
        let contenders = seat
            .needs
            .iter()
            .map(|&c| {
                let others = table
                    .contenders(c)
                    .into_iter()
                    .filter(|&p| p != id)
                    .collect();
                (c, others)
            })
            .collect();

        Philosopher {
            id,
            name: seat.name.clone(),
            needs: seat.needs.clone(),
            neighbors: table.neighbors(id),
            contenders,
            held: table.initial_holdings(id).into_iter().collect(),
            pending: Vec::new(),
            portions: config.portions,
            eaten: 0,
            think_jitter_us: config.think_jitter_us,
            done: false,
            shared,
            report: Report {
                philosopher: id,
                name: seat.name.clone(),
                meals: 0,
                requests_sent: 0,
                requests_dropped: 0,
                requests_deferred: 0,
                responses_received: 0,
                surrendered: 0,
                iterations: 0,
                state: State::Hungry,
                still_held: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> PhilosopherId {
        self.id
    }

    pub fn state(&self) -> State {
        if self.done {
            State::Done
        } else if self.holds_all() {
            State::Eating
        } else {
            State::Hungry
        }
    }

    pub fn run(mut self) -> Result<Report, DinnerError> {
        if self.eaten >= self.portions {
            self.shared.set_sated(self.id);
        }
        info!(
            philosopher = self.id,
            needs = ?self.needs,
            held = ?self.held,
            state = ?self.state(),
            "philosopher seated"
        );

        loop {
            if self.shared.abort.load(Ordering::Acquire) {
                self.shared.set_gone(self.id);
                return Err(DinnerError::Aborted(self.id));
            }

            match self.step() {
                Ok(Flow::Continue) => thread::yield_now(),
                Ok(Flow::Leave) => break,
                Err(e) => {
                    // 他の哲学者も止める
                    self.shared.abort.store(true, Ordering::Release);
                    self.shared.set_gone(self.id);
                    return Err(e);
                }
            }
        }

        Ok(self.into_report())
    }

    // イベントループの 1 周
    pub(crate) fn step(&mut self) -> Result<Flow, DinnerError> {
        self.report.iterations += 1;

        if self.can_leave() {
            self.done = true;
            self.shared.set_gone(self.id);
            info!(
                philosopher = self.id,
                meals = self.eaten,
                left_holding = ?self.held,
                "philosopher leaves the table"
            );
            return Ok(Flow::Leave);
        }

        if !self.is_sated() {
            self.request_missing()?;
        }

        if let Some(msg) = self.shared.mailboxes[self.id].try_recv() {
            self.handle(msg)?;
        }

        self.try_eat()?;
        Ok(Flow::Continue)
    }

    fn request_missing(&mut self) -> Result<(), DinnerError> {
        for &c in &self.needs {
            if self.held.contains(&c) {
                continue;
            }

            let holder = match self.shared.chopsticks[c].holder() {
                // 受け渡し中
                None => continue,
                Some(h) if h == self.id => {
                    return Err(ProtocolViolation::HeldOutOfSync {
                        philosopher: self.id,
                        chopstick: c,
                    }
                    .into())
                }
                Some(h) => h,
            };

            if !self.neighbors.contains(&holder) || !self.shared.is_alive(holder) {
                continue;
            }

            let msg = Message::Request {
                from: self.id,
                chopstick: c,
            };
            match self.shared.mailboxes[holder].try_send(msg) {
                Ok(()) => {
                    self.report.requests_sent += 1;
                    trace!(philosopher = self.id, chopstick = c, holder, "request sent");
                }
                Err(TrySendError::Full(_)) => {
                    // 次の周回で再送される
                    self.report.requests_dropped += 1;
                    trace!(philosopher = self.id, chopstick = c, holder, "request dropped");
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, msg: Message) -> Result<(), DinnerError> {
        trace!(philosopher = self.id, ?msg, "message received");
        match msg {
            Message::Request { from, chopstick } => self.handle_request(from, chopstick),
            Message::Response { from, chopstick } => self.handle_response(from, chopstick),
        }
    }

    fn handle_request(
        &mut self,
        from: PhilosopherId,
        chopstick: ChopstickId,
    ) -> Result<(), DinnerError> {
        if from == self.id {
            debug!(philosopher = self.id, chopstick, "ignoring request from self");
            return Ok(());
        }
        if !self.needs.contains(&chopstick) {
            return Err(ProtocolViolation::NotNeeded {
                philosopher: self.id,
                chopstick,
            }
            .into());
        }
        // もう手放している
        if !self.held.contains(&chopstick) {
            return Ok(());
        }
        // 要求者はもう食べ終わっているので渡しても使われない
        if self.shared.is_sated(from) {
            return Ok(());
        }

        // 綺麗な箸は一度使うまで渡さない。食べ終わった後なら使う予定がないので渡す
        if !self.shared.chopsticks[chopstick].is_dirty() && !self.is_sated() {
            if !self.pending.contains(&(from, chopstick)) {
                self.pending.push((from, chopstick));
                self.report.requests_deferred += 1;
                debug!(philosopher = self.id, chopstick, from, "request deferred, chopstick is clean");
            }
            return Ok(());
        }

        self.surrender(from, chopstick)
    }

    // 箸を綺麗にして置き、要求者へ送る
    fn surrender(&mut self, to: PhilosopherId, chopstick: ChopstickId) -> Result<(), DinnerError> {
        let side = self.side(chopstick);
        let stick = &self.shared.chopsticks[chopstick];

        self.held.remove(&chopstick);
        stick.mark_clean(self.id)?;
        stick.release(self.id)?;
        self.shared
            .sink
            .puts_down(self.id, &self.name, chopstick, &side)?;

        // 返答は捨てられない。予約枠があるので実際には待たない
        self.shared.mailboxes[to].send(Message::Response {
            from: self.id,
            chopstick,
        });
        self.report.surrendered += 1;
        debug!(philosopher = self.id, chopstick, to, "chopstick handed over");
        Ok(())
    }

    fn handle_response(
        &mut self,
        from: PhilosopherId,
        chopstick: ChopstickId,
    ) -> Result<(), DinnerError> {
        if !self.needs.contains(&chopstick) {
            return Err(ProtocolViolation::NotNeeded {
                philosopher: self.id,
                chopstick,
            }
            .into());
        }

        let stick = &self.shared.chopsticks[chopstick];
        if stick.is_dirty() {
            return Err(ProtocolViolation::DirtyHandOff {
                philosopher: self.id,
                chopstick,
            }
            .into());
        }
        if stick.transfer_to(self.id)? == Transfer::AlreadyHeld {
            debug!(philosopher = self.id, chopstick, from, "already holding chopstick");
            return Ok(());
        }

        self.held.insert(chopstick);
        self.report.responses_received += 1;
        let side = self.side(chopstick);
        self.shared
            .sink
            .picks_up(self.id, &self.name, chopstick, &side)?;
        debug!(philosopher = self.id, chopstick, from, "chopstick received");
        Ok(())
    }

    fn try_eat(&mut self) -> Result<(), DinnerError> {
        if self.eaten >= self.portions || !self.holds_all() {
            return Ok(());
        }

        self.shared.sink.eats(self.id, &self.name)?;
        self.eaten += 1;
        self.report.meals = self.eaten;
        for &c in &self.needs {
            self.shared.chopsticks[c].mark_dirty(self.id)?;
        }

        if self.eaten == self.portions {
            self.shared.set_sated(self.id);
            info!(philosopher = self.id, meals = self.eaten, "philosopher is sated");
        }

        // 保留していた要求に応える。箸はすべて汚れたので渡すことになる
        let pending = std::mem::take(&mut self.pending);
        for (from, chopstick) in pending {
            self.handle_request(from, chopstick)?;
        }

        self.think();
        Ok(())
    }

    fn think(&self) {
        if self.think_jitter_us == 0 {
            return;
        }
        let us = rand::thread_rng().gen_range(0..=self.think_jitter_us);
        thread::sleep(Duration::from_micros(us));
    }

    // 食べ終わっていて、持っている箸を今後欲しがる人がいなければ席を立てる
    fn can_leave(&self) -> bool {
        self.is_sated()
            && self.held.iter().all(|c| {
                self.contenders
                    .get(c)
                    .map_or(true, |others| others.iter().all(|&p| self.shared.is_sated(p)))
            })
    }

    fn is_sated(&self) -> bool {
        self.eaten >= self.portions
    }

    fn holds_all(&self) -> bool {
        self.needs.iter().all(|c| self.held.contains(c))
    }

    fn side(&self, chopstick: ChopstickId) -> String {
        let position = self
            .needs
            .iter()
            .position(|&c| c == chopstick)
            .unwrap_or(usize::MAX);
        side_label(position)
    }

    fn into_report(mut self) -> Report {
        self.report.meals = self.eaten;
        self.report.state = self.state();
        self.report.still_held = self.held.iter().copied().collect();
        self.report
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::{Action, Sink};
    use crate::table::Seat;

    // 1 本の箸 0 を 2 人で共有し、哲学者 0 が最初に持つ
    fn pair(portions: usize) -> (Table, Arc<Shared>, Philosopher, Philosopher) {
        let table = Table::new(
            1,
            vec![Seat::new("Hume", vec![0]), Seat::new("Kant", vec![0])],
            vec![0],
        )
        .unwrap();
        let config = DinnerConfig {
            portions,
            ..Default::default()
        };
        let shared = Arc::new(Shared::new(&table, &config, Arc::new(Sink::capture())));
        let p0 = Philosopher::new(&table, 0, &config, shared.clone());
        let p1 = Philosopher::new(&table, 1, &config, shared.clone());
        (table, shared, p0, p1)
    }

    #[test]
    fn test_initial_state() {
        let (_, shared, p0, p1) = pair(1);
        assert_eq!(p0.state(), State::Eating);
        assert_eq!(p1.state(), State::Hungry);
        assert_eq!(shared.chopsticks[0].holder(), Some(0));
        assert!(shared.chopsticks[0].is_dirty());
    }

    #[test]
    fn test_dirty_chopstick_is_surrendered() {
        let (_, shared, mut p0, mut p1) = pair(1);

        // p0 が食べる前に要求が届けば、汚れているので渡す
        shared.mailboxes[0]
            .try_send(Message::Request {
                from: 1,
                chopstick: 0,
            })
            .unwrap();
        let msg = shared.mailboxes[0].try_recv().unwrap();
        p0.handle(msg).unwrap();

        assert!(p0.held.is_empty());
        assert_eq!(shared.chopsticks[0].holder(), None);
        assert!(!shared.chopsticks[0].is_dirty());

        // p1 は返答を受け取って食べる
        assert_eq!(p1.step().unwrap(), Flow::Continue);
        assert_eq!(p1.eaten, 1);
        assert_eq!(shared.chopsticks[0].holder(), Some(1));
        assert!(shared.chopsticks[0].is_dirty());

        let actions: Vec<_> = shared.sink.entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![Action::PutsDown, Action::PicksUp, Action::Eats]);
    }

    #[test]
    fn test_clean_chopstick_is_deferred() {
        let (_, shared, mut p0, mut p1) = pair(2);
        p0.surrender(1, 0).unwrap();
        // p1 は受け取った直後なので綺麗な箸を持っている
        let msg = shared.mailboxes[1].try_recv().unwrap();
        p1.handle(msg).unwrap();
        assert!(!shared.chopsticks[0].is_dirty());

        // 同じ要求は一度だけ保留される
        p1.handle_request(0, 0).unwrap();
        p1.handle_request(0, 0).unwrap();
        assert_eq!(p1.pending, vec![(0, 0)]);
        assert_eq!(p1.held.len(), 1);

        // 食べた直後に保留分を渡す
        p1.try_eat().unwrap();
        assert_eq!(p1.eaten, 1);
        assert!(p1.pending.is_empty());
        assert!(p1.held.is_empty());
        assert_eq!(
            shared.mailboxes[0].try_recv(),
            Some(Message::Response {
                from: 1,
                chopstick: 0
            })
        );
    }

    #[test]
    fn test_stale_and_self_requests_are_ignored() {
        let (_, shared, mut p0, mut p1) = pair(1);

        // 持っていない箸への要求は捨てる
        p1.handle_request(0, 0).unwrap();
        assert!(shared.mailboxes[0].is_empty());

        // 自分からの要求は何もしない
        p0.handle_request(0, 0).unwrap();
        assert_eq!(p0.held.len(), 1);
        assert!(p0.pending.is_empty());
    }

    #[test]
    fn test_request_from_sated_philosopher_is_dropped() {
        let (_, shared, mut p0, _) = pair(1);
        shared.set_sated(1);
        p0.handle_request(1, 0).unwrap();
        assert_eq!(p0.held.len(), 1);
        assert!(shared.mailboxes[1].is_empty());
    }

    #[test]
    fn test_sated_philosopher_gives_up_clean_chopstick() {
        let (_, shared, mut p0, mut p1) = pair(0);
        p0.surrender(1, 0).unwrap();
        let msg = shared.mailboxes[1].try_recv().unwrap();
        p1.handle(msg).unwrap();
        assert!(!shared.chopsticks[0].is_dirty());

        // 食べる予定がないので綺麗でも渡す
        p1.handle_request(0, 0).unwrap();
        assert!(p1.held.is_empty());
        assert!(p1.pending.is_empty());
    }

    #[test]
    fn test_dirty_response_is_fatal() {
        let (_, _, _, mut p1) = pair(1);
        let err = p1
            .handle(Message::Response {
                from: 0,
                chopstick: 0,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DinnerError::Protocol(ProtocolViolation::DirtyHandOff {
                philosopher: 1,
                chopstick: 0
            })
        ));
    }

    #[test]
    fn test_violation_aborts_everyone() {
        let (_, shared, p0, p1) = pair(1);
        shared.mailboxes[1].send(Message::Response {
            from: 0,
            chopstick: 0,
        });

        let err = p1.run().unwrap_err();
        assert!(matches!(
            err,
            DinnerError::Protocol(ProtocolViolation::DirtyHandOff { .. })
        ));
        assert!(shared.abort.load(Ordering::Acquire));
        assert!(!shared.is_alive(1));

        let err = p0.run().unwrap_err();
        assert!(matches!(err, DinnerError::Aborted(0)));
        assert!(err.is_secondary());
    }

    #[test]
    fn test_unneeded_chopstick_is_fatal() {
        let (_, _, mut p0, _) = pair(1);
        let err = p0.handle_request(1, 5).unwrap_err();
        assert!(matches!(
            err,
            DinnerError::Protocol(ProtocolViolation::NotNeeded { chopstick: 5, .. })
        ));
    }

    #[test]
    fn test_double_hand_off_is_fatal() {
        let (_, shared, _, mut p1) = pair(1);
        // p0 が持ったまま綺麗になった箸が p1 に届いたことにする
        shared.chopsticks[0].mark_clean(0).unwrap();
        let err = p1
            .handle(Message::Response {
                from: 0,
                chopstick: 0,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DinnerError::Protocol(ProtocolViolation::DoubleHolder { holder: 0, .. })
        ));
    }

    #[test]
    fn test_full_mailbox_drops_request() {
        let (_, shared, _, mut p1) = pair(1);
        for _ in 0..5 {
            shared.mailboxes[0]
                .try_send(Message::Request {
                    from: 1,
                    chopstick: 0,
                })
                .unwrap();
        }
        p1.request_missing().unwrap();
        assert_eq!(p1.report.requests_dropped, 1);
        assert_eq!(p1.report.requests_sent, 0);
        assert_eq!(shared.mailboxes[0].len(), 5);
    }

    #[test]
    fn test_leaves_when_nobody_wants_its_chopsticks() {
        let (_, shared, mut p0, _) = pair(1);
        assert_eq!(p0.step().unwrap(), Flow::Continue);
        assert_eq!(p0.eaten, 1);

        // p1 がまだ食べていないので席を立たない
        assert_eq!(p0.step().unwrap(), Flow::Continue);

        shared.set_sated(1);
        assert_eq!(p0.step().unwrap(), Flow::Leave);
        assert_eq!(p0.state(), State::Done);
        assert!(!shared.is_alive(0));
    }

    #[test]
    fn test_side_label() {
        assert_eq!(side_label(0), "left");
        assert_eq!(side_label(1), "right");
        assert_eq!(side_label(3), "#3");
    }
}

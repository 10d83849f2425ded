use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use tracing::{info, warn};

use crate::chopstick::Chopstick;
use crate::config::DinnerConfig;
use crate::error::{DinnerError, TopologyError};
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::philosopher::{side_label, Philosopher, Report};
use crate::sink::Sink;
use crate::{ChopstickId, PhilosopherId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub name: String,
    pub needs: Vec<ChopstickId>,
}

impl Seat {
    pub fn new(name: impl Into<String>, needs: Vec<ChopstickId>) -> Self {
        Seat {
            name: name.into(),
            needs,
        }
    }
}

// 哲学者のスレッド間で共有するもの
// 箸の中身を書き換えるのは保持者だけ。ロックを持つのは受信箱と出力だけ
pub(crate) struct Shared {
    pub(crate) chopsticks: Vec<Chopstick>,
    pub(crate) mailboxes: Vec<Mailbox<Message>>,
    alive: Vec<AtomicBool>,
    sated: Vec<AtomicBool>,
    pub(crate) abort: AtomicBool,
    pub(crate) sink: Arc<Sink>,
}

impl Shared {
    pub(crate) fn new(table: &Table, config: &DinnerConfig, sink: Arc<Sink>) -> Self {
        let chopsticks: Vec<_> = (0..table.chopsticks).map(Chopstick::new).collect();
        for (c, &holder) in table.holders.iter().enumerate() {
            // 検証済みの表なので失敗しない
            let _ = chopsticks[c].transfer_to(holder);
        }

        // 返答は箸 1 本につき同時に 1 通しか飛ばないので、必要な箸の本数だけ予約しておく
        let mailboxes = table
            .seats
            .iter()
            .map(|s| Mailbox::new(config.mailbox_capacity.max(1), s.needs.len()))
            .collect();

        let n = table.seats.len();
        Shared {
            chopsticks,
            mailboxes,
            alive: (0..n).map(|_| AtomicBool::new(true)).collect(),
            sated: (0..n).map(|_| AtomicBool::new(false)).collect(),
            abort: AtomicBool::new(false),
            sink,
        }
    }

    pub(crate) fn is_alive(&self, p: PhilosopherId) -> bool {
        self.alive[p].load(Ordering::Acquire)
    }

    pub(crate) fn set_gone(&self, p: PhilosopherId) {
        self.alive[p].store(false, Ordering::Release);
    }

    pub(crate) fn is_sated(&self, p: PhilosopherId) -> bool {
        self.sated[p].load(Ordering::Acquire)
    }

    pub(crate) fn set_sated(&self, p: PhilosopherId) {
        self.sated[p].store(true, Ordering::Release);
    }
}

// 全員分の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DinnerReport {
    pub philosophers: Vec<Report>,
    // 終了時の各箸の保持者
    pub holders: Vec<Option<PhilosopherId>>,
}

impl DinnerReport {
    pub fn total_meals(&self) -> usize {
        self.philosophers.iter().map(|r| r.meals).sum()
    }

    pub fn requests_dropped(&self) -> usize {
        self.philosophers.iter().map(|r| r.requests_dropped).sum()
    }
}

/// Who sits at the table, what each one needs, and who starts holding what.
///
/// A `Table` is always valid: every constructor checks the need graph and
/// rejects initial assignments whose wait-for graph has a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    chopsticks: usize,
    seats: Vec<Seat>,
    holders: Vec<PhilosopherId>,
}

impl Table {
    // n 人の円卓。i 番目の哲学者は左に箸 i、右に箸 i-1 を必要とする
    // 箸は必要とする哲学者のうち番号の小さい方が最初に持つので、最後の哲学者は何も持たない
    pub fn ring(n: usize) -> Result<Self, TopologyError> {
        if n < 2 {
            return Err(TopologyError::TooFewPhilosophers(n));
        }
        let seats = (0..n)
            .map(|i| Seat::new(format!("Philosopher {}", i + 1), vec![i, (i + n - 1) % n]))
            .collect();
        Self::with_lowest_holders(n, seats)
    }

    pub fn with_lowest_holders(chopsticks: usize, seats: Vec<Seat>) -> Result<Self, TopologyError> {
        check_seats(chopsticks, &seats)?;
        let holders = (0..chopsticks)
            .map(|c| {
                seats
                    .iter()
                    .position(|s| s.needs.contains(&c))
                    .ok_or(TopologyError::Unneeded(c))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(chopsticks, seats, holders)
    }

    pub fn new(
        chopsticks: usize,
        seats: Vec<Seat>,
        holders: Vec<PhilosopherId>,
    ) -> Result<Self, TopologyError> {
        check_seats(chopsticks, &seats)?;

        if holders.len() != chopsticks {
            return Err(TopologyError::HolderCount {
                expected: chopsticks,
                actual: holders.len(),
            });
        }
        for (c, &h) in holders.iter().enumerate() {
            if seats.get(h).map_or(true, |s| !s.needs.contains(&c)) {
                return Err(TopologyError::HolderDoesNotNeed {
                    chopstick: c,
                    holder: h,
                });
            }
        }

        let table = Table {
            chopsticks,
            seats,
            holders,
        };
        if let Some(cycle) = table.wait_cycle() {
            return Err(TopologyError::Cycle(cycle));
        }
        Ok(table)
    }

    pub fn from_config(config: &DinnerConfig) -> Result<Self, TopologyError> {
        let Some(t) = &config.table else {
            return Self::ring(config.philosophers);
        };

        let seats: Vec<_> = t
            .seats
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let name = s
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Philosopher {}", i + 1));
                Seat::new(name, s.needs.clone())
            })
            .collect();

        match &t.holders {
            Some(holders) => Self::new(t.chopsticks, seats, holders.clone()),
            None => Self::with_lowest_holders(t.chopsticks, seats),
        }
    }

    pub fn chopsticks(&self) -> usize {
        self.chopsticks
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn holder(&self, chopstick: ChopstickId) -> PhilosopherId {
        self.holders[chopstick]
    }

    // その箸を必要とする全員
    pub fn contenders(&self, chopstick: ChopstickId) -> Vec<PhilosopherId> {
        self.seats
            .iter()
            .enumerate()
            .filter(|(_, s)| s.needs.contains(&chopstick))
            .map(|(i, _)| i)
            .collect()
    }

    // 箸を 1 本でも共有する相手
    pub fn neighbors(&self, p: PhilosopherId) -> Vec<PhilosopherId> {
        let mut v: Vec<_> = self.seats[p]
            .needs
            .iter()
            .flat_map(|&c| self.contenders(c))
            .filter(|&q| q != p)
            .collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    pub fn initial_holdings(&self, p: PhilosopherId) -> Vec<ChopstickId> {
        self.seats[p]
            .needs
            .iter()
            .copied()
            .filter(|&c| self.holders[c] == p)
            .collect()
    }

    // 待ち関係 p -> holder(c) (c は p が必要だが持っていない箸) の閉路を探す
    fn wait_cycle(&self) -> Option<Vec<PhilosopherId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Finished,
        }

        fn visit(
            table: &Table,
            p: PhilosopherId,
            marks: &mut [Mark],
            path: &mut Vec<PhilosopherId>,
        ) -> Option<Vec<PhilosopherId>> {
            marks[p] = Mark::OnPath;
            path.push(p);
            for &c in &table.seats[p].needs {
                let q = table.holders[c];
                if q == p {
                    continue;
                }
                match marks[q] {
                    Mark::OnPath => {
                        let start = path.iter().position(|&x| x == q).unwrap_or(0);
                        return Some(path[start..].to_vec());
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(table, q, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Finished => {}
                }
            }
            path.pop();
            marks[p] = Mark::Finished;
            None
        }

        let mut marks = vec![Mark::New; self.seats.len()];
        let mut path = Vec::new();
        for p in 0..self.seats.len() {
            if marks[p] == Mark::New {
                if let Some(cycle) = visit(self, p, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Runs the dinner to completion, one thread per philosopher.
    ///
    /// On a protocol violation every other philosopher is stopped, a
    /// diagnostic is written through `sink`, and the violation is returned.
    pub fn serve(&self, config: &DinnerConfig, sink: Arc<Sink>) -> Result<DinnerReport, DinnerError> {
        let shared = Arc::new(Shared::new(self, config, sink));

        info!(
            philosophers = self.seats.len(),
            chopsticks = self.chopsticks,
            portions = config.portions,
            mailbox_capacity = config.mailbox_capacity,
            "dinner is starting"
        );
        shared.sink.banner("Dinner is starting!")?;
        shared.sink.banner("")?;

        // 最初の割り当て
        for (c, &h) in self.holders.iter().enumerate() {
            let position = self.seats[h].needs.iter().position(|&x| x == c).unwrap_or(0);
            shared
                .sink
                .picks_up(h, &self.seats[h].name, c, &side_label(position))?;
        }

        let mut handles = Vec::new();
        for id in 0..self.seats.len() {
            let philosopher = Philosopher::new(self, id, config, shared.clone());
            let spawned = thread::Builder::new()
                .name(self.seats[id].name.clone())
                .spawn(move || philosopher.run());
            match spawned {
                Ok(t) => handles.push(t),
                Err(e) => {
                    shared.abort.store(true, Ordering::Release);
                    for t in handles {
                        let _ = t.join();
                    }
                    return Err(e.into());
                }
            }
        }

        let results: Vec<_> = handles
            .into_iter()
            .enumerate()
            .map(|(id, t)| t.join().unwrap_or(Err(DinnerError::Panicked(id))))
            .collect();

        // 巻き込まれて止まったものより、原因の方を返す
        let mut reports = Vec::new();
        let mut first_err: Option<DinnerError> = None;
        for r in results {
            match r {
                Ok(report) => reports.push(report),
                Err(e) => {
                    if first_err.as_ref().map_or(true, |f| f.is_secondary() && !e.is_secondary()) {
                        first_err = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_err {
            warn!(error = %e, "dinner aborted");
            shared.sink.diagnostic(&e)?;
            return Err(e);
        }

        shared.sink.banner("")?;
        shared.sink.banner("Dinner is over!")?;

        let report = DinnerReport {
            philosophers: reports,
            holders: shared.chopsticks.iter().map(|c| c.holder()).collect(),
        };
        info!(
            meals = report.total_meals(),
            requests_dropped = report.requests_dropped(),
            "dinner is over"
        );
        Ok(report)
    }
}

fn check_seats(chopsticks: usize, seats: &[Seat]) -> Result<(), TopologyError> {
    if seats.len() < 2 {
        return Err(TopologyError::TooFewPhilosophers(seats.len()));
    }
    let mut used = vec![false; chopsticks];
    for (p, seat) in seats.iter().enumerate() {
        if seat.needs.is_empty() {
            return Err(TopologyError::NothingNeeded(p));
        }
        for (i, &c) in seat.needs.iter().enumerate() {
            if c >= chopsticks {
                return Err(TopologyError::UnknownChopstick {
                    philosopher: p,
                    chopstick: c,
                    count: chopsticks,
                });
            }
            if seat.needs[..i].contains(&c) {
                return Err(TopologyError::DuplicateNeed {
                    philosopher: p,
                    chopstick: c,
                });
            }
            used[c] = true;
        }
    }
    match used.iter().position(|u| !u) {
        Some(c) => Err(TopologyError::Unneeded(c)),
        None => Ok(()),
    }
}

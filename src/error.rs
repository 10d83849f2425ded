use std::io;

use thiserror::Error;

use crate::{ChopstickId, PhilosopherId};

// 致命的なプロトコル違反
// ここに来たら協調ロジックのバグなので回復はしない
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error(
        "philosopher {philosopher} was handed chopstick {chopstick} while it was still dirty \
         (invariant: a chopstick is cleaned before it changes hands)"
    )]
    DirtyHandOff {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
    },

    #[error(
        "philosopher {philosopher} was asked about chopstick {chopstick} outside its need-set \
         (invariant: held ⊆ needs)"
    )]
    NotNeeded {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
    },

    #[error(
        "philosopher {philosopher} touched chopstick {chopstick} held by {holder:?} \
         (invariant: only the holder mutates a chopstick)"
    )]
    NotHolder {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
        holder: Option<PhilosopherId>,
    },

    #[error(
        "chopstick {chopstick} was handed to philosopher {philosopher} while philosopher {holder} \
         still held it (invariant: at most one holder)"
    )]
    DoubleHolder {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
        holder: PhilosopherId,
    },

    #[error(
        "philosopher {philosopher} does not list chopstick {chopstick} as held but the table \
         names it as holder (invariant: held set mirrors chopstick holders)"
    )]
    HeldOutOfSync {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("a table needs at least two philosophers, got {0}")]
    TooFewPhilosophers(usize),

    #[error("philosopher {0} needs no chopsticks")]
    NothingNeeded(PhilosopherId),

    #[error("philosopher {philosopher} lists chopstick {chopstick} twice")]
    DuplicateNeed {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
    },

    #[error("philosopher {philosopher} needs chopstick {chopstick} but the table only has {count}")]
    UnknownChopstick {
        philosopher: PhilosopherId,
        chopstick: ChopstickId,
        count: usize,
    },

    #[error("chopstick {0} is needed by nobody")]
    Unneeded(ChopstickId),

    #[error("expected one initial holder per chopstick ({expected}), got {actual}")]
    HolderCount { expected: usize, actual: usize },

    #[error("chopstick {chopstick} is assigned to philosopher {holder} who does not need it")]
    HolderDoesNotNeed {
        chopstick: ChopstickId,
        holder: PhilosopherId,
    },

    #[error("initial assignment deadlocks: philosophers {0:?} wait on each other in a cycle")]
    Cycle(Vec<PhilosopherId>),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DinnerError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("bad table: {0}")]
    Topology(#[from] TopologyError),

    #[error("output failed: {0}")]
    Io(#[from] io::Error),

    #[error("philosopher {0} stopped because another philosopher aborted the dinner")]
    Aborted(PhilosopherId),

    #[error("philosopher {0} panicked")]
    Panicked(PhilosopherId),
}

impl DinnerError {
    // 他の哲学者の異常終了に巻き込まれただけのエラーか
    pub fn is_secondary(&self) -> bool {
        matches!(self, DinnerError::Aborted(_))
    }
}

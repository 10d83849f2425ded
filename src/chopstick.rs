use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::ProtocolViolation;
use crate::{ChopstickId, PhilosopherId};

// 誰も持っていないことを表す番兵
const NO_HOLDER: usize = usize::MAX;

// transfer_to の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Acquired,
    // すでに自分が持っていた。エラーではない
    AlreadyHeld,
}

// 箸
// ロックは持たない。書き込むのは常に現在の保持者だけで、
// 受け渡しはメールボックス経由なのでそこで happens-before が張られる
#[derive(Debug)]
pub struct Chopstick {
    id: ChopstickId,
    dirty: AtomicBool,     // true なら前回受け取ってから使用済み
    holder: AtomicUsize,   // 保持者の哲学者番号。所有ではなく単なる参照
}

impl Chopstick {
    // Chandy-Misra の初期条件で箸はすべて汚れている
    pub fn new(id: ChopstickId) -> Self {
        Chopstick {
            id,
            dirty: AtomicBool::new(true),
            holder: AtomicUsize::new(NO_HOLDER),
        }
    }

    pub fn id(&self) -> ChopstickId {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn holder(&self) -> Option<PhilosopherId> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            h => Some(h),
        }
    }

    pub fn mark_dirty(&self, by: PhilosopherId) -> Result<(), ProtocolViolation> {
        self.check_holder(by)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    // 手放す直前に保持者が呼ぶ
    pub fn mark_clean(&self, by: PhilosopherId) -> Result<(), ProtocolViolation> {
        self.check_holder(by)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    // 保持者 by -> なし
    pub fn release(&self, by: PhilosopherId) -> Result<(), ProtocolViolation> {
        self.holder
            .compare_exchange(by, NO_HOLDER, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ProtocolViolation::NotHolder {
                philosopher: by,
                chopstick: self.id,
                holder: (actual != NO_HOLDER).then_some(actual),
            })
    }

    // 保持者 なし -> to
    // CAS が失敗したら誰かがまだ持っているので二重保持
    pub fn transfer_to(&self, to: PhilosopherId) -> Result<Transfer, ProtocolViolation> {
        match self
            .holder
            .compare_exchange(NO_HOLDER, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(Transfer::Acquired),
            Err(current) if current == to => Ok(Transfer::AlreadyHeld),
            Err(current) => Err(ProtocolViolation::DoubleHolder {
                philosopher: to,
                chopstick: self.id,
                holder: current,
            }),
        }
    }

    fn check_holder(&self, by: PhilosopherId) -> Result<(), ProtocolViolation> {
        match self.holder() {
            Some(h) if h == by => Ok(()),
            holder => Err(ProtocolViolation::NotHolder {
                philosopher: by,
                chopstick: self.id,
                holder,
            }),
        }
    }
}

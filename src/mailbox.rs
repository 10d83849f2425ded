use std::{
    collections::LinkedList,
    sync::{Condvar, Mutex, PoisonError},
};

// 通常枠が埋まっている。送信側はメッセージを捨てて次のループで再送する
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
}

// 有限長の受信箱
// 通常枠 capacity はノンブロッキング送信用、予約枠 reserved はブロッキング送信だけが使える
pub struct Mailbox<T> {
    buf: Mutex<LinkedList<T>>, // queue
    cond: Condvar,             // 空きができたことの通知
    capacity: usize,
    reserved: usize,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize, reserved: usize) -> Self {
        assert!(capacity > 0);
        Mailbox {
            buf: Mutex::new(LinkedList::new()),
            cond: Condvar::new(),
            capacity,
            reserved,
        }
    }

    // 通常枠に空きがなければ即座に返す
    pub fn try_send(&self, data: T) -> Result<(), TrySendError<T>> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        if buf.len() >= self.capacity {
            return Err(TrySendError::Full(data));
        }
        buf.push_back(data);
        Ok(())
    }

    // 予約枠まで使い、それでも埋まっていれば空くまで待つ
    // メッセージは失われない
    pub fn send(&self, data: T) {
        let limit = self.capacity + self.reserved;
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        while buf.len() >= limit {
            buf = self
                .cond
                .wait(buf)
                .unwrap_or_else(PoisonError::into_inner);
        }
        buf.push_back(data);
    }

    pub fn try_recv(&self) -> Option<T> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let data = buf.pop_front();
        if data.is_some() {
            self.cond.notify_all();
        }
        data
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

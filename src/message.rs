use crate::{ChopstickId, PhilosopherId};

// 隣人との間でやり取りするメッセージ
// タグは列挙型で閉じているので、未知のタグは構築できない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {
    // from が chopstick を欲しがっている
    Request {
        from: PhilosopherId,
        chopstick: ChopstickId,
    },
    // from が chopstick を綺麗にして手放した
    Response {
        from: PhilosopherId,
        chopstick: ChopstickId,
    },
}

impl Message {
    pub fn from(&self) -> PhilosopherId {
        match *self {
            Message::Request { from, .. } | Message::Response { from, .. } => from,
        }
    }

    pub fn chopstick(&self) -> ChopstickId {
        match *self {
            Message::Request { chopstick, .. } | Message::Response { chopstick, .. } => chopstick,
        }
    }
}

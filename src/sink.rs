use std::{
    fmt::Display,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use crate::{ChopstickId, PhilosopherId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PicksUp,
    PutsDown,
    Eats,
}

// 記録された 1 イベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub philosopher: PhilosopherId,
    pub chopstick: Option<ChopstickId>,
    pub action: Action,
}

enum Target {
    Stdio,
    // テスト用。ロックで直列化された順序がそのまま残る
    Capture {
        entries: Vec<Entry>,
        lines: Vec<String>,
        diagnostics: Vec<String>,
    },
}

/// Process-wide output for the dinner.
///
/// Every line (and every diagnostic) is written while holding one mutex, so
/// lines from concurrent philosophers never interleave mid-line. The lock has
/// no part in the chopstick protocol itself.
pub struct Sink {
    target: Mutex<Target>,
}

impl Sink {
    pub fn stdio() -> Self {
        Sink {
            target: Mutex::new(Target::Stdio),
        }
    }

    pub fn capture() -> Self {
        Sink {
            target: Mutex::new(Target::Capture {
                entries: Vec::new(),
                lines: Vec::new(),
                diagnostics: Vec::new(),
            }),
        }
    }

    pub fn banner(&self, text: &str) -> io::Result<()> {
        self.write(None, text.to_string())
    }

    pub fn picks_up(
        &self,
        philosopher: PhilosopherId,
        name: &str,
        chopstick: ChopstickId,
        side: &str,
    ) -> io::Result<()> {
        self.write(
            Some(Entry {
                philosopher,
                chopstick: Some(chopstick),
                action: Action::PicksUp,
            }),
            format!("{name} picks up {side} chopstick."),
        )
    }

    pub fn puts_down(
        &self,
        philosopher: PhilosopherId,
        name: &str,
        chopstick: ChopstickId,
        side: &str,
    ) -> io::Result<()> {
        self.write(
            Some(Entry {
                philosopher,
                chopstick: Some(chopstick),
                action: Action::PutsDown,
            }),
            format!("{name} puts down {side} chopstick."),
        )
    }

    pub fn eats(&self, philosopher: PhilosopherId, name: &str) -> io::Result<()> {
        self.write(
            Some(Entry {
                philosopher,
                chopstick: None,
                action: Action::Eats,
            }),
            format!("{name} eats."),
        )
    }

    // 異常終了時の診断メッセージ。通常の行と同じロックの下で stderr へ
    pub fn diagnostic(&self, err: &dyn Display) -> io::Result<()> {
        let mut target = self.lock();
        match &mut *target {
            Target::Stdio => {
                io::stdout().lock().flush()?;
                let mut err_out = io::stderr().lock();
                writeln!(err_out, "fatal: {err}")?;
                err_out.flush()
            }
            Target::Capture { diagnostics, .. } => {
                diagnostics.push(format!("fatal: {err}"));
                Ok(())
            }
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        match &*self.lock() {
            Target::Stdio => Vec::new(),
            Target::Capture { entries, .. } => entries.clone(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        match &*self.lock() {
            Target::Stdio => Vec::new(),
            Target::Capture { lines, .. } => lines.clone(),
        }
    }

    pub fn diagnostics(&self) -> Vec<String> {
        match &*self.lock() {
            Target::Stdio => Vec::new(),
            Target::Capture { diagnostics, .. } => diagnostics.clone(),
        }
    }

    fn write(&self, entry: Option<Entry>, line: String) -> io::Result<()> {
        let mut target = self.lock();
        match &mut *target {
            Target::Stdio => {
                let mut out = io::stdout().lock();
                writeln!(out, "{line}")?;
                out.flush()
            }
            Target::Capture { entries, lines, .. } => {
                entries.extend(entry);
                lines.push(line);
                Ok(())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Target> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_line_format() {
        let sink = Sink::capture();
        sink.banner("Dinner is starting!").unwrap();
        sink.picks_up(0, "Philosopher 1", 4, "right").unwrap();
        sink.eats(0, "Philosopher 1").unwrap();
        sink.puts_down(0, "Philosopher 1", 4, "right").unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "Dinner is starting!",
                "Philosopher 1 picks up right chopstick.",
                "Philosopher 1 eats.",
                "Philosopher 1 puts down right chopstick.",
            ]
        );
        assert_eq!(
            sink.entries(),
            vec![
                Entry {
                    philosopher: 0,
                    chopstick: Some(4),
                    action: Action::PicksUp
                },
                Entry {
                    philosopher: 0,
                    chopstick: None,
                    action: Action::Eats
                },
                Entry {
                    philosopher: 0,
                    chopstick: Some(4),
                    action: Action::PutsDown
                },
            ]
        );
    }

    #[test]
    fn test_concurrent_lines_stay_whole() {
        let sink = Arc::new(Sink::capture());
        let mut v = Vec::new();
        for i in 0..4 {
            let sink0 = sink.clone();
            v.push(thread::spawn(move || {
                let name = format!("Philosopher {}", i + 1);
                for _ in 0..100 {
                    sink0.eats(i, &name).unwrap();
                }
            }));
        }
        for t in v {
            t.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines
            .iter()
            .all(|l| l.starts_with("Philosopher ") && l.ends_with(" eats.")));
    }

    #[test]
    fn test_diagnostic_is_captured() {
        let sink = Sink::capture();
        sink.diagnostic(&"chopstick 2 held twice").unwrap();
        assert_eq!(sink.diagnostics(), vec!["fatal: chopstick 2 held twice"]);
        assert!(sink.lines().is_empty());
    }
}

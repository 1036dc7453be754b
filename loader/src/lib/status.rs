//! Live per-file status lines.
//!
//! A single thread owns the board: it maps each file to the terminal line displaying it and is
//! the only one writing to the terminal. Workers talk to it through messages, a line is claimed
//! when a file starts and released when its [`StatusLine`] is dropped.
//!
//! ```text
//! [  workers  ] Claim / Progress / Release
//!       |
//!       v
//! [   board   ] owner thread, renders on the output stream
//! ```

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use rand::Rng;

use crate::{Error, Result};

enum Message {
    Claim {
        file: String,
        reply: channel::Sender<usize>,
    },
    Progress {
        line: usize,
        text: String,
    },
    Release {
        file: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Idle,
    Line(usize),
}

/// Counters of a board, available once it is finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoardStats {
    /// Number of distinct terminal lines that were used.
    pub lines_used: usize,
    pub claims: u64,
}

/// Returns the escape sequence writing `text` on `line` while the cursor sits at the start of
/// the line following the `rows` lines of the board. The cursor is moved back there afterwards.
///
/// # Example
/// ```
/// use loader::status::render_line;
///
/// assert_eq!(render_line(3, 1, "fr/paris.csv"), "\x1b[2A\r\x1b[2Kfr/paris.csv\x1b[2B\r");
/// ```
pub fn render_line(rows: usize, line: usize, text: &str) -> String {
    let offset = rows.saturating_sub(line).max(1);
    format!("\x1b[{0}A\r\x1b[2K{1}\x1b[{0}B\r", offset, text)
}

/// Sleeps for a random duration up to `max`, so that workers started together don't all hit the
/// store at the same time.
pub fn jitter(max: Duration) {
    let max_ms = max.as_millis() as u64;

    if max_ms > 0 {
        let delay = rand::thread_rng().gen_range(0..=max_ms);
        thread::sleep(Duration::from_millis(delay));
    }
}

struct Board<W: Write> {
    slots: HashMap<String, Slot>,
    in_use: BTreeSet<usize>,
    rows: usize,
    claims: u64,
    output: W,
}

impl<W: Write> Board<W> {
    fn claim(&mut self, file: String) -> usize {
        self.claims += 1;

        if let Some(Slot::Line(line)) = self.slots.get(&file) {
            return *line;
        }

        let line = (0..).find(|line| !self.in_use.contains(line)).unwrap_or(0);
        self.in_use.insert(line);
        self.slots.insert(file, Slot::Line(line));

        // New rows are appended at the bottom of the board.
        while self.rows <= line {
            writeln!(self.output).ok();
            self.rows += 1;
        }

        line
    }

    fn progress(&mut self, line: usize, text: &str) {
        if line < self.rows {
            write!(self.output, "{}", render_line(self.rows, line, text)).ok();
            self.output.flush().ok();
        }
    }

    fn release(&mut self, file: String) {
        if let Some(Slot::Line(line)) = self.slots.insert(file, Slot::Idle) {
            self.in_use.remove(&line);
        }
    }

    fn run(mut self, receiver: channel::Receiver<Message>) -> BoardStats {
        for message in receiver {
            match message {
                Message::Claim { file, reply } => {
                    let line = self.claim(file);
                    reply.send(line).ok();
                }
                Message::Progress { line, text } => self.progress(line, &text),
                Message::Release { file } => self.release(file),
            }
        }

        BoardStats {
            lines_used: self.rows,
            claims: self.claims,
        }
    }
}

/// The board owner thread.
pub struct StatusBoard {
    sender: channel::Sender<Message>,
    thread: thread::JoinHandle<BoardStats>,
}

impl StatusBoard {
    /// Starts the owner thread, every file of `files` being registered as idle.
    pub fn start<I, W>(files: I, output: W) -> Self
    where
        I: IntoIterator<Item = String>,
        W: Write + Send + 'static,
    {
        let board = Board {
            slots: files.into_iter().map(|file| (file, Slot::Idle)).collect(),
            in_use: BTreeSet::new(),
            rows: 0,
            claims: 0,
            output,
        };

        let (sender, receiver) = channel::unbounded();
        let thread = thread::spawn(move || board.run(receiver));
        Self { sender, thread }
    }

    pub fn handle(&self) -> StatusHandle {
        StatusHandle {
            sender: self.sender.clone(),
        }
    }

    /// Waits for every handle to be dropped and stops the owner thread.
    pub fn finish(self) -> Result<BoardStats> {
        drop(self.sender);
        self.thread
            .join()
            .map_err(|_| Error::WorkerPanicked("status board".to_owned()))
    }
}

/// Gives access to the board from worker threads.
#[derive(Clone)]
pub struct StatusHandle {
    sender: channel::Sender<Message>,
}

impl StatusHandle {
    /// Claims the lowest free line for `file`. If the board is gone, the returned line displays
    /// nothing.
    pub fn claim(&self, file: &str) -> StatusLine {
        let (reply, answer) = channel::bounded(1);
        let line = self
            .sender
            .send(Message::Claim {
                file: file.to_owned(),
                reply,
            })
            .ok()
            .and_then(|_| answer.recv().ok());

        StatusLine {
            file: file.to_owned(),
            line,
            sender: self.sender.clone(),
        }
    }
}

/// A line of the board held by a worker, released on drop.
pub struct StatusLine {
    file: String,
    line: Option<usize>,
    sender: channel::Sender<Message>,
}

impl StatusLine {
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn update(&self, text: impl AsRef<str>) {
        if let Some(line) = self.line {
            self.sender
                .send(Message::Progress {
                    line,
                    text: format!("{}: {}", self.file, text.as_ref()),
                })
                .ok();
        }
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        if self.line.is_some() {
            self.sender
                .send(Message::Release {
                    file: std::mem::take(&mut self.file),
                })
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn lowest_free_line() {
        let board = StatusBoard::start(vec!["a".to_owned(), "b".to_owned()], io::sink());
        let handle = board.handle();

        let a = handle.claim("a");
        let b = handle.claim("b");
        assert_eq!((a.line(), b.line()), (Some(0), Some(1)));

        // Claiming twice gives the same line.
        assert_eq!(handle.claim("a").line(), Some(0));

        drop(a);
        let c = handle.claim("c");
        assert_eq!(c.line(), Some(0));

        drop((b, c, handle));
        let stats = board.finish().unwrap();
        assert_eq!(stats, BoardStats { lines_used: 2, claims: 4 });
    }

    #[test]
    fn concurrent_claims() {
        let files: Vec<_> = (0..40).map(|i| format!("file_{}.csv", i)).collect();
        let board = StatusBoard::start(files.clone(), io::sink());
        let held = Arc::new(Mutex::new(BTreeSet::new()));
        let nb_threads = 4;

        thread::scope(|scope| {
            for chunk in files.chunks(files.len() / nb_threads) {
                let handle = board.handle();
                let held = held.clone();

                scope.spawn(move || {
                    for file in chunk {
                        let line = handle.claim(file);
                        let index = line.line().unwrap();

                        // No other worker holds the same line.
                        assert!(held.lock().unwrap().insert(index));
                        line.update("working");
                        held.lock().unwrap().remove(&index);
                    }
                });
            }
        });

        let stats = board.finish().unwrap();
        assert_eq!(stats.claims, 40);
        assert!(stats.lines_used <= nb_threads);
    }

    #[test]
    fn rendering() {
        #[derive(Clone, Default)]
        struct Output(Arc<Mutex<Vec<u8>>>);

        impl Write for Output {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let output = Output::default();
        let board = StatusBoard::start(Vec::new(), output.clone());
        let handle = board.handle();

        let line = handle.claim("x.csv");
        line.update("10 rows");
        drop((line, handle));
        board.finish().unwrap();

        let written = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("\n{}", render_line(1, 0, "x.csv: 10 rows")));
    }
}

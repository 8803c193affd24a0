// SPDX-License-Identifier: GPL-3.0-only

//! Bounded command queue feeding the render worker
//!
//! Every accepted command gets a sequence number. The worker publishes the
//! number of the last command it finished, which lets callers block until
//! their own command has been applied.

use super::DestinationId;
use crate::gpu::{Color, Mat4, MirrorMode, NativeWindow};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Work item executed on the render worker
pub enum Command {
    /// Fan the latest input frame out to every due destination
    Draw,
    Resize {
        width: u32,
        height: u32,
    },
    AddDestination {
        id: DestinationId,
        window: Arc<dyn NativeWindow>,
        max_fps: Option<u32>,
    },
    RemoveDestination {
        id: DestinationId,
    },
    RemoveAll,
    RecreateMaster,
    Mirror(MirrorMode),
    Rotate {
        degrees: f32,
        pivot: Option<[f32; 2]>,
    },
    Clear {
        id: DestinationId,
        color: Color,
    },
    ClearAll(Color),
    SetTransform {
        id: DestinationId,
        matrix: Mat4,
    },
    /// Leave the loop and tear everything down
    Quit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Draw => "draw",
            Command::Resize { .. } => "resize",
            Command::AddDestination { .. } => "add-destination",
            Command::RemoveDestination { .. } => "remove-destination",
            Command::RemoveAll => "remove-all",
            Command::RecreateMaster => "recreate-master",
            Command::Mirror(_) => "mirror",
            Command::Rotate { .. } => "rotate",
            Command::Clear { .. } => "clear",
            Command::ClearAll(_) => "clear-all",
            Command::SetTransform { .. } => "set-transform",
            Command::Quit => "quit",
        }
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Resize { width, height } => write!(f, "resize({}x{})", width, height),
            Command::AddDestination { id, max_fps, .. } => {
                write!(f, "add-destination({}, max_fps={:?})", id, max_fps)
            }
            Command::RemoveDestination { id } => write!(f, "remove-destination({})", id),
            Command::Mirror(mode) => write!(f, "mirror({:?})", mode),
            Command::Rotate { degrees, pivot } => write!(f, "rotate({}, {:?})", degrees, pivot),
            Command::Clear { id, color } => write!(f, "clear({}, {:#010x})", id, color.0),
            Command::ClearAll(color) => write!(f, "clear-all({:#010x})", color.0),
            Command::SetTransform { id, .. } => write!(f, "set-transform({})", id),
            other => f.write_str(other.name()),
        }
    }
}

/// Why a command was not accepted; the command is handed back
pub enum OfferError {
    /// Queue is at capacity, retry later
    Full(Command),
    /// Queue was shut down
    Closed(Command),
}

impl fmt::Debug for OfferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferError::Full(cmd) => write!(f, "Full({:?})", cmd),
            OfferError::Closed(cmd) => write!(f, "Closed({:?})", cmd),
        }
    }
}

struct QueueState {
    items: VecDeque<(u64, Command)>,
    next_seq: u64,
    closed: bool,
}

pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                next_seq: 1,
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, state: &mut QueueState, command: Command) -> u64 {
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.push_back((seq, command));
        self.available.notify_one();
        seq
    }

    /// Append a command, returning its sequence number
    pub fn offer(&self, command: Command) -> Result<u64, OfferError> {
        let mut state = self.lock();
        if state.closed {
            return Err(OfferError::Closed(command));
        }
        if state.items.len() >= self.capacity {
            return Err(OfferError::Full(command));
        }
        Ok(self.push(&mut state, command))
    }

    /// Drop every queued command matching `same`, then append `command`
    ///
    /// Both steps happen under one lock, so concurrent callers never leave
    /// two matching commands behind.
    pub fn offer_replacing(
        &self,
        command: Command,
        same: impl Fn(&Command) -> bool,
    ) -> Result<u64, OfferError> {
        let mut state = self.lock();
        if state.closed {
            return Err(OfferError::Closed(command));
        }
        state.items.retain(|(_, queued)| !same(queued));
        if state.items.len() >= self.capacity {
            return Err(OfferError::Full(command));
        }
        Ok(self.push(&mut state, command))
    }

    /// Block until a command is available
    pub fn take(&self) -> (u64, Command) {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            if state.closed {
                return (0, Command::Quit);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Discard pending work, put `Quit` first and refuse further offers
    pub fn quit(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.items.clear();
        state.items.push_front((0, Command::Quit));
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sequence_numbers_increase() {
        let queue = CommandQueue::new(4);
        let a = queue.offer(Command::RemoveAll).unwrap();
        let b = queue.offer(Command::Draw).unwrap();
        assert!(b > a);
        assert_eq!(queue.take().0, a);
        assert_eq!(queue.take().0, b);
    }

    #[test]
    fn full_queue_hands_command_back() {
        let queue = CommandQueue::new(1);
        queue.offer(Command::Draw).unwrap();
        match queue.offer(Command::RemoveDestination { id: 7 }) {
            Err(OfferError::Full(Command::RemoveDestination { id })) => assert_eq!(id, 7),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn replacing_coalesces_draws() {
        let queue = CommandQueue::new(8);
        for _ in 0..5 {
            queue.offer_replacing(Command::Draw, Command::is_draw).unwrap();
        }
        queue.offer(Command::RemoveAll).unwrap();
        queue.offer_replacing(Command::Draw, Command::is_draw).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.take().1, Command::RemoveAll));
        assert!(queue.take().1.is_draw());
    }

    #[test]
    fn quit_jumps_the_line_and_closes() {
        let queue = CommandQueue::new(8);
        queue.offer(Command::Draw).unwrap();
        queue.offer(Command::RemoveAll).unwrap();
        queue.quit();
        assert!(matches!(queue.take().1, Command::Quit));
        assert!(matches!(queue.offer(Command::Draw), Err(OfferError::Closed(_))));
        assert!(matches!(queue.take().1, Command::Quit));
    }

    #[test]
    fn take_blocks_until_offer() {
        let queue = Arc::new(CommandQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take().1.name())
        };
        thread::sleep(Duration::from_millis(20));
        queue.offer(Command::RecreateMaster).unwrap();
        assert_eq!(consumer.join().unwrap(), "recreate-master");
    }
}

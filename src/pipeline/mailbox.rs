//! Single-slot frame hand-off between the capture source and the encoder

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::warn;

use crate::capture::frame::CapturedFrame;
use crate::error::Result;

/// Contents of the hand-off slot
enum Slot {
    Empty,
    Pending(CapturedFrame),
}

struct State {
    slot: Slot,
    /// Buffers not currently pending or being encoded
    spare: Vec<CapturedFrame>,
    closed: bool,
}

/// Outcome of depositing a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Deposit {
    Stored,
    /// An unconsumed frame was overwritten
    Replaced { dropped_capture_time: f64 },
    /// Mailbox closed, frame ignored
    Closed,
}

/// Outcome of waiting for a frame
pub enum Take {
    Frame(CapturedFrame),
    /// Nothing arrived before the wait bound
    Idle,
    /// Closed and fully drained
    Closed,
}

/// Latest-wins mailbox holding at most one unconsumed frame.
///
/// Raster buffers circulate between the slot, the consumer and a spare list,
/// so steady-state capture performs no allocation.
pub struct FrameMailbox {
    state: Mutex<State>,
    ready: Condvar,
    width: u32,
    height: u32,
}

impl FrameMailbox {
    /// Create a closed mailbox with `buffers` pre-allocated frames
    pub fn new(width: u32, height: u32, buffers: usize) -> Self {
        let spare = (0..buffers)
            .map(|_| CapturedFrame::new(width, height))
            .collect();

        Self {
            state: Mutex::new(State {
                slot: Slot::Empty,
                spare,
                closed: true,
            }),
            ready: Condvar::new(),
            width,
            height,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn open(&self) {
        let mut state = self.lock();
        if let Slot::Pending(stale) = std::mem::replace(&mut state.slot, Slot::Empty) {
            state.spare.push(stale);
        }
        state.closed = false;
    }

    /// Refuse further deposits and wake the consumer. A pending frame is
    /// still handed out by `take` before it reports `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.lock().slot, Slot::Pending(_))
    }

    /// Copy a capture into the slot, overwriting any unconsumed frame.
    ///
    /// `capture_time` is evaluated under the lock so the timestamp and the
    /// pixels are published together.
    pub fn deposit(
        &self,
        color: &[u8],
        depth: &[u16],
        capture_time: impl FnOnce() -> f64,
    ) -> Result<Deposit> {
        let mut state = self.lock();
        if state.closed {
            return Ok(Deposit::Closed);
        }

        let (mut frame, dropped) = match std::mem::replace(&mut state.slot, Slot::Empty) {
            Slot::Pending(frame) => {
                let dropped = frame.capture_time;
                (frame, Some(dropped))
            }
            Slot::Empty => match state.spare.pop() {
                Some(frame) => (frame, None),
                None => {
                    warn!("Mailbox ran out of spare buffers, allocating");
                    (CapturedFrame::new(self.width, self.height), None)
                }
            },
        };

        if let Err(e) = frame.fill_from(color, depth, capture_time()) {
            // Rejected before any pixel was touched: restore the old state
            match dropped {
                Some(_) => state.slot = Slot::Pending(frame),
                None => state.spare.push(frame),
            }
            return Err(e);
        }

        state.slot = Slot::Pending(frame);
        drop(state);
        self.ready.notify_one();

        Ok(match dropped {
            Some(dropped_capture_time) => Deposit::Replaced {
                dropped_capture_time,
            },
            None => Deposit::Stored,
        })
    }

    /// Wait up to `bound` for a pending frame and move it out of the slot
    pub fn take(&self, bound: Duration) -> Take {
        let mut state = self.lock();
        loop {
            if let Slot::Pending(frame) = std::mem::replace(&mut state.slot, Slot::Empty) {
                return Take::Frame(frame);
            }
            if state.closed {
                return Take::Closed;
            }

            let (guard, timeout) = self
                .ready
                .wait_timeout(state, bound)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;

            if timeout.timed_out() && matches!(state.slot, Slot::Empty) && !state.closed {
                return Take::Idle;
            }
        }
    }

    /// Return a consumed frame's buffers for reuse
    pub fn recycle(&self, frame: CapturedFrame) {
        self.lock().spare.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 4;
    const H: u32 = 2;

    fn pixels(fill: u8) -> (Vec<u8>, Vec<u16>) {
        (
            vec![fill; (W * H * 3) as usize],
            vec![fill as u16 * 100; (W * H) as usize],
        )
    }

    fn open_mailbox() -> FrameMailbox {
        let mailbox = FrameMailbox::new(W, H, 2);
        mailbox.open();
        mailbox
    }

    #[test]
    fn test_deposit_then_take() {
        let mailbox = open_mailbox();
        let (color, depth) = pixels(7);

        assert_eq!(
            mailbox.deposit(&color, &depth, || 0.25).unwrap(),
            Deposit::Stored
        );
        assert!(mailbox.has_pending());

        match mailbox.take(Duration::from_millis(1)) {
            Take::Frame(frame) => {
                assert_eq!(frame.color.as_raw(), &color);
                assert_eq!(frame.depth.as_raw(), &depth);
                assert_eq!(frame.capture_time, 0.25);
            }
            _ => panic!("expected a frame"),
        }
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_second_deposit_drops_oldest() {
        let mailbox = open_mailbox();
        let (first_color, first_depth) = pixels(1);
        let (second_color, second_depth) = pixels(2);

        mailbox.deposit(&first_color, &first_depth, || 0.1).unwrap();
        let outcome = mailbox
            .deposit(&second_color, &second_depth, || 0.2)
            .unwrap();
        assert_eq!(
            outcome,
            Deposit::Replaced {
                dropped_capture_time: 0.1
            }
        );

        match mailbox.take(Duration::from_millis(1)) {
            Take::Frame(frame) => {
                assert_eq!(frame.color.as_raw(), &second_color);
                assert_eq!(frame.capture_time, 0.2);
                mailbox.recycle(frame);
            }
            _ => panic!("expected a frame"),
        }
        assert!(matches!(mailbox.take(Duration::from_millis(1)), Take::Idle));
    }

    #[test]
    fn test_rejected_deposit_keeps_pending_frame() {
        let mailbox = open_mailbox();
        let (color, depth) = pixels(3);
        mailbox.deposit(&color, &depth, || 1.0).unwrap();

        assert!(mailbox.deposit(&color[..3], &depth, || 2.0).is_err());

        match mailbox.take(Duration::from_millis(1)) {
            Take::Frame(frame) => assert_eq!(frame.capture_time, 1.0),
            _ => panic!("pending frame was lost"),
        }
    }

    #[test]
    fn test_closed_mailbox_ignores_deposits() {
        let mailbox = FrameMailbox::new(W, H, 2);
        let (color, depth) = pixels(1);

        assert_eq!(
            mailbox.deposit(&color, &depth, || 0.0).unwrap(),
            Deposit::Closed
        );
        assert!(matches!(mailbox.take(Duration::from_millis(1)), Take::Closed));
    }

    #[test]
    fn test_close_drains_pending_frame_first() {
        let mailbox = open_mailbox();
        let (color, depth) = pixels(5);
        mailbox.deposit(&color, &depth, || 0.5).unwrap();
        mailbox.close();

        assert!(matches!(
            mailbox.take(Duration::from_millis(1)),
            Take::Frame(_)
        ));
        assert!(matches!(mailbox.take(Duration::from_millis(1)), Take::Closed));
    }

    #[test]
    fn test_take_wakes_on_deposit_from_other_thread() {
        let mailbox = std::sync::Arc::new(open_mailbox());
        let producer = mailbox.clone();

        let handle = std::thread::spawn(move || {
            let (color, depth) = pixels(9);
            std::thread::sleep(Duration::from_millis(20));
            producer.deposit(&color, &depth, || 3.0).unwrap();
        });

        let mut received = None;
        for _ in 0..200 {
            if let Take::Frame(frame) = mailbox.take(Duration::from_millis(50)) {
                received = Some(frame.capture_time);
                break;
            }
        }
        handle.join().unwrap();
        assert_eq!(received, Some(3.0));
    }

    #[test]
    fn test_buffers_are_reused() {
        let mailbox = open_mailbox();
        let (color, depth) = pixels(4);

        let mut seen = Vec::new();
        for i in 0..6 {
            mailbox.deposit(&color, &depth, || i as f64).unwrap();
            if let Take::Frame(frame) = mailbox.take(Duration::from_millis(1)) {
                seen.push(frame.color.as_ptr() as usize);
                mailbox.recycle(frame);
            }
        }
        seen.sort_unstable();
        seen.dedup();
        assert!(seen.len() <= 2);
    }
}

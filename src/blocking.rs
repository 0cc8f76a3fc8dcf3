use std::sync::Arc;
use std::thread;

use crate::clock::{Clock, IdleTimer};
use crate::core::{Backend, Capabilities, Result, StreamError};

/// Read until `buf` is full, the stream ends, or the backend stays idle for
/// longer than `timeout_ms`.
///
/// A short count means the stream stalled or ended after some progress.
/// Hard failures propagate and discard whatever was read so far.
pub(crate) fn block_read(
    backend: &mut dyn Backend,
    clock: &Arc<dyn Clock>,
    timeout_ms: u64,
    buf: &mut [u8],
) -> Result<usize> {
    let caps = backend.capabilities();
    if caps.contains(Capabilities::BLOCK_READ) {
        return backend.block_read(buf, timeout_ms);
    }
    if !caps.contains(Capabilities::READ) {
        return Err(StreamError::Unsupported("read"));
    }

    let mut read = 0;
    let mut timer = IdleTimer::start(clock, timeout_ms);
    while read < buf.len() {
        match backend.raw_read(&mut buf[read..]) {
            Ok(0) => {
                if timer.expired() {
                    log::warn!(
                        "block read idle for {}ms, returning {} of {} bytes",
                        timer.idle_ms(),
                        read,
                        buf.len()
                    );
                    break;
                }
                thread::yield_now();
            }
            Ok(n) => {
                read += n;
                timer.progress();
            }
            Err(StreamError::EndOfStream) if read > 0 => break,
            Err(e) => return Err(e),
        }
    }

    Ok(read)
}

/// Write counterpart of [`block_read`].
pub(crate) fn block_write(
    backend: &mut dyn Backend,
    clock: &Arc<dyn Clock>,
    timeout_ms: u64,
    buf: &[u8],
) -> Result<usize> {
    let caps = backend.capabilities();
    if caps.contains(Capabilities::BLOCK_WRITE) {
        return backend.block_write(buf, timeout_ms);
    }
    if !caps.contains(Capabilities::WRITE) {
        return Err(StreamError::Unsupported("write"));
    }

    let mut written = 0;
    let mut timer = IdleTimer::start(clock, timeout_ms);
    while written < buf.len() {
        match backend.raw_write(&buf[written..]) {
            Ok(0) => {
                if timer.expired() {
                    log::warn!(
                        "block write idle for {}ms, wrote {} of {} bytes",
                        timer.idle_ms(),
                        written,
                        buf.len()
                    );
                    break;
                }
                thread::yield_now();
            }
            Ok(n) => {
                written += n;
                timer.progress();
            }
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::core::BackendKind;
    use std::collections::VecDeque;

    /// Each poll either yields some bytes, nothing, or fails, and moves the
    /// clock to a scripted time first.
    enum Poll {
        Bytes(usize, u64),
        Idle(u64),
        End,
        Fail,
    }

    struct Scripted {
        polls: VecDeque<Poll>,
        clock: ManualClock,
        calls: usize,
    }

    impl Scripted {
        fn new(clock: &ManualClock, polls: Vec<Poll>) -> Self {
            Self {
                polls: polls.into(),
                clock: clock.clone(),
                calls: 0,
            }
        }

        fn step(&mut self, len: usize) -> Result<usize> {
            self.calls += 1;
            match self.polls.pop_front() {
                Some(Poll::Bytes(n, at)) => {
                    self.clock.set(at);
                    Ok(n.min(len))
                }
                Some(Poll::Idle(at)) => {
                    self.clock.set(at);
                    Ok(0)
                }
                Some(Poll::End) | None => Err(StreamError::EndOfStream),
                Some(Poll::Fail) => Err(StreamError::Network("reset".into())),
            }
        }
    }

    impl Backend for Scripted {
        fn kind(&self) -> BackendKind {
            BackendKind::Custom
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::READ | Capabilities::WRITE
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = self.step(buf.len())?;
            buf[..n].fill(0xAB);
            Ok(n)
        }

        fn raw_write(&mut self, buf: &[u8]) -> Result<usize> {
            self.step(buf.len())
        }

        fn offset(&self) -> u64 {
            0
        }
    }

    fn clock_pair() -> (ManualClock, Arc<dyn Clock>) {
        let manual = ManualClock::new();
        let clock: Arc<dyn Clock> = Arc::new(manual.clone());
        (manual, clock)
    }

    #[test]
    fn idle_timeout_returns_partial_count() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(
            &manual,
            vec![
                Poll::Bytes(3, 0),
                Poll::Idle(50),
                Poll::Idle(200),
                Poll::Bytes(5, 210),
            ],
        );

        let mut buf = [0u8; 8];
        let n = block_read(&mut backend, &clock, 100, &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(backend.calls, 3);
        assert_eq!(&buf[..3], &[0xAB; 3]);
    }

    #[test]
    fn progress_resets_the_idle_window() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(
            &manual,
            vec![
                Poll::Bytes(2, 0),
                Poll::Idle(90),
                Poll::Bytes(2, 95),
                Poll::Idle(180),
                Poll::Bytes(4, 190),
            ],
        );

        let mut buf = [0u8; 8];
        assert_eq!(block_read(&mut backend, &clock, 100, &mut buf).unwrap(), 8);
    }

    #[test]
    fn end_of_stream_after_progress_is_a_short_read() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(&manual, vec![Poll::Bytes(4, 0), Poll::End]);

        let mut buf = [0u8; 8];
        assert_eq!(block_read(&mut backend, &clock, 100, &mut buf).unwrap(), 4);
    }

    #[test]
    fn end_of_stream_before_progress_is_reported() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(&manual, vec![Poll::End]);

        let mut buf = [0u8; 8];
        let err = block_read(&mut backend, &clock, 100, &mut buf).unwrap_err();
        assert!(matches!(err, StreamError::EndOfStream));
    }

    #[test]
    fn hard_failure_aborts_the_loop() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(&manual, vec![Poll::Bytes(4, 0), Poll::Fail]);

        let mut buf = [0u8; 8];
        let err = block_read(&mut backend, &clock, 100, &mut buf).unwrap_err();
        assert!(matches!(err, StreamError::Network(_)));
    }

    #[test]
    fn block_write_stops_on_idle_timeout() {
        let (manual, clock) = clock_pair();
        let mut backend = Scripted::new(
            &manual,
            vec![Poll::Bytes(5, 0), Poll::Idle(500)],
        );

        assert_eq!(block_write(&mut backend, &clock, 100, &[1u8; 10]).unwrap(), 5);
    }
}

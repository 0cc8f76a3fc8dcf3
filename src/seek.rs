use std::io::SeekFrom;
use std::thread;

use crate::clock::IdleTimer;
use crate::core::{BLOCK_SIZE, Capabilities, Result, StreamError};
use crate::stream::Stream;

impl Stream {
    /// Move to a new position and return it.
    ///
    /// Backends with native seek may go anywhere in range. Everything else
    /// is emulated by reading and discarding, so only forward targets work.
    /// The read-ahead cache must be empty: consume or close first.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        if !self.cache.is_empty() {
            return Err(StreamError::CacheNotEmpty);
        }

        let size = self.backend.size();
        let current = self.backend.offset();
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
            SeekFrom::End(delta) => {
                let size = size.ok_or(StreamError::SeekOutOfRange)?;
                if delta > 0 {
                    return Err(StreamError::SeekOutOfRange);
                }
                i128::from(size) + i128::from(delta)
            }
        };

        if target < 0 || size.is_some_and(|size| target > i128::from(size)) {
            return Err(StreamError::SeekOutOfRange);
        }
        let target = u64::try_from(target).map_err(|_| StreamError::SeekOutOfRange)?;

        if self.backend.capabilities().contains(Capabilities::SEEK) {
            match self.backend.seek(target) {
                Ok(()) => return Ok(target),
                Err(e) => log::debug!("native seek to {} failed ({}), emulating", target, e),
            }
        }

        self.skip_to(target)
    }

    fn skip_to(&mut self, target: u64) -> Result<u64> {
        let current = self.backend.offset();
        if target < current {
            return Err(StreamError::BackwardSeek {
                from: current,
                to: target,
            });
        }
        if target == current {
            return Ok(target);
        }
        if !self.backend.capabilities().contains(Capabilities::READ) {
            return Err(StreamError::Unsupported("seek"));
        }

        let mut scratch = [0u8; BLOCK_SIZE];
        let mut timer = IdleTimer::start(&self.clock, self.timeout_ms);
        loop {
            let offset = self.backend.offset();
            if offset >= target {
                break;
            }

            let want = (target - offset).min(BLOCK_SIZE as u64) as usize;
            match self.backend.raw_read(&mut scratch[..want]) {
                Ok(0) => {
                    if timer.expired() {
                        log::warn!(
                            "seek to {} idle for {}ms at {}",
                            target,
                            timer.idle_ms(),
                            offset
                        );
                        break;
                    }
                    thread::yield_now();
                }
                Ok(n) => {
                    log::trace!("skipped {} bytes towards {}", n, target);
                    timer.progress();
                }
                Err(e) => {
                    log::debug!("seek to {} stopped at {}: {}", target, offset, e);
                    break;
                }
            }
        }

        let reached = self.backend.offset();
        if reached == target {
            Ok(target)
        } else {
            Err(StreamError::SeekStalled { target, reached })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::Clock;
    use crate::clock::testing::ManualClock;
    use crate::core::{Backend, BackendKind};
    use crate::stream::testing::MemoryBackend;

    use super::*;

    fn open_stream(backend: MemoryBackend) -> Stream {
        let mut stream = Stream::new(Box::new(backend));
        stream.set_url("mem://seek").unwrap();
        stream.open().unwrap();
        stream
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn forward_seek_discards_exactly_the_gap() {
        let data = pattern(20_000);
        let mut stream = open_stream(MemoryBackend::new(&data).step(1000));

        let mut head = [0u8; 100];
        stream.bread(&mut head).unwrap();

        assert_eq!(stream.seek(SeekFrom::Start(12_345)).unwrap(), 12_345);
        assert_eq!(stream.offset(), 12_345);

        let mut buf = [0u8; 4];
        stream.bread(&mut buf).unwrap();
        assert_eq!(&buf, &data[12_345..12_349]);
    }

    #[test]
    fn relative_and_end_seeks_normalise() {
        let data = pattern(100);
        let mut stream = open_stream(MemoryBackend::new(&data));

        assert_eq!(stream.seek(SeekFrom::Current(10)).unwrap(), 10);
        assert_eq!(stream.seek(SeekFrom::End(-20)).unwrap(), 80);
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 100);
    }

    #[test]
    fn backward_seek_without_native_support_fails() {
        let mut stream = open_stream(MemoryBackend::new(&pattern(100)));
        stream.seek(SeekFrom::Start(50)).unwrap();

        assert!(matches!(
            stream.seek(SeekFrom::Start(10)),
            Err(StreamError::BackwardSeek { from: 50, to: 10 })
        ));
        assert_eq!(stream.seek(SeekFrom::Start(50)).unwrap(), 50);
    }

    #[test]
    fn native_seek_allows_going_back() {
        let mut backend = MemoryBackend::new(&pattern(100));
        backend.caps |= Capabilities::SEEK;
        let mut stream = open_stream(backend);

        stream.seek(SeekFrom::Start(60)).unwrap();
        assert_eq!(stream.seek(SeekFrom::Start(5)).unwrap(), 5);
        assert_eq!(stream.offset(), 5);
    }

    #[test]
    fn out_of_range_targets_are_rejected() {
        let mut stream = open_stream(MemoryBackend::new(&pattern(100)));

        assert!(matches!(
            stream.seek(SeekFrom::Start(101)),
            Err(StreamError::SeekOutOfRange)
        ));
        assert!(matches!(
            stream.seek(SeekFrom::Current(-1)),
            Err(StreamError::SeekOutOfRange)
        ));
        assert!(matches!(
            stream.seek(SeekFrom::End(1)),
            Err(StreamError::SeekOutOfRange)
        ));
    }

    #[test]
    fn end_seek_needs_a_known_size() {
        let mut stream = open_stream(MemoryBackend::new(&pattern(100)).unknown_size());
        assert!(matches!(
            stream.seek(SeekFrom::End(-1)),
            Err(StreamError::SeekOutOfRange)
        ));
        assert_eq!(stream.seek(SeekFrom::Start(70)).unwrap(), 70);
    }

    #[test]
    fn seek_with_cached_lookahead_is_refused() {
        let mut stream = open_stream(MemoryBackend::new(&pattern(100)));
        stream.need(4).unwrap();

        assert!(matches!(
            stream.seek(SeekFrom::Start(50)),
            Err(StreamError::CacheNotEmpty)
        ));
    }

    #[test]
    fn seek_past_the_end_of_an_unsized_stream_stalls() {
        let mut stream = open_stream(MemoryBackend::new(&pattern(10)).unknown_size());
        assert!(matches!(
            stream.seek(SeekFrom::Start(20)),
            Err(StreamError::SeekStalled {
                target: 20,
                reached: 10
            })
        ));
    }

    struct Idle {
        clock: ManualClock,
    }

    impl Backend for Idle {
        fn kind(&self) -> BackendKind {
            BackendKind::Custom
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::READ
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn raw_read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            self.clock.advance(60);
            Ok(0)
        }

        fn offset(&self) -> u64 {
            0
        }

        fn ioctl1(&mut self, _cmd: crate::Command, _arg: crate::Arg<'_>) -> bool {
            true
        }
    }

    #[test]
    fn idle_backend_times_out() {
        let manual = ManualClock::new();
        let clock: Arc<dyn Clock> = Arc::new(manual.clone());
        let mut stream = Stream::new(Box::new(Idle { clock: manual })).with_clock(clock);
        stream.set_url("idle://").unwrap();
        stream.set_timeout(std::time::Duration::from_millis(100)).unwrap();
        stream.open().unwrap();

        assert!(matches!(
            stream.seek(SeekFrom::Start(10)),
            Err(StreamError::SeekStalled {
                target: 10,
                reached: 0
            })
        ));
    }
}

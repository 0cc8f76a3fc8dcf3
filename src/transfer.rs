use std::thread;

use crate::clock::IdleTimer;
use crate::core::{BLOCK_SIZE, Result, StreamError};
use crate::stream::Stream;

impl Stream {
    /// Copy what `src` yields into this stream and return the byte count.
    ///
    /// When `src` knows how much is left the copy stops there; otherwise it
    /// runs until `src` ends. A source that stays idle past its timeout, or
    /// a destination that stalls past its own, ends the copy early.
    pub fn load(&mut self, src: &mut Stream) -> Result<u64> {
        self.ensure_open()?;
        src.ensure_open()?;

        let left = src.left().filter(|&left| left > 0);
        let mut scratch = vec![0u8; BLOCK_SIZE];
        let mut total: u64 = 0;
        let mut timer = IdleTimer::start(&src.clock, src.timeout_ms);

        loop {
            let want = match left {
                Some(left) => (left - total).min(BLOCK_SIZE as u64) as usize,
                None => BLOCK_SIZE,
            };

            match src.read(&mut scratch[..want]) {
                Ok(0) => {
                    if timer.expired() {
                        log::warn!(
                            "transfer source idle for {}ms after {} bytes",
                            timer.idle_ms(),
                            total
                        );
                        break;
                    }
                    thread::yield_now();
                }
                Ok(n) => {
                    timer.progress();
                    let written = self.bwrite(&scratch[..n])?;
                    total += written as u64;
                    if written < n {
                        log::warn!(
                            "transfer destination stalled, {} of {} bytes written",
                            written,
                            n
                        );
                        break;
                    }
                }
                Err(StreamError::EndOfStream) => break,
                Err(e) => return Err(e),
            }

            if left.is_some_and(|left| total >= left) {
                break;
            }
        }

        log::debug!("transferred {} bytes", total);
        Ok(total)
    }

    /// Copy this stream into `dst`. Same as `dst.load(self)`.
    pub fn save(&mut self, dst: &mut Stream) -> Result<u64> {
        dst.load(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::MemoryBackend;

    fn open(backend: MemoryBackend) -> Stream {
        let mut stream = Stream::new(Box::new(backend));
        stream.set_url("mem://transfer").unwrap();
        stream.open().unwrap();
        stream
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn load_copies_a_sized_source() {
        let data = pattern(3 * BLOCK_SIZE + 17);
        let mut src = open(MemoryBackend::new(&data).step(1000));
        let sink_backend = MemoryBackend::new(b"").step(700);
        let sink = sink_backend.sink();
        let mut dst = open(sink_backend);

        assert_eq!(dst.load(&mut src).unwrap(), data.len() as u64);
        assert_eq!(sink.lock().unwrap().as_slice(), data.as_slice());
    }

    #[test]
    fn load_runs_unsized_sources_to_the_end() {
        let data = pattern(10_000);
        let mut src = open(MemoryBackend::new(&data).unknown_size());
        let sink_backend = MemoryBackend::new(b"");
        let sink = sink_backend.sink();
        let mut dst = open(sink_backend);

        assert_eq!(dst.load(&mut src).unwrap(), 10_000);
        assert_eq!(sink.lock().unwrap().len(), 10_000);
    }

    #[test]
    fn save_is_load_reversed() {
        let data = pattern(5000);

        let mut src_a = open(MemoryBackend::new(&data));
        let sink_a_backend = MemoryBackend::new(b"");
        let sink_a = sink_a_backend.sink();
        let mut dst_a = open(sink_a_backend);
        let loaded = dst_a.load(&mut src_a).unwrap();

        let mut src_b = open(MemoryBackend::new(&data));
        let sink_b_backend = MemoryBackend::new(b"");
        let sink_b = sink_b_backend.sink();
        let mut dst_b = open(sink_b_backend);
        let saved = src_b.save(&mut dst_b).unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(*sink_a.lock().unwrap(), *sink_b.lock().unwrap());
    }

    #[test]
    fn load_drains_cached_lookahead_first() {
        let data = pattern(100);
        let mut src = open(MemoryBackend::new(&data));
        src.need(10).unwrap();
        let sink_backend = MemoryBackend::new(b"");
        let sink = sink_backend.sink();
        let mut dst = open(sink_backend);

        assert_eq!(dst.load(&mut src).unwrap(), 100);
        assert_eq!(sink.lock().unwrap().as_slice(), data.as_slice());
    }

    #[test]
    fn load_requires_open_streams() {
        let mut src = open(MemoryBackend::new(b"abc"));
        let mut dst = open(MemoryBackend::new(b""));
        dst.close();
        assert!(matches!(dst.load(&mut src), Err(StreamError::Closed)));
    }
}

//! Terminal progress bar fed by a read-only view of the ring.
//!
//! The observer runs on its own thread in the coordinator and only ever
//! loads the ring counters; it never writes to the segment.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ring::RingSegment;

/// Width assumed when stdout is not a terminal.
const FALLBACK_COLUMNS: usize = 80;

/// Renders `<label> :[#####     ]` lines.
#[derive(Debug, Clone)]
pub struct ProgressBar {
    label: String,
    total: u64,
}

impl ProgressBar {
    pub fn new(label: impl Into<String>, total: u64) -> Self {
        Self {
            label: label.into(),
            total,
        }
    }

    /// Fraction done, clamped to `0.0..=1.0`. An empty total counts as done.
    pub fn fraction(&self, done: u64) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (done as f64 / self.total as f64).min(1.0)
    }

    /// One frame for a terminal `columns` wide, starting with `\r`.
    pub fn render(&self, done: u64, columns: usize) -> String {
        // label + " :" + "[" + "]" + one spare column
        let bar_width = columns.saturating_sub(self.label.chars().count() + 4);
        let filled = (bar_width as f64 * self.fraction(done)).ceil() as usize;

        let mut frame = String::with_capacity(columns + 2);
        frame.push('\r');
        frame.push_str(&self.label);
        frame.push_str(" :[");
        frame.extend((0..bar_width).map(|i| if i < filled { '#' } else { ' ' }));
        frame.push(']');
        frame
    }
}

/// Columns of the terminal on stdout, if it is one.
pub fn terminal_columns() -> Option<usize> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if ret == -1 || size.ws_col == 0 {
        return None;
    }
    Some(size.ws_col as usize)
}

/// Growth between two [`RingBuffer::transferred_estimate`] samples.
///
/// The estimate is the 32-bit consumed counter times `capacity`, so it drops
/// back towards zero when the counter wraps; that drop is read as one wrap.
///
/// [`RingBuffer::transferred_estimate`]: crate::ring::RingBuffer::transferred_estimate
fn estimate_delta(previous: u64, current: u64, capacity: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current + (1u64 << 32) * capacity - previous
    }
}

/// Background thread redrawing a [`ProgressBar`] from the ring counters.
pub struct ProgressObserver {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ProgressObserver {
    /// Attach to `segment` and start drawing every `interval`.
    pub fn spawn(segment: RingSegment, bar: ProgressBar, interval: Duration) -> io::Result<Self> {
        let ring = segment.attach()?;
        let stop = Arc::new(AtomicBool::new(false));

        let handle = std::thread::Builder::new()
            .name("ringcp-progress".into())
            .spawn({
                let stop = stop.clone();
                move || {
                    let capacity = ring.layout().capacity() as u64;
                    let mut last = ring.transferred_estimate();
                    let mut done = 0u64;
                    let mut stdout = io::stdout();

                    loop {
                        let estimate = ring.transferred_estimate();
                        done = done
                            .saturating_add(estimate_delta(last, estimate, capacity))
                            .min(bar.total);
                        last = estimate;

                        let columns = terminal_columns().unwrap_or(FALLBACK_COLUMNS);
                        let _ = stdout.write_all(bar.render(done, columns).as_bytes());
                        let _ = stdout.flush();

                        if done >= bar.total || stop.load(Ordering::Acquire) {
                            break;
                        }
                        std::thread::sleep(interval);
                    }

                    let _ = writeln!(stdout);
                    if let Err(e) = ring.detach() {
                        warn!(error = %e, "progress observer failed to detach ring buffer");
                    }
                }
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop drawing and wait for the thread to finish its last line.
    pub fn finish(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            warn!("progress observer panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scales_to_width() {
        let bar = ProgressBar::new("out", 100);
        // 20 columns - "out" (3) - 4 = 13 cells
        assert_eq!(bar.render(0, 20), format!("\rout :[{}]", " ".repeat(13)));
        assert_eq!(bar.render(100, 20), format!("\rout :[{}]", "#".repeat(13)));

        let half = bar.render(50, 20);
        assert_eq!(half.matches('#').count(), 7);
        assert_eq!(half.chars().count(), 21);
    }

    #[test]
    fn test_render_never_overflows() {
        let bar = ProgressBar::new("a-very-long-destination-name", 10);
        assert_eq!(bar.render(5, 10), "\ra-very-long-destination-name :[]");
        assert_eq!(bar.fraction(1_000), 1.0);
    }

    #[test]
    fn test_estimate_delta_survives_counter_wrap() {
        assert_eq!(estimate_delta(0, 0, 256), 0);
        assert_eq!(estimate_delta(256, 1024, 256), 768);

        // consumed went u32::MAX -> 0 -> 1: two slots.
        let before = u32::MAX as u64 * 256;
        assert_eq!(estimate_delta(before, 256, 256), 512);
    }

    #[test]
    fn test_observer_reads_ring_estimate() {
        use crate::layout::RingLayout;
        use sysv_shm::IpcKey;

        let segment = RingSegment::create(IpcKey::PRIVATE, RingLayout::new(8, 4).unwrap()).unwrap();
        let ring = segment.attach().unwrap();
        let mut producer = ring.producer();
        let mut consumer = ring.consumer();
        let mut out = [0u8; 8];

        let start = ring.transferred_estimate();
        for _ in 0..3 {
            producer.produce(b"12345678");
            consumer.consume(&mut out);
        }
        assert_eq!(estimate_delta(start, ring.transferred_estimate(), 8), 24);

        drop(ring);
        segment.remove().unwrap();
    }

    #[test]
    fn test_empty_total_is_complete() {
        let bar = ProgressBar::new("x", 0);
        assert_eq!(bar.fraction(0), 1.0);
    }
}

//! Producer and consumer loops, and the process entry points around them.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use sysv_shm::SemaphoreSet;

use crate::error::{Error, Result};
use crate::gate::{Gate, SEMAPHORE_COUNT};
use crate::ring::{RingBuffer, RingConsumer, RingProducer, RingSegment};
use crate::spawn::EndpointArgs;

/// What one endpoint moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload-carrying slots, not counting the sentinel.
    pub chunks: u64,
    pub bytes: u64,
}

/// Fill `buf` from `source`, stopping early only at end of input.
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Push `source` through the ring in capacity-sized chunks, then the
/// zero-length sentinel.
///
/// On a read error the sentinel is *not* sent: the consumer must be torn
/// down by whoever watches this process.
pub fn produce_stream<R: Read>(
    source: &mut R,
    producer: &mut RingProducer<'_>,
    gate: &dyn Gate,
    path: &Path,
) -> Result<TransferStats> {
    let mut buf = vec![0u8; producer.ring().layout().capacity() as usize];
    let mut stats = TransferStats::default();

    loop {
        let n = read_chunk(source, &mut buf).map_err(|e| Error::io("failed to read from", path, e))?;
        trace!(bytes = n, "read from file");

        gate.before_produce(producer.ring())
            .map_err(|e| Error::resource("failed to wait for an empty slot", e))?;
        let slot = producer.produce(&buf[..n]);
        gate.after_produce()
            .map_err(|e| Error::resource("failed to signal a full slot", e))?;
        debug!("{n} bytes data produced into buffer {slot}");

        if n == 0 {
            return Ok(stats);
        }
        stats.chunks += 1;
        stats.bytes += n as u64;
    }
}

/// Drain the ring into `dest` until the sentinel arrives.
pub fn consume_stream<W: Write>(
    dest: &mut W,
    consumer: &mut RingConsumer<'_>,
    gate: &dyn Gate,
    path: &Path,
) -> Result<TransferStats> {
    let mut buf = vec![0u8; consumer.ring().layout().capacity() as usize];
    let mut stats = TransferStats::default();

    loop {
        gate.before_consume(consumer.ring())
            .map_err(|e| Error::resource("failed to wait for a full slot", e))?;
        let n = consumer.consume(&mut buf);
        gate.after_consume()
            .map_err(|e| Error::resource("failed to signal an empty slot", e))?;
        debug!("{n} bytes data consumed from ring buffer");

        if n == 0 {
            dest.flush()
                .map_err(|e| Error::io("failed to write to", path, e))?;
            return Ok(stats);
        }
        dest.write_all(&buf[..n])
            .map_err(|e| Error::io("failed to write to", path, e))?;
        stats.chunks += 1;
        stats.bytes += n as u64;
    }
}

/// Shared resources one endpoint process attaches to.
struct Attachment {
    semaphores: SemaphoreSet,
    ring: RingBuffer,
}

impl Attachment {
    fn open(args: &EndpointArgs) -> Result<Self> {
        let config = &args.config;
        let semaphores = SemaphoreSet::open(config.key, SEMAPHORE_COUNT)
            .map_err(|e| Error::resource("failed to retrieve semaphore set", e))?;
        debug!(key = %config.key, semid = semaphores.id(), "semaphore set retrieved");

        let ring = RingSegment::open(config.key, config.layout)
            .and_then(|segment| segment.attach())
            .map_err(|e| Error::resource("failed to attach ring buffer", e))?;

        Ok(Self { semaphores, ring })
    }

    fn close(self) {
        if let Err(e) = self.ring.detach() {
            warn!(error = %e, "failed to detach ring buffer");
        }
    }
}

/// Body of the `ringcp-put` process.
pub fn run_put(args: &EndpointArgs) -> Result<TransferStats> {
    let attachment = Attachment::open(args)?;

    let mut source =
        File::open(&args.path).map_err(|e| Error::io("failed to open", &args.path, e))?;
    debug!(path = %args.path.display(), "file opened for reading");

    let gate = args.config.mode.gate(attachment.semaphores);
    let stats = produce_stream(
        &mut source,
        &mut attachment.ring.producer(),
        gate.as_ref(),
        &args.path,
    )?;

    attachment.close();
    info!(bytes = stats.bytes, chunks = stats.chunks, "put process succeeded");
    Ok(stats)
}

/// Body of the `ringcp-get` process.
pub fn run_get(args: &EndpointArgs) -> Result<TransferStats> {
    let attachment = Attachment::open(args)?;

    let mut dest = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&args.path)
        .map_err(|e| Error::io("failed to open", &args.path, e))?;
    debug!(path = %args.path.display(), "file opened for writing");

    let gate = args.config.mode.gate(attachment.semaphores);
    let stats = consume_stream(
        &mut dest,
        &mut attachment.ring.consumer(),
        gate.as_ref(),
        &args.path,
    )?;

    attachment.close();
    info!(bytes = stats.bytes, chunks = stats.chunks, "get process succeeded");
    Ok(stats)
}

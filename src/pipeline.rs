//! Encode/decode orchestration.
//!
//! Encode: chunk → keystream → bit grid → `iterations` forward steps →
//! `(previous, current)` packed back to bytes → container.
//! Decode runs the mirror sequence with backward steps and trims the final
//! chunk's padding before undoing the keystream.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, trace};
use zeroize::Zeroize;

use crate::cipher::apply_keystream;
use crate::device::{ComputeDevice, CpuDevice};
use crate::engine::ReversibleEngine;
use crate::file::{
    default_decode_output_path, default_encode_output_path, persist_tempfile_atomic,
    write_all_atomic,
};
use crate::format::{ContainerHeader, VERSION, decode_container, encode_container};
use crate::grid::{pack_bits, unpack_bits};
use crate::key::Key;
use crate::observer::{Direction, Observer, Snapshot};
use crate::types::{
    CHUNK_SIZE, ContentTag, DecodeOptions, DenisError, EncodeOptions, GRID_CELLS, PAIR_SIZE,
};

/// Result of encoding a file.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub output: PathBuf,
    pub header: ContainerHeader,
    pub chunks: usize,
}

/// An engine plus an optional observer, reused across runs.
#[derive(Debug)]
pub struct Pipeline<D: ComputeDevice = CpuDevice> {
    engine: ReversibleEngine<D>,
    observer: Option<Observer>,
}

impl Pipeline<CpuDevice> {
    /// Pipeline on the host reference device.
    pub fn new() -> Result<Self, DenisError> {
        Self::with_device(CpuDevice::new())
    }
}

impl<D: ComputeDevice> Pipeline<D> {
    pub fn with_device(device: D) -> Result<Self, DenisError> {
        Ok(Self {
            engine: ReversibleEngine::new(device)?,
            observer: None,
        })
    }

    /// Attach an observer. Snapshots are published to it and its liveness
    /// flag is checked between steps.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn engine(&self) -> &ReversibleEngine<D> {
        &self.engine
    }

    /// Encode an in-memory buffer into container bytes.
    pub fn encode_bytes(
        &mut self,
        data: &[u8],
        key: &Key,
        content_tag: ContentTag,
    ) -> Result<Vec<u8>, DenisError> {
        let (_, container) = self.encode_reader(data, data.len() as u64, key, content_tag)?;
        Ok(container)
    }

    /// Decode container bytes back into the original buffer.
    pub fn decode_bytes(&mut self, container: &[u8], key: &Key) -> Result<Vec<u8>, DenisError> {
        let (header, payload) = decode_container(container)?;
        let mut out = Vec::with_capacity(payload.len() / 2);
        self.decode_payload(&header, payload, key, &mut out)?;
        Ok(out)
    }

    /// Encode `input` into a container at `output` (default `<input>.denis`).
    pub fn encode_file(
        &mut self,
        input: &Path,
        output: Option<&Path>,
        key: &Key,
        opts: &EncodeOptions,
    ) -> Result<EncodeReport, DenisError> {
        let out_path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_encode_output_path(input));
        if out_path.exists() && !opts.force {
            return Err(DenisError::Invalid(
                "output exists; use --force to overwrite",
            ));
        }

        let file = File::open(input)?;
        let size = file.metadata()?.len();
        info!(input = %input.display(), size, iterations = key.iterations(), "encoding");

        let (header, container) = self.encode_reader(file, size, key, opts.content_tag)?;
        let output = write_all_atomic(&out_path, &container, opts.force)?;
        let chunks = (header.payload_len / PAIR_SIZE as u64) as usize;

        info!(output = %output.display(), chunks, padding = header.padding, "encoded");
        Ok(EncodeReport {
            output,
            header,
            chunks,
        })
    }

    /// Decode the container at `input` into `output` (default: strip `.denis`
    /// or append `.dec`).
    pub fn decode_file(
        &mut self,
        input: &Path,
        output: Option<&Path>,
        key: &Key,
        opts: &DecodeOptions,
    ) -> Result<PathBuf, DenisError> {
        let out_path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_decode_output_path(input));
        if out_path.exists() && !opts.force {
            return Err(DenisError::Invalid(
                "output exists; use --force to overwrite",
            ));
        }

        let bytes = fs::read(input)?;
        let (header, payload) = decode_container(&bytes)?;
        info!(
            input = %input.display(),
            version = header.version,
            tag = %header.content_tag,
            payload = header.payload_len,
            "decoding"
        );

        let parent = match out_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            self.decode_payload(&header, payload, key, &mut w)?;
            w.flush()?;
        }
        tmp.as_file_mut().sync_all()?;

        let written = persist_tempfile_atomic(tmp, &out_path, opts.force)?;
        info!(output = %written.display(), "decoded");
        Ok(written)
    }

    /// Run every chunk of `reader` forward and wrap the result in a container.
    fn encode_reader<R: Read>(
        &mut self,
        mut reader: R,
        size: u64,
        key: &Key,
        content_tag: ContentTag,
    ) -> Result<(ContainerHeader, Vec<u8>), DenisError> {
        if content_tag == ContentTag::None {
            return Err(DenisError::Invalid("content tag cannot be NUL"));
        }
        let total_chunks = size.div_ceil(CHUNK_SIZE as u64) as usize;
        let mut payload = Vec::with_capacity(total_chunks.saturating_mul(PAIR_SIZE));
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_short = 0usize;
        let mut index = 0usize;

        loop {
            let n = read_full(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            bytes_short = CHUNK_SIZE - n;
            apply_keystream(&mut buf[..n], key.xor_key())?;
            buf[n..].fill(0);

            self.forward_chunk(&buf, key, index, total_chunks.max(index + 1), &mut payload)?;
            debug!(chunk = index, bytes = n, "chunk encoded");
            index += 1;

            if n < CHUNK_SIZE {
                break;
            }
        }
        buf.zeroize();

        // bytes_short < CHUNK_SIZE, which fits in u16.
        let padding = bytes_short as u16;
        let (header, container) = encode_container(&payload, content_tag, VERSION, padding)?;
        Ok((header, container))
    }

    fn forward_chunk(
        &mut self,
        chunk: &[u8],
        key: &Key,
        index: usize,
        total_chunks: usize,
        payload: &mut Vec<u8>,
    ) -> Result<(), DenisError> {
        let mut grid = unpack_bits(chunk)?;
        self.engine.clear_previous()?;
        self.engine.upload_current(&grid)?;
        grid.zeroize();

        let iterations = key.iterations();
        for step in 1..=iterations {
            self.checkpoint()?;
            self.engine.step_forward()?;
            self.observe(Direction::Forward, index, total_chunks, step, iterations)?;
        }
        if iterations == 0 {
            self.observe(Direction::Forward, index, total_chunks, 0, 0)?;
        }
        trace!(chunk = index, steps = iterations, "forward steps done");

        payload.extend_from_slice(&pack_bits(&self.engine.download_previous()?)?);
        payload.extend_from_slice(&pack_bits(&self.engine.download_current()?)?);
        Ok(())
    }

    /// Run every generation pair of `payload` backward into `out`.
    fn decode_payload<W: Write>(
        &mut self,
        header: &ContainerHeader,
        payload: &[u8],
        key: &Key,
        out: &mut W,
    ) -> Result<(), DenisError> {
        header.check_payload(payload.len())?;
        let padding = usize::from(header.padding);

        let total_chunks = payload.len() / PAIR_SIZE;
        let iterations = key.iterations();

        for (index, pair) in payload.chunks_exact(PAIR_SIZE).enumerate() {
            self.checkpoint()?;
            let (previous, current) = pair.split_at(CHUNK_SIZE);
            self.engine.upload_previous(&unpack_bits(previous)?)?;
            self.engine.upload_current(&unpack_bits(current)?)?;

            for step in 1..=iterations {
                self.checkpoint()?;
                self.engine.step_backward()?;
                self.observe(Direction::Backward, index, total_chunks, step, iterations)?;
            }
            if iterations == 0 {
                self.observe(Direction::Backward, index, total_chunks, 0, 0)?;
            }
            trace!(chunk = index, steps = iterations, "backward steps done");

            let grid = self.engine.download_current()?;
            let keep = if index + 1 == total_chunks {
                GRID_CELLS - padding * 8
            } else {
                GRID_CELLS
            };
            let mut bytes = pack_bits(&grid[..keep])?;
            apply_keystream(&mut bytes, key.xor_key())?;
            out.write_all(&bytes)?;
            bytes.zeroize();
            debug!(chunk = index, bytes = keep / 8, "chunk decoded");
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), DenisError> {
        match &self.observer {
            Some(obs) if !obs.is_alive() => Err(DenisError::Cancelled),
            _ => Ok(()),
        }
    }

    fn observe(
        &self,
        direction: Direction,
        chunk_index: usize,
        total_chunks: usize,
        iteration: u16,
        total_iterations: u16,
    ) -> Result<(), DenisError> {
        let Some(obs) = &self.observer else {
            return Ok(());
        };
        if obs.wants(iteration, total_iterations) {
            obs.publish(Snapshot {
                direction,
                chunk_index,
                total_chunks,
                iteration,
                total_iterations,
                current: self.engine.download_current()?,
            });
        }
        Ok(())
    }
}

/// Read until `buf` is full or EOF; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, DenisError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Encode a buffer on the host device.
pub fn encode_bytes(data: &[u8], key: &Key, content_tag: ContentTag) -> Result<Vec<u8>, DenisError> {
    Pipeline::new()?.encode_bytes(data, key, content_tag)
}

/// Decode container bytes on the host device.
pub fn decode_bytes(container: &[u8], key: &Key) -> Result<Vec<u8>, DenisError> {
    Pipeline::new()?.decode_bytes(container, key)
}

/// Encode a file on the host device.
pub fn encode_file(
    input: &Path,
    output: Option<&Path>,
    key: &Key,
    opts: &EncodeOptions,
) -> Result<EncodeReport, DenisError> {
    Pipeline::new()?.encode_file(input, output, key, opts)
}

/// Decode a container file on the host device.
pub fn decode_file(
    input: &Path,
    output: Option<&Path>,
    key: &Key,
    opts: &DecodeOptions,
) -> Result<PathBuf, DenisError> {
    Pipeline::new()?.decode_file(input, output, key, opts)
}

/// Read and validate a container file without running the engine.
pub fn inspect_file(input: &Path) -> Result<ContainerHeader, DenisError> {
    let bytes = fs::read(input)?;
    let (header, _) = decode_container(&bytes)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HEADER_LEN;

    fn key(iterations: u16) -> Key {
        Key::new(*b"0123456789abcdef", iterations)
    }

    #[test]
    fn one_byte_scenario() {
        let k = Key::new([0; 16], 1);
        let mut p = Pipeline::new().unwrap();
        let container = p.encode_bytes(&[0x41], &k, ContentTag::Any).unwrap();

        let (header, payload) = decode_container(&container).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.padding, 8191);
        assert_eq!(payload.len(), PAIR_SIZE);
        // previous generation after one step is the seeded chunk itself.
        assert_eq!(payload[0], 0x41);
        assert!(payload[1..CHUNK_SIZE].iter().all(|&b| b == 0));

        assert_eq!(p.decode_bytes(&container, &k).unwrap(), vec![0x41]);
    }

    #[test]
    fn empty_input_has_no_chunks() {
        let mut p = Pipeline::new().unwrap();
        let container = p.encode_bytes(&[], &key(3), ContentTag::Any).unwrap();
        assert_eq!(container.len(), HEADER_LEN + 8);
        assert!(p.decode_bytes(&container, &key(3)).unwrap().is_empty());
    }

    #[test]
    fn engine_is_reusable_across_runs() {
        let mut p = Pipeline::new().unwrap();
        let a = p.encode_bytes(b"first", &key(2), ContentTag::Text).unwrap();
        let b = p.encode_bytes(b"second", &key(2), ContentTag::Text).unwrap();
        assert_eq!(p.decode_bytes(&a, &key(2)).unwrap(), b"first");
        assert_eq!(p.decode_bytes(&b, &key(2)).unwrap(), b"second");
    }

    #[test]
    fn nul_tag_is_rejected() {
        let mut p = Pipeline::new().unwrap();
        assert!(matches!(
            p.encode_bytes(b"x", &key(1), ContentTag::None),
            Err(DenisError::Invalid(_))
        ));
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        let (_, container) = encode_container(&[0u8; 100], ContentTag::Any, VERSION, 0).unwrap();
        assert!(matches!(
            decode_bytes(&container, &key(1)),
            Err(DenisError::MisalignedPayload { len: 100, .. })
        ));
    }

    #[test]
    fn out_of_range_padding_is_rejected() {
        let (_, container) =
            encode_container(&vec![0u8; PAIR_SIZE], ContentTag::Any, VERSION, CHUNK_SIZE as u16)
                .unwrap();
        assert!(matches!(
            decode_bytes(&container, &key(1)),
            Err(DenisError::PaddingOutOfRange { .. })
        ));

        let (_, container) = encode_container(&[], ContentTag::Any, VERSION, 1).unwrap();
        assert!(matches!(
            decode_bytes(&container, &key(1)),
            Err(DenisError::PaddingOutOfRange { .. })
        ));
    }

    #[test]
    fn cancelled_observer_stops_the_run() {
        let obs = Observer::new(4);
        obs.cancel();
        let mut p = Pipeline::new().unwrap().with_observer(obs);
        assert!(matches!(
            p.encode_bytes(b"data", &key(5), ContentTag::Any),
            Err(DenisError::Cancelled)
        ));
    }

    #[test]
    fn observer_sees_each_step() {
        let obs = Observer::new(64);
        let mut p = Pipeline::new().unwrap().with_observer(obs.clone());
        p.encode_bytes(b"watch me", &key(3), ContentTag::Any).unwrap();
        obs.close();
        let seen: Vec<(Direction, u16)> = std::iter::from_fn(|| obs.recv())
            .map(|s| (s.direction, s.iteration))
            .collect();
        assert_eq!(
            seen,
            vec![
                (Direction::Forward, 1),
                (Direction::Forward, 2),
                (Direction::Forward, 3)
            ]
        );
    }
}

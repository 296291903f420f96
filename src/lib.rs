#![forbid(unsafe_code)]
//! # denis — reversible cellular-automaton scrambling for files.
//!
//! `denis` turns a file into a DENIS container by running 256×256 bit grids
//! through a reversible second-order Game of Life, combined with a repeating
//! XOR keystream. Running the pipeline backward with the same key restores the
//! original bytes exactly.
//!
//! ## Features
//! - **Reversible engine** over three rotating device buffers
//! - **Pluggable compute device** (`ComputeDevice`); a rayon-backed host
//!   device ships by default
//! - **Versioned container** with magic, content tag, padding count and a
//!   fixed terminator
//! - **Progress observation** through a bounded, drop-oldest snapshot queue
//!
//! ## Example: round-trip a byte array
//! ```no_run
//! use denis::{decode_bytes, encode_bytes, ContentTag, Key};
//!
//! let key: Key = "000102030405060708090a0b0c0d0e0f:0008".parse().unwrap();
//! let container = encode_bytes(b"Hello, world!", &key, ContentTag::Any).unwrap();
//! let plain = decode_bytes(&container, &key).unwrap();
//! assert_eq!(plain, b"Hello, world!");
//! ```
//!
//! ## Example: watch a run
//! ```no_run
//! use denis::{ContentTag, Key, Observer, Pipeline};
//!
//! let observer = Observer::new(10).with_stride(16);
//! let consumer = observer.spawn(|snap| {
//!     println!("chunk {}/{}", snap.chunk_index + 1, snap.total_chunks);
//!     true
//! });
//! let mut pipeline = Pipeline::new().unwrap().with_observer(observer.clone());
//! let key = Key::generate_with_iterations(64).unwrap();
//! pipeline.encode_bytes(&[0u8; 20_000], &key, ContentTag::Any).unwrap();
//! observer.close();
//! consumer.join().unwrap();
//! ```
//!
//! Safety notes
//! - The keystream is a repeating 16-byte XOR. This is an obfuscation layer,
//!   not encryption; do not rely on it for confidentiality.

mod types;
mod key;
mod cipher;
mod grid;
mod device;
mod engine;
mod format;
mod file;
mod observer;
mod pipeline;

// Re-export public API from modules
pub use types::*;
pub use key::{Key, KEY_TEXT_LEN, XOR_KEY_LEN};
pub use cipher::{apply_keystream, keystream};
pub use grid::{Grid, empty_grid, pack_bits, unpack_bits};
pub use device::{
    BINDING_COUNT, BufferHandle, ComputeDevice, CpuDevice, DeviceError, KernelSource,
    ProgramHandle,
};
pub use engine::{BACKWARD_KERNEL, DISPATCH_GROUPS, FORWARD_KERNEL, ReversibleEngine};
pub use format::{
    ContainerHeader, HEADER_LEN, MAGIC, TERMINATOR, VERSION, VERSION_1, VERSION_2,
    decode_container, encode_container,
};
pub use file::{default_decode_output_path, default_encode_output_path, write_all_atomic};
pub use observer::{DEFAULT_QUEUE_CAPACITY, Direction, Observer, Snapshot};
pub use pipeline::{
    EncodeReport, Pipeline, decode_bytes, decode_file, encode_bytes, encode_file, inspect_file,
};

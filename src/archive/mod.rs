/**
 * Archive container handling
 *
 * One handler per container format behind a shared [`ArchiveHandler`] contract,
 * plus the factory that picks a handler from a file name.
 */
pub mod archive_handler;
pub mod atomic_swap;
pub mod factory;
pub mod progress_reporter;
pub mod tar_handler;
pub mod zip_handler;


pub use archive_handler::{ArchiveHandler, EntryVisitor};
pub use atomic_swap::AtomicSwap;
pub use factory::{
    create_for, create_for_with, is_supported, supported_extensions, ArchiveAdapter,
    ArchiveFormat,
};
pub use progress_reporter::{ProgressReporter, ProgressSink};
pub use tar_handler::TarHandler;
pub use zip_handler::ZipHandler;

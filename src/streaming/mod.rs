//! Paging and atomic file output.
//!
//! `pages` splits the ordered record list into fixed-size pages; the atomic
//! writers make sure nothing a run writes is ever visible half-written.

mod atomic_writer;
mod pages;

pub use atomic_writer::{write_lines_atomic, AtomicCsvWriter};
pub use pages::{plan_pages, PageBounds};

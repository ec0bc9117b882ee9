//! Flag handling for the MPI probe in `build.rs`.
//!
//! Kept free of build-dependencies so the integration tests can include it.

use std::path::PathBuf;

/// Compile and link flags for the C shim.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MpiFlags {
    pub include_paths: Vec<PathBuf>,
    pub link_paths: Vec<PathBuf>,
    pub libs: Vec<String>,
}

impl MpiFlags {
    /// Parse the command line printed by an MPI compiler wrapper
    /// (`mpicc -show` for MPICH, `mpicc --showme` for Open MPI).
    ///
    /// The leading compiler name and unrelated options are skipped. Both
    /// `-I/path` and `-I /path` forms are accepted.
    pub fn from_wrapper_line(line: &str) -> Self {
        let mut flags = MpiFlags::default();
        let mut words = line.split_whitespace().map(|w| w.trim_matches('"'));
        while let Some(word) = words.next() {
            let (flag, inline) = match word.get(..2) {
                Some(f @ ("-I" | "-L" | "-l")) => (f, &word[2..]),
                _ => continue,
            };
            let value = if inline.is_empty() {
                match words.next() {
                    Some(v) => v,
                    None => break,
                }
            } else {
                inline
            };
            match flag {
                "-I" => flags.include_paths.push(PathBuf::from(value)),
                "-L" => flags.link_paths.push(PathBuf::from(value)),
                _ => flags.libs.push(value.to_string()),
            }
        }
        flags
    }

    /// `mpi` is linked when the wrapper names no library at all.
    pub fn with_default_lib(mut self) -> Self {
        if self.libs.is_empty() {
            self.libs.push("mpi".to_string());
        }
        self
    }

    /// First `mpi.h` found on the include path.
    pub fn header(&self) -> Option<PathBuf> {
        self.include_paths
            .iter()
            .map(|dir| dir.join("mpi.h"))
            .find(|p| p.is_file())
    }
}

/// Whether an `mpi.h` declares MPI-3 shared-memory windows, which the shim
/// needs for node segments.
pub fn declares_shared_windows(header: &str) -> bool {
    header.contains("MPI_Win_allocate_shared") && header.contains("MPI_Win_shared_query")
}

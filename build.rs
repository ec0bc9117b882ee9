//! Build script for nodegroup.
//!
//! The default build needs nothing: discovery and allocation run over the
//! in-process backend. With the `mpi` feature the C shim in `csrc/` is
//! compiled against the local MPI, located through pkg-config
//! (`NODEGROUP_MPI_PKG` or the usual package names) or else through the
//! compiler wrapper (`MPICC`, default `mpicc`). The MPI found must provide
//! shared-memory windows.

#[path = "build/mpi_flags.rs"]
mod mpi_flags;

use std::env;
use std::fs;
use std::process::Command;

use mpi_flags::{declares_shared_windows, MpiFlags};

const SHIM: &str = "csrc/nodegroup.c";
const PKG_NAMES: &[&str] = &["mpich", "ompi", "mpi"];

fn main() {
    println!("cargo:rerun-if-changed={SHIM}");
    println!("cargo:rerun-if-changed=csrc/nodegroup.h");
    println!("cargo:rerun-if-changed=build/mpi_flags.rs");
    println!("cargo:rerun-if-env-changed=NODEGROUP_MPI_PKG");
    println!("cargo:rerun-if-env-changed=MPICC");

    if env::var_os("CARGO_FEATURE_MPI").is_none() {
        return;
    }

    let flags = match locate_mpi() {
        Ok(flags) => flags,
        Err(reasons) => panic!(
            "feature `mpi` is enabled but no MPI installation was found:\n  {}\n\
             Set NODEGROUP_MPI_PKG to the pkg-config package or MPICC to the \
             compiler wrapper, or build without `--features mpi`.",
            reasons.join("\n  ")
        ),
    };
    require_shared_windows(&flags);

    let mut build = cc::Build::new();
    build.file(SHIM).include("csrc").warnings(true);
    for dir in &flags.include_paths {
        build.include(dir);
    }
    build.compile("nodegroup");

    for dir in &flags.link_paths {
        println!("cargo:rustc-link-search=native={}", dir.display());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", dir.display());
    }
    for lib in &flags.libs {
        println!("cargo:rustc-link-lib={lib}");
    }
}

/// pkg-config first, then the compiler wrapper. Collects why each attempt failed.
fn locate_mpi() -> Result<MpiFlags, Vec<String>> {
    let mut reasons = Vec::new();

    let packages: Vec<String> = match env::var("NODEGROUP_MPI_PKG") {
        Ok(name) => vec![name],
        Err(_) => PKG_NAMES.iter().map(|s| s.to_string()).collect(),
    };
    for name in &packages {
        match pkg_config::Config::new().cargo_metadata(false).probe(name) {
            Ok(lib) => {
                return Ok(MpiFlags {
                    include_paths: lib.include_paths,
                    link_paths: lib.link_paths,
                    libs: lib.libs,
                }
                .with_default_lib())
            }
            Err(e) => reasons.push(format!("pkg-config {name}: {e}")),
        }
    }

    let wrapper = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());
    // MPICH answers -show, Open MPI --showme.
    for arg in ["-show", "--showme"] {
        match Command::new(&wrapper).arg(arg).output() {
            Ok(out) if out.status.success() => {
                let line = String::from_utf8_lossy(&out.stdout);
                return Ok(MpiFlags::from_wrapper_line(&line).with_default_lib());
            }
            Ok(out) => reasons.push(format!("{wrapper} {arg}: exit status {}", out.status)),
            Err(e) => {
                reasons.push(format!("{wrapper}: {e}"));
                break;
            }
        }
    }
    Err(reasons)
}

/// The shim allocates node segments with `MPI_Win_allocate_shared`; refuse
/// an MPI older than 3.0 here rather than with a C compile error.
fn require_shared_windows(flags: &MpiFlags) {
    let Some(header) = flags.header() else {
        // mpi.h lives on the compiler's default path; cc will find it.
        println!("cargo:warning=mpi.h not on the probed include path; skipping MPI-3 check");
        return;
    };
    println!("cargo:rerun-if-changed={}", header.display());
    match fs::read_to_string(&header) {
        Ok(text) if declares_shared_windows(&text) => {}
        Ok(_) => panic!(
            "{} does not declare MPI_Win_allocate_shared; nodegroup needs MPI 3.0 or newer",
            header.display()
        ),
        Err(e) => println!("cargo:warning=cannot read {}: {e}", header.display()),
    }
}

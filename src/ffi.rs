//! Raw FFI bindings to the C shim in `csrc/nodegroup.c`.
//!
//! These are low-level unsafe functions. Use the safe wrappers in [`crate::mpi`].
//! Communicators and windows are referred to by small integer handles into
//! tables kept on the C side; handle 0 is the world communicator.

use std::os::raw::{c_char, c_int, c_void};

extern "C" {
    // ============================================================
    // Initialization and Finalization
    // ============================================================

    pub fn nodegroup_init() -> c_int;
    pub fn nodegroup_finalize() -> c_int;
    pub fn nodegroup_initialized(flag: *mut c_int) -> c_int;

    // ============================================================
    // Communicator Operations
    // ============================================================

    pub fn nodegroup_comm_world() -> i32;
    pub fn nodegroup_comm_rank(comm: i32, rank: *mut i32) -> c_int;
    pub fn nodegroup_comm_size(comm: i32, size: *mut i32) -> c_int;
    pub fn nodegroup_comm_dup(comm: i32, newcomm: *mut i32) -> c_int;
    pub fn nodegroup_comm_split(comm: i32, color: i32, key: i32, newcomm: *mut i32) -> c_int;
    pub fn nodegroup_comm_free(comm: i32) -> c_int;
    pub fn nodegroup_get_processor_name(name: *mut c_char, len: *mut i32) -> c_int;

    // ============================================================
    // Collectives
    // ============================================================

    /// All-gather of `count` bytes per member into `recvbuf` (`count * size` bytes).
    pub fn nodegroup_allgather_bytes(
        sendbuf: *const c_void,
        count: i64,
        recvbuf: *mut c_void,
        comm: i32,
    ) -> c_int;

    pub fn nodegroup_allreduce_sum_i64(value: i64, result: *mut i64, comm: i32) -> c_int;

    // ============================================================
    // Shared Memory Windows
    // ============================================================

    /// Collective: allocate `size` bytes locally; returns the base of rank 0's
    /// segment and its size.
    pub fn nodegroup_win_allocate_shared(
        size: i64,
        comm: i32,
        baseptr: *mut *mut c_void,
        segsize: *mut i64,
        win: *mut i32,
    ) -> c_int;

    pub fn nodegroup_win_free(win: i32) -> c_int;
}

//! Job headers and the header+parameter co-allocation.
//!
//! A job is a single heap block laid out as `[padding | JobHeader | params]`.
//! The public API traffics exclusively in the params pointer; the header is
//! recovered at a fixed backward offset. All of the offset arithmetic lives
//! in this module so no call site repeats pointer math.

use crate::id_map::{JobId, INVALID_JOB_ID};
use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

/// Job callback type. Receives the parameter block pointer that was returned
/// by [`JobSystem::new_job`] and filled in by the caller.
///
/// [`JobSystem::new_job`]: crate::JobSystem::new_job
pub type JobFn = unsafe fn(*mut u8);

/// Self-describing allocation header preceding every parameter block.
#[repr(C)]
pub(crate) struct JobHeader {
    /// Assigned at submission; `INVALID_JOB_ID` until then.
    pub id: JobId,
    pub func: JobFn,
    /// Weak link; the parent outlives the child because the child's
    /// completion is counted in the parent's `unfinished`.
    pub parent: *mut JobHeader,
    /// Effective alignment of the whole allocation, recorded for dealloc.
    pub alignment: usize,
    pub alloc_size: usize,
    /// Outstanding completions: the job itself plus one per linked child.
    pub unfinished: AtomicU32,
}

/// A queued job. Plain pointer under the hood; ownership is transferred
/// through the queues and ends at the finish chain.
#[derive(Clone, Copy)]
pub(crate) struct JobRef(pub *mut JobHeader);

unsafe impl Send for JobRef {}

impl JobHeader {
    /// Alignment actually used for the allocation: the caller's request,
    /// raised so the header itself is also aligned.
    pub fn effective_alignment(param_alignment: usize) -> usize {
        param_alignment.max(mem::align_of::<JobHeader>())
    }

    /// Bytes between the allocation start and the parameter block: the
    /// header size rounded up to `alignment`, which places the params on an
    /// `alignment` boundary with the header ending flush against them.
    pub fn padded_size(alignment: usize) -> usize {
        mem::size_of::<JobHeader>().div_ceil(alignment) * alignment
    }

    /// Recovers the header from a parameter block pointer.
    ///
    /// # Safety
    /// `params` must have been produced by [`allocate_job`] and not yet
    /// released.
    pub unsafe fn from_params(params: *mut u8) -> *mut JobHeader {
        params.sub(mem::size_of::<JobHeader>()) as *mut JobHeader
    }

    /// The parameter block trailing this header.
    ///
    /// # Safety
    /// `header` must point at a live header created by [`allocate_job`].
    pub unsafe fn params(header: *mut JobHeader) -> *mut u8 {
        (header as *mut u8).add(mem::size_of::<JobHeader>())
    }
}

/// Allocates a job header plus an uninitialized, correctly aligned parameter
/// block in one block. Allocation failure is fatal.
///
/// # Safety
/// `parent`, when present, must be the live parameter block of a job whose
/// completion has not yet been observed (unsubmitted, or still running).
pub(crate) unsafe fn allocate_job(
    func: JobFn,
    param_size: usize,
    param_alignment: usize,
    parent: Option<NonNull<u8>>,
) -> NonNull<u8> {
    debug_assert!(
        param_alignment.is_power_of_two(),
        "parameter alignment must be a power of two"
    );
    let alignment = JobHeader::effective_alignment(param_alignment);
    let padding = JobHeader::padded_size(alignment);
    let alloc_size = padding + param_size;
    // Overflow here means a nonsensical parameter size; treat it like any
    // other allocation failure.
    let layout = match Layout::from_size_align(alloc_size, alignment) {
        Ok(layout) => layout,
        Err(_) => alloc::handle_alloc_error(Layout::new::<JobHeader>()),
    };

    let raw = alloc::alloc(layout);
    if raw.is_null() {
        alloc::handle_alloc_error(layout);
    }
    let params = raw.add(padding);
    let header = JobHeader::from_params(params);
    header.write(JobHeader {
        id: INVALID_JOB_ID,
        func,
        parent: ptr::null_mut(),
        alignment,
        alloc_size,
        unfinished: AtomicU32::new(1),
    });
    if let Some(parent_params) = parent {
        let parent_header = JobHeader::from_params(parent_params.as_ptr());
        (*header).parent = parent_header;
        (*parent_header).unfinished.fetch_add(1, Ordering::Relaxed);
    }
    NonNull::new_unchecked(params)
}

/// Frees a job allocation using the layout recorded at creation.
///
/// # Safety
/// `header` must be a live header whose outstanding count has reached zero;
/// it must not be referenced again.
pub(crate) unsafe fn release_job(header: *mut JobHeader) {
    let alignment = (*header).alignment;
    let alloc_size = (*header).alloc_size;
    let padding = JobHeader::padded_size(alignment);
    let raw = JobHeader::params(header).sub(padding);
    // The header holds no owned resources; the opaque params are the
    // job function's to clean up.
    let layout = Layout::from_size_align_unchecked(alloc_size, alignment);
    alloc::dealloc(raw, layout);
}

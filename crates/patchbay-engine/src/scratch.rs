use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Planar channel storage sized before the audio thread starts, so driver
/// callbacks can convert between interleaved and planar layouts without
/// touching the allocator.
#[derive(Debug, Default, Clone)]
pub struct PlanarScratch {
    channels: Vec<Vec<f32>>,
}

impl PlanarScratch {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Splits interleaved samples into the planar buffers.
    pub fn deinterleave(&mut self, interleaved: &[f32], stride: usize) -> usize {
        let stride = stride.max(1);
        let frames = (interleaved.len() / stride).min(self.frames());
        for (channel, buffer) in self.channels.iter_mut().enumerate() {
            for (frame, sample) in buffer[..frames].iter_mut().enumerate() {
                *sample = if channel < stride {
                    interleaved[frame * stride + channel]
                } else {
                    0.0
                };
            }
        }
        frames
    }

    /// Writes the first `frames` planar frames into `interleaved`.
    pub fn interleave(&self, interleaved: &mut [f32], stride: usize, frames: usize) {
        let stride = stride.max(1);
        let frames = frames.min(self.frames()).min(interleaved.len() / stride);
        for frame in 0..frames {
            for channel in 0..stride {
                interleaved[frame * stride + channel] = self
                    .channels
                    .get(channel)
                    .map(|buffer| buffer[frame])
                    .unwrap_or(0.0);
            }
        }
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slices(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(Vec::as_slice)
    }

    pub fn slices_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }
}

thread_local! {
    static RT_SCOPE: Cell<bool> = const { Cell::new(false) };
}

static RT_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

/// Marks the current thread as running node code until dropped.
///
/// Allocations made inside the scope are counted when [`RtAllocCounter`] is
/// the global allocator.
pub struct RtAllocGuard {
    previous: bool,
    // Thread-local state: the guard must drop on the thread that entered it.
    _not_send: PhantomData<*const ()>,
}

impl RtAllocGuard {
    #[inline]
    pub fn enter() -> Self {
        let previous = RT_SCOPE.with(|flag| flag.replace(true));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for RtAllocGuard {
    #[inline]
    fn drop(&mut self) {
        RT_SCOPE.with(|flag| flag.set(self.previous));
    }
}

/// Whether the calling thread is inside an [`RtAllocGuard`].
#[inline]
pub fn in_rt_scope() -> bool {
    RT_SCOPE.try_with(Cell::get).unwrap_or(false)
}

/// Allocations counted inside RT scopes since the last reset.
pub fn rt_allocation_count() -> usize {
    RT_ALLOCATIONS.load(Ordering::SeqCst)
}

pub fn reset_rt_allocation_count() {
    RT_ALLOCATIONS.store(0, Ordering::SeqCst);
}

/// System allocator that counts allocations made inside RT scopes.
///
/// Install it with `#[global_allocator]` in test binaries.
pub struct RtAllocCounter;

impl RtAllocCounter {
    #[inline]
    fn record(&self) {
        if in_rt_scope() {
            RT_ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
        }
    }
}

unsafe impl GlobalAlloc for RtAllocCounter {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.record();
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.record();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.record();
        System.alloc_zeroed(layout)
    }
}

#[cfg(test)]
#[global_allocator]
static GLOBAL_ALLOCATOR: RtAllocCounter = RtAllocCounter;

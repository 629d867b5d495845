//! Queue sizing from a fraction of available memory.

/// Memory budgeted per queued record (record header plus a typical payload).
pub const RECORD_SLOT_BYTES: u64 = 2048;

/// Smallest capacity handed to any worker queue.
pub const MIN_QUEUE_CAPACITY: usize = 64;

/// Largest capacity handed to any worker queue.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Slots per worker queue when `fraction` of `available_bytes` is split
/// evenly across `workers` queues.
///
/// Fractions outside `[0, 1]` are clamped; the result is clamped to
/// `[MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY]`.
pub fn capacity_for(fraction: f64, available_bytes: u64, workers: usize) -> usize {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let budget = (available_bytes as f64 * fraction) as u64;
    let per_worker = budget / workers.max(1) as u64;
    let slots = per_worker / RECORD_SLOT_BYTES;
    usize::try_from(slots)
        .unwrap_or(MAX_QUEUE_CAPACITY)
        .clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY)
}

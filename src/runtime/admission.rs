//! Ingress admission control: a channel-backed counting semaphore that
//! gates `Emit` independently of the ingress channel's own bound, so the
//! `expand` overflow strategy (§4.9) can temporarily raise the effective
//! capacity and let it shrink back as the surplus drains.
use std::sync::atomic::{AtomicUsize, Ordering};

/// A pool of admission permits. `nominal` permits exist for the lifetime of
/// the query; `expand` issues additional *retiring* permits that are
/// destroyed (not returned to the pool) the first time they are released,
/// so the effective capacity relaxes back to `nominal` once the surge of
/// in-flight records has drained.
pub struct Admission {
	tx: async_channel::Sender<()>,
	rx: async_channel::Receiver<()>,
	pending_retirement: AtomicUsize,
	nominal: usize,
}

impl Admission {
	/// `bound` must be at least `nominal`; for overflow strategies other
	/// than `expand` the two are equal.
	pub fn new(nominal: usize, bound: usize) -> Self {
		let bound = bound.max(nominal).max(1);
		let (tx, rx) = async_channel::bounded(bound);
		for _ in 0..nominal {
			let _ = tx.try_send(());
		}
		Admission { tx, rx, pending_retirement: AtomicUsize::new(0), nominal }
	}

	pub fn try_acquire(&self) -> bool {
		self.rx.try_recv().is_ok()
	}

	pub async fn acquire(&self) {
		let _ = self.rx.recv().await;
	}

	pub fn acquire_blocking(&self) {
		let _ = self.rx.recv_blocking();
	}

	/// A future that resolves once a permit is available. Exposed
	/// separately from [`Self::acquire`] so callers can race it against a
	/// timeout with `futures::future::select`.
	pub fn recv(&self) -> async_channel::Recv<'_, ()> {
		self.rx.recv()
	}

	/// Returns a permit to the pool, unless it is retiring an
	/// expand-issued surplus permit instead (§4.9 "shrinks as drained").
	pub fn release(&self) {
		loop {
			let pending = self.pending_retirement.load(Ordering::Relaxed);
			if pending == 0 {
				let _ = self.tx.try_send(());
				return;
			}
			if self
				.pending_retirement
				.compare_exchange(pending, pending - 1, Ordering::Relaxed, Ordering::Relaxed)
				.is_ok()
			{
				return;
			}
		}
	}

	/// Attempts to raise the effective capacity by up to `batch` permits,
	/// never past `max_capacity`. Returns how many permits were actually
	/// added.
	pub fn try_expand(&self, max_capacity: usize, batch: usize) -> usize {
		let pending = self.pending_retirement.load(Ordering::Relaxed);
		let effective = self.nominal + pending;
		let room = max_capacity.saturating_sub(effective);
		let delta = room.min(batch);
		for _ in 0..delta {
			let _ = self.tx.try_send(());
		}
		if delta > 0 {
			self.pending_retirement.fetch_add(delta, Ordering::Relaxed);
		}
		delta
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn acquire_and_release_round_trip() {
		let a = Admission::new(2, 2);
		assert!(a.try_acquire());
		assert!(a.try_acquire());
		assert!(!a.try_acquire());
		a.release();
		assert!(a.try_acquire());
	}

	#[test]
	fn expand_permits_retire_instead_of_returning() {
		let a = Admission::new(1, 4);
		assert!(a.try_acquire());
		assert!(!a.try_acquire());
		let added = a.try_expand(4, 2);
		assert_eq!(added, 2);
		assert!(a.try_acquire());
		assert!(a.try_acquire());
		assert!(!a.try_acquire());
		// Releasing retires the surplus first instead of growing the pool
		// back past nominal.
		a.release();
		a.release();
		assert!(!a.try_acquire());
		a.release();
		assert!(a.try_acquire());
	}
}

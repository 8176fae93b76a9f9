//! Cross-worker reductions used by data-parallel training.

use crate::common::*;

/// A communication group of data-parallel workers.
///
/// Every worker of the group must call [Collective::sum_across_workers] the
/// same number of times. Each call blocks until all workers arrive.
pub trait Collective {
    fn world_size(&self) -> usize;

    fn sum_across_workers(&self, value: f64) -> Result<f64>;
}

/// The collective of a program running without data parallelism.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn sum_across_workers(&self, value: f64) -> Result<f64> {
        Ok(value)
    }
}

/// An in-process group whose workers run on separate threads.
#[derive(Debug)]
pub struct LocalGroup {
    world_size: usize,
    barrier: Barrier,
    slots: Mutex<[f64; 2]>,
}

impl LocalGroup {
    /// Create a group of `world_size` workers.
    pub fn new(world_size: usize) -> Result<Vec<LocalWorker>> {
        ensure!(world_size > 0, "world_size must be positive");

        let group = Arc::new(LocalGroup {
            world_size,
            barrier: Barrier::new(world_size),
            slots: Mutex::new([0.0; 2]),
        });

        let workers = (0..world_size)
            .map(|rank| LocalWorker {
                rank,
                round: AtomicUsize::new(0),
                group: group.clone(),
            })
            .collect();
        Ok(workers)
    }
}

/// A member of a [LocalGroup].
#[derive(Debug)]
pub struct LocalWorker {
    rank: usize,
    round: AtomicUsize,
    group: Arc<LocalGroup>,
}

impl LocalWorker {
    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl Collective for LocalWorker {
    fn world_size(&self) -> usize {
        self.group.world_size
    }

    fn sum_across_workers(&self, value: f64) -> Result<f64> {
        let LocalGroup {
            ref barrier,
            ref slots,
            ..
        } = *self.group;
        let lock_slots = || {
            slots
                .lock()
                .map_err(|_| format_err!("the collective state is poisoned"))
        };

        // consecutive rounds alternate between two slots, so the slot of the
        // next round can be cleared while this round is being read
        let round = self.round.fetch_add(1, atomic::Ordering::SeqCst);
        let slot = round % 2;

        lock_slots()?[slot] += value;

        if barrier.wait().is_leader() {
            lock_slots()?[1 - slot] = 0.0;
        }
        let sum = lock_slots()?[slot];

        barrier.wait();
        Ok(sum)
    }
}

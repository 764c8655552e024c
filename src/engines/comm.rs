use {
    super::stats::Average,
    anyhow::{
        anyhow,
        bail,
        Result,
    },
    std::{
        collections::BTreeMap,
        sync::{
            Arc,
            Condvar,
            Mutex,
            MutexGuard,
            PoisonError,
        },
    },
};


type Stats = BTreeMap<String, f64>;

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("A worker panicked while waiting for the group")
}

#[derive(Default)]
struct Gate {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

struct Shared {
    gate: Mutex<Gate>,
    opened: Condvar,
    slots: Mutex<Vec<Stats>>,
}


/// One worker's handle on a group of workers training in parallel.
///
/// Worker `0` is the root, the only one that evaluates and writes to disk.
/// A worker that fails calls [`Communicator::abort`], after which every
/// other worker's pending or next reduction returns an error.
#[derive(Clone)]
pub struct Communicator {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}
impl Communicator {
    /// Handles for `size` workers (at least one), ordered by rank.
    pub fn group(size: usize) -> Vec<Self> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            gate: Mutex::new(Gate::default()),
            opened: Condvar::new(),
            slots: Mutex::new(vec![Stats::new(); size]),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }

    /// A group of one.
    pub fn single() -> Self {
        Self::group(1).remove(0)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Release every worker waiting on the group, and fail all later waits.
    pub fn abort(&self) {
        let mut gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.aborted = true;
        self.shared.opened.notify_all();
    }

    fn slots(&self) -> Result<MutexGuard<'_, Vec<Stats>>> {
        self.shared
            .slots
            .lock()
            .map_err(|_| anyhow!("A worker panicked while sharing its statistics"))
    }

    /// Block until every worker of the group has arrived.
    fn wait(&self) -> Result<()> {
        let mut gate = self.shared.gate.lock().map_err(poisoned)?;
        if gate.aborted {
            bail!("Worker {} stopped, another worker of the group failed", self.rank);
        }
        gate.arrived += 1;
        if gate.arrived == self.size {
            gate.arrived = 0;
            gate.generation += 1;
            self.shared.opened.notify_all();
            return Ok(());
        }

        let generation = gate.generation;
        while gate.generation == generation && !gate.aborted {
            gate = self.shared.opened.wait(gate).map_err(poisoned)?;
        }
        if gate.generation == generation {
            bail!("Worker {} stopped, another worker of the group failed", self.rank);
        }
        Ok(())
    }

    /// Average every statistic over the workers, blocking until all of them
    /// have reported.
    ///
    /// A statistic a worker reported as NaN (or not at all) does not count
    /// towards its average.
    pub fn all_reduce_mean(
        &self,
        stats: &Stats,
    ) -> Result<Stats> {
        self.slots()?[self.rank] = stats.clone();
        self.wait()?;

        let mut combined: BTreeMap<String, Average> = BTreeMap::new();
        for slot in self.slots()?.iter() {
            for (key, value) in slot {
                *combined.entry(key.clone()).or_default() += *value;
            }
        }

        // nobody may overwrite their slot before everyone has read it
        self.wait()?;
        Ok(combined
            .into_iter()
            .map(|(key, average)| (key, average.get()))
            .collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_worker_gets_its_own_stats() -> Result<()> {
        let comm = Communicator::single();
        assert!(comm.is_root());
        assert_eq!(comm.size(), 1);
        let stats: Stats = [("a".to_owned(), 4.0)].into();
        assert_eq!(comm.all_reduce_mean(&stats)?, stats);
        Ok(())
    }

    #[test]
    fn workers_agree_on_the_averages() {
        let comms = Communicator::group(3);
        let results: Vec<Stats> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let rank = comm.rank() as f64;
                        let mut stats: Stats = [
                            ("rank".to_owned(), rank),
                            ("sparse".to_owned(), if rank == 0.0 { f64::NAN } else { rank }),
                        ]
                        .into();
                        if comm.is_root() {
                            stats.insert("root_only".to_owned(), 7.0);
                        }
                        // twice, so the slots get reused
                        comm.all_reduce_mean(&stats).unwrap();
                        comm.all_reduce_mean(&stats).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for combined in results {
            assert_eq!(combined["rank"], 1.0);
            assert_eq!(combined["sparse"], 1.5);
            assert_eq!(combined["root_only"], 7.0);
        }
    }

    #[test]
    fn an_aborted_group_releases_the_waiting_workers() {
        let mut comms = Communicator::group(2);
        let failing = comms.pop().unwrap();
        let waiting = comms.pop().unwrap();
        let stats: Stats = [("a".to_owned(), 1.0)].into();

        std::thread::scope(|s| {
            let handle = s.spawn(|| waiting.all_reduce_mean(&stats));
            failing.abort();
            let err = handle.join().unwrap().unwrap_err().to_string();
            assert!(err.contains("another worker of the group failed"), "{err}");
        });
        assert!(failing.all_reduce_mean(&stats).is_err());
    }
}

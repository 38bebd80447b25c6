//! Gather boundary for distributed inference.
//!
//! Each worker runs the detector on its own shard and feeds the evaluator.
//! Before scoring, predictions are brought to rank 0; every other rank ends
//! up with nothing to score.

use std::sync::{Arc, Barrier};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::selector::ImagePrediction;

/// Process group seen by one evaluator
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Block until every rank reaches this point.
    fn synchronize(&self);

    /// Collect predictions of all ranks on rank 0, ordered by rank.
    ///
    /// Returns `None` on every other rank.
    fn gather(&self, predictions: Vec<ImagePrediction>) -> Option<Vec<ImagePrediction>>;

    fn is_main_process(&self) -> bool {
        self.rank() == 0
    }
}

/// A group of one
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn synchronize(&self) {}

    fn gather(&self, predictions: Vec<ImagePrediction>) -> Option<Vec<ImagePrediction>> {
        Some(predictions)
    }
}

type Shard = (usize, Vec<ImagePrediction>);

/// Channel end held by a member: rank 0 receives, every other rank sends
enum Endpoint {
    Root(Receiver<Shard>),
    Worker(Sender<Shard>),
}

/// In-process group of worker threads sharing a barrier and a channel to rank 0
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
    endpoint: Endpoint,
}

impl LocalGroup {
    /// Create one member per rank; hand each to its own thread.
    ///
    /// The channel closes once every non-root member is dropped, so a rank
    /// that exits without sending ends the gather instead of stalling it.
    pub fn create(world_size: usize) -> Vec<LocalGroup> {
        let world_size = world_size.max(1);
        let barrier = Arc::new(Barrier::new(world_size));
        let (sender, receiver) = unbounded();

        let mut members = Vec::with_capacity(world_size);
        members.push(LocalGroup {
            rank: 0,
            world_size,
            barrier: Arc::clone(&barrier),
            endpoint: Endpoint::Root(receiver),
        });
        members.extend((1..world_size).map(|rank| LocalGroup {
            rank,
            world_size,
            barrier: Arc::clone(&barrier),
            endpoint: Endpoint::Worker(sender.clone()),
        }));
        members
    }
}

impl Communicator for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn synchronize(&self) {
        self.barrier.wait();
    }

    fn gather(&self, predictions: Vec<ImagePrediction>) -> Option<Vec<ImagePrediction>> {
        let receiver = match &self.endpoint {
            Endpoint::Root(receiver) => receiver,
            Endpoint::Worker(sender) => {
                if sender.send((self.rank, predictions)).is_err() {
                    log::warn!("Rank {} could not reach rank 0", self.rank);
                }
                return None;
            }
        };

        let mut shards: Vec<Shard> = Vec::with_capacity(self.world_size);
        shards.push((0, predictions));
        for _ in 1..self.world_size {
            match receiver.recv() {
                Ok(shard) => shards.push(shard),
                Err(_) => {
                    log::warn!(
                        "Gather ended early: received {} of {} shards",
                        shards.len(),
                        self.world_size
                    );
                    break;
                }
            }
        }
        shards.sort_by_key(|(rank, _)| *rank);
        Some(shards.into_iter().flat_map(|(_, preds)| preds).collect())
    }
}

use crate::model::CycleNetworks;
use crate::training::joint::JointOptimizer;

/// Everything a resumed run needs: the iteration counter, the four
/// networks and the four optimizers' moment estimates.
pub struct TrainingState<G, D, OG, OD> {
    pub iteration: usize,
    pub networks: CycleNetworks<G, D>,
    pub optimizers: JointOptimizer<OG, OD>,
}

impl<G, D, OG, OD> TrainingState<G, D, OG, OD> {
    /// A state at iteration 0.
    pub fn fresh(networks: CycleNetworks<G, D>, optimizers: JointOptimizer<OG, OD>) -> Self {
        Self {
            iteration: 0,
            networks,
            optimizers,
        }
    }
}

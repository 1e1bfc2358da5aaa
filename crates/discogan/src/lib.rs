//! DiscoGAN: unpaired cross-domain image translation.
//!
//! Two generators (G: X → Y, F: Y → X) and two patch discriminators
//! (Dy, Dx) are trained jointly with adversarial and cycle-consistency
//! losses. Each iteration computes the four objectives against one snapshot
//! of the parameters and applies four independent Adam updates.

pub mod inference;
pub mod model;
pub mod training;

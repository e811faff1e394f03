use rand::Rng;

use super::{Adaptation, SetupError, SplitMergeSetupKernel};

/// Anchors drawn uniformly without replacement; no adaptation, any anchor
/// count up to the data size.
#[derive(Clone, Debug)]
pub struct UniformSetupKernel {
    num_data_points: usize,
    adaptation: Adaptation,
}

impl UniformSetupKernel {
    #[must_use]
    pub fn new<X>(data: &[X]) -> Self {
        Self {
            num_data_points: data.len(),
            adaptation: Adaptation::new(None),
        }
    }
}

impl<X> SplitMergeSetupKernel<X> for UniformSetupKernel {
    fn num_data_points(&self) -> usize {
        self.num_data_points
    }

    fn adaptation_mut(&mut self) -> &mut Adaptation {
        &mut self.adaptation
    }

    fn can_update(&mut self, _clustering: &[usize]) -> bool {
        false
    }

    fn propose_anchors<R: Rng>(
        &mut self,
        num_anchors: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, SetupError> {
        Ok(rand::seq::index::sample(rng, self.num_data_points, num_anchors).into_vec())
    }
}

use std::num::NonZeroUsize;

/// How many adaptation steps each macro-loop runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundBudget {
    all_loop: usize,
    global_eps: Vec<usize>,
}

impl RoundBudget {
    /// Splits the available batches among `loops` macro-loops.
    ///
    /// # Arguments
    /// * `min_len` - The length of the smallest partition.
    /// * `ttt_batch` - The amount of samples per adaptation step.
    /// * `loops` - The amount of macro-loops.
    ///
    /// # Returns
    /// A budget of `min_len / ttt_batch` steps where every loop gets the same
    /// share and the last one also takes the remainder.
    pub fn new(min_len: usize, ttt_batch: NonZeroUsize, loops: NonZeroUsize) -> Self {
        let all_loop = min_len / ttt_batch;
        let avg = all_loop / loops;
        let rem = all_loop % loops;

        let mut global_eps = vec![avg; loops.get()];
        if let Some(last) = global_eps.last_mut() {
            *last += rem;
        }

        Self {
            all_loop,
            global_eps,
        }
    }

    /// Returns the total amount of steps per corruption slot and level.
    #[inline]
    pub fn all_loop(&self) -> usize {
        self.all_loop
    }

    #[inline]
    pub fn global_eps(&self) -> &[usize] {
        &self.global_eps
    }

    /// Returns the amount of steps of macro-loop `lp`.
    #[inline]
    pub fn steps(&self, lp: usize) -> usize {
        self.global_eps.get(lp).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn remainder_goes_to_the_last_loop() {
        let budget = RoundBudget::new(23, nz(2), nz(3));

        assert_eq!(budget.all_loop(), 11);
        assert_eq!(budget.global_eps(), &[3, 3, 5]);
    }

    #[test]
    fn steps_are_conserved() {
        for min_len in [0, 1, 7, 10, 99, 1000] {
            for ttt in 1..6 {
                for loops in 1..5 {
                    let budget = RoundBudget::new(min_len, nz(ttt), nz(loops));

                    assert_eq!(budget.global_eps().len(), loops);
                    assert_eq!(budget.global_eps().iter().sum::<usize>(), budget.all_loop());
                    assert_eq!(budget.all_loop(), min_len / ttt);
                }
            }
        }
    }

    #[test]
    fn single_batch_single_loop() {
        let budget = RoundBudget::new(5, nz(5), nz(1));
        assert_eq!(budget.global_eps(), &[1]);
        assert_eq!(budget.steps(1), 0);
    }
}

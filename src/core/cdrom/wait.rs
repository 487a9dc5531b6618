// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded busy-waiting

/// Cycle budget for a busy-wait loop
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::cdrom::Deadline;
///
/// let mut deadline = Deadline::new(1_000, 400);
/// assert_eq!(deadline.step(), Some(400));
/// assert_eq!(deadline.step(), Some(400));
/// assert_eq!(deadline.step(), Some(200));
/// assert_eq!(deadline.step(), None);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: u64,
    elapsed: u64,
    step: u32,
}

impl Deadline {
    /// Create a budget of `budget` cycles consumed `step` cycles at a time
    pub fn new(budget: u64, step: u32) -> Self {
        Self {
            budget,
            elapsed: 0,
            step: step.max(1),
        }
    }

    /// Cycles to wait for the next poll, or `None` once the budget is spent
    pub fn step(&mut self) -> Option<u32> {
        let remaining = self.budget.saturating_sub(self.elapsed);
        if remaining == 0 {
            return None;
        }
        let cycles = remaining.min(self.step as u64) as u32;
        self.elapsed += cycles as u64;
        Some(cycles)
    }

    /// Cycles consumed so far
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_expires_immediately() {
        let mut deadline = Deadline::new(0, 100);
        assert_eq!(deadline.step(), None);
        assert_eq!(deadline.elapsed(), 0);
    }

    #[test]
    fn test_last_step_is_cut_to_budget() {
        let mut deadline = Deadline::new(250, 100);
        assert_eq!(deadline.step(), Some(100));
        assert_eq!(deadline.step(), Some(100));
        assert_eq!(deadline.step(), Some(50));
        assert_eq!(deadline.elapsed(), 250);
        assert_eq!(deadline.step(), None);
    }

    #[test]
    fn test_zero_step_is_clamped() {
        let mut deadline = Deadline::new(2, 0);
        assert_eq!(deadline.step(), Some(1));
    }
}
